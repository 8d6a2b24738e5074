//! Interactive input of passphrases, credentials and confirmations.

use secrecy::SecretString;
use std::collections::VecDeque;
use std::io::{self, BufRead, IsTerminal, Write};

use crate::core::errors::{CustodyError, CustodyResult};

pub trait Prompter {
    /// Hidden input (passphrases, passwords, tokens).
    fn secret(&mut self, prompt: &str) -> CustodyResult<SecretString>;

    /// Echoed input.
    fn text(&mut self, prompt: &str) -> CustodyResult<String>;

    /// Yes/no question, defaulting to no.
    fn confirm(&mut self, prompt: &str) -> CustodyResult<bool> {
        let answer = self.text(&format!("{} [y/N]", prompt))?;
        let answer = answer.trim();
        Ok(answer.eq_ignore_ascii_case("y") || answer.eq_ignore_ascii_case("yes"))
    }
}

/// Reads from the controlling terminal; secrets are not echoed.
#[derive(Debug, Default)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn secret(&mut self, prompt: &str) -> CustodyResult<SecretString> {
        let value = rpassword::prompt_password(format!("{}: ", prompt))
            .map_err(|e| CustodyError::PromptError(e.to_string()))?;
        Ok(SecretString::new(value))
    }

    fn text(&mut self, prompt: &str) -> CustodyResult<String> {
        if !io::stdin().is_terminal() {
            return Err(CustodyError::PromptError(format!("{}: stdin is not a terminal", prompt)));
        }
        eprint!("{}: ", prompt);
        io::stderr().flush().map_err(|e| CustodyError::PromptError(e.to_string()))?;

        let mut line = String::new();
        io::stdin()
            .lock()
            .read_line(&mut line)
            .map_err(|e| CustodyError::PromptError(e.to_string()))?;
        Ok(line.trim_end_matches(['\r', '\n']).to_string())
    }
}

/// Answers prompts from a fixed list, in order. Records what was asked.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<String>,
    asked: Vec<String>,
}

impl ScriptedPrompter {
    pub fn new<I, S>(answers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { answers: answers.into_iter().map(Into::into).collect(), asked: Vec::new() }
    }

    /// Prompts shown so far.
    pub fn asked(&self) -> &[String] {
        &self.asked
    }

    fn next(&mut self, prompt: &str) -> CustodyResult<String> {
        self.asked.push(prompt.to_string());
        self.answers
            .pop_front()
            .ok_or_else(|| CustodyError::PromptError(format!("no answer for {:?}", prompt)))
    }
}

impl Prompter for ScriptedPrompter {
    fn secret(&mut self, prompt: &str) -> CustodyResult<SecretString> {
        self.next(prompt).map(SecretString::new)
    }

    fn text(&mut self, prompt: &str) -> CustodyResult<String> {
        self.next(prompt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn test_scripted_prompter() {
        let mut prompter = ScriptedPrompter::new(["pw", "yes", "no"]);
        assert_eq!(prompter.secret("Passphrase").unwrap().expose_secret(), "pw");
        assert!(prompter.confirm("Continue?").unwrap());
        assert!(!prompter.confirm("Again?").unwrap());
        assert!(matches!(prompter.text("More"), Err(CustodyError::PromptError(_))));
        assert_eq!(prompter.asked().len(), 4);
        assert_eq!(prompter.asked()[1], "Continue? [y/N]");
    }
}
