// Helpers to keep secrets and oversized payloads out of logs.

/// Shortened public identifier suitable for log lines (`xpub661M…q2Zf`).
pub fn short_id(public: &str) -> String {
    let chars: Vec<char> = public.chars().collect();
    if chars.len() <= 12 {
        return public.to_string();
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

/// Truncate an upstream response body before it is attached to an error.
pub fn redact_body(s: &str) -> String {
    const MAX: usize = 512;
    if s.chars().count() <= MAX {
        return s.to_string();
    }
    let head: String = s.chars().take(MAX).collect();
    format!("{}… <truncated len={}>", head, s.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("abc"), "abc");
        assert_eq!(short_id("xpub661MyMwAqRbcFabcdefghq2Zf"), "xpub661M…q2Zf");
    }

    #[test]
    fn test_redact_body_truncates() {
        let long = "x".repeat(2000);
        let out = redact_body(&long);
        assert!(out.ends_with("<truncated len=2000>"));
        assert_eq!(redact_body("short"), "short");
    }
}
