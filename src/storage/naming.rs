// Default artifact file names derived from the input artifact's name.
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::errors::CustodyResult;

pub const KEYCHAINS_PREFIX: &str = "keychains-";
pub const WALLET_PREFIX: &str = "wallet-";
pub const PAYMENTS_PREFIX: &str = "payments-";
pub const UNSIGNED_PREFIX: &str = "unsigned-";
pub const SIGNED_PREFIX: &str = "signed-";
pub const SUBMIT_PREFIX: &str = "submit-";

fn stem(path: &Path) -> String {
    let name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    match name.strip_suffix(".json") {
        Some(stem) => stem.to_string(),
        None => name,
    }
}

/// `<outfix><stem without infix>.json`, e.g. `payments-x.json` → `unsigned-x.json`.
pub fn out_file(input: &Path, infix: &str, outfix: &str) -> String {
    let stem = stem(input);
    let base = stem.strip_prefix(infix).unwrap_or(&stem);
    format!("{}{}.json", outfix, base)
}

/// Label implied by a keychain file name (`keychains-<label>.json`).
pub fn label_from_keychains_file(path: &Path) -> String {
    let stem = stem(path);
    stem.strip_prefix(KEYCHAINS_PREFIX).unwrap_or(&stem).to_string()
}

pub fn keychains_file(label: &str) -> String {
    format!("{}{}.json", KEYCHAINS_PREFIX, label)
}

/// `recovery_<index>_<M>_<N>-<label>.json`, index 1-based.
pub fn recovery_file(index: u8, threshold: u8, total: u8, label: &str) -> String {
    format!("recovery_{}_{}_{}-{}.json", index, threshold, total, label)
}

/// Per-item result file of a batch: `submit-x.json` → `submit-x-07.json`.
pub fn batch_item_file(aggregate: &Path, offset: usize, count: usize) -> PathBuf {
    let width = count.max(1).to_string().len();
    let name = format!("{}-{:0width$}.json", stem(aggregate), offset, width = width);
    match aggregate.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// `keychains-*.json` files in `dir`, sorted by name.
pub fn discover_keychains(dir: &Path) -> CustodyResult<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map(|n| n.starts_with(KEYCHAINS_PREFIX) && n.ends_with(".json"))
                    .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}
