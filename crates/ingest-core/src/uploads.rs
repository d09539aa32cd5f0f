use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use sha2::{Digest, Sha256};

const MAX_SAFE_NAME_CHARS: usize = 100;

/// A persisted upload: absolute path, path relative to the uploads root and
/// the content hash.
#[derive(Debug, Clone)]
pub struct StoredOriginal {
    pub abs: PathBuf,
    pub rel: String,
    pub sha256: String,
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Reduce a client-supplied file name to a path-safe form: ASCII word
/// characters, dots, dashes and Hangul syllables survive, everything else
/// is stripped, capped at 100 characters.
pub fn safe_name(name: &str) -> String {
    name.chars()
        .filter(|&ch| {
            ch.is_ascii_alphanumeric()
                || matches!(ch, '_' | '.' | '-')
                || ('가'..='힣').contains(&ch)
        })
        .take(MAX_SAFE_NAME_CHARS)
        .collect()
}

/// Write an uploaded original into the date-partitioned tree:
/// `{root}/YYYY/MM/DD/{sha8}_{unix_ms}_{safename}{ext}`. Paths are
/// write-once; nothing is ever rewritten in place.
pub fn store_original(
    root: &Path,
    original_name: &str,
    bytes: &[u8],
    now: DateTime<Utc>,
) -> std::io::Result<StoredOriginal> {
    let sha256 = sha256_hex(bytes);
    let day_dir = day_dir(root, now);
    fs::create_dir_all(&day_dir)?;

    let (stem, ext) = split_name(original_name);
    let file_name = format!(
        "{}_{}_{}{}",
        &sha256[..8],
        now.timestamp_millis(),
        safe_name(&stem),
        ext
    );

    let abs = day_dir.join(&file_name);
    fs::write(&abs, bytes)?;

    let rel = format!(
        "{:04}/{:02}/{:02}/{}",
        now.year(),
        now.month(),
        now.day(),
        file_name
    );

    Ok(StoredOriginal { abs, rel, sha256 })
}

/// Directory for derived artifacts of one upload:
/// `{root}/YYYY/MM/DD/{sha}/{pages|tables|pictures}`.
pub fn derivative_dir(root: &Path, now: DateTime<Utc>, sha256: &str, kind: &str) -> PathBuf {
    day_dir(root, now).join(sha256).join(kind)
}

fn day_dir(root: &Path, now: DateTime<Utc>) -> PathBuf {
    root.join(format!("{:04}", now.year()))
        .join(format!("{:02}", now.month()))
        .join(format!("{:02}", now.day()))
}

fn split_name(name: &str) -> (String, String) {
    let trimmed = name.trim();
    match trimmed.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
            (stem.to_string(), format!(".{}", ext.to_lowercase()))
        }
        _ => (trimmed.to_string(), String::new()),
    }
}
