//! Temporary-file scheme and small shared helpers.
//!
//! Every intermediate artifact (DSL file, emitted source and header, shared
//! object) lives in the first of `$TMPDIR`, `$TMP`, `$TEMP` or `.` under a
//! `_<tag>_` name with a random tag, and is unlinked as soon as it has served
//! its purpose, on success and failure paths alike.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Resolve the directory for intermediate files.
pub(crate) fn temp_dir() -> PathBuf {
    for key in ["TMPDIR", "TMP", "TEMP"] {
        if let Ok(v) = env::var(key) {
            if !v.is_empty() {
                return PathBuf::from(v);
            }
        }
    }
    PathBuf::from(".")
}

/// Random hex tag for naming intermediate files.
pub(crate) fn temp_tag() -> String {
    format!("{:x}", rand::random::<u32>())
}

/// Owns a path and unlinks it on drop.
///
/// Dropping after a successful `dlopen` is fine: the loaded image stays
/// mapped after the file is gone.
pub(crate) struct TempPath(PathBuf);

impl TempPath {
    pub(crate) fn new(path: PathBuf) -> Self {
        TempPath(path)
    }

    pub(crate) fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.0);
    }
}

/// `[A-Za-z_][A-Za-z0-9_]*`, with the empty string admitted (prefixes may be
/// empty; callers that require content check for it separately).
pub(crate) fn valid_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        None => return true,
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        Some(_) => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_ident() {
        assert!(valid_ident(""));
        assert!(valid_ident("_"));
        assert!(valid_ident("mnist"));
        assert!(valid_ident("_a9_Z"));
        assert!(!valid_ident("9a"));
        assert!(!valid_ident("a-b"));
        assert!(!valid_ident("a b"));
    }

    #[test]
    fn test_temp_path_unlinks() {
        let p = temp_dir().join(format!("_{}_.probe", temp_tag()));
        fs::write(&p, b"x").unwrap();
        assert!(p.exists());
        drop(TempPath::new(p.clone()));
        assert!(!p.exists());
    }

    #[test]
    fn test_temp_dir_falls_back() {
        // Whatever the environment, the answer is a usable directory name.
        assert!(!temp_dir().as_os_str().is_empty());
    }
}
