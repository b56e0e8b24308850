//! Filesystem-backed directory helper: `mkostemps`-style unique temp file
//! creation (spec.md §4.12, grounded on `original_source/Source/NameService/Dir.h`).

use nirvana_port::SteadyTime;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const MAX_TRIES: u32 = 10;
const PATTERN_LEN: usize = 6;

#[derive(Debug, Error)]
pub enum DirError {
    #[error("name does not end with a 6-character XXXXXX pattern before the suffix")]
    BadPattern,
    #[error("exhausted {0} attempts to find a unique name")]
    Exhausted(u32),
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A single directory on the host filesystem, used by the naming service
/// to mint temp files the way `Dir::mkostemps` does.
pub struct Dir {
    root: PathBuf,
    steady: SteadyTime,
}

impl Dir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), steady: SteadyTime::default() }
    }

    /// `name` must end with exactly `XXXXXX` (6 literal `X`s) immediately
    /// before its last `suffix_len` characters; those 6 characters are
    /// replaced with a hex-encoded timestamp and the file is created with
    /// `O_CREAT|O_EXCL` semantics, retrying up to [`MAX_TRIES`] times on a
    /// collision (mirrors `Dir::mkostemps`'s timestamp-derived retry loop).
    pub fn mkostemps(&self, name: &str, suffix_len: usize) -> Result<(File, String), DirError> {
        let name_len = name.len();
        if name_len < PATTERN_LEN + suffix_len {
            return Err(DirError::BadPattern);
        }
        let pattern_end = name_len - suffix_len;
        let pattern_start = pattern_end - PATTERN_LEN;
        let bytes = name.as_bytes();
        if bytes[pattern_start..pattern_end].iter().any(|&b| b != b'X') {
            return Err(DirError::BadPattern);
        }

        let prefix = &name[..pattern_start];
        let suffix = &name[pattern_end..];

        for _ in 0..MAX_TRIES {
            let timestamp = self.steady.now() as u32;
            let hex = encode_pattern(timestamp);
            let candidate = format!("{prefix}{hex}{suffix}");
            let path = self.root.join(&candidate);
            match OpenOptions::new().read(true).write(true).create_new(true).open(&path) {
                Ok(file) => return Ok((file, candidate)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Err(DirError::Exhausted(MAX_TRIES))
    }

    pub fn path(&self) -> &Path {
        &self.root
    }
}

/// Renders the low 24 bits of `timestamp` as 6 hex digits, one nibble per
/// `X`, least-significant nibble first (matches the original's per-nibble
/// shift-and-mask loop).
fn encode_pattern(timestamp: u32) -> String {
    let mut t = timestamp;
    let mut digits = [0u8; PATTERN_LEN];
    for d in digits.iter_mut() {
        let nibble = (t & 0x0F) as u8;
        *d = if nibble < 10 { b'0' + nibble } else { b'A' + nibble - 10 };
        t >>= 4;
    }
    digits.reverse();
    String::from_utf8(digits.to_vec()).expect("hex digits are ASCII")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::sync::atomic::{AtomicU64, Ordering};

    static COUNTER: AtomicU64 = AtomicU64::new(0);

    fn temp_root() -> PathBuf {
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!("nirvana-naming-test-{}-{n}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn mkostemps_creates_unique_file_matching_pattern() {
        let dir = Dir::new(temp_root());
        let (mut file, name) = dir.mkostemps("tmpXXXXXX.tmp", 4).unwrap();
        assert!(name.starts_with("tmp"));
        assert!(name.ends_with(".tmp"));
        assert_eq!(name.len(), "tmpXXXXXX.tmp".len());
        file.sync_all().unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn mkostemps_rejects_bad_pattern() {
        let dir = Dir::new(temp_root());
        assert!(matches!(dir.mkostemps("short.tmp", 4), Err(DirError::BadPattern)));
        assert!(matches!(dir.mkostemps("tmpXXYYY.tmp", 4), Err(DirError::BadPattern)));
    }

    #[test]
    fn mkostemps_retries_are_independent_calls() {
        let dir = Dir::new(temp_root());
        let (_f1, n1) = dir.mkostemps("tmpXXXXXX.tmp", 4).unwrap();
        let (_f2, n2) = dir.mkostemps("tmpXXXXXX.tmp", 4).unwrap();
        assert_ne!(n1, n2);
    }
}
