//! The patch cache (spec.md §6): a directory of files named with a leading
//! 40-hex SHA, used both by `-i/--insert-before` and by conflict recovery's
//! `ApplyCache`/`ApplyCacheOrInterrupt`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum PatchCacheError {
    #[error("failed to read cache directory {0}: {1}")]
    ReadDir(PathBuf, std::io::Error),
}

/// Maps a lowercased original-commit SHA to the patch file that recovers it.
#[derive(Debug, Clone, Default)]
pub struct PatchCache {
    entries: HashMap<String, PathBuf>,
}

impl PatchCache {
    /// Scan `dir` for files whose name starts with a 40-hex SHA. A SHA with
    /// more than one candidate logs a `warn!` and keeps the first in
    /// directory-listing order (spec.md §6).
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, PatchCacheError> {
        let dir = dir.as_ref();
        let sha_prefix = Regex::new(r"^[A-Fa-f0-9]{40}").expect("static regex is valid");
        let mut entries = HashMap::new();

        let read_dir = std::fs::read_dir(dir)
            .map_err(|e| PatchCacheError::ReadDir(dir.to_path_buf(), e))?;

        for entry in read_dir {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            let Some(m) = sha_prefix.find(name) else {
                continue;
            };
            let sha = m.as_str().to_ascii_lowercase();
            entries
                .entry(sha.clone())
                .and_modify(|_| {
                    log::warn!(
                        "multiple patch-cache files for {}; keeping the first found",
                        sha
                    );
                })
                .or_insert_with(|| entry.path());
        }

        Ok(Self { entries })
    }

    pub fn get(&self, sha: &str) -> Option<&Path> {
        self.entries.get(&sha.to_ascii_lowercase()).map(PathBuf::as_path)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn finds_file_by_sha_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let sha = "a".repeat(40);
        fs::write(dir.path().join(format!("{sha}-fix.patch")), b"x").unwrap();

        let cache = PatchCache::load(dir.path()).unwrap();
        assert!(cache.get(&sha).is_some());
        assert!(cache.get(&sha.to_uppercase()).is_some());
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn ignores_files_without_sha_prefix() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("readme.txt"), b"x").unwrap();

        let cache = PatchCache::load(dir.path()).unwrap();
        assert!(cache.is_empty());
    }

    #[test]
    fn keeps_first_of_duplicate_sha_entries() {
        let dir = tempfile::tempdir().unwrap();
        let sha = "b".repeat(40);
        fs::write(dir.path().join(format!("{sha}-one.patch")), b"x").unwrap();
        fs::write(dir.path().join(format!("{sha}-two.patch")), b"y").unwrap();

        let cache = PatchCache::load(dir.path()).unwrap();
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&sha).is_some());
    }
}
