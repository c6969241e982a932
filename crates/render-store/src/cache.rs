//! Local tier of the two-tier store
//!
//! A [`LocalCache`] maps artifact ids onto files in one directory and decides
//! whether a request is served locally ([`Lookup::Hit`]) or needs the remote
//! tier ([`Lookup::Miss`]). No eviction happens here.

use std::path::{Path, PathBuf};
use tokio::fs;

use crate::error::{Result, StoreError};

/// Outcome of a local cache lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// The artifact is present at this path
    Hit(PathBuf),
    /// The artifact belongs at this path but is absent
    Miss(PathBuf),
}

impl Lookup {
    pub fn path(&self) -> &Path {
        match self {
            Lookup::Hit(path) | Lookup::Miss(path) => path,
        }
    }

    pub fn into_path(self) -> PathBuf {
        match self {
            Lookup::Hit(path) | Lookup::Miss(path) => path,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

/// One cache directory, one file per artifact, named by its id
#[derive(Debug, Clone)]
pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Local path of an artifact. Rejects ids that would leave the directory.
    pub fn path_for(&self, id: &str) -> Result<PathBuf> {
        validate_id(id)?;
        Ok(self.root.join(id))
    }

    /// Decide between local hit and remote fetch
    pub async fn lookup(&self, id: &str) -> Result<Lookup> {
        let path = self.path_for(id)?;
        match fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(Lookup::Hit(path)),
            _ => Ok(Lookup::Miss(path)),
        }
    }
}

/// Artifact ids are single file names
pub fn validate_id(id: &str) -> Result<()> {
    let invalid = id.is_empty()
        || id == "."
        || id == ".."
        || id.contains(['/', '\\', '\0']);

    if invalid {
        return Err(StoreError::InvalidId(id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_lookup_hit_and_miss() {
        let dir = tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        std::fs::write(dir.path().join("invoice.odt"), b"template").unwrap();

        let hit = cache.lookup("invoice.odt").await.unwrap();
        assert!(hit.is_hit());
        assert_eq!(hit.path(), dir.path().join("invoice.odt"));

        let miss = cache.lookup("letter.docx").await.unwrap();
        assert!(!miss.is_hit());
        assert_eq!(miss.into_path(), dir.path().join("letter.docx"));
    }

    #[tokio::test]
    async fn test_directory_is_not_a_hit() {
        let dir = tempdir().unwrap();
        std::fs::create_dir(dir.path().join("folder")).unwrap();
        let cache = LocalCache::new(dir.path());

        assert!(!cache.lookup("folder").await.unwrap().is_hit());
    }

    #[tokio::test]
    async fn test_missing_root_is_a_miss() {
        let dir = tempdir().unwrap();
        let cache = LocalCache::new(dir.path().join("not-created-yet"));

        assert!(!cache.lookup("report.pdf").await.unwrap().is_hit());
    }

    #[test]
    fn test_id_validation() {
        for id in ["invoice.odt", "9f86d081884c7d65", "report 2024.pdf", "..hidden"] {
            assert!(validate_id(id).is_ok(), "{id}");
        }
        for id in ["", ".", "..", "../etc/passwd", "a/b", "a\\b", "nul\0"] {
            assert!(matches!(validate_id(id), Err(StoreError::InvalidId(_))), "{id:?}");
        }
    }
}
