//! Storage abstraction for the remote tier

use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub mod azure_storage;
pub mod blob_storage;
pub mod retry;

pub use azure_storage::{AzureClient, AzureContainer};
pub use blob_storage::{BlobError, BlobOp, BlobStorage, MemoryStorage, StoredBlob};

pub(crate) fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({s})")).unwrap_or_default()
}

/// A download in progress next to its target path.
///
/// Data goes to a hidden sibling file that is renamed over the target on
/// [`PartialFile::commit`]. Dropping it uncommitted removes the sibling, so a
/// failed or cancelled download never shows up at the target path.
pub(crate) struct PartialFile {
    file: Option<fs::File>,
    temp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl PartialFile {
    pub(crate) async fn create(target: &Path) -> io::Result<Self> {
        if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }

        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = target.with_file_name(format!(".{}.{}.part", name, Uuid::new_v4().simple()));
        let file = fs::File::create(&temp).await?;

        Ok(Self {
            file: Some(file),
            temp,
            target: target.to_path_buf(),
            committed: false,
        })
    }

    pub(crate) async fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self.file.as_mut() {
            Some(file) => file.write_all(buf).await,
            None => Err(io::Error::other("partial file already closed")),
        }
    }

    pub(crate) async fn commit(mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await?;
        }
        fs::rename(&self.temp, &self.target).await?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.temp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_uncommitted_partial_file_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("render.pdf");

        {
            let mut partial = PartialFile::create(&target).await.unwrap();
            partial.write_all(b"half a pdf").await.unwrap();
        }

        assert!(!target.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_commit_replaces_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("render.pdf");
        std::fs::create_dir_all(target.parent().unwrap()).unwrap();
        std::fs::write(&target, b"old").unwrap();

        let mut partial = PartialFile::create(&target).await.unwrap();
        partial.write_all(b"new").await.unwrap();
        partial.commit().await.unwrap();

        assert_eq!(std::fs::read(&target).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(target.parent().unwrap()).unwrap().count(), 1);
    }
}
