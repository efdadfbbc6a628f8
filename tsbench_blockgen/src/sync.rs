//! Hand finished blocks over to their final destination.

use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use bytes::Bytes;
use object_store::{ObjectStore, PutPayload, path::Path as ObjPath};
use tracing::{debug, info};

use crate::writer::META_FILENAME;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("{action} {}", path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("not a block directory: {}", .0.display())]
    NotABlock(PathBuf),

    #[error("upload {path}")]
    Upload {
        path: ObjPath,
        #[source]
        source: object_store::Error,
    },
}

/// Called once per block after it was written to disk.
#[async_trait]
pub trait BlockSyncer: Send + Sync + Debug {
    async fn sync(&self, block_dir: &Path) -> Result<(), SyncError>;
}

/// Leaves blocks where they are
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSyncer;

#[async_trait]
impl BlockSyncer for NoopSyncer {
    async fn sync(&self, _block_dir: &Path) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Uploads every file of a block to an object store, `meta.json` last.
///
/// Objects are stored as `<prefix>/<block id>/<file>`. A reader that finds `meta.json` can
/// assume the rest of the block is present.
#[derive(Debug)]
pub struct ObjectStoreSyncer {
    store: Arc<dyn ObjectStore>,
    prefix: ObjPath,
    remove_local: bool,
}

impl ObjectStoreSyncer {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            prefix: ObjPath::default(),
            remove_local: false,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<ObjPath>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Delete the local block directory after a successful upload.
    pub fn with_remove_local(mut self, remove_local: bool) -> Self {
        self.remove_local = remove_local;
        self
    }

    async fn upload(&self, file: &Path, location: ObjPath) -> Result<(), SyncError> {
        let data = tokio::fs::read(file).await.map_err(|source| SyncError::Io {
            action: "read",
            path: file.to_path_buf(),
            source,
        })?;
        let size = data.len();
        self.store
            .put(&location, PutPayload::from_bytes(Bytes::from(data)))
            .await
            .map_err(|source| SyncError::Upload {
                path: location.clone(),
                source,
            })?;
        debug!(%location, size, "uploaded file");
        Ok(())
    }
}

#[async_trait]
impl BlockSyncer for ObjectStoreSyncer {
    async fn sync(&self, block_dir: &Path) -> Result<(), SyncError> {
        let io_err = |action: &'static str| {
            move |source: std::io::Error| SyncError::Io {
                action,
                path: block_dir.to_path_buf(),
                source,
            }
        };

        let block_id = block_dir
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SyncError::NotABlock(block_dir.to_path_buf()))?;
        let block_prefix = self.prefix.child(block_id);

        let mut files = vec![];
        let mut entries = tokio::fs::read_dir(block_dir)
            .await
            .map_err(io_err("list"))?;
        while let Some(entry) = entries.next_entry().await.map_err(io_err("list"))? {
            if entry.file_type().await.map_err(io_err("stat"))?.is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        if !files.iter().any(|f| f == META_FILENAME) {
            return Err(SyncError::NotABlock(block_dir.to_path_buf()));
        }
        // meta.json sorts last
        files.sort_by_key(|f| (f == META_FILENAME, f.clone()));

        for file in &files {
            self.upload(&block_dir.join(file), block_prefix.child(file.as_str()))
                .await?;
        }
        info!(block = block_id, prefix = %block_prefix, files = files.len(), "uploaded block");

        if self.remove_local {
            tokio::fs::remove_dir_all(block_dir)
                .await
                .map_err(io_err("remove"))?;
            info!(dir = %block_dir.display(), "removed local block");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use futures::TryStreamExt;
    use object_store::memory::InMemory;

    use super::*;
    use pretty_assertions::assert_eq;

    fn fake_block(root: &Path, id: &str) -> PathBuf {
        let dir = root.join(id);
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("chunks.parquet"), b"chunks").unwrap();
        std::fs::write(dir.join("index.parquet"), b"index").unwrap();
        std::fs::write(dir.join(META_FILENAME), b"{}").unwrap();
        dir
    }

    async fn list(store: &InMemory) -> Vec<String> {
        let mut paths: Vec<_> = store
            .list(None)
            .map_ok(|m| m.location.to_string())
            .try_collect()
            .await
            .unwrap();
        paths.sort();
        paths
    }

    #[test_log::test(tokio::test)]
    async fn uploads_block_files() {
        let root = tempfile::tempdir().unwrap();
        let block = fake_block(root.path(), "block-1");
        let store = Arc::new(InMemory::new());

        let syncer = ObjectStoreSyncer::new(Arc::clone(&store) as _).with_prefix("blocks");
        syncer.sync(&block).await.unwrap();

        assert_eq!(
            list(&store).await,
            vec![
                "blocks/block-1/chunks.parquet",
                "blocks/block-1/index.parquet",
                "blocks/block-1/meta.json",
            ]
        );
        let meta = store
            .get(&ObjPath::from("blocks/block-1/meta.json"))
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
        assert_eq!(meta.as_ref(), b"{}");
        assert!(block.exists());
    }

    #[test_log::test(tokio::test)]
    async fn removes_local_copy() {
        let root = tempfile::tempdir().unwrap();
        let block = fake_block(root.path(), "block-2");
        let store = Arc::new(InMemory::new());

        ObjectStoreSyncer::new(Arc::clone(&store) as _)
            .with_remove_local(true)
            .sync(&block)
            .await
            .unwrap();

        assert_eq!(list(&store).await.len(), 3);
        assert!(!block.exists());
    }

    #[test_log::test(tokio::test)]
    async fn rejects_directory_without_meta() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("partial");
        std::fs::create_dir(&dir).unwrap();
        std::fs::write(dir.join("chunks.parquet"), b"chunks").unwrap();
        let store = Arc::new(InMemory::new());

        let err = ObjectStoreSyncer::new(Arc::clone(&store) as _)
            .sync(&dir)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::NotABlock(_)));
        assert!(list(&store).await.is_empty());
    }

    #[tokio::test]
    async fn noop() {
        NoopSyncer.sync(Path::new("/nonexistent")).await.unwrap();
    }
}
