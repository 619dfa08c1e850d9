use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use crate::Result;

/// Index entry of one persisted asset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetRecord {
    /// Entity the asset belongs to.
    pub entity_id: String,
    /// Type tag supplied at upload, used as the file extension.
    pub asset_type: String,
    /// Location of the asset file.
    pub path: PathBuf,
}

/// Stores uploaded assets as flat files under one folder.
///
/// The id-to-record index lives in memory only and is empty after a restart.
#[derive(Clone)]
pub struct DiskAssetStore {
    folder: PathBuf,
    assets: Arc<RwLock<HashMap<String, AssetRecord>>>,
}

impl DiskAssetStore {
    /// Creates a store writing into `folder`, creating it if needed.
    pub async fn open(folder: impl Into<PathBuf>) -> Result<Self> {
        let folder = folder.into();
        tokio::fs::create_dir_all(&folder).await?;

        Ok(Self {
            folder,
            assets: Arc::new(RwLock::new(HashMap::new())),
        })
    }

    /// Returns the folder assets are written to.
    pub fn folder(&self) -> &Path {
        &self.folder
    }

    /// Writes `data` in a single write and returns the generated asset id.
    pub async fn save(&self, entity_id: &str, asset_type: &str, data: &[u8]) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let path = self.folder.join(format!("{id}{asset_type}"));

        tokio::fs::write(&path, data).await?;

        let record = AssetRecord {
            entity_id: entity_id.to_string(),
            asset_type: asset_type.to_string(),
            path,
        };
        self.assets.write().await.insert(id.clone(), record);

        Ok(id)
    }

    /// Returns a copy of the record for `id`, if any.
    pub async fn find(&self, id: &str) -> Option<AssetRecord> {
        self.assets.read().await.get(id).cloned()
    }

    /// Returns the number of assets persisted since startup.
    pub async fn len(&self) -> usize {
        self.assets.read().await.len()
    }

    /// Returns `true` if nothing has been persisted since startup.
    pub async fn is_empty(&self) -> bool {
        self.assets.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn save_writes_file_and_indexes_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskAssetStore::open(dir.path().join("assets")).await.unwrap();

        let id = store.save("entity-1", ".jpg", b"pixels").await.unwrap();

        let record = store.find(&id).await.unwrap();
        assert_eq!(record.entity_id, "entity-1");
        assert_eq!(record.asset_type, ".jpg");
        assert_eq!(record.path, store.folder().join(format!("{id}.jpg")));
        assert_eq!(tokio::fs::read(&record.path).await.unwrap(), b"pixels");
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskAssetStore::open(dir.path()).await.unwrap();

        let a = store.save("e", ".png", b"a").await.unwrap();
        let b = store.save("e", ".png", b"b").await.unwrap();
        assert_ne!(a, b);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn write_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskAssetStore::open(dir.path()).await.unwrap();

        // A type tag containing a missing directory makes the write fail.
        let result = store.save("e", "/missing/dir.bin", b"x").await;
        assert!(matches!(result, Err(crate::Error::Io(_))));
        assert!(store.is_empty().await);
    }
}
