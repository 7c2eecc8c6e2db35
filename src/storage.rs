use async_trait::async_trait;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ImageStoreError {
    #[error("duplicate")]
    Duplicate,
    #[error("not_found")]
    NotFound,
    #[error("other: {0}")]
    Other(String),
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    async fn save(&self, hash: &str, mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError>;
    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError>;
    async fn delete(&self, hash: &str) -> Result<(), ImageStoreError>;
}

/// Content-addressed file store under the media root. Keys are sha-256
/// hex digests, sharded by their first two characters.
pub struct FsImageStore {
    root: PathBuf,
}

impl FsImageStore {
    pub fn new() -> anyhow::Result<Self> {
        use anyhow::Context;
        let root = std::env::var("MEDIA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("media"));
        std::fs::create_dir_all(&root)
            .with_context(|| format!("creating media root '{}'", root.display()))?;
        info!("media store rooted at '{}'", root.display());
        Ok(Self { root })
    }

    fn path_for(&self, hash: &str) -> PathBuf {
        let mut p = self.root.clone();
        p.push(&hash[0..2]);
        p.push(hash);
        p
    }
}

#[async_trait]
impl ImageStore for FsImageStore {
    async fn save(&self, hash: &str, _mime: &str, bytes: &[u8]) -> Result<(), ImageStoreError> {
        let path = self.path_for(hash);
        if path.exists() {
            return Err(ImageStoreError::Duplicate);
        }
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| ImageStoreError::Other(e.to_string()))?;
        }
        std::fs::write(&path, bytes).map_err(|e| ImageStoreError::Other(e.to_string()))
    }

    async fn load(&self, hash: &str) -> Result<(Vec<u8>, String), ImageStoreError> {
        let path = self.path_for(hash);
        let bytes = std::fs::read(&path).map_err(|_| ImageStoreError::NotFound)?;
        // MIME is not persisted alongside the blob; sniff it back out.
        let mime = infer::get(&bytes)
            .map(|t| t.mime_type().to_string())
            .unwrap_or_else(|| "application/octet-stream".into());
        Ok((bytes, mime))
    }

    async fn delete(&self, hash: &str) -> Result<(), ImageStoreError> {
        // best-effort: a missing file already satisfies the caller
        let _ = std::fs::remove_file(self.path_for(hash));
        Ok(())
    }
}

/// Factory used in main; panics early on a misconfigured media root.
pub fn build_image_store() -> Arc<dyn ImageStore> {
    match FsImageStore::new() {
        Ok(store) => Arc::new(store),
        Err(e) => panic!("Failed to initialize media store: {e}"),
    }
}
