//! Asset store for record images.
//!
//! Compressed portraits are pushed here and only their URLs are kept on the
//! record. Two backends: an external asset host behind a multipart upload
//! endpoint, and a local directory served by the HTTP layer (the default, and
//! what tests use).

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::{AssetBackend, AssetsConfig};
use crate::rid::Rid;
use crate::storage::{BackendLocal, StorageManager};

pub trait AssetStore: Send + Sync {
    /// Store `data` under a logical folder, returning a public URL.
    fn upload(&self, folder: &str, data: &[u8]) -> anyhow::Result<String>;
}

/// Writes assets below the uploads dir; the web layer serves them at
/// `/files/`.
pub struct LocalAssetStore {
    backend: BackendLocal,
    public_base_url: String,
}

impl LocalAssetStore {
    pub fn new(uploads_dir: PathBuf, public_base_url: String) -> anyhow::Result<Self> {
        let assets_dir = uploads_dir.join("assets");
        let backend = BackendLocal::new(
            assets_dir
                .to_str()
                .ok_or_else(|| anyhow::anyhow!("uploads dir is not valid utf8"))?,
        )?;
        Ok(Self {
            backend,
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl AssetStore for LocalAssetStore {
    fn upload(&self, folder: &str, data: &[u8]) -> anyhow::Result<String> {
        // flat names; the folder survives only in the file name
        let safe_folder = folder.replace(['/', '\\'], "_");
        let ident = format!("{safe_folder}-{}.jpg", Rid::new());
        self.backend.write(&ident, data)?;
        Ok(format!("{}/assets/{ident}", self.public_base_url))
    }
}

#[derive(Debug, serde::Deserialize)]
struct UploadResponse {
    secure_url: Option<String>,
    url: Option<String>,
}

/// Multipart upload to an external asset host.
pub struct HttpAssetStore {
    client: reqwest::blocking::Client,
    endpoint: String,
    api_key: Option<String>,
    folder_prefix: String,
}

impl HttpAssetStore {
    pub fn new(config: &AssetsConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| anyhow::anyhow!("asset host endpoint is not configured"))?;

        let api_key = std::env::var(&config.api_key_env).ok();
        if api_key.is_none() {
            log::warn!(
                "{} is not set; uploading to the asset host unauthenticated",
                config.api_key_env
            );
        }

        Ok(Self {
            client: reqwest::blocking::Client::new(),
            endpoint,
            api_key,
            folder_prefix: config.folder_prefix.clone(),
        })
    }
}

impl AssetStore for HttpAssetStore {
    fn upload(&self, folder: &str, data: &[u8]) -> anyhow::Result<String> {
        let part = reqwest::blocking::multipart::Part::bytes(data.to_vec())
            .file_name("portrait.jpg")
            .mime_str("image/jpeg")?;
        let form = reqwest::blocking::multipart::Form::new()
            .text("folder", format!("{}/{folder}", self.folder_prefix))
            .part("file", part);

        let mut req = self.client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key.clone());
        }

        let resp = req.send()?;
        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("asset host upload failed: {status}");
        }

        let body: UploadResponse = resp.json()?;
        body.secure_url
            .or(body.url)
            .ok_or_else(|| anyhow::anyhow!("asset host response carries no url"))
    }
}

/// Build the configured asset store.
pub fn from_config(config: &AssetsConfig, uploads_dir: PathBuf) -> anyhow::Result<Arc<dyn AssetStore>> {
    match config.backend {
        AssetBackend::Local => Ok(Arc::new(LocalAssetStore::new(
            uploads_dir,
            config.public_base_url.clone(),
        )?)),
        AssetBackend::Http => Ok(Arc::new(HttpAssetStore::new(config)?)),
    }
}
