use crate::storage::{self, StorageManager};
use serde::{Deserialize, Serialize};

const DEFAULT_BIND: &str = "0.0.0.0:8080";
/// Multipart body limit (uploads are small portraits)
const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Default acceptance threshold for a positive identification
const DEFAULT_THRESHOLD: f32 = 0.65;
const DEFAULT_SNAPSHOT_FILE: &str = "embeddings.bin";
const DEFAULT_DATASET_ROOT: &str = "dataset";

/// Default extractor model; the snapshot header pins this name
const DEFAULT_EXTRACTOR_MODEL: &str = "facenet";
const DEFAULT_EXTRACTOR_DIMENSIONS: usize = 128;
const DEFAULT_EXTRACTOR_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_BIND.to_string(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

/// Configuration of the embedding store and decision policy
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchingConfig {
    /// Snapshot file name, relative to the base dir
    #[serde(default = "default_snapshot_file")]
    pub snapshot: String,

    /// Root of the reference image dataset (`<root>/<category>/<file_id>`)
    #[serde(default = "default_dataset_root")]
    pub dataset_root: String,

    /// Minimum similarity score for a positive identification [0.0, 1.0]
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            snapshot: DEFAULT_SNAPSHOT_FILE.to_string(),
            dataset_root: DEFAULT_DATASET_ROOT.to_string(),
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Configuration of the external embedding extractor sidecar
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtractorConfig {
    /// Endpoint accepting an image and returning an embedding
    #[serde(default = "default_extractor_endpoint")]
    pub endpoint: String,

    /// Model name the sidecar runs; must match the snapshot
    #[serde(default = "default_extractor_model")]
    pub model: String,

    /// Embedding dimension the model produces
    #[serde(default = "default_extractor_dimensions")]
    pub dimensions: usize,

    #[serde(default = "default_extractor_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ExtractorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_extractor_endpoint(),
            model: DEFAULT_EXTRACTOR_MODEL.to_string(),
            dimensions: DEFAULT_EXTRACTOR_DIMENSIONS,
            timeout_secs: DEFAULT_EXTRACTOR_TIMEOUT_SECS,
        }
    }
}

/// Which asset backend record images are pushed to
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetBackend {
    /// Write under the uploads dir and serve via the HTTP layer
    #[default]
    Local,
    /// Multipart POST to an external asset host
    Http,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AssetsConfig {
    #[serde(default)]
    pub backend: AssetBackend,

    /// Upload endpoint of the asset host (http backend only)
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Name of the environment variable holding the asset host api key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Base url prepended to locally stored asset paths
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Folder prefix on the asset host
    #[serde(default = "default_folder_prefix")]
    pub folder_prefix: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            backend: AssetBackend::Local,
            endpoint: None,
            api_key_env: default_api_key_env(),
            public_base_url: default_public_base_url(),
            folder_prefix: default_folder_prefix(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub matching: MatchingConfig,
    #[serde(default)]
    pub extractor: ExtractorConfig,
    #[serde(default)]
    pub assets: AssetsConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: String,
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_max_upload_bytes() -> usize {
    DEFAULT_MAX_UPLOAD_BYTES
}

fn default_snapshot_file() -> String {
    DEFAULT_SNAPSHOT_FILE.to_string()
}

fn default_dataset_root() -> String {
    DEFAULT_DATASET_ROOT.to_string()
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_extractor_endpoint() -> String {
    "http://127.0.0.1:8500/represent".to_string()
}

fn default_extractor_model() -> String {
    DEFAULT_EXTRACTOR_MODEL.to_string()
}

fn default_extractor_dimensions() -> usize {
    DEFAULT_EXTRACTOR_DIMENSIONS
}

fn default_extractor_timeout_secs() -> u64 {
    DEFAULT_EXTRACTOR_TIMEOUT_SECS
}

fn default_api_key_env() -> String {
    "FACEMATCH_ASSET_API_KEY".to_string()
}

fn default_public_base_url() -> String {
    "http://127.0.0.1:8080/files".to_string()
}

fn default_folder_prefix() -> String {
    "master_database".to_string()
}

impl Config {
    fn validate(&mut self) {
        if !(0.0..=1.0).contains(&self.matching.threshold) {
            panic!(
                "matching.threshold must be between 0.0 and 1.0, got {}",
                self.matching.threshold
            );
        }

        if self.extractor.dimensions == 0 {
            panic!("extractor.dimensions must be greater than 0");
        }

        if self.extractor.timeout_secs == 0 {
            panic!("extractor.timeout_secs must be greater than 0");
        }

        if self.assets.backend == AssetBackend::Http {
            let endpoint = self
                .assets
                .endpoint
                .as_deref()
                .unwrap_or_default();
            if endpoint.is_empty() {
                panic!("assets.endpoint is required when assets.backend is 'http'");
            }
            if url::Url::parse(endpoint).is_err() {
                panic!("assets.endpoint is not a valid url: {endpoint}");
            }
        }
    }

    pub fn load_with(base_path: &str) -> Self {
        let store = storage::BackendLocal::new(base_path).expect("cannot create base directory");

        // create new if does not exist
        if !store.exists("config.yaml") {
            store
                .write(
                    "config.yaml",
                    serde_yml::to_string(&Self::default()).unwrap().as_bytes(),
                )
                .expect("cannot write default config");
        }

        let config_str = String::from_utf8(store.read("config.yaml").expect("cannot read config"))
            .expect("config file is not valid utf8");
        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");

        config.base_path = base_path.to_string();

        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).unwrap() {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let store =
            storage::BackendLocal::new(&self.base_path).expect("cannot create base directory");

        let config_str = serde_yml::to_string(&self).unwrap();
        store
            .write("config.yaml", config_str.as_bytes())
            .expect("cannot write config");
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }
}
