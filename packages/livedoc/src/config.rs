use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::client::RetryPolicy;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Two equivalent ways to configure:
//
//   config.toml:     [client]
//                    max_attempts = 6
//
//   env var:         LIVEDOC_CLIENT__MAX_ATTEMPTS=6   (double underscore = nesting)
//
// (single underscore stays within field names: LIVEDOC_INDEX__CHUNK_SIZE)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub client: ClientFileConfig,
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub index: IndexFileConfig,
}

/// Client-side tunables (lives under `[client]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClientFileConfig {
    /// Candidate servers as `host:port`, in preference order.
    #[serde(default = "default_servers")]
    pub servers: Vec<String>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
}

impl Default for ClientFileConfig {
    fn default() -> Self {
        Self {
            servers: default_servers(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
            search_debounce_ms: default_search_debounce_ms(),
        }
    }
}

/// Server tuning knobs (lives under `[server]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: usize,
    #[serde(default = "default_allowed_extensions")]
    pub allowed_extensions: Vec<String>,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            max_file_size_mb: default_max_file_size_mb(),
            allowed_extensions: default_allowed_extensions(),
        }
    }
}

/// Index and pipeline tunables (lives under `[index]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexFileConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,
}

impl Default for IndexFileConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            max_results: default_max_results(),
            similarity_threshold: default_similarity_threshold(),
            embedding_dimension: default_embedding_dimension(),
        }
    }
}

fn default_servers() -> Vec<String> {
    vec!["127.0.0.1:8080".to_string(), "127.0.0.1:8081".to_string()]
}
fn default_max_attempts() -> u32 {
    6
}
fn default_backoff_ms() -> u64 {
    2000
}
fn default_search_debounce_ms() -> u64 {
    300
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_max_file_size_mb() -> usize {
    50
}
// Only plain text until a pdf extractor backend exists; see
// doc_index::TextExtractor.
fn default_allowed_extensions() -> Vec<String> {
    vec!["txt".to_string()]
}
fn default_chunk_size() -> usize {
    500
}
fn default_chunk_overlap() -> usize {
    50
}
fn default_max_results() -> usize {
    5
}
fn default_similarity_threshold() -> f32 {
    0.6
}
fn default_embedding_dimension() -> usize {
    384
}

/// Build a figment that layers: defaults → config.toml → LIVEDOC_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `LIVEDOC_CLIENT__MAX_ATTEMPTS=10`  →  `client.max_attempts = 10`
///   `LIVEDOC_INDEX__CHUNK_SIZE=200`    →  `index.chunk_size = 200`
pub fn load_config(data_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(data_dir.join("config.toml")))
        .merge(Env::prefixed("LIVEDOC_").split("__"))
}

/// Parse a `host:port` endpoint string.
pub fn parse_endpoint(s: &str) -> Result<(String, u16)> {
    let Some((host, port)) = s.rsplit_once(':') else {
        bail!("endpoint '{s}' is not host:port");
    };
    if host.is_empty() {
        bail!("endpoint '{s}' has an empty host");
    }
    let port: u16 = port
        .parse()
        .with_context(|| format!("endpoint '{s}' has an invalid port"))?;
    Ok((host.to_string(), port))
}

impl ClientFileConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: Duration::from_millis(self.backoff_ms),
        }
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn endpoints(&self) -> Result<Vec<(String, u16)>> {
        self.servers.iter().map(|s| parse_endpoint(s)).collect()
    }
}

impl ServerFileConfig {
    pub fn max_file_size_bytes(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }
}

// =============================================================================
// Directory layout config (not tunable via figment — derived from --data-dir)
// =============================================================================

#[derive(Clone, Debug)]
pub struct LiveDocConfig {
    pub data_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub index_dir: PathBuf,
}

impl LiveDocConfig {
    pub fn new(custom_dir: Option<PathBuf>) -> Result<Self> {
        let data_dir = match custom_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("could not find home directory")?
                .join(".livedoc"),
        };

        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let upload_dir = data_dir.join("uploads");
        std::fs::create_dir_all(&upload_dir)
            .with_context(|| format!("Failed to create upload directory: {:?}", upload_dir))?;

        let index_dir = data_dir.join("index");
        std::fs::create_dir_all(&index_dir)
            .with_context(|| format!("Failed to create index directory: {:?}", index_dir))?;

        info!("Data directory: {}", data_dir.display());

        Ok(Self {
            data_dir,
            upload_dir,
            index_dir,
        })
    }

    pub fn config_toml_path(&self) -> PathBuf {
        self.data_dir.join("config.toml")
    }
}
