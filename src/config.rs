//! TOML configuration.
//!
//! Every section has defaults, so an empty file (or no file at all, via
//! [`Config::minimal`]) yields a server on `127.0.0.1:8000` that stores
//! uploads in the local `./bucket` directory and answers with the lexical
//! reader.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub reader: ReaderConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Local directory for transient upload copies, also served under `/uploads`.
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
    /// Cap on browser sessions whose preview is remembered.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            upload_dir: default_upload_dir(),
            max_upload_bytes: default_max_upload_bytes(),
            max_sessions: default_max_sessions(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}
fn default_max_upload_bytes() -> usize {
    50 * 1024 * 1024
}
fn default_max_sessions() -> usize {
    crate::session::DEFAULT_MAX_SESSIONS
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// `s3`, `filesystem`, or `memory`.
    #[serde(default = "default_storage_provider")]
    pub provider: String,
    #[serde(default)]
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// Root directory for the `filesystem` provider.
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            provider: default_storage_provider(),
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            root: default_storage_root(),
        }
    }
}

fn default_storage_provider() -> String {
    "filesystem".to_string()
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("bucket")
}
fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_passage_tokens")]
    pub passage_tokens: usize,
    /// Directories indexed once at startup.
    #[serde(default)]
    pub seed_dirs: Vec<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            passage_tokens: default_passage_tokens(),
            seed_dirs: Vec::new(),
        }
    }
}

fn default_passage_tokens() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_retriever_top_k")]
    pub retriever_top_k: usize,
    #[serde(default = "default_reader_top_k")]
    pub reader_top_k: usize,
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            retriever_top_k: default_retriever_top_k(),
            reader_top_k: default_reader_top_k(),
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
        }
    }
}

fn default_retriever_top_k() -> usize {
    5
}
fn default_reader_top_k() -> usize {
    1
}
fn default_bm25_k1() -> f64 {
    1.2
}
fn default_bm25_b() -> f64 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct ReaderConfig {
    /// `lexical` or `http`.
    #[serde(default = "default_reader_provider")]
    pub provider: String,
    /// Inference endpoint for the `http` reader.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            provider: default_reader_provider(),
            url: None,
            model: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_reader_provider() -> String {
    "lexical".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}

impl Config {
    /// Defaults for every section; used when no config file exists.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Checks cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.index.passage_tokens == 0 {
            bail!("index.passage_tokens must be > 0");
        }
        if self.retrieval.retriever_top_k < 1 {
            bail!("retrieval.retriever_top_k must be >= 1");
        }
        if self.retrieval.reader_top_k < 1 {
            bail!("retrieval.reader_top_k must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.bm25_b) {
            bail!("retrieval.bm25_b must be in [0.0, 1.0]");
        }
        if self.retrieval.bm25_k1 < 0.0 {
            bail!("retrieval.bm25_k1 must be >= 0.0");
        }
        if self.server.max_sessions == 0 {
            bail!("server.max_sessions must be >= 1");
        }

        match self.storage.provider.as_str() {
            "s3" => {
                if self.storage.bucket.is_empty() {
                    bail!("storage.bucket must be set when provider is 's3'");
                }
            }
            "filesystem" => {
                if self.storage.root.as_os_str().is_empty() {
                    bail!("storage.root must be set when provider is 'filesystem'");
                }
            }
            "memory" => {}
            other => bail!(
                "Unknown storage provider: '{}'. Must be s3, filesystem, or memory.",
                other
            ),
        }

        match self.reader.provider.as_str() {
            "lexical" => {}
            "http" => {
                if self.reader.url.is_none() {
                    bail!("reader.url must be set when provider is 'http'");
                }
            }
            other => bail!(
                "Unknown reader provider: '{}'. Must be lexical or http.",
                other
            ),
        }

        Ok(())
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
