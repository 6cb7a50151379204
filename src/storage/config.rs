//! Configuration for chunk sync
//!
//! Loadable from a TOML file or from `CHUNKSYNC_*` environment variables.

use crate::chunks::downloader::DEFAULT_MAX_PARALLEL_DOWNLOADS;
use crate::chunks::merge::{MergeLimits, LARGE_MERGE_WARNING_LINES, MAX_MERGE_LINES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default per-file chunk cap: at ~100 lines per chunk, about 3M lines
pub const MAX_CHUNKS_PER_FILE: usize = 30_000;

const DEFAULT_DATA_PATH: &str = "./chunksync-data";
#[cfg(feature = "s3")]
const DEFAULT_S3_REGION: &str = "us-east-1";

/// Error type for configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Object store type
    pub store_type: ObjectStoreType,
    /// Local filesystem path (for LocalFs store)
    pub local_path: Option<PathBuf>,
    /// S3 configuration (for S3 store)
    #[cfg(feature = "s3")]
    pub s3: Option<S3Config>,
    /// Chunk engine limits
    pub chunks: ChunkConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            store_type: ObjectStoreType::InMemory,
            local_path: None,
            #[cfg(feature = "s3")]
            s3: None,
            chunks: ChunkConfig::default(),
        }
    }
}

impl SyncConfig {
    /// Create config for local development
    pub fn local(path: PathBuf) -> Self {
        SyncConfig {
            store_type: ObjectStoreType::LocalFs,
            local_path: Some(path),
            ..SyncConfig::default()
        }
    }

    /// Create config for testing (in-memory)
    pub fn test() -> Self {
        SyncConfig {
            chunks: ChunkConfig::test(),
            ..SyncConfig::default()
        }
    }

    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SyncConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Build configuration from environment variables
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | CHUNKSYNC_STORE_TYPE | localfs (memory, localfs, s3) |
    /// | CHUNKSYNC_DATA_PATH | ./chunksync-data |
    /// | CHUNKSYNC_MAX_PARALLEL_DOWNLOADS | 10 |
    /// | CHUNKSYNC_MAX_CHUNKS_PER_FILE | 30000 |
    /// | CHUNKSYNC_MAX_MERGE_LINES | 10000000 |
    /// | CHUNKSYNC_S3_BUCKET | - |
    /// | CHUNKSYNC_S3_PREFIX | (empty) |
    /// | CHUNKSYNC_S3_ENDPOINT | - |
    /// | AWS_REGION | us-east-1 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as `from_env`, reading variables through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let parse_usize = |name: &str, default: usize| -> Result<usize, ConfigError> {
            match lookup(name) {
                Some(v) => v
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::Invalid(format!("{} must be an integer, got {:?}", name, v))),
                None => Ok(default),
            }
        };

        let defaults = ChunkConfig::default();
        let max_merge_lines = match lookup("CHUNKSYNC_MAX_MERGE_LINES") {
            Some(v) => v.trim().parse().map_err(|_| {
                ConfigError::Invalid(format!(
                    "CHUNKSYNC_MAX_MERGE_LINES must be an integer, got {:?}",
                    v
                ))
            })?,
            None => defaults.max_merge_lines,
        };
        let chunks = ChunkConfig {
            max_chunks_per_file: parse_usize(
                "CHUNKSYNC_MAX_CHUNKS_PER_FILE",
                defaults.max_chunks_per_file,
            )?,
            max_parallel_downloads: parse_usize(
                "CHUNKSYNC_MAX_PARALLEL_DOWNLOADS",
                defaults.max_parallel_downloads,
            )?,
            max_merge_lines,
            large_merge_warning_lines: defaults.large_merge_warning_lines.min(max_merge_lines),
        };

        let store_type = lookup("CHUNKSYNC_STORE_TYPE")
            .unwrap_or_else(|| "localfs".to_string())
            .to_lowercase();
        let local_path = lookup("CHUNKSYNC_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_PATH));

        let config = match store_type.as_str() {
            "memory" => SyncConfig {
                chunks,
                ..SyncConfig::default()
            },
            "localfs" => SyncConfig {
                chunks,
                ..SyncConfig::local(local_path)
            },
            #[cfg(feature = "s3")]
            "s3" => {
                let bucket = lookup("CHUNKSYNC_S3_BUCKET").ok_or_else(|| {
                    ConfigError::Invalid("CHUNKSYNC_S3_BUCKET required for S3 store type".to_string())
                })?;
                SyncConfig {
                    store_type: ObjectStoreType::S3,
                    local_path: None,
                    s3: Some(S3Config {
                        bucket,
                        prefix: lookup("CHUNKSYNC_S3_PREFIX").unwrap_or_default(),
                        region: lookup("AWS_REGION")
                            .unwrap_or_else(|| DEFAULT_S3_REGION.to_string()),
                        endpoint: lookup("CHUNKSYNC_S3_ENDPOINT"),
                    }),
                    chunks,
                }
            }
            #[cfg(not(feature = "s3"))]
            "s3" => {
                return Err(ConfigError::Invalid(
                    "S3 support not compiled. Rebuild with --features s3".to_string(),
                ))
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "Unknown store type: {}. Use 'memory', 'localfs', or 's3'",
                    other
                )))
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chunks.validate()?;
        match self.store_type {
            ObjectStoreType::InMemory => Ok(()),
            ObjectStoreType::LocalFs if self.local_path.is_none() => Err(ConfigError::Invalid(
                "local_path is required for the localfs store".to_string(),
            )),
            ObjectStoreType::LocalFs => Ok(()),
            #[cfg(feature = "s3")]
            ObjectStoreType::S3 if self.s3.is_none() => Err(ConfigError::Invalid(
                "[s3] section is required for the s3 store".to_string(),
            )),
            #[cfg(feature = "s3")]
            ObjectStoreType::S3 => Ok(()),
        }
    }
}

/// Type of object store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectStoreType {
    /// In-memory store (for tests)
    #[serde(alias = "memory")]
    InMemory,
    /// Local filesystem
    LocalFs,
    /// Amazon S3 or compatible
    #[cfg(feature = "s3")]
    S3,
}

/// S3 configuration
#[cfg(feature = "s3")]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,
    /// Key prefix within bucket
    #[serde(default)]
    pub prefix: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    pub endpoint: Option<String>,
}

/// Limits for the chunk engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    /// Listing a file with more chunks than this fails (default: 30,000)
    pub max_chunks_per_file: usize,
    /// Simultaneous downloads per merge (default: 10)
    pub max_parallel_downloads: usize,
    /// Merges whose highest line exceeds this fail (default: 10,000,000)
    pub max_merge_lines: u64,
    /// Merges whose highest line exceeds this log a warning (default: 1,000,000)
    pub large_merge_warning_lines: u64,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        ChunkConfig {
            max_chunks_per_file: MAX_CHUNKS_PER_FILE,
            max_parallel_downloads: DEFAULT_MAX_PARALLEL_DOWNLOADS,
            max_merge_lines: MAX_MERGE_LINES,
            large_merge_warning_lines: LARGE_MERGE_WARNING_LINES,
        }
    }
}

impl ChunkConfig {
    /// Configuration for tests (small limits so caps are cheap to hit)
    pub fn test() -> Self {
        ChunkConfig {
            max_chunks_per_file: 100,
            max_parallel_downloads: 4,
            max_merge_lines: 10_000,
            large_merge_warning_lines: 1_000,
        }
    }

    pub fn merge_limits(&self) -> MergeLimits {
        MergeLimits {
            max_lines: self.max_merge_lines,
            warn_lines: self.large_merge_warning_lines,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel_downloads == 0 {
            return Err(ConfigError::Invalid(
                "max_parallel_downloads must be at least 1".to_string(),
            ));
        }
        if self.max_chunks_per_file == 0 {
            return Err(ConfigError::Invalid(
                "max_chunks_per_file must be at least 1".to_string(),
            ));
        }
        if self.large_merge_warning_lines > self.max_merge_lines {
            return Err(ConfigError::Invalid(format!(
                "large_merge_warning_lines ({}) must not exceed max_merge_lines ({})",
                self.large_merge_warning_lines, self.max_merge_lines
            )));
        }
        Ok(())
    }
}
