use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::chunker;
use crate::container::max_stored_chunk_len;
use crate::container::META_RECORD_SIZE;
use crate::error::{Result, XdedupError};

/// Top-level configuration of a site and the sessions it runs.
///
/// Every field has a default, so an empty YAML document is a valid config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XdedupConfig {
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub features: FeatureConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub compression: CompressionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    #[serde(default = "default_min_size")]
    pub min_size: u32,
    #[serde(default = "default_avg_size")]
    pub avg_size: u32,
    #[serde(default = "default_max_size")]
    pub max_size: u32,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_size: default_min_size(),
            avg_size: default_avg_size(),
            max_size: default_max_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureConfig {
    /// Compute super-features and attempt delta encoding against similar chunks.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Width of the rolling-hash window in bytes.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// A delta is kept only if it is at most this fraction of the chunk length.
    #[serde(default = "default_delta_max_ratio")]
    pub delta_max_ratio: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_size: default_window_size(),
            delta_max_ratio: default_delta_max_ratio(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Body capacity of one container (chunk ciphertext plus IVs).
    #[serde(default = "default_max_container_size")]
    pub max_container_size: u32,
    /// Capacity of the metadata session.
    #[serde(default = "default_max_meta_size")]
    pub max_meta_size: u32,
    /// Persist per-chunk metadata records alongside the body.
    #[serde(default = "default_true")]
    pub metadata_session: bool,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        Self {
            max_container_size: default_max_container_size(),
            max_meta_size: default_max_meta_size(),
            metadata_session: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Locality cache capacity in entries.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

/// How Phase 2 talks to the global index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DedupStrategy {
    /// One index round-trip per cache miss.
    Naive,
    /// Cache misses are collected and resolved in batched round-trips.
    #[default]
    Batching,
}

impl fmt::Display for DedupStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DedupStrategy::Naive => write!(f, "naive"),
            DedupStrategy::Batching => write!(f, "batching"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Capacity of each inter-phase queue, in batches.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Items per pipeline batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Outstanding index lookups per round-trip in the batching strategy.
    #[serde(default = "default_index_batch_size")]
    pub index_batch_size: usize,
    #[serde(default)]
    pub strategy: DedupStrategy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            index_batch_size: default_index_batch_size(),
            strategy: DedupStrategy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    None,
    #[default]
    Aes256gcm,
}

/// Where the trusted module runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryMode {
    /// Direct dispatch on the caller's thread.
    InProcess,
    /// A dedicated thread reached only through message channels.
    #[default]
    Isolated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub encryption: EncryptionMode,
    /// Blind index keys and seal index values.
    #[serde(default = "default_true")]
    pub encrypt_index: bool,
    #[serde(default)]
    pub boundary: BoundaryMode,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            encryption: EncryptionMode::default(),
            encrypt_index: true,
            boundary: BoundaryMode::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    None,
    #[default]
    Lz4,
    Zstd,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default)]
    pub algorithm: CompressionAlgorithm,
    #[serde(default = "default_zstd_level")]
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            algorithm: CompressionAlgorithm::default(),
            zstd_level: default_zstd_level(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_min_size() -> u32 {
    2 * 1024
}

fn default_avg_size() -> u32 {
    8 * 1024
}

fn default_max_size() -> u32 {
    64 * 1024
}

fn default_window_size() -> usize {
    48
}

fn default_delta_max_ratio() -> f64 {
    0.5
}

fn default_max_container_size() -> u32 {
    4 * 1024 * 1024
}

fn default_max_meta_size() -> u32 {
    // One record per minimum-size chunk in a full container.
    (default_max_container_size() / default_min_size()) * META_RECORD_SIZE as u32
}

fn default_cache_capacity() -> usize {
    64 * 1024
}

fn default_queue_capacity() -> usize {
    16
}

fn default_batch_size() -> usize {
    128
}

fn default_index_batch_size() -> usize {
    32
}

fn default_zstd_level() -> i32 {
    3
}

impl XdedupConfig {
    /// Reject settings that would only fail later, mid-session.
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunker;
        chunker::validate_bounds(c.min_size, c.avg_size, c.max_size)
            .map_err(|e| XdedupError::Config(e.to_string()))?;

        let f = &self.features;
        if f.window_size == 0 {
            return Err(XdedupError::Config(
                "features.window_size must be non-zero".into(),
            ));
        }
        if !(f.delta_max_ratio > 0.0 && f.delta_max_ratio <= 1.0) {
            return Err(XdedupError::Config(format!(
                "features.delta_max_ratio must be in (0, 1], got {}",
                f.delta_max_ratio
            )));
        }

        let k = &self.container;
        let largest = max_stored_chunk_len(c.max_size as usize);
        if (k.max_container_size as usize) < largest {
            return Err(XdedupError::Config(format!(
                "container.max_container_size ({}) cannot hold one maximal chunk ({largest} bytes)",
                k.max_container_size
            )));
        }
        if k.metadata_session && (k.max_meta_size as usize) < META_RECORD_SIZE {
            return Err(XdedupError::Config(format!(
                "container.max_meta_size ({}) cannot hold one metadata record",
                k.max_meta_size
            )));
        }

        if self.cache.capacity == 0 {
            return Err(XdedupError::Config("cache.capacity must be non-zero".into()));
        }
        let p = &self.pipeline;
        if p.queue_capacity == 0 || p.batch_size == 0 || p.index_batch_size == 0 {
            return Err(XdedupError::Config(
                "pipeline queue_capacity, batch_size and index_batch_size must be non-zero"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// Where the active config file came from.
#[derive(Debug, Clone)]
pub enum ConfigSource {
    /// Explicitly passed via `--config`.
    CliArg(PathBuf),
    /// Set via the `XDEDUP_CONFIG` env var.
    EnvVar(PathBuf),
    /// `xdedup.yaml` in the working directory.
    Project(PathBuf),
}

impl ConfigSource {
    pub fn path(&self) -> &Path {
        match self {
            ConfigSource::CliArg(p) | ConfigSource::EnvVar(p) | ConfigSource::Project(p) => p,
        }
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::CliArg(p) => write!(f, "{} (--config)", p.display()),
            ConfigSource::EnvVar(p) => write!(f, "{} (XDEDUP_CONFIG)", p.display()),
            ConfigSource::Project(p) => write!(f, "{} (project)", p.display()),
        }
    }
}

/// Resolve which config file to use.
///
/// Priority: CLI arg > `XDEDUP_CONFIG` > `./xdedup.yaml`. Returns `None` if
/// nothing applies; callers then run with defaults.
pub fn resolve_config_path(cli_config: Option<&str>) -> Option<ConfigSource> {
    if let Some(path) = cli_config {
        return Some(ConfigSource::CliArg(PathBuf::from(path)));
    }
    if let Ok(val) = std::env::var("XDEDUP_CONFIG") {
        if !val.is_empty() {
            return Some(ConfigSource::EnvVar(PathBuf::from(val)));
        }
    }
    let project = PathBuf::from("xdedup.yaml");
    project.exists().then_some(ConfigSource::Project(project))
}

/// Parse a config document and validate it.
pub fn parse_config(contents: &str) -> Result<XdedupConfig> {
    let config: XdedupConfig = if contents.trim().is_empty() {
        XdedupConfig::default()
    } else {
        serde_yaml::from_str(contents)
            .map_err(|e| XdedupError::Config(format!("invalid config: {e}")))?
    };
    config.validate()?;
    Ok(config)
}

/// Load, parse and validate a config file.
pub fn load_config(path: &Path) -> Result<XdedupConfig> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| XdedupError::Config(format!("cannot read '{}': {e}", path.display())))?;
    parse_config(&contents).map_err(|e| match e {
        XdedupError::Config(msg) => XdedupError::Config(format!("{}: {msg}", path.display())),
        other => other,
    })
}

/// A starter config with every section spelled out.
pub fn minimal_config_template() -> &'static str {
    r#"# xdedup configuration file

chunker:
  min_size: 2048
  avg_size: 8192
  max_size: 65536

features:
  enabled: true
  window_size: 48
  delta_max_ratio: 0.5

container:
  max_container_size: 4194304
  metadata_session: true

cache:
  capacity: 65536

pipeline:
  queue_capacity: 16
  batch_size: 128
  index_batch_size: 32
  strategy: batching   # or: naive

security:
  encryption: aes256gcm   # or: none
  encrypt_index: true
  boundary: isolated      # or: in_process

compression:
  algorithm: lz4          # none | lz4 | zstd
  zstd_level: 3
"#
}
