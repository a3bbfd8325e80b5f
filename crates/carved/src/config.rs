//! TOML configuration for the carve CLI.

use std::path::{Path, PathBuf};

use carve_types::ChecksumAlgorithm;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Data locations.
    pub node: NodeSection,
    /// Chunking parameters.
    pub chunking: ChunkingSection,
    /// Storage backend selection.
    pub storage: StorageSection,
    /// Concurrency tuning.
    pub pipeline: PipelineSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for persistent data (metadata DB, chunk files, staging).
    pub data_dir: PathBuf,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".carve"))
            .unwrap_or_else(|| PathBuf::from(".carve"));
        Self { data_dir }
    }
}

/// `[chunking]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ChunkingSection {
    /// Maximum chunk size in bytes. Defaults to 4 MiB.
    pub max_chunk_bytes: Option<u64>,
    /// Checksum algorithm name (md5, sha1, sha256, sha384, sha512).
    pub checksum_algorithm: Option<String>,
}

/// `[storage]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// Active backend tags, in upload order: `"fs"` and/or `"db"`.
    ///
    /// Each chunk is uploaded once per active tag.
    pub active: Vec<String>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            active: vec!["fs".to_string()],
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// How many files may be processed concurrently. Defaults to 3.
    pub max_concurrent_files: Option<usize>,
    /// How many splits may run concurrently. Defaults to 2.
    pub max_concurrent_splits: Option<usize>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)?;
                let config: CliConfig = toml::from_str(&content)?;
                config.validate()?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        let config: CliConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject invalid values at load time rather than mid-pipeline.
    fn validate(&self) -> anyhow::Result<()> {
        self.checksum_algorithm()?;
        if self.max_chunk_bytes() == 0 {
            anyhow::bail!("chunking.max_chunk_bytes must be greater than 0");
        }
        if self.storage.active.is_empty() {
            anyhow::bail!("storage.active must list at least one backend tag");
        }
        Ok(())
    }

    /// Effective maximum chunk size (config value or 4 MiB default).
    pub fn max_chunk_bytes(&self) -> u64 {
        self.chunking.max_chunk_bytes.unwrap_or(4_194_304)
    }

    /// Effective checksum algorithm, validated against the supported set.
    pub fn checksum_algorithm(&self) -> anyhow::Result<ChecksumAlgorithm> {
        let name = self.chunking.checksum_algorithm.as_deref().unwrap_or("sha256");
        Ok(carve_checksum::parse_algorithm(name)?)
    }

    /// Effective file-level concurrency bound.
    ///
    /// Defaults to 3.
    pub fn max_concurrent_files(&self) -> usize {
        self.pipeline.max_concurrent_files.unwrap_or(3)
    }

    /// Effective split-level concurrency bound.
    ///
    /// Defaults to 2.
    pub fn max_concurrent_splits(&self) -> usize {
        self.pipeline.max_concurrent_splits.unwrap_or(2)
    }
}
