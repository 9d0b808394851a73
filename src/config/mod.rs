//! Configuration loading and management.
//!
//! Mirrors the teacher's `Cache`/`CacheBox` YAML-backed config shape,
//! trimmed to the per-volume knobs spec §6 names: `shard-block-size`,
//! `shard-deletion-rate`, `shard-lru-limit`.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const PROD: &str = "prod";
#[allow(dead_code)]
pub const DEV: &str = "dev";

pub const MIN_BLOCK_SIZE: u64 = 4 * (1 << 20); // 4 MiB
pub const MAX_BLOCK_SIZE: u64 = 4 * (1u64 << 40); // 4 TiB
pub const DEFAULT_BLOCK_SIZE: u64 = 64 * (1 << 20); // 64 MiB

pub const MIN_DELETION_RATE: u32 = 100;
pub const DEFAULT_DELETION_RATE: u32 = 100;

pub const MIN_LRU_LIMIT: u32 = 20;
pub const DEFAULT_LRU_LIMIT: u32 = 16384;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Cache {
    #[serde(rename = "cache")]
    pub cache: CacheBox,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheBox {
    pub env: String,
    pub logs: Option<Logs>,
    pub runtime: Option<Runtime>,
    #[serde(default)]
    pub shard: Shard,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Logs {
    pub level: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Runtime {
    pub num_cpus: usize,
}

/// The three per-volume knobs of §6, with their documented defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Shard {
    #[serde(rename = "shard-block-size")]
    pub block_size: u64,
    #[serde(rename = "shard-deletion-rate")]
    pub deletion_rate: u32,
    #[serde(rename = "shard-lru-limit")]
    pub lru_limit: u32,
}

impl Default for Shard {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            deletion_rate: DEFAULT_DELETION_RATE,
            lru_limit: DEFAULT_LRU_LIMIT,
        }
    }
}

pub trait ConfigTrait {
    fn logs(&self) -> Option<&Logs>;
    fn is_prod(&self) -> bool;
    fn runtime(&self) -> &Runtime;
    fn shard(&self) -> &Shard;
}

pub type Config = Cache;

impl ConfigTrait for Config {
    fn logs(&self) -> Option<&Logs> {
        self.cache.logs.as_ref()
    }

    fn is_prod(&self) -> bool {
        self.cache.env == PROD
    }

    fn runtime(&self) -> &Runtime {
        self.cache.runtime.as_ref().unwrap_or(&Runtime { num_cpus: 0 })
    }

    fn shard(&self) -> &Shard {
        &self.cache.shard
    }
}

impl Config {
    /// Loads configuration from a YAML file, validating the knob ranges
    /// documented in spec §6.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config yaml file {:?}", path))?;
        let cfg: Cache = serde_yaml::from_str(&data)
            .with_context(|| format!("unmarshal yaml from {:?}", path))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        let s = &self.cache.shard;
        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&s.block_size) {
            bail!("shard-block-size {} out of range [{}, {}]", s.block_size, MIN_BLOCK_SIZE, MAX_BLOCK_SIZE);
        }
        if s.deletion_rate < MIN_DELETION_RATE {
            bail!("shard-deletion-rate {} below minimum {}", s.deletion_rate, MIN_DELETION_RATE);
        }
        if s.lru_limit < MIN_LRU_LIMIT {
            bail!("shard-lru-limit {} below minimum {}", s.lru_limit, MIN_LRU_LIMIT);
        }
        Ok(())
    }

    /// In-memory default config, for tests and the demo harness.
    pub fn default_for_tests() -> Self {
        Cache {
            cache: CacheBox {
                env: DEV.to_string(),
                logs: Some(Logs { level: Some("debug".to_string()) }),
                runtime: Some(Runtime { num_cpus: 0 }),
                shard: Shard::default(),
            },
        }
    }
}

#[cfg(test)]
mod config_test {
    use super::*;

    #[test]
    fn rejects_block_size_below_minimum() {
        let mut cfg = Config::default_for_tests();
        cfg.cache.shard.block_size = 1024;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_lru_limit_below_minimum() {
        let mut cfg = Config::default_for_tests();
        cfg.cache.shard.lru_limit = 1;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_config_validates() {
        assert!(Config::default_for_tests().validate().is_ok());
    }
}
