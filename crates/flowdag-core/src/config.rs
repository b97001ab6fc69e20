use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{FlowError, Result};

/// Smallest accepted eviction interval or idle threshold, in milliseconds.
pub const MIN_POOL_TUNABLE_MS: u64 = 1000;

/// Top-level flowdag configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub executors: ExecutorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Wall-clock budget for one run, checked between waves.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Master switch for run-level and node-level hooks.
    #[serde(default = "default_enable_callbacks")]
    pub enable_callbacks: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            enable_callbacks: default_enable_callbacks(),
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 { 10_000 }
fn default_enable_callbacks() -> bool { true }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_context_pool")]
    pub context: PoolSizing,
    #[serde(default = "default_collection_pool")]
    pub collection: PoolSizing,
    #[serde(default)]
    pub eviction: EvictionConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            context: default_context_pool(),
            collection: default_collection_pool(),
            eviction: EvictionConfig::default(),
        }
    }
}

/// Size limits for one pool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PoolSizing {
    /// Hard ceiling; objects released beyond it are dropped.
    pub max_size: usize,
    /// Objects created up front.
    #[serde(default)]
    pub initial_size: usize,
    /// Floor below which the evictor never shrinks the pool.
    #[serde(default)]
    pub min_idle: usize,
}

fn default_context_pool() -> PoolSizing {
    PoolSizing {
        max_size: 5000,
        initial_size: 500,
        min_idle: 100,
    }
}

fn default_collection_pool() -> PoolSizing {
    PoolSizing {
        max_size: 1000,
        initial_size: 100,
        min_idle: 20,
    }
}

/// Named eviction profiles. Explicit millisecond overrides win over the preset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvictionPreset {
    /// Frequent sweeps, short idle threshold.
    Aggressive,
    #[default]
    Balanced,
    /// Rare sweeps, long idle threshold.
    Conservative,
}

impl EvictionPreset {
    pub fn eviction_interval_ms(self) -> u64 {
        match self {
            EvictionPreset::Aggressive => 10_000,
            EvictionPreset::Balanced => 30_000,
            EvictionPreset::Conservative => 60_000,
        }
    }

    pub fn evictable_idle_ms(self) -> u64 {
        match self {
            EvictionPreset::Aggressive => 30_000,
            EvictionPreset::Balanced => 60_000,
            EvictionPreset::Conservative => 120_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvictionConfig {
    #[serde(default)]
    pub preset: EvictionPreset,
    /// Overrides the preset's sweep period when set and non-zero.
    #[serde(default)]
    pub eviction_interval_ms: Option<u64>,
    /// Overrides the preset's idle threshold when set and non-zero.
    #[serde(default)]
    pub evictable_idle_ms: Option<u64>,
    /// Idle entries sampled per sweep.
    #[serde(default = "default_samples_per_run")]
    pub samples_per_run: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            preset: EvictionPreset::default(),
            eviction_interval_ms: None,
            evictable_idle_ms: None,
            samples_per_run: default_samples_per_run(),
        }
    }
}

impl EvictionConfig {
    /// Effective sweep period: override > preset.
    pub fn eviction_interval(&self) -> Duration {
        let ms = self
            .eviction_interval_ms
            .filter(|ms| *ms > 0)
            .unwrap_or_else(|| self.preset.eviction_interval_ms());
        Duration::from_millis(ms)
    }

    /// Effective idle threshold: override > preset.
    pub fn evictable_idle(&self) -> Duration {
        let ms = self
            .evictable_idle_ms
            .filter(|ms| *ms > 0)
            .unwrap_or_else(|| self.preset.evictable_idle_ms());
        Duration::from_millis(ms)
    }
}

fn default_samples_per_run() -> usize { 10 }

/// Thread counts for the executors the binary provisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Worker threads for CPU-bound nodes. Default: available parallelism.
    #[serde(default)]
    pub cpu_threads: Option<usize>,
    /// Worker threads for I/O-bound nodes. Default: 4 x cpu threads, at most 64.
    #[serde(default)]
    pub io_threads: Option<usize>,
}

impl ExecutorConfig {
    pub fn cpu_threads(&self) -> usize {
        self.cpu_threads.filter(|n| *n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    pub fn io_threads(&self) -> usize {
        self.io_threads
            .filter(|n| *n > 0)
            .unwrap_or_else(|| (self.cpu_threads() * 4).min(64))
    }
}

impl FlowConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| FlowError::ConfigNotFound(path.display().to_string()))?;

        Self::from_toml(&content)
    }

    /// Like [`FlowConfig::load`], but a missing file yields the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "Config file absent, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        // Expand ${ENV_VAR} references
        let expanded = expand_env_vars(content);

        let config: Self =
            toml::from_str(&expanded).map_err(|e| FlowError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.engine.timeout_ms == 0 {
            return Err(FlowError::Config("engine.timeout_ms must be positive".into()));
        }
        for (name, sizing) in [("context", &self.pool.context), ("collection", &self.pool.collection)] {
            if sizing.min_idle > sizing.max_size || sizing.initial_size > sizing.max_size {
                return Err(FlowError::Config(format!(
                    "pool.{name}: min_idle and initial_size must not exceed max_size"
                )));
            }
        }
        Ok(())
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                Err(_) => {
                    // Keep original if env var not set
                    result.push_str(&format!("${{{}}}", var_name));
                }
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = FlowConfig::default();
        assert_eq!(config.engine.timeout_ms, 10_000);
        assert!(config.engine.enable_callbacks);
        assert_eq!(config.pool.context.max_size, 5000);
        assert_eq!(config.pool.context.initial_size, 500);
        assert_eq!(config.pool.collection.min_idle, 20);
        assert_eq!(config.pool.eviction.preset, EvictionPreset::Balanced);
        assert_eq!(config.pool.eviction.eviction_interval(), Duration::from_secs(30));
        assert_eq!(config.pool.eviction.evictable_idle(), Duration::from_secs(60));
    }

    #[test]
    fn test_override_beats_preset() {
        let config = FlowConfig::from_toml(
            r#"
[pool.eviction]
preset = "aggressive"
eviction_interval_ms = 5000
evictable_idle_ms = 0
"#,
        )
        .unwrap();
        assert_eq!(config.pool.eviction.eviction_interval(), Duration::from_secs(5));
        // zero means "use the preset"
        assert_eq!(config.pool.eviction.evictable_idle(), Duration::from_secs(30));
    }

    #[test]
    fn test_env_expansion() {
        std::env::set_var("FLOWDAG_TEST_TIMEOUT", "2500");
        let config = FlowConfig::from_toml(
            r#"
[engine]
timeout_ms = ${FLOWDAG_TEST_TIMEOUT}
"#,
        )
        .unwrap();
        assert_eq!(config.engine.timeout(), Duration::from_millis(2500));
    }

    #[test]
    fn test_unset_env_var_is_kept() {
        assert_eq!(
            expand_env_vars("x = \"${FLOWDAG_SURELY_UNSET_VAR}\""),
            "x = \"${FLOWDAG_SURELY_UNSET_VAR}\""
        );
    }

    #[test]
    fn test_rejects_inconsistent_sizing() {
        let err = FlowConfig::from_toml(
            r#"
[pool.collection]
max_size = 10
min_idle = 20
"#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = FlowConfig::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, FlowError::ConfigNotFound(_)));

        let config = FlowConfig::load_or_default(Path::new("/definitely/not/here.toml")).unwrap();
        assert_eq!(config.engine.timeout_ms, 10_000);
    }

    #[test]
    fn test_load_from_file() {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        tmp.write_all(b"[engine]\ntimeout_ms = 750\nenable_callbacks = false\n")
            .expect("write toml");

        let config = FlowConfig::load(tmp.path()).expect("load config");
        assert_eq!(config.engine.timeout_ms, 750);
        assert!(!config.engine.enable_callbacks);
    }

    #[test]
    fn test_executor_threads() {
        let config = ExecutorConfig {
            cpu_threads: Some(2),
            io_threads: None,
        };
        assert_eq!(config.cpu_threads(), 2);
        assert_eq!(config.io_threads(), 8);
    }
}
