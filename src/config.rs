//! Configuration loading and validation.
//!
//! Configuration is resolved with the following precedence (highest wins):
//!
//! 1. Environment variables (`CODEPLANE_*`)
//! 2. Project config (`<state-dir>/config.toml`)
//! 3. Compiled-in defaults

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{CodePlaneError, CodePlaneResult};

/// Top-level configuration for the index engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Repository root path to index.
    pub repo_path: PathBuf,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub structural_store: StructuralStoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Indexing-specific settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Always-pruned directory names, regardless of the ignore file.
    #[serde(default = "IndexingConfig::default_always_excludes")]
    pub always_excludes: Vec<String>,

    /// Files larger than this are indexed lexically only, not structurally.
    #[serde(default = "IndexingConfig::default_max_parse_bytes")]
    pub max_parse_bytes: u64,

    /// Maximum number of concurrent parse tasks.
    #[serde(default = "IndexingConfig::default_parse_concurrency")]
    pub parse_concurrency: usize,

    /// Whether to follow symbolic links to files outside the repo root.
    /// Always `false`; kept as an explicit field so the invariant is
    /// visible at the config boundary rather than buried in code.
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            always_excludes: Self::default_always_excludes(),
            max_parse_bytes: Self::default_max_parse_bytes(),
            parse_concurrency: Self::default_parse_concurrency(),
            follow_symlinks: false,
        }
    }
}

impl IndexingConfig {
    fn default_always_excludes() -> Vec<String> {
        vec![
            ".git".into(),
            "node_modules".into(),
            "target".into(),
            "__pycache__".into(),
            ".venv".into(),
            "venv".into(),
            ".next".into(),
            "dist".into(),
            "build".into(),
        ]
    }

    fn default_max_parse_bytes() -> u64 {
        5 * 1024 * 1024 // 5MB
    }

    fn default_parse_concurrency() -> usize {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2)
    }
}

/// Watcher and background-indexer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    /// Watcher-tier debounce window, in milliseconds.
    #[serde(default = "WatcherConfig::default_debounce_ms")]
    pub debounce_ms: u64,

    /// Safety-net full-walk interval, in seconds.
    #[serde(default = "WatcherConfig::default_safety_net_secs")]
    pub safety_net_secs: u64,

    /// HEAD-tripwire poll interval, in seconds. `None` disables the
    /// tripwire entirely (e.g. when the repo has no `.git` directory).
    #[serde(default = "WatcherConfig::default_head_tripwire_secs")]
    pub head_tripwire_secs: Option<u64>,

    /// Polling interval used on cross-filesystem mounts where native
    /// notifiers are unreliable, in milliseconds.
    #[serde(default = "WatcherConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
            safety_net_secs: Self::default_safety_net_secs(),
            head_tripwire_secs: Self::default_head_tripwire_secs(),
            poll_interval_ms: Self::default_poll_interval_ms(),
        }
    }
}

impl WatcherConfig {
    fn default_debounce_ms() -> u64 {
        500
    }
    fn default_safety_net_secs() -> u64 {
        60
    }
    fn default_head_tripwire_secs() -> Option<u64> {
        Some(5)
    }
    fn default_poll_interval_ms() -> u64 {
        2_000
    }
}

/// Structural-store write retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuralStoreConfig {
    /// SQLite busy-timeout, in milliseconds, before a single write attempt
    /// gives up waiting on a lock held elsewhere.
    #[serde(default = "StructuralStoreConfig::default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Number of times a write that still hits a lock after the
    /// busy-timeout elapses is retried, with exponential backoff between
    /// attempts, before it fails with `Concurrency`.
    #[serde(default = "StructuralStoreConfig::default_max_write_retries")]
    pub max_write_retries: u32,

    /// Backoff before the first retry, in milliseconds. Doubles on each
    /// subsequent attempt.
    #[serde(default = "StructuralStoreConfig::default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for StructuralStoreConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: Self::default_busy_timeout_ms(),
            max_write_retries: Self::default_max_write_retries(),
            retry_backoff_ms: Self::default_retry_backoff_ms(),
        }
    }
}

impl StructuralStoreConfig {
    fn default_busy_timeout_ms() -> u64 {
        5_000
    }
    fn default_max_write_retries() -> u32 {
        5
    }
    fn default_retry_backoff_ms() -> u64 {
        20
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,

    /// Whether to emit logs as JSON lines.
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
            json: false,
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".into()
    }
}

/// Install a global `tracing` subscriber from `config`. Intended for a
/// consuming binary's `main`, the same way `omni-daemon`/`omni-cli`/
/// `omni-mcp` each call `tracing_subscriber::fmt()...init()` once at
/// startup; a library has no business doing this on its own.
pub fn init_logging(config: &LoggingConfig) {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(&config.level)
        .with_writer(std::io::stderr);
    if config.json {
        let _ = builder.json().try_init();
    } else {
        let _ = builder.try_init();
    }
}

impl Config {
    /// Load configuration from defaults, overlaid by project config,
    /// overlaid by environment variables.
    pub fn load(repo_path: &Path) -> CodePlaneResult<Self> {
        let mut config = Self::defaults(repo_path);

        let project_config_path = Self::state_dir_for(repo_path).join("config.toml");
        if project_config_path.exists() {
            config.merge_from_file(&project_config_path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Compiled-in defaults for the given repository root.
    pub fn defaults(repo_path: &Path) -> Self {
        Self {
            repo_path: repo_path.to_path_buf(),
            indexing: IndexingConfig::default(),
            watcher: WatcherConfig::default(),
            structural_store: StructuralStoreConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// The hidden state directory at the repository root.
    pub fn state_dir(&self) -> PathBuf {
        Self::state_dir_for(&self.repo_path)
    }

    fn state_dir_for(repo_path: &Path) -> PathBuf {
        repo_path.join(".codeplane")
    }

    /// Directory holding the structural store, lexical segments, and
    /// epoch journal.
    pub fn index_dir(&self) -> PathBuf {
        self.state_dir().join("index")
    }

    fn merge_from_file(&mut self, path: &Path) -> CodePlaneResult<()> {
        let content = std::fs::read_to_string(path)?;
        let overlay: toml::Value = toml::from_str(&content).map_err(|e| CodePlaneError::Configuration {
            details: format!("invalid TOML in {}: {e}", path.display()),
        })?;

        if let Some(indexing) = overlay.get("indexing") {
            if let Ok(parsed) = indexing.clone().try_into::<IndexingConfig>() {
                self.indexing = parsed;
            }
        }
        if let Some(watcher) = overlay.get("watcher") {
            if let Ok(parsed) = watcher.clone().try_into::<WatcherConfig>() {
                self.watcher = parsed;
            }
        }
        if let Some(structural_store) = overlay.get("structural_store") {
            if let Ok(parsed) = structural_store.clone().try_into::<StructuralStoreConfig>() {
                self.structural_store = parsed;
            }
        }
        if let Some(logging) = overlay.get("logging") {
            if let Ok(parsed) = logging.clone().try_into::<LoggingConfig>() {
                self.logging = parsed;
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("CODEPLANE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(val) = std::env::var("CODEPLANE_DEBOUNCE_MS") {
            if let Ok(ms) = val.parse() {
                self.watcher.debounce_ms = ms;
            }
        }
        if let Ok(val) = std::env::var("CODEPLANE_POLL_INTERVAL_MS") {
            if let Ok(ms) = val.parse() {
                self.watcher.poll_interval_ms = ms;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::defaults(Path::new("/tmp/test-repo"));
        assert_eq!(config.indexing.max_parse_bytes, 5 * 1024 * 1024);
        assert_eq!(config.watcher.debounce_ms, 500);
        assert_eq!(config.structural_store.busy_timeout_ms, 5_000);
    }

    #[test]
    fn test_state_dir_is_hidden_and_rooted() {
        let config = Config::defaults(Path::new("/tmp/test-repo"));
        assert_eq!(config.state_dir(), Path::new("/tmp/test-repo/.codeplane"));
        assert_eq!(
            config.index_dir(),
            Path::new("/tmp/test-repo/.codeplane/index")
        );
    }

    #[test]
    fn test_language_from_extension() {
        use crate::types::Language;
        assert_eq!(Language::from_extension("py"), Language::Python);
        assert_eq!(Language::from_extension("rs"), Language::Rust);
        assert_eq!(Language::from_extension("xyz"), Language::Unknown);
    }
}
