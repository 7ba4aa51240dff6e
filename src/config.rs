use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration for the tagsmith library.
///
/// Built once at startup (file + CLI overrides) and threaded explicitly
/// into each component's constructor. Nothing here is mutated after the
/// run begins.
///
/// # Loading
///
/// ```rust,no_run
/// use tagsmith::config::Config;
///
/// // From a JSON file
/// let config = Config::load(Some("config.json".as_ref())).unwrap();
///
/// // Or use defaults and customize
/// let mut config = Config::default();
/// config.service.model = "llava:13b".into();
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Description service endpoint, retries, and recovery.
    pub service: ServiceConfig,
    /// Format-normalization fallback behavior.
    pub normalize: NormalizeConfig,
    /// Metadata write-verify-restore behavior.
    pub metadata: MetadataConfig,
    /// Deduplication / tracking store behavior.
    pub tracking: TrackingConfig,
    /// Batch run parameters.
    pub run: RunConfig,
}

/// Description service (Ollama-style chat endpoint) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the service, e.g. `http://127.0.0.1:11434`.
    pub endpoint: String,
    /// Vision model name sent in the request body.
    pub model: String,
    /// Hard wall-clock limit for a single request, in seconds. A hung
    /// request is abandoned when this elapses.
    pub timeout_secs: u64,
    /// How many times a failed request is retried before the file is
    /// marked failed.
    pub max_retries: u32,
    /// Fixed delay between description retries, in seconds.
    pub retry_delay_secs: u64,
    /// Optional shell command that restarts the service after repeated
    /// failures. Never invoked when unset.
    pub restart_command: Option<String>,
    /// Minimum interval between automatic restarts, in seconds.
    pub restart_cooldown_secs: u64,
    /// Consecutive timeout/connection failures required before a restart
    /// is considered.
    pub restart_after_failures: u32,
}

/// Format normalizer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Files smaller than this are classified as placeholder/corrupted
    /// stubs without invoking any converter.
    pub min_file_bytes: u64,
    /// If `true`, exhausting every conversion strategy aborts the run.
    /// If `false`, the file is skipped and the run continues.
    pub strict_conversion: bool,
}

/// Metadata writer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Maximum write-verify attempts before the file is marked failed.
    pub max_write_attempts: u32,
    /// Base delay for the exponential backoff between write retries, in
    /// milliseconds.
    pub backoff_base_ms: u64,
    /// Directory for byte-copy backups. Defaults to a `tagsmith-backups`
    /// directory under the system temp dir.
    pub backup_dir: Option<PathBuf>,
}

/// Tracking store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Master switch. When off, no store is opened and only the in-place
    /// metadata check prevents rework.
    pub enabled: bool,
    /// SQLite database path. Defaults to `tagsmith.db` next to the
    /// executable.
    pub db_path: Option<PathBuf>,
    /// When `true`, files are identified by content checksum. When
    /// `false`, the path-keyed mtime+size comparison stands in (cheaper
    /// on large trees, misses same-stat rewrites).
    pub checksum: bool,
}

/// Batch run configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Descend into subdirectories.
    pub recursive: bool,
    /// Process files even when tracked or already described, and accept
    /// looser description verification.
    pub override_existing: bool,
    /// Pause after every N files. Zero disables batching.
    pub batch_size: usize,
    /// Inter-batch pause, in seconds.
    pub batch_delay_secs: u64,
    /// Extension allow-list, lowercase, without dots.
    pub extensions: Vec<String>,
    /// Log what would be written without touching any file or the store.
    pub dry_run: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig {
                endpoint: "http://127.0.0.1:11434".to_string(),
                model: "llava".to_string(),
                timeout_secs: 120,
                max_retries: 3,
                retry_delay_secs: 5,
                restart_command: None,
                restart_cooldown_secs: 300,
                restart_after_failures: 3,
            },
            normalize: NormalizeConfig {
                min_file_bytes: 10 * 1024,
                strict_conversion: false,
            },
            metadata: MetadataConfig {
                max_write_attempts: 4,
                backoff_base_ms: 500,
                backup_dir: None,
            },
            tracking: TrackingConfig {
                enabled: true,
                db_path: None,
                checksum: true,
            },
            run: RunConfig {
                recursive: false,
                override_existing: false,
                batch_size: 0,
                batch_delay_secs: 10,
                extensions: vec![
                    "jpg", "jpeg", "png", "webp", "tif", "tiff", "heic", "heif", "gif", "bmp",
                ]
                .into_iter()
                .map(String::from)
                .collect(),
                dry_run: false,
            },
        }
    }
}

impl Config {
    /// Resolve the config file path — same directory as the executable.
    pub fn config_path() -> Result<PathBuf> {
        let exe_path = std::env::current_exe().context("Failed to get executable path")?;
        let exe_dir = exe_path
            .parent()
            .context("Failed to get executable directory")?;
        Ok(exe_dir.join("config.json"))
    }

    /// Load config from the given path, or from the default location.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        if !config_path.exists() {
            log::warn!(
                "Config file not found at {}. Using defaults.",
                config_path.display()
            );
            return Ok(Self::default());
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;
        let config: Config =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Save config to the given path, or to the default location.
    pub fn save(&self, path: Option<&Path>) -> Result<()> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::config_path()?,
        };

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(&config_path, contents).context("Failed to write config file")?;
        log::info!("Config saved to {}", config_path.display());
        Ok(())
    }

    /// The backup directory, with the temp-dir default applied.
    pub fn backup_dir(&self) -> PathBuf {
        self.metadata
            .backup_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("tagsmith-backups"))
    }

    /// The tracking database path, with the exe-dir default applied.
    pub fn db_path(&self) -> PathBuf {
        if let Some(p) = &self.tracking.db_path {
            return p.clone();
        }
        Self::config_path()
            .map(|p| p.with_file_name("tagsmith.db"))
            .unwrap_or_else(|_| std::env::temp_dir().join("tagsmith.db"))
    }

    /// Check if a file's extension is on the allow-list.
    pub fn extension_allowed(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| {
                let e = e.to_lowercase();
                self.run.extensions.iter().any(|allowed| *allowed == e)
            })
            .unwrap_or(false)
    }
}
