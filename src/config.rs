use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

/// Runtime configuration for backup orchestration.
///
/// Values are resolved in three layers: built-in defaults, an optional TOML
/// file, and `RMANCTL_*` environment variable overrides applied last.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for backup pieces, plans, logs, and locks
    pub base_directory: PathBuf,

    /// Number of engine channels to allocate per run
    pub channels: u32,

    /// Upper bound on a single backup piece, e.g. "100G"
    pub max_piece_size: String,

    /// Recovery window enforced by the retention run, in days
    pub recovery_window_days: u32,

    /// Compress backup sets unless the caller says otherwise
    pub compress_default: bool,

    /// Age in days after which run logs are compressed
    pub compress_logs_after_days: u32,

    /// Age in days after which compressed logs are deleted
    pub delete_logs_after_days: u32,

    /// Instance-to-home lookup table (oratab format)
    pub home_lookup_table_path: PathBuf,

    /// Backup engine binary; defaults to <home>/bin/rman
    pub backup_engine_binary: Option<PathBuf>,

    /// Query client binary; defaults to <home>/bin/sqlplus
    pub query_client_binary: Option<PathBuf>,

    /// Relax the lock scope from per-instance to per-(instance, kind)
    pub lock_per_kind: bool,

    /// Bound on each engine run in seconds; unbounded when absent
    pub timeout_seconds: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        let base_directory = dirs::state_dir()
            .unwrap_or_else(|| PathBuf::from("/var/lib"))
            .join("rmanctl");

        Self {
            base_directory,
            channels: 2,
            max_piece_size: "100G".to_string(),
            recovery_window_days: 14,
            compress_default: false,
            compress_logs_after_days: 7,
            delete_logs_after_days: 60,
            home_lookup_table_path: PathBuf::from("/etc/oratab"),
            backup_engine_binary: None,
            query_client_binary: None,
            lock_per_kind: false,
            timeout_seconds: None,
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply
    /// environment overrides and validate the result.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        dotenv::dotenv().ok(); // Load .env file if present

        let mut config = match config_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config file {}", path.display()))?;
                toml::from_str(&raw)
                    .with_context(|| format!("Failed to parse config file {}", path.display()))?
            }
            None => Config::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(dir) = env::var("RMANCTL_BASE_DIRECTORY") {
            self.base_directory = PathBuf::from(dir);
        }

        if let Ok(channels) = env::var("RMANCTL_CHANNELS") {
            self.channels = channels
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RMANCTL_CHANNELS: {}", e))?;
        }

        if let Ok(size) = env::var("RMANCTL_MAX_PIECE_SIZE") {
            self.max_piece_size = size;
        }

        if let Ok(days) = env::var("RMANCTL_RECOVERY_WINDOW_DAYS") {
            self.recovery_window_days = days
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RMANCTL_RECOVERY_WINDOW_DAYS: {}", e))?;
        }

        if let Ok(flag) = env::var("RMANCTL_COMPRESS_DEFAULT") {
            self.compress_default = flag
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RMANCTL_COMPRESS_DEFAULT: {}", e))?;
        }

        if let Ok(days) = env::var("RMANCTL_COMPRESS_LOGS_AFTER_DAYS") {
            self.compress_logs_after_days = days
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RMANCTL_COMPRESS_LOGS_AFTER_DAYS: {}", e))?;
        }

        if let Ok(days) = env::var("RMANCTL_DELETE_LOGS_AFTER_DAYS") {
            self.delete_logs_after_days = days
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RMANCTL_DELETE_LOGS_AFTER_DAYS: {}", e))?;
        }

        if let Ok(path) = env::var("RMANCTL_HOME_LOOKUP_TABLE") {
            self.home_lookup_table_path = PathBuf::from(path);
        }

        if let Ok(path) = env::var("RMANCTL_BACKUP_ENGINE_BINARY") {
            self.backup_engine_binary = Some(PathBuf::from(path));
        }

        if let Ok(path) = env::var("RMANCTL_QUERY_CLIENT_BINARY") {
            self.query_client_binary = Some(PathBuf::from(path));
        }

        if let Ok(flag) = env::var("RMANCTL_LOCK_PER_KIND") {
            self.lock_per_kind = flag
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid RMANCTL_LOCK_PER_KIND: {}", e))?;
        }

        if let Ok(secs) = env::var("RMANCTL_TIMEOUT_SECONDS") {
            self.timeout_seconds = Some(
                secs.parse()
                    .map_err(|e| anyhow::anyhow!("Invalid RMANCTL_TIMEOUT_SECONDS: {}", e))?,
            );
        }

        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.channels < 1 {
            anyhow::bail!("channels must be at least 1, got {}", self.channels);
        }

        if !piece_size_is_valid(&self.max_piece_size) {
            anyhow::bail!(
                "max_piece_size must be digits with an optional K/M/G suffix, got {:?}",
                self.max_piece_size
            );
        }

        if self.delete_logs_after_days < self.compress_logs_after_days {
            anyhow::bail!(
                "delete_logs_after_days ({}) must not be smaller than compress_logs_after_days ({})",
                self.delete_logs_after_days,
                self.compress_logs_after_days
            );
        }

        Ok(())
    }

    /// Directory holding run logs and classified error reports
    pub fn log_directory(&self) -> PathBuf {
        self.base_directory.join("log")
    }

    /// Directory holding transient plan files
    pub fn plan_directory(&self) -> PathBuf {
        self.base_directory.join("plans")
    }

    /// Directory holding per-instance lock files
    pub fn lock_directory(&self) -> PathBuf {
        self.base_directory.join("locks")
    }

    /// Destination directory for an instance's backup pieces
    pub fn backup_directory(&self, instance: &str) -> PathBuf {
        self.base_directory.join("backups").join(instance)
    }

    /// Lock file path for a run. The kind widens the scope only when the
    /// per-kind relaxation is enabled.
    pub fn lock_path(&self, instance: &str, kind_label: &str) -> PathBuf {
        let name = if self.lock_per_kind {
            format!("{instance}_{kind_label}.lock")
        } else {
            format!("{instance}.lock")
        };
        self.lock_directory().join(name)
    }
}

fn piece_size_is_valid(value: &str) -> bool {
    let value = value.trim();
    let digits = value.strip_suffix(['K', 'M', 'G']).unwrap_or(value);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}
