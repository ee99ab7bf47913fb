//! Runtime configuration.
//!
//! Values are layered, later sources winning:
//! 1. Built-in defaults under `~/.pomodoro/`
//! 2. `~/.pomodoro/config.json`
//! 3. `POMODORO_SOCKET`, `POMODORO_STATE`, `POMODORO_NOTIFY_COMMAND`
//! 4. Command-line flags

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

/// Directory under the home directory holding all runtime files.
const APP_DIR: &str = ".pomodoro";

/// Default sync broadcast period in seconds.
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;

/// Default viewer refresh period in milliseconds.
const DEFAULT_REFRESH_INTERVAL_MS: u64 = 1000;

/// Default drift threshold in milliseconds.
const DEFAULT_DRIFT_THRESHOLD_MS: u64 = 2000;

// ============================================================================
// ConfigError
// ============================================================================

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No home directory to put runtime files in
    #[error("ホームディレクトリが見つかりません")]
    NoHomeDir,

    /// The config file exists but could not be read
    #[error("設定ファイルを読み込めません: {0}")]
    Read(String),

    /// The config file is not valid JSON
    #[error("設定ファイルの形式が不正です: {0}")]
    Parse(String),

    /// A value is out of range
    #[error("設定値が不正です: {0}")]
    Invalid(String),
}

// ============================================================================
// Config
// ============================================================================

/// Fully resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,
    /// JSON state document
    pub state_path: PathBuf,
    /// Period of the daemon's `STATE_SYNC` broadcast
    pub sync_interval: Duration,
    /// Period of the viewer's local repaint
    pub refresh_interval: Duration,
    /// Minimum `end_time` disagreement the viewer corrects
    pub drift_threshold_ms: u64,
    /// Shell command run on session completion
    pub notify_command: Option<String>,
}

/// Optional fields of `config.json`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct FileConfig {
    socket_path: Option<PathBuf>,
    state_path: Option<PathBuf>,
    sync_interval_secs: Option<u64>,
    refresh_interval_ms: Option<u64>,
    drift_threshold_ms: Option<u64>,
    notify_command: Option<String>,
}

/// Values supplied on the command line.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub socket_path: Option<PathBuf>,
    pub state_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

impl Config {
    /// Defaults rooted at `dir`.
    pub fn with_dir(dir: &Path) -> Self {
        Self {
            socket_path: dir.join("pomodoro.sock"),
            state_path: dir.join("state.json"),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            refresh_interval: Duration::from_millis(DEFAULT_REFRESH_INTERVAL_MS),
            drift_threshold_ms: DEFAULT_DRIFT_THRESHOLD_MS,
            notify_command: None,
        }
    }

    /// Returns `~/.pomodoro`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoHomeDir`] if the home directory is unknown.
    pub fn app_dir() -> Result<PathBuf, ConfigError> {
        dirs::home_dir()
            .map(|home| home.join(APP_DIR))
            .ok_or(ConfigError::NoHomeDir)
    }

    /// Resolves the configuration from every source.
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory is unknown, the config file is
    /// unreadable or malformed, or a resolved value is invalid.
    pub fn load(overrides: &Overrides) -> Result<Self, ConfigError> {
        let dir = Self::app_dir()?;
        let mut config = Self::with_dir(&dir);

        let config_path = overrides
            .config_path
            .clone()
            .unwrap_or_else(|| dir.join("config.json"));
        config.apply_file(&config_path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.apply_overrides(overrides);
        config.validate()?;

        tracing::debug!("設定を読み込みました: {:?}", config);
        Ok(config)
    }

    /// Merges `path` if it exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(ConfigError::Read(format!("{}: {e}", path.display()))),
        };

        let file: FileConfig = serde_json::from_str(&content)
            .map_err(|e| ConfigError::Parse(format!("{}: {e}", path.display())))?;

        if let Some(socket_path) = file.socket_path {
            self.socket_path = socket_path;
        }
        if let Some(state_path) = file.state_path {
            self.state_path = state_path;
        }
        if let Some(secs) = file.sync_interval_secs {
            self.sync_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = file.refresh_interval_ms {
            self.refresh_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.drift_threshold_ms {
            self.drift_threshold_ms = ms;
        }
        if file.notify_command.is_some() {
            self.notify_command = file.notify_command;
        }
        Ok(())
    }

    /// Merges environment variables read through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(socket) = lookup("POMODORO_SOCKET").filter(|v| !v.is_empty()) {
            self.socket_path = PathBuf::from(socket);
        }
        if let Some(state) = lookup("POMODORO_STATE").filter(|v| !v.is_empty()) {
            self.state_path = PathBuf::from(state);
        }
        if let Some(command) = lookup("POMODORO_NOTIFY_COMMAND").filter(|v| !v.is_empty()) {
            self.notify_command = Some(command);
        }
    }

    /// Merges command-line values.
    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(socket_path) = &overrides.socket_path {
            self.socket_path.clone_from(socket_path);
        }
        if let Some(state_path) = &overrides.state_path {
            self.state_path.clone_from(state_path);
        }
    }

    /// Checks resolved values.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for a zero interval.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "syncIntervalSecs は1以上を指定してください".to_string(),
            ));
        }
        if self.refresh_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "refreshIntervalMs は1以上を指定してください".to_string(),
            ));
        }
        Ok(())
    }
}
