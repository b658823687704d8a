//! # Service Configuration
//!
//! `roomwatch.toml`, resolved in three layers (highest priority first):
//! 1. CLI flags (`mode`, `host`, `port`)
//! 2. The TOML file, if it exists
//! 3. Compiled defaults
//!
//! Two endpoint profiles are kept side by side, `[local]` and `[docker]`;
//! `mode` selects which one the server talks to.
//!
//! ```toml
//! mode = "docker"
//! server_port = 8010
//! utc_offset_minutes = 540
//! room_change = "keep"
//!
//! [fusion]
//! absent_below = 20
//! present_above = 70
//!
//! [docker]
//! estimation_url = "http://estimation:8000/predict"
//! inquiry_url = "http://inquiry:8000/inquiry"
//! proxy_url = "http://proxy:8080/register"
//! ```

use chrono::FixedOffset;
use roomwatch_core::primitives::{
    DEPENDENCY_TIMEOUT_SECS, INACTIVITY_THRESHOLD_SECS, REAPER_TICK_SECS,
};
use roomwatch_core::{FusionPolicy, PresenceError, RoomChangePolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which endpoint profile to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Local,
    Docker,
}

/// Collaborator endpoints for one deployment profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// Reverse proxy registration endpoint.
    pub proxy_url: String,
    /// Estimator service (multipart CSV in, `predicted_percentage` out).
    pub estimation_url: String,
    /// Inquiry service (JSON in, `percentage_processed` out).
    pub inquiry_url: String,
    /// Do not register with the proxy on startup.
    pub skip_registration: bool,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            proxy_url: "http://localhost:8080/register".to_string(),
            estimation_url: "http://localhost:8000/predict".to_string(),
            inquiry_url: "http://localhost:8001/inquiry".to_string(),
            skip_registration: true,
        }
    }
}

/// How this service advertises itself to the proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrationConfig {
    pub system_uri: String,
}

impl Default for RegistrationConfig {
    fn default() -> Self {
        Self {
            system_uri: "localhost".to_string(),
        }
    }
}

/// Database file and artifact directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// redb database file.
    pub database: PathBuf,
    /// Every accepted upload: `<upload_dir>/<date>/<username>/`.
    pub upload_dir: PathBuf,
    /// Uploads the inquiry service contradicted.
    pub negative_sample_dir: PathBuf,
    /// Estimator training data: `positive_samples/<room>` and `negative_samples/<room>`.
    pub estimation_dir: PathBuf,
    /// Fingerprint survey copies: `<fingerprint_dir>/<room>/`.
    pub fingerprint_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: PathBuf::from("roomwatch.redb"),
            upload_dir: PathBuf::from("uploads"),
            negative_sample_dir: PathBuf::from("manager_fingerprint/0"),
            estimation_dir: PathBuf::from("estimation"),
            fingerprint_dir: PathBuf::from("manager_fingerprint"),
        }
    }
}

/// Stale session sweep timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaperConfig {
    /// Seconds between sweeps.
    pub tick_secs: u64,
    /// Seconds without a presence-bearing upload before a session is closed.
    pub inactivity_secs: i64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            tick_secs: REAPER_TICK_SECS,
            inactivity_secs: INACTIVITY_THRESHOLD_SECS,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mode: Mode,
    pub host: String,
    pub server_port: u16,
    /// Offset used for day grouping and archive directory dates.
    pub utc_offset_minutes: i32,
    /// Timeout for each estimator or inquiry call.
    pub dependency_timeout_secs: u64,
    pub room_change: RoomChangePolicy,
    pub fusion: FusionPolicy,
    pub reaper: ReaperConfig,
    pub storage: StorageConfig,
    pub registration: RegistrationConfig,
    pub local: Endpoints,
    pub docker: Endpoints,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mode: Mode::Local,
            host: "0.0.0.0".to_string(),
            server_port: 8010,
            utc_offset_minutes: 540,
            dependency_timeout_secs: DEPENDENCY_TIMEOUT_SECS,
            room_change: RoomChangePolicy::KeepOriginal,
            fusion: FusionPolicy::default(),
            reaper: ReaperConfig::default(),
            storage: StorageConfig::default(),
            registration: RegistrationConfig::default(),
            local: Endpoints::default(),
            docker: Endpoints::default(),
        }
    }
}

/// CLI values that override the file.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub mode: Option<Mode>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<PathBuf>,
}

impl Config {
    /// Load the file at `path` (defaults if it does not exist), apply CLI
    /// overrides and validate.
    pub fn load(path: &Path, overrides: &CliOverrides) -> Result<Self, PresenceError> {
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(path).map_err(|e| {
                PresenceError::Io(format!("Cannot read config '{}': {}", path.display(), e))
            })?;
            Self::from_toml(&text)?
        } else {
            tracing::info!("Config file {} not found, using defaults", path.display());
            Self::default()
        };

        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML string. Unknown keys are ignored.
    pub fn from_toml(text: &str) -> Result<Self, PresenceError> {
        toml::from_str(text).map_err(|e| PresenceError::InvalidInput(format!("Invalid config: {e}")))
    }

    pub fn apply_overrides(&mut self, overrides: &CliOverrides) {
        if let Some(mode) = overrides.mode {
            self.mode = mode;
        }
        if let Some(ref host) = overrides.host {
            self.host.clone_from(host);
        }
        if let Some(port) = overrides.port {
            self.server_port = port;
        }
        if let Some(ref database) = overrides.database {
            self.storage.database.clone_from(database);
        }
    }

    pub fn validate(&self) -> Result<(), PresenceError> {
        self.utc_offset()?;
        if self.reaper.tick_secs == 0 {
            return Err(PresenceError::InvalidInput(
                "reaper.tick_secs must be greater than 0".to_string(),
            ));
        }
        if self.reaper.inactivity_secs <= 0 {
            return Err(PresenceError::InvalidInput(
                "reaper.inactivity_secs must be greater than 0".to_string(),
            ));
        }
        if self.dependency_timeout_secs == 0 {
            return Err(PresenceError::InvalidInput(
                "dependency_timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.fusion != FusionPolicy::new(self.fusion.absent_below, self.fusion.present_above) {
            return Err(PresenceError::InvalidInput(
                "fusion bounds must satisfy absent_below <= present_above <= 100".to_string(),
            ));
        }
        Ok(())
    }

    /// Endpoints of the active profile.
    pub fn endpoints(&self) -> &Endpoints {
        match self.mode {
            Mode::Local => &self.local,
            Mode::Docker => &self.docker,
        }
    }

    pub fn utc_offset(&self) -> Result<FixedOffset, PresenceError> {
        FixedOffset::east_opt(self.utc_offset_minutes.saturating_mul(60)).ok_or_else(|| {
            PresenceError::InvalidInput(format!(
                "utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }

    pub fn dependency_timeout(&self) -> Duration {
        Duration::from_secs(self.dependency_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.server_port)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.utc_offset().unwrap().local_minus_utc(), 9 * 3600);
        assert_eq!(config.reaper.inactivity_secs, 21 * 60);
    }

    #[test]
    fn mode_selects_profile() {
        let config = Config::from_toml(
            r#"
            mode = "docker"
            room_change = "split"

            [fusion]
            absent_below = 10

            [docker]
            estimation_url = "http://estimation:8000/predict"
            skip_registration = false
            "#,
        )
        .unwrap();

        assert_eq!(config.mode, Mode::Docker);
        assert_eq!(config.room_change, RoomChangePolicy::SplitOnChange);
        assert_eq!(config.fusion.absent_below, 10);
        assert_eq!(config.fusion.present_above, 70);
        assert_eq!(config.endpoints().estimation_url, "http://estimation:8000/predict");
        assert!(!config.endpoints().skip_registration);
    }

    #[test]
    fn overrides_win() {
        let mut config = Config::default();
        config.apply_overrides(&CliOverrides {
            mode: Some(Mode::Docker),
            port: Some(9000),
            ..CliOverrides::default()
        });
        assert_eq!(config.mode, Mode::Docker);
        assert_eq!(config.bind_addr(), "0.0.0.0:9000");
    }

    #[test]
    fn invalid_values_rejected() {
        let inverted = Config::from_toml("[fusion]\nabsent_below = 80\npresent_above = 30\n").unwrap();
        assert!(inverted.validate().is_err());

        let offset = Config::from_toml("utc_offset_minutes = 100000").unwrap();
        assert!(offset.validate().is_err());

        assert!(Config::from_toml("mode = \"cloud\"").is_err());
    }

    #[test]
    fn sample_file_parses() {
        let config = Config::from_toml(include_str!("../../../roomwatch.toml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.docker.inquiry_url, "http://inquiry:8000/inquiry");
        assert_eq!(config.storage, StorageConfig::default());
    }

    #[test]
    fn missing_file_uses_defaults() {
        let temp = tempfile::tempdir().unwrap();
        let config = Config::load(&temp.path().join("absent.toml"), &CliOverrides::default()).unwrap();
        assert_eq!(config.server_port, 8010);
    }
}
