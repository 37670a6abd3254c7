//! # Configuration
//!
//! One [`TelemetryConfig`] value is loaded at startup and handed piecewise to
//! the components that need it; nothing reads configuration ambiently after
//! that. The file is TOML, every section and field is optional, and a
//! missing or unreadable file degrades to the built-in defaults with a
//! warning instead of preventing startup.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "NIGHTSENSE_CONFIG";
/// Default config file, resolved against the working directory.
pub const CONFIG_FILE: &str = "nightsense.toml";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct TelemetryConfig {
    pub broker: BrokerSettings,
    pub channel: ChannelSettings,
    pub encryption: EncryptionSettings,
    pub storage: StorageSettings,
    pub simulator: SimulatorSettings,
    pub backup: BackupSettings,
}

/// Username/password pair used by both broker auth and client logins.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Listener side of the embedded broker.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub bind_address: String,
    pub bind_port: u16,
    /// When false, clients must present `credentials` to connect.
    pub allow_anonymous: bool,
    pub credentials: Option<Credentials>,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            bind_port: 1883,
            allow_anonymous: true,
            credentials: None,
        }
    }
}

/// Client side of the channel: where publisher and ingestor connect and the
/// one topic both agree on.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChannelSettings {
    pub connect_address: String,
    pub connect_port: u16,
    pub topic: String,
    pub credentials: Option<Credentials>,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            connect_address: "127.0.0.1".to_string(),
            connect_port: 1883,
            topic: "sensors/readings".to_string(),
            credentials: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EncryptionSettings {
    pub enabled: bool,
    /// Directory holding `private_key.pem` and `public_key.pem`.
    pub key_dir: PathBuf,
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            key_dir: PathBuf::from("certs"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub database_path: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("sensordata.db"),
        }
    }
}

/// Inclusive sampling range for one simulated field.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct FieldRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    pub publish_interval_secs: u64,
    /// Synthetic rows inserted at startup; 0 disables seeding.
    pub seed_readings: usize,
    pub temperature: FieldRange,
    pub humidity: FieldRange,
    pub loudness: FieldRange,
    pub light_level: FieldRange,
}

impl SimulatorSettings {
    /// Publish cadence; zero is clamped to one second, tick intervals must
    /// be non-empty.
    pub fn publish_interval(&self) -> Duration {
        Duration::from_secs(self.publish_interval_secs.max(1))
    }
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            publish_interval_secs: 60,
            seed_readings: 0,
            temperature: FieldRange { min: 15.0, max: 30.0 },
            humidity: FieldRange { min: 30.0, max: 90.0 },
            loudness: FieldRange { min: 30.0, max: 100.0 },
            light_level: FieldRange { min: 100.0, max: 1000.0 },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackupSettings {
    pub interval_secs: u64,
    /// Where snapshot files are written before (and whether or not) they are
    /// uploaded.
    pub local_dir: PathBuf,
    /// Absent means local snapshots only.
    pub remote: Option<RemoteTarget>,
}

impl BackupSettings {
    /// Backup cadence; zero is clamped to one second, tick intervals must
    /// be non-empty.
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for BackupSettings {
    fn default() -> Self {
        Self {
            interval_secs: 3600,
            local_dir: PathBuf::from("backups"),
            remote: None,
        }
    }
}

/// FTP file-drop receiving the snapshot files.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTarget {
    pub host: String,
    #[serde(default = "default_ftp_port")]
    pub port: u16,
    pub username: String,
    pub password: String,
    /// Remote directory changed into before upload; None stays in the
    /// login directory.
    pub directory: Option<String>,
}

fn default_ftp_port() -> u16 {
    21
}

impl TelemetryConfig {
    /// Loads the config file named by `NIGHTSENSE_CONFIG`, falling back to
    /// `nightsense.toml` in the working directory.
    pub async fn load() -> Self {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(CONFIG_FILE));
        Self::load_from(&path).await
    }

    /// Loads `path`, degrading to defaults on any read or parse problem.
    pub async fn load_from(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => match toml::from_str(&raw) {
                Ok(config) => {
                    info!("loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!(
                        "invalid configuration in {}: {}; using defaults",
                        path.display(),
                        e
                    );
                    Self::default()
                }
            },
            Err(e) => {
                warn!(
                    "could not read configuration {}: {}; using defaults",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }
}
