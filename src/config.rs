//! Configuration for the validation service.
//!
//! Fields use serde defaults that fall back to environment variables, then to
//! hardcoded defaults — the same two-tier resolution the teacher's
//! `Config::load()` applies, loaded from a `--config`/`CONFIG` JSON file via
//! `clap`.

use clap::Parser;
use serde::Deserialize;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

pub use crate::error::ConfigError;

/// CLI arguments for the validation server.
#[derive(Parser, Debug)]
#[command(name = "yubikey-valsrv")]
#[command(about = "YubiKey OTP validation service")]
struct CliArgs {
    /// Path to the JSON configuration file.
    #[arg(long, short, env = "CONFIG", default_value = "config.json")]
    config: PathBuf,
}

/// A statically configured client allowed to call `/wsapi/2.0/verify`.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub client_id: i64,
    pub secret: String,
    #[serde(default = "config_defaults::default_true")]
    pub active: bool,
}

/// A statically configured YubiKey, for the in-process (`LocalKsm`) path.
#[derive(Debug, Clone, Deserialize)]
pub struct KeyConfig {
    pub public_name: String,
    /// AES-128 key, hex-encoded (32 hex characters).
    pub aes_key_hex: String,
}

/// Top level server configuration (`spec.md` §6).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "config_defaults::default_port")]
    pub port: u16,
    #[serde(default = "config_defaults::default_host")]
    pub host: IpAddr,

    /// SQLite connection string, e.g. `sqlite://valsrv.db`.
    #[serde(default = "config_defaults::default_database_url")]
    pub database_url: String,

    /// Known clients, indexed by `client_id` at load time.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,

    /// Sibling replica base URLs (`SYNC_SERVERS`).
    #[serde(default)]
    pub sync_servers: Vec<String>,
    /// Percentage of siblings whose confirmation is required (`SYNC_LEVEL`).
    #[serde(default = "config_defaults::default_sync_level")]
    pub sync_level: u8,
    /// Per-sibling fetch deadline in seconds (`SYNC_TIMEOUT`, the `T` of §4.4).
    #[serde(default = "config_defaults::default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,

    /// Use the in-process AES decryptor instead of remote KSM servers.
    #[serde(default = "config_defaults::default_use_native_ykksm")]
    pub use_native_ykksm: bool,
    /// Remote KSM server base URLs, tried in order (`YKKSM_SERVERS`).
    #[serde(default)]
    pub ykksm_servers: Vec<String>,
    /// Statically configured keys for the native KSM path.
    #[serde(default)]
    pub keys: Vec<KeyConfig>,

    /// Absolute tolerance (seconds) for the phishing/timing test.
    #[serde(default = "config_defaults::default_ts_abs_tolerance")]
    pub ts_abs_tolerance: f64,
    /// Relative tolerance (fraction of elapsed wall time) for the same test.
    #[serde(default = "config_defaults::default_ts_rel_tolerance")]
    pub ts_rel_tolerance: f64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: config_defaults::default_port(),
            host: config_defaults::default_host(),
            database_url: config_defaults::default_database_url(),
            clients: Vec::new(),
            sync_servers: Vec::new(),
            sync_level: config_defaults::default_sync_level(),
            sync_timeout_secs: config_defaults::default_sync_timeout_secs(),
            use_native_ykksm: config_defaults::default_use_native_ykksm(),
            ykksm_servers: Vec::new(),
            keys: Vec::new(),
            ts_abs_tolerance: config_defaults::default_ts_abs_tolerance(),
            ts_rel_tolerance: config_defaults::default_ts_rel_tolerance(),
        }
    }
}

pub mod config_defaults {
    use std::env;
    use std::net::IpAddr;

    pub const DEFAULT_PORT: u16 = 8080;
    pub const DEFAULT_HOST: &str = "0.0.0.0";

    pub fn default_true() -> bool {
        true
    }

    /// `$PORT` -> 8080.
    pub fn default_port() -> u16 {
        env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    /// `$HOST` -> 0.0.0.0.
    pub fn default_host() -> IpAddr {
        env::var("HOST")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(IpAddr::V4(DEFAULT_HOST.parse().unwrap()))
    }

    /// `$DATABASE_URL` -> a local SQLite file.
    pub fn default_database_url() -> String {
        env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite://valsrv.db".to_string())
    }

    /// `$SYNC_LEVEL` -> 100 (full quorum required, Yubico's own default).
    pub fn default_sync_level() -> u8 {
        env::var("SYNC_LEVEL")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100)
    }

    /// `$SYNC_TIMEOUT` -> 1 second, matching Yubico's reference deployment.
    pub fn default_sync_timeout_secs() -> u64 {
        env::var("SYNC_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(1)
    }

    /// `$USE_NATIVE_YKKSM` -> false (delegate to remote KSM servers by default).
    pub fn default_use_native_ykksm() -> bool {
        env::var("USE_NATIVE_YKKSM")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(false)
    }

    /// `$TS_ABS_TOLERANCE` -> 20 seconds.
    pub fn default_ts_abs_tolerance() -> f64 {
        env::var("TS_ABS_TOLERANCE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(20.0)
    }

    /// `$TS_REL_TOLERANCE` -> 0.3 (30%).
    pub fn default_ts_rel_tolerance() -> f64 {
        env::var("TS_REL_TOLERANCE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0.3)
    }
}

impl Config {
    /// Load configuration from CLI arguments and a JSON file; values absent
    /// from the file fall back to environment variables, then hardcoded
    /// defaults (see `config_defaults`).
    pub fn load() -> Result<Self, ConfigError> {
        let cli_args = CliArgs::parse();
        Self::load_from_path(&cli_args.config)
    }

    fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Config::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&content).map_err(|e| ConfigError::JsonParse {
            path: path.display().to_string(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let config = Config::load_from_path(Path::new("/nonexistent/config.json")).unwrap();
        assert_eq!(config.port, config_defaults::default_port());
        assert_eq!(config.sync_level, 100);
    }

    #[test]
    fn parses_clients_and_sync_servers() {
        let json = r#"{
            "sync_servers": ["https://sibling-a", "https://sibling-b"],
            "sync_level": 50,
            "clients": [{"client_id": 1, "secret": "c2VjcmV0"}]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.sync_servers.len(), 2);
        assert_eq!(config.sync_level, 50);
        assert_eq!(config.clients[0].client_id, 1);
        assert!(config.clients[0].active);
    }
}
