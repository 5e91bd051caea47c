use clap::Parser;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "./chatezy.toml";

/// Command-line flags. Only flags actually passed end up in the CLI layer,
/// so unset flags never mask the TOML file or the environment.
#[derive(Parser, Serialize, Debug, Default)]
#[command(name = "chatezy-server", version, about = "ChatEzy chat server")]
pub struct CliArgs {
    /// Port to listen on [default: 4040]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Bind address [default: 0.0.0.0]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Path to TOML config file [default: ./chatezy.toml]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,

    /// Enable structured JSON logging (for Docker/production)
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub json_logs: bool,

    /// Output a commented TOML config template and exit
    #[arg(long)]
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub generate_config: bool,

    /// Data directory for persistent state (DB, signing key) [default: ./data]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Directory for uploaded attachments [default: {data_dir}/uploads]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploads_dir: Option<String>,

    /// Browser origin allowed to make credentialed requests [default: http://localhost:5173]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cors_origin: Option<String>,

    /// Session token lifetime in seconds [default: 604800]
    #[arg(long)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_ttl_secs: Option<u64>,
}

/// Resolved server configuration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub bind_address: String,
    /// TOML file the settings were read from
    pub config: String,
    pub json_logs: bool,
    pub generate_config: bool,
    pub data_dir: String,
    /// Directory for uploaded attachments (default: {data_dir}/uploads)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploads_dir: Option<String>,
    pub cors_origin: String,
    pub session_ttl_secs: u64,
    /// Liveness probe settings (the [heartbeat] section in TOML)
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
}

/// Ping/pong liveness probe timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Interval between pings in milliseconds (default: 5000)
    #[serde(default = "default_ping_interval")]
    pub ping_interval_ms: u64,

    /// How long to wait for the pong in milliseconds (default: 1000)
    #[serde(default = "default_pong_timeout")]
    pub pong_timeout_ms: u64,
}

impl HeartbeatConfig {
    /// Never zero, whatever the raw setting says.
    pub fn ping_interval(&self) -> Duration {
        Duration::from_millis(self.ping_interval_ms.max(1))
    }

    /// Never zero, whatever the raw setting says.
    pub fn pong_timeout(&self) -> Duration {
        Duration::from_millis(self.pong_timeout_ms.max(1))
    }

    /// Both timings must be positive.
    pub fn validate(&self) -> Result<(), String> {
        if self.ping_interval_ms == 0 {
            return Err("heartbeat.ping_interval_ms must be greater than 0".to_string());
        }
        if self.pong_timeout_ms == 0 {
            return Err("heartbeat.pong_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: default_ping_interval(),
            pong_timeout_ms: default_pong_timeout(),
        }
    }
}

fn default_ping_interval() -> u64 {
    5000
}

fn default_pong_timeout() -> u64 {
    1000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 4040,
            bind_address: "0.0.0.0".to_string(),
            config: DEFAULT_CONFIG_PATH.to_string(),
            json_logs: false,
            generate_config: false,
            data_dir: "./data".to_string(),
            uploads_dir: None,
            cors_origin: "http://localhost:5173".to_string(),
            session_ttl_secs: 604800,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl Config {
    /// Load config with layered precedence:
    /// built-in defaults < TOML file < env vars (CHATEZY_*) < CLI args
    pub fn load() -> Result<Self, figment::Error> {
        Self::load_from(CliArgs::parse())
    }

    /// Same layering as [`Config::load`] with already parsed flags.
    pub fn load_from(cli: CliArgs) -> Result<Self, figment::Error> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("CHATEZY_").split("__"))
            .merge(Serialized::defaults(cli))
            .merge(("config", config_path))
            .extract()?;

        config.heartbeat.validate().map_err(figment::Error::from)?;
        Ok(config)
    }

    /// Resolved uploads directory.
    pub fn uploads_dir(&self) -> String {
        match &self.uploads_dir {
            Some(dir) => dir.clone(),
            None => Path::new(&self.data_dir)
                .join("uploads")
                .to_string_lossy()
                .into_owned(),
        }
    }
}

/// Generate a commented TOML config template
pub fn generate_config_template() -> String {
    r#"# ChatEzy Server Configuration
# Place this file at ./chatezy.toml or specify with --config <path>
# All settings can be overridden via environment variables (CHATEZY_PORT, etc.)
# or CLI flags (--port, etc.)

# Server port (default: 4040)
# port = 4040

# Bind address (default: 0.0.0.0, all interfaces)
# bind_address = "0.0.0.0"

# Enable structured JSON logging for Docker/production
# json_logs = false

# Data directory for the SQLite database and session signing key
# data_dir = "./data"

# Directory for uploaded attachments (default: <data_dir>/uploads)
# uploads_dir = "./data/uploads"

# Browser origin allowed to call the API with cookies
# cors_origin = "http://localhost:5173"

# Session token lifetime in seconds (default: 7 days)
# session_ttl_secs = 604800

# ---- Liveness probes ----
# [heartbeat]

# Interval between server pings in milliseconds
# ping_interval_ms = 5000

# Connection is dropped if the pong does not arrive within this many milliseconds
# pong_timeout_ms = 1000
"#
    .to_string()
}
