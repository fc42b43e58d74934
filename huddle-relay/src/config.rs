//! Configuration system for the Huddle relay server.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/huddle-relay/config.toml`)
//! 4. Compiled defaults

use std::path::PathBuf;

use huddle_proto::codec::DEFAULT_MAX_FRAME_SIZE;

use crate::router::{PresenceScope, RoutingPolicy, TargetScope};

/// Errors that can occur when loading relay configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure for the relay.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RelayConfigFile {
    server: ServerFileConfig,
    routing: RoutingFileConfig,
}

/// `[server]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
    max_frame_size: Option<usize>,
}

/// `[routing]` section of the relay config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct RoutingFileConfig {
    presence_scope: Option<PresenceScope>,
    target_scope: Option<TargetScope>,
    prune_empty_rooms: Option<bool>,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the relay server.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Huddle signaling relay server")]
pub struct RelayCliArgs {
    /// Address to bind the relay server to.
    #[arg(short, long, env = "HUDDLE_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/huddle-relay/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Maximum inbound frame size in bytes.
    #[arg(long)]
    pub max_frame_size: Option<usize>,

    /// Who receives mic-status and user-disconnected notifications.
    #[arg(long, value_enum)]
    pub presence_scope: Option<PresenceScope>,

    /// Which connections offers, answers, candidates and transcripts may reach.
    #[arg(long, value_enum)]
    pub target_scope: Option<TargetScope>,

    /// Keep room table entries after their last member leaves.
    #[arg(long)]
    pub keep_empty_rooms: bool,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "HUDDLE_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved relay server configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Address to bind the server to (e.g., `0.0.0.0:3000`).
    pub bind_addr: String,
    /// Maximum accepted inbound frame size in bytes.
    pub max_frame_size: usize,
    /// Delivery scoping rules.
    pub policy: RoutingPolicy,
    /// Delete rooms once they have no members.
    pub prune_empty_rooms: bool,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            policy: RoutingPolicy::default(),
            prune_empty_rooms: true,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path is tried and missing file
    /// is treated as empty config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed.
    pub fn load(cli: &RelayCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `RelayConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    fn resolve(cli: &RelayCliArgs, file: &RelayConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            max_frame_size: cli
                .max_frame_size
                .or(file.server.max_frame_size)
                .unwrap_or(defaults.max_frame_size),
            policy: RoutingPolicy {
                presence: cli
                    .presence_scope
                    .or(file.routing.presence_scope)
                    .unwrap_or(defaults.policy.presence),
                targets: cli
                    .target_scope
                    .or(file.routing.target_scope)
                    .unwrap_or(defaults.policy.targets),
            },
            prune_empty_rooms: !cli.keep_empty_rooms
                && file
                    .routing
                    .prune_empty_rooms
                    .unwrap_or(defaults.prune_empty_rooms),
            log_level: cli.log_level.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file for the relay.
fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<RelayConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(RelayConfigFile::default());
        };
        config_dir.join("huddle-relay").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RelayConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
