//! Client configuration management.
//!
//! This module handles loading configuration from:
//! 1. Default values
//! 2. TOML config file (werewolf-client.toml)
//! 3. Environment variables (WEREWOLF_*)
//! 4. Command-line arguments (highest priority)
//!
//! Configuration options:
//! - `server`: Address of the game server bridge (host:port)
//! - `log_level`: Logging level (trace, debug, info, warn, error)
//! - `voice_enabled`: Ask the server for synthesized speech when starting a game
//! - `output_device`: Audio output device name (unset = system default)
//! - `default_volume`: Initial volume for every speaker
//! - `restart_delay_ms`: How long the end-of-game screen stays up
//! - `discussion_fallback_secs`: Discussion countdown when the server sends none

use anyhow::{Context, Result, bail};
use backend::{MAX_GAIN, MIN_GAIN, OutputSelection, SessionConfig};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, time::Duration};

/// Port used when the server address does not name one.
pub const DEFAULT_PORT: u16 = 5050;

/// Default configuration file content with comments.
pub const DEFAULT_CONFIG_CONTENT: &str = r#"# Werewolf Client Configuration
# =============================
#
# All options can be overridden via WEREWOLF_* environment variables or
# command-line arguments.

# Address of the game server bridge.
# If no port is specified, 5050 is used.
server = "127.0.0.1:5050"

# Logging level.
# Options: trace, debug, info, warn, error
log_level = "info"

# Ask the server to synthesize speech for AI players.
voice_enabled = true

# Audio output device name. Leave unset to use the system default.
# output_device = "Built-in Output"

# Initial volume for every speaker, from 0.0 (muted) to 1.5.
default_volume = 1.0

# How long the end-of-game screen stays up before returning to the lobby.
restart_delay_ms = 3000

# Discussion countdown in seconds when the server does not send one.
discussion_fallback_secs = 60
"#;

/// Command-line arguments for the client.
#[derive(Parser, Debug)]
#[command(name = "werewolf-client")]
#[command(about = "Werewolf game console client", long_about = None)]
pub struct CliArgs {
    /// Path to the configuration file.
    /// If the file doesn't exist, it will be created with default values.
    #[arg(short, long, default_value = "werewolf-client.toml")]
    pub config: PathBuf,

    /// Game server address (overrides config file).
    /// Examples: "127.0.0.1:5050", "game.local"
    #[arg(short, long)]
    pub server: Option<String>,

    /// Logging level (overrides config file).
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Audio output device name (overrides config file).
    #[arg(short, long)]
    pub output_device: Option<String>,

    /// Request synthesized speech: true or false (overrides config file).
    #[arg(long)]
    pub voice: Option<bool>,

    /// Run without audio output.
    #[arg(long)]
    pub no_audio: bool,

    /// Initial speaker volume (overrides config file).
    #[arg(long)]
    pub volume: Option<f32>,
}

/// TOML configuration file structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default = "default_server")]
    pub server: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_voice_enabled")]
    pub voice_enabled: bool,

    #[serde(default)]
    pub output_device: Option<String>,

    #[serde(default = "default_volume")]
    pub default_volume: f32,

    #[serde(default = "default_restart_delay_ms")]
    pub restart_delay_ms: u64,

    #[serde(default = "default_discussion_fallback_secs")]
    pub discussion_fallback_secs: u32,
}

fn default_server() -> String {
    format!("127.0.0.1:{}", DEFAULT_PORT)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_voice_enabled() -> bool {
    true
}

fn default_volume() -> f32 {
    1.0
}

fn default_restart_delay_ms() -> u64 {
    3000
}

fn default_discussion_fallback_secs() -> u32 {
    60
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            server: default_server(),
            log_level: default_log_level(),
            voice_enabled: default_voice_enabled(),
            output_device: None,
            default_volume: default_volume(),
            restart_delay_ms: default_restart_delay_ms(),
            discussion_fallback_secs: default_discussion_fallback_secs(),
        }
    }
}

/// Resolved client configuration.
///
/// This is the final configuration after merging defaults, config file,
/// environment and CLI args.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address with port.
    pub server: String,
    pub log_level: String,
    pub voice_enabled: bool,
    /// Output device name; `None` uses the system default.
    pub output_device: Option<String>,
    pub audio_disabled: bool,
    /// Clamped to the mixer's gain range.
    pub default_volume: f32,
    pub restart_delay: Duration,
    pub discussion_fallback_secs: u32,
    /// Set when the config file was missing and a default one was written.
    pub created_config: Option<PathBuf>,
}

impl ClientConfig {
    /// Load configuration from CLI args, environment and config file.
    pub fn load() -> Result<Self> {
        let args = CliArgs::parse();
        Self::load_with_args(args)
    }

    /// Load configuration with the given CLI args and the process environment.
    pub fn load_with_args(args: CliArgs) -> Result<Self> {
        Self::load_with(args, |key| std::env::var(key).ok())
    }

    /// Load configuration with the given CLI args and environment lookup.
    ///
    /// Priority (highest to lowest):
    /// 1. Command-line arguments
    /// 2. Environment variables (WEREWOLF_*)
    /// 3. Config file
    /// 4. Default values
    pub fn load_with<E>(args: CliArgs, env: E) -> Result<Self>
    where
        E: Fn(&str) -> Option<String>,
    {
        let config_path = &args.config;
        let mut created_config = None;

        // WEREWOLF_NO_CONFIG skips the config file entirely
        let file_config = if env("WEREWOLF_NO_CONFIG").is_some() {
            FileConfig::default()
        } else if config_path.exists() {
            let content = fs::read_to_string(config_path)
                .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?
        } else {
            fs::write(config_path, DEFAULT_CONFIG_CONTENT)
                .with_context(|| {
                    format!("Failed to create config file: {}", config_path.display())
                })?;
            created_config = Some(config_path.clone());
            FileConfig::default()
        };

        let env_server = env("WEREWOLF_SERVER");
        let env_log_level = env("WEREWOLF_LOG_LEVEL");
        let env_output_device = env("WEREWOLF_OUTPUT_DEVICE");
        let env_voice = env("WEREWOLF_VOICE")
            .map(|v| parse_bool(&v).with_context(|| format!("Invalid WEREWOLF_VOICE: {}", v)))
            .transpose()?;

        // Merge: CLI args > env vars > file config > defaults
        let server = args.server.or(env_server).unwrap_or(file_config.server);
        let log_level = args.log_level.or(env_log_level).unwrap_or(file_config.log_level);
        let output_device = args
            .output_device
            .or(env_output_device)
            .or(file_config.output_device)
            .filter(|name| !name.trim().is_empty());
        let voice_enabled = args.voice.or(env_voice).unwrap_or(file_config.voice_enabled);
        let default_volume = args.volume.unwrap_or(file_config.default_volume);

        if !default_volume.is_finite() {
            bail!("Invalid default volume: {}", default_volume);
        }

        Ok(Self {
            server: normalize_server_address(&server)?,
            log_level,
            voice_enabled,
            output_device,
            audio_disabled: args.no_audio,
            default_volume: default_volume.clamp(MIN_GAIN, MAX_GAIN),
            restart_delay: Duration::from_millis(file_config.restart_delay_ms),
            discussion_fallback_secs: file_config.discussion_fallback_secs,
            created_config,
        })
    }

    /// Session parameters handed to the backend.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            restart_delay: self.restart_delay,
            discussion_fallback_secs: self.discussion_fallback_secs,
            default_volume: self.default_volume,
            ..Default::default()
        }
    }

    pub fn output_selection(&self) -> OutputSelection {
        if self.audio_disabled {
            return OutputSelection::Disabled;
        }
        match &self.output_device {
            Some(name) => OutputSelection::Device(name.clone()),
            None => OutputSelection::Default,
        }
    }
}

/// Append the default port when the address has none.
fn normalize_server_address(s: &str) -> Result<String> {
    let s = s.trim();
    if s.is_empty() {
        bail!("Server address is empty");
    }

    let has_port = if s.starts_with('[') {
        // IPv6: [::1] or [::1]:5050
        s.contains("]:")
    } else {
        s.contains(':')
    };

    let with_port = if has_port {
        s.to_string()
    } else {
        format!("{}:{}", s, DEFAULT_PORT)
    };

    let port = with_port
        .rsplit(':')
        .next()
        .unwrap_or_default()
        .parse::<u16>()
        .with_context(|| format!("Invalid server address: {}", s))?;
    if port == 0 {
        bail!("Invalid server address: {}", s);
    }
    Ok(with_port)
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => bail!("expected true or false, got {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, path::Path};

    fn args(config: &Path, extra: &[&str]) -> CliArgs {
        let mut argv = vec!["werewolf-client", "--config", config.to_str().unwrap()];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_default_config() {
        let config = FileConfig::default();
        assert_eq!(config.server, "127.0.0.1:5050");
        assert_eq!(config.log_level, "info");
        assert!(config.voice_enabled);
        assert_eq!(config.output_device, None);
        assert_eq!(config.restart_delay_ms, 3000);
        assert_eq!(config.discussion_fallback_secs, 60);
    }

    #[test]
    fn test_default_content_matches_defaults() {
        let parsed: FileConfig = toml::from_str(DEFAULT_CONFIG_CONTENT).unwrap();
        let defaults = FileConfig::default();
        assert_eq!(parsed.server, defaults.server);
        assert_eq!(parsed.log_level, defaults.log_level);
        assert_eq!(parsed.voice_enabled, defaults.voice_enabled);
        assert_eq!(parsed.output_device, defaults.output_device);
        assert_eq!(parsed.default_volume, defaults.default_volume);
        assert_eq!(parsed.restart_delay_ms, defaults.restart_delay_ms);
        assert_eq!(parsed.discussion_fallback_secs, defaults.discussion_fallback_secs);
    }

    #[test]
    fn test_missing_file_is_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("werewolf-client.toml");

        let config = ClientConfig::load_with(args(&path, &[]), no_env).unwrap();
        assert!(path.exists());
        assert_eq!(config.created_config.as_deref(), Some(path.as_path()));
        assert_eq!(config.server, "127.0.0.1:5050");
        assert_eq!(config.restart_delay, Duration::from_millis(3000));

        // Second load reads the file it just wrote.
        let config = ClientConfig::load_with(args(&path, &[]), no_env).unwrap();
        assert!(config.created_config.is_none());
    }

    #[test]
    fn test_file_values_and_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(
            &path,
            "server = \"10.0.0.2:7000\"\nvoice_enabled = false\nrestart_delay_ms = 500\n",
        )
        .unwrap();

        let config = ClientConfig::load_with(args(&path, &[]), no_env).unwrap();
        assert_eq!(config.server, "10.0.0.2:7000");
        assert!(!config.voice_enabled);
        assert_eq!(config.restart_delay, Duration::from_millis(500));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.discussion_fallback_secs, 60);
    }

    #[test]
    fn test_priority_cli_over_env_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(&path, "server = \"file-host\"\nlog_level = \"warn\"\n").unwrap();

        let env: HashMap<&str, &str> = [
            ("WEREWOLF_SERVER", "env-host:6000"),
            ("WEREWOLF_LOG_LEVEL", "debug"),
            ("WEREWOLF_VOICE", "off"),
        ]
        .into_iter()
        .collect();
        let lookup = |key: &str| env.get(key).map(|v| v.to_string());

        let config = ClientConfig::load_with(args(&path, &[]), lookup).unwrap();
        assert_eq!(config.server, "env-host:6000");
        assert_eq!(config.log_level, "debug");
        assert!(!config.voice_enabled);

        let cli = args(&path, &["--server", "cli-host", "--voice", "true"]);
        let config = ClientConfig::load_with(cli, lookup).unwrap();
        assert_eq!(config.server, "cli-host:5050");
        assert_eq!(config.log_level, "debug");
        assert!(config.voice_enabled);
    }

    #[test]
    fn test_no_config_env_skips_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(&path, "this is not toml = = =").unwrap();

        let lookup = |key: &str| (key == "WEREWOLF_NO_CONFIG").then(|| "1".to_string());
        let config = ClientConfig::load_with(args(&path, &[]), lookup).unwrap();
        assert_eq!(config.server, "127.0.0.1:5050");

        assert!(ClientConfig::load_with(args(&path, &[]), no_env).is_err());
    }

    #[test]
    fn test_volume_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(&path, "default_volume = 4.0\n").unwrap();

        let config = ClientConfig::load_with(args(&path, &[]), no_env).unwrap();
        assert_eq!(config.default_volume, MAX_GAIN);
        assert_eq!(config.session_config().default_volume, MAX_GAIN);

        let config = ClientConfig::load_with(args(&path, &["--volume=-1"]), no_env).unwrap();
        assert_eq!(config.default_volume, MIN_GAIN);
    }

    #[test]
    fn test_output_selection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        fs::write(&path, "output_device = \"Speakers\"\n").unwrap();

        let config = ClientConfig::load_with(args(&path, &[]), no_env).unwrap();
        assert!(matches!(
            config.output_selection(),
            OutputSelection::Device(name) if name == "Speakers"
        ));

        let config = ClientConfig::load_with(args(&path, &["--no-audio"]), no_env).unwrap();
        assert!(matches!(config.output_selection(), OutputSelection::Disabled));

        fs::write(&path, "output_device = \"\"\n").unwrap();
        let config = ClientConfig::load_with(args(&path, &[]), no_env).unwrap();
        assert!(matches!(config.output_selection(), OutputSelection::Default));
    }

    #[test]
    fn test_normalize_server_address() {
        assert_eq!(normalize_server_address("127.0.0.1:5050").unwrap(), "127.0.0.1:5050");
        assert_eq!(normalize_server_address("localhost").unwrap(), "localhost:5050");
        assert_eq!(normalize_server_address("[::1]").unwrap(), "[::1]:5050");
        assert_eq!(normalize_server_address("[::1]:6000").unwrap(), "[::1]:6000");
        assert!(normalize_server_address("").is_err());
        assert!(normalize_server_address("host:notaport").is_err());
        assert!(normalize_server_address("host:0").is_err());
    }

    #[test]
    fn test_invalid_voice_env_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.toml");
        let lookup = |key: &str| (key == "WEREWOLF_VOICE").then(|| "maybe".to_string());
        assert!(ClientConfig::load_with(args(&path, &[]), lookup).is_err());
    }
}
