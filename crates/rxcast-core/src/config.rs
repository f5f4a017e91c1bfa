//! Daemon configuration.
//!
//! Loaded from TOML. Every field has a default so an empty or missing
//! file yields a usable configuration. Lookup order:
//! 1. an explicit path (`--config`)
//! 2. `<config_dir>/rxcast/config.toml`
//! 3. built-in defaults

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::{AudioFormat, MAX_CHANNELS, MAX_SAMPLE_RATE};
use crate::error::{ConfigError, ConfigResult};

/// Default daemon socket path
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/rxcast.sock";

/// Environment variable overriding the socket path
pub const SOCKET_ENV_VAR: &str = "RXCAST_SOCKET";

/// Top-level daemon configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,

    /// Trunk file, relative to `receiver.working_dir` unless absolute
    pub trunk_file: PathBuf,

    pub receiver: ReceiverConfig,

    pub audio: AudioConfig,
}

/// How to launch the supervised receiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Executable to run
    pub program: String,

    /// Arguments placed before the per-start arguments
    pub base_args: Vec<String>,

    /// Working directory for the receiver process
    pub working_dir: Option<PathBuf>,

    /// Arguments used when a start request carries none
    pub default_args: Vec<String>,

    /// Start the receiver with `default_args` when the daemon boots
    pub autostart: bool,
}

/// Where audio arrives and how it is laid out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Loopback UDP address the receiver sends PCM datagrams to
    pub address: SocketAddr,

    pub sample_rate: u32,

    pub channels: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            trunk_file: PathBuf::from("trunk.tsv"),
            receiver: ReceiverConfig::default(),
            audio: AudioConfig::default(),
        }
    }
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        let to_strings = |args: &[&str]| args.iter().map(|s| (*s).to_string()).collect();
        Self {
            program: "nice".to_string(),
            base_args: to_strings(&["-n", "-15", "python3", "rx.py"]),
            working_dir: None,
            default_args: to_strings(&[
                "--args",
                "rtl",
                "-N",
                "LNA:47",
                "-S",
                "1400000",
                "-T",
                "trunk.tsv",
                "-X",
                "-V",
                "-v",
                "9",
                "-l",
                "http:0.0.0.0:8080",
                "-w",
                "-W",
                "127.0.0.1",
            ]),
            autostart: false,
        }
    }
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            address: SocketAddr::from(([127, 0, 0, 1], 23456)),
            sample_rate: AudioFormat::DEFAULT.sample_rate,
            channels: AudioFormat::DEFAULT.channels,
        }
    }
}

impl AudioConfig {
    /// Returns the PCM layout described by this section.
    pub fn format(&self) -> AudioFormat {
        AudioFormat::new(self.sample_rate, self.channels)
    }
}

impl Config {
    /// Parses a configuration from TOML text.
    ///
    /// `origin` is only used for error messages.
    pub fn from_toml(text: &str, origin: &Path) -> ConfigResult<Self> {
        let config: Config = toml::from_str(text).map_err(|e| ConfigError::Parse {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads configuration from a file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text, path)
    }

    /// Loads from `explicit`, else the user config file if present, else defaults.
    ///
    /// An explicit path that cannot be read is an error; a missing default
    /// file is not.
    pub fn discover(explicit: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match default_config_path() {
            Some(path) if path.exists() => {
                debug!(path = %path.display(), "Loading config");
                Self::load(&path)
            }
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Applies environment overrides (`RXCAST_SOCKET`).
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(socket) = std::env::var(SOCKET_ENV_VAR) {
            if !socket.is_empty() {
                self.socket_path = PathBuf::from(socket);
            }
        }
        self
    }

    /// Resolves the trunk file against the receiver's working directory.
    pub fn trunk_path(&self) -> PathBuf {
        match &self.receiver.working_dir {
            Some(dir) if self.trunk_file.is_relative() => dir.join(&self.trunk_file),
            _ => self.trunk_file.clone(),
        }
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.receiver.program.trim().is_empty() {
            return Err(ConfigError::InvalidFieldValue {
                field: "receiver.program".to_string(),
                value: self.receiver.program.clone(),
                expected: "a non-empty executable name".to_string(),
            });
        }
        if self.audio.sample_rate == 0 || self.audio.sample_rate > MAX_SAMPLE_RATE {
            return Err(ConfigError::InvalidFieldValue {
                field: "audio.sample_rate".to_string(),
                value: self.audio.sample_rate.to_string(),
                expected: format!("1..={MAX_SAMPLE_RATE}"),
            });
        }
        if self.audio.channels == 0 || self.audio.channels > MAX_CHANNELS {
            return Err(ConfigError::InvalidFieldValue {
                field: "audio.channels".to_string(),
                value: self.audio.channels.to_string(),
                expected: format!("1..={MAX_CHANNELS}"),
            });
        }
        Ok(())
    }
}

/// Returns `<config_dir>/rxcast/config.toml`, if a config dir exists.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("rxcast").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_gives_defaults() {
        let config = Config::from_toml("", Path::new("test.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.audio.address.to_string(), "127.0.0.1:23456");
        assert_eq!(config.receiver.program, "nice");
        assert!(!config.receiver.autostart);
    }

    #[test]
    fn test_partial_override() {
        let text = r#"
socket_path = "/run/rxcast.sock"

[receiver]
program = "./rx.py"
base_args = []
working_dir = "/opt/op25/apps"

[audio]
sample_rate = 16000
"#;
        let config = Config::from_toml(text, Path::new("test.toml")).unwrap();
        assert_eq!(config.socket_path, PathBuf::from("/run/rxcast.sock"));
        assert_eq!(config.receiver.program, "./rx.py");
        assert!(config.receiver.base_args.is_empty());
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.audio.channels, 1);
        assert_eq!(config.audio.format().frame_bytes(), 3200);
        // default_args keeps its default when not given
        assert!(config.receiver.default_args.contains(&"-W".to_string()));
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = Config::from_toml("socket_path = [", Path::new("bad.toml")).unwrap_err();
        assert!(err.to_string().contains("bad.toml"));
    }

    #[test]
    fn test_rejects_empty_program() {
        let text = "[receiver]\nprogram = \"\"\n";
        let err = Config::from_toml(text, Path::new("x.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidFieldValue { .. }));
    }

    #[test]
    fn test_rejects_zero_channels() {
        let text = "[audio]\nchannels = 0\n";
        assert!(Config::from_toml(text, Path::new("x.toml")).is_err());
    }

    #[test]
    fn test_rejects_oversized_audio_layout() {
        let origin = Path::new("x.toml");

        let err = Config::from_toml("[audio]\nchannels = 40000\n", origin).unwrap_err();
        assert!(err.to_string().contains("audio.channels"));

        let err = Config::from_toml("[audio]\nsample_rate = 4000000000\n", origin).unwrap_err();
        assert!(err.to_string().contains("audio.sample_rate"));

        let text = "[audio]\nchannels = 2\nsample_rate = 48000\n";
        let config = Config::from_toml(text, origin).unwrap();
        assert!(config.audio.format().is_supported());
        assert_eq!(config.audio.format().frame_bytes(), 19_200);
    }

    #[test]
    fn test_trunk_path_resolution() {
        let mut config = Config::default();
        assert_eq!(config.trunk_path(), PathBuf::from("trunk.tsv"));

        config.receiver.working_dir = Some(PathBuf::from("/opt/apps"));
        assert_eq!(config.trunk_path(), PathBuf::from("/opt/apps/trunk.tsv"));

        config.trunk_file = PathBuf::from("/etc/trunk.tsv");
        assert_eq!(config.trunk_path(), PathBuf::from("/etc/trunk.tsv"));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(matches!(
            Config::discover(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "trunk_file = \"sys.tsv\"\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.trunk_file, PathBuf::from("sys.tsv"));
    }
}
