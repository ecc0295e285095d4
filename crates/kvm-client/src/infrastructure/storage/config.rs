//! TOML-based configuration for the client.
//!
//! Reads and writes [`ClientFileConfig`] from the platform-appropriate file:
//! - Windows:  `%APPDATA%\KVMSession\client.toml`
//! - Linux:    `~/.config/kvm-session/client.toml`
//! - macOS:    `~/Library/Application Support/KVMSession/client.toml`
//!
//! # File layout (for beginners)
//!
//! ```toml
//! [client]
//! screen_name = "laptop"
//! server_host = "192.168.1.10"
//! server_port = 24800
//! ```
//!
//! `screen_name` must match a `[[screens]]` entry in the server's file, or the
//! server turns the client away.  A missing file yields the defaults below.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use kvm_core::protocol::messages::ProtocolName;
use kvm_core::session::HeartbeatPolicy;
use kvm_core::{ProtocolVersion, ScreenShape, SessionConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::client::ClientSettings;

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The platform config directory could not be determined.
    #[error("could not determine platform config directory")]
    NoPlatformConfigDir,

    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// The server host name did not resolve.
    #[error("cannot resolve server address {host}:{port}")]
    Resolve { host: String, port: u16 },

    /// The file parsed but describes something impossible.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level client configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientFileConfig {
    #[serde(default)]
    pub client: ClientSection,
}

/// Identity, server address and local screen settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientSection {
    /// Name this screen announces.  Defaults to the host name.
    #[serde(default = "default_screen_name")]
    pub screen_name: String,
    /// Host name or IP address of the server.
    #[serde(default = "default_server_host")]
    pub server_host: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    /// Greeting name the server uses: `"synergy"` or `"barrier"`.
    #[serde(default)]
    pub protocol: ProtocolName,
    /// `tracing` log level: `"error"`, `"warn"`, `"info"`, `"debug"`, `"trace"`.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Local screen size used by the headless screen backend.
    #[serde(default = "default_screen_width")]
    pub screen_width: i32,
    #[serde(default = "default_screen_height")]
    pub screen_height: i32,
    #[serde(default = "default_true")]
    pub clipboard_sharing: bool,
    /// Silence from the server, in keep-alive intervals, before giving up.
    /// The interval itself is set by the server.
    #[serde(default = "default_keep_alive_misses")]
    pub keep_alive_misses: u32,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_screen_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .into_iter()
        .find_map(|var| std::env::var(var).ok().filter(|name| !name.is_empty()))
        .unwrap_or_else(|| "client".to_string())
}
fn default_server_host() -> String {
    "127.0.0.1".to_string()
}
fn default_server_port() -> u16 {
    24800
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_screen_width() -> i32 {
    1920
}
fn default_screen_height() -> i32 {
    1080
}
fn default_true() -> bool {
    true
}
fn default_keep_alive_misses() -> u32 {
    HeartbeatPolicy::DEFAULT_MULTIPLE
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            screen_name: default_screen_name(),
            server_host: default_server_host(),
            server_port: default_server_port(),
            protocol: ProtocolName::default(),
            log_level: default_log_level(),
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
            clipboard_sharing: default_true(),
            keep_alive_misses: default_keep_alive_misses(),
        }
    }
}

impl ClientSection {
    /// Resolves `server_host:server_port`, preferring the first address.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Resolve`] if the host name has no address.
    pub fn server_addr(&self) -> Result<SocketAddr, ConfigError> {
        let unresolved = || ConfigError::Resolve {
            host: self.server_host.clone(),
            port: self.server_port,
        };
        (self.server_host.as_str(), self.server_port)
            .to_socket_addrs()
            .map_err(|_| unresolved())?
            .next()
            .ok_or_else(unresolved)
    }

    /// Shape of the local screen for the headless backend.
    pub fn screen_shape(&self) -> ScreenShape {
        ScreenShape::new(0, 0, self.screen_width, self.screen_height)
    }
}

impl ClientFileConfig {
    /// Validates the file and builds the orchestrator's settings.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] for an empty screen name, a non-positive
    /// screen size or a zero keep-alive multiple.
    pub fn to_settings(&self) -> Result<ClientSettings, ConfigError> {
        let client = &self.client;
        if client.screen_name.trim().is_empty() {
            return Err(ConfigError::Invalid("screen_name is empty".to_string()));
        }
        if client.screen_width <= 0 || client.screen_height <= 0 {
            return Err(ConfigError::Invalid(format!(
                "screen size {}x{} is not positive",
                client.screen_width, client.screen_height
            )));
        }
        if client.keep_alive_misses == 0 {
            return Err(ConfigError::Invalid(
                "keep_alive_misses must be at least 1".to_string(),
            ));
        }
        let mut settings = ClientSettings::new(client.screen_name.trim());
        settings.clipboard_sharing = client.clipboard_sharing;
        settings.session = SessionConfig {
            protocol: client.protocol,
            version: ProtocolVersion::local(),
            heartbeat: HeartbeatPolicy {
                interval: HeartbeatPolicy::DEFAULT_INTERVAL,
                multiple: client.keep_alive_misses,
            },
            ..SessionConfig::default()
        };
        Ok(settings)
    }
}

// ── Repository functions ──────────────────────────────────────────────────────

/// Returns the platform config directory.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    platform_config_dir().ok_or(ConfigError::NoPlatformConfigDir)
}

/// Resolves the full path to the default config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] if the base directory cannot be
/// determined.
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("client.toml"))
}

/// Loads the config from the default location.
///
/// # Errors
///
/// Same as [`load_config_from`].
pub fn load_config() -> Result<ClientFileConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config from `path`, returning the defaults if the file does not
/// exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<ClientFileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ClientFileConfig::default()),
        Err(e) => Err(ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Persists `config` to `path`, creating the directory if needed.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system failures or
/// [`ConfigError::Serialize`] if serialization fails.
pub fn save_config_to(config: &ClientFileConfig, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
    }

    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("KVMSession"))
    }

    #[cfg(target_os = "linux")]
    {
        let base = std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))?;
        Some(base.join("kvm-session"))
    }

    #[cfg(target_os = "macos")]
    {
        std::env::var_os("HOME").map(|h| {
            PathBuf::from(h)
                .join("Library")
                .join("Application Support")
                .join("KVMSession")
        })
    }

    #[cfg(not(any(target_os = "windows", target_os = "linux", target_os = "macos")))]
    {
        None
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
