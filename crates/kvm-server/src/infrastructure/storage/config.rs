//! TOML-based configuration for the server.
//!
//! Reads and writes [`ServerFileConfig`] from the platform-appropriate file:
//! - Windows:  `%APPDATA%\KVMSession\server.toml`
//! - Linux:    `~/.config/kvm-session/server.toml`
//! - macOS:    `~/Library/Application Support/KVMSession/server.toml`
//!
//! A different file can be given on the command line.
//!
//! # File layout (for beginners)
//!
//! ```toml
//! [server]
//! screen_name = "desk"
//! port = 24800
//!
//! [options]
//! switch_delay_ms = 250
//! dead_corners = ["top-left"]
//!
//! [[screens]]
//! name = "desk"
//!
//! [[screens]]
//! name = "laptop"
//!
//! [[links]]
//! from = "desk"
//! direction = "right"
//! to = "laptop"
//!
//! [[links]]
//! from = "laptop"
//! direction = "left"
//! to = "desk"
//!
//! [[rules]]
//! condition = { type = "keystroke", hotkey = "Control+Alt+Right" }
//! activate = [{ type = "switch_in_direction", direction = "right" }]
//! ```
//!
//! Links are one-way: a screen pair that should be crossable in both
//! directions needs two `[[links]]` entries.  `from_range`/`to_range` are
//! optional `[start, end]` percentages of the border, for screens that sit
//! next to only part of another screen.
//!
//! # Serde default values
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  A missing file
//! behaves like an empty one: a lone local screen with default options.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use kvm_core::domain::{
    Action, Condition, Corners, Direction, Interval, Rule, RuleEngine, ScreenName, ScreenShape,
    SwitchOptions, Toggle, TopologyError, TopologyGraph,
};
use kvm_core::keymap::{parse_button_binding, KeyParseError};
use kvm_core::protocol::messages::ProtocolName;
use kvm_core::session::HeartbeatPolicy;
use kvm_core::{ProtocolVersion, SessionConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::server::ServerSettings;

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

    /// The file parsed but describes something impossible.
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("invalid screen layout: {0}")]
    Topology(#[from] TopologyError),

    #[error("invalid hotkey: {0}")]
    Hotkey(#[from] KeyParseError),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level server configuration stored on disk.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub options: OptionsSection,
    #[serde(default)]
    pub screens: Vec<ScreenEntry>,
    #[serde(default)]
    pub links: Vec<LinkEntry>,
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
}

/// Identity and socket settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerSection {
    /// Name of the local screen.  Defaults to the host name.
    #[serde(default = "default_screen_name")]
    pub screen_name: String,
    /// IP address to listen on.  `0.0.0.0` listens on every interface.
    #[serde(default = "default_bind_address")]
    pub bind_address: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Greeting name clients must use: `"synergy"` or `"barrier"`.
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
}

/// Switching, keep-alive and clipboard options.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OptionsSection {
    #[serde(default = "default_keep_alive_ms")]
    pub keep_alive_ms: u64,
    /// Keep-alive intervals without traffic before a client is dropped.
    #[serde(default = "default_keep_alive_misses")]
    pub keep_alive_misses: u32,
    /// Time the cursor must rest on a border before switching.  0 disables.
    #[serde(default)]
    pub switch_delay_ms: u64,
    /// Maximum time between two border taps that switch.  0 disables.
    #[serde(default)]
    pub double_tap_ms: u64,
    /// Corner names: `top-left`, `top-right`, `bottom-left`, `bottom-right`, `all`.
    #[serde(default)]
    pub dead_corners: Vec<String>,
    #[serde(default)]
    pub corner_size: i32,
    /// Width in pixels of the band along the local borders that counts as
    /// touching the border.
    #[serde(default = "default_jump_zone")]
    pub jump_zone: i32,
    #[serde(default)]
    pub relative_moves: bool,
    #[serde(default = "default_true")]
    pub clipboard_sharing: bool,
    #[serde(default)]
    pub switch_needs_shift: bool,
    #[serde(default)]
    pub switch_needs_control: bool,
    #[serde(default)]
    pub switch_needs_alt: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScreenEntry {
    pub name: String,
}

/// One-way link from a border of `from` to the opposite border of `to`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkEntry {
    pub from: String,
    pub direction: Direction,
    pub to: String,
    /// Part of `from`'s border, in percent.  Whole border when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_range: Option<[u8; 2]>,
    /// Part of `to`'s border, in percent.  Whole border when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to_range: Option<[u8; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleEntry {
    pub condition: ConditionEntry,
    #[serde(default)]
    pub activate: Vec<ActionEntry>,
    #[serde(default)]
    pub deactivate: Vec<ActionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionEntry {
    /// `hotkey` like `"Control+Alt+F1"`.
    Keystroke { hotkey: String },
    /// `binding` like `"Control+Button3"`.
    MouseButton { binding: String },
    /// Fires when `screen` (or any screen) becomes active.
    ScreenConnected {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        screen: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionEntry {
    SwitchToScreen {
        screen: String,
    },
    SwitchInDirection {
        direction: Direction,
    },
    SwitchToNextScreen,
    LockCursor {
        #[serde(default)]
        mode: Toggle,
    },
    KeyboardBroadcast {
        #[serde(default)]
        mode: Toggle,
        #[serde(default)]
        screens: Vec<String>,
    },
    /// Press and release of `hotkey`, injected into `screens` (or the active
    /// screen when empty).
    Keystroke {
        hotkey: String,
        #[serde(default)]
        screens: Vec<String>,
    },
    /// Press and release of `button` (`"Button1"` .. `"Button5"`).
    MouseButton {
        button: String,
    },
    RestartServer,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_screen_name() -> String {
    ["HOSTNAME", "COMPUTERNAME"]
        .into_iter()
        .find_map(|var| std::env::var(var).ok().filter(|name| !name.is_empty()))
        .unwrap_or_else(|| "server".to_string())
}
fn default_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}
fn default_port() -> u16 {
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
fn default_keep_alive_ms() -> u64 {
    3000
}
fn default_keep_alive_misses() -> u32 {
    3
}
fn default_jump_zone() -> i32 {
    1
}
fn default_true() -> bool {
    true
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            screen_name: default_screen_name(),
            bind_address: default_bind_address(),
            port: default_port(),
            protocol: ProtocolName::default(),
            log_level: default_log_level(),
            screen_width: default_screen_width(),
            screen_height: default_screen_height(),
        }
    }
}

impl Default for OptionsSection {
    fn default() -> Self {
        Self {
            keep_alive_ms: default_keep_alive_ms(),
            keep_alive_misses: default_keep_alive_misses(),
            switch_delay_ms: 0,
            double_tap_ms: 0,
            dead_corners: Vec::new(),
            corner_size: 0,
            jump_zone: default_jump_zone(),
            relative_moves: false,
            clipboard_sharing: default_true(),
            switch_needs_shift: false,
            switch_needs_control: false,
            switch_needs_alt: false,
        }
    }
}

impl ServerSection {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    /// Shape of the local screen for the headless backend.
    pub fn screen_shape(&self) -> ScreenShape {
        ScreenShape {
            x: 0,
            y: 0,
            width: self.screen_width,
            height: self.screen_height,
        }
    }
}

// ── Conversion to core types ──────────────────────────────────────────────────

impl ServerFileConfig {
    /// Validates the file and builds the orchestrator's settings.
    ///
    /// # Errors
    ///
    /// - [`ConfigError::Topology`] for duplicate screens, links to unknown
    ///   screens, bad ranges or overlapping links,
    /// - [`ConfigError::Hotkey`] for unparsable hotkeys and buttons,
    /// - [`ConfigError::Invalid`] for anything else that cannot work, such as
    ///   a screen list without the local screen.
    pub fn to_settings(&self) -> Result<ServerSettings, ConfigError> {
        let local = ScreenName::from(self.server.screen_name.as_str());
        let topology = self.build_topology(&local)?;
        let rules = self.build_rules(&topology)?;

        if self.options.keep_alive_ms == 0 {
            return Err(ConfigError::Invalid(
                "keep_alive_ms must be greater than 0".to_string(),
            ));
        }
        if self.server.screen_width <= 0 || self.server.screen_height <= 0 {
            return Err(ConfigError::Invalid(format!(
                "local screen size {}x{} is not positive",
                self.server.screen_width, self.server.screen_height
            )));
        }

        let mut settings = ServerSettings::new(local, topology);
        settings.switch = self.switch_options()?;
        settings.rules = rules;
        settings.session = SessionConfig {
            protocol: self.server.protocol,
            version: ProtocolVersion::local(),
            heartbeat: HeartbeatPolicy {
                interval: Duration::from_millis(self.options.keep_alive_ms),
                multiple: self.options.keep_alive_misses,
            },
            ..SessionConfig::default()
        };
        settings.jump_zone = self.options.jump_zone.max(0);
        settings.relative_moves = self.options.relative_moves;
        settings.clipboard_sharing = self.options.clipboard_sharing;
        Ok(settings)
    }

    fn build_topology(&self, local: &ScreenName) -> Result<TopologyGraph, ConfigError> {
        let mut topology = TopologyGraph::new();
        if self.screens.is_empty() {
            topology.add_screen(local.clone())?;
        } else {
            for screen in &self.screens {
                topology.add_screen(screen.name.as_str())?;
            }
            if !topology.contains(local) {
                return Err(ConfigError::Invalid(format!(
                    "local screen {local} is missing from [[screens]]"
                )));
            }
        }
        for link in &self.links {
            let from = ScreenName::from(link.from.as_str());
            let to = ScreenName::from(link.to.as_str());
            topology.link(
                &from,
                link.direction,
                to_interval(link.from_range)?,
                &to,
                to_interval(link.to_range)?,
            )?;
        }
        Ok(topology)
    }

    fn build_rules(&self, topology: &TopologyGraph) -> Result<RuleEngine, ConfigError> {
        let mut engine = RuleEngine::default();
        for entry in &self.rules {
            let condition = match &entry.condition {
                ConditionEntry::Keystroke { hotkey } => Condition::keystroke(hotkey)?,
                ConditionEntry::MouseButton { binding } => Condition::mouse_button(binding)?,
                ConditionEntry::ScreenConnected { screen } => Condition::ScreenConnected {
                    screen: screen.as_deref().map(ScreenName::from),
                },
            };
            // A screen connecting has no release, so press and release of an
            // injected key both belong to the activate list.
            let one_shot = matches!(condition, Condition::ScreenConnected { .. });

            let mut activate = Vec::new();
            let mut deactivate = Vec::new();
            for action in &entry.activate {
                let (press, release) = to_actions(action)?;
                activate.push(press);
                match release {
                    Some(release) if one_shot => activate.push(release),
                    Some(release) => deactivate.push(release),
                    None => {}
                }
            }
            for action in &entry.deactivate {
                let (press, release) = to_actions(action)?;
                deactivate.push(press);
                deactivate.extend(release);
            }

            for action in activate.iter().chain(&deactivate) {
                if let Some(unknown) = action.screens().iter().find(|s| !topology.contains(s)) {
                    return Err(ConfigError::Invalid(format!(
                        "rule action names unknown screen {unknown}"
                    )));
                }
            }
            if let Condition::ScreenConnected {
                screen: Some(screen),
            } = &condition
            {
                if !topology.contains(screen) {
                    return Err(ConfigError::Invalid(format!(
                        "rule condition names unknown screen {screen}"
                    )));
                }
            }
            engine.push(Rule::new(condition, activate).with_deactivate(deactivate));
        }
        Ok(engine)
    }

    fn switch_options(&self) -> Result<SwitchOptions, ConfigError> {
        let options = &self.options;
        let mut dead_corners = Corners::NONE;
        for name in &options.dead_corners {
            let corner = Corners::from_name(name)
                .ok_or_else(|| ConfigError::Invalid(format!("unknown corner {name:?}")))?;
            dead_corners = Corners(dead_corners.0 | corner.0);
        }
        Ok(SwitchOptions {
            switch_delay: non_zero_millis(options.switch_delay_ms),
            double_tap: non_zero_millis(options.double_tap_ms),
            dead_corners,
            corner_size: options.corner_size.max(0),
            needs_shift: options.switch_needs_shift,
            needs_control: options.switch_needs_control,
            needs_alt: options.switch_needs_alt,
            ..SwitchOptions::default()
        })
    }
}

fn non_zero_millis(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn to_interval(range: Option<[u8; 2]>) -> Result<Interval, TopologyError> {
    match range {
        Some([start, end]) => Interval::from_percent(start, end),
        None => Ok(Interval::FULL),
    }
}

fn to_screens(names: &[String]) -> Vec<ScreenName> {
    names.iter().map(|name| ScreenName::from(name.as_str())).collect()
}

/// Converts one configured action.  Keystrokes and mouse buttons expand to a
/// press plus the matching release.
fn to_actions(entry: &ActionEntry) -> Result<(Action, Option<Action>), ConfigError> {
    Ok(match entry {
        ActionEntry::SwitchToScreen { screen } => {
            (Action::SwitchToScreen(ScreenName::from(screen.as_str())), None)
        }
        ActionEntry::SwitchInDirection { direction } => {
            (Action::SwitchInDirection(*direction), None)
        }
        ActionEntry::SwitchToNextScreen => (Action::SwitchToNextScreen, None),
        ActionEntry::LockCursor { mode } => (Action::LockCursor(*mode), None),
        ActionEntry::KeyboardBroadcast { mode, screens } => (
            Action::KeyboardBroadcast {
                mode: *mode,
                screens: to_screens(screens),
            },
            None,
        ),
        ActionEntry::Keystroke { hotkey, screens } => {
            let (press, release) = Action::keystroke_pair(hotkey, to_screens(screens))?;
            (press, Some(release))
        }
        ActionEntry::MouseButton { button } => {
            let (button, _) = parse_button_binding(button)?;
            (
                Action::MouseButton { button, down: true },
                Some(Action::MouseButton {
                    button,
                    down: false,
                }),
            )
        }
        ActionEntry::RestartServer => (Action::RestartServer, None),
    })
}

// ── Config repository ─────────────────────────────────────────────────────────

/// Determines the platform-appropriate directory for the config file.
///
/// # Errors
///
/// Returns [`ConfigError::NoPlatformConfigDir`] when the platform config base
/// directory cannot be determined from the environment.
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
    Ok(config_dir()?.join("server.toml"))
}

/// Loads the config from the default location.
///
/// # Errors
///
/// Same as [`load_config_from`].
pub fn load_config() -> Result<ServerFileConfig, ConfigError> {
    load_config_from(&config_file_path()?)
}

/// Loads the config from `path`, returning the defaults if the file does not
/// exist yet.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] for file-system errors other than "not found",
/// and [`ConfigError::Parse`] if the TOML is malformed.
pub fn load_config_from(path: &Path) -> Result<ServerFileConfig, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ServerFileConfig::default()),
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
pub fn save_config_to(config: &ServerFileConfig, path: &Path) -> Result<(), ConfigError> {
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

/// Resolves the platform config directory, including the `KVMSession`
/// subdirectory.
fn platform_config_dir() -> Option<PathBuf> {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA").map(|p| PathBuf::from(p).join("KVMSession"))
    }

    #[cfg(target_os = "linux")]
    {
        // XDG_CONFIG_HOME or ~/.config
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
