//! Server configuration – reads/writes `~/.tooltree/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tooltree_reconciler::{ConnectFailurePolicy, DisconnectPolicy, SchedulerConfig};

/// Persisted server configuration stored in `~/.tooltree/config.toml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Name reported in the `initialize` response.
    #[serde(default = "default_server_name")]
    pub server_name: String,

    #[serde(default = "default_server_version")]
    pub server_version: String,

    /// How long to wait for the client's `initialize` request.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default)]
    pub on_disconnect: DisconnectPolicy,

    #[serde(default)]
    pub on_connect_failure: ConnectFailurePolicy,

    /// Close the server on a registration invariant violation.  Defaults to
    /// on in debug builds and off in release builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_invariants: Option<bool>,
}

fn default_server_name() -> String {
    "tooltree".to_string()
}
fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}
fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_name: default_server_name(),
            server_version: default_server_version(),
            connect_timeout_ms: default_connect_timeout_ms(),
            on_disconnect: DisconnectPolicy::default(),
            on_connect_failure: ConnectFailurePolicy::default(),
            strict_invariants: None,
        }
    }
}

impl Config {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        let defaults = SchedulerConfig::default();
        SchedulerConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            on_disconnect: self.on_disconnect,
            on_connect_failure: self.on_connect_failure,
            strict_invariants: self.strict_invariants.unwrap_or(defaults.strict_invariants),
        }
    }
}

/// Return the path to `~/.tooltree/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".tooltree").join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, String> {
    load_from(&config_path())
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    let cfg: Config =
        toml::from_str(&raw).map_err(|e| format!("Failed to parse config: {}", e))?;
    Ok(Some(cfg))
}

/// Apply `TOOLTREE_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TOOLTREE_SERVER_NAME` | `server_name` |
/// | `TOOLTREE_CONNECT_TIMEOUT_MS` | `connect_timeout_ms` |
/// | `TOOLTREE_ON_DISCONNECT` | `on_disconnect` (`await_reconnect` or `terminate`) |
///
/// Unparseable values are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("TOOLTREE_SERVER_NAME") {
        cfg.server_name = v;
    }
    if let Ok(v) = std::env::var("TOOLTREE_CONNECT_TIMEOUT_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.connect_timeout_ms = ms;
    }
    if let Ok(v) = std::env::var("TOOLTREE_ON_DISCONNECT")
        && let Some(policy) = parse_disconnect_policy(&v)
    {
        cfg.on_disconnect = policy;
    }
}

fn parse_disconnect_policy(raw: &str) -> Option<DisconnectPolicy> {
    match raw.trim() {
        "await_reconnect" => Some(DisconnectPolicy::AwaitReconnect),
        "terminate" => Some(DisconnectPolicy::Terminate),
        _ => None,
    }
}

/// Save the config to disk, creating `~/.tooltree/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))
}
