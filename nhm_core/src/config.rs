//! Configuration loading for the Node Health Monitor.
//!
//! The configuration file is TOML with two groups, `[node]` and
//! `[userland]`. Loading never fails: a missing file, a parse error, or an
//! out-of-range value is logged and replaced by the built-in default, so
//! the monitor always comes up.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/node-health-monitor.conf";

/// Settings of the `[node]` group.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    /// Number of previous life cycles kept in the history
    pub historic_lc_count: u32,
    /// Failed-app count that triggers a node restart request (0 disables)
    pub max_failed_apps: u32,
    /// Applications whose restart requests are always rejected
    pub no_restart_apps: Vec<String>,
    /// Root directory for the key-value store and the history file
    pub data_dir: PathBuf,
    /// Bind address of the public interface
    pub listen_addr: String,
    /// Base URL of the Node State Manager
    pub nsm_endpoint: String,
    /// Base URL of the unit supervisor; absent leaves observation off
    pub supervisor_endpoint: Option<String>,
    /// Base URL under which peers reach this daemon's callback routes
    pub external_addr: Option<String>,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            historic_lc_count: 0,
            max_failed_apps: 0,
            no_restart_apps: Vec::new(),
            data_dir: PathBuf::from("/var/lib/node-health-monitor"),
            listen_addr: "127.0.0.1:9357".to_string(),
            nsm_endpoint: "http://127.0.0.1:9356".to_string(),
            supervisor_endpoint: None,
            external_addr: None,
        }
    }
}

/// Settings of the `[userland]` group.
#[derive(Debug, Clone, Default)]
pub struct UserlandSettings {
    /// Prober cadence in seconds (0 disables the prober)
    pub ul_chk_interval: u32,
    /// Files that must exist
    pub monitored_files: Vec<String>,
    /// Executables that must have a running process
    pub monitored_progs: Vec<String>,
    /// Commands that must exit with status 0
    pub monitored_procs: Vec<String>,
    /// Endpoint addresses that must answer an identity round-trip
    pub monitored_dbus: Vec<String>,
}

/// Complete, validated NHM configuration. Values are immutable after load.
#[derive(Debug, Clone, Default)]
pub struct NhmConfig {
    pub node: NodeSettings,
    pub userland: UserlandSettings,
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    node: RawNode,
    #[serde(default)]
    userland: RawUserland,
}

#[derive(Debug, Default, Deserialize)]
struct RawNode {
    historic_lc_count: Option<i64>,
    max_failed_apps: Option<i64>,
    no_restart_apps: Option<Vec<String>>,
    data_dir: Option<PathBuf>,
    listen_addr: Option<String>,
    nsm_endpoint: Option<String>,
    supervisor_endpoint: Option<String>,
    external_addr: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawUserland {
    ul_chk_interval: Option<i64>,
    monitored_files: Option<Vec<String>>,
    monitored_progs: Option<Vec<String>>,
    monitored_procs: Option<Vec<String>>,
    monitored_dbus: Option<Vec<String>>,
}

impl NhmConfig {
    /// Load the configuration from `path`, falling back to defaults on any
    /// error.
    pub fn load(path: &Path) -> Self {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) => {
                error!(file = %path.display(), error = %err, "failed to open configuration, using defaults");
                return NhmConfig::default();
            }
        };

        Self::from_toml_str(&contents)
    }

    /// Parse a configuration document, falling back to defaults on error.
    pub fn from_toml_str(contents: &str) -> Self {
        let raw: RawConfig = match toml::from_str(contents) {
            Ok(raw) => raw,
            Err(err) => {
                error!(error = %err, "failed to parse configuration, using defaults");
                return NhmConfig::default();
            }
        };

        let defaults = NodeSettings::default();
        let node = NodeSettings {
            historic_lc_count: load_count(raw.node.historic_lc_count, "node", "historic_lc_count", 0),
            max_failed_apps: load_count(raw.node.max_failed_apps, "node", "max_failed_apps", 0),
            no_restart_apps: load_list(raw.node.no_restart_apps),
            data_dir: raw.node.data_dir.unwrap_or(defaults.data_dir),
            listen_addr: raw.node.listen_addr.unwrap_or(defaults.listen_addr),
            nsm_endpoint: raw.node.nsm_endpoint.unwrap_or(defaults.nsm_endpoint),
            supervisor_endpoint: raw.node.supervisor_endpoint.filter(|s| !s.is_empty()),
            external_addr: raw.node.external_addr.filter(|s| !s.is_empty()),
        };

        let userland = UserlandSettings {
            ul_chk_interval: load_count(raw.userland.ul_chk_interval, "userland", "ul_chk_interval", 0),
            monitored_files: load_list(raw.userland.monitored_files),
            monitored_progs: load_list(raw.userland.monitored_progs),
            monitored_procs: load_list(raw.userland.monitored_procs),
            monitored_dbus: load_list(raw.userland.monitored_dbus),
        };

        NhmConfig { node, userland }
    }
}

/// Validate an optional integer setting. Negative and oversized values are
/// rejected with a log and replaced by the default.
fn load_count(value: Option<i64>, group: &str, key: &str, default: u32) -> u32 {
    match value {
        None => default,
        Some(v) if v < 0 || v > i64::from(u32::MAX) => {
            error!(group, key, value = v, "config value out of range, using default");
            default
        }
        Some(v) => {
            info!(group, key, value = v, "loaded config value");
            v as u32
        }
    }
}

/// Empty entries are dropped; an all-empty list behaves like an absent key.
fn load_list(value: Option<Vec<String>>) -> Vec<String> {
    value
        .unwrap_or_default()
        .into_iter()
        .filter(|entry| !entry.is_empty())
        .collect()
}
