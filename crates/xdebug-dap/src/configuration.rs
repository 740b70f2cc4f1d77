//! DBGp-facing adapter configuration: everything in the options table
//! except the CLI-launch concerns, which live in [`LaunchRequestArguments`]
//! so that loading a DBGp-attach configuration never needs to know how the
//! debuggee process was started.

use std::collections::HashMap;

use dbgp_uri::PathMapping;
use serde::{Deserialize, Serialize};

/// `stream.stdout` modes: disabled, copied to the adapter's own stdout,
/// or redirected (debuggee's normal stdout is suppressed).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    #[default]
    Disabled,
    Copy,
    Redirect,
}

impl StreamMode {
    /// The DBGp `stdout -c <mode>` value.
    #[must_use]
    pub fn wire_value(self) -> u8 {
        match self {
            StreamMode::Disabled => 0,
            StreamMode::Copy => 1,
            StreamMode::Redirect => 2,
        }
    }
}

/// Engine stdout streaming configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StreamConfig {
    #[serde(default)]
    pub stdout: StreamMode,
}

/// Proxy registration configuration (§6, `proxyinit`/`proxystop`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProxyConfig {
    #[serde(default)]
    pub enable: bool,
    pub host: String,
    pub port: u16,
    pub key: String,
    #[serde(default)]
    pub allow_multiple_sessions: bool,
    #[serde(default = "default_proxy_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_proxy_timeout_ms() -> u64 {
    3000
}

/// One `(server, client)` path-mapping entry as loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PathMappingEntry {
    pub server: String,
    pub client: String,
}

/// The full DBGp-facing options table (§6 of the core specification),
/// everything needed to listen for engine connections and translate their
/// traffic into DAP events. Deliberately excludes how (or whether) a
/// debuggee process gets launched — see [`LaunchRequestArguments`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Configuration {
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub stop_on_entry: bool,
    #[serde(default)]
    pub path_mappings: Vec<PathMappingEntry>,
    /// Legacy single-entry form, folded into `path_mappings` at load time.
    #[serde(default)]
    pub server_source_root: Option<String>,
    #[serde(default)]
    pub local_source_root: Option<String>,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub ignore_exceptions: Vec<String>,
    #[serde(default)]
    pub skip_entry_paths: Vec<String>,
    #[serde(default)]
    pub skip_files: Vec<String>,
    #[serde(default)]
    pub xdebug_settings: HashMap<String, String>,
    #[serde(default)]
    pub proxy: Option<ProxyConfig>,
    /// `<= 0` means unlimited (§9 Open Question (a)).
    #[serde(default)]
    pub max_connections: i64,
    #[serde(default)]
    pub xdebug_cloud_token: Option<String>,
    #[serde(default)]
    pub stream: StreamConfig,
}

fn default_hostname() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    9003
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            port: default_port(),
            stop_on_entry: false,
            path_mappings: Vec::new(),
            server_source_root: None,
            local_source_root: None,
            ignore: Vec::new(),
            ignore_exceptions: Vec::new(),
            skip_entry_paths: Vec::new(),
            skip_files: Vec::new(),
            xdebug_settings: HashMap::new(),
            proxy: None,
            max_connections: 0,
            xdebug_cloud_token: None,
            stream: StreamConfig::default(),
        }
    }
}

impl Configuration {
    /// `None` means unlimited — `max_connections <= 0` per the resolved
    /// `??`-over-comparison ambiguity in the source this was distilled
    /// from (the source's `args.maxConnections ?? 0 > 0` almost certainly
    /// meant "treat a non-positive cap as unlimited").
    #[must_use]
    pub fn effective_max_connections(&self) -> Option<usize> {
        if self.max_connections <= 0 { None } else { Some(self.max_connections as usize) }
    }

    /// Build the path-mapping table, folding the legacy
    /// `server_source_root`/`local_source_root` single-entry form in as an
    /// additional mapping if present.
    #[must_use]
    pub fn path_mapping(&self) -> PathMapping {
        let mut pairs: Vec<(String, String)> =
            self.path_mappings.iter().map(|e| (e.server.clone(), e.client.clone())).collect();
        if let (Some(server), Some(client)) = (&self.server_source_root, &self.local_source_root) {
            pairs.push((server.clone(), client.clone()));
        }
        PathMapping::new(pairs)
    }
}

/// CLI-launch concerns, modeled separately so that configuration loading
/// for an attach-only session never needs these fields at all.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequestArguments {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub cwd: Option<String>,
    #[serde(default)]
    pub runtime_executable: Option<String>,
    #[serde(default)]
    pub runtime_args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub env_file: Option<String>,
    #[serde(default)]
    pub external_console: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use dbgp_test_support::must;

    #[test]
    fn defaults_match_xdebug_conventions() {
        let config = Configuration::default();
        assert_eq!(config.port, 9003);
        assert!(!config.stop_on_entry);
        assert_eq!(config.effective_max_connections(), None);
    }

    #[test]
    fn non_positive_max_connections_is_unlimited() {
        let mut config = Configuration::default();
        config.max_connections = 0;
        assert_eq!(config.effective_max_connections(), None);
        config.max_connections = -5;
        assert_eq!(config.effective_max_connections(), None);
    }

    #[test]
    fn positive_max_connections_is_a_cap() {
        let mut config = Configuration::default();
        config.max_connections = 4;
        assert_eq!(config.effective_max_connections(), Some(4));
    }

    #[test]
    fn legacy_source_root_pair_folds_into_path_mapping() {
        let mut config = Configuration::default();
        config.server_source_root = Some("file:///var/www".to_string());
        config.local_source_root = Some("/home/u/site".to_string());
        let mapping = config.path_mapping();
        assert_eq!(mapping.to_client("file:///var/www/index.php"), "/home/u/site/index.php");
    }

    #[test]
    fn deserializes_from_camel_case_json() {
        let json = r#"{
            "hostname": "127.0.0.1",
            "port": 9003,
            "stopOnEntry": true,
            "maxConnections": 0,
            "pathMappings": [{"server": "file:///var/www", "client": "/home/u/p"}]
        }"#;
        let config: Configuration = must(serde_json::from_str(json));
        assert!(config.stop_on_entry);
        assert_eq!(config.path_mappings.len(), 1);
    }
}
