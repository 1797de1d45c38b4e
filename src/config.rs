// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::PathBuf;

use crate::path::Identifier;
use crate::selector::{SelectError, Universe};

/// Section holding the keys that are not scoped to a resource.
pub const DEFAULT_SECTION: &str = "DEFAULT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not open config file \"{path}\": {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("could not parse config file \"{path}\": {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// Client configuration file.
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct Config {
    /// Directory holding one toml file per installed object.
    pub root: Option<String>,

    /// Directory holding local object state, such as frozen flags.
    pub var: Option<String>,

    /// URL of the daemon running on this node.
    pub daemon: Option<String>,

    #[serde(default)]
    pub cluster: ClusterConfig,

    /// The ambient remote context. When set, the CLI talks to `context.server` and never falls
    /// back to local resolution.
    pub context: Option<ContextConfig>,

    #[serde(default)]
    pub tls: TlsConfig,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct ClusterConfig {
    pub name: Option<String>,

    /// Names of the cluster members, used to resolve node selectors without the daemon.
    #[serde(default)]
    pub nodes: Vec<String>,

    /// Node labels, keyed by node name.
    #[serde(default)]
    pub labels: HashMap<String, HashMap<String, String>>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ContextConfig {
    pub name: Option<String>,
    pub server: String,
    pub token: Option<String>,

    /// Present the client certificate from `[tls]` to the server.
    #[serde(default)]
    pub mtls: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct TlsConfig {
    pub client_cert: Option<String>,
    pub client_key: Option<String>,
    pub ca_cert: Option<String>,
}

impl Config {
    /// Load the config file at `path`, or at the default location.
    ///
    /// A missing file at the default location yields the default config, so that a node with no
    /// config file at all still works; a path given explicitly must exist.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_string(), true),
            None => (crate::default_config_path(), false),
        };
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path, "no config file, using defaults");
                return Ok(Config::default());
            }
            Err(source) => return Err(ConfigError::Read { path, source }),
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn root(&self) -> PathBuf {
        PathBuf::from(self.root.clone().unwrap_or_else(crate::default_root))
    }

    pub fn var_dir(&self) -> PathBuf {
        PathBuf::from(self.var.clone().unwrap_or_else(crate::default_var))
    }

    pub fn daemon_url(&self) -> String {
        self.daemon.clone().unwrap_or_else(crate::default_daemon)
    }

    /// The endpoint the control plane client should use: an explicit override wins, then the
    /// ambient context, then the local daemon.
    pub fn server_url(&self, server_override: Option<&str>) -> String {
        match (server_override, &self.context) {
            (Some(server), _) => server.to_string(),
            (None, Some(context)) => context.server.clone(),
            (None, None) => self.daemon_url(),
        }
    }

    pub fn client_cert(&self) -> String {
        self.tls
            .client_cert
            .clone()
            .unwrap_or_else(crate::default_client_cert)
    }

    pub fn client_key(&self) -> String {
        self.tls
            .client_key
            .clone()
            .unwrap_or_else(crate::default_client_key)
    }

    pub fn ca_cert(&self) -> String {
        self.tls.ca_cert.clone().unwrap_or_else(crate::default_ca_cert)
    }

    pub fn node_table(&self) -> NodeTable {
        NodeTable::new(self.cluster.nodes.clone(), self.cluster.labels.clone())
    }
}

/// Address of a single configuration value: `section.option`, or just `option` for the
/// `DEFAULT` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Key {
    pub section: String,
    pub option: String,
}

impl Key {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        if s.is_empty() {
            return None;
        }
        match s.rsplit_once('.') {
            Some((section, option)) if !section.is_empty() && !option.is_empty() => Some(Key {
                section: section.to_string(),
                option: option.to_string(),
            }),
            Some(_) => None,
            None => Some(Key {
                section: DEFAULT_SECTION.to_string(),
                option: s.to_string(),
            }),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.section == DEFAULT_SECTION {
            write!(f, "{}", self.option)
        } else {
            write!(f, "{}.{}", self.section, self.option)
        }
    }
}

/// The configuration of one installed object, as sections of string values.
///
/// Top-level keys of the toml file land in the `DEFAULT` section; every table is a resource
/// section named by its resource id, e.g. `["app#1"]`.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct ObjectConfig {
    pub sections: BTreeMap<String, BTreeMap<String, String>>,
}

impl ObjectConfig {
    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        let table: toml::Table = toml::from_str(contents)?;
        let mut sections: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (key, value) in table {
            match value {
                toml::Value::Table(options) => {
                    let section = sections.entry(key).or_default();
                    for (option, value) in options {
                        section.insert(option, value_string(&value));
                    }
                }
                other => {
                    sections
                        .entry(DEFAULT_SECTION.to_string())
                        .or_default()
                        .insert(key, value_string(&other));
                }
            }
        }
        Ok(ObjectConfig { sections })
    }

    pub fn get(&self, key: &Key) -> Option<&str> {
        self.sections
            .get(&key.section)
            .and_then(|section| section.get(&key.option))
            .map(|v| v.as_str())
    }

    /// Resource sections, i.e. every section but `DEFAULT`, in rid order.
    pub fn resources(&self) -> impl Iterator<Item = (&String, &BTreeMap<String, String>)> {
        self.sections
            .iter()
            .filter(|(name, _)| name.as_str() != DEFAULT_SECTION)
    }
}

fn value_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        toml::Value::Array(items) => items
            .iter()
            .map(value_string)
            .collect::<Vec<_>>()
            .join(" "),
        other => other.to_string(),
    }
}

/// The configured cluster members, the local universe for node selectors.
#[derive(Debug, Clone, Default)]
pub struct NodeTable {
    nodes: Vec<String>,
    labels: HashMap<String, HashMap<String, String>>,
}

impl NodeTable {
    pub fn new(nodes: Vec<String>, labels: HashMap<String, HashMap<String, String>>) -> Self {
        Self { nodes, labels }
    }
}

impl Universe for NodeTable {
    fn list(&self) -> Result<Vec<Identifier>, SelectError> {
        self.nodes
            .iter()
            .map(|name| {
                Identifier::node(name).map_err(|e| {
                    SelectError::resolution(format!("invalid node in cluster config: {e}"))
                })
            })
            .collect()
    }

    fn exists(&self, id: &Identifier) -> Result<bool, SelectError> {
        Ok(id.is_node() && self.nodes.iter().any(|n| n == id.name()))
    }

    fn value(&self, id: &Identifier, key: &Key) -> Result<Option<String>, SelectError> {
        Ok(self
            .labels
            .get(id.name())
            .and_then(|labels| labels.get(&key.to_string()))
            .cloned())
    }
}
