// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The namespace objects live in when none is given.
pub const ROOT_NAMESPACE: &str = "root";

/// Name of the one object of kind `ccfg`.
pub const CLUSTER_NAME: &str = "cluster";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PathError {
    #[error("empty identifier")]
    Empty,

    #[error("invalid kind \"{0}\"")]
    Kind(String),

    #[error("invalid name \"{0}\"")]
    Name(String),

    #[error("invalid namespace \"{0}\"")]
    Namespace(String),

    #[error("too many path segments in \"{0}\"")]
    Segments(String),
}

/// The closed set of things a selector can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Kind {
    Svc,
    Vol,
    Usr,
    Sec,
    Cfg,
    Ccfg,
    Node,
}

impl Kind {
    /// Kinds an object path may carry. `Node` names a cluster member, not an object.
    pub const OBJECT_KINDS: [Kind; 6] = [
        Kind::Svc,
        Kind::Vol,
        Kind::Usr,
        Kind::Sec,
        Kind::Cfg,
        Kind::Ccfg,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Svc => "svc",
            Kind::Vol => "vol",
            Kind::Usr => "usr",
            Kind::Sec => "sec",
            Kind::Cfg => "cfg",
            Kind::Ccfg => "ccfg",
            Kind::Node => "node",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Kind {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "svc" => Ok(Kind::Svc),
            "vol" => Ok(Kind::Vol),
            "usr" => Ok(Kind::Usr),
            "sec" => Ok(Kind::Sec),
            "cfg" => Ok(Kind::Cfg),
            "ccfg" => Ok(Kind::Ccfg),
            "node" => Ok(Kind::Node),
            _ => Err(PathError::Kind(s.to_string())),
        }
    }
}

/// Identifier of a cluster object (namespace, kind, name) or of a node.
///
/// Equality, hashing and ordering all use the canonical string, so two identifiers are equal
/// exactly when they render the same.
#[derive(Debug, Clone)]
pub struct Identifier {
    namespace: String,
    kind: Kind,
    name: String,
    canonical: String,
}

impl Identifier {
    /// Build an object identifier, validating every part.
    pub fn object(namespace: &str, kind: Kind, name: &str) -> Result<Self, PathError> {
        if kind == Kind::Node {
            return Err(PathError::Kind(kind.to_string()));
        }
        if !valid_word(namespace) {
            return Err(PathError::Namespace(namespace.to_string()));
        }
        if !valid_word(name) {
            return Err(PathError::Name(name.to_string()));
        }
        Ok(Self::new_unchecked(namespace, kind, name))
    }

    /// Build a node identifier.
    pub fn node(name: &str) -> Result<Self, PathError> {
        if !valid_word(name) {
            return Err(PathError::Name(name.to_string()));
        }
        Ok(Self::new_unchecked("", Kind::Node, name))
    }

    pub fn cluster() -> Self {
        Self::new_unchecked(ROOT_NAMESPACE, Kind::Ccfg, CLUSTER_NAME)
    }

    fn new_unchecked(namespace: &str, kind: Kind, name: &str) -> Self {
        let canonical = if kind == Kind::Node {
            name.to_string()
        } else if kind == Kind::Ccfg && name == CLUSTER_NAME && namespace == ROOT_NAMESPACE {
            CLUSTER_NAME.to_string()
        } else if namespace != ROOT_NAMESPACE {
            format!("{namespace}/{kind}/{name}")
        } else if kind != Kind::Svc {
            format!("{kind}/{name}")
        } else {
            name.to_string()
        };
        Identifier {
            namespace: namespace.to_string(),
            kind,
            name: name.to_string(),
            canonical,
        }
    }

    /// Parse an object path of the form `name`, `kind/name` or `namespace/kind/name`.
    pub fn parse_path(s: &str) -> Result<Self, PathError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(PathError::Empty);
        }
        if s == CLUSTER_NAME {
            return Ok(Self::cluster());
        }
        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [name] => Self::object(ROOT_NAMESPACE, Kind::Svc, name),
            [kind, name] => Self::object(ROOT_NAMESPACE, kind.parse()?, name),
            [namespace, kind, name] => Self::object(namespace, kind.parse()?, name),
            _ => Err(PathError::Segments(s.to_string())),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn kind(&self) -> Kind {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_node(&self) -> bool {
        self.kind == Kind::Node
    }

    /// The canonical string, which is also the set-membership key.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// `namespace/kind/name` for objects, the bare name for nodes.
    pub fn fqn(&self) -> String {
        if self.is_node() {
            self.name.clone()
        } else {
            format!("{}/{}/{}", self.namespace, self.kind, self.name)
        }
    }
}

/// Names and namespaces: start alphanumeric, then alphanumerics, `-`, `_` or `.`.
fn valid_word(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphanumeric() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical)
    }
}

impl PartialEq for Identifier {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl Eq for Identifier {}

impl Hash for Identifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for Identifier {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Identifier {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl Serialize for Identifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical)
    }
}

impl<'de> Deserialize<'de> for Identifier {
    /// Deserializes object paths. Node names travel as plain strings.
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Identifier::parse_path(&s).map_err(serde::de::Error::custom)
    }
}
