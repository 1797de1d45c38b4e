// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! The installed objects of this node: one toml file per object under a root directory.
//!
//! Layout:
//!
//! ```text
//! <root>/cluster.toml                          the cluster object
//! <root>/<name>.toml                           services of the root namespace
//! <root>/<kind>/<name>.toml                    other objects of the root namespace
//! <root>/namespaces/<ns>/<kind>/<name>.toml    objects of other namespaces
//! ```

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::config::{Config, Key, ObjectConfig, DEFAULT_SECTION};
use crate::path::{Identifier, Kind, CLUSTER_NAME, ROOT_NAMESPACE};
use crate::selector::{SelectError, Universe};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object {0} is not installed on this node")]
    NotInstalled(Identifier),

    #[error("could not read \"{path}\": {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("could not parse \"{path}\": {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug)]
pub struct ObjectStore {
    root: PathBuf,
    var: PathBuf,
    cache: Mutex<HashMap<Identifier, Arc<ObjectConfig>>>,
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>, var: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            var: var.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.root(), config.var_dir())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the configuration file of `id` lives.
    pub fn config_path(&self, id: &Identifier) -> PathBuf {
        let file = format!("{}.toml", id.name());
        if id.kind() == Kind::Ccfg && id.name() == CLUSTER_NAME {
            self.root.join(format!("{CLUSTER_NAME}.toml"))
        } else if id.namespace() != ROOT_NAMESPACE {
            self.root
                .join("namespaces")
                .join(id.namespace())
                .join(id.kind().as_str())
                .join(file)
        } else if id.kind() == Kind::Svc {
            self.root.join(file)
        } else {
            self.root.join(id.kind().as_str()).join(file)
        }
    }

    /// Directory holding the local state of `id`.
    pub fn state_dir(&self, id: &Identifier) -> PathBuf {
        self.var.join("objects").join(id.fqn())
    }

    pub fn frozen_flag(&self, id: &Identifier) -> PathBuf {
        self.state_dir(id).join("frozen")
    }

    pub fn is_frozen(&self, id: &Identifier) -> bool {
        self.frozen_flag(id).exists()
    }

    /// Every installed object, sorted by identifier.
    pub fn list(&self) -> Result<Vec<Identifier>, StoreError> {
        let mut ids = Vec::new();

        for stem in toml_stems(&self.root)? {
            if stem == CLUSTER_NAME {
                ids.push(Identifier::cluster());
            } else {
                push_valid(&mut ids, ROOT_NAMESPACE, Kind::Svc, &stem);
            }
        }

        for kind in Kind::OBJECT_KINDS {
            if matches!(kind, Kind::Svc | Kind::Ccfg) {
                continue;
            }
            for stem in toml_stems(&self.root.join(kind.as_str()))? {
                push_valid(&mut ids, ROOT_NAMESPACE, kind, &stem);
            }
        }

        for namespace in subdirs(&self.root.join("namespaces"))? {
            for kind in Kind::OBJECT_KINDS {
                if kind == Kind::Ccfg {
                    continue;
                }
                let dir = self
                    .root
                    .join("namespaces")
                    .join(&namespace)
                    .join(kind.as_str());
                for stem in toml_stems(&dir)? {
                    push_valid(&mut ids, &namespace, kind, &stem);
                }
            }
        }

        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    pub fn contains(&self, id: &Identifier) -> bool {
        !id.is_node() && self.config_path(id).is_file()
    }

    /// Load and cache the configuration of `id`.
    pub fn load(&self, id: &Identifier) -> Result<Arc<ObjectConfig>, StoreError> {
        if let Some(config) = self.cached(id) {
            return Ok(config);
        }
        let path = self.config_path(id);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::NotInstalled(id.clone()))
            }
            Err(source) => {
                return Err(StoreError::Read {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        let config = ObjectConfig::from_toml(&contents).map_err(|source| StoreError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let config = Arc::new(config);
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(id.clone(), Arc::clone(&config));
        }
        Ok(config)
    }

    fn cached(&self, id: &Identifier) -> Option<Arc<ObjectConfig>> {
        self.cache.lock().ok()?.get(id).cloned()
    }
}

fn push_valid(ids: &mut Vec<Identifier>, namespace: &str, kind: Kind, name: &str) {
    match Identifier::object(namespace, kind, name) {
        Ok(id) => ids.push(id),
        Err(e) => tracing::warn!("ignoring installed file for {namespace}/{kind}/{name}: {e}"),
    }
}

/// File stems of the `*.toml` files directly under `dir`. A missing directory is empty.
fn toml_stems(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut stems = Vec::new();
    for entry in read_dir(dir)? {
        let path = entry.path();
        if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
            stems.push(stem.to_string());
        }
    }
    Ok(stems)
}

fn subdirs(dir: &Path) -> Result<Vec<String>, StoreError> {
    let mut names = Vec::new();
    for entry in read_dir(dir)? {
        if entry.path().is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
    }
    Ok(names)
}

fn read_dir(dir: &Path) -> Result<Vec<std::fs::DirEntry>, StoreError> {
    let read_err = |source| StoreError::Read {
        path: dir.display().to_string(),
        source,
    };
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.collect::<Result<Vec<_>, _>>().map_err(read_err),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(read_err(e)),
    }
}

impl From<StoreError> for SelectError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Read { path, source } => SelectError::Io { path, source },
            other => SelectError::resolution(other.to_string()),
        }
    }
}

impl Universe for ObjectStore {
    fn list(&self) -> Result<Vec<Identifier>, SelectError> {
        Ok(ObjectStore::list(self)?)
    }

    fn exists(&self, id: &Identifier) -> Result<bool, SelectError> {
        Ok(self.contains(id))
    }

    /// A set frozen flag reads as `frozen = true`. An object whose config does not parse has no
    /// values, so it matches no predicate.
    fn value(&self, id: &Identifier, key: &Key) -> Result<Option<String>, SelectError> {
        if key.section == DEFAULT_SECTION && key.option == "frozen" && self.is_frozen(id) {
            return Ok(Some("true".to_string()));
        }
        match self.load(id) {
            Ok(config) => Ok(config.get(key).map(|v| v.to_string())),
            Err(e @ StoreError::Parse { .. }) => {
                tracing::warn!(%id, "ignoring object in selector: {e}");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::TestEnvironment;

    #[test]
    fn layout() {
        let store = ObjectStore::new("/etc/corral/objects", "/var/lib/corral");
        let path = |s: &str| store.config_path(&Identifier::parse_path(s).unwrap());

        assert_eq!(path("web1"), PathBuf::from("/etc/corral/objects/web1.toml"));
        assert_eq!(
            path("vol/data"),
            PathBuf::from("/etc/corral/objects/vol/data.toml")
        );
        assert_eq!(
            path("prod/svc/web1"),
            PathBuf::from("/etc/corral/objects/namespaces/prod/svc/web1.toml")
        );
        assert_eq!(path("cluster"), PathBuf::from("/etc/corral/objects/cluster.toml"));
        assert_eq!(
            store.frozen_flag(&Identifier::parse_path("web1").unwrap()),
            PathBuf::from("/var/lib/corral/objects/root/svc/web1/frozen")
        );
    }

    #[test]
    fn list_and_load() {
        let env = TestEnvironment::new("store_list_and_load".to_string());
        env.install("web1", "env = \"prod\"");
        env.install("vol/data", "");
        env.install("prod/cfg/app", "[\"app#1\"]\nstart = \"true\"");
        env.install("cluster", "");

        let store = env.store();
        let ids: Vec<String> = store.list().unwrap().iter().map(|i| i.to_string()).collect();
        assert_eq!(ids, vec!["cluster", "prod/cfg/app", "vol/data", "web1"]);

        let web1 = Identifier::parse_path("web1").unwrap();
        assert_eq!(
            Universe::value(&store, &web1, &Key::parse("env").unwrap()).unwrap(),
            Some("prod".to_string())
        );
        assert!(matches!(
            store.load(&Identifier::parse_path("nope").unwrap()),
            Err(StoreError::NotInstalled(_))
        ));
    }

    #[test]
    fn frozen_flag_reads_as_config_value() {
        let env = TestEnvironment::new("store_frozen_flag_value".to_string());
        env.install("web1", "");
        env.install("web2", "frozen = false");
        let store = env.store();
        let frozen = Key::parse("frozen").unwrap();
        let web1 = Identifier::parse_path("web1").unwrap();
        let web2 = Identifier::parse_path("web2").unwrap();

        assert_eq!(Universe::value(&store, &web1, &frozen).unwrap(), None);
        std::fs::create_dir_all(store.state_dir(&web2)).unwrap();
        std::fs::write(store.frozen_flag(&web2), "").unwrap();
        assert_eq!(
            Universe::value(&store, &web2, &frozen).unwrap(),
            Some("true".to_string())
        );
    }

    #[test]
    fn unparseable_object_has_no_values() {
        let env = TestEnvironment::new("store_unparseable_value".to_string());
        env.install("web1", "this is = = not toml");
        let store = env.store();
        let web1 = Identifier::parse_path("web1").unwrap();
        assert_eq!(
            Universe::value(&store, &web1, &Key::parse("env").unwrap()).unwrap(),
            None
        );
        assert!(matches!(store.load(&web1), Err(StoreError::Parse { .. })));
    }

    #[test]
    fn missing_root_is_empty() {
        let store = ObjectStore::new("/nonexistent/corral/objects", "/nonexistent/corral/var");
        assert!(store.list().unwrap().is_empty());
    }
}
