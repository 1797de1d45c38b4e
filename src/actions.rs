// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Local bodies of the object actions, run on this node against the installed objects.

use serde::Serialize;
use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::client::ClientError;
use crate::dispatch::{action_fn, ActionFn, Payload};
use crate::path::Identifier;
use crate::store::{ObjectStore, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("could not {op} \"{path}\": {source}")]
    Io {
        op: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("object is frozen")]
    Frozen,

    #[error("resource {rid}: `{command}` exited with status {status}: {stderr}")]
    Command {
        rid: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Failed(String),
}

/// One resource command run by a local start or stop.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CommandRun {
    pub rid: String,
    pub command: String,
    pub status: i32,
    pub stdout: String,
}

/// Which resources of an object a local action applies to. Empty lists do not filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResourceFilter {
    pub rids: Vec<String>,
    pub subsets: Vec<String>,
    pub tags: Vec<String>,
}

impl ResourceFilter {
    pub fn selects(&self, rid: &str, options: &BTreeMap<String, String>) -> bool {
        if !self.rids.is_empty() && !self.rids.iter().any(|r| r == rid) {
            return false;
        }
        if !self.subsets.is_empty() {
            let Some(subset) = options.get("subset") else {
                return false;
            };
            if !self.subsets.contains(subset) {
                return false;
            }
        }
        if !self.tags.is_empty() {
            let tags = options.get("tags").map(|t| t.as_str()).unwrap_or_default();
            if !tags.split_whitespace().any(|t| self.tags.iter().any(|w| w == t)) {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceAction {
    Start,
    Stop,
}

impl ResourceAction {
    fn as_str(&self) -> &'static str {
        match self {
            ResourceAction::Start => "start",
            ResourceAction::Stop => "stop",
        }
    }
}

impl std::fmt::Display for ResourceAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolve to the path itself, without touching the object.
pub fn ls() -> ActionFn {
    action_fn(|target: Identifier| async move { Ok(Payload::Path(target)) })
}

/// The parsed configuration of the object.
pub fn print_config(store: Arc<ObjectStore>) -> ActionFn {
    action_fn(move |target: Identifier| {
        let store = Arc::clone(&store);
        async move {
            let config = store.load(&target)?;
            Ok(Payload::Config(config.as_ref().clone()))
        }
    })
}

/// Set or clear the frozen flag of the object.
pub fn set_frozen(store: Arc<ObjectStore>, frozen: bool) -> ActionFn {
    action_fn(move |target: Identifier| {
        let store = Arc::clone(&store);
        async move {
            if !store.contains(&target) {
                return Err(StoreError::NotInstalled(target).into());
            }
            let flag = store.frozen_flag(&target);
            let io_err = |op, source| ActionError::Io {
                op,
                path: flag.display().to_string(),
                source,
            };
            if frozen {
                if let Some(dir) = flag.parent() {
                    tokio::fs::create_dir_all(dir)
                        .await
                        .map_err(|e| io_err("create", e))?;
                }
                tokio::fs::write(&flag, b"")
                    .await
                    .map_err(|e| io_err("write", e))?;
            } else {
                match tokio::fs::remove_file(&flag).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(io_err("remove", e)),
                }
            }
            tracing::debug!(%target, frozen, "frozen flag updated");
            Ok(Payload::Flag {
                name: "frozen".to_string(),
                set: frozen,
            })
        }
    })
}

/// Run the `start` or `stop` command of every selected resource section.
///
/// Resources start in rid order and stop in reverse rid order. The first failing command stops
/// the run. A frozen object refuses to start.
pub fn run_resources(
    store: Arc<ObjectStore>,
    filter: ResourceFilter,
    action: ResourceAction,
) -> ActionFn {
    let filter = Arc::new(filter);
    action_fn(move |target: Identifier| {
        let store = Arc::clone(&store);
        let filter = Arc::clone(&filter);
        async move {
            if action == ResourceAction::Start && store.is_frozen(&target) {
                return Err(ActionError::Frozen);
            }
            let config = store.load(&target)?;
            let mut commands: Vec<(String, String)> = config
                .resources()
                .filter(|(rid, options)| filter.selects(rid, options))
                .filter_map(|(rid, options)| {
                    options
                        .get(action.as_str())
                        .map(|command| (rid.clone(), command.clone()))
                })
                .collect();
            if action == ResourceAction::Stop {
                commands.reverse();
            }

            let mut runs = Vec::with_capacity(commands.len());
            for (rid, command) in commands {
                runs.push(run_command(&store, &target, &rid, &command).await?);
            }
            Ok(Payload::Commands(runs))
        }
    })
}

async fn run_command(
    store: &ObjectStore,
    target: &Identifier,
    rid: &str,
    command: &str,
) -> Result<CommandRun, ActionError> {
    tracing::debug!(%target, rid, command, "running resource command");
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .env("CORRAL_OBJECT", target.fqn())
        .env("CORRAL_RID", rid)
        .env("CORRAL_STATE_DIR", store.state_dir(target))
        .output()
        .await
        .map_err(|source| ActionError::Io {
            op: "run",
            path: command.to_string(),
            source,
        })?;

    let status = match output.status.code() {
        Some(code) => code,
        None => {
            return Err(ActionError::Failed(format!(
                "resource {rid}: `{command}` was killed by a signal"
            )))
        }
    };
    if status != 0 {
        return Err(ActionError::Command {
            rid: rid.to_string(),
            command: command.to_string(),
            status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(CommandRun {
        rid: rid.to_string(),
        command: command.to_string(),
        status,
        stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_env::TestEnvironment;

    fn options(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn resource_filter() {
        let all = ResourceFilter::default();
        assert!(all.selects("app#1", &options(&[])));

        let by_rid = ResourceFilter {
            rids: vec!["fs#1".to_string()],
            ..Default::default()
        };
        assert!(by_rid.selects("fs#1", &options(&[])));
        assert!(!by_rid.selects("app#1", &options(&[])));

        let by_tag = ResourceFilter {
            tags: vec!["db".to_string()],
            ..Default::default()
        };
        assert!(by_tag.selects("app#1", &options(&[("tags", "web db")])));
        assert!(!by_tag.selects("app#2", &options(&[("tags", "web")])));
        assert!(!by_tag.selects("app#3", &options(&[])));

        let by_subset = ResourceFilter {
            subsets: vec!["g1".to_string()],
            ..Default::default()
        };
        assert!(by_subset.selects("app#1", &options(&[("subset", "g1")])));
        assert!(!by_subset.selects("app#2", &options(&[("subset", "g2")])));
    }

    #[tokio::test]
    async fn freeze_and_thaw() {
        let env = TestEnvironment::new("actions_freeze_and_thaw".to_string());
        env.install("web1", "");
        let store = Arc::new(env.store());
        let web1 = Identifier::parse_path("web1").unwrap();

        let payload = set_frozen(Arc::clone(&store), true)(web1.clone()).await.unwrap();
        assert_eq!(
            payload,
            Payload::Flag {
                name: "frozen".to_string(),
                set: true
            }
        );
        assert!(store.is_frozen(&web1));

        set_frozen(Arc::clone(&store), false)(web1.clone())
            .await
            .unwrap();
        assert!(!store.is_frozen(&web1));

        let missing = Identifier::parse_path("nope").unwrap();
        assert!(matches!(
            set_frozen(store, true)(missing).await,
            Err(ActionError::Store(StoreError::NotInstalled(_)))
        ));
    }

    #[tokio::test]
    async fn start_and_stop_order() {
        let env = TestEnvironment::new("actions_start_and_stop_order".to_string());
        env.install(
            "web1",
            r#"
            ["app#1"]
            start = "echo start-a"
            stop = "echo stop-a"

            ["app#2"]
            start = "echo start-b"
            stop = "echo stop-b"
            tags = "late"

            ["fs#1"]
            mount = "/srv"
            "#,
        );
        let store = Arc::new(env.store());
        let web1 = Identifier::parse_path("web1").unwrap();

        let start = run_resources(
            Arc::clone(&store),
            ResourceFilter::default(),
            ResourceAction::Start,
        );
        let Payload::Commands(runs) = start(web1.clone()).await.unwrap() else {
            panic!("expected command runs");
        };
        let out: Vec<&str> = runs.iter().map(|r| r.stdout.as_str()).collect();
        assert_eq!(out, vec!["start-a", "start-b"]);

        let stop = run_resources(
            Arc::clone(&store),
            ResourceFilter::default(),
            ResourceAction::Stop,
        );
        let Payload::Commands(runs) = stop(web1.clone()).await.unwrap() else {
            panic!("expected command runs");
        };
        let out: Vec<&str> = runs.iter().map(|r| r.stdout.as_str()).collect();
        assert_eq!(out, vec!["stop-b", "stop-a"]);

        let tagged = run_resources(
            Arc::clone(&store),
            ResourceFilter {
                tags: vec!["late".to_string()],
                ..Default::default()
            },
            ResourceAction::Start,
        );
        let Payload::Commands(runs) = tagged(web1).await.unwrap() else {
            panic!("expected command runs");
        };
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].rid, "app#2");
    }

    #[tokio::test]
    async fn failing_command_and_frozen_object() {
        let env = TestEnvironment::new("actions_failing_command".to_string());
        env.install("db1", "[\"app#1\"]\nstart = \"echo oops >&2; exit 3\"");
        let store = Arc::new(env.store());
        let db1 = Identifier::parse_path("db1").unwrap();
        let start = run_resources(
            Arc::clone(&store),
            ResourceFilter::default(),
            ResourceAction::Start,
        );

        match start(db1.clone()).await {
            Err(ActionError::Command { status, stderr, .. }) => {
                assert_eq!(status, 3);
                assert_eq!(stderr, "oops");
            }
            other => panic!("expected command failure, got {other:?}"),
        }

        set_frozen(Arc::clone(&store), true)(db1.clone())
            .await
            .unwrap();
        assert!(matches!(start(db1).await, Err(ActionError::Frozen)));
    }
}
