// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Run one action per target, concurrently, and collect every outcome.

use futures::future::{BoxFuture, FutureExt};
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::actions::{ActionError, CommandRun};
use crate::client::{Ack, ActionResponse};
use crate::config::ObjectConfig;
use crate::path::Identifier;
use crate::render::HumanRender;

/// The body of an action, invoked once per target.
pub type ActionFn =
    Arc<dyn Fn(Identifier) -> BoxFuture<'static, Result<Payload, ActionError>> + Send + Sync>;

/// Build an `ActionFn` from an async closure.
pub fn action_fn<F, Fut>(f: F) -> ActionFn
where
    F: Fn(Identifier) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Payload, ActionError>> + Send + 'static,
{
    Arc::new(move |target| f(target).boxed())
}

/// What an action produced for one target.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Payload {
    Path(Identifier),
    Config(ObjectConfig),
    Flag { name: String, set: bool },
    Commands(Vec<CommandRun>),
    Remote(ActionResponse),
    Accepted(Ack),
    Empty,
}

impl Payload {
    /// The node the payload came from, when a peer reported it.
    pub fn origin(&self) -> Option<&str> {
        match self {
            Payload::Remote(response) if !response.node.is_empty() => Some(&response.node),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PanicInfo {
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("{target}: {source}")]
pub struct TargetError {
    pub target: Identifier,
    #[source]
    pub source: ActionError,
}

/// The outcome of an action on one target.
#[derive(Clone)]
pub struct TargetResult {
    pub target: Identifier,
    pub node: String,
    pub data: Option<Payload>,
    pub error: Option<Arc<TargetError>>,
    pub panic: Option<PanicInfo>,
    pub renderer: Option<HumanRender>,
}

impl std::fmt::Debug for TargetResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TargetResult")
            .field("target", &self.target)
            .field("node", &self.node)
            .field("data", &self.data)
            .field("error", &self.error)
            .field("panic", &self.panic)
            .field("renderer", &self.renderer.is_some())
            .finish()
    }
}

impl TargetResult {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.panic.is_none()
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}

/// Invoke `action` once per target and return exactly one `TargetResult` per target, in
/// completion order.
///
/// Each invocation runs in its own task. A panic in one invocation is recovered into that
/// target's `panic` field and does not affect the others.
pub async fn run(
    targets: &[Identifier],
    action: ActionFn,
    renderer: Option<HumanRender>,
    nodename: &str,
) -> Vec<TargetResult> {
    if targets.is_empty() {
        return Vec::new();
    }
    let (tx, mut rx) = mpsc::channel(targets.len());

    for target in targets.iter().cloned() {
        let tx = tx.clone();
        let action = Arc::clone(&action);
        let renderer = renderer.clone();
        let nodename = nodename.to_string();

        tokio::spawn(async move {
            let invoked = AssertUnwindSafe(async { action(target.clone()).await })
                .catch_unwind()
                .await;

            let mut result = TargetResult {
                target: target.clone(),
                node: nodename,
                data: None,
                error: None,
                panic: None,
                renderer,
            };
            match invoked {
                Ok(Ok(payload)) => {
                    if let Some(origin) = payload.origin() {
                        result.node = origin.to_string();
                    }
                    result.data = Some(payload);
                }
                Ok(Err(source)) => {
                    tracing::debug!(%target, "action failed: {source}");
                    result.error = Some(Arc::new(TargetError { target, source }));
                }
                Err(payload) => {
                    let message = panic_message(payload);
                    tracing::warn!(%target, "action panicked: {message}");
                    result.panic = Some(PanicInfo { message });
                }
            }
            let _ = tx.send(result).await;
        });
    }
    drop(tx);

    let mut results = Vec::with_capacity(targets.len());
    while let Some(result) = rx.recv().await {
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::time::Duration;

    fn ids(names: &[&str]) -> Vec<Identifier> {
        names
            .iter()
            .map(|n| Identifier::parse_path(n).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn panic_is_isolated() {
        let targets = ids(&["t1", "t2", "t3", "t4", "t5"]);
        let action = action_fn(|target: Identifier| async move {
            if target.name() == "t3" {
                panic!("boom on {}", target.name());
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
            Ok(Payload::Path(target))
        });

        let results = run(&targets, action, None, "n1").await;
        assert_eq!(results.len(), 5);

        let seen: HashSet<String> = results.iter().map(|r| r.target.to_string()).collect();
        assert_eq!(seen.len(), 5);

        for result in results.iter() {
            if result.target.name() == "t3" {
                assert_eq!(result.panic.as_ref().unwrap().message, "boom on t3");
                assert!(result.data.is_none());
            } else {
                assert!(result.is_ok());
                assert_eq!(result.data, Some(Payload::Path(result.target.clone())));
                assert_eq!(result.node, "n1");
            }
        }
    }

    #[tokio::test]
    async fn errors_carry_the_target() {
        let targets = ids(&["a", "b"]);
        let action = action_fn(|target: Identifier| async move {
            match target.name() {
                "a" => Err(ActionError::Failed("no luck".to_string())),
                _ => Ok(Payload::Empty),
            }
        });

        let results = run(&targets, action, None, "n1").await;
        let failed = results.iter().find(|r| r.target.name() == "a").unwrap();
        assert_eq!(failed.error.as_ref().unwrap().to_string(), "a: no luck");
    }

    #[tokio::test]
    async fn remote_payload_sets_the_node() {
        let action = action_fn(|_| async move {
            Ok(Payload::Remote(ActionResponse {
                node: "n7".to_string(),
                ..Default::default()
            }))
        });
        let results = run(&ids(&["a"]), action, None, "n1").await;
        assert_eq!(results[0].node, "n7");
    }

    #[tokio::test]
    async fn no_targets() {
        let action = action_fn(|_| async move { Ok(Payload::Empty) });
        assert!(run(&[], action, None, "n1").await.is_empty());
    }
}
