// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use futures::StreamExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{ClientError, ControlPlane, EventStream};
use crate::dispatch::aggregate::Failure;
use crate::path::Identifier;
use crate::render::Render;

/// Event kinds that end the reconciliation of an orchestration target.
pub const TERMINAL_EVENTS: [&str; 3] = ["success", "error", "ignored"];

/// A running watch task.
pub struct WatchHandle {
    cancel: CancellationToken,
    task: JoinHandle<Result<(), ClientError>>,
}

impl WatchHandle {
    /// Cancelling the token stops rendering events. The task ends at its next await point.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the task to end and report how it failed, if it did.
    pub async fn join(self) -> Option<Failure> {
        match self.task.await {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(Failure::Watch(Arc::new(e))),
            Err(e) => Some(Failure::Watch(Arc::new(ClientError::Decode(format!(
                "watch task failed: {e}"
            ))))),
        }
    }
}

/// Render a status snapshot of `selector`, then every event of `events` until the stream ends or
/// the watch is cancelled.
pub fn spawn(
    client: Arc<dyn ControlPlane>,
    selector: String,
    events: EventStream,
    renderer: Arc<dyn Render>,
) -> WatchHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(watch(client, selector, events, renderer, token));
    WatchHandle { cancel, task }
}

async fn watch(
    client: Arc<dyn ControlPlane>,
    selector: String,
    mut events: EventStream,
    renderer: Arc<dyn Render>,
    token: CancellationToken,
) -> Result<(), ClientError> {
    let snapshot = tokio::select! {
        _ = token.cancelled() => return Ok(()),
        snapshot = client.status(&selector) => snapshot?,
    };
    renderer.snapshot(&snapshot);

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ok(()),
            next = events.next() => match next {
                Some(Ok(event)) => renderer.event(&event),
                Some(Err(e)) => return Err(e),
                None => {
                    tracing::debug!(%selector, "event stream ended");
                    return Ok(());
                }
            },
        }
    }
}

/// Consume `events` until every one of `targets` reached a terminal event or `timeout` elapsed.
///
/// `error` events and targets left pending are reported as failures.
pub async fn wait_terminal(
    events: &mut EventStream,
    targets: &[Identifier],
    timeout: Duration,
) -> Vec<Failure> {
    let mut pending: HashSet<Identifier> = targets.iter().cloned().collect();
    let mut failures = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;

    while !pending.is_empty() {
        let next = match tokio::time::timeout_at(deadline, events.next()).await {
            Ok(next) => next,
            Err(_) => {
                failures.extend(left_pending(&pending, &format!("timed out after {timeout:?}")));
                return failures;
            }
        };
        let event = match next {
            Some(Ok(event)) => event,
            Some(Err(e)) => {
                failures.extend(left_pending(&pending, &format!("event stream failed: {e}")));
                return failures;
            }
            None => {
                failures.extend(left_pending(&pending, "event stream ended"));
                return failures;
            }
        };

        if !TERMINAL_EVENTS.contains(&event.kind.as_str()) {
            continue;
        }
        let Some(target) = event
            .path
            .as_deref()
            .and_then(|p| Identifier::parse_path(p).ok())
        else {
            continue;
        };
        if !pending.remove(&target) {
            continue;
        }
        tracing::debug!(%target, kind = %event.kind, "target reached a terminal state");
        if event.kind == "error" {
            let reason = match event.data.get("message").and_then(|m| m.as_str()) {
                Some(message) => message.to_string(),
                None => "orchestration failed".to_string(),
            };
            failures.push(Failure::Wait { target, reason });
        }
    }

    failures
}

fn left_pending(pending: &HashSet<Identifier>, reason: &str) -> Vec<Failure> {
    let mut targets: Vec<&Identifier> = pending.iter().collect();
    targets.sort();
    targets
        .into_iter()
        .map(|target| Failure::Wait {
            target: target.clone(),
            reason: reason.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Event;
    use futures::stream;

    fn event(kind: &str, path: &str, data: serde_json::Value) -> Result<Event, ClientError> {
        Ok(Event {
            kind: kind.to_string(),
            path: Some(path.to_string()),
            node: None,
            data,
        })
    }

    fn ids(names: &[&str]) -> Vec<Identifier> {
        names
            .iter()
            .map(|n| Identifier::parse_path(n).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn waits_for_every_target() {
        let mut events: EventStream = stream::iter(vec![
            event("progress", "a", serde_json::Value::Null),
            event("success", "a", serde_json::Value::Null),
            event("error", "b", serde_json::json!({"message": "no placement"})),
            event("success", "zzz", serde_json::Value::Null),
            event("ignored", "c", serde_json::Value::Null),
        ])
        .chain(stream::pending())
        .boxed();

        let failures =
            wait_terminal(&mut events, &ids(&["a", "b", "c"]), Duration::from_secs(5)).await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].to_string(), "b: no placement");
    }

    #[tokio::test]
    async fn timeout_reports_pending_targets() {
        let first = event("success", "a", serde_json::Value::Null);
        let mut events: EventStream = stream::iter(vec![first]).chain(stream::pending()).boxed();

        let failures =
            wait_terminal(&mut events, &ids(&["a", "b"]), Duration::from_millis(20)).await;
        assert_eq!(failures.len(), 1);
        assert!(failures[0].to_string().starts_with("b: timed out"));
    }

    #[tokio::test]
    async fn stream_end_reports_pending_targets() {
        let mut events: EventStream = stream::iter(Vec::new()).boxed();
        let failures = wait_terminal(&mut events, &ids(&["a"]), Duration::from_secs(5)).await;
        assert_eq!(failures[0].to_string(), "a: event stream ended");
    }
}
