// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod http;
pub mod sse;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::path::Identifier;

pub use http::HttpControlPlane;

/// Structured problem detail returned by the control plane with an error status.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Problem {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub status: u16,
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.title.is_empty(), self.detail.is_empty()) {
            (false, false) => write!(f, "{}: {}", self.title, self.detail),
            (false, true) => write!(f, "{}", self.title),
            (true, false) => write!(f, "{}", self.detail),
            (true, true) => write!(f, "status {}", self.status),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unauthorized: {0}")]
    Unauthorized(Problem),

    #[error("rejected: {0}")]
    Validation(Problem),

    #[error("server fault: {0}")]
    ServerFault(Problem),

    #[error("could not decode response: {0}")]
    Decode(String),

    #[error("control plane unreachable: {0}")]
    Unreachable(String),

    #[error("could not set up client: {0}")]
    Setup(String),
}

impl ClientError {
    /// Classify an error status and its problem detail.
    pub fn from_status(status: u16, problem: Problem) -> Self {
        match status {
            401 | 403 => ClientError::Unauthorized(problem),
            400..=499 => ClientError::Validation(problem),
            _ => ClientError::ServerFault(problem),
        }
    }
}

/// Run `action` on one object, on the nodes named by `node_selector` (the daemon's choice when
/// empty).
#[derive(Serialize, Debug, Clone)]
pub struct ObjectActionRequest {
    pub path: Identifier,
    pub action: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub node_selector: String,
    pub params: serde_json::Value,
}

#[derive(Serialize, Debug, Clone)]
pub struct NodeActionRequest {
    pub node: Identifier,
    pub action: String,
    pub params: serde_json::Value,
}

/// Answer of a peer agent to an action request.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct ActionResponse {
    /// The node that ran the action.
    #[serde(default)]
    pub node: String,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub log: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct TargetOptions {
    /// Placement destination nodes.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub destination: Vec<String>,
}

/// Ask the control plane to reconcile an object towards a desired global state.
#[derive(Serialize, Debug, Clone)]
pub struct OrchestrationRequest {
    pub path: Identifier,
    pub global_expect: String,
    pub options: TargetOptions,
}

/// Acknowledgement of an orchestration request. Reconciliation happens later.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Ack {
    #[serde(default)]
    pub accepted: bool,
    #[serde(default)]
    pub info: String,
}

/// Point-in-time view of the selected objects, as the daemon reports it.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StatusSnapshot {
    #[serde(default)]
    pub objects: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub nodes: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: String,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventFilter {
    pub selector: String,
    /// Only these event kinds. Empty means all.
    pub kinds: Vec<String>,
}

pub type EventStream = BoxStream<'static, Result<Event, ClientError>>;

/// Builds a client for the control plane at a given server URL.
pub type Connector =
    Arc<dyn Fn(&str) -> Result<Arc<dyn ControlPlane>, ClientError> + Send + Sync>;

/// The control plane, as seen from a client.
pub trait ControlPlane: Send + Sync {
    /// Expand an object selector cluster-wide. Returns canonical identifier strings.
    fn select_objects<'a>(
        &'a self,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ClientError>>;

    /// Expand a node selector cluster-wide.
    fn select_nodes<'a>(
        &'a self,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ClientError>>;

    fn post_object_action(
        &self,
        request: ObjectActionRequest,
    ) -> BoxFuture<'_, Result<ActionResponse, ClientError>>;

    fn post_node_action(
        &self,
        request: NodeActionRequest,
    ) -> BoxFuture<'_, Result<ActionResponse, ClientError>>;

    fn post_orchestration(
        &self,
        request: OrchestrationRequest,
    ) -> BoxFuture<'_, Result<Ack, ClientError>>;

    fn status<'a>(
        &'a self,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<StatusSnapshot, ClientError>>;

    /// Open an event stream. The stream ends when the server closes it.
    fn events(&self, filter: EventFilter) -> BoxFuture<'_, Result<EventStream, ClientError>>;
}
