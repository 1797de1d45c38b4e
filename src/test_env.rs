// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};

use crate::client::{
    Ack, ActionResponse, ClientError, ControlPlane, Event, EventFilter, EventStream,
    NodeActionRequest, ObjectActionRequest, OrchestrationRequest, Problem, StatusSnapshot,
};
use crate::config::{Config, NodeTable};
use crate::dispatch::{ClientContext, Dispatcher};
use crate::path::Identifier;
use crate::render::{OutputFormat, Renderer};
use crate::store::ObjectStore;
use crate::LogStream;

/// Given a relative `path` in the test directory, prepend the
/// full path to the test directory.
fn test_path(path: &str) -> String {
    std::env::var("CARGO_MANIFEST_DIR").unwrap() + "/tests/" + path
}

trait IgnoreEexist {
    fn ignore_eexist(self) -> Self;
}

impl IgnoreEexist for io::Result<()> {
    fn ignore_eexist(self) -> Self {
        match self {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
            Err(e) => Err(e),
        }
    }
}

/// A TestEnvironment holds all the information needed to access a test's runtime state. This
/// includes a "private" working directory holding the installed objects and the local state of
/// the running test.
///
/// All access to the test's state on the filesystem should be done via methods on TestEnvironment
/// rather than coded in the tests themselves.
pub struct TestEnvironment {
    /// The path to this test's private working directory.
    private_dir_path: String,

    /// The rendered output of dispatchers built by this environment.
    pub output: Arc<LogStream>,
}

impl TestEnvironment {
    /// Set up an environment for a test named `test_id`.
    ///
    /// Creates a specific unique subdirectory for the test, with an empty object root and state
    /// directory.
    pub fn new(test_id: String) -> Self {
        // Each test gets a "private" directory named after its test_id.
        let private_dir_path = test_path(&format!("test_output/{test_id}"));
        // Start by emptying out the test's private directory, so that files from a previous test
        // run don't impact this run:
        match std::fs::remove_dir_all(&private_dir_path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => panic!("Could not clean up test directory: {e}"),
        };

        std::fs::create_dir(test_path("test_output"))
            .ignore_eexist()
            .unwrap();

        std::fs::create_dir(&private_dir_path).unwrap();
        std::fs::create_dir(format!("{private_dir_path}/objects")).unwrap();
        std::fs::create_dir(format!("{private_dir_path}/var")).unwrap();

        Self {
            private_dir_path,
            output: Arc::new(LogStream::new_buffer()),
        }
    }

    pub fn root(&self) -> String {
        format!("{}/objects", self.private_dir_path)
    }

    pub fn var(&self) -> String {
        format!("{}/var", self.private_dir_path)
    }

    /// Install the object `path` with the given toml configuration.
    pub fn install(&self, path: &str, contents: &str) {
        let id = Identifier::parse_path(path).unwrap();
        let file = self.store().config_path(&id);
        std::fs::create_dir_all(file.parent().unwrap()).unwrap();
        std::fs::write(&file, contents)
            .unwrap_or_else(|e| panic!("failed to write '{}': {e}", file.display()));
    }

    pub fn store(&self) -> ObjectStore {
        ObjectStore::new(self.root(), self.var())
    }

    /// A client config pointing at this environment, with the given cluster nodes.
    pub fn config(&self, nodes: &[&str]) -> Config {
        let mut config = Config {
            root: Some(self.root()),
            var: Some(self.var()),
            ..Default::default()
        };
        config.cluster.nodes = nodes.iter().map(|n| n.to_string()).collect();
        config
    }

    /// Write `contents` to a config file in the private directory and return its path.
    pub fn write_config(&self, contents: &str) -> String {
        let path = format!("{}/corral.toml", self.private_dir_path);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// A dispatcher over this environment's objects, talking to `client`, rendering human output
    /// to `self.output`.
    pub fn dispatcher(&self, client: Arc<FakeControlPlane>, remote: bool) -> Dispatcher {
        let context = ClientContext {
            remote,
            name: None,
        };
        let nodes = NodeTable::new(
            vec!["n1".to_string(), "n2".to_string()],
            HashMap::new(),
        );
        Dispatcher::new(
            client,
            context,
            Arc::new(self.store()),
            Arc::new(nodes),
            "n1",
            Arc::new(Renderer::new(OutputFormat::Human, Arc::clone(&self.output))),
        )
    }
}

/// One request the fake control plane received.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    SelectObjects(String),
    SelectNodes(String),
    ObjectAction {
        path: String,
        action: String,
        node_selector: String,
    },
    NodeAction {
        node: String,
        action: String,
    },
    Orchestration {
        path: String,
        target: String,
        destination: Vec<String>,
    },
    Status(String),
    Events(EventFilter),
}

#[derive(Default)]
struct FakeState {
    unreachable: bool,
    failing_status: bool,
    objects: HashMap<String, Vec<String>>,
    nodes: HashMap<String, Vec<String>>,
    events: Vec<Event>,
    refuse: Vec<String>,
    calls: Vec<Call>,
}

/// A control plane that records every request and serves canned answers.
///
/// Selector queries without a canned answer fail, as do all requests while unreachable. Action
/// requests succeed with a response naming the node; the events stream replays the canned events
/// and then ends.
#[derive(Default)]
pub struct FakeControlPlane {
    state: Mutex<FakeState>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.state().unreachable = unreachable;
    }

    pub fn answer_objects(&self, selector: &str, ids: &[&str]) {
        self.state()
            .objects
            .insert(selector.to_string(), ids.iter().map(|s| s.to_string()).collect());
    }

    pub fn answer_nodes(&self, selector: &str, nodes: &[&str]) {
        self.state()
            .nodes
            .insert(selector.to_string(), nodes.iter().map(|s| s.to_string()).collect());
    }

    pub fn push_event(&self, kind: &str, path: &str) {
        self.state().events.push(Event {
            kind: kind.to_string(),
            path: Some(path.to_string()),
            node: None,
            data: serde_json::Value::Null,
        });
    }

    /// Answer status requests with a server fault.
    pub fn fail_status(&self) {
        self.state().failing_status = true;
    }

    /// Refuse orchestration requests for `path`.
    pub fn refuse(&self, path: &str) {
        self.state().refuse.push(path.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn selection_queries(&self) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| matches!(c, Call::SelectObjects(_) | Call::SelectNodes(_)))
            .count()
    }

    fn record(&self, call: Call) -> Result<(), ClientError> {
        let mut state = self.state();
        state.calls.push(call);
        if state.unreachable {
            return Err(ClientError::Unreachable("connection refused".to_string()));
        }
        Ok(())
    }

    fn answer(&self, call: Call, nodes: bool, selector: &str) -> Result<Vec<String>, ClientError> {
        self.record(call)?;
        let state = self.state();
        let answers = if nodes { &state.nodes } else { &state.objects };
        answers
            .get(selector)
            .cloned()
            .ok_or_else(|| ClientError::Unreachable(format!("no answer for \"{selector}\"")))
    }
}

impl ControlPlane for FakeControlPlane {
    fn select_objects<'a>(
        &'a self,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ClientError>> {
        let answer = self.answer(Call::SelectObjects(selector.to_string()), false, selector);
        async move { answer }.boxed()
    }

    fn select_nodes<'a>(
        &'a self,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ClientError>> {
        let answer = self.answer(Call::SelectNodes(selector.to_string()), true, selector);
        async move { answer }.boxed()
    }

    fn post_object_action(
        &self,
        request: ObjectActionRequest,
    ) -> BoxFuture<'_, Result<ActionResponse, ClientError>> {
        let recorded = self.record(Call::ObjectAction {
            path: request.path.to_string(),
            action: request.action.clone(),
            node_selector: request.node_selector.clone(),
        });
        async move {
            recorded?;
            Ok(ActionResponse {
                node: "n2".to_string(),
                status: 0,
                data: request.params,
                log: vec![format!("{} {}", request.action, request.path)],
            })
        }
        .boxed()
    }

    fn post_node_action(
        &self,
        request: NodeActionRequest,
    ) -> BoxFuture<'_, Result<ActionResponse, ClientError>> {
        let recorded = self.record(Call::NodeAction {
            node: request.node.to_string(),
            action: request.action.clone(),
        });
        async move {
            recorded?;
            if request.action == "hang" {
                futures::future::pending::<()>().await;
            }
            Ok(ActionResponse {
                node: request.node.to_string(),
                status: 0,
                data: request.params,
                log: Vec::new(),
            })
        }
        .boxed()
    }

    fn post_orchestration(
        &self,
        request: OrchestrationRequest,
    ) -> BoxFuture<'_, Result<Ack, ClientError>> {
        let path = request.path.to_string();
        let recorded = self.record(Call::Orchestration {
            path: path.clone(),
            target: request.global_expect.clone(),
            destination: request.options.destination.clone(),
        });
        let refused = self.state().refuse.contains(&path);
        async move {
            recorded?;
            Ok(Ack {
                accepted: !refused,
                info: if refused { "busy".to_string() } else { String::new() },
            })
        }
        .boxed()
    }

    fn status<'a>(
        &'a self,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<StatusSnapshot, ClientError>> {
        let recorded = self.record(Call::Status(selector.to_string()));
        let failing = self.state().failing_status;
        let mut snapshot = StatusSnapshot::default();
        if let Some(ids) = self.state().objects.get(selector) {
            for id in ids.iter() {
                snapshot
                    .objects
                    .insert(id.clone(), serde_json::Value::String("up".to_string()));
            }
        }
        async move {
            recorded?;
            if failing {
                return Err(ClientError::ServerFault(Problem {
                    title: "Internal Server Error".to_string(),
                    detail: "status unavailable".to_string(),
                    status: 500,
                }));
            }
            Ok(snapshot)
        }
        .boxed()
    }

    fn events(&self, filter: EventFilter) -> BoxFuture<'_, Result<EventStream, ClientError>> {
        let recorded = self.record(Call::Events(filter));
        let events: Vec<Result<Event, ClientError>> =
            self.state().events.iter().cloned().map(Ok).collect();
        async move {
            recorded?;
            Ok(stream::iter(events).boxed())
        }
        .boxed()
    }
}
