// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Route an action to the right execution mode and run it on every selected target.

pub mod aggregate;
pub mod fanout;
pub mod watch;

pub use aggregate::{aggregate, Failure, MultiError};
pub use fanout::{action_fn, ActionFn, PanicInfo, Payload, TargetError, TargetResult};
pub use watch::WatchHandle;

use std::sync::Arc;
use std::time::Duration;

use crate::actions::{ActionError, ResourceFilter};
use crate::client::{
    ClientError, Connector, ControlPlane, EventFilter, EventStream, NodeActionRequest,
    ObjectActionRequest, OrchestrationRequest, TargetOptions,
};
use crate::config::Config;
use crate::path::Identifier;
use crate::render::{HumanRender, OutputFormat, Render};
use crate::selector::{SelectError, Selection, Universe};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Select(#[from] SelectError),

    #[error("{0} has no local implementation")]
    LocalUnsupported(String),

    #[error("could not open the event stream: {0}")]
    Events(#[source] ClientError),

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error("could not connect to {server}: {source}")]
    Connect {
        server: String,
        #[source]
        source: ClientError,
    },
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum OptionsError {
    #[error("an object selector or a node selector is required")]
    NoSelector,

    #[error("waiting requires an orchestration target")]
    WaitWithoutTarget,

    #[error("a destination requires an orchestration target")]
    DestinationWithoutTarget,

    #[error("watching requires an object selector")]
    WatchWithoutObjects,
}

/// How an action is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Run on this node, against the installed objects.
    Local,
    /// Post the action to the peer agents through the control plane.
    Remote,
    /// Submit an orchestration target and let the control plane reconcile it.
    Async,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Local => "local",
            Mode::Remote => "remote",
            Mode::Async => "async",
        };
        write!(f, "{s}")
    }
}

/// Whether the CLI is bound to a remote control plane.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientContext {
    pub remote: bool,
    pub name: Option<String>,
}

impl ClientContext {
    /// A context section in the config makes the client remote.
    pub fn from_config(config: &Config) -> Self {
        match &config.context {
            Some(context) => Self {
                remote: true,
                name: context.name.clone(),
            },
            None => Self::default(),
        }
    }
}

/// What to run and where. Built and validated by `DispatchOptions::builder`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchOptions {
    object_selector: String,
    node_selector: String,
    local: bool,
    default_local: bool,
    resources: ResourceFilter,
    target: Option<String>,
    target_options: TargetOptions,
    watch: bool,
    wait: Option<Duration>,
    output: Option<OutputFormat>,
    server: Option<String>,
}

impl DispatchOptions {
    pub fn builder(object_selector: &str) -> DispatchOptionsBuilder {
        DispatchOptionsBuilder {
            options: DispatchOptions {
                object_selector: object_selector.trim().to_string(),
                ..Default::default()
            },
        }
    }

    pub fn object_selector(&self) -> &str {
        &self.object_selector
    }

    pub fn node_selector(&self) -> &str {
        &self.node_selector
    }

    pub fn resources(&self) -> &ResourceFilter {
        &self.resources
    }

    pub fn target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    pub fn target_options(&self) -> &TargetOptions {
        &self.target_options
    }

    pub fn watch(&self) -> bool {
        self.watch
    }

    pub fn wait(&self) -> Option<Duration> {
        self.wait
    }

    /// Output format of this dispatch. Unset means the dispatcher's own renderer.
    pub fn output(&self) -> Option<OutputFormat> {
        self.output
    }

    pub fn server(&self) -> Option<&str> {
        self.server.as_deref()
    }

    fn scoped_to_resources(&self) -> bool {
        let r = &self.resources;
        !(r.rids.is_empty() && r.subsets.is_empty() && r.tags.is_empty())
    }
}

pub struct DispatchOptionsBuilder {
    options: DispatchOptions,
}

impl DispatchOptionsBuilder {
    pub fn node_selector(mut self, selector: &str) -> Self {
        self.options.node_selector = selector.trim().to_string();
        self
    }

    pub fn local(mut self, local: bool) -> Self {
        self.options.local = local;
        self
    }

    /// The action runs locally unless something asks otherwise.
    pub fn default_local(mut self, default_local: bool) -> Self {
        self.options.default_local = default_local;
        self
    }

    pub fn rids(mut self, rids: Vec<String>) -> Self {
        self.options.resources.rids = rids;
        self
    }

    pub fn subsets(mut self, subsets: Vec<String>) -> Self {
        self.options.resources.subsets = subsets;
        self
    }

    pub fn tags(mut self, tags: Vec<String>) -> Self {
        self.options.resources.tags = tags;
        self
    }

    pub fn target(mut self, target: Option<String>) -> Self {
        self.options.target = target;
        self
    }

    pub fn destination(mut self, nodes: Vec<String>) -> Self {
        self.options.target_options.destination = nodes;
        self
    }

    pub fn watch(mut self, watch: bool) -> Self {
        self.options.watch = watch;
        self
    }

    pub fn wait(mut self, wait: Option<Duration>) -> Self {
        self.options.wait = wait;
        self
    }

    pub fn output(mut self, output: Option<OutputFormat>) -> Self {
        self.options.output = output;
        self
    }

    /// Talk to this control plane instead of the dispatcher's own.
    pub fn server(mut self, server: Option<String>) -> Self {
        self.options.server = server;
        self
    }

    pub fn build(self) -> Result<DispatchOptions, OptionsError> {
        let options = self.options;
        if options.object_selector.is_empty() && options.node_selector.is_empty() {
            return Err(OptionsError::NoSelector);
        }
        if options.wait.is_some() && options.target.is_none() {
            return Err(OptionsError::WaitWithoutTarget);
        }
        if !options.target_options.destination.is_empty() && options.target.is_none() {
            return Err(OptionsError::DestinationWithoutTarget);
        }
        if options.watch && options.object_selector.is_empty() {
            return Err(OptionsError::WatchWithoutObjects);
        }
        Ok(options)
    }
}

impl Mode {
    /// Pick the mode of a dispatch. The first matching rule wins.
    pub fn decide(options: &DispatchOptions, context: &ClientContext) -> Mode {
        if !options.node_selector.is_empty() {
            Mode::Remote
        } else if options.local || options.default_local || options.scoped_to_resources() {
            Mode::Local
        } else if options.target.is_some() {
            Mode::Async
        } else if !context.remote {
            Mode::Local
        } else {
            Mode::Remote
        }
    }
}

/// An action as the caller describes it.
#[derive(Clone)]
pub struct Action {
    name: String,
    local: Option<ActionFn>,
    params: serde_json::Value,
    renderer: Option<HumanRender>,
    timeout: Option<Duration>,
}

impl Action {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            local: None,
            params: serde_json::Value::Null,
            renderer: None,
            timeout: None,
        }
    }

    /// The body run per target in local mode.
    pub fn with_local(mut self, local: ActionFn) -> Self {
        self.local = Some(local);
        self
    }

    /// Parameters posted with the action in remote mode.
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_renderer(mut self, renderer: HumanRender) -> Self {
        self.renderer = Some(renderer);
        self
    }

    /// Deadline of each remote request.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// The results of a dispatch. A watch started by the dispatch keeps running until `finish`.
pub struct Outcome {
    pub mode: Mode,
    pub results: Vec<TargetResult>,
    pub error: Option<MultiError>,
    watch: Option<WatchHandle>,
    renderer: Arc<dyn Render>,
}

impl Outcome {
    pub fn watch(&self) -> Option<&WatchHandle> {
        self.watch.as_ref()
    }

    /// Aggregate results fanned out without a dispatch.
    pub fn from_results(mode: Mode, results: Vec<TargetResult>, renderer: Arc<dyn Render>) -> Self {
        let (results, error) = aggregate(results);
        Self {
            mode,
            results,
            error,
            watch: None,
            renderer,
        }
    }

    /// Render the results in the output format of the dispatch.
    pub fn render(&self) {
        self.renderer.results(&self.results);
    }

    /// Wait for the watch, if any, and return every failure of the dispatch.
    pub async fn finish(self) -> Result<(), MultiError> {
        let mut errors = self.error.unwrap_or_default();
        if let Some(watch) = self.watch {
            errors.extend(watch.join().await);
        }
        match errors.into_option() {
            Some(errors) => Err(errors),
            None => Ok(()),
        }
    }
}

/// Runs actions against the objects and nodes of the cluster.
pub struct Dispatcher {
    client: Arc<dyn ControlPlane>,
    context: ClientContext,
    objects: Arc<dyn Universe>,
    nodes: Arc<dyn Universe>,
    nodename: String,
    renderer: Arc<dyn Render>,
    connector: Option<Connector>,
}

/// The control plane one dispatch talks to, and whether it is remote.
struct Route {
    client: Arc<dyn ControlPlane>,
    context: ClientContext,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn ControlPlane>,
        context: ClientContext,
        objects: Arc<dyn Universe>,
        nodes: Arc<dyn Universe>,
        nodename: &str,
        renderer: Arc<dyn Render>,
    ) -> Self {
        Self {
            client,
            context,
            objects,
            nodes,
            nodename: nodename.to_string(),
            renderer,
            connector: None,
        }
    }

    /// Used to reach the control plane named by `DispatchOptions::server`.
    pub fn with_connector(mut self, connector: Connector) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn client(&self) -> Arc<dyn ControlPlane> {
        Arc::clone(&self.client)
    }

    /// Objects selected by `expression`, resolved through the control plane unless `local`.
    pub async fn select_objects(
        &self,
        expression: &str,
        local: bool,
    ) -> Result<Vec<Identifier>, SelectError> {
        self.objects_via(&self.default_route(), expression, local).await
    }

    /// Objects selected by the options, through the control plane they name unless `local`.
    pub async fn select(
        &self,
        options: &DispatchOptions,
        local: bool,
    ) -> Result<Vec<Identifier>, DispatchError> {
        let route = self.route(options)?;
        Ok(self.objects_via(&route, &options.object_selector, local).await?)
    }

    async fn objects_via(
        &self,
        route: &Route,
        expression: &str,
        local: bool,
    ) -> Result<Vec<Identifier>, SelectError> {
        let mut selection = Selection::objects(expression, Arc::clone(&self.objects))
            .with_local(local)
            .with_client(Arc::clone(&route.client))
            .with_strict_remote(route.context.remote);
        Ok(selection.expand().await?.to_vec())
    }

    async fn nodes_via(
        &self,
        route: &Route,
        expression: &str,
    ) -> Result<Vec<Identifier>, SelectError> {
        let mut selection = Selection::nodes(expression, Arc::clone(&self.nodes))
            .with_client(Arc::clone(&route.client))
            .with_strict_remote(route.context.remote);
        Ok(selection.expand().await?.to_vec())
    }

    fn default_route(&self) -> Route {
        Route {
            client: Arc::clone(&self.client),
            context: self.context.clone(),
        }
    }

    /// An explicit server is always a remote context.
    fn route(&self, options: &DispatchOptions) -> Result<Route, DispatchError> {
        let Some(server) = options.server.as_deref() else {
            return Ok(self.default_route());
        };
        let connect_error = |source| DispatchError::Connect {
            server: server.to_string(),
            source,
        };
        let connector = self.connector.as_ref().ok_or_else(|| {
            connect_error(ClientError::Setup("no connector configured".to_string()))
        })?;
        let client = connector(server).map_err(connect_error)?;
        Ok(Route {
            client,
            context: ClientContext {
                remote: true,
                name: Some(server.to_string()),
            },
        })
    }

    pub async fn dispatch(
        &self,
        options: &DispatchOptions,
        action: &Action,
    ) -> Result<Outcome, DispatchError> {
        let route = self.route(options)?;
        let mode = Mode::decide(options, &route.context);
        tracing::info!(action = action.name(), %mode, "dispatching");

        if mode == Mode::Local && action.local.is_none() {
            return Err(DispatchError::LocalUnsupported(action.name.clone()));
        }

        let renderer = match options.output {
            Some(format) => self.renderer.with_format(format),
            None => Arc::clone(&self.renderer),
        };

        let watch_events = if options.watch {
            Some(open_events(&route, options.object_selector(), Vec::new()).await?)
        } else {
            None
        };

        let (results, errors) = match mode {
            Mode::Local => {
                let targets = self.objects_via(&route, &options.object_selector, true).await?;
                let body = action
                    .local
                    .clone()
                    .ok_or_else(|| DispatchError::LocalUnsupported(action.name.clone()))?;
                self.fan_out(&targets, body, action).await
            }
            Mode::Remote if !options.object_selector.is_empty() => {
                let targets = self.objects_via(&route, &options.object_selector, false).await?;
                let body = post_object_action(&route, options, action);
                self.fan_out(&targets, body, action).await
            }
            Mode::Remote => {
                let targets = self.nodes_via(&route, &options.node_selector).await?;
                let body = post_node_action(&route, action);
                self.fan_out(&targets, body, action).await
            }
            Mode::Async => self.orchestrate(&route, options, action).await?,
        };

        let watch = watch_events.map(|events| {
            watch::spawn(
                Arc::clone(&route.client),
                options.object_selector.clone(),
                events,
                Arc::clone(&renderer),
            )
        });

        if let Some(errors) = errors.as_ref() {
            tracing::info!(failed = errors.len(), total = results.len(), "dispatch done");
        } else {
            tracing::info!(total = results.len(), "dispatch done");
        }

        Ok(Outcome {
            mode,
            results,
            error: errors,
            watch,
            renderer,
        })
    }

    async fn fan_out(
        &self,
        targets: &[Identifier],
        body: ActionFn,
        action: &Action,
    ) -> (Vec<TargetResult>, Option<MultiError>) {
        tracing::debug!(targets = targets.len(), "fanning out");
        let results = fanout::run(targets, body, action.renderer.clone(), &self.nodename).await;
        aggregate(results)
    }

    async fn orchestrate(
        &self,
        route: &Route,
        options: &DispatchOptions,
        action: &Action,
    ) -> Result<(Vec<TargetResult>, Option<MultiError>), DispatchError> {
        let targets = self.objects_via(route, &options.object_selector, false).await?;

        let mut wait_events = match options.wait {
            Some(_) => Some(
                open_events(
                    route,
                    &options.object_selector,
                    watch::TERMINAL_EVENTS.iter().map(|k| k.to_string()).collect(),
                )
                .await?,
            ),
            None => None,
        };

        let target = options.target.clone().unwrap_or_default();
        let body = post_orchestration(route, target, options.target_options.clone());
        let (results, errors) = self.fan_out(&targets, body, action).await;

        let (Some(events), Some(timeout)) = (wait_events.as_mut(), options.wait) else {
            return Ok((results, errors));
        };
        let accepted: Vec<Identifier> = results
            .iter()
            .filter(|r| r.is_ok())
            .map(|r| r.target.clone())
            .collect();
        let mut errors = errors.unwrap_or_default();
        errors.extend(watch::wait_terminal(events, &accepted, timeout).await);
        Ok((results, errors.into_option()))
    }
}

async fn open_events(
    route: &Route,
    selector: &str,
    kinds: Vec<String>,
) -> Result<EventStream, DispatchError> {
    let filter = EventFilter {
        selector: selector.to_string(),
        kinds,
    };
    route
        .client
        .events(filter)
        .await
        .map_err(DispatchError::Events)
}

fn post_object_action(route: &Route, options: &DispatchOptions, action: &Action) -> ActionFn {
    let client = Arc::clone(&route.client);
    let name = action.name.clone();
    let params = action.params.clone();
    let node_selector = options.node_selector.clone();
    let timeout = action.timeout;

    action_fn(move |path: Identifier| {
        let client = Arc::clone(&client);
        let request = ObjectActionRequest {
            path,
            action: name.clone(),
            node_selector: node_selector.clone(),
            params: params.clone(),
        };
        async move {
            let response = with_timeout(timeout, client.post_object_action(request)).await?;
            Ok(Payload::Remote(response))
        }
    })
}

fn post_node_action(route: &Route, action: &Action) -> ActionFn {
    let client = Arc::clone(&route.client);
    let name = action.name.clone();
    let params = action.params.clone();
    let timeout = action.timeout;

    action_fn(move |node: Identifier| {
        let client = Arc::clone(&client);
        let request = NodeActionRequest {
            node,
            action: name.clone(),
            params: params.clone(),
        };
        async move {
            let response = with_timeout(timeout, client.post_node_action(request)).await?;
            Ok(Payload::Remote(response))
        }
    })
}

fn post_orchestration(route: &Route, target: String, target_options: TargetOptions) -> ActionFn {
    let client = Arc::clone(&route.client);

    action_fn(move |path: Identifier| {
        let client = Arc::clone(&client);
        let request = OrchestrationRequest {
            path,
            global_expect: target.clone(),
            options: target_options.clone(),
        };
        async move {
            let ack = client.post_orchestration(request).await?;
            if !ack.accepted {
                return Err(ActionError::Failed(format!(
                    "orchestration refused: {}",
                    ack.info
                )));
            }
            Ok(Payload::Accepted(ack))
        }
    })
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    request: impl std::future::Future<Output = Result<T, ClientError>>,
) -> Result<T, ActionError> {
    match timeout {
        Some(timeout) => match tokio::time::timeout(timeout, request).await {
            Ok(response) => Ok(response?),
            Err(_) => Err(ActionError::Timeout(timeout)),
        },
        None => Ok(request.await?),
    }
}
