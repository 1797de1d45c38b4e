// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::path::Path;
use std::time::Duration;

use crate::client::sse::Decoder;
use crate::client::{
    Ack, ActionResponse, ClientError, ControlPlane, EventFilter, EventStream, NodeActionRequest,
    ObjectActionRequest, OrchestrationRequest, Problem, StatusSnapshot,
};
use crate::config::Config;
use crate::path::Identifier;

/// Control plane reached over HTTP/JSON.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: Client,
    base: String,
    token: Option<String>,
}

impl HttpControlPlane {
    pub fn new(client: Client, base: &str, token: Option<String>) -> Self {
        Self {
            client,
            base: base.trim_end_matches('/').to_string(),
            token,
        }
    }

    /// Build a client for the endpoint `config` points at, or `server` when given.
    ///
    /// An https endpoint trusts the configured CA when its file exists. The client certificate is
    /// only presented when the ambient context asks for mutual TLS.
    pub fn from_config(config: &Config, server: Option<&str>) -> Result<Self, ClientError> {
        let base = config.server_url(server);
        let mut builder = Client::builder().connect_timeout(Duration::from_secs(10));

        if base.starts_with("https://") {
            if Path::new(&config.ca_cert()).exists() {
                for cert in crate::tls::root_certificates(config)? {
                    builder = builder.add_root_certificate(cert);
                }
            }
            if config.context.as_ref().is_some_and(|c| c.mtls) {
                builder = builder.identity(crate::tls::client_identity(config)?);
            }
        }

        let client = builder
            .build()
            .map_err(|e| ClientError::Setup(format!("could not build http client: {e}")))?;
        let token = config.context.as_ref().and_then(|c| c.token.clone());
        tracing::debug!(server = %base, "using control plane");
        Ok(Self::new(client, &base, token))
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn object_url(&self, path: &Identifier, rest: &str) -> String {
        format!(
            "{}/api/object/path/{}/{}/{}/{rest}",
            self.base,
            path.namespace(),
            path.kind(),
            path.name()
        )
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, ClientError> {
        let response = self.authorized(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        let problem = match serde_json::from_str::<Problem>(&body) {
            Ok(mut problem) if !(problem.title.is_empty() && problem.detail.is_empty()) => {
                problem.status = status.as_u16();
                problem
            }
            _ => Problem {
                title: status.canonical_reason().unwrap_or_default().to_string(),
                detail: body.trim().to_string(),
                status: status.as_u16(),
            },
        };
        Err(ClientError::from_status(status.as_u16(), problem))
    }

    async fn json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, ClientError> {
        let response = self.send(request).await?;
        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| ClientError::Decode(e.to_string()))
    }

    async fn select(&self, subject: &str, selector: &str) -> Result<Vec<String>, ClientError> {
        let url = format!("{}/api/{subject}/selector", self.base);
        tracing::debug!(%url, selector, "remote selection");
        self.json(self.client.get(url).query(&[("selector", selector)]))
            .await
    }
}

impl ControlPlane for HttpControlPlane {
    fn select_objects<'a>(
        &'a self,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ClientError>> {
        self.select("object", selector).boxed()
    }

    fn select_nodes<'a>(
        &'a self,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<Vec<String>, ClientError>> {
        self.select("node", selector).boxed()
    }

    fn post_object_action(
        &self,
        request: ObjectActionRequest,
    ) -> BoxFuture<'_, Result<ActionResponse, ClientError>> {
        async move {
            let url = self.object_url(&request.path, &format!("action/{}", request.action));
            let mut builder = self.client.post(url).json(&request.params);
            if !request.node_selector.is_empty() {
                builder = builder.query(&[("node", request.node_selector.as_str())]);
            }
            self.json(builder).await
        }
        .boxed()
    }

    fn post_node_action(
        &self,
        request: NodeActionRequest,
    ) -> BoxFuture<'_, Result<ActionResponse, ClientError>> {
        async move {
            let url = format!(
                "{}/api/node/name/{}/action/{}",
                self.base,
                request.node.name(),
                request.action
            );
            let mut response: ActionResponse =
                self.json(self.client.post(url).json(&request.params)).await?;
            if response.node.is_empty() {
                response.node = request.node.name().to_string();
            }
            Ok(response)
        }
        .boxed()
    }

    fn post_orchestration(
        &self,
        request: OrchestrationRequest,
    ) -> BoxFuture<'_, Result<Ack, ClientError>> {
        async move {
            let url = self.object_url(&request.path, "target");
            self.json(self.client.post(url).json(&request)).await
        }
        .boxed()
    }

    fn status<'a>(
        &'a self,
        selector: &'a str,
    ) -> BoxFuture<'a, Result<StatusSnapshot, ClientError>> {
        async move {
            let url = format!("{}/api/cluster/status", self.base);
            self.json(self.client.get(url).query(&[("selector", selector)]))
                .await
        }
        .boxed()
    }

    fn events(&self, filter: EventFilter) -> BoxFuture<'_, Result<EventStream, ClientError>> {
        async move {
            let url = format!("{}/api/event", self.base);
            let mut builder = self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .query(&[("selector", filter.selector.as_str())]);
            for kind in filter.kinds.iter() {
                builder = builder.query(&[("kind", kind.as_str())]);
            }
            let response = self.send(builder).await?;

            let mut decoder = Decoder::new();
            let events = response.bytes_stream().flat_map(move |chunk| {
                let events = match chunk {
                    Ok(bytes) => decoder.push(&bytes),
                    Err(e) => vec![Err(ClientError::Transport(e))],
                };
                stream::iter(events)
            });
            Ok(events.boxed())
        }
        .boxed()
    }
}
