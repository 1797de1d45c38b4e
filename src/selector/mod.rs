// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod expr;
pub mod glob;
pub mod keyop;

use std::collections::HashSet;
use std::sync::Arc;

use crate::client::{ClientError, ControlPlane};
use crate::config::Key;
use crate::path::Identifier;

pub use expr::Expression;

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    #[error("invalid selector clause \"{clause}\": {reason}")]
    Parse { clause: String, reason: String },

    #[error("could not resolve selector through the control plane: {0}")]
    Daemon(#[source] ClientError),

    #[error("control plane returned an invalid identifier \"{value}\": {reason}")]
    Decode { value: String, reason: String },

    #[error("could not resolve selector locally: {0}")]
    Local(String),

    #[error("could not read \"{path}\": {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl SelectError {
    pub fn parse(clause: &str, reason: impl Into<String>) -> Self {
        SelectError::Parse {
            clause: clause.to_string(),
            reason: reason.into(),
        }
    }

    pub fn resolution(reason: impl Into<String>) -> Self {
        SelectError::Local(reason.into())
    }

    /// Whether resolution failed, as opposed to the expression being malformed.
    pub fn is_resolution(&self) -> bool {
        !matches!(self, SelectError::Parse { .. })
    }
}

/// What a selector names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subject {
    Objects,
    Nodes,
}

/// The locally known identifiers, used when the daemon cannot resolve a selector.
pub trait Universe: Send + Sync {
    /// Every locally known identifier, in a stable order.
    fn list(&self) -> Result<Vec<Identifier>, SelectError>;

    fn exists(&self, id: &Identifier) -> Result<bool, SelectError>;

    /// The configuration value stored under `key` for `id`.
    fn value(&self, id: &Identifier, key: &Key) -> Result<Option<String>, SelectError>;
}

/// A selector expression together with how to resolve it.
///
/// Resolution first asks the control plane, which knows about objects with no local instance.
/// If that fails and `strict_remote` is unset, the expression is evaluated against the local
/// universe instead. The resolved list is memoized: later calls to `expand()` return it as is.
pub struct Selection {
    expression: String,
    subject: Subject,
    universe: Arc<dyn Universe>,
    client: Option<Arc<dyn ControlPlane>>,
    local: bool,
    strict_remote: bool,
    pinned: bool,
    installed: Option<Vec<Identifier>>,
    expanded: Option<Vec<Identifier>>,
}

impl Selection {
    pub fn objects(expression: &str, universe: Arc<dyn Universe>) -> Self {
        Self::new(expression, Subject::Objects, universe)
    }

    pub fn nodes(expression: &str, universe: Arc<dyn Universe>) -> Self {
        Self::new(expression, Subject::Nodes, universe)
    }

    fn new(expression: &str, subject: Subject, universe: Arc<dyn Universe>) -> Self {
        Self {
            expression: expression.to_string(),
            subject,
            universe,
            client: None,
            local: false,
            strict_remote: false,
            pinned: false,
            installed: None,
            expanded: None,
        }
    }

    pub fn with_client(mut self, client: Arc<dyn ControlPlane>) -> Self {
        self.client = Some(client);
        self
    }

    /// Skip the control plane and only evaluate locally.
    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    /// Fail instead of falling back to local evaluation when the control plane is unreachable.
    pub fn with_strict_remote(mut self, strict: bool) -> Self {
        self.strict_remote = strict;
        self
    }

    /// Use `installed` as the universe instead of listing it.
    pub fn with_installed(mut self, installed: Vec<Identifier>) -> Self {
        self.installed = Some(installed);
        self.pinned = true;
        self
    }

    pub fn expression(&self) -> &str {
        &self.expression
    }

    pub fn subject(&self) -> Subject {
        self.subject
    }

    pub async fn expand(&mut self) -> Result<&[Identifier], SelectError> {
        if self.expanded.is_none() {
            let expanded = self.resolve().await?;
            tracing::debug!(
                selector = %self.expression,
                count = expanded.len(),
                "selector expanded"
            );
            self.expanded = Some(expanded);
        }
        Ok(self.expanded.as_deref().unwrap_or_default())
    }

    pub async fn expand_set(&mut self) -> Result<HashSet<Identifier>, SelectError> {
        Ok(self.expand().await?.iter().cloned().collect())
    }

    async fn resolve(&mut self) -> Result<Vec<Identifier>, SelectError> {
        if self.local {
            return self.expand_local();
        }
        let Some(client) = self.client.clone() else {
            return self.expand_local();
        };
        let answer = self.expand_daemon(client.as_ref()).await;
        match answer {
            Ok(ids) => Ok(ids),
            Err(e) if self.strict_remote => Err(e),
            Err(e) => {
                tracing::warn!(
                    selector = %self.expression,
                    "daemon selection failed, falling back to local: {e}"
                );
                self.expand_local()
            }
        }
    }

    async fn expand_daemon(
        &self,
        client: &dyn ControlPlane,
    ) -> Result<Vec<Identifier>, SelectError> {
        let values = match self.subject {
            Subject::Objects => client.select_objects(&self.expression).await,
            Subject::Nodes => client.select_nodes(&self.expression).await,
        }
        .map_err(SelectError::Daemon)?;

        values
            .into_iter()
            .map(|value| {
                let id = match self.subject {
                    Subject::Objects => Identifier::parse_path(&value),
                    Subject::Nodes => Identifier::node(&value),
                };
                id.map_err(|e| SelectError::Decode {
                    value,
                    reason: e.to_string(),
                })
            })
            .collect()
    }

    fn expand_local(&mut self) -> Result<Vec<Identifier>, SelectError> {
        let expression = Expression::parse(&self.expression, self.subject)?;
        if self.installed.is_none() {
            self.installed = Some(self.universe.list()?);
        }
        let installed = self.installed.as_deref().unwrap_or_default();
        expression.evaluate(installed, self.universe.as_ref(), self.pinned)
    }
}
