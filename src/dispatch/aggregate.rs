// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::fmt;
use std::sync::Arc;

use crate::client::ClientError;
use crate::dispatch::fanout::{TargetError, TargetResult};
use crate::path::Identifier;

/// One failure of a dispatch.
#[derive(Debug, Clone)]
pub enum Failure {
    Target(Arc<TargetError>),
    Panic { target: Identifier, message: String },
    Watch(Arc<ClientError>),
    Wait { target: Identifier, reason: String },
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Failure::Target(e) => write!(f, "{e}"),
            Failure::Panic { target, message } => write!(f, "{target}: panicked: {message}"),
            Failure::Watch(e) => write!(f, "watch: {e}"),
            Failure::Wait { target, reason } => write!(f, "{target}: {reason}"),
        }
    }
}

/// Every failure of a dispatch. Displays one failure per line.
#[derive(Debug, Clone, Default)]
pub struct MultiError {
    failures: Vec<Failure>,
}

impl MultiError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, failure: Failure) {
        self.failures.push(failure);
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    pub fn len(&self) -> usize {
        self.failures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// `None` when nothing failed.
    pub fn into_option(self) -> Option<Self> {
        if self.is_empty() {
            None
        } else {
            Some(self)
        }
    }
}

impl Extend<Failure> for MultiError {
    fn extend<T: IntoIterator<Item = Failure>>(&mut self, iter: T) {
        self.failures.extend(iter);
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, failure) in self.failures.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{failure}")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

/// Sort `results` for rendering and join their failures. A result that panicked is reported as a
/// panic even if it also carries an error.
pub fn aggregate(mut results: Vec<TargetResult>) -> (Vec<TargetResult>, Option<MultiError>) {
    results.sort_by(|a, b| a.target.cmp(&b.target).then_with(|| a.node.cmp(&b.node)));

    let mut errors = MultiError::new();
    for result in results.iter() {
        if let Some(panic) = &result.panic {
            errors.push(Failure::Panic {
                target: result.target.clone(),
                message: panic.message.clone(),
            });
        } else if let Some(error) = &result.error {
            errors.push(Failure::Target(Arc::clone(error)));
        }
    }

    (results, errors.into_option())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::ActionError;
    use crate::dispatch::fanout::{PanicInfo, Payload};

    fn result(name: &str, outcome: Result<(), &str>) -> TargetResult {
        let target = Identifier::parse_path(name).unwrap();
        TargetResult {
            target: target.clone(),
            node: "n1".to_string(),
            data: outcome.is_ok().then_some(Payload::Empty),
            error: outcome.err().map(|reason| {
                Arc::new(TargetError {
                    target,
                    source: ActionError::Failed(reason.to_string()),
                })
            }),
            panic: None,
            renderer: None,
        }
    }

    #[test]
    fn every_failure_is_kept() {
        let results = vec![
            result("e", Ok(())),
            result("b", Err("disk full")),
            result("a", Ok(())),
            result("d", Err("no route")),
            result("c", Ok(())),
        ];

        let (results, errors) = aggregate(results);
        assert_eq!(results.len(), 5);
        let order: Vec<String> = results.iter().map(|r| r.target.to_string()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d", "e"]);

        let errors = errors.unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors.to_string(), "b: disk full\nd: no route");
    }

    #[test]
    fn panic_wins_over_error() {
        let mut r = result("a", Err("ignored"));
        r.panic = Some(PanicInfo {
            message: "boom".to_string(),
        });
        let (_, errors) = aggregate(vec![r]);
        assert_eq!(errors.unwrap().to_string(), "a: panicked: boom");
    }

    #[test]
    fn nothing_failed() {
        let (results, errors) = aggregate(vec![result("a", Ok(()))]);
        assert_eq!(results.len(), 1);
        assert!(errors.is_none());
    }

    #[test]
    fn no_results() {
        let (results, errors) = aggregate(Vec::new());
        assert!(results.is_empty());
        assert!(errors.is_none());
    }
}
