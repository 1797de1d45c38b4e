// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Output of dispatch results, status snapshots and events.

use serde::Serialize;
use std::sync::Arc;

use crate::client::{Event, StatusSnapshot};
use crate::dispatch::{Payload, TargetResult};
use crate::path::Identifier;
use crate::LogStream;

/// Custom human rendering for the results of one action. Returns `None` to print nothing.
pub type HumanRender = Arc<dyn Fn(&TargetResult) -> Option<String> + Send + Sync>;

#[derive(clap::ValueEnum, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

pub trait Render: Send + Sync {
    fn results(&self, results: &[TargetResult]);
    fn snapshot(&self, snapshot: &StatusSnapshot);
    fn event(&self, event: &Event);

    /// The same output, in another format.
    fn with_format(&self, format: OutputFormat) -> Arc<dyn Render>;
}

/// Renders to a `LogStream` in the configured format.
#[derive(Debug)]
pub struct Renderer {
    format: OutputFormat,
    stream: Arc<LogStream>,
}

#[derive(Serialize)]
struct JsonResult<'a> {
    path: &'a Identifier,
    node: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<&'a Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Renderer {
    pub fn new(format: OutputFormat, stream: Arc<LogStream>) -> Self {
        Self { format, stream }
    }

    pub fn stdout(format: OutputFormat) -> Self {
        Self::new(format, Arc::new(LogStream::new_stdout()))
    }

    fn line(&self, line: &str) {
        if let Err(e) = self.stream.writeln(line.as_bytes()) {
            tracing::warn!("could not write output: {e}");
        }
    }

    fn json<T: Serialize>(&self, value: &T, pretty: bool) {
        let encoded = if pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        match encoded {
            Ok(s) => self.line(&s),
            Err(e) => tracing::warn!("could not encode output: {e}"),
        }
    }
}

impl Render for Renderer {
    fn with_format(&self, format: OutputFormat) -> Arc<dyn Render> {
        Arc::new(Renderer::new(format, Arc::clone(&self.stream)))
    }

    fn results(&self, results: &[TargetResult]) {
        match self.format {
            OutputFormat::Human => {
                for result in results.iter().filter(|r| r.is_ok()) {
                    let rendered = match &result.renderer {
                        Some(render) => render(result),
                        None => human_line(result),
                    };
                    if let Some(text) = rendered {
                        self.line(&text);
                    }
                }
            }
            OutputFormat::Json => {
                let results: Vec<JsonResult> = results
                    .iter()
                    .map(|r| JsonResult {
                        path: &r.target,
                        node: &r.node,
                        data: r.data.as_ref(),
                        error: match (&r.panic, &r.error) {
                            (Some(panic), _) => Some(format!("panicked: {}", panic.message)),
                            (None, Some(error)) => Some(error.source.to_string()),
                            (None, None) => None,
                        },
                    })
                    .collect();
                self.json(&results, true);
            }
        }
    }

    fn snapshot(&self, snapshot: &StatusSnapshot) {
        match self.format {
            OutputFormat::Human => {
                for (path, status) in snapshot.objects.iter() {
                    self.line(&format!("{path} {}", compact(status)));
                }
                for (node, status) in snapshot.nodes.iter() {
                    self.line(&format!("node {node} {}", compact(status)));
                }
            }
            OutputFormat::Json => self.json(snapshot, false),
        }
    }

    fn event(&self, event: &Event) {
        match self.format {
            OutputFormat::Human => {
                let mut line = event.kind.clone();
                if let Some(path) = &event.path {
                    line.push(' ');
                    line.push_str(path);
                }
                if let Some(node) = &event.node {
                    line.push_str(&format!(" @{node}"));
                }
                if !event.data.is_null() {
                    line.push(' ');
                    line.push_str(&compact(&event.data));
                }
                self.line(&line);
            }
            OutputFormat::Json => self.json(event, false),
        }
    }
}

fn compact(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// The default human rendering of a successful result.
pub fn human_line(result: &TargetResult) -> Option<String> {
    let target = &result.target;
    match result.data.as_ref()? {
        Payload::Path(path) => Some(path.to_string()),
        Payload::Config(config) => {
            let mut lines = Vec::new();
            for (section, options) in config.sections.iter() {
                lines.push(format!("[{section}]"));
                for (option, value) in options.iter() {
                    lines.push(format!("{option} = {value}"));
                }
            }
            Some(lines.join("\n"))
        }
        Payload::Flag { name, set } => Some(format!(
            "{target}: {name} {}",
            if *set { "set" } else { "cleared" }
        )),
        Payload::Commands(runs) if runs.is_empty() => Some(format!("{target}: no resource to run")),
        Payload::Commands(runs) => Some(
            runs.iter()
                .map(|run| format!("{target} {}: {} (exit {})", run.rid, run.command, run.status))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
        Payload::Remote(response) => {
            let mut lines = vec![format!(
                "{target}@{}: status {}",
                result.node, response.status
            )];
            lines.extend(response.log.iter().map(|l| format!("  {l}")));
            Some(lines.join("\n"))
        }
        Payload::Accepted(ack) if ack.info.is_empty() => Some(format!("{target}: accepted")),
        Payload::Accepted(ack) => Some(format!("{target}: accepted ({})", ack.info)),
        Payload::Empty => None,
    }
}
