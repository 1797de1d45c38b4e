// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

//! Incremental decoder for server-sent events.

use crate::client::{ClientError, Event};

/// Accumulates chunks of an event stream and yields complete events.
///
/// An event is a block of `field: value` lines ended by a blank line. The `event` field names the
/// kind; `data` lines are joined with newlines and parsed as the JSON body of an `Event`. When the
/// body carries no `kind`, the `event` field supplies it.
#[derive(Debug, Default)]
pub struct Decoder {
    buffer: Vec<u8>,
    kind: Option<String>,
    data: Vec<String>,
}

impl Decoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes and return the events it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<Event, ClientError>> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        // Only complete lines are decoded, so a character split across chunks stays intact.
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let bytes: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&bytes);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<Result<Event, ClientError>> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "event" => self.kind = Some(value.to_string()),
            "data" => self.data.push(value.to_string()),
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<Result<Event, ClientError>> {
        let kind = self.kind.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        let mut value: serde_json::Value = match serde_json::from_str(&data) {
            Ok(value) => value,
            Err(e) => return Some(Err(ClientError::Decode(format!("event data: {e}")))),
        };
        if let (Some(kind), Some(object)) = (kind, value.as_object_mut()) {
            object
                .entry("kind")
                .or_insert_with(|| serde_json::Value::String(kind));
        }
        Some(serde_json::from_value(value).map_err(|e| ClientError::Decode(format!("event: {e}"))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_split_across_chunks() {
        let mut decoder = Decoder::new();
        assert!(decoder.push(b"event: success\ndata: {\"path\":").is_empty());
        let events = decoder.push(b" \"web1\"}\n\n: keepalive\n\nevent: x\n");
        assert_eq!(events.len(), 1);
        let event = events.into_iter().next().unwrap().unwrap();
        assert_eq!(event.kind, "success");
        assert_eq!(event.path.as_deref(), Some("web1"));
    }

    #[test]
    fn body_kind_wins() {
        let mut decoder = Decoder::new();
        let events =
            decoder.push(b"event: other\r\ndata: {\"kind\": \"error\", \"node\": \"n1\"}\r\n\r\n");
        let event = events.into_iter().next().unwrap().unwrap();
        assert_eq!(event.kind, "error");
        assert_eq!(event.node.as_deref(), Some("n1"));
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let mut decoder = Decoder::new();
        let line = "event: progress\ndata: {\"path\":\"web1\",\"data\":{\"message\":\"é\"}}\n\n";
        let line = line.as_bytes();
        let cut = line.iter().position(|b| *b == 0xc3).unwrap() + 1;
        assert!(decoder.push(&line[..cut]).is_empty());
        let event = decoder.push(&line[cut..]).into_iter().next().unwrap().unwrap();
        assert_eq!(event.data["message"], "é");
    }

    #[test]
    fn bad_json_is_reported() {
        let mut decoder = Decoder::new();
        let events = decoder.push(b"data: {nope\n\n");
        assert!(matches!(events[0], Err(ClientError::Decode(_))));
    }
}
