// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod actions;
pub mod client;
pub mod commands;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod path;
pub mod render;
pub mod selector;
pub mod store;
pub mod test_env;
pub mod tls;

pub use error::{Error, Result};

use std::sync::Mutex;

/// Buffer is an in-memory sink that can be shared between writers and inspected afterwards.
#[derive(Debug, Default)]
pub struct Buffer {
    data: Mutex<Vec<u8>>,
}

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        let mut data = self
            .data
            .lock()
            .map_err(|_| std::io::Error::other("Buffer lock poisoned"))?;
        data.extend_from_slice(buf);
        Ok(buf.len())
    }

    pub fn writeln(&self, buf: &[u8]) -> std::io::Result<usize> {
        self.write(&[buf, b"\n"].concat())
    }

    /// Everything written so far, lossily decoded as UTF-8.
    pub fn contents(&self) -> String {
        match self.data.lock() {
            Ok(data) => String::from_utf8_lossy(&data).into_owned(),
            Err(_) => String::new(),
        }
    }
}

/// LogStream is an abstract object representing a writeable stream for user-facing output.
///
/// Each enum variant represents a concrete type that has its own way of writing.
#[derive(Debug)]
pub enum LogStream {
    Stdout(std::io::Stdout),
    Stderr(std::io::Stderr),
    Buffer(Buffer),
}

impl LogStream {
    pub fn new_stdout() -> Self {
        LogStream::Stdout(std::io::stdout())
    }

    pub fn new_stderr() -> Self {
        LogStream::Stderr(std::io::stderr())
    }

    pub fn new_buffer() -> Self {
        LogStream::Buffer(Buffer::new())
    }

    pub fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        use std::io::Write;
        match self {
            LogStream::Stdout(s) => s.lock().write(buf),
            LogStream::Stderr(s) => s.lock().write(buf),
            LogStream::Buffer(b) => b.write(buf),
        }
    }

    pub fn writeln(&self, buf: &[u8]) -> std::io::Result<usize> {
        match self {
            LogStream::Buffer(b) => b.writeln(buf),
            _ => self.write(&[buf, b"\n"].concat()),
        }
    }

    /// The contents of a buffer stream. Standard streams have none.
    pub fn contents(&self) -> String {
        match self {
            LogStream::Buffer(b) => b.contents(),
            _ => String::new(),
        }
    }
}

/// Name of the local node.
pub fn nodename() -> String {
    match nix::unistd::gethostname() {
        Ok(name) => name.to_string_lossy().into_owned(),
        Err(_) => "localhost".to_string(),
    }
}

pub fn default_config_path() -> String {
    match std::env::var("CORRAL_CONFIG") {
        Ok(conf) => conf,
        Err(_) => "/etc/corral/corral.toml".to_string(),
    }
}

pub fn default_root() -> String {
    match std::env::var("CORRAL_ROOT") {
        Ok(root) => root,
        Err(_) => "/etc/corral/objects".to_string(),
    }
}

pub fn default_var() -> String {
    match std::env::var("CORRAL_VAR") {
        Ok(var) => var,
        Err(_) => "/var/lib/corral".to_string(),
    }
}

pub fn default_daemon() -> String {
    match std::env::var("CORRAL_DAEMON") {
        Ok(url) => url,
        Err(_) => "http://127.0.0.1:1215".to_string(),
    }
}

pub fn default_client_cert() -> String {
    match std::env::var("CORRAL_CLIENT_CERT") {
        Ok(cert) => cert,
        Err(_) => "/etc/corral/client.crt".to_string(),
    }
}

pub fn default_client_key() -> String {
    match std::env::var("CORRAL_CLIENT_KEY") {
        Ok(key) => key,
        Err(_) => "/etc/corral/client.key".to_string(),
    }
}

pub fn default_ca_cert() -> String {
    match std::env::var("CORRAL_CA_CERT") {
        Ok(cert) => cert,
        Err(_) => "/etc/corral/ca.crt".to_string(),
    }
}
