// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use crate::client::ClientError;
use crate::config::ConfigError;
use crate::dispatch::{DispatchError, MultiError, OptionsError};

/// Every error the command line can end with.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Options(#[from] OptionsError),

    #[error("{0}")]
    Failed(#[from] MultiError),

    #[error("could not start the runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
