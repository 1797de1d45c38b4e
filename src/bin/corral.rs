// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use corral_lib::commands::{self, Cli};

/// The corral client selects objects and nodes of the cluster and runs actions on them, either
/// on this node, through the peer agents, or by submitting orchestration targets.
fn main() {
    let args = Cli::parse();

    let default_filter = if args.verbose {
        "corral=debug,corral_lib=debug"
    } else {
        "corral=info,corral_lib=info"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Err(e) = commands::main(&args) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
