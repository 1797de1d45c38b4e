// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;
use std::time::Duration;

use crate::commands::{conclude, Session};
use crate::dispatch::Action;

#[derive(Args, Debug, Clone)]
pub struct NodeArgs {
    /// The action to run, e.g. `drain` or `freeze`.
    pub action: String,

    /// Node selector expression.
    #[arg(long)]
    pub node: String,

    /// Give up on a node after this many seconds.
    #[arg(long)]
    pub timeout: Option<u64>,
}

pub async fn node(session: &Session, args: &NodeArgs) -> crate::Result<()> {
    let options = session.options("").node_selector(&args.node).build()?;
    let action = Action::new(&args.action).with_timeout(args.timeout.map(Duration::from_secs));
    let outcome = session.dispatcher.dispatch(&options, &action).await?;
    conclude(outcome).await
}
