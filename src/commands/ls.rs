// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::actions;
use crate::commands::{conclude, Session};
use crate::dispatch::{fanout, Action, Mode, Outcome};

#[derive(Args, Debug, Clone)]
pub struct SelectArgs {
    /// Object selector expression.
    pub selector: String,

    /// Resolve the selector against the installed objects only.
    #[arg(long)]
    pub local: bool,
}

pub async fn ls(session: &Session, args: &SelectArgs) -> crate::Result<()> {
    let options = session.options(&args.selector).build()?;
    let targets = session.dispatcher.select(&options, args.local).await?;
    let results = fanout::run(&targets, actions::ls(), None, &session.nodename).await;
    conclude(Outcome::from_results(Mode::Local, results, session.renderer())).await
}

pub async fn config(session: &Session, args: &SelectArgs) -> crate::Result<()> {
    let options = session.options(&args.selector).default_local(true).build()?;
    let action =
        Action::new("print_config").with_local(actions::print_config(session.store.clone()));
    let outcome = session.dispatcher.dispatch(&options, &action).await?;
    conclude(outcome).await
}
