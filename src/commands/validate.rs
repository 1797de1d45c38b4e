// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use std::sync::Arc;

use crate::actions;
use crate::commands::{conclude, SelectArgs, Session};
use crate::dispatch::{Action, TargetResult};

pub async fn validate(session: &Session, args: &SelectArgs) -> crate::Result<()> {
    let options = session.options(&args.selector).default_local(true).build()?;
    let action = Action::new("validate")
        .with_local(actions::print_config(session.store.clone()))
        .with_renderer(Arc::new(|result: &TargetResult| {
            Some(format!("{}: ok", result.target))
        }));
    let outcome = session.dispatcher.dispatch(&options, &action).await?;
    conclude(outcome).await
}
