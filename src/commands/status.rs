// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;

use crate::client::EventFilter;
use crate::commands::Session;
use crate::dispatch::{watch, MultiError};

#[derive(Args, Debug, Clone)]
pub struct StatusArgs {
    /// Object selector expression.
    #[arg(default_value = "**")]
    pub selector: String,

    /// Keep printing events until interrupted.
    #[arg(long)]
    pub watch: bool,
}

pub async fn status(session: &Session, args: &StatusArgs) -> crate::Result<()> {
    let client = session.client()?;
    let renderer = session.renderer();

    if !args.watch {
        let snapshot = client.status(&args.selector).await?;
        renderer.snapshot(&snapshot);
        return Ok(());
    }

    let events = client
        .events(EventFilter {
            selector: args.selector.clone(),
            kinds: Vec::new(),
        })
        .await?;
    let handle = watch::spawn(client, args.selector.clone(), events, renderer);
    let token = handle.token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            token.cancel();
        }
    });

    if let Some(failure) = handle.join().await {
        let mut errors = MultiError::new();
        errors.push(failure);
        return Err(errors.into());
    }
    Ok(())
}
