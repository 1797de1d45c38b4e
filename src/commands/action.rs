// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

use clap::Args;
use std::time::Duration;

use crate::actions::{self, ResourceAction, ResourceFilter};
use crate::commands::{conclude, Session};
use crate::dispatch::Action;

#[derive(Args, Debug, Clone)]
pub struct ActionArgs {
    /// Object selector expression.
    pub selector: String,

    /// Run on this node against the installed objects.
    #[arg(long)]
    pub local: bool,

    /// Run through the agents of the selected nodes.
    #[arg(long)]
    pub node: Option<String>,

    /// Only these resource ids. Implies --local.
    #[arg(long, value_delimiter = ',')]
    pub rid: Vec<String>,

    /// Only resources of these subsets. Implies --local.
    #[arg(long, value_delimiter = ',')]
    pub subset: Vec<String>,

    /// Only resources with one of these tags. Implies --local.
    #[arg(long, value_delimiter = ',')]
    pub tag: Vec<String>,

    /// Follow the status and events of the selected objects.
    #[arg(long)]
    pub watch: bool,

    /// Wait for the orchestration to reach a terminal state.
    #[arg(long)]
    pub wait: bool,

    /// How long to wait, in seconds.
    #[arg(long, default_value_t = 300)]
    pub time: u64,
}

#[derive(Args, Debug, Clone)]
pub struct SwitchArgs {
    /// Object selector expression.
    pub selector: String,

    /// Destination nodes.
    #[arg(long, value_delimiter = ',', required = true)]
    pub to: Vec<String>,

    #[arg(long)]
    pub watch: bool,

    #[arg(long)]
    pub wait: bool,

    #[arg(long, default_value_t = 300)]
    pub time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verb {
    Start,
    Stop,
    Freeze,
    Unfreeze,
}

impl Verb {
    fn name(&self) -> &'static str {
        match self {
            Verb::Start => "start",
            Verb::Stop => "stop",
            Verb::Freeze => "freeze",
            Verb::Unfreeze => "unfreeze",
        }
    }

    /// The orchestration target submitted when the action runs asynchronously.
    pub fn target(&self) -> &'static str {
        match self {
            Verb::Start => "started",
            Verb::Stop => "stopped",
            Verb::Freeze => "frozen",
            Verb::Unfreeze => "thawed",
        }
    }
}

fn wait_for(wait: bool, time: u64) -> Option<Duration> {
    wait.then(|| Duration::from_secs(time))
}

pub async fn run(session: &Session, verb: Verb, args: &ActionArgs) -> crate::Result<()> {
    let options = session
        .options(&args.selector)
        .node_selector(args.node.as_deref().unwrap_or_default())
        .local(args.local)
        .rids(args.rid.clone())
        .subsets(args.subset.clone())
        .tags(args.tag.clone())
        .target(Some(verb.target().to_string()))
        .watch(args.watch)
        .wait(wait_for(args.wait, args.time))
        .build()?;

    let store = session.store.clone();
    let filter = ResourceFilter {
        rids: args.rid.clone(),
        subsets: args.subset.clone(),
        tags: args.tag.clone(),
    };
    let local = match verb {
        Verb::Start => actions::run_resources(store, filter, ResourceAction::Start),
        Verb::Stop => actions::run_resources(store, filter, ResourceAction::Stop),
        Verb::Freeze => actions::set_frozen(store, true),
        Verb::Unfreeze => actions::set_frozen(store, false),
    };
    let params = serde_json::json!({
        "rid": args.rid,
        "subset": args.subset,
        "tag": args.tag,
    });
    let action = Action::new(verb.name())
        .with_local(local)
        .with_params(params);

    let outcome = session.dispatcher.dispatch(&options, &action).await?;
    conclude(outcome).await
}

pub async fn switch(session: &Session, args: &SwitchArgs) -> crate::Result<()> {
    let options = session
        .options(&args.selector)
        .target(Some(format!("placed@{}", args.to.join(","))))
        .destination(args.to.clone())
        .watch(args.watch)
        .wait(wait_for(args.wait, args.time))
        .build()?;
    let action = Action::new("switch");
    let outcome = session.dispatcher.dispatch(&options, &action).await?;
    conclude(outcome).await
}
