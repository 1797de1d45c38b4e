// SPDX-License-Identifier: MIT
// Copyright 2025. Triad National Security, LLC.

pub mod action;
pub mod ls;
pub mod node;
pub mod status;
pub mod validate;

pub use action::{ActionArgs, SwitchArgs};
pub use ls::SelectArgs;
pub use node::NodeArgs;
pub use status::StatusArgs;

use clap::{Parser, Subcommand};
use std::sync::Arc;

use crate::client::{ClientError, Connector, ControlPlane, HttpControlPlane};
use crate::config::Config;
use crate::dispatch::{
    ClientContext, DispatchOptions, DispatchOptionsBuilder, Dispatcher, Outcome,
};
use crate::render::{OutputFormat, Render, Renderer};
use crate::store::ObjectStore;

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[arg(long)]
    pub config: Option<String>,

    #[arg(short, long)]
    pub verbose: bool,

    /// Talk to this control plane instead of the configured one.
    #[arg(long, global = true)]
    pub server: Option<String>,

    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Human)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// List the selected objects.
    Ls(SelectArgs),
    /// Print the configuration of the selected objects.
    Config(SelectArgs),
    Start(ActionArgs),
    Stop(ActionArgs),
    Freeze(ActionArgs),
    Unfreeze(ActionArgs),
    /// Move the selected objects to other nodes.
    Switch(SwitchArgs),
    Status(StatusArgs),
    /// Run an action on the selected nodes.
    Node(NodeArgs),
    /// Check that the configuration of the selected objects parses.
    Validate(SelectArgs),
}

/// Everything a command needs: a dispatcher bound to the loaded config and the global flags.
pub struct Session {
    pub store: Arc<ObjectStore>,
    pub dispatcher: Dispatcher,
    pub nodename: String,
    renderer: Arc<dyn Render>,
    connector: Connector,
    server: Option<String>,
    format: OutputFormat,
}

impl Session {
    pub fn new(cli: &Cli) -> crate::Result<Self> {
        let config = Config::load(cli.config.as_deref())?;
        let client = HttpControlPlane::from_config(&config, None)?;
        let context = ClientContext::from_config(&config);
        let store = Arc::new(ObjectStore::from_config(&config));
        let renderer: Arc<dyn Render> = Arc::new(Renderer::stdout(cli.format));
        let nodename = crate::nodename();
        let nodes = Arc::new(config.node_table());

        let connector: Connector = Arc::new(
            move |server: &str| -> Result<Arc<dyn ControlPlane>, ClientError> {
                let client = HttpControlPlane::from_config(&config, Some(server))?;
                Ok(Arc::new(client))
            },
        );

        let dispatcher = Dispatcher::new(
            Arc::new(client),
            context,
            store.clone(),
            nodes,
            &nodename,
            Arc::clone(&renderer),
        )
        .with_connector(Arc::clone(&connector));

        Ok(Self {
            store,
            dispatcher,
            renderer,
            nodename,
            connector,
            server: cli.server.clone(),
            format: cli.format,
        })
    }

    /// Options for `selector` carrying the global `--server` and `--format` flags.
    pub fn options(&self, selector: &str) -> DispatchOptionsBuilder {
        DispatchOptions::builder(selector)
            .server(self.server.clone())
            .output(Some(self.format))
    }

    /// The control plane named by `--server`, else the configured one.
    pub fn client(&self) -> Result<Arc<dyn ControlPlane>, ClientError> {
        match self.server.as_deref() {
            Some(server) => (self.connector)(server),
            None => Ok(self.dispatcher.client()),
        }
    }

    /// Renderer in the `--format` output format.
    pub fn renderer(&self) -> Arc<dyn Render> {
        Arc::clone(&self.renderer)
    }
}

/// Render the results of a dispatch, follow its watch until it ends or Ctrl-C, and fail if any
/// target failed.
pub async fn conclude(outcome: Outcome) -> crate::Result<()> {
    outcome.render();
    if let Some(watch) = outcome.watch() {
        let token = watch.token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                token.cancel();
            }
        });
    }
    outcome.finish().await?;
    Ok(())
}

pub fn main(cli: &Cli) -> crate::Result<()> {
    let rt = tokio::runtime::Runtime::new().map_err(crate::Error::Runtime)?;
    rt.block_on(async {
        let session = Session::new(cli)?;
        match &cli.command {
            Commands::Ls(args) => ls::ls(&session, args).await,
            Commands::Config(args) => ls::config(&session, args).await,
            Commands::Start(args) => action::run(&session, action::Verb::Start, args).await,
            Commands::Stop(args) => action::run(&session, action::Verb::Stop, args).await,
            Commands::Freeze(args) => action::run(&session, action::Verb::Freeze, args).await,
            Commands::Unfreeze(args) => action::run(&session, action::Verb::Unfreeze, args).await,
            Commands::Switch(args) => action::switch(&session, args).await,
            Commands::Status(args) => status::status(&session, args).await,
            Commands::Node(args) => node::node(&session, args).await,
            Commands::Validate(args) => validate::validate(&session, args).await,
        }
    })
}
