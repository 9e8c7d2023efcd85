use std::path::PathBuf;

use crate::server;
use crate::updatelist;
use clap::{Args, Parser, Subcommand};
use preload_registry::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "HSTS Preload Registry",
    about = "Run the HSTS preload registry service and roll pending changes into the list",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Apply the registry's pending changes to a checkout of the preload list file
    UpdateList(UpdateListArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Keep domain states in a throwaway in-memory database
    #[arg(long)]
    pub(crate) local: bool,
}

#[derive(Args, Debug)]
pub(crate) struct UpdateListArgs {
    /// Path to the JSON file containing the HSTS preload list
    #[arg(long)]
    pub(crate) list_path: PathBuf,
    /// Override the registry API base URL the pending lists are read from
    #[arg(long)]
    pub(crate) service_url: Option<String>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::UpdateList(args) => updatelist::run(args).await,
    }
}
