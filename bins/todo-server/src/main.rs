mod broker;
mod cmd;
mod config;
mod error;
mod signal;

use clap::Parser;
use config::{Cli, Commands};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Api(args) => cmd::api::run(args).await,
        Commands::Reader(args) => cmd::reader::run(args).await,
        Commands::Standalone(args) => cmd::standalone::run(args).await,
    };
    if let Err(e) = result {
        tracing::error!(error = %e, "fatal");
        std::process::exit(1);
    }
}
