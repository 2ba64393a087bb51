use tokio_util::sync::CancellationToken;

use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;
use crate::{broker, signal};

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(service = %config.service_name, config = %args.config, "reader starting");

    let token = CancellationToken::new();
    let clients = broker::connect(&config).await?;
    let reader = super::start_reader(&config, &clients, &token).await?;

    signal::shutdown().await?;
    tracing::info!("shutdown signal received");

    token.cancel();
    reader.shutdown().await;
    tracing::info!("reader stopped");
    Ok(())
}
