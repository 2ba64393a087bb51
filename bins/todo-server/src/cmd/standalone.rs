use tokio_util::sync::CancellationToken;

use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;
use crate::{broker, signal};

/// API and reader over one set of broker clients. With the memory backend
/// this is the only mode where published commands reach a reader.
pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(service = %config.service_name, config = %args.config, "standalone starting");

    let token = CancellationToken::new();
    let clients = broker::connect(&config).await?;
    let reader = super::start_reader(&config, &clients, &token).await?;
    let producer = super::build_producer(&config, &clients);
    let mut api = super::spawn_api(&config, producer.clone(), &token);

    let early = tokio::select! {
        result = signal::shutdown() => {
            result?;
            tracing::info!("shutdown signal received");
            None
        }
        joined = &mut api => Some(joined),
    };

    token.cancel();
    let api_result = match early {
        Some(joined) => joined?.map_err(ServerError::from),
        None => super::stop_api(api).await,
    };
    super::close_producer(&producer).await;
    reader.shutdown().await;
    tracing::info!("standalone stopped");
    api_result
}
