use tokio_util::sync::CancellationToken;

use crate::config::{ServeArgs, ServerConfig};
use crate::error::ServerError;
use crate::{broker, signal};

pub async fn run(args: ServeArgs) -> Result<(), ServerError> {
    let config = ServerConfig::load(&args.config)?;
    tracing::info!(service = %config.service_name, config = %args.config, "api starting");

    let token = CancellationToken::new();
    let clients = broker::connect(&config).await?;
    let producer = super::build_producer(&config, &clients);
    let mut api = super::spawn_api(&config, producer.clone(), &token);

    // A bind failure ends the server task before any signal arrives.
    let early = tokio::select! {
        result = signal::shutdown() => {
            result?;
            tracing::info!("shutdown signal received");
            None
        }
        joined = &mut api => Some(joined),
    };

    token.cancel();
    let result = match early {
        Some(joined) => joined?.map_err(ServerError::from),
        None => super::stop_api(api).await,
    };
    super::close_producer(&producer).await;
    tracing::info!("api stopped");
    result
}
