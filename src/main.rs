use thiserror::Error;

use crate::util::env::EnvErr;
use crate::util::telemetry;

mod api;
mod constants;
mod db;
mod util;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Std(#[from] Box<dyn std::error::Error>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

/// Configuration and bind failures end the process with an error so a supervisor can restart it
#[tokio::main]
async fn main() -> Result<()> {
    let config = util::env::config().await?;
    let telemetry_registry = telemetry::Telemetry::new(config)?.register();

    tracing::info!(
        port = config.port,
        store_configured = config.redis_url.is_some(),
        "starting edugame server"
    );

    let served = api::server::start_server(config.clone()).await;
    if let Err(e) = &served {
        tracing::error!(error = ?e, "server stopped with an error");
    }

    telemetry_registry.shutdown();
    Ok(served?)
}
