use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docker_healthchecks::config::Config;
use docker_healthchecks::heartbeat::{ReqwestTransport, RetryingNotifier};
use docker_healthchecks::logging;
use docker_healthchecks::runtime::DockerCli;
use docker_healthchecks::supervisor::FleetWatcher;
use docker_healthchecks::utils::http_client::build_heartbeat_client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env().context("could not load configuration")?;
    logging::init_logging(config.log_level)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        label = %config.label,
        ping_interval = ?config.ping_interval,
        "Starting docker-healthchecks"
    );

    let runtime = Arc::new(
        DockerCli::new(config.docker_path.clone()).with_command_timeout(config.fetch_timeout),
    );
    let transport = Arc::new(ReqwestTransport::new(build_heartbeat_client(
        config.ping_timeout,
    )));
    let notifier = Arc::new(RetryingNotifier::new(transport, config.notifier_config()));

    let token = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(token.clone()));

    FleetWatcher::new(runtime, notifier, config.fleet_config(), token)
        .run()
        .await
        .context("fleet watcher stopped")?;

    info!("Shut down");
    Ok(())
}

/// Cancel `token` on SIGINT or SIGTERM.
async fn shutdown_on_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    token.cancel();
}
