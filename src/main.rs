//! ais-operator entry point.
//!
//! Sets up JSON logging, connects to the API server, then runs the probe and
//! metrics server next to the AIStore controller until a signal arrives.

use std::sync::Arc;
use std::time::Duration;

use kube::Client;
use tokio::signal;
use tracing::{error, info};

use ais_operator::health::{HealthState, run_health_server};
use ais_operator::run_controller;

/// Restrict the controller to one namespace when set.
const WATCH_NAMESPACE_VAR: &str = "WATCH_NAMESPACE";

/// Time given to in-flight reconciles after readiness drops.
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ais_operator=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    let namespace = std::env::var(WATCH_NAMESPACE_VAR)
        .ok()
        .filter(|ns| !ns.is_empty());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = namespace.as_deref().unwrap_or("*"),
        "Starting ais-operator"
    );

    let client = Client::try_default().await?;
    let health_state = Arc::new(HealthState::new());

    let mut health = tokio::spawn({
        let health_state = health_state.clone();
        async move { run_health_server(health_state).await }
    });
    let mut controller = tokio::spawn({
        let health_state = health_state.clone();
        async move { run_controller(client, Some(health_state), namespace.as_deref()).await }
    });

    tokio::select! {
        joined = &mut controller => {
            if let Err(e) = joined {
                error!(error = %e, "Controller task aborted");
            }
        }
        joined = &mut health => {
            match joined {
                Ok(Err(e)) => error!(error = %e, "Health server failed"),
                Err(e) => error!(error = %e, "Health server task aborted"),
                Ok(Ok(())) => {}
            }
        }
        _ = shutdown_signal() => {
            health_state.set_ready(false).await;
            info!(grace_secs = SHUTDOWN_GRACE_PERIOD.as_secs(), "Shutdown signal received, draining");
            tokio::time::sleep(SHUTDOWN_GRACE_PERIOD).await;
        }
    }

    controller.abort();
    health.abort();
    info!("Operator stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM. A handler that cannot be installed never
/// fires; the other one still does.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
