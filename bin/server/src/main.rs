use oidc_gate_server::{assemble_pipeline, bootstrap, config::ServerConfig};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(report) => {
            tracing::error!(error = %report, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(environment = ?config.environment, "Loaded configuration");

    tracing::info!("Discovering OIDC provider...");
    let startup = match bootstrap(&config).await {
        Ok(startup) => startup,
        Err(report) => {
            tracing::error!(error = %report, "authentication is misconfigured, not starting");
            return ExitCode::FAILURE;
        }
    };

    // Periodic key set refresh; unknown key ids also trigger one on demand.
    let refresh_task = startup
        .jwks
        .clone()
        .spawn_periodic_refresh(config.jwks.refresh_interval());

    let app = match assemble_pipeline(startup.state, &config) {
        Ok(app) => app,
        Err(report) => {
            tracing::error!(error = %report, "failed to assemble request pipeline");
            return ExitCode::FAILURE;
        }
    };

    let result = app.run(config.bind_address).await;
    refresh_task.abort();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(report) => {
            tracing::error!(error = %report, "server error");
            ExitCode::FAILURE
        }
    }
}
