use anyhow::Context as _;
use kube::Client;
use license_service::controllers::{reporter_controller, scanner_controller, State};
use license_service::util::{config::OperatorConfig, telemetry};
use std::sync::Arc;
use tracing::info;

mod handlers;
mod server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(OperatorConfig::from_env());
    telemetry::init(config.log_format).context("failed to initialize tracing")?;
    info!(version = env!("CARGO_PKG_VERSION"), "Starting ibm-licensing-operator");

    let state = State::new().context("failed to register metrics")?;
    let client = Client::try_default().await.context("failed to create kube Client")?;

    let reporter = async {
        if config.enable_reporter {
            reporter_controller::run(state.clone(), client.clone(), config.clone()).await;
        } else {
            info!("IBMLicenseServiceReporter controller disabled");
        }
    };
    let scanner = async {
        if config.enable_scanner {
            scanner_controller::run(state.clone(), client.clone(), config.clone()).await;
        } else {
            info!("IBMLicenseServiceScanner controller disabled");
        }
    };

    // Controllers and the web server shut down gracefully on signal, so poll until all are done
    tokio::join!(reporter, scanner, server::start_server(state.clone())).2?;
    Ok(())
}
