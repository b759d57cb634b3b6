use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use telemetry::config::AppConfig;
use telemetry::db::{self, services::PgReadingStore};
use telemetry::logging::init_logging;
use telemetry::version::VERSION;
use telemetry::web::{AppState, run_http_server, templates::PageRenderer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serves the latest sensor readings as an HTML page", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested, draining connections.");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("Viewer version: {VERSION}");
        return Ok(());
    }

    let args = Args::parse();

    let config = match AppConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    let _log_guard = init_logging(&config.log_dir, "viewer.log");
    info!("Starting viewer, version: {}", VERSION);

    let renderer = PageRenderer::new(config.viewer_utc_timestamps)?;

    let db_pool = match db::connect(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Failed to connect to database. Exiting.");
            return Err(e.into());
        }
    };

    let app_state = Arc::new(AppState {
        store: Arc::new(PgReadingStore::new(db_pool.clone())),
        renderer: Arc::new(renderer),
    });

    let result = run_http_server(app_state, config.http_addr, shutdown_signal()).await;
    db_pool.close().await;
    if let Err(e) = result {
        error!(error = %e, address = %config.http_addr, "HTTP server failed.");
        return Err(e.into());
    }
    Ok(())
}
