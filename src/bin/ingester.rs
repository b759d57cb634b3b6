use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use telemetry::config::AppConfig;
use telemetry::db::{self, services::PgReadingStore};
use telemetry::ingest::run_ingester;
use telemetry::logging::init_logging;
use telemetry::version::VERSION;

#[derive(Parser, Debug)]
#[command(author, version, about = "Stores sensor readings received over MQTT", long_about = None)]
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
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    if std::env::args().any(|arg| arg == "--version") {
        println!("Ingester version: {VERSION}");
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

    let _log_guard = init_logging(&config.log_dir, "ingester.log");
    info!("Starting ingester, version: {}", VERSION);

    let db_pool = match db::connect(&config).await {
        Ok(pool) => pool,
        Err(e) => {
            error!(error = %e, "Failed to connect to database. Exiting.");
            return Err(e.into());
        }
    };
    let store = Arc::new(PgReadingStore::new(db_pool.clone()));

    if let Err(e) = run_ingester(&config, store, shutdown_signal()).await {
        error!(error = %e, "Ingester stopped with a fatal error.");
        db_pool.close().await;
        return Err(e.into());
    }

    db_pool.close().await;
    Ok(())
}
