//! Local event socket receiver - Entry Point
//!
//! Connects to the local event socket, keeps the connection healthy and
//! writes decoded events to stdout as JSON lines.

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};

/// Local event socket receiver
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SOCKRX_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Determine config path: CLI arg > SOCKRX_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("SOCKRX_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = sockrx_app::AppConfig::from_file(&config_path)?;

    // Settings decide the log level, so they load before logging starts
    let (settings, settings_error) = match config.load_settings() {
        Ok(settings) => (settings, None),
        Err(e) => (sockrx_app::Settings::default(), Some(e)),
    };

    sockrx_telemetry::init_logging(settings.debug_mode)?;

    info!("Starting socket receiver v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        api_key_file = %config.api_key_file.display(),
        "Configuration loaded"
    );
    if let Some(e) = settings_error {
        warn!(error = %e, "Settings unavailable, using defaults");
    }

    let app = sockrx_app::Application::new(config, settings);
    app.run().await?;

    Ok(())
}
