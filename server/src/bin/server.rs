use homeboard_core::HomeboardConfig;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Credentials (ICLOUD_*, OPEN_WEATHER_*) usually live in .env
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Failed to read .env: {}", e);
        }
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,homeboard_core=info,homeboard_planer=info"));
    fmt().compact().with_env_filter(filter).with_target(true).init();

    let config = HomeboardConfig::load();
    info!(
        target: "server",
        addr = %config.addr(),
        dashboards = %config.dashboards_dir.display(),
        poll_interval_secs = config.poll_interval_secs,
        "Starting Homeboard"
    );

    if let Err(e) = homeboard_server::run(config).await {
        error!(target: "server", error = %e, "Server stopped");
        return Err(e);
    }
    Ok(())
}
