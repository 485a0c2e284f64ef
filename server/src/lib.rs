use std::sync::Arc;

use homeboard_core::{
    DashboardCatalog, DashboardHost, DashboardServer, HomeboardConfig, UpdateBroadcaster,
};
use homeboard_planer::PlanerDashboard;
use tracing::{info, warn};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Every dashboard compiled into this server
pub fn catalog() -> DashboardCatalog {
    DashboardCatalog::new().with(Arc::new(PlanerDashboard))
}

/// Discover dashboards under the configured root
pub fn build_host(config: &HomeboardConfig, catalog: &DashboardCatalog) -> DashboardHost {
    let broadcaster = UpdateBroadcaster::new(config.push_capacity);
    let host = DashboardHost::discover(config, catalog, broadcaster);

    if host.dashboards().is_empty() {
        warn!(
            target: "server",
            root = %config.dashboards_dir.display(),
            "No dashboards loaded"
        );
    }
    for dashboard in host.dashboards() {
        info!(
            target: "server",
            dashboard = %dashboard.name,
            prefix = %dashboard.url_prefix(),
            endpoints = ?dashboard.registry.names(),
            "Dashboard ready"
        );
    }

    host
}

/// Discover dashboards and serve them until the listener fails
pub async fn run(config: HomeboardConfig) -> Result<(), BoxError> {
    let host = build_host(&config, &catalog());
    DashboardServer::new(config, host).serve().await
}
