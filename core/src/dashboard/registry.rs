// Startup-time dashboard discovery and endpoint registry

use crate::config::HomeboardConfig;
use crate::dashboard::UpdateBroadcaster;
use crate::plugin::{DashboardCatalog, DashboardPlugin, SourceContext};
use crate::poller::ChangeDetectingPoller;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SCRATCH_DIR: &str = ".temp_data";

/// Endpoint name -> poller, for one dashboard. Read-only once built.
#[derive(Default)]
pub struct DataSourceRegistry {
    entries: HashMap<String, Arc<ChangeDetectingPoller>>,
}

impl DataSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false (and keeps the existing entry) if the name is taken
    pub fn insert(&mut self, poller: Arc<ChangeDetectingPoller>) -> bool {
        let name = poller.endpoint_name().to_string();
        if self.entries.contains_key(&name) {
            return false;
        }
        self.entries.insert(name, poller);
        true
    }

    pub fn get(&self, endpoint: &str) -> Option<&Arc<ChangeDetectingPoller>> {
        self.entries.get(endpoint)
    }

    /// Endpoint names in sorted order
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn pollers(&self) -> impl Iterator<Item = &Arc<ChangeDetectingPoller>> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A loaded dashboard mounted at `/dashboard/<index>`
pub struct MountedDashboard {
    pub index: usize,
    pub name: String,
    pub folder: PathBuf,
    pub template: PathBuf,
    pub registry: DataSourceRegistry,
}

impl MountedDashboard {
    pub fn url_prefix(&self) -> String {
        format!("/dashboard/{}", self.index)
    }
}

/// All dashboards discovered at startup plus the shared push channel
pub struct DashboardHost {
    dashboards: Vec<Arc<MountedDashboard>>,
    broadcaster: UpdateBroadcaster,
    poll_tasks: Vec<JoinHandle<()>>,
}

impl DashboardHost {
    /// Scan `config.dashboards_dir` and load every folder that has a plugin
    /// in `catalog`. Failures are logged and skipped; this never aborts.
    pub fn discover(
        config: &HomeboardConfig,
        catalog: &DashboardCatalog,
        broadcaster: UpdateBroadcaster,
    ) -> Self {
        let mut host = Self {
            dashboards: Vec::new(),
            broadcaster,
            poll_tasks: Vec::new(),
        };

        let folders = match list_subdirectories(&config.dashboards_dir) {
            Ok(folders) => folders,
            Err(e) => {
                warn!(
                    target: "dashboard",
                    root = %config.dashboards_dir.display(),
                    error = %e,
                    "Cannot read dashboards root; no dashboards loaded"
                );
                return host;
            }
        };

        for folder in folders {
            let name = match folder.file_name() {
                Some(name) => name.to_string_lossy().into_owned(),
                None => continue,
            };
            if name.starts_with('.') || name.starts_with('_') {
                debug!(target: "dashboard", folder = %name, "Skipping hidden folder");
                continue;
            }

            let plugin = match catalog.get(&name) {
                Some(plugin) => plugin,
                None => {
                    warn!(target: "dashboard", dashboard = %name, "Failed to load dashboard: no plugin registered");
                    continue;
                }
            };

            let index = host.dashboards.len();
            match host.load_dashboard(index, &name, &folder, plugin.as_ref(), config) {
                Ok(mounted) => {
                    info!(
                        target: "dashboard",
                        dashboard = %name,
                        prefix = %mounted.url_prefix(),
                        endpoints = mounted.registry.len(),
                        "Registered dashboard"
                    );
                    host.dashboards.push(Arc::new(mounted));
                }
                Err(e) => {
                    warn!(target: "dashboard", dashboard = %name, error = %e, "Failed to load dashboard");
                }
            }
        }

        host
    }

    fn load_dashboard(
        &self,
        index: usize,
        name: &str,
        folder: &Path,
        plugin: &dyn DashboardPlugin,
        config: &HomeboardConfig,
    ) -> io::Result<MountedDashboard> {
        let scratch_dir = folder.join(SCRATCH_DIR);
        reset_dir(&scratch_dir)?;

        let ctx = SourceContext {
            dashboard: name.to_string(),
            scratch_dir,
            secret_key: config.secret_key.clone(),
            static_dir: config.static_dir.clone(),
            settings: config.dashboard_settings(name),
        };

        let mut registry = DataSourceRegistry::new();
        for factory in plugin.data_sources() {
            let source = match factory.build(&ctx) {
                Ok(source) => source,
                Err(e) => {
                    warn!(
                        target: "dashboard",
                        dashboard = %name,
                        module = %factory.module(),
                        error = %e,
                        "Error loading data source"
                    );
                    continue;
                }
            };

            let poller = Arc::new(ChangeDetectingPoller::new(
                source,
                self.broadcaster.clone(),
                config.poller_options(),
            ));
            let endpoint = poller.endpoint_name().to_string();
            if registry.insert(poller) {
                info!(target: "dashboard", dashboard = %name, endpoint = %endpoint, "Registered data endpoint");
            } else {
                warn!(
                    target: "dashboard",
                    dashboard = %name,
                    module = %factory.module(),
                    endpoint = %endpoint,
                    "Duplicate endpoint name; keeping the first source"
                );
            }
        }

        Ok(MountedDashboard {
            index,
            name: name.to_string(),
            folder: folder.to_path_buf(),
            template: folder.join(plugin.template()),
            registry,
        })
    }

    /// Spawn one poll task per registered data source
    pub fn start_pollers(&mut self) {
        for dashboard in &self.dashboards {
            for poller in dashboard.registry.pollers() {
                self.poll_tasks.push(poller.spawn());
            }
        }
        info!(target: "dashboard", pollers = self.poll_tasks.len(), "Pollers started");
    }

    pub fn dashboards(&self) -> &[Arc<MountedDashboard>] {
        &self.dashboards
    }

    pub fn dashboard(&self, index: usize) -> Option<&Arc<MountedDashboard>> {
        self.dashboards.get(index)
    }

    pub fn broadcaster(&self) -> &UpdateBroadcaster {
        &self.broadcaster
    }
}

fn list_subdirectories(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut folders = Vec::new();
    for entry in fs::read_dir(root)? {
        let path = entry?.path();
        if path.is_dir() {
            folders.push(path);
        }
    }
    folders.sort();
    Ok(folders)
}

fn reset_dir(dir: &Path) -> io::Result<()> {
    if dir.exists() {
        fs::remove_dir_all(dir)?;
    }
    fs::create_dir_all(dir)
}
