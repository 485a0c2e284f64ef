// Dashboard plugin system
//
// Dashboards are compiled in and registered into a catalog by name. At
// startup the host matches folders under the dashboards root against the
// catalog and builds each plugin's data sources.

use crate::source::DataSource;
use crate::{HomeboardError, Result};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

type BuildFn = dyn Fn(&SourceContext) -> Result<Arc<dyn DataSource>> + Send + Sync;

/// Everything a data source gets at construction
#[derive(Clone, Debug)]
pub struct SourceContext {
    /// Dashboard folder name
    pub dashboard: String,
    /// Scratch storage, wiped at every startup
    pub scratch_dir: PathBuf,
    pub secret_key: String,
    /// Directory served under `/static`
    pub static_dir: PathBuf,
    /// The `[dashboards.<name>]` table from the config file
    pub settings: toml::Table,
}

impl SourceContext {
    /// Deserialize one sub-table of the dashboard settings; missing tables
    /// yield `T::default()`.
    pub fn section<T>(&self, key: &str) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.settings.get(key) {
            Some(value) => value.clone().try_into().map_err(|e: toml::de::Error| {
                HomeboardError::ConfigError(format!(
                    "dashboards.{}.{}: {}",
                    self.dashboard, key, e
                ))
            }),
            None => Ok(T::default()),
        }
    }
}

/// Constructor for one data source of a dashboard
#[derive(Clone)]
pub struct SourceFactory {
    module: String,
    build: Arc<BuildFn>,
}

impl SourceFactory {
    pub fn new<F>(module: impl Into<String>, build: F) -> Self
    where
        F: Fn(&SourceContext) -> Result<Arc<dyn DataSource>> + Send + Sync + 'static,
    {
        Self {
            module: module.into(),
            build: Arc::new(build),
        }
    }

    /// Name the source is known by in logs
    pub fn module(&self) -> &str {
        &self.module
    }

    pub fn build(&self, ctx: &SourceContext) -> Result<Arc<dyn DataSource>> {
        (self.build)(ctx)
    }
}

impl fmt::Debug for SourceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceFactory")
            .field("module", &self.module)
            .finish()
    }
}

/// A dashboard unit: one URL namespace with its data sources
pub trait DashboardPlugin: Send + Sync {
    /// Must match the dashboard's folder name under the dashboards root
    fn name(&self) -> &str;

    /// Page template, relative to the dashboard folder
    fn template(&self) -> &str {
        "templates/dashboard.html"
    }

    fn data_sources(&self) -> Vec<SourceFactory>;
}

/// Compile-time table of known dashboards
#[derive(Default)]
pub struct DashboardCatalog {
    plugins: HashMap<String, Arc<dyn DashboardPlugin>>,
}

impl DashboardCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a dashboard plugin
    pub fn register(&mut self, plugin: Arc<dyn DashboardPlugin>) {
        let name = plugin.name().to_string();
        if self.plugins.insert(name.clone(), plugin).is_some() {
            warn!(target: "plugin", dashboard = %name, "Replaced previously registered dashboard");
        } else {
            info!(target: "plugin", dashboard = %name, "Registered dashboard plugin");
        }
    }

    pub fn with(mut self, plugin: Arc<dyn DashboardPlugin>) -> Self {
        self.register(plugin);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn DashboardPlugin>> {
        self.plugins.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
