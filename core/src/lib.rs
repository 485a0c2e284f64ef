// Homeboard Core Library
// Household dashboard runtime: data sources, pollers, plugin discovery, HTTP host

pub mod config;
pub mod dashboard;
pub mod plugin;
pub mod poller;
pub mod source;

// Export core types
pub use config::HomeboardConfig;
pub use dashboard::{DashboardHost, DashboardServer, PushUpdate, UpdateBroadcaster};
pub use plugin::{DashboardCatalog, DashboardPlugin, SourceContext, SourceFactory};
pub use poller::{ChangeDetectingPoller, PollerOptions};
pub use source::{DataSource, Envelope, FetchOutcome, SourceError};

// Error types
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HomeboardError {
    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Plugin error: {0}")]
    PluginError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}
pub type Result<T> = std::result::Result<T, HomeboardError>;
