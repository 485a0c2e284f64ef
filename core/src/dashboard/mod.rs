// Dashboard module - HTTP host for discovered dashboards
//
// Discovery builds one endpoint registry per dashboard folder; the server
// exposes them as JSON and streams poller updates over SSE.

mod api;
mod event_stream;
mod registry;

pub use api::{router, DashboardServer};
pub use event_stream::{PushUpdate, UpdateBroadcaster};
pub use registry::{DashboardHost, DataSourceRegistry, MountedDashboard};
