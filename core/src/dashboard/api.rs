// Dashboard HTTP server
//
// Mounts every discovered dashboard under /dashboard/<n>, serves the data
// endpoints as JSON and streams push updates over SSE.

use crate::config::HomeboardConfig;
use crate::dashboard::registry::{DashboardHost, MountedDashboard};
use crate::source::{entity_tag, FetchOutcome};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive},
        Html, IntoResponse, Redirect, Response, Sse,
    },
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{info, warn};

/// Server state
#[derive(Clone)]
struct ServerState {
    host: Arc<DashboardHost>,
}

impl ServerState {
    fn dashboard(&self, index: &str) -> Option<&Arc<MountedDashboard>> {
        index
            .parse::<usize>()
            .ok()
            .and_then(|i| self.host.dashboard(i))
    }
}

/// Dashboard HTTP server
pub struct DashboardServer {
    config: HomeboardConfig,
    host: DashboardHost,
}

impl DashboardServer {
    pub fn new(config: HomeboardConfig, host: DashboardHost) -> Self {
        Self { config, host }
    }

    /// Start pollers, bind the configured address and serve until shutdown
    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = self.config.addr();
        info!(
            target: "dashboard",
            addr = %addr,
            "Starting Dashboard server"
        );
        let listener = TcpListener::bind(&addr).await?;
        self.serve_with_listener(listener).await
    }

    /// Same as [`serve`](Self::serve) on an already bound listener
    pub async fn serve_with_listener(
        mut self,
        listener: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.host.start_pollers();

        let app = router(Arc::new(self.host), &self.config);

        info!(
            target: "dashboard",
            url = %format!("http://{}", listener.local_addr()?),
            "Dashboard server ready"
        );

        axum::serve(listener, app).await?;

        Ok(())
    }
}

/// Build the HTTP router over a discovered host
pub fn router(host: Arc<DashboardHost>, config: &HomeboardConfig) -> Router {
    let state = ServerState { host };

    Router::new()
        .route("/", get(index_handler))
        .route("/events", get(events_handler))
        .route("/dashboard/:index", get(page_handler))
        .route("/dashboard/:index/", get(page_handler))
        .route("/dashboard/:index/api/:endpoint", get(api_handler))
        .nest_service("/static", ServeDir::new(&config.static_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

const FALLBACK_PAGE: &str = r#"<!DOCTYPE html><html><head><meta charset="utf-8"><title>Homeboard</title></head><body><h1>{{ name }}</h1><p>No page template found. Data endpoints:</p><ul>{{ endpoints }}</ul></body></html>"#;

fn not_found(message: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
}

async fn index_handler(State(state): State<ServerState>) -> Response {
    match state.host.dashboards().first() {
        Some(first) => Redirect::temporary(&format!("{}/", first.url_prefix())).into_response(),
        None => Html("<!DOCTYPE html><html><body><h1>No dashboards loaded</h1></body></html>")
            .into_response(),
    }
}

/// Render the dashboard page with its URL prefix filled in
async fn page_handler(State(state): State<ServerState>, Path(index): Path<String>) -> Response {
    let dashboard = match state.dashboard(&index) {
        Some(dashboard) => dashboard,
        None => return not_found("Unknown dashboard"),
    };
    let prefix = dashboard.url_prefix();

    let page = match tokio::fs::read_to_string(&dashboard.template).await {
        Ok(template) => template,
        Err(e) => {
            warn!(
                target: "dashboard",
                template = %dashboard.template.display(),
                error = %e,
                "Template not readable; serving fallback page"
            );
            let endpoints: String = dashboard
                .registry
                .names()
                .iter()
                .map(|n| format!(r#"<li><a href="{{{{ url_prefix }}}}/api/{n}">{n}</a></li>"#))
                .collect();
            FALLBACK_PAGE
                .replace("{{ name }}", &dashboard.name)
                .replace("{{ endpoints }}", &endpoints)
        }
    };

    Html(
        page.replace("{{ url_prefix }}", &prefix)
            .replace("{{url_prefix}}", &prefix),
    )
    .into_response()
}

/// Serve one data endpoint of a dashboard
async fn api_handler(
    State(state): State<ServerState>,
    Path((index, endpoint)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    let dashboard = match state.dashboard(&index) {
        Some(dashboard) => dashboard,
        None => return not_found("Unknown dashboard"),
    };
    let poller = match dashboard.registry.get(&endpoint) {
        Some(poller) => poller,
        None => return not_found("Unknown data endpoint"),
    };

    let client_tags = headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok());

    match poller.fetch_if_none_match(client_tags).await {
        Ok(FetchOutcome::Fresh(envelope)) => {
            let tag = entity_tag(&envelope.data);
            (StatusCode::OK, [(header::ETAG, tag)], Json(envelope)).into_response()
        }
        Ok(FetchOutcome::NotModified) => StatusCode::NOT_MODIFIED.into_response(),
        Err(e) => {
            warn!(
                target: "dashboard",
                dashboard = %dashboard.name,
                endpoint = %endpoint,
                error = %e,
                "Data endpoint failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

// Logs when the SSE stream holding it is dropped
struct ClientGuard;

impl Drop for ClientGuard {
    fn drop(&mut self) {
        info!(target: "dashboard", "Client disconnected");
    }
}

/// SSE endpoint for `<endpoint>_update` events
async fn events_handler(
    State(state): State<ServerState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    info!(target: "dashboard", "Client connected");

    let guard = ClientGuard;
    let rx = state.host.broadcaster().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(move |result| {
        let _connected = &guard;
        match result {
            Ok(update) => match serde_json::to_string(&update.data) {
                Ok(json) => Some(Ok(Event::default().event(&update.event).data(json))),
                Err(e) => {
                    warn!(target: "dashboard", error = %e, "Failed to serialize update");
                    None
                }
            },
            Err(e) => {
                warn!(target: "dashboard", error = %e, "Broadcast error");
                None
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
