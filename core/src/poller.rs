// Change-detecting poller
//
// Wraps a data source, polls it on a fixed interval and broadcasts
// `<endpoint>_update` only when the snapshot differs from the last observed
// one. The same state backs on-demand HTTP fetches.

use crate::dashboard::{PushUpdate, UpdateBroadcaster};
use crate::source::{
    entity_tag, if_none_match, update_event_name, DataSource, Envelope, FetchOutcome, SourceError,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Timing knobs for a poller
#[derive(Clone, Debug)]
pub struct PollerOptions {
    /// Sleep between two polls
    pub interval: Duration,
    /// Upper bound for a single `get_data()` call
    pub fetch_timeout: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(90),
            fetch_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Default)]
struct Observed {
    // None until the first successful observation
    last: Option<Value>,
    last_issued: f64,
}

// Store `value` when it differs from the last observation
fn replace_if_changed(state: &mut Observed, value: &Value) -> bool {
    if state.last.as_ref() == Some(value) {
        return false;
    }
    state.last = Some(value.clone());
    true
}

/// Polls one data source and broadcasts its changes
pub struct ChangeDetectingPoller {
    source: Arc<dyn DataSource>,
    broadcaster: UpdateBroadcaster,
    options: PollerOptions,
    state: Mutex<Observed>,
}

impl ChangeDetectingPoller {
    pub fn new(
        source: Arc<dyn DataSource>,
        broadcaster: UpdateBroadcaster,
        options: PollerOptions,
    ) -> Self {
        Self {
            source,
            broadcaster,
            options,
            state: Mutex::new(Observed::default()),
        }
    }

    pub fn endpoint_name(&self) -> &str {
        self.source.endpoint_name()
    }

    /// Last value seen by either the poll loop or an on-demand fetch
    pub async fn last_observed(&self) -> Option<Value> {
        self.state.lock().await.last.clone()
    }

    async fn snapshot(&self) -> Result<Value, SourceError> {
        match tokio::time::timeout(self.options.fetch_timeout, self.source.get_data()).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(self.options.fetch_timeout.as_secs())),
        }
    }

    /// Run one poll tick. Returns whether an update was broadcast.
    pub async fn poll_once(&self) -> Result<bool, SourceError> {
        let data = self.snapshot().await?;

        // Broadcast under the lock so updates leave in observation order
        let mut state = self.state.lock().await;
        if !replace_if_changed(&mut state, &data) {
            debug!(target: "poller", endpoint = %self.endpoint_name(), "No change");
            return Ok(false);
        }
        self.broadcaster.broadcast(PushUpdate {
            event: update_event_name(self.endpoint_name()),
            data,
        });
        debug!(target: "poller", endpoint = %self.endpoint_name(), "Broadcast update");
        Ok(true)
    }

    /// Poll forever. Failed ticks are logged and skipped.
    pub async fn run(self: Arc<Self>) {
        info!(
            target: "poller",
            endpoint = %self.endpoint_name(),
            interval_secs = self.options.interval.as_secs(),
            "Starting poller"
        );
        loop {
            if let Err(e) = self.poll_once().await {
                warn!(
                    target: "poller",
                    endpoint = %self.endpoint_name(),
                    error = %e,
                    "Poll failed; keeping last observed data"
                );
            }
            tokio::time::sleep(self.options.interval).await;
        }
    }

    /// Spawn the poll loop on the tokio runtime
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(Arc::clone(self).run())
    }

    /// On-demand fetch for HTTP callers. Always calls the source; updates the
    /// observed value as a side effect.
    pub async fn fetch(&self) -> Result<FetchOutcome, SourceError> {
        self.fetch_if_none_match(None).await
    }

    /// Like [`fetch`](Self::fetch), but answers `NotModified` when the source
    /// opts into conditional fetches and the client's `If-None-Match` value
    /// still names the current snapshot.
    pub async fn fetch_if_none_match(
        &self,
        client_tags: Option<&str>,
    ) -> Result<FetchOutcome, SourceError> {
        let data = self.snapshot().await?;

        let mut state = self.state.lock().await;
        replace_if_changed(&mut state, &data);

        if self.source.conditional_fetch() {
            if let Some(header) = client_tags {
                if if_none_match(header, &entity_tag(&data)) {
                    return Ok(FetchOutcome::NotModified);
                }
            }
        }

        // Never hand out a timestamp older than the previous one
        let now = chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0;
        let last_update_time = now.max(state.last_issued);
        state.last_issued = last_update_time;

        Ok(FetchOutcome::Fresh(Envelope {
            endpoint: self.endpoint_name().to_string(),
            last_update_time,
            data,
        }))
    }
}
