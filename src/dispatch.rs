//! Command dispatch and fetch execution.
//!
//! The `Dispatcher` routes decoded frames by operation. SCRAPE frames go to
//! the `Executor`, which runs each fetch as its own task so the receive loop
//! keeps going while fetches are in flight, then streams the result back as
//! a CONTENT metadata frame followed by the raw body.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::fetch::{FetchRequest, Fetcher};
use crate::session::{PendingFetch, SendError, Session, SessionState};
use crate::transport::protocol::{Frame, Op};
use crate::transport::WireMessage;

/// Routes inbound frames to their handlers.
pub struct Dispatcher<F> {
    session: Arc<Session>,
    executor: Executor<F>,
}

impl<F: Fetcher + 'static> Dispatcher<F> {
    pub fn new(session: Arc<Session>, fetcher: Arc<F>) -> Self {
        let executor = Executor::new(Arc::clone(&session), fetcher);
        Self { session, executor }
    }

    /// Route one frame.
    ///
    /// Returns the handle of the spawned fetch task for SCRAPE frames, and
    /// `None` for everything else. Never fails: unknown or misdirected
    /// operations are logged and ignored.
    pub fn handle(&self, frame: Frame<'_>) -> Option<JoinHandle<()>> {
        let state = self.session.state();
        if state != SessionState::Open {
            debug!(op = %frame.op, %state, "Session not open, ignoring frame");
            return None;
        }

        match frame.operation() {
            Op::Debug => {
                info!(message = %frame.payload, "Controller message");
                None
            }
            Op::Scrape => {
                // The target is passed on exactly as received.
                let url = frame.payload;
                if url.is_empty() {
                    warn!("Scrape command without a target url");
                    return None;
                }
                info!(url = %url, "Scrape requested");
                Some(self.executor.fetch(FetchRequest::new(url)))
            }
            op @ (Op::Init | Op::Content) => {
                warn!(op = %op, "Ignoring agent-to-controller operation received from controller");
                None
            }
            Op::Unknown(tag) => {
                warn!(op = %tag.escape_debug(), payload_len = frame.payload.len(), "Unknown operation");
                None
            }
        }
    }
}

/// Performs fetches and streams their results through the session.
pub struct Executor<F> {
    session: Arc<Session>,
    fetcher: Arc<F>,
}

impl<F: Fetcher + 'static> Executor<F> {
    pub const fn new(session: Arc<Session>, fetcher: Arc<F>) -> Self {
        Self { session, fetcher }
    }

    /// Start a fetch on its own task. It counts as pending from this call on.
    pub fn fetch(&self, request: FetchRequest) -> JoinHandle<()> {
        let pending = self.session.begin_fetch();
        let fetcher = Arc::clone(&self.fetcher);
        tokio::spawn(async move { execute(pending, fetcher.as_ref(), request).await })
    }
}

async fn execute<F: Fetcher + ?Sized>(pending: PendingFetch, fetcher: &F, request: FetchRequest) {
    let session = pending.session();

    let result = match fetcher.fetch(&request).await {
        Ok(result) => result,
        Err(e) => {
            warn!(url = %request.url, error = %e, "Fetch failed");
            return;
        }
    };

    let status = result.status;
    let bytes = result.body.len();
    let metadata = session.codec().content_metadata(status, &result.headers);

    match session
        .send_pair(WireMessage::Text(metadata), WireMessage::Binary(result.body))
        .await
    {
        Ok(()) => info!(url = %request.url, status, bytes, "Streamed fetch result"),
        Err(SendError::Closed(state)) => {
            debug!(url = %request.url, %state, "Session gone, dropping fetch result");
        }
        Err(e) => warn!(url = %request.url, error = %e, "Failed to stream fetch result"),
    }
}
