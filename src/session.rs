//! Connection session: lifecycle state and the single outbound write path.
//!
//! One `Session` exists per connection attempt. It owns the outbound
//! `MessageSink` and is the only thing that writes to it; every write takes
//! the same lock, so a fetch's metadata frame and body always go out as an
//! adjacent pair. After close or error the sink is dropped and further
//! sends fail with `SendError::Closed`, which callers treat as a silent drop.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::dispatch::Dispatcher;
use crate::fetch::Fetcher;
use crate::transport::protocol::{Codec, Op};
use crate::transport::{Inbound, MessageSink, TransportError, WireMessage};

/// Connection lifecycle.
///
/// `Connecting → Open → Closed`; `Errored` is reachable from `Connecting`
/// or `Open`. `Closed` and `Errored` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Open,
    Closed,
    Errored,
}

impl SessionState {
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Errored)
    }

    const fn can_enter(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Connecting, Self::Open | Self::Errored) | (Self::Open, Self::Closed | Self::Errored)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
            Self::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Outbound write failures.
#[derive(Debug, Error)]
pub enum SendError {
    /// The session is not open; the message was discarded.
    #[error("session is {0}, message dropped")]
    Closed(SessionState),

    /// The transport rejected the write; the session is now errored.
    #[error("transport write failed: {0}")]
    Transport(#[from] TransportError),
}

/// Live state of one connection attempt.
pub struct Session {
    codec: Codec,
    state: watch::Sender<SessionState>,
    /// The one outbound channel. `None` before open and after close/error.
    writer: Mutex<Option<Box<dyn MessageSink>>>,
    pending: AtomicUsize,
}

impl Session {
    /// Create a session in the `Connecting` state.
    pub fn new(codec: Codec) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            codec,
            state,
            writer: Mutex::new(None),
            pending: AtomicUsize::new(0),
        }
    }

    pub const fn codec(&self) -> &Codec {
        &self.codec
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Watch lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Number of fetches started on this session that have not finished.
    pub fn pending_fetches(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    /// Track an in-flight fetch until the returned guard is dropped.
    ///
    /// The guard owns a handle to the session so it can move into the
    /// fetch task; the count rises as soon as the fetch is dispatched.
    pub fn begin_fetch(self: &Arc<Self>) -> PendingFetch {
        self.pending.fetch_add(1, Ordering::Relaxed);
        PendingFetch {
            session: Arc::clone(self),
        }
    }

    /// Attempt a lifecycle transition. Returns whether it happened.
    fn transition(&self, next: SessionState) -> bool {
        let mut from = None;
        let changed = self.state.send_if_modified(|current| {
            from = Some(*current);
            if current.can_enter(next) {
                *current = next;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(from = ?from, to = %next, "Session state changed");
        } else {
            debug!(from = ?from, to = %next, "Ignoring invalid session transition");
        }
        changed
    }

    /// Install the outbound sink, enter `Open`, and send the INIT handshake.
    pub async fn open(&self, sink: Box<dyn MessageSink>, context: &str) -> Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        if !self.transition(SessionState::Open) {
            return Err(SendError::Closed(self.state()));
        }
        *writer = Some(sink);

        let init = self.codec.encode(&Op::Init, context);
        self.write_locked(&mut writer, [WireMessage::Text(init)]).await?;
        info!(context = %context, "Session open, handshake sent");
        Ok(())
    }

    /// Send one message.
    pub async fn send(&self, message: WireMessage) -> Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        self.write_locked(&mut writer, [message]).await
    }

    /// Send two messages back to back with no other write in between.
    pub async fn send_pair(&self, first: WireMessage, second: WireMessage) -> Result<(), SendError> {
        let mut writer = self.writer.lock().await;
        self.write_locked(&mut writer, [first, second]).await
    }

    async fn write_locked<const N: usize>(
        &self,
        writer: &mut Option<Box<dyn MessageSink>>,
        messages: [WireMessage; N],
    ) -> Result<(), SendError> {
        let state = self.state();
        let sink = match writer.as_mut() {
            Some(sink) if state == SessionState::Open => sink,
            _ => return Err(SendError::Closed(state)),
        };

        for message in messages {
            if let Err(e) = sink.send(message).await {
                warn!(error = %e, "Outbound write failed, session errored");
                self.transition(SessionState::Errored);
                *writer = None;
                return Err(e.into());
            }
        }
        Ok(())
    }

    /// Enter `Closed` and close the transport.
    pub async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if !self.transition(SessionState::Closed) {
            return;
        }
        if let Some(mut sink) = writer.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Error closing transport");
            }
        }
        info!(pending = self.pending_fetches(), "Session closed");
    }

    /// Enter `Errored` and drop the transport.
    pub async fn fail(&self, reason: &str) {
        let mut writer = self.writer.lock().await;
        if self.transition(SessionState::Errored) {
            *writer = None;
            warn!(reason = %reason, pending = self.pending_fetches(), "Session errored");
        }
    }

    /// Receive loop: decode each inbound text message and dispatch it, in
    /// arrival order, until the session reaches a terminal state.
    ///
    /// Returns the terminal state.
    pub async fn run<F: Fetcher + 'static>(
        &self,
        mut inbound: Inbound,
        dispatcher: &Dispatcher<F>,
    ) -> SessionState {
        let mut state_rx = self.subscribe();
        while self.state() == SessionState::Open {
            let item = tokio::select! {
                item = inbound.next() => item,
                // A failed outbound write can end the session while idle.
                _ = state_rx.changed() => continue,
            };
            match item {
                Some(Ok(WireMessage::Text(text))) => {
                    let frame = self.codec.decode(&text);
                    // Fetch tasks run detached; a closed session drops their results.
                    drop(dispatcher.handle(frame));
                }
                Some(Ok(WireMessage::Binary(bytes))) => {
                    debug!(bytes = bytes.len(), "Ignoring inbound binary message");
                }
                Some(Err(e)) => {
                    self.fail(&e.to_string()).await;
                }
                None => {
                    debug!("Controller closed the connection");
                    self.close().await;
                }
            }
        }
        self.state()
    }
}

/// In-flight fetch marker; decrements the session's pending count on drop.
pub struct PendingFetch {
    session: Arc<Session>,
}

impl PendingFetch {
    pub fn session(&self) -> &Session {
        &self.session
    }
}

impl Drop for PendingFetch {
    fn drop(&mut self) {
        self.session.pending.fetch_sub(1, Ordering::Relaxed);
    }
}
