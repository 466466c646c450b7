//! Transport capability consumed by the remote reporter.
//!
//! A sender buffers finished spans and emits them to an out-of-process agent
//! in batches. The wire encoding and the transport itself (UDP, HTTP) live
//! outside this crate; the reporter only relies on the contract below.

use crate::span::SpanData;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use thiserror::Error;

/// Failure of a sender operation.
///
/// `dropped_count` reports how many spans were lost with the failure, so the
/// reporter can keep its accounting exact.
#[derive(Error, Debug, Clone)]
#[error("{message} ({dropped_count} spans dropped)")]
pub struct SenderError {
    /// Human-readable description.
    pub message: String,
    /// Number of spans lost.
    pub dropped_count: usize,
}

impl SenderError {
    /// Build an error that dropped `dropped_count` spans.
    pub fn new(message: impl Into<String>, dropped_count: usize) -> Self {
        SenderError {
            message: message.into(),
            dropped_count,
        }
    }
}

/// Batched transport to an out-of-process collector agent.
///
/// All methods return the number of spans emitted as a side effect of the
/// call: `append` may flush a full batch autonomously, `flush` and `close`
/// emit whatever is buffered.
pub trait Sender: Send + Sync {
    /// Buffer one span. Returns the number of spans flushed autonomously, 0
    /// when the span was merely buffered.
    fn append(&self, span: SpanData) -> Result<usize, SenderError>;

    /// Flush buffered spans. Returns the number of spans emitted.
    fn flush(&self) -> Result<usize, SenderError>;

    /// Final flush plus release of transport resources.
    fn close(&self) -> Result<usize, SenderError>;
}

#[derive(Debug, Default)]
struct InMemorySenderState {
    appended: Vec<SpanData>,
    flushed: Vec<SpanData>,
    received: Vec<SpanData>,
    // None means appends are not gated
    permits: Option<usize>,
}

/// Sender that keeps everything in process memory; test support.
///
/// `permit_append` turns the sender into a gate: each append consumes one
/// permit and blocks while none are available, which emulates a stuck
/// transport.
#[derive(Clone, Debug, Default)]
pub struct InMemorySender {
    state: Arc<Mutex<InMemorySenderState>>,
    permit_released: Arc<Condvar>,
}

impl InMemorySender {
    /// Create a new in-memory sender.
    pub fn new() -> Self {
        InMemorySender::default()
    }

    /// Spans appended but not yet flushed.
    pub fn appended(&self) -> Vec<SpanData> {
        self.lock().appended.clone()
    }

    /// Spans flushed so far.
    pub fn flushed(&self) -> Vec<SpanData> {
        self.lock().flushed.clone()
    }

    /// Every span ever handed to `append`, in arrival order.
    pub fn received(&self) -> Vec<SpanData> {
        self.lock().received.clone()
    }

    /// Gate appends behind a fixed number of permits. Zero blocks the sender
    /// until more permits are granted.
    pub fn permit_append(&self, permits: usize) {
        self.lock().permits = Some(permits);
        self.permit_released.notify_all();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InMemorySenderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sender for InMemorySender {
    fn append(&self, span: SpanData) -> Result<usize, SenderError> {
        let mut state = self.lock();
        loop {
            match state.permits {
                None => break,
                Some(available) if available > 0 => {
                    state.permits = Some(available - 1);
                    break;
                }
                Some(_) => {
                    state = self
                        .permit_released
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
        state.received.push(span.clone());
        state.appended.push(span);
        Ok(0)
    }

    fn flush(&self) -> Result<usize, SenderError> {
        let mut state = self.lock();
        let flushed = state.appended.len();
        let drained: Vec<SpanData> = state.appended.drain(..).collect();
        state.flushed.extend(drained);
        Ok(flushed)
    }

    fn close(&self) -> Result<usize, SenderError> {
        self.flush()
    }
}
