//! Long-poll loop plumbing.
//!
//! A `PollTransport` performs one request. The `Poller` runs each request on
//! its own task, stamps the completion with the generation it was issued
//! under and sends it back to the owning session over a channel. Nothing is
//! ever aborted mid-flight: issuing a newer poll bumps the generation and the
//! session discards completions that no longer match.

pub mod http;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::PollError;
use crate::record::LogRecord;

/// Where the stream left off
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CursorState {
    /// Highest id ever merged, even if since evicted; 0 before the first batch
    pub last_id: u64,
    /// Opaque token from the server's `Uniq` header
    pub continuation_token: Option<String>,
}

impl CursorState {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PollRequest {
    pub last_id: u64,
    pub continuation_token: Option<String>,
    pub timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct PollResponse {
    /// Records in server order; never empty for a long-poll
    pub records: Vec<LogRecord>,
    pub continuation_token: Option<String>,
}

/// Trait for long-poll transports
#[async_trait::async_trait]
pub trait PollTransport: Send + Sync {
    /// Perform one long-poll request
    async fn poll(&self, request: &PollRequest) -> Result<PollResponse, PollError>;

    /// Get the display name for this stream
    fn name(&self) -> String;
}

/// Identifies which issued request a completion belongs to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct Generation(u64);

/// A finished request, delivered to the session
#[derive(Debug)]
pub struct PollOutcome {
    pub generation: Generation,
    pub result: Result<PollResponse, PollError>,
}

/// Issues long-poll requests, one logical poll at a time
pub struct Poller {
    transport: Arc<dyn PollTransport>,
    tx: mpsc::Sender<PollOutcome>,
    current: Arc<AtomicU64>,
    timeout: Duration,
    retry_delay: Duration,
    in_flight: Option<JoinHandle<()>>,
}

impl Poller {
    /// Create a poller and return the receiver its completions arrive on
    pub fn new(
        transport: Arc<dyn PollTransport>,
        timeout: Duration,
        retry_delay: Duration,
        buffer_size: usize,
    ) -> (Self, mpsc::Receiver<PollOutcome>) {
        let (tx, rx) = mpsc::channel(buffer_size);
        let poller = Self {
            transport,
            tx,
            current: Arc::new(AtomicU64::new(0)),
            timeout,
            retry_delay,
            in_flight: None,
        };
        (poller, rx)
    }

    pub fn transport_name(&self) -> String {
        self.transport.name()
    }

    pub fn current_generation(&self) -> Generation {
        Generation(self.current.load(Ordering::SeqCst))
    }

    pub fn is_current(&self, generation: Generation) -> bool {
        generation == self.current_generation()
    }

    /// Start a new logical poll from `cursor`, superseding any earlier one
    pub fn issue(&mut self, cursor: &CursorState) -> Generation {
        let generation = Generation(self.current.fetch_add(1, Ordering::SeqCst) + 1);
        self.spawn(generation, cursor, Duration::ZERO);
        generation
    }

    /// Re-run the logical poll `generation` after the retry delay. If a newer
    /// poll is issued before the delay elapses the retry is dropped.
    pub fn retry(&mut self, generation: Generation, cursor: &CursorState) {
        if !self.is_current(generation) {
            return;
        }
        self.spawn(generation, cursor, self.retry_delay);
    }

    fn spawn(&mut self, generation: Generation, cursor: &CursorState, delay: Duration) {
        let transport = Arc::clone(&self.transport);
        let tx = self.tx.clone();
        let current = Arc::clone(&self.current);
        let request = PollRequest {
            last_id: cursor.last_id,
            continuation_token: cursor.continuation_token.clone(),
            timeout: self.timeout,
        };

        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
                if current.load(Ordering::SeqCst) != generation.0 {
                    debug!(generation = generation.0, "retry superseded before sending");
                    return;
                }
            }

            debug!(
                generation = generation.0,
                last_id = request.last_id,
                token = request.continuation_token.as_deref().unwrap_or(""),
                "polling"
            );
            let result = transport.poll(&request).await;
            // Receiver dropped means the app is shutting down
            let _ = tx.send(PollOutcome { generation, result }).await;
        });

        // Superseded tasks are left to finish on their own
        self.in_flight = Some(handle);
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        if let Some(handle) = &self.in_flight {
            handle.abort();
        }
    }
}
