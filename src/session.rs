//! The session context: sole owner of the buffer, cursor, filter, search and
//! follow state.
//!
//! Every mutation goes through `Session` on the event-loop task. Poll
//! completions arrive as `PollOutcome`s and are either applied (merge, evict,
//! re-poll, render) or discarded when their generation has been superseded.

use std::mem;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::buffer::{EvictionPolicy, evict, merge};
use crate::config::{Config, DEFAULT_CHANNEL_BUFFER};
use crate::filter::{SearchTerm, visible};
use crate::follow::{FollowController, FollowEvent, FollowState};
use crate::highlight::highlight;
use crate::poller::{CursorState, PollOutcome, PollTransport, Poller};
use crate::prefs::{ConfigProvider, LEVEL_KEY, LINE_WRAP_KEY};
use crate::record::{Level, LogRecord};
use crate::render::{DisplayLine, render};

/// Receives each render pass
pub trait RenderTarget {
    /// Replace the whole display content
    fn replace(&mut self, lines: Vec<DisplayLine>);

    /// Move the viewport to the newest line
    fn scroll_to_bottom(&mut self);
}

/// What happened to a poll completion
#[derive(Debug, PartialEq, Eq)]
pub enum PollStatus {
    /// Superseded by a newer poll; nothing changed
    Stale,
    /// Batch merged, view re-rendered and the next poll issued
    Merged { received: usize },
    /// The poll failed and will be retried after the fixed delay
    Retrying,
}

/// Run the display pipeline over a buffer: filter, render, highlight
pub fn compose(buffer: &[LogRecord], threshold: Level, search: &SearchTerm) -> Vec<DisplayLine> {
    highlight(render(&visible(buffer, threshold)), search)
}

pub struct Session {
    buffer: Vec<LogRecord>,
    cursor: CursorState,
    threshold: Level,
    search: SearchTerm,
    follow: FollowController,
    line_wrap: bool,
    /// False from the first failed poll until the next success
    connected: bool,
    max_buffer: usize,
    eviction: EvictionPolicy,
    poller: Poller,
    prefs: Box<dyn ConfigProvider>,
}

impl Session {
    /// Build a session and return the receiver poll completions arrive on.
    /// Nothing is requested until `start` is called.
    pub fn new(
        config: &Config,
        transport: Arc<dyn PollTransport>,
        prefs: Box<dyn ConfigProvider>,
    ) -> (Self, mpsc::Receiver<PollOutcome>) {
        let (poller, rx) = Poller::new(
            transport,
            config.poll_timeout,
            config.retry_delay,
            DEFAULT_CHANNEL_BUFFER,
        );

        let threshold = prefs
            .get(LEVEL_KEY)
            .and_then(|name| Level::parse(&name))
            .unwrap_or_default();
        let line_wrap = prefs.get(LINE_WRAP_KEY).as_deref() != Some("false");

        let session = Self {
            buffer: Vec::with_capacity(config.max_buffer.min(4096)),
            cursor: CursorState::default(),
            threshold,
            search: SearchTerm::default(),
            follow: FollowController::new(config.follow_proximity),
            line_wrap,
            connected: true,
            max_buffer: config.max_buffer,
            eviction: config.eviction,
            poller,
            prefs,
        };
        (session, rx)
    }

    /// Issue the first poll
    pub fn start(&mut self) {
        info!(
            stream = %self.poller.transport_name(),
            threshold = self.threshold.as_str(),
            "starting stream"
        );
        self.poller.issue(&self.cursor);
    }

    /// Apply a poll completion. Stale completions change nothing.
    pub fn handle_outcome(
        &mut self,
        outcome: PollOutcome,
        target: &mut dyn RenderTarget,
    ) -> PollStatus {
        if !self.poller.is_current(outcome.generation) {
            debug!(generation = ?outcome.generation, "discarding stale poll result");
            return PollStatus::Stale;
        }

        match outcome.result {
            Ok(response) => {
                let received = response.records.len();
                self.cursor.continuation_token = response.continuation_token;
                if let Some(max_id) = response.records.iter().map(|r| r.id).max() {
                    self.cursor.last_id = max_id;
                }

                let buffer = merge(mem::take(&mut self.buffer), response.records);
                self.buffer = evict(buffer, self.max_buffer, self.eviction);

                if !self.connected {
                    info!("stream reconnected");
                }
                self.connected = true;
                debug!(
                    received,
                    last_id = self.cursor.last_id,
                    buffered = self.buffer.len(),
                    "merged batch"
                );

                self.poller.issue(&self.cursor);
                self.render_into(target);
                PollStatus::Merged { received }
            }
            Err(e) => {
                if e.is_timeout() {
                    debug!("poll timed out, retrying");
                } else {
                    warn!(error = %e, "poll failed, retrying");
                }
                self.connected = false;
                self.poller.retry(outcome.generation, &self.cursor);
                PollStatus::Retrying
            }
        }
    }

    /// One render pass: full replace of the target, then the follow side
    /// effect. Returns the number of visible records.
    pub fn render_into(&self, target: &mut dyn RenderTarget) -> usize {
        let lines = compose(&self.buffer, self.threshold, &self.search);
        let count = lines.len();
        target.replace(lines);
        if self.follow.should_scroll_to_bottom(count, self.max_buffer) {
            target.scroll_to_bottom();
        }
        count
    }

    /// Change the severity threshold. A change persists the choice, empties
    /// the buffer, zeroes the cursor and restarts polling so the server
    /// re-sends history. Returns whether anything changed.
    pub fn set_threshold(&mut self, level: Level) -> bool {
        if level == self.threshold {
            return false;
        }

        self.threshold = level;
        if let Err(e) = self.prefs.set(LEVEL_KEY, level.as_str()) {
            warn!(error = %e, "could not save severity threshold");
        }

        self.buffer.clear();
        self.cursor.reset();
        info!(threshold = level.as_str(), "threshold changed, restarting stream");
        self.poller.issue(&self.cursor);
        true
    }

    /// Use `level` for this run only. Must be called before `start`.
    pub fn override_threshold(&mut self, level: Level) {
        self.threshold = level;
    }

    pub fn set_search(&mut self, search: SearchTerm) {
        self.search = search;
    }

    /// Drop every buffered record. The cursor is kept, so only newer
    /// records will show up.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn toggle_line_wrap(&mut self) -> bool {
        self.line_wrap = !self.line_wrap;
        let value = if self.line_wrap { "true" } else { "false" };
        if let Err(e) = self.prefs.set(LINE_WRAP_KEY, value) {
            warn!(error = %e, "could not save line wrap preference");
        }
        self.line_wrap
    }

    pub fn follow(&mut self, event: FollowEvent) -> FollowState {
        self.follow.handle(event)
    }

    pub fn toggle_follow(&mut self) -> FollowState {
        self.follow.toggle()
    }

    pub fn follow_state(&self) -> FollowState {
        self.follow.state()
    }

    pub fn threshold(&self) -> Level {
        self.threshold
    }

    pub fn search(&self) -> &SearchTerm {
        &self.search
    }

    pub fn line_wrap(&self) -> bool {
        self.line_wrap
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn cursor(&self) -> &CursorState {
        &self.cursor
    }

    pub fn buffer(&self) -> &[LogRecord] {
        &self.buffer
    }

    pub fn max_buffer(&self) -> usize {
        self.max_buffer
    }

    pub fn stream_name(&self) -> String {
        self.poller.transport_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PollError;
    use crate::poller::scripted::ScriptedTransport;
    use crate::prefs::MemoryPrefs;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingTarget {
        renders: Vec<Vec<DisplayLine>>,
        scrolls: usize,
    }

    impl RenderTarget for RecordingTarget {
        fn replace(&mut self, lines: Vec<DisplayLine>) {
            self.renders.push(lines);
        }

        fn scroll_to_bottom(&mut self) {
            self.scrolls += 1;
        }
    }

    fn rec(id: u64, level: Level) -> LogRecord {
        LogRecord::new(id, level, &format!("record {}", id))
    }

    fn session_with(
        transport: &Arc<ScriptedTransport>,
        config: Config,
        prefs: MemoryPrefs,
    ) -> (Session, mpsc::Receiver<PollOutcome>) {
        Session::new(&config, transport.clone(), Box::new(prefs))
    }

    fn session(transport: &Arc<ScriptedTransport>) -> (Session, mpsc::Receiver<PollOutcome>) {
        session_with(transport, Config::default(), MemoryPrefs::default())
    }

    /// Let freshly spawned poll tasks reach the transport
    async fn settle() {
        for _ in 0..4 {
            tokio::task::yield_now().await;
        }
    }

    fn ids(session: &Session) -> Vec<u64> {
        session.buffer().iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_preferences_default_and_load() {
        let transport = Arc::new(ScriptedTransport::default());
        let (session, _rx) = session(&transport);
        assert_eq!(session.threshold(), Level::Debug);
        assert!(session.line_wrap());

        let mut prefs = MemoryPrefs::default();
        prefs.set(LEVEL_KEY, "error").unwrap();
        prefs.set(LINE_WRAP_KEY, "false").unwrap();
        let (session, _rx) = session_with(&transport, Config::default(), prefs);
        assert_eq!(session.threshold(), Level::Error);
        assert!(!session.line_wrap());

        let mut prefs = MemoryPrefs::default();
        prefs.set(LEVEL_KEY, "loud").unwrap();
        let (session, _rx) = session_with(&transport, Config::default(), prefs);
        assert_eq!(session.threshold(), Level::Debug);
    }

    #[tokio::test]
    async fn test_success_advances_cursor_merges_and_repolls() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_batch(
            vec![rec(1, Level::Info), rec(3, Level::Warn), rec(2, Level::Debug)],
            "u1",
        );
        let (mut session, mut rx) = session(&transport);
        let mut target = RecordingTarget::default();

        session.start();
        let outcome = rx.recv().await.unwrap();
        assert_eq!(
            session.handle_outcome(outcome, &mut target),
            PollStatus::Merged { received: 3 }
        );

        assert_eq!(ids(&session), vec![1, 2, 3]);
        assert_eq!(session.cursor().last_id, 3);
        assert_eq!(session.cursor().continuation_token.as_deref(), Some("u1"));
        assert_eq!(target.renders.len(), 1);
        assert_eq!(target.renders[0].len(), 3);
        assert_eq!(target.scrolls, 1);

        // The next poll went out immediately with the advanced cursor
        settle().await;
        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].last_id, 0);
        assert_eq!(requests[0].continuation_token, None);
        assert_eq!(requests[1].last_id, 3);
        assert_eq!(requests[1].continuation_token.as_deref(), Some("u1"));
    }

    #[tokio::test]
    async fn test_consecutive_batches_dedup_last_copy_wins() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_batch(vec![rec(1, Level::Info), rec(2, Level::Info)], "u");
        let mut updated = rec(2, Level::Error);
        updated.message = "updated".into();
        transport.push_batch(vec![updated, rec(4, Level::Info)], "u");
        let (mut session, mut rx) = session(&transport);
        let mut target = RecordingTarget::default();

        session.start();
        for _ in 0..2 {
            let outcome = rx.recv().await.unwrap();
            session.handle_outcome(outcome, &mut target);
        }

        assert_eq!(ids(&session), vec![1, 2, 4]);
        assert_eq!(session.buffer()[1].message, "updated");
        assert_eq!(session.cursor().last_id, 4);
    }

    #[tokio::test]
    async fn test_stale_outcome_changes_nothing() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_batch(vec![rec(10, Level::Info)], "old");
        let (mut session, mut rx) = session(&transport);
        let mut target = RecordingTarget::default();

        session.start();
        let stale = rx.recv().await.unwrap();
        assert!(session.set_threshold(Level::Warn));

        assert_eq!(session.handle_outcome(stale, &mut target), PollStatus::Stale);
        assert!(session.buffer().is_empty());
        assert_eq!(session.cursor(), &CursorState::default());
        assert!(target.renders.is_empty());
        assert_eq!(target.scrolls, 0);
    }

    #[tokio::test]
    async fn test_threshold_change_resets_and_repolls() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_batch(vec![rec(5, Level::Info), rec(6, Level::Error)], "u5");
        let (mut session, mut rx) = session(&transport);
        let mut target = RecordingTarget::default();

        session.start();
        let outcome = rx.recv().await.unwrap();
        session.handle_outcome(outcome, &mut target);
        assert_eq!(session.cursor().last_id, 6);

        assert!(session.set_threshold(Level::Error));
        assert!(session.buffer().is_empty());
        assert_eq!(session.cursor().last_id, 0);
        assert_eq!(session.threshold(), Level::Error);

        settle().await;
        let requests = transport.requests();
        assert_eq!(requests.last().unwrap().last_id, 0);
        assert_eq!(requests.len(), 3);

        // Same level again is a no-op
        assert!(!session.set_threshold(Level::Error));
    }

    #[tokio::test]
    async fn test_threshold_is_persisted() {
        let transport = Arc::new(ScriptedTransport::default());
        let (mut session, _rx) = session(&transport);
        session.set_threshold(Level::Info);
        assert_eq!(session.prefs.get(LEVEL_KEY).as_deref(), Some("info"));
        session.toggle_line_wrap();
        assert_eq!(session.prefs.get(LINE_WRAP_KEY).as_deref(), Some("false"));
    }

    #[test]
    fn test_threshold_override_is_not_persisted() {
        let transport = Arc::new(ScriptedTransport::default());
        let (mut session, _rx) = session(&transport);
        session.override_threshold(Level::Warn);
        assert_eq!(session.threshold(), Level::Warn);
        assert_eq!(session.prefs.get(LEVEL_KEY), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_retries_after_fixed_delay() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(Err(PollError::Status(503)));
        transport.push(Err(PollError::EmptyBatch));
        transport.push_batch(vec![rec(1, Level::Info)], "u");
        let (mut session, mut rx) = session(&transport);
        let mut target = RecordingTarget::default();

        session.start();
        let started = tokio::time::Instant::now();

        let outcome = rx.recv().await.unwrap();
        assert_eq!(session.handle_outcome(outcome, &mut target), PollStatus::Retrying);
        assert!(!session.is_connected());
        assert!(target.renders.is_empty());

        let outcome = rx.recv().await.unwrap();
        assert_eq!(session.handle_outcome(outcome, &mut target), PollStatus::Retrying);

        let outcome = rx.recv().await.unwrap();
        assert_eq!(
            session.handle_outcome(outcome, &mut target),
            PollStatus::Merged { received: 1 }
        );
        assert!(session.is_connected());

        // Two retries, no growth between them
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(2000));
        assert!(elapsed < Duration::from_millis(2100));

        // Retries re-sent the same cursor
        let requests = transport.requests();
        assert!(requests[..3].iter().all(|r| r.last_id == 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_retry_superseded_by_reset() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push(Err(PollError::Status(500)));
        let (mut session, mut rx) = session(&transport);
        let mut target = RecordingTarget::default();

        session.start();
        let outcome = rx.recv().await.unwrap();
        assert_eq!(session.handle_outcome(outcome, &mut target), PollStatus::Retrying);

        session.set_threshold(Level::Warn);
        tokio::time::sleep(Duration::from_secs(5)).await;

        // The initial poll and the post-reset poll; the retry never fired
        assert_eq!(transport.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_eviction_applies_cap() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_batch(
            vec![rec(1, Level::Info), rec(2, Level::Info), rec(3, Level::Info)],
            "u",
        );
        let config = Config {
            max_buffer: 2,
            ..Config::default()
        };
        let (mut session, mut rx) = session_with(&transport, config, MemoryPrefs::default());
        let mut target = RecordingTarget::default();

        session.start();
        let outcome = rx.recv().await.unwrap();
        session.handle_outcome(outcome, &mut target);

        assert_eq!(ids(&session), vec![2, 3]);
        // lastId still remembers the highest id merged
        assert_eq!(session.cursor().last_id, 3);
        // Visible count reached the cap, so no forced scroll
        assert_eq!(target.scrolls, 0);
    }

    #[tokio::test]
    async fn test_render_respects_threshold_and_search() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_batch(
            vec![rec(1, Level::Error), rec(2, Level::Debug), rec(3, Level::Warn)],
            "u",
        );
        let mut prefs = MemoryPrefs::default();
        prefs.set(LEVEL_KEY, "warn").unwrap();
        let (mut session, mut rx) = session_with(&transport, Config::default(), prefs);
        let mut target = RecordingTarget::default();

        session.start();
        let outcome = rx.recv().await.unwrap();
        session.handle_outcome(outcome, &mut target);

        let shown: Vec<u64> = target.renders[0].iter().map(|l| l.id).collect();
        assert_eq!(shown, vec![1, 3]);

        session.set_search(SearchTerm::new("record 3".into(), false));
        session.render_into(&mut target);
        let emphasized: Vec<bool> = target.renders[1]
            .iter()
            .map(|l| l.fragments.iter().any(|f| f.segments.iter().any(|s| s.emphasized)))
            .collect();
        assert_eq!(emphasized, vec![false, true]);
    }

    #[tokio::test]
    async fn test_paused_session_does_not_scroll() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_batch(vec![rec(1, Level::Info)], "u");
        let (mut session, mut rx) = session(&transport);
        let mut target = RecordingTarget::default();

        session.follow(FollowEvent::Wheel);
        session.start();
        let outcome = rx.recv().await.unwrap();
        session.handle_outcome(outcome, &mut target);

        assert_eq!(target.renders.len(), 1);
        assert_eq!(target.scrolls, 0);
        assert_eq!(
            session.follow(FollowEvent::ViewportMoved { distance: 0 }),
            FollowState::Following
        );
    }

    #[tokio::test]
    async fn test_clear_keeps_cursor() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_batch(vec![rec(8, Level::Info)], "u");
        let (mut session, mut rx) = session(&transport);
        let mut target = RecordingTarget::default();

        session.start();
        let outcome = rx.recv().await.unwrap();
        session.handle_outcome(outcome, &mut target);

        session.clear();
        assert!(session.buffer().is_empty());
        assert_eq!(session.cursor().last_id, 8);
    }
}
