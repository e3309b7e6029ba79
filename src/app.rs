use std::time::Instant;

use ratatui::style::{Color, Style};
use ratatui::widgets::{Paragraph, Wrap};
use tui_textarea::TextArea;

use crate::filter::SearchTerm;
use crate::follow::{FollowEvent, FollowState, ROW_UNITS};
use crate::poller::PollOutcome;
use crate::record::Level;
use crate::render::DisplayLine;
use crate::session::{PollStatus, RenderTarget, Session};

/// Input mode for the application
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputMode {
    /// Normal navigation mode
    Normal,
    /// Editing the search text
    SearchEditing,
}

/// Where the viewport sits, captured before the content or geometry changes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Anchor {
    /// Rows between the viewport bottom and the last row
    Bottom(usize),
    /// Row `offset` of the line for record `id` is the first row shown
    Line { id: u64, offset: usize },
    Top,
}

/// The display region: the last rendered lines and the viewport over them.
///
/// Positions are counted in terminal rows, so a wrapped line takes as many
/// rows as it occupies on screen.
#[derive(Debug)]
pub struct LogView {
    lines: Vec<DisplayLine>,
    /// Rows each line occupies at the current width
    heights: Vec<usize>,
    total_rows: usize,
    /// First row shown
    pub scroll: usize,
    /// Rows available for lines (set during draw)
    pub height: usize,
    width: u16,
    wrap: bool,
    /// While set, replacing the content keeps the distance to the bottom;
    /// otherwise the record at the top of the viewport stays put
    pub stick_to_bottom: bool,
}

impl Default for LogView {
    fn default() -> Self {
        Self {
            lines: Vec::new(),
            heights: Vec::new(),
            total_rows: 0,
            scroll: 0,
            height: 0,
            width: 0,
            wrap: false,
            stick_to_bottom: true,
        }
    }
}

impl LogView {
    pub fn lines(&self) -> &[DisplayLine] {
        &self.lines
    }

    pub fn total_rows(&self) -> usize {
        self.total_rows
    }

    pub fn max_scroll(&self) -> usize {
        self.total_rows.saturating_sub(self.height)
    }

    /// Rows between the bottom of the viewport and the last row
    pub fn rows_below(&self) -> usize {
        self.max_scroll().saturating_sub(self.scroll)
    }

    /// Update the drawing area. Wrapped heights are re-measured when the
    /// width or the wrap mode changes.
    pub fn set_geometry(&mut self, width: u16, height: usize, wrap: bool) {
        if width == self.width && height == self.height && wrap == self.wrap {
            return;
        }
        let anchor = self.anchor();
        let remeasure = width != self.width || wrap != self.wrap;
        self.width = width;
        self.height = height;
        self.wrap = wrap;
        if remeasure {
            self.measure();
        }
        self.restore(anchor);
    }

    pub fn scroll_by(&mut self, delta: isize) {
        let target = self.scroll.saturating_add_signed(delta);
        self.scroll = target.min(self.max_scroll());
    }

    pub fn scroll_to_top(&mut self) {
        self.scroll = 0;
    }

    /// Lines intersecting the viewport, and how many rows of the first one
    /// are above it
    pub fn window(&self) -> (&[DisplayLine], usize) {
        let Some((start, offset)) = self.locate(self.scroll) else {
            return (&[], 0);
        };
        let mut rows = 0;
        let mut end = start;
        while end < self.lines.len() && rows < self.height + offset {
            rows += self.heights[end];
            end += 1;
        }
        (&self.lines[start..end], offset)
    }

    fn measure(&mut self) {
        self.heights = self
            .lines
            .iter()
            .map(|line| line_rows(line, self.width, self.wrap))
            .collect();
        self.total_rows = self.heights.iter().sum();
    }

    /// Line index containing `row`, and the row's offset inside that line
    fn locate(&self, row: usize) -> Option<(usize, usize)> {
        let mut start = 0;
        for (index, height) in self.heights.iter().enumerate() {
            if row < start + height {
                return Some((index, row - start));
            }
            start += height;
        }
        None
    }

    fn row_of(&self, index: usize) -> usize {
        self.heights[..index].iter().sum()
    }

    fn anchor(&self) -> Anchor {
        if self.stick_to_bottom {
            return Anchor::Bottom(self.rows_below());
        }
        match self.locate(self.scroll) {
            Some((index, offset)) => Anchor::Line {
                id: self.lines[index].id,
                offset,
            },
            None => Anchor::Top,
        }
    }

    fn restore(&mut self, anchor: Anchor) {
        self.scroll = match anchor {
            Anchor::Bottom(distance) => self.max_scroll().saturating_sub(distance),
            Anchor::Line { id, offset } => {
                // Lines are ascending by id; an evicted anchor falls to its successor
                let index = self.lines.partition_point(|line| line.id < id);
                if index == self.lines.len() {
                    self.max_scroll()
                } else if self.lines[index].id == id {
                    self.row_of(index) + offset.min(self.heights[index] - 1)
                } else {
                    self.row_of(index)
                }
            }
            Anchor::Top => 0,
        };
        self.scroll = self.scroll.min(self.max_scroll());
    }
}

/// Rows `line` takes when drawn `width` columns wide
fn line_rows(line: &DisplayLine, width: u16, wrap: bool) -> usize {
    if !wrap || width == 0 {
        return 1;
    }
    Paragraph::new(line.plain_text())
        .wrap(Wrap { trim: false })
        .line_count(width)
        .max(1)
}

impl RenderTarget for LogView {
    fn replace(&mut self, lines: Vec<DisplayLine>) {
        let anchor = self.anchor();
        self.lines = lines;
        self.measure();
        self.restore(anchor);
    }

    fn scroll_to_bottom(&mut self) {
        self.scroll = self.max_scroll();
    }
}

/// Main application state
pub struct AppState<'a> {
    /// Stream engine state
    pub session: Session,
    /// What is on screen
    pub view: LogView,
    /// Current input mode
    pub mode: InputMode,
    /// Search text input widget
    pub search_textarea: TextArea<'a>,
    /// Whether search is regex mode
    pub search_is_regex: bool,
    /// Whether the app should quit
    pub should_quit: bool,
    /// Status message to display
    pub status_message: Option<String>,
    /// Last time search input changed (for debounce)
    pub search_last_change: Option<Instant>,
    /// Whether we need to re-highlight (after debounce)
    pub search_needs_refresh: bool,
    /// Whether to show help overlay
    pub show_help: bool,
}

impl<'a> AppState<'a> {
    pub fn new(session: Session) -> Self {
        let view = LogView {
            stick_to_bottom: session.follow_state() == FollowState::Following,
            ..LogView::default()
        };
        Self {
            session,
            view,
            mode: InputMode::Normal,
            search_textarea: new_textarea(Vec::new()),
            search_is_regex: false,
            should_quit: false,
            status_message: None,
            search_last_change: None,
            search_needs_refresh: false,
            show_help: false,
        }
    }

    /// Run a render pass into the view
    pub fn refresh(&mut self) {
        self.session.render_into(&mut self.view);
    }

    /// Feed a poll completion to the session
    pub fn handle_poll(&mut self, outcome: PollOutcome) {
        let was_connected = self.session.is_connected();
        match self.session.handle_outcome(outcome, &mut self.view) {
            PollStatus::Retrying if was_connected => {
                self.status_message = Some("Connection lost, retrying...".to_string());
            }
            PollStatus::Merged { .. } if !was_connected => {
                self.status_message = Some("Reconnected".to_string());
            }
            _ => {}
        }
    }

    /// Change the severity threshold (restarts the stream)
    pub fn set_threshold(&mut self, level: Level) {
        if self.session.set_threshold(level) {
            self.view.scroll_to_top();
            self.refresh();
            self.status_message = Some(format!("Level: {}+", level.as_str()));
        }
    }

    /// Feed the follow controller and keep the view's anchoring in step
    fn follow(&mut self, event: FollowEvent) {
        let state = self.session.follow(event);
        self.view.stick_to_bottom = state == FollowState::Following;
    }

    /// Toggle follow mode
    pub fn toggle_follow(&mut self) {
        let state = self.session.toggle_follow();
        self.view.stick_to_bottom = state == FollowState::Following;
        if state == FollowState::Following {
            self.view.scroll_to_bottom();
        }
        self.status_message = Some(format!(
            "Follow: {}",
            if state == FollowState::Following { "on" } else { "off" }
        ));
    }

    /// Toggle line wrapping
    pub fn toggle_line_wrap(&mut self) {
        let wrap = self.session.toggle_line_wrap();
        self.status_message = Some(format!("Line wrap: {}", if wrap { "on" } else { "off" }));
    }

    /// Drop everything buffered so far
    pub fn clear(&mut self) {
        self.session.clear();
        self.view.scroll_to_top();
        self.refresh();
        self.status_message = Some("Cleared".to_string());
    }

    /// Tell the follow controller where the viewport ended up. Only an
    /// actual move counts.
    fn report_viewport(&mut self, before: usize) {
        if self.view.scroll == before {
            return;
        }
        let distance = u32::try_from(self.view.rows_below())
            .unwrap_or(u32::MAX)
            .saturating_mul(ROW_UNITS);
        self.follow(FollowEvent::ViewportMoved { distance });
    }

    /// Keyboard scrolling by `delta` rows
    pub fn scroll(&mut self, delta: isize) {
        let before = self.view.scroll;
        self.follow(FollowEvent::ManualScroll);
        self.view.scroll_by(delta);
        self.report_viewport(before);
    }

    /// Mouse wheel scrolling by `delta` rows
    pub fn wheel(&mut self, delta: isize) {
        let before = self.view.scroll;
        self.follow(FollowEvent::Wheel);
        self.view.scroll_by(delta);
        self.report_viewport(before);
    }

    /// Mouse button pressed at `column` of a terminal `width` columns wide
    pub fn mouse_down(&mut self, column: u16, width: u16) {
        self.follow(FollowEvent::MouseDown { column, width });
    }

    /// Go to the top of the log
    pub fn go_to_top(&mut self) {
        let before = self.view.scroll;
        self.follow(FollowEvent::ManualScroll);
        self.view.scroll_to_top();
        self.report_viewport(before);
    }

    /// Go to the bottom of the log and resume following
    pub fn go_to_bottom(&mut self) {
        self.view.scroll_to_bottom();
        self.follow(FollowEvent::Resume);
    }

    /// Get the current search input text
    pub fn search_input(&self) -> String {
        self.search_textarea.lines().join("\n")
    }

    fn apply_search_input(&mut self) {
        let term = SearchTerm::new(self.search_input(), self.search_is_regex);
        self.session.set_search(term);
        self.refresh();
        self.search_last_change = None;
        self.search_needs_refresh = false;
    }

    /// Apply the current search input and leave editing
    pub fn apply_search(&mut self) {
        self.apply_search_input();
        self.mode = InputMode::Normal;
    }

    /// Cancel search editing and restore the previous term
    pub fn cancel_search(&mut self) {
        let previous = self.session.search().pattern.clone();
        self.search_textarea = new_textarea(vec![previous]);
        self.mode = InputMode::Normal;
        self.search_last_change = None;
        self.search_needs_refresh = false;
    }

    /// Clear the active search term
    pub fn clear_search(&mut self) {
        self.search_textarea = new_textarea(Vec::new());
        self.apply_search_input();
        self.status_message = Some("Search cleared".to_string());
    }

    /// Mark that search input changed (for debounce)
    pub fn search_changed(&mut self) {
        self.search_last_change = Some(Instant::now());
        self.search_needs_refresh = true;
    }

    /// Check if debounce period has passed and re-highlight if needed
    pub fn check_search_debounce(&mut self) {
        const DEBOUNCE_MS: u128 = 150;

        if let Some(last_change) = self.search_last_change {
            if last_change.elapsed().as_millis() >= DEBOUNCE_MS && self.search_needs_refresh {
                self.apply_search_input();
            }
        }
    }

    /// Toggle regex mode for search
    pub fn toggle_regex_mode(&mut self) {
        self.search_is_regex = !self.search_is_regex;
        if !self.session.search().is_empty() {
            self.apply_search_input();
        }
        self.status_message = Some(format!(
            "Search mode: {}",
            if self.search_is_regex { "regex" } else { "substring" }
        ));
    }

    /// Visible and buffered record counts
    pub fn line_counts(&self) -> (usize, usize) {
        (self.view.lines().len(), self.session.buffer().len())
    }
}

fn new_textarea<'a>(lines: Vec<String>) -> TextArea<'a> {
    let mut textarea = TextArea::new(lines);
    textarea.set_cursor_line_style(Style::default());
    textarea.set_placeholder_text("type to search...");
    textarea.set_placeholder_style(Style::default().fg(Color::DarkGray));
    textarea
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::poller::scripted::ScriptedTransport;
    use crate::prefs::{ConfigProvider, LINE_WRAP_KEY, MemoryPrefs};
    use crate::record::LogRecord;
    use std::sync::Arc;

    const LONG: &str = "abcdefghij abcdefghij abcdefghij abcdefghij abcdefghij abcdefghij";

    fn render_ids(ids: impl IntoIterator<Item = u64>, message: &str) -> Vec<DisplayLine> {
        let records: Vec<LogRecord> = ids
            .into_iter()
            .map(|id| LogRecord::new(id, Level::Info, message))
            .collect();
        let refs: Vec<&LogRecord> = records.iter().collect();
        crate::render::render_in(&refs, &chrono::Utc)
    }

    fn lines(n: u64) -> Vec<DisplayLine> {
        render_ids(1..=n, "m")
    }

    fn shown(view: &LogView) -> Vec<u64> {
        view.window().0.iter().map(|l| l.id).collect()
    }

    fn records(ids: impl IntoIterator<Item = u64>) -> Vec<LogRecord> {
        ids.into_iter()
            .map(|id| LogRecord::new(id, Level::Info, LONG))
            .collect()
    }

    fn app_with(transport: &Arc<ScriptedTransport>, config: Config, wrap: bool) -> AppState<'static> {
        let mut prefs = MemoryPrefs::default();
        prefs
            .set(LINE_WRAP_KEY, if wrap { "true" } else { "false" })
            .unwrap();
        let (session, _rx) = Session::new(&config, transport.clone(), Box::new(prefs));
        AppState::new(session)
    }

    fn app() -> AppState<'static> {
        app_with(&Arc::new(ScriptedTransport::default()), Config::default(), false)
    }

    #[test]
    fn test_view_scroll_bounds() {
        let mut view = LogView::default();
        view.set_geometry(80, 10, false);
        view.replace(lines(25));
        view.scroll_to_bottom();
        assert_eq!(view.scroll, 15);
        assert_eq!(view.rows_below(), 0);
        assert_eq!(view.window().0.len(), 10);

        view.scroll_by(-4);
        assert_eq!(view.rows_below(), 4);
        view.scroll_by(100);
        assert_eq!(view.scroll, 15);
        view.scroll_by(-100);
        assert_eq!(view.scroll, 0);
    }

    #[test]
    fn test_view_replace_clamps_offset() {
        let mut view = LogView::default();
        view.set_geometry(80, 5, false);
        view.replace(lines(20));
        view.scroll_to_bottom();
        view.replace(lines(3));
        assert_eq!(view.scroll, 0);
        assert_eq!(view.window().0.len(), 3);
    }

    #[test]
    fn test_following_view_stays_at_bottom_when_front_is_evicted() {
        let mut view = LogView::default();
        view.set_geometry(80, 3, false);
        view.replace(render_ids(1..=10, "m"));
        view.scroll_to_bottom();

        // Same count, shifted by two: no explicit scroll afterwards
        view.replace(render_ids(3..=12, "m"));
        assert_eq!(shown(&view), vec![10, 11, 12]);
        assert_eq!(view.rows_below(), 0);
    }

    #[test]
    fn test_paused_view_keeps_its_top_record() {
        let mut view = LogView {
            stick_to_bottom: false,
            ..LogView::default()
        };
        view.set_geometry(80, 3, false);
        view.replace(render_ids(1..=10, "m"));
        view.scroll = 4;
        assert_eq!(shown(&view), vec![5, 6, 7]);

        view.replace(render_ids(3..=12, "m"));
        assert_eq!(shown(&view), vec![5, 6, 7]);

        // Top record evicted: its successor takes the top row
        view.replace(render_ids(6..=15, "m"));
        assert_eq!(shown(&view), vec![6, 7, 8]);
    }

    #[test]
    fn test_wrapped_lines_are_counted_in_rows() {
        let mut view = LogView::default();
        view.set_geometry(20, 4, true);
        view.replace(render_ids(1..=4, LONG));
        assert!(view.total_rows() > 4);

        view.scroll_to_bottom();
        assert_eq!(view.rows_below(), 0);
        assert_eq!(shown(&view).last(), Some(&4));

        view.scroll_by(-1);
        assert_eq!(view.rows_below(), 1);
    }

    #[test]
    fn test_turning_wrap_on_keeps_bottom() {
        let mut view = LogView::default();
        view.set_geometry(20, 4, false);
        view.replace(render_ids(1..=4, LONG));
        view.scroll_to_bottom();
        assert_eq!(view.scroll, 0);

        view.set_geometry(20, 4, true);
        assert!(view.scroll > 0);
        assert_eq!(view.rows_below(), 0);
        assert_eq!(shown(&view).last(), Some(&4));
    }

    #[test]
    fn test_wheel_pauses_until_back_at_bottom() {
        let mut app = app();
        app.view.set_geometry(80, 10, false);
        app.view.replace(lines(40));
        app.view.scroll_to_bottom();

        app.wheel(-3);
        assert_eq!(app.session.follow_state(), FollowState::Paused);
        assert!(!app.view.stick_to_bottom);

        app.wheel(1);
        assert_eq!(app.session.follow_state(), FollowState::Paused);

        // One row above the bottom is within proximity
        app.wheel(1);
        assert_eq!(app.session.follow_state(), FollowState::Following);
        assert!(app.view.stick_to_bottom);
    }

    #[test]
    fn test_wheel_at_bottom_pauses() {
        let mut app = app();
        app.view.set_geometry(80, 10, false);
        app.view.replace(lines(40));
        app.view.scroll_to_bottom();

        app.wheel(3);
        assert_eq!(app.view.rows_below(), 0);
        assert_eq!(app.session.follow_state(), FollowState::Paused);
    }

    #[test]
    fn test_keyboard_scroll_near_bottom_keeps_following() {
        let mut app = app();
        app.view.set_geometry(80, 10, false);
        app.view.replace(lines(40));
        app.view.scroll_to_bottom();

        app.scroll(-1);
        assert_eq!(app.session.follow_state(), FollowState::Following);
        app.scroll(-5);
        assert_eq!(app.session.follow_state(), FollowState::Paused);
        app.go_to_bottom();
        assert_eq!(app.session.follow_state(), FollowState::Following);
    }

    #[test]
    fn test_scrollbar_press_pauses() {
        let mut app = app();
        app.mouse_down(5, 80);
        assert_eq!(app.session.follow_state(), FollowState::Following);
        app.mouse_down(79, 80);
        assert_eq!(app.session.follow_state(), FollowState::Paused);
    }

    #[tokio::test]
    async fn test_full_buffer_keeps_newest_record_in_view() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_batch(records(1..=4), "u");
        transport.push_batch(records(5..=7), "u");
        transport.push_batch(records(8..=9), "u");
        let config = Config {
            max_buffer: 5,
            ..Config::default()
        };
        let (session, mut rx) = Session::new(
            &config,
            transport.clone(),
            Box::new(MemoryPrefs::default()),
        );
        let mut app = AppState::new(session);
        app.view.set_geometry(80, 2, false);
        app.session.start();

        for newest in [4, 7, 9] {
            let outcome = rx.recv().await.unwrap();
            app.handle_poll(outcome);
            assert_eq!(app.session.follow_state(), FollowState::Following);
            assert_eq!(shown(&app.view).last(), Some(&newest));
        }
        let buffered: Vec<u64> = app.session.buffer().iter().map(|r| r.id).collect();
        assert_eq!(buffered, vec![5, 6, 7, 8, 9]);
        assert_eq!(shown(&app.view), vec![8, 9]);
    }

    #[tokio::test]
    async fn test_paused_view_survives_eviction() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_batch(records(1..=5), "u");
        transport.push_batch(records(6..=7), "u");
        let config = Config {
            max_buffer: 5,
            ..Config::default()
        };
        let (session, mut rx) = Session::new(
            &config,
            transport.clone(),
            Box::new(MemoryPrefs::default()),
        );
        let mut app = AppState::new(session);
        app.view.set_geometry(80, 2, false);
        app.session.start();

        let outcome = rx.recv().await.unwrap();
        app.handle_poll(outcome);
        assert_eq!(shown(&app.view), vec![4, 5]);

        app.toggle_follow();
        let outcome = rx.recv().await.unwrap();
        app.handle_poll(outcome);

        assert_eq!(app.session.follow_state(), FollowState::Paused);
        assert_eq!(shown(&app.view), vec![4, 5]);
    }

    #[tokio::test]
    async fn test_wrapped_stream_scrolls_to_newest_row() {
        let transport = Arc::new(ScriptedTransport::default());
        transport.push_batch(records(1..=20), "u");
        let config = Config::default();
        let (session, mut rx) = Session::new(
            &config,
            transport.clone(),
            Box::new(MemoryPrefs::default()),
        );
        let mut app = AppState::new(session);
        assert!(app.session.line_wrap());
        app.view.set_geometry(30, 6, true);
        app.session.start();

        let outcome = rx.recv().await.unwrap();
        app.handle_poll(outcome);

        assert!(app.view.total_rows() > 20);
        assert_eq!(app.view.rows_below(), 0);
        assert_eq!(shown(&app.view).last(), Some(&20));
    }

    #[test]
    fn test_saved_wrap_preference_is_loaded() {
        let app = app_with(&Arc::new(ScriptedTransport::default()), Config::default(), false);
        assert!(!app.session.line_wrap());
    }
}
