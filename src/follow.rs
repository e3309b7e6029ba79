//! Follow controller: decides whether the view sticks to the newest record.

/// Distance from the bottom, in viewport units, that re-enables following
pub const FOLLOW_PROXIMITY: u32 = 30;

/// Height of one terminal row in viewport units
pub const ROW_UNITS: u32 = 20;

/// Columns at the right edge that count as the scrollbar for mouse presses
pub const SCROLLBAR_HIT_COLUMNS: u16 = 1;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FollowState {
    #[default]
    Following,
    Paused,
}

/// Inputs the controller reacts to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FollowEvent {
    /// Explicit user pause
    Pause,
    /// Explicit user resume
    Resume,
    /// Keyboard scrolling or any other manual viewport move
    ManualScroll,
    /// Mouse wheel in either direction
    Wheel,
    /// Mouse button pressed at `column` of a region `width` columns wide
    MouseDown { column: u16, width: u16 },
    /// The viewport now ends `distance` units above the content bottom
    ViewportMoved { distance: u32 },
}

#[derive(Clone, Debug)]
pub struct FollowController {
    state: FollowState,
    proximity: u32,
}

impl Default for FollowController {
    fn default() -> Self {
        Self::new(FOLLOW_PROXIMITY)
    }
}

impl FollowController {
    pub fn new(proximity: u32) -> Self {
        Self {
            state: FollowState::Following,
            proximity,
        }
    }

    pub fn state(&self) -> FollowState {
        self.state
    }

    pub fn is_following(&self) -> bool {
        self.state == FollowState::Following
    }

    /// Apply an event and return the resulting state
    pub fn handle(&mut self, event: FollowEvent) -> FollowState {
        self.state = match (self.state, event) {
            (_, FollowEvent::Pause | FollowEvent::ManualScroll | FollowEvent::Wheel) => {
                FollowState::Paused
            }
            (_, FollowEvent::Resume) => FollowState::Following,
            (state, FollowEvent::MouseDown { column, width }) => {
                if column >= width.saturating_sub(SCROLLBAR_HIT_COLUMNS) {
                    FollowState::Paused
                } else {
                    state
                }
            }
            (FollowState::Paused, FollowEvent::ViewportMoved { distance }) => {
                if distance <= self.proximity {
                    FollowState::Following
                } else {
                    FollowState::Paused
                }
            }
            (FollowState::Following, FollowEvent::ViewportMoved { .. }) => FollowState::Following,
        };
        self.state
    }

    /// Explicit pause/resume toggle
    pub fn toggle(&mut self) -> FollowState {
        match self.state {
            FollowState::Following => self.handle(FollowEvent::Pause),
            FollowState::Paused => self.handle(FollowEvent::Resume),
        }
    }

    /// Whether a render pass should end by scrolling to the bottom.
    ///
    /// A buffer filled to the cap with visible records is being churned by
    /// eviction; the jump is suppressed while that is the case.
    pub fn should_scroll_to_bottom(&self, visible_count: usize, max_buffer: usize) -> bool {
        self.is_following() && visible_count < max_buffer
    }
}
