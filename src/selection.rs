//! Rubber-band region selection over the full-desktop overlay.
//!
//! A `RegionSelector` handles exactly one gesture. The overlay forwards its
//! input events; the selector tells it when the gesture is over and what the
//! user picked. It knows nothing about windows or rendering.

use crate::capture::{UiPoint, UiRect};

/// A released drag must be strictly larger than this in both directions,
/// otherwise it is treated as an accidental click.
pub const MIN_SELECTION_SIZE: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

/// Input delivered by the overlay, in overlay UI coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlayEvent {
    Press { button: PointerButton, at: UiPoint },
    Move { at: UiPoint },
    Release { button: PointerButton, at: UiPoint },
    Escape,
}

/// How a gesture ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionOutcome {
    Confirmed(UiRect),
    FullDesktop,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionState {
    Idle,
    Dragging { anchor: UiPoint, current: UiPoint },
    Finished(SelectionOutcome),
}

#[derive(Debug)]
pub struct RegionSelector {
    state: SelectionState,
}

impl Default for RegionSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionSelector {
    pub fn new() -> Self {
        Self {
            state: SelectionState::Idle,
        }
    }

    pub fn state(&self) -> SelectionState {
        self.state
    }

    pub fn outcome(&self) -> Option<SelectionOutcome> {
        match self.state {
            SelectionState::Finished(outcome) => Some(outcome),
            _ => None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SelectionState::Finished(_))
    }

    /// Rectangle to draw while dragging.
    pub fn live_rect(&self) -> Option<UiRect> {
        match self.state {
            SelectionState::Dragging { anchor, current } => Some(UiRect::from_corners(anchor, current)),
            _ => None,
        }
    }

    /// Feed one overlay event. Returns the outcome once the gesture is over.
    /// Events after that are ignored.
    pub fn handle(&mut self, event: OverlayEvent) -> Option<SelectionOutcome> {
        match event {
            OverlayEvent::Press { button, at } => self.press(button, at),
            OverlayEvent::Move { at } => self.move_to(at),
            OverlayEvent::Release { button, at } => self.release(button, at),
            OverlayEvent::Escape => self.escape(),
        }
        self.outcome()
    }

    pub fn press(&mut self, button: PointerButton, at: UiPoint) {
        match (self.state, button) {
            (SelectionState::Finished(_), _) => {}
            (_, PointerButton::Secondary) => self.finish(SelectionOutcome::FullDesktop),
            (SelectionState::Idle, PointerButton::Primary) => {
                self.state = SelectionState::Dragging {
                    anchor: at,
                    current: at,
                };
            }
            _ => {}
        }
    }

    pub fn move_to(&mut self, at: UiPoint) {
        if let SelectionState::Dragging { anchor, .. } = self.state {
            self.state = SelectionState::Dragging { anchor, current: at };
        }
    }

    pub fn release(&mut self, button: PointerButton, at: UiPoint) {
        if button != PointerButton::Primary {
            return;
        }
        let SelectionState::Dragging { anchor, .. } = self.state else {
            return;
        };

        let rect = UiRect::from_corners(anchor, at);
        if rect.width > MIN_SELECTION_SIZE && rect.height > MIN_SELECTION_SIZE {
            self.finish(SelectionOutcome::Confirmed(rect));
        } else {
            log::debug!(
                "[SELECT] Drag of {}x{} too small, treating as a click",
                rect.width,
                rect.height
            );
            self.finish(SelectionOutcome::Cancelled);
        }
    }

    pub fn escape(&mut self) {
        if !self.is_finished() {
            self.finish(SelectionOutcome::Cancelled);
        }
    }

    fn finish(&mut self, outcome: SelectionOutcome) {
        log::info!("[SELECT] Selection finished: {:?}", outcome);
        self.state = SelectionState::Finished(outcome);
    }
}
