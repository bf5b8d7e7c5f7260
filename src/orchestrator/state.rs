//! Flash session phase tracking.
//!
//! ```text
//! Idle -> ToolResolving -> Extracting -> Flashing(1..N) -> Rebooting -> Done
//!                 \              \             \
//!                  +--------------+-------------+--> Failed | Cancelled
//! ```
//!
//! `Done`, `Failed` and `Cancelled` are terminal.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::FlashError;
use crate::models::SessionStatus;

/// Discrete phases of one flash session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlashPhase {
    Idle,
    ToolResolving,
    Extracting,
    /// Flashing partition `index` (1-based) of `total`
    Flashing { index: usize, total: usize },
    Rebooting,
    Done,
    Failed,
    Cancelled,
}

impl FlashPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlashPhase::Idle => "idle",
            FlashPhase::ToolResolving => "tool-resolving",
            FlashPhase::Extracting => "extracting",
            FlashPhase::Flashing { .. } => "flashing",
            FlashPhase::Rebooting => "rebooting",
            FlashPhase::Done => "done",
            FlashPhase::Failed => "failed",
            FlashPhase::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FlashPhase::Done | FlashPhase::Failed | FlashPhase::Cancelled)
    }

    /// Session status for a terminal phase.
    pub fn session_status(&self) -> Option<SessionStatus> {
        match self {
            FlashPhase::Done => Some(SessionStatus::Done),
            FlashPhase::Failed => Some(SessionStatus::Failed),
            FlashPhase::Cancelled => Some(SessionStatus::Cancelled),
            _ => None,
        }
    }

    /// Check if a transition to the given phase is valid.
    pub fn can_transition_to(&self, next: FlashPhase) -> bool {
        if self.is_terminal() {
            return false;
        }
        if matches!(next, FlashPhase::Failed | FlashPhase::Cancelled) {
            return true;
        }
        match (self, next) {
            (FlashPhase::Idle, FlashPhase::ToolResolving) => true,
            (FlashPhase::ToolResolving, FlashPhase::Extracting) => true,
            (FlashPhase::Extracting, FlashPhase::Flashing { index: 1, total }) => total >= 1,
            (
                FlashPhase::Flashing { index, total },
                FlashPhase::Flashing {
                    index: next_index,
                    total: next_total,
                },
            ) => next_total == *total && next_index == index + 1 && next_index <= *total,
            (FlashPhase::Flashing { index, total }, FlashPhase::Rebooting | FlashPhase::Done) => {
                index == total
            }
            (FlashPhase::Rebooting, FlashPhase::Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for FlashPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashPhase::Flashing { index, total } => write!(f, "flashing ({}/{})", index, total),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Current phase plus the validated transition history of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTracker {
    current: FlashPhase,
    history: Vec<FlashPhase>,
}

impl Default for PhaseTracker {
    fn default() -> Self {
        PhaseTracker {
            current: FlashPhase::Idle,
            history: vec![FlashPhase::Idle],
        }
    }
}

impl PhaseTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> FlashPhase {
        self.current
    }

    pub fn history(&self) -> &[FlashPhase] {
        &self.history
    }

    /// Move to `next`, rejecting transitions the state machine does not allow.
    pub fn transition(&mut self, next: FlashPhase) -> Result<(), FlashError> {
        if !self.current.can_transition_to(next) {
            return Err(FlashError::InvalidTransition {
                from: self.current.to_string(),
                to: next.to_string(),
            });
        }
        log::debug!("[Flash] Phase {} -> {}", self.current, next);
        self.current = next;
        self.history.push(next);
        Ok(())
    }
}
