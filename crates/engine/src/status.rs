//! Channel status model.
//!
//! Three independently-evolving cells (connection, camera, microphone) and
//! the precedence rule that folds them into one aggregate readiness value.

use std::fmt;

use serde::{Deserialize, Serialize};

/// One of the three independently-tracked readiness dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Connection,
    Camera,
    Microphone,
}

impl Channel {
    pub fn name(&self) -> &'static str {
        match self {
            Channel::Connection => "connection",
            Channel::Camera => "camera",
            Channel::Microphone => "microphone",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle of a single channel during a check.
///
/// `ErrorTimeout` is a transient sub-state of error that only exists while
/// an attempt is in flight; the engine resolves it to `Success` or `Error`
/// before a run finishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    #[default]
    Pending,
    Success,
    Warning,
    Error,
    ErrorTimeout,
}

impl ChannelState {
    pub fn is_pending(&self) -> bool {
        matches!(self, ChannelState::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ChannelState::Success)
    }

    /// Resolved states survive ladder exhaustion untouched; `Pending` and
    /// `ErrorTimeout` do not.
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            ChannelState::Success | ChannelState::Warning | ChannelState::Error
        )
    }
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ChannelState::Pending => "pending",
            ChannelState::Success => "success",
            ChannelState::Warning => "warning",
            ChannelState::Error => "error",
            ChannelState::ErrorTimeout => "error_timeout",
        };
        f.write_str(name)
    }
}

/// Derived overall readiness. Never stored; always recomputed from the
/// three channel states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateStatus {
    Pending,
    Error,
    Warning,
    Success,
}

impl AggregateStatus {
    /// The combined readiness signal: warnings are still a go.
    pub fn is_go(&self) -> bool {
        matches!(self, AggregateStatus::Success | AggregateStatus::Warning)
    }

    /// One-line summary shown next to the overall indicator.
    pub fn headline(&self) -> &'static str {
        match self {
            AggregateStatus::Pending => "Running checks...",
            AggregateStatus::Error => "Some checks failed",
            AggregateStatus::Warning => "Ready, with warnings",
            AggregateStatus::Success => "All checks passed",
        }
    }
}

impl fmt::Display for AggregateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AggregateStatus::Pending => "pending",
            AggregateStatus::Error => "error",
            AggregateStatus::Warning => "warning",
            AggregateStatus::Success => "success",
        };
        f.write_str(name)
    }
}

/// Fold channel states by user-facing severity: an unfinished check never
/// reports readiness, and a hard failure outranks a soft warning.
/// `ErrorTimeout` counts as error.
pub fn aggregate(states: &[ChannelState]) -> AggregateStatus {
    if states.iter().any(|s| s.is_pending()) {
        return AggregateStatus::Pending;
    }
    if states
        .iter()
        .any(|s| matches!(s, ChannelState::Error | ChannelState::ErrorTimeout))
    {
        return AggregateStatus::Error;
    }
    if states.iter().any(|s| matches!(s, ChannelState::Warning)) {
        return AggregateStatus::Warning;
    }
    AggregateStatus::Success
}

#[derive(Debug, Clone)]
struct Cell {
    state: ChannelState,
    message: String,
}

impl Default for Cell {
    fn default() -> Self {
        Self {
            state: ChannelState::Pending,
            message: "Waiting to start".to_string(),
        }
    }
}

/// Storage for the three channel cells.
///
/// Pure storage: last write wins. The precedence rule lives in
/// [`aggregate`], and the never-downgrade-success rule is enforced by the
/// negotiation engine, not here.
#[derive(Debug, Clone, Default)]
pub struct StatusBoard {
    connection: Cell,
    camera: Cell,
    microphone: Cell,
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, channel: Channel, state: ChannelState, message: impl Into<String>) {
        let cell = self.cell_mut(channel);
        cell.state = state;
        cell.message = message.into();
    }

    pub fn state(&self, channel: Channel) -> ChannelState {
        self.cell(channel).state
    }

    pub fn message(&self, channel: Channel) -> &str {
        &self.cell(channel).message
    }

    pub fn aggregate(&self) -> AggregateStatus {
        aggregate(&[
            self.connection.state,
            self.camera.state,
            self.microphone.state,
        ])
    }

    /// Force all three channels back to pending. Used only on explicit
    /// retry.
    pub fn reset(&mut self) {
        self.connection = Cell::default();
        self.camera = Cell::default();
        self.microphone = Cell::default();
    }

    fn cell(&self, channel: Channel) -> &Cell {
        match channel {
            Channel::Connection => &self.connection,
            Channel::Camera => &self.camera,
            Channel::Microphone => &self.microphone,
        }
    }

    fn cell_mut(&mut self, channel: Channel) -> &mut Cell {
        match channel {
            Channel::Connection => &mut self.connection,
            Channel::Camera => &mut self.camera,
            Channel::Microphone => &mut self.microphone,
        }
    }
}
