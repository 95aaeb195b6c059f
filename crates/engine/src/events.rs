//! Events out, intents in.
//!
//! The engine pushes [`CheckEvent`]s through an unbounded channel and the
//! presentation adapter (CLI, desktop shell, test harness) pulls them off
//! an [`EventStream`]. Adapter requests travel the other way as
//! [`UserIntent`] values handed to the session.

use tokio::sync::mpsc;

use crate::acquisition::DeviceDescriptor;
use crate::status::{AggregateStatus, Channel, ChannelState, StatusBoard};

/// Everything the core reports outward. Rendering decisions stay on the
/// adapter side.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckEvent {
    /// One channel changed state.
    Channel {
        channel: Channel,
        state: ChannelState,
        message: String,
    },
    /// Recomputed overall readiness.
    Aggregate {
        status: AggregateStatus,
        message: String,
    },
    /// A combined session is ready for rendering.
    SessionReady {
        audio_tracks: usize,
        video_tracks: usize,
    },
    /// Fresh device inventory. Labels settle after the first grant.
    Devices { devices: Vec<DeviceDescriptor> },
    /// The adapter should offer the user the permission request (again).
    PermissionPromptRequested,
}

impl CheckEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            CheckEvent::Channel { .. } => "channel_status",
            CheckEvent::Aggregate { .. } => "aggregate_status",
            CheckEvent::SessionReady { .. } => "session_ready",
            CheckEvent::Devices { .. } => "devices",
            CheckEvent::PermissionPromptRequested => "permission_prompt",
        }
    }
}

/// User intents flowing back into the session.
#[derive(Debug, Clone, PartialEq)]
pub enum UserIntent {
    /// The user agreed to the permission prompt; run the media checks.
    RequestPermission,
    /// Start the whole check over.
    Retry,
    /// Give up on the camera and capture the microphone alone.
    AudioOnly,
    /// Swap one channel onto a specific device.
    SwitchDevice { channel: Channel, device_id: String },
    /// The surface went to the background; release capture.
    Suspend,
    /// The surface is visible again.
    Resume,
}

/// Receiving half handed to the presentation adapter.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<CheckEvent>,
}

impl EventStream {
    /// Wait for the next event. `None` once the sending side is gone.
    pub async fn next(&mut self) -> Option<CheckEvent> {
        self.receiver.recv().await
    }

    /// Drain one already-queued event without waiting.
    pub fn try_next(&mut self) -> Option<CheckEvent> {
        self.receiver.try_recv().ok()
    }
}

/// Status storage plus event fan-out.
///
/// Every `record` both updates the board and emits the channel event
/// followed by the freshly folded aggregate, so adapters never have to
/// recompute precedence themselves.
#[derive(Debug)]
pub struct StatusFeed {
    board: StatusBoard,
    sender: mpsc::UnboundedSender<CheckEvent>,
}

impl StatusFeed {
    pub fn new() -> (Self, EventStream) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (
            Self {
                board: StatusBoard::new(),
                sender,
            },
            EventStream { receiver },
        )
    }

    pub fn record(&mut self, channel: Channel, state: ChannelState, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(channel = %channel, state = %state, message = %message, "Channel status");
        self.board.record(channel, state, message.clone());
        self.emit(CheckEvent::Channel {
            channel,
            state,
            message,
        });
        let status = self.board.aggregate();
        self.emit(CheckEvent::Aggregate {
            status,
            message: status.headline().to_string(),
        });
    }

    /// Push a non-status event. A closed receiver only means the adapter
    /// went away; the engine keeps working.
    pub fn emit(&self, event: CheckEvent) {
        let _ = self.sender.send(event);
    }

    pub fn state(&self, channel: Channel) -> ChannelState {
        self.board.state(channel)
    }

    pub fn message(&self, channel: Channel) -> &str {
        self.board.message(channel)
    }

    pub fn aggregate(&self) -> AggregateStatus {
        self.board.aggregate()
    }

    /// Return every channel to pending and tell the adapter about it.
    pub fn reset(&mut self) {
        self.board.reset();
        for channel in [Channel::Connection, Channel::Camera, Channel::Microphone] {
            self.emit(CheckEvent::Channel {
                channel,
                state: ChannelState::Pending,
                message: self.board.message(channel).to_string(),
            });
        }
        self.emit(CheckEvent::Aggregate {
            status: AggregateStatus::Pending,
            message: AggregateStatus::Pending.headline().to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_emits_channel_then_aggregate() {
        let (mut feed, mut events) = StatusFeed::new();
        feed.record(Channel::Camera, ChannelState::Success, "Camera is working");

        match events.try_next() {
            Some(CheckEvent::Channel {
                channel,
                state,
                message,
            }) => {
                assert_eq!(channel, Channel::Camera);
                assert_eq!(state, ChannelState::Success);
                assert_eq!(message, "Camera is working");
            }
            other => panic!("expected channel event, got {other:?}"),
        }
        match events.try_next() {
            Some(CheckEvent::Aggregate { status, .. }) => {
                // Connection and microphone are still pending.
                assert_eq!(status, AggregateStatus::Pending);
            }
            other => panic!("expected aggregate event, got {other:?}"),
        }
        assert!(events.try_next().is_none());
    }

    #[test]
    fn feed_survives_a_dropped_stream() {
        let (mut feed, events) = StatusFeed::new();
        drop(events);
        feed.record(Channel::Connection, ChannelState::Error, "No connection");
        assert_eq!(feed.state(Channel::Connection), ChannelState::Error);
    }

    #[test]
    fn reset_announces_every_channel() {
        let (mut feed, mut events) = StatusFeed::new();
        feed.record(Channel::Camera, ChannelState::Error, "gone");
        while events.try_next().is_some() {}

        feed.reset();
        let mut pending_channels = 0;
        while let Some(event) = events.try_next() {
            match event {
                CheckEvent::Channel { state, .. } => {
                    assert_eq!(state, ChannelState::Pending);
                    pending_channels += 1;
                }
                CheckEvent::Aggregate { status, .. } => {
                    assert_eq!(status, AggregateStatus::Pending)
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
        assert_eq!(pending_channels, 3);
    }

    #[test]
    fn event_kinds_are_stable() {
        let event = CheckEvent::SessionReady {
            audio_tracks: 1,
            video_tracks: 1,
        };
        assert_eq!(event.kind(), "session_ready");
        assert_eq!(CheckEvent::PermissionPromptRequested.kind(), "permission_prompt");
    }
}
