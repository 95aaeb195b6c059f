//! Pre-flight session orchestration.
//!
//! A [`PreflightSession`] owns one user's check from the reachability
//! probe to the final go/no-go verdict: it drives the negotiator, wires
//! the level meter to the claimed microphone, keeps the device inventory
//! fresh, and answers adapter intents. Channel-level failures never
//! surface as `Err` values here; they land in the status board. The error
//! type below is reserved for misuse of the session itself.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use greenroom_common::config::CheckConfig;

use crate::acquisition::{
    AudioConstraints, DeviceAcquisition, DeviceDescriptor, DeviceKind, StreamConstraints,
    VideoConstraints,
};
use crate::events::{CheckEvent, EventStream, StatusFeed, UserIntent};
use crate::ladder::{audio_only_ladder, standard_ladder};
use crate::meter::{AudioLevelMeter, LevelReading};
use crate::negotiate::Negotiator;
use crate::reachability::ReachabilityCheck;
use crate::status::{AggregateStatus, Channel, ChannelState};
use crate::track::{CombinedSession, TrackKind, TrackSettings};

/// Session misuse errors.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("no combined session exists; run the media check first")]
    SessionNotReady,
    #[error("device switching applies to the camera or microphone")]
    NotADeviceChannel,
    #[error("session is suspended")]
    Suspended,
}

/// One user's pre-flight check, from probe to verdict.
pub struct PreflightSession {
    config: CheckConfig,
    client: Arc<dyn DeviceAcquisition>,
    feed: StatusFeed,
    negotiator: Negotiator,
    meter: AudioLevelMeter,
    combined: Option<CombinedSession>,
    devices: Vec<DeviceDescriptor>,
    suspended: bool,
    started_at: DateTime<Utc>,
    started_instant: Instant,
}

impl PreflightSession {
    /// Create a session and the event stream its adapter will consume.
    pub fn new(config: CheckConfig, client: Arc<dyn DeviceAcquisition>) -> (Self, EventStream) {
        let (feed, events) = StatusFeed::new();
        let negotiator = Negotiator::new(Arc::clone(&client), config.attempt_timeout());
        let meter = AudioLevelMeter::new(config.meter_interval());
        (
            Self {
                config,
                client,
                feed,
                negotiator,
                meter,
                combined: None,
                devices: Vec::new(),
                suspended: false,
                started_at: Utc::now(),
                started_instant: Instant::now(),
            },
            events,
        )
    }

    /// Probe reachability and ask the adapter to offer the permission
    /// prompt. Media negotiation waits for an explicit intent so the
    /// prompt never appears unannounced.
    pub async fn start(&mut self) {
        self.started_at = Utc::now();
        self.started_instant = Instant::now();
        tracing::info!(endpoint = %self.config.probe_endpoint, "Starting pre-flight checks");
        self.feed
            .record(Channel::Connection, ChannelState::Pending, "Testing connection...");
        self.feed
            .record(Channel::Camera, ChannelState::Pending, "Waiting for permission...");
        self.feed
            .record(Channel::Microphone, ChannelState::Pending, "Waiting for permission...");
        self.run_probe().await;
        self.feed.emit(CheckEvent::PermissionPromptRequested);
    }

    /// Dispatch one adapter intent.
    pub async fn handle_intent(&mut self, intent: UserIntent) -> Result<(), EngineError> {
        tracing::debug!(intent = ?intent, "Handling intent");
        match intent {
            UserIntent::RequestPermission => self.run_media_check().await,
            UserIntent::Retry => self.retry().await,
            UserIntent::AudioOnly => self.audio_only().await,
            UserIntent::SwitchDevice { channel, device_id } => {
                self.switch_device(channel, &device_id).await
            }
            UserIntent::Suspend => {
                self.suspend();
                Ok(())
            }
            UserIntent::Resume => {
                self.resume().await;
                Ok(())
            }
        }
    }

    /// Walk the standard ladder and reconcile the results. Supersedes any
    /// combined session a previous run produced.
    pub async fn run_media_check(&mut self) -> Result<(), EngineError> {
        self.guard_active()?;
        self.release_media();
        self.feed
            .record(Channel::Camera, ChannelState::Pending, "Requesting permission...");
        self.feed
            .record(Channel::Microphone, ChannelState::Pending, "Requesting permission...");
        let ladder = standard_ladder();
        let session = self.negotiator.negotiate(&ladder, &mut self.feed).await;
        self.install_combined(session).await;
        Ok(())
    }

    /// Reset every channel and run the whole check again.
    pub async fn retry(&mut self) -> Result<(), EngineError> {
        self.guard_active()?;
        tracing::info!("Retrying all checks");
        self.release_media();
        self.feed.reset();
        self.feed
            .record(Channel::Connection, ChannelState::Pending, "Testing connection...");
        self.run_probe().await;
        self.run_media_check().await
    }

    /// Capture the microphone alone. The camera is deliberately parked in
    /// a warning state rather than an error: the user chose this mode.
    pub async fn audio_only(&mut self) -> Result<(), EngineError> {
        self.guard_active()?;
        tracing::info!("Falling back to audio-only capture");
        self.release_media();
        self.feed
            .record(Channel::Camera, ChannelState::Warning, "Audio-only mode");
        self.feed
            .record(Channel::Microphone, ChannelState::Pending, "Requesting permission...");
        let ladder = audio_only_ladder();
        let session = self.negotiator.negotiate(&ladder, &mut self.feed).await;
        self.install_combined(session).await;
        Ok(())
    }

    /// Swap one channel onto a specific device inside the existing
    /// combined session. The old track is stopped before the new request
    /// goes out; exclusive devices cannot be opened twice. Failure leaves
    /// the channel in error with nothing to roll back to.
    pub async fn switch_device(
        &mut self,
        channel: Channel,
        device_id: &str,
    ) -> Result<(), EngineError> {
        self.guard_active()?;
        let kind = match channel {
            Channel::Camera => TrackKind::Video,
            Channel::Microphone => TrackKind::Audio,
            Channel::Connection => return Err(EngineError::NotADeviceChannel),
        };
        if self.combined.is_none() {
            return Err(EngineError::SessionNotReady);
        }

        tracing::info!(channel = %channel, device = device_id, "Switching device");
        self.feed
            .record(channel, ChannelState::Pending, "Switching device...");
        if kind == TrackKind::Audio {
            self.meter.detach();
        }
        if let Some(combined) = self.combined.as_mut() {
            for track in combined.remove_kind(kind) {
                track.stop();
            }
        }

        let constraints = match kind {
            TrackKind::Audio => StreamConstraints {
                audio: Some(AudioConstraints::with_device(device_id)),
                video: None,
            },
            TrackKind::Video => {
                StreamConstraints::video_only(VideoConstraints::any().with_device(device_id))
            }
        };

        let acquired =
            tokio::time::timeout(self.config.attempt_timeout(), self.client.acquire(constraints))
                .await;
        match acquired {
            Ok(Ok(stream)) => {
                let (audio, video) = stream.split_by_kind();
                let (candidates, offkind) = match kind {
                    TrackKind::Audio => (audio, video),
                    TrackKind::Video => (video, audio),
                };
                for track in offkind {
                    track.stop();
                }
                let mut candidates = candidates.into_iter();
                let replacement = loop {
                    match candidates.next() {
                        Some(track) if track.is_live() => break Some(track),
                        Some(dead) => dead.stop(),
                        None => break None,
                    }
                };
                for extra in candidates {
                    extra.stop();
                }

                match replacement {
                    Some(track) => {
                        let mut state = ChannelState::Success;
                        let mut message = match channel {
                            Channel::Camera => "Camera is working",
                            _ => "Microphone is working",
                        };
                        if kind == TrackKind::Audio {
                            if let Err(error) = self.meter.attach(&track) {
                                tracing::warn!(error = %error, "Level metering unavailable on switched device");
                                state = ChannelState::Warning;
                                message = "Microphone works, but level metering is unavailable";
                            }
                        }
                        self.feed.record(channel, state, message);
                        if let Some(combined) = self.combined.as_mut() {
                            combined.push(track);
                            self.feed.emit(CheckEvent::SessionReady {
                                audio_tracks: combined.audio_tracks().count(),
                                video_tracks: combined.video_tracks().count(),
                            });
                        }
                    }
                    None => {
                        self.feed.record(
                            channel,
                            ChannelState::Error,
                            "Selected device did not produce a track",
                        );
                    }
                }
                Ok(())
            }
            Ok(Err(error)) => {
                tracing::warn!(channel = %channel, error = %error, "Device switch failed");
                self.feed
                    .record(channel, ChannelState::Error, error.status_message());
                if error.reopens_permission_prompt() {
                    self.feed.emit(CheckEvent::PermissionPromptRequested);
                }
                Ok(())
            }
            Err(_) => {
                tracing::warn!(channel = %channel, "Device switch timed out");
                self.feed
                    .record(channel, ChannelState::Error, "Device switch timed out");
                Ok(())
            }
        }
    }

    /// The surface went to the background: release every capture device
    /// but keep the verdicts on the board.
    pub fn suspend(&mut self) {
        if self.suspended {
            return;
        }
        tracing::info!("Suspending; releasing capture devices");
        self.release_media();
        self.suspended = true;
    }

    /// Back in the foreground: re-check reachability only. Reopening
    /// capture devices unprompted would surprise the user, so media waits
    /// for a fresh intent.
    pub async fn resume(&mut self) {
        if !self.suspended {
            return;
        }
        self.suspended = false;
        tracing::info!("Resuming; re-checking reachability");
        self.run_probe().await;
    }

    pub fn combined(&self) -> Option<&CombinedSession> {
        self.combined.as_ref()
    }

    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    pub fn channel_state(&self, channel: Channel) -> ChannelState {
        self.feed.state(channel)
    }

    pub fn aggregate(&self) -> AggregateStatus {
        self.feed.aggregate()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Subscribe to microphone level readings. Resets to silence whenever
    /// the meter is detached.
    pub fn level_readings(&self) -> watch::Receiver<LevelReading> {
        self.meter.subscribe()
    }

    /// Snapshot the whole check for headless consumers.
    pub fn report(&self) -> CheckReport {
        let mut audio_tracks = Vec::new();
        let mut video_tracks = Vec::new();
        if let Some(combined) = &self.combined {
            for track in combined.tracks() {
                let summary = TrackSummary {
                    id: track.id().to_string(),
                    label: track.label().to_string(),
                    settings: track.settings(),
                };
                match track.kind() {
                    TrackKind::Audio => audio_tracks.push(summary),
                    TrackKind::Video => video_tracks.push(summary),
                }
            }
        }

        let mut cameras_seen = 0usize;
        let mut microphones_seen = 0usize;
        let devices = self
            .devices
            .iter()
            .map(|device| {
                let index = match device.kind {
                    DeviceKind::Camera => {
                        cameras_seen += 1;
                        cameras_seen - 1
                    }
                    DeviceKind::Microphone => {
                        microphones_seen += 1;
                        microphones_seen - 1
                    }
                };
                DeviceSummary {
                    kind: device.kind,
                    id: device.id.clone(),
                    name: device.display_name(index),
                }
            })
            .collect();

        let aggregate = self.feed.aggregate();
        CheckReport {
            started_at: self.started_at,
            elapsed_ms: self.started_instant.elapsed().as_millis() as u64,
            channels: ChannelsReport {
                connection: self.channel_entry(Channel::Connection),
                camera: self.channel_entry(Channel::Camera),
                microphone: self.channel_entry(Channel::Microphone),
            },
            aggregate,
            go: aggregate.is_go(),
            audio_tracks,
            video_tracks,
            devices,
        }
    }

    async fn run_probe(&mut self) {
        let probe = ReachabilityCheck::from_config(&self.config);
        let outcome = probe.run().await;
        tracing::info!(outcome = ?outcome, "Reachability probe finished");
        self.feed
            .record(Channel::Connection, outcome.channel_state(), outcome.message());
    }

    /// Adopt a freshly negotiated combined session: wire the meter to the
    /// claimed microphone, announce the session, and re-enumerate devices
    /// once labels have had a moment to unlock.
    async fn install_combined(&mut self, session: CombinedSession) {
        if self.feed.state(Channel::Microphone).is_success() {
            if let Some(track) = session.audio_tracks().next() {
                if let Err(error) = self.meter.attach(track) {
                    tracing::warn!(error = %error, "Level metering unavailable");
                    self.feed.record(
                        Channel::Microphone,
                        ChannelState::Warning,
                        "Microphone works, but level metering is unavailable",
                    );
                }
            }
        }

        let audio_tracks = session.audio_tracks().count();
        let video_tracks = session.video_tracks().count();
        let announce = !session.is_empty();
        if let Some(previous) = self.combined.replace(session) {
            previous.stop_all();
        }
        if announce {
            self.feed.emit(CheckEvent::SessionReady {
                audio_tracks,
                video_tracks,
            });
        }

        tokio::time::sleep(self.config.enumerate_settle()).await;
        self.refresh_devices().await;
    }

    async fn refresh_devices(&mut self) {
        match self.client.enumerate().await {
            Ok(devices) => {
                tracing::debug!(count = devices.len(), "Devices enumerated");
                self.devices = devices.clone();
                self.feed.emit(CheckEvent::Devices { devices });
            }
            Err(error) => tracing::warn!(error = %error, "Device enumeration failed"),
        }
    }

    fn release_media(&mut self) {
        self.meter.detach();
        if let Some(combined) = self.combined.take() {
            combined.stop_all();
        }
    }

    fn guard_active(&self) -> Result<(), EngineError> {
        if self.suspended {
            Err(EngineError::Suspended)
        } else {
            Ok(())
        }
    }

    fn channel_entry(&self, channel: Channel) -> ChannelEntry {
        ChannelEntry {
            state: self.feed.state(channel),
            message: self.feed.message(channel).to_string(),
        }
    }
}

/// Final verdict plus everything a headless consumer needs to show it.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub channels: ChannelsReport,
    pub aggregate: AggregateStatus,
    pub go: bool,
    pub audio_tracks: Vec<TrackSummary>,
    pub video_tracks: Vec<TrackSummary>,
    pub devices: Vec<DeviceSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelsReport {
    pub connection: ChannelEntry,
    pub camera: ChannelEntry,
    pub microphone: ChannelEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelEntry {
    pub state: ChannelState,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<TrackSettings>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceSummary {
    pub kind: DeviceKind,
    pub id: String,
    pub name: String,
}
