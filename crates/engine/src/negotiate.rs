//! The negotiation engine.
//!
//! Walks an attempt ladder against a [`DeviceAcquisition`] backend until
//! both device channels succeed or the ladder runs out. Each attempt runs
//! on its own task with a deadline; the engine task is the only writer of
//! channel status, so attempt tasks never race each other's verdicts.
//! Results that arrive after their attempt was abandoned are still
//! inspected: live tracks may be claimed for channels that remain
//! unresolved, and everything else is released immediately.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::acquisition::{AcquireError, DeviceAcquisition, StreamConstraints};
use crate::events::{CheckEvent, StatusFeed};
use crate::ladder::AttemptSpec;
use crate::status::{Channel, ChannelState};
use crate::track::{CombinedSession, MediaStream, MediaTrack, TrackKind, TrackRegistry};

const MSG_UNSUPPORTED: &str = "Media capture is not supported in this environment";
const MSG_ALL_ATTEMPTS_FAILED: &str = "Device not available after all attempts";
const MSG_TRACK_DIED: &str = "Device stopped before the check finished";

/// Where a negotiation run currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NegotiationState {
    #[default]
    Idle,
    /// Waiting on the attempt at this ladder index.
    Attempting(usize),
    Finalizing,
    Done,
}

#[derive(Debug)]
struct AttemptOutcome {
    index: usize,
    result: Result<MediaStream, AcquireError>,
}

/// Drives the attempt ladder against an acquisition backend.
pub struct Negotiator {
    client: Arc<dyn DeviceAcquisition>,
    attempt_timeout: Duration,
    state: NegotiationState,
}

impl Negotiator {
    pub fn new(client: Arc<dyn DeviceAcquisition>, attempt_timeout: Duration) -> Self {
        Self {
            client,
            attempt_timeout,
            state: NegotiationState::Idle,
        }
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    /// Walk `ladder` until camera and microphone both read success or the
    /// rungs run out, then reconcile whatever was claimed into a
    /// [`CombinedSession`].
    ///
    /// Already-successful channels are never re-requested: combined rungs
    /// are narrowed to the channels still wanted before dispatch. A rung
    /// that outlives the attempt timeout is abandoned in place and its
    /// requested channels move to `ErrorTimeout` until something later
    /// resolves them; by the time this returns, every channel is pending,
    /// success, warning, or error.
    pub async fn negotiate(
        &mut self,
        ladder: &[AttemptSpec],
        feed: &mut StatusFeed,
    ) -> CombinedSession {
        if !self.client.is_supported() {
            tracing::warn!("Media capture unsupported; skipping the attempt ladder");
            feed.record(Channel::Camera, ChannelState::Error, MSG_UNSUPPORTED);
            feed.record(Channel::Microphone, ChannelState::Error, MSG_UNSUPPORTED);
            self.state = NegotiationState::Done;
            return CombinedSession::default();
        }

        let (outcomes_tx, mut outcomes) = mpsc::unbounded_channel();
        let mut registry = TrackRegistry::default();

        'ladder: for (index, spec) in ladder.iter().enumerate() {
            if both_devices_succeeded(feed) {
                break;
            }

            let want_audio =
                spec.affinity.wants_audio() && !feed.state(Channel::Microphone).is_success();
            let want_video =
                spec.affinity.wants_video() && !feed.state(Channel::Camera).is_success();
            if !want_audio && !want_video {
                tracing::debug!(attempt = spec.name, "Skipping rung; channels already satisfied");
                continue;
            }
            if spec.requires_microphone && !feed.state(Channel::Microphone).is_success() {
                tracing::debug!(attempt = spec.name, "Skipping rung; microphone prerequisite unmet");
                continue;
            }

            self.state = NegotiationState::Attempting(index);
            tracing::info!(
                attempt = spec.name,
                index,
                want_audio,
                want_video,
                "Dispatching acquisition attempt"
            );
            self.dispatch(index, spec.constraints(want_audio, want_video), &outcomes_tx);

            let deadline = Instant::now() + self.attempt_timeout;
            loop {
                tokio::select! {
                    outcome = outcomes.recv() => {
                        // recv cannot yield None while we hold a sender.
                        let Some(outcome) = outcome else { break };
                        if outcome.index == index {
                            match outcome.result {
                                Ok(stream) => claim_stream(
                                    spec.name, stream, want_audio, want_video, feed, &mut registry,
                                ),
                                Err(error) => {
                                    record_failure(spec, &error, want_audio, want_video, feed)
                                }
                            }
                            break;
                        }
                        absorb_late_outcome(ladder, outcome, feed, &mut registry);
                        if both_devices_succeeded(feed) {
                            break 'ladder;
                        }
                    }
                    _ = tokio::time::sleep_until(deadline) => {
                        expire_attempt(spec, self.attempt_timeout, want_audio, want_video, feed);
                        break;
                    }
                }
            }
        }

        self.state = NegotiationState::Finalizing;
        // Close, then drain: results already queued still come out of
        // try_recv, while anything sent from here on bounces back to its
        // dispatch task, which stops the stream itself.
        outcomes.close();
        while let Ok(outcome) = outcomes.try_recv() {
            absorb_late_outcome(ladder, outcome, feed, &mut registry);
        }
        let session = finalize(&mut registry, feed);
        self.state = NegotiationState::Done;
        session
    }

    /// Run one acquisition call on its own task. The task owns nothing:
    /// if the run is gone by the time it finishes, it stops whatever it
    /// captured and exits.
    fn dispatch(
        &self,
        index: usize,
        constraints: StreamConstraints,
        outcomes: &mpsc::UnboundedSender<AttemptOutcome>,
    ) {
        let client = Arc::clone(&self.client);
        let outcomes = outcomes.clone();
        tokio::spawn(async move {
            let result = client.acquire(constraints).await;
            if let Err(unsent) = outcomes.send(AttemptOutcome { index, result }) {
                if let AttemptOutcome {
                    result: Ok(stream), ..
                } = unsent.0
                {
                    tracing::debug!(index, "Stopping stream from an attempt that outlived its run");
                    stream.stop_all();
                }
            }
        });
    }
}

fn both_devices_succeeded(feed: &StatusFeed) -> bool {
    feed.state(Channel::Camera).is_success() && feed.state(Channel::Microphone).is_success()
}

fn success_message(channel: Channel) -> &'static str {
    match channel {
        Channel::Camera => "Camera is working",
        Channel::Microphone => "Microphone is working",
        Channel::Connection => "Connected",
    }
}

fn timed_out_message(channel: Channel) -> &'static str {
    match channel {
        Channel::Camera => "Camera check timed out; trying different settings",
        Channel::Microphone => "Microphone check timed out; trying different settings",
        Channel::Connection => "Check timed out",
    }
}

/// Apply a completed attempt's stream: claim one live track per wanted,
/// not-yet-successful channel and release the rest.
fn claim_stream(
    attempt: &str,
    stream: MediaStream,
    want_audio: bool,
    want_video: bool,
    feed: &mut StatusFeed,
    registry: &mut TrackRegistry,
) {
    let (audio, video) = stream.split_by_kind();
    let claim_audio = want_audio && !feed.state(Channel::Microphone).is_success();
    let claim_video = want_video && !feed.state(Channel::Camera).is_success();
    claim_tracks(attempt, Channel::Microphone, audio, claim_audio, feed, registry);
    claim_tracks(attempt, Channel::Camera, video, claim_video, feed, registry);
}

fn claim_tracks(
    attempt: &str,
    channel: Channel,
    tracks: Vec<MediaTrack>,
    claimable: bool,
    feed: &mut StatusFeed,
    registry: &mut TrackRegistry,
) {
    if !claimable {
        for track in tracks {
            track.stop();
        }
        return;
    }
    let mut tracks = tracks.into_iter();
    let claimed = loop {
        match tracks.next() {
            Some(track) if track.is_live() => break Some(track),
            Some(dead) => dead.stop(),
            None => break None,
        }
    };
    match claimed {
        Some(track) => {
            tracing::debug!(
                attempt,
                channel = %channel,
                track = %track.id(),
                settings = ?track.settings(),
                "Claimed track"
            );
            registry.install(track);
            feed.record(channel, ChannelState::Success, success_message(channel));
        }
        None => {
            // Leave the channel unresolved so a later rung can still
            // claim it.
            tracing::debug!(attempt, channel = %channel, "Wanted track missing or dead on arrival");
        }
    }
    for extra in tracks {
        extra.stop();
    }
}

/// Mark the channels a failed attempt requested, never downgrading a
/// success some earlier rung already produced.
fn record_failure(
    spec: &AttemptSpec,
    error: &AcquireError,
    want_audio: bool,
    want_video: bool,
    feed: &mut StatusFeed,
) {
    if error.is_internal_bug() {
        tracing::error!(attempt = spec.name, error = %error, "Constraint set rejected as invalid");
    } else {
        tracing::info!(attempt = spec.name, error = %error, "Attempt failed");
    }
    let message = error.status_message();
    if want_audio && !feed.state(Channel::Microphone).is_success() {
        feed.record(Channel::Microphone, ChannelState::Error, message.clone());
    }
    if want_video && !feed.state(Channel::Camera).is_success() {
        feed.record(Channel::Camera, ChannelState::Error, message.clone());
    }
    if error.reopens_permission_prompt() {
        feed.emit(CheckEvent::PermissionPromptRequested);
    }
}

/// An attempt blew through its deadline. Its requested channels move to
/// the transient timeout state; the attempt itself keeps running and may
/// still deliver a late, claimable stream.
fn expire_attempt(
    spec: &AttemptSpec,
    timeout: Duration,
    want_audio: bool,
    want_video: bool,
    feed: &mut StatusFeed,
) {
    tracing::warn!(
        attempt = spec.name,
        timeout_ms = timeout.as_millis() as u64,
        "Attempt timed out; moving on"
    );
    let targets = [
        (want_audio, Channel::Microphone),
        (want_video, Channel::Camera),
    ];
    for (wanted, channel) in targets {
        if wanted && feed.state(channel).is_pending() {
            feed.record(channel, ChannelState::ErrorTimeout, timed_out_message(channel));
        }
    }
}

/// Fold in a result from an attempt the run already moved past. Live
/// tracks are claimed for channels still unresolved; late failures carry
/// no information a newer attempt has not already superseded.
fn absorb_late_outcome(
    ladder: &[AttemptSpec],
    outcome: AttemptOutcome,
    feed: &mut StatusFeed,
    registry: &mut TrackRegistry,
) {
    let attempt = ladder
        .get(outcome.index)
        .map(|spec| spec.name)
        .unwrap_or("unknown");
    match outcome.result {
        Ok(stream) => {
            tracing::debug!(attempt, "Late stream from an abandoned attempt");
            let (audio, video) = stream.split_by_kind();
            let claim_audio = !feed.state(Channel::Microphone).is_resolved();
            let claim_video = !feed.state(Channel::Camera).is_resolved();
            claim_tracks(attempt, Channel::Microphone, audio, claim_audio, feed, registry);
            claim_tracks(attempt, Channel::Camera, video, claim_video, feed, registry);
        }
        Err(error) => {
            tracing::debug!(attempt, error = %error, "Discarding late failure");
        }
    }
}

/// Reconcile claims against final channel states. Guarantees that a
/// channel reads success if and only if the session carries a live track
/// for it, and that nothing leaves here in a transient state.
fn finalize(registry: &mut TrackRegistry, feed: &mut StatusFeed) -> CombinedSession {
    let mut session = CombinedSession::default();
    let channels = [
        (TrackKind::Audio, Channel::Microphone),
        (TrackKind::Video, Channel::Camera),
    ];
    for (kind, channel) in channels {
        match (feed.state(channel), registry.take_live(kind)) {
            (ChannelState::Success, Some(track)) => session.push(track),
            (ChannelState::Success, None) => {
                tracing::warn!(channel = %channel, "Claimed track died before finalization");
                feed.record(channel, ChannelState::Error, MSG_TRACK_DIED);
            }
            (state, leftover) if !state.is_resolved() => {
                if let Some(track) = leftover {
                    track.stop();
                }
                feed.record(channel, ChannelState::Error, MSG_ALL_ATTEMPTS_FAILED);
            }
            (_, Some(track)) => track.stop(),
            (_, None) => {}
        }
    }
    tracing::info!(
        audio = session.audio_tracks().count(),
        video = session.video_tracks().count(),
        aggregate = %feed.aggregate(),
        "Negotiation finalized"
    );
    session
}
