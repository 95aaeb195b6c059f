//! Track handles, streams, and track ownership.
//!
//! A [`MediaTrack`] is a cheaply-cloneable handle to one live capture.
//! Clones share identity and stop state, so any holder can release the
//! underlying device for all of them. Ownership during negotiation is
//! funneled through [`TrackRegistry`] so at most one claimed track per
//! channel exists at any moment.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;

use crate::meter::LevelTap;

/// Kind of media a track carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Granted capture parameters as reported by the backend. These are what
/// the device actually delivered, not what was asked for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct TrackSettings {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<f32>,
}

struct TrackShared {
    id: String,
    kind: TrackKind,
    label: String,
    settings: Option<TrackSettings>,
    tap: Option<Arc<dyn LevelTap>>,
    /// Consumer-side release. Set at most once; never cleared.
    stopped: AtomicBool,
    /// Source-side death (device unplugged, driver gave up).
    ended: AtomicBool,
}

/// Shared handle to one capture track.
///
/// Stopping is idempotent and visible through every clone.
#[derive(Clone)]
pub struct MediaTrack {
    shared: Arc<TrackShared>,
}

impl MediaTrack {
    /// An audio track, optionally with a level tap for metering.
    pub fn audio(
        id: impl Into<String>,
        label: impl Into<String>,
        tap: Option<Arc<dyn LevelTap>>,
    ) -> Self {
        Self {
            shared: Arc::new(TrackShared {
                id: id.into(),
                kind: TrackKind::Audio,
                label: label.into(),
                settings: None,
                tap,
                stopped: AtomicBool::new(false),
                ended: AtomicBool::new(false),
            }),
        }
    }

    /// A video track with whatever settings the backend granted.
    pub fn video(
        id: impl Into<String>,
        label: impl Into<String>,
        settings: Option<TrackSettings>,
    ) -> Self {
        Self {
            shared: Arc::new(TrackShared {
                id: id.into(),
                kind: TrackKind::Video,
                label: label.into(),
                settings,
                tap: None,
                stopped: AtomicBool::new(false),
                ended: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn kind(&self) -> TrackKind {
        self.shared.kind
    }

    pub fn label(&self) -> &str {
        &self.shared.label
    }

    pub fn settings(&self) -> Option<TrackSettings> {
        self.shared.settings
    }

    pub fn level_tap(&self) -> Option<Arc<dyn LevelTap>> {
        self.shared.tap.clone()
    }

    /// Live means neither stopped by a consumer nor ended by the source.
    pub fn is_live(&self) -> bool {
        !self.shared.stopped.load(Ordering::SeqCst) && !self.shared.ended.load(Ordering::SeqCst)
    }

    /// Release the capture. Safe to call from any clone, any number of
    /// times.
    pub fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::SeqCst) {
            tracing::debug!(track = %self.shared.id, kind = ?self.shared.kind, "Track stopped");
        }
    }

    /// Backends flip this when the source dies underneath the consumer.
    pub fn mark_ended(&self) {
        self.shared.ended.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for MediaTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaTrack")
            .field("id", &self.shared.id)
            .field("kind", &self.shared.kind)
            .field("label", &self.shared.label)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Everything one acquisition call returned.
#[derive(Debug, Default)]
pub struct MediaStream {
    tracks: Vec<MediaTrack>,
}

impl MediaStream {
    pub fn new(tracks: Vec<MediaTrack>) -> Self {
        Self { tracks }
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Consume the stream, separating audio tracks from video tracks.
    pub fn split_by_kind(self) -> (Vec<MediaTrack>, Vec<MediaTrack>) {
        self.tracks
            .into_iter()
            .partition(|track| track.kind() == TrackKind::Audio)
    }
}

/// The reconciled output of a negotiation run: equivalents of the winning
/// tracks, possibly captured by different attempts.
///
/// Dropping the session releases every track it still owns.
#[derive(Debug, Default)]
pub struct CombinedSession {
    tracks: Vec<MediaTrack>,
}

impl CombinedSession {
    pub(crate) fn push(&mut self, track: MediaTrack) {
        self.tracks.push(track);
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn audio_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks
            .iter()
            .filter(|track| track.kind() == TrackKind::Audio)
    }

    pub fn video_tracks(&self) -> impl Iterator<Item = &MediaTrack> {
        self.tracks
            .iter()
            .filter(|track| track.kind() == TrackKind::Video)
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn stop_all(&self) {
        for track in &self.tracks {
            track.stop();
        }
    }

    /// Remove and hand back every track of one kind, without stopping
    /// them. Used when splicing in a replacement device.
    pub(crate) fn remove_kind(&mut self, kind: TrackKind) -> Vec<MediaTrack> {
        let (removed, kept) = std::mem::take(&mut self.tracks)
            .into_iter()
            .partition(|track| track.kind() == kind);
        self.tracks = kept;
        removed
    }
}

impl Drop for CombinedSession {
    fn drop(&mut self) {
        self.stop_all();
    }
}

/// At most one owned track per channel during a negotiation run.
///
/// Installing a track displaces and stops any previous owner, so a claim
/// can never leak an earlier capture. Dropping the registry releases
/// whatever it still holds.
#[derive(Debug, Default)]
pub(crate) struct TrackRegistry {
    audio: Option<MediaTrack>,
    video: Option<MediaTrack>,
}

impl TrackRegistry {
    pub(crate) fn install(&mut self, track: MediaTrack) {
        let slot = match track.kind() {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        };
        if let Some(previous) = slot.replace(track) {
            tracing::debug!(track = %previous.id(), "Displacing previously claimed track");
            previous.stop();
        }
    }

    /// Take the claimed track if it is still live. Dead tracks are
    /// stopped and dropped so finalization sees their absence.
    pub(crate) fn take_live(&mut self, kind: TrackKind) -> Option<MediaTrack> {
        let slot = match kind {
            TrackKind::Audio => &mut self.audio,
            TrackKind::Video => &mut self.video,
        };
        match slot.take() {
            Some(track) if track.is_live() => Some(track),
            Some(dead) => {
                dead.stop();
                None
            }
            None => None,
        }
    }
}

impl Drop for TrackRegistry {
    fn drop(&mut self) {
        if let Some(track) = &self.audio {
            track.stop();
        }
        if let Some(track) = &self.video {
            track.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_idempotent_and_shared() {
        let track = MediaTrack::audio("t-1", "mic", None);
        let clone = track.clone();
        assert!(track.is_live());

        clone.stop();
        clone.stop();
        assert!(!track.is_live());
        assert!(!clone.is_live());
    }

    #[test]
    fn ended_tracks_are_not_live() {
        let track = MediaTrack::video("t-2", "cam", None);
        track.mark_ended();
        assert!(!track.is_live());
    }

    #[test]
    fn registry_stops_displaced_tracks() {
        let mut registry = TrackRegistry::default();
        let first = MediaTrack::audio("a-1", "mic", None);
        let second = MediaTrack::audio("a-2", "mic", None);

        registry.install(first.clone());
        registry.install(second.clone());

        assert!(!first.is_live());
        assert!(second.is_live());
        let taken = registry.take_live(TrackKind::Audio);
        assert_eq!(taken.map(|t| t.id().to_string()).as_deref(), Some("a-2"));
    }

    #[test]
    fn registry_drops_dead_tracks_on_take() {
        let mut registry = TrackRegistry::default();
        let track = MediaTrack::video("v-1", "cam", None);
        registry.install(track.clone());
        track.mark_ended();

        assert!(registry.take_live(TrackKind::Video).is_none());
        assert!(!track.is_live());
    }

    #[test]
    fn registry_releases_on_drop() {
        let track = MediaTrack::audio("a-3", "mic", None);
        {
            let mut registry = TrackRegistry::default();
            registry.install(track.clone());
        }
        assert!(!track.is_live());
    }

    #[test]
    fn combined_session_splices_by_kind() {
        let mut session = CombinedSession::default();
        let audio = MediaTrack::audio("a-1", "mic", None);
        let video = MediaTrack::video("v-1", "cam", None);
        session.push(audio.clone());
        session.push(video.clone());

        let removed = session.remove_kind(TrackKind::Audio);
        assert_eq!(removed.len(), 1);
        assert!(removed[0].is_live());
        assert_eq!(session.audio_tracks().count(), 0);
        assert_eq!(session.video_tracks().count(), 1);
        drop(session);
        assert!(!video.is_live());
    }
}
