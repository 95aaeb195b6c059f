//! Scripted acquisition backend.
//!
//! Stands in for real capture hardware in tests and in the CLI harness. A
//! [`Scenario`] describes the device inventory plus an ordered script of
//! outcomes; each `acquire` call consumes one step, and the last step
//! repeats once the script runs out. Requests naming a device missing
//! from the inventory fail before the script is consulted.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use greenroom_common::error::{GreenroomError, GreenroomResult};

use crate::acquisition::{
    AcquireError, DeviceAcquisition, DeviceDescriptor, DeviceKind, FrameRate, StreamConstraints,
    VideoConstraints,
};
use crate::meter::LevelTap;
use crate::track::{MediaStream, MediaTrack, TrackSettings};

/// How one requested track materializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackGrant {
    /// A live track, with a level tap on audio.
    #[default]
    Live,
    /// Live, but without analysis support.
    Untapped,
    /// Present in the stream but already ended.
    Dead,
    /// Absent from the stream entirely.
    Missing,
}

/// One scripted response to an acquire call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioStep {
    /// Produce tracks for whichever kinds the call requested.
    Grant {
        #[serde(default)]
        audio: TrackGrant,
        #[serde(default)]
        video: TrackGrant,
        #[serde(default)]
        delay_ms: u64,
    },
    /// Fail the call.
    Fail {
        cause: AcquireError,
        #[serde(default)]
        delay_ms: u64,
    },
    /// Never answer within any reasonable attempt timeout.
    Hang,
}

/// A replayable environment: device inventory plus scripted outcomes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_supported")]
    pub supported: bool,
    #[serde(default)]
    pub devices: Vec<DeviceDescriptor>,
    #[serde(default)]
    pub steps: Vec<ScenarioStep>,
    /// Steady microphone energy for granted audio tracks, in `[0, 1]`.
    #[serde(default = "default_mic_energy")]
    pub mic_energy: f32,
}

fn default_supported() -> bool {
    true
}

fn default_mic_energy() -> f32 {
    0.5
}

impl Default for Scenario {
    fn default() -> Self {
        Self::healthy()
    }
}

impl Scenario {
    /// A rig where everything works on the first try.
    pub fn healthy() -> Self {
        Self {
            supported: true,
            devices: vec![
                DeviceDescriptor::new(DeviceKind::Camera, "sim-cam-0", "Integrated Camera"),
                DeviceDescriptor::new(DeviceKind::Microphone, "sim-mic-0", "Built-in Microphone"),
            ],
            steps: vec![ScenarioStep::Grant {
                audio: TrackGrant::Live,
                video: TrackGrant::Live,
                delay_ms: 0,
            }],
            mic_energy: 0.5,
        }
    }

    /// Load and validate a scenario from a JSON file.
    pub fn from_file(path: &Path) -> GreenroomResult<Self> {
        if !path.exists() {
            return Err(GreenroomError::FileNotFound {
                path: path.to_path_buf(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let scenario: Scenario = serde_json::from_str(&content)?;
        if !(0.0..=1.0).contains(&scenario.mic_energy) {
            return Err(GreenroomError::scenario(format!(
                "mic_energy must be within [0, 1], got {}",
                scenario.mic_energy
            )));
        }
        Ok(scenario)
    }
}

/// Constant-energy level tap for simulated audio tracks.
#[derive(Debug)]
struct SteadyTap {
    energy: f32,
}

impl LevelTap for SteadyTap {
    fn energy_bins(&self) -> Vec<f32> {
        vec![self.energy; 32]
    }
}

#[derive(Debug)]
struct Script {
    queue: VecDeque<ScenarioStep>,
    last: Option<ScenarioStep>,
}

impl Script {
    fn next_step(&mut self) -> ScenarioStep {
        if let Some(step) = self.queue.pop_front() {
            self.last = Some(step.clone());
            return step;
        }
        self.last.clone().unwrap_or(ScenarioStep::Grant {
            audio: TrackGrant::Live,
            video: TrackGrant::Live,
            delay_ms: 0,
        })
    }
}

/// Scripted [`DeviceAcquisition`] implementation.
pub struct SimulatedAcquisition {
    supported: bool,
    devices: Vec<DeviceDescriptor>,
    mic_energy: f32,
    script: Mutex<Script>,
    /// Device labels stay hidden until the first successful grant.
    labels_granted: AtomicBool,
    acquire_calls: AtomicUsize,
    track_seq: AtomicUsize,
    minted: Mutex<Vec<MediaTrack>>,
}

impl SimulatedAcquisition {
    pub fn new(scenario: Scenario) -> Self {
        Self {
            supported: scenario.supported,
            devices: scenario.devices,
            mic_energy: scenario.mic_energy,
            script: Mutex::new(Script {
                queue: scenario.steps.into(),
                last: None,
            }),
            labels_granted: AtomicBool::new(false),
            acquire_calls: AtomicUsize::new(0),
            track_seq: AtomicUsize::new(0),
            minted: Mutex::new(Vec::new()),
        }
    }

    /// How many acquire calls were made, counting scripted and repeated
    /// steps alike.
    pub fn acquire_calls(&self) -> usize {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    /// Handles to every track this backend has minted, in mint order.
    pub fn minted_tracks(&self) -> Vec<MediaTrack> {
        self.minted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn has_device(&self, kind: DeviceKind, id: &str) -> bool {
        self.devices
            .iter()
            .any(|device| device.kind == kind && device.id == id)
    }

    fn device_label(&self, kind: DeviceKind) -> String {
        self.devices
            .iter()
            .find(|device| device.kind == kind)
            .and_then(|device| device.label.clone())
            .unwrap_or_else(|| match kind {
                DeviceKind::Camera => "Simulated Camera".to_string(),
                DeviceKind::Microphone => "Simulated Microphone".to_string(),
            })
    }

    fn next_track_id(&self, prefix: &str) -> String {
        let seq = self.track_seq.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{seq}")
    }

    fn remember(&self, track: &MediaTrack) {
        self.minted
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(track.clone());
    }

    fn make_audio_track(&self, grant: TrackGrant) -> Option<MediaTrack> {
        let tap: Option<Arc<dyn LevelTap>> = match grant {
            TrackGrant::Missing => return None,
            TrackGrant::Untapped => None,
            TrackGrant::Live | TrackGrant::Dead => Some(Arc::new(SteadyTap {
                energy: self.mic_energy,
            })),
        };
        let track = MediaTrack::audio(
            self.next_track_id("sim-audio"),
            self.device_label(DeviceKind::Microphone),
            tap,
        );
        if grant == TrackGrant::Dead {
            track.mark_ended();
        }
        self.remember(&track);
        Some(track)
    }

    fn make_video_track(
        &self,
        grant: TrackGrant,
        requested: Option<&VideoConstraints>,
    ) -> Option<MediaTrack> {
        if grant == TrackGrant::Missing {
            return None;
        }
        let shape = requested.cloned().unwrap_or_default();
        let settings = TrackSettings {
            width: Some(shape.width.unwrap_or(640)),
            height: Some(shape.height.unwrap_or(480)),
            frame_rate: Some(match shape.frame_rate {
                Some(FrameRate::Ideal(rate)) | Some(FrameRate::Max(rate)) => rate as f32,
                None => 30.0,
            }),
        };
        let track = MediaTrack::video(
            self.next_track_id("sim-video"),
            self.device_label(DeviceKind::Camera),
            Some(settings),
        );
        if grant == TrackGrant::Dead {
            track.mark_ended();
        }
        self.remember(&track);
        Some(track)
    }

    fn next_step(&self) -> ScenarioStep {
        let mut script = self
            .script
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        script.next_step()
    }
}

#[async_trait]
impl DeviceAcquisition for SimulatedAcquisition {
    async fn acquire(&self, constraints: StreamConstraints) -> Result<MediaStream, AcquireError> {
        self.acquire_calls.fetch_add(1, Ordering::SeqCst);
        if !self.supported {
            return Err(AcquireError::Unsupported);
        }
        if constraints.is_empty() {
            return Err(AcquireError::InvalidConfiguration {
                message: "neither audio nor video was requested".to_string(),
            });
        }
        if let Some(id) = constraints.audio.as_ref().and_then(|a| a.device_id.as_deref()) {
            if !self.has_device(DeviceKind::Microphone, id) {
                return Err(AcquireError::NotFound);
            }
        }
        if let Some(id) = constraints.video.as_ref().and_then(|v| v.device_id.as_deref()) {
            if !self.has_device(DeviceKind::Camera, id) {
                return Err(AcquireError::NotFound);
            }
        }

        match self.next_step() {
            ScenarioStep::Grant {
                audio,
                video,
                delay_ms,
            } => {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                let mut tracks = Vec::new();
                if constraints.wants_audio() {
                    tracks.extend(self.make_audio_track(audio));
                }
                if constraints.wants_video() {
                    tracks.extend(self.make_video_track(video, constraints.video.as_ref()));
                }
                self.labels_granted.store(true, Ordering::SeqCst);
                tracing::debug!(tracks = tracks.len(), "Simulated grant");
                Ok(MediaStream::new(tracks))
            }
            ScenarioStep::Fail { cause, delay_ms } => {
                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                tracing::debug!(cause = %cause, "Simulated failure");
                Err(cause)
            }
            ScenarioStep::Hang => {
                tracing::debug!("Simulated hang");
                tokio::time::sleep(Duration::from_secs(86_400)).await;
                Err(AcquireError::Aborted)
            }
        }
    }

    async fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, AcquireError> {
        if !self.supported {
            return Err(AcquireError::Unsupported);
        }
        let granted = self.labels_granted.load(Ordering::SeqCst);
        Ok(self
            .devices
            .iter()
            .map(|device| DeviceDescriptor {
                kind: device.kind,
                id: device.id.clone(),
                label: if granted { device.label.clone() } else { None },
            })
            .collect())
    }

    fn is_supported(&self) -> bool {
        self.supported
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn script_repeats_its_last_step() {
        let sim = SimulatedAcquisition::new(Scenario {
            steps: vec![ScenarioStep::Fail {
                cause: AcquireError::NotFound,
                delay_ms: 0,
            }],
            ..Scenario::healthy()
        });
        for _ in 0..3 {
            let result = sim.acquire(StreamConstraints::audio_only()).await;
            assert_eq!(result.unwrap_err(), AcquireError::NotFound);
        }
        assert_eq!(sim.acquire_calls(), 3);
    }

    #[tokio::test]
    async fn empty_script_always_grants() {
        let sim = SimulatedAcquisition::new(Scenario {
            steps: Vec::new(),
            ..Scenario::healthy()
        });
        let stream = sim
            .acquire(StreamConstraints::audio_video(VideoConstraints::any()))
            .await
            .unwrap();
        assert_eq!(stream.tracks().len(), 2);
    }

    #[tokio::test]
    async fn labels_stay_hidden_until_the_first_grant() {
        let sim = SimulatedAcquisition::new(Scenario::healthy());
        let before = sim.enumerate().await.unwrap();
        assert!(before.iter().all(|device| device.label.is_none()));
        assert_eq!(before.len(), 2);

        sim.acquire(StreamConstraints::audio_only()).await.unwrap();
        let after = sim.enumerate().await.unwrap();
        assert!(after.iter().all(|device| device.label.is_some()));
    }

    #[tokio::test]
    async fn stopping_the_unlock_grant_keeps_labels_visible() {
        let sim = SimulatedAcquisition::new(Scenario::healthy());
        let stream = sim.acquire(StreamConstraints::audio_only()).await.unwrap();
        stream.stop_all();

        let devices = sim.enumerate().await.unwrap();
        assert!(devices.iter().all(|device| device.label.is_some()));
        assert!(sim.minted_tracks().iter().all(|track| !track.is_live()));
    }

    #[tokio::test]
    async fn unknown_device_id_fails_without_consuming_a_step() {
        let sim = SimulatedAcquisition::new(Scenario::healthy());
        let constraints = StreamConstraints {
            audio: Some(crate::acquisition::AudioConstraints::with_device("ghost")),
            video: None,
        };
        assert_eq!(
            sim.acquire(constraints).await.unwrap_err(),
            AcquireError::NotFound
        );

        // The scripted grant is still there for the next caller.
        let stream = sim.acquire(StreamConstraints::audio_only()).await.unwrap();
        assert_eq!(stream.tracks().len(), 1);
    }

    #[tokio::test]
    async fn empty_constraints_are_rejected() {
        let sim = SimulatedAcquisition::new(Scenario::healthy());
        let error = sim.acquire(StreamConstraints::default()).await.unwrap_err();
        assert!(matches!(error, AcquireError::InvalidConfiguration { .. }));
    }

    #[tokio::test]
    async fn dead_grant_yields_a_dead_track() {
        let sim = SimulatedAcquisition::new(Scenario {
            steps: vec![ScenarioStep::Grant {
                audio: TrackGrant::Dead,
                video: TrackGrant::Live,
                delay_ms: 0,
            }],
            ..Scenario::healthy()
        });
        let stream = sim.acquire(StreamConstraints::audio_only()).await.unwrap();
        assert_eq!(stream.tracks().len(), 1);
        assert!(!stream.tracks()[0].is_live());
    }

    #[tokio::test]
    async fn granted_video_reflects_the_requested_shape() {
        let sim = SimulatedAcquisition::new(Scenario::healthy());
        let constraints = StreamConstraints::video_only(
            VideoConstraints::ideal(1280, 720).with_frame_rate(FrameRate::Ideal(30)),
        );
        let stream = sim.acquire(constraints).await.unwrap();
        let settings = stream.tracks()[0].settings().unwrap();
        assert_eq!(settings.width, Some(1280));
        assert_eq!(settings.height, Some(720));
        assert_eq!(settings.frame_rate, Some(30.0));
    }

    #[test]
    fn scenario_files_use_tagged_steps() {
        let text = r#"{
            "devices": [{"kind": "camera", "id": "cam-1", "label": "Test Cam"}],
            "steps": [
                {"type": "grant", "video": "missing"},
                {"type": "fail", "cause": "permission_denied", "delay_ms": 10},
                {"type": "hang"}
            ],
            "mic_energy": 0.25
        }"#;
        let scenario: Scenario = serde_json::from_str(text).unwrap();
        assert!(scenario.supported);
        assert_eq!(scenario.mic_energy, 0.25);
        assert_eq!(
            scenario.steps[0],
            ScenarioStep::Grant {
                audio: TrackGrant::Live,
                video: TrackGrant::Missing,
                delay_ms: 0,
            }
        );
        assert_eq!(
            scenario.steps[1],
            ScenarioStep::Fail {
                cause: AcquireError::PermissionDenied,
                delay_ms: 10,
            }
        );
        assert_eq!(scenario.steps[2], ScenarioStep::Hang);
    }
}
