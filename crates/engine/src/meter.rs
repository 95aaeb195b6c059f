//! Audio level metering.
//!
//! Samples a claimed audio track's level tap on a fixed cadence and
//! publishes loudness readings through a watch channel. Rendering is the
//! adapter's problem; this module only produces numbers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::track::MediaTrack;

/// Per-track hook exposing the current frequency-domain energy, one bin
/// per band, each normalized to `[0, 1]`. Absent on tracks the platform
/// cannot analyze.
pub trait LevelTap: Send + Sync {
    fn energy_bins(&self) -> Vec<f32>;
}

/// Display band for a loudness value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LevelBand {
    #[default]
    Silent,
    Low,
    Adequate,
}

impl LevelBand {
    /// Band thresholds: below 5 reads as silence, below 20 as too low.
    pub fn classify(loudness: f32) -> Self {
        if loudness < 5.0 {
            LevelBand::Silent
        } else if loudness < 20.0 {
            LevelBand::Low
        } else {
            LevelBand::Adequate
        }
    }
}

impl std::fmt::Display for LevelBand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LevelBand::Silent => "silent",
            LevelBand::Low => "low",
            LevelBand::Adequate => "adequate",
        };
        f.write_str(name)
    }
}

/// One meter sample: loudness on a 0..=100 scale plus its band.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LevelReading {
    pub loudness: f32,
    pub band: LevelBand,
}

/// Reduce energy bins to the 0..=100 loudness scalar: the bin mean, scaled
/// by 200 and clamped. No bins means silence.
pub fn loudness_of(bins: &[f32]) -> f32 {
    if bins.is_empty() {
        return 0.0;
    }
    let mean = bins.iter().sum::<f32>() / bins.len() as f32;
    (mean * 200.0).clamp(0.0, 100.0)
}

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum MeterError {
    /// The track carries no level tap, so there is nothing to sample.
    #[error("audio analysis is unavailable for this track")]
    AnalysisUnavailable,
}

/// Samples one audio track at a fixed cadence.
///
/// At most one track is metered at a time; attaching to a new track tears
/// the previous sampling loop down first. The loop parks itself when the
/// track stops being live.
pub struct AudioLevelMeter {
    cadence: Duration,
    readings: watch::Sender<LevelReading>,
    task: Option<JoinHandle<()>>,
}

impl AudioLevelMeter {
    pub fn new(cadence: Duration) -> Self {
        let (readings, _) = watch::channel(LevelReading::default());
        Self {
            cadence,
            readings,
            task: None,
        }
    }

    /// Begin sampling `track`, replacing any previous subject.
    pub fn attach(&mut self, track: &MediaTrack) -> Result<(), MeterError> {
        self.detach();
        let tap = track.level_tap().ok_or(MeterError::AnalysisUnavailable)?;
        tracing::debug!(track = %track.id(), cadence_ms = self.cadence.as_millis() as u64, "Attaching level meter");

        let track = track.clone();
        let readings = self.readings.clone();
        let cadence = self.cadence;
        self.task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cadence);
            loop {
                ticker.tick().await;
                if !track.is_live() {
                    readings.send_replace(LevelReading::default());
                    tracing::debug!(track = %track.id(), "Metered track went dead; parking meter");
                    break;
                }
                let loudness = loudness_of(&tap.energy_bins());
                readings.send_replace(LevelReading {
                    loudness,
                    band: LevelBand::classify(loudness),
                });
            }
        }));
        Ok(())
    }

    /// Stop sampling and reset the published reading to silence.
    pub fn detach(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.readings.send_replace(LevelReading::default());
    }

    pub fn subscribe(&self) -> watch::Receiver<LevelReading> {
        self.readings.subscribe()
    }

    pub fn latest(&self) -> LevelReading {
        *self.readings.borrow()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

impl Drop for AudioLevelMeter {
    fn drop(&mut self) {
        self.detach();
    }
}
