//! Device acquisition boundary.
//!
//! The engine never talks to capture hardware directly. Everything flows
//! through [`DeviceAcquisition`], which platform backends (or the simulated
//! backend in [`crate::sim`]) implement.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::track::MediaStream;

/// Kind of capture device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Camera,
    Microphone,
}

/// One enumerated capture device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub kind: DeviceKind,
    pub id: String,
    /// Empty until the first permission grant on most platforms.
    #[serde(default)]
    pub label: Option<String>,
}

impl DeviceDescriptor {
    pub fn new(kind: DeviceKind, id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            label: Some(label.into()),
        }
    }

    /// Human-readable name, falling back to a positional one while labels
    /// are still locked.
    pub fn display_name(&self, index: usize) -> String {
        match &self.label {
            Some(label) if !label.is_empty() => label.clone(),
            _ => match self.kind {
                DeviceKind::Camera => format!("Camera {}", index + 1),
                DeviceKind::Microphone => format!("Microphone {}", index + 1),
            },
        }
    }
}

/// Frame rate hint for a video request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRate {
    /// Prefer this rate; the backend may deliver another.
    Ideal(u32),
    /// Never exceed this rate.
    Max(u32),
}

/// Requested shape for a video track. Width and height are preferences,
/// not demands; backends pick the closest mode they can open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoConstraints {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub frame_rate: Option<FrameRate>,
    pub device_id: Option<String>,
}

impl VideoConstraints {
    /// Any camera, any mode.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn ideal(width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::default()
        }
    }

    pub fn with_frame_rate(mut self, frame_rate: FrameRate) -> Self {
        self.frame_rate = Some(frame_rate);
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// Requested shape for an audio track.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioConstraints {
    pub device_id: Option<String>,
}

impl AudioConstraints {
    pub fn with_device(device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
        }
    }
}

/// One acquisition request: which kinds are wanted, with what shapes.
/// Requesting neither kind is a caller bug and fails with
/// [`AcquireError::InvalidConfiguration`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConstraints {
    pub audio: Option<AudioConstraints>,
    pub video: Option<VideoConstraints>,
}

impl StreamConstraints {
    pub fn audio_only() -> Self {
        Self {
            audio: Some(AudioConstraints::default()),
            video: None,
        }
    }

    pub fn video_only(video: VideoConstraints) -> Self {
        Self {
            audio: None,
            video: Some(video),
        }
    }

    pub fn audio_video(video: VideoConstraints) -> Self {
        Self {
            audio: Some(AudioConstraints::default()),
            video: Some(video),
        }
    }

    pub fn wants_audio(&self) -> bool {
        self.audio.is_some()
    }

    pub fn wants_video(&self) -> bool {
        self.video.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.audio.is_none() && self.video.is_none()
    }
}

/// Why an acquisition call failed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AcquireError {
    #[error("no device of the requested kind was found")]
    NotFound,
    #[error("permission to use the device was denied")]
    PermissionDenied,
    #[error("device exists but could not be read")]
    NotReadable,
    #[error("no device satisfies the requested constraints")]
    Overconstrained,
    #[error("invalid constraint set: {message}")]
    InvalidConfiguration { message: String },
    #[error("acquisition call was aborted")]
    Aborted,
    #[error("media capture is not supported on this platform")]
    Unsupported,
}

impl AcquireError {
    /// Short status line shown next to the failing channel.
    pub fn status_message(&self) -> String {
        let message = match self {
            AcquireError::NotFound => "Device not found",
            AcquireError::PermissionDenied => "Permission denied",
            AcquireError::NotReadable => "Device is in use by another application",
            AcquireError::Overconstrained => "Requested quality not supported",
            AcquireError::InvalidConfiguration { .. } => "Internal configuration error",
            AcquireError::Aborted => "Capture request was aborted",
            AcquireError::Unsupported => "Media capture is not supported here",
        };
        message.to_string()
    }

    /// True when the failure indicates a defect in the constraint set
    /// rather than an environment problem.
    pub fn is_internal_bug(&self) -> bool {
        matches!(self, AcquireError::InvalidConfiguration { .. })
    }

    /// True when the user should be offered the permission prompt again.
    pub fn reopens_permission_prompt(&self) -> bool {
        matches!(self, AcquireError::PermissionDenied)
    }
}

/// Host capability for acquiring media and enumerating devices.
///
/// Implementations must be cancel-safe: the engine abandons calls that
/// outlive their attempt timeout and only inspects the result if it ever
/// arrives.
#[async_trait]
pub trait DeviceAcquisition: Send + Sync {
    /// Request a stream matching the constraint set.
    async fn acquire(&self, constraints: StreamConstraints) -> Result<MediaStream, AcquireError>;

    /// List capture devices. Labels may be empty before the first grant.
    async fn enumerate(&self) -> Result<Vec<DeviceDescriptor>, AcquireError>;

    /// Whether this platform can acquire media at all.
    fn is_supported(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_prefers_label() {
        let device = DeviceDescriptor::new(DeviceKind::Camera, "cam-1", "FaceTime HD");
        assert_eq!(device.display_name(0), "FaceTime HD");
    }

    #[test]
    fn display_name_falls_back_to_position() {
        let unlabeled = DeviceDescriptor {
            kind: DeviceKind::Microphone,
            id: "mic-1".to_string(),
            label: None,
        };
        assert_eq!(unlabeled.display_name(1), "Microphone 2");

        let blank = DeviceDescriptor {
            kind: DeviceKind::Camera,
            id: "cam-1".to_string(),
            label: Some(String::new()),
        };
        assert_eq!(blank.display_name(0), "Camera 1");
    }

    #[test]
    fn empty_constraints_are_detectable() {
        assert!(StreamConstraints::default().is_empty());
        assert!(!StreamConstraints::audio_only().is_empty());
        assert!(StreamConstraints::audio_only().wants_audio());
        assert!(!StreamConstraints::audio_only().wants_video());
    }

    #[test]
    fn only_invalid_configuration_is_a_bug() {
        assert!(AcquireError::InvalidConfiguration {
            message: "empty".to_string()
        }
        .is_internal_bug());
        assert!(!AcquireError::NotFound.is_internal_bug());
        assert!(!AcquireError::PermissionDenied.is_internal_bug());
    }

    #[test]
    fn denial_reopens_the_prompt() {
        assert!(AcquireError::PermissionDenied.reopens_permission_prompt());
        assert!(!AcquireError::NotReadable.reopens_permission_prompt());
    }
}
