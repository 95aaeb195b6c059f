//! The attempt ladder.
//!
//! Acquisition is tried in a fixed order of progressively weaker constraint
//! sets: combined audio+video first at descending quality, then audio
//! alone, then video alone. Video-only rungs are held back until the
//! microphone is settled so a broken camera can never block audio.

use crate::acquisition::{AudioConstraints, FrameRate, StreamConstraints, VideoConstraints};

/// Which channels one rung tries to satisfy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelAffinity {
    AudioVideo,
    Audio,
    Video,
}

impl ChannelAffinity {
    pub fn wants_audio(&self) -> bool {
        matches!(self, ChannelAffinity::AudioVideo | ChannelAffinity::Audio)
    }

    pub fn wants_video(&self) -> bool {
        matches!(self, ChannelAffinity::AudioVideo | ChannelAffinity::Video)
    }
}

/// One rung: a named constraint configuration plus its prerequisites.
#[derive(Debug, Clone)]
pub struct AttemptSpec {
    pub name: &'static str,
    pub affinity: ChannelAffinity,
    /// Video shape for rungs that want video; `None` on audio-only rungs.
    pub video: Option<VideoConstraints>,
    /// Video-only rungs wait for a settled microphone so they never race
    /// the combined rungs for the same permission prompt.
    pub requires_microphone: bool,
}

impl AttemptSpec {
    fn audio_video(name: &'static str, video: VideoConstraints) -> Self {
        Self {
            name,
            affinity: ChannelAffinity::AudioVideo,
            video: Some(video),
            requires_microphone: false,
        }
    }

    fn audio(name: &'static str) -> Self {
        Self {
            name,
            affinity: ChannelAffinity::Audio,
            video: None,
            requires_microphone: false,
        }
    }

    fn video(name: &'static str, video: VideoConstraints) -> Self {
        Self {
            name,
            affinity: ChannelAffinity::Video,
            video: Some(video),
            requires_microphone: true,
        }
    }

    /// Build the request for this rung, narrowed to the channels the
    /// caller still wants. Narrowing a combined rung to one channel keeps
    /// an already-captured device from being reopened.
    pub fn constraints(&self, want_audio: bool, want_video: bool) -> StreamConstraints {
        StreamConstraints {
            audio: (self.affinity.wants_audio() && want_audio).then(AudioConstraints::default),
            video: if self.affinity.wants_video() && want_video {
                self.video.clone()
            } else {
                None
            },
        }
    }
}

/// The standard eight-rung descent.
pub fn standard_ladder() -> Vec<AttemptSpec> {
    vec![
        AttemptSpec::audio_video(
            "av-hd",
            VideoConstraints::ideal(1280, 720).with_frame_rate(FrameRate::Ideal(30)),
        ),
        AttemptSpec::audio_video(
            "av-vga",
            VideoConstraints::ideal(640, 480).with_frame_rate(FrameRate::Ideal(24)),
        ),
        AttemptSpec::audio_video("av-any", VideoConstraints::any()),
        AttemptSpec::audio("audio-only"),
        AttemptSpec::video(
            "video-hd",
            VideoConstraints::ideal(1280, 720).with_frame_rate(FrameRate::Ideal(30)),
        ),
        AttemptSpec::video(
            "video-vga",
            VideoConstraints::ideal(640, 480).with_frame_rate(FrameRate::Ideal(24)),
        ),
        AttemptSpec::video(
            "video-qvga",
            VideoConstraints::ideal(320, 240).with_frame_rate(FrameRate::Max(15)),
        ),
        AttemptSpec::video("video-any", VideoConstraints::any()),
    ]
}

/// Deliberate microphone-only capture, used by the audio-only fallback.
pub fn audio_only_ladder() -> Vec<AttemptSpec> {
    vec![AttemptSpec::audio("audio-only")]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_ladder_descends_in_order() {
        let ladder = standard_ladder();
        let names: Vec<&str> = ladder.iter().map(|spec| spec.name).collect();
        assert_eq!(
            names,
            [
                "av-hd",
                "av-vga",
                "av-any",
                "audio-only",
                "video-hd",
                "video-vga",
                "video-qvga",
                "video-any"
            ]
        );
    }

    #[test]
    fn combined_rungs_come_first_and_need_no_prerequisite() {
        let ladder = standard_ladder();
        for spec in &ladder[..3] {
            assert_eq!(spec.affinity, ChannelAffinity::AudioVideo);
            assert!(!spec.requires_microphone);
        }
    }

    #[test]
    fn video_rungs_wait_for_the_microphone() {
        let ladder = standard_ladder();
        for spec in &ladder[4..] {
            assert_eq!(spec.affinity, ChannelAffinity::Video);
            assert!(spec.requires_microphone);
        }
    }

    #[test]
    fn hd_rungs_ask_for_thirty_fps() {
        let ladder = standard_ladder();
        for name in ["av-hd", "video-hd"] {
            let spec = ladder.iter().find(|spec| spec.name == name).unwrap();
            let video = spec.video.clone().unwrap();
            assert_eq!(video.width, Some(1280));
            assert_eq!(video.height, Some(720));
            assert_eq!(video.frame_rate, Some(FrameRate::Ideal(30)));
        }
    }

    #[test]
    fn qvga_rung_caps_the_frame_rate() {
        let ladder = standard_ladder();
        let qvga = ladder
            .iter()
            .find(|spec| spec.name == "video-qvga")
            .unwrap();
        let video = qvga.video.clone().unwrap();
        assert_eq!(video.width, Some(320));
        assert_eq!(video.height, Some(240));
        assert_eq!(video.frame_rate, Some(FrameRate::Max(15)));
    }

    #[test]
    fn narrowing_strips_satisfied_channels() {
        let ladder = standard_ladder();
        let av = &ladder[0];

        let full = av.constraints(true, true);
        assert!(full.wants_audio() && full.wants_video());

        let video_only = av.constraints(false, true);
        assert!(!video_only.wants_audio());
        assert!(video_only.wants_video());

        let audio_only = av.constraints(true, false);
        assert!(audio_only.wants_audio());
        assert!(!audio_only.wants_video());
    }

    #[test]
    fn audio_only_ladder_is_a_single_rung() {
        let ladder = audio_only_ladder();
        assert_eq!(ladder.len(), 1);
        assert_eq!(ladder[0].affinity, ChannelAffinity::Audio);
        assert!(ladder[0].constraints(true, true).video.is_none());
    }
}
