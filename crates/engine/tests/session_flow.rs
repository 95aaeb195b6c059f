//! Full session flows: probe, intents, switching, suspension, reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use greenroom_common::config::CheckConfig;
use greenroom_engine::acquisition::{AcquireError, DeviceAcquisition, DeviceDescriptor, DeviceKind};
use greenroom_engine::events::{CheckEvent, EventStream, UserIntent};
use greenroom_engine::meter::LevelBand;
use greenroom_engine::sim::{Scenario, ScenarioStep, SimulatedAcquisition, TrackGrant};
use greenroom_engine::status::{AggregateStatus, Channel, ChannelState};
use greenroom_engine::{EngineError, PreflightSession};

fn grant() -> ScenarioStep {
    ScenarioStep::Grant {
        audio: TrackGrant::Live,
        video: TrackGrant::Live,
        delay_ms: 0,
    }
}

fn fail(cause: AcquireError) -> ScenarioStep {
    ScenarioStep::Fail { cause, delay_ms: 0 }
}

fn fast_config(endpoint: String) -> CheckConfig {
    CheckConfig {
        attempt_timeout_ms: 2_000,
        probe_endpoint: endpoint,
        probe_timeout_ms: 1_000,
        slow_connection_ms: 300,
        meter_interval_ms: 10,
        enumerate_settle_ms: 0,
    }
}

/// A session that has probed against a local listener and announced the
/// permission prompt. The listener must stay alive for later re-probes.
async fn started_session(
    scenario: Scenario,
) -> (
    PreflightSession,
    EventStream,
    Arc<SimulatedAcquisition>,
    TcpListener,
) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let endpoint = listener.local_addr().unwrap().to_string();
    let client = Arc::new(SimulatedAcquisition::new(scenario));
    let (mut session, events) = PreflightSession::new(
        fast_config(endpoint),
        Arc::clone(&client) as Arc<dyn DeviceAcquisition>,
    );
    session.start().await;
    (session, events, client, listener)
}

fn drain(events: &mut EventStream) -> Vec<CheckEvent> {
    let mut drained = Vec::new();
    while let Some(event) = events.try_next() {
        drained.push(event);
    }
    drained
}

#[tokio::test]
async fn full_check_reaches_go() {
    let (mut session, mut events, _client, _listener) = started_session(Scenario::healthy()).await;

    let early = drain(&mut events);
    assert!(early
        .iter()
        .any(|event| matches!(event, CheckEvent::PermissionPromptRequested)));
    assert_eq!(
        session.channel_state(Channel::Connection),
        ChannelState::Success
    );

    session
        .handle_intent(UserIntent::RequestPermission)
        .await
        .unwrap();

    assert_eq!(session.channel_state(Channel::Camera), ChannelState::Success);
    assert_eq!(
        session.channel_state(Channel::Microphone),
        ChannelState::Success
    );
    assert_eq!(session.aggregate(), AggregateStatus::Success);

    let combined = session.combined().expect("combined session");
    assert_eq!(combined.audio_tracks().count(), 1);
    assert_eq!(combined.video_tracks().count(), 1);

    let later = drain(&mut events);
    assert!(later.iter().any(|event| matches!(
        event,
        CheckEvent::SessionReady {
            audio_tracks: 1,
            video_tracks: 1,
        }
    )));
    let devices = later
        .iter()
        .find_map(|event| match event {
            CheckEvent::Devices { devices } => Some(devices.clone()),
            _ => None,
        })
        .expect("devices event");
    assert_eq!(devices.len(), 2);
    // Labels unlock once a grant has happened.
    assert!(devices.iter().all(|device| device.label.is_some()));

    let report = session.report();
    assert!(report.go);
    assert_eq!(report.aggregate, AggregateStatus::Success);
}

#[tokio::test]
async fn microphone_levels_flow_after_success() {
    let (mut session, _events, _client, _listener) = started_session(Scenario::healthy()).await;
    session
        .handle_intent(UserIntent::RequestPermission)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let reading = *session.level_readings().borrow();
    assert_eq!(reading.band, LevelBand::Adequate);
    assert_eq!(reading.loudness, 100.0);
}

#[tokio::test]
async fn audio_only_parks_camera_in_warning() {
    let (mut session, _events, client, _listener) = started_session(Scenario::healthy()).await;

    session.handle_intent(UserIntent::AudioOnly).await.unwrap();

    assert_eq!(session.channel_state(Channel::Camera), ChannelState::Warning);
    assert_eq!(
        session.channel_state(Channel::Microphone),
        ChannelState::Success
    );
    assert_eq!(session.aggregate(), AggregateStatus::Warning);
    assert_eq!(client.acquire_calls(), 1);

    let combined = session.combined().expect("combined session");
    assert_eq!(combined.audio_tracks().count(), 1);
    assert_eq!(combined.video_tracks().count(), 0);

    let report = session.report();
    assert!(report.go);
    assert_eq!(report.channels.camera.message, "Audio-only mode");
}

#[tokio::test]
async fn switching_microphones_splices_without_touching_video() {
    let mut scenario = Scenario::healthy();
    scenario.devices.push(DeviceDescriptor::new(
        DeviceKind::Microphone,
        "sim-mic-1",
        "USB Microphone",
    ));
    scenario.steps = vec![grant(), grant()];
    let (mut session, _events, _client, _listener) = started_session(scenario).await;
    session
        .handle_intent(UserIntent::RequestPermission)
        .await
        .unwrap();

    let old_audio = session
        .combined()
        .unwrap()
        .audio_tracks()
        .next()
        .unwrap()
        .clone();
    let video = session
        .combined()
        .unwrap()
        .video_tracks()
        .next()
        .unwrap()
        .clone();

    session
        .handle_intent(UserIntent::SwitchDevice {
            channel: Channel::Microphone,
            device_id: "sim-mic-1".to_string(),
        })
        .await
        .unwrap();

    assert!(!old_audio.is_live());
    assert!(video.is_live());
    assert_eq!(
        session.channel_state(Channel::Microphone),
        ChannelState::Success
    );

    let combined = session.combined().unwrap();
    assert_eq!(combined.audio_tracks().count(), 1);
    assert_eq!(combined.video_tracks().count(), 1);
    let new_audio = combined.audio_tracks().next().unwrap();
    assert!(new_audio.is_live());
    assert_ne!(new_audio.id(), old_audio.id());
}

#[tokio::test]
async fn switching_to_an_unknown_device_errors_without_rollback() {
    let (mut session, _events, _client, _listener) = started_session(Scenario::healthy()).await;
    session
        .handle_intent(UserIntent::RequestPermission)
        .await
        .unwrap();

    let old_audio = session
        .combined()
        .unwrap()
        .audio_tracks()
        .next()
        .unwrap()
        .clone();

    session
        .handle_intent(UserIntent::SwitchDevice {
            channel: Channel::Microphone,
            device_id: "mic-ghost".to_string(),
        })
        .await
        .unwrap();

    // The old capture is gone and nothing replaced it.
    assert!(!old_audio.is_live());
    assert_eq!(session.channel_state(Channel::Microphone), ChannelState::Error);
    let report = session.report();
    assert_eq!(report.channels.microphone.message, "Device not found");
    assert!(!report.go);

    let combined = session.combined().unwrap();
    assert_eq!(combined.audio_tracks().count(), 0);
    assert_eq!(combined.video_tracks().count(), 1);
}

#[tokio::test]
async fn switching_needs_a_session_and_a_device_channel() {
    let (mut session, _events, _client, _listener) = started_session(Scenario::healthy()).await;

    assert_eq!(
        session.switch_device(Channel::Microphone, "sim-mic-0").await,
        Err(EngineError::SessionNotReady)
    );
    assert_eq!(
        session.switch_device(Channel::Connection, "anything").await,
        Err(EngineError::NotADeviceChannel)
    );
}

#[tokio::test]
async fn suspension_releases_devices_and_resume_reprobes() {
    let (mut session, mut events, client, _listener) = started_session(Scenario::healthy()).await;
    session
        .handle_intent(UserIntent::RequestPermission)
        .await
        .unwrap();

    let audio = session
        .combined()
        .unwrap()
        .audio_tracks()
        .next()
        .unwrap()
        .clone();
    let calls_before = client.acquire_calls();
    drain(&mut events);

    session.handle_intent(UserIntent::Suspend).await.unwrap();
    assert!(session.is_suspended());
    assert!(session.combined().is_none());
    assert!(!audio.is_live());
    // Verdicts survive suspension.
    assert_eq!(session.channel_state(Channel::Camera), ChannelState::Success);
    assert_eq!(
        session.handle_intent(UserIntent::Retry).await,
        Err(EngineError::Suspended)
    );

    session.handle_intent(UserIntent::Resume).await.unwrap();
    assert!(!session.is_suspended());
    // Resuming re-probes the network but leaves capture released.
    assert_eq!(client.acquire_calls(), calls_before);
    assert!(session.combined().is_none());
    let after = drain(&mut events);
    assert!(after.iter().any(|event| matches!(
        event,
        CheckEvent::Channel {
            channel: Channel::Connection,
            state: ChannelState::Success,
            ..
        }
    )));
}

#[tokio::test]
async fn untapped_microphone_downgrades_to_warning() {
    let scenario = Scenario {
        steps: vec![ScenarioStep::Grant {
            audio: TrackGrant::Untapped,
            video: TrackGrant::Live,
            delay_ms: 0,
        }],
        ..Scenario::healthy()
    };
    let (mut session, _events, _client, _listener) = started_session(scenario).await;

    session
        .handle_intent(UserIntent::RequestPermission)
        .await
        .unwrap();

    assert_eq!(
        session.channel_state(Channel::Microphone),
        ChannelState::Warning
    );
    assert_eq!(session.aggregate(), AggregateStatus::Warning);

    // The track itself is fine; only the meter is unavailable.
    let combined = session.combined().unwrap();
    assert_eq!(combined.audio_tracks().count(), 1);
    assert!(combined.audio_tracks().next().unwrap().is_live());

    let report = session.report();
    assert!(report.go);
    assert_eq!(
        report.channels.microphone.message,
        "Microphone works, but level metering is unavailable"
    );
}

#[tokio::test]
async fn denied_permission_reopens_the_prompt() {
    let scenario = Scenario {
        steps: vec![fail(AcquireError::PermissionDenied)],
        ..Scenario::healthy()
    };
    let (mut session, mut events, _client, _listener) = started_session(scenario).await;

    session
        .handle_intent(UserIntent::RequestPermission)
        .await
        .unwrap();

    assert_eq!(session.channel_state(Channel::Camera), ChannelState::Error);
    assert_eq!(
        session.channel_state(Channel::Microphone),
        ChannelState::Error
    );

    let prompts = drain(&mut events)
        .iter()
        .filter(|event| matches!(event, CheckEvent::PermissionPromptRequested))
        .count();
    // Once at start, then again for the denied attempts.
    assert!(prompts >= 2);

    let report = session.report();
    assert!(!report.go);
    assert!(report.audio_tracks.is_empty());
    assert!(report.video_tracks.is_empty());
}

#[tokio::test]
async fn retry_resets_the_board_and_runs_everything_again() {
    let scenario = Scenario {
        steps: vec![
            fail(AcquireError::NotFound),
            fail(AcquireError::NotFound),
            fail(AcquireError::NotFound),
            fail(AcquireError::NotFound),
            grant(),
        ],
        ..Scenario::healthy()
    };
    let (mut session, mut events, client, _listener) = started_session(scenario).await;

    session
        .handle_intent(UserIntent::RequestPermission)
        .await
        .unwrap();
    assert_eq!(session.aggregate(), AggregateStatus::Error);
    drain(&mut events);

    session.handle_intent(UserIntent::Retry).await.unwrap();

    assert_eq!(session.channel_state(Channel::Camera), ChannelState::Success);
    assert_eq!(
        session.channel_state(Channel::Microphone),
        ChannelState::Success
    );
    assert_eq!(session.aggregate(), AggregateStatus::Success);
    assert_eq!(client.acquire_calls(), 5);

    let combined = session.combined().unwrap();
    assert_eq!(combined.audio_tracks().count(), 1);
    assert_eq!(combined.video_tracks().count(), 1);

    // The reset was visible to the adapter before the new verdicts.
    let after = drain(&mut events);
    assert!(after.iter().any(|event| matches!(
        event,
        CheckEvent::Channel {
            channel: Channel::Camera,
            state: ChannelState::Pending,
            ..
        }
    )));
}

#[tokio::test]
async fn report_serializes_for_headless_consumers() {
    let (mut session, _events, _client, _listener) = started_session(Scenario::healthy()).await;
    session
        .handle_intent(UserIntent::RequestPermission)
        .await
        .unwrap();

    let value = serde_json::to_value(session.report()).unwrap();
    assert_eq!(value["go"], true);
    assert_eq!(value["aggregate"], "success");
    assert_eq!(value["channels"]["camera"]["state"], "success");
    assert_eq!(value["channels"]["connection"]["state"], "success");
    assert_eq!(value["audio_tracks"][0]["label"], "Built-in Microphone");
    assert_eq!(value["video_tracks"][0]["settings"]["width"], 1280);
    assert!(value["elapsed_ms"].is_u64());
    assert_eq!(value["devices"][0]["name"], "Integrated Camera");
}
