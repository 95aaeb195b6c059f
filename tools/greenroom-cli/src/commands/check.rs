//! Run the full pre-flight check against a scenario.

use std::path::PathBuf;
use std::sync::Arc;

use greenroom_common::config::AppConfig;
use greenroom_engine::acquisition::DeviceAcquisition;
use greenroom_engine::events::{CheckEvent, EventStream, UserIntent};
use greenroom_engine::sim::{Scenario, SimulatedAcquisition};
use greenroom_engine::status::{Channel, ChannelState};
use greenroom_engine::{CheckReport, PreflightSession};

pub async fn run(
    scenario: Option<PathBuf>,
    json: bool,
    audio_only: bool,
    endpoint: Option<String>,
) -> anyhow::Result<()> {
    let mut config = AppConfig::load().check;
    if let Some(endpoint) = endpoint {
        config.probe_endpoint = endpoint;
    }

    let scenario = match scenario {
        Some(path) => Scenario::from_file(&path)?,
        None => Scenario::healthy(),
    };
    let client = Arc::new(SimulatedAcquisition::new(scenario)) as Arc<dyn DeviceAcquisition>;
    let (mut session, mut events) = PreflightSession::new(config.clone(), client);

    if !json {
        println!("Greenroom Pre-flight Check");
        println!("{}", "=".repeat(50));
    }

    session.start().await;
    render_events(&mut events, json);

    // The harness stands in for the user and accepts the prompt.
    let intent = if audio_only {
        UserIntent::AudioOnly
    } else {
        UserIntent::RequestPermission
    };
    session.handle_intent(intent).await?;
    render_events(&mut events, json);

    if !json && session.channel_state(Channel::Microphone) == ChannelState::Success {
        // Give the meter a few samples before the snapshot.
        tokio::time::sleep(config.meter_interval() * 3).await;
        let reading = *session.level_readings().borrow();
        println!("  mic level: {:.0} ({})", reading.loudness, reading.band);
    }

    let report = session.report();
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    if !report.go {
        std::process::exit(1);
    }
    Ok(())
}

fn render_events(events: &mut EventStream, quiet: bool) {
    while let Some(event) = events.try_next() {
        if quiet {
            continue;
        }
        match event {
            CheckEvent::Channel {
                channel,
                state,
                message,
            } => println!("  [{}] {}: {}", state_tag(state), channel, message),
            CheckEvent::SessionReady {
                audio_tracks,
                video_tracks,
            } => println!("  media ready: {audio_tracks} audio / {video_tracks} video"),
            CheckEvent::PermissionPromptRequested => {
                println!("  permission prompt requested; granting")
            }
            CheckEvent::Aggregate { .. } | CheckEvent::Devices { .. } => {}
        }
    }
}

fn state_tag(state: ChannelState) -> &'static str {
    match state {
        ChannelState::Pending => " .. ",
        ChannelState::Success => " OK ",
        ChannelState::Warning => "WARN",
        ChannelState::Error => "FAIL",
        ChannelState::ErrorTimeout => "SLOW",
    }
}

fn print_report(report: &CheckReport) {
    println!();
    println!("Report");
    println!("{}", "=".repeat(50));
    for (name, entry) in [
        ("Connection", &report.channels.connection),
        ("Camera", &report.channels.camera),
        ("Microphone", &report.channels.microphone),
    ] {
        println!("[{}] {:<12} {}", state_tag(entry.state), name, entry.message);
    }

    if !report.devices.is_empty() {
        println!();
        println!("Devices:");
        for device in &report.devices {
            println!("  {:<12} {} ({})", format!("{:?}", device.kind), device.name, device.id);
        }
    }

    for track in &report.video_tracks {
        if let Some(settings) = track.settings {
            println!();
            println!(
                "Video: {}x{} @ {:.0} fps ({})",
                settings.width.unwrap_or(0),
                settings.height.unwrap_or(0),
                settings.frame_rate.unwrap_or(0.0),
                track.label
            );
        }
    }

    println!();
    if report.go {
        println!("All checks passed in {} ms. Ready to go live.", report.elapsed_ms);
    } else {
        println!("Some checks failed. Fix the failures above and retry.");
    }
}
