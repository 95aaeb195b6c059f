//! List the devices a scenario exposes.

use std::path::PathBuf;

use greenroom_engine::acquisition::{DeviceAcquisition, DeviceKind, StreamConstraints};
use greenroom_engine::sim::{Scenario, SimulatedAcquisition};

pub async fn run(scenario: Option<PathBuf>, grant: bool) -> anyhow::Result<()> {
    let scenario = match scenario {
        Some(path) => Scenario::from_file(&path)?,
        None => Scenario::healthy(),
    };
    let client = SimulatedAcquisition::new(scenario);

    if grant {
        // A single successful capture unlocks device labels.
        if let Ok(stream) = client.acquire(StreamConstraints::audio_only()).await {
            stream.stop_all();
        }
    }

    let devices = client.enumerate().await?;
    if devices.is_empty() {
        println!("No devices.");
        return Ok(());
    }

    let mut cameras = 0;
    let mut microphones = 0;
    for device in &devices {
        let index = match device.kind {
            DeviceKind::Camera => {
                cameras += 1;
                cameras - 1
            }
            DeviceKind::Microphone => {
                microphones += 1;
                microphones - 1
            }
        };
        println!(
            "{:<11} {:<24} {}",
            format!("{:?}", device.kind),
            device.display_name(index),
            device.id
        );
    }
    Ok(())
}
