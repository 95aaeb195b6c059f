//! Probe the signaling endpoint without touching any devices.

use greenroom_common::config::AppConfig;
use greenroom_engine::reachability::{Reachability, ReachabilityCheck};

pub async fn run(endpoint: Option<String>, save: bool) -> anyhow::Result<()> {
    let mut config = AppConfig::load();
    if let Some(endpoint) = endpoint {
        config.check.probe_endpoint = endpoint;
    }

    let check = ReachabilityCheck::from_config(&config.check);
    println!("Probing {}...", config.check.probe_endpoint);
    let outcome = check.run().await;
    println!("{}", outcome.message());

    if outcome == Reachability::Unreachable {
        std::process::exit(1);
    }
    if save {
        config
            .save()
            .map_err(|e| anyhow::anyhow!("Failed to save config: {e}"))?;
        println!(
            "Saved {} as the default endpoint.",
            config.check.probe_endpoint
        );
    }
    Ok(())
}
