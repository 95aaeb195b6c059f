//! Network reachability probe.
//!
//! One TCP connect against a well-known endpoint, banded by handshake
//! latency. Deliberately not a bandwidth or quality estimate; it answers
//! "is there a network at all, and is it obviously slow".

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::Instant;

use greenroom_common::config::CheckConfig;

use crate::status::ChannelState;

/// Outcome of one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Fast(Duration),
    Slow(Duration),
    Unreachable,
}

impl Reachability {
    pub fn channel_state(&self) -> ChannelState {
        match self {
            Reachability::Fast(_) => ChannelState::Success,
            Reachability::Slow(_) => ChannelState::Warning,
            Reachability::Unreachable => ChannelState::Error,
        }
    }

    pub fn message(&self) -> String {
        match self {
            Reachability::Fast(_) => "Connected".to_string(),
            Reachability::Slow(latency) => {
                format!("Connected, but slow ({} ms)", latency.as_millis())
            }
            Reachability::Unreachable => "No connection".to_string(),
        }
    }
}

/// One-shot connect-latency check. Runs once per session start and once
/// per explicit retry; never retried on its own.
#[derive(Debug, Clone)]
pub struct ReachabilityCheck {
    endpoint: String,
    timeout: Duration,
    slow_threshold: Duration,
}

impl ReachabilityCheck {
    pub fn new(endpoint: impl Into<String>, timeout: Duration, slow_threshold: Duration) -> Self {
        Self {
            endpoint: endpoint.into(),
            timeout,
            slow_threshold,
        }
    }

    pub fn from_config(config: &CheckConfig) -> Self {
        Self::new(
            config.probe_endpoint.clone(),
            config.probe_timeout(),
            config.slow_connection(),
        )
    }

    pub async fn run(&self) -> Reachability {
        let started = Instant::now();
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.endpoint)).await {
            Ok(Ok(_stream)) => self.classify(started.elapsed()),
            Ok(Err(error)) => {
                tracing::debug!(endpoint = %self.endpoint, error = %error, "Probe connect failed");
                Reachability::Unreachable
            }
            Err(_) => {
                tracing::debug!(endpoint = %self.endpoint, timeout_ms = self.timeout.as_millis() as u64, "Probe timed out");
                Reachability::Unreachable
            }
        }
    }

    /// Latency banding, split out so the boundary is unit-testable.
    pub fn classify(&self, elapsed: Duration) -> Reachability {
        if elapsed < self.slow_threshold {
            Reachability::Fast(elapsed)
        } else {
            Reachability::Slow(elapsed)
        }
    }
}
