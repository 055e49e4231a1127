//! Endpoint probing
//!
//! A probe answers one question: can `endpoint`, spoken to as `protocol`,
//! fetch any of the verification targets? Targets are walked in order and
//! the first 200 wins; protocols are walked in priority order and the first
//! success wins. The network itself sits behind [`ProbeTransport`] so the
//! fallback logic can be exercised without real proxies.

pub mod dialer;
mod target;

pub use dialer::ProxyDialer;
pub use target::{Target, DEFAULT_TEST_URLS};

use crate::common::Endpoint;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::debug;

/// Proxy protocol, declared in probing priority order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Http,
    Https,
    Socks4,
    Socks5,
}

impl Protocol {
    /// Fixed priority order: cheapest and most common first
    pub const PRIORITY: [Protocol; 4] = [
        Protocol::Http,
        Protocol::Https,
        Protocol::Socks4,
        Protocol::Socks5,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Https => "HTTPS",
            Protocol::Socks4 => "SOCKS4",
            Protocol::Socks5 => "SOCKS5",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "http" => Ok(Protocol::Http),
            "https" => Ok(Protocol::Https),
            "socks4" | "socks4a" => Ok(Protocol::Socks4),
            "socks5" | "socks5h" | "socks" => Ok(Protocol::Socks5),
            _ => Err(Error::parse(format!("Unknown protocol: {}", s))),
        }
    }
}

/// Outcome of one probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Success,
    Failure,
}

/// Result of probing one endpoint with one protocol
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolProbeResult {
    pub endpoint: Endpoint,
    pub protocol: Protocol,
    pub outcome: ProbeOutcome,
    /// Present only on success
    pub latency: Option<Duration>,
}

impl ProtocolProbeResult {
    pub fn success(endpoint: Endpoint, protocol: Protocol, latency: Duration) -> Self {
        ProtocolProbeResult {
            endpoint,
            protocol,
            outcome: ProbeOutcome::Success,
            latency: Some(latency),
        }
    }

    pub fn failure(endpoint: Endpoint, protocol: Protocol) -> Self {
        ProtocolProbeResult {
            endpoint,
            protocol,
            outcome: ProbeOutcome::Failure,
            latency: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == ProbeOutcome::Success
    }
}

/// One request routed through a proxy
#[async_trait]
pub trait ProbeTransport: Send + Sync {
    /// Fetch `target` through `endpoint` speaking `protocol`; returns the final HTTP status.
    ///
    /// The caller bounds the call with the per-attempt timeout.
    async fn attempt(&self, endpoint: &Endpoint, protocol: Protocol, target: &Target) -> Result<u16>;
}

/// Probe `endpoint` over `protocol`, walking `targets` in order
pub async fn probe<T: ProbeTransport + ?Sized>(
    transport: &T,
    endpoint: &Endpoint,
    protocol: Protocol,
    targets: &[Target],
    per_attempt_timeout: Duration,
) -> ProtocolProbeResult {
    for target in targets {
        let start = Instant::now();
        match timeout(per_attempt_timeout, transport.attempt(endpoint, protocol, target)).await {
            Ok(Ok(200)) => {
                let latency = start.elapsed();
                debug!(
                    "{} via {} reached {} in {:.2}s",
                    endpoint,
                    protocol,
                    target,
                    latency.as_secs_f64()
                );
                return ProtocolProbeResult::success(endpoint.clone(), protocol, latency);
            }
            Ok(Ok(status)) => {
                debug!("{} via {}: {} answered {}", endpoint, protocol, target, status);
            }
            Ok(Err(e)) => {
                debug!("{} via {}: {} failed: {}", endpoint, protocol, target, e);
            }
            Err(_) => {
                debug!("{} via {}: {} timed out", endpoint, protocol, target);
            }
        }
    }

    ProtocolProbeResult::failure(endpoint.clone(), protocol)
}

/// Probe protocols in the given order and stop at the first success.
///
/// Returns the last failure when nothing succeeds.
pub async fn probe_best_protocol<T: ProbeTransport + ?Sized>(
    transport: &T,
    endpoint: &Endpoint,
    protocols: &[Protocol],
    targets: &[Target],
    per_attempt_timeout: Duration,
) -> ProtocolProbeResult {
    let mut last = ProtocolProbeResult::failure(endpoint.clone(), Protocol::Http);

    for &protocol in protocols {
        let result = probe(transport, endpoint, protocol, targets, per_attempt_timeout).await;
        if result.is_success() {
            return result;
        }
        last = result;
    }

    last
}
