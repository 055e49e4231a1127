//! Verdicts from probe results

use crate::common::Endpoint;
use crate::probe::{Protocol, ProtocolProbeResult};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Classification outcome for one endpoint after a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndpointVerdict {
    pub endpoint: Endpoint,
    /// Present iff the endpoint is reachable
    pub best_protocol: Option<Protocol>,
    pub best_latency: Option<Duration>,
    pub is_fast: bool,
}

impl EndpointVerdict {
    pub fn unreachable(endpoint: Endpoint) -> Self {
        EndpointVerdict {
            endpoint,
            best_protocol: None,
            best_latency: None,
            is_fast: false,
        }
    }

    pub fn reachable(endpoint: Endpoint, protocol: Protocol, latency: Duration, fast_threshold_secs: f64) -> Self {
        EndpointVerdict {
            endpoint,
            best_protocol: Some(protocol),
            best_latency: Some(latency),
            is_fast: latency.as_secs_f64() < fast_threshold_secs,
        }
    }

    pub fn is_reachable(&self) -> bool {
        self.best_protocol.is_some()
    }

    fn improves_on(&self, protocol: Protocol, latency: Duration) -> bool {
        match (self.best_protocol, self.best_latency) {
            (Some(best_protocol), Some(best_latency)) => {
                latency < best_latency || (latency == best_latency && protocol < best_protocol)
            }
            _ => true,
        }
    }
}

/// One verdict per endpoint, in first-appearance order.
///
/// Several successes for one endpoint keep the lowest latency; ties go to
/// the higher-priority protocol.
pub fn verdicts(results: &[ProtocolProbeResult], fast_threshold_secs: f64) -> Vec<EndpointVerdict> {
    let mut out: Vec<EndpointVerdict> = Vec::new();
    let mut index: HashMap<&Endpoint, usize> = HashMap::new();

    for result in results {
        let i = *index.entry(&result.endpoint).or_insert_with(|| {
            out.push(EndpointVerdict::unreachable(result.endpoint.clone()));
            out.len() - 1
        });

        if let (true, Some(latency)) = (result.is_success(), result.latency) {
            if out[i].improves_on(result.protocol, latency) {
                out[i] = EndpointVerdict::reachable(
                    result.endpoint.clone(),
                    result.protocol,
                    latency,
                    fast_threshold_secs,
                );
            }
        }
    }

    out
}

/// Split probe results into `(reachable, fast)`; `fast` is always a subset of `reachable`
pub fn classify(
    results: &[ProtocolProbeResult],
    fast_threshold_secs: f64,
) -> (Vec<EndpointVerdict>, Vec<EndpointVerdict>) {
    let reachable: Vec<EndpointVerdict> = verdicts(results, fast_threshold_secs)
        .into_iter()
        .filter(EndpointVerdict::is_reachable)
        .collect();
    let fast = reachable.iter().filter(|v| v.is_fast).cloned().collect();
    (reachable, fast)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(ep: &str, protocol: Protocol, ms: u64) -> ProtocolProbeResult {
        ProtocolProbeResult::success(Endpoint::new(ep), protocol, Duration::from_millis(ms))
    }

    fn fail(ep: &str, protocol: Protocol) -> ProtocolProbeResult {
        ProtocolProbeResult::failure(Endpoint::new(ep), protocol)
    }

    #[test]
    fn test_reachable_and_fast() {
        let results = vec![
            ok("10.0.0.1:3128", Protocol::Http, 800),
            fail("10.0.0.2:1080", Protocol::Socks5),
            ok("10.0.0.3:1080", Protocol::Socks5, 2500),
        ];

        let (reachable, fast) = classify(&results, 2.0);

        assert_eq!(reachable.len(), 2);
        assert_eq!(reachable[0].endpoint, Endpoint::new("10.0.0.1:3128"));
        assert_eq!(reachable[0].best_protocol, Some(Protocol::Http));
        assert_eq!(reachable[0].best_latency, Some(Duration::from_millis(800)));
        assert_eq!(fast.len(), 1);
        assert_eq!(fast[0], reachable[0]);
    }

    #[test]
    fn test_threshold_is_strict() {
        let results = vec![ok("a:1", Protocol::Http, 2000)];
        let (reachable, fast) = classify(&results, 2.0);
        assert_eq!(reachable.len(), 1);
        assert!(fast.is_empty());
    }

    #[test]
    fn test_keeps_minimum_latency_protocol() {
        let results = vec![
            ok("a:1", Protocol::Http, 900),
            ok("a:1", Protocol::Socks5, 300),
            fail("a:1", Protocol::Https),
        ];

        let all = verdicts(&results, 5.0);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].best_protocol, Some(Protocol::Socks5));
        assert_eq!(all[0].best_latency, Some(Duration::from_millis(300)));
    }

    #[test]
    fn test_latency_tie_prefers_priority() {
        let results = vec![
            ok("a:1", Protocol::Socks5, 300),
            ok("a:1", Protocol::Http, 300),
        ];
        let all = verdicts(&results, 5.0);
        assert_eq!(all[0].best_protocol, Some(Protocol::Http));
    }

    #[test]
    fn test_unreachable_kept_in_verdicts_only() {
        let results = vec![fail("a:1", Protocol::Http), ok("b:2", Protocol::Https, 10)];

        let all = verdicts(&results, 5.0);
        assert_eq!(all.len(), 2);
        assert!(!all[0].is_reachable());
        assert!(!all[0].is_fast);

        let (reachable, _) = classify(&results, 5.0);
        assert_eq!(reachable.len(), 1);
    }

    #[test]
    fn test_deterministic_and_subset() {
        let results: Vec<ProtocolProbeResult> = (0..50)
            .map(|i| {
                let ep = format!("10.0.{}.{}:80", i % 7, i);
                if i % 3 == 0 {
                    fail(&ep, Protocol::Http)
                } else {
                    ok(&ep, Protocol::PRIORITY[i % 4], (i as u64) * 97)
                }
            })
            .collect();

        let first = classify(&results, 2.5);
        let second = classify(&results, 2.5);
        assert_eq!(first, second);

        let (reachable, fast) = first;
        for v in &fast {
            assert!(reachable.contains(v));
        }
    }

    #[test]
    fn test_empty_input() {
        let (reachable, fast) = classify(&[], 5.0);
        assert!(reachable.is_empty());
        assert!(fast.is_empty());
    }
}
