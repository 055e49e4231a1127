//! Probe scheduler
//!
//! Fans one probe task per endpoint out over a bounded pool and reports
//! results as they complete. The pool is a `JoinSet` owned by a single
//! [`ProbeScheduler::run`] call: it is created when the run starts and
//! dropped (aborting anything still in flight) when the run returns.

use crate::classify::{self, EndpointVerdict};
use crate::common::Endpoint;
use crate::probe::{probe_best_protocol, ProbeTransport, Protocol, ProtocolProbeResult, Target};
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scheduler parameters, taken from the configuration at construction
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    pub targets: Vec<Target>,
    pub protocols: Vec<Protocol>,
    pub per_attempt_timeout: Duration,
    pub max_workers: usize,
    pub fast_threshold_secs: f64,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        SchedulerOptions {
            targets: Target::defaults(),
            protocols: Protocol::PRIORITY.to_vec(),
            per_attempt_timeout: Duration::from_secs(5),
            max_workers: 20,
            fast_threshold_secs: 5.0,
        }
    }
}

/// Progress report, emitted once per completed endpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Progress {
    /// `completed / total`, in `[0, 1]`
    pub fraction_done: f64,
    pub completed: usize,
    pub total: usize,
    /// Whether the endpoint that just finished was reachable
    pub success: bool,
}

/// Everything one run produced
#[derive(Debug, Clone, Default)]
pub struct ClassificationRun {
    /// Best result per finished endpoint, in completion order
    pub results: Vec<ProtocolProbeResult>,
    pub verdicts: Vec<EndpointVerdict>,
    /// Endpoints submitted, finished or not
    pub total: usize,
    pub cancelled: bool,
}

impl ClassificationRun {
    pub fn completed(&self) -> usize {
        self.results.len()
    }

    pub fn reachable(&self) -> impl Iterator<Item = &EndpointVerdict> {
        self.verdicts.iter().filter(|v| v.is_reachable())
    }

    pub fn fast(&self) -> impl Iterator<Item = &EndpointVerdict> {
        self.verdicts.iter().filter(|v| v.is_fast)
    }
}

pub struct ProbeScheduler {
    transport: Arc<dyn ProbeTransport>,
    options: Arc<SchedulerOptions>,
}

impl ProbeScheduler {
    pub fn new(transport: Arc<dyn ProbeTransport>, options: SchedulerOptions) -> Self {
        ProbeScheduler {
            transport,
            options: Arc::new(options),
        }
    }

    /// Probe a single endpoint outside of a full run
    pub async fn probe_one(&self, endpoint: &Endpoint) -> ProtocolProbeResult {
        probe_best_protocol(
            self.transport.as_ref(),
            endpoint,
            &self.options.protocols,
            &self.options.targets,
            self.options.per_attempt_timeout,
        )
        .await
    }

    /// Probe every endpoint with at most `max_workers` in flight.
    ///
    /// `on_progress` runs synchronously once per finished endpoint, in
    /// completion order. Cancelling `cancel` stops submission and abandons
    /// in-flight probes; the returned run then only covers finished endpoints.
    pub async fn run<F>(
        &self,
        endpoints: Vec<Endpoint>,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> ClassificationRun
    where
        F: FnMut(Progress),
    {
        let total = endpoints.len();
        let max_workers = self.options.max_workers.max(1);
        let mut pending: VecDeque<Endpoint> = endpoints.into();
        let mut pool: JoinSet<ProtocolProbeResult> = JoinSet::new();
        let mut results = Vec::with_capacity(total);
        let mut completed = 0;
        let mut cancelled = false;

        info!(
            "Probing {} endpoints with {} workers ({} targets, {:?} per attempt)",
            total,
            max_workers,
            self.options.targets.len(),
            self.options.per_attempt_timeout
        );

        loop {
            while pool.len() < max_workers && !cancel.is_cancelled() {
                let Some(endpoint) = pending.pop_front() else { break };
                let transport = self.transport.clone();
                let options = self.options.clone();
                pool.spawn(async move {
                    let probe = probe_best_protocol(
                        transport.as_ref(),
                        &endpoint,
                        &options.protocols,
                        &options.targets,
                        options.per_attempt_timeout,
                    );
                    match AssertUnwindSafe(probe).catch_unwind().await {
                        Ok(result) => result,
                        Err(_) => {
                            warn!("Probe of {} panicked", endpoint);
                            ProtocolProbeResult::failure(endpoint.clone(), Protocol::Http)
                        }
                    }
                });
            }

            if pool.is_empty() {
                break;
            }

            let joined = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                joined = pool.join_next() => joined,
            };

            let result = match joined {
                Some(Ok(result)) => result,
                Some(Err(e)) => {
                    // Panics are caught inside the task, so only an abort gets
                    // here; it yields no result and no progress tick.
                    warn!("Probe task ended abnormally: {}", e);
                    continue;
                }
                None => break,
            };
            completed += 1;

            let success = result.is_success();
            debug!(
                "{} -> {} ({}/{})",
                result.endpoint,
                if success { "reachable" } else { "unreachable" },
                completed,
                total
            );
            results.push(result);
            on_progress(progress(completed, total, success));
        }

        if cancelled || cancel.is_cancelled() {
            cancelled = true;
            pool.abort_all();
            info!("Probe run cancelled after {}/{} endpoints", completed, total);
        }

        let verdicts = classify::verdicts(&results, self.options.fast_threshold_secs);
        ClassificationRun {
            results,
            verdicts,
            total,
            cancelled,
        }
    }
}

fn progress(completed: usize, total: usize, success: bool) -> Progress {
    let fraction_done = if total == 0 {
        1.0
    } else {
        completed as f64 / total as f64
    };
    Progress {
        fraction_done,
        completed,
        total,
        success,
    }
}
