//! Proxyman Rust - proxy verification and selection engine
//!
//! Given a list of candidate proxy endpoints, this crate finds out which of
//! them work, over which protocol and how fast:
//! - Concurrent probing bounded by a worker budget, with per-attempt timeouts
//! - HTTP, HTTPS, SOCKS4 and SOCKS5, tried in fixed priority order
//! - Crash-safe persistence of results with a backup of the previous list
//! - Promotion of one endpoint to the system-wide proxy setting
//!
//! # Architecture
//!
//! ```text
//!                       +-----------------+
//!                       |     Manager     |
//!                       +--------+--------+
//!                                |
//!       +------------------------+----------------------+
//!       |                        |                      |
//! +-----v------+        +--------v--------+     +-------v-------+
//! |   store/   |        |   scheduler/    |     |    system/    |
//! | (list, IO) |        | (bounded pool)  |     | (OS proxy)    |
//! +-----^------+        +--------+--------+     +---------------+
//!       |                        |
//!       |               +--------v--------+
//!       |               |     probe/      |
//!       |               | (dialer, SOCKS) |
//!       |               +--------+--------+
//!       |                        |
//!       |               +--------v--------+
//!       +---------------+   classify/     |
//!                       +-----------------+
//! ```

pub mod classify;
pub mod common;
pub mod config;
pub mod probe;
pub mod scheduler;
pub mod store;
pub mod system;

pub use classify::EndpointVerdict;
pub use common::error::{Error, Result};
pub use common::Endpoint;
pub use config::Config;
pub use probe::{ProbeTransport, Protocol, ProxyDialer};
pub use scheduler::{ClassificationRun, Progress, ProbeScheduler};
pub use store::{DetailRow, EndpointStore, ImportReport, ResultStore};
pub use system::{ApplyOutcome, SystemProxy, SystemProxyController, SystemProxyState};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Totals from one `test_all`
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    /// Endpoints submitted
    pub total: usize,
    /// Endpoints that finished probing
    pub tested: usize,
    pub reachable: usize,
    pub fast: usize,
    pub cancelled: bool,
    pub verdicts: Vec<EndpointVerdict>,
}

/// What an edit did besides renaming the endpoint
#[derive(Debug, Clone)]
pub struct EditReport {
    pub reapplied: Option<ApplyOutcome>,
    pub verdict: Option<EndpointVerdict>,
}

/// What `startup` did
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    pub run: Option<RunSummary>,
    pub applied: Option<ApplyOutcome>,
}

/// Single owner of configuration, stores, scheduler and controller.
///
/// Persisted files are only written from here, and only after a scheduler
/// run has returned.
pub struct Manager {
    config: Config,
    config_path: PathBuf,
    store: EndpointStore,
    results: ResultStore,
    scheduler: ProbeScheduler,
    controller: SystemProxyController,
}

impl Manager {
    /// Open with the native dialer and the host proxy backend the config selects
    pub fn open<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config = Config::load(config_path.as_ref())?;
        let transport: Arc<dyn ProbeTransport> = Arc::new(ProxyDialer::new()?);
        let backend: Arc<dyn SystemProxy> = match config.system_proxy_backend.as_str() {
            "none" => Arc::new(system::NoopSystemProxy),
            _ => system::default_backend(&config.network_service),
        };
        Self::with_parts(config, config_path.as_ref().to_path_buf(), transport, backend)
    }

    /// Assemble from explicit parts
    pub fn with_parts(
        config: Config,
        config_path: PathBuf,
        transport: Arc<dyn ProbeTransport>,
        backend: Arc<dyn SystemProxy>,
    ) -> Result<Self> {
        let proxy_file = config.resolve(&config.proxy_file);
        let store = EndpointStore::open(proxy_file.clone());
        let results = ResultStore::new(
            proxy_file,
            config.resolve(&config.details_file),
            config.resolve(&config.backup_file),
        );
        let scheduler = ProbeScheduler::new(transport, config.scheduler_options()?);
        let controller = SystemProxyController::new(backend, config.resolve(&config.state_file));

        info!("Loaded {} endpoints from {}", store.len(), store.path().display());

        Ok(Manager {
            config,
            config_path,
            store,
            results,
            scheduler,
            controller,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &EndpointStore {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut EndpointStore {
        &mut self.store
    }

    pub fn results(&self) -> &ResultStore {
        &self.results
    }

    pub fn controller(&self) -> &SystemProxyController {
        &self.controller
    }

    /// Probe every stored endpoint and write the outcome back.
    ///
    /// A cancelled run is reported but not persisted.
    pub async fn test_all<F>(&mut self, cancel: &CancellationToken, on_progress: F) -> Result<RunSummary>
    where
        F: FnMut(Progress),
    {
        let endpoints = self.store.endpoints().to_vec();
        let run = self.scheduler.run(endpoints, cancel, on_progress).await;

        let reachable: Vec<EndpointVerdict> = run.reachable().cloned().collect();
        let fast: Vec<EndpointVerdict> = run.fast().cloned().collect();
        let summary = RunSummary {
            total: run.total,
            tested: run.completed(),
            reachable: reachable.len(),
            fast: fast.len(),
            cancelled: run.cancelled,
            verdicts: run.verdicts,
        };

        if summary.cancelled {
            warn!(
                "Test cancelled after {}/{} endpoints; results not saved",
                summary.tested, summary.total
            );
            return Ok(summary);
        }

        self.results.persist(&reachable, &fast)?;
        self.store.load();
        info!(
            "Tested {} endpoints: {} reachable, {} fast",
            summary.total, summary.reachable, summary.fast
        );
        Ok(summary)
    }

    /// Probe one endpoint; nothing is written
    pub async fn test_one(&self, endpoint: &Endpoint) -> EndpointVerdict {
        let result = self.scheduler.probe_one(endpoint).await;
        classify::verdicts(&[result], self.config.fast_proxy_threshold)
            .pop()
            .unwrap_or_else(|| EndpointVerdict::unreachable(endpoint.clone()))
    }

    /// Make `endpoint` the system proxy and remember it as `last_proxy`
    pub async fn apply(&mut self, endpoint: &Endpoint) -> ApplyOutcome {
        let outcome = self.controller.apply(endpoint).await;
        if outcome.success {
            self.remember_last_proxy(endpoint);
        }
        outcome
    }

    pub async fn clear(&self) -> ApplyOutcome {
        self.controller.clear().await
    }

    /// Rename `old` to `new`. Returns `None` when nothing was renamed.
    ///
    /// If `old` was the enabled system proxy, `new` takes its place; with
    /// `auto_test` on, `new` is probed afterwards.
    pub async fn edit(&mut self, old: &Endpoint, new: &str) -> Result<Option<EditReport>> {
        if !self.store.replace(old, new)? {
            return Ok(None);
        }
        let new = Endpoint::parse(new)?;

        let state = self.controller.state();
        let reapplied = if state.enabled && state.active_endpoint.as_ref() == Some(old) {
            Some(self.apply(&new).await)
        } else {
            None
        };

        let verdict = if self.config.auto_test {
            Some(self.test_one(&new).await)
        } else {
            None
        };

        Ok(Some(EditReport { reapplied, verdict }))
    }

    /// Startup sequence: optional full test, then optional re-apply of
    /// `last_proxy`. Failures are logged, never returned.
    pub async fn startup(&mut self, cancel: &CancellationToken) -> StartupReport {
        let mut report = StartupReport::default();

        if self.config.startup_test {
            match self.test_all(cancel, |_| {}).await {
                Ok(summary) => report.run = Some(summary),
                Err(e) => warn!("Startup test failed: {}", e),
            }
        }

        if self.config.auto_apply {
            if let Some(last) = self.config.last_proxy.clone() {
                let outcome = self.apply(&Endpoint::new(last)).await;
                if let Some(e) = &outcome.error {
                    warn!("Failed to re-apply last proxy: {}", e);
                }
                report.applied = Some(outcome);
            }
        }

        report
    }

    /// Current system proxy; a live one is recorded as `last_proxy`
    pub async fn status(&mut self) -> SystemProxyState {
        let state = self.controller.current().await;
        if let (true, Some(active)) = (state.enabled, state.active_endpoint.as_ref()) {
            self.remember_last_proxy(active);
        }
        state
    }

    fn remember_last_proxy(&mut self, endpoint: &Endpoint) {
        if self.config.last_proxy.as_deref() == Some(endpoint.address()) {
            return;
        }
        self.config.last_proxy = Some(endpoint.address().to_string());
        if let Err(e) = self.config.save(&self.config_path) {
            warn!("Failed to save configuration: {}", e);
        }
    }
}
