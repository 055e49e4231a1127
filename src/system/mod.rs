//! System proxy controller
//!
//! Promotes one endpoint to the host's proxy setting and remembers what was
//! applied. The OS mechanics live behind [`SystemProxy`]; the controller only
//! sequences calls and owns the persisted state file.
//!
//! ```text
//!   Disabled --apply(e)--> Enabled(e) --apply(e2)--> Enabled(e2)
//!       ^                      |
//!       +-------clear()--------+
//! ```

mod platform;

pub use platform::{default_backend, NoopSystemProxy};

use crate::common::fs::write_atomic;
use crate::common::Endpoint;
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Host proxy capability
#[async_trait]
pub trait SystemProxy: Send + Sync {
    /// Point the host at `address` (`enabled = true`) or switch the proxy off
    async fn set_system_proxy(&self, address: Option<&str>, enabled: bool) -> Result<()>;

    /// The proxy the host currently uses, if any
    async fn get_system_proxy(&self) -> Result<Option<String>>;

    /// Whether `get_system_proxy` reflects the real host setting. Backends
    /// that cannot read it back report `false` and the controller trusts its
    /// persisted state instead.
    fn reports_live(&self) -> bool {
        true
    }
}

/// Last applied system proxy, persisted as JSON
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemProxyState {
    pub active_endpoint: Option<Endpoint>,
    pub enabled: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Result of an apply or clear
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub success: bool,
    pub error: Option<String>,
}

impl ApplyOutcome {
    fn ok() -> Self {
        ApplyOutcome {
            success: true,
            error: None,
        }
    }

    fn failed(e: Error) -> Self {
        ApplyOutcome {
            success: false,
            error: Some(e.to_string()),
        }
    }
}

pub struct SystemProxyController {
    backend: Arc<dyn SystemProxy>,
    state_path: PathBuf,
    state: Mutex<SystemProxyState>,
}

impl SystemProxyController {
    pub fn new(backend: Arc<dyn SystemProxy>, state_path: PathBuf) -> Self {
        let state = load_state(&state_path);
        SystemProxyController {
            backend,
            state_path,
            state: Mutex::new(state),
        }
    }

    /// Persisted state, without asking the host
    pub fn state(&self) -> SystemProxyState {
        self.state.lock().clone()
    }

    /// Point the host at `endpoint`. Skips the host call only when both the
    /// persisted state and the live setting already name `endpoint`.
    pub async fn apply(&self, endpoint: &Endpoint) -> ApplyOutcome {
        let current = self.state();
        if current.enabled
            && current.active_endpoint.as_ref() == Some(endpoint)
            && self.live_matches(Some(endpoint.address())).await
        {
            return ApplyOutcome::ok();
        }

        if let Err(e) = self.backend.set_system_proxy(Some(endpoint.address()), true).await {
            warn!("Failed to apply system proxy {}: {}", endpoint, e);
            return ApplyOutcome::failed(e);
        }

        let next = SystemProxyState {
            active_endpoint: Some(endpoint.clone()),
            enabled: true,
            updated_at: Some(Utc::now()),
        };
        match self.commit(next) {
            Ok(()) => {
                info!("System proxy set to {}", endpoint);
                ApplyOutcome::ok()
            }
            Err(e) => ApplyOutcome::failed(e),
        }
    }

    pub async fn clear(&self) -> ApplyOutcome {
        let current = self.state();
        if !current.enabled && self.live_matches(None).await {
            return ApplyOutcome::ok();
        }

        if let Err(e) = self.backend.set_system_proxy(None, false).await {
            warn!("Failed to clear system proxy: {}", e);
            return ApplyOutcome::failed(e);
        }

        let next = SystemProxyState {
            active_endpoint: current.active_endpoint,
            enabled: false,
            updated_at: Some(Utc::now()),
        };
        match self.commit(next) {
            Ok(()) => {
                info!("System proxy cleared");
                ApplyOutcome::ok()
            }
            Err(e) => ApplyOutcome::failed(e),
        }
    }

    /// Live host setting when the backend can read it, else the persisted state
    pub async fn current(&self) -> SystemProxyState {
        let persisted = self.state();
        if !self.backend.reports_live() {
            return persisted;
        }
        match self.backend.get_system_proxy().await {
            Ok(Some(live)) => SystemProxyState {
                active_endpoint: Some(Endpoint::new(live)),
                enabled: true,
                updated_at: persisted.updated_at,
            },
            Ok(None) => SystemProxyState {
                enabled: false,
                ..persisted
            },
            Err(e) => {
                warn!("Failed to read system proxy: {}", e);
                persisted
            }
        }
    }

    /// Whether the host is already at `expected`. Backends without a live
    /// view always match; a read error never does.
    async fn live_matches(&self, expected: Option<&str>) -> bool {
        if !self.backend.reports_live() {
            return true;
        }
        match self.backend.get_system_proxy().await {
            Ok(live) => live.as_deref() == expected,
            Err(e) => {
                debug!("Failed to read system proxy: {}", e);
                false
            }
        }
    }

    /// Write `next` to disk, then swap it in
    fn commit(&self, next: SystemProxyState) -> Result<()> {
        let json = serde_json::to_vec_pretty(&next)?;
        write_atomic(&self.state_path, &json)?;
        *self.state.lock() = next;
        Ok(())
    }
}

fn load_state(path: &Path) -> SystemProxyState {
    let content = match std::fs::read(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return SystemProxyState::default(),
        Err(e) => {
            warn!("Failed to read {}: {}", path.display(), e);
            return SystemProxyState::default();
        }
    };
    serde_json::from_slice(&content).unwrap_or_else(|e| {
        warn!("Ignoring corrupt system proxy state {}: {}", path.display(), e);
        SystemProxyState::default()
    })
}


#[cfg(test)]
mod tests {
    use super::testing::MemorySystemProxy;
    use super::*;

    fn controller(dir: &tempfile::TempDir) -> (Arc<MemorySystemProxy>, SystemProxyController) {
        let backend = Arc::new(MemorySystemProxy::default());
        let controller = SystemProxyController::new(backend.clone(), dir.path().join("system_proxy.json"));
        (backend, controller)
    }

    #[tokio::test]
    async fn test_apply_then_clear() {
        let dir = tempfile::tempdir().unwrap();
        let (_backend, controller) = controller(&dir);
        let ep = Endpoint::new("10.0.0.1:3128");

        assert!(controller.apply(&ep).await.success);
        let state = controller.current().await;
        assert_eq!(state.active_endpoint, Some(ep.clone()));
        assert!(state.enabled);

        assert!(controller.clear().await.success);
        let state = controller.current().await;
        assert_eq!(state.active_endpoint, Some(ep));
        assert!(!state.enabled);
    }

    #[tokio::test]
    async fn test_apply_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, controller) = controller(&dir);
        let ep = Endpoint::new("10.0.0.1:3128");

        assert!(controller.apply(&ep).await.success);
        assert!(controller.apply(&ep).await.success);

        assert_eq!(backend.sets.lock().len(), 1);
        let state = controller.current().await;
        assert_eq!(state.active_endpoint, Some(ep));
        assert!(state.enabled);
    }

    #[tokio::test]
    async fn test_clear_when_disabled_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, controller) = controller(&dir);

        let before = controller.state();
        let outcome = controller.clear().await;

        assert!(outcome.success);
        assert_eq!(controller.state(), before);
        assert!(backend.sets.lock().is_empty());
        assert!(!dir.path().join("system_proxy.json").exists());
    }

    #[tokio::test]
    async fn test_backend_failure_leaves_state() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, controller) = controller(&dir);
        assert!(controller.apply(&Endpoint::new("a:1")).await.success);

        *backend.fail.lock() = true;
        let outcome = controller.apply(&Endpoint::new("b:2")).await;

        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("access denied"));
        assert_eq!(controller.state().active_endpoint, Some(Endpoint::new("a:1")));
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let (_backend, controller) = controller(&dir);
            assert!(controller.apply(&Endpoint::new("a:1")).await.success);
        }

        let (_backend, reopened) = controller(&dir);
        let state = reopened.state();
        assert_eq!(state.active_endpoint, Some(Endpoint::new("a:1")));
        assert!(state.enabled);
        assert!(state.updated_at.is_some());
    }

    #[tokio::test]
    async fn test_current_prefers_live_setting() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, controller) = controller(&dir);
        *backend.live.lock() = Some("192.168.1.1:8080".to_string());

        let state = controller.current().await;
        assert_eq!(state.active_endpoint, Some(Endpoint::new("192.168.1.1:8080")));
        assert!(state.enabled);
        // Persisted state untouched
        assert!(!controller.state().enabled);
    }

    #[tokio::test]
    async fn test_apply_rewrites_host_turned_off_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, controller) = controller(&dir);
        let ep = Endpoint::new("10.0.0.1:3128");
        assert!(controller.apply(&ep).await.success);

        // Someone switched the proxy off behind our back
        *backend.live.lock() = None;
        let state = controller.current().await;
        assert!(!state.enabled);
        assert_eq!(state.active_endpoint, Some(ep.clone()));

        assert!(controller.apply(&ep).await.success);
        assert_eq!(backend.sets.lock().len(), 2);
        assert_eq!(backend.live.lock().as_deref(), Some("10.0.0.1:3128"));
        assert!(controller.current().await.enabled);
    }

    #[tokio::test]
    async fn test_clear_reaches_host_set_elsewhere() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, controller) = controller(&dir);
        *backend.live.lock() = Some("192.168.1.1:8080".to_string());

        assert!(controller.clear().await.success);
        assert_eq!(backend.sets.lock().as_slice(), &[(None, false)]);
        assert_eq!(*backend.live.lock(), None);
    }

    #[tokio::test]
    async fn test_dry_run_backend_trusts_persisted_state() {
        let dir = tempfile::tempdir().unwrap();
        let controller = SystemProxyController::new(
            Arc::new(NoopSystemProxy),
            dir.path().join("system_proxy.json"),
        );
        let ep = Endpoint::new("10.0.0.1:3128");

        assert!(controller.apply(&ep).await.success);
        let state = controller.current().await;
        assert!(state.enabled);
        assert_eq!(state.active_endpoint, Some(ep));
    }

    #[test]
    fn test_corrupt_state_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system_proxy.json");
        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_state(&path), SystemProxyState::default());
    }
}
