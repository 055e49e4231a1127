//! Configuration module
//!
//! JSON by default, YAML when the file name ends in `.yaml`/`.yml`. Every
//! field is optional in the file; missing ones take their defaults.

use crate::probe::{Protocol, Target, DEFAULT_TEST_URLS};
use crate::scheduler::SchedulerOptions;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Latency below which a reachable endpoint counts as fast (seconds)
    pub fast_proxy_threshold: f64,

    /// Endpoints probed concurrently
    pub max_workers: usize,

    /// Bound on one request through a proxy (seconds)
    pub per_attempt_timeout: u64,

    /// Run a full test when the manager starts
    pub startup_test: bool,

    /// Re-apply `last_proxy` when the manager starts
    pub auto_apply: bool,

    /// Re-test an endpoint after editing it
    pub auto_test: bool,

    /// Last endpoint applied as system proxy
    pub last_proxy: Option<String>,

    /// Verification targets, in order
    pub test_urls: Vec<String>,

    /// Protocols to try, in order
    pub protocols: Vec<Protocol>,

    pub proxy_file: PathBuf,
    pub details_file: PathBuf,
    pub backup_file: PathBuf,
    pub state_file: PathBuf,

    /// `auto` for the host backend, `none` for a dry run
    pub system_proxy_backend: String,

    /// Network service touched by `networksetup` (macOS)
    pub network_service: String,

    /// Directory relative paths resolve against
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fast_proxy_threshold: 5.0,
            max_workers: 20,
            per_attempt_timeout: 5,
            startup_test: true,
            auto_apply: true,
            auto_test: true,
            last_proxy: None,
            test_urls: DEFAULT_TEST_URLS.iter().map(|s| s.to_string()).collect(),
            protocols: Protocol::PRIORITY.to_vec(),
            proxy_file: PathBuf::from("proxy.txt"),
            details_file: PathBuf::from("proxy_details.txt"),
            backup_file: PathBuf::from("proxy.txt_backup"),
            state_file: PathBuf::from("system_proxy.json"),
            system_proxy_backend: "auto".to_string(),
            network_service: "Wi-Fi".to_string(),
            base_dir: PathBuf::new(),
        }
    }
}

impl Config {
    /// Load configuration from file, writing the defaults first if it does not exist
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::parse(&content, is_yaml(path))?
        } else {
            info!("Writing default configuration to {}", path.display());
            let config = Config::default();
            config.save(path)?;
            config
        };

        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// Parse from a string
    pub fn parse(content: &str, yaml: bool) -> Result<Self> {
        if yaml {
            Ok(serde_yaml::from_str(content)?)
        } else {
            serde_json::from_str(content).map_err(|e| Error::config(format!("Invalid configuration: {}", e)))
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !(self.fast_proxy_threshold > 0.0) {
            return Err(Error::config("fast_proxy_threshold must be positive"));
        }
        if self.max_workers == 0 {
            return Err(Error::config("max_workers must be at least 1"));
        }
        if self.per_attempt_timeout == 0 {
            return Err(Error::config("per_attempt_timeout must be at least 1 second"));
        }
        if self.test_urls.is_empty() {
            return Err(Error::config("test_urls must not be empty"));
        }
        if self.protocols.is_empty() {
            return Err(Error::config("protocols must not be empty"));
        }
        self.targets()?;

        match self.system_proxy_backend.as_str() {
            "auto" | "none" => Ok(()),
            other => Err(Error::config(format!(
                "system_proxy_backend must be 'auto' or 'none', got '{}'",
                other
            ))),
        }
    }

    /// Save configuration to file, in the format its extension implies
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml(path) {
            serde_yaml::to_string(self)?
        } else {
            serde_json::to_string_pretty(self)?
        };
        crate::common::fs::write_atomic(path, content.as_bytes())
    }

    /// Resolve a configured path against the config file's directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.per_attempt_timeout)
    }

    pub fn targets(&self) -> Result<Vec<Target>> {
        self.test_urls.iter().map(|u| Target::parse(u)).collect()
    }

    pub fn scheduler_options(&self) -> Result<SchedulerOptions> {
        Ok(SchedulerOptions {
            targets: self.targets()?,
            protocols: self.protocols.clone(),
            per_attempt_timeout: self.per_attempt_timeout(),
            max_workers: self.max_workers,
            fast_threshold_secs: self.fast_proxy_threshold,
        })
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = Config::parse(r#"{"fast_proxy_threshold": 2.0, "last_proxy": "1.2.3.4:80"}"#, false).unwrap();
        assert_eq!(config.fast_proxy_threshold, 2.0);
        assert_eq!(config.last_proxy.as_deref(), Some("1.2.3.4:80"));
        assert_eq!(config.max_workers, 20);
        assert_eq!(config.protocols, Protocol::PRIORITY.to_vec());
        assert_eq!(config.backup_file, PathBuf::from("proxy.txt_backup"));
    }

    #[test]
    fn test_yaml() {
        let config = Config::parse("max_workers: 4\nprotocols: [SOCKS5, HTTP]\n", true).unwrap();
        assert_eq!(config.max_workers, 4);
        assert_eq!(config.protocols, vec![Protocol::Socks5, Protocol::Http]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = Config::default();
        config.fast_proxy_threshold = 0.0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.max_workers = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.test_urls = vec!["ftp://example.com".into()];
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.system_proxy_backend = "registry".into();
        assert!(config.validate().is_err());

        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_load_creates_defaults_and_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config::load(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.resolve(&config.proxy_file), dir.path().join("proxy.txt"));

        let reread: Config = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(reread.fast_proxy_threshold, 5.0);
    }

    #[test]
    fn test_load_rejects_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{ nope").unwrap();
        assert!(matches!(Config::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_round_trip_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        let mut config = Config::default();
        config.last_proxy = Some("10.0.0.1:3128".into());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.last_proxy, config.last_proxy);
    }

    #[test]
    fn test_scheduler_options() {
        let options = Config::default().scheduler_options().unwrap();
        assert_eq!(options.targets.len(), 5);
        assert_eq!(options.per_attempt_timeout, Duration::from_secs(5));
    }
}
