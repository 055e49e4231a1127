//! Host proxy backends
//!
//! Windows writes the per-user Internet Settings key, macOS drives
//! `networksetup`, everything else goes through GNOME `gsettings`.

use super::SystemProxy;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

/// Backend that accepts everything and reports no live proxy
#[derive(Debug, Default)]
pub struct NoopSystemProxy;

#[async_trait]
impl SystemProxy for NoopSystemProxy {
    async fn set_system_proxy(&self, address: Option<&str>, enabled: bool) -> Result<()> {
        debug!("Dry run: system proxy {:?} enabled={}", address, enabled);
        Ok(())
    }

    async fn get_system_proxy(&self) -> Result<Option<String>> {
        Ok(None)
    }

    fn reports_live(&self) -> bool {
        false
    }
}

/// Backend for the platform this binary was built for
#[allow(unused_variables)]
pub fn default_backend(network_service: &str) -> Arc<dyn SystemProxy> {
    #[cfg(target_os = "windows")]
    {
        Arc::new(windows::WindowsSystemProxy)
    }

    #[cfg(target_os = "macos")]
    {
        Arc::new(macos::NetworkSetupProxy::new(network_service))
    }

    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    {
        Arc::new(gnome::GSettingsProxy)
    }
}

#[cfg(not(target_os = "windows"))]
async fn run(program: &str, args: &[&str]) -> Result<String> {
    use crate::Error;

    let output = tokio::process::Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| Error::system_proxy(format!("Failed to run {}: {}", program, e)))?;

    if !output.status.success() {
        return Err(Error::system_proxy(format!(
            "{} {} exited with {}: {}",
            program,
            args.join(" "),
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(target_os = "windows")]
mod windows {
    use super::*;
    use crate::Error;
    use winreg::enums::{HKEY_CURRENT_USER, KEY_READ};
    use winreg::RegKey;

    const INTERNET_SETTINGS: &str = r"Software\Microsoft\Windows\CurrentVersion\Internet Settings";

    pub struct WindowsSystemProxy;

    #[async_trait]
    impl SystemProxy for WindowsSystemProxy {
        async fn set_system_proxy(&self, address: Option<&str>, enabled: bool) -> Result<()> {
            let hkcu = RegKey::predef(HKEY_CURRENT_USER);
            let (settings, _) = hkcu
                .create_subkey(INTERNET_SETTINGS)
                .map_err(|e| Error::system_proxy(format!("Failed to open Internet Settings: {}", e)))?;

            settings
                .set_value("ProxyEnable", &u32::from(enabled))
                .map_err(|e| Error::system_proxy(format!("Failed to set ProxyEnable: {}", e)))?;
            if let Some(address) = address {
                settings
                    .set_value("ProxyServer", &address.to_string())
                    .map_err(|e| Error::system_proxy(format!("Failed to set ProxyServer: {}", e)))?;
            }
            Ok(())
        }

        async fn get_system_proxy(&self) -> Result<Option<String>> {
            let hkcu = RegKey::predef(HKEY_CURRENT_USER);
            let settings = hkcu
                .open_subkey_with_flags(INTERNET_SETTINGS, KEY_READ)
                .map_err(|e| Error::system_proxy(format!("Failed to open Internet Settings: {}", e)))?;

            let enable: u32 = settings.get_value("ProxyEnable").unwrap_or(0);
            if enable == 0 {
                return Ok(None);
            }
            let server: String = settings.get_value("ProxyServer").unwrap_or_default();
            let server = server.trim();
            Ok((!server.is_empty()).then(|| server.to_string()))
        }
    }
}

#[cfg(target_os = "macos")]
mod macos {
    use super::*;
    use crate::common::net::split_host_port;

    pub struct NetworkSetupProxy {
        service: String,
    }

    impl NetworkSetupProxy {
        pub fn new(service: &str) -> Self {
            NetworkSetupProxy {
                service: service.to_string(),
            }
        }
    }

    /// (set host/port, set state) command pairs
    const KINDS: [(&str, &str); 3] = [
        ("-setwebproxy", "-setwebproxystate"),
        ("-setsecurewebproxy", "-setsecurewebproxystate"),
        ("-setsocksfirewallproxy", "-setsocksfirewallproxystate"),
    ];

    #[async_trait]
    impl SystemProxy for NetworkSetupProxy {
        async fn set_system_proxy(&self, address: Option<&str>, enabled: bool) -> Result<()> {
            if let (Some(address), true) = (address, enabled) {
                let (host, port) = split_host_port(address)?;
                let host = host.to_host();
                let port = port.to_string();
                for (set, _) in KINDS {
                    run("networksetup", &[set, &self.service, &host, &port]).await?;
                }
            }
            let state = if enabled { "on" } else { "off" };
            for (_, set_state) in KINDS {
                run("networksetup", &[set_state, &self.service, state]).await?;
            }
            Ok(())
        }

        async fn get_system_proxy(&self) -> Result<Option<String>> {
            let out = run("networksetup", &["-getwebproxy", &self.service]).await?;
            Ok(parse_networksetup(&out))
        }
    }

    /// `Enabled: Yes` / `Server: h` / `Port: p` block from `-getwebproxy`
    fn parse_networksetup(out: &str) -> Option<String> {
        let field = |name: &str| {
            out.lines()
                .filter_map(|l| l.split_once(':'))
                .find(|(k, _)| k.trim() == name)
                .map(|(_, v)| v.trim().to_string())
        };
        if field("Enabled")? != "Yes" {
            return None;
        }
        let server = field("Server").filter(|s| !s.is_empty())?;
        let port = field("Port")?;
        Some(format!("{}:{}", server, port))
    }
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
mod gnome {
    use super::*;
    use crate::common::net::split_host_port;

    const SCHEMA: &str = "org.gnome.system.proxy";
    const KINDS: [&str; 3] = ["http", "https", "socks"];

    pub struct GSettingsProxy;

    #[async_trait]
    impl SystemProxy for GSettingsProxy {
        async fn set_system_proxy(&self, address: Option<&str>, enabled: bool) -> Result<()> {
            if let (Some(address), true) = (address, enabled) {
                let (host, port) = split_host_port(address)?;
                let host = host.to_host();
                let port = port.to_string();
                for kind in KINDS {
                    let schema = format!("{}.{}", SCHEMA, kind);
                    run("gsettings", &["set", &schema, "host", &host]).await?;
                    run("gsettings", &["set", &schema, "port", &port]).await?;
                }
            }
            let mode = if enabled { "manual" } else { "none" };
            run("gsettings", &["set", SCHEMA, "mode", mode]).await?;
            Ok(())
        }

        async fn get_system_proxy(&self) -> Result<Option<String>> {
            let mode = run("gsettings", &["get", SCHEMA, "mode"]).await?;
            if unquote(&mode) != "manual" {
                return Ok(None);
            }
            let schema = format!("{}.http", SCHEMA);
            let host = run("gsettings", &["get", &schema, "host"]).await?;
            let port = run("gsettings", &["get", &schema, "port"]).await?;
            Ok(join_host_port(unquote(&host), port.trim()))
        }
    }

    /// gsettings prints strings as `'value'`
    pub(super) fn unquote(s: &str) -> &str {
        s.trim().trim_matches('\'')
    }

    pub(super) fn join_host_port(host: &str, port: &str) -> Option<String> {
        if host.is_empty() || port == "0" {
            return None;
        }
        if host.contains(':') {
            Some(format!("[{}]:{}", host, port))
        } else {
            Some(format!("{}:{}", host, port))
        }
    }
}
