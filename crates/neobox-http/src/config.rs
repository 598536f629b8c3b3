//! Session Configuration
//!
//! `HttpContext` carries what every session starts from: timeout, redirect
//! depth, user agent, default headers and proxy. It is passed to sessions
//! explicitly; there is no process-wide mutable default.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::http1;
use crate::proxy::ProxyConfig;
use crate::settings::Settings;
use crate::SettingsError;

/// Settings key holding the HTTP section
pub const SETTINGS_KEY: &str = "http";

/// Defaults applied to new sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HttpContext {
    /// Bound on connect, send and receive
    pub timeout_secs: u64,
    /// Redirect hops followed automatically (0 = disabled)
    pub max_redirects: u32,
    pub user_agent: String,
    /// Extra request headers
    pub headers: BTreeMap<String, String>,
    pub proxy: Option<ProxyConfig>,
    /// Check connectivity before each request
    pub check_online: bool,
}

impl Default for HttpContext {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_redirects: 10,
            user_agent: concat!("Neobox/", env!("CARGO_PKG_VERSION")).into(),
            headers: BTreeMap::new(),
            proxy: None,
            check_online: false,
        }
    }
}

impl HttpContext {
    /// Read the `http` section of the settings. A missing section yields the
    /// defaults.
    pub fn from_settings(settings: &Settings) -> Result<Self, SettingsError> {
        let context: Self = settings.get(SETTINGS_KEY)?.unwrap_or_default();

        if context.timeout_secs == 0 {
            return Err(SettingsError::Invalid {
                key: format!("{}.timeoutSecs", SETTINGS_KEY),
                reason: "timeout must be at least one second".into(),
            });
        }

        if !http1::is_valid_header("User-Agent", &context.user_agent) {
            return Err(SettingsError::Invalid {
                key: format!("{}.userAgent", SETTINGS_KEY),
                reason: "user agent contains control characters".into(),
            });
        }

        if let Some((name, _)) = context.headers.iter().find(|(name, value)| !http1::is_valid_header(name, value)) {
            return Err(SettingsError::Invalid {
                key: format!("{}.headers.{}", SETTINGS_KEY, name),
                reason: "header name or value cannot be sent".into(),
            });
        }

        if let Some(proxy) = &context.proxy {
            if proxy.host.is_empty() {
                return Err(SettingsError::Invalid {
                    key: format!("{}.proxy.host", SETTINGS_KEY),
                    reason: "proxy host is empty".into(),
                });
            }
        }

        Ok(context)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn with_proxy(mut self, proxy: Option<ProxyConfig>) -> Self {
        self.proxy = proxy;
        self
    }
}
