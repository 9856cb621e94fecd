use std::time::Duration;

use serde::Deserialize;

use snapline_core::error::{Result, SnapError};
use snapline_core::meta::Arg;
use snapline_core::security::{SecurityDescriptor, TlsSide};

use crate::client::ClientOptions;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlConfig {
    pub version: u32,

    #[serde(default)]
    pub control: ControlSection,
}

impl ControlConfig {
    pub fn validate(&self) -> Result<()> {
        if self.version != 1 {
            return Err(SnapError::Config(format!(
                "unsupported config version {}",
                self.version
            )));
        }
        self.control.validate()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ControlSection {
    /// Per-call deadline for every client transport.
    #[serde(default = "default_plugin_timeout_ms")]
    pub plugin_timeout_ms: u64,

    /// Metric cache TTL for plugins that do not declare their own.
    #[serde(default = "default_cache_expiration_ms")]
    pub cache_expiration_ms: u64,

    /// Heartbeat window handed to launched plugins.
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Client-side TLS for proto plugins.
    #[serde(default)]
    pub tls: Option<SecurityDescriptor>,
}

impl Default for ControlSection {
    fn default() -> Self {
        Self {
            plugin_timeout_ms: default_plugin_timeout_ms(),
            cache_expiration_ms: default_cache_expiration_ms(),
            ping_timeout_ms: default_ping_timeout_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            tls: None,
        }
    }
}

impl ControlSection {
    pub fn validate(&self) -> Result<()> {
        if !(100..=120_000).contains(&self.plugin_timeout_ms) {
            return Err(SnapError::Config(
                "control.plugin_timeout_ms must be between 100 and 120000".into(),
            ));
        }
        if !(1..=3_600_000).contains(&self.cache_expiration_ms) {
            return Err(SnapError::Config(
                "control.cache_expiration_ms must be between 1 and 3600000".into(),
            ));
        }
        if !(100..=60_000).contains(&self.ping_timeout_ms) {
            return Err(SnapError::Config(
                "control.ping_timeout_ms must be between 100 and 60000".into(),
            ));
        }
        if !(100..=120_000).contains(&self.handshake_timeout_ms) {
            return Err(SnapError::Config(
                "control.handshake_timeout_ms must be between 100 and 120000".into(),
            ));
        }
        if let Some(tls) = &self.tls {
            if tls.tls_enabled && tls.side != TlsSide::Client {
                return Err(SnapError::Config(
                    "control.tls.side must be \"client\"".into(),
                ));
            }
            tls.validate()?;
        }
        Ok(())
    }

    pub fn plugin_timeout(&self) -> Duration {
        Duration::from_millis(self.plugin_timeout_ms)
    }

    pub fn cache_expiration(&self) -> Duration {
        Duration::from_millis(self.cache_expiration_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            timeout: self.plugin_timeout(),
            tls: self.tls.clone(),
        }
    }

    /// Startup argument for a plugin launched under this config.
    pub fn plugin_arg(&self) -> Arg {
        Arg {
            ping_timeout_ms: self.ping_timeout_ms,
            ..Arg::default()
        }
    }
}

fn default_plugin_timeout_ms() -> u64 {
    3000
}
fn default_cache_expiration_ms() -> u64 {
    500
}
fn default_ping_timeout_ms() -> u64 {
    1500
}
fn default_handshake_timeout_ms() -> u64 {
    3000
}
