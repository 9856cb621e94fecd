//! Plugin metadata, startup argument, and handshake response.
//!
//! The startup [`Arg`] is the single JSON positional argument a plugin
//! receives. The [`Response`] is the single JSON line it prints to stdout once
//! bound; the control process reads exactly that line to learn how to connect.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::content_type;
use crate::error::{Result, SnapError};
use crate::security::SecurityDescriptor;

/// Capability a plugin implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    Collector,
    Processor,
    Publisher,
    StreamCollector,
}

impl PluginType {
    pub fn as_str(self) -> &'static str {
        match self {
            PluginType::Collector => "collector",
            PluginType::Processor => "processor",
            PluginType::Publisher => "publisher",
            PluginType::StreamCollector => "stream_collector",
        }
    }
}

/// Wire transport the plugin serves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RpcType {
    /// Direct binary RPC over length-prefixed frames.
    #[default]
    Native,
    /// HTTP + JSON-RPC envelopes.
    JsonRpc,
    /// Protobuf frames, optionally over TLS.
    Proto,
}

impl RpcType {
    pub fn as_str(self) -> &'static str {
        match self {
            RpcType::Native => "native",
            RpcType::JsonRpc => "jsonrpc",
            RpcType::Proto => "proto",
        }
    }
}

/// How the scheduler picks among running instances of a plugin.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    #[default]
    LeastRecentlyUsed,
    Sticky,
    Config,
}

pub const DEFAULT_CONCURRENCY_COUNT: u32 = 1;

/// Immutable description of a plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginMeta {
    pub name: String,
    pub version: u32,
    pub plugin_type: PluginType,
    pub rpc_type: RpcType,
    pub accepted_content_types: Vec<String>,
    pub returned_content_types: Vec<String>,
    pub concurrency_count: u32,
    pub exclusive: bool,
    pub unsecure: bool,
    pub cache_ttl_ms: Option<u64>,
    pub routing_strategy: RoutingStrategy,
}

impl PluginMeta {
    /// Build metadata. Empty `accepted` defaults to `["snapline.*"]`; every
    /// content type must look like `family.codec`.
    pub fn new(
        name: impl Into<String>,
        version: u32,
        plugin_type: PluginType,
        accepted: Vec<String>,
        returned: Vec<String>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(SnapError::Config("plugin name must not be empty".into()));
        }
        let accepted = if accepted.is_empty() {
            vec![content_type::ANY.to_string()]
        } else {
            accepted
        };
        for ct in accepted.iter().chain(returned.iter()) {
            if !content_type::is_well_formed(ct) {
                return Err(SnapError::Config(format!("invalid content type: {ct}")));
            }
        }
        Ok(Self {
            name,
            version,
            plugin_type,
            rpc_type: RpcType::default(),
            accepted_content_types: accepted,
            returned_content_types: returned,
            concurrency_count: DEFAULT_CONCURRENCY_COUNT,
            exclusive: false,
            unsecure: false,
            cache_ttl_ms: None,
            routing_strategy: RoutingStrategy::default(),
        })
    }

    pub fn rpc_type(mut self, rpc: RpcType) -> Self {
        self.rpc_type = rpc;
        self
    }

    pub fn concurrency_count(mut self, n: u32) -> Self {
        self.concurrency_count = n.max(1);
        self
    }

    pub fn exclusive(mut self, yes: bool) -> Self {
        self.exclusive = yes;
        self
    }

    /// Skip the key exchange and payload encryption.
    pub fn unsecure(mut self, yes: bool) -> Self {
        self.unsecure = yes;
        self
    }

    pub fn cache_ttl_ms(mut self, ttl: u64) -> Self {
        self.cache_ttl_ms = Some(ttl);
        self
    }

    pub fn routing_strategy(mut self, strategy: RoutingStrategy) -> Self {
        self.routing_strategy = strategy;
        self
    }
}

pub const DEFAULT_PING_TIMEOUT_MS: u64 = 1500;
pub const DEFAULT_PING_MISS_LIMIT: u32 = 3;
pub const DEFAULT_LOG_PATH: &str = "/tmp/snapline_plugin.log";

fn default_ping_timeout_ms() -> u64 {
    DEFAULT_PING_TIMEOUT_MS
}

fn default_ping_miss_limit() -> u32 {
    DEFAULT_PING_MISS_LIMIT
}

fn default_daemon() -> bool {
    true
}

/// Startup configuration, parsed once from the plugin's single argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Arg {
    #[serde(default)]
    pub log_path: Option<PathBuf>,

    #[serde(default)]
    pub log_level: Option<String>,

    /// Control process public key (base64 DER), if the control side sent one.
    #[serde(default)]
    pub control_public_key: Option<String>,

    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    #[serde(default = "default_ping_miss_limit")]
    pub ping_miss_limit: u32,

    /// `false` runs the plugin without a heartbeat watchdog.
    #[serde(default = "default_daemon")]
    pub daemon: bool,

    /// 0 lets the OS pick.
    #[serde(default)]
    pub listen_port: u16,

    #[serde(default)]
    pub tls: Option<SecurityDescriptor>,
}

impl Default for Arg {
    fn default() -> Self {
        Self {
            log_path: None,
            log_level: None,
            control_public_key: None,
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
            ping_miss_limit: DEFAULT_PING_MISS_LIMIT,
            daemon: true,
            listen_port: 0,
            tls: None,
        }
    }
}

impl Arg {
    pub fn parse(s: &str) -> Result<Self> {
        let arg: Arg = serde_json::from_str(s)
            .map_err(|e| SnapError::Config(format!("invalid plugin arg: {e}")))?;
        arg.validate()?;
        Ok(arg)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SnapError::Internal(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.ping_timeout_ms == 0 {
            return Err(SnapError::Config("ping_timeout_ms must be > 0".into()));
        }
        if self.ping_miss_limit == 0 {
            return Err(SnapError::Config("ping_miss_limit must be > 0".into()));
        }
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeState {
    Success,
    Failure,
}

/// The handshake line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Response {
    pub meta: PluginMeta,
    pub listen_address: String,
    pub token: String,
    #[serde(rename = "Type")]
    pub plugin_type: PluginType,
    pub state: HandshakeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Session public key (base64 DER), absent when unsecure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
}

impl Response {
    pub fn to_line(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| SnapError::Internal(e.to_string()))
    }

    pub fn from_line(line: &str) -> Result<Self> {
        serde_json::from_str(line.trim())
            .map_err(|e| SnapError::Protocol(format!("malformed handshake: {e}")))
    }
}
