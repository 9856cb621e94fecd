//! Control-side transport clients.
//!
//! One interface set, three backings picked from the plugin's declared
//! transport:
//! - `native`: bincode frames over a persistent TCP connection
//! - `httpjsonrpc`: `POST /rpc` JSON envelopes
//! - `proto`: protobuf frames over TCP or TLS, plus metric streams
//!
//! Native and HTTP share [`encoded::EncodedClient`]; they differ only in how a
//! `(method, body)` pair reaches the plugin.

pub mod encoded;
pub mod httpjsonrpc;
pub mod native;
pub mod proto;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use snapline_core::config::ConfigTable;
use snapline_core::cpolicy::ConfigPolicyTree;
use snapline_core::crypto::{decode_public_key, encrypt_key, generate_key, Encrypter};
use snapline_core::error::{Result, SnapError};
use snapline_core::meta::{HandshakeState, PluginType, Response, RpcType};
use snapline_core::metric::Metric;
use snapline_core::security::SecurityDescriptor;

pub use proto::{MetricStream, StreamSettings};

/// Options shared by every backing.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-call deadline.
    pub timeout: Duration,
    /// Client TLS for proto plugins. `None` dials plain TCP.
    pub tls: Option<SecurityDescriptor>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            tls: None,
        }
    }
}

/// Session surface every plugin serves.
#[async_trait]
pub trait SessionClient: Send + Sync {
    async fn ping(&self) -> Result<()>;
    async fn kill(&self, reason: &str) -> Result<()>;
    /// Send the symmetric key, already wrapped with the plugin public key.
    async fn set_key(&self, encrypted_key: Vec<u8>) -> Result<()>;
    async fn get_config_policy(&self) -> Result<ConfigPolicyTree>;
}

#[async_trait]
pub trait CollectorClient: SessionClient {
    async fn collect_metrics(&self, requested: Vec<Metric>) -> Result<Vec<Metric>>;
    async fn get_metric_types(&self, config: ConfigTable) -> Result<Vec<Metric>>;
}

#[async_trait]
pub trait ProcessorClient: SessionClient {
    async fn process(
        &self,
        content_type: &str,
        content: Vec<u8>,
        config: ConfigTable,
    ) -> Result<(String, Vec<u8>)>;
}

#[async_trait]
pub trait PublisherClient: SessionClient {
    async fn publish(&self, content_type: &str, content: Vec<u8>, config: ConfigTable)
        -> Result<()>;
}

/// Every backing implements the full set.
pub trait PluginClient: CollectorClient + ProcessorClient + PublisherClient {}

impl<T: CollectorClient + ProcessorClient + PublisherClient> PluginClient for T {}

pub(crate) fn no_metrics() -> SnapError {
    SnapError::Protocol("no metrics to collect".into())
}

/// Metric types are stamped with the time they were advertised.
pub(crate) fn stamp_advertised(mut types: Vec<Metric>) -> Vec<Metric> {
    let now = Utc::now();
    for m in &mut types {
        m.last_advertised_time = Some(now);
    }
    types
}

pub(crate) async fn with_deadline<T, F>(timeout: Duration, method: &str, fut: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(res) => res,
        Err(_) => Err(SnapError::Timeout(format!(
            "{method} exceeded {} ms",
            timeout.as_millis()
        ))),
    }
}

// --------------------
// Connect
// --------------------

/// A connected plugin, typed by the capability its handshake declared.
#[derive(Clone)]
pub enum PluginHandle {
    Collector(Arc<dyn CollectorClient>),
    Processor(Arc<dyn ProcessorClient>),
    Publisher(Arc<dyn PublisherClient>),
    StreamCollector(Arc<proto::ProtoClient>),
}

impl fmt::Debug for PluginHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PluginHandle").field(&self.plugin_type()).finish()
    }
}

impl PluginHandle {
    fn from_client<C: PluginClient + 'static>(client: Arc<C>, ty: PluginType) -> Result<Self> {
        Ok(match ty {
            PluginType::Collector => PluginHandle::Collector(client),
            PluginType::Processor => PluginHandle::Processor(client),
            PluginType::Publisher => PluginHandle::Publisher(client),
            PluginType::StreamCollector => {
                return Err(SnapError::Protocol(
                    "stream collectors are only reachable over proto".into(),
                ))
            }
        })
    }

    pub fn plugin_type(&self) -> PluginType {
        match self {
            PluginHandle::Collector(_) => PluginType::Collector,
            PluginHandle::Processor(_) => PluginType::Processor,
            PluginHandle::Publisher(_) => PluginType::Publisher,
            PluginHandle::StreamCollector(_) => PluginType::StreamCollector,
        }
    }

    pub fn collector(&self) -> Option<Arc<dyn CollectorClient>> {
        match self {
            PluginHandle::Collector(c) => Some(c.clone()),
            PluginHandle::StreamCollector(c) => Some(c.clone() as Arc<dyn CollectorClient>),
            _ => None,
        }
    }

    pub fn processor(&self) -> Option<Arc<dyn ProcessorClient>> {
        match self {
            PluginHandle::Processor(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn publisher(&self) -> Option<Arc<dyn PublisherClient>> {
        match self {
            PluginHandle::Publisher(p) => Some(p.clone()),
            _ => None,
        }
    }

    pub fn stream_collector(&self) -> Option<Arc<proto::ProtoClient>> {
        match self {
            PluginHandle::StreamCollector(c) => Some(c.clone()),
            _ => None,
        }
    }

    pub async fn ping(&self) -> Result<()> {
        match self {
            PluginHandle::Collector(c) => c.ping().await,
            PluginHandle::Processor(c) => c.ping().await,
            PluginHandle::Publisher(c) => c.ping().await,
            PluginHandle::StreamCollector(c) => c.ping().await,
        }
    }

    pub async fn kill(&self, reason: &str) -> Result<()> {
        match self {
            PluginHandle::Collector(c) => c.kill(reason).await,
            PluginHandle::Processor(c) => c.kill(reason).await,
            PluginHandle::Publisher(c) => c.kill(reason).await,
            PluginHandle::StreamCollector(c) => c.kill(reason).await,
        }
    }

    pub async fn get_config_policy(&self) -> Result<ConfigPolicyTree> {
        match self {
            PluginHandle::Collector(c) => c.get_config_policy().await,
            PluginHandle::Processor(c) => c.get_config_policy().await,
            PluginHandle::Publisher(c) => c.get_config_policy().await,
            PluginHandle::StreamCollector(c) => c.get_config_policy().await,
        }
    }

    async fn set_key(&self, encrypted_key: Vec<u8>) -> Result<()> {
        match self {
            PluginHandle::Collector(c) => c.set_key(encrypted_key).await,
            PluginHandle::Processor(c) => c.set_key(encrypted_key).await,
            PluginHandle::Publisher(c) => c.set_key(encrypted_key).await,
            PluginHandle::StreamCollector(c) => c.set_key(encrypted_key).await,
        }
    }
}

/// Dial the plugin described by `response` and bootstrap its session key.
///
/// Unless the plugin is unsecure, a fresh symmetric key is generated,
/// wrapped with the plugin's public key and sent with `SetKey`; the client
/// starts encrypting only after the plugin has accepted it.
pub async fn connect(response: &Response, opts: &ClientOptions) -> Result<PluginHandle> {
    if response.state == HandshakeState::Failure {
        return Err(SnapError::plugin_call(
            "Handshake",
            response
                .error_message
                .as_deref()
                .unwrap_or("plugin reported failure"),
        ));
    }
    let meta = &response.meta;
    let addr = response.listen_address.as_str();
    let encrypter = (!meta.unsecure).then(|| Arc::new(Encrypter::new()));

    let handle = match meta.rpc_type {
        RpcType::Native => {
            let client = native::connect(addr, opts.timeout, encrypter.clone()).await?;
            PluginHandle::from_client(Arc::new(client), response.plugin_type)?
        }
        RpcType::JsonRpc => {
            let client = httpjsonrpc::connect(addr, opts.timeout, encrypter.clone())?;
            PluginHandle::from_client(Arc::new(client), response.plugin_type)?
        }
        RpcType::Proto => {
            let client =
                Arc::new(proto::ProtoClient::connect(addr, opts, encrypter.clone()).await?);
            match response.plugin_type {
                PluginType::StreamCollector => PluginHandle::StreamCollector(client),
                other => PluginHandle::from_client(client, other)?,
            }
        }
    };

    if let Some(e) = encrypter {
        let public = response.public_key.as_deref().ok_or_else(|| {
            SnapError::Protocol("secure plugin handshake carried no public key".into())
        })?;
        let key = generate_key();
        let wrapped = encrypt_key(&decode_public_key(public)?, &key)?;
        handle.set_key(wrapped).await?;
        e.set_key(key)?;
    }

    tracing::info!(
        plugin = %meta.name,
        version = meta.version,
        rpc = meta.rpc_type.as_str(),
        addr,
        secure = !meta.unsecure,
        "connected to plugin"
    );
    Ok(handle)
}
