//! Client half shared by the native and HTTP JSON-RPC backings.
//!
//! Arguments and replies go through the session [`Encoder`] (bincode or JSON,
//! sealed once the key is installed). `SetKey` bodies skip the encrypter: the
//! key inside is already wrapped with the plugin public key.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use snapline_core::config::ConfigTable;
use snapline_core::cpolicy::ConfigPolicyTree;
use snapline_core::crypto::Encrypter;
use snapline_core::encoding::{Codec, Encoder};
use snapline_core::error::Result;
use snapline_core::metric::Metric;
use snapline_rpc::args::{
    CollectMetricsArgs, CollectMetricsReply, GetConfigPolicyReply, GetMetricTypesArgs,
    GetMetricTypesReply, KillArgs, ProcessArgs, ProcessReply, PublishArgs, SetKeyArgs,
};
use snapline_rpc::method;

use super::{
    no_metrics, stamp_advertised, with_deadline, CollectorClient, ProcessorClient,
    PublisherClient, SessionClient,
};

/// Moves one `(method, body)` request to the plugin and returns the reply
/// body. Remote errors come back as [`SnapError::Remote`](snapline_core::SnapError).
#[async_trait]
pub trait RawCall: Send + Sync {
    async fn call(&self, method: &str, body: Vec<u8>) -> Result<Vec<u8>>;
}

pub struct EncodedClient<T> {
    raw: T,
    encoder: Encoder,
    plain: Encoder,
    timeout: Duration,
}

impl<T: RawCall> EncodedClient<T> {
    pub fn new(raw: T, codec: Codec, encrypter: Option<Arc<Encrypter>>, timeout: Duration) -> Self {
        let mut encoder = Encoder::new(codec);
        if let Some(e) = encrypter {
            encoder.set_encrypter(e);
        }
        Self {
            raw,
            encoder,
            plain: Encoder::new(codec),
            timeout,
        }
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    async fn call(&self, method_name: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        with_deadline(self.timeout, method_name, self.raw.call(method_name, body)).await
    }
}

#[async_trait]
impl<T: RawCall> SessionClient for EncodedClient<T> {
    async fn ping(&self) -> Result<()> {
        self.call(method::PING, Vec::new()).await.map(|_| ())
    }

    async fn kill(&self, reason: &str) -> Result<()> {
        let body = self.encoder.encode(&KillArgs {
            reason: reason.to_string(),
        })?;
        self.call(method::KILL, body).await.map(|_| ())
    }

    async fn set_key(&self, encrypted_key: Vec<u8>) -> Result<()> {
        let body = self.plain.encode(&SetKeyArgs { key: encrypted_key })?;
        self.call(method::SET_KEY, body).await.map(|_| ())
    }

    async fn get_config_policy(&self) -> Result<ConfigPolicyTree> {
        let out = self.call(method::GET_CONFIG_POLICY, Vec::new()).await?;
        let reply: GetConfigPolicyReply = self.encoder.decode(&out)?;
        Ok(reply.policy)
    }
}

#[async_trait]
impl<T: RawCall> CollectorClient for EncodedClient<T> {
    async fn collect_metrics(&self, requested: Vec<Metric>) -> Result<Vec<Metric>> {
        if requested.is_empty() {
            return Err(no_metrics());
        }
        let body = self
            .encoder
            .encode(&CollectMetricsArgs { metrics: requested })?;
        let out = self.call(method::COLLECT_METRICS, body).await?;
        let reply: CollectMetricsReply = self.encoder.decode(&out)?;
        Ok(reply.metrics)
    }

    async fn get_metric_types(&self, config: ConfigTable) -> Result<Vec<Metric>> {
        let body = self.encoder.encode(&GetMetricTypesArgs { config })?;
        let out = self.call(method::GET_METRIC_TYPES, body).await?;
        let reply: GetMetricTypesReply = self.encoder.decode(&out)?;
        Ok(stamp_advertised(reply.metric_types))
    }
}

#[async_trait]
impl<T: RawCall> ProcessorClient for EncodedClient<T> {
    async fn process(
        &self,
        content_type: &str,
        content: Vec<u8>,
        config: ConfigTable,
    ) -> Result<(String, Vec<u8>)> {
        let body = self.encoder.encode(&ProcessArgs {
            content_type: content_type.to_string(),
            content,
            config,
        })?;
        let out = self.call(method::PROCESS, body).await?;
        let reply: ProcessReply = self.encoder.decode(&out)?;
        Ok((reply.content_type, reply.content))
    }
}

#[async_trait]
impl<T: RawCall> PublisherClient for EncodedClient<T> {
    async fn publish(
        &self,
        content_type: &str,
        content: Vec<u8>,
        config: ConfigTable,
    ) -> Result<()> {
        let body = self.encoder.encode(&PublishArgs {
            content_type: content_type.to_string(),
            content,
            config,
        })?;
        self.call(method::PUBLISH, body).await.map(|_| ())
    }
}
