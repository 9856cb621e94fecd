//! Protobuf backing, optionally over TLS.
//!
//! Unary calls share one connection. Each metric stream dials its own and is
//! torn down through its own [`CancellationToken`], independent of the
//! plugin session.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;

use snapline_core::config::ConfigTable;
use snapline_core::cpolicy::ConfigPolicyTree;
use snapline_core::crypto::Encrypter;
use snapline_core::encoding::{Codec, Encoder};
use snapline_core::error::{Result, SnapError};
use snapline_core::metric::Metric;
use snapline_rpc::frame::{self, FrameStream};
use snapline_rpc::method;
use snapline_rpc::proto::{
    self, CollectArg, CollectReply, GetMetricTypesArg, KillArg, MetricsArg, MetricsReply,
    ProcessReply, PubProcArg, RpcFrame, SetKeyArg,
};
use snapline_rpc::tls;

use super::{
    no_metrics, stamp_advertised, with_deadline, ClientOptions, CollectorClient, ProcessorClient,
    PublisherClient, SessionClient,
};

const STREAM_QUEUE_DEPTH: usize = 64;

pub struct ProtoClient {
    addr: String,
    connector: Option<TlsConnector>,
    conn: Mutex<FrameStream>,
    next_id: AtomicU64,
    encoder: Encoder,
    timeout: Duration,
}

impl ProtoClient {
    pub async fn connect(
        addr: &str,
        opts: &ClientOptions,
        encrypter: Option<Arc<Encrypter>>,
    ) -> Result<Self> {
        let connector = match &opts.tls {
            Some(desc) => tls::client_connector(desc)?,
            None => None,
        };
        let io = with_deadline(opts.timeout, "connect", tls::connect(addr, connector.as_ref()))
            .await?;
        let mut encoder = Encoder::new(Codec::Binary);
        if let Some(e) = encrypter {
            encoder.set_encrypter(e);
        }
        Ok(Self {
            addr: addr.to_string(),
            connector,
            conn: Mutex::new(frame::framed(io)),
            next_id: AtomicU64::new(1),
            encoder,
            timeout: opts.timeout,
        })
    }

    pub fn is_tls(&self) -> bool {
        self.connector.is_some()
    }

    async fn roundtrip(&self, method_name: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = RpcFrame {
            id,
            method: method_name.to_string(),
            body,
            error: String::new(),
        };
        let mut conn = self.conn.lock().await;
        frame::send(&mut conn, proto::encode(&req)).await?;
        loop {
            let bytes = frame::recv(&mut conn)
                .await?
                .ok_or_else(|| SnapError::Transport("plugin closed the connection".into()))?;
            let reply: RpcFrame = proto::decode(&bytes)?;
            if reply.id < id {
                tracing::debug!(stale = reply.id, expected = id, "dropping stale reply");
                continue;
            }
            if reply.id != id {
                return Err(SnapError::Protocol(format!(
                    "reply id {} does not match request id {id}",
                    reply.id
                )));
            }
            if !reply.error.is_empty() {
                return Err(SnapError::Remote(reply.error));
            }
            return Ok(reply.body);
        }
    }

    async fn call(&self, method_name: &str, body: Vec<u8>) -> Result<Vec<u8>> {
        with_deadline(self.timeout, method_name, self.roundtrip(method_name, body)).await
    }

    /// Sealed call with a sealed reply.
    async fn call_sealed(&self, method_name: &str, body: &[u8]) -> Result<Vec<u8>> {
        let out = self.call(method_name, self.encoder.seal(body)?).await?;
        if out.is_empty() {
            return Ok(out);
        }
        self.encoder.open(&out)
    }

    /// Open a metric stream on a dedicated connection.
    pub async fn stream_metrics(
        &self,
        requested: Vec<Metric>,
        settings: StreamSettings,
    ) -> Result<MetricStream> {
        if requested.is_empty() {
            return Err(no_metrics());
        }
        let io = with_deadline(
            self.timeout,
            "connect",
            tls::connect(&self.addr, self.connector.as_ref()),
        )
        .await?;
        let mut conn = frame::framed(io);

        let mut first = settings.to_arg();
        first.metrics_arg = Some(MetricsArg {
            metrics: proto::to_proto_metrics(&requested),
        });
        let f = RpcFrame {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method: method::STREAM_METRICS.to_string(),
            body: self.encoder.seal(&proto::encode(&first))?,
            error: String::new(),
        };
        frame::send(&mut conn, proto::encode(&f)).await?;
        tracing::debug!(addr = %self.addr, metrics = requested.len(), "metric stream opened");

        let kill = CancellationToken::new();
        let (batch_tx, batch_rx) = mpsc::channel(STREAM_QUEUE_DEPTH);
        let (update_tx, update_rx) = mpsc::channel(8);
        let task = tokio::spawn(pump(
            conn,
            self.encoder.clone(),
            f.id,
            kill.clone(),
            batch_tx,
            update_rx,
        ));
        Ok(MetricStream {
            batches: batch_rx,
            updates: update_tx,
            kill,
            task,
        })
    }
}

// --------------------
// Unary surface
// --------------------

#[async_trait]
impl SessionClient for ProtoClient {
    async fn ping(&self) -> Result<()> {
        self.call(method::PING, Vec::new()).await.map(|_| ())
    }

    async fn kill(&self, reason: &str) -> Result<()> {
        let arg = KillArg {
            reason: reason.to_string(),
        };
        self.call_sealed(method::KILL, &proto::encode(&arg))
            .await
            .map(|_| ())
    }

    async fn set_key(&self, encrypted_key: Vec<u8>) -> Result<()> {
        let arg = SetKeyArg { key: encrypted_key };
        self.call(method::SET_KEY, proto::encode(&arg))
            .await
            .map(|_| ())
    }

    async fn get_config_policy(&self) -> Result<ConfigPolicyTree> {
        let out = self.call_sealed(method::GET_CONFIG_POLICY, &[]).await?;
        proto::from_policy_reply(proto::decode(&out)?)
    }
}

#[async_trait]
impl CollectorClient for ProtoClient {
    async fn collect_metrics(&self, requested: Vec<Metric>) -> Result<Vec<Metric>> {
        if requested.is_empty() {
            return Err(no_metrics());
        }
        let arg = MetricsArg {
            metrics: proto::to_proto_metrics(&requested),
        };
        let out = self
            .call_sealed(method::COLLECT_METRICS, &proto::encode(&arg))
            .await?;
        let reply: MetricsReply = proto::decode(&out)?;
        Ok(proto::from_proto_metrics(reply.metrics))
    }

    async fn get_metric_types(&self, config: ConfigTable) -> Result<Vec<Metric>> {
        let arg = GetMetricTypesArg {
            config: Some(proto::to_config_map(&config)),
        };
        let out = self
            .call_sealed(method::GET_METRIC_TYPES, &proto::encode(&arg))
            .await?;
        let reply: MetricsReply = proto::decode(&out)?;
        Ok(stamp_advertised(proto::from_proto_metrics(reply.metrics)))
    }
}

#[async_trait]
impl ProcessorClient for ProtoClient {
    async fn process(
        &self,
        content_type: &str,
        content: Vec<u8>,
        config: ConfigTable,
    ) -> Result<(String, Vec<u8>)> {
        let arg = PubProcArg {
            content_type: content_type.to_string(),
            content,
            config: Some(proto::to_config_map(&config)),
        };
        let out = self
            .call_sealed(method::PROCESS, &proto::encode(&arg))
            .await?;
        let reply: ProcessReply = proto::decode(&out)?;
        Ok((reply.content_type, reply.content))
    }
}

#[async_trait]
impl PublisherClient for ProtoClient {
    async fn publish(
        &self,
        content_type: &str,
        content: Vec<u8>,
        config: ConfigTable,
    ) -> Result<()> {
        let arg = PubProcArg {
            content_type: content_type.to_string(),
            content,
            config: Some(proto::to_config_map(&config)),
        };
        self.call_sealed(method::PUBLISH, &proto::encode(&arg))
            .await
            .map(|_| ())
    }
}

// --------------------
// Metric streams
// --------------------

/// Stream buffering knobs. `None` leaves the current value alone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamSettings {
    /// 0 forwards every batch as soon as it arrives.
    pub max_metrics_buffer: Option<i64>,
    pub max_collect_duration: Option<Duration>,
}

impl StreamSettings {
    fn to_arg(self) -> CollectArg {
        CollectArg {
            metrics_arg: None,
            max_metrics_buffer: self.max_metrics_buffer,
            max_collect_duration_ms: self
                .max_collect_duration
                .map(|d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX)),
        }
    }
}

/// A live metric stream. Dropping it closes the stream.
pub struct MetricStream {
    batches: mpsc::Receiver<Result<Vec<Metric>>>,
    updates: mpsc::Sender<StreamSettings>,
    kill: CancellationToken,
    task: JoinHandle<()>,
}

impl MetricStream {
    /// Next batch; `None` once the stream is closed by either side.
    pub async fn next(&mut self) -> Option<Result<Vec<Metric>>> {
        self.batches.recv().await
    }

    /// Push new buffering settings over the open stream.
    pub async fn update(&self, settings: StreamSettings) -> Result<()> {
        self.updates
            .send(settings)
            .await
            .map_err(|_| SnapError::Transport("metric stream is closed".into()))
    }

    /// The stream's own kill signal.
    pub fn kill_token(&self) -> &CancellationToken {
        &self.kill
    }

    pub fn close(&self) {
        self.kill.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for MetricStream {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

async fn pump(
    mut conn: FrameStream,
    encoder: Encoder,
    id: u64,
    kill: CancellationToken,
    batches: mpsc::Sender<Result<Vec<Metric>>>,
    mut updates: mpsc::Receiver<StreamSettings>,
) {
    loop {
        tokio::select! {
            _ = kill.cancelled() => break,

            update = updates.recv() => {
                let Some(settings) = update else { break };
                let sent = encoder.seal(&proto::encode(&settings.to_arg())).map(|body| RpcFrame {
                    id,
                    method: method::STREAM_METRICS.to_string(),
                    body,
                    error: String::new(),
                });
                let res = match sent {
                    Ok(f) => frame::send(&mut conn, proto::encode(&f)).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = res {
                    let _ = batches.send(Err(e)).await;
                    break;
                }
            }

            inbound = frame::recv(&mut conn) => {
                let bytes = match inbound {
                    Ok(Some(b)) => b,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = batches.send(Err(e)).await;
                        break;
                    }
                };
                let reply = proto::decode::<RpcFrame>(&bytes)
                    .and_then(|f| encoder.open(&f.body))
                    .and_then(|b| proto::decode::<CollectReply>(&b));
                let item = match reply {
                    Ok(r) if !r.error.is_empty() => Err(SnapError::Remote(r.error)),
                    Ok(r) => Ok(proto::from_proto_metrics(
                        r.metrics_reply.map(|m| m.metrics).unwrap_or_default(),
                    )),
                    Err(e) => Err(e),
                };
                let fatal = item.is_err();
                if batches.send(item).await.is_err() || fatal {
                    break;
                }
            }
        }
    }
    kill.cancel();
    tracing::debug!(id, "metric stream closed");
}
