#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Duration};
use tokio_util::sync::CancellationToken;

use snapline_core::config::ConfigTable;
use snapline_core::cpolicy::{ConfigPolicyTree, IntegerRule, PolicyNode};
use snapline_core::encoding::Encoder;
use snapline_core::error::{Result, SnapError};
use snapline_core::meta::{PluginMeta, PluginType, RpcType};
use snapline_core::metric::{Metric, MetricData, Namespace};
use snapline_plugin::plugin::{Capability, Collector, Plugin, StreamCollector};
use snapline_plugin::proxy::Proxy;
use snapline_plugin::session::{ExitReason, Session, SessionOptions};
use snapline_plugin::transport;
use snapline_rpc::args::{CollectMetricsArgs, CollectMetricsReply};
use snapline_rpc::frame::{self, FrameStream};
use snapline_rpc::jsonrpc::{self, JsonReply, JsonRequest};
use snapline_rpc::method;
use snapline_rpc::native::{self, Reply, Request};
use snapline_rpc::proto::{self, CollectArg, CollectReply, MetricsArg, MetricsReply, RpcFrame};

// --------------------
// Fixtures
// --------------------

struct Fixture {
    stopped: Arc<AtomicBool>,
}

fn metric(path: &[&str]) -> Metric {
    Metric::new(Namespace::new(path), MetricData::Null)
}

#[async_trait]
impl Plugin for Fixture {
    async fn config_policy(&self) -> Result<ConfigPolicyTree> {
        let tree = ConfigPolicyTree::new();
        tree.add(
            &["test"],
            PolicyNode::new().with(IntegerRule::new("port", false)?.with_default(8080)),
        )?;
        Ok(tree)
    }
}

#[async_trait]
impl Collector for Fixture {
    async fn collect_metrics(&self, requested: Vec<Metric>) -> Result<Vec<Metric>> {
        let mut out = Vec::new();
        for m in requested {
            match m.namespace.to_string().as_str() {
                "/test/panic" => panic!("fixture panic"),
                "/test/fail" => return Err(SnapError::Internal("sensor offline".into())),
                _ => out.push(Metric {
                    data: MetricData::Int64(42),
                    ..m
                }),
            }
        }
        Ok(out)
    }

    async fn get_metric_types(&self, _config: ConfigTable) -> Result<Vec<Metric>> {
        Ok(vec![metric(&["test", "ok"])])
    }
}

#[async_trait]
impl StreamCollector for Fixture {
    async fn stream_metrics(
        &self,
        requested: Vec<Metric>,
        out: mpsc::Sender<Vec<Metric>>,
        stop: CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                _ = stop.cancelled() => {
                    self.stopped.store(true, Ordering::SeqCst);
                    return Ok(());
                }
                _ = sleep(Duration::from_millis(20)) => {}
            }
            let batch: Vec<Metric> = requested
                .iter()
                .cloned()
                .map(|m| Metric {
                    data: MetricData::Int64(7),
                    ..m
                })
                .collect();
            if out.send(batch).await.is_err() {
                self.stopped.store(true, Ordering::SeqCst);
                return Ok(());
            }
        }
    }

    async fn get_metric_types(&self, _config: ConfigTable) -> Result<Vec<Metric>> {
        Ok(vec![])
    }
}

/// Sends one batch, drops its sender and keeps running until stopped.
struct EarlyClose {
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl Plugin for EarlyClose {
    async fn config_policy(&self) -> Result<ConfigPolicyTree> {
        Ok(ConfigPolicyTree::new())
    }
}

#[async_trait]
impl StreamCollector for EarlyClose {
    async fn stream_metrics(
        &self,
        requested: Vec<Metric>,
        out: mpsc::Sender<Vec<Metric>>,
        stop: CancellationToken,
    ) -> Result<()> {
        let _ = out.send(requested).await;
        drop(out);
        stop.cancelled().await;
        self.stopped.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_metric_types(&self, _config: ConfigTable) -> Result<Vec<Metric>> {
        Ok(vec![])
    }
}

fn opts() -> SessionOptions {
    SessionOptions {
        ping_timeout: Duration::from_secs(5),
        miss_limit: 3,
        kill_grace: Duration::from_millis(50),
        rsa_bits: 1024,
        control_public_key: None,
    }
}

async fn serve(rpc: RpcType, stream: bool) -> (Arc<Session>, SocketAddr, Arc<AtomicBool>) {
    let stopped = Arc::new(AtomicBool::new(false));
    let fixture = Arc::new(Fixture {
        stopped: stopped.clone(),
    });
    let (plugin_type, capability) = if stream {
        (PluginType::StreamCollector, Capability::StreamCollector(fixture))
    } else {
        (PluginType::Collector, Capability::Collector(fixture))
    };
    let meta = PluginMeta::new("fixture", 1, plugin_type, vec![], vec![])
        .unwrap()
        .rpc_type(rpc)
        .unsecure(true);
    let session = Session::new(meta, capability, opts()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(transport::serve(session.clone(), listener, None));
    (session, addr, stopped)
}

async fn connect(addr: SocketAddr) -> FrameStream {
    frame::framed(TcpStream::connect(addr).await.unwrap())
}

// --------------------
// Proxy
// --------------------

#[tokio::test]
async fn plugin_errors_carry_method_prefix() {
    let (session, _, _) = serve(RpcType::Native, false).await;
    let proxy = Proxy::new(session);
    let err = proxy
        .collect_metrics(vec![metric(&["test", "fail"])])
        .await
        .expect_err("must fail");
    assert_eq!(err.code().as_str(), "PLUGIN");
    assert_eq!(err.to_string(), "CollectMetrics call error: internal: sensor offline");
}

#[tokio::test]
async fn wrong_capability_is_protocol_error() {
    let (session, _, _) = serve(RpcType::Native, false).await;
    let err = Proxy::new(session)
        .publish("snapline.bin".into(), vec![], ConfigTable::new())
        .await
        .expect_err("must fail");
    assert_eq!(err.code().as_str(), "PROTOCOL");
}

// --------------------
// Native
// --------------------

async fn native_call(c: &mut FrameStream, id: u64, method: &str, body: Vec<u8>) -> Reply {
    let req = Request {
        id,
        method: method.to_string(),
        body,
    };
    frame::send(c, native::to_bytes(&req).unwrap()).await.unwrap();
    native::from_bytes(&frame::recv(c).await.unwrap().expect("reply")).unwrap()
}

#[tokio::test]
async fn native_collect_and_errors() {
    let (_session, addr, _) = serve(RpcType::Native, false).await;
    let mut c = connect(addr).await;
    let enc = Encoder::binary();

    let ping = native_call(&mut c, 1, method::PING, vec![]).await;
    assert_eq!(ping.id, 1);
    assert!(ping.error.is_none());

    let body = enc
        .encode(&CollectMetricsArgs {
            metrics: vec![metric(&["test", "ok"])],
        })
        .unwrap();
    let reply = native_call(&mut c, 2, method::COLLECT_METRICS, body).await;
    assert!(reply.error.is_none(), "{:?}", reply.error);
    let out: CollectMetricsReply = enc.decode(&reply.body).unwrap();
    assert_eq!(out.metrics.len(), 1);
    assert_eq!(out.metrics[0].data, MetricData::Int64(42));

    let body = enc
        .encode(&CollectMetricsArgs {
            metrics: vec![metric(&["test", "fail"])],
        })
        .unwrap();
    let reply = native_call(&mut c, 3, method::COLLECT_METRICS, body).await;
    assert_eq!(
        reply.error.as_deref(),
        Some("CollectMetrics call error: internal: sensor offline")
    );

    let reply = native_call(&mut c, 4, "Collector.Nope", vec![]).await;
    assert!(reply.error.unwrap().contains("unknown method"));
}

#[tokio::test]
async fn native_malformed_request_gets_decode_reply() {
    let (session, addr, _) = serve(RpcType::Native, false).await;
    let mut c = connect(addr).await;

    frame::send(&mut c, vec![0xff, 0x01, 0x02]).await.unwrap();
    let bytes = timeout(Duration::from_secs(2), frame::recv(&mut c))
        .await
        .expect("reply in time")
        .unwrap()
        .expect("connection stays open");
    let reply: Reply = native::from_bytes(&bytes).unwrap();
    assert_eq!(reply.id, 0);
    assert!(reply.error.unwrap().starts_with("decode failed"));

    let ping = native_call(&mut c, 2, method::PING, vec![]).await;
    assert!(ping.error.is_none());
    assert!(!session.termination().is_terminated());
}

#[tokio::test]
async fn native_panic_drops_connection_and_terminates() {
    let (session, addr, _) = serve(RpcType::Native, false).await;
    let mut c = connect(addr).await;
    let body = Encoder::binary()
        .encode(&CollectMetricsArgs {
            metrics: vec![metric(&["test", "panic"])],
        })
        .unwrap();
    let req = Request {
        id: 9,
        method: method::COLLECT_METRICS.to_string(),
        body,
    };
    frame::send(&mut c, native::to_bytes(&req).unwrap())
        .await
        .unwrap();

    let next = timeout(Duration::from_secs(2), frame::recv(&mut c))
        .await
        .expect("connection must close");
    assert!(matches!(next, Ok(None) | Err(_)));

    let reason = timeout(Duration::from_secs(2), session.termination().wait())
        .await
        .unwrap();
    assert!(matches!(reason, ExitReason::PluginPanicked(ref m) if m.contains("fixture panic")));
    assert_eq!(reason.exit_code(), 70);
}

#[tokio::test]
async fn native_kill_stops_server() {
    let (session, addr, _) = serve(RpcType::Native, false).await;
    let mut c = connect(addr).await;
    let body = Encoder::binary()
        .encode(&snapline_rpc::args::KillArgs {
            reason: "bye".into(),
        })
        .unwrap();
    let reply = native_call(&mut c, 1, method::KILL, body).await;
    assert!(reply.error.is_none());

    let reason = timeout(Duration::from_secs(2), session.termination().wait())
        .await
        .unwrap();
    assert_eq!(reason, ExitReason::Killed("bye".into()));
}

// --------------------
// HTTP JSON-RPC
// --------------------

async fn post(addr: SocketAddr, body: Vec<u8>) -> JsonReply {
    reqwest::Client::new()
        .post(format!("http://{addr}{}", jsonrpc::PATH))
        .header("content-type", "application/json")
        .body(body)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap()
}

#[tokio::test]
async fn jsonrpc_collect_and_ill_formed() {
    let (_session, addr, _) = serve(RpcType::JsonRpc, false).await;
    let enc = Encoder::json();

    let req = JsonRequest::new(method::PING, 1, b"");
    let reply = post(addr, serde_json::to_vec(&req).unwrap()).await;
    assert_eq!(reply.id, 1);
    assert!(reply.error.is_none());

    let body = enc
        .encode(&CollectMetricsArgs {
            metrics: vec![metric(&["test", "ok"])],
        })
        .unwrap();
    let req = JsonRequest::new(method::COLLECT_METRICS, 2, &body);
    let reply = post(addr, serde_json::to_vec(&req).unwrap()).await;
    let out: CollectMetricsReply = enc.decode(&reply.into_body().unwrap()).unwrap();
    assert_eq!(out.metrics[0].data, MetricData::Int64(42));

    let reply = post(addr, Vec::new()).await;
    assert_eq!(reply.id, 0);
    assert_eq!(reply.error.as_deref(), Some(jsonrpc::ILL_FORMED));
}

// --------------------
// Proto
// --------------------

async fn proto_call(c: &mut FrameStream, id: u64, method: &str, body: Vec<u8>) -> RpcFrame {
    let f = RpcFrame {
        id,
        method: method.to_string(),
        body,
        error: String::new(),
    };
    frame::send(c, proto::encode(&f)).await.unwrap();
    proto::decode(&frame::recv(c).await.unwrap().expect("reply")).unwrap()
}

#[tokio::test]
async fn proto_unary_calls() {
    let (_session, addr, _) = serve(RpcType::Proto, false).await;
    let mut c = connect(addr).await;

    let ping = proto_call(&mut c, 1, method::PING, vec![]).await;
    assert!(ping.error.is_empty());

    let arg = MetricsArg {
        metrics: proto::to_proto_metrics(&[metric(&["test", "ok"])]),
    };
    let reply = proto_call(&mut c, 2, method::COLLECT_METRICS, proto::encode(&arg)).await;
    assert!(reply.error.is_empty(), "{}", reply.error);
    let out = proto::from_proto_metrics(proto::decode::<MetricsReply>(&reply.body).unwrap().metrics);
    assert_eq!(out[0].namespace.to_string(), "/test/ok");
    assert_eq!(out[0].data, MetricData::Int64(42));

    let reply = proto_call(&mut c, 3, method::GET_CONFIG_POLICY, vec![]).await;
    let tree = proto::from_policy_reply(proto::decode(&reply.body).unwrap()).unwrap();
    let node = tree.get(&["test", "anything"]).expect("policy");
    assert!(node.get("port").is_some());
}

async fn open_stream(addr: SocketAddr, buffer: i64, duration_ms: i64) -> FrameStream {
    let mut c = connect(addr).await;
    let arg = CollectArg {
        metrics_arg: Some(MetricsArg {
            metrics: proto::to_proto_metrics(&[metric(&["test", "stream"])]),
        }),
        max_metrics_buffer: Some(buffer),
        max_collect_duration_ms: Some(duration_ms),
    };
    let f = RpcFrame {
        id: 1,
        method: method::STREAM_METRICS.to_string(),
        body: proto::encode(&arg),
        error: String::new(),
    };
    frame::send(&mut c, proto::encode(&f)).await.unwrap();
    c
}

async fn next_batch(c: &mut FrameStream) -> Vec<Metric> {
    let bytes = timeout(Duration::from_secs(3), frame::recv(c))
        .await
        .expect("batch in time")
        .unwrap()
        .expect("open stream");
    let f: RpcFrame = proto::decode(&bytes).unwrap();
    let reply: CollectReply = proto::decode(&f.body).unwrap();
    assert!(reply.error.is_empty(), "{}", reply.error);
    proto::from_proto_metrics(reply.metrics_reply.expect("metrics").metrics)
}

#[tokio::test]
async fn stream_forwards_immediately_without_buffer() {
    let (session, addr, stopped) = serve(RpcType::Proto, true).await;
    let mut c = open_stream(addr, 0, 10_000).await;

    for _ in 0..3 {
        let batch = next_batch(&mut c).await;
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].data, MetricData::Int64(7));
    }

    drop(c);
    timeout(Duration::from_secs(2), async {
        while !stopped.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("plugin stream must stop when the client goes away");
    assert!(!session.termination().is_terminated());
}

#[tokio::test]
async fn stream_flushes_when_buffer_fills() {
    let (_session, addr, _) = serve(RpcType::Proto, true).await;
    let mut c = open_stream(addr, 3, 60_000).await;
    assert_eq!(next_batch(&mut c).await.len(), 3);
    assert_eq!(next_batch(&mut c).await.len(), 3);
}

#[tokio::test]
async fn stream_flushes_on_duration() {
    let (_session, addr, _) = serve(RpcType::Proto, true).await;
    let mut c = open_stream(addr, 1_000, 150).await;
    let batch = next_batch(&mut c).await;
    assert!(!batch.is_empty());
    assert!(batch.len() < 1_000);
}

#[tokio::test]
async fn stream_options_can_be_updated() {
    let (_session, addr, _) = serve(RpcType::Proto, true).await;
    let mut c = open_stream(addr, 1_000, 60_000).await;

    let update = CollectArg {
        metrics_arg: None,
        max_metrics_buffer: Some(2),
        max_collect_duration_ms: None,
    };
    let f = RpcFrame {
        id: 1,
        method: method::STREAM_METRICS.to_string(),
        body: proto::encode(&update),
        error: String::new(),
    };
    frame::send(&mut c, proto::encode(&f)).await.unwrap();

    assert!(next_batch(&mut c).await.len() >= 2);
    assert_eq!(next_batch(&mut c).await.len(), 2);
}

#[tokio::test]
async fn stream_on_plain_collector_reports_error() {
    let (_session, addr, _) = serve(RpcType::Proto, false).await;
    let mut c = open_stream(addr, 0, 1_000).await;
    let bytes = frame::recv(&mut c).await.unwrap().expect("reply");
    let f: RpcFrame = proto::decode(&bytes).unwrap();
    let reply: CollectReply = proto::decode(&f.body).unwrap();
    assert!(reply.error.contains("StreamMetrics is not served"));
}

#[tokio::test]
async fn stream_survives_collector_dropping_its_sender() {
    let stopped = Arc::new(AtomicBool::new(false));
    let meta = PluginMeta::new("early", 1, PluginType::StreamCollector, vec![], vec![])
        .unwrap()
        .rpc_type(RpcType::Proto)
        .unsecure(true);
    let capability = Capability::StreamCollector(Arc::new(EarlyClose {
        stopped: stopped.clone(),
    }));
    let session = Session::new(meta, capability, opts()).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(transport::serve(session.clone(), listener, None));

    let mut c = open_stream(addr, 0, 60_000).await;
    assert_eq!(next_batch(&mut c).await.len(), 1);

    // the stream stays open and quiet while the collector is still running
    let quiet = timeout(Duration::from_millis(300), frame::recv(&mut c)).await;
    assert!(quiet.is_err(), "unexpected frame or close: {quiet:?}");
    assert!(!stopped.load(Ordering::SeqCst));

    drop(c);
    timeout(Duration::from_secs(2), async {
        while !stopped.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("collector must be stopped when the client goes away");
    assert!(!session.termination().is_terminated());
}
