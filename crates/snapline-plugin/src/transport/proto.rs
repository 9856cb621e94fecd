//! Protobuf transport server.
//!
//! Each connection carries [`RpcFrame`]s. A connection whose first frame is
//! `StreamCollector.StreamMetrics` becomes a metrics stream for the rest of
//! its life; every other connection serves unary request/reply pairs.
//!
//! Frame bodies are sealed by the session encoder, except `Ping` (empty) and
//! `SetKey` (wrapped with the session public key).

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval_at, Duration, Instant, MissedTickBehavior};
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use snapline_core::error::{Result, SnapError};
use snapline_core::metric::Metric;
use snapline_rpc::frame::{self, FrameStream};
use snapline_rpc::method;
use snapline_rpc::proto::{
    self, CollectArg, CollectReply, Empty, GetMetricTypesArg, KillArg, MetricsArg, MetricsReply,
    ProcessReply, PubProcArg, RpcFrame, SetKeyArg,
};
use snapline_rpc::tls;

use crate::plugin::Capability;
use crate::proxy::{guard, Outcome, Proxy};
use crate::session::Session;

pub const DEFAULT_MAX_COLLECT_DURATION: Duration = Duration::from_secs(10);
const STREAM_CHANNEL_DEPTH: usize = 64;
const STREAM_STOP_GRACE: Duration = Duration::from_secs(1);

pub async fn serve(
    session: Arc<Session>,
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
) -> Result<()> {
    let stop = session.termination().token().clone();
    let proxy = Proxy::new(session.clone());
    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            a = listener.accept() => a,
        };
        let (tcp, peer) =
            accepted.map_err(|e| SnapError::Transport(format!("accept failed: {e}")))?;
        tracing::debug!(parent: session.span(), %peer, "proto connection accepted");
        let proxy = proxy.clone();
        let acceptor = acceptor.clone();
        let span = session.span().clone();
        tokio::spawn(
            async move {
                if let Err(e) = handle_conn(proxy, tcp, acceptor).await {
                    tracing::debug!(error = %e, "proto connection closed with error");
                }
            }
            .instrument(span),
        );
    }
}

async fn send_frame(stream: &mut FrameStream, f: &RpcFrame) -> Result<()> {
    frame::send(stream, proto::encode(f)).await
}

async fn handle_conn(proxy: Proxy, tcp: TcpStream, acceptor: Option<TlsAcceptor>) -> Result<()> {
    let io = tls::accept(tcp, acceptor.as_ref()).await?;
    let mut stream = frame::framed(io);
    let stop = proxy.session().termination().token().clone();
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            n = frame::recv(&mut stream) => n?,
        };
        let Some(bytes) = next else {
            return Ok(());
        };
        let req: RpcFrame = proto::decode(&bytes)?;
        if req.method == method::STREAM_METRICS {
            return stream_metrics(proxy, stream, req).await;
        }

        let session = proxy.session().clone();
        let mut reply = RpcFrame {
            id: req.id,
            method: req.method.clone(),
            ..Default::default()
        };
        match guard(&session, dispatch(&proxy, &req.method, &req.body)).await {
            Outcome::Done(Ok(body)) => reply.body = body,
            Outcome::Done(Err(e)) => {
                tracing::debug!(method = %req.method, error = %e, "call failed");
                reply.error = e.to_string();
            }
            Outcome::Panicked => return Ok(()),
        }
        send_frame(&mut stream, &reply).await?;
    }
}

async fn dispatch(proxy: &Proxy, method_name: &str, body: &[u8]) -> Result<Vec<u8>> {
    let enc = proxy.session().encoder();
    match method_name {
        method::PING => {
            proxy.ping();
            Ok(proto::encode(&Empty {}))
        }
        method::KILL => {
            let arg: KillArg = proto::decode(&enc.open(body)?)?;
            proxy.kill(arg.reason);
            Ok(Vec::new())
        }
        method::SET_KEY => {
            let arg: SetKeyArg = proto::decode(body)?;
            proxy.set_key(&arg.key)?;
            Ok(Vec::new())
        }
        method::GET_CONFIG_POLICY => {
            let tree = proxy.config_policy().await?;
            enc.seal(&proto::encode(&proto::to_policy_reply(&tree)))
        }
        method::COLLECT_METRICS => {
            let arg: MetricsArg = proto::decode(&enc.open(body)?)?;
            let metrics = proxy
                .collect_metrics(proto::from_proto_metrics(arg.metrics))
                .await?;
            enc.seal(&proto::encode(&MetricsReply {
                metrics: proto::to_proto_metrics(&metrics),
            }))
        }
        method::GET_METRIC_TYPES => {
            let arg: GetMetricTypesArg = proto::decode(&enc.open(body)?)?;
            let types = proxy
                .get_metric_types(proto::from_config_map(arg.config.as_ref()))
                .await?;
            enc.seal(&proto::encode(&MetricsReply {
                metrics: proto::to_proto_metrics(&types),
            }))
        }
        method::PROCESS => {
            let arg: PubProcArg = proto::decode(&enc.open(body)?)?;
            let (content_type, content) = proxy
                .process(
                    arg.content_type,
                    arg.content,
                    proto::from_config_map(arg.config.as_ref()),
                )
                .await?;
            enc.seal(&proto::encode(&ProcessReply {
                content_type,
                content,
            }))
        }
        method::PUBLISH => {
            let arg: PubProcArg = proto::decode(&enc.open(body)?)?;
            proxy
                .publish(
                    arg.content_type,
                    arg.content,
                    proto::from_config_map(arg.config.as_ref()),
                )
                .await?;
            Ok(Vec::new())
        }
        other => Err(SnapError::Protocol(format!("unknown method: {other}"))),
    }
}

// --------------------
// Metric streams
// --------------------

struct StreamOptions {
    max_buffer: usize,
    max_duration: Duration,
}

impl StreamOptions {
    fn apply(&mut self, arg: &CollectArg) {
        if let Some(n) = arg.max_metrics_buffer {
            self.max_buffer = usize::try_from(n).unwrap_or(0);
        }
        if let Some(ms) = arg.max_collect_duration_ms {
            if ms > 0 {
                self.max_duration = Duration::from_millis(ms.unsigned_abs());
            }
        }
    }
}

struct StreamWriter<'a> {
    stream: &'a mut FrameStream,
    proxy: &'a Proxy,
    id: u64,
}

impl StreamWriter<'_> {
    async fn reply(&mut self, reply: CollectReply) -> Result<()> {
        let body = self.proxy.session().encoder().seal(&proto::encode(&reply))?;
        let f = RpcFrame {
            id: self.id,
            method: method::STREAM_METRICS.to_string(),
            body,
            error: String::new(),
        };
        send_frame(self.stream, &f).await
    }

    async fn flush(&mut self, buffer: &mut Vec<Metric>) -> Result<()> {
        if buffer.is_empty() {
            return Ok(());
        }
        let metrics = proto::to_proto_metrics(buffer);
        buffer.clear();
        self.reply(CollectReply {
            metrics_reply: Some(MetricsReply { metrics }),
            error: String::new(),
        })
        .await
    }

    async fn error(&mut self, msg: String) -> Result<()> {
        self.reply(CollectReply {
            metrics_reply: None,
            error: msg,
        })
        .await
    }
}

async fn stream_metrics(proxy: Proxy, mut stream: FrameStream, first: RpcFrame) -> Result<()> {
    let session = proxy.session().clone();
    let mut out = StreamWriter {
        stream: &mut stream,
        proxy: &proxy,
        id: first.id,
    };

    let collector = match session.capability() {
        Capability::StreamCollector(c) => c.clone(),
        _ => {
            out.error(format!(
                "StreamMetrics is not served by a {} plugin",
                session.meta().plugin_type.as_str()
            ))
            .await?;
            return Ok(());
        }
    };

    let arg: CollectArg = proto::decode(&session.encoder().open(&first.body)?)?;
    let Some(requested) = arg.metrics_arg.as_ref() else {
        out.error("first stream frame must carry the requested metrics".into())
            .await?;
        return Ok(());
    };
    let requested = proto::from_proto_metrics(requested.metrics.clone());
    let mut opts = StreamOptions {
        max_buffer: 0,
        max_duration: DEFAULT_MAX_COLLECT_DURATION,
    };
    opts.apply(&arg);
    session.reset_heartbeat();
    tracing::info!(
        parent: session.span(),
        metrics = requested.len(),
        max_buffer = opts.max_buffer,
        max_duration_ms = opts.max_duration.as_millis() as u64,
        "StreamMetrics called"
    );

    // Per-stream kill signal. Session termination cancels it too, but
    // cancelling it leaves the session alone.
    let kill = session.termination().token().child_token();
    let (tx, mut rx) = mpsc::channel::<Vec<Metric>>(STREAM_CHANNEL_DEPTH);
    let mut task = tokio::spawn({
        let kill = kill.clone();
        async move { collector.stream_metrics(requested, tx, kill).await }
    });
    let mut task_done = false;
    let mut rx_closed = false;

    let mut buffer: Vec<Metric> = Vec::new();
    let mut ticker = interval_at(Instant::now() + opts.max_duration, opts.max_duration);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let result: Result<()> = loop {
        tokio::select! {
            _ = kill.cancelled() => break Ok(()),

            inbound = frame::recv(out.stream) => {
                let bytes = match inbound {
                    Ok(Some(b)) => b,
                    Ok(None) => break Ok(()),
                    Err(e) => break Err(e),
                };
                let update = proto::decode::<RpcFrame>(&bytes)
                    .and_then(|f| session.encoder().open(&f.body))
                    .and_then(|b| proto::decode::<CollectArg>(&b));
                match update {
                    Ok(update) => {
                        session.reset_heartbeat();
                        if update.metrics_arg.is_some() {
                            tracing::debug!("requested metrics cannot change mid-stream; ignored");
                        }
                        let old = opts.max_duration;
                        opts.apply(&update);
                        if opts.max_duration != old {
                            ticker = interval_at(Instant::now() + opts.max_duration, opts.max_duration);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        }
                        tracing::debug!(
                            max_buffer = opts.max_buffer,
                            max_duration_ms = opts.max_duration.as_millis() as u64,
                            "stream options updated"
                        );
                        if opts.max_buffer == 0 || buffer.len() >= opts.max_buffer {
                            if let Err(e) = out.flush(&mut buffer).await {
                                break Err(e);
                            }
                        }
                    }
                    Err(e) => break Err(e),
                }
            }

            batch = rx.recv(), if !task_done && !rx_closed => {
                let Some(batch) = batch else {
                    // The collector dropped its sender but is still running.
                    tracing::debug!(parent: session.span(), "stream collector closed its sender");
                    rx_closed = true;
                    continue;
                };
                buffer.extend(batch);
                if opts.max_buffer == 0 || buffer.len() >= opts.max_buffer {
                    if let Err(e) = out.flush(&mut buffer).await {
                        break Err(e);
                    }
                }
            }

            _ = ticker.tick() => {
                if let Err(e) = out.flush(&mut buffer).await {
                    break Err(e);
                }
            }

            joined = &mut task, if !task_done => {
                task_done = true;
                match joined {
                    Ok(Ok(())) => {
                        while let Ok(batch) = rx.try_recv() {
                            buffer.extend(batch);
                        }
                        break out.flush(&mut buffer).await;
                    }
                    Ok(Err(e)) => {
                        let msg = SnapError::plugin_call("StreamMetrics", e).to_string();
                        break out.error(msg).await;
                    }
                    Err(join_err) if join_err.is_panic() => {
                        session.abort_on_panic(format!("stream collector: {join_err}"));
                        return Ok(());
                    }
                    Err(join_err) => break Err(SnapError::Internal(join_err.to_string())),
                }
            }
        }
    };

    kill.cancel();
    if !task_done && tokio::time::timeout(STREAM_STOP_GRACE, &mut task).await.is_err() {
        task.abort();
    }
    tracing::debug!(parent: session.span(), "metric stream closed");
    result
}
