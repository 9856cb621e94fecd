//! Plugin process entry point.
//!
//! `start` parses the single argument, sets up logging, binds a loopback
//! listener, prints exactly one handshake line on stdout, then serves until
//! the session terminates. Any failure before the handshake is reported as a
//! failure handshake instead.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::time::Duration;
use tokio_rustls::TlsAcceptor;
use tracing::Instrument;

use snapline_core::error::{Result, SnapError};
use snapline_core::meta::{Arg, HandshakeState, PluginMeta, Response};
use snapline_rpc::tls;

use crate::logging;
use crate::plugin::Capability;
use crate::session::{ExitReason, Session, SessionOptions};
use crate::transport;

const SERVER_DRAIN: Duration = Duration::from_secs(1);

fn emit(response: &Response) -> Result<()> {
    let line = response.to_line()?;
    let mut out = std::io::stdout().lock();
    writeln!(out, "{line}")?;
    out.flush()?;
    Ok(())
}

fn emit_failure(meta: &PluginMeta, message: &str) {
    let response = Response {
        meta: meta.clone(),
        listen_address: String::new(),
        token: String::new(),
        plugin_type: meta.plugin_type,
        state: HandshakeState::Failure,
        error_message: Some(message.to_string()),
        public_key: None,
    };
    if let Err(e) = emit(&response) {
        tracing::error!(error = %e, "failed to write failure handshake");
    }
}

struct Bound {
    session: Arc<Session>,
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
}

async fn bind(meta: PluginMeta, capability: Capability, arg: &Arg) -> Result<Bound> {
    let session = Session::new(meta, capability, SessionOptions::from_arg(arg))?;
    let acceptor = match &arg.tls {
        Some(desc) => tls::server_acceptor(desc)?,
        None => None,
    };
    let listener = TcpListener::bind(("127.0.0.1", arg.listen_port))
        .await
        .map_err(|e| SnapError::Transport(format!("bind 127.0.0.1:{} failed: {e}", arg.listen_port)))?;
    session.set_listen_address(listener.local_addr()?)?;
    Ok(Bound {
        session,
        listener,
        acceptor,
    })
}

/// Serve one session and return why it ended. Logging is the caller's job.
pub async fn run(meta: PluginMeta, capability: Capability, arg: Arg) -> ExitReason {
    let Bound {
        session,
        listener,
        acceptor,
    } = match bind(meta.clone(), capability, &arg).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(plugin = %meta.name, error = %e, "plugin failed to start");
            emit_failure(&meta, &e.to_string());
            return ExitReason::ServeFailed(e.to_string());
        }
    };

    let public_key = match session.public_key() {
        Ok(k) => k,
        Err(e) => {
            emit_failure(&meta, &e.to_string());
            return ExitReason::ServeFailed(e.to_string());
        }
    };
    let addr = session
        .listen_address()
        .map(|a| a.to_string())
        .unwrap_or_default();
    let response = Response {
        meta: session.meta().clone(),
        listen_address: addr.clone(),
        token: session.token().to_string(),
        plugin_type: session.meta().plugin_type,
        state: HandshakeState::Success,
        error_message: None,
        public_key,
    };
    if let Err(e) = emit(&response) {
        tracing::error!(error = %e, "failed to write handshake");
        return ExitReason::ServeFailed(e.to_string());
    }
    tracing::info!(
        parent: session.span(),
        listen = %addr,
        rpc = session.meta().rpc_type.as_str(),
        tls = acceptor.is_some(),
        "plugin listening"
    );

    let watchdog = arg.daemon.then(|| session.spawn_watchdog());
    let mut server = tokio::spawn({
        let session = session.clone();
        let span = session.span().clone();
        async move {
            if let Err(e) = transport::serve(session.clone(), listener, acceptor).await {
                tracing::error!(error = %e, "transport failed");
                session
                    .termination()
                    .terminate(ExitReason::ServeFailed(e.to_string()));
            }
        }
        .instrument(span)
    });

    let reason = session.termination().wait().await;
    tracing::info!(parent: session.span(), ?reason, "session terminated");

    if tokio::time::timeout(SERVER_DRAIN, &mut server).await.is_err() {
        server.abort();
    }
    if let Some(w) = watchdog {
        w.abort();
    }
    reason
}

/// Full plugin `main`: parse `argv[1]`, log to file, serve, exit.
///
/// ```no_run
/// # use snapline_plugin::{plugin::Capability, start::start};
/// # use snapline_core::meta::PluginMeta;
/// # async fn demo(meta: PluginMeta, capability: Capability) -> std::process::ExitCode {
/// start(meta, capability).await
/// # }
/// ```
pub async fn start(meta: PluginMeta, capability: Capability) -> ExitCode {
    let raw = std::env::args().nth(1).unwrap_or_else(|| "{}".to_string());
    let arg = match Arg::parse(&raw) {
        Ok(a) => a,
        Err(e) => {
            emit_failure(&meta, &e.to_string());
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = logging::init(&arg) {
        eprintln!("snapline plugin logging disabled: {e}");
    }
    logging::install_panic_hook();

    let reason = run(meta, capability, arg).await;
    ExitCode::from(u8::try_from(reason.exit_code()).unwrap_or(1))
}
