//! Native binary RPC server.

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tracing::Instrument;

use snapline_core::error::{Result, SnapError};
use snapline_rpc::frame;
use snapline_rpc::native::{self, Reply, Request};

use crate::proxy::{encoded, guard, Outcome, Proxy};
use crate::session::Session;

pub async fn serve(session: Arc<Session>, listener: TcpListener) -> Result<()> {
    let stop = session.termination().token().clone();
    let proxy = Proxy::new(session.clone());
    loop {
        let accepted = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            a = listener.accept() => a,
        };
        let (tcp, peer) =
            accepted.map_err(|e| SnapError::Transport(format!("accept failed: {e}")))?;
        tracing::debug!(parent: session.span(), %peer, "native connection accepted");
        let proxy = proxy.clone();
        let span = session.span().clone();
        tokio::spawn(
            async move {
                if let Err(e) = handle_conn(proxy, tcp).await {
                    tracing::debug!(error = %e, "native connection closed with error");
                }
            }
            .instrument(span),
        );
    }
}

async fn handle_conn(proxy: Proxy, tcp: TcpStream) -> Result<()> {
    let _ = tcp.set_nodelay(true);
    let mut stream = frame::framed(tcp);
    let stop = proxy.session().termination().token().clone();
    loop {
        let next = tokio::select! {
            _ = stop.cancelled() => return Ok(()),
            n = frame::recv(&mut stream) => n?,
        };
        let Some(bytes) = next else {
            return Ok(());
        };
        // Malformed requests get an error reply; the connection stays up.
        let req: Request = match native::from_bytes(&bytes) {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!(error = %e, "malformed native request");
                let reply = native::to_bytes(&Reply::err(0, e.to_string()))?;
                frame::send(&mut stream, reply).await?;
                continue;
            }
        };
        let session = proxy.session().clone();
        let reply = match guard(&session, encoded::dispatch(&proxy, &req.method, &req.body)).await
        {
            Outcome::Done(Ok(body)) => Reply::ok(req.id, body),
            Outcome::Done(Err(e)) => {
                tracing::debug!(method = %req.method, error = %e, "call failed");
                Reply::err(req.id, e.to_string())
            }
            Outcome::Panicked => return Ok(()),
        };
        frame::send(&mut stream, native::to_bytes(&reply)?).await?;
    }
}
