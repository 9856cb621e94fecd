//! Proxies: wire calls -> session / plugin capability calls.
//!
//! Every proxied call resets the heartbeat, logs the call, invokes the plugin,
//! and wraps plugin failures with the method name
//! (`CollectMetrics call error: ...`). Transports decode the request before
//! calling in and encode whatever comes back.
//!
//! Panics in plugin code are caught by [`guard`], the single per-request
//! boundary. It logs, terminates the session with
//! [`ExitReason::PluginPanicked`](crate::session::ExitReason), and tells the
//! transport to drop the connection without replying.

pub mod encoded;

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use snapline_core::config::ConfigTable;
use snapline_core::cpolicy::ConfigPolicyTree;
use snapline_core::error::{Result, SnapError};
use snapline_core::metric::Metric;

use crate::plugin::Capability;
use crate::session::Session;

/// Result of one guarded request.
pub enum Outcome<T> {
    Done(Result<T>),
    /// Plugin code panicked; the session is terminating.
    Panicked,
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Run one request behind the panic boundary.
pub async fn guard<T, F>(session: &Session, fut: F) -> Outcome<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(res) => Outcome::Done(res),
        Err(payload) => {
            session.abort_on_panic(panic_message(payload.as_ref()));
            Outcome::Panicked
        }
    }
}

fn unsupported(method: &str, session: &Session) -> SnapError {
    SnapError::Protocol(format!(
        "{method} is not served by a {} plugin",
        session.meta().plugin_type.as_str()
    ))
}

/// Typed proxy surface shared by all transports.
#[derive(Clone)]
pub struct Proxy {
    session: Arc<Session>,
}

impl Proxy {
    pub fn new(session: Arc<Session>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn ping(&self) {
        self.session.ping();
    }

    pub fn kill(&self, reason: String) {
        self.session.reset_heartbeat();
        self.session.kill(reason);
    }

    pub fn set_key(&self, encrypted_key: &[u8]) -> Result<()> {
        self.session.reset_heartbeat();
        self.session.set_key(encrypted_key)
    }

    pub async fn config_policy(&self) -> Result<ConfigPolicyTree> {
        tracing::debug!(parent: self.session.span(), "GetConfigPolicy called");
        self.session.reset_heartbeat();
        self.session
            .config_policy()
            .await
            .map_err(|e| SnapError::plugin_call("GetConfigPolicy", e))
    }

    pub async fn collect_metrics(&self, requested: Vec<Metric>) -> Result<Vec<Metric>> {
        tracing::debug!(parent: self.session.span(), count = requested.len(), "CollectMetrics called");
        self.session.reset_heartbeat();
        match self.session.capability() {
            Capability::Collector(c) => c
                .collect_metrics(requested)
                .await
                .map_err(|e| SnapError::plugin_call("CollectMetrics", e)),
            _ => Err(unsupported("CollectMetrics", &self.session)),
        }
    }

    pub async fn get_metric_types(&self, config: ConfigTable) -> Result<Vec<Metric>> {
        tracing::debug!(parent: self.session.span(), "GetMetricTypes called");
        self.session.reset_heartbeat();
        let res = match self.session.capability() {
            Capability::Collector(c) => c.get_metric_types(config).await,
            Capability::StreamCollector(c) => c.get_metric_types(config).await,
            _ => return Err(unsupported("GetMetricTypes", &self.session)),
        };
        res.map_err(|e| SnapError::plugin_call("GetMetricTypes", e))
    }

    pub async fn process(
        &self,
        content_type: String,
        content: Vec<u8>,
        config: ConfigTable,
    ) -> Result<(String, Vec<u8>)> {
        tracing::debug!(parent: self.session.span(), %content_type, "Process called");
        self.session.reset_heartbeat();
        match self.session.capability() {
            Capability::Processor(p) => p
                .process(content_type, content, config)
                .await
                .map_err(|e| SnapError::plugin_call("Process", e)),
            _ => Err(unsupported("Process", &self.session)),
        }
    }

    pub async fn publish(
        &self,
        content_type: String,
        content: Vec<u8>,
        config: ConfigTable,
    ) -> Result<()> {
        tracing::debug!(parent: self.session.span(), %content_type, "Publish called");
        self.session.reset_heartbeat();
        match self.session.capability() {
            Capability::Publisher(p) => p
                .publish(content_type, content, config)
                .await
                .map_err(|e| SnapError::plugin_call("Publish", e)),
            _ => Err(unsupported("Publish", &self.session)),
        }
    }
}
