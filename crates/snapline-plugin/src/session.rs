//! Per-process plugin session.
//!
//! Lifecycle: negotiating (bound, handshake printed, no ping yet) -> alive
//! (pings within the window) -> failing (one or more missed windows) ->
//! terminated. Termination is a single one-shot signal; the heartbeat
//! watchdog, `Kill`, and the panic boundary all race to fire it and only the
//! first reason is kept.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::Span;

use snapline_core::cpolicy::ConfigPolicyTree;
use snapline_core::crypto::{Encrypter, KeyPair, DEFAULT_RSA_BITS};
use snapline_core::encoding::{Codec, Encoder};
use snapline_core::error::{Result, SnapError};
use snapline_core::meta::{Arg, PluginMeta, PluginType, RpcType};

use crate::plugin::Capability;

pub const DEFAULT_KILL_GRACE: Duration = Duration::from_secs(2);

/// Why the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Killed(String),
    HeartbeatLost { misses: u32 },
    PluginPanicked(String),
    ServeFailed(String),
}

impl ExitReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Killed(_) | ExitReason::HeartbeatLost { .. } => 0,
            ExitReason::ServeFailed(_) => 1,
            ExitReason::PluginPanicked(_) => 70,
        }
    }
}

/// One-shot termination signal.
#[derive(Clone, Default)]
pub struct Termination {
    reason: Arc<OnceLock<ExitReason>>,
    token: CancellationToken,
}

impl Termination {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire with `reason`. Returns `false` if it had already fired.
    pub fn terminate(&self, reason: ExitReason) -> bool {
        if self.reason.set(reason).is_err() {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.token.is_cancelled()
    }

    pub fn reason(&self) -> Option<ExitReason> {
        self.reason.get().cloned()
    }

    pub async fn wait(&self) -> ExitReason {
        self.token.cancelled().await;
        self.reason
            .get()
            .cloned()
            .unwrap_or_else(|| ExitReason::ServeFailed("terminated without reason".into()))
    }

    /// Token cancelled on termination; streams derive child tokens from it.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Negotiating,
    Alive,
    Failing,
    Terminated,
}

/// Tunables a session is created with.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub ping_timeout: Duration,
    pub miss_limit: u32,
    pub kill_grace: Duration,
    pub rsa_bits: usize,
    pub control_public_key: Option<String>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_arg(&Arg::default())
    }
}

impl SessionOptions {
    pub fn from_arg(arg: &Arg) -> Self {
        Self {
            ping_timeout: Duration::from_millis(arg.ping_timeout_ms),
            miss_limit: arg.ping_miss_limit,
            kill_grace: DEFAULT_KILL_GRACE,
            rsa_bits: DEFAULT_RSA_BITS,
            control_public_key: arg.control_public_key.clone(),
        }
    }
}

pub struct Session {
    meta: PluginMeta,
    capability: Capability,
    token: String,
    listen_address: OnceLock<SocketAddr>,
    last_ping: Mutex<Instant>,
    pinged: AtomicBool,
    misses: AtomicU32,
    opts: SessionOptions,
    encoder: Encoder,
    encrypter: Option<Arc<Encrypter>>,
    termination: Termination,
    span: Span,
}

fn new_token() -> String {
    let mut raw = [0u8; 32];
    OsRng.fill_bytes(&mut raw);
    URL_SAFE.encode(raw)
}

impl Session {
    pub fn new(meta: PluginMeta, capability: Capability, opts: SessionOptions) -> Result<Arc<Self>> {
        if meta.plugin_type != capability.plugin_type() {
            return Err(SnapError::Config(format!(
                "meta declares a {} plugin but the implementation is a {}",
                meta.plugin_type.as_str(),
                capability.plugin_type().as_str()
            )));
        }
        if meta.plugin_type == PluginType::StreamCollector && meta.rpc_type != RpcType::Proto {
            return Err(SnapError::Config(
                "stream collectors are only served over the proto transport".into(),
            ));
        }

        let mut encoder = Encoder::new(Codec::for_rpc(meta.rpc_type));
        let encrypter = if meta.unsecure {
            None
        } else {
            let pair = KeyPair::generate(opts.rsa_bits)?;
            let e = Arc::new(Encrypter::with_key_pair(pair));
            encoder.set_encrypter(e.clone());
            Some(e)
        };

        let token = new_token();
        let span = tracing::info_span!(
            "plugin_session",
            plugin = %meta.name,
            version = meta.version,
            token = %&token[..8],
        );

        Ok(Arc::new(Self {
            meta,
            capability,
            token,
            listen_address: OnceLock::new(),
            last_ping: Mutex::new(Instant::now()),
            pinged: AtomicBool::new(false),
            misses: AtomicU32::new(0),
            opts,
            encoder,
            encrypter,
            termination: Termination::new(),
            span,
        }))
    }

    pub fn meta(&self) -> &PluginMeta {
        &self.meta
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn encoder(&self) -> &Encoder {
        &self.encoder
    }

    pub fn termination(&self) -> &Termination {
        &self.termination
    }

    pub fn control_public_key(&self) -> Option<&str> {
        self.opts.control_public_key.as_deref()
    }

    /// Base64 DER public key for the handshake; `None` when unsecure.
    pub fn public_key(&self) -> Result<Option<String>> {
        match self.encrypter.as_ref().and_then(|e| e.key_pair()) {
            Some(pair) => Ok(Some(pair.public_key_b64()?)),
            None => Ok(None),
        }
    }

    pub fn set_listen_address(&self, addr: SocketAddr) -> Result<()> {
        self.listen_address
            .set(addr)
            .map_err(|_| SnapError::Internal("listen address already set".into()))
    }

    pub fn listen_address(&self) -> Option<SocketAddr> {
        self.listen_address.get().copied()
    }

    pub fn state(&self) -> SessionState {
        if self.termination.is_terminated() {
            SessionState::Terminated
        } else if self.misses.load(Ordering::SeqCst) > 0 {
            SessionState::Failing
        } else if self.pinged.load(Ordering::SeqCst) {
            SessionState::Alive
        } else {
            SessionState::Negotiating
        }
    }

    /// Reset the heartbeat window. Every proxied call does this.
    pub fn reset_heartbeat(&self) {
        let mut last = self.last_ping.lock().unwrap_or_else(|e| e.into_inner());
        *last = Instant::now();
        self.pinged.store(true, Ordering::SeqCst);
    }

    fn since_last_ping(&self) -> Duration {
        self.last_ping
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    pub fn ping(&self) {
        tracing::debug!(parent: &self.span, "ping received");
        self.reset_heartbeat();
    }

    /// Terminate after the grace delay so the in-flight reply can flush.
    pub fn kill(&self, reason: String) {
        tracing::info!(parent: &self.span, %reason, "kill requested");
        let termination = self.termination.clone();
        let grace = self.opts.kill_grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            termination.terminate(ExitReason::Killed(reason));
        });
    }

    /// Unwrap and install the session key. Allowed once.
    pub fn set_key(&self, encrypted_key: &[u8]) -> Result<()> {
        let e = self.encrypter.as_ref().ok_or_else(|| {
            SnapError::Protocol("plugin is unsecure; key exchange is disabled".into())
        })?;
        e.install_encrypted_key(encrypted_key)?;
        tracing::debug!(parent: &self.span, "session key installed");
        Ok(())
    }

    pub async fn config_policy(&self) -> Result<ConfigPolicyTree> {
        self.capability.config_policy().await
    }

    /// Abort path for a panic caught at a request boundary.
    pub fn abort_on_panic(&self, message: String) {
        tracing::error!(parent: &self.span, %message, "plugin panicked; terminating");
        self.termination
            .terminate(ExitReason::PluginPanicked(message));
    }

    /// Start the heartbeat watchdog. Every `ping_timeout` it checks the time
    /// since the last ping; each window without one is a miss, any ping resets
    /// the count, and `miss_limit` consecutive misses terminate the session.
    pub fn spawn_watchdog(self: &Arc<Self>) -> JoinHandle<()> {
        let session = Arc::clone(self);
        tokio::spawn(async move {
            let interval = session.opts.ping_timeout;
            let limit = session.opts.miss_limit;
            let stop = session.termination.token().clone();
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                if session.since_last_ping() > interval {
                    let misses = session.misses.fetch_add(1, Ordering::SeqCst) + 1;
                    tracing::warn!(parent: &session.span, misses, limit, "heartbeat missed");
                    if misses >= limit {
                        tracing::error!(parent: &session.span, misses, "heartbeat lost; terminating");
                        session
                            .termination
                            .terminate(ExitReason::HeartbeatLost { misses });
                        return;
                    }
                } else {
                    session.misses.store(0, Ordering::SeqCst);
                }
            }
        })
    }
}
