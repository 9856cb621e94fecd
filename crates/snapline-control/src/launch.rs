//! Plugin subprocess launcher.
//!
//! The plugin gets its JSON [`Arg`] as the only positional argument and
//! answers with exactly one handshake line on stdout. Stderr is forwarded
//! into the control log for the lifetime of the child.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use snapline_core::error::{Result, SnapError};
use snapline_core::meta::{Arg, HandshakeState, Response};

use crate::client::PluginHandle;

pub struct PluginExecutor {
    path: PathBuf,
    child: Child,
    stdout: Option<BufReader<ChildStdout>>,
}

impl PluginExecutor {
    pub fn spawn(path: impl AsRef<Path>, arg: &Arg) -> Result<Self> {
        Self::spawn_with_env(path, arg, std::iter::empty::<(String, String)>())
    }

    /// Like [`spawn`](Self::spawn) with extra environment variables.
    pub fn spawn_with_env<I, K, V>(path: impl AsRef<Path>, arg: &Arg, envs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<std::ffi::OsStr>,
        V: AsRef<std::ffi::OsStr>,
    {
        let path = path.as_ref().to_path_buf();
        let mut child = Command::new(&path)
            .arg(arg.to_json()?)
            .envs(envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SnapError::Transport(format!("spawn {}: {e}", path.display())))?;

        if let Some(stderr) = child.stderr.take() {
            let name = path.display().to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(plugin = %name, %line, "plugin stderr");
                }
            });
        }
        let stdout = child.stdout.take().map(BufReader::new);
        tracing::debug!(plugin = %path.display(), pid = child.id(), "plugin launched");
        Ok(Self {
            path,
            child,
            stdout,
        })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    /// Read the handshake line. On timeout the child is killed.
    pub async fn wait_for_handshake(&mut self, timeout: Duration) -> Result<Response> {
        let stdout = self
            .stdout
            .as_mut()
            .ok_or_else(|| SnapError::Protocol("handshake already read".into()))?;
        let mut line = String::new();
        let read = match tokio::time::timeout(timeout, stdout.read_line(&mut line)).await {
            Ok(r) => r?,
            Err(_) => {
                let _ = self.child.kill().await;
                return Err(SnapError::Timeout(format!(
                    "{} did not complete its handshake within {} ms",
                    self.path.display(),
                    timeout.as_millis()
                )));
            }
        };
        self.stdout = None;
        if read == 0 {
            let status = self.child.wait().await?;
            return Err(SnapError::Protocol(format!(
                "{} exited before its handshake ({status})",
                self.path.display()
            )));
        }

        let response = Response::from_line(&line)?;
        if response.state == HandshakeState::Failure {
            return Err(SnapError::plugin_call(
                "Handshake",
                response
                    .error_message
                    .as_deref()
                    .unwrap_or("plugin reported failure"),
            ));
        }
        tracing::info!(
            plugin = %response.meta.name,
            version = response.meta.version,
            listen = %response.listen_address,
            "plugin handshake complete"
        );
        Ok(response)
    }

    pub async fn kill(&mut self) -> Result<()> {
        self.child.kill().await?;
        Ok(())
    }

    pub async fn wait(&mut self) -> Result<ExitStatus> {
        Ok(self.child.wait().await?)
    }

    /// Wait up to `timeout` for the child to exit on its own.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> Result<ExitStatus> {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(status) => Ok(status?),
            Err(_) => Err(SnapError::Timeout(format!(
                "{} still running after {} ms",
                self.path.display(),
                timeout.as_millis()
            ))),
        }
    }
}

/// Ping `plugin` every `interval` until `stop` is cancelled. Failures are
/// logged; the plugin's own watchdog decides when it is gone.
pub fn keepalive(plugin: PluginHandle, interval: Duration, stop: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            if let Err(e) = plugin.ping().await {
                tracing::warn!(error = %e, "plugin ping failed");
            }
        }
    })
}
