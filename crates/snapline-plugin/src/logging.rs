//! Plugin process logging.
//!
//! Stdout belongs to the handshake, so everything goes to a log file
//! (appended, never truncated). Level precedence: `Arg.log_level`, then
//! `RUST_LOG`, then `info`.

use std::backtrace::Backtrace;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

use snapline_core::error::{Result, SnapError};
use snapline_core::meta::{Arg, DEFAULT_LOG_PATH};

pub fn log_path(arg: &Arg) -> PathBuf {
    arg.log_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH))
}

fn filter(arg: &Arg) -> Result<EnvFilter> {
    match arg.log_level.as_deref() {
        Some(level) => EnvFilter::try_new(level)
            .map_err(|e| SnapError::Config(format!("invalid log level {level:?}: {e}"))),
        None => Ok(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}

/// Install the global subscriber. Fails if the file cannot be opened, the
/// level does not parse, or a subscriber is already installed.
pub fn init(arg: &Arg) -> Result<()> {
    let path = log_path(arg);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| SnapError::Config(format!("cannot open log file {}: {e}", path.display())))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter(arg)?)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| SnapError::Internal(format!("logging already initialized: {e}")))
}

/// Route panics through tracing (with a backtrace) before the default hook.
pub fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let backtrace = Backtrace::force_capture();
        tracing::error!(panic = %info, %backtrace, "panic in plugin process");
        previous(info);
    }));
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn default_log_path() {
        assert_eq!(log_path(&Arg::default()), PathBuf::from(DEFAULT_LOG_PATH));
    }

    #[test]
    fn bad_level_is_config_error() {
        let arg = Arg {
            log_level: Some("snapline=notalevel".into()),
            ..Arg::default()
        };
        let err = filter(&arg).expect_err("must fail");
        assert_eq!(err.code().as_str(), "CONFIG");
    }
}
