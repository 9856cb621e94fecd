//! snapline-plugin
//!
//! Plugin-side runtime: capability traits, the session state machine with its
//! heartbeat watchdog, request proxies, and the three transport servers.
//!
//! A plugin binary builds its [`PluginMeta`](snapline_core::meta::PluginMeta)
//! and a [`Capability`](plugin::Capability), then hands both to
//! [`start::start`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod logging;
pub mod plugin;
pub mod proxy;
pub mod session;
pub mod start;
pub mod transport;

pub use plugin::{Capability, Collector, Plugin, Processor, Publisher, StreamCollector};
pub use session::{ExitReason, Session, SessionOptions, Termination};
