//! snapline-control
//!
//! Control-side half of the plugin protocol: strict config, plugin launcher,
//! transport clients with key bootstrap, and the metric result cache.
//!
//! Installing a tracing subscriber is left to the embedding binary.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod cache;
pub mod client;
pub mod config;
pub mod launch;

pub use cache::{CachedCollector, MetricCache};
pub use client::{connect, ClientOptions, PluginHandle};
pub use launch::PluginExecutor;
