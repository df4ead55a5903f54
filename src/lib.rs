//! Proxy Scout - Proxy Intelligence Pipeline
//!
//! Discovers proxy endpoints (MTProto, SOCKS5, HTTP) announced in free-text
//! channel messages, validates them against the live network, and publishes
//! only the endpoints that demonstrably work, split into a latency tier and
//! a throughput tier.

pub mod config;
pub mod error;
pub mod proxy;
pub mod publish;
pub mod report;
pub mod scheduler;
pub mod source;
pub mod storage;

pub use proxy::*;

/// Application result type
pub type Result<T> = anyhow::Result<T>;
