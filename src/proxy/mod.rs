//! Proxy pipeline core
//!
//! This module provides the pipeline stages between raw message text and
//! publishable proxy lists:
//! - Extracting structured candidates from noisy free text
//! - Collapsing duplicate candidates by identity
//! - Probing candidates for connectivity, latency, and throughput
//! - Splitting the working set into realtime and streaming tiers

pub mod classifier;
pub mod dedup;
pub mod extractor;
pub mod models;
pub mod validator;

pub use classifier::classify;
pub use dedup::dedupe;
pub use extractor::{Extraction, ProxyExtractor};
pub use models::{
    ClassifiedProxies, ClassifiedProxy, ProbeStatus, ProxyCandidate, ProxyKey, ProxyKind, Tier,
    ValidatedProxy, ValidationResult,
};
pub use validator::{separate_working, ProxyValidator, ValidatorConfig};
