//! Publish boundary
//!
//! The pipeline hands a sink both classified tiers and gets back a handle.
//! What publishing means, pinning, editing, where the bytes go, is the
//! sink's own business.

use crate::proxy::ClassifiedProxies;
use crate::report;
use crate::Result;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Sink-specific identifier for one published report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PublishHandle(pub u64);

impl fmt::Display for PublishHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[async_trait]
pub trait PublishSink: Send + Sync {
    /// Publish both tiers, returning a handle to the published report
    async fn publish(&self, proxies: &ClassifiedProxies) -> Result<PublishHandle>;
}

/// Sink writing the rendered report to a file, replacing the previous one
pub struct FileSink {
    path: PathBuf,
    sequence: AtomicU64,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            sequence: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl PublishSink for FileSink {
    async fn publish(&self, proxies: &ClassifiedProxies) -> Result<PublishHandle> {
        let rendered = report::render_report(proxies);
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        tokio::fs::write(&self.path, rendered).await?;

        let handle = PublishHandle(self.sequence.fetch_add(1, Ordering::SeqCst) + 1);
        info!(
            path = %self.path.display(),
            handle = %handle,
            proxies = proxies.total(),
            "report published"
        );
        Ok(handle)
    }
}

/// Sink printing the rendered report to standard output
#[derive(Debug, Default)]
pub struct StdoutSink {
    sequence: AtomicU64,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PublishSink for StdoutSink {
    async fn publish(&self, proxies: &ClassifiedProxies) -> Result<PublishHandle> {
        println!("{}", report::render_report(proxies));
        Ok(PublishHandle(self.sequence.fetch_add(1, Ordering::SeqCst) + 1))
    }
}
