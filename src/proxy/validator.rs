//! Batched concurrent probing of proxy candidates
//!
//! Candidates are probed in fixed-size batches. Within a batch every
//! candidate is measured concurrently and in isolation; a batch is fully
//! collected before the next one starts, with a short pause in between so
//! target hosts and local descriptor limits are not overwhelmed.

use crate::proxy::models::{
    ProbeStatus, ProxyCandidate, ProxyKind, ValidatedProxy, ValidationResult,
};
use crate::Result;
use anyhow::bail;
use futures::stream::{self, StreamExt};
use reqwest::{Client, Proxy as ReqwestProxy};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

/// Default timeout for each network probe in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// Default number of ping samples per candidate
const DEFAULT_PING_COUNT: u32 = 5;

/// Default delay between ping samples in milliseconds
const DEFAULT_PING_DELAY_MS: u64 = 200;

/// Default number of candidates probed concurrently in one batch
const DEFAULT_BATCH_SIZE: usize = 50;

/// Default pause between batches in seconds
const DEFAULT_BATCH_DELAY_SECS: u64 = 1;

/// Default retry count for transient errors and throughput probes
const DEFAULT_RETRY_COUNT: u32 = 2;

/// Default delay between transient-error retries in milliseconds
const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Telegram data-center addresses an MTProto proxy must be able to reach
const TELEGRAM_RELAYS: [&str; 2] = ["149.154.175.53:443", "149.154.167.51:443"];

/// Byte caps for throughput probes, smallest first
const THROUGHPUT_TEST_SIZES: [usize; 3] = [512 * 1024, 1024 * 1024, 2 * 1024 * 1024];

/// Endpoints serving range-capped download payloads
const DOWNLOAD_TEST_URLS: [&str; 3] = [
    "https://speed.cloudflare.com/__down",
    "https://speed.hetzner.de/1MB.bin",
    "https://speedtest.tele2.net/1MB.zip",
];

/// Endpoint accepting upload probes
const UPLOAD_TEST_URL: &str = "https://httpbin.org/post";

/// Configuration for the proxy validator
#[derive(Debug, Clone)]
pub struct ValidatorConfig {
    /// Timeout for each individual network probe
    pub timeout: Duration,
    /// Number of ping samples averaged per candidate
    pub ping_count: u32,
    /// Delay between ping samples
    pub ping_delay: Duration,
    /// Number of candidates probed concurrently in one batch
    pub batch_size: usize,
    /// Pause between batches
    pub batch_delay: Duration,
    /// Retries for transient errors and unproductive throughput probes
    pub retry_count: u32,
    /// Delay between transient-error retries
    pub retry_delay: Duration,
    /// Whether to run download/upload probes for HTTP and SOCKS5 candidates
    pub measure_throughput: bool,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            ping_count: DEFAULT_PING_COUNT,
            ping_delay: Duration::from_millis(DEFAULT_PING_DELAY_MS),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_secs(DEFAULT_BATCH_DELAY_SECS),
            retry_count: DEFAULT_RETRY_COUNT,
            retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            measure_throughput: true,
        }
    }
}

impl ValidatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ping_count(mut self, ping_count: u32) -> Self {
        self.ping_count = ping_count;
        self
    }

    pub fn with_ping_delay(mut self, ping_delay: Duration) -> Self {
        self.ping_delay = ping_delay;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_batch_delay(mut self, batch_delay: Duration) -> Self {
        self.batch_delay = batch_delay;
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = retry_count;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn with_measure_throughput(mut self, measure_throughput: bool) -> Self {
        self.measure_throughput = measure_throughput;
        self
    }
}

/// Proxy validator measuring connectivity, latency, and throughput
#[derive(Clone)]
pub struct ProxyValidator {
    config: ValidatorConfig,
}

impl ProxyValidator {
    /// Create a new validator with default configuration
    pub fn new() -> Self {
        Self {
            config: ValidatorConfig::default(),
        }
    }

    /// Create a new validator with custom configuration
    pub fn with_config(config: ValidatorConfig) -> Self {
        Self { config }
    }

    /// Validate all candidates; every candidate gets a result, failures
    /// included.
    pub async fn validate(&self, candidates: &[ProxyCandidate]) -> Vec<ValidatedProxy> {
        self.validate_until(candidates, None).await
    }

    /// Validate with an optional deadline. Candidates whose batch never ran
    /// or whose probe was cut short are recorded as timed out; results from
    /// completed batches are kept. Once the deadline has passed the
    /// remaining batches are drained without the inter-batch pause.
    pub async fn validate_until(
        &self,
        candidates: &[ProxyCandidate],
        deadline: Option<Instant>,
    ) -> Vec<ValidatedProxy> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let batch_size = self.config.batch_size.max(1);
        let mut results = Vec::with_capacity(candidates.len());

        for (index, batch) in candidates.chunks(batch_size).enumerate() {
            let expired = deadline.map_or(false, |deadline| Instant::now() >= deadline);
            if expired {
                results.extend(batch.iter().map(|candidate| {
                    ValidatedProxy::new(
                        candidate.clone(),
                        ValidationResult::failed(ProbeStatus::TimedOut),
                    )
                }));
                continue;
            }

            if index > 0 {
                sleep(self.config.batch_delay).await;
            }

            let batch_results = stream::iter(batch.iter().cloned())
                .map(|candidate| self.probe_candidate(candidate, deadline))
                .buffer_unordered(batch_size)
                .collect::<Vec<_>>()
                .await;

            debug!(
                batch = index + 1,
                probed = batch_results.len(),
                "batch complete"
            );
            results.extend(batch_results);
        }

        let working = results.iter().filter(|r| r.is_working()).count();
        info!(total = results.len(), working, "validation pass finished");
        results
    }

    /// Probe one candidate, bounded by the cycle deadline when present
    async fn probe_candidate(
        &self,
        candidate: ProxyCandidate,
        deadline: Option<Instant>,
    ) -> ValidatedProxy {
        let result = match deadline {
            Some(deadline) => match timeout_at(deadline, self.probe_with_retry(&candidate)).await {
                Ok(result) => result,
                Err(_) => ValidationResult::failed(ProbeStatus::TimedOut),
            },
            None => self.probe_with_retry(&candidate).await,
        };
        ValidatedProxy::new(candidate, result)
    }

    /// Probe with transient-error retries. Expected network failures come
    /// back as reason codes; only unexpected failures are retried, then
    /// recorded as errors rather than propagated.
    async fn probe_with_retry(&self, candidate: &ProxyCandidate) -> ValidationResult {
        let mut attempt = 0;
        loop {
            match self.probe_once(candidate).await {
                Ok(result) => return result,
                Err(err) if attempt < self.config.retry_count => {
                    attempt += 1;
                    warn!(
                        endpoint = %candidate.endpoint(),
                        attempt,
                        error = %err,
                        "transient probe error, retrying"
                    );
                    sleep(self.config.retry_delay).await;
                }
                Err(err) => return ValidationResult::failed(ProbeStatus::Error(err.to_string())),
            }
        }
    }

    async fn probe_once(&self, candidate: &ProxyCandidate) -> Result<ValidationResult> {
        let latency = match self.measure_latency(candidate).await {
            Some(latency) => latency,
            None => return Ok(ValidationResult::failed(ProbeStatus::ConnectFailed)),
        };

        // An MTProto proxy is only useful when the data centers behind it
        // are reachable; throughput is not measurable over bare HTTP there.
        if candidate.kind == ProxyKind::Mtproto {
            if !self.check_upstream_reachable().await {
                return Ok(ValidationResult::failed(ProbeStatus::UpstreamUnreachable));
            }
            return Ok(ValidationResult::working(latency));
        }

        let mut result = ValidationResult::working(latency);
        if self.config.measure_throughput {
            let (download, upload) = self.measure_throughput(candidate).await?;
            result = result.with_throughput(download, upload);
        }
        Ok(result)
    }

    /// Average TCP round-trip over several samples. The first connect
    /// gates the rest: when it fails the endpoint is unreachable and no
    /// further samples are taken. A later failed probe contributes no
    /// sample rather than an infinite one.
    async fn measure_latency(&self, candidate: &ProxyCandidate) -> Option<f64> {
        let first = self.ping_once(&candidate.host, candidate.port).await?;
        let mut samples = vec![first];
        for _ in 1..self.config.ping_count {
            sleep(self.config.ping_delay).await;
            if let Some(rtt) = self.ping_once(&candidate.host, candidate.port).await {
                samples.push(rtt);
            }
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    /// One TCP connect returning the round-trip in seconds
    async fn ping_once(&self, host: &str, port: u16) -> Option<f64> {
        let start = Instant::now();
        match timeout(self.config.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_stream)) => Some(start.elapsed().as_secs_f64()),
            _ => None,
        }
    }

    /// Any single relay success passes
    async fn check_upstream_reachable(&self) -> bool {
        for relay in TELEGRAM_RELAYS {
            let reachable = timeout(self.config.timeout, TcpStream::connect(relay))
                .await
                .map_or(false, |result| result.is_ok());
            if reachable {
                return true;
            }
        }
        false
    }

    /// Download and upload probes through the candidate, best rate observed
    /// across sizes and endpoints. Each size gets one attempt plus the
    /// configured retries; the first productive attempt wins and an
    /// unproductive size contributes nothing.
    async fn measure_throughput(&self, candidate: &ProxyCandidate) -> Result<(f64, f64)> {
        let client = self.proxy_client(candidate)?;
        let mut download = 0.0f64;
        let mut upload = 0.0f64;

        for size in THROUGHPUT_TEST_SIZES {
            for _ in 0..=self.config.retry_count {
                let speed = self.measure_download(&client, size).await;
                if speed > 0.0 {
                    download = download.max(speed);
                    break;
                }
            }
            for _ in 0..=self.config.retry_count {
                let speed = self.measure_upload(&client, size).await;
                if speed > 0.0 {
                    upload = upload.max(speed);
                    break;
                }
            }
        }

        Ok((download, upload))
    }

    /// Range-capped download, streamed byte counting, bytes per second or 0.0
    async fn measure_download(&self, client: &Client, size: usize) -> f64 {
        let mut best = 0.0f64;
        for endpoint in DOWNLOAD_TEST_URLS {
            let start = Instant::now();
            let range = format!("bytes=0-{}", size - 1);
            let mut response = match client
                .get(endpoint)
                .header(reqwest::header::RANGE, range)
                .send()
                .await
            {
                Ok(response) if response.status().is_success() => response,
                _ => continue,
            };

            let mut received = 0usize;
            loop {
                match response.chunk().await {
                    Ok(Some(chunk)) => {
                        received += chunk.len();
                        if received >= size {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(_) => {
                        received = 0;
                        break;
                    }
                }
            }

            let elapsed = start.elapsed().as_secs_f64();
            if received > 0 && elapsed > 0.0 {
                best = best.max(received as f64 / elapsed);
            }
        }
        best
    }

    /// Fixed-size payload POST, bytes per second or 0.0
    async fn measure_upload(&self, client: &Client, size: usize) -> f64 {
        let payload = vec![b'0'; size];
        let start = Instant::now();
        match client.post(UPLOAD_TEST_URL).body(payload).send().await {
            Ok(response) if response.status().is_success() => {
                let elapsed = start.elapsed().as_secs_f64();
                if elapsed > 0.0 {
                    size as f64 / elapsed
                } else {
                    0.0
                }
            }
            _ => 0.0,
        }
    }

    /// Build a reqwest client routed through the candidate
    fn proxy_client(&self, candidate: &ProxyCandidate) -> Result<Client> {
        // The test endpoints are all https, so the rule must match every
        // request scheme or the measurements bypass the candidate entirely.
        let proxy = match candidate.kind {
            ProxyKind::Http | ProxyKind::Socks5 => ReqwestProxy::all(&candidate.url())?,
            ProxyKind::Mtproto => bail!("throughput probing does not support mtproto"),
        };

        let client = Client::builder()
            .proxy(proxy)
            .timeout(self.config.timeout)
            .build()?;

        Ok(client)
    }
}

impl Default for ProxyValidator {
    fn default() -> Self {
        Self::new()
    }
}

/// Split validation output into working and failed sets
pub fn separate_working(results: Vec<ValidatedProxy>) -> (Vec<ValidatedProxy>, Vec<ValidatedProxy>) {
    results.into_iter().partition(|result| result.is_working())
}
