//! Data model for proxy candidates, probe outcomes and tier assignments

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Proxy protocol kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    Mtproto,
    Socks5,
    Http,
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Mtproto => write!(f, "mtproto"),
            ProxyKind::Socks5 => write!(f, "socks5"),
            ProxyKind::Http => write!(f, "http"),
        }
    }
}

impl FromStr for ProxyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mtproto" => Ok(ProxyKind::Mtproto),
            "socks5" => Ok(ProxyKind::Socks5),
            "http" => Ok(ProxyKind::Http),
            other => Err(format!("unknown proxy kind: {}", other)),
        }
    }
}

/// A structurally well-formed proxy endpoint extracted from message text.
///
/// Immutable once built; lives for a single pipeline cycle unless a store
/// persists it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyCandidate {
    pub kind: ProxyKind,
    pub host: String,
    pub port: u16,
    /// MTProto connection secret; required and non-empty for that kind
    pub secret: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Fragment the candidate was parsed from, kept for audit
    pub source_url: String,
}

impl ProxyCandidate {
    /// Create an MTProto candidate
    pub fn mtproto(host: impl Into<String>, port: u16, secret: impl Into<String>) -> Self {
        Self {
            kind: ProxyKind::Mtproto,
            host: host.into(),
            port,
            secret: Some(secret.into()),
            username: None,
            password: None,
            source_url: String::new(),
        }
    }

    /// Create a SOCKS5 candidate, optionally authenticated
    pub fn socks5(
        host: impl Into<String>,
        port: u16,
        username: Option<String>,
        password: Option<String>,
    ) -> Self {
        Self {
            kind: ProxyKind::Socks5,
            host: host.into(),
            port,
            secret: None,
            username,
            password,
            source_url: String::new(),
        }
    }

    /// Create a plain HTTP candidate
    pub fn http(host: impl Into<String>, port: u16) -> Self {
        Self {
            kind: ProxyKind::Http,
            host: host.into(),
            port,
            secret: None,
            username: None,
            password: None,
            source_url: String::new(),
        }
    }

    /// Attach the original fragment the candidate was parsed from
    pub fn with_source(mut self, source_url: impl Into<String>) -> Self {
        self.source_url = source_url.into();
        self
    }

    /// Identity key for deduplication
    pub fn key(&self) -> ProxyKey {
        let qualifier = match self.kind {
            ProxyKind::Mtproto => self.secret.clone(),
            ProxyKind::Socks5 => self.username.clone(),
            ProxyKind::Http => None,
        };
        ProxyKey {
            kind: self.kind,
            host: self.host.clone(),
            port: self.port,
            qualifier,
        }
    }

    /// The endpoint in `host:port` form
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Render the candidate as a shareable URL
    pub fn url(&self) -> String {
        match self.kind {
            ProxyKind::Mtproto => format!(
                "tg://proxy?server={}&port={}&secret={}",
                self.host,
                self.port,
                self.secret.as_deref().unwrap_or_default()
            ),
            ProxyKind::Socks5 => {
                let auth = match (&self.username, &self.password) {
                    (Some(user), Some(pass)) => format!("{}:{}@", user, pass),
                    (Some(user), None) => format!("{}@", user),
                    _ => String::new(),
                };
                format!("socks5://{}{}:{}", auth, self.host, self.port)
            }
            ProxyKind::Http => format!("http://{}:{}", self.host, self.port),
        }
    }
}

impl fmt::Display for ProxyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Identity of a candidate for deduplication purposes.
///
/// Two candidates sharing host and port but carrying different MTProto
/// secrets (or SOCKS5 usernames) point at distinct endpoints, so those
/// fields qualify the key for their kinds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyKey {
    kind: ProxyKind,
    host: String,
    port: u16,
    qualifier: Option<String>,
}

/// Reason code for a probe outcome
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProbeStatus {
    Working,
    /// No TCP connection to the endpoint itself succeeded
    ConnectFailed,
    /// Endpoint reachable, but none of the upstream relays were (MTProto)
    UpstreamUnreachable,
    /// Probing was cut short by the cycle deadline
    TimedOut,
    /// Unexpected failure left after transient-error retries
    Error(String),
}

/// Outcome of probing one candidate.
///
/// Produced once per candidate per validation pass and superseded, never
/// merged, by the next pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub status: ProbeStatus,
    /// Mean TCP round-trip in seconds; infinite when no sample succeeded
    pub latency: f64,
    /// Best observed download rate in bytes per second, 0 when unmeasured
    pub download_bps: f64,
    /// Best observed upload rate in bytes per second, 0 when unmeasured
    pub upload_bps: f64,
    pub measured_at: DateTime<Utc>,
}

impl ValidationResult {
    /// A successful probe. `latency` must be a real measurement.
    pub fn working(latency: f64) -> Self {
        debug_assert!(latency.is_finite());
        Self {
            status: ProbeStatus::Working,
            latency,
            download_bps: 0.0,
            upload_bps: 0.0,
            measured_at: Utc::now(),
        }
    }

    /// A failed probe with its reason code
    pub fn failed(status: ProbeStatus) -> Self {
        Self {
            status,
            latency: f64::INFINITY,
            download_bps: 0.0,
            upload_bps: 0.0,
            measured_at: Utc::now(),
        }
    }

    /// Attach throughput measurements
    pub fn with_throughput(mut self, download_bps: f64, upload_bps: f64) -> Self {
        self.download_bps = download_bps;
        self.upload_bps = upload_bps;
        self
    }

    pub fn is_working(&self) -> bool {
        self.status == ProbeStatus::Working
    }

    /// The larger of the two transfer rates, used for streaming ranking
    pub fn best_throughput(&self) -> f64 {
        self.download_bps.max(self.upload_bps)
    }

    /// Latency in whole milliseconds, when it was measured
    pub fn latency_ms(&self) -> Option<u64> {
        self.latency
            .is_finite()
            .then(|| (self.latency * 1000.0) as u64)
    }
}

/// A candidate paired with its probe outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedProxy {
    pub candidate: ProxyCandidate,
    pub result: ValidationResult,
}

impl ValidatedProxy {
    pub fn new(candidate: ProxyCandidate, result: ValidationResult) -> Self {
        Self { candidate, result }
    }

    pub fn is_working(&self) -> bool {
        self.result.is_working()
    }
}

/// Performance tier assigned by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Latency-optimized
    Realtime,
    /// Throughput-optimized
    Streaming,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tier::Realtime => write!(f, "realtime"),
            Tier::Streaming => write!(f, "streaming"),
        }
    }
}

/// A working candidate tagged with its tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedProxy {
    pub candidate: ProxyCandidate,
    pub result: ValidationResult,
    pub tier: Tier,
}

/// Classifier output: both tiers, disjoint, covering the whole working set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedProxies {
    pub realtime: Vec<ClassifiedProxy>,
    pub streaming: Vec<ClassifiedProxy>,
}

impl ClassifiedProxies {
    pub fn total(&self) -> usize {
        self.realtime.len() + self.streaming.len()
    }

    pub fn is_empty(&self) -> bool {
        self.realtime.is_empty() && self.streaming.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mtproto_candidate_creation() {
        let candidate = ProxyCandidate::mtproto("1.2.3.4", 443, "abcdef");
        assert_eq!(candidate.kind, ProxyKind::Mtproto);
        assert_eq!(candidate.host, "1.2.3.4");
        assert_eq!(candidate.port, 443);
        assert_eq!(candidate.secret.as_deref(), Some("abcdef"));
        assert!(candidate.username.is_none());
    }

    #[test]
    fn test_socks5_candidate_with_auth() {
        let candidate = ProxyCandidate::socks5(
            "proxy.example.com",
            1080,
            Some("user".to_string()),
            Some("pass".to_string()),
        );
        assert_eq!(candidate.kind, ProxyKind::Socks5);
        assert_eq!(candidate.username.as_deref(), Some("user"));
        assert_eq!(candidate.password.as_deref(), Some("pass"));
    }

    #[test]
    fn test_candidate_url_rendering() {
        let mtproto = ProxyCandidate::mtproto("1.2.3.4", 443, "abc123");
        assert_eq!(
            mtproto.url(),
            "tg://proxy?server=1.2.3.4&port=443&secret=abc123"
        );

        let socks = ProxyCandidate::socks5(
            "10.0.0.1",
            1080,
            Some("u".to_string()),
            Some("p".to_string()),
        );
        assert_eq!(socks.url(), "socks5://u:p@10.0.0.1:1080");

        let http = ProxyCandidate::http("10.0.0.2", 8080);
        assert_eq!(http.url(), "http://10.0.0.2:8080");
    }

    #[test]
    fn test_key_distinguishes_mtproto_secrets() {
        let a = ProxyCandidate::mtproto("1.2.3.4", 443, "aaaa");
        let b = ProxyCandidate::mtproto("1.2.3.4", 443, "bbbb");
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_key_distinguishes_socks5_usernames() {
        let a = ProxyCandidate::socks5("1.2.3.4", 1080, Some("alice".to_string()), None);
        let b = ProxyCandidate::socks5("1.2.3.4", 1080, Some("bob".to_string()), None);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_key_ignores_source_url() {
        let a = ProxyCandidate::http("1.2.3.4", 8080).with_source("first message");
        let b = ProxyCandidate::http("1.2.3.4", 8080).with_source("second message");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_key_distinguishes_kinds() {
        let a = ProxyCandidate::http("1.2.3.4", 1080);
        let b = ProxyCandidate::socks5("1.2.3.4", 1080, None, None);
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_validation_result_working() {
        let result = ValidationResult::working(0.125);
        assert!(result.is_working());
        assert_eq!(result.latency_ms(), Some(125));
    }

    #[test]
    fn test_validation_result_failed_has_infinite_latency() {
        let result = ValidationResult::failed(ProbeStatus::ConnectFailed);
        assert!(!result.is_working());
        assert!(result.latency.is_infinite());
        assert_eq!(result.latency_ms(), None);
        assert_eq!(result.best_throughput(), 0.0);
    }

    #[test]
    fn test_validation_result_throughput() {
        let result = ValidationResult::working(0.05).with_throughput(2048.0, 4096.0);
        assert_eq!(result.best_throughput(), 4096.0);
    }

    #[test]
    fn test_proxy_kind_round_trip() {
        for kind in [ProxyKind::Mtproto, ProxyKind::Socks5, ProxyKind::Http] {
            assert_eq!(kind.to_string().parse::<ProxyKind>().unwrap(), kind);
        }
        assert!("ftp".parse::<ProxyKind>().is_err());
    }

    #[test]
    fn test_classified_proxies_totals() {
        let empty = ClassifiedProxies::default();
        assert!(empty.is_empty());
        assert_eq!(empty.total(), 0);
    }
}
