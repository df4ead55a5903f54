//! Candidate extraction from free-text message content
//!
//! Proxy declarations show up in the wild in three shapes:
//! - structured URLs (`tg://proxy?...`, `https://t.me/socks?...`)
//! - loose `server: ... port: ... secret: ...` key/value runs
//! - bare `host:port` fragments
//!
//! Every pattern family is tried on every fragment and all matches are kept.
//! Precision is the deduplicator's and the validator's job, so
//! over-generation here is acceptable; malformed matches are dropped and
//! counted, never raised.

use crate::proxy::models::{ProxyCandidate, ProxyKind};
use once_cell::sync::Lazy;
use percent_encoding::percent_decode_str;
use regex::Regex;
use tracing::{debug, trace};
use url::Url;

/// Structured MTProto links: `tg://proxy?...` and `t.me/proxy?...`
static MTPROTO_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:tg://proxy|https?://t\.me/proxy)\?[^\s<>"']+"#)
        .expect("Invalid MTProto URL regex")
});

/// Loose MTProto declarations: server, port and secret labels in one run
static MTPROTO_LABELED_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)(?:server|host)\s*:\s*([A-Za-z0-9.\-]+).{0,100}?\bport\s*:\s*(\d{1,5}).{0,160}?\bsecret\s*[:=]\s*([A-Za-z0-9+/=%_\-]+)",
    )
    .expect("Invalid labeled MTProto regex")
});

/// Loose MTProto declarations: `host:port` followed by a secret label
static MTPROTO_ENDPOINT_SECRET_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?is)\b([A-Za-z0-9][A-Za-z0-9\-]*(?:\.[A-Za-z0-9\-]+)+):(\d{1,5})\b.{0,80}?\bsecret\s*[:=]\s*([A-Za-z0-9+/=%_\-]+)",
    )
    .expect("Invalid endpoint MTProto regex")
});

/// Structured SOCKS5 links: `tg://socks?...` and `t.me/socks?...`
static SOCKS5_URL_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)(?:tg://socks|https?://t\.me/socks)\?[^\s<>"']+"#)
        .expect("Invalid SOCKS5 URL regex")
});

/// Loose SOCKS5 declarations: a socks label followed by `host:port`
static SOCKS5_ENDPOINT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bsocks5?\b[\s:/\-]*([A-Za-z0-9][A-Za-z0-9\-]*(?:\.[A-Za-z0-9\-]+)+):(\d{1,5})\b",
    )
    .expect("Invalid SOCKS5 endpoint regex")
});

/// Structured HTTP links: `tg://http?...`
static HTTP_URL_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"(?i)tg://http\?[^\s<>"']+"#).expect("Invalid HTTP URL regex"));

/// Loose HTTP declarations: an `http proxy` label followed by `host:port`
static HTTP_LABELED_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\bhttps?\s+proxy\b[\s:\-]*([A-Za-z0-9][A-Za-z0-9\-]*(?:\.[A-Za-z0-9\-]+)+):(\d{1,5})\b",
    )
    .expect("Invalid labeled HTTP regex")
});

/// Bare `host:port` fallback, dotted hosts only, defaulting to HTTP
static BARE_ENDPOINT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b([A-Za-z0-9][A-Za-z0-9\-]*(?:\.[A-Za-z0-9\-]+)+):(\d{1,5})\b")
        .expect("Invalid bare endpoint regex")
});

/// Outcome of scanning one message worth of content
#[derive(Debug, Clone, Default)]
pub struct Extraction {
    /// Candidates that survived form validation
    pub candidates: Vec<ProxyCandidate>,
    /// Raw pattern matches across all families
    pub found: usize,
    /// Matches dropped by form validation
    pub rejected: usize,
}

impl Extraction {
    fn record(&mut self, candidate: Option<ProxyCandidate>) {
        self.found += 1;
        match candidate {
            Some(candidate) if is_well_formed(&candidate) => self.candidates.push(candidate),
            Some(candidate) => {
                trace!(candidate = %candidate, "dropping malformed candidate");
                self.rejected += 1;
            }
            None => self.rejected += 1,
        }
    }

    /// Fold another extraction into this one
    pub fn merge(&mut self, other: Extraction) {
        self.candidates.extend(other.candidates);
        self.found += other.found;
        self.rejected += other.rejected;
    }
}

/// Candidate extractor turning raw message content into proxy candidates
pub struct ProxyExtractor;

impl ProxyExtractor {
    /// Extract candidates from message text plus its hyperlink targets.
    ///
    /// Text and each href are searched independently and the results merged,
    /// since declarations appear both as literal text and as link targets.
    pub fn extract(text: &str, hrefs: &[String]) -> Extraction {
        let mut out = Self::extract_fragment(text);
        for href in hrefs {
            out.merge(Self::extract_fragment(href));
        }
        debug!(
            found = out.found,
            rejected = out.rejected,
            kept = out.candidates.len(),
            "extraction finished"
        );
        out
    }

    /// Run every pattern family over a single fragment
    fn extract_fragment(fragment: &str) -> Extraction {
        let text = normalize_entities(fragment);
        let mut out = Extraction::default();
        Self::collect_mtproto(&text, &mut out);
        Self::collect_socks5(&text, &mut out);
        Self::collect_http(&text, &mut out);
        out
    }

    fn collect_mtproto(text: &str, out: &mut Extraction) {
        for m in MTPROTO_URL_REGEX.find_iter(text) {
            out.record(Self::parse_proxy_url(m.as_str(), ProxyKind::Mtproto));
        }
        for caps in MTPROTO_LABELED_REGEX.captures_iter(text) {
            let host = strip_port_artifact(&caps[1]);
            let secret = decode_secret(&caps[3]);
            let source = caps.get(0).map_or("", |m| m.as_str());
            out.record(
                parse_port(&caps[2])
                    .map(|port| ProxyCandidate::mtproto(host, port, secret).with_source(source)),
            );
        }
        for caps in MTPROTO_ENDPOINT_SECRET_REGEX.captures_iter(text) {
            let secret = decode_secret(&caps[3]);
            let source = caps.get(0).map_or("", |m| m.as_str());
            out.record(
                parse_port(&caps[2])
                    .map(|port| ProxyCandidate::mtproto(&caps[1], port, secret).with_source(source)),
            );
        }
    }

    fn collect_socks5(text: &str, out: &mut Extraction) {
        for m in SOCKS5_URL_REGEX.find_iter(text) {
            out.record(Self::parse_proxy_url(m.as_str(), ProxyKind::Socks5));
        }
        for caps in SOCKS5_ENDPOINT_REGEX.captures_iter(text) {
            let source = caps.get(0).map_or("", |m| m.as_str());
            out.record(parse_port(&caps[2]).map(|port| {
                ProxyCandidate::socks5(&caps[1], port, None, None).with_source(source)
            }));
        }
    }

    fn collect_http(text: &str, out: &mut Extraction) {
        for m in HTTP_URL_REGEX.find_iter(text) {
            out.record(Self::parse_proxy_url(m.as_str(), ProxyKind::Http));
        }
        for caps in HTTP_LABELED_REGEX.captures_iter(text) {
            let source = caps.get(0).map_or("", |m| m.as_str());
            out.record(
                parse_port(&caps[2])
                    .map(|port| ProxyCandidate::http(&caps[1], port).with_source(source)),
            );
        }
        for caps in BARE_ENDPOINT_REGEX.captures_iter(text) {
            let source = caps.get(0).map_or("", |m| m.as_str());
            out.record(
                parse_port(&caps[2])
                    .map(|port| ProxyCandidate::http(&caps[1], port).with_source(source)),
            );
        }
    }

    /// Parse a structured proxy URL by its query parameters.
    ///
    /// Extra parameters are tolerated; missing server or port makes the
    /// match a rejection.
    fn parse_proxy_url(raw: &str, kind: ProxyKind) -> Option<ProxyCandidate> {
        let raw = raw.trim_end_matches(&['.', ',', ';', ')', ']'][..]);
        let url = Url::parse(raw).ok()?;

        let mut server = None;
        let mut port = None;
        let mut secret = None;
        let mut user = None;
        let mut pass = None;
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "server" => server = Some(value.into_owned()),
                "port" => port = Some(value.into_owned()),
                "secret" => secret = Some(value.into_owned()),
                "user" => user = Some(value.into_owned()),
                "pass" => pass = Some(value.into_owned()),
                _ => {}
            }
        }

        let host = server.filter(|s| !s.is_empty())?;
        let port = parse_port(port.as_deref()?)?;
        let candidate = match kind {
            ProxyKind::Mtproto => {
                ProxyCandidate::mtproto(host, port, secret.unwrap_or_default())
            }
            ProxyKind::Socks5 => ProxyCandidate::socks5(host, port, user, pass),
            ProxyKind::Http => ProxyCandidate::http(host, port),
        };
        Some(candidate.with_source(raw))
    }
}

/// Message previews HTML-escape query separators; undo that before matching
fn normalize_entities(text: &str) -> String {
    text.replace("&amp;", "&")
}

/// Parse a port string, accepting only 1-65535
fn parse_port(raw: &str) -> Option<u16> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .filter(|port| (1..=65535).contains(port))
        .map(|port| port as u16)
}

/// Loose matching sometimes glues a literal `port` label onto the host
/// ("1.2.3.4port: 443"). Strip it only when the remainder still ends in a
/// digit or a dot, which keeps real domains like `proxy.transport` intact.
fn strip_port_artifact(host: &str) -> String {
    if let Some(stem) = host
        .strip_suffix("port")
        .or_else(|| host.strip_suffix("PORT"))
        .or_else(|| host.strip_suffix("Port"))
    {
        let glued = stem
            .chars()
            .last()
            .map_or(false, |c| c.is_ascii_digit() || c == '.');
        if glued {
            return stem.trim_end_matches('.').to_string();
        }
    }
    host.to_string()
}

/// Percent-decode a secret when decoding changes it. `+` is left alone so
/// base64-flavored secrets survive.
fn decode_secret(raw: &str) -> String {
    match percent_decode_str(raw).decode_utf8() {
        Ok(decoded) if decoded != raw => decoded.into_owned(),
        _ => raw.to_string(),
    }
}

/// Form-level validation; rejects are counted by the caller, never raised
fn is_well_formed(candidate: &ProxyCandidate) -> bool {
    let host = candidate.host.as_str();
    if host.is_empty() || host.chars().any(char::is_whitespace) || host.contains("..") {
        return false;
    }
    if candidate.port == 0 {
        return false;
    }
    if candidate.kind == ProxyKind::Mtproto
        && candidate.secret.as_deref().map_or(true, str::is_empty)
    {
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_mtproto_url() {
        let out = ProxyExtractor::extract("tg://proxy?server=1.2.3.4&port=443&secret=abc123", &[]);
        assert_eq!(out.candidates.len(), 1);
        let candidate = &out.candidates[0];
        assert_eq!(candidate.kind, ProxyKind::Mtproto);
        assert_eq!(candidate.host, "1.2.3.4");
        assert_eq!(candidate.port, 443);
        assert_eq!(candidate.secret.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_extract_tme_link_with_html_entities() {
        let text = r#"<a href="https://t.me/proxy?server=140.233.187.135&amp;port=343&amp;secret=eed77db43ee3721f">Connect</a>"#;
        let out = ProxyExtractor::extract(text, &[]);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].host, "140.233.187.135");
        assert_eq!(out.candidates[0].port, 343);
        assert_eq!(out.candidates[0].secret.as_deref(), Some("eed77db43ee3721f"));
    }

    #[test]
    fn test_extract_merges_hrefs() {
        let hrefs = vec![
            "https://t.me/proxy?server=91.107.180.22&port=27&secret=7gAAAAAAAAAAAAAAAAAAAABtZWRpYQ".to_string(),
        ];
        let out = ProxyExtractor::extract("fresh proxies below", &hrefs);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].host, "91.107.180.22");
    }

    #[test]
    fn test_extract_labeled_mtproto() {
        let text = "New MTProto!\nServer: 1.2.3.4\nPort: 443\nSecret: deadbeef";
        let out = ProxyExtractor::extract(text, &[]);
        assert_eq!(out.candidates.len(), 1);
        let candidate = &out.candidates[0];
        assert_eq!(candidate.kind, ProxyKind::Mtproto);
        assert_eq!(candidate.host, "1.2.3.4");
        assert_eq!(candidate.port, 443);
        assert_eq!(candidate.secret.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_extract_endpoint_secret_form() {
        let out = ProxyExtractor::extract("5.6.7.8:443 secret=deadbeef", &[]);
        let mtproto: Vec<_> = out
            .candidates
            .iter()
            .filter(|c| c.kind == ProxyKind::Mtproto)
            .collect();
        assert_eq!(mtproto.len(), 1);
        assert_eq!(mtproto[0].host, "5.6.7.8");
        assert_eq!(mtproto[0].secret.as_deref(), Some("deadbeef"));
    }

    #[test]
    fn test_extract_socks5_url_with_auth() {
        let out = ProxyExtractor::extract(
            "tg://socks?server=proxy.example.com&port=1080&user=admin&pass=secret",
            &[],
        );
        assert_eq!(out.candidates.len(), 1);
        let candidate = &out.candidates[0];
        assert_eq!(candidate.kind, ProxyKind::Socks5);
        assert_eq!(candidate.host, "proxy.example.com");
        assert_eq!(candidate.port, 1080);
        assert_eq!(candidate.username.as_deref(), Some("admin"));
        assert_eq!(candidate.password.as_deref(), Some("secret"));
    }

    #[test]
    fn test_extract_socks5_loose() {
        let out = ProxyExtractor::extract("SOCKS5: 10.0.0.1:1080", &[]);
        assert!(out
            .candidates
            .iter()
            .any(|c| c.kind == ProxyKind::Socks5 && c.host == "10.0.0.1" && c.port == 1080));
    }

    #[test]
    fn test_extract_http_url() {
        let out = ProxyExtractor::extract("tg://http?server=proxy.example.com&port=8080", &[]);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].kind, ProxyKind::Http);
        assert_eq!(out.candidates[0].host, "proxy.example.com");
        assert_eq!(out.candidates[0].port, 8080);
    }

    #[test]
    fn test_extract_bare_endpoint_defaults_http() {
        let out = ProxyExtractor::extract("fresh list: 10.0.0.1:3128", &[]);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].kind, ProxyKind::Http);
        assert_eq!(out.candidates[0].host, "10.0.0.1");
        assert_eq!(out.candidates[0].port, 3128);
    }

    #[test]
    fn test_reject_out_of_range_ports() {
        let zero = ProxyExtractor::extract("tg://proxy?server=1.2.3.4&port=0&secret=aa", &[]);
        assert!(zero.candidates.is_empty());
        assert_eq!(zero.rejected, 1);

        let high = ProxyExtractor::extract("tg://proxy?server=1.2.3.4&port=70000&secret=aa", &[]);
        assert!(high.candidates.is_empty());
        assert_eq!(high.rejected, 1);
    }

    #[test]
    fn test_reject_mtproto_without_secret() {
        let out = ProxyExtractor::extract("tg://proxy?server=1.2.3.4&port=443", &[]);
        assert!(out.candidates.is_empty());
        assert_eq!(out.rejected, 1);
    }

    #[test]
    fn test_reject_malformed_hosts() {
        let double_dot =
            ProxyExtractor::extract("tg://proxy?server=invalid..domain&port=443&secret=aa", &[]);
        assert!(double_dot.candidates.is_empty());

        let spaced =
            ProxyExtractor::extract("tg://proxy?server=bad%20host&port=443&secret=aa", &[]);
        assert!(spaced.candidates.is_empty());
    }

    #[test]
    fn test_extra_query_params_tolerated() {
        let out = ProxyExtractor::extract(
            "tg://proxy?server=1.1.1.1&port=443&secret=abc123&extra=value",
            &[],
        );
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].secret.as_deref(), Some("abc123"));
    }

    #[test]
    fn test_strip_port_artifact() {
        assert_eq!(strip_port_artifact("1.2.3.4port"), "1.2.3.4");
        assert_eq!(strip_port_artifact("1.2.3.4.port"), "1.2.3.4");
        assert_eq!(strip_port_artifact("proxy.transport"), "proxy.transport");
        assert_eq!(strip_port_artifact("1.2.3.4"), "1.2.3.4");
    }

    #[test]
    fn test_secret_percent_decoding() {
        assert_eq!(decode_secret("ee%2Fab"), "ee/ab");
        assert_eq!(decode_secret("ab+cd"), "ab+cd");
        assert_eq!(decode_secret("deadbeef"), "deadbeef");
    }

    #[test]
    fn test_plain_text_yields_nothing() {
        let out = ProxyExtractor::extract("no proxies here, just words", &[]);
        assert!(out.candidates.is_empty());
        assert_eq!(out.found, 0);
        assert_eq!(out.rejected, 0);
    }

    #[test]
    fn test_counters_track_rejections() {
        let text = "tg://proxy?server=1.2.3.4&port=443&secret=abc123 \
                    tg://proxy?server=5.6.7.8&port=70000&secret=ff";
        let out = ProxyExtractor::extract(text, &[]);
        assert_eq!(out.found, 2);
        assert_eq!(out.rejected, 1);
        assert_eq!(out.candidates.len(), 1);
    }
}
