//! Proxy persistence
//!
//! Three interchangeable backends behind one trait: keep nothing, a JSON
//! snapshot of the latest working set, or a SQLite table upserted on proxy
//! identity. The pipeline is fully functional with `NoopStore`.

use crate::config::{StorageBackend, StorageConfig};
use crate::proxy::{ProxyCandidate, ProxyKind, ValidatedProxy};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Days a stored proxy survives without being re-validated
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

#[async_trait]
pub trait ProxyStore: Send + Sync {
    /// Persist the working subset of a validation pass
    async fn save(&self, proxies: &[ValidatedProxy]) -> Result<()>;

    /// Load previously stored candidates for re-validation
    async fn load(&self) -> Result<Vec<ProxyCandidate>>;

    /// Drop entries not re-validated within the given number of days,
    /// returning how many were removed
    async fn prune_older_than(&self, days: i64) -> Result<u64>;
}

/// Build the store selected by configuration
pub async fn open_store(config: &StorageConfig) -> Result<Box<dyn ProxyStore>> {
    match config.backend {
        StorageBackend::None => Ok(Box::new(NoopStore)),
        StorageBackend::Json => Ok(Box::new(JsonStore::new(config.effective_path()))),
        StorageBackend::Sqlite => {
            let store = SqliteStore::connect(&config.effective_path()).await?;
            Ok(Box::new(store))
        }
    }
}

/// Store that keeps nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStore;

#[async_trait]
impl ProxyStore for NoopStore {
    async fn save(&self, _proxies: &[ValidatedProxy]) -> Result<()> {
        Ok(())
    }

    async fn load(&self) -> Result<Vec<ProxyCandidate>> {
        Ok(Vec::new())
    }

    async fn prune_older_than(&self, _days: i64) -> Result<u64> {
        Ok(0)
    }
}

/// Flat serialization record for one working proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredProxy {
    kind: ProxyKind,
    host: String,
    port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default)]
    source_url: String,
    latency_seconds: f64,
    download_bps: f64,
    upload_bps: f64,
    checked_at: DateTime<Utc>,
}

impl StoredProxy {
    fn from_validated(proxy: &ValidatedProxy) -> Self {
        Self {
            kind: proxy.candidate.kind,
            host: proxy.candidate.host.clone(),
            port: proxy.candidate.port,
            secret: proxy.candidate.secret.clone(),
            username: proxy.candidate.username.clone(),
            password: proxy.candidate.password.clone(),
            source_url: proxy.candidate.source_url.clone(),
            latency_seconds: proxy.result.latency,
            download_bps: proxy.result.download_bps,
            upload_bps: proxy.result.upload_bps,
            checked_at: proxy.result.measured_at,
        }
    }

    fn into_candidate(self) -> ProxyCandidate {
        ProxyCandidate {
            kind: self.kind,
            host: self.host,
            port: self.port,
            secret: self.secret,
            username: self.username,
            password: self.password,
            source_url: self.source_url,
        }
    }
}

/// Store writing a pretty JSON snapshot of the latest working set
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn read_snapshot(&self) -> Result<Vec<StoredProxy>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err.into()),
        }
    }

    async fn write_snapshot(&self, entries: &[StoredProxy]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(entries)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }
}

#[async_trait]
impl ProxyStore for JsonStore {
    async fn save(&self, proxies: &[ValidatedProxy]) -> Result<()> {
        let entries: Vec<StoredProxy> = proxies
            .iter()
            .filter(|proxy| proxy.is_working())
            .map(StoredProxy::from_validated)
            .collect();

        self.write_snapshot(&entries).await?;
        debug!(path = %self.path.display(), count = entries.len(), "snapshot saved");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<ProxyCandidate>> {
        let entries = self.read_snapshot().await?;
        Ok(entries
            .into_iter()
            .map(StoredProxy::into_candidate)
            .collect())
    }

    async fn prune_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = Utc::now() - ChronoDuration::days(days);
        let entries = self.read_snapshot().await?;
        let before = entries.len();
        let kept: Vec<StoredProxy> = entries
            .into_iter()
            .filter(|entry| entry.checked_at >= cutoff)
            .collect();

        let removed = (before - kept.len()) as u64;
        if removed > 0 {
            self.write_snapshot(&kept).await?;
        }
        Ok(removed)
    }
}

const CREATE_PROXIES_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS proxies (
    kind TEXT NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    secret TEXT NOT NULL DEFAULT '',
    username TEXT NOT NULL DEFAULT '',
    password TEXT NOT NULL DEFAULT '',
    source_url TEXT NOT NULL DEFAULT '',
    latency_seconds REAL NOT NULL,
    download_bps REAL NOT NULL DEFAULT 0,
    upload_bps REAL NOT NULL DEFAULT 0,
    checked_at TEXT NOT NULL,
    PRIMARY KEY (kind, host, port, secret, username)
)
"#;

/// Store backed by a SQLite database
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the database at `path`, creating file and schema when missing
    pub async fn connect(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        if !path.exists() {
            std::fs::File::create(path)?;
        }

        let url = format!("sqlite:{}", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        sqlx::query(CREATE_PROXIES_SQL).execute(&pool).await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ProxyStore for SqliteStore {
    async fn save(&self, proxies: &[ValidatedProxy]) -> Result<()> {
        let mut saved = 0usize;
        for proxy in proxies.iter().filter(|proxy| proxy.is_working()) {
            let candidate = &proxy.candidate;
            let result = &proxy.result;
            sqlx::query(
                r#"
                INSERT OR REPLACE INTO proxies
                (kind, host, port, secret, username, password, source_url,
                 latency_seconds, download_bps, upload_bps, checked_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(candidate.kind.to_string())
            .bind(&candidate.host)
            .bind(candidate.port as i64)
            .bind(candidate.secret.as_deref().unwrap_or_default())
            .bind(candidate.username.as_deref().unwrap_or_default())
            .bind(candidate.password.as_deref().unwrap_or_default())
            .bind(&candidate.source_url)
            .bind(result.latency)
            .bind(result.download_bps)
            .bind(result.upload_bps)
            .bind(result.measured_at.to_rfc3339())
            .execute(&self.pool)
            .await?;
            saved += 1;
        }

        debug!(count = saved, "proxies upserted");
        Ok(())
    }

    async fn load(&self) -> Result<Vec<ProxyCandidate>> {
        let rows = sqlx::query(
            "SELECT kind, host, port, secret, username, password, source_url
             FROM proxies ORDER BY latency_seconds ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut candidates = Vec::with_capacity(rows.len());
        for row in rows {
            let kind_raw: String = row.get("kind");
            let kind = match kind_raw.parse::<ProxyKind>() {
                Ok(kind) => kind,
                Err(_) => {
                    warn!(kind = %kind_raw, "skipping row with unknown proxy kind");
                    continue;
                }
            };
            let port: i64 = row.get("port");
            let port = match u16::try_from(port) {
                Ok(port) => port,
                Err(_) => {
                    warn!(port, "skipping row with out-of-range port");
                    continue;
                }
            };

            candidates.push(ProxyCandidate {
                kind,
                host: row.get("host"),
                port,
                secret: non_empty(row.get("secret")),
                username: non_empty(row.get("username")),
                password: non_empty(row.get("password")),
                source_url: row.get("source_url"),
            });
        }
        Ok(candidates)
    }

    async fn prune_older_than(&self, days: i64) -> Result<u64> {
        let cutoff = (Utc::now() - ChronoDuration::days(days)).to_rfc3339();
        let result = sqlx::query("DELETE FROM proxies WHERE checked_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{ProbeStatus, ValidationResult};

    fn working(candidate: ProxyCandidate) -> ValidatedProxy {
        ValidatedProxy::new(candidate, ValidationResult::working(0.05))
    }

    fn failed(candidate: ProxyCandidate) -> ValidatedProxy {
        ValidatedProxy::new(candidate, ValidationResult::failed(ProbeStatus::ConnectFailed))
    }

    #[tokio::test]
    async fn test_noop_store_keeps_nothing() {
        let store = NoopStore;
        store
            .save(&[working(ProxyCandidate::http("10.0.0.1", 8080))])
            .await
            .unwrap();
        assert!(store.load().await.unwrap().is_empty());
        assert_eq!(store.prune_older_than(7).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_json_store_saves_only_working() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("proxies.json"));

        store
            .save(&[
                working(ProxyCandidate::mtproto("1.2.3.4", 443, "abc123")),
                failed(ProxyCandidate::http("10.0.0.9", 8080)),
            ])
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].host, "1.2.3.4");
        assert_eq!(loaded[0].secret.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_json_store_missing_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("absent.json"));
        assert!(store.load().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_prunes_old_entries() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonStore::new(dir.path().join("proxies.json"));

        let mut stale = StoredProxy::from_validated(&working(ProxyCandidate::http("10.0.0.1", 80)));
        stale.checked_at = Utc::now() - ChronoDuration::days(10);
        let fresh = StoredProxy::from_validated(&working(ProxyCandidate::http("10.0.0.2", 80)));
        store.write_snapshot(&[stale, fresh]).await.unwrap();

        let removed = store.prune_older_than(DEFAULT_RETENTION_DAYS).await.unwrap();
        assert_eq!(removed, 1);

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].host, "10.0.0.2");
    }

    #[tokio::test]
    async fn test_sqlite_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::connect(&dir.path().join("proxies.db"))
            .await
            .unwrap();

        store
            .save(&[
                working(ProxyCandidate::mtproto("1.2.3.4", 443, "abc123")),
                working(ProxyCandidate::socks5(
                    "10.0.0.1",
                    1080,
                    Some("user".to_string()),
                    Some("pass".to_string()),
                )),
            ])
            .await
            .unwrap();

        let loaded = store.load().await.unwrap();
        assert_eq!(loaded.len(), 2);

        let mtproto = loaded
            .iter()
            .find(|candidate| candidate.kind == ProxyKind::Mtproto)
            .unwrap();
        assert_eq!(mtproto.secret.as_deref(), Some("abc123"));

        let socks = loaded
            .iter()
            .find(|candidate| candidate.kind == ProxyKind::Socks5)
            .unwrap();
        assert_eq!(socks.username.as_deref(), Some("user"));
        assert_eq!(socks.password.as_deref(), Some("pass"));
    }

    #[tokio::test]
    async fn test_sqlite_store_upserts_on_identity() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::connect(&dir.path().join("proxies.db"))
            .await
            .unwrap();

        let candidate = ProxyCandidate::mtproto("1.2.3.4", 443, "abc123");
        store.save(&[working(candidate.clone())]).await.unwrap();
        store.save(&[working(candidate)]).await.unwrap();

        assert_eq!(store.load().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sqlite_store_prunes_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::connect(&dir.path().join("proxies.db"))
            .await
            .unwrap();

        store
            .save(&[working(ProxyCandidate::http("10.0.0.1", 8080))])
            .await
            .unwrap();

        assert_eq!(store.prune_older_than(7).await.unwrap(), 0);
        assert_eq!(store.prune_older_than(0).await.unwrap(), 1);
        assert!(store.load().await.unwrap().is_empty());
    }
}
