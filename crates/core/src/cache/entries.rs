//! Entry CRUD: match and put request -> response pairs inside a bucket.

use std::collections::BTreeMap;

use super::connection::CacheDb;
use super::hash::compute_cache_key;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Normalized request identity: method plus absolute URL. Only GET is cacheable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    method: String,
    url: String,
}

impl RequestKey {
    /// Key for a GET of `url`.
    pub fn get(url: impl Into<String>) -> Self {
        Self { method: "GET".into(), url: url.into() }
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn hash(&self) -> String {
        compute_cache_key(&self.method, &self.url)
    }
}

/// A captured HTTP response as stored in a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub status_text: String,
    /// Header names are lowercase.
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    /// When the entry was written; `None` until stored.
    #[serde(default)]
    pub stored_at: Option<String>,
}

impl CachedResponse {
    pub fn new(status: u16, status_text: impl Into<String>, headers: BTreeMap<String, String>, body: Vec<u8>) -> Self {
        let headers = headers
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self { status, status_text: status_text.into(), headers, body, stored_at: None }
    }

    /// A `200 OK` with the given body and content type.
    pub fn ok(body: Vec<u8>, content_type: &str) -> Self {
        let headers = BTreeMap::from([("content-type".to_string(), content_type.to_string())]);
        Self::new(200, "OK", headers, body)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

impl CacheDb {
    /// Store `response` under `key` in `bucket`, creating the bucket if needed.
    ///
    /// Uses UPSERT semantics: a second put for the same key replaces the entry.
    pub async fn put_entry(&self, bucket: &str, key: &RequestKey, response: &CachedResponse) -> Result<(), Error> {
        let bucket = bucket.to_string();
        let key_hash = key.hash();
        let method = key.method.clone();
        let url = key.url.clone();
        let status = response.status;
        let status_text = response.status_text.clone();
        let headers_json = serde_json::to_string(&response.headers)?;
        let body = response.body.clone();
        let now = chrono::Utc::now().to_rfc3339();

        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO buckets (name, created_at) VALUES (?1, ?2)",
                    params![bucket, now],
                )?;
                tx.execute(
                    "INSERT INTO entries (
                        bucket, key_hash, method, url, status, status_text, headers_json, body, stored_at
                    ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                    ON CONFLICT(bucket, key_hash) DO UPDATE SET
                        method = excluded.method,
                        url = excluded.url,
                        status = excluded.status,
                        status_text = excluded.status_text,
                        headers_json = excluded.headers_json,
                        body = excluded.body,
                        stored_at = excluded.stored_at",
                    params![bucket, key_hash, method, url, status, status_text, headers_json, body, now],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Look up `key` in `bucket`.
    ///
    /// Returns None if either the bucket or the entry doesn't exist.
    pub async fn match_entry(&self, bucket: &str, key: &RequestKey) -> Result<Option<CachedResponse>, Error> {
        let bucket = bucket.to_string();
        let key_hash = key.hash();
        self.conn
            .call(move |conn| -> Result<Option<CachedResponse>, Error> {
                let row = conn.query_row(
                    "SELECT status, status_text, headers_json, body, stored_at
                     FROM entries WHERE bucket = ?1 AND key_hash = ?2",
                    params![bucket, key_hash],
                    |row| {
                        Ok((
                            row.get::<_, u16>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Vec<u8>>(3)?,
                            row.get::<_, String>(4)?,
                        ))
                    },
                );

                match row {
                    Ok((status, status_text, headers_json, body, stored_at)) => {
                        let headers = serde_json::from_str(&headers_json)?;
                        Ok(Some(CachedResponse { status, status_text, headers, body, stored_at: Some(stored_at) }))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// URLs stored in `bucket`, sorted.
    pub async fn entry_urls(&self, bucket: &str) -> Result<Vec<String>, Error> {
        let bucket = bucket.to_string();
        self.conn
            .call(move |conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT url FROM entries WHERE bucket = ?1 ORDER BY url")?;
                let urls = stmt
                    .query_map(params![bucket], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(urls)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STYLE: &str = "http://localhost:8080/css/style.css";

    #[test]
    fn test_cached_response_headers_lowercased() {
        let headers = BTreeMap::from([("Content-Type".to_string(), "text/css".to_string())]);
        let response = CachedResponse::new(200, "OK", headers, Vec::new());
        assert_eq!(response.content_type(), Some("text/css"));
        assert!(response.is_ok());
    }

    #[tokio::test]
    async fn test_put_and_match() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let key = RequestKey::get(STYLE);
        db.put_entry("stc-static-v1", &key, &CachedResponse::ok(b"body{}".to_vec(), "text/css"))
            .await
            .unwrap();

        let hit = db.match_entry("stc-static-v1", &key).await.unwrap().unwrap();
        assert_eq!(hit.body, b"body{}");
        assert_eq!(hit.content_type(), Some("text/css"));
        assert!(hit.stored_at.is_some());
        assert_eq!(db.list_bucket_names().await.unwrap(), vec!["stc-static-v1"]);
    }

    #[tokio::test]
    async fn test_match_missing() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let key = RequestKey::get(STYLE);
        assert!(db.match_entry("nope", &key).await.unwrap().is_none());

        db.open_bucket("stc-static-v1").await.unwrap();
        assert!(db.match_entry("stc-static-v1", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_twice_keeps_latest_only() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let key = RequestKey::get(STYLE);
        db.put_entry("s", &key, &CachedResponse::ok(b"old".to_vec(), "text/css"))
            .await
            .unwrap();
        db.put_entry("s", &key, &CachedResponse::ok(b"new".to_vec(), "text/css"))
            .await
            .unwrap();

        assert_eq!(db.entry_urls("s").await.unwrap(), vec![STYLE]);
        let hit = db.match_entry("s", &key).await.unwrap().unwrap();
        assert_eq!(hit.text(), "new");
    }

    #[tokio::test]
    async fn test_buckets_are_isolated() {
        let db = CacheDb::open_in_memory().await.unwrap();
        let key = RequestKey::get("http://localhost:8080/");
        db.put_entry("dynamic", &key, &CachedResponse::ok(b"home".to_vec(), "text/html"))
            .await
            .unwrap();

        assert!(db.match_entry("static", &key).await.unwrap().is_none());
        assert!(db.match_entry("dynamic", &key).await.unwrap().is_some());
    }
}
