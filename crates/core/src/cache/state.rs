//! Durable client state.
//!
//! Plays the role of the page's persistent key/value storage: values written
//! here survive restarts of both the page and the worker.

use super::connection::CacheDb;
use crate::Error;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite;

/// Key under which the last successful sync time is stored.
pub const LAST_SYNC_KEY: &str = "contentLastSync";

impl CacheDb {
    /// Read a state value.
    pub async fn get_state(&self, key: &str) -> Result<Option<String>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<String>, Error> {
                match conn.query_row("SELECT value FROM client_state WHERE key = ?1", params![key], |row| row.get(0)) {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(Error::from)
    }

    /// Write a state value, replacing any previous one.
    pub async fn set_state(&self, key: &str, value: &str) -> Result<(), Error> {
        let key = key.to_string();
        let value = value.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT INTO client_state (key, value, updated_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                    params![key, value, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Last successful sync, in milliseconds since the Unix epoch.
    ///
    /// A missing or unparsable value reads as "never synced".
    pub async fn last_sync_millis(&self) -> Result<Option<i64>, Error> {
        let value = self.get_state(LAST_SYNC_KEY).await?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    pub async fn set_last_sync_millis(&self, millis: i64) -> Result<(), Error> {
        self.set_state(LAST_SYNC_KEY, &millis.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_roundtrip_and_overwrite() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert!(db.get_state("k").await.unwrap().is_none());

        db.set_state("k", "1").await.unwrap();
        db.set_state("k", "2").await.unwrap();
        assert_eq!(db.get_state("k").await.unwrap().as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_last_sync_never_synced() {
        let db = CacheDb::open_in_memory().await.unwrap();
        assert_eq!(db.last_sync_millis().await.unwrap(), None);

        db.set_state(LAST_SYNC_KEY, "garbage").await.unwrap();
        assert_eq!(db.last_sync_millis().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_last_sync_persisted() {
        let db = CacheDb::open_in_memory().await.unwrap();
        db.set_last_sync_millis(1_700_000_000_000).await.unwrap();
        assert_eq!(db.last_sync_millis().await.unwrap(), Some(1_700_000_000_000));
    }
}
