//! Bucket bookkeeping: naming, listing, opening and dropping whole buckets.

use super::connection::CacheDb;
use crate::Error;
use serde::{Deserialize, Serialize};
use tokio_rusqlite::params;

/// What a bucket holds. Exactly one bucket per purpose is current at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketPurpose {
    Static,
    Dynamic,
    Image,
}

impl BucketPurpose {
    pub const ALL: [BucketPurpose; 3] = [BucketPurpose::Static, BucketPurpose::Dynamic, BucketPurpose::Image];

    fn label(self) -> &'static str {
        match self {
            BucketPurpose::Static => "static",
            BucketPurpose::Dynamic => "dynamic",
            BucketPurpose::Image => "images",
        }
    }
}

/// The current bucket names, derived from a prefix and a version.
///
/// Nothing about buckets is remembered between worker events; the set is
/// recomputed from configuration whenever it is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketSet {
    static_name: String,
    dynamic_name: String,
    image_name: String,
}

impl BucketSet {
    pub fn new(prefix: &str, version: &str) -> Self {
        let name = |p: BucketPurpose| format!("{prefix}-{}-{version}", p.label());
        Self {
            static_name: name(BucketPurpose::Static),
            dynamic_name: name(BucketPurpose::Dynamic),
            image_name: name(BucketPurpose::Image),
        }
    }

    pub fn static_name(&self) -> &str {
        &self.static_name
    }

    pub fn dynamic_name(&self) -> &str {
        &self.dynamic_name
    }

    pub fn image_name(&self) -> &str {
        &self.image_name
    }

    pub fn name_for(&self, purpose: BucketPurpose) -> &str {
        match purpose {
            BucketPurpose::Static => &self.static_name,
            BucketPurpose::Dynamic => &self.dynamic_name,
            BucketPurpose::Image => &self.image_name,
        }
    }

    /// Whether `name` is one of the current buckets; anything else is stale.
    pub fn is_current(&self, name: &str) -> bool {
        BucketPurpose::ALL.iter().any(|p| self.name_for(*p) == name)
    }
}

/// Per-bucket usage figures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketStats {
    pub name: String,
    pub entries: u64,
    pub bytes: u64,
}

impl CacheDb {
    /// Open (create if missing) a bucket.
    pub async fn open_bucket(&self, name: &str) -> Result<(), Error> {
        let name = name.to_string();
        let now = chrono::Utc::now().to_rfc3339();
        self.conn
            .call(move |conn| -> Result<(), Error> {
                conn.execute(
                    "INSERT OR IGNORE INTO buckets (name, created_at) VALUES (?1, ?2)",
                    params![name, now],
                )?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Delete a bucket and every entry in it.
    ///
    /// Returns false if no such bucket existed.
    pub async fn delete_bucket(&self, name: &str) -> Result<bool, Error> {
        let name = name.to_string();
        self.conn
            .call(move |conn| -> Result<bool, Error> {
                let count = conn.execute("DELETE FROM buckets WHERE name = ?1", params![name])?;
                Ok(count > 0)
            })
            .await
            .map_err(Error::from)
    }

    /// Names of every bucket, sorted.
    pub async fn list_bucket_names(&self) -> Result<Vec<String>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<String>, Error> {
                let mut stmt = conn.prepare("SELECT name FROM buckets ORDER BY name")?;
                let names = stmt
                    .query_map([], |row| row.get(0))?
                    .collect::<Result<Vec<String>, _>>()?;
                Ok(names)
            })
            .await
            .map_err(Error::from)
    }

    /// Entry count and stored body bytes for every bucket.
    pub async fn inventory(&self) -> Result<Vec<BucketStats>, Error> {
        self.conn
            .call(|conn| -> Result<Vec<BucketStats>, Error> {
                let mut stmt = conn.prepare(
                    "SELECT b.name, COUNT(e.key_hash), COALESCE(SUM(LENGTH(e.body)), 0)
                     FROM buckets b LEFT JOIN entries e ON e.bucket = b.name
                     GROUP BY b.name ORDER BY b.name",
                )?;
                let stats = stmt
                    .query_map([], |row| {
                        Ok(BucketStats {
                            name: row.get(0)?,
                            entries: row.get::<_, i64>(1)? as u64,
                            bytes: row.get::<_, i64>(2)? as u64,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(stats)
            })
            .await
            .map_err(Error::from)
    }

    /// Drop every bucket. Returns how many were deleted.
    pub async fn clear_all(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let count = conn.execute("DELETE FROM buckets", [])?;
                Ok(count as u64)
            })
            .await
            .map_err(Error::from)
    }
}
