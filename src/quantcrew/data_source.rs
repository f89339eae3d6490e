//! Data-source interface consumed by the data analysis agents.
//!
//! A [`DataSource`] turns a trigger time into a table of raw documents.
//! Concrete scrapers and market APIs live outside this crate; the pipeline
//! only depends on the trait.  [`CachedSource`] adds on-disk result caching
//! keyed by `(source_name, trigger_time)` so repeated runs against the same
//! trigger time never refetch, and [`StaticSource`] provides a fixed table
//! for tests and demos.

use crate::quantcrew::artifacts::compact_timestamp;
use async_trait::async_trait;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// One raw document row.
///
/// `id` is assigned by the consuming agent during preprocessing (stable
/// 1..=N within a run); sources leave it at the default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub title: String,
    pub content: String,
    pub pub_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub id: u64,
}

impl Document {
    pub fn new(
        title: impl Into<String>,
        content: impl Into<String>,
        pub_time: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            pub_time: pub_time.into(),
            url: None,
            id: 0,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }
}

/// Provider of raw document rows for one trigger time.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Stable source identifier, used for logging and cache keys.
    fn name(&self) -> &str;

    /// Fetch the rows for `trigger_time`.
    async fn get_data(
        &self,
        trigger_time: &str,
    ) -> Result<Vec<Document>, Box<dyn Error + Send + Sync>>;
}

/// Minimal get/put cache keyed by opaque strings.
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str);
}

/// Filesystem-backed [`Cache`]: one file per key under a directory.
pub struct FsCache {
    dir: PathBuf,
}

impl FsCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

impl Cache for FsCache {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.path_for(key)).ok()
    }

    fn put(&self, key: &str, value: &str) {
        if let Err(err) = fs::create_dir_all(&self.dir) {
            warn!("cannot create cache dir {}: {}", self.dir.display(), err);
            return;
        }
        if let Err(err) = fs::write(self.path_for(key), value) {
            warn!("cannot write cache entry {}: {}", key, err);
        }
    }
}

/// Wraps a source with result caching keyed by `(source_name, trigger_time)`.
pub struct CachedSource {
    inner: Arc<dyn DataSource>,
    cache: Arc<dyn Cache>,
}

impl CachedSource {
    pub fn new(inner: Arc<dyn DataSource>, cache: Arc<dyn Cache>) -> Self {
        Self { inner, cache }
    }

    fn cache_key(&self, trigger_time: &str) -> String {
        format!("{}__{}", self.inner.name(), compact_timestamp(trigger_time))
    }
}

#[async_trait]
impl DataSource for CachedSource {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get_data(
        &self,
        trigger_time: &str,
    ) -> Result<Vec<Document>, Box<dyn Error + Send + Sync>> {
        let key = self.cache_key(trigger_time);
        if let Some(cached) = self.cache.get(&key) {
            match serde_json::from_str::<Vec<Document>>(&cached) {
                Ok(rows) => {
                    debug!("cache hit for {}", key);
                    return Ok(rows);
                }
                Err(err) => warn!("discarding corrupt cache entry {}: {}", key, err),
            }
        }
        let rows = self.inner.get_data(trigger_time).await?;
        match serde_json::to_string(&rows) {
            Ok(serialized) => self.cache.put(&key, &serialized),
            Err(err) => warn!("cannot serialize rows for cache entry {}: {}", key, err),
        }
        Ok(rows)
    }
}

/// A source with a fixed row set, independent of the trigger time.
pub struct StaticSource {
    name: String,
    rows: Vec<Document>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, rows: Vec<Document>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }
}

#[async_trait]
impl DataSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_data(
        &self,
        _trigger_time: &str,
    ) -> Result<Vec<Document>, Box<dyn Error + Send + Sync>> {
        Ok(self.rows.clone())
    }
}
