use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::AppError;

struct CachedView {
    body: Value,
    stored_at: Instant,
}

/// Rendered, user-independent views keyed by the path that serves them.
/// Mutations call the invalidation methods for every path they affect.
///
/// `generation` moves on every invalidation. A load that straddles one is
/// returned to its caller but never stored.
pub struct ViewCache {
    entries: DashMap<String, CachedView>,
    generation: AtomicU64,
    ttl: Duration,
}

impl ViewCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            ttl,
        }
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key)?;
        if entry.stored_at.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(key);
            debug!(key, "View cache entry expired");
            return None;
        }
        serde_json::from_value(entry.body.clone()).ok()
    }

    pub fn put<T: Serialize>(&self, key: &str, view: &T) {
        match serde_json::to_value(view) {
            Ok(body) => {
                self.entries.insert(
                    key.to_string(),
                    CachedView {
                        body,
                        stored_at: Instant::now(),
                    },
                );
            }
            Err(e) => debug!(key, error = %e, "View not cacheable"),
        }
    }

    /// Returns the cached view or loads, stores and returns a fresh one.
    /// Load failures are never cached.
    pub async fn get_or_load<T, F, Fut>(&self, key: &str, load: F) -> Result<T, AppError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, AppError>>,
    {
        if let Some(hit) = self.get(key) {
            debug!(key, "View cache hit");
            return Ok(hit);
        }

        let seen = self.generation.load(Ordering::SeqCst);
        let view = load().await?;
        self.put(key, &view);
        if self.generation.load(Ordering::SeqCst) != seen {
            self.entries.remove(key);
            debug!(key, "View invalidated while loading, not cached");
        }
        Ok(view)
    }

    /// Drops `path` and every query-string variant of it.
    pub fn invalidate(&self, path: &str) {
        let with_query = format!("{}?", path);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries
            .retain(|key, _| key != path && !key.starts_with(&with_query));
        debug!(path, "Invalidated view");
    }

    pub fn invalidate_prefix(&self, prefix: &str) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.retain(|key, _| !key.starts_with(prefix));
        debug!(prefix, "Invalidated views under prefix");
    }

    /// Every view that renders any part of the course's curriculum.
    pub fn revalidate_course(&self, course_id: i64) {
        info!(course_id, "Revalidating course views");
        self.invalidate("/courses");
        self.invalidate(&format!("/courses/{}", course_id));
        self.invalidate_prefix(&format!("/courses/{}/lessons/", course_id));
        self.invalidate("/admin/courses");
        self.invalidate(&format!("/admin/courses/{}/edit", course_id));
    }

    /// Category and tag names show up on every listing and course page.
    pub fn revalidate_catalog(&self) {
        info!("Revalidating catalog views");
        self.invalidate_prefix("/courses");
        self.invalidate_prefix("/admin/courses");
        self.invalidate("/categories");
        self.invalidate("/tags");
    }
}
