//! Outline cache keyed by coarse file identity.
//!
//! A [`CacheKey`] is the MD5 of `path + size + mtime`, not of the content:
//! two different files with the same size and timestamp at the same path
//! collide. It is a cheap freshness proxy that avoids reading large PDFs
//! twice, and is known to be a weak invalidation policy.
//!
//! Entries expire lazily: [`OutlineCache::lookup`] treats anything older
//! than the TTL as absent and the next [`OutlineCache::store`] overwrites
//! it. Nothing is evicted in the background and the map is unbounded.
//!
//! With persistence enabled, `store` and `clear` rewrite the cache file on
//! the blocking pool; the async callers never wait on disk I/O directly.

use crate::output::StructuredDocument;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Hex MD5 digest identifying one input file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Digest of `identity`, `size` and `stamp`, concatenated.
    pub fn from_parts(identity: &str, size: u64, stamp: &str) -> Self {
        let digest = md5::compute(format!("{identity}{size}{stamp}"));
        Self(format!("{digest:x}"))
    }

    /// Key for a file on disk: its path, byte size and modification time.
    pub fn for_file(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let mtime = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        Ok(Self::from_parts(
            &path.to_string_lossy(),
            meta.len(),
            &mtime.to_string(),
        ))
    }

    /// Key for uploaded bytes.
    ///
    /// Uploads are staged at a fresh temp path each time, so path and mtime
    /// would never repeat; the file name stands in for the path and a digest
    /// of the bytes for the mtime.
    pub fn for_upload(file_name: &str, bytes: &[u8]) -> Self {
        let content = md5::compute(bytes);
        Self::from_parts(file_name, bytes.len() as u64, &format!("{content:x}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A computed outline and when it was computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub computed_at: SystemTime,
    pub payload: StructuredDocument,
}

impl CacheEntry {
    /// Age at `now`. An entry stamped in the future counts as brand new.
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.computed_at).unwrap_or(Duration::ZERO)
    }
}

/// Process-wide outline cache, shared behind an `Arc`.
pub struct OutlineCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, CacheEntry>>,
    persist_path: Option<PathBuf>,
    /// Held across snapshot and write so the newest snapshot lands last.
    persist_lock: tokio::sync::Mutex<()>,
}

impl fmt::Debug for OutlineCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutlineCache")
            .field("ttl", &self.ttl)
            .field("len", &self.len())
            .field("persist_path", &self.persist_path)
            .finish()
    }
}

impl OutlineCache {
    /// In-memory cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            persist_path: None,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Cache mirrored to a JSON file at `path`.
    ///
    /// Existing entries are loaded now; the file is rewritten after every
    /// `store` and `clear`. An unreadable file is logged and ignored.
    pub fn with_persistence(ttl: Duration, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<HashMap<CacheKey, CacheEntry>>(&text) {
                Ok(map) => {
                    info!("Loaded {} cached outlines from {}", map.len(), path.display());
                    map
                }
                Err(e) => {
                    warn!("Ignoring unreadable cache file {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => {
                warn!("Could not read cache file {}: {}", path.display(), e);
                HashMap::new()
            }
        };
        Self {
            ttl,
            entries: Mutex::new(entries),
            persist_path: Some(path),
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh entry for `key`, or `None` if missing or expired.
    pub fn lookup(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lookup_at(key, SystemTime::now())
    }

    /// [`lookup`](Self::lookup) evaluated at an explicit instant.
    pub fn lookup_at(&self, key: &CacheKey, now: SystemTime) -> Option<CacheEntry> {
        let entries = self.lock();
        let entry = entries.get(key)?;
        if entry.age_at(now) >= self.ttl {
            debug!("Cache entry {} expired", key);
            return None;
        }
        Some(entry.clone())
    }

    /// Insert or overwrite `key`, stamped with the current time.
    pub async fn store(&self, key: CacheKey, payload: StructuredDocument) {
        self.store_at(key, payload, SystemTime::now()).await;
    }

    /// [`store`](Self::store) with an explicit timestamp.
    pub async fn store_at(
        &self,
        key: CacheKey,
        payload: StructuredDocument,
        computed_at: SystemTime,
    ) {
        self.lock().insert(
            key,
            CacheEntry {
                computed_at,
                payload,
            },
        );
        self.flush().await;
    }

    /// Drop every entry.
    pub async fn clear(&self) {
        self.lock().clear();
        self.flush().await;
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<CacheKey, CacheEntry>> {
        // A panic while holding the lock cannot leave the map half-written.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn flush(&self) {
        let Some(ref path) = self.persist_path else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let json = match serde_json::to_string(&*self.lock()) {
            Ok(json) => json,
            Err(e) => {
                warn!("Could not serialise outline cache: {}", e);
                return;
            }
        };

        let target = path.clone();
        let written =
            tokio::task::spawn_blocking(move || write_atomic(&target, json.as_bytes())).await;
        match written {
            Ok(Ok(())) => debug!("Persisted outline cache to {}", path.display()),
            Ok(Err(e)) => warn!("Could not persist outline cache to {}: {}", path.display(), e),
            Err(e) => warn!("Cache writer task failed: {}", e),
        }
    }
}

/// Write to a sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Heading;

    fn outline(title: &str) -> StructuredDocument {
        StructuredDocument::new(
            title,
            vec![Heading {
                heading: "Intro".into(),
                points: vec!["first".into()],
            }],
        )
    }

    #[test]
    fn identical_parts_collide() {
        let a = CacheKey::from_parts("/tmp/book.pdf", 1024, "1700000000.5");
        let b = CacheKey::from_parts("/tmp/book.pdf", 1024, "1700000000.5");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert_ne!(a, CacheKey::from_parts("/tmp/book.pdf", 1025, "1700000000.5"));
    }

    #[test]
    fn file_key_is_stable_until_file_changes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.pdf");
        std::fs::write(&path, b"%PDF-1.7 one").unwrap();
        let first = CacheKey::for_file(&path).unwrap();
        assert_eq!(first, CacheKey::for_file(&path).unwrap());

        std::fs::write(&path, b"%PDF-1.7 two, longer").unwrap();
        assert_ne!(first, CacheKey::for_file(&path).unwrap());
    }

    #[test]
    fn upload_key_depends_on_name_and_bytes() {
        let a = CacheKey::for_upload("book.pdf", b"%PDF-1");
        assert_eq!(a, CacheKey::for_upload("book.pdf", b"%PDF-1"));
        assert_ne!(a, CacheKey::for_upload("other.pdf", b"%PDF-1"));
        assert_ne!(a, CacheKey::for_upload("book.pdf", b"%PDF-2"));
    }

    #[tokio::test]
    async fn lookup_after_store_returns_payload() {
        let cache = OutlineCache::new(Duration::from_secs(3600));
        let key = CacheKey::from_parts("book", 1, "1");
        cache.store(key.clone(), outline("book")).await;
        let entry = cache.lookup(&key).expect("fresh entry");
        assert_eq!(entry.payload, outline("book"));
    }

    #[tokio::test]
    async fn entry_expires_exactly_at_ttl() {
        let ttl = Duration::from_secs(3600);
        let cache = OutlineCache::new(ttl);
        let key = CacheKey::from_parts("book", 1, "1");
        let t0 = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        cache.store_at(key.clone(), outline("book"), t0).await;

        assert!(cache.lookup_at(&key, t0 + ttl - Duration::from_secs(1)).is_some());
        assert!(cache.lookup_at(&key, t0 + ttl).is_none());
        // Expired entries are not evicted, only hidden.
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn store_overwrites_expired_entry() {
        let cache = OutlineCache::new(Duration::from_secs(10));
        let key = CacheKey::from_parts("book", 1, "1");
        let t0 = UNIX_EPOCH + Duration::from_secs(1_000);
        cache.store_at(key.clone(), outline("old"), t0).await;
        cache
            .store_at(key.clone(), outline("new"), t0 + Duration::from_secs(60))
            .await;

        let entry = cache
            .lookup_at(&key, t0 + Duration::from_secs(61))
            .unwrap();
        assert_eq!(entry.payload.title, "new");
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn clear_hides_every_key() {
        let cache = OutlineCache::new(Duration::from_secs(3600));
        let keys: Vec<_> = (0..3)
            .map(|i| CacheKey::from_parts("doc", i, "t"))
            .collect();
        for k in &keys {
            cache.store(k.clone(), outline("doc")).await;
        }
        cache.clear().await;
        assert!(cache.is_empty());
        assert!(keys.iter().all(|k| cache.lookup(k).is_none()));
    }

    #[tokio::test]
    async fn persisted_entries_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/cache.json");
        let key = CacheKey::from_parts("book", 1, "1");

        let cache = OutlineCache::with_persistence(Duration::from_secs(3600), &path);
        cache.store(key.clone(), outline("book")).await;
        drop(cache);

        let reloaded = OutlineCache::with_persistence(Duration::from_secs(3600), &path);
        assert_eq!(reloaded.lookup(&key).unwrap().payload.title, "book");

        reloaded.clear().await;
        let empty = OutlineCache::with_persistence(Duration::from_secs(3600), &path);
        assert!(empty.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_stores_persist_every_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = std::sync::Arc::new(OutlineCache::with_persistence(
            Duration::from_secs(3600),
            &path,
        ));

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let cache = cache.clone();
                tokio::spawn(async move {
                    cache
                        .store(CacheKey::from_parts("doc", i, "t"), outline("doc"))
                        .await
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        let reloaded = OutlineCache::with_persistence(Duration::from_secs(3600), &path);
        assert_eq!(reloaded.len(), 8);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn corrupt_cache_file_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "not json").unwrap();
        let cache = OutlineCache::with_persistence(Duration::from_secs(60), &path);
        assert!(cache.is_empty());
    }
}
