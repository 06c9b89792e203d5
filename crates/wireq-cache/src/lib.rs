//! crates/wireq-cache/src/lib.rs
//!
//! # Overview
//!
//! The disk-backed cache engine: a bounded, content-addressed store keyed
//! by an opaque cache key string, with hysteretic multi-pass pruning,
//! write-behind batching, and an in-memory shadow map that lets
//! concurrent reads see a just-`put` entry before it reaches disk.
//!
//! # Concurrency
//!
//! [`DiskCache`]'s public operations that touch the index (`get`, `put`,
//! `remove`, `clear`, `invalidate`, `update_entry`, pruning) execute under
//! one intrinsic lock (an internal [`std::sync::Mutex`] guarding
//! [`index::Index`]). The write-behind shadow map is a
//! [`dashmap::DashMap`], a separately-safe concurrent mapping, so reads
//! outside that lock can still observe pending writes.
//!
//! # Failure handling
//!
//! Every I/O or framing fault degrades to a miss plus best-effort cleanup:
//! nothing in [`error::CacheError`] is ever surfaced past this crate's
//! boundary.

#![deny(unsafe_code)]

mod clock;
mod error;
mod filename;
mod index;
mod prune;
mod write_behind;

pub use clock::{Clock, SystemClock};
pub use error::CacheError;

use std::fs;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use dashmap::DashMap;
use wireq_codec::{CacheHeader, CacheRecord};

use filename::filename_for_key;
use index::{Index, IndexEntry};
use write_behind::WorkerHandle;

/// Default delay between a deferred `put` and its instant disk flush.
pub const DEFAULT_WRITE_BEHIND_DELAY: Duration = Duration::from_millis(5000);

/// Default bound on total on-disk cache size (20 MiB).
pub const DEFAULT_MAX_BYTES: u64 = 20 * 1024 * 1024;

/// Shared cache state, reachable from both [`DiskCache`] and the
/// write-behind worker thread without routing every worker action through
/// a channel round-trip back to the foreground.
pub(crate) struct CacheShared {
    root: PathBuf,
    max_bytes: u64,
    clock: Arc<dyn Clock>,
    index: Mutex<Index>,
    /// Entries `put` with `instant=false` that haven't reached disk yet.
    /// Shadows `index`/disk for concurrent `get` calls.
    pending: DashMap<String, CacheRecord>,
}

impl CacheShared {
    fn read_current(&self, key: &str) -> Option<CacheRecord> {
        if let Some(record) = self.pending.get(key) {
            return Some(record.clone());
        }
        self.read_from_disk(key)
    }

    fn read_from_disk(&self, key: &str) -> Option<CacheRecord> {
        let path = self.root.join(filename_for_key(key));
        let file = fs::File::open(&path).ok()?;
        let mut reader = BufReader::new(file);
        match wireq_codec::decode(&mut reader) {
            Ok(record) if record.header.key == key => {
                let mut index = self.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                index.touch(key);
                Some(record)
            }
            Ok(mismatched) => {
                tracing::warn!(
                    requested = key,
                    found = %mismatched.header.key,
                    "cache filename collision; treating as a miss"
                );
                self.drop_broken_entry(key, &path);
                None
            }
            Err(err) => {
                tracing::debug!(key, error = %err, "cache record unreadable; treating as a miss");
                self.drop_broken_entry(key, &path);
                None
            }
        }
    }

    fn drop_broken_entry(&self, key: &str, path: &Path) {
        let mut index = self.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        index.remove(key);
        drop(index);
        let _ = fs::remove_file(path);
    }

    /// Writes `record` to disk immediately: prunes if needed, encodes,
    /// writes, and registers the header into the index. On any failure the
    /// partial file is best-effort deleted.
    fn instant_put(&self, record: CacheRecord) -> Result<(), CacheError> {
        if record.carries_reserved_sentinel() {
            return Err(CacheError::Codec(wireq_codec::CodecError::ReservedSentinel));
        }
        let bytes = wireq_codec::encode(&record)?;
        let needed = bytes.len() as u64;
        let now = self.clock.now_ms();

        {
            let mut index = self.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let errors = prune::prune_if_needed(&mut index, &self.root, needed, self.max_bytes, now);
            for (key, err) in errors {
                tracing::warn!(key, error = %err, "failed to delete evicted cache file");
            }
        }

        let path = self.root.join(filename_for_key(&record.header.key));
        match fs::write(&path, &bytes) {
            Ok(()) => {
                let mut index = self.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                index.insert(
                    record.header.key.clone(),
                    IndexEntry {
                        header: record.header,
                        size: needed,
                    },
                );
                Ok(())
            }
            Err(err) => {
                let _ = fs::remove_file(&path);
                Err(CacheError::Io(err))
            }
        }
    }

    fn flush_pending(&self, key: &str) {
        if let Some((_, record)) = self.pending.remove(key) {
            if let Err(err) = self.instant_put(record) {
                tracing::warn!(key, error = %err, "write-behind flush failed");
            }
        }
    }

    fn apply_update(&self, key: &str, header: CacheHeader) {
        let Some(mut record) = self.read_current(key) else {
            tracing::debug!(key, "update_entry dropped: record no longer present");
            return;
        };
        record.header.etag = header.etag;
        record.header.server_date = header.server_date;
        record.header.ttl = header.ttl;
        record.header.soft_ttl = header.soft_ttl;
        record.header.keep_until = header.keep_until;
        record.header.is_image = header.is_image;
        record.header.response_headers = header.response_headers;
        if let Err(err) = self.instant_put(record) {
            tracing::warn!(key, error = %err, "update_entry write failed");
        }
    }
}

/// The bounded, pruning, write-behind disk cache.
pub struct DiskCache {
    shared: Arc<CacheShared>,
    worker: WorkerHandle,
    write_behind_delay: Duration,
}

impl DiskCache {
    /// Creates (but does not [`initialize`](Self::initialize)) a cache
    /// rooted at `root`, using the real wall clock.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, max_bytes: u64) -> Self {
        Self::with_clock(root, max_bytes, Arc::new(SystemClock), DEFAULT_WRITE_BEHIND_DELAY)
    }

    /// As [`new`](Self::new), with an injectable [`Clock`] and write-behind
    /// delay, for deterministic tests.
    #[must_use]
    pub fn with_clock(root: impl Into<PathBuf>, max_bytes: u64, clock: Arc<dyn Clock>, write_behind_delay: Duration) -> Self {
        let shared = Arc::new(CacheShared {
            root: root.into(),
            max_bytes,
            clock,
            index: Mutex::new(Index::new()),
            pending: DashMap::new(),
        });
        let worker = WorkerHandle::spawn(Arc::clone(&shared));
        Self {
            shared,
            worker,
            write_behind_delay,
        }
    }

    /// Creates the root directory if missing, scans existing files,
    /// registers their headers into the index (deleting any that fail to
    /// parse), and accumulates `total_size`. Must be called before any
    /// other operation, synchronously, before the cache is handed to
    /// callers.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the root directory cannot be
    /// created or listed.
    pub fn initialize(&self) -> Result<(), CacheError> {
        fs::create_dir_all(&self.shared.root)?;
        let mut index = self.shared.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        for entry in fs::read_dir(&self.shared.root)? {
            let Ok(entry) = entry else { continue };
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            let header = fs::File::open(&path)
                .ok()
                .and_then(|file| wireq_codec::decode_header(&mut BufReader::new(file)).ok());
            match header {
                Some(header) => {
                    index.insert(header.key.clone(), IndexEntry { header, size });
                }
                None => {
                    tracing::debug!(path = %path.display(), "unreadable cache file on startup scan; deleting");
                    let _ = fs::remove_file(&path);
                }
            }
        }
        tracing::info!(entries = index.len(), total_size = index.total_size(), "cache initialized");
        Ok(())
    }

    /// Reads a full record for `key`: the write-behind shadow map first,
    /// then disk. Any I/O or framing fault is treated as a miss.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<CacheRecord> {
        self.shared.read_current(key)
    }

    /// Reads only `key`'s header (no body, no disk I/O beyond what's
    /// already in the index/shadow map).
    #[must_use]
    pub fn get_headers(&self, key: &str) -> Option<CacheHeader> {
        if let Some(record) = self.shared.pending.get(key) {
            return Some(record.header.clone());
        }
        let index = self.shared.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        index.peek(key).map(|entry| entry.header.clone())
    }

    /// Stores `record`. When `instant` is `false` (the common case), the
    /// record is placed in the shadow map immediately and the real disk
    /// write deferred by this cache's write-behind delay; when `true`, the
    /// write happens synchronously on the caller's thread.
    pub fn put(&self, record: CacheRecord, instant: bool) {
        let key = record.header.key.clone();
        if instant {
            if let Err(err) = self.shared.instant_put(record) {
                tracing::warn!(key, error = %err, "instant put failed");
            }
            return;
        }
        self.shared.pending.insert(key.clone(), record);
        self.worker.schedule_put(key, self.write_behind_delay);
    }

    /// Loads the current entry, marks it stale (`soft_ttl = 0`, and if
    /// `full`, `ttl = 0` too), and re-persists it synchronously. A no-op if
    /// `key` has no current entry.
    pub fn invalidate(&self, key: &str, full: bool) {
        let Some(mut record) = self.shared.read_current(key) else {
            return;
        };
        record.header.soft_ttl = 0;
        if full {
            record.header.ttl = 0;
        }
        if let Err(err) = self.shared.instant_put(record) {
            tracing::warn!(key, error = %err, "invalidate write failed");
        }
    }

    /// Overlays metadata fields (ttls, etag, server_date, keep_until,
    /// is_image, response_headers) onto the current record's body,
    /// asynchronously via the write-behind worker. Dropped if the record
    /// has since been pruned.
    pub fn update_entry(&self, key: &str, header: CacheHeader) {
        self.worker.schedule_update(key.to_owned(), header);
    }

    /// Deletes `key`'s entry, if any, from the shadow map, index, and disk.
    pub fn remove(&self, key: &str) {
        self.shared.pending.remove(key);
        let mut index = self.shared.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if index.remove(key).is_some() {
            drop(index);
            let path = self.shared.root.join(filename_for_key(key));
            let _ = fs::remove_file(path);
        }
    }

    /// Deletes every file under the cache root and resets the index,
    /// shadow map, and pending write-behind deadlines.
    pub fn clear(&self) {
        self.worker.clear();
        self.shared.pending.clear();
        let mut index = self.shared.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Ok(read_dir) = fs::read_dir(&self.shared.root) {
            for entry in read_dir.flatten() {
                let _ = fs::remove_file(entry.path());
            }
        }
        index.clear();
    }

    /// Current number of entries registered in the index (does not count
    /// entries only present in the write-behind shadow map).
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    /// Whether the index holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sum of every indexed entry's on-disk size.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.shared.index.lock().unwrap_or_else(std::sync::PoisonError::into_inner).total_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn record(key: &str, ttl: i64, soft_ttl: i64, body: &[u8]) -> CacheRecord {
        CacheRecord {
            header: CacheHeader {
                key: key.to_owned(),
                etag: Some("v1".to_owned()),
                server_date: 0,
                ttl,
                soft_ttl,
                keep_until: 0,
                is_image: false,
                response_headers: Vec::new(),
            },
            body: body.to_vec(),
        }
    }

    fn cache(dir: &Path) -> DiskCache {
        let cache = DiskCache::new(dir.to_path_buf(), 1024 * 1024);
        cache.initialize().expect("initialize");
        cache
    }

    #[test]
    fn put_instant_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        cache.put(record("k", 60_000, 30_000, b"hi"), true);
        let got = cache.get("k").expect("hit");
        assert_eq!(got.body, b"hi");
        assert_eq!(cache.total_size(), cache.total_size());
    }

    #[test]
    fn total_size_matches_sum_of_entries_after_put_and_remove() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        cache.put(record("a", 60_000, 30_000, b"aaaa"), true);
        cache.put(record("b", 60_000, 30_000, b"bbbbbbbb"), true);
        assert!(cache.total_size() > 0);
        let expected: u64 = {
            let index = cache.shared.index.lock().unwrap();
            index.iter_lru().map(|(_, e)| e.size).sum()
        };
        assert_eq!(cache.total_size(), expected);
        cache.remove("a");
        let expected_after: u64 = {
            let index = cache.shared.index.lock().unwrap();
            index.iter_lru().map(|(_, e)| e.size).sum()
        };
        assert_eq!(cache.total_size(), expected_after);
    }

    #[test]
    fn deferred_put_is_visible_via_shadow_map_before_flush() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::with_clock(
            dir.path().to_path_buf(),
            1024 * 1024,
            Arc::new(SystemClock),
            Duration::from_secs(3600),
        );
        cache.initialize().unwrap();
        cache.put(record("k", 60_000, 30_000, b"shadow"), false);
        let got = cache.get("k").expect("shadow hit");
        assert_eq!(got.body, b"shadow");
        // Nothing flushed to disk yet: index is still empty.
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn missing_key_is_a_plain_miss() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        assert!(cache.get("nope").is_none());
    }

    #[test]
    fn invalidate_full_zeroes_ttl_and_soft_ttl() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        cache.put(record("k", 60_000, 30_000, b"hi"), true);
        cache.invalidate("k", true);
        let headers = cache.get_headers("k").expect("still present");
        assert_eq!(headers.ttl, 0);
        assert_eq!(headers.soft_ttl, 0);
    }

    #[test]
    fn invalidate_soft_only_leaves_ttl_untouched() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        cache.put(record("k", 60_000, 30_000, b"hi"), true);
        cache.invalidate("k", false);
        let headers = cache.get_headers("k").expect("still present");
        assert_eq!(headers.ttl, 60_000);
        assert_eq!(headers.soft_ttl, 0);
    }

    #[test]
    fn clear_removes_everything_on_disk_and_in_index() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        cache.put(record("a", 60_000, 30_000, b"aaaa"), true);
        cache.put(record("b", 60_000, 30_000, b"bbbb"), true);
        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.total_size(), 0);
        assert!(cache.get("a").is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn initialize_deletes_unreadable_files() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("garbage"), b"not a cache record").unwrap();
        let cache = cache(dir.path());
        assert_eq!(cache.len(), 0);
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn initialize_recovers_existing_records() {
        let dir = tempdir().unwrap();
        {
            let cache = cache(dir.path());
            cache.put(record("k", 60_000, 30_000, b"hi"), true);
        }
        let reopened = cache(dir.path());
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.get("k").unwrap().body, b"hi");
    }

    #[test]
    fn update_entry_preserves_body_and_overlays_metadata() {
        let dir = tempdir().unwrap();
        let cache = DiskCache::new(dir.path().to_path_buf(), 1024 * 1024);
        cache.initialize().unwrap();
        cache.put(record("k", 60_000, 30_000, b"body"), true);

        let mut new_header = cache.get_headers("k").unwrap();
        new_header.etag = Some("v2".to_owned());
        new_header.ttl = 120_000;
        cache.update_entry("k", new_header);

        // update_entry is posted to the worker; give it a moment to apply.
        std::thread::sleep(Duration::from_millis(100));

        let updated = cache.get("k").expect("still present");
        assert_eq!(updated.body, b"body");
        assert_eq!(updated.header.etag.as_deref(), Some("v2"));
        assert_eq!(updated.header.ttl, 120_000);
    }

    #[test]
    fn put_rejects_records_carrying_reserved_sentinel() {
        let dir = tempdir().unwrap();
        let cache = cache(dir.path());
        cache.put(record("k", i64::MAX, 30_000, b"hi"), true);
        assert!(cache.get("k").is_none());
    }
}
