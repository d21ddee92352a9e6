//! Artifact Store: the single source of truth for bytes on disk. Materializes libraries
//! and asset objects into a process-wide [`SharedCache`] and links or copies them into
//! per-instance directories, guaranteeing at-most-one concurrent materialization per key.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::fs;
use tokio::sync::Mutex as AsyncMutex;

use crate::path::{self, PathBufExt};

crate::trait_event_handler! {
    /// Observes artifact-store activity: one event per key-scoped operation.
    pub trait Handler {
        fn on_store_event(event: Event<'_>);
    }
}

/// A store event, named after the key it concerns: a library repo-path or an object hash.
#[derive(Debug)]
#[non_exhaustive]
pub enum Event<'a> {
    /// The instance copy was already usable; nothing was fetched.
    AlreadyUsable { key: &'a str },
    /// Materialized from the shared cache via a hard link or copy.
    LinkedFromCache { key: &'a str },
    /// A fetch is starting because neither the instance copy nor the cache were usable.
    Fetching { key: &'a str },
    /// The fetch completed and bytes were written to the shared cache.
    Fetched { key: &'a str, size: u64 },
    /// A cached copy failed integrity checks and was evicted before re-fetching.
    EvictedCorrupt { key: &'a str },
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error on {path}: {source}")]
    Io { path: PathBuf, #[source] source: std::io::Error },
    #[error("fetched artifact for {key} failed size check: expected {expected}, got {actual}")]
    SizeMismatch { key: String, expected: u64, actual: u64 },
    #[error("fetched artifact for {key} failed sha1 check: expected {expected}, got {actual}")]
    Sha1Mismatch { key: String, expected: String, actual: String },
    #[error("fetched artifact for {key} does not open as a valid archive")]
    BadArchive { key: String },
    #[error(transparent)]
    Fetch(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Process-wide, content/path-addressed shared cache. Owns `libraries/`, `objects/` and
/// `indexes/` sub-roots under a configurable root directory.
#[derive(Debug, Clone)]
pub struct SharedCache {
    root: PathBuf,
}

impl SharedCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn libraries_dir(&self) -> PathBuf {
        self.root.clone().joined("libraries")
    }

    pub fn objects_dir(&self) -> PathBuf {
        self.root.clone().joined("objects")
    }

    pub fn indexes_dir(&self) -> PathBuf {
        self.root.clone().joined("indexes")
    }

    /// Path of the object with the given lowercase-hex SHA-1 under `objects/`.
    pub fn object_path(&self, hash: &str) -> PathBuf {
        self.objects_dir().joined(&hash[0..2]).joined(hash)
    }

    /// Path of the maintenance gate stamp file.
    pub fn maintenance_stamp(&self) -> PathBuf {
        self.root.clone().joined(".cache-maintenance.timestamp")
    }
}

/// Usability predicate for a library file: exists, size > 0, matches expected size when
/// given, and opens as a JAR/ZIP if its extension is `.jar`.
pub fn is_usable_library(file: &Path, expected_size: Option<u64>) -> bool {
    let Ok(meta) = std::fs::metadata(file) else { return false };
    if !meta.is_file() || meta.len() == 0 {
        return false;
    }
    if let Some(expected) = expected_size {
        if expected > 0 && meta.len() != expected {
            return false;
        }
    }
    let is_jar = file.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("jar"));
    if is_jar && !path::is_openable_jar(file) {
        return false;
    }
    true
}

/// Usability predicate for an asset object: exists, non-zero declared size, and its
/// content SHA-1 equals its filename.
pub fn is_usable_object(file: &Path, hash: &str, size: u64) -> bool {
    if size == 0 {
        return false;
    }
    let Ok(meta) = std::fs::metadata(file) else { return false };
    if !meta.is_file() || meta.len() != size {
        return false;
    }
    matches!(path::sha1_file_hex(file), Ok(actual) if actual == hash)
}

/// Attempt a hard link first, falling back to a copy. Failure is non-fatal: callers
/// should fall back to writing the instance copy directly.
pub async fn link_or_copy_from_cache(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).await?;
    }
    let _ = fs::remove_file(dst).await;
    match fs::hard_link(src, dst).await {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst).await?;
            Ok(())
        }
    }
}

/// Guards at-most-one concurrent materialization per key by sharding locks on a plain
/// map of keys to per-key async mutexes. Readers never take a lock.
#[derive(Debug, Default)]
struct KeyLocks {
    locks: StdMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl KeyLocks {
    fn get(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap();
        locks.entry(key.to_string()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
    }
}

/// The artifact store itself: holds the shared cache location and the per-key lock map.
#[derive(Debug)]
pub struct Store {
    cache: SharedCache,
    locks: KeyLocks,
}

impl Store {
    pub fn new(cache: SharedCache) -> Self {
        Self { cache, locks: KeyLocks::default() }
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    /// Ensure a library at the maven repo-relative `repo_path` is materialized at
    /// `instance_path`, fetching via `fetch` if neither the instance copy nor the shared
    /// cache hold a usable copy. Returns the materialized instance path.
    pub async fn ensure_library<F, Fut>(
        &self,
        repo_path: &Path,
        instance_path: &Path,
        expected_size: Option<u64>,
        expected_sha1: Option<&str>,
        fetch: F,
        mut handler: impl Handler,
    ) -> Result<PathBuf, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>>,
    {
        let key = repo_path.to_string_lossy().into_owned();

        if is_usable_library(instance_path, expected_size) {
            handler.on_store_event(Event::AlreadyUsable { key: &key });
            return Ok(instance_path.to_path_buf());
        }

        let cache_path = self.cache.libraries_dir().joined(repo_path);
        let lock = self.locks.get(&key);
        let _guard = lock.lock().await;

        // Re-check after acquiring the lock: another task may have materialized it.
        if is_usable_library(instance_path, expected_size) {
            handler.on_store_event(Event::AlreadyUsable { key: &key });
            return Ok(instance_path.to_path_buf());
        }

        if is_usable_library(&cache_path, expected_size) {
            if link_or_copy_from_cache(&cache_path, instance_path).await.is_ok()
                && is_usable_library(instance_path, expected_size)
            {
                handler.on_store_event(Event::LinkedFromCache { key: &key });
                return Ok(instance_path.to_path_buf());
            }
        } else if cache_path.exists() {
            handler.on_store_event(Event::EvictedCorrupt { key: &key });
            let _ = fs::remove_file(&cache_path).await;
        }

        handler.on_store_event(Event::Fetching { key: &key });
        let bytes = fetch().await?;

        if let Some(expected) = expected_size {
            let actual = bytes.len() as u64;
            if expected > 0 && actual != expected {
                return Err(Error::SizeMismatch { key, expected, actual });
            }
        }
        if let Some(expected) = expected_sha1 {
            let actual = path::sha1_hex(&bytes);
            if actual != expected {
                return Err(Error::Sha1Mismatch { key, expected: expected.to_string(), actual });
            }
        }
        let is_jar = cache_path.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("jar"));
        if is_jar {
            let tmp_check = tempfile::NamedTempFile::new().map_err(|e| Error::Io { path: cache_path.clone(), source: e })?;
            std::fs::write(tmp_check.path(), &bytes).map_err(|e| Error::Io { path: cache_path.clone(), source: e })?;
            if !path::is_openable_jar(tmp_check.path()) {
                return Err(Error::BadArchive { key });
            }
        }

        path::atomic_write(&cache_path, &bytes).map_err(|e| Error::Io { path: cache_path.clone(), source: e })?;
        let size = bytes.len() as u64;
        handler.on_store_event(Event::Fetched { key: &key, size });

        link_or_copy_from_cache(&cache_path, instance_path).await
            .map_err(|e| Error::Io { path: instance_path.to_path_buf(), source: e })?;

        Ok(instance_path.to_path_buf())
    }

    /// Ensure an asset object keyed by its lowercase-hex SHA-1 is present in the shared
    /// cache, fetching via `fetch` if absent or corrupt. Returns the cache-relative path.
    pub async fn ensure_object<F, Fut>(
        &self,
        hash: &str,
        size: u64,
        fetch: F,
        mut handler: impl Handler,
    ) -> Result<PathBuf, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, Box<dyn std::error::Error + Send + Sync>>>,
    {
        let object_path = self.cache.object_path(hash);

        if is_usable_object(&object_path, hash, size) {
            handler.on_store_event(Event::AlreadyUsable { key: hash });
            return Ok(object_path);
        }

        let lock = self.locks.get(hash);
        let _guard = lock.lock().await;

        if is_usable_object(&object_path, hash, size) {
            handler.on_store_event(Event::AlreadyUsable { key: hash });
            return Ok(object_path);
        }
        if object_path.exists() {
            handler.on_store_event(Event::EvictedCorrupt { key: hash });
            let _ = fs::remove_file(&object_path).await;
        }

        handler.on_store_event(Event::Fetching { key: hash });
        let bytes = fetch().await?;

        let actual_size = bytes.len() as u64;
        if actual_size != size {
            return Err(Error::SizeMismatch { key: hash.to_string(), expected: size, actual: actual_size });
        }
        let actual_sha1 = path::sha1_hex(&bytes);
        if actual_sha1 != hash {
            return Err(Error::Sha1Mismatch { key: hash.to_string(), expected: hash.to_string(), actual: actual_sha1 });
        }

        path::atomic_write(&object_path, &bytes).map_err(|e| Error::Io { path: object_path.clone(), source: e })?;
        handler.on_store_event(Event::Fetched { key: hash, size: actual_size });

        Ok(object_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_library_fetches_once_then_reuses_cache() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SharedCache::new(tmp.path().join("cache"));
        let store = Store::new(cache);

        let repo_path = Path::new("g/a/v/a-v.txt");
        let instance_a = tmp.path().join("instance-a").join("a-v.txt");
        let instance_b = tmp.path().join("instance-b").join("a-v.txt");

        let fetch_count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let fetch_count_a = fetch_count.clone();

        store.ensure_library(
            repo_path,
            &instance_a,
            Some(5),
            None,
            || {
                let fetch_count = fetch_count_a.clone();
                async move {
                    fetch_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok::<_, Box<dyn std::error::Error + Send + Sync>>(b"hello".to_vec())
                }
            },
            (),
        ).await.unwrap();

        assert_eq!(fs::read_to_string(&instance_a).await.unwrap(), "hello");

        let fetch_count_b = fetch_count.clone();
        store.ensure_library(
            repo_path,
            &instance_b,
            Some(5),
            None,
            || {
                let fetch_count = fetch_count_b.clone();
                async move {
                    fetch_count.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    Ok::<_, Box<dyn std::error::Error + Send + Sync>>(b"hello".to_vec())
                }
            },
            (),
        ).await.unwrap();

        assert_eq!(fetch_count.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(fs::read_to_string(&instance_b).await.unwrap(), "hello");
    }

    #[tokio::test]
    async fn ensure_object_rejects_hash_mismatch() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SharedCache::new(tmp.path().join("cache"));
        let store = Store::new(cache);

        let err = store.ensure_object(
            "0000000000000000000000000000000000000a",
            5,
            || async { Ok::<_, Box<dyn std::error::Error + Send + Sync>>(b"hello".to_vec()) },
            (),
        ).await.unwrap_err();

        assert!(matches!(err, Error::Sha1Mismatch { .. }));
    }
}
