//! Cache Maintenance: a periodic scrub plus reachability GC over the shared cache,
//! gated by an on-disk timestamp so only one process runs it per 12h window.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::path;
use crate::store::{self, SharedCache};

const GATE_INTERVAL: Duration = Duration::from_secs(12 * 3600);
const ASSET_SAMPLE: usize = 160;
const LIBRARY_SAMPLE: usize = 64;
const MAX_DELETIONS: usize = 200_000;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Report {
    pub scrubbed_assets_evicted: usize,
    pub scrubbed_libraries_evicted: usize,
    pub indexes_deleted: usize,
    pub objects_deleted: usize,
    pub dirs_pruned: usize,
}

#[derive(serde::Deserialize)]
struct AssetIndexDoc {
    #[serde(default)]
    objects: std::collections::HashMap<String, AssetIndexObject>,
}

#[derive(serde::Deserialize)]
struct AssetIndexObject {
    hash: String,
}

/// True if the stamp file is missing or older than [`GATE_INTERVAL`]. Contention on the
/// stamp write is advisory: losing the race just means this process skips a cycle.
fn gate_elapsed(stamp: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(stamp) else { return true };
    let Ok(modified) = meta.modified() else { return true };
    SystemTime::now().duration_since(modified).map(|elapsed| elapsed >= GATE_INTERVAL).unwrap_or(true)
}

fn touch_stamp(stamp: &Path) -> std::io::Result<()> {
    path::atomic_write(stamp, &SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs().to_le_bytes())
}

/// Reservoir-sample up to `k` items from a full population, visiting it in one pass.
fn reservoir_sample<T>(items: Vec<T>, k: usize) -> Vec<T> {
    if items.len() <= k {
        return items;
    }
    let mut rng = rand::thread_rng();
    let mut reservoir: Vec<T> = Vec::with_capacity(k);
    let mut iter = items.into_iter();
    for item in iter.by_ref().take(k) {
        reservoir.push(item);
    }
    for (i, item) in iter.enumerate() {
        let j = rng.gen_range(0..=(i + k));
        if j < k {
            reservoir[j] = item;
        }
    }
    reservoir
}

/// Run a maintenance cycle if the 12h gate has elapsed; otherwise returns `None`.
/// `project_version_dirs` lists every project's `.tr/versions` directory, scanned for
/// reachable `assetIndex.id`s during the GC pass.
pub fn run_if_due(cache: &SharedCache, project_version_dirs: &[PathBuf]) -> Result<Option<Report>, Error> {
    let stamp = cache.maintenance_stamp();
    if !gate_elapsed(&stamp) {
        return Ok(None);
    }
    let report = run(cache, project_version_dirs)?;
    let _ = touch_stamp(&stamp);
    Ok(Some(report))
}

/// Run a maintenance cycle unconditionally: sampled scrub, then reachability GC.
pub fn run(cache: &SharedCache, project_version_dirs: &[PathBuf]) -> Result<Report, Error> {
    let mut report = Report::default();
    scrub(cache, &mut report)?;
    gc(cache, project_version_dirs, &mut report)?;
    Ok(report)
}

fn scrub(cache: &SharedCache, report: &mut Report) -> Result<(), Error> {
    let objects_dir = cache.objects_dir();
    let all_objects = path::walk_files(&objects_dir)?;
    for file in reservoir_sample(all_objects, ASSET_SAMPLE) {
        let Some(hash) = file.file_name().and_then(|n| n.to_str()).map(str::to_string) else { continue };
        let Some(size) = path::size_of(&file)? else { continue };
        if !store::is_usable_object(&file, &hash, size) {
            let _ = std::fs::remove_file(&file);
            report.scrubbed_assets_evicted += 1;
        }
    }

    let libraries_dir = cache.libraries_dir();
    let all_jars: Vec<_> = path::walk_files(&libraries_dir)?.into_iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()).is_some_and(|e| e.eq_ignore_ascii_case("jar")))
        .collect();
    for jar in reservoir_sample(all_jars, LIBRARY_SAMPLE) {
        if !store::is_usable_library(&jar, None) {
            let _ = std::fs::remove_file(&jar);
            report.scrubbed_libraries_evicted += 1;
        }
    }

    Ok(())
}

fn gc(cache: &SharedCache, project_version_dirs: &[PathBuf], report: &mut Report) -> Result<(), Error> {
    let mut reachable_index_ids = HashSet::new();
    for versions_dir in project_version_dirs {
        for version_json in path::walk_files(versions_dir)? {
            if version_json.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(Some(bytes)) = path::read_or_null(&version_json) else { continue };
            let Ok(value) = serde_json::from_slice::<serde_json::Value>(&bytes) else { continue };
            if let Some(id) = value.get("assetIndex").and_then(|v| v.get("id")).and_then(|v| v.as_str()) {
                reachable_index_ids.insert(id.to_string());
            }
        }
    }

    let indexes_dir = cache.indexes_dir();
    let mut reachable_hashes = HashSet::new();
    for index_file in path::walk_files(&indexes_dir)? {
        let Some(id) = index_file.file_stem().and_then(|s| s.to_str()) else { continue };
        if !reachable_index_ids.contains(id) {
            if report.indexes_deleted + report.objects_deleted < MAX_DELETIONS {
                let _ = std::fs::remove_file(&index_file);
                report.indexes_deleted += 1;
            }
            continue;
        }
        if let Ok(Some(bytes)) = path::read_or_null(&index_file) {
            if let Ok(doc) = serde_json::from_slice::<AssetIndexDoc>(&bytes) {
                reachable_hashes.extend(doc.objects.into_values().map(|o| o.hash));
            }
        }
    }

    let objects_dir = cache.objects_dir();
    for object_file in path::walk_files(&objects_dir)? {
        if report.indexes_deleted + report.objects_deleted >= MAX_DELETIONS {
            break;
        }
        let Some(name) = object_file.file_name().and_then(|n| n.to_str()) else { continue };
        let looks_like_sha1 = name.len() == 40 && name.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase());
        if !looks_like_sha1 || !reachable_hashes.contains(name) {
            let _ = std::fs::remove_file(&object_file);
            report.objects_deleted += 1;
        }
    }

    prune_empty_dirs(&objects_dir, report);
    Ok(())
}

/// Bottom-up: recurse first, then remove the directory itself if it ended up empty.
fn prune_empty_dirs(dir: &Path, report: &mut Report) {
    let Ok(entries) = std::fs::read_dir(dir) else { return };
    for entry in entries.flatten() {
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            prune_empty_dirs(&entry.path(), report);
        }
    }
    if std::fs::read_dir(dir).map(|mut it| it.next().is_none()).unwrap_or(false) {
        if std::fs::remove_dir(dir).is_ok() {
            report.dirs_pruned += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::PathBufExt;

    #[test]
    fn gate_elapsed_true_when_stamp_missing() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(gate_elapsed(&tmp.path().join("missing.timestamp")));
    }

    #[test]
    fn gate_elapsed_false_right_after_touch() {
        let tmp = tempfile::tempdir().unwrap();
        let stamp = tmp.path().join(".cache-maintenance.timestamp");
        touch_stamp(&stamp).unwrap();
        assert!(!gate_elapsed(&stamp));
    }

    #[test]
    fn reservoir_sample_caps_at_k() {
        let items: Vec<u32> = (0..1000).collect();
        let sample = reservoir_sample(items, 160);
        assert_eq!(sample.len(), 160);
    }

    #[test]
    fn reservoir_sample_passthrough_when_smaller_than_k() {
        let items = vec![1, 2, 3];
        let sample = reservoir_sample(items.clone(), 160);
        assert_eq!(sample, items);
    }

    #[test]
    fn gc_preserves_reachable_index_and_deletes_orphans() {
        let tmp = tempfile::tempdir().unwrap();
        let cache = SharedCache::new(tmp.path().join("cache"));

        let index_path = cache.indexes_dir().joined("8.json");
        path::atomic_write(&index_path, br#"{"objects":{"icons/icon.png":{"hash":"da39a3ee5e6b4b0d3255bfef95601890afd80709","size":0}}}"#).unwrap();

        let reachable_object = cache.object_path("da39a3ee5e6b4b0d3255bfef95601890afd80709");
        path::atomic_write(&reachable_object, b"").unwrap();

        let orphan_object = cache.object_path("abababababababababababababababababababab".get(0..40).unwrap());
        path::atomic_write(&orphan_object, b"orphan").unwrap();

        let versions_dir = tmp.path().join("project").join(".tr").join("versions").join("1.20.1");
        std::fs::create_dir_all(&versions_dir).unwrap();
        std::fs::write(versions_dir.join("1.20.1.json"), br#"{"assetIndex":{"id":"8"}}"#).unwrap();

        let mut report = Report::default();
        gc(&cache, &[tmp.path().join("project").join(".tr").join("versions")], &mut report).unwrap();

        assert!(index_path.exists());
        assert!(reachable_object.exists());
        assert!(!orphan_object.exists());
        assert_eq!(report.objects_deleted, 1);
        assert_eq!(report.indexes_deleted, 0);
    }
}
