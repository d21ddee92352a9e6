//! Vanilla Provisioner: downloads the version JSON, client jar, libraries, native
//! classifiers, logging config and assets for a single Minecraft version.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Client;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::descriptor::{self, RawDescriptor};
use crate::path::{self, PathBufExt};
use crate::store::{self, SharedCache, Store};

pub const VERSION_MANIFEST_URL: &str = "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

crate::trait_event_handler! {
    pub trait Handler: store::Handler {
        fn on_vanilla_event(event: Event<'_>);
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum Event<'a> {
    FetchingManifest,
    FetchingVersionJson { version: &'a str },
    EnsuringLibraries { total: usize },
    EnsuringAssets { total: usize },
    ExtractingNatives { version: &'a str },
    AssetsRetrying { concurrency: usize, failures: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] crate::http::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Descriptor(#[from] descriptor::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown minecraft version: {0}")]
    UnknownVersion(String),
    #[error("asset provisioning failed for {failed} of {total} objects after retry, sample hashes: {sample:?}")]
    PartialAssetFailure { failed: usize, total: usize, sample: Vec<String> },
}

#[derive(serde::Deserialize, Debug)]
struct VersionManifest {
    versions: Vec<VersionManifestEntry>,
}

#[derive(serde::Deserialize, Debug)]
struct VersionManifestEntry {
    id: String,
    url: String,
}

#[derive(serde::Deserialize, Debug)]
struct AssetIndexDoc {
    #[serde(default)]
    objects: std::collections::HashMap<String, AssetIndexObject>,
}

#[derive(serde::Deserialize, Debug)]
struct AssetIndexObject {
    hash: String,
    size: u64,
}

/// Compute the bounded library-fetch concurrency per spec §4.6: `clamp(cores*4, 8,
/// min(targetByTotal, 24))`, where `targetByTotal` steps with the total library count.
pub fn library_concurrency(total: usize) -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let target_by_total = if total < 600 { 14 } else if total < 1200 { 16 } else { 24 };
    (cores * 4).clamp(8, target_by_total.min(24))
}

/// Compute the bounded asset-fetch concurrency per spec §4.6: `clamp(cores*5, 16,
/// min(targetByTotal, 64))`.
pub fn asset_concurrency(total: usize) -> usize {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
    let target_by_total = if total < 3000 { 32 } else if total < 6000 { 48 } else if total < 10000 { 56 } else { 64 };
    (cores * 5).clamp(16, target_by_total.min(64))
}

/// Provisions a single vanilla Minecraft version into an instance's `.tr/` subtree,
/// using the shared [`Store`] for every artifact.
pub struct VanillaProvisioner {
    client: Client,
    store: Arc<Store>,
    target_dir: PathBuf,
    mc_version: String,
}

impl VanillaProvisioner {
    pub fn new(client: Client, store: Arc<Store>, target_dir: impl Into<PathBuf>, mc_version: impl Into<String>) -> Self {
        Self { client, store, target_dir: target_dir.into(), mc_version: mc_version.into() }
    }

    fn versions_dir(&self) -> PathBuf {
        self.target_dir.clone().joined(".tr").joined("versions").joined(&self.mc_version)
    }

    fn libraries_dir(&self) -> PathBuf {
        self.target_dir.clone().joined(".tr").joined("libraries")
    }

    fn natives_dir(&self) -> PathBuf {
        self.target_dir.clone().joined(".tr").joined("natives").joined(&self.mc_version)
    }

    fn log_configs_dir(&self) -> PathBuf {
        self.target_dir.clone().joined(".tr").joined("log_configs")
    }

    fn assets_dir(&self) -> PathBuf {
        self.target_dir.clone().joined(".tr").joined("assets")
    }

    /// Ensure the version JSON, client jar, libraries, natives, logging config and
    /// assets are all present, running the independent fan-outs concurrently. Returns
    /// the parsed descriptor for merging with a loader patch.
    pub async fn ensure(&self, mut handler: impl Handler) -> Result<RawDescriptor, Error> {
        handler.on_vanilla_event(Event::FetchingManifest);
        let version_json_path = self.versions_dir().joined(format!("{}.json", self.mc_version));

        let descriptor_bytes = if let Some(cached) = path::read_or_null(&version_json_path)? {
            cached
        } else {
            handler.on_vanilla_event(Event::FetchingVersionJson { version: &self.mc_version });
            let manifest_bytes = crate::http::get_bytes(&self.client, VERSION_MANIFEST_URL, std::time::Duration::from_secs(30), None).await?;
            let manifest: VersionManifest = serde_json::from_slice(&manifest_bytes)?;
            let entry = manifest.versions.iter()
                .find(|v| v.id == self.mc_version)
                .ok_or_else(|| Error::UnknownVersion(self.mc_version.clone()))?;
            let bytes = crate::http::get_bytes(&self.client, &entry.url, std::time::Duration::from_secs(30), None).await?;
            path::atomic_write(&version_json_path, &bytes)?;
            bytes
        };

        let descriptor: RawDescriptor = serde_json::from_slice(&descriptor_bytes)?;

        let (libraries_res, client_jar_res, assets_res, logging_res) = tokio::join!(
            self.ensure_libraries(&descriptor, &mut handler),
            self.ensure_client_jar(&descriptor),
            self.ensure_assets(&descriptor, &mut handler),
            self.ensure_logging(&descriptor),
        );
        libraries_res?;
        client_jar_res?;
        assets_res?;
        logging_res?;

        self.extract_natives(&descriptor, &mut handler).await?;
        self.link_shared_assets(&descriptor)?;

        Ok(descriptor)
    }

    async fn ensure_client_jar(&self, descriptor: &RawDescriptor) -> Result<(), Error> {
        let Some(download) = descriptor.downloads.get("client") else { return Ok(()) };
        let instance_path = self.versions_dir().joined(format!("{}.jar", self.mc_version));
        let repo_path = PathBuf::from("net").joined("minecraft").joined("client").joined(&self.mc_version)
            .joined(format!("client-{}.jar", self.mc_version));
        let url = download.url.clone();
        let client = self.client.clone();
        let expected_size = download.size.map(|s| s as u64);
        let expected_sha1 = download.sha1.as_ref().map(|s| s.to_hex());
        self.store.ensure_library(
            &repo_path,
            &instance_path,
            expected_size,
            expected_sha1.as_deref(),
            move || async move {
                crate::http::get_bytes(&client, &url, std::time::Duration::from_secs(60), expected_size.map(|s| s as u32))
                    .await
                    .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
            },
            (),
        ).await?;
        Ok(())
    }

    async fn ensure_libraries(&self, descriptor: &RawDescriptor, handler: &mut impl Handler) -> Result<(), Error> {
        let applicable: Vec<_> = descriptor.libraries.iter()
            .filter(|lib| lib.rules.as_ref().is_none_or(|rules| descriptor::rules_allow(rules, &HashSet::new())))
            .cloned()
            .collect();

        handler.on_vanilla_event(Event::EnsuringLibraries { total: applicable.len() });

        ensure_libraries_into(self.store.clone(), self.client.clone(), &applicable, &self.libraries_dir()).await?;
        Ok(())
    }

    async fn ensure_logging(&self, descriptor: &RawDescriptor) -> Result<(), Error> {
        for logging in descriptor.logging.values() {
            let instance_path = self.log_configs_dir().joined(&logging.file.id);
            let repo_path = PathBuf::from("log_configs").joined(&logging.file.id);
            let url = logging.file.download.url.clone();
            let client = self.client.clone();
            let expected_size = logging.file.download.size.map(|s| s as u64);
            let expected_sha1 = logging.file.download.sha1.as_ref().map(|s| s.to_hex());
            self.store.ensure_library(
                &repo_path,
                &instance_path,
                expected_size,
                expected_sha1.as_deref(),
                move || async move {
                    crate::http::get_bytes(&client, &url, std::time::Duration::from_secs(30), expected_size.map(|s| s as u32))
                        .await
                        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
                },
                (),
            ).await?;
        }
        Ok(())
    }

    async fn ensure_assets(&self, descriptor: &RawDescriptor, handler: &mut impl Handler) -> Result<(), Error> {
        let Some(asset_index) = &descriptor.asset_index else { return Ok(()) };

        let index_path = self.store.cache().indexes_dir().joined(format!("{}.json", asset_index.id));
        let client = self.client.clone();
        let url = asset_index.download.url.clone();
        let expected_size = asset_index.download.size;
        let expected_sha1 = asset_index.download.sha1.as_ref().map(|s| s.to_hex());

        if !path_is_verified(&index_path, expected_size.map(|s| s as u64), expected_sha1.as_deref()) {
            let bytes = crate::http::get_bytes(&client, &url, std::time::Duration::from_secs(30), expected_size).await?;
            path::atomic_write(&index_path, &bytes)?;
        }

        let index_bytes = std::fs::read(&index_path)?;
        let index: AssetIndexDoc = serde_json::from_slice(&index_bytes)?;

        handler.on_vanilla_event(Event::EnsuringAssets { total: index.objects.len() });

        let failures = self.ensure_asset_objects(&index, asset_concurrency(index.objects.len())).await;

        if !failures.is_empty() {
            handler.on_vanilla_event(Event::AssetsRetrying { concurrency: 8, failures: failures.len() });
            let retry_index = AssetIndexDoc {
                objects: index.objects.iter()
                    .filter(|(name, _)| failures.contains(name))
                    .map(|(k, v)| (k.clone(), AssetIndexObject { hash: v.hash.clone(), size: v.size }))
                    .collect(),
            };
            let still_failed = self.ensure_asset_objects(&retry_index, 8).await;
            if !still_failed.is_empty() {
                let sample = still_failed.iter().take(8).cloned().collect();
                return Err(Error::PartialAssetFailure { failed: still_failed.len(), total: index.objects.len(), sample });
            }
        }

        Ok(())
    }

    async fn ensure_asset_objects(&self, index: &AssetIndexDoc, concurrency: usize) -> Vec<String> {
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut tasks = JoinSet::new();

        for (name, obj) in &index.objects {
            let permit_sem = semaphore.clone();
            let store = self.store.clone();
            let client = self.client.clone();
            let name = name.clone();
            let hash = obj.hash.clone();
            let size = obj.size;

            tasks.spawn(async move {
                let _permit = permit_sem.acquire_owned().await.unwrap();
                let url = format!("https://resources.download.minecraft.net/{}/{}", &hash[0..2], hash);
                let res = store.ensure_object(
                    &hash,
                    size,
                    move || async move {
                        crate::http::get_bytes(&client, &url, std::time::Duration::from_secs(30), Some(size as u32))
                            .await
                            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
                    },
                    (),
                ).await;
                (name, res)
            });
        }

        let mut failures = Vec::new();
        while let Some(res) = tasks.join_next().await {
            let (name, res) = res.expect("asset task panicked");
            if res.is_err() {
                failures.push(name);
            }
        }
        failures
    }

    async fn extract_natives(&self, descriptor: &RawDescriptor, handler: &mut impl Handler) -> Result<(), Error> {
        let natives_libs: Vec<_> = descriptor.libraries.iter()
            .filter(|lib| lib.natives.is_some())
            .filter(|lib| lib.rules.as_ref().is_none_or(|rules| descriptor::rules_allow(rules, &HashSet::new())))
            .collect();

        if natives_libs.is_empty() {
            return Ok(());
        }

        handler.on_vanilla_event(Event::ExtractingNatives { version: &self.mc_version });
        let natives_dir = self.natives_dir();
        std::fs::create_dir_all(&natives_dir)?;

        for lib in natives_libs {
            let Some(classifier) = lib.native_classifier_for_current_os() else { continue };
            let Some(download) = lib.downloads.classifiers.get(&classifier) else { continue };

            let jar_path = self.libraries_dir().joined(lib.name.with_classifier(Some(&classifier)).unwrap_or_else(|| lib.name.clone()).file());
            let bytes = crate::http::get_bytes(&self.client, &download.download.url, std::time::Duration::from_secs(60), download.download.size).await?;
            path::atomic_write(&jar_path, &bytes)?;

            let exclude = lib.extract.as_ref().map(|e| e.exclude.as_slice()).unwrap_or(&[]);
            extract_natives_jar(&jar_path, &natives_dir, exclude)?;
        }

        Ok(())
    }

    fn link_shared_assets(&self, _descriptor: &RawDescriptor) -> Result<(), Error> {
        let assets_dir = self.assets_dir();
        if assets_dir.exists() {
            return Ok(());
        }
        if let Some(parent) = assets_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let shared_assets = self.store.cache().root().to_path_buf();
        match symlink(&shared_assets, &assets_dir) {
            Ok(()) => Ok(()),
            Err(_) => {
                std::fs::create_dir_all(&assets_dir)?;
                Ok(())
            }
        }
    }
}

/// Materialize every library in `libraries` into `libraries_dir` through `store`,
/// bounded by [`library_concurrency`]. Shared between the vanilla provisioner and the
/// loader backends, whose patch descriptors carry their own extra libraries.
pub(crate) async fn ensure_libraries_into(
    store: Arc<Store>,
    client: Client,
    libraries: &[descriptor::Library],
    libraries_dir: &Path,
) -> Result<(), store::Error> {
    let concurrency = library_concurrency(libraries.len());
    let semaphore = Arc::new(Semaphore::new(concurrency));
    let mut tasks = JoinSet::new();

    for lib in libraries {
        let permit_sem = semaphore.clone();
        let store = store.clone();
        let client = client.clone();
        let libraries_dir = libraries_dir.to_path_buf();
        let lib = lib.clone();

        tasks.spawn(async move {
            let _permit = permit_sem.acquire_owned().await.unwrap();

            let (repo_path, url, expected_size, expected_sha1) = if let Some(artifact) = &lib.downloads.artifact {
                let repo_path = artifact.path.as_ref().map(PathBuf::from).unwrap_or_else(|| lib.name.file());
                (repo_path, artifact.download.url.clone(), artifact.download.size.map(|s| s as u64), artifact.download.sha1.as_ref().map(|s| s.to_hex()))
            } else {
                let repo_path = lib.name.file();
                let base_url = lib.url.clone().unwrap_or_else(|| crate::maven::MOJANG_LIBRARIES_URL.to_string());
                let url = format!("{base_url}{}", lib.name.url());
                (repo_path, url, None, None)
            };

            let instance_path = libraries_dir.clone().joined(&repo_path);

            store.ensure_library(
                &repo_path,
                &instance_path,
                expected_size,
                expected_sha1.as_deref(),
                move || async move {
                    crate::http::get_bytes(&client, &url, std::time::Duration::from_secs(60), expected_size.map(|s| s as u32))
                        .await
                        .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
                },
                (),
            ).await
        });
    }

    while let Some(res) = tasks.join_next().await {
        res.expect("library task panicked")?;
    }

    Ok(())
}

fn path_is_verified(file: &Path, expected_size: Option<u64>, expected_sha1: Option<&str>) -> bool {
    let Ok(Some(meta_len)) = path::size_of(file) else { return false };
    if let Some(expected) = expected_size {
        if meta_len != expected {
            return false;
        }
    }
    if let Some(expected) = expected_sha1 {
        return matches!(path::sha1_file_hex(file), Ok(actual) if actual == expected);
    }
    meta_len > 0
}

#[cfg(unix)]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(src, dst)
}

#[cfg(windows)]
fn symlink(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_dir(src, dst)
}

/// Extract every entry of a native classifier jar into `dest`, skipping entries whose
/// name starts with one of the `exclude` prefixes.
fn extract_natives_jar(jar_path: &Path, dest: &Path, exclude: &[String]) -> Result<(), Error> {
    let file = std::fs::File::open(jar_path)?;
    let mut zip = zip::ZipArchive::new(file).map_err(|e| std::io::Error::other(e.to_string()))?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).map_err(|e| std::io::Error::other(e.to_string()))?;
        let name = entry.name().to_string();
        if name.ends_with('/') {
            continue;
        }
        if exclude.iter().any(|prefix| name.starts_with(prefix.as_str())) {
            continue;
        }
        let out_path = dest.joined(&name);
        if let Some(parent) = out_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = std::fs::File::create(&out_path)?;
        std::io::copy(&mut entry, &mut out)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn library_concurrency_respects_bounds() {
        assert!(library_concurrency(100) >= 8);
        assert!(library_concurrency(100) <= 24);
        assert!(library_concurrency(5000) <= 24);
    }

    #[test]
    fn asset_concurrency_respects_bounds() {
        assert!(asset_concurrency(100) >= 16);
        assert!(asset_concurrency(100) <= 64);
        assert!(asset_concurrency(20000) <= 64);
    }
}
