//! Loader Provisioner: fetches and installs mod loader version patches (Fabric-family
//! metadata merge, NeoForge installer-processor execution) on top of a vanilla version.

pub mod fabric;
pub mod neoforge;

use std::path::{Path, PathBuf};

use crate::descriptor::RawDescriptor;
use crate::store::Store;
use std::sync::Arc;

crate::trait_event_handler! {
    pub trait Handler: crate::store::Handler {
        fn on_loader_event(event: Event<'_>);
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum Event<'a> {
    FetchingLoaderMeta { loader: &'a str },
    ResolvedLoaderVersion { loader: &'a str, version: &'a str },
    RunningProcessor { task: &'a str, index: usize, total: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Fabric(#[from] fabric::Error),
    #[error(transparent)]
    NeoForge(#[from] neoforge::Error),
}

/// Everything a loader provisioner needs to install itself into an instance: the
/// target Minecraft version, the directories to write into, and the shared store.
pub struct InstallContext {
    pub mc_version: String,
    pub versions_dir: PathBuf,
    pub libraries_dir: PathBuf,
    pub store: Arc<Store>,
    pub client: reqwest::Client,
}

/// The capability every supported loader exposes, regardless of how it installs
/// itself: a version patch to merge onto the vanilla descriptor, classpath/JVM-arg
/// contributions, and whether the vanilla client jar should be excluded from the
/// classpath (loaders that produce their own merged/patched client jar set this).
pub enum Loader {
    Fabric(fabric::FabricLoader),
    NeoForge(neoforge::NeoForgeLoader),
}

impl Loader {
    pub fn id(&self) -> &str {
        match self {
            Loader::Fabric(l) => l.id(),
            Loader::NeoForge(l) => l.id(),
        }
    }

    pub async fn install(&mut self, ctx: &InstallContext, mut handler: impl Handler) -> Result<RawDescriptor, Error> {
        match self {
            Loader::Fabric(l) => Ok(l.install(ctx, &mut handler).await?),
            Loader::NeoForge(l) => Ok(l.install(ctx, &mut handler).await?),
        }
    }

    pub fn prepare_launch_classpath(&self, classpath: &mut Vec<PathBuf>) {
        match self {
            Loader::Fabric(l) => l.prepare_launch_classpath(classpath),
            Loader::NeoForge(l) => l.prepare_launch_classpath(classpath),
        }
    }

    pub fn prepare_launch_jvm_args(&self, args: &mut Vec<String>) {
        match self {
            Loader::Fabric(l) => l.prepare_launch_jvm_args(args),
            Loader::NeoForge(l) => l.prepare_launch_jvm_args(args),
        }
    }

    pub fn should_strip_minecraft_client_artifacts(&self) -> bool {
        match self {
            Loader::Fabric(l) => l.should_strip_minecraft_client_artifacts(),
            Loader::NeoForge(l) => l.should_strip_minecraft_client_artifacts(),
        }
    }
}

/// Shared helper: a repo-relative library path joined onto a libraries root, used by
/// both loader backends when building classpaths from `install_profile.json`/meta
/// library lists.
pub(crate) fn library_instance_path(libraries_dir: &Path, repo_path: &Path) -> PathBuf {
    use crate::path::PathBufExt;
    libraries_dir.to_path_buf().joined(repo_path)
}

/// Rule-filter then materialize a loader patch's own libraries through the shared
/// store, reusing the vanilla provisioner's bounded-concurrency fetch logic.
pub(crate) async fn ensure_libraries_into_ctx(ctx: &InstallContext, libraries: &[crate::descriptor::Library]) -> Result<(), crate::store::Error> {
    let applicable: Vec<_> = libraries.iter()
        .filter(|lib| lib.rules.as_ref().is_none_or(|rules| crate::descriptor::rules_allow(rules, &std::collections::HashSet::new())))
        .cloned()
        .collect();
    crate::vanilla::ensure_libraries_into(ctx.store.clone(), ctx.client.clone(), &applicable, &ctx.libraries_dir).await
}
