//! Tritium's runtime provisioning and launch core: fetches, verifies, caches and links
//! Minecraft and modloader artifacts, merges version descriptors, and composes and
//! tracks the game process.

#![deny(unsafe_op_in_unsafe_fn)]

mod path;
mod http;
mod tokio;
mod serde;

pub mod maven;
pub mod store;
pub mod descriptor;
pub mod vanilla;
pub mod loader;
pub mod maintenance;
pub mod launch;
pub mod process;
pub mod companion;

use std::path::PathBuf;
use std::sync::Arc;

use ::tokio::process::Command;

use store::{SharedCache, Store};

/// Internal module used for sealing traits and their methods with a sealed token.
#[allow(unused)]
mod sealed {

    /// Internal sealed trait that be extended from by traits to be sealed.
    pub trait Sealed {  }

    /// A token type that can be added as a parameter on a function on a non-sealed trait
    /// to make this particular function sealed and not callable nor implementable by
    /// external crates.
    pub struct Token;

}


/// This macro help defining an event handler trait, this macro automatically implements
/// the trait for any `&mut impl Self`, every function has a default empty body so that
/// any addition of method is backward compatible and valid for minor version increment.
macro_rules! trait_event_handler {
    (
        $( #[ $meta:meta ] )*
        $vis:vis trait $name:ident $( : $( $super:path ),+ $(,)? )? {
            $(
                $( #[ $func_meta:meta ] )*
                fn $func:ident ( $( $arg:ident : $arg_ty:ty ),* $(,)? )
                $( -> $ret_ty:ty = $ret_default:expr )?;
            )*
        }
    ) => {

        $( #[ $meta ] )*
        $vis trait $name $( : $( $super ),+ )? {

            /// This special handler function can be used to provide a fallback for every
            /// function that is not implemented by the implementor.
            ///
            /// This function is exposed in the public API but it's unsure if it will be
            /// implemented as-is in the future, so it cannot be implemented nor called
            /// by external crates thanks to a "sealed" token type.
            #[doc(hidden)]
            #[inline(always)]
            fn __internal_fallback(&mut self, _token: $crate::sealed::Token) -> Option<&mut dyn $name> {
                None
            }

            $(
                $( #[ $func_meta ] )*
                fn $func ( &mut self $( , $arg : $arg_ty )* ) $( -> $ret_ty )? {
                    // We expect the fallback call to be inlined every time because the
                    // default functions are statically known, and for the dynamic
                    // dispatch implementation with '&mut dyn H' (below) all functions
                    // are defined to just forward the call, so the fallback function is
                    // never used.
                    if let Some(fallback) = $name::__internal_fallback(self, $crate::sealed::Token) {
                        $name::$func( fallback $(, $arg)* )
                    } else {
                        $( $ret_default )?
                    }
                }
            )*

        }

        impl $name for () {  }

        impl<H: $name + ?Sized> $name for &'_ mut H {
            $(
                fn $func ( &mut self $( , $arg : $arg_ty )* ) $( -> $ret_ty )? {
                    $name::$func( &mut **self $(, $arg)* )
                }
            )*
        }

        // Implementation for tuples, calling both handlers each time.
        impl<H0: $name, H1: $name> $name for (H0, H1) {
            $(
                fn $func ( &mut self $( , $arg : $arg_ty )* ) $( -> $ret_ty )? {
                    $name::$func( &mut self.0 $(, $arg)* );
                    $name::$func( &mut self.1 $(, $arg)* )  // We only keep last value.
                }
            )*
        }

    };
}

pub(crate) use trait_event_handler;

/// Aggregates every module's error type behind one top-level error, as returned by the
/// `prepareRuntime`/`launch`/`killGameProcess` entry points named in the external
/// interfaces component.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Vanilla(#[from] vanilla::Error),
    #[error(transparent)]
    Loader(#[from] loader::Error),
    #[error(transparent)]
    Descriptor(#[from] descriptor::Error),
    #[error(transparent)]
    Launch(#[from] launch::Error),
    #[error(transparent)]
    Process(#[from] process::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Which mod loader, if any, an instance requests on top of vanilla.
#[derive(Debug, Clone)]
pub enum LoaderRequest {
    None,
    Fabric(loader::fabric::Flavor, loader::fabric::VersionSelector, loader::fabric::VersionSelector),
    NeoForge(String),
}

/// Everything identifying one instance: the project directory, the shared cache, and
/// which Minecraft version and loader it targets.
pub struct Project {
    pub target_dir: PathBuf,
    pub mc_version: String,
    pub loader: LoaderRequest,
}

/// Compute the merged descriptor's id, as defined in the glossary: `"<mcVersion>"` for
/// vanilla, `"<mcVersion>-<loaderId>-<loaderVersion>"` once a loader patch is merged.
fn merged_id(mc_version: &str, loader_id: Option<&str>, loader_version: Option<&str>) -> String {
    match (loader_id, loader_version) {
        (Some(id), Some(version)) => format!("{mc_version}-{id}-{version}"),
        _ => mc_version.to_string(),
    }
}

/// Fetch, verify and merge everything an instance needs to launch: the vanilla
/// descriptor and artifacts, then the loader patch and its own artifacts if requested.
/// Returns the merged, launch-ready descriptor alongside the installed loader (if
/// any), which a caller must keep around to pass into [`launch::LaunchRequest`] when
/// composing the launch plan.
pub async fn prepare_runtime(
    client: reqwest::Client,
    store: Arc<Store>,
    project: &Project,
    mut vanilla_handler: impl vanilla::Handler,
    mut loader_handler: impl loader::Handler,
) -> Result<(descriptor::Descriptor, Option<loader::Loader>), Error> {
    let vanilla_provisioner = vanilla::VanillaProvisioner::new(client.clone(), store.clone(), &project.target_dir, &project.mc_version);
    let base = vanilla_provisioner.ensure(&mut vanilla_handler).await?;

    let versions_dir = project.target_dir.join(".tr").join("versions");
    let libraries_dir = project.target_dir.join(".tr").join("libraries");

    let mut loader = match &project.loader {
        LoaderRequest::None => None,
        LoaderRequest::Fabric(flavor, game_version, loader_version) => {
            Some(loader::Loader::Fabric(loader::fabric::FabricLoader::new(*flavor, game_version.clone(), loader_version.clone())))
        }
        LoaderRequest::NeoForge(version) => {
            let java_bin = find_java_for_installer(&project.mc_version)?;
            Some(loader::Loader::NeoForge(loader::neoforge::NeoForgeLoader::new(version.clone(), java_bin)))
        }
    };

    let patch = if let Some(loader) = &mut loader {
        let ctx = loader::InstallContext {
            mc_version: project.mc_version.clone(),
            versions_dir,
            libraries_dir,
            store: store.clone(),
            client: client.clone(),
        };
        Some(loader.install(&ctx, &mut loader_handler).await?)
    } else {
        None
    };

    let loader_version = patch.as_ref().and_then(|p| p.id.clone());
    let loader_id = loader.as_ref().map(|l| l.id().to_string());
    let merged_id = merged_id(&project.mc_version, loader_id.as_deref(), loader_version.as_deref());

    let empty_patch = descriptor::RawDescriptor::default();
    let descriptor = descriptor::merge(&base, patch.as_ref().unwrap_or(&empty_patch), &merged_id)?;

    Ok((descriptor, loader))
}

fn find_java_for_installer(mc_version: &str) -> Result<PathBuf, Error> {
    launch::resolve_java(mc_version, None).map_err(Error::from)
}

/// Spawn the game process from a composed [`launch::LaunchPlan`] and register it with
/// the process manager under the project's scope.
pub async fn launch(
    processes: &process::ProcessManager,
    project: &Project,
    plan: &launch::LaunchPlan,
    listener: Option<process::ExitListener>,
    handler: impl process::Handler,
) -> Result<u32, Error> {
    let scope = process::ProcessManager::scope_of(&project.target_dir);

    let mut command = Command::new(&plan.java_bin);
    command
        .args(&plan.jvm_args)
        .arg(&plan.main_class)
        .args(&plan.game_args)
        .current_dir(&plan.working_dir);
    for (key, value) in &plan.env {
        command.env(key, value);
    }

    let child = command.spawn()?;
    let pid = processes.attach_launched(scope, child, listener, handler).await;
    Ok(pid)
}

/// Stop the tracked process at `project`'s scope via the companion-bridge graceful
/// sequence, falling back to a force-kill.
pub async fn kill_game_process(
    processes: &process::ProcessManager,
    project: &Project,
    bridge: Option<&dyn companion::CompanionBridge>,
    force: bool,
    handler: impl process::Handler,
) -> Result<(), Error> {
    let scope = process::ProcessManager::scope_of(&project.target_dir);
    companion::stop_game(processes, &scope, bridge, force, handler).await.map_err(Error::from)
}

pub fn default_shared_cache() -> SharedCache {
    let root = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir).join("tritium").join("cache");
    SharedCache::new(root)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merged_id_vanilla_only() {
        assert_eq!(merged_id("1.20.1", None, None), "1.20.1");
    }

    #[test]
    fn merged_id_with_loader() {
        assert_eq!(merged_id("1.20.1", Some("fabric"), Some("0.15.7")), "1.20.1-fabric-0.15.7");
    }
}
