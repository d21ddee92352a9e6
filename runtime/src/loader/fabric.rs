//! Fabric-family loader backend: covers Fabric, Quilt, LegacyFabric and Babric, which
//! all expose the same meta API shape and publish a ready-to-merge version patch.

use std::path::PathBuf;
use std::str::FromStr;

use crate::descriptor::{Arguments, Library, RawDescriptor};
use crate::maven::Gav;

use super::{Event, Handler, InstallContext};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] crate::http::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Store(#[from] crate::store::Error),
    #[error("no game version matching {0:?} found on the {1} meta API")]
    GameVersionNotFound(Option<String>, &'static str),
    #[error("no loader version matching {0:?} found for game version {1} on the {2} meta API")]
    LoaderVersionNotFound(Option<String>, String, &'static str),
    #[error("invalid maven coordinate in loader meta response: {0}")]
    InvalidMavenCoordinate(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The different Fabric-like meta APIs supported, each with the same endpoint shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    Fabric,
    Quilt,
    LegacyFabric,
    Babric,
}

impl Flavor {
    fn base_url(self) -> &'static str {
        match self {
            Flavor::Fabric => "https://meta.fabricmc.net/v2",
            Flavor::Quilt => "https://meta.quiltmc.org/v3",
            Flavor::LegacyFabric => "https://meta.legacyfabric.net/v2",
            Flavor::Babric => "https://meta.babric.glass-launcher.net/v2",
        }
    }

    fn name(self) -> &'static str {
        match self {
            Flavor::Fabric => "fabric",
            Flavor::Quilt => "quilt",
            Flavor::LegacyFabric => "legacyfabric",
            Flavor::Babric => "babric",
        }
    }
}

/// A version selector: a pinned name, or a request to resolve the latest stable or
/// unstable (snapshot/beta) version published by the meta API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSelector {
    Stable,
    Unstable,
    Name(String),
}

impl<T: Into<String>> From<T> for VersionSelector {
    fn from(value: T) -> Self {
        Self::Name(value.into())
    }
}

#[derive(serde::Deserialize, Debug)]
struct MetaVersion {
    version: String,
    #[serde(default)]
    stable: Option<bool>,
}

impl MetaVersion {
    fn is_stable(&self) -> bool {
        self.stable.unwrap_or_else(|| !self.version.contains("-beta") && !self.version.contains("-pre"))
    }
}

#[derive(serde::Deserialize, Debug)]
struct MetaGameLoader {
    loader: MetaVersion,
}

/// Shape of `{base_url}/versions/loader/<mcVersion>/<loaderVersion>`: the loader and
/// intermediary maven coordinates plus the library/main-class/arguments merge data.
#[derive(serde::Deserialize, Debug)]
struct LoaderMetaResponse {
    loader: MavenCoordinate,
    intermediary: MavenCoordinate,
    #[serde(rename = "launcherMeta")]
    launcher_meta: LauncherMeta,
}

#[derive(serde::Deserialize, Debug)]
struct MavenCoordinate {
    maven: String,
}

#[derive(serde::Deserialize, Debug)]
struct LauncherMeta {
    libraries: LauncherLibraries,
    #[serde(rename = "mainClass")]
    main_class: MainClass,
    #[serde(default)]
    arguments: Option<Arguments>,
}

#[derive(serde::Deserialize, Debug, Default)]
struct LauncherLibraries {
    #[serde(default)]
    client: Vec<Library>,
    #[serde(default)]
    common: Vec<Library>,
}

#[derive(serde::Deserialize, Debug)]
#[serde(untagged)]
enum MainClass {
    Flat(String),
    PerSide { client: String },
}

impl MainClass {
    fn client(self) -> String {
        match self {
            MainClass::Flat(s) => s,
            MainClass::PerSide { client } => client,
        }
    }
}

/// Build `client ∪ common ∪ {loaderMaven, intermediaryMaven}`, deduplicated by
/// [`Library::identity_key`], giving earlier entries precedence.
fn union_libraries(meta: &LauncherMeta, loader_maven: &str, intermediary_maven: &str) -> Result<Vec<Library>, Error> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::new();

    for lib in meta.libraries.client.iter().chain(meta.libraries.common.iter()).cloned() {
        if seen.insert(lib.identity_key()) {
            out.push(lib);
        }
    }

    for maven in [loader_maven, intermediary_maven] {
        let name = Gav::from_str(maven).map_err(|_| Error::InvalidMavenCoordinate(maven.to_string()))?;
        let lib = Library {
            name,
            downloads: Default::default(),
            natives: None,
            extract: None,
            rules: None,
            url: Some(crate::maven::FABRIC_MAVEN_URL.to_string()),
        };
        if seen.insert(lib.identity_key()) {
            out.push(lib);
        }
    }

    Ok(out)
}

pub struct FabricLoader {
    flavor: Flavor,
    game_version: VersionSelector,
    loader_version: VersionSelector,
    resolved_patch: Option<RawDescriptor>,
}

impl FabricLoader {
    pub fn new(flavor: Flavor, game_version: impl Into<VersionSelector>, loader_version: impl Into<VersionSelector>) -> Self {
        Self { flavor, game_version: game_version.into(), loader_version: loader_version.into(), resolved_patch: None }
    }

    pub fn id(&self) -> &str {
        self.flavor.name()
    }

    pub fn should_strip_minecraft_client_artifacts(&self) -> bool {
        false
    }

    pub fn prepare_launch_classpath(&self, _classpath: &mut Vec<PathBuf>) {
        // Fabric's own libraries are already folded into the merged descriptor's
        // `libraries` list, so the generic classpath builder handles them.
    }

    pub fn prepare_launch_jvm_args(&self, _args: &mut Vec<String>) {}

    pub async fn install(&mut self, ctx: &InstallContext, handler: &mut impl Handler) -> Result<RawDescriptor, Error> {
        handler.on_loader_event(Event::FetchingLoaderMeta { loader: self.flavor.name() });

        let game_version = self.resolve_game_version(ctx).await?;
        let loader_version = self.resolve_loader_version(ctx, &game_version).await?;

        handler.on_loader_event(Event::ResolvedLoaderVersion { loader: self.flavor.name(), version: &loader_version });

        let url = format!("{}/versions/loader/{game_version}/{loader_version}", self.flavor.base_url());
        let bytes = crate::http::get_bytes(&ctx.client, &url, std::time::Duration::from_secs(30), None).await?;
        let response: LoaderMetaResponse = serde_json::from_slice(&bytes)?;

        let libraries = union_libraries(&response.launcher_meta, &response.loader.maven, &response.intermediary.maven)?;

        let patch = RawDescriptor {
            id: Some(format!("{}-{game_version}-{loader_version}", self.flavor.name())),
            main_class: Some(response.launcher_meta.main_class.client()),
            arguments: response.launcher_meta.arguments.clone(),
            libraries,
            ..Default::default()
        };

        super::ensure_libraries_into_ctx(ctx, &patch.libraries).await?;

        let loader_dir = ctx.versions_dir.parent().unwrap_or(&ctx.versions_dir).join("loader").join(self.flavor.name());
        std::fs::create_dir_all(&loader_dir)?;
        std::fs::write(loader_dir.join("launcher-meta.json"), &bytes)?;
        std::fs::write(loader_dir.join("version_patch.json"), serde_json::to_vec_pretty(&patch)?)?;

        self.resolved_patch = Some(patch.clone());
        Ok(patch)
    }

    async fn resolve_game_version(&self, ctx: &InstallContext) -> Result<String, Error> {
        match &self.game_version {
            VersionSelector::Name(name) => Ok(name.clone()),
            VersionSelector::Stable | VersionSelector::Unstable => {
                let stable = matches!(self.game_version, VersionSelector::Stable);
                let url = format!("{}/versions/game", self.flavor.base_url());
                let bytes = crate::http::get_bytes(&ctx.client, &url, std::time::Duration::from_secs(30), None).await?;
                let versions: Vec<MetaVersion> = serde_json::from_slice(&bytes)?;
                versions.into_iter()
                    .find(|v| !stable || v.is_stable())
                    .map(|v| v.version)
                    .ok_or(Error::GameVersionNotFound(None, self.flavor.name()))
            }
        }
    }

    async fn resolve_loader_version(&self, ctx: &InstallContext, game_version: &str) -> Result<String, Error> {
        match &self.loader_version {
            VersionSelector::Name(name) => Ok(name.clone()),
            VersionSelector::Stable | VersionSelector::Unstable => {
                let stable = matches!(self.loader_version, VersionSelector::Stable);
                let url = format!("{}/versions/loader/{game_version}", self.flavor.base_url());
                let bytes = crate::http::get_bytes(&ctx.client, &url, std::time::Duration::from_secs(30), None).await?;
                let versions: Vec<MetaGameLoader> = serde_json::from_slice(&bytes)?;
                versions.into_iter()
                    .map(|v| v.loader)
                    .find(|v| !stable || v.is_stable())
                    .map(|v| v.version)
                    .ok_or_else(|| Error::LoaderVersionNotFound(None, game_version.to_string(), self.flavor.name()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flavor_names() {
        assert_eq!(Flavor::Fabric.name(), "fabric");
        assert_eq!(Flavor::Quilt.name(), "quilt");
        assert_eq!(Flavor::LegacyFabric.name(), "legacyfabric");
        assert_eq!(Flavor::Babric.name(), "babric");
    }

    #[test]
    fn meta_version_is_stable_from_explicit_flag() {
        let v = MetaVersion { version: "1.0.0".to_string(), stable: Some(false) };
        assert!(!v.is_stable());
    }

    #[test]
    fn meta_version_is_stable_inferred_from_name() {
        let stable = MetaVersion { version: "0.15.7".to_string(), stable: None };
        assert!(stable.is_stable());

        let beta = MetaVersion { version: "0.16.0-beta.1".to_string(), stable: None };
        assert!(!beta.is_stable());

        let pre = MetaVersion { version: "1.21-pre1".to_string(), stable: None };
        assert!(!pre.is_stable());
    }

    #[test]
    fn version_selector_from_string() {
        let sel: VersionSelector = "0.15.7".into();
        assert_eq!(sel, VersionSelector::Name("0.15.7".to_string()));
    }

    fn lib(coord: &str) -> Library {
        Library {
            name: Gav::from_str(coord).unwrap(),
            downloads: Default::default(),
            natives: None,
            extract: None,
            rules: None,
            url: None,
        }
    }

    #[test]
    fn union_libraries_merges_client_common_and_maven_coords_deduped() {
        let meta = LauncherMeta {
            libraries: LauncherLibraries {
                client: vec![lib("net.fabricmc:fabric-loader:0.15.7")],
                common: vec![lib("org.ow2.asm:asm:9.6"), lib("net.fabricmc:fabric-loader:0.15.7")],
            },
            main_class: MainClass::Flat("net.fabricmc.loader.impl.launch.knot.KnotClient".to_string()),
            arguments: None,
        };

        let libs = union_libraries(&meta, "net.fabricmc:fabric-loader:0.15.7", "net.fabricmc:intermediary:1.20.4").unwrap();

        let keys: Vec<_> = libs.iter().map(Library::identity_key).collect();
        assert_eq!(keys, vec![
            "net.fabricmc:fabric-loader".to_string(),
            "org.ow2.asm:asm".to_string(),
            "net.fabricmc:intermediary".to_string(),
        ]);
    }

    #[test]
    fn main_class_accepts_flat_string_or_per_side_object() {
        let flat: MainClass = serde_json::from_str("\"a.b.C\"").unwrap();
        assert_eq!(flat.client(), "a.b.C");

        let per_side: MainClass = serde_json::from_str(r#"{"client":"a.b.Client","server":"a.b.Server"}"#).unwrap();
        assert_eq!(per_side.client(), "a.b.Client");
    }
}
