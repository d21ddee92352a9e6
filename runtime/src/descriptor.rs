//! Version Descriptor Model: JSON schema for vanilla/loader version files, OS/feature
//! rule evaluation, and the base ⊕ patch merge that produces a launch-ready descriptor.

use std::collections::HashMap;
use std::fmt;

use indexmap::IndexMap;

use crate::maven::Gav;
use crate::serde::HexString;

/// A download reference: URL plus optional size/sha1 used for verification.
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
pub struct Download {
    pub url: String,
    pub size: Option<u32>,
    pub sha1: Option<HexString<20>>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AssetIndexRef {
    pub id: String,
    #[serde(flatten)]
    pub download: Download,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct LibraryDownloads {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<LibraryDownload>,
    #[serde(default)]
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub classifiers: HashMap<String, LibraryDownload>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LibraryDownload {
    pub path: Option<String>,
    #[serde(flatten)]
    pub download: Download,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Extract {
    #[serde(default)]
    pub exclude: Vec<String>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Library {
    pub name: Gav,
    #[serde(default)]
    #[serde(skip_serializing_if = "LibraryDownloads::is_empty")]
    pub downloads: LibraryDownloads,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub natives: Option<HashMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extract: Option<Extract>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules: Option<Vec<Rule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl LibraryDownloads {
    fn is_empty(&self) -> bool {
        self.artifact.is_none() && self.classifiers.is_empty()
    }
}

impl Library {
    /// Identity key used for cross-descriptor deduplication: `group:artifact[:classifier]`.
    pub fn identity_key(&self) -> String {
        match self.name.classifier() {
            Some(classifier) => format!("{}:{}:{classifier}", self.name.group(), self.name.artifact()),
            None => format!("{}:{}", self.name.group(), self.name.artifact()),
        }
    }

    /// Return the classifier key to use for native extraction on the current platform,
    /// with `${arch}` substituted by `"64"`/`"32"`.
    pub fn native_classifier_for_current_os(&self) -> Option<String> {
        let natives = self.natives.as_ref()?;
        let name = os_name()?;
        let template = natives.get(name)?;
        let bits = if os_is_64_bit() { "64" } else { "32" };
        Some(template.replace("${arch}", bits))
    }
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum Argument {
    Raw(String),
    Conditional(ConditionalArgument),
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ConditionalArgument {
    pub value: SingleOrVec<String>,
    pub rules: Option<Vec<Rule>>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum SingleOrVec<T> {
    Single(T),
    Vec(Vec<T>),
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Arguments {
    #[serde(default)]
    pub game: Vec<Argument>,
    #[serde(default)]
    pub jvm: Vec<Argument>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub action: RuleAction,
    #[serde(default)]
    pub os: RuleOs,
    #[serde(default)]
    pub features: HashMap<String, bool>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RuleOs {
    pub name: Option<String>,
    pub arch: Option<String>,
    pub version: Option<crate::serde::RegexString>,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuleAction {
    Allow,
    Disallow,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Logging {
    #[serde(default)]
    pub r#type: String,
    pub argument: String,
    pub file: LoggingFile,
}

#[derive(serde::Deserialize, serde::Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct LoggingFile {
    pub id: String,
    #[serde(flatten)]
    pub download: Download,
}

/// Raw, partially-populated descriptor as parsed from a vanilla version JSON or a
/// loader version patch. Unknown JSON keys are ignored (`#[serde(default)]` fields plus
/// the absence of `deny_unknown_fields`).
#[derive(serde::Deserialize, serde::Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct RawDescriptor {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub main_class: Option<String>,
    #[serde(default)]
    pub arguments: Option<Arguments>,
    #[serde(default)]
    #[serde(rename = "minecraftArguments")]
    pub legacy_arguments: Option<String>,
    #[serde(default)]
    pub libraries: Vec<Library>,
    #[serde(default)]
    pub asset_index: Option<AssetIndexRef>,
    #[serde(default)]
    pub assets: Option<String>,
    #[serde(default)]
    pub downloads: HashMap<String, Download>,
    #[serde(default)]
    pub logging: HashMap<String, Logging>,
}

/// A fully merged, launch-ready descriptor: `id` equals the instance's `mergedId` and
/// libraries are deduplicated by [`Library::identity_key`].
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub id: String,
    pub main_class: String,
    pub arguments: Arguments,
    pub libraries: IndexMap<String, Library>,
    pub asset_index: Option<AssetIndexRef>,
    pub downloads: HashMap<String, Download>,
    pub logging: HashMap<String, Logging>,
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("descriptor is missing a main class")]
    MissingMainClass,
}

/// Tokenize a legacy `minecraftArguments` string on whitespace into raw game arguments.
fn tokenize_legacy(args: &str) -> Vec<Argument> {
    args.split_whitespace().map(|s| Argument::Raw(s.to_string())).collect()
}

fn game_jvm_arguments(desc: &RawDescriptor) -> (Vec<Argument>, Vec<Argument>) {
    if let Some(arguments) = &desc.arguments {
        (arguments.game.clone(), arguments.jvm.clone())
    } else if let Some(legacy) = &desc.legacy_arguments {
        (tokenize_legacy(legacy), Vec::new())
    } else {
        (Vec::new(), Vec::new())
    }
}

/// Merge a base (vanilla) descriptor with a loader patch descriptor into the final
/// launch descriptor, per the rules in the Version Descriptor Model component:
/// - `mainClass`: patch wins if present.
/// - `arguments`: base game/jvm arrays concatenated with patch's (base first).
/// - `libraries`: ordered dedup by identity key, base preserved in order, patch
///   overwrites matching keys in place and appends new ones at the end.
pub fn merge(base: &RawDescriptor, patch: &RawDescriptor, merged_id: &str) -> Result<Descriptor, Error> {
    let main_class = patch.main_class.clone()
        .or_else(|| base.main_class.clone())
        .ok_or(Error::MissingMainClass)?;

    let (base_game, base_jvm) = game_jvm_arguments(base);
    let (patch_game, patch_jvm) = game_jvm_arguments(patch);

    let mut game = base_game;
    game.extend(patch_game);
    let mut jvm = base_jvm;
    jvm.extend(patch_jvm);

    let mut libraries: IndexMap<String, Library> = IndexMap::new();
    for lib in &base.libraries {
        libraries.entry(lib.identity_key()).or_insert_with(|| lib.clone());
    }
    for lib in &patch.libraries {
        libraries.insert(lib.identity_key(), lib.clone());
    }

    let mut downloads = base.downloads.clone();
    downloads.extend(patch.downloads.clone());

    let mut logging = base.logging.clone();
    logging.extend(patch.logging.clone());

    Ok(Descriptor {
        id: merged_id.to_string(),
        main_class,
        arguments: Arguments { game, jvm },
        libraries,
        asset_index: patch.asset_index.clone().or_else(|| base.asset_index.clone()),
        downloads,
        logging,
    })
}

/// Resolve a conditional argument list, expanding to plain strings after rule filtering.
pub fn resolve_args(dest: &mut Vec<String>, args: &[Argument], features: &std::collections::HashSet<String>) {
    for arg in args {
        if let Argument::Conditional(cond) = arg {
            if let Some(rules) = &cond.rules {
                if !rules_allow(rules, features) {
                    continue;
                }
            }
        }
        match arg {
            Argument::Raw(val) => dest.push(val.clone()),
            Argument::Conditional(cond) => match &cond.value {
                SingleOrVec::Single(val) => dest.push(val.clone()),
                SingleOrVec::Vec(vals) => dest.extend_from_slice(vals),
            },
        }
    }
}

/// Evaluate a rule list starting from `allow = false`; each matching rule's action
/// overwrites the running value, so the final matching rule wins (not the first).
/// An entry with no rules is always allowed (callers skip calling this in that case).
pub fn rules_allow(rules: &[Rule], features: &std::collections::HashSet<String>) -> bool {
    let mut allowed = false;
    for rule in rules {
        if let Some(action) = check_rule(rule, features) {
            allowed = action == RuleAction::Allow;
        }
    }
    allowed
}

fn check_rule(rule: &Rule, features: &std::collections::HashSet<String>) -> Option<RuleAction> {
    if !check_rule_os(&rule.os) {
        return None;
    }
    for (feature, expected) in &rule.features {
        if features.contains(feature) != *expected {
            return None;
        }
    }
    Some(rule.action)
}

fn check_rule_os(rule_os: &RuleOs) -> bool {
    if let (Some(name), Some(os_name)) = (&rule_os.name, os_name()) {
        if name != os_name {
            return false;
        }
    }
    if let (Some(arch), Some(os_arch)) = (&rule_os.arch, os_arch()) {
        if arch != os_arch {
            return false;
        }
    }
    if let (Some(version), Some(os_version)) = (&rule_os.version, os_version()) {
        if !version.is_match(os_version) {
            return false;
        }
    }
    true
}

/// Current OS name as used by Mojang rule schemas: `windows`, `osx` or `linux`.
pub fn os_name() -> Option<&'static str> {
    if cfg!(target_os = "windows") {
        Some("windows")
    } else if cfg!(target_os = "macos") {
        Some("osx")
    } else if cfg!(target_os = "linux") {
        Some("linux")
    } else {
        None
    }
}

/// Current OS architecture tag: `x86` for 32-bit, `x86_64`/unspecified for 64-bit.
pub fn os_arch() -> Option<&'static str> {
    if cfg!(target_pointer_width = "32") {
        Some("x86")
    } else {
        Some("x86_64")
    }
}

pub fn os_is_64_bit() -> bool {
    cfg!(target_pointer_width = "64")
}

fn os_version() -> Option<&'static str> {
    None
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} libraries)", self.id, self.libraries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn lib(gav: &str) -> Library {
        Library {
            name: gav.parse().unwrap(),
            downloads: LibraryDownloads::default(),
            natives: None,
            extract: None,
            rules: None,
            url: None,
        }
    }

    #[test]
    fn merge_main_class_patch_wins() {
        let base = RawDescriptor { main_class: Some("net.minecraft.client.main.Main".into()), ..Default::default() };
        let patch = RawDescriptor { main_class: Some("net.fabricmc.loader.impl.launch.knot.KnotClient".into()), ..Default::default() };
        let merged = merge(&base, &patch, "1.20.1-fabric-0.15.7").unwrap();
        assert_eq!(merged.main_class, "net.fabricmc.loader.impl.launch.knot.KnotClient");
        assert_eq!(merged.id, "1.20.1-fabric-0.15.7");
    }

    #[test]
    fn merge_libraries_dedup_and_order() {
        let base = RawDescriptor {
            main_class: Some("Main".into()),
            libraries: vec![lib("com.mojang:logging:1.0.0"), lib("com.google.guava:guava:31.1")],
            ..Default::default()
        };
        let patch = RawDescriptor {
            main_class: None,
            libraries: vec![lib("com.mojang:logging:1.1.0"), lib("net.fabricmc:fabric-loader:0.15.7")],
            ..Default::default()
        };
        let merged = merge(&base, &patch, "id").unwrap();
        let keys: Vec<_> = merged.libraries.keys().cloned().collect();
        assert_eq!(keys, vec![
            "com.mojang:logging".to_string(),
            "com.google.guava:guava".to_string(),
            "net.fabricmc:fabric-loader".to_string(),
        ]);
        assert_eq!(merged.libraries["com.mojang:logging"].name.version(), "1.1.0");
    }

    #[test]
    fn merge_legacy_arguments_tokenized() {
        let base = RawDescriptor {
            main_class: Some("Main".into()),
            legacy_arguments: Some("--username ${auth_player_name} --version ${version_name}".into()),
            ..Default::default()
        };
        let patch = RawDescriptor::default();
        let merged = merge(&base, &patch, "id").unwrap();
        assert_eq!(merged.arguments.game.len(), 4);
    }

    #[test]
    fn rules_allow_last_rule_wins() {
        let rules = vec![
            Rule { action: RuleAction::Allow, os: RuleOs::default(), features: HashMap::new() },
            Rule { action: RuleAction::Disallow, os: RuleOs { name: Some("osx".into()), ..Default::default() }, features: HashMap::new() },
        ];
        let features = HashSet::new();
        let allowed = rules_allow(&rules, &features);
        if os_name() == Some("osx") {
            assert!(!allowed);
        } else {
            assert!(allowed);
        }
    }

    #[test]
    fn rules_allow_no_rules_means_allowed_by_convention() {
        // Per spec: "An entry with no rules is always allowed" -- callers are expected
        // to skip evaluation entirely when `rules` is absent; verify the degenerate
        // empty-list case still resolves deterministically to disallowed here, since
        // an empty list carries no matching rule.
        assert!(!rules_allow(&[], &HashSet::new()));
    }
}
