//! Integration tests exercising a full descriptor-merge -> compose flow, the way the
//! launch composer is actually driven in production: a base (vanilla) descriptor and a
//! loader patch are merged first, then fed to `launch::compose`.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tritium_runtime::descriptor::{
    Arguments, Argument, AssetIndexRef, ConditionalArgument, Descriptor, Download, Library,
    LibraryDownload, LibraryDownloads, RawDescriptor, Rule, RuleAction, RuleOs, SingleOrVec,
};
use tritium_runtime::launch::{self, LaunchRequest, Resolution};

fn lib(gav: &str, repo_path: &str) -> Library {
    Library {
        name: gav.parse().expect("well-formed test gav"),
        downloads: LibraryDownloads {
            artifact: Some(LibraryDownload {
                path: Some(repo_path.to_string()),
                download: Download { url: String::new(), size: None, sha1: None },
            }),
            classifiers: HashMap::new(),
        },
        natives: None,
        extract: None,
        rules: None,
        url: None,
    }
}

/// A vanilla-shaped base descriptor with a `--quickPlaySingleplayer` game argument that
/// is only valid when the `is_quick_play_singleplayer` feature is set, mirroring the real
/// vanilla version JSON shape that previously tripped over token substitution running
/// before quickplay removal instead of after it.
fn base_descriptor() -> RawDescriptor {
    RawDescriptor {
        id: Some("1.20.1".to_string()),
        main_class: Some("net.minecraft.client.main.Main".to_string()),
        arguments: Some(Arguments {
            game: vec![
                Argument::Raw("--username".to_string()),
                Argument::Raw("${auth_player_name}".to_string()),
                Argument::Raw("--version".to_string()),
                Argument::Raw("${version_name}".to_string()),
                // Always present, unconditional, and never substituted by `compose`: this
                // pair must be stripped by quickplay removal running *after* token
                // substitution, not before, or the unresolved "${quickPlaySingleplayer}"
                // token would either leak into the final game args or trip the unresolved
                // token guard.
                Argument::Raw("--quickPlaySingleplayer".to_string()),
                Argument::Raw("${quickPlaySingleplayer}".to_string()),
                Argument::Conditional(ConditionalArgument {
                    value: SingleOrVec::Vec(vec![
                        "--quickPlaySingleplayer".to_string(),
                        "${quickPlaySingleplayer}".to_string(),
                    ]),
                    rules: Some(vec![Rule {
                        action: RuleAction::Allow,
                        os: RuleOs::default(),
                        features: HashMap::from([("is_quick_play_singleplayer".to_string(), true)]),
                    }]),
                }),
            ],
            jvm: vec![
                Argument::Raw("-Djava.library.path=${natives_directory}".to_string()),
                Argument::Raw("-cp".to_string()),
                Argument::Raw("${classpath}".to_string()),
            ],
        }),
        legacy_arguments: None,
        libraries: vec![lib("com.example:base-lib:1.0", "com/example/base-lib/1.0/base-lib-1.0.jar")],
        asset_index: Some(AssetIndexRef {
            id: "17".to_string(),
            download: Download { url: String::new(), size: None, sha1: None },
        }),
        assets: Some("17".to_string()),
        downloads: HashMap::new(),
        logging: HashMap::new(),
    }
}

fn loader_patch() -> RawDescriptor {
    RawDescriptor {
        id: Some("fabric-1.20.1-0.15.0".to_string()),
        main_class: Some("net.fabricmc.loader.impl.launch.knot.KnotClient".to_string()),
        libraries: vec![lib("net.fabricmc:fabric-loader:0.15.0", "net/fabricmc/fabric-loader/0.15.0/fabric-loader-0.15.0.jar")],
        ..Default::default()
    }
}

struct Fixture {
    _dir: tempfile::TempDir,
    target_dir: PathBuf,
    natives_dir: PathBuf,
    libraries_dir: PathBuf,
    assets_dir: PathBuf,
    java_bin: PathBuf,
}

fn write_stub_jar(path: &std::path::Path) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    let file = fs::File::create(path).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
    zip.start_file("META-INF/MANIFEST.MF", options).unwrap();
    use std::io::Write;
    zip.write_all(b"Manifest-Version: 1.0\n").unwrap();
    zip.finish().unwrap();
}

fn setup(merged: &Descriptor) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let target_dir = dir.path().join("instance");
    let natives_dir = target_dir.join(".tr").join("natives");
    let libraries_dir = target_dir.join(".tr").join("libraries");
    let assets_dir = target_dir.join(".tr").join("assets");
    fs::create_dir_all(&natives_dir).unwrap();
    fs::create_dir_all(&assets_dir).unwrap();

    for repo_lib in merged.libraries.values() {
        let repo_path = repo_lib.downloads.artifact.as_ref().unwrap().path.as_ref().unwrap();
        write_stub_jar(&libraries_dir.join(repo_path));
    }

    let version_dir = target_dir.join(".tr").join("versions").join(&merged.id);
    fs::create_dir_all(&version_dir).unwrap();
    write_stub_jar(&version_dir.join(format!("{}.jar", merged.id)));

    Fixture { _dir: dir, target_dir, natives_dir, libraries_dir, assets_dir, java_bin: PathBuf::from("java") }
}

fn request<'a>(fixture: &'a Fixture, descriptor: &'a Descriptor) -> LaunchRequest<'a> {
    LaunchRequest {
        descriptor,
        loader: None,
        target_dir: &fixture.target_dir,
        natives_dir: &fixture.natives_dir,
        libraries_dir: &fixture.libraries_dir,
        assets_dir: &fixture.assets_dir,
        java_bin: &fixture.java_bin,
        auth_player_name: "Steve",
        auth_uuid: "00000000-0000-0000-0000-000000000000",
        auth_access_token: "token",
        auth_xuid: None,
        resolution: Some(Resolution::Fixed { width: 1280, height: 720 }),
        memory_max_mb: 2048,
        extra_jvm_args: "",
        companion_ws_port: 0,
        companion_ws_token: "companion-token",
        launcher_name: "tritium",
        launcher_version: "0.1.0",
    }
}

#[test]
fn compose_merges_libraries_and_removes_unresolved_quickplay_tokens() {
    let base = base_descriptor();
    let patch = loader_patch();
    let merged = tritium_runtime::descriptor::merge(&base, &patch, "1.20.1-fabric-0.15.0").unwrap();

    let fixture = setup(&merged);
    let req = request(&fixture, &merged);
    let plan = launch::compose(&req).expect("compose should succeed with all artifacts present");

    // The fabric patch's main class wins over the base's.
    assert_eq!(plan.main_class, "net.fabricmc.loader.impl.launch.knot.KnotClient");

    // Both the base and patch libraries made it onto the classpath, plus the main jar.
    let classpath_entries = plan.jvm_args.iter()
        .position(|a| a == "-cp" || a == "-classpath")
        .map(|i| plan.jvm_args[i + 1].clone())
        .unwrap_or_default();
    assert!(classpath_entries.contains("base-lib-1.0.jar"));
    assert!(classpath_entries.contains("fabric-loader-0.15.0.jar"));
    assert!(classpath_entries.contains(&format!("{}.jar", merged.id)));

    // --quickPlaySingleplayer was only allowed conditionally, with the feature unset it
    // resolves to no rule match, so the argument and its unresolved ${quickPlaySingleplayer}
    // companion never reach the final game args, and substitution never saw an unresolved
    // token left over from quickplay removal running in the wrong order.
    assert!(!plan.game_args.iter().any(|a| a.contains("quickPlay")));
    assert!(plan.game_args.iter().any(|a| a == "Steve"));
    assert!(plan.game_args.iter().any(|a| a == "1.20.1-fabric-0.15.0"));
}

#[test]
fn compose_fails_with_missing_classpath_entries_when_library_absent() {
    let base = base_descriptor();
    let patch = loader_patch();
    let merged = tritium_runtime::descriptor::merge(&base, &patch, "1.20.1-fabric-0.15.0").unwrap();

    let fixture = setup(&merged);
    // Remove one of the materialized library jars so the classpath build must fail closed.
    let missing = fixture.libraries_dir.join("com/example/base-lib/1.0/base-lib-1.0.jar");
    fs::remove_file(&missing).unwrap();

    let req = request(&fixture, &merged);
    let err = launch::compose(&req).unwrap_err();
    match err {
        launch::Error::MissingClasspathEntries(missing) => {
            assert!(missing.iter().any(|p| p.ends_with("base-lib-1.0.jar")));
        }
        other => panic!("expected MissingClasspathEntries, got {other:?}"),
    }
}

#[test]
fn compose_injects_fixed_resolution_and_memory_bounds() {
    let base = base_descriptor();
    let merged = tritium_runtime::descriptor::merge(&base, &RawDescriptor::default(), "1.20.1").unwrap();
    let fixture = setup(&merged);
    let mut req = request(&fixture, &merged);
    req.resolution = Some(Resolution::Fixed { width: 1920, height: 1080 });
    req.memory_max_mb = 256;

    let plan = launch::compose(&req).unwrap();

    let width_idx = plan.game_args.iter().position(|a| a == "--width").unwrap();
    assert_eq!(plan.game_args[width_idx + 1], "1920");
    assert_eq!(plan.game_args[width_idx + 2], "--height");
    assert_eq!(plan.game_args[width_idx + 3], "1080");

    // memory_max_mb below 512 is clamped up, and -Xms never exceeds -Xmx.
    assert!(plan.jvm_args.iter().any(|a| a == "-Xmx512M"));
    assert!(plan.jvm_args.iter().any(|a| a == "-Xms512M"));
}
