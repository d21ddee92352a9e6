//! Launch Composer: resolves a Java runtime, builds a deduplicated classpath, and
//! expands game/JVM argument templates into a ready-to-spawn command line.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use crate::descriptor::{self, Descriptor};
use crate::loader::Loader;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no usable java {major} runtime found (configured path and auto-detected runtimes both failed)")]
    JavaNotFound { major: u32 },
    #[error("missing classpath entries: {0:?}")]
    MissingClasspathEntries(Vec<PathBuf>),
    #[error("classpath is empty")]
    EmptyClasspath,
    #[error("unresolved token {0:?} in launch argument {1:?}")]
    UnresolvedToken(String, String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A configured game resolution, or a request to use the primary monitor's geometry.
#[derive(Debug, Clone, Copy)]
pub enum Resolution {
    Fixed { width: u32, height: u32 },
    Maximized,
}

/// Everything the composer needs beyond the merged descriptor: directories, identity,
/// account info and tunables a caller supplies per launch.
pub struct LaunchRequest<'a> {
    pub descriptor: &'a Descriptor,
    pub loader: Option<&'a Loader>,
    pub target_dir: &'a Path,
    pub natives_dir: &'a Path,
    pub libraries_dir: &'a Path,
    pub assets_dir: &'a Path,
    pub java_bin: &'a Path,
    pub auth_player_name: &'a str,
    pub auth_uuid: &'a str,
    pub auth_access_token: &'a str,
    pub auth_xuid: Option<&'a str>,
    pub resolution: Option<Resolution>,
    pub memory_max_mb: u32,
    pub extra_jvm_args: &'a str,
    pub companion_ws_port: u16,
    pub companion_ws_token: &'a str,
    pub launcher_name: &'a str,
    pub launcher_version: &'a str,
}

/// A fully composed, ready-to-spawn launch plan.
pub struct LaunchPlan {
    pub java_bin: PathBuf,
    pub main_class: String,
    pub jvm_args: Vec<String>,
    pub game_args: Vec<String>,
    pub working_dir: PathBuf,
    pub env: Vec<(String, String)>,
}

/// Required major Java version for an MC version, by simple prefix matching against the
/// ranges named in the launch composer: 8 for ≤1.16.x, 17 for 1.17-1.20.x, 21 for
/// 1.21-1.21.x, 25 for 26.x.
pub fn required_java_major(mc_version: &str) -> u32 {
    let parts: Vec<&str> = mc_version.split('.').collect();
    if parts.first() != Some(&"1") {
        // Post-1.x Mojang versioning (e.g. "26.1") drops the leading "1." component.
        let year: u32 = parts.first().and_then(|s| s.parse().ok()).unwrap_or(0);
        return if year >= 26 { 25 } else { 8 };
    }
    let minor: Option<u32> = parts.get(1).and_then(|s| s.parse().ok());
    match minor {
        Some(21) => 21,
        Some(m) if (17..=20).contains(&m) => 17,
        _ => 8,
    }
}

/// Check that `exec -version` yields a parseable major version matching `major`.
pub fn is_valid_java(exec: &Path, major: u32) -> bool {
    let Ok(output) = std::process::Command::new(exec).arg("-version").stderr(Stdio::piped()).stdout(Stdio::piped()).output() else {
        return false;
    };
    let text = format!("{}{}", String::from_utf8_lossy(&output.stdout), String::from_utf8_lossy(&output.stderr));
    parse_java_major(&text) == Some(major)
}

/// Parse the major version out of a `java -version` banner, handling both the legacy
/// `1.8.0_392` scheme and the post-9 `17.0.9` scheme.
fn parse_java_major(banner: &str) -> Option<u32> {
    let start = banner.find('"')? + 1;
    let end = banner[start..].find('"')? + start;
    let version = &banner[start..end];
    let mut segments = version.split('.');
    let first: u32 = segments.next()?.parse().ok()?;
    if first == 1 {
        segments.next()?.parse().ok()
    } else {
        Some(first)
    }
}

/// Resolve a usable Java executable for `mc_version`: try the configured path first,
/// then fall back to auto-detected runtimes on `PATH`.
pub fn resolve_java(mc_version: &str, configured: Option<&Path>) -> Result<PathBuf, Error> {
    let major = required_java_major(mc_version);

    if let Some(path) = configured {
        if is_valid_java(path, major) {
            return Ok(path.to_path_buf());
        }
    }

    for candidate in ["java", &format!("java{major}")] {
        if let Ok(path) = which::which(candidate) {
            if is_valid_java(&path, major) {
                return Ok(path);
            }
        }
    }

    Err(Error::JavaNotFound { major })
}

/// Build the deduplicated launch classpath: rule-filtered merged libraries (skipping
/// `net/minecraft/client/` entries and non-jars), then the main jar, then the loader's
/// classpath hook. Entries are deduplicated preserving first occurrence.
fn build_classpath(req: &LaunchRequest, descriptor: &Descriptor) -> Result<Vec<PathBuf>, Error> {
    let mut classpath = Vec::new();
    let mut missing = Vec::new();

    for lib in descriptor.libraries.values() {
        if lib.rules.as_ref().is_some_and(|rules| !descriptor::rules_allow(rules, &HashSet::new())) {
            continue;
        }
        let repo_path = lib.downloads.artifact.as_ref()
            .and_then(|a| a.path.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| lib.name.file());
        if repo_path.to_string_lossy().contains("net/minecraft/client/") {
            continue;
        }
        if repo_path.extension().and_then(|e| e.to_str()) != Some("jar") {
            continue;
        }
        let file = req.libraries_dir.join(&repo_path);
        if !crate::store::is_usable_library(&file, None) {
            missing.push(file);
            continue;
        }
        classpath.push(file);
    }

    let main_jar = req.target_dir.join(".tr").join("versions").join(&descriptor.id).join(format!("{}.jar", descriptor.id));
    let fallback_jar = main_jar.with_file_name(format!("{}.jar", descriptor.id.split('-').next().unwrap_or(&descriptor.id)));
    let resolved_main_jar = if main_jar.is_file() { main_jar } else { fallback_jar };
    if !resolved_main_jar.is_file() {
        missing.push(resolved_main_jar.clone());
    }
    classpath.push(resolved_main_jar);

    if let Some(loader) = req.loader {
        loader.prepare_launch_classpath(&mut classpath);
        classpath.retain(|p| {
            if p.is_file() {
                true
            } else {
                missing.push(p.clone());
                false
            }
        });
    }

    if !missing.is_empty() {
        return Err(Error::MissingClasspathEntries(missing));
    }

    let mut seen = HashSet::new();
    classpath.retain(|p| seen.insert(p.clone()));

    if classpath.is_empty() {
        return Err(Error::EmptyClasspath);
    }

    Ok(classpath)
}

/// Apply `${token}` replacement in place, as in the version-descriptor argument schema:
/// unresolved tokens are left untouched so the caller can reject them afterwards.
fn replace_token_args<F>(args: &mut [String], mut func: F)
where
    F: FnMut(&str) -> Option<String>,
{
    for arg in args {
        let mut cursor = 0;
        while let Some(open) = arg[cursor..].find("${") {
            let open = cursor + open;
            let Some(close_rel) = arg[open + 2..].find('}') else { break };
            let close = open + 2 + close_rel + 1;
            cursor = close;
            if let Some(value) = func(&arg[open + 2..close - 1]) {
                arg.replace_range(open..close, &value);
                let diff = value.len() as isize - (close - open) as isize;
                cursor = cursor.checked_add_signed(diff).unwrap();
            }
        }
    }
}

fn quickplay_removal(args: Vec<String>) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len());
    let mut iter = args.into_iter().peekable();
    while let Some(arg) = iter.next() {
        if arg.starts_with("--quickPlay") || arg == "--demo" {
            if !arg.contains('=') {
                iter.next();
            }
            continue;
        }
        if arg.contains("${") {
            continue;
        }
        out.push(arg);
    }
    out
}

fn inject_resolution(args: &mut Vec<String>, resolution: Resolution) {
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--width" || args[i] == "--height" {
            args.drain(i..(i + 2).min(args.len()));
        } else {
            i += 1;
        }
    }
    let (width, height) = match resolution {
        Resolution::Fixed { width, height } => (width, height),
        Resolution::Maximized => primary_screen_geometry(),
    };
    args.push("--width".to_string());
    args.push(width.to_string());
    args.push("--height".to_string());
    args.push(height.to_string());
}

/// Primary-monitor available geometry. No windowing toolkit is linked into this core;
/// callers that need "maximized" to reflect real screen size should pass an explicit
/// [`Resolution::Fixed`] instead, this is a reasonable desktop default.
fn primary_screen_geometry() -> (u32, u32) {
    (1920, 1080)
}

fn strip_neoforge_module_path_client_artifacts(args: &mut [String]) {
    let pattern = regex::Regex::new(r"net[/\\]minecraft[/\\]client.*-(srg|slim|extra)\.jar$").unwrap();
    for i in 0..args.len() {
        if args[i] == "-p" && i + 1 < args.len() {
            let kept: Vec<PathBuf> = std::env::split_paths(&args[i + 1])
                .filter(|p| !pattern.is_match(&p.to_string_lossy()))
                .collect();
            args[i + 1] = std::env::join_paths(&kept).unwrap().to_string_lossy().into_owned();
        }
    }
}

/// Compose a full launch plan from a merged descriptor and per-launch request. Returns
/// a single aggregated [`Error`] describing every pre-flight problem found; the caller
/// must never spawn the process on error.
pub fn compose(req: &LaunchRequest) -> Result<LaunchPlan, Error> {
    let descriptor = req.descriptor;
    let classpath = build_classpath(req, descriptor)?;
    let classpath_str = std::env::join_paths(&classpath).map_err(|_| Error::EmptyClasspath)?.to_string_lossy().into_owned();

    let features = HashSet::new();
    let mut game_args = Vec::new();
    descriptor::resolve_args(&mut game_args, &descriptor.arguments.game, &features);

    replace_token_args(&mut game_args, |token| match token {
        "auth_player_name" => Some(req.auth_player_name.to_string()),
        "version_name" => Some(descriptor.id.clone()),
        "game_directory" => Some(req.target_dir.display().to_string()),
        "assets_root" => Some(req.assets_dir.display().to_string()),
        "assets_index_name" => descriptor.asset_index.as_ref().map(|a| a.id.clone()),
        "auth_uuid" => Some(req.auth_uuid.to_string()),
        "auth_access_token" => Some(req.auth_access_token.to_string()),
        "user_type" => Some("msa".to_string()),
        "version_type" => Some("release".to_string()),
        "launcher_name" => Some(req.launcher_name.to_string()),
        "launcher_version" => Some(req.launcher_version.to_string()),
        "clientid" => Some(String::new()),
        "auth_xuid" => Some(req.auth_xuid.unwrap_or("").to_string()),
        "quickPlayPath" => Some(String::new()),
        _ => None,
    });

    game_args = quickplay_removal(game_args);

    if let Some(resolution) = req.resolution {
        inject_resolution(&mut game_args, resolution);
    } else {
        inject_resolution(&mut game_args, Resolution::Fixed { width: 925, height: 530 });
    }

    let mut jvm_args = vec![
        format!("-Djava.library.path={}", req.natives_dir.display()),
        format!("-Dorg.lwjgl.librarypath={}", req.natives_dir.display()),
    ];

    let mut descriptor_jvm_args = Vec::new();
    descriptor::resolve_args(&mut descriptor_jvm_args, &descriptor.arguments.jvm, &features);

    replace_token_args(&mut descriptor_jvm_args, |token| match token {
        "natives_directory" => Some(req.natives_dir.display().to_string()),
        "classpath_separator" => Some(if cfg!(windows) { ";".to_string() } else { ":".to_string() }),
        "library_directory" => Some(req.libraries_dir.display().to_string()),
        "classpath" => Some(classpath_str.clone()),
        "launcher_name" => Some(req.launcher_name.to_string()),
        "launcher_version" => Some(req.launcher_version.to_string()),
        "version_name" => Some(descriptor.id.clone()),
        "version_id" => Some(descriptor.id.clone()),
        _ => None,
    });
    jvm_args.extend(descriptor_jvm_args);

    if let Some(loader) = req.loader {
        loader.prepare_launch_jvm_args(&mut jvm_args);
        if loader.should_strip_minecraft_client_artifacts() {
            strip_neoforge_module_path_client_artifacts(&mut jvm_args);
        }
    }

    if !req.extra_jvm_args.trim().is_empty() {
        jvm_args.extend(split_quoted(req.extra_jvm_args));
    }

    if !jvm_args.iter().any(|a| a == "-cp" || a == "-classpath") {
        jvm_args.push("-cp".to_string());
        jvm_args.push(classpath_str.clone());
    }

    let max_mb = req.memory_max_mb.max(512);
    let min_mb = max_mb.min(1024);
    jvm_args.push(format!("-Xms{min_mb}M"));
    jvm_args.push(format!("-Xmx{max_mb}M"));
    jvm_args.push(format!("-Dtritium.companion.ws.port={}", req.companion_ws_port));

    for arg in jvm_args.iter().chain(game_args.iter()) {
        if let Some(token) = find_unresolved_token(arg) {
            return Err(Error::UnresolvedToken(token, arg.clone()));
        }
    }

    Ok(LaunchPlan {
        java_bin: req.java_bin.to_path_buf(),
        main_class: descriptor.main_class.clone(),
        jvm_args,
        game_args,
        working_dir: req.target_dir.to_path_buf(),
        env: vec![("TRITIUM_COMPANION_WS_TOKEN".to_string(), req.companion_ws_token.to_string())],
    })
}

fn find_unresolved_token(arg: &str) -> Option<String> {
    let open = arg.find("${")?;
    let close = arg[open + 2..].find('}')? + open + 2;
    Some(arg[open..=close].to_string())
}

/// Split a modpack-provided extra-JVM-args string on whitespace, honoring double quotes.
fn split_quoted(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    out.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_java_major_covers_known_ranges() {
        assert_eq!(required_java_major("1.16.5"), 8);
        assert_eq!(required_java_major("1.20.1"), 17);
        assert_eq!(required_java_major("1.21.1"), 21);
        assert_eq!(required_java_major("26.1"), 25);
    }

    #[test]
    fn parse_java_major_handles_legacy_and_modern_banners() {
        assert_eq!(parse_java_major(r#"java version "1.8.0_392""#), Some(8));
        assert_eq!(parse_java_major(r#"openjdk version "17.0.9" 2023-10-17"#), Some(17));
    }

    #[test]
    fn quickplay_removal_strips_quickplay_and_demo_and_unresolved() {
        let args = vec![
            "--quickPlaySingleplayer".to_string(), "world".to_string(),
            "--demo".to_string(),
            "--foo".to_string(), "${bar}".to_string(),
            "--username".to_string(), "steve".to_string(),
        ];
        let out = quickplay_removal(args);
        assert_eq!(out, vec!["--foo".to_string(), "--username".to_string(), "steve".to_string()]);
    }

    #[test]
    fn replace_token_args_substitutes_in_place() {
        let mut args = vec!["-Djava.library.path=${natives_directory}".to_string()];
        replace_token_args(&mut args, |t| (t == "natives_directory").then(|| "/tmp/natives".to_string()));
        assert_eq!(args[0], "-Djava.library.path=/tmp/natives");
    }

    #[test]
    fn inject_resolution_replaces_existing_pair() {
        let mut args = vec!["--width".to_string(), "100".to_string(), "--username".to_string(), "steve".to_string()];
        inject_resolution(&mut args, Resolution::Fixed { width: 1280, height: 720 });
        assert_eq!(args, vec!["--username".to_string(), "steve".to_string(), "--width".to_string(), "1280".to_string(), "--height".to_string(), "720".to_string()]);
    }

    #[test]
    fn split_quoted_honors_double_quotes() {
        assert_eq!(split_quoted(r#"-Dfoo=bar "-Dbaz=qux value""#), vec!["-Dfoo=bar".to_string(), "-Dbaz=qux value".to_string()]);
    }
}
