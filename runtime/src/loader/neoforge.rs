//! NeoForge loader backend: downloads and checksum-verifies the installer jar, parses
//! `install_profile.json`, materializes its libraries, then runs each post-processor
//! (token-expanded arguments, `java -cp ... MainClass`) to produce the patched client
//! artifacts. Once processors have run, the sanitized universal jar is routed onto the
//! classpath (or `mods/` for legacy FML) and a merged, manifest-rewritten client jar is
//! assembled from whichever patched/srg/extra jars the processors produced.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use zip::ZipArchive;

use crate::descriptor::RawDescriptor;
use crate::maven::Gav;
use crate::path::PathBufExt;

use super::{Event, Handler, InstallContext};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Http(#[from] crate::http::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    JsonPath(#[from] serde_path_to_error::Error<serde_json::Error>),
    #[error(transparent)]
    Store(#[from] crate::store::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("installer archive for {version} is not a valid zip: {source}")]
    Zip { version: String, #[source] source: zip::result::ZipError },
    #[error("installer archive for {version} is missing entry {entry}")]
    EntryNotFound { version: String, entry: String },
    #[error("processor references unknown library {0}")]
    UnknownLibrary(String),
    #[error("processor jar {0} has no Main-Class manifest entry")]
    ProcessorMissingMainClass(String),
    #[error("processor {jar} exited with status {status:?}: {stderr}")]
    ProcessorFailed { jar: String, status: Option<i32>, stderr: String },
    #[error("processor {jar} output {file} failed its SHA-1 check: expected {expected}, got {actual}")]
    ProcessorOutputMismatch { jar: String, file: PathBuf, expected: String, actual: String },
    #[error("installer for {version} failed its {algorithm} check: expected {expected}, got {actual}")]
    InstallerChecksumMismatch { version: String, algorithm: &'static str, expected: String, actual: String },
}

/// A resolved NeoForge loader version to install on top of a given Minecraft version.
pub struct NeoForgeLoader {
    version: String,
    java_bin: PathBuf,
    resolved_patch: Option<RawDescriptor>,
    installed_libraries: HashMap<String, PathBuf>,
    /// Set once the universal jar has been sanitized and is meant to ride the
    /// classpath directly, as opposed to being copied into `mods/` for legacy FML.
    universal_classpath_jar: Option<PathBuf>,
}

impl NeoForgeLoader {
    /// `java_bin` is the JVM used to run installer processors; callers resolve it the
    /// same way they resolve the JVM for the final game launch.
    pub fn new(version: impl Into<String>, java_bin: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            java_bin: java_bin.into(),
            resolved_patch: None,
            installed_libraries: HashMap::new(),
            universal_classpath_jar: None,
        }
    }

    pub fn id(&self) -> &str {
        "neoforge"
    }

    pub fn should_strip_minecraft_client_artifacts(&self) -> bool {
        true
    }

    pub fn prepare_launch_classpath(&self, classpath: &mut Vec<PathBuf>) {
        if let Some(path) = &self.universal_classpath_jar {
            classpath.push(path.clone());
        }
    }

    pub fn prepare_launch_jvm_args(&self, _args: &mut Vec<String>) {}

    pub async fn install(&mut self, ctx: &InstallContext, handler: &mut impl Handler) -> Result<RawDescriptor, Error> {
        handler.on_loader_event(Event::FetchingLoaderMeta { loader: "neoforge" });

        let installer_gav = Gav::new("net.neoforged", "neoforge", &self.version, Some("installer"), None)
            .expect("well-formed neoforge version string");
        let installer_url = format!("{}{}", crate::maven::NEOFORGED_MAVEN_URL, installer_gav.url());
        let installer_bytes = crate::http::get_bytes(&ctx.client, &installer_url, std::time::Duration::from_secs(120), None).await?;
        verify_installer_checksum(&ctx.client, &installer_url, &installer_bytes, &self.version).await?;

        let mut zip = ZipArchive::new(Cursor::new(&installer_bytes))
            .map_err(|source| Error::Zip { version: self.version.clone(), source })?;

        let profile: InstallProfile = read_json_entry(&mut zip, "install_profile.json", &self.version)?;

        let patch_entry = profile.json.strip_prefix('/').unwrap_or(&profile.json).to_string();
        let mut patch: RawDescriptor = read_json_entry(&mut zip, &patch_entry, &self.version)?;
        patch.id = Some(format!("neoforge-{}-{}", ctx.mc_version, self.version));

        handler.on_loader_event(Event::ResolvedLoaderVersion { loader: "neoforge", version: &self.version });

        if let Some(universal) = &profile.path {
            let dst = ctx.libraries_dir.clone().joined(universal.file());
            extract_maven_entry(&mut zip, universal, &dst, &self.version)?;
            self.installed_libraries.insert(universal.as_str().to_string(), dst);
        }

        for lib in &profile.libraries {
            if self.installed_libraries.contains_key(lib.name.as_str()) {
                continue;
            }
            let dst = ctx.libraries_dir.clone().joined(
                lib.downloads.artifact.as_ref().and_then(|a| a.path.as_ref()).map(PathBuf::from).unwrap_or_else(|| lib.name.file()),
            );
            if let Some(artifact) = &lib.downloads.artifact {
                if !artifact.download.url.is_empty() {
                    let bytes = crate::http::get_bytes(&ctx.client, &artifact.download.url, std::time::Duration::from_secs(60), artifact.download.size).await?;
                    crate::path::atomic_write(&dst, &bytes)?;
                } else {
                    extract_maven_entry(&mut zip, &lib.name, &dst, &self.version)?;
                }
            } else {
                extract_maven_entry(&mut zip, &lib.name, &dst, &self.version)?;
            }
            self.installed_libraries.insert(lib.name.as_str().to_string(), dst);
        }

        let tmp_dir = std::env::temp_dir().joined(format!("tritium-neoforge-{}-{}", ctx.mc_version, self.version));
        std::fs::create_dir_all(&tmp_dir)?;

        let mut data: HashMap<String, DataValue> = HashMap::new();
        for (key, entry) in &profile.data {
            let raw = &entry.client;
            let value = if raw.len() >= 2 && raw.starts_with('[') && raw.ends_with(']') {
                match raw[1..raw.len() - 1].parse::<Gav>() {
                    Ok(gav) => DataValue::Library(gav),
                    Err(_) => continue,
                }
            } else if raw.len() >= 2 && raw.starts_with('\'') && raw.ends_with('\'') {
                DataValue::Literal(raw[1..raw.len() - 1].to_string())
            } else {
                let entry_name = raw.strip_prefix('/').unwrap_or(raw);
                let dst = tmp_dir.clone().joined(entry_name);
                extract_file_entry(&mut zip, entry_name, &dst, &self.version)?;
                DataValue::File(dst)
            };
            data.insert(key.clone(), value);
        }

        let client_jar_path = ctx.versions_dir.clone().joined(format!("{}.jar", ctx.mc_version));
        data.insert("SIDE".to_string(), DataValue::Literal("client".to_string()));
        data.insert("MINECRAFT_JAR".to_string(), DataValue::File(client_jar_path));
        data.insert("MINECRAFT_VERSION".to_string(), DataValue::Literal(ctx.mc_version.clone()));
        data.insert("INSTALLER".to_string(), DataValue::Literal(installer_url));
        data.insert("LIBRARY_DIR".to_string(), DataValue::File(ctx.libraries_dir.clone()));

        for (index, processor) in profile.processors.iter().enumerate() {
            if let Some(sides) = &processor.sides {
                if !sides.iter().any(|s| s == "client") {
                    continue;
                }
            }

            let task = processor.args.iter().position(|a| a == "--task").and_then(|i| processor.args.get(i + 1)).map(String::as_str).unwrap_or(processor.jar.as_str());
            handler.on_loader_event(Event::RunningProcessor { task, index, total: profile.processors.len() });

            if !processor.outputs.is_empty() && self.processor_outputs_satisfied(processor, &ctx.libraries_dir, &data) {
                continue;
            }

            let jar_file = self.installed_libraries.get(processor.jar.as_str())
                .ok_or_else(|| Error::UnknownLibrary(processor.jar.as_str().to_string()))?
                .clone();

            let main_class = find_jar_main_class(&jar_file)?
                .ok_or_else(|| Error::ProcessorMissingMainClass(processor.jar.as_str().to_string()))?;

            let mut classpath_entries = vec![jar_file.clone()];
            for dep in &processor.classpath {
                let dep_path = self.installed_libraries.get(dep.as_str())
                    .ok_or_else(|| Error::UnknownLibrary(dep.as_str().to_string()))?;
                classpath_entries.push(dep_path.clone());
            }
            let classpath = std::env::join_paths(&classpath_entries).expect("no null bytes in paths");

            let mut command = tokio::process::Command::new(&self.java_bin);
            command.arg("-cp").arg(classpath).arg(&main_class);
            for arg in &processor.args {
                command.arg(format_processor_arg(arg, &ctx.libraries_dir, &data).unwrap_or_else(|| arg.clone()));
            }

            let output = command.output().await?;
            if !output.status.success() {
                return Err(Error::ProcessorFailed {
                    jar: processor.jar.as_str().to_string(),
                    status: output.status.code(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                });
            }

            for (file_token, sha1_token) in &processor.outputs {
                let Some(file) = format_processor_arg(file_token, &ctx.libraries_dir, &data) else { continue };
                let Some(expected) = format_processor_arg(sha1_token, &ctx.libraries_dir, &data) else { continue };
                let actual = crate::path::sha1_file_hex(Path::new(&file))?;
                if actual != expected {
                    return Err(Error::ProcessorOutputMismatch {
                        jar: processor.jar.as_str().to_string(),
                        file: PathBuf::from(file),
                        expected,
                        actual,
                    });
                }
            }
        }

        super::ensure_libraries_into_ctx(ctx, &patch.libraries).await?;

        if let Some(universal) = &profile.path {
            if let Some(jar_path) = self.installed_libraries.get(universal.as_str()).cloned() {
                self.finish_universal_jar(ctx, &jar_path)?;
            }
        }

        let merged_id = patch.id.clone().unwrap_or_else(|| format!("neoforge-{}-{}", ctx.mc_version, self.version));
        self.build_merged_client_jar(ctx, &merged_id)?;

        self.resolved_patch = Some(patch.clone());
        Ok(patch)
    }

    /// Sanitize the extracted universal jar (strip `module-info.class` and the
    /// `Automatic-Module-Name` manifest attribute), then either copy it into `mods/`
    /// for legacy FML (major version below 10) or mark it for the classpath hook.
    fn finish_universal_jar(&mut self, ctx: &InstallContext, jar_path: &Path) -> Result<(), Error> {
        sanitize_universal_jar(jar_path)?;

        if parse_major_version(&self.version) < 10 {
            let tr_dir = ctx.versions_dir.parent().unwrap_or(&ctx.versions_dir);
            let mods_dir = tr_dir.join("mods");
            std::fs::create_dir_all(&mods_dir)?;
            if let Some(name) = jar_path.file_name() {
                std::fs::copy(jar_path, mods_dir.join(name))?;
            }
            return Ok(());
        }

        self.universal_classpath_jar = Some(jar_path.to_path_buf());
        Ok(())
    }

    /// Build `.tr/versions/<mergedId>/<mergedId>.jar` from the best available patched
    /// client jar, overlaying a `*-extra.jar` when present and rewriting its manifest.
    /// Does nothing if none of the candidate jars were produced by the processors.
    fn build_merged_client_jar(&self, ctx: &InstallContext, merged_id: &str) -> Result<(), Error> {
        let preferred_name = format!("neoforge-{}-client.jar", self.version);
        let patched_name = format!("minecraft-client-patched-{}.jar", ctx.mc_version);

        let base = find_by_file_name(&ctx.libraries_dir, |n| n == preferred_name)
            .or_else(|| find_by_file_name(&ctx.libraries_dir, |n| n == patched_name))
            .or_else(|| find_by_file_name(&ctx.libraries_dir, |n| n.ends_with("-srg.jar")));
        let Some(base) = base else { return Ok(()) };
        let extra = find_by_file_name(&ctx.libraries_dir, |n| n.ends_with("-extra.jar"));

        let out_dir = ctx.versions_dir.join(merged_id);
        std::fs::create_dir_all(&out_dir)?;
        let out_path = out_dir.join(format!("{merged_id}.jar"));

        let base_bytes = std::fs::read(&base)?;
        let mut base_zip = ZipArchive::new(Cursor::new(&base_bytes))
            .map_err(|source| Error::Zip { version: base.display().to_string(), source })?;
        let original_manifest = base_zip.by_name("META-INF/MANIFEST.MF").ok().and_then(|mut f| {
            let mut s = String::new();
            f.read_to_string(&mut s).ok()?;
            Some(s)
        });

        let out_file = std::fs::File::create(&out_path)?;
        let mut writer = zip::ZipWriter::new(out_file);
        let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
        let mut written = std::collections::HashSet::new();

        copy_zip_entries(&mut base_zip, &mut writer, options, &out_path, &mut written)?;

        if let Some(extra) = &extra {
            let extra_bytes = std::fs::read(extra)?;
            let mut extra_zip = ZipArchive::new(Cursor::new(&extra_bytes))
                .map_err(|source| Error::Zip { version: extra.display().to_string(), source })?;
            copy_zip_entries(&mut extra_zip, &mut writer, options, &out_path, &mut written)?;
        }

        writer.start_file("META-INF/MANIFEST.MF", options)
            .map_err(|source| Error::Zip { version: out_path.display().to_string(), source })?;
        writer.write_all(rewrite_manifest(original_manifest).as_bytes())?;
        writer.finish().map_err(|source| Error::Zip { version: out_path.display().to_string(), source })?;

        Ok(())
    }

    fn processor_outputs_satisfied(&self, processor: &ProcessorSpec, libraries_dir: &Path, data: &HashMap<String, DataValue>) -> bool {
        for (file_token, sha1_token) in &processor.outputs {
            let Some(file) = format_processor_arg(file_token, libraries_dir, data) else { return false };
            let Some(expected) = format_processor_arg(sha1_token, libraries_dir, data) else { return false };
            match crate::path::sha1_file_hex(Path::new(&file)) {
                Ok(actual) if actual == expected => continue,
                _ => return false,
            }
        }
        true
    }
}

#[derive(serde::Deserialize, Debug, Clone)]
struct DataEntry {
    client: String,
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct ProcessorSpec {
    jar: Gav,
    #[serde(default)]
    classpath: Vec<Gav>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    outputs: HashMap<String, String>,
    #[serde(default)]
    sides: Option<Vec<String>>,
}

#[derive(serde::Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
struct InstallProfile {
    json: String,
    path: Option<Gav>,
    #[serde(default)]
    data: HashMap<String, DataEntry>,
    #[serde(default)]
    processors: Vec<ProcessorSpec>,
    #[serde(default)]
    libraries: Vec<crate::descriptor::Library>,
}

#[derive(Debug, Clone)]
enum DataValue {
    Library(Gav),
    Literal(String),
    File(PathBuf),
}

/// Verify the installer jar against the first available maven sidecar checksum, trying
/// SHA-512, then SHA-256, then SHA-1. A missing sidecar for one algorithm falls through
/// to the next; if none exist, the download is accepted unverified.
async fn verify_installer_checksum(client: &reqwest::Client, installer_url: &str, bytes: &[u8], version: &str) -> Result<(), Error> {
    const ALGORITHMS: [(&str, fn(&[u8]) -> String); 3] = [
        ("sha512", crate::path::sha512_hex),
        ("sha256", crate::path::sha256_hex),
        ("sha1", crate::path::sha1_hex),
    ];

    for (algorithm, hasher) in ALGORITHMS {
        let sidecar_url = format!("{installer_url}.{algorithm}");
        let Some(text) = crate::http::try_get_text(client, &sidecar_url, std::time::Duration::from_secs(30)).await? else { continue };
        let Some(expected) = text.split_whitespace().next() else { continue };
        let expected = expected.to_ascii_lowercase();
        let actual = hasher(bytes);
        if actual != expected {
            return Err(Error::InstallerChecksumMismatch { version: version.to_string(), algorithm, expected, actual });
        }
        return Ok(());
    }

    Ok(())
}

/// The leading dot-separated component of a loader version string, used to gate
/// legacy-FML handling of the universal jar. Unparsable versions never take that path.
fn parse_major_version(version: &str) -> u32 {
    version.split('.').next().and_then(|s| s.parse().ok()).unwrap_or(u32::MAX)
}

/// First file under `dir` (recursive) whose file name matches `pred`.
fn find_by_file_name(dir: &Path, pred: impl Fn(&str) -> bool) -> Option<PathBuf> {
    crate::path::walk_files(dir).ok()?.into_iter()
        .find(|p| p.file_name().and_then(|n| n.to_str()).is_some_and(&pred))
}

/// Copy every entry of `src` into `writer`, skipping `module-info.class`, the original
/// manifest, and any name already in `written` (first writer wins).
fn copy_zip_entries<R: std::io::Read + std::io::Seek, W: std::io::Write + std::io::Seek>(
    src: &mut ZipArchive<R>,
    writer: &mut zip::ZipWriter<W>,
    options: zip::write::FileOptions<()>,
    out_path: &Path,
    written: &mut std::collections::HashSet<String>,
) -> Result<(), Error> {
    for i in 0..src.len() {
        let mut entry = src.by_index(i).map_err(|source| Error::Zip { version: out_path.display().to_string(), source })?;
        let name = entry.name().to_string();
        if name == "module-info.class" || name == "META-INF/MANIFEST.MF" || !written.insert(name.clone()) {
            continue;
        }
        writer.start_file(&name, options).map_err(|source| Error::Zip { version: out_path.display().to_string(), source })?;
        std::io::copy(&mut entry, writer)?;
    }
    Ok(())
}

/// Force `Manifest-Version: 1.0`, and add `Automatic-Module-Name: minecraft` /
/// `Minecraft-Dists: client` if the original manifest didn't already set them.
fn rewrite_manifest(original: Option<String>) -> String {
    let mut lines: Vec<String> = original.unwrap_or_default()
        .lines()
        .filter(|l| !l.is_empty() && !l.starts_with("Manifest-Version:"))
        .map(str::to_string)
        .collect();

    if !lines.iter().any(|l| l.starts_with("Automatic-Module-Name:")) {
        lines.push("Automatic-Module-Name: minecraft".to_string());
    }
    if !lines.iter().any(|l| l.starts_with("Minecraft-Dists:")) {
        lines.push("Minecraft-Dists: client".to_string());
    }
    lines.insert(0, "Manifest-Version: 1.0".to_string());

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Strip `module-info.class` and the `Automatic-Module-Name` manifest attribute from a
/// jar in place, to avoid JPMS module conflicts when it rides the classpath alongside
/// the vanilla/merged client jar.
fn sanitize_universal_jar(path: &Path) -> Result<(), Error> {
    let bytes = std::fs::read(path)?;
    let mut src = ZipArchive::new(Cursor::new(&bytes)).map_err(|source| Error::Zip { version: path.display().to_string(), source })?;

    let original_manifest = src.by_name("META-INF/MANIFEST.MF").ok().and_then(|mut f| {
        let mut s = String::new();
        f.read_to_string(&mut s).ok()?;
        Some(s)
    });
    let sanitized_manifest = original_manifest.map(|m| {
        m.lines().filter(|l| !l.starts_with("Automatic-Module-Name:")).map(|l| format!("{l}\n")).collect::<String>()
    });

    let tmp = path.with_extension("jar.sanitize-tmp");
    {
        let out = std::fs::File::create(&tmp)?;
        let mut writer = zip::ZipWriter::new(out);
        let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();

        for i in 0..src.len() {
            let mut entry = src.by_index(i).map_err(|source| Error::Zip { version: path.display().to_string(), source })?;
            let name = entry.name().to_string();
            if name == "module-info.class" || name == "META-INF/MANIFEST.MF" {
                continue;
            }
            writer.start_file(&name, options).map_err(|source| Error::Zip { version: path.display().to_string(), source })?;
            std::io::copy(&mut entry, &mut writer)?;
        }

        if let Some(manifest) = sanitized_manifest {
            writer.start_file("META-INF/MANIFEST.MF", options).map_err(|source| Error::Zip { version: path.display().to_string(), source })?;
            writer.write_all(manifest.as_bytes())?;
        }

        writer.finish().map_err(|source| Error::Zip { version: path.display().to_string(), source })?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json_entry<T: serde::de::DeserializeOwned>(zip: &mut ZipArchive<Cursor<&Vec<u8>>>, entry: &str, version: &str) -> Result<T, Error> {
    let reader = zip.by_name(entry).map_err(|_| Error::EntryNotFound { version: version.to_string(), entry: entry.to_string() })?;
    let mut deserializer = serde_json::Deserializer::from_reader(reader);
    serde_path_to_error::deserialize(&mut deserializer).map_err(Error::JsonPath)
}

fn extract_maven_entry(zip: &mut ZipArchive<Cursor<&Vec<u8>>>, gav: &Gav, dst: &Path, version: &str) -> Result<(), Error> {
    let entry = format!("maven/{}", gav.url());
    extract_file_entry(zip, &entry, dst, version)
}

fn extract_file_entry(zip: &mut ZipArchive<Cursor<&Vec<u8>>>, entry: &str, dst: &Path, version: &str) -> Result<(), Error> {
    let mut reader = zip.by_name(entry).map_err(|_| Error::EntryNotFound { version: version.to_string(), entry: entry.to_string() })?;
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = std::fs::File::create(dst)?;
    std::io::copy(&mut reader, &mut writer)?;
    Ok(())
}

/// From a JAR file, find its `Main-Class` manifest attribute.
fn find_jar_main_class(jar_file: &Path) -> Result<Option<String>, Error> {
    let file = std::fs::File::open(jar_file)?;
    let mut zip = ZipArchive::new(BufReader::new(file)).map_err(|source| Error::Zip { version: jar_file.display().to_string(), source })?;

    let Ok(manifest) = zip.by_name("META-INF/MANIFEST.MF") else { return Ok(None) };
    let mut reader = BufReader::new(manifest);

    const MAIN_CLASS_KEY: &str = "Main-Class: ";
    let mut line = String::new();
    while reader.read_line(&mut line).unwrap_or(0) != 0 {
        if let Some(rest) = line.strip_prefix(MAIN_CLASS_KEY) {
            return Ok(Some(rest.trim_end().to_string()));
        }
        line.clear();
    }
    Ok(None)
}

/// Expand a processor argument per the NeoForge/Forge installer token grammar:
/// `[group:artifact:version]` resolves to a library's on-disk path, `{KEY}` looks up
/// `data`, `'literal'` is an escaped literal, anything else passes through unchanged.
fn format_processor_arg(input: &str, libraries_dir: &Path, data: &HashMap<String, DataValue>) -> Option<String> {
    if input.len() >= 2 && input.starts_with('[') && input.ends_with(']') {
        let gav = input[1..input.len() - 1].parse::<Gav>().ok()?;
        return Some(libraries_dir.to_path_buf().joined(gav.file()).display().to_string());
    }

    let mut out = String::new();
    let mut token = String::new();
    let mut in_brace = false;
    let mut in_quote = false;

    for ch in input.chars() {
        match ch {
            '{' if !in_brace && !in_quote => in_brace = true,
            '}' if in_brace => {
                match data.get(&token)? {
                    DataValue::Library(gav) => out.push_str(&libraries_dir.to_path_buf().joined(gav.file()).display().to_string()),
                    DataValue::Literal(lit) => out.push_str(lit),
                    DataValue::File(path) => out.push_str(&path.display().to_string()),
                }
                token.clear();
                in_brace = false;
            }
            '\'' if !in_brace && !in_quote => in_quote = true,
            '\'' if in_quote => {
                out.push_str(&token);
                token.clear();
                in_quote = false;
            }
            _ if in_brace || in_quote => token.push(ch),
            _ => out.push(ch),
        }
    }

    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_processor_arg_resolves_library_token() {
        let gav: Gav = "net.neoforged:neoforge:21.1.0".parse().unwrap();
        let mut data = HashMap::new();
        data.insert("LIB".to_string(), DataValue::Library(gav.clone()));

        let libraries_dir = Path::new("/cache/libraries");
        let result = format_processor_arg("{LIB}", libraries_dir, &data).unwrap();
        assert_eq!(result, libraries_dir.to_path_buf().joined(gav.file()).display().to_string());
    }

    #[test]
    fn format_processor_arg_resolves_literal_and_file() {
        let mut data = HashMap::new();
        data.insert("SIDE".to_string(), DataValue::Literal("client".to_string()));
        data.insert("OUT".to_string(), DataValue::File(PathBuf::from("/tmp/out.jar")));

        let libraries_dir = Path::new("/cache/libraries");
        assert_eq!(format_processor_arg("{SIDE}", libraries_dir, &data).unwrap(), "client");
        assert_eq!(format_processor_arg("{OUT}", libraries_dir, &data).unwrap(), "/tmp/out.jar");
    }

    #[test]
    fn format_processor_arg_resolves_bracketed_maven_coordinate() {
        let data = HashMap::new();
        let libraries_dir = Path::new("/cache/libraries");
        let result = format_processor_arg("[net.neoforged:neoforge:21.1.0]", libraries_dir, &data).unwrap();
        let gav: Gav = "net.neoforged:neoforge:21.1.0".parse().unwrap();
        assert_eq!(result, libraries_dir.to_path_buf().joined(gav.file()).display().to_string());
    }

    #[test]
    fn format_processor_arg_passes_through_plain_text() {
        let data = HashMap::new();
        let libraries_dir = Path::new("/cache/libraries");
        assert_eq!(format_processor_arg("--task=MCP", libraries_dir, &data).unwrap(), "--task=MCP");
    }

    #[test]
    fn format_processor_arg_quoted_literal() {
        let data = HashMap::new();
        let libraries_dir = Path::new("/cache/libraries");
        assert_eq!(format_processor_arg("'hello world'", libraries_dir, &data).unwrap(), "hello world");
    }

    #[test]
    fn format_processor_arg_missing_key_returns_none() {
        let data = HashMap::new();
        let libraries_dir = Path::new("/cache/libraries");
        assert!(format_processor_arg("{MISSING}", libraries_dir, &data).is_none());
    }

    #[test]
    fn parse_major_version_reads_leading_component() {
        assert_eq!(parse_major_version("21.1.82"), 21);
        assert_eq!(parse_major_version("9.0.0"), 9);
        assert_eq!(parse_major_version("not-a-version"), u32::MAX);
    }

    #[test]
    fn rewrite_manifest_adds_missing_attributes_and_forces_version() {
        let original = Some("Manifest-Version: 0.9\nImplementation-Title: foo\n".to_string());
        let out = rewrite_manifest(original);
        assert!(out.starts_with("Manifest-Version: 1.0\n"));
        assert!(out.contains("Implementation-Title: foo"));
        assert!(out.contains("Automatic-Module-Name: minecraft"));
        assert!(out.contains("Minecraft-Dists: client"));
    }

    #[test]
    fn rewrite_manifest_preserves_existing_automatic_module_name() {
        let original = Some("Automatic-Module-Name: custom.module\n".to_string());
        let out = rewrite_manifest(original);
        assert!(out.contains("Automatic-Module-Name: custom.module"));
        assert!(!out.contains("Automatic-Module-Name: minecraft"));
    }

    fn write_test_jar(path: &Path, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options: zip::write::FileOptions<()> = zip::write::FileOptions::default();
        for (name, content) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
        writer.finish().unwrap();
    }

    #[test]
    fn sanitize_universal_jar_strips_module_info_and_module_name() {
        let tmp = tempfile::tempdir().unwrap();
        let jar = tmp.path().join("universal.jar");
        write_test_jar(&jar, &[
            ("module-info.class", b"bogus"),
            ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\nAutomatic-Module-Name: neoforge\n"),
            ("some/Class.class", b"content"),
        ]);

        sanitize_universal_jar(&jar).unwrap();

        let bytes = std::fs::read(&jar).unwrap();
        let mut zip = ZipArchive::new(Cursor::new(&bytes)).unwrap();
        assert!(zip.by_name("module-info.class").is_err());
        assert!(zip.by_name("some/Class.class").is_ok());

        let mut manifest = String::new();
        zip.by_name("META-INF/MANIFEST.MF").unwrap().read_to_string(&mut manifest).unwrap();
        assert!(!manifest.contains("Automatic-Module-Name"));
    }

    #[tokio::test]
    async fn verify_installer_checksum_passes_on_matching_sha1_sidecar() {
        let mut server = mockito::Server::new_async().await;
        let bytes = b"installer contents";
        server.mock("GET", "/installer.jar.sha512").with_status(404).create_async().await;
        server.mock("GET", "/installer.jar.sha256").with_status(404).create_async().await;
        server.mock("GET", "/installer.jar.sha1").with_status(200).with_body(crate::path::sha1_hex(bytes)).create_async().await;

        let client = crate::http::client().unwrap();
        let url = format!("{}/installer.jar", server.url());
        verify_installer_checksum(&client, &url, bytes, "21.1.0").await.unwrap();
    }

    #[tokio::test]
    async fn verify_installer_checksum_fails_on_mismatch() {
        let mut server = mockito::Server::new_async().await;
        let bytes = b"installer contents";
        server.mock("GET", "/installer.jar.sha512").with_status(404).create_async().await;
        server.mock("GET", "/installer.jar.sha256").with_status(404).create_async().await;
        server.mock("GET", "/installer.jar.sha1").with_status(200).with_body("0000000000000000000000000000000000000000").create_async().await;

        let client = crate::http::client().unwrap();
        let url = format!("{}/installer.jar", server.url());
        let err = verify_installer_checksum(&client, &url, bytes, "21.1.0").await.unwrap_err();
        assert!(matches!(err, Error::InstallerChecksumMismatch { .. }));
    }
}
