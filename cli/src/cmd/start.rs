//! Implementation of the 'start' command: provision then launch an instance.

use std::process::ExitCode;
use std::sync::Arc;

use tritium_runtime::launch::{LaunchRequest, Resolution as RuntimeResolution};
use tritium_runtime::loader::fabric::{Flavor, VersionSelector};
use tritium_runtime::{launch, process, store::Store, LoaderRequest, Project};

use crate::parse::StartArgs;

use super::{log_error, Cli, LogHandler};

pub fn start(cli: &mut Cli, args: &StartArgs) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            cli.out.error(format_args!("failed to start the async runtime: {e}"));
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(start_async(cli, args))
}

async fn start_async(cli: &mut Cli, args: &StartArgs) -> ExitCode {
    let loader = match parse_loader(args.loader.as_deref()) {
        Ok(loader) => loader,
        Err(message) => {
            cli.out.error(format_args!("{message}"));
            return ExitCode::FAILURE;
        }
    };

    let project = Project {
        target_dir: cli.project_dir.clone(),
        mc_version: args.mc_version.clone(),
        loader,
    };

    let client = reqwest::Client::new();
    let store = Arc::new(Store::new(tritium_runtime::default_shared_cache()));

    let (descriptor, loader) = match tritium_runtime::prepare_runtime(
        client,
        store,
        &project,
        LogHandler::new(&mut cli.out),
        LogHandler::new(&mut cli.out),
    ).await {
        Ok(result) => result,
        Err(e) => {
            log_error(&mut cli.out, &e);
            return ExitCode::FAILURE;
        }
    };

    cli.out.state("OK", format_args!("Provisioned {}", descriptor.id)).newline();

    if args.dry {
        return ExitCode::SUCCESS;
    }

    let java_bin = match args.java.clone() {
        Some(path) => path,
        None => match launch::resolve_java(&args.mc_version, None) {
            Ok(path) => path,
            Err(e) => {
                cli.out.error(format_args!("failed to resolve a compatible Java runtime: {e}"));
                return ExitCode::FAILURE;
            }
        },
    };

    let companion_ws_token = uuid::Uuid::new_v4().to_string();
    let tr_dir = cli.project_dir.join(".tr");

    let request = LaunchRequest {
        descriptor: &descriptor,
        loader: loader.as_ref(),
        target_dir: &cli.project_dir,
        natives_dir: &tr_dir.join("natives").join(&args.mc_version),
        libraries_dir: &tr_dir.join("libraries"),
        assets_dir: &tr_dir.join("assets"),
        java_bin: &java_bin,
        auth_player_name: &args.username,
        auth_uuid: &args.uuid,
        auth_access_token: &args.access_token,
        auth_xuid: args.xuid.as_deref(),
        resolution: resolve_resolution(args),
        memory_max_mb: args.memory_max_mb,
        extra_jvm_args: &args.extra_jvm_args,
        companion_ws_port: 0,
        companion_ws_token: &companion_ws_token,
        launcher_name: "tritium",
        launcher_version: env!("CARGO_PKG_VERSION"),
    };

    let plan = match launch::compose(&request) {
        Ok(plan) => plan,
        Err(e) => {
            cli.out.error(format_args!("failed to compose the launch plan: {e}"));
            return ExitCode::FAILURE;
        }
    };

    let processes = process::ProcessManager::new();
    let scope = cli.project_dir.clone();

    let pid = match tritium_runtime::launch(&processes, &project, &plan, None, LogHandler::new(&mut cli.out)).await {
        Ok(pid) => pid,
        Err(e) => {
            log_error(&mut cli.out, &e);
            return ExitCode::FAILURE;
        }
    };

    // Persist the pid so a separate `kill` invocation, which has no access to this
    // process's in-memory ProcessManager, can find and attach to it.
    if let Err(e) = write_pid_file(&tr_dir, pid) {
        cli.out.warning(format_args!("failed to write pid file: {e}"));
    }

    // We can only set one Ctrl-C handler for the whole process; have it request a
    // forceful stop of the process we just launched.
    let _ = ctrlc::set_handler(move || {
        let Ok(runtime) = tokio::runtime::Builder::new_current_thread().enable_all().build() else {
            std::process::exit(1);
        };
        runtime.block_on(async {
            let manager = process::ProcessManager::new();
            let scope = process::ProcessManager::scope_of(&scope);
            manager.attach_to_pid(scope.clone(), pid, ()).await;
            let _ = manager.kill(&scope, true, ()).await;
        });
        std::process::exit(0);
    });

    // Wait for the tracked process to exit before returning control to the shell.
    let wait_scope = process::ProcessManager::scope_of(&cli.project_dir);
    loop {
        match processes.state(&wait_scope).await {
            Some(process::State::Attached) => {
                tokio::time::sleep(std::time::Duration::from_millis(250)).await;
            }
            _ => break,
        }
    }

    let _ = std::fs::remove_file(pid_file_path(&tr_dir));

    ExitCode::SUCCESS
}

fn pid_file_path(tr_dir: &std::path::Path) -> std::path::PathBuf {
    tr_dir.join("run.pid")
}

fn write_pid_file(tr_dir: &std::path::Path, pid: u32) -> std::io::Result<()> {
    std::fs::create_dir_all(tr_dir)?;
    std::fs::write(pid_file_path(tr_dir), pid.to_string())
}

fn resolve_resolution(args: &StartArgs) -> Option<RuntimeResolution> {
    if args.maximized {
        Some(RuntimeResolution::Maximized)
    } else {
        args.resolution.map(|r| RuntimeResolution::Fixed { width: r.width, height: r.height })
    }
}

/// Parse the `--loader` colon-separated syntax into a [`LoaderRequest`].
fn parse_loader(spec: Option<&str>) -> Result<LoaderRequest, String> {
    let Some(spec) = spec else { return Ok(LoaderRequest::None) };
    let mut parts = spec.splitn(2, ':');
    let kind = parts.next().unwrap_or_default();
    let version = parts.next();

    let flavor = match kind {
        "fabric" => Some(Flavor::Fabric),
        "quilt" => Some(Flavor::Quilt),
        "legacyfabric" => Some(Flavor::LegacyFabric),
        "babric" => Some(Flavor::Babric),
        _ => None,
    };

    if let Some(flavor) = flavor {
        let loader_version = match version {
            Some(v) => VersionSelector::Name(v.to_string()),
            None => VersionSelector::Stable,
        };
        return Ok(LoaderRequest::Fabric(flavor, VersionSelector::Stable, loader_version));
    }

    if kind == "neoforge" {
        let Some(version) = version else {
            return Err("neoforge loader requires a version, e.g. --loader neoforge:21.1.0".to_string());
        };
        return Ok(LoaderRequest::NeoForge(version.to_string()));
    }

    Err(format!("unknown loader kind {kind:?}, expected one of: fabric, quilt, legacyfabric, babric, neoforge"))
}
