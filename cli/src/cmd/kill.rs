//! Implementation of the 'kill' command: stop a previously started instance.

use std::process::ExitCode;

use tritium_runtime::{process, Project, LoaderRequest};

use crate::parse::KillArgs;

use super::{log_error, Cli, LogHandler, NoCompanion};

pub fn kill(cli: &mut Cli, args: &KillArgs) -> ExitCode {
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            cli.out.error(format_args!("failed to start the async runtime: {e}"));
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(kill_async(cli, args))
}

async fn kill_async(cli: &mut Cli, args: &KillArgs) -> ExitCode {
    let tr_dir = cli.project_dir.join(".tr");
    let pid_file = tr_dir.join("run.pid");

    let pid = match std::fs::read_to_string(&pid_file).ok().and_then(|s| s.trim().parse::<u32>().ok()) {
        Some(pid) => pid,
        None => {
            cli.out.error(format_args!("no tracked instance found for this project"));
            return ExitCode::FAILURE;
        }
    };

    // A `kill` invocation runs as a separate process from the `start` that launched
    // the game, so it has no access to that process's in-memory ProcessManager; we
    // can only reattach to the pid we persisted to disk.
    let processes = process::ProcessManager::new();
    let scope = process::ProcessManager::scope_of(&cli.project_dir);

    if !processes.attach_to_pid(scope.clone(), pid, ()).await {
        cli.out.error(format_args!("tracked process (pid {pid}) is no longer running"));
        let _ = std::fs::remove_file(&pid_file);
        return ExitCode::FAILURE;
    }

    let project = Project {
        target_dir: cli.project_dir.clone(),
        mc_version: String::new(),
        loader: LoaderRequest::None,
    };

    let result = tritium_runtime::kill_game_process(
        &processes,
        &project,
        Some(&NoCompanion),
        args.force,
        LogHandler::new(&mut cli.out),
    ).await;

    match result {
        Ok(()) => {
            let _ = std::fs::remove_file(&pid_file);
            ExitCode::SUCCESS
        }
        Err(e) => {
            log_error(&mut cli.out, &e);
            ExitCode::FAILURE
        }
    }
}
