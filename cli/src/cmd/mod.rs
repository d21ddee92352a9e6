//! Implementing the logic for the different CLI commands.

mod kill;
mod start;

use std::path::PathBuf;
use std::process::ExitCode;

use tritium_runtime::{companion, descriptor, launch, loader, process, store, vanilla};

use crate::output::Output;
use crate::parse::{CliArgs, CliCmd, CliOutput};

pub fn main(args: &CliArgs) -> ExitCode {
    let color = args.output.is_none() && std::io::IsTerminal::is_terminal(&std::io::stdout());
    let mode = args.output.unwrap_or(CliOutput::Human);
    let out = Output::new(mode, color);

    let project_dir = args.dir.clone()
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));

    let mut cli = Cli { out, project_dir };

    match &args.cmd {
        CliCmd::Start(start_args) => start::start(&mut cli, start_args),
        CliCmd::Kill(kill_args) => kill::kill(&mut cli, kill_args),
    }
}

/// Shared CLI data.
pub struct Cli {
    pub out: Output,
    pub project_dir: PathBuf,
}

/// Generic event handler shared across the provisioning, install and process stages,
/// mirroring a running instance's progress to the configured [`Output`].
pub struct LogHandler<'a> {
    out: &'a mut Output,
}

impl<'a> LogHandler<'a> {
    pub fn new(out: &'a mut Output) -> Self {
        Self { out }
    }
}

impl store::Handler for LogHandler<'_> {}

impl vanilla::Handler for LogHandler<'_> {
    fn on_vanilla_event(&mut self, event: vanilla::Event<'_>) {
        use vanilla::Event;
        match event {
            Event::FetchingManifest => {
                self.out.state("..", format_args!("Fetching version manifest"));
            }
            Event::FetchingVersionJson { version } => {
                self.out.state("..", format_args!("Fetching version {version}")).newline();
            }
            Event::EnsuringLibraries { total } => {
                self.out.state("..", format_args!("Ensuring {total} libraries"));
            }
            Event::EnsuringAssets { total } => {
                self.out.state("..", format_args!("Ensuring {total} assets"));
            }
            Event::ExtractingNatives { version } => {
                self.out.state("..", format_args!("Extracting natives for {version}")).newline();
            }
            Event::AssetsRetrying { concurrency, failures } => {
                self.out.state("WARN", format_args!("Retrying {failures} assets at concurrency {concurrency}")).newline();
            }
        }
    }
}

impl loader::Handler for LogHandler<'_> {
    fn on_loader_event(&mut self, event: loader::Event<'_>) {
        use loader::Event;
        match event {
            Event::FetchingLoaderMeta { loader } => {
                self.out.state("..", format_args!("Fetching {loader} loader metadata"));
            }
            Event::ResolvedLoaderVersion { loader, version } => {
                self.out.state("OK", format_args!("Resolved {loader} loader version {version}")).newline();
            }
            Event::RunningProcessor { task, index, total } => {
                self.out.state("..", format_args!("Running installer processor {task} ({}/{total})", index + 1));
            }
        }
    }
}

impl process::Handler for LogHandler<'_> {
    fn on_process_event(&mut self, event: process::Event<'_>) {
        use process::Event;
        match event {
            Event::Attached { pid, .. } => {
                self.out.state("OK", format_args!("Launched (pid {pid})")).newline();
            }
            Event::Detached { .. } => {
                self.out.state("INFO", format_args!("Detached from tracked process")).newline();
            }
            Event::Exited { exit_code, .. } => {
                self.out.state("INFO", format_args!("Game exited ({})", exit_code.unwrap_or_default())).newline();
            }
            Event::KillRequested { force, .. } => {
                self.out.state("..", format_args!("Requesting {} stop", if force { "forceful" } else { "graceful" }));
            }
            Event::KillFailed { .. } => {
                self.out.state("FAILED", format_args!("Failed to stop the tracked process")).newline();
            }
        }
    }
}

/// A companion bridge that is never reachable, used when no instance of the
/// WebSocket protocol has been wired in, so `kill` falls straight to a force-kill.
pub struct NoCompanion;

#[async_trait::async_trait]
impl companion::CompanionBridge for NoCompanion {
    async fn ping(&self, _timeout: std::time::Duration) -> companion::BridgeResponse {
        companion::BridgeResponse { ok: false, message: "no companion bridge configured".to_string() }
    }
    async fn close_game(&self, _timeout: std::time::Duration) -> companion::BridgeResponse {
        companion::BridgeResponse { ok: false, message: "no companion bridge configured".to_string() }
    }
    async fn reload_server(&self) -> companion::BridgeResponse {
        companion::BridgeResponse { ok: false, message: "no companion bridge configured".to_string() }
    }
    async fn send_command(&self, _text: &str) -> companion::BridgeResponse {
        companion::BridgeResponse { ok: false, message: "no companion bridge configured".to_string() }
    }
}

/// Log any of the core's aggregated error variants to the given output.
pub fn log_error(out: &mut Output, error: &tritium_runtime::Error) {
    use tritium_runtime::Error;
    match error {
        Error::Vanilla(e) => out.error(format_args!("failed to provision the vanilla instance: {e}")),
        Error::Loader(e) => out.error(format_args!("failed to install the mod loader: {e}")),
        Error::Descriptor(e) => out.error(format_args!("failed to merge the version descriptor: {e}")),
        Error::Launch(e) => out.error(format_args!("failed to compose the launch plan: {e}")),
        Error::Process(e) => out.error(format_args!("process error: {e}")),
        Error::Io(e) => out.error(format_args!("I/O error: {e}")),
    }
}
