//! Implementation of the command line parser, using clap struct derivation.

use std::path::PathBuf;
use std::str::FromStr;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command line utility for provisioning and launching Minecraft instances, with
/// support for Fabric-family and NeoForge mod loaders.
#[derive(Debug, Parser)]
#[command(
    name = "tritium",
    version,
    long_version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("TRITIUM_GIT_REVISION"), ")"),
    author,
    disable_help_subcommand = true,
    max_term_width = 140,
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub cmd: CliCmd,
    /// Enable verbose output, the more -v argument you put, the more verbose the
    /// launcher will be.
    #[arg(short, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
    /// Change the default output format of the launcher.
    #[arg(long, global = true)]
    pub output: Option<CliOutput>,
    /// The project directory in which the instance is provisioned and run. Defaults
    /// to the current directory.
    #[arg(long, global = true)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CliOutput {
    /// Human-readable output, with color if stdout is a terminal.
    Human,
    /// Tab-separated machine output, meant to be parsed by other programs.
    Machine,
}

#[derive(Debug, Subcommand)]
pub enum CliCmd {
    Start(StartArgs),
    Kill(KillArgs),
}

// ================= //
//   START COMMAND   //
// ================= //

/// Provision and start the game.
///
/// This ensures the requested Minecraft version (and optional mod loader) is fully
/// provisioned in the project's shared cache before composing and spawning the game
/// process.
#[derive(Debug, Args)]
pub struct StartArgs {
    /// The Minecraft version to provision, e.g. "1.20.1".
    pub mc_version: String,
    /// The mod loader to install on top of the Minecraft version (see --help).
    ///
    /// Accepts a colon-separated syntax: `fabric[:<loader-version>]`,
    /// `quilt[:<loader-version>]`, `legacyfabric[:<loader-version>]`,
    /// `babric[:<loader-version>]`, or `neoforge:<version>`. Omit entirely for a
    /// vanilla instance. The loader version defaults to the latest stable release
    /// when omitted for Fabric-family loaders.
    #[arg(long)]
    pub loader: Option<String>,
    /// Only provision the instance, don't launch the game.
    #[arg(long)]
    pub dry: bool,
    /// Change the default username of the player, for offline accounts.
    #[arg(long, default_value = "Player")]
    pub username: String,
    /// Change the default UUID of the player, for offline accounts.
    #[arg(long, default_value = "00000000-0000-0000-0000-000000000000")]
    pub uuid: String,
    /// Access token to pass through to the game, obtained from an external
    /// token-provider. Left empty for offline accounts.
    #[arg(long, default_value = "")]
    pub access_token: String,
    /// Xbox user id to pass through to the game, obtained from an external
    /// token-provider.
    #[arg(long)]
    pub xuid: Option<String>,
    /// Change the resolution of the game window (<width>x<height>).
    #[arg(long)]
    pub resolution: Option<Resolution>,
    /// Maximize the game window on start instead of a fixed resolution.
    #[arg(long, conflicts_with = "resolution")]
    pub maximized: bool,
    /// Maximum JVM heap size, in megabytes.
    #[arg(long, default_value_t = 2048)]
    pub memory_max_mb: u32,
    /// Extra raw JVM arguments, appended after the composed argument list.
    #[arg(long, default_value = "")]
    pub extra_jvm_args: String,
    /// Path to a specific `java` executable to use instead of auto-detection.
    #[arg(long)]
    pub java: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((width, height)) = s.split_once('x') else {
            return Err("invalid resolution syntax, expecting <width>x<height>".to_string());
        };
        Ok(Self {
            width: width.parse().map_err(|e| format!("invalid resolution width: {e}"))?,
            height: height.parse().map_err(|e| format!("invalid resolution height: {e}"))?,
        })
    }
}

// ================= //
//   KILL COMMAND    //
// ================= //

/// Stop the tracked game process for this project.
#[derive(Debug, Args)]
pub struct KillArgs {
    /// Skip the companion-bridge graceful stop sequence and kill immediately.
    #[arg(long)]
    pub force: bool,
}
