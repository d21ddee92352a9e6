//! Entry point of the `tritium` command line utility.

mod cmd;
mod output;
mod parse;

use std::process::ExitCode;

use clap::Parser;

fn main() -> ExitCode {
    let args = parse::CliArgs::parse();
    cmd::main(&args)
}
