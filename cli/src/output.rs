//! Utilities for printing launcher state to the terminal, either as human-readable
//! status lines or as tab-separated machine output.

use std::fmt::{self, Write as _};
use std::io::Write as _;

use crate::parse::CliOutput;

#[derive(Debug)]
pub struct Output {
    mode: CliOutput,
    color: bool,
    line_buf: String,
}

impl Output {
    const STATE_COLOR: &'static [(&'static str, &'static str)] = &[
        ("OK", "\x1b[92m"),
        ("FAILED", "\x1b[31m"),
        ("WARN", "\x1b[33m"),
        ("INFO", "\x1b[34m"),
    ];

    pub fn new(mode: CliOutput, color: bool) -> Self {
        Self { mode, color, line_buf: String::new() }
    }

    /// Update the current status line (human mode only).
    pub fn state(&mut self, state: &str, message: fmt::Arguments) -> &mut Self {
        if self.mode != CliOutput::Human {
            return self;
        }

        let last_line_len = self.line_buf.len();
        self.line_buf.clear();
        if self.color {
            let color_code = Self::STATE_COLOR.iter()
                .find(|&&(s, _)| s == state)
                .map(|&(_, code)| code)
                .unwrap_or_default();
            write!(self.line_buf, "[{color_code}{state:^6}\x1b[0m] {message}").unwrap();
        } else {
            write!(self.line_buf, "[{state:^6}] {message}").unwrap();
        }

        let mut stdout = std::io::stdout().lock();
        let _ = write!(stdout, "\r{:last_line_len$}", self.line_buf);
        let _ = stdout.flush();

        self
    }

    /// Add a newline and reset the buffer, only if there was a previous status line.
    pub fn newline(&mut self) -> &mut Self {
        if self.mode != CliOutput::Human || self.line_buf.is_empty() {
            return self;
        }
        self.line_buf.clear();
        println!();
        self
    }

    /// Emit a tab-separated record (machine mode only).
    pub fn record(&mut self, fields: fmt::Arguments) {
        if self.mode == CliOutput::Machine {
            println!("{fields}");
        }
    }

    /// Print an error, regardless of mode.
    pub fn error(&mut self, message: fmt::Arguments) {
        match self.mode {
            CliOutput::Human => {
                self.newline();
                eprintln!("error: {message}");
            }
            CliOutput::Machine => println!("error\t{message}"),
        }
    }

    /// Print a warning, regardless of mode.
    pub fn warning(&mut self, message: fmt::Arguments) {
        match self.mode {
            CliOutput::Human => {
                self.state("WARN", message).newline();
            }
            CliOutput::Machine => println!("warn\t{message}"),
        }
    }
}
