// SPDX-License-Identifier: MIT

use colored::Colorize;
use log::{Level, LevelFilter, Log, Metadata, Record};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    /// Warnings and errors only.
    Quiet,
    Normal,
    /// One step of detail per `-v`.
    Verbose(u8),
}

impl LogLevel {
    pub fn from_flags(quiet: bool, verbose: u8) -> Self {
        match (quiet, verbose) {
            (true, _) => Self::Quiet,
            (false, 0) => Self::Normal,
            (false, n) => Self::Verbose(n),
        }
    }

    pub fn filter(self) -> LevelFilter {
        match self {
            Self::Quiet => LevelFilter::Warn,
            Self::Normal => LevelFilter::Info,
            Self::Verbose(1) => LevelFilter::Debug,
            Self::Verbose(_) => LevelFilter::Trace,
        }
    }

    pub fn verbosity(self) -> u8 {
        match self {
            Self::Verbose(n) => n,
            _ => 0,
        }
    }
}

struct Logger {
    level: LogLevel,
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level.filter()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        match record.level() {
            Level::Error => eprintln!("[gpttool] {} {}", "error:".red().bold(), record.args()),
            Level::Warn => eprintln!("[gpttool] {} {}", "warning:".yellow(), record.args()),
            Level::Info => println!("[gpttool] {}", record.args()),
            Level::Debug | Level::Trace => {
                println!("[gpttool] {}", format!("{}", record.args()).dimmed())
            }
        }
    }

    fn flush(&self) {}
}

/// Installs the process logger. Only the first call has an effect.
pub fn init(level: LogLevel) {
    if log::set_boxed_logger(Box::new(Logger { level })).is_ok() {
        log::set_max_level(level.filter());
    }
}
