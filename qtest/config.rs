//! Command-line configuration for qtest

use std::path::PathBuf;

use clap::{ArgAction, Parser};
use strqueue::heap::HeapConfig;

/// The default size of the buffer removed values are copied into
pub const STRING_LIMIT: usize = 1024;

#[derive(Parser, Debug)]
#[command(name = "qtest", about = "Run queue commands from a script or standard input", version)]
pub struct Config {
    /// Read commands from this file instead of standard input
    #[arg(short = 'f', long = "file")]
    pub file: Option<PathBuf>,

    /// Log more; repeat for more detail. RUST_LOG overrides this.
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    pub verbose: u8,

    /// Print each command before running it
    #[arg(short = 'e', long = "echo")]
    pub echo: bool,

    /// Size in bytes of the buffer `rh` copies removed values into
    #[arg(long = "string-limit", default_value_t = STRING_LIMIT)]
    pub string_limit: usize,

    /// Let this many queue allocations succeed, then fail the rest
    #[arg(long = "fail-after")]
    pub fail_after: Option<usize>,
}

impl Config {
    /// Failure injection requested on the command line
    pub fn heap(&self) -> HeapConfig {
        HeapConfig {
            fail_after: self.fail_after,
        }
    }

    /// Log filter used when RUST_LOG is not set
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
