//! qtest: drive a string queue from a command script
//!
//! Commands come from a file (`-f`) or standard input. Exits with status 1 if
//! any command reported an error.

use std::fs::File;
use std::io::{self, BufReader};
use std::process::exit;

use clap::Parser;
use strqueue::heap::{self, CountingHeap};
use tracing::error;
use tracing_subscriber::EnvFilter;

use config::Config;
use console::Console;

mod config;
mod console;

#[global_allocator]
static HEAP: CountingHeap = CountingHeap::new();

pub fn main() {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    heap::configure(config.heap());

    let mut console = Console::new(&config);
    let stdout = io::stdout();
    let mut out = stdout.lock();

    let result = match &config.file {
        Some(path) => match File::open(path) {
            Ok(file) => console.run(BufReader::new(file), &mut out),
            Err(e) => {
                error!("could not open {}: {}", path.display(), e);
                exit(1);
            }
        },
        None => console.run(io::stdin().lock(), &mut out),
    };

    match result {
        Ok(0) => {}
        Ok(errors) => {
            error!("{} command(s) reported errors", errors);
            exit(1);
        }
        Err(e) => {
            error!("i/o error: {}", e);
            exit(1);
        }
    }
}
