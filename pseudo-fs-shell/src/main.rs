//! Interactive shell over a pseudo-fs volume file.
//!
//! Reads one command per line from stdin and executes it against the
//! volume named on the command line. Terminates on EOF; there is no exit
//! command.

use std::io::{self, BufRead};
use std::path::PathBuf;

use clap::Parser;

use crate::interpreter::Interpreter;

mod block_file;
mod interpreter;

/// POSIX-like shell over a single-file pseudo filesystem volume.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Volume file holding the filesystem image; if it does not exist yet,
    /// only `format <size>` is accepted and creates it
    volume: PathBuf,
}

fn main() -> io::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let mut interpreter = Interpreter::new(cli.volume);
    for line in io::stdin().lock().lines() {
        interpreter.run_line(&line?);
    }
    Ok(())
}
