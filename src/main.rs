//! Tissue Tiler CLI Tool
//!
//! Tiles whole slide images and encodes each tissue tile with JPEG XL
//! under an SSIM floor.

use clap::Parser;
use std::process::ExitCode;
use tissue_tiler::cli::{run, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
