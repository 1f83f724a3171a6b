// src/cli.rs
//! CLI definitions for bbmerge
//!
//! Only the program list and debugging switches are flags; everything else
//! is configured through `BBMERGE_*` environment variables (see `config`).

use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "bbmerge")]
#[command(version)]
#[command(about = "Merge standalone Rust programs into one multicall binary", long_about = None)]
pub struct Cli {
    /// Program names or glob patterns under the source roots (default: all)
    #[arg(value_name = "PROGRAM")]
    pub programs: Vec<String>,

    /// Dump each transformed syntax tree to stderr
    #[arg(short = 'D', long)]
    pub dump_ast: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the effective configuration and exit
    #[arg(long)]
    pub show_config: bool,
}
