// src/main.rs

mod cli;

use anyhow::{Context, Result};
use bbmerge::{MergeConfig, Merger};
use clap::Parser;
use cli::Cli;
use tracing::info;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = MergeConfig::from_env().context("Failed to read BBMERGE_* configuration")?;

    if cli.show_config {
        let text = toml::to_string_pretty(&config).context("Failed to render configuration")?;
        print!("{}", text);
        return Ok(());
    }

    let report = Merger::new(config)
        .with_dump_ast(cli.dump_ast)
        .merge(&cli.programs)
        .context("Merge failed")?;

    for (program, reason) in &report.excluded {
        info!("Excluded {}: {}", program, reason);
    }
    println!(
        "Merged {} program(s) into {}",
        report.merged.len(),
        report.output_root.display()
    );
    Ok(())
}
