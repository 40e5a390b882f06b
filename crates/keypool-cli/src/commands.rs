use anyhow::Context;
use colored::Colorize;
use keypool_core::KeypoolConfig;

use crate::cli::*;
use crate::simulate::{self, SimulationReport};

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = load_config(&cli)?;
    match cli.command {
        Command::Config(_) => cmd_config(&config, &cli.format),
        Command::Simulate(ref args) => cmd_simulate(config, args, &cli.format).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<KeypoolConfig> {
    let mut config = match &cli.config {
        Some(path) => KeypoolConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => KeypoolConfig::default(),
    };
    config.apply_env().context("applying KEYPOOL_* overrides")?;
    config.validate()?;
    Ok(config)
}

fn cmd_config(config: &KeypoolConfig, format: &OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(config)?),
        OutputFormat::Text => print!("{}", config.to_toml_string()?),
    }
    Ok(())
}

async fn cmd_simulate(
    config: KeypoolConfig,
    args: &SimulateArgs,
    format: &OutputFormat,
) -> anyhow::Result<()> {
    let report = simulate::run(config, args).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Text => print_report(&report),
    }
    if report.overlaps > 0 {
        anyhow::bail!("{} submissions shared a key slot", report.overlaps);
    }
    Ok(())
}

fn print_report(report: &SimulationReport) {
    println!(
        "{} {} submissions from {} workers on {}",
        "✓".green().bold(),
        report.submissions.to_string().bold(),
        report.workers,
        report.address.cyan(),
    );
    println!(
        "  Key slots: {} of {} created, {} retries on exhaustion",
        report.slots_created.to_string().bold(),
        report.max_slots,
        report.retries,
    );
    for (index, uses) in report.slot_usage.iter().enumerate() {
        println!("  key[{}]  {} submissions", index.to_string().yellow(), uses);
    }
    println!("  Account key lookups: {} (memoized)", report.key_lookups);
    let overlaps = if report.overlaps == 0 {
        "none".green()
    } else {
        report.overlaps.to_string().red().bold()
    };
    println!("  Overlapping slot use: {overlaps}");
    if !report.recent.is_empty() {
        println!("\nRecent transactions:");
        for txid in &report.recent {
            println!("  {}", txid.dimmed());
        }
    }
}
