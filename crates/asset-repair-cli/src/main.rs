mod commands;
mod logging;
mod progress;

use std::process;

use anyhow::Context;
use asset_repair_core::manifest::pin_revision_url;
use asset_repair_core::{AppConfig, RepairEngine, RepairReport};
use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use progress::CliReporter;
use tracing::{error, info};

fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let args = Cli::parse();

    // pin-url needs no install
    if let Some(Commands::PinUrl { base, revision }) = &args.command {
        println!("{}", pin_revision_url(base, revision)?);
        return Ok(());
    }

    let mut config = match asset_repair_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };
    if args.fast {
        config.fast_mode = true;
    }
    if let Some(threads) = args.threads {
        config.thread_count = threads;
    }

    match args.command {
        Some(Commands::Check { json }) => {
            if let Err(err) = run_check(config, json) {
                error!("Error: {:#}", err);
                process::exit(1);
            }
        }
        Some(Commands::ScanRedundant) => {
            if let Err(err) = run_scan_redundant(config) {
                error!("Error: {:#}", err);
                process::exit(1);
            }
        }
        Some(Commands::Migrate) => {
            if let Err(err) = run_migrate(config) {
                error!("Error: {:#}", err);
                process::exit(1);
            }
        }
        Some(Commands::PrintConfig) => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::PinUrl { .. }) => {}
        None => {
            let _ = Cli::command().print_long_help();
        }
    }

    Ok(())
}

fn run_check(config: AppConfig, json: bool) -> anyhow::Result<()> {
    let engine = RepairEngine::new(config).context("creating repair engine")?;
    let reporter = CliReporter::new();
    let report = engine.run(&reporter).context("verification pass failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.entries)?);
        return Ok(());
    }

    print_report(&report);
    Ok(())
}

fn print_report(report: &RepairReport) {
    println!();
    for asset in &report.broken {
        println!("{} {} ({} bytes)", "repair".red(), asset.remote_name, asset.size);
    }
    for asset in &report.removal {
        let path = asset
            .local_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| asset.remote_name.clone());
        println!("{} {}", "delete".yellow(), path);
    }

    if let Some(revision) = &report.revision {
        info!("Base revision {}", revision.cyan());
    }
    let migration = &report.migration;
    if !migration.purged.is_empty() || migration.audio_moved + migration.video_moved > 0 {
        info!(
            "{} directories purged, {} audio and {} video files moved",
            format!("{}", migration.purged.len()).cyan(),
            format!("{}", migration.audio_moved).cyan(),
            format!("{}", migration.video_moved).cyan(),
        );
    }
    info!(
        "Checked {} files ({} workers) in {}",
        format!("{}", report.progress.count_current).green(),
        report.workers,
        format!("{:.2}s", report.duration.as_secs_f64()).green(),
    );
    info!(
        "{} files to repair ({} bytes), {} files to delete",
        format!("{}", report.broken.len()).red(),
        format!("{}", report.progress.found_size).red(),
        format!("{}", report.removal.len()).yellow(),
    );
}

fn run_scan_redundant(config: AppConfig) -> anyhow::Result<()> {
    let engine = RepairEngine::new(config)?;
    let reporter = CliReporter::new();
    let scan = engine.scan_redundant(&reporter)?;
    reporter.on_done();

    for asset in &scan.removal {
        if let Some(path) = &asset.local_path {
            println!("{} {}", "delete".yellow(), path.display());
        }
    }
    for list in &scan.consumed_lists {
        info!("Consumed deletion list {}", list.display());
    }
    info!(
        "{} redundant files",
        format!("{}", scan.removal.len()).yellow()
    );
    Ok(())
}

fn run_migrate(config: AppConfig) -> anyhow::Result<()> {
    let engine = RepairEngine::new(config)?;
    let reporter = CliReporter::new();
    let report = engine.migrate(&reporter)?;
    reporter.on_done();

    for dir in &report.purged {
        info!("Removed {}", dir.display());
    }
    info!(
        "{} audio and {} video files moved to streaming assets",
        format!("{}", report.audio_moved).green(),
        format!("{}", report.video_moved).green(),
    );
    Ok(())
}
