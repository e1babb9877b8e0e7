//! `secwatch` - CLI for sectionwatch
//!
//! This binary replays recorded scroll and navigation scenarios through the
//! section tracker and manages its configuration.

#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

use anyhow::Context;
use clap::Parser;

use sectionwatch::cli::{Cli, Command, ConfigCommand, ReplayCommand};
use sectionwatch::replay::{replay, ReplayOptions, ReplayReport, Scenario};
use sectionwatch::{init_logging, Config, TrackerSettings};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    init_logging(cli.verbosity());

    // Load configuration
    let config = Config::load_from(cli.config.clone()).context("failed to load configuration")?;

    match cli.command {
        Command::Replay(replay_cmd) => handle_replay(&config, &replay_cmd),
        Command::Config(config_cmd) => handle_config(&config, config_cmd),
    }
}

fn handle_replay(config: &Config, cmd: &ReplayCommand) -> anyhow::Result<()> {
    let scenario = Scenario::load(&cmd.file)
        .with_context(|| format!("failed to load scenario {}", cmd.file.display()))?;

    let mut settings = TrackerSettings::from(config);
    if let Some(settle_ms) = cmd.settle_ms {
        settings.settle_ms = settle_ms;
    }
    if let Some(suppress_ms) = cmd.suppress_ms {
        settings.suppress_ms = suppress_ms;
    }
    let options = ReplayOptions {
        settings,
        progress: cmd.progress.map_or(config.progress.mode, Into::into),
        sync_fragment: config.route.sync_fragment,
    };

    let report = replay(&scenario, &options).context("replay failed")?;
    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn print_report(report: &ReplayReport) {
    println!("{:>8}  {:<24} {:<24} {:>5} {:>6}", "AT(ms)", "ACTIVE", "REASON", "TICK", "PROG");
    for t in &report.transitions {
        let active = t.active.as_ref().map_or("-", |id| id.as_str());
        println!(
            "{:>8}  {:<24} {:<24} {:>5} {:>5.1}%",
            t.at,
            active,
            t.reason.to_string(),
            t.tick,
            t.progress
        );
        if !t.breadcrumb.is_empty() {
            println!("{:>10}{}", "", t.breadcrumb.join(" > "));
        }
    }

    for rejection in &report.rejected {
        println!("rejected at {}ms: {}", rejection.at, rejection.error);
    }

    println!();
    println!("Final: {}", report.final_active().unwrap_or("none"));
    if let Some(fragment) = &report.fragment {
        println!("Fragment: {fragment}");
    }
    for entry in &report.toc {
        let marker = if entry.is_active {
            '*'
        } else if entry.is_near_active {
            '~'
        } else {
            ' '
        };
        let indent = "  ".repeat(usize::from(entry.level.saturating_sub(1)));
        println!("{marker} {indent}{}", entry.title);
    }
}

fn handle_config(config: &Config, cmd: ConfigCommand) -> anyhow::Result<()> {
    match cmd {
        ConfigCommand::Show { json } => {
            if json {
                println!("{}", serde_json::to_string_pretty(config)?);
            } else {
                println!("Current Configuration");
                println!("=====================");
                println!();
                println!("[Aggregator]");
                println!("  Settle (ms):        {}", config.aggregator.settle_ms);
                println!();
                println!("[Navigation]");
                println!("  Suppress (ms):      {}", config.navigation.suppress_ms);
                println!("  Smooth scroll:      {}", config.navigation.smooth_scroll);
                println!();
                println!("[Observer]");
                println!("  Poll interval (ms): {}", config.observer.poll_interval_ms);
                println!("  Thresholds:         {:?}", config.observer.thresholds);
                println!("  Channel capacity:   {}", config.observer.channel_capacity);
                println!();
                println!("[Progress]");
                println!("  Mode:               {}", config.progress.mode);
                println!();
                println!("[Route]");
                println!("  Sync fragment:      {}", config.route.sync_fragment);
            }
        }
        ConfigCommand::Path => {
            println!("{}", Config::default_config_path().display());
        }
        ConfigCommand::Validate { file } => {
            let path = file.unwrap_or_else(Config::default_config_path);
            println!("Validating configuration: {}", path.display());
            match Config::load_from(Some(path)) {
                Ok(_) => println!("Configuration is valid."),
                Err(e) => println!("Configuration error: {e}"),
            }
        }
    }
    Ok(())
}
