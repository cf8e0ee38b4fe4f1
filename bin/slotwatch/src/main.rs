use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use slotwatch_browser::Browser;
use slotwatch_core::Config;
use slotwatch_notify::TelegramNotifier;
use slotwatch_pipeline::{CommandSolver, Engine, PipelineSettings};
use slotwatch_scheduler::Monitor;

#[derive(Parser)]
#[command(name = "slotwatch")]
#[command(about = "Appointment-slot monitor with Telegram notifications", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor (long-running daemon)
    Run {
        /// Path to the configuration document
        #[arg(short, long, default_value = "configs/config.yaml")]
        config: PathBuf,
    },

    /// Load and validate the configuration, then exit
    CheckConfig {
        #[arg(short, long, default_value = "configs/config.yaml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match cli.command {
        Commands::Run { config } => run(config).await,
        Commands::CheckConfig { config } => check_config(config),
    }
}

async fn run(config_path: PathBuf) -> anyhow::Result<()> {
    let cfg = Config::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    if cfg.api_key.is_empty() {
        bail!("api_key must be set to run the monitor");
    }

    let enabled = cfg.targets.iter().filter(|t| t.enabled).count();
    info!(
        targets = cfg.targets.len(),
        enabled,
        "Configuration loaded"
    );

    let profile_dir = dirs::home_dir()
        .map(|h| h.join(".slotwatch/browser"))
        .unwrap_or_else(|| PathBuf::from(".slotwatch/browser"));
    let browser = Browser::launch(profile_dir)
        .await
        .context("launch browser")?;

    let settings = PipelineSettings::from_config(&cfg).context("pipeline settings")?;
    let solver = CommandSolver::new(cfg.solver_command.clone());
    let engine = Engine::new(browser, solver, cfg.html.clone(), settings);
    let notifier = TelegramNotifier::new(cfg.api_key.clone());

    Monitor::new(&cfg, engine, notifier).run().await;
    Ok(())
}

fn check_config(config_path: PathBuf) -> anyhow::Result<()> {
    let cfg = Config::load(&config_path)
        .with_context(|| format!("load config {}", config_path.display()))?;
    println!(
        "ok: {} targets ({} enabled), tick every {}-{} minutes, hours {}-{} (health {}-{})",
        cfg.targets.len(),
        cfg.targets.iter().filter(|t| t.enabled).count(),
        cfg.interval_minutes,
        cfg.interval_minutes + cfg.jitter_minutes,
        cfg.allowed_requests_min_hour,
        cfg.allowed_requests_max_hour,
        cfg.health_check_min_hour,
        cfg.health_check_max_hour,
    );
    Ok(())
}
