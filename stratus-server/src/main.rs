//! `stratus-server` binary.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use stratus_config::{Config, ConfigLoad, ConfigLoader, ConfigWarnings};
use stratus_core::{FinalizeMode, TickOutcome, directory::InMemorySchedulerCache};
use stratus_model::AreaId;
use stratus_server::{
    cli::{Cli, Command},
    telemetry,
    wiring::{self, Backends},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let ConfigLoad { config, warnings } = load_config(&cli)?;
    telemetry::init(&config.log, cli.json_logs)?;
    report_warnings(&config, &warnings);

    match cli.command() {
        Command::Run => run(config).await,
        Command::CheckConfig => check_config(&config, &warnings),
        Command::ListSchedulers { area } => list_schedulers(&config, area).await,
        Command::RunOnce { maintenance } => run_once(config, maintenance).await,
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<ConfigLoad> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = &cli.config {
        loader = loader.with_config_path(path);
    }
    if let Some(path) = &cli.env_file {
        loader = loader.with_env_file(path);
    }
    loader.load().context("failed to load configuration")
}

fn report_warnings(config: &Config, warnings: &ConfigWarnings) {
    if let Some(path) = &config.metadata.config_path {
        info!(path = %path.display(), "configuration loaded");
    }
    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => warn!(hint = %hint, "{}", warning.message),
            None => warn!("{}", warning.message),
        }
    }
}

async fn run(config: Config) -> anyhow::Result<()> {
    if !config.statistic.enable {
        info!("statistic disabled; nothing to run");
        return Ok(());
    }

    let backends = Backends::connect(&config).await?;
    let directory = wiring::bootstrap_directory(
        &config,
        Arc::clone(&backends.registry),
        wiring::connector(&config)?,
        Arc::clone(&backends.cache),
    )
    .await?;

    let cancel = CancellationToken::new();
    let watch = Arc::clone(&directory).spawn_watch(cancel.child_token());
    let statistic = wiring::build_statistic(&config, directory, &backends, &cancel)?;
    statistic.start().context("failed to start statistics pipeline")?;
    info!(
        service_type = %config.service_type,
        fetchers = ?statistic.fetcher_names(),
        "stratus server running; press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown signal received");

    cancel.cancel();
    statistic.shutdown().await;
    if let Err(err) = watch.await {
        warn!(error = %err, "directory watch ended abnormally");
    }
    info!("stratus server stopped");
    Ok(())
}

fn check_config(config: &Config, warnings: &ConfigWarnings) -> anyhow::Result<()> {
    println!("service_type      {}", config.service_type);
    println!("etcd endpoints    {}", config.etcd.endpoints.join(", "));
    println!(
        "database          {}",
        if config.database.url.is_some() { "postgres" } else { "in-memory" }
    );
    println!(
        "lock backend      {}",
        if config.redis.is_some() { "redis" } else { "in-process" }
    );
    println!("crontab           {}", config.statistic.crontab);
    println!("maintenance       {}", config.statistic.maintenance_crontab);
    println!("finalize mode     {:?}", config.statistic.finalize.mode);
    println!("warnings          {}", warnings.len());
    Ok(())
}

async fn list_schedulers(config: &Config, area: Option<String>) -> anyhow::Result<()> {
    let registry = wiring::connect_registry(config).await?;
    let directory = wiring::bootstrap_directory(
        config,
        registry,
        wiring::connector(config)?,
        Arc::new(InMemorySchedulerCache::new()),
    )
    .await?;

    let schedulers = match area {
        Some(area) => directory.by_area(&AreaId::new(area)),
        None => directory.snapshot().as_ref().clone(),
    };
    for scheduler in &schedulers {
        println!("{}\t{}\t{}", scheduler.id, scheduler.area_id, scheduler.url);
    }
    info!(count = schedulers.len(), "schedulers listed");
    Ok(())
}

async fn run_once(mut config: Config, maintenance: bool) -> anyhow::Result<()> {
    // Idle detection would outlive the process; finalize behind the tick instead.
    config.statistic.finalize.mode = FinalizeMode::Cycle;
    let backends = Backends::connect(&config).await?;
    let directory = wiring::bootstrap_directory(
        &config,
        Arc::clone(&backends.registry),
        wiring::connector(&config)?,
        Arc::clone(&backends.cache),
    )
    .await?;

    let cancel = CancellationToken::new();
    let statistic = wiring::build_statistic(&config, directory, &backends, &cancel)?;
    statistic.start_workers()?;

    let outcome = statistic.run_once().await.context("tick failed")?;
    match outcome {
        TickOutcome::Skipped => info!("another replica holds the statistic lock; nothing done"),
        TickOutcome::Completed(report) => {
            statistic.flush().await.context("failed to drain job queues")?;
            info!(
                schedulers = report.schedulers,
                fetches = report.fetches,
                failed = report.failed_fetches,
                "tick complete"
            );
        }
    }

    if maintenance {
        for (task, outcome) in statistic.run_maintenance_once().await {
            match outcome {
                TickOutcome::Completed(report) if report.failed_fetches > 0 => {
                    error!(task, "maintenance task failed")
                }
                TickOutcome::Completed(_) => info!(task, "maintenance task complete"),
                TickOutcome::Skipped => info!(task, "maintenance lock held elsewhere"),
            }
        }
    }

    statistic.shutdown().await;
    Ok(())
}
