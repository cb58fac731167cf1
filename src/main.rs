use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::Parser;
use tokio_stream::StreamExt;
use tracing::{info, warn};

use rabies_sim::{
    batch::{BatchRunner, TrialEvent, TrialOutcome},
    report::TracingSink,
    scenario::ScenarioLoader,
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Rabies spread simulation runner")]
struct Cli {
    /// Path to the scenario YAML file
    #[arg(long, default_value = "scenarios/small_valley.yaml")]
    scenario: PathBuf,

    /// Override the number of trials
    #[arg(long)]
    trials: Option<u64>,

    /// Override the number of trials run at once
    #[arg(long)]
    threads: Option<usize>,

    /// Override the number of simulated years
    #[arg(long)]
    years: Option<usize>,

    /// Override the master seed
    #[arg(long)]
    seed: Option<u64>,

    /// Directory for yearly snapshots
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Years between snapshots (requires a snapshot directory)
    #[arg(long)]
    snapshot_interval: Option<u32>,
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let loader = ScenarioLoader::new(".");
    let mut scenario = loader.load(&cli.scenario)?;

    if let Some(trials) = cli.trials {
        scenario.trials = trials;
    }
    if let Some(threads) = cli.threads {
        scenario.threads = threads;
    }
    if let Some(years) = cli.years {
        scenario.years = years;
    }
    if let Some(seed) = cli.seed {
        scenario.seed = seed;
    }
    if let Some(dir) = cli.snapshot_dir {
        scenario.options.snapshot_dir = Some(dir);
        if scenario.options.snapshot_interval_years == 0 {
            scenario.options.snapshot_interval_years = 1;
        }
    }
    if let Some(interval) = cli.snapshot_interval {
        scenario.options.snapshot_interval_years = interval;
    }
    scenario.validate()?;

    let name = scenario.name.clone();
    let settings = scenario.batch_settings();
    info!(
        scenario = %name,
        trials = settings.trials,
        threads = settings.threads,
        years = scenario.years,
        seed = scenario.seed,
        "starting batch"
    );
    let runner = BatchRunner::new(scenario, settings, Arc::new(TracingSink));

    let cancel = runner.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; stopping trials at the next week");
            cancel.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    let mut events = runner.subscribe();
    let progress = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            if let TrialEvent::Progress {
                trial,
                time,
                live,
                infectious,
            } = event
            {
                info!(trial, %time, live, infectious, "progress");
            }
        }
    });

    let outcomes = runner.run().await;
    drop(runner);
    let _ = progress.await;

    let mut completed = 0;
    let mut aborted = 0;
    let mut failed = 0;
    for outcome in &outcomes {
        match outcome {
            TrialOutcome::Completed(summary) => {
                completed += 1;
                println!(
                    "trial {:>3}: {:?} at {}, {} live, {} infectious",
                    summary.trial,
                    summary.stop_reason,
                    summary.final_time,
                    summary.census.live,
                    summary.census.infectious
                );
            }
            TrialOutcome::Aborted { trial, weeks_run } => {
                aborted += 1;
                println!("trial {trial:>3}: aborted after {weeks_run} weeks");
            }
            TrialOutcome::Error { trial, detail } => {
                failed += 1;
                println!("trial {trial:>3}: error: {detail}");
            }
        }
    }
    println!(
        "Scenario '{}' finished: {} completed, {} aborted, {} failed",
        name, completed, aborted, failed
    );
    if completed == 0 && !outcomes.is_empty() {
        bail!("no trial of '{}' completed", name);
    }
    Ok(())
}
