//! Model sweep job: fit every grid combination on the prepared partitions and
//! log one tracked run per combination.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use wq_optimizer::{
    ensure_experiment, run_sweep, FailurePolicy, InMemoryTracker, MlflowClient, ModelKind,
    ParameterGrid, SweepConfig, Tracker, TrainingData,
};
use wq_types::{logging, DataPaths, ProcessEnv, TrackingConfig, DEFAULT_READ_ROOT};

#[derive(Parser, Debug)]
#[command(name = "wq-train", version, about = "Run the wine-quality hyperparameter sweep")]
struct Cli {
    /// Directory holding `<project>/WineQualityData-*.csv`
    #[arg(long, env = "WQ_DATA_ROOT", default_value = DEFAULT_READ_ROOT)]
    data_root: PathBuf,

    #[arg(long, default_value = "elasticnet")]
    model: ModelKind,

    /// JSON object of parameter name -> candidate values, replacing the built-in grid
    #[arg(long)]
    grid: Option<PathBuf>,

    /// Keep going when a combination fails instead of aborting the sweep
    #[arg(long)]
    isolate_failures: bool,

    /// Log to an in-process tracker instead of MLflow
    #[arg(long)]
    offline: bool,

    #[arg(long, env = "MLFLOW_TRACKING_URI")]
    tracking_uri: Option<String>,

    #[arg(long, env = "MLFLOW_TRACKING_TOKEN", hide_env_values = true)]
    tracking_token: Option<String>,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,
}

fn tracker_for(cli: &Cli, tracking: &TrackingConfig) -> anyhow::Result<Box<dyn Tracker>> {
    if cli.offline {
        tracing::info!("offline mode, runs are kept in memory");
        return Ok(Box::new(InMemoryTracker::new()));
    }
    let uri = cli
        .tracking_uri
        .as_deref()
        .or(tracking.tracking_uri.as_deref())
        .context("MLFLOW_TRACKING_URI is not set (pass --offline to train without a tracker)")?;
    tracing::info!("MLflow tracking URI: {uri}");

    let mut client = MlflowClient::new(uri, Duration::from_secs(cli.timeout_secs))?;
    if let Some(token) = &cli.tracking_token {
        client = client.with_token(token.clone());
    }
    Ok(Box::new(client))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let tracking = TrackingConfig::from_env(&ProcessEnv)?;
    let paths = DataPaths::for_project(&cli.data_root, &tracking.project_name);

    let mut config = SweepConfig::new(cli.model);
    if let Some(path) = &cli.grid {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading grid file {}", path.display()))?;
        let value: serde_json::Value = serde_json::from_str(&raw)
            .with_context(|| format!("parsing grid file {}", path.display()))?;
        config = config.with_grid(ParameterGrid::from_json(&value)?);
    }
    if cli.isolate_failures {
        config = config.with_failure_policy(FailurePolicy::Isolate);
    }

    let data = TrainingData::load(&paths)?;
    tracing::info!(
        "Loaded {} training and {} validation rows over {} features",
        data.x_train.nrows(),
        data.x_val.nrows(),
        data.feature_names.len()
    );

    let tracker = tracker_for(&cli, &tracking)?;
    let experiment_name = tracking.experiment_name();
    let experiment = ensure_experiment(tracker.as_ref(), &experiment_name).await?;
    tracing::info!(
        "Experiment {experiment_name} ({experiment}), model name {}",
        tracking.model_name()
    );

    let report = run_sweep(tracker.as_ref(), &experiment, &data, &config).await?;
    tracing::info!(
        "Sweep finished: {} completed, {} failed",
        report.completed(),
        report.failed()
    );
    if let Some(best) = report.best_trial() {
        let params: Vec<String> = best
            .parameters
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        tracing::info!("Best parameters: {}", params.join(", "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("training sweep failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
