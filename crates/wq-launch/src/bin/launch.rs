//! CI entry point: submit the data-prep job for a deployment profile.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use wq_launch::{launch, OrchestrationClient, RetryPolicy};
use wq_types::{logging, LaunchConfig, ProcessEnv, Profile};

#[derive(Parser)]
#[command(name = "wq-launch", version, about = "Submit the wine-quality data-prep job")]
struct Cli {
    /// User API key for the orchestration platform
    #[arg(long, env = "DOMINO_USER_API_KEY", hide_env_values = true)]
    api_key: String,

    /// Deployment profile (dev, test, prod); also the branch that is checked out
    #[arg(long = "env")]
    profile: String,

    /// JSON file with one section of variables per profile
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Attempts for read requests
    #[arg(long, default_value_t = 3)]
    retries: u32,

    /// Attempts for the job submission itself
    #[arg(long, default_value_t = 1)]
    submit_retries: u32,

    /// Resolve everything and print the request body without submitting
    #[arg(long)]
    dry_run: bool,
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let profile = Profile::new(cli.profile);
    let config = match &cli.config {
        Some(path) => LaunchConfig::from_profile_file(path, profile, &ProcessEnv)?,
        None => LaunchConfig::from_env(&ProcessEnv, profile)?,
    };
    tracing::info!(
        "Launching for {} on {} (profile {})",
        config.project_path(),
        config.api_base_url(),
        config.profile
    );

    let client = OrchestrationClient::new(
        &config.api_host,
        cli.api_key,
        Duration::from_secs(cli.timeout_secs),
    )?
    .with_retry(RetryPolicy::attempts(cli.retries))
    .with_submit_retry(RetryPolicy::attempts(cli.submit_retries));

    let (request, _) = launch(&client, &config, cli.dry_run).await?;
    if cli.dry_run {
        println!("{}", serde_json::to_string_pretty(&request)?);
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
            tracing::error!("launch failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
