//! Data preparation job: select correlated features and write the four
//! train/validation partitions for a project.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use wq_data::prep::{self, IndicatorSpec, PrepConfig};
use wq_data::{SplitConfig, DEFAULT_CORRELATION_THRESHOLD};
use wq_types::{logging, DataPaths, DEFAULT_WRITE_ROOT};

#[derive(Parser, Debug)]
#[command(name = "wq-prep", version, about = "Prepare wine-quality train/validation partitions")]
struct Cli {
    /// Raw wine-quality CSV
    #[arg(long, env = "WQ_INPUT", default_value = "data/WineQualityData.csv")]
    input: PathBuf,

    /// Directory under which `<project>/WineQualityData-*.csv` is written
    #[arg(long, env = "WQ_DATA_ROOT", default_value = DEFAULT_WRITE_ROOT)]
    output_root: PathBuf,

    #[arg(long, env = "DOMINO_PROJECT_NAME")]
    project: String,

    #[arg(long, default_value = "quality")]
    target: String,

    /// Keep features whose |pearson r| with the target exceeds this
    #[arg(long, default_value_t = DEFAULT_CORRELATION_THRESHOLD)]
    threshold: f64,

    #[arg(long, default_value_t = 0.3)]
    test_fraction: f64,

    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Skip deriving `is_red` from the `type` column
    #[arg(long)]
    no_indicator: bool,
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = PrepConfig {
        input: cli.input,
        target: cli.target,
        indicator: (!cli.no_indicator).then(IndicatorSpec::default),
        threshold: cli.threshold,
        split: SplitConfig {
            test_fraction: cli.test_fraction,
            seed: cli.seed,
        },
    };
    let paths = DataPaths::for_project(&cli.output_root, &cli.project);

    prep::run(&config, &paths)?;
    Ok(())
}

fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("data preparation failed: {e:#}");
            ExitCode::FAILURE
        }
    }
}
