use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};

use sdradio::configuration::{Cli, Parser};
use sdradio::pipeline::{Modulation, Pipeline};

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match cli.pipeline_config() {
        Ok(config) => config,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    match config.modulation {
        Modulation::Fm => info!("receiving FM at {} MHz", cli.frequency),
        Modulation::Am => info!("receiving AM at {} kHz", cli.frequency),
    }

    let pipeline = match Pipeline::open(&config) {
        Ok(pipeline) => Arc::new(pipeline),
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };

    // SIGINT and SIGTERM request a stop; the wait below then returns
    // and the devices are released before the process exits.
    let handler = Arc::clone(&pipeline);
    if let Err(err) = ctrlc::set_handler(move || handler.stop()) {
        error!("failed to install signal handler: {err}");
        return ExitCode::FAILURE;
    }

    if let Err(err) = pipeline.start() {
        error!("{err}");
        return ExitCode::FAILURE;
    }

    match pipeline.wait() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
