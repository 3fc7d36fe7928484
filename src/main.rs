use std::env;
use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use loyalty_accrual::csv::{CsvError, read_submissions, write_balances};
use loyalty_accrual::{Dispatcher, HttpOracle, LoyaltyService, MemoryLedger, Settings};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum AppError {
    #[error("invalid configuration: {0}")]
    Config(#[from] config::ConfigError),

    #[error("failed to build oracle client: {0}")]
    Client(#[from] reqwest::Error),

    #[error(transparent)]
    Csv(#[from] CsvError),

    #[error("dispatcher task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let Some(path) = env::args().nth(1) else {
        error!("usage: loyalty-accrual <submissions.csv>");
        return ExitCode::FAILURE;
    };

    if !path.ends_with(".csv") {
        warn!(path, "input file seems to not be a csv file");
    }

    match run(&path).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(path: &str) -> Result<(), AppError> {
    let settings = Settings::from_env()?;
    let oracle = HttpOracle::new(&settings.oracle())?;
    let ledger = Arc::new(MemoryLedger::new());
    let cancel = CancellationToken::new();

    let (dispatcher, handle) =
        Dispatcher::new(settings.dispatcher(), oracle, ledger.clone(), cancel.clone());
    let dispatcher = tokio::spawn(dispatcher.run());

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, abandoning queued jobs");
                cancel.cancel();
            }
        }
    });

    let service = LoyaltyService::new(ledger.clone(), handle);
    for result in read_submissions(path)? {
        match result {
            Ok((user, order)) => {
                if let Err(e) = service.submit_order(user, order.as_str()).await {
                    warn!(user, order = %order, "{e}");
                }
            }
            Err(e) => warn!("{e}"),
        }
    }
    // Closing the last handle lets the dispatcher drain and stop.
    drop(service);

    let stats = dispatcher.await?;
    info!(
        processed = stats.processed,
        invalid = stats.invalid,
        dropped = stats.dropped,
        abandoned = stats.abandoned,
        "reconciliation finished"
    );

    write_balances(io::stdout().lock(), ledger.balances())?;
    Ok(())
}
