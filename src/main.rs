use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use comic_squash::error::Result;
use comic_squash::scheduler::Scheduler;
use comic_squash::types::statistics_string;
use comic_squash::RunReport;

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    env_logger::builder()
        .filter_level(args.log_level())
        .format_timestamp_secs()
        .parse_env("RUST_LOG")
        .init();

    let token = CancellationToken::new();
    tokio::spawn(cancel_on_signal(token.clone()));

    match run(args, token.clone()).await {
        Ok(report) => {
            for job in report.jobs.iter().filter(|j| j.is_failure()) {
                error!("{}: {:?}", job.input_path.display(), job.outcome);
            }
            info!(
                "{}",
                statistics_string(report.compressed_size(), report.original_size(), "Total")
            );
            if report.is_success() && !token.is_cancelled() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            }
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(2)
        }
    }
}

async fn run(args: Args, token: CancellationToken) -> Result<RunReport> {
    let config = args.into_config()?;
    config.preflight_check()?;

    Scheduler::with_defaults(Arc::new(config))?
        .with_cancellation(token)
        .run()
        .await
}

/// Cancels `token` on Ctrl-C or SIGTERM.
async fn cancel_on_signal(token: CancellationToken) {
    let terminate = async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            match signal(SignalKind::terminate()) {
                Ok(mut stream) => {
                    stream.recv().await;
                    return;
                }
                Err(e) => warn!("Cannot listen for SIGTERM: {e}"),
            }
        }
        std::future::pending::<()>().await
    };
    tokio::pin!(terminate);

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Cannot listen for Ctrl-C: {e}");
                (&mut terminate).await;
            }
        }
        _ = &mut terminate => {}
    }

    warn!("Interrupted, finishing up");
    token.cancel();
}
