use std::process::ExitCode;

use clap::Parser;
use depthgate_recorder::{Args, describe, exit_code, run};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    // Missing .env is fine
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    if args.describe {
        println!("{:#}", describe());
        return ExitCode::SUCCESS;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "depthgate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(args).await {
        Ok(summary) => {
            info!(
                run_id = %summary.run_id,
                reason = ?summary.reason,
                files = summary.files.len(),
                "Recording completed"
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(exit_code(&e))
        }
    }
}
