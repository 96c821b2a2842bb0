//! Fleet Curtailment Service (`curtailsrv`)

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use curtailsrv::bootstrap::{self, Args};
use curtailsrv::Runtime;
use errors::ServiceResult;

#[tokio::main]
async fn main() {
    if let Err(e) = run(Args::parse()).await {
        error!("{}", e);
        eprintln!("curtailsrv: {e}");
        std::process::exit(e.exit_code());
    }
}

async fn run(args: Args) -> ServiceResult<()> {
    let config = bootstrap::load_configuration(&args)?;

    // Validation mode: validate and exit
    if args.validate {
        println!("Configuration OK: {}", config.summary());
        return Ok(());
    }

    let _log_guard = bootstrap::initialize_logging(&config, &args)?;
    info!("Loaded configuration from {}", args.config.display());
    info!("{}", config.summary());

    let token = CancellationToken::new();
    let runtime = Runtime::start(&config, token.clone()).await?;

    common::shutdown_on_signal(token).await;
    info!("Shutting down");
    runtime.shutdown();
    runtime.join().await?;
    info!("Shutdown complete");
    Ok(())
}
