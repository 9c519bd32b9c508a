use clap::Parser;
use slotwatch::app::App;
use slotwatch::cli::{Args, Command};
use slotwatch::config::Config;
use slotwatch::logging::setup_logging;
use std::process::ExitCode;
use tracing::info;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Config errors are printed directly since logging depends on the config
    let config = match Config::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };
    setup_logging(&config.log_level, args.tracing);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        commit = env!("GIT_COMMIT_SHORT"),
        command = ?args.command,
        "starting slotwatch"
    );
    if args.command == Command::Start {
        info!(config = ?config, "configuration loaded");
    }

    let app = match App::new(config) {
        Ok(app) => app,
        Err(e) => {
            tracing::error!(error = ?e, "Failed to initialize application");
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    app.run(args.command).await
}
