//! # msprof - Main Entry Point
//!
//! Selects one running mode from the command line and runs it:
//! - **app** (`--application`): launch and profile an application
//! - **system** (`--sys-devices` / `--host-sys`): sample host and devices
//! - **parse / query / export**: post-process a collected result directory
//!
//! Ctrl+C cancels cooperatively: the running mode stops its tasks and
//! returns on its own thread.

use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info};

use msprof::cli::Args;
use msprof::domain::ModeError;
use msprof::host::{CancelToken, MsprofManager};
use msprof::preflight::run_preflight_checks;

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<ModeError>() {
        Some(
            ModeError::NoModeSelected
            | ModeError::ForbiddenParam { .. }
            | ModeError::MissingParam { .. }
            | ModeError::InvalidValue { .. },
        ) => EXIT_USAGE,
        _ => EXIT_ERROR,
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;
    let (params, used) = args.to_params();

    let cancel = CancelToken::new();
    let mut manager = MsprofManager::init(params.clone(), used, cancel.clone())?;
    run_preflight_checks(manager.mode_name(), &params, quiet)?;

    if !quiet {
        println!("msprof v{}", env!("CARGO_PKG_VERSION"));
        println!("mode: {}", manager.mode_name());
        println!("output: {}", params.output_dir().display());
    }

    // Setup Ctrl+C handler
    let watcher_token = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, stopping tasks...");
            watcher_token.cancel();
        }
    });

    let result = tokio::task::spawn_blocking(move || {
        let result = manager.run_mode_tasks();
        manager.stop_running_tasks();
        result
    })
    .await
    .context("Running mode panicked")?;
    watcher.abort();

    if cancel.is_cancelled() {
        debug!("Run cancelled by user");
    }
    result.map_err(Into::into)
}
