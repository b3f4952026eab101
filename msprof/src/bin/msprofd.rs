//! # msprofd - Device Agent
//!
//! Accepts host sessions over TCP and feeds them to the collection entry.
//! The first packet of every session is its handshake; everything after is
//! handled by a receiver (control) or an uploader (data).

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use msprof::cli::DaemonArgs;
use msprof::device::{serve, DeviceContext, IdentityMapper, SimulatedEngineFactory, UploaderRegistry};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            EXIT_ERROR
        }
    });
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = DaemonArgs::parse();

    let uploaders = Arc::new(UploaderRegistry::new());
    let factory = Arc::new(SimulatedEngineFactory::new(Arc::clone(&uploaders), args.output.clone()));
    let ctx = Arc::new(DeviceContext::new(factory, Arc::new(IdentityMapper), uploaders));

    let listener = TcpListener::bind(&args.listen)
        .with_context(|| format!("Failed to listen on {}", args.listen))?;
    println!("msprofd v{}", env!("CARGO_PKG_VERSION"));
    println!("listening: {}", args.listen);
    println!("devices: {}", args.devices);

    // Accepting blocks; it runs on a plain thread so shutdown does not wait for it
    let serve_ctx = Arc::clone(&ctx);
    let devices = args.devices;
    thread::Builder::new()
        .name("msprofd-accept".to_string())
        .spawn(move || serve(&serve_ctx, &listener, devices))
        .context("Failed to start accept thread")?;

    tokio::signal::ctrl_c().await.context("Failed to wait for Ctrl+C")?;
    info!("Shutting down");
    ctx.shutdown();
    Ok(())
}
