//! whip-mpegts command line entry point.
//!
//! Usage: whip-mpegts -u <WHIP URL> -p <source port> [options]
//!
//! Ctrl+C stops the pipeline and deletes the WHIP session.

use std::process;

use clap::Parser;
use log::{error, info};

use whip_mpegts::cli::Cli;
use whip_mpegts::{event_channel, Controller, ControllerEvent, GstEngine, HyperTransport};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // --help and --version are not failures
            let code = if e.use_stderr() { 1 } else { 0 };
            let _ = e.print();
            process::exit(code);
        }
    };

    let config = match cli.into_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            eprintln!("Run with --help for usage.");
            process::exit(1);
        }
    };

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("Configuration:\n{}", config);

    let (events, receiver) = event_channel::<GstEngine>();

    let engine = match GstEngine::new(events.clone()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Failed to initialize media engine: {}", e);
            process::exit(1);
        }
    };

    // Setup Ctrl+C handler
    let shutdown = events;
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Interrupt received, stopping...");
        let _ = shutdown.send(ControllerEvent::Shutdown);
    }) {
        eprintln!("Error setting Ctrl+C handler: {}", e);
        process::exit(1);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {}", e);
            process::exit(1);
        }
    };

    let controller = match Controller::new(&config, engine, HyperTransport::default(), receiver) {
        Ok(controller) => controller,
        Err(e) => {
            error!("{}", e);
            eprintln!("Failed to build pipeline: {}", e);
            process::exit(1);
        }
    };

    match runtime.block_on(controller.run()) {
        Ok(()) => info!("Stopped"),
        Err(e) => {
            eprintln!("Fatal: {}", e);
            process::exit(1);
        }
    }
}
