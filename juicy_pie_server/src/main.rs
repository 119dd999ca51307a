// CLI entry point for the juicy-pie control server.
//
// Runs the demo world (`demo.rs`) at a fixed tick rate and serves the demo
// command set on a TCP port. Each loop iteration advances the world one tick,
// then lets the server admit connections and dispatch queued commands, then
// sleeps for the rest of the tick interval.
//
// Usage:
//   juicy-pie [OPTIONS]
//     --config <PATH>         JSON config file (missing fields use defaults)
//     --port <PORT>           Listen port (default: 4711)
//     --bind <ADDR>           Listen address (default: 127.0.0.1)
//     --tick-rate <HZ>        Simulation ticks per second (default: 20)
//     --enable-script-eval    Register `script.eval`
//
// Log verbosity follows `RUST_LOG` (default `info`).

use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;
use std::time::Instant;

use clap::Parser;
use juicy_pie_server::demo::{DemoWorld, build_registry};
use juicy_pie_server::{Server, ServerConfig, ServerError};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "juicy-pie")]
#[command(about = "Line-protocol control server for a tick-driven simulation", long_about = None)]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(short, long)]
    bind: Option<String>,

    /// Simulation ticks per second
    #[arg(long)]
    tick_rate: Option<u32>,

    /// Register the `script.eval` command
    #[arg(long)]
    enable_script_eval: bool,
}

impl Args {
    fn into_config(self) -> Result<ServerConfig, ServerError> {
        let mut config = match &self.config {
            Some(path) => ServerConfig::load(path)?,
            None => ServerConfig::default(),
        };
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(bind) = self.bind {
            config.bind_address = bind;
        }
        if let Some(rate) = self.tick_rate {
            config.tick_rate_hz = rate;
        }
        if self.enable_script_eval {
            config.features.script_eval = true;
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "juicy-pie failed");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), ServerError> {
    let config = args.into_config()?;
    let registry = build_registry(&config.features);
    let mut server = Server::bind(&config, registry)?;
    info!(
        addr = %server.local_addr(),
        tick_rate = config.tick_rate_hz,
        script_eval = config.features.script_eval,
        "serving demo world"
    );

    let interval = config.tick_interval();
    let mut world = DemoWorld::new();
    loop {
        let started = Instant::now();
        world.step();
        server.tick(&mut world);
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }
}
