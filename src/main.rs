//! Binary entry point: load configuration, start the event loop, exit
//! with a status code reflecting what went wrong (§6).

mod config;
mod connection;
mod error;
mod headers;
mod message;
mod parser;
mod pool;
mod router;
mod server;

use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::error;

use error::Error;
use server::{Server, ServerConfig};

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = config::Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(Error::ConfigLoad(msg)) => {
            error!("configuration error: {}", msg);
            ExitCode::from(2)
        }
        Err(Error::Bind(err)) => {
            error!("failed to bind listener: {}", err);
            ExitCode::from(3)
        }
        Err(err) => {
            error!("fatal error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: config::Cli) -> Result<(), Error> {
    let backends = config::load_backends(&cli.backend_file)?;
    let listen_addr = cli.listen_addr()?;
    let poll_timeout = Some(Duration::from_millis(cli.poll_timeout_ms));

    let shutdown = Arc::new(AtomicBool::new(false));
    let handler_flag = Arc::clone(&shutdown);
    // SIGINT/SIGTERM just flip a flag the event loop checks between polls;
    // the loop itself still drains in-flight I/O before tearing anything
    // down, rather than cutting connections off mid-write (§6).
    if let Err(e) = ctrlc::set_handler(move || {
        handler_flag.store(true, Ordering::SeqCst);
    }) {
        error!("failed to install shutdown signal handler: {}", e);
    }

    let mut server = Server::new(ServerConfig {
        listen_addr,
        backends,
        poll_timeout,
    })?;

    server.run(&|| shutdown.load(Ordering::SeqCst))
}
