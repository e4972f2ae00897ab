// log-server: ingests EAGine log event streams over stdin, AF_UNIX, and TCP,
// aggregates repeated intervals, and fans results out to a text-tree
// renderer and/or broadcast output streams.
//
// Task-shaped the way `services/forwarder/src/main.rs` wires its own
// subsystems: init tracing, load config (FATAL + exit(1) on a genuine
// error), build the pipeline, run it to completion.

mod cli;
mod config;
mod outputs;
mod readers;
mod sinks;
mod wire;

use log_sink::StreamSinkFactory;
use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "/etc/rusty-timer/log-server.toml";

/// `current_thread` + a `LocalSet`: the sink/factory graph is `Rc<RefCell<_>>`
/// and not `Send`, so every task below is `spawn_local` onto this one set
/// rather than `tokio::spawn`, matching the single-OS-thread cooperative
/// event loop the original `log_server` runs.
#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "log-server starting");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cli = cli::parse(&args).resolve();

    let cfg = match config::load(Some(&PathBuf::from(DEFAULT_CONFIG_PATH))) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("FATAL: failed to load config: {e}");
            std::process::exit(1);
        }
    };
    info!(severity_threshold = %cfg.severity_threshold, "config loaded");

    tokio::task::LocalSet::new().run_until(run(cli, cfg)).await;
}

async fn run(cli: cli::ResolvedCli, cfg: config::ServerConfig) {
    let factory: Rc<RefCell<dyn StreamSinkFactory>> = match sinks::build(&cli).await {
        Ok(factory) => factory,
        Err(e) => {
            eprintln!("FATAL: failed to build output sinks: {e}");
            std::process::exit(1);
        }
    };

    let mut unix_input_path: Option<String> = None;
    let mut reader_handles = Vec::new();

    reader_handles.push(readers::spawn_stdin_reader(
        Rc::clone(&factory),
        cfg.severity_threshold,
    ));

    if let Some(path) = &cli.local_path {
        match readers::spawn_unix_reader(path, Rc::clone(&factory), cfg.severity_threshold) {
            Ok(handle) => {
                unix_input_path = Some(path.clone());
                reader_handles.push(handle);
            }
            Err(e) => {
                eprintln!("FATAL: {e}");
                std::process::exit(1);
            }
        }
    }

    if let Some(addr) = &cli.network_addr {
        match readers::spawn_tcp_reader(addr, Rc::clone(&factory), cfg.severity_threshold).await {
            Ok((handle, bound)) => {
                info!(%bound, "TCP input reader bound");
                reader_handles.push(handle);
            }
            Err(e) => {
                eprintln!("FATAL: {e}");
                std::process::exit(1);
            }
        }
    }

    tokio::task::spawn_local({
        let factory = Rc::clone(&factory);
        async move {
            let mut tick = tokio::time::interval(Duration::from_millis(500));
            loop {
                tick.tick().await;
                factory.borrow_mut().update();
            }
        }
    });

    let all_readers_done = async {
        for handle in reader_handles {
            let _ = handle.await;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => info!("received shutdown signal"),
                Err(e) => warn!(error = %e, "failed to listen for shutdown signal"),
            }
        }
        () = all_readers_done => {
            info!("all input readers finished, shutting down");
        }
    }

    if let Some(path) = unix_input_path {
        if std::fs::remove_file(&path).is_err() {
            warn!(%path, "could not unlink AF_UNIX input socket on shutdown");
        }
    }
    if let Some(path) = &cli.socat_path {
        if std::fs::remove_file(path).is_err() {
            warn!(%path, "could not unlink AF_UNIX output socket on shutdown");
        }
    }

    info!("log-server shutting down");
}
