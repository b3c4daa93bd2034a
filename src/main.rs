//! EmberKV Server
//!
//! Entry point for the EmberKV server binary. It opens the store (replaying
//! the journal if one exists), starts the background journal flusher, and
//! accepts TCP connections until interrupted.
//!
//! Shutdown is ordered: stop accepting, signal every connection to drain
//! its write batch and close, wait for them, then stop the flusher and
//! close the journal.

use emberkv::commands::CommandHandler;
use emberkv::connection::{handle_connection, ConnectionStats};
use emberkv::storage::{start_journal_flusher, Store};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Server configuration
struct Config {
    /// Port to listen on
    port: u16,
    /// Path of the write-ahead journal
    journal_path: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: emberkv::DEFAULT_PORT,
            journal_path: emberkv::DEFAULT_JOURNAL_PATH.to_string(),
        }
    }
}

impl Config {
    /// Parses `emberkv [<port> [<path-to-journal>]]` from the command line.
    fn from_args() -> Self {
        let mut config = Config::default();
        let args: Vec<String> = std::env::args().collect();

        if args.iter().any(|a| a == "--help") {
            print_help();
            std::process::exit(0);
        }
        if args.iter().any(|a| a == "--version" || a == "-v") {
            println!("EmberKV version {}", emberkv::VERSION);
            std::process::exit(0);
        }

        if let Some(port) = args.get(1) {
            config.port = port.parse().unwrap_or_else(|_| {
                eprintln!("Error: invalid port number '{port}'");
                std::process::exit(1);
            });
        }
        if let Some(path) = args.get(2) {
            config.journal_path = path.clone();
        }

        config
    }

    fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.port)
    }
}

fn print_help() {
    println!(
        r#"
EmberKV - In-Memory Key-Value Cache Server with a Write-Ahead Journal

USAGE:
    emberkv [<port> [<path-to-journal>]]

ARGS:
    <port>               Port to listen on (default: 8080)
    <path-to-journal>    Journal file path (default: data/wal.log)

OPTIONS:
    -v, --version        Print version information
        --help           Print this help message

EXAMPLES:
    emberkv                        # Listen on 8080, journal at data/wal.log
    emberkv 9000                   # Listen on 9000
    emberkv 9000 /var/lib/ember/wal.log

CONNECTING:
    $ nc localhost 8080
    SET name ember
    OK
    GET name
    ember
"#
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_args();

    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .init();

    // Open the store, replaying any existing journal.
    let store = Arc::new(Store::open(&config.journal_path));
    info!(
        path = %config.journal_path,
        keys = store.len(),
        "store opened"
    );

    // Background journal flush + size-triggered compaction.
    let flusher = start_journal_flusher(Arc::clone(&store));

    let stats = Arc::new(ConnectionStats::new());

    let listener = TcpListener::bind(config.bind_address()).await?;
    info!(addr = %config.bind_address(), "emberkv listening");

    // Every connection task is tracked so its write batch can drain before
    // the journal closes; the watch channel tells them when to stop.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut connections: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        let handler = CommandHandler::new(Arc::clone(&store));
                        let stats = Arc::clone(&stats);
                        let shutdown_rx = shutdown_rx.clone();
                        connections.spawn(handle_connection(
                            stream,
                            addr,
                            handler,
                            stats,
                            shutdown_rx,
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "failed to accept connection");
                    }
                }
            }
            _ = signal::ctrl_c() => {
                info!("shutdown signal received, stopping server");
                break;
            }
        }
    }

    // Stop accepting, then tell every connection to finish and wait for
    // them; each drains its batch on the way out. Only then is it safe to
    // stop the flusher and close the journal.
    drop(listener);
    let _ = shutdown_tx.send(true);
    while connections.join_next().await.is_some() {}

    flusher.shutdown().await;
    store.shutdown();
    info!("server shutdown complete");

    Ok(())
}
