//! replica-daemon: Headless peer for a shared replicated workspace.
//!
//! Runs the same replica-core engine as any other peer, over a WebSocket
//! mesh, with an on-disk cache and a stdin console in place of an editor.

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use replica_core::{LocalCache, SyncEngine, SystemClock};
use replica_daemon::console::{self, ConsoleCommand};
use replica_daemon::{Args, FileBlobStore, Mesh, SessionConfig, session};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Respects RUST_LOG, defaults to info (or debug with --verbose). Logs go
    // to stderr so stdout belongs to the console.
    let default_filter = if args.verbose {
        "debug,replica_daemon=debug,replica_core=debug"
    } else {
        "info,replica_daemon=info,replica_core=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = SessionConfig::from_args(&args)?;
    info!("Starting replica-daemon");
    info!("Peer ID: {}", config.peer_id);
    info!("Cache directory: {:?}", config.cache_dir);

    let (mesh, events) = Mesh::new(config.peer_id.clone());
    if let Some(addr) = &config.listen {
        mesh.listen(addr).await?;
    }

    let engine = SyncEngine::new(config.peer_id.clone(), config.author.clone(), SystemClock);
    let _replica_events = args.verbose.then(|| session::trace_events(engine.events()));
    let cache = LocalCache::new(FileBlobStore::new(&config.cache_dir));
    let (session, report) = session::spawn(engine, cache, mesh.clone(), events, config.sync).await;
    if !report.discarded.is_empty() {
        warn!("Started without cached {}", report.discarded.join(" and "));
    }

    for url in &config.connect {
        if let Err(e) = mesh.connect(url).await {
            warn!("{:#}", e);
        }
    }

    println!("Type `help` for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => match console::parse(&line) {
                    Ok(Some(ConsoleCommand::Quit)) => break,
                    Ok(Some(command)) => match console::execute(&session, command).await {
                        Ok(output) => println!("{}", output),
                        Err(e) => println!("error: {:#}", e),
                    },
                    Ok(None) => {}
                    Err(e) => println!("{}", e),
                },
                None => {
                    info!("stdin closed, running headless. Press Ctrl+C to stop.");
                    stdin_open = false;
                }
            },

            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("Shutting down");
    if let Err(e) = session.shutdown().await {
        warn!("Session did not shut down cleanly: {}", e);
    }
    mesh.shutdown();
    Ok(())
}
