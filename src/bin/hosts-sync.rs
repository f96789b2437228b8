//! hosts-sync: edit the hosts file from a command console
//!
//! Changes are written back on a timer; edits made to the file by other
//! programs are picked up as they happen.

use clap::Parser;
use hosts_sync::cli::SyncArgs;
use hosts_sync::console::{self, Command, HELP};
use hosts_sync::HostsSync;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    let args = SyncArgs::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match args.into_config() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("[hosts-sync] Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let sync = match HostsSync::start(config) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!("[hosts-sync] Failed to start: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let line = match line {
                    Ok(Some(line)) => line,
                    Ok(None) => break,
                    Err(e) => {
                        tracing::error!("[hosts-sync] Failed to read stdin: {}", e);
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<Command>() {
                    Ok(Command::Quit) => break,
                    Ok(command) => match console::execute(&sync, command).await {
                        Ok(output) => println!("{}", output),
                        Err(e) => eprintln!("error: {}", e),
                    },
                    Err(e) => eprintln!("error: {}", e),
                }
            }
            _ = signal::ctrl_c() => {
                tracing::info!("[hosts-sync] Received Ctrl+C");
                break;
            }
        }
    }

    match sync.shutdown().await {
        Ok(report) => {
            for invalid in &report.blocked {
                tracing::warn!(
                    "[hosts-sync] Discarding unwritten record {}: {}",
                    invalid.id,
                    invalid.reason
                );
            }
            tracing::info!("[hosts-sync] Shutdown complete");
        }
        Err(e) => {
            tracing::error!("[hosts-sync] Final persist failed: {}", e);
            std::process::exit(1);
        }
    }
}
