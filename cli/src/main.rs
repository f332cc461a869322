// bletext — terminal client for the BLE text link
//
// Scans for a peripheral by advertised name, connects, and exchanges
// UTF-8 text over the fixed GATT characteristic.

use std::time::Duration;

use anyhow::{Context, Result};
use bletext_core::{BleLink, BtleplugRadio, LinkConfig};
use clap::{Parser, Subcommand};
use colored::*;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

#[derive(Parser)]
#[command(name = "bletext")]
#[command(about = "Text over a BLE GATT characteristic", long_about = None)]
#[command(version)]
struct Cli {
    /// Advertised device name to scan for
    #[arg(short, long, global = true, default_value = "ESP32")]
    name: String,

    /// Scan timeout in seconds
    #[arg(long, global = true, default_value = "10")]
    scan_timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and chat interactively; one line per message
    Chat,
    /// Connect, send one message, and disconnect
    Send { message: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let config = LinkConfig {
        scan_timeout: Duration::from_secs(cli.scan_timeout),
        ..LinkConfig::default()
    };

    let link = establish(&cli.name, config).await?;
    let outcome = match cli.command {
        Commands::Chat => cmd_chat(&link).await,
        Commands::Send { message } => cmd_send(&link, &message).await,
    };
    link.disconnect().await;
    outcome
}

/// Scan for the named peripheral and bring the link to ready.
async fn establish(name: &str, config: LinkConfig) -> Result<BleLink> {
    let (radio, events) = BtleplugRadio::new()
        .await
        .context("opening bluetooth adapter")?;
    let link = BleLink::new(radio, events, config);

    println!("{} {}", "scanning for".dimmed(), name.bold());
    link.start_scan(name)
        .await
        .with_context(|| format!("no peripheral named {name} found"))?;

    println!("{}", "connecting...".dimmed());
    link.connect().await.context("connection failed")?;
    println!("{} {}", "connected to".green(), name.bold());
    Ok(link)
}

async fn cmd_chat(link: &BleLink) -> Result<()> {
    link.on_received(|text| {
        println!("{} {}", "<<".cyan().bold(), text);
    });
    println!("{}", "type a message and press enter; ctrl-c to quit".dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("reading stdin")? else {
                    break;
                };
                if line.is_empty() {
                    continue;
                }
                link.send(&line).await.context("send failed")?;
                println!("{} {}", ">>".green().bold(), line);
            }
            _ = tokio::signal::ctrl_c() => {
                debug!("interrupted");
                break;
            }
        }
    }
    println!("{}", "disconnecting".dimmed());
    Ok(())
}

async fn cmd_send(link: &BleLink, message: &str) -> Result<()> {
    link.send(message).await.context("send failed")?;
    println!("{} {}", ">>".green().bold(), message);
    Ok(())
}
