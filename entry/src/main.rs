mod client;
mod config;
mod error;
mod reconnect;
mod socks5;
mod splice;

use std::io;

use clap::Parser;

use client::Client;
use config::EntryConfig;

#[derive(Parser)]
#[command(name = "halftunnel-entry", about = "Split-path tunneling entry client")]
struct Args {
    /// Path to the YAML config file.
    #[arg(long, short, default_value = "halftunnel-entry.yaml")]
    config: String,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = match std::fs::read_to_string(&args.config) {
        Ok(text) => match EntryConfig::load_yaml(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("failed to parse {}: {e}", args.config);
                return;
            }
        },
        Err(_) => {
            tracing::warn!(path = %args.config, "config file not found, using defaults");
            EntryConfig::default()
        }
    };

    let client = Client::new(config);
    if let Err(e) = Client::start(&client) {
        eprintln!("failed to start entry client: {e}");
        return;
    }

    println!("halftunnel-entry running — press Enter to stop");
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    client.stop();
}
