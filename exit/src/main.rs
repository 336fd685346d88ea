mod config;
mod error;
mod nat;
mod server;

use std::io;

use clap::Parser;

use config::ExitConfig;
use server::Server;

#[derive(Parser)]
#[command(name = "halftunnel-exit", about = "Split-path tunneling exit server")]
struct Args {
    /// Path to the YAML config file.
    #[arg(long, short, default_value = "halftunnel-exit.yaml")]
    config: String,
}

fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = match std::fs::read_to_string(&args.config) {
        Ok(text) => match ExitConfig::load_yaml(&text) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("failed to parse {}: {e}", args.config);
                return;
            }
        },
        Err(_) => {
            tracing::warn!(path = %args.config, "config file not found, using defaults");
            ExitConfig::default()
        }
    };

    let server = Server::new(config);
    if let Err(e) = Server::start(&server) {
        eprintln!("failed to start exit server: {e}");
        return;
    }

    println!("halftunnel-exit running — press Enter to stop");
    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    server.stop();
}
