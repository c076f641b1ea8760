mod cli;
mod config;
mod data;
mod encoding;
mod server;
mod telemetry;

use clap::Parser;

fn main() {
    if let Err(err) = cli::run(cli::Cli::parse()) {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}
