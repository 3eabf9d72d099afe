/*!
 * cinder server entry point: parse flags, set up logging and the
 * allocator, then hand control to the event loop.
 */

use anyhow::Result;
use cinder::server::Config;
use cinder::{net, DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser, Debug)]
#[command(
    name = "cinder",
    version,
    about = "RESP-compatible in-memory key-value server"
)]
struct Args {
    /// Listen host
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// Listen port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Store values that parse as base-10 integers in canonical ASCII form
    #[arg(long)]
    coerce_integers: bool,
}

fn main() -> Result<()> {
    // Respects RUST_LOG, e.g. RUST_LOG=debug cargo run --release
    env_logger::init();

    let args = Args::parse();
    let config = Config {
        host: args.host,
        port: args.port,
        coerce_integers: args.coerce_integers,
    };

    println!("cinder running on {}:{}", config.host, config.port);

    // Blocks until the process is interrupted
    net::run(config)
}
