//! # XVC Server for the AMD Debug Bridge
//!
//! Linux-specific backend implementations for the XVC (Xilinx Virtual Cable)
//! server, providing drivers for various hardware debug interfaces.
//!
//! ## Overview
//!
//! This crate extends [`xvc_server`](https://docs.rs/xvc-server/) with concrete
//! implementations for Linux platforms: a FIFO streaming front end, a SerDes
//! shift engine (with a bit-bang fallback), the AXI Debug Bridge IP, and a
//! TMEM driver that auto-detects which of the two firmware generations is
//! present. Drivers are looked up in a [`registry::Registry`] rather than
//! matched on a fixed enum, so adding one doesn't touch `main`.
pub mod backends;
pub mod error;
pub mod mmio;
pub mod poll;
pub mod registry;
pub mod stream;

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use clap::Parser;
use clap_num::maybe_hex;
use env_logger::Env;
use signal_hook::consts::signal::SIGINT;
use xvc_server::server::{Config, Server};

use crate::registry::Registry;

#[derive(Parser)]
#[command(about = "Xilinx Virtual Cable (XVC) JTAG interface for AMD Debug Bridges", long_about=None)]
struct Args {
    #[arg(short, long, default_value = "2542")]
    port: u16,

    #[arg(short, long, default_value = "127.0.0.1")]
    ip: IpAddr,

    #[arg(short = 'D', long, help = "Driver to use; defaults to the registry default")]
    driver: Option<String>,

    #[arg(help = "Driver target, e.g. a UIO device path with an optional :offset")]
    target: Option<String>,

    #[arg(
        short = 'M',
        long,
        value_parser = maybe_hex::<u32>,
        help = "Maximum vector size advertised to clients, in bytes"
    )]
    max_vector_size: Option<u32>,

    #[arg(short = 'd', long, default_value = "info", help = "Driver log level")]
    debug: String,

    #[arg(trailing_var_arg = true)]
    driver_args: Vec<String>,
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(args.debug.clone())).init();
    log::info!("Starting XVC server");
    log::debug!("Parsed arguments: ip={}, port={}", args.ip, args.port);

    let mut registry = Registry::new();
    registry::register_all(&mut registry);

    let factory = match &args.driver {
        Some(name) => match registry.get(name) {
            Some(factory) => factory,
            None => {
                eprintln!("Unknown driver '{name}'. Available drivers:");
                registry.print_usage();
                return Ok(());
            }
        },
        None => match registry.default_driver() {
            Some(factory) => factory,
            None => {
                eprintln!("No default driver registered.");
                return Ok(());
            }
        },
    };

    if factory.requires_target && args.target.is_none() {
        eprintln!("Driver '{}' requires a target. Usage:", factory.name);
        (factory.usage)();
        return Ok(());
    }

    let driver = (factory.create)(&args.driver_args, args.target.as_deref())?;

    let mut config = Config::default();
    if let Some(max_vector_size) = args.max_vector_size {
        config.max_vector_size = max_vector_size;
    }
    log::debug!("Server config: max_vector_size={}", config.max_vector_size);

    let addr = SocketAddr::new(args.ip, args.port);
    log::info!("Binding to address: {}", addr);

    let server = Server::new(driver, config);

    let shutdown = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGINT, shutdown.clone())?;

    let listener_thread = thread::spawn(move || {
        if let Err(e) = server.listen(addr) {
            log::error!("Server error: {}", e);
        }
    });

    while !shutdown.load(Ordering::Relaxed) && !listener_thread.is_finished() {
        thread::sleep(Duration::from_millis(200));
    }
    log::info!("Shutting down");
    Ok(())
}
