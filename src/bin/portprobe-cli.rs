#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # portprobe-cli
//!
//! Thin demo driver for the probing engine: given a device name, runs a
//! full probe against it with all flags requested and prints the resulting
//! classification.
//!
//! This is deliberately not a modem-manager daemon — no D-Bus, no device
//! enumeration, no plugin selection. Those stay out of scope; this binary
//! exists only to exercise [`portprobe::runner::run`] end to end against a
//! real port.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use portprobe::probe::ProbeFlags;
use portprobe::{
    classify, port::Port, port::Subsystem, run, DefaultTransportFactory, ProbeConfig, ProbeRegistry,
    RunRequest,
};

/// Probe a single candidate modem port and print its classification.
#[derive(Parser)]
#[command(name = "portprobe-cli", version)]
struct Cli {
    /// Port name under /dev, e.g. `ttyUSB2` or `cdc-wdm0`.
    port: String,

    /// Subsystem the port belongs to.
    #[arg(long, value_enum, default_value = "tty")]
    subsystem: SubsystemArg,

    /// Path to a TOML config file overlaying the compiled tuning defaults.
    #[arg(long)]
    config: Option<String>,
}

#[derive(Clone, clap::ValueEnum)]
enum SubsystemArg {
    Tty,
    Net,
    Usbmisc,
}

impl From<SubsystemArg> for Subsystem {
    fn from(v: SubsystemArg) -> Self {
        match v {
            SubsystemArg::Tty => Subsystem::Tty,
            SubsystemArg::Net => Subsystem::Net,
            SubsystemArg::Usbmisc => Subsystem::UsbMisc,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = ProbeConfig::load(cli.config.as_deref());
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    let port = Port::new(cli.subsystem.into(), cli.port.clone());
    info!(port = %port.name, "probing");

    let registry = ProbeRegistry::new();
    let probe = registry
        .get_or_create("cli", port.clone(), None, &Default::default())
        .await;

    let request = RunRequest {
        flags: ProbeFlags::AT
            | ProbeFlags::at_family_extras()
            | ProbeFlags::other_transports(),
        ..RunRequest::default()
    };

    let rx = match run(
        &probe,
        request,
        Arc::new(config),
        Arc::new(DefaultTransportFactory),
        CancellationToken::new(),
    ) {
        Ok(rx) => rx,
        Err(e) => {
            eprintln!("failed to start probe: {e}");
            std::process::exit(1);
        }
    };

    match rx.await {
        Ok(Ok(())) => {
            let snapshot = probe.snapshot().await;
            let kind = classify::port_type(&snapshot, &port);
            println!("{}: {}", port.name, kind.as_str());
            if let Some(vendor) = classify::vendor(&snapshot, &port) {
                println!("  vendor:  {vendor}");
            }
            if let Some(product) = classify::product(&snapshot, &port) {
                println!("  product: {product}");
            }
            if classify::is_icera(&snapshot, &port) {
                println!("  icera:   yes");
            }
        }
        Ok(Err(e)) => {
            eprintln!("probe failed: {e}");
            std::process::exit(1);
        }
        Err(_) => {
            eprintln!("probe task dropped its result");
            std::process::exit(1);
        }
    }
}
