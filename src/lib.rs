#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::unused_async)]
#![allow(clippy::implicit_hasher)]
#![allow(clippy::redundant_closure_for_method_calls)]

//! portprobe — the port probing engine of a mobile-broadband modem manager:
//! given a freshly discovered candidate modem port, determines which wire
//! protocol it speaks (AT, QCDM, QMI, MBIM) and, for AT ports, extracts
//! vendor/product strings and an Icera-chipset marker.
//!
//! Module map:
//! - `port` — port identity (`Port`, `Subsystem`, `PortType`) and metadata.
//! - `probe` — the `Probe` data model: sticky result cache, flag invariants.
//! - `registry` — owns one `Probe` per `(device, port)`, aggregate queries.
//! - `config` — tuning knobs (`ProbeConfig`), TOML-loadable with defaults.
//! - `error` — the structured `ProbeError` taxonomy.
//! - `serial` — the serial transport contract, V.1 parser, real `nix`/
//!   `AsyncFd` tty backend.
//! - `at` — the AT sub-probe scripts, classifiers, and phase driver.
//! - `qcdm` — the QCDM framed `version_info` exchange.
//! - `wdm` — QMI/MBIM open/close handles for `cdc-wdm`-class ports.
//! - `runner` — drives a probe task through its phases end to end.
//! - `classify` — derives a `PortType` from cached probe state.

pub mod at;
pub mod classify;
pub mod config;
pub mod error;
pub mod port;
pub mod probe;
pub mod qcdm;
pub mod registry;
pub mod runner;
pub mod serial;
pub mod wdm;

pub use config::ProbeConfig;
pub use error::{ProbeError, ProbeResult};
pub use port::{Port, PortMetadata, PortType, Subsystem};
pub use probe::{Probe, ProbeFlags, ProbeState};
pub use registry::ProbeRegistry;
pub use runner::{run, DefaultTransportFactory, RunRequest, TransportFactory};
