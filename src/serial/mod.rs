//! Serial Port transport contract (§4.6): the line/frame-aware abstraction
//! the AT and QCDM probes are written against.
//!
//! The AT probe needs V.1 framing plus a junk pre-filter and a buffer-full
//! signal; the QCDM probe needs a single framed request/response exchange.
//! Both are expressed here as one `SerialTransport` trait so the probes
//! can be written once against a trait object and exercised in tests
//! against a fake that never touches a real tty.
//!
//! Grounded on the `async_trait`-based pluggable probe-interface pattern
//! used for `ArmProbeInterface`/`UninitializedArmProbe` in the probe-rs
//! lineage (an `other_examples` file in this pack) — the same shape of
//! problem: a dyn-compatible async trait standing in for a family of
//! concrete hardware backends.

pub mod parser;
pub mod termios;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::{OpenFailureKind, ProbeResult};

/// AT-specific knobs the caller supplies to [`SerialTransport::open`]
/// (§4.6 "AT-specific knobs").
#[derive(Debug, Clone, Copy)]
pub struct AtOptions {
    /// Per-send delay in microseconds. Zero on a USB bus (§4.3 "Open").
    pub send_delay_us: u64,
    /// Strip the command echo from responses.
    pub remove_echo: bool,
    /// Append a line feed after the CR terminator.
    pub send_lf: bool,
}

/// Outcome of a single AT command exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtResponse {
    /// A complete V.1-terminated response, with echo already stripped if
    /// `remove_echo` was set.
    Line(String),
    /// The buffer-full-of-junk event fired instead of a decision (§4.3).
    JunkDetected,
}

/// Transport contract shared by the AT and QCDM probes. Other transports
/// (QMI, MBIM, §4.6 "Other transports") only need the narrower
/// open/close/is_open surface and are modeled separately in
/// [`crate::wdm`].
#[async_trait]
pub trait SerialTransport: Send {
    /// Open the underlying device. Idempotent: calling `open` on an
    /// already-open transport is a no-op success.
    async fn open(&mut self, options: AtOptions) -> ProbeResult<()>;

    /// Classify why `open` failed, when it returns `Err`. Transports that
    /// can't distinguish "no device" report `Other`.
    fn last_open_failure_kind(&self) -> OpenFailureKind;

    /// Close the underlying device. Idempotent: calling `close` twice, or
    /// on a never-opened transport, is a no-op.
    async fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Drain buffers and briefly toggle line-control state (§4.6 "Flash").
    async fn flash(&mut self, duration: Duration);

    /// Send one AT command and wait up to `timeout` for a V.1-terminated
    /// response or a junk-buffer event.
    async fn send_at(&mut self, command: &str, timeout: Duration) -> ProbeResult<AtResponse>;

    /// Send a framed QCDM request and wait up to `timeout` for the raw
    /// framed reply bytes.
    async fn send_qcdm(&mut self, frame: &[u8], timeout: Duration) -> ProbeResult<Vec<u8>>;
}
