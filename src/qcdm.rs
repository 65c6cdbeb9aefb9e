//! QCDM Probe (§4.4): one framed `version_info` request/response exchange,
//! with a single retry on timeout or generic transport error, but never on
//! a parse failure (a bad frame won't parse better the second time).

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::QcdmTuning;
use crate::error::{ProbeError, ProbeResult};
use crate::probe::Probe;
use crate::serial::SerialTransport;

/// HDLC-style frame marker prefixed to every QCDM request (§4.4).
const FRAME_MARKER: u8 = 0x7E;

/// `version_info_request` command code plus its fixed 8-byte payload —
/// this crate doesn't need to interpret the reply beyond "did it parse",
/// so the request body is an opaque constant (§1 "out of scope": QCDM's
/// own wire semantics beyond what probing needs).
const VERSION_INFO_REQUEST: [u8; 9] = [0x00, 0, 0, 0, 0, 0, 0, 0, 0];

/// Build the probe buffer: `0x7E || version_info_request`.
#[must_use]
pub fn build_probe_buffer() -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + VERSION_INFO_REQUEST.len());
    buf.push(FRAME_MARKER);
    buf.extend_from_slice(&VERSION_INFO_REQUEST);
    buf
}

/// Parse a raw reply into a `version_info` result. Any reply that doesn't
/// start with the frame marker, or is too short to hold a version_info
/// body, fails to parse.
fn parse_version_info(reply: &[u8]) -> ProbeResult<()> {
    if reply.first() != Some(&FRAME_MARKER) {
        return Err(ProbeError::ParseFailed);
    }
    if reply.len() < VERSION_INFO_REQUEST.len() + 1 {
        return Err(ProbeError::ParseFailed);
    }
    Ok(())
}

/// Open the port as QCDM (closing any AT port first is the Runner's job —
/// see §4.4), then send the probe buffer, parse the reply, and write the
/// decision into `probe`'s cache.
///
/// Transport-open failure is terminal for the task; retry applies only to
/// the send/parse step.
pub async fn run_qcdm_phase(
    probe: &Probe,
    transport: &mut dyn SerialTransport,
    cfg: &QcdmTuning,
    cancel: &CancellationToken,
) -> ProbeResult<()> {
    let timeout = Duration::from_secs(cfg.command_timeout_secs);
    let request = build_probe_buffer();

    let first = send_and_parse(transport, &request, timeout, cancel).await;
    match first {
        Ok(()) => {
            probe.with_state(|s| s.decide_qcdm(true)).await;
            return Ok(());
        }
        Err(ProbeError::ParseFailed) => {
            probe.with_state(|s| s.decide_qcdm(false)).await;
            return Ok(());
        }
        Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
        Err(_) => {
            // Timeout or generic error: retry once with the saved copy.
        }
    }

    match send_and_parse(transport, &request, timeout, cancel).await {
        Ok(()) => probe.with_state(|s| s.decide_qcdm(true)).await,
        Err(ProbeError::Cancelled) => return Err(ProbeError::Cancelled),
        Err(_) => probe.with_state(|s| s.decide_qcdm(false)).await,
    }
    Ok(())
}

async fn send_and_parse(
    transport: &mut dyn SerialTransport,
    request: &[u8],
    timeout: Duration,
    cancel: &CancellationToken,
) -> ProbeResult<()> {
    if cancel.is_cancelled() {
        return Err(ProbeError::Cancelled);
    }
    let reply = transport.send_qcdm(request, timeout).await?;
    parse_version_info(&reply)
}
