//! Structured error taxonomy for the probing engine.
//!
//! Mirrors the shape of this codebase's other `ExecError`-style enums:
//! a plain enum with a hand-written
//! [`std::fmt::Display`] impl, no `thiserror`. Unlike those binary-only
//! enums, this one also implements [`std::error::Error`] since `portprobe`
//! is consumed as a library.

use std::fmt;

/// Errors surfaced on a probe task's completion, or returned synchronously
/// from calls that can't fail asynchronously.
#[derive(Debug, Clone)]
pub enum ProbeError {
    /// The outer cancellation token fired.
    Cancelled,
    /// A transport could not be opened, after retries where applicable.
    OpenFailed(String),
    /// The transport reported "no device" on every attempt up to the
    /// open-retry limit (§4.3 "Open"). Distinct from `OpenFailed`, which
    /// covers any other open failure and is never retried.
    OpenFailedNoDevice(String),
    /// A command did not respond within its window. Only ever produced by
    /// the QCDM phase after its single retry fails — AT timeouts are
    /// recoverable and advance to the next script command instead.
    Timeout,
    /// The framed QCDM reply failed to parse. Only ever produced internally;
    /// the QCDM phase converts this into a negative `is_qcdm` decision
    /// rather than surfacing it, so this variant should not normally reach
    /// a caller.
    ParseFailed,
    /// A response classifier actively aborted the probe: the port must not
    /// be classified at all.
    Unsupported,
    /// A caller-supplied custom init hook failed.
    CustomInitFailed(String),
    /// Fallthrough for anything else, carrying a message.
    Generic(String),
    /// [`crate::runner::run`] was called while a task was already
    /// live on this probe (invariant 1 of the data model).
    AlreadyRunning,
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Cancelled => write!(f, "probe cancelled"),
            ProbeError::OpenFailed(reason) => write!(f, "failed to open transport: {reason}"),
            ProbeError::OpenFailedNoDevice(reason) => {
                write!(f, "transport unavailable (no device): {reason}")
            }
            ProbeError::Timeout => write!(f, "command timed out"),
            ProbeError::ParseFailed => write!(f, "response failed to parse"),
            ProbeError::Unsupported => write!(f, "port classification aborted: unsupported"),
            ProbeError::CustomInitFailed(reason) => write!(f, "custom init failed: {reason}"),
            ProbeError::Generic(msg) => write!(f, "{msg}"),
            ProbeError::AlreadyRunning => write!(f, "a probe task is already running on this port"),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Result alias used throughout the crate.
pub type ProbeResult<T> = Result<T, ProbeError>;

/// Classification of an open failure, used by retry logic (§4.3, §4.6).
///
/// `NoDevice` is the only classification that triggers the AT open-retry
/// loop; anything else is an immediate terminal `OpenFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenFailureKind {
    NoDevice,
    Other,
}
