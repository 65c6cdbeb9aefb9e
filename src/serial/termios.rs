//! Real serial backend: a `tty` character device configured with `nix`
//! termios (raw mode, 115200 8N1, no flow control) and driven asynchronously
//! through [`tokio::io::unix::AsyncFd`].
//!
//! This is a deliberate structural departure from this codebase's other
//! serial-port handling: elsewhere a dedicated OS thread talks to the modem
//! over an `mpsc`/`oneshot` pair, since those AT commands never need to race
//! a cancellation token. Here, every command must be cancellable and
//! individually timed out via `tokio::select!`/`tokio::time::timeout`
//! (§5 "Suspension points", two-level cancellation) — a blocking-thread
//! handoff doesn't compose with that, so the fd is driven directly on the
//! reactor instead.

use std::os::fd::{AsRawFd, OwnedFd};
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::fcntl::{self, OFlag};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg, SpecialCharacterIndices};
use nix::unistd;
use tokio::io::unix::AsyncFd;

use crate::error::{OpenFailureKind, ProbeError, ProbeResult};
use crate::serial::parser::{sanitize_response, strip_echo, JunkWatchdog, ParseOutcome, V1Parser};
use crate::serial::{AtOptions, AtResponse, SerialTransport};

/// A `/dev/ttyUSBn`-style serial character device.
pub struct TtyPort {
    path: String,
    inner: Option<AsyncFd<OwnedFd>>,
    options: AtOptions,
    last_open_failure: OpenFailureKind,
    /// Session-level junk watchdog (§4.3): persists across every command
    /// sent while the transport stays open, reset only on `open`.
    junk_watchdog: JunkWatchdog,
}

impl TtyPort {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            inner: None,
            options: AtOptions {
                send_delay_us: 0,
                remove_echo: true,
                send_lf: false,
            },
            last_open_failure: OpenFailureKind::Other,
            junk_watchdog: JunkWatchdog::new(),
        }
    }
}

#[async_trait]
impl SerialTransport for TtyPort {
    async fn open(&mut self, options: AtOptions) -> ProbeResult<()> {
        if self.inner.is_some() {
            return Ok(());
        }
        self.options = options;

        let owned = fcntl::open(
            self.path.as_str(),
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_NONBLOCK,
            Mode::empty(),
        )
        .map_err(|e| {
            self.last_open_failure = classify_errno(e);
            ProbeError::OpenFailed(format!("open {}: {e}", self.path))
        })?;

        configure_termios(&owned).map_err(ProbeError::OpenFailed)?;
        let _ = termios::tcflush(&owned, termios::FlushArg::TCIOFLUSH);

        self.inner = Some(
            AsyncFd::new(owned)
                .map_err(|e| ProbeError::OpenFailed(format!("register with reactor: {e}")))?,
        );
        self.junk_watchdog = JunkWatchdog::new();
        Ok(())
    }

    fn last_open_failure_kind(&self) -> OpenFailureKind {
        self.last_open_failure
    }

    async fn close(&mut self) {
        self.inner = None;
    }

    fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    async fn flash(&mut self, duration: Duration) {
        if let Some(afd) = &self.inner {
            let _ = termios::tcflush(afd.get_ref(), termios::FlushArg::TCIOFLUSH);
        }
        tokio::time::sleep(duration).await;
        if let Some(afd) = &self.inner {
            let _ = termios::tcflush(afd.get_ref(), termios::FlushArg::TCIOFLUSH);
        }
    }

    async fn send_at(&mut self, command: &str, timeout: Duration) -> ProbeResult<AtResponse> {
        let options = self.options;
        let afd = self
            .inner
            .as_mut()
            .ok_or_else(|| ProbeError::Generic("serial port not open".to_string()))?;

        if options.send_delay_us > 0 {
            tokio::time::sleep(Duration::from_micros(options.send_delay_us)).await;
        }

        let mut out = format!("{command}\r");
        if options.send_lf {
            out.push('\n');
        }
        write_all(afd, out.as_bytes()).await?;

        let mut parser = V1Parser::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ProbeError::Timeout);
            }
            let mut buf = [0u8; 1024];
            match tokio::time::timeout(remaining, read_some(afd, &mut buf)).await {
                Err(_) => return Err(ProbeError::Timeout),
                Ok(Err(e)) => return Err(ProbeError::Generic(format!("read: {e}"))),
                Ok(Ok(0)) => continue,
                Ok(Ok(n)) => {
                    let chunk = &buf[..n];
                    // The session-level watchdog sees every byte regardless
                    // of this command's own parse outcome (§4.3) — it alone
                    // may terminate the AT probe outright.
                    if self.junk_watchdog.observe(chunk) {
                        return Ok(AtResponse::JunkDetected);
                    }
                    match parser.feed(chunk) {
                        // This command's own buffer looked like junk: a
                        // recoverable parse failure, not the terminal
                        // watchdog event — the caller advances to the next
                        // script command just like a timeout would.
                        ParseOutcome::Junk => return Err(ProbeError::ParseFailed),
                        ParseOutcome::Pending => continue,
                        ParseOutcome::Complete(text) => {
                            let cleaned = sanitize_response(&text);
                            let final_text = if options.remove_echo {
                                strip_echo(&cleaned)
                            } else {
                                cleaned
                            };
                            return Ok(AtResponse::Line(final_text));
                        }
                    }
                }
            }
        }
    }

    async fn send_qcdm(&mut self, frame: &[u8], timeout: Duration) -> ProbeResult<Vec<u8>> {
        let afd = self
            .inner
            .as_mut()
            .ok_or_else(|| ProbeError::Generic("serial port not open".to_string()))?;

        write_all(afd, frame).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut acc = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ProbeError::Timeout);
            }
            let mut buf = [0u8; 256];
            match tokio::time::timeout(remaining, read_some(afd, &mut buf)).await {
                Err(_) => return Err(ProbeError::Timeout),
                Ok(Err(e)) => return Err(ProbeError::Generic(format!("read: {e}"))),
                Ok(Ok(0)) => continue,
                Ok(Ok(n)) => {
                    acc.extend_from_slice(&buf[..n]);
                    if qcdm_frame_is_complete(&acc) {
                        return Ok(acc);
                    }
                }
            }
        }
    }
}

/// A QCDM reply is complete once both its opening and closing `0x7E`
/// markers have arrived.
fn qcdm_frame_is_complete(acc: &[u8]) -> bool {
    acc.iter().filter(|&&b| b == 0x7E).count() >= 2
}

async fn write_all(afd: &AsyncFd<OwnedFd>, data: &[u8]) -> ProbeResult<()> {
    let mut written = 0;
    while written < data.len() {
        let mut guard = afd
            .writable()
            .await
            .map_err(|e| ProbeError::Generic(format!("writable: {e}")))?;
        match guard.try_io(|inner| {
            unistd::write(inner.get_ref(), &data[written..]).map_err(std::io::Error::from)
        }) {
            Ok(Ok(n)) => written += n,
            Ok(Err(e)) => return Err(ProbeError::Generic(format!("write: {e}"))),
            Err(_would_block) => continue,
        }
    }
    Ok(())
}

async fn read_some(afd: &AsyncFd<OwnedFd>, buf: &mut [u8]) -> std::io::Result<usize> {
    loop {
        let mut guard = afd.readable().await?;
        match guard.try_io(|inner| {
            unistd::read(inner.get_ref().as_raw_fd(), buf).map_err(std::io::Error::from)
        }) {
            Ok(result) => return result,
            Err(_would_block) => continue,
        }
    }
}

fn classify_errno(e: Errno) -> OpenFailureKind {
    match e {
        Errno::ENOENT | Errno::ENODEV | Errno::ENXIO => OpenFailureKind::NoDevice,
        _ => OpenFailureKind::Other,
    }
}

/// Raw mode, 115200 8N1, `CLOCAL|CREAD`, no hardware flow control, VMIN=0
/// VTIME=1 (read returns after 100ms idle or when data arrives).
fn configure_termios(fd: &OwnedFd) -> Result<(), String> {
    let mut tio = termios::tcgetattr(fd).map_err(|e| format!("tcgetattr: {e}"))?;

    termios::cfmakeraw(&mut tio);
    termios::cfsetispeed(&mut tio, termios::BaudRate::B115200)
        .map_err(|e| format!("cfsetispeed: {e}"))?;
    termios::cfsetospeed(&mut tio, termios::BaudRate::B115200)
        .map_err(|e| format!("cfsetospeed: {e}"))?;

    tio.control_flags |= termios::ControlFlags::CLOCAL | termios::ControlFlags::CREAD;
    tio.control_flags &= !termios::ControlFlags::CRTSCTS;

    tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
    tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 1;

    termios::tcsetattr(fd, SetArg::TCSANOW, &tio).map_err(|e| format!("tcsetattr: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn qcdm_frame_needs_two_markers() {
        assert!(!qcdm_frame_is_complete(&[0x7E, 1, 2, 3]));
        assert!(qcdm_frame_is_complete(&[0x7E, 1, 2, 3, 0x7E]));
    }

    #[test]
    fn classify_errno_flags_enoent_as_no_device() {
        assert_eq!(classify_errno(Errno::ENOENT), OpenFailureKind::NoDevice);
        assert_eq!(classify_errno(Errno::ENODEV), OpenFailureKind::NoDevice);
        assert_eq!(classify_errno(Errno::EACCES), OpenFailureKind::Other);
    }
}
