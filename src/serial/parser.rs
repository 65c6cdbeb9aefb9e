//! Pure response parsing: the junk pre-filter, the V.1 AT response framer,
//! and the session-level junk-buffer watchdog (§4.3 "Junk filter", §4.6).
//!
//! Grounded on this codebase's own `response_is_complete` / `sanitize_response`
//! / `strip_echo` helpers, generalized into a feed-incrementally parser so
//! the serial transport can hand it chunks as they arrive rather than one
//! fully-buffered read.
//!
//! §4.3 distinguishes two independent junk mechanisms, and this module
//! keeps them as two separate types rather than one shared code path:
//! [`V1Parser`]'s own junk hit is scoped to the one command currently in
//! flight (reset between commands) and is a recoverable parse failure, no
//! different from a timeout — it just advances to the next script command.
//! [`JunkWatchdog`] instead accumulates raw bytes across the whole open
//! session, independent of which (if any) command is in flight, and is the
//! only thing allowed to decide the AT probe negative outright.

/// Length of the zero-byte run that marks a response as junk (§4.3, §8).
const JUNK_ZERO_RUN: usize = 32;

/// Literal byte markers that identify known non-AT chatter. Searched at the
/// byte level, not via string primitives, since junk can contain embedded
/// NULs that would break UTF-8 decoding (§4.3).
const JUNK_MARKERS: &[&[u8]] = &[
    b"option/faema_",
    b"os_logids.h",
    b"NETWORK SERVICE CHANGE",
];

/// Whether `buf` contains a known non-AT junk marker.
///
/// The zero-run check guards `buf.len() < JUNK_ZERO_RUN` explicitly rather
/// than relying on an unsigned subtraction that could underflow for short
/// buffers — see the corrected `is_non_at_response` behavior.
#[must_use]
pub fn is_junk(buf: &[u8]) -> bool {
    has_zero_run(buf, JUNK_ZERO_RUN) || JUNK_MARKERS.iter().any(|m| contains_marker(buf, m))
}

fn has_zero_run(buf: &[u8], run: usize) -> bool {
    if buf.len() < run {
        return false;
    }
    buf.windows(run).any(|w| w.iter().all(|&b| b == 0))
}

fn contains_marker(buf: &[u8], marker: &[u8]) -> bool {
    if buf.len() < marker.len() {
        return false;
    }
    buf.windows(marker.len()).any(|w| w == marker)
}

/// Outcome of feeding another chunk to a [`V1Parser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// No terminator seen yet; keep reading.
    Pending,
    /// A V.1 final result code terminated the response; this is the full
    /// accumulated text (echo not yet stripped).
    Complete(String),
    /// This command's own accumulated buffer matches the junk pattern.
    /// Recoverable: the caller treats this exactly like any other
    /// per-command parse failure and advances to the next script command
    /// (§4.3 "the parser sees junk" — distinct from [`JunkWatchdog`]'s
    /// terminal buffer-full event).
    Junk,
}

/// Incremental V.1 AT response framer with a junk pre-filter.
///
/// Recognizes the canonical V.1 final result codes (`OK`, `ERROR`,
/// `+CME ERROR:`, `+CMS ERROR:`) as response terminators. Scoped to a
/// single command: `reset` between commands means a noisy-but-otherwise-
/// ordinary response never taints the next command's parse.
#[derive(Debug, Default)]
pub struct V1Parser {
    buf: Vec<u8>,
}

impl V1Parser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed another chunk of bytes read from the port.
    pub fn feed(&mut self, chunk: &[u8]) -> ParseOutcome {
        self.buf.extend_from_slice(chunk);
        if is_junk(&self.buf) {
            return ParseOutcome::Junk;
        }
        let text = String::from_utf8_lossy(&self.buf).into_owned();
        if is_terminal(&text) {
            self.buf.clear();
            ParseOutcome::Complete(text)
        } else {
            ParseOutcome::Pending
        }
    }

    /// Drop any partially accumulated bytes (used between sub-probe commands).
    pub fn reset(&mut self) {
        self.buf.clear();
    }
}

/// Session-persistent junk-buffer watchdog (§4.3 "If the port raises a
/// 'buffer full of junk' event, the Probe decides `is_at=false`").
///
/// Unlike [`V1Parser`], this is never reset between commands — it
/// accumulates every raw byte read from the port for as long as the
/// transport stays open, whether or not a command is currently in flight.
/// Tripping it is the only thing that may terminate the AT probe outright
/// rather than simply advancing to the next command (§8 Scenario 4: junk
/// arriving right after open, before any command even completes, must
/// still be caught).
#[derive(Debug, Default)]
pub struct JunkWatchdog {
    buf: Vec<u8>,
}

impl JunkWatchdog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next chunk read from the port. Returns `true` once the
    /// accumulated session buffer matches the junk pattern.
    pub fn observe(&mut self, chunk: &[u8]) -> bool {
        self.buf.extend_from_slice(chunk);
        is_junk(&self.buf)
    }
}

fn is_terminal(text: &str) -> bool {
    text.lines().any(|line| {
        let trimmed = line.trim();
        trimmed == "OK"
            || trimmed == "ERROR"
            || trimmed.starts_with("+CME ERROR:")
            || trimmed.starts_with("+CMS ERROR:")
    })
}

/// Remove NUL bytes and other non-printable control characters (keeping
/// CR/LF), and the UTF-8 replacement character left by lossy decoding.
#[must_use]
pub fn sanitize_response(response: &str) -> String {
    response
        .chars()
        .filter(|&c| c == '\r' || c == '\n' || !c.is_control())
        .filter(|&c| c != '\u{FFFD}')
        .collect()
}

/// Strip the command echo from a response, leaving the lines that follow it.
/// Only applied when the caller's echo-removal knob is enabled (§4.6).
#[must_use]
pub fn strip_echo(response: &str) -> String {
    response
        .lines()
        .filter(|line| {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return false;
            }
            match trimmed.find(|c: char| c.is_ascii_alphabetic()) {
                Some(pos) => !trimmed[pos..].starts_with("AT"),
                None => true,
            }
        })
        .collect::<Vec<_>>()
        .join("\r\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thirty_two_zero_bytes_is_junk() {
        let buf = vec![0u8; 32];
        assert!(is_junk(&buf));
    }

    #[test]
    fn thirty_one_zero_bytes_is_not_junk() {
        let buf = vec![0u8; 31];
        assert!(!is_junk(&buf));
    }

    #[test]
    fn short_buffer_is_not_junk_by_the_zero_run_rule() {
        // Regression guard for the corrected underflow: a buffer shorter
        // than the marker/run length must never be treated as junk.
        assert!(!is_junk(b"AT"));
        assert!(!is_junk(b""));
    }

    #[test]
    fn literal_marker_is_junk_even_with_embedded_nuls() {
        let mut buf = b"garbage\x00".to_vec();
        buf.extend_from_slice(b"os_logids.h");
        buf.extend_from_slice(b"\x00trailer");
        assert!(is_junk(&buf));
    }

    #[test]
    fn parser_reports_pending_until_terminator() {
        let mut p = V1Parser::new();
        assert_eq!(p.feed(b"+CSQ: 15,99\r\n"), ParseOutcome::Pending);
        match p.feed(b"OK\r\n") {
            ParseOutcome::Complete(text) => assert!(text.contains("+CSQ: 15,99")),
            other => panic!("expected Complete, got {other:?}"),
        }
    }

    #[test]
    fn parser_flags_junk_mid_stream() {
        let mut p = V1Parser::new();
        assert_eq!(p.feed(&[0u8; 40]), ParseOutcome::Junk);
    }

    #[test]
    fn parser_junk_does_not_carry_over_after_reset() {
        // A noisy response that happens to trip the per-command junk check
        // must not taint the next command once reset — only the watchdog
        // is allowed to persist across commands.
        let mut p = V1Parser::new();
        assert_eq!(p.feed(&[0u8; 40]), ParseOutcome::Junk);
        p.reset();
        assert_eq!(p.feed(b"OK\r\n"), ParseOutcome::Complete("OK\r\n".to_string()));
    }

    #[test]
    fn watchdog_trips_on_a_single_chunk() {
        let mut w = JunkWatchdog::new();
        assert!(w.observe(&[0u8; 40]));
    }

    #[test]
    fn watchdog_trips_on_bytes_accumulated_across_chunks() {
        // Junk can straddle more than one read, and more than one command
        // boundary — the watchdog must still catch it.
        let mut w = JunkWatchdog::new();
        assert!(!w.observe(&[0u8; 16]));
        assert!(w.observe(&[0u8; 16]));
    }

    #[test]
    fn watchdog_does_not_trip_on_ordinary_responses() {
        let mut w = JunkWatchdog::new();
        assert!(!w.observe(b"OK\r\n"));
        assert!(!w.observe(b"+CGMI: HUAWEI\r\nOK\r\n"));
    }

    #[test]
    fn strip_echo_removes_command_line_only() {
        let response = "AT+CSQ\r\n+CSQ: 15,99\r\nOK\r\n";
        let stripped = strip_echo(response);
        assert!(stripped.contains("+CSQ: 15,99"));
        assert!(stripped.contains("OK"));
        assert!(!stripped.contains("AT+CSQ"));
    }

    #[test]
    fn sanitize_strips_nul_and_replacement_char() {
        let response = "\u{FFFD}\x00AT+CSQ\r\nOK\r\n";
        let cleaned = sanitize_response(response);
        assert!(!cleaned.contains('\u{FFFD}'));
        assert!(!cleaned.contains('\x00'));
    }
}
