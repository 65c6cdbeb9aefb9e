//! AT Probe (§4.3): open a serial port as AT, run an optional custom init
//! hook, then the fixed `AT → VENDOR → PRODUCT → ICERA` sub-probe
//! sequence, each decided via the classifier contract.

pub mod script;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::config::AtTuning;
use crate::error::{OpenFailureKind, ProbeError, ProbeResult};
use crate::probe::{Probe, ProbeFlags};
use crate::serial::{AtOptions, AtResponse, SerialTransport};

pub use script::{
    at_bool_classifier, default_at_script, default_icera_script, default_product_script,
    default_vendor_script, icera_bool_classifier, info_string_classifier, AtCommand,
    ClassifyOutcome,
};

/// Caller-supplied hook run once, after the flash, before any script
/// command (§4.3 "Custom init").
#[async_trait]
pub trait CustomInit: Send + Sync {
    async fn run(
        &self,
        transport: &mut dyn SerialTransport,
        cancel: &CancellationToken,
    ) -> ProbeResult<()>;
}

/// Outcome of running one sub-probe's command list.
enum SubProbeOutcome<T> {
    Decided(T),
    Exhausted,
    /// The session-level junk watchdog tripped (§4.3): terminal, distinct
    /// from a single command's own parse failure, which `transport.send_at`
    /// already reports as a recoverable `Err` and never reaches here.
    Junk,
    Unsupported,
    Cancelled,
}

/// Open the port as AT, retrying on `NoDevice` up to `cfg.max_open_attempts`
/// total attempts, 1 second apart (§4.3 "Open", §8 boundary behavior).
pub async fn open_with_retry(
    transport: &mut dyn SerialTransport,
    cfg: &AtTuning,
    at_options: AtOptions,
    cancel: &CancellationToken,
) -> ProbeResult<()> {
    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        match transport.open(at_options).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                let kind = transport.last_open_failure_kind();
                if kind == OpenFailureKind::NoDevice {
                    if attempts < cfg.max_open_attempts {
                        tokio::select! {
                            () = tokio::time::sleep(Duration::from_secs(cfg.open_retry_delay_secs)) => {}
                            () = cancel.cancelled() => return Err(ProbeError::Cancelled),
                        }
                        continue;
                    }
                    return Err(ProbeError::OpenFailedNoDevice(e.to_string()));
                }
                return Err(ProbeError::OpenFailed(e.to_string()));
            }
        }
    }
}

/// Run every sub-probe phase missing from `missing`, writing decisions
/// into `probe`'s cache as they're made.
///
/// `inner_cancel` is the AT-only cancellation token (§5 "Two-level
/// cancellation"): a junk-buffer event cancels it without touching the
/// outer task token, letting the Runner advance to QCDM cleanly.
#[allow(clippy::too_many_arguments)]
pub async fn run_at_phase(
    probe: &Probe,
    transport: &mut dyn SerialTransport,
    cfg: &AtTuning,
    at_options: AtOptions,
    missing: ProbeFlags,
    custom_probe: Option<&[AtCommand]>,
    custom_init: Option<&(dyn CustomInit)>,
    inner_cancel: &CancellationToken,
) -> ProbeResult<()> {
    open_with_retry(transport, cfg, at_options, inner_cancel).await?;
    transport
        .flash(Duration::from_millis(cfg.flash_duration_ms))
        .await;

    if let Some(init) = custom_init {
        let already_run = probe.snapshot().await.custom_init_run;
        if !already_run {
            init.run(transport, inner_cancel)
                .await
                .map_err(|e| ProbeError::CustomInitFailed(e.to_string()))?;
            probe.with_state(|s| s.custom_init_run = true).await;
        }
    }

    if missing.contains(ProbeFlags::AT) {
        let default_script = default_at_script();
        let commands = custom_probe.unwrap_or(&default_script);
        match run_sub_probe(transport, commands, at_bool_classifier, None, inner_cancel).await {
            SubProbeOutcome::Decided(v) => probe.with_state(|s| s.decide_at(v)).await,
            SubProbeOutcome::Exhausted => probe.with_state(|s| s.decide_at(false)).await,
            // Watchdog tripped, not a single command's own parse failure
            // (those are recoverable and never reach this arm).
            SubProbeOutcome::Junk => {
                probe.with_state(|s| s.decide_at(false)).await;
                inner_cancel.cancel();
                return Ok(());
            }
            SubProbeOutcome::Unsupported => return Err(ProbeError::Unsupported),
            SubProbeOutcome::Cancelled => return Err(ProbeError::Cancelled),
        }
    }

    // AT decided false (or never missing) already marks the extras absent
    // (invariant 4) — only run these when AT is actually on.
    if !probe.snapshot().await.is_at {
        return Ok(());
    }

    if missing.contains(ProbeFlags::AT_VENDOR) {
        let commands = default_vendor_script();
        match run_sub_probe(
            transport,
            &commands,
            info_string_classifier,
            None,
            inner_cancel,
        )
        .await
        {
            SubProbeOutcome::Decided(v) => probe.with_state(|s| s.decide_vendor(v)).await,
            SubProbeOutcome::Exhausted => probe.with_state(|s| s.decide_vendor(None)).await,
            // Watchdog tripped; reopens the AT decision since it can fire
            // mid-script, after AT itself was already decided true.
            SubProbeOutcome::Junk => {
                probe.with_state(|s| s.decide_at(false)).await;
                inner_cancel.cancel();
                return Ok(());
            }
            SubProbeOutcome::Unsupported => return Err(ProbeError::Unsupported),
            SubProbeOutcome::Cancelled => return Err(ProbeError::Cancelled),
        }
    }

    if missing.contains(ProbeFlags::AT_PRODUCT) {
        let commands = default_product_script();
        match run_sub_probe(
            transport,
            &commands,
            info_string_classifier,
            None,
            inner_cancel,
        )
        .await
        {
            SubProbeOutcome::Decided(v) => probe.with_state(|s| s.decide_product(v)).await,
            SubProbeOutcome::Exhausted => probe.with_state(|s| s.decide_product(None)).await,
            // Watchdog tripped; same inner-cancel-only treatment as the
            // AT and vendor sub-probes above.
            SubProbeOutcome::Junk => {
                probe.with_state(|s| s.decide_at(false)).await;
                inner_cancel.cancel();
                return Ok(());
            }
            SubProbeOutcome::Unsupported => return Err(ProbeError::Unsupported),
            SubProbeOutcome::Cancelled => return Err(ProbeError::Cancelled),
        }
    }

    if missing.contains(ProbeFlags::AT_ICERA) {
        let commands = default_icera_script();
        match run_sub_probe(
            transport,
            &commands,
            icera_bool_classifier,
            Some(Duration::from_secs(cfg.icera_retry_delay_secs)),
            inner_cancel,
        )
        .await
        {
            SubProbeOutcome::Decided(v) => probe.with_state(|s| s.decide_icera(v)).await,
            SubProbeOutcome::Exhausted => probe.with_state(|s| s.decide_icera(false)).await,
            // Watchdog tripped; same inner-cancel-only treatment as the
            // sub-probes above.
            SubProbeOutcome::Junk => {
                probe.with_state(|s| s.decide_at(false)).await;
                inner_cancel.cancel();
                return Ok(());
            }
            SubProbeOutcome::Unsupported => return Err(ProbeError::Unsupported),
            SubProbeOutcome::Cancelled => return Err(ProbeError::Cancelled),
        }
    }

    Ok(())
}

async fn run_sub_probe<T>(
    transport: &mut dyn SerialTransport,
    commands: &[AtCommand],
    classify: impl Fn(&str) -> ClassifyOutcome<T>,
    inter_command_wait: Option<Duration>,
    cancel: &CancellationToken,
) -> SubProbeOutcome<T> {
    for (i, cmd) in commands.iter().enumerate() {
        if cancel.is_cancelled() {
            return SubProbeOutcome::Cancelled;
        }
        match transport.send_at(&cmd.text, cmd.timeout).await {
            // Only the session-level junk watchdog produces this; a single
            // command's own junk hit is reported as `Err(ParseFailed)` below
            // and falls through like any other per-command failure.
            Ok(AtResponse::JunkDetected) => return SubProbeOutcome::Junk,
            Ok(AtResponse::Line(text)) => match classify(&text) {
                ClassifyOutcome::Decided(v) => return SubProbeOutcome::Decided(v),
                ClassifyOutcome::Abort => return SubProbeOutcome::Unsupported,
                ClassifyOutcome::KeepTrying => {}
            },
            // Per-command timeouts/transport errors/parse failures are never
            // terminal here — they just advance to the next command
            // (§4.2 "Failure").
            Err(_) => {}
        }

        if let Some(wait) = inter_command_wait {
            if i + 1 < commands.len() {
                tokio::select! {
                    () = tokio::time::sleep(wait) => {}
                    () = cancel.cancelled() => return SubProbeOutcome::Cancelled,
                }
            }
        }
    }
    SubProbeOutcome::Exhausted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{Port, Subsystem};
    use std::sync::Mutex;

    /// A scripted fake transport: each call to `send_at` pops the next
    /// canned outcome. Lets the phase-level tests exercise the exact
    /// end-to-end scenarios from §8 without a real tty.
    struct FakeTransport {
        open_result: Option<ProbeResult<()>>,
        open_failure_kind: OpenFailureKind,
        at_responses: Mutex<Vec<ProbeResult<AtResponse>>>,
    }

    impl FakeTransport {
        fn new(at_responses: Vec<ProbeResult<AtResponse>>) -> Self {
            Self {
                open_result: Some(Ok(())),
                open_failure_kind: OpenFailureKind::Other,
                at_responses: Mutex::new(at_responses),
            }
        }
    }

    #[async_trait]
    impl SerialTransport for FakeTransport {
        async fn open(&mut self, _options: AtOptions) -> ProbeResult<()> {
            match self.open_result.take() {
                Some(r) => r,
                None => Ok(()),
            }
        }
        fn last_open_failure_kind(&self) -> OpenFailureKind {
            self.open_failure_kind
        }
        async fn close(&mut self) {}
        fn is_open(&self) -> bool {
            true
        }
        async fn flash(&mut self, _duration: Duration) {}
        async fn send_at(&mut self, _command: &str, _timeout: Duration) -> ProbeResult<AtResponse> {
            let mut responses = self.at_responses.lock().unwrap();
            if responses.is_empty() {
                Err(ProbeError::Timeout)
            } else {
                responses.remove(0)
            }
        }
        async fn send_qcdm(&mut self, _frame: &[u8], _timeout: Duration) -> ProbeResult<Vec<u8>> {
            Err(ProbeError::Timeout)
        }
    }

    fn test_probe() -> std::sync::Arc<Probe> {
        Probe::new("dev0", Port::new(Subsystem::Tty, "ttyUSB2"), None, false)
    }

    #[tokio::test]
    async fn pure_at_modem_scenario() {
        // Scenario 1 from §8: AT OK, vendor HUAWEI, product E398, no Icera.
        let mut transport = FakeTransport::new(vec![
            Ok(AtResponse::Line("OK".to_string())),
            Ok(AtResponse::Line("HUAWEI\r\nOK".to_string())),
            Ok(AtResponse::Line("E398\r\nOK".to_string())),
            Ok(AtResponse::Line("ERROR".to_string())),
            Ok(AtResponse::Line("ERROR".to_string())),
            Ok(AtResponse::Line("ERROR".to_string())),
        ]);
        let probe = test_probe();
        let cfg = AtTuning::default();
        let cancel = CancellationToken::new();
        let at_options = AtOptions {
            send_delay_us: 0,
            remove_echo: true,
            send_lf: false,
        };
        let missing = ProbeFlags::AT | ProbeFlags::at_family_extras();
        run_at_phase(
            &probe,
            &mut transport,
            &cfg,
            at_options,
            missing,
            None,
            None,
            &cancel,
        )
        .await
        .unwrap();

        let snap = probe.snapshot().await;
        assert!(snap.is_at);
        assert_eq!(snap.vendor.as_deref(), Some("huawei"));
        assert_eq!(snap.product.as_deref(), Some("e398"));
        assert!(!snap.is_icera);
    }

    #[tokio::test]
    async fn icera_modem_scenario() {
        // Scenario 2: same as above but `%IPSYS?` succeeds on first try.
        let mut transport = FakeTransport::new(vec![
            Ok(AtResponse::Line("OK".to_string())),
            Ok(AtResponse::Line("HUAWEI\r\nOK".to_string())),
            Ok(AtResponse::Line("E398\r\nOK".to_string())),
            Ok(AtResponse::Line("%IPSYS: 0,2\r\nOK".to_string())),
        ]);
        let probe = test_probe();
        let cfg = AtTuning::default();
        let cancel = CancellationToken::new();
        let at_options = AtOptions {
            send_delay_us: 0,
            remove_echo: true,
            send_lf: false,
        };
        let missing = ProbeFlags::AT | ProbeFlags::at_family_extras();
        run_at_phase(
            &probe,
            &mut transport,
            &cfg,
            at_options,
            missing,
            None,
            None,
            &cancel,
        )
        .await
        .unwrap();

        assert!(probe.snapshot().await.is_icera);
    }

    #[tokio::test]
    async fn all_at_timeouts_decide_negative() {
        // Scenario 3 half: every AT command times out.
        let mut transport = FakeTransport::new(vec![]);
        let probe = test_probe();
        let cfg = AtTuning::default();
        let cancel = CancellationToken::new();
        let at_options = AtOptions {
            send_delay_us: 0,
            remove_echo: true,
            send_lf: false,
        };
        run_at_phase(
            &probe,
            &mut transport,
            &cfg,
            at_options,
            ProbeFlags::AT,
            None,
            None,
            &cancel,
        )
        .await
        .unwrap();

        let snap = probe.snapshot().await;
        assert!(!snap.is_at);
        assert!(snap.flags.contains(ProbeFlags::AT));
    }

    #[tokio::test]
    async fn junk_decides_at_negative_and_cancels_inner_token_only() {
        // Scenario 4 half: buffer-full-of-junk arrives instead of a reply.
        let mut transport = FakeTransport::new(vec![Ok(AtResponse::JunkDetected)]);
        let probe = test_probe();
        let cfg = AtTuning::default();
        let cancel = CancellationToken::new();
        let at_options = AtOptions {
            send_delay_us: 0,
            remove_echo: true,
            send_lf: false,
        };
        run_at_phase(
            &probe,
            &mut transport,
            &cfg,
            at_options,
            ProbeFlags::AT,
            None,
            None,
            &cancel,
        )
        .await
        .unwrap();

        assert!(!probe.snapshot().await.is_at);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test]
    async fn per_command_parse_failure_advances_instead_of_aborting() {
        // A noisy response that trips a single command's own junk check (a
        // recoverable `Err(ParseFailed)`, as `TtyPort::send_at` now reports
        // it) must not be mistaken for the watchdog's terminal event — the
        // sub-probe keeps going and still reaches a decision.
        let mut transport = FakeTransport::new(vec![
            Err(ProbeError::ParseFailed),
            Ok(AtResponse::Line("OK".to_string())),
        ]);
        let probe = test_probe();
        let cfg = AtTuning::default();
        let cancel = CancellationToken::new();
        let at_options = AtOptions {
            send_delay_us: 0,
            remove_echo: true,
            send_lf: false,
        };
        run_at_phase(
            &probe,
            &mut transport,
            &cfg,
            at_options,
            ProbeFlags::AT,
            None,
            None,
            &cancel,
        )
        .await
        .unwrap();

        assert!(probe.snapshot().await.is_at);
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn cancellation_during_retry_stops_without_deciding() {
        // Scenario 6: outer-linked cancellation mid-script.
        let mut transport = FakeTransport::new(vec![Ok(AtResponse::Line("ERROR".to_string()))]);
        let probe = test_probe();
        let cfg = AtTuning::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let at_options = AtOptions {
            send_delay_us: 0,
            remove_echo: true,
            send_lf: false,
        };
        let result = run_at_phase(
            &probe,
            &mut transport,
            &cfg,
            at_options,
            ProbeFlags::AT,
            None,
            None,
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(ProbeError::Cancelled)));
        assert!(!probe.snapshot().await.flags.contains(ProbeFlags::AT));
    }
}
