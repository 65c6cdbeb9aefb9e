//! Probe Runner (§4.2): drives a single probe task through its phases,
//! handling request narrowing, phase ordering, cancellation, and the
//! mandatory next-tick completion hop.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::at::{self, AtCommand, CustomInit};
use crate::config::ProbeConfig;
use crate::error::{ProbeError, ProbeResult};
use crate::port::Port;
use crate::probe::{Probe, ProbeFlags, TaskHandle};
use crate::qcdm;
use crate::serial::termios::TtyPort;
use crate::serial::{AtOptions, SerialTransport};
use crate::wdm::{MbimHandle, QmiHandle, WdmTransport};

/// Everything the caller supplies to [`run`] (§3 "Task context", §6).
pub struct RunRequest {
    pub flags: ProbeFlags,
    pub at_send_delay_us: u64,
    pub at_remove_echo: bool,
    pub at_send_lf: bool,
    pub at_custom_probe: Option<Vec<AtCommand>>,
    pub at_custom_init: Option<Arc<dyn CustomInit>>,
}

impl Default for RunRequest {
    fn default() -> Self {
        Self {
            flags: ProbeFlags::empty(),
            at_send_delay_us: 0,
            at_remove_echo: true,
            at_send_lf: false,
            at_custom_probe: None,
            at_custom_init: None,
        }
    }
}

/// Builds the transport handles a run needs. Swappable so tests can inject
/// fakes instead of touching real devices.
pub trait TransportFactory: Send + Sync {
    fn make_serial(&self, port: &Port) -> Box<dyn SerialTransport>;
    /// `None` when QMI support is compiled out — the WDM phase then
    /// decides negative synchronously (§4.5).
    fn make_qmi(&self, port: &Port) -> Option<Box<dyn WdmTransport>>;
    /// `None` when MBIM support is compiled out.
    fn make_mbim(&self, port: &Port) -> Option<Box<dyn WdmTransport>>;
}

/// Production factory: real tty/cdc-wdm backends.
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn make_serial(&self, port: &Port) -> Box<dyn SerialTransport> {
        Box::new(TtyPort::new(format!("/dev/{}", port.name)))
    }

    fn make_qmi(&self, port: &Port) -> Option<Box<dyn WdmTransport>> {
        #[cfg(feature = "qmi")]
        {
            Some(Box::new(QmiHandle::new(port.name.clone())))
        }
        #[cfg(not(feature = "qmi"))]
        {
            let _ = port;
            None
        }
    }

    fn make_mbim(&self, port: &Port) -> Option<Box<dyn WdmTransport>> {
        #[cfg(feature = "mbim")]
        {
            Some(Box::new(MbimHandle::new(port.name.clone())))
        }
        #[cfg(not(feature = "mbim"))]
        {
            let _ = port;
            None
        }
    }
}

/// Start a probe task. Fails immediately with [`ProbeError::AlreadyRunning`]
/// if one is already live on this probe (invariant 1) — detected
/// synchronously, without awaiting anything.
///
/// Returns a receiver that resolves once the task completes — always after
/// the mandatory next-tick hop (§5), never from inside a transport
/// callback.
pub fn run(
    probe: &Arc<Probe>,
    request: RunRequest,
    config: Arc<ProbeConfig>,
    factory: Arc<dyn TransportFactory>,
    outer_cancel: CancellationToken,
) -> ProbeResult<oneshot::Receiver<ProbeResult<()>>> {
    if !probe.try_reserve_task() {
        return Err(ProbeError::AlreadyRunning);
    }

    let (tx, rx) = oneshot::channel();
    let inner_cancel = outer_cancel.child_token();
    let handle_cancel = outer_cancel.clone();
    let probe_for_task = Arc::clone(probe);

    let join = tokio::spawn(async move {
        let result = drive(
            &probe_for_task,
            request,
            config.as_ref(),
            factory.as_ref(),
            &outer_cancel,
            &inner_cancel,
        )
        .await;

        // Mandatory next-tick hop: the transport's response body is
        // produced during its own close/finish sequence, so completing
        // synchronously here would race that sequence (§5).
        tokio::task::yield_now().await;

        probe_for_task.finish_task();
        let _ = tx.send(result);
    });

    probe.start_task(TaskHandle {
        outer_cancel: handle_cancel,
        join,
    });
    Ok(rx)
}

async fn drive(
    probe: &Probe,
    request: RunRequest,
    config: &ProbeConfig,
    factory: &dyn TransportFactory,
    outer_cancel: &CancellationToken,
    inner_cancel: &CancellationToken,
) -> ProbeResult<()> {
    let snapshot = probe.snapshot().await;
    let missing = snapshot.missing(request.flags);
    if missing.is_empty() {
        debug!(port = %probe.port.name, "nothing missing, completing with no I/O");
        return Ok(());
    }
    if outer_cancel.is_cancelled() {
        return Err(ProbeError::Cancelled);
    }

    let at_bits = ProbeFlags::AT | ProbeFlags::at_family_extras();
    if missing.intersects(at_bits) {
        run_at(probe, &request, config, factory, outer_cancel, inner_cancel).await?;
        if outer_cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
    }

    let snapshot = probe.snapshot().await;
    let missing = snapshot.missing(request.flags);

    if missing.contains(ProbeFlags::QCDM) {
        run_qcdm(probe, config, factory, outer_cancel).await?;
        if outer_cancel.is_cancelled() {
            return Err(ProbeError::Cancelled);
        }
    }

    let snapshot = probe.snapshot().await;
    let missing = snapshot.missing(request.flags);

    if missing.intersects(ProbeFlags::QMI | ProbeFlags::MBIM) {
        run_wdm(probe, factory).await;
    }

    Ok(())
}

async fn run_at(
    probe: &Probe,
    request: &RunRequest,
    config: &ProbeConfig,
    factory: &dyn TransportFactory,
    outer_cancel: &CancellationToken,
    inner_cancel: &CancellationToken,
) -> ProbeResult<()> {
    let mut transport = factory.make_serial(&probe.port);
    let at_options = AtOptions {
        send_delay_us: if probe.port.is_usb_bus() {
            0
        } else {
            request.at_send_delay_us
        },
        remove_echo: request.at_remove_echo,
        send_lf: request.at_send_lf,
    };
    let snapshot = probe.snapshot().await;
    let missing = snapshot.missing(request.flags) & (ProbeFlags::AT | ProbeFlags::at_family_extras());

    let result = at::run_at_phase(
        probe,
        transport.as_mut(),
        &config.at,
        at_options,
        missing,
        request.at_custom_probe.as_deref(),
        request.at_custom_init.as_deref(),
        inner_cancel,
    )
    .await;

    transport.close().await;

    match result {
        Ok(()) => Ok(()),
        Err(ProbeError::Cancelled) if outer_cancel.is_cancelled() => Err(ProbeError::Cancelled),
        Err(ProbeError::Cancelled) => {
            // Inner-only cancellation (junk event already handled inside
            // run_at_phase) — nothing further to surface here.
            Ok(())
        }
        Err(e) => {
            warn!(port = %probe.port.name, error = %e, "AT phase failed");
            Err(e)
        }
    }
}

async fn run_qcdm(
    probe: &Probe,
    config: &ProbeConfig,
    factory: &dyn TransportFactory,
    outer_cancel: &CancellationToken,
) -> ProbeResult<()> {
    let mut transport = factory.make_serial(&probe.port);
    let at_options = AtOptions {
        send_delay_us: 0,
        remove_echo: false,
        send_lf: false,
    };
    // QCDM opens its own transport handle after the AT port (if any) is
    // already closed by `run_at` (§4.4).
    transport.open(at_options).await?;

    let result = qcdm::run_qcdm_phase(probe, transport.as_mut(), &config.qcdm, outer_cancel).await;
    transport.close().await;
    result
}

async fn run_wdm(probe: &Probe, factory: &dyn TransportFactory) {
    let mut qmi = factory.make_qmi(&probe.port);
    let mut mbim = factory.make_mbim(&probe.port);
    crate::wdm::run_wdm_phase(
        probe,
        qmi.as_deref_mut(),
        mbim.as_deref_mut(),
    )
    .await;
    info!(port = %probe.port.name, "WDM phase complete");
}
