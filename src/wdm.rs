//! WDM Probe (§4.5): for `cdc-wdm`-class ports, open-and-close a QMI
//! handle then an MBIM handle to classify. Neither handle does CTL-sync or
//! any protocol work here — probing only needs open/close semantics, so the
//! handle types expose exactly that (§4.6 "Other transports").

use async_trait::async_trait;

use crate::error::ProbeResult;
use crate::probe::Probe;

/// Narrow transport contract for QMI/MBIM: `new`, `open`, `close`,
/// `is_open`. No message exchange — the WDM probe only needs to know
/// whether the device accepts the handle.
#[async_trait]
pub trait WdmTransport: Send {
    async fn open(&mut self) -> ProbeResult<()>;
    async fn close(&mut self);
    fn is_open(&self) -> bool;
}

/// `cdc-wdmN` handle opened in QMI mode.
pub struct QmiHandle {
    port_name: String,
    fd: Option<std::os::fd::OwnedFd>,
}

impl QmiHandle {
    #[must_use]
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            fd: None,
        }
    }
}

#[async_trait]
impl WdmTransport for QmiHandle {
    async fn open(&mut self) -> ProbeResult<()> {
        open_wdm_device(&self.port_name).map(|fd| self.fd = Some(fd))
    }

    async fn close(&mut self) {
        self.fd = None;
    }

    fn is_open(&self) -> bool {
        self.fd.is_some()
    }
}

/// `cdc-wdmN` handle opened in MBIM mode.
pub struct MbimHandle {
    port_name: String,
    fd: Option<std::os::fd::OwnedFd>,
}

impl MbimHandle {
    #[must_use]
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            fd: None,
        }
    }
}

#[async_trait]
impl WdmTransport for MbimHandle {
    async fn open(&mut self) -> ProbeResult<()> {
        open_wdm_device(&self.port_name).map(|fd| self.fd = Some(fd))
    }

    async fn close(&mut self) {
        // MBIM close is specified as an explicit asynchronous operation
        // that must complete before the task completes (§4.5); dropping the
        // fd here satisfies that since there's no in-flight message to
        // drain for a probe-only open.
        self.fd = None;
    }

    fn is_open(&self) -> bool {
        self.fd.is_some()
    }
}

fn open_wdm_device(port_name: &str) -> ProbeResult<std::os::fd::OwnedFd> {
    use nix::fcntl::{self, OFlag};
    use nix::sys::stat::Mode;

    let path = format!("/dev/{port_name}");
    fcntl::open(path.as_str(), OFlag::O_RDWR | OFlag::O_NONBLOCK, Mode::empty())
        .map_err(|e| crate::error::ProbeError::OpenFailed(format!("open {path}: {e}")))
}

/// Run the QMI-then-MBIM open/close sequence and write both decisions into
/// `probe`'s cache (§4.5).
pub async fn run_wdm_phase(
    probe: &Probe,
    qmi: Option<&mut dyn WdmTransport>,
    mbim: Option<&mut dyn WdmTransport>,
) {
    match qmi {
        Some(transport) => {
            let opened = transport.open().await.is_ok();
            transport.close().await;
            probe.with_state(|s| s.decide_qmi(opened)).await;
        }
        None => probe.with_state(|s| s.decide_qmi(false)).await,
    }

    // If QMI already decided the port non-AT-exclusive and MBIM is still
    // unknown, proceed exactly as QMI did: open/close, record the result.
    match mbim {
        Some(transport) => {
            let opened = transport.open().await.is_ok();
            transport.close().await;
            probe.with_state(|s| s.decide_mbim(opened)).await;
        }
        None => probe.with_state(|s| s.decide_mbim(false)).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::{Port, Subsystem};

    struct FakeWdm {
        open_ok: bool,
        opened: bool,
    }

    #[async_trait]
    impl WdmTransport for FakeWdm {
        async fn open(&mut self) -> ProbeResult<()> {
            if self.open_ok {
                self.opened = true;
                Ok(())
            } else {
                Err(crate::error::ProbeError::OpenFailed("no device".to_string()))
            }
        }
        async fn close(&mut self) {
            self.opened = false;
        }
        fn is_open(&self) -> bool {
            self.opened
        }
    }

    #[tokio::test]
    async fn mbim_cdc_wdm_scenario() {
        // Scenario 5 from §8: QMI open fails, MBIM open succeeds.
        let probe = Probe::new(
            "dev0",
            Port::new(Subsystem::UsbMisc, "cdc-wdm0"),
            None,
            false,
        );
        let mut qmi = FakeWdm {
            open_ok: false,
            opened: false,
        };
        let mut mbim = FakeWdm {
            open_ok: true,
            opened: false,
        };
        run_wdm_phase(&probe, Some(&mut qmi), Some(&mut mbim)).await;

        let snap = probe.snapshot().await;
        assert!(!snap.is_qmi);
        assert!(snap.is_mbim);
        assert!(!qmi.is_open());
        assert!(!mbim.is_open());
    }

    #[tokio::test]
    async fn disabled_transport_decides_negative_synchronously() {
        let probe = Probe::new(
            "dev0",
            Port::new(Subsystem::UsbMisc, "cdc-wdm1"),
            None,
            false,
        );
        run_wdm_phase(&probe, None, None).await;
        let snap = probe.snapshot().await;
        assert!(!snap.is_qmi);
        assert!(!snap.is_mbim);
    }
}
