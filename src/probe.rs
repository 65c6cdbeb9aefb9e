//! The `Probe` data model (§3): one per `(device, port)`, with a sticky
//! result cache and the exclusion invariants between transport families.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use bitflags::bitflags;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::port::Port;

bitflags! {
    /// Which probe kinds have been *decided* — independent of the decision
    /// itself. Grounded on the `probe-rs` pack's use of `bitflags` for
    /// probe/memory capability sets.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ProbeFlags: u16 {
        const AT         = 0b0000_0001;
        const AT_VENDOR  = 0b0000_0010;
        const AT_PRODUCT = 0b0000_0100;
        const AT_ICERA   = 0b0000_1000;
        const QCDM       = 0b0001_0000;
        const QMI        = 0b0010_0000;
        const MBIM       = 0b0100_0000;
    }
}

impl ProbeFlags {
    /// The three AT-family decision flags besides plain `AT`.
    #[must_use]
    pub fn at_family_extras() -> ProbeFlags {
        ProbeFlags::AT_VENDOR | ProbeFlags::AT_PRODUCT | ProbeFlags::AT_ICERA
    }

    /// The three non-AT transport flags.
    #[must_use]
    pub fn other_transports() -> ProbeFlags {
        ProbeFlags::QCDM | ProbeFlags::QMI | ProbeFlags::MBIM
    }
}

/// The decided results cache (§3 invariants 2-6). Every field here is
/// meaningful only when the corresponding `ProbeFlags` bit is set; readers
/// must check `flags` first.
#[derive(Debug, Default, Clone)]
pub struct ProbeState {
    pub flags: ProbeFlags,
    pub is_at: bool,
    pub is_qcdm: bool,
    pub is_qmi: bool,
    pub is_mbim: bool,
    /// Case-folded vendor string, if probed and present.
    pub vendor: Option<String>,
    /// Case-folded product string, if probed and present.
    pub product: Option<String>,
    pub is_icera: bool,
    /// Latch set once a caller-supplied custom init hook has run
    /// successfully, so re-entry into the runner doesn't re-invoke it.
    pub custom_init_run: bool,
}

impl Default for ProbeFlags {
    fn default() -> Self {
        ProbeFlags::empty()
    }
}

impl ProbeState {
    /// Decide `is_at`. Per invariant 3, this atomically decides the three
    /// other transport flags negative; per invariant 4 it leaves the
    /// AT-family sub-flags for the caller to set as sub-probes complete
    /// (decided `false` only when `at` itself is false — invariant 4).
    pub fn decide_at(&mut self, at: bool) {
        self.is_at = at;
        self.flags.insert(ProbeFlags::AT);
        if at {
            // AT excludes the other transport families.
            self.is_qcdm = false;
            self.is_qmi = false;
            self.is_mbim = false;
            self.flags.insert(ProbeFlags::other_transports());
        } else {
            // No vendor/product/icera possible without AT (invariant 4).
            self.vendor = None;
            self.product = None;
            self.is_icera = false;
            self.flags.insert(ProbeFlags::at_family_extras());
        }
    }

    pub fn decide_vendor(&mut self, vendor: Option<String>) {
        self.vendor = vendor.map(|v| v.to_lowercase());
        self.flags.insert(ProbeFlags::AT_VENDOR);
    }

    pub fn decide_product(&mut self, product: Option<String>) {
        self.product = product.map(|v| v.to_lowercase());
        self.flags.insert(ProbeFlags::AT_PRODUCT);
    }

    pub fn decide_icera(&mut self, icera: bool) {
        self.is_icera = icera;
        self.flags.insert(ProbeFlags::AT_ICERA);
    }

    /// Decide `is_qcdm`. Per invariant 5, deciding any non-AT transport
    /// positive decides all AT-family flags as absent.
    pub fn decide_qcdm(&mut self, qcdm: bool) {
        self.is_qcdm = qcdm;
        self.flags.insert(ProbeFlags::QCDM);
        if qcdm {
            self.decide_non_at_exclusive();
        }
    }

    pub fn decide_qmi(&mut self, qmi: bool) {
        self.is_qmi = qmi;
        self.flags.insert(ProbeFlags::QMI);
        if qmi {
            self.decide_non_at_exclusive();
        }
    }

    pub fn decide_mbim(&mut self, mbim: bool) {
        self.is_mbim = mbim;
        self.flags.insert(ProbeFlags::MBIM);
        if mbim {
            self.decide_non_at_exclusive();
        }
    }

    fn decide_non_at_exclusive(&mut self) {
        self.is_at = false;
        self.vendor = None;
        self.product = None;
        self.is_icera = false;
        self.flags
            .insert(ProbeFlags::AT | ProbeFlags::at_family_extras());
    }

    #[must_use]
    pub fn missing(&self, requested: ProbeFlags) -> ProbeFlags {
        requested & !self.flags
    }
}

/// Handle to an in-flight probe task, held in `Probe::task` (invariant 1).
pub(crate) struct TaskHandle {
    pub outer_cancel: CancellationToken,
    pub join: tokio::task::JoinHandle<()>,
}

/// One probe per `(device, port)` pair (§3).
pub struct Probe {
    /// Back-reference to the owning device; opaque identifier, not owned.
    pub device_id: String,
    pub port: Port,
    /// Opaque ancestor node in the sysfs-like topology; used only for
    /// grouping by callers, never read by the probe itself.
    pub parent: Option<String>,
    pub is_ignored: bool,
    pub(crate) state: Mutex<ProbeState>,
    /// At most one live task at a time (invariant 1), claimed atomically via
    /// [`Probe::try_reserve_task`]/[`Probe::release_task`] so the check
    /// never needs to await a lock.
    running: AtomicBool,
    /// Administrative handle to the current/last task, for introspection
    /// only — single-flight is enforced by `running`, not this slot.
    pub(crate) task: StdMutex<Option<TaskHandle>>,
}

impl Probe {
    #[must_use]
    pub fn new(device_id: impl Into<String>, port: Port, parent: Option<String>, is_ignored: bool) -> Arc<Self> {
        Arc::new(Self {
            device_id: device_id.into(),
            port,
            parent,
            is_ignored,
            state: Mutex::new(ProbeState::default()),
            running: AtomicBool::new(false),
            task: StdMutex::new(None),
        })
    }

    /// Snapshot of the decided-state cache.
    pub async fn snapshot(&self) -> ProbeState {
        self.state.lock().await.clone()
    }

    pub(crate) async fn with_state<R>(&self, f: impl FnOnce(&mut ProbeState) -> R) -> R {
        let mut guard = self.state.lock().await;
        f(&mut guard)
    }

    /// Atomically claim the single task slot for a new run (invariant 1).
    /// Returns `false` if a task is already live.
    pub(crate) fn try_reserve_task(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record the handle of the task that just claimed the slot.
    pub(crate) fn start_task(&self, handle: TaskHandle) {
        *self.task.lock().unwrap() = Some(handle);
    }

    /// Release the task slot on completion.
    pub(crate) fn finish_task(&self) {
        self.running.store(false, Ordering::Release);
    }
}
