//! Port identity and the classification surface (§3, §4.7).

use std::collections::HashMap;

/// Subsystem a candidate port belongs to, as reported by the (external)
/// device enumeration layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subsystem {
    /// Serial TTY device (e.g. `ttyUSB2`).
    Tty,
    /// Network interface (e.g. `wwan0`). Never carries AT/QCDM/QMI/MBIM.
    Net,
    /// `cdc-wdm`-class character device (e.g. `cdc-wdm0`). Carries QMI or
    /// MBIM, never AT/QCDM.
    UsbMisc,
    /// Anything else; opaque to the probe.
    Other(String),
}

impl Subsystem {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Subsystem::Tty => "tty",
            Subsystem::Net => "net",
            Subsystem::UsbMisc => "usbmisc",
            Subsystem::Other(s) => s,
        }
    }

    /// Whether this subsystem is the `cdc-wdm` class addressed by the WDM
    /// probe (§4.5) — named by `usbmisc` subsystem with a `cdc-wdm` prefix
    /// on the name in ModemManager's own convention. We key off subsystem
    /// alone, matching the simplification the distillation already made.
    #[must_use]
    pub fn is_wdm_class(&self) -> bool {
        matches!(self, Subsystem::UsbMisc)
    }
}

/// Port-metadata hints supplied by the device enumeration layer (§6).
#[derive(Debug, Clone, Default)]
pub struct PortMetadata {
    /// Truthy `ID_MM_PORT_IGNORE` udev property equivalent.
    pub ignore: bool,
    /// Free-form extra hints, kept opaque to the probe (forward-compat).
    pub extra: HashMap<String, String>,
}

/// Identity of a single candidate port: `(subsystem, name)` plus an opaque
/// parent reference used only for grouping by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Port {
    pub subsystem: Subsystem,
    pub name: String,
}

impl Port {
    #[must_use]
    pub fn new(subsystem: Subsystem, name: impl Into<String>) -> Self {
        Self {
            subsystem,
            name: name.into(),
        }
    }

    #[must_use]
    pub fn is_net(&self) -> bool {
        matches!(self.subsystem, Subsystem::Net)
    }

    #[must_use]
    pub fn is_wdm_class(&self) -> bool {
        self.subsystem.is_wdm_class()
    }

    /// Heuristic used to pick the USB-bus AT send-delay override (§4.3
    /// "Open"): the distillation doesn't carry bus topology on `Port`
    /// itself, so this keys off the conventional `ttyUSBn` naming instead.
    #[must_use]
    pub fn is_usb_bus(&self) -> bool {
        self.name.to_ascii_lowercase().contains("usb")
    }
}

/// Single classification derived from cached probe state (§4.7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    Net,
    Qmi,
    Mbim,
    Qcdm,
    At,
    Unknown,
}

impl PortType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            PortType::Net => "net",
            PortType::Qmi => "qmi",
            PortType::Mbim => "mbim",
            PortType::Qcdm => "qcdm",
            PortType::At => "at",
            PortType::Unknown => "unknown",
        }
    }
}
