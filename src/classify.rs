//! Classification Surface (§4.7): derives a single `PortType` from cached
//! probe state plus subsystem/name heuristics, and narrows the AT/QCDM/
//! vendor/product/Icera queries so they return false/absent for port
//! classes that can't carry those protocols.

use crate::port::{Port, PortType};
use crate::probe::ProbeState;

/// `net` and `cdc-wdm`-class ports can never carry AT/QCDM; queries for
/// those fields on such a port must read as false/absent regardless of
/// whatever the cache holds.
fn at_qcdm_meaningful(port: &Port) -> bool {
    !port.is_net() && !port.is_wdm_class()
}

#[must_use]
pub fn port_type(state: &ProbeState, port: &Port) -> PortType {
    if port.is_net() {
        return PortType::Net;
    }
    if port.is_wdm_class() {
        if state.is_qmi {
            return PortType::Qmi;
        }
        if state.is_mbim {
            return PortType::Mbim;
        }
        return PortType::Unknown;
    }
    if state.flags.contains(crate::probe::ProbeFlags::QCDM) && state.is_qcdm {
        return PortType::Qcdm;
    }
    if state.flags.contains(crate::probe::ProbeFlags::AT) && state.is_at {
        return PortType::At;
    }
    PortType::Unknown
}

#[must_use]
pub fn is_at(state: &ProbeState, port: &Port) -> bool {
    at_qcdm_meaningful(port) && state.is_at
}

#[must_use]
pub fn is_qcdm(state: &ProbeState, port: &Port) -> bool {
    at_qcdm_meaningful(port) && state.is_qcdm
}

#[must_use]
pub fn vendor(state: &ProbeState, port: &Port) -> Option<String> {
    if at_qcdm_meaningful(port) {
        state.vendor.clone()
    } else {
        None
    }
}

#[must_use]
pub fn product(state: &ProbeState, port: &Port) -> Option<String> {
    if at_qcdm_meaningful(port) {
        state.product.clone()
    } else {
        None
    }
}

#[must_use]
pub fn is_icera(state: &ProbeState, port: &Port) -> bool {
    at_qcdm_meaningful(port) && state.is_icera
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Subsystem;

    #[test]
    fn net_port_is_always_net_type() {
        let port = Port::new(Subsystem::Net, "wwan0");
        let mut state = ProbeState::default();
        state.decide_at(true);
        assert_eq!(port_type(&state, &port), PortType::Net);
        assert!(!is_at(&state, &port));
    }

    #[test]
    fn wdm_class_port_prefers_qmi_over_mbim() {
        let port = Port::new(Subsystem::UsbMisc, "cdc-wdm0");
        let mut state = ProbeState::default();
        state.decide_qmi(true);
        assert_eq!(port_type(&state, &port), PortType::Qmi);
    }

    #[test]
    fn at_port_classifies_as_at() {
        let port = Port::new(Subsystem::Tty, "ttyUSB2");
        let mut state = ProbeState::default();
        state.decide_at(true);
        assert_eq!(port_type(&state, &port), PortType::At);
        assert!(is_at(&state, &port));
    }

    #[test]
    fn undecided_port_is_unknown() {
        let port = Port::new(Subsystem::Tty, "ttyUSB1");
        let state = ProbeState::default();
        assert_eq!(port_type(&state, &port), PortType::Unknown);
    }
}
