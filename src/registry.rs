//! Probe Registry (§4.1): owns one [`Probe`] per `(device, port)` pair.
//!
//! Modeled on the `Arc<RwLock<HashMap<...>>>` session-pool pattern this
//! codebase uses elsewhere, including holding the write lock across the
//! whole check-and-insert on creation to avoid TOCTOU races.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::port::{Port, PortMetadata};
use crate::probe::Probe;

/// Collection of probes, indexed by port identity, owned by the registry.
#[derive(Clone, Default)]
pub struct ProbeRegistry {
    probes: Arc<RwLock<HashMap<Port, Arc<Probe>>>>,
}

impl ProbeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create-or-get a `Probe` for `(device_id, port)`. Holds the write lock
    /// across the lookup-then-insert so concurrent callers for the same
    /// port never race into creating two probes.
    pub async fn get_or_create(
        &self,
        device_id: &str,
        port: Port,
        parent: Option<String>,
        metadata: &PortMetadata,
    ) -> Arc<Probe> {
        let mut probes = self.probes.write().await;
        if let Some(existing) = probes.get(&port) {
            return Arc::clone(existing);
        }
        let probe = Probe::new(device_id, port.clone(), parent, metadata.ignore);
        probes.insert(port, Arc::clone(&probe));
        probe
    }

    pub async fn get(&self, port: &Port) -> Option<Arc<Probe>> {
        self.probes.read().await.get(port).map(Arc::clone)
    }

    /// Remove a probe (e.g. the underlying device disappeared). Returns
    /// `true` if a probe existed.
    pub async fn remove(&self, port: &Port) -> bool {
        self.probes.write().await.remove(port).is_some()
    }

    async fn all(&self) -> Vec<Arc<Probe>> {
        self.probes.read().await.values().cloned().collect()
    }

    /// `true` if any probe in `ports` is decided AT.
    pub async fn any_at_port(&self, ports: &[Port]) -> bool {
        self.any_matching(ports, |s| s.is_at).await
    }

    /// `true` if any probe in `ports` is decided QMI.
    pub async fn any_qmi_port(&self, ports: &[Port]) -> bool {
        self.any_matching(ports, |s| s.is_qmi).await
    }

    /// `true` if any probe in `ports` is decided MBIM.
    pub async fn any_mbim_port(&self, ports: &[Port]) -> bool {
        self.any_matching(ports, |s| s.is_mbim).await
    }

    /// `true` if any probe in `ports` is a decided Icera AT port.
    pub async fn any_icera(&self, ports: &[Port]) -> bool {
        self.any_matching(ports, |s| s.is_at && s.is_icera).await
    }

    async fn any_matching(&self, ports: &[Port], pred: impl Fn(&crate::probe::ProbeState) -> bool) -> bool {
        let all = self.all().await;
        for probe in all {
            if !ports.contains(&probe.port) {
                continue;
            }
            let snap = probe.snapshot().await;
            if pred(&snap) {
                return true;
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::Subsystem;

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let reg = ProbeRegistry::new();
        let port = Port::new(Subsystem::Tty, "ttyUSB2");
        let meta = PortMetadata::default();
        let a = reg.get_or_create("dev0", port.clone(), None, &meta).await;
        let b = reg.get_or_create("dev0", port, None, &meta).await;
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn any_at_port_reflects_cached_decision() {
        let reg = ProbeRegistry::new();
        let port = Port::new(Subsystem::Tty, "ttyUSB2");
        let meta = PortMetadata::default();
        let probe = reg.get_or_create("dev0", port.clone(), None, &meta).await;
        probe.with_state(|s| s.decide_at(true)).await;
        assert!(reg.any_at_port(&[port]).await);
    }

    #[tokio::test]
    async fn remove_drops_the_probe() {
        let reg = ProbeRegistry::new();
        let port = Port::new(Subsystem::Tty, "ttyUSB0");
        let meta = PortMetadata::default();
        reg.get_or_create("dev0", port.clone(), None, &meta).await;
        assert!(reg.remove(&port).await);
        assert!(reg.get(&port).await.is_none());
    }
}
