//! Options snapshot store
//!
//! Single view over the live bypass state: packet-engine options plus the
//! DNS state. Captures and reads snapshots; writes go through the engine and
//! the DNS toggler.

use std::sync::Arc;

use gdpi_core::{BypassOptions, DnsState, StateSnapshot};
use gdpi_platform::{DnsController, PacketEngine, Result};

/// Live bypass state
#[derive(Clone)]
pub struct OptionsStore {
    engine: Arc<dyn PacketEngine>,
    dns: Arc<dyn DnsController>,
}

impl OptionsStore {
    /// Wrap the packet engine and the DNS toggler
    pub fn new(engine: Arc<dyn PacketEngine>, dns: Arc<dyn DnsController>) -> Self {
        Self { engine, dns }
    }

    /// Capture the full current state
    pub fn snapshot(&self) -> StateSnapshot {
        StateSnapshot::new(self.engine.options_snapshot(), self.dns.dns_state())
    }

    /// Current options
    pub fn options(&self) -> BypassOptions {
        self.engine.options_snapshot()
    }

    /// Current DNS state
    pub fn dns_state(&self) -> DnsState {
        self.dns.dns_state()
    }

    /// Push options to the packet engine
    pub async fn apply_options(&self, options: &BypassOptions) -> Result<()> {
        self.engine.apply_options(options).await
    }

    /// Turn DoH on with the given provider preset
    pub async fn enable_doh(&self, dns_preset: &str) -> Result<()> {
        self.dns.apply_doh(dns_preset).await
    }

    /// Restore the system DNS configuration
    pub async fn disable_doh(&self) -> Result<()> {
        self.dns.restore_dns().await
    }

    /// Bring DNS back to `target`
    pub async fn restore_dns_state(&self, target: &DnsState) -> Result<()> {
        if target.doh_enabled {
            self.dns.apply_doh(&target.dns_preset).await
        } else {
            self.dns.restore_dns().await
        }
    }
}

impl std::fmt::Debug for OptionsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionsStore").field("state", &self.snapshot().summary()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gdpi_platform::{InMemoryDns, InMemoryPacketEngine};

    #[tokio::test]
    async fn test_restore_dns_state() {
        let dns = Arc::new(InMemoryDns::default());
        let store = OptionsStore::new(Arc::new(InMemoryPacketEngine::default()), dns.clone());
        let before = store.snapshot();

        store.enable_doh("Google").await.unwrap();
        assert!(store.dns_state().doh_enabled);

        store.restore_dns_state(&before.dns).await.unwrap();
        assert!(!store.dns_state().doh_enabled);
    }

    #[tokio::test]
    async fn test_snapshot_reflects_engine() {
        let store = OptionsStore::new(Arc::new(InMemoryPacketEngine::default()), Arc::new(InMemoryDns::default()));
        let mut options = BypassOptions::default();
        options.enable_disorder();
        options.drop_rst = true;

        store.apply_options(&options).await.unwrap();
        let snapshot = store.snapshot();
        assert!(snapshot.options.disorder_enabled());
        assert!(snapshot.options.drop_rst);
    }
}
