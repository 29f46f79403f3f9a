//! Collaborator interfaces
//!
//! The apply engine talks to the outside world only through these traits:
//! the packet engine that runs the options, the DNS toggler, the
//! live-testing pipeline, name resolution and the outcome probe.

use async_trait::async_trait;
use gdpi_core::{BypassOptions, DnsState};
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

use crate::Result;

/// Packet rewriting engine holding the live options
///
/// Implemented by the platform driver (WinDivert, NFQUEUE, ...).
#[async_trait]
pub trait PacketEngine: Send + Sync {
    /// Options the engine is running with
    fn options_snapshot(&self) -> BypassOptions;

    /// Replace the live options
    ///
    /// On error the engine must keep running its previous options.
    async fn apply_options(&self, options: &BypassOptions) -> Result<()>;
}

/// System DNS toggler
#[async_trait]
pub trait DnsController: Send + Sync {
    /// Current DNS state
    fn dns_state(&self) -> DnsState;

    /// Switch system DNS to DNS-over-HTTPS with the given provider preset
    async fn apply_doh(&self, dns_preset: &str) -> Result<()>;

    /// Restore the system DNS configuration
    async fn restore_dns(&self) -> Result<()>;
}

/// Live-testing pipeline
#[async_trait]
pub trait RetestSink: Send + Sync {
    /// Queue one host for re-testing
    async fn enqueue_host(&self, host: HostDiscovered) -> Result<()>;
}

/// Name resolution
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Resolve a host name to addresses
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>>;
}

/// Fast targeted connectivity check
#[async_trait]
pub trait OutcomeProbe: Send + Sync {
    /// Check whether the target is reachable now
    async fn probe(&self, target: &str) -> Result<ProbeResult>;
}

/// Transport of a re-test unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Transport {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Tcp => "TCP",
            Self::Udp => "UDP",
        })
    }
}

/// A re-test unit for the live-testing pipeline
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HostDiscovered {
    /// Unique key, `{ip}:{port}:{transport}`
    pub key: String,
    /// Address to test
    pub ip: IpAddr,
    /// Port to test
    pub port: u16,
    /// Transport
    pub transport: Transport,
    /// Host name hint
    pub hostname: Option<String>,
    /// SNI hint
    pub sni: Option<String>,
}

impl HostDiscovered {
    /// TCP unit with an optional host name used for both hints
    pub fn tcp(ip: IpAddr, port: u16, hostname: Option<String>) -> Self {
        Self {
            key: format!("{ip}:{port}:{}", Transport::Tcp),
            ip,
            port,
            transport: Transport::Tcp,
            sni: hostname.clone(),
            hostname,
        }
    }
}

/// Result of an outcome probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    /// Target answered
    pub reachable: bool,
    /// Time to answer
    pub latency: Option<Duration>,
    /// Short description
    pub detail: String,
}
