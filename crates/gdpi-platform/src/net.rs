//! System-backed resolver and probe

use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;
use tokio::net::{lookup_host, TcpStream};
use tokio::time::{timeout, Instant};
use tracing::debug;

use crate::traits::{HostResolver, OutcomeProbe, ProbeResult};
use crate::{PlatformError, Result};

/// Resolver using the operating system's resolver
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemResolver;

#[async_trait]
impl HostResolver for SystemResolver {
    async fn resolve(&self, host: &str) -> Result<Vec<IpAddr>> {
        let addrs = lookup_host((host, 0)).await.map_err(|e| PlatformError::Resolution {
            host: host.to_string(),
            reason: e.to_string(),
        })?;

        let mut ips: Vec<IpAddr> = Vec::new();
        for addr in addrs {
            if !ips.contains(&addr.ip()) {
                ips.push(addr.ip());
            }
        }
        debug!(host, count = ips.len(), "Resolved");
        Ok(ips)
    }
}

/// Probe that opens a TCP connection to the target
#[derive(Debug, Clone, Copy)]
pub struct TcpConnectProbe {
    port: u16,
    connect_timeout: Duration,
}

impl TcpConnectProbe {
    /// Probe `port` with a connect timeout
    pub fn new(port: u16, connect_timeout: Duration) -> Self {
        Self { port, connect_timeout }
    }
}

impl Default for TcpConnectProbe {
    fn default() -> Self {
        Self::new(443, Duration::from_secs(3))
    }
}

#[async_trait]
impl OutcomeProbe for TcpConnectProbe {
    async fn probe(&self, target: &str) -> Result<ProbeResult> {
        let started = Instant::now();
        match timeout(self.connect_timeout, TcpStream::connect((target, self.port))).await {
            Ok(Ok(_stream)) => Ok(ProbeResult {
                reachable: true,
                latency: Some(started.elapsed()),
                detail: format!("connected to {target}:{}", self.port),
            }),
            Ok(Err(e)) => Ok(ProbeResult {
                reachable: false,
                latency: None,
                detail: e.to_string(),
            }),
            Err(_) => Err(PlatformError::Probe(format!(
                "connect to {target}:{} timed out after {:?}",
                self.port, self.connect_timeout
            ))),
        }
    }
}
