//! Reachability pre-checks.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::inventory::Host;

/// Checks whether a host is worth a session attempt
#[async_trait]
pub trait Prober: Send + Sync {
    /// Returns true when the host answered
    async fn probe(&self, host: &Host) -> bool;
}

/// TCP connect probe against the SSH port.
///
/// Up to `attempts` connects are made; the first one that completes passes.
/// A refused connection counts as an answer since the host itself replied.
#[derive(Debug, Clone)]
pub struct TcpProber {
    port: u16,
    attempts: u32,
    timeout: Duration,
}

impl TcpProber {
    pub fn new(port: u16, attempts: u32, timeout: Duration) -> Self {
        Self {
            port,
            attempts,
            timeout,
        }
    }

    async fn attempt(&self, target: &str) -> bool {
        match timeout(self.timeout, TcpStream::connect(target)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::ConnectionRefused => true,
            Ok(Err(e)) => {
                trace!(target = %target, error = %e, "Probe attempt failed");
                false
            }
            Err(_elapsed) => {
                trace!(target = %target, "Probe attempt timed out");
                false
            }
        }
    }
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, host: &Host) -> bool {
        if self.attempts == 0 {
            return true;
        }

        let port = host.port.unwrap_or(self.port);
        let target = if host.address.contains(':') {
            format!("[{}]:{}", host.address, port)
        } else {
            format!("{}:{}", host.address, port)
        };

        for attempt in 1..=self.attempts {
            if self.attempt(&target).await {
                trace!(host = %host, attempt, "Probe succeeded");
                return true;
            }
        }

        debug!(host = %host, attempts = self.attempts, "Host did not answer any probe");
        false
    }
}

/// Prober that passes every host
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProbe;

#[async_trait]
impl Prober for NoProbe {
    async fn probe(&self, _host: &Host) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_probe_open_port() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let prober = TcpProber::new(22, 2, Duration::from_secs(1));
        assert!(prober.probe(&Host::new("127.0.0.1").with_port(port)).await);
    }

    #[tokio::test]
    async fn test_probe_unresolvable_host() {
        let prober = TcpProber::new(22, 2, Duration::from_millis(200));
        assert!(!prober.probe(&Host::new("fleetexec-no-such-host.invalid")).await);
    }

    #[tokio::test]
    async fn test_zero_attempts_disables() {
        let prober = TcpProber::new(22, 0, Duration::from_millis(1));
        assert!(prober.probe(&Host::new("fleetexec-no-such-host.invalid")).await);
        assert!(NoProbe.probe(&Host::new("anything")).await);
    }
}
