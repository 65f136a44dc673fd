//! Constraint evaluation before an attempt starts
//!
//! Network connectivity is checked with a plain TCP connect against a probe
//! address, bounded by a timeout.

use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::AttemptError;
use crate::models::Constraints;

/// Reports whether the network is usable
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns true if the network is reachable
    async fn is_connected(&self) -> bool;
}

/// Probe that opens a TCP connection to a fixed address
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Create a probe for `addr` (`host:port`)
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }

    /// Probe target
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn is_connected(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!(addr = %self.addr, error = %e, "Connectivity probe failed");
                false
            }
            Err(_) => {
                debug!(
                    addr = %self.addr,
                    timeout_ms = self.timeout.as_millis(),
                    "Connectivity probe timed out"
                );
                false
            }
        }
    }
}

/// Probe used when no target is known; always reports connected
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeConnected;

#[async_trait]
impl ConnectivityProbe for AssumeConnected {
    async fn is_connected(&self) -> bool {
        true
    }
}

/// Check every declared constraint
pub async fn evaluate(
    constraints: &Constraints,
    probe: &dyn ConnectivityProbe,
) -> Result<(), AttemptError> {
    if constraints.requires_network && !probe.is_connected().await {
        return Err(AttemptError::ConstraintUnmet(
            "network connectivity unavailable".to_string(),
        ));
    }
    Ok(())
}
