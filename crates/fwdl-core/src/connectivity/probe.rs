//! Reachability probes.

use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

/// Answers "is the network usable right now". Called from the blocking pool.
pub trait ReachabilityProbe: Send + Sync {
    fn is_reachable(&self) -> bool;
}

/// Reachable when any of `addrs` accepts a TCP connection within `timeout`.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    addrs: Vec<SocketAddr>,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addrs: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self { addrs, timeout }
    }
}

impl ReachabilityProbe for TcpProbe {
    fn is_reachable(&self) -> bool {
        // Nothing to probe: assume online rather than parking every download.
        if self.addrs.is_empty() {
            return true;
        }
        self.addrs
            .iter()
            .any(|addr| TcpStream::connect_timeout(addr, self.timeout).is_ok())
    }
}
