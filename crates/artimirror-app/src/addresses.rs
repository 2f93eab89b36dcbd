//! Self-address discovery.
//!
//! A UDP socket is "connected" to a documentation-range address for each IP
//! family; the kernel picks the outbound interface without sending traffic,
//! and the socket's local address is that interface's address.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

use tracing::debug;

const PROBES: [(&str, &str); 2] = [("0.0.0.0:0", "192.0.2.1:9"), ("[::]:0", "[2001:db8::1]:9")];

/// Addresses peers can reach this host on; loopback when no interface routes.
#[must_use]
pub fn self_addresses() -> Vec<IpAddr> {
    let mut addresses: Vec<IpAddr> = PROBES
        .iter()
        .filter_map(|(bind, target)| probe_outbound(bind, target))
        .collect();
    addresses.dedup();
    if addresses.is_empty() {
        debug!("no routable interface found; using loopback");
        addresses.push(IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
    addresses
}

fn probe_outbound(bind: &str, target: &str) -> Option<IpAddr> {
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(target).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    debug!(target, address = %ip, "outbound interface probed");
    (!ip.is_unspecified()).then_some(ip)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn always_yields_at_least_one_address() {
        let addresses = self_addresses();
        assert!(!addresses.is_empty());
        assert!(addresses.iter().all(|ip| !ip.is_unspecified()));
    }

    #[test]
    fn unroutable_probe_yields_nothing() {
        assert_eq!(probe_outbound("0.0.0.0:0", "not-an-address"), None);
    }
}
