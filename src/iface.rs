//! Local interface enumeration for broadcast traffic.

use std::net::Ipv4Addr;

use pnet::datalink;
use pnet::ipnetwork::IpNetwork;

/// IPv4 unicast addresses of every usable interface: up, multicast capable,
/// not loopback. Broadcast connect and discovery probes go out once per
/// returned address.
pub(crate) fn usable_ipv4_addresses() -> Vec<Ipv4Addr> {
    let mut addresses: Vec<Ipv4Addr> = datalink::interfaces()
        .iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback() && iface.is_multicast())
        .flat_map(|iface| iface.ips.iter())
        .filter_map(|network| match network {
            IpNetwork::V4(v4) => Some(v4.ip()),
            IpNetwork::V6(_) => None,
        })
        .filter(|ip| !ip.is_unspecified())
        .collect();
    addresses.sort();
    addresses.dedup();
    addresses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_unique_and_routable() {
        let addrs = usable_ipv4_addresses();
        let mut deduped = addrs.clone();
        deduped.dedup();
        assert_eq!(addrs, deduped);
        for ip in addrs {
            assert!(!ip.is_loopback());
            assert!(!ip.is_unspecified());
        }
    }
}
