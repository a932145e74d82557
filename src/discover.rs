//! Active discovery of scan heads on the local network.
//!
//! A probe is broadcast from every usable interface; heads answer with a
//! short reply naming their serial, product, firmware, and link speed. The
//! resulting map gates `create_scan_head`.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::time::{Duration, Instant};

use crate::codec::Cursor;
use crate::iface::usable_ipv4_addresses;
use crate::packet::{
    build_discover_probe, control_type_of, magic_of, PacketType, BROADCAST_ADDR, DATA_PORT,
    MAGIC_CONTROL,
};
use crate::types::{FirmwareVersion, ProductKind};
use crate::{Result, ScanError};

/// One head learned from discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub serial: u32,
    pub product: ProductKind,
    pub firmware: FirmwareVersion,
    pub ip: Ipv4Addr,
    pub link_speed_mbps: u32,
}

impl DiscoveredDevice {
    pub fn product_name(&self) -> &'static str {
        self.product.name()
    }
}

/// Parse a discovery reply. Layout after the header: serial u32, product
/// tag u16, firmware triple (3 x u16), link speed u32, head ip.
pub(crate) fn parse_discovery_reply(buf: &[u8]) -> Result<DiscoveredDevice> {
    if magic_of(buf) != Some(MAGIC_CONTROL)
        || control_type_of(buf) != Some(PacketType::DiscoverReply)
    {
        return Err(ScanError::bad_packet("not a discovery reply"));
    }
    let mut c = Cursor::new(buf);
    c.skip(4)?;
    let serial = c.u32()?;
    let product = ProductKind::from_tag(c.u16()?)
        .ok_or_else(|| ScanError::bad_packet("discovery reply with unknown product tag"))?;
    let firmware = FirmwareVersion::new(c.u16()?, c.u16()?, c.u16()?);
    let link_speed_mbps = c.u32()?;
    let ip = c.ipv4()?;
    Ok(DiscoveredDevice {
        serial,
        product,
        firmware,
        ip,
        link_speed_mbps,
    })
}

/// Drain replies off `socket` until `deadline`, keyed by serial.
fn collect_replies(
    socket: &UdpSocket,
    deadline: Instant,
    devices: &mut HashMap<u32, DiscoveredDevice>,
) {
    let mut buf = [0u8; 256];
    while Instant::now() < deadline {
        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(e) => {
                log::warn!("discovery receive error: {e}");
                continue;
            }
        };
        match parse_discovery_reply(&buf[..len]) {
            Ok(mut device) => {
                // Prefer the address we actually heard from over the one the
                // head believes it has (NAT-ish lab networks disagree).
                if let IpAddr::V4(ip) = peer.ip() {
                    device.ip = ip;
                }
                log::debug!(
                    "discovered head {} ({}) at {}",
                    device.serial,
                    device.product_name(),
                    device.ip
                );
                devices.insert(device.serial, device);
            }
            Err(e) => log::debug!("ignoring datagram during discovery: {e}"),
        }
    }
}

/// Broadcast a probe on every usable interface and collect replies for the
/// duration of `timeout`.
pub fn discover_devices(timeout: Duration) -> Result<HashMap<u32, DiscoveredDevice>> {
    let reply_socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    reply_socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    let reply_port = reply_socket.local_addr()?.port();

    let addresses = usable_ipv4_addresses();
    if addresses.is_empty() {
        log::warn!("no usable interface for discovery");
    }
    for local_ip in addresses {
        let probe = build_discover_probe(local_ip, reply_port);
        let attempt = || -> std::io::Result<()> {
            let socket = UdpSocket::bind((local_ip, 0))?;
            socket.set_broadcast(true)?;
            socket.send_to(&probe, (BROADCAST_ADDR, DATA_PORT))?;
            Ok(())
        };
        if let Err(e) = attempt() {
            log::warn!("discovery probe from {local_ip} failed: {e}");
        }
    }

    let mut devices = HashMap::new();
    collect_replies(&reply_socket, Instant::now() + timeout, &mut devices);
    log::info!("discovery finished with {} head(s)", devices.len());
    Ok(devices)
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::API_VERSION;

    #[test]
    fn reply_parses_all_fields() {
        let pkt = test_replies::discovery_reply(
            20211,
            ProductKind::HexLaser,
            API_VERSION,
            1000,
            Ipv4Addr::new(192, 168, 0, 15),
        );
        let device = parse_discovery_reply(&pkt).unwrap();
        assert_eq!(device.serial, 20211);
        assert_eq!(device.product, ProductKind::HexLaser);
        assert_eq!(device.product_name(), "LPS-6L");
        assert_eq!(device.firmware, API_VERSION);
        assert_eq!(device.link_speed_mbps, 1000);
        assert_eq!(device.ip, Ipv4Addr::new(192, 168, 0, 15));
    }

    #[test]
    fn non_replies_rejected() {
        assert!(parse_discovery_reply(&[0xFA, 0xCE, 4, 0x02]).is_err());
        assert!(parse_discovery_reply(&[0xFA, 0xCD, 0, 0]).is_err());
        assert!(parse_discovery_reply(&[]).is_err());
        // Unknown product tag.
        let mut pkt = test_replies::discovery_reply(
            1,
            ProductKind::DualCamera,
            API_VERSION,
            100,
            Ipv4Addr::LOCALHOST,
        );
        pkt[8] = 0xFF;
        pkt[9] = 0xFF;
        assert!(parse_discovery_reply(&pkt).is_err());
    }

    #[test]
    fn collect_replies_keys_by_serial_and_prefers_source_ip() {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        socket
            .set_read_timeout(Some(Duration::from_millis(50)))
            .unwrap();
        let target = socket.local_addr().unwrap();

        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sender
            .send_to(
                &test_replies::discovery_reply(
                    7,
                    ProductKind::DualCamera,
                    API_VERSION,
                    1000,
                    Ipv4Addr::new(10, 1, 2, 3),
                ),
                target,
            )
            .unwrap();
        // A duplicate and a garbage datagram.
        sender
            .send_to(
                &test_replies::discovery_reply(
                    7,
                    ProductKind::DualCamera,
                    API_VERSION,
                    100,
                    Ipv4Addr::new(10, 1, 2, 3),
                ),
                target,
            )
            .unwrap();
        sender.send_to(&[1, 2, 3], target).unwrap();

        let mut devices = HashMap::new();
        collect_replies(
            &socket,
            Instant::now() + Duration::from_millis(400),
            &mut devices,
        );
        assert_eq!(devices.len(), 1);
        let device = &devices[&7];
        // Last reply wins, and the source address overrides the claimed one.
        assert_eq!(device.link_speed_mbps, 100);
        assert_eq!(device.ip, Ipv4Addr::LOCALHOST);
    }
}
