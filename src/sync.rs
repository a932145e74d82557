//! Sync-device receiver: a UDP listener that tracks every encoder/timing
//! box on the network.
//!
//! Sync packets arrive as broadcasts on a fixed port in four revisions:
//! v1 is 32 bytes, v2 through v4 are 76 bytes distinguished by a
//! discriminator word. Devices are tracked by serial and evicted after one
//! second of silence; a snapshot of the live set feeds encoder mapping.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::codec::Cursor;
use crate::types::FirmwareVersion;
use crate::{Result, ScanError};

/// Fixed UDP port sync devices broadcast to.
pub const SYNC_PORT: u16 = 11235;

/// A device disappears from the snapshot after this much silence.
pub const SYNC_DEVICE_TIMEOUT: Duration = Duration::from_millis(1000);

/// An update event is emitted every this many received packets
/// (roughly once a second at nominal sync rates).
pub const SYNC_EVENT_TRIGGER_COUNT: u32 = 1000;

const SYNC_PACKET_V1_LEN: usize = 32;
const SYNC_PACKET_V2_LEN: usize = 76;

const DISCRIMINATOR_V2: u16 = 0xAAAA;
const DISCRIMINATOR_V3: u16 = 0xBBBB;
const DISCRIMINATOR_V4: u16 = 0xCCCC;

/// Decoded sync packet. Fields absent from older revisions are zero/None.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPacket {
    pub serial: u32,
    pub sequence: u32,
    pub encoder_timestamp_ns: u64,
    pub last_timestamp_ns: u64,
    pub encoder_value: i64,
    pub flags: u32,
    pub aux_y_timestamp_ns: u64,
    pub index_z_timestamp_ns: u64,
    pub sync_timestamp_ns: u64,
    /// Packet revision, 1..=4.
    pub version: u8,
    pub firmware: Option<FirmwareVersion>,
    pub laser_disable_timestamp_ns: Option<u64>,
}

fn timestamp_ns(c: &mut Cursor<'_>) -> Result<u64> {
    let seconds = u64::from(c.u32()?);
    let nanos = u64::from(c.u32()?);
    Ok(seconds * 1_000_000_000 + nanos)
}

/// Parse one sync datagram. Packets are validated by size first; a 76-byte
/// packet with an unknown discriminator is malformed.
pub fn parse_sync_packet(buf: &[u8]) -> Result<SyncPacket> {
    if buf.len() != SYNC_PACKET_V1_LEN && buf.len() != SYNC_PACKET_V2_LEN {
        return Err(ScanError::BadPacket(format!(
            "sync packet of {} bytes",
            buf.len()
        )));
    }

    let mut c = Cursor::new(buf);
    let serial = c.u32()?;
    let sequence = c.u32()?;
    let encoder_timestamp_ns = timestamp_ns(&mut c)?;
    let last_timestamp_ns = timestamp_ns(&mut c)?;
    let encoder_value = c.i64()?;

    let mut packet = SyncPacket {
        serial,
        sequence,
        encoder_timestamp_ns,
        last_timestamp_ns,
        encoder_value,
        flags: 0,
        aux_y_timestamp_ns: 0,
        index_z_timestamp_ns: 0,
        sync_timestamp_ns: 0,
        version: 1,
        firmware: None,
        laser_disable_timestamp_ns: None,
    };
    if buf.len() == SYNC_PACKET_V1_LEN {
        return Ok(packet);
    }

    packet.flags = c.u32()?;
    packet.aux_y_timestamp_ns = timestamp_ns(&mut c)?;
    packet.index_z_timestamp_ns = timestamp_ns(&mut c)?;
    packet.sync_timestamp_ns = timestamp_ns(&mut c)?;

    let discriminator = c.u16()?;
    packet.version = match discriminator {
        DISCRIMINATOR_V2 => 2,
        DISCRIMINATOR_V3 => 3,
        DISCRIMINATOR_V4 => 4,
        other => {
            return Err(ScanError::BadPacket(format!(
                "sync discriminator {other:#06x}"
            )))
        }
    };
    if packet.version >= 3 {
        packet.firmware = Some(FirmwareVersion::new(c.u16()?, c.u16()?, c.u16()?));
    }
    if packet.version >= 4 {
        packet.laser_disable_timestamp_ns = Some(timestamp_ns(&mut c)?);
    }
    Ok(packet)
}

/// Live record for one sync device.
#[derive(Debug, Clone)]
pub struct SyncDeviceRecord {
    pub serial: u32,
    pub ip: Ipv4Addr,
    /// Packet revision the device speaks.
    pub version: u8,
    pub packet: SyncPacket,
    pub last_update: Instant,
}

/// Periodic snapshot pushed to subscribers.
#[derive(Debug, Clone)]
pub struct SyncUpdateEvent {
    pub devices: Vec<SyncDeviceRecord>,
}

/// Background UDP listener tracking all sync devices on the network.
pub struct SyncReceiver {
    devices: Arc<Mutex<HashMap<u32, SyncDeviceRecord>>>,
    bad_packets: Arc<AtomicU64>,
    events: Receiver<SyncUpdateEvent>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
    local_port: u16,
}

impl SyncReceiver {
    /// Bind the well-known sync port and start the reader thread.
    pub fn new() -> Result<SyncReceiver> {
        SyncReceiver::bind(SYNC_PORT, SYNC_EVENT_TRIGGER_COUNT)
    }

    /// Bind a specific port (0 for ephemeral) with a custom event cadence.
    pub fn bind(port: u16, event_trigger_count: u32) -> Result<SyncReceiver> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        let local_port = socket.local_addr()?.port();

        let devices = Arc::new(Mutex::new(HashMap::new()));
        let bad_packets = Arc::new(AtomicU64::new(0));
        let (event_tx, event_rx) = bounded(8);
        let stop_flag = Arc::new(AtomicBool::new(false));

        let thread = std::thread::Builder::new()
            .name("sync-recv".into())
            .spawn({
                let devices = Arc::clone(&devices);
                let bad_packets = Arc::clone(&bad_packets);
                let stop_flag = Arc::clone(&stop_flag);
                move || {
                    sync_reader_loop(
                        socket,
                        devices,
                        bad_packets,
                        event_tx,
                        stop_flag,
                        event_trigger_count,
                    )
                }
            })?;

        Ok(SyncReceiver {
            devices,
            bad_packets,
            events: event_rx,
            stop_flag,
            thread: Some(thread),
            local_port,
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Copy of the current live device set, sorted by serial.
    pub fn snapshot(&self) -> Vec<SyncDeviceRecord> {
        let mut devices: Vec<SyncDeviceRecord> = match self.devices.lock() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => Vec::new(),
        };
        devices.sort_by_key(|d| d.serial);
        devices
    }

    /// Subscriber handle for periodic update events.
    pub fn events(&self) -> Receiver<SyncUpdateEvent> {
        self.events.clone()
    }

    pub fn bad_packets(&self) -> u64 {
        self.bad_packets.load(Ordering::Relaxed)
    }

    fn shutdown(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for SyncReceiver {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn sync_reader_loop(
    socket: UdpSocket,
    devices: Arc<Mutex<HashMap<u32, SyncDeviceRecord>>>,
    bad_packets: Arc<AtomicU64>,
    event_tx: Sender<SyncUpdateEvent>,
    stop_flag: Arc<AtomicBool>,
    event_trigger_count: u32,
) {
    log::info!("sync receiver listening on port {:?}", socket.local_addr());
    let mut buf = [0u8; 128];
    let mut received: u32 = 0;

    loop {
        if stop_flag.load(Ordering::Relaxed) {
            log::info!("sync receiver stopping");
            break;
        }

        let (len, peer) = match socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(e) => {
                log::warn!("sync receive error: {e}");
                continue;
            }
        };

        let packet = match parse_sync_packet(&buf[..len]) {
            Ok(p) => p,
            Err(e) => {
                bad_packets.fetch_add(1, Ordering::Relaxed);
                log::debug!("dropping sync packet from {peer}: {e}");
                continue;
            }
        };

        let ip = match peer.ip() {
            IpAddr::V4(ip) => ip,
            IpAddr::V6(_) => {
                bad_packets.fetch_add(1, Ordering::Relaxed);
                continue;
            }
        };

        let now = Instant::now();
        if let Ok(mut map) = devices.lock() {
            map.insert(
                packet.serial,
                SyncDeviceRecord {
                    serial: packet.serial,
                    ip,
                    version: packet.version,
                    packet,
                    last_update: now,
                },
            );
            map.retain(|_, record| now.duration_since(record.last_update) <= SYNC_DEVICE_TIMEOUT);
        }

        received = received.wrapping_add(1);
        if event_trigger_count > 0 && received % event_trigger_count == 0 {
            let snapshot: Vec<SyncDeviceRecord> = match devices.lock() {
                Ok(map) => map.values().cloned().collect(),
                Err(_) => Vec::new(),
            };
            // Subscribers that fall behind miss events, never block the
            // receive path.
            let _ = event_tx.try_send(SyncUpdateEvent { devices: snapshot });
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn v2_reference_packet() -> Vec<u8> {
        let mut out = Vec::with_capacity(76);
        out.extend_from_slice(&42u32.to_be_bytes()); // serial
        out.extend_from_slice(&7u32.to_be_bytes()); // sequence
        out.extend_from_slice(&1u32.to_be_bytes()); // encoder ts seconds
        out.extend_from_slice(&500_000_000u32.to_be_bytes()); // encoder ts ns
        out.extend_from_slice(&1u32.to_be_bytes()); // last ts seconds
        out.extend_from_slice(&500_000_001u32.to_be_bytes()); // last ts ns
        out.extend_from_slice(&(-123i64).to_be_bytes());
        out.extend_from_slice(&0u32.to_be_bytes()); // flags
        out.extend_from_slice(&[0u8; 8]); // auxY
        out.extend_from_slice(&[0u8; 8]); // indexZ
        out.extend_from_slice(&[0u8; 8]); // sync
        out.extend_from_slice(&0xAAAAu16.to_be_bytes());
        out.extend_from_slice(&[0u8; 14]);
        assert_eq!(out.len(), 76);
        out
    }

    #[test]
    fn parses_v2_reference_packet() {
        let packet = parse_sync_packet(&v2_reference_packet()).unwrap();
        assert_eq!(packet.serial, 42);
        assert_eq!(packet.sequence, 7);
        assert_eq!(packet.encoder_timestamp_ns, 1_500_000_000);
        assert_eq!(packet.last_timestamp_ns, 1_500_000_001);
        assert_eq!(packet.encoder_value, -123);
        assert_eq!(packet.flags, 0);
        assert_eq!(packet.version, 2);
        assert_eq!(packet.firmware, None);
        assert_eq!(packet.laser_disable_timestamp_ns, None);
    }

    #[test]
    fn parses_v1_by_size() {
        let packet = parse_sync_packet(&test_packets::sync_v1(9, 1, 555)).unwrap();
        assert_eq!(packet.version, 1);
        assert_eq!(packet.serial, 9);
        assert_eq!(packet.encoder_value, 555);
        assert_eq!(packet.encoder_timestamp_ns, 1_000_000_000);
    }

    #[test]
    fn parses_v3_and_v4_extensions() {
        let mut v3 = v2_reference_packet();
        v3[60..62].copy_from_slice(&DISCRIMINATOR_V3.to_be_bytes());
        v3[62..64].copy_from_slice(&2u16.to_be_bytes());
        v3[64..66].copy_from_slice(&4u16.to_be_bytes());
        v3[66..68].copy_from_slice(&9u16.to_be_bytes());
        let packet = parse_sync_packet(&v3).unwrap();
        assert_eq!(packet.version, 3);
        assert_eq!(packet.firmware, Some(FirmwareVersion::new(2, 4, 9)));

        let mut v4 = v3.clone();
        v4[60..62].copy_from_slice(&DISCRIMINATOR_V4.to_be_bytes());
        v4[68..72].copy_from_slice(&3u32.to_be_bytes());
        v4[72..76].copy_from_slice(&250u32.to_be_bytes());
        let packet = parse_sync_packet(&v4).unwrap();
        assert_eq!(packet.version, 4);
        assert_eq!(packet.laser_disable_timestamp_ns, Some(3_000_000_250));
    }

    #[test]
    fn rejects_wrong_sizes_and_discriminators() {
        assert!(parse_sync_packet(&[0u8; 31]).is_err());
        assert!(parse_sync_packet(&[0u8; 33]).is_err());
        assert!(parse_sync_packet(&[0u8; 75]).is_err());
        let mut bad = v2_reference_packet();
        bad[60..62].copy_from_slice(&0x1234u16.to_be_bytes());
        assert!(parse_sync_packet(&bad).is_err());
    }

    #[test]
    fn receiver_tracks_and_evicts_devices() {
        let _ = env_logger::builder().is_test(true).try_init();
        let receiver = SyncReceiver::bind(0, 0).unwrap();
        let target = (Ipv4Addr::LOCALHOST, receiver.local_port());
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();

        sender
            .send_to(&test_packets::sync_v2(1001, 1, 10), target)
            .unwrap();
        sender
            .send_to(&test_packets::sync_v2(1002, 1, 20), target)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let snap = receiver.snapshot();
            if snap.len() == 2 {
                assert_eq!(snap[0].serial, 1001);
                assert_eq!(snap[1].serial, 1002);
                assert_eq!(snap[1].packet.encoder_value, 20);
                break;
            }
            assert!(Instant::now() < deadline, "devices never appeared");
            std::thread::sleep(Duration::from_millis(10));
        }

        // Device 1002 goes silent past the timeout; the next packet from
        // 1001 sweeps it out.
        std::thread::sleep(SYNC_DEVICE_TIMEOUT + Duration::from_millis(200));
        sender
            .send_to(&test_packets::sync_v2(1001, 2, 11), target)
            .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let snap = receiver.snapshot();
            if snap.len() == 1 && snap[0].packet.sequence == 2 {
                break;
            }
            assert!(Instant::now() < deadline, "silent device never evicted");
            std::thread::sleep(Duration::from_millis(10));
        }

        // It reappears within one packet of resumption.
        sender
            .send_to(&test_packets::sync_v2(1002, 5, 21), target)
            .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if receiver.snapshot().len() == 2 {
                break;
            }
            assert!(Instant::now() < deadline, "device never reappeared");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn malformed_packets_counted_not_tracked() {
        let receiver = SyncReceiver::bind(0, 0).unwrap();
        let target = (Ipv4Addr::LOCALHOST, receiver.local_port());
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        sender.send_to(&[0u8; 10], target).unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while receiver.bad_packets() == 0 {
            assert!(Instant::now() < deadline, "bad packet never counted");
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(receiver.snapshot().is_empty());
    }

    #[test]
    fn events_emitted_on_trigger_count() {
        let receiver = SyncReceiver::bind(0, 3).unwrap();
        let events = receiver.events();
        let target = (Ipv4Addr::LOCALHOST, receiver.local_port());
        let sender = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        for seq in 0..3 {
            sender
                .send_to(&test_packets::sync_v2(7, seq, 0), target)
                .unwrap();
        }
        let event = events.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event.devices.len(), 1);
        assert_eq!(event.devices[0].serial, 7);
    }
}
