//! Wire protocol: packet constants, request builders, and response parsers.
//!
//! Every datagram starts with a 4-byte header: magic (u16), size (u8, total
//! packet length where it fits), type (u8). Control traffic uses magic
//! 0xFACE, profile data 0xFACD. All multi-byte fields are network byte
//! order; the one exception is the serial number in the broadcast-connect
//! request, which the device expects byte-reversed.

use std::net::Ipv4Addr;

use crate::codec::{Cursor, Writer};
use crate::config::TimeWindowUs;
use crate::format::DataType;
use crate::types::{
    Camera, ConnectionKind, FirmwareVersion, Laser, ProductKind, ScanHeadStatus, StatusFlags,
};
use crate::{Result, ScanError};

// -- Endpoints --
/// UDP port a head listens on for control and scan requests, and sources
/// data packets from.
pub const DATA_PORT: u16 = 12346;
/// Broadcast destination for connect and discovery probes.
pub const BROADCAST_ADDR: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 255);

// -- Magic words --
pub const MAGIC_CONTROL: u16 = 0xFACE;
pub const MAGIC_DATA: u16 = 0xFACD;

/// Client API version. The major must match the head firmware's major.
pub const API_VERSION: FirmwareVersion = FirmwareVersion {
    major: 3,
    minor: 1,
    patch: 0,
};

/// Control packet type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    BroadcastConnect = 0x01,
    Disconnect = 0x02,
    Window = 0x03,
    StartScanning = 0x04,
    Status = 0x05,
    BroadcastDiscover = 0x06,
    DiscoverReply = 0x07,
}

impl PacketType {
    pub fn from_u8(v: u8) -> Option<PacketType> {
        match v {
            0x01 => Some(PacketType::BroadcastConnect),
            0x02 => Some(PacketType::Disconnect),
            0x03 => Some(PacketType::Window),
            0x04 => Some(PacketType::StartScanning),
            0x05 => Some(PacketType::Status),
            0x06 => Some(PacketType::BroadcastDiscover),
            0x07 => Some(PacketType::DiscoverReply),
            _ => None,
        }
    }
}

/// Magic word of a datagram, if it is long enough to carry one.
pub fn magic_of(buf: &[u8]) -> Option<u16> {
    if buf.len() < 4 {
        return None;
    }
    Some(u16::from_be_bytes([buf[0], buf[1]]))
}

/// Control packet type of a datagram already known to carry MAGIC_CONTROL.
pub fn control_type_of(buf: &[u8]) -> Option<PacketType> {
    buf.get(3).copied().and_then(PacketType::from_u8)
}

fn header(w: &mut Writer, magic: u16, kind: PacketType) {
    w.u16(magic).u8(0).u8(kind as u8);
}

fn patch_size(w: &mut Writer) {
    let len = w.len();
    w.patch_u8(2, u8::try_from(len).unwrap_or(0));
}

/// Broadcast-connect request, 17 bytes.
///
/// Layout after the header: client ipv4 (4), client port (u16), session id,
/// head id (0 in requests), connection type, serial in reversed byte order.
pub fn build_broadcast_connect(
    client_ip: Ipv4Addr,
    client_port: u16,
    session_id: u8,
    head_id: u8,
    kind: ConnectionKind,
    serial: u32,
) -> Vec<u8> {
    let mut w = Writer::with_capacity(17);
    header(&mut w, MAGIC_CONTROL, PacketType::BroadcastConnect);
    w.ipv4(client_ip)
        .u16(client_port)
        .u8(session_id)
        .u8(head_id)
        .u8(kind as u8);
    for b in serial.to_le_bytes() {
        w.u8(b);
    }
    patch_size(&mut w);
    w.into_vec()
}

/// Disconnect request: a bare header.
pub fn build_disconnect() -> Vec<u8> {
    let mut w = Writer::with_capacity(4);
    header(&mut w, MAGIC_CONTROL, PacketType::Disconnect);
    patch_size(&mut w);
    w.into_vec()
}

/// Window packet for one camera. Constraint quads are device-frame
/// endpoints in milli-inches, already inverse-aligned by the caller.
pub fn build_window(camera: Camera, constraints: &[[i32; 4]]) -> Vec<u8> {
    let mut w = Writer::with_capacity(5 + constraints.len() * 16);
    header(&mut w, MAGIC_CONTROL, PacketType::Window);
    w.u8(camera.id());
    for quad in constraints {
        for v in quad {
            w.i32(*v);
        }
    }
    patch_size(&mut w);
    w.into_vec()
}

/// Discovery probe broadcast to every interface.
pub fn build_discover_probe(client_ip: Ipv4Addr, client_port: u16) -> Vec<u8> {
    let mut w = Writer::with_capacity(10);
    header(&mut w, MAGIC_CONTROL, PacketType::BroadcastDiscover);
    w.ipv4(client_ip).u16(client_port);
    patch_size(&mut w);
    w.into_vec()
}

/// Everything a periodic scan request carries.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub client_port: u16,
    pub session_id: u8,
    pub head_id: u8,
    pub exposure_mode: u8,
    pub laser_on: TimeWindowUs,
    pub exposure: TimeWindowUs,
    pub laser_detection_threshold: u32,
    pub saturation_threshold: u32,
    pub saturated_percentage: u32,
    pub average_intensity: u32,
    pub period_ns: i32,
    pub scan_phase_offset_us: u32,
    pub data_types: DataType,
    pub start_col: u16,
    pub end_col: u16,
    /// Per-type steps in canonical flag order.
    pub steps: Vec<u16>,
}

impl ScanRequest {
    /// Serialize to the fixed 74-byte body plus one i16 step per type.
    ///
    /// Field offsets (from datagram start): reserved u32 at 4, client port
    /// at 8, session/head id at 10/11, exposure mode at 13, laser window
    /// i32 triple at 16, exposure triple at 28, thresholds at 40..56,
    /// period-ns at 56, phase offset at 60, i32::MAX at 64, bitfield at 68,
    /// start/end columns at 70/72, steps from 74.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(74 + 2 * self.steps.len());
        header(&mut w, MAGIC_CONTROL, PacketType::StartScanning);
        w.u32(0)
            .u16(self.client_port)
            .u8(self.session_id)
            .u8(self.head_id)
            .u8(0)
            .u8(self.exposure_mode)
            .u8(0)
            .u8(0)
            .i32(self.laser_on.min as i32)
            .i32(self.laser_on.default as i32)
            .i32(self.laser_on.max as i32)
            .i32(self.exposure.min as i32)
            .i32(self.exposure.default as i32)
            .i32(self.exposure.max as i32)
            .i32(self.laser_detection_threshold as i32)
            .i32(self.saturation_threshold as i32)
            .i32(self.saturated_percentage as i32)
            .i32(self.average_intensity as i32)
            .i32(self.period_ns)
            .i32(self.scan_phase_offset_us as i32)
            .i32(i32::MAX)
            .i16(self.data_types.bits() as i16)
            .i16(self.start_col as i16)
            .i16(self.end_col as i16);
        for step in &self.steps {
            w.i16(*step as i16);
        }
        patch_size(&mut w);
        w.into_vec()
    }
}

/// Scan period in nanoseconds for a requested rate.
pub fn period_ns_for_rate(rate_hz: f64) -> i32 {
    (1e9 / rate_hz) as i32
}

/// Parse a status packet into a [`ScanHeadStatus`] snapshot.
///
/// Layout after the header: version triple (3 x u16), product tag, flags,
/// serial, max scan rate, head ip, client ip, client port, sync id, global
/// time u64, packet/profile counters, encoder and camera counts, 32
/// reserved bytes, then the variable tail: encoder values (i64 each),
/// pixels-in-window and temperature per camera.
pub fn parse_status(buf: &[u8]) -> Result<ScanHeadStatus> {
    let mut c = Cursor::new(buf);
    let magic = c.u16()?;
    if magic != MAGIC_CONTROL {
        return Err(ScanError::bad_packet("status packet with wrong magic"));
    }
    c.skip(1)?; // size byte, not meaningful on variable packets
    let kind = c.u8()?;
    if PacketType::from_u8(kind) != Some(PacketType::Status) {
        return Err(ScanError::bad_packet("not a status packet"));
    }

    let firmware = FirmwareVersion::new(c.u16()?, c.u16()?, c.u16()?);
    let product = ProductKind::from_tag(c.u16()?);
    let flags = StatusFlags::from_bits_truncate(c.u16()?);
    let serial = c.u32()?;
    let max_scan_rate = c.u32()?;
    let head_ip = c.ipv4()?;
    let client_ip = c.ipv4()?;
    let client_port = c.u16()?;
    let sync_id = c.u32()?;
    let global_time_ns = c.u64()?;
    let num_packets_sent = c.u32()?;
    let num_profiles_sent = c.u32()?;
    let num_encoders = c.u8()?;
    let num_cameras = c.u8()?;
    c.skip(32)?;

    let mut encoder_values = Vec::with_capacity(num_encoders as usize);
    for _ in 0..num_encoders {
        encoder_values.push(c.i64()?);
    }
    let mut pixels_in_window = Vec::with_capacity(num_cameras as usize);
    for _ in 0..num_cameras {
        pixels_in_window.push(c.u32()?);
    }
    let mut temperatures = Vec::with_capacity(num_cameras as usize);
    for _ in 0..num_cameras {
        temperatures.push(c.i32()?);
    }

    Ok(ScanHeadStatus {
        firmware,
        product,
        flags,
        serial,
        max_scan_rate,
        head_ip,
        client_ip,
        client_port,
        sync_id,
        global_time_ns,
        num_packets_sent,
        num_profiles_sent,
        encoder_values,
        pixels_in_window,
        temperatures,
    })
}

/// Identity of a fragment's producer: one exposure of one camera/laser pair
/// on one head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FragmentSource {
    pub head_id: u8,
    pub camera: Camera,
    pub laser: Laser,
}

/// Where one data type's values live inside a fragment payload.
#[derive(Debug, Clone, Copy)]
pub struct TypeLayout {
    pub data_type: DataType,
    /// Column decimation factor for this type.
    pub step: u16,
    /// Values of this type present in this fragment.
    pub num_vals: usize,
    /// Byte offset into [`DataFragment::payload`].
    pub payload_offset: usize,
    pub payload_size: usize,
}

/// One UDP datagram's worth of profile data.
#[derive(Debug, Clone)]
pub struct DataFragment {
    pub source: FragmentSource,
    pub timestamp_ns: u64,
    pub part_num: u8,
    pub num_parts: u8,
    pub exposure_time_us: u32,
    pub laser_on_time_us: u32,
    pub data_types: DataType,
    pub payload_length: u16,
    pub start_col: u16,
    pub end_col: u16,
    pub encoder_values: Vec<i64>,
    /// Per-type layouts in canonical flag order.
    pub layouts: Vec<TypeLayout>,
    /// The typed payload region, owned so fragments outlive the receive
    /// buffer while a profile accumulates.
    pub payload: Vec<u8>,
}

/// Value count for one data type in one fragment.
///
/// Columns of a type are dealt round-robin across parts: every part gets
/// `floor(cols / (parts * step))` values, and the first
/// `(cols / step) mod parts` parts get one more.
fn values_in_part(num_cols: usize, num_parts: usize, part_num: usize, step: usize) -> usize {
    let mut n = num_cols / (num_parts * step);
    if (num_cols / step) % num_parts > part_num {
        n += 1;
    }
    n
}

impl DataFragment {
    /// Parse a data datagram.
    ///
    /// Layout: the 4-byte packet header, then a 32-byte fragment header
    /// (head/camera/laser ids, part number and count, encoder count,
    /// bitfield at 10, timestamp u64 at 12, exposure at 20, laser-on at 24,
    /// payload length at 28, start/end columns at 30/32), then one u16 step
    /// per set flag, then the encoder values, then the typed payloads in
    /// canonical order.
    pub fn parse(buf: &[u8]) -> Result<DataFragment> {
        let mut c = Cursor::new(buf);
        let magic = c.u16()?;
        if magic != MAGIC_DATA {
            return Err(ScanError::bad_packet("data packet with wrong magic"));
        }
        c.skip(2)?; // size/type bytes unused on the data path

        let head_id = c.u8()?;
        let camera = Camera::from_id(c.u8()?)
            .ok_or_else(|| ScanError::bad_packet("fragment camera id out of range"))?;
        let laser = Laser::from_id(c.u8()?)
            .ok_or_else(|| ScanError::bad_packet("fragment laser id out of range"))?;
        let part_num = c.u8()?;
        let num_parts = c.u8()?;
        let num_encoders = c.u8()?;
        let data_types = DataType::from_bits(c.u16()?)
            .ok_or_else(|| ScanError::bad_packet("unknown data-type bits"))?;
        let timestamp_ns = c.u64()?;
        let exposure_time_us = c.u32()?;
        let laser_on_time_us = c.u32()?;
        let payload_length = c.u16()?;
        let start_col = c.u16()?;
        let end_col = c.u16()?;
        c.skip(2)?; // reserved

        if num_parts == 0 || part_num >= num_parts {
            return Err(ScanError::BadPacket(format!(
                "fragment part {part_num}/{num_parts} out of range"
            )));
        }
        if end_col < start_col {
            return Err(ScanError::bad_packet("fragment column range inverted"));
        }
        if data_types.is_empty() {
            return Err(ScanError::bad_packet("fragment carries no data types"));
        }

        let mut steps = Vec::new();
        for _ in data_types.ordered() {
            steps.push(c.u16()?);
        }
        let mut encoder_values = Vec::with_capacity(num_encoders as usize);
        for _ in 0..num_encoders {
            encoder_values.push(c.i64()?);
        }

        let num_cols = usize::from(end_col - start_col) + 1;
        let mut layouts = Vec::with_capacity(steps.len());
        let mut offset = 0usize;
        for (data_type, step) in data_types.ordered().zip(steps.iter().copied()) {
            if step == 0 {
                return Err(ScanError::bad_packet("fragment step of zero"));
            }
            let (num_vals, payload_size) = if data_type == DataType::IM {
                (payload_length as usize, payload_length as usize)
            } else {
                let n = values_in_part(
                    num_cols,
                    num_parts as usize,
                    part_num as usize,
                    step as usize,
                );
                (n, n * data_type.size_bytes())
            };
            layouts.push(TypeLayout {
                data_type,
                step,
                num_vals,
                payload_offset: offset,
                payload_size,
            });
            offset += payload_size;
        }

        let payload = c.bytes(offset)?.to_vec();

        Ok(DataFragment {
            source: FragmentSource {
                head_id,
                camera,
                laser,
            },
            timestamp_ns,
            part_num,
            num_parts,
            exposure_time_us,
            laser_on_time_us,
            data_types,
            payload_length,
            start_col,
            end_col,
            encoder_values,
            layouts,
            payload,
        })
    }

    pub fn num_cols(&self) -> usize {
        usize::from(self.end_col - self.start_col) + 1
    }

    pub fn layout_for(&self, data_type: DataType) -> Option<&TypeLayout> {
        self.layouts.iter().find(|l| l.data_type == data_type)
    }

    /// Payload bytes belonging to one layout.
    pub fn payload_of(&self, layout: &TypeLayout) -> &[u8] {
        &self.payload[layout.payload_offset..layout.payload_offset + layout.payload_size]
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DataFormat;

    #[test]
    fn broadcast_connect_is_17_bytes_with_reversed_serial() {
        let pkt = build_broadcast_connect(
            Ipv4Addr::new(192, 168, 0, 2),
            41234,
            9,
            0,
            ConnectionKind::Normal,
            20211,
        );
        assert_eq!(pkt.len(), 17);
        assert_eq!(u16::from_be_bytes([pkt[0], pkt[1]]), MAGIC_CONTROL);
        assert_eq!(pkt[2], 17);
        assert_eq!(pkt[3], PacketType::BroadcastConnect as u8);
        assert_eq!(&pkt[4..8], &[192, 168, 0, 2]);
        assert_eq!(u16::from_be_bytes([pkt[8], pkt[9]]), 41234);
        assert_eq!(pkt[10], 9); // session
        assert_eq!(pkt[11], 0); // head id, zero in requests
        assert_eq!(pkt[12], ConnectionKind::Normal as u8);
        // Serial 20211 = 0x00004EF3, transmitted bytes [3,2,1,0].
        assert_eq!(&pkt[13..17], &[0xF3, 0x4E, 0x00, 0x00]);
    }

    #[test]
    fn disconnect_is_a_bare_header() {
        let pkt = build_disconnect();
        assert_eq!(pkt, vec![0xFA, 0xCE, 4, PacketType::Disconnect as u8]);
    }

    #[test]
    fn scan_request_matches_reference_encoding() {
        let req = ScanRequest {
            client_port: 0,
            session_id: 1,
            head_id: 1,
            exposure_mode: 0,
            laser_on: TimeWindowUs {
                min: 100,
                default: 500,
                max: 1000,
            },
            exposure: TimeWindowUs {
                min: 10_000,
                default: 500_000,
                max: 1_000_000,
            },
            laser_detection_threshold: 120,
            saturation_threshold: 800,
            saturated_percentage: 30,
            average_intensity: 150,
            period_ns: period_ns_for_rate(400.0),
            scan_phase_offset_us: 0,
            data_types: DataFormat::XyFullLmFull.data_types(),
            start_col: 0,
            end_col: 1455,
            steps: DataFormat::XyFullLmFull.steps(),
        };
        let pkt = req.encode();
        assert_eq!(pkt.len(), 78);

        let i32_at = |off: usize| {
            i32::from_be_bytes([pkt[off], pkt[off + 1], pkt[off + 2], pkt[off + 3]])
        };
        let i16_at = |off: usize| i16::from_be_bytes([pkt[off], pkt[off + 1]]);

        // Laser and exposure windows at 16..=39.
        assert_eq!(i32_at(16), 100);
        assert_eq!(i32_at(20), 500);
        assert_eq!(i32_at(24), 1000);
        assert_eq!(i32_at(28), 10_000);
        assert_eq!(i32_at(32), 500_000);
        assert_eq!(i32_at(36), 1_000_000);
        // Thresholds.
        assert_eq!(i32_at(40), 120);
        assert_eq!(i32_at(44), 800);
        assert_eq!(i32_at(48), 30);
        assert_eq!(i32_at(52), 150);
        // 400 Hz -> 2.5 ms period.
        assert_eq!(i32_at(56), 2_500_000);
        assert_eq!(i32_at(60), 0);
        assert_eq!(i32_at(64), i32::MAX);
        // XY|LM bitfield, then column range, then per-type steps.
        assert_eq!(
            i16_at(68),
            (DataType::XY | DataType::LM).bits() as i16
        );
        assert_eq!(i16_at(70), 0);
        assert_eq!(i16_at(72), 1455);
        assert_eq!(i16_at(74), 1);
        assert_eq!(i16_at(76), 1);
    }

    #[test]
    fn window_packet_carries_camera_and_quads() {
        let pkt = build_window(
            Camera::B,
            &[[-30_000, 30_000, 30_000, 30_000], [1, -2, 3, -4]],
        );
        assert_eq!(pkt.len(), 4 + 1 + 2 * 16);
        assert_eq!(pkt[3], PacketType::Window as u8);
        assert_eq!(pkt[4], 1);
        assert_eq!(
            i32::from_be_bytes([pkt[5], pkt[6], pkt[7], pkt[8]]),
            -30_000
        );
        assert_eq!(
            i32::from_be_bytes([pkt[21], pkt[22], pkt[23], pkt[24]]),
            1
        );
    }

    #[test]
    fn value_distribution_round_robins_remainder() {
        // 10 columns, 3 parts, step 1: remainder 1 goes to part 0.
        assert_eq!(values_in_part(10, 3, 0, 1), 4);
        assert_eq!(values_in_part(10, 3, 1, 1), 3);
        assert_eq!(values_in_part(10, 3, 2, 1), 3);
        // 8 columns, 2 parts, step 1: even split.
        assert_eq!(values_in_part(8, 2, 0, 1), 4);
        assert_eq!(values_in_part(8, 2, 1, 1), 4);
        // Step decimation: 1456 columns at step 4, one part.
        assert_eq!(values_in_part(1456, 1, 0, 4), 364);
    }

    #[test]
    fn status_round_trips_through_parser() {
        let params = device_sim::StatusParams {
            serial: 31337,
            max_scan_rate: 2500,
            global_time_ns: 987_654_321,
            encoder_values: vec![-1000, 44],
            pixels_in_window: vec![123, 456],
            temperatures: vec![31, 39],
            ..Default::default()
        };
        let status = parse_status(&device_sim::build_status(&params)).unwrap();
        assert_eq!(status.serial, 31337);
        assert_eq!(status.max_scan_rate, 2500);
        assert_eq!(status.global_time_ns, 987_654_321);
        assert_eq!(status.firmware, API_VERSION);
        assert_eq!(status.product, Some(ProductKind::DualCamera));
        assert_eq!(status.encoder_values, vec![-1000, 44]);
        assert_eq!(status.pixels_in_window, vec![123, 456]);
        assert_eq!(status.temperatures, vec![31, 39]);
    }

    #[test]
    fn truncated_status_is_bad_packet() {
        let pkt = device_sim::build_status(&device_sim::StatusParams::default());
        let err = parse_status(&pkt[..30]).unwrap_err();
        assert!(matches!(err, ScanError::BadPacket(_)));
    }

    #[test]
    fn fragment_round_trips_through_parser() {
        let source = FragmentSource {
            head_id: 3,
            camera: Camera::A,
            laser: Laser::L2,
        };
        let payload = device_sim::xy_payload(&[(100, 200), (-32768, 0), (300, 400), (500, -32768)]);
        let pkt = device_sim::build_fragment(&device_sim::FragmentParams {
            source,
            timestamp_ns: 42_000,
            part_num: 0,
            num_parts: 2,
            data_types: DataType::XY,
            steps: vec![1],
            start_col: 0,
            end_col: 7,
            encoder_values: vec![5555],
            payload_length: 16,
            payload,
        });

        let frag = DataFragment::parse(&pkt).unwrap();
        assert_eq!(frag.source, source);
        assert_eq!(frag.timestamp_ns, 42_000);
        assert_eq!(frag.num_cols(), 8);
        assert_eq!(frag.encoder_values, vec![5555]);
        let layout = frag.layout_for(DataType::XY).unwrap();
        assert_eq!(layout.num_vals, 4);
        assert_eq!(layout.payload_size, 16);
        assert_eq!(frag.payload_of(layout).len(), 16);
    }

    #[test]
    fn fragment_with_multiple_types_lays_out_canonically() {
        let source = FragmentSource {
            head_id: 1,
            camera: Camera::A,
            laser: Laser::L1,
        };
        // LM then XY for 4 columns, single part.
        let mut payload = vec![10, 20, 30, 40];
        payload.extend(device_sim::xy_payload(&[(1, 1), (2, 2), (3, 3), (4, 4)]));
        let pkt = device_sim::build_fragment(&device_sim::FragmentParams {
            source,
            timestamp_ns: 1,
            part_num: 0,
            num_parts: 1,
            data_types: DataType::XY | DataType::LM,
            steps: vec![1, 1],
            start_col: 0,
            end_col: 3,
            encoder_values: vec![],
            payload_length: 20,
            payload,
        });

        let frag = DataFragment::parse(&pkt).unwrap();
        let lm = frag.layout_for(DataType::LM).unwrap();
        let xy = frag.layout_for(DataType::XY).unwrap();
        assert_eq!(lm.payload_offset, 0);
        assert_eq!(lm.payload_size, 4);
        assert_eq!(xy.payload_offset, 4);
        assert_eq!(xy.payload_size, 16);
        assert_eq!(frag.payload_of(lm), &[10, 20, 30, 40]);
    }

    #[test]
    fn fragment_rejects_garbage() {
        assert!(DataFragment::parse(&[0xFA, 0xCE, 0, 0]).is_err());
        assert!(DataFragment::parse(&[0xFA]).is_err());

        let source = FragmentSource {
            head_id: 1,
            camera: Camera::A,
            laser: Laser::L1,
        };
        // Truncated payload.
        let mut pkt = device_sim::build_fragment(&device_sim::FragmentParams {
            source,
            timestamp_ns: 1,
            part_num: 0,
            num_parts: 1,
            data_types: DataType::LM,
            steps: vec![1],
            start_col: 0,
            end_col: 99,
            encoder_values: vec![],
            payload_length: 100,
            payload: vec![0; 100],
        });
        pkt.truncate(pkt.len() - 10);
        assert!(DataFragment::parse(&pkt).is_err());
    }
}
