//! Identities, capabilities, and status shared across the crate.

use std::fmt;
use std::net::Ipv4Addr;

/// Camera within a scan head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Camera {
    A = 0,
    B = 1,
}

impl Camera {
    pub const ALL: [Camera; 2] = [Camera::A, Camera::B];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Camera> {
        match id {
            0 => Some(Camera::A),
            1 => Some(Camera::B),
            _ => None,
        }
    }
}

/// Laser within a scan head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Laser {
    L1 = 0,
    L2 = 1,
    L3 = 2,
    L4 = 3,
    L5 = 4,
    L6 = 5,
    L7 = 6,
    L8 = 7,
}

impl Laser {
    pub const ALL: [Laser; 8] = [
        Laser::L1,
        Laser::L2,
        Laser::L3,
        Laser::L4,
        Laser::L5,
        Laser::L6,
        Laser::L7,
        Laser::L8,
    ];

    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Laser> {
        Laser::ALL.get(id as usize).copied()
    }
}

/// Encoder slot in the system's sync mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Encoder {
    Main = 0,
    Aux1 = 1,
    Aux2 = 2,
}

impl Encoder {
    pub const COUNT: usize = 3;

    pub fn from_index(index: usize) -> Option<Encoder> {
        match index {
            0 => Some(Encoder::Main),
            1 => Some(Encoder::Aux1),
            2 => Some(Encoder::Aux2),
            _ => None,
        }
    }
}

/// Firmware or client API version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FirmwareVersion {
    pub major: u16,
    pub minor: u16,
    pub patch: u16,
}

impl FirmwareVersion {
    pub fn new(major: u16, minor: u16, patch: u16) -> FirmwareVersion {
        FirmwareVersion {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Connection type byte carried in the broadcast-connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum ConnectionKind {
    #[default]
    Normal = 0,
    /// Diagnostic sessions (image capture) run outside the hot path.
    Diagnostic = 1,
}

/// What a head's scan schedule is keyed on.
///
/// Camera-driven heads expose one phaseable element per camera; laser-driven
/// heads one per laser, and only laser-driven heads can host strobes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadKind {
    CameraDriven,
    LaserDriven,
}

/// Closed table of supported head models.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductKind {
    /// Two cameras sharing one laser.
    DualCamera,
    /// Compact single camera, single laser.
    SingleCamera,
    /// Six lasers viewed by one camera; strobe capable.
    HexLaser,
    /// Eight lasers viewed by one camera; strobe capable.
    OctoLaser,
}

impl ProductKind {
    /// Wire tag carried in status and discovery replies.
    pub fn tag(self) -> u16 {
        match self {
            ProductKind::DualCamera => 0x0001,
            ProductKind::SingleCamera => 0x0002,
            ProductKind::HexLaser => 0x0003,
            ProductKind::OctoLaser => 0x0004,
        }
    }

    pub fn from_tag(tag: u16) -> Option<ProductKind> {
        match tag {
            0x0001 => Some(ProductKind::DualCamera),
            0x0002 => Some(ProductKind::SingleCamera),
            0x0003 => Some(ProductKind::HexLaser),
            0x0004 => Some(ProductKind::OctoLaser),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ProductKind::DualCamera => "LPS-2C",
            ProductKind::SingleCamera => "LPS-1C",
            ProductKind::HexLaser => "LPS-6L",
            ProductKind::OctoLaser => "LPS-8L",
        }
    }

    pub fn capabilities(self) -> ScanHeadCapabilities {
        match self {
            ProductKind::DualCamera => ScanHeadCapabilities {
                kind: HeadKind::CameraDriven,
                num_cameras: 2,
                num_lasers: 1,
                strobe_capable: false,
                max_configuration_groups: 2,
                laser_ports: &[Laser::L1],
            },
            ProductKind::SingleCamera => ScanHeadCapabilities {
                kind: HeadKind::CameraDriven,
                num_cameras: 1,
                num_lasers: 1,
                strobe_capable: false,
                max_configuration_groups: 1,
                laser_ports: &[Laser::L1],
            },
            ProductKind::HexLaser => ScanHeadCapabilities {
                kind: HeadKind::LaserDriven,
                num_cameras: 1,
                num_lasers: 6,
                strobe_capable: true,
                max_configuration_groups: 6,
                laser_ports: &[
                    Laser::L1,
                    Laser::L2,
                    Laser::L3,
                    Laser::L4,
                    Laser::L5,
                    Laser::L6,
                ],
            },
            ProductKind::OctoLaser => ScanHeadCapabilities {
                kind: HeadKind::LaserDriven,
                num_cameras: 1,
                num_lasers: 8,
                strobe_capable: true,
                max_configuration_groups: 8,
                laser_ports: &Laser::ALL,
            },
        }
    }
}

/// Capability descriptor derived from the product table.
#[derive(Debug, Clone, Copy)]
pub struct ScanHeadCapabilities {
    pub kind: HeadKind,
    pub num_cameras: u8,
    pub num_lasers: u8,
    pub strobe_capable: bool,
    /// Upper bound on elements referring to this head across a phase table.
    pub max_configuration_groups: u8,
    /// Physical laser-port wiring in port order; strobe identifiers resolve
    /// through this list.
    pub laser_ports: &'static [Laser],
}

impl ScanHeadCapabilities {
    /// Phaseable element count contributed per phase: cameras for
    /// camera-driven heads, lasers for laser-driven ones.
    pub fn phaseable_elements(&self) -> u8 {
        match self.kind {
            HeadKind::CameraDriven => self.num_cameras,
            HeadKind::LaserDriven => self.num_lasers,
        }
    }

    pub fn cameras(&self) -> impl Iterator<Item = Camera> + '_ {
        Camera::ALL.iter().copied().take(self.num_cameras as usize)
    }

    pub fn lasers(&self) -> impl Iterator<Item = Laser> + '_ {
        self.laser_ports.iter().copied()
    }
}

bitflags::bitflags! {
    /// Status flag word reported by the head.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct StatusFlags: u16 {
        const SCANNING          = 1 << 0;
        const SYNC_LOCKED       = 1 << 1;
        const ENCODER_PRESENT   = 1 << 2;
        const LASER_FAULT       = 1 << 8;
        const OVER_TEMPERATURE  = 1 << 9;
    }
}

/// Most recent status snapshot received from a head.
#[derive(Debug, Clone)]
pub struct ScanHeadStatus {
    pub firmware: FirmwareVersion,
    pub product: Option<ProductKind>,
    pub flags: StatusFlags,
    pub serial: u32,
    pub max_scan_rate: u32,
    pub head_ip: Ipv4Addr,
    pub client_ip: Ipv4Addr,
    pub client_port: u16,
    pub sync_id: u32,
    /// Head-local wall clock in nanoseconds; changes with every status.
    pub global_time_ns: u64,
    pub num_packets_sent: u32,
    pub num_profiles_sent: u32,
    pub encoder_values: Vec<i64>,
    /// Pixels currently inside the scan window, per camera.
    pub pixels_in_window: Vec<u32>,
    /// Camera temperatures in degrees C, per camera.
    pub temperatures: Vec<i32>,
}
