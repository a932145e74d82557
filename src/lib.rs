//! # stripescan - client runtime for networked laser-profile scan heads
//!
//! Scan heads stream fragmented binary profiles over UDP; this crate
//! discovers them, drives their control sessions, reassembles fragments
//! into mill-frame profiles, and coordinates scanning across a system
//! synchronized by shared encoder/timing devices. Provides:
//! - Broadcast discovery and per-head session management
//! - Profile reassembly with per-camera alignment into mill coordinates
//! - Bounded per-head profile queues with replace-oldest overflow
//! - Sync-device tracking and encoder mapping
//!
//! ## Quick Start
//! ```no_run
//! use std::time::Duration;
//! use stripescan::{DataFormat, ScanSystem, ScanWindow};
//!
//! let mut system = ScanSystem::new();
//! system.discover(Duration::from_secs(1)).unwrap();
//! system.create_scan_head(20211, 1).unwrap();
//!
//! let head = system.scan_head_mut(1).unwrap();
//! head.set_window(ScanWindow::rectangular(30.0, -30.0, -30.0, 30.0).unwrap())
//!     .unwrap();
//!
//! let failed = system.connect(Duration::from_secs(3)).unwrap();
//! assert!(failed.is_empty());
//! system.start_scanning(400.0, DataFormat::XyFullLmFull).unwrap();
//!
//! for _ in 0..100 {
//!     let (head_id, profile) = system
//!         .try_take_next_profile(Duration::from_secs(1), None)
//!         .unwrap();
//!     println!("head {head_id}: {} valid points", profile.valid_point_count());
//! }
//! system.stop_scanning().unwrap();
//! system.disconnect().unwrap();
//! ```

pub mod alignment;
pub mod codec;
pub mod config;
pub mod discover;
pub mod error;
pub mod format;
pub mod head;
pub mod packet;
pub mod phase;
pub mod profile;
pub mod sync;
pub mod system;
pub mod types;
pub mod window;

mod assembler;
mod fragment;
mod iface;
mod session;

pub use alignment::{Alignment, CableOrientation};
pub use config::ScanHeadConfiguration;
pub use discover::{discover_devices, DiscoveredDevice};
pub use error::ScanError;
pub use format::{DataFormat, DataType};
pub use head::ScanHead;
pub use phase::{Phase, PhaseElement, PhaseElementKind, PhaseTable, StrobeConfig};
pub use profile::{CancelToken, Profile, ProfilePoint, RAW_PROFILE_LEN};
pub use sync::{SyncDeviceRecord, SyncReceiver};
pub use system::{ScanSystem, SyncMapping};
pub use types::{Camera, Encoder, FirmwareVersion, Laser, ProductKind, ScanHeadStatus};
pub use window::{ScanWindow, WindowConstraint};

/// Result type alias for scan-head operations.
pub type Result<T, E = ScanError> = std::result::Result<T, E>;
