//! Per-head state and lifecycle verbs.
//!
//! A `ScanHead` owns its configuration, window, per-camera alignment, and a
//! bounded profile queue whose capacity is fixed at construction. While
//! connected it also owns the UDP session; everything the session needs is
//! snapshotted into a [`HeadContext`] at connect time, so the session never
//! holds a pointer back to the head or the system.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::alignment::{Alignment, CableOrientation};
use crate::config::ScanHeadConfiguration;
use crate::format::DataFormat;
use crate::packet::{build_disconnect, build_window, period_ns_for_rate, ScanRequest};
use crate::profile::{CancelToken, Profile, ProfileQueue, DEFAULT_PROFILE_QUEUE_CAPACITY, RAW_PROFILE_LEN};
use crate::session::{HeadContext, ScanHeadSession, SessionStats};
use crate::types::{Camera, ConnectionKind, ProductKind, ScanHeadCapabilities, ScanHeadStatus};
use crate::window::ScanWindow;
use crate::{Result, ScanError};

/// One physical scan head and the client-side state for it.
pub struct ScanHead {
    serial: u32,
    id: u8,
    product: ProductKind,
    capabilities: ScanHeadCapabilities,
    enabled: bool,
    config: ScanHeadConfiguration,
    window: ScanWindow,
    /// Per-camera alignment; a global set fills every camera slot.
    alignments: [Alignment; Camera::ALL.len()],
    queue: ProfileQueue,
    context: Option<Arc<HeadContext>>,
    session: Option<ScanHeadSession>,
    scanning: bool,
}

impl ScanHead {
    pub(crate) fn new(serial: u32, id: u8, product: ProductKind) -> ScanHead {
        ScanHead {
            serial,
            id,
            product,
            capabilities: product.capabilities(),
            enabled: true,
            config: ScanHeadConfiguration::default(),
            window: ScanWindow::default(),
            alignments: [Alignment::default(); Camera::ALL.len()],
            queue: ProfileQueue::new(DEFAULT_PROFILE_QUEUE_CAPACITY),
            context: None,
            session: None,
            scanning: false,
        }
    }

    pub fn serial(&self) -> u32 {
        self.serial
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn product(&self) -> ProductKind {
        self.product
    }

    pub fn capabilities(&self) -> &ScanHeadCapabilities {
        &self.capabilities
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Disabled heads are skipped by system connect and scanning fan-out.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn configuration(&self) -> &ScanHeadConfiguration {
        &self.config
    }

    pub fn window(&self) -> &ScanWindow {
        &self.window
    }

    pub fn alignment(&self, camera: Camera) -> &Alignment {
        &self.alignments[camera.id() as usize]
    }

    /// Latest status snapshot from the head, if any session ever saw one.
    pub fn status(&self) -> Option<ScanHeadStatus> {
        self.context.as_ref().and_then(|c| c.status_snapshot())
    }

    /// Human-readable reason the session latched a fatal version mismatch.
    pub fn version_mismatch(&self) -> Option<String> {
        self.context.as_ref().and_then(|c| c.mismatch_reason())
    }

    pub fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .map(|s| s.is_connected())
            .unwrap_or(false)
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    /// True once the queue has dropped a profile to make room.
    pub fn profile_buffer_overflowed(&self) -> bool {
        self.queue.overflowed()
    }

    pub fn profiles_queued(&self) -> usize {
        self.queue.len()
    }

    /// Malformed or unexpected datagrams dropped by the session so far.
    pub fn bad_packets_count(&self) -> u64 {
        self.context
            .as_ref()
            .map(|c| c.stats.bad_packets())
            .unwrap_or(0)
    }

    pub fn complete_profiles_count(&self) -> u64 {
        self.context
            .as_ref()
            .map(|c| c.stats.complete_profiles())
            .unwrap_or(0)
    }

    pub fn incomplete_profiles_count(&self) -> u64 {
        self.context
            .as_ref()
            .map(|c| c.stats.incomplete_profiles())
            .unwrap_or(0)
    }

    /// Replace the whole configuration. Rejected mid-scan because the
    /// periodic request would race the change.
    pub fn configure(&mut self, config: &ScanHeadConfiguration) -> Result<()> {
        if self.scanning {
            return Err(ScanError::AlreadyScanning);
        }
        self.config = config.clone();
        Ok(())
    }

    pub fn set_window(&mut self, window: ScanWindow) -> Result<()> {
        if self.session.is_some() {
            return Err(ScanError::AlreadyConnected);
        }
        self.window = window;
        Ok(())
    }

    /// Set one alignment for every camera on the head.
    pub fn set_alignment(&mut self, alignment: Alignment) -> Result<()> {
        if self.session.is_some() {
            return Err(ScanError::AlreadyConnected);
        }
        for slot in &mut self.alignments {
            *slot = alignment;
        }
        Ok(())
    }

    pub fn set_alignment_camera(&mut self, camera: Camera, alignment: Alignment) -> Result<()> {
        if self.session.is_some() {
            return Err(ScanError::AlreadyConnected);
        }
        if camera.id() >= self.capabilities.num_cameras {
            return Err(ScanError::invalid(format!(
                "camera {} beyond head's {} cameras",
                camera.id(),
                self.capabilities.num_cameras
            )));
        }
        self.alignments[camera.id() as usize] = alignment;
        Ok(())
    }

    /// Open the session. Called by the system with a fresh session id.
    pub(crate) fn connect(&mut self, session_id: u8) -> Result<()> {
        if self.session.is_some() {
            return Err(ScanError::AlreadyConnected);
        }
        let context = Arc::new(HeadContext {
            serial: self.serial,
            head_id: self.id,
            status: Mutex::new(None),
            version_mismatch: Mutex::new(None),
            queue: self.queue.clone(),
            coeffs: [
                self.alignments[0].coeffs(),
                self.alignments[1].coeffs(),
            ],
            stats: SessionStats::default(),
        });
        let session =
            ScanHeadSession::open(session_id, ConnectionKind::Normal, Arc::clone(&context))?;
        self.context = Some(context);
        self.session = Some(session);
        Ok(())
    }

    /// Send a disconnect and tear the session down. The head keeps its
    /// queue and last status.
    pub(crate) fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            session.clear_scan_request();
            session.send_packet(build_disconnect());
            drop(session);
        }
        self.scanning = false;
    }

    /// Push the current window to the device, one packet per camera.
    ///
    /// Constraint endpoints are inverse-aligned into the device frame
    /// (milli-inches); downstream mounting swaps each constraint's endpoints
    /// so the device-frame winding stays clockwise under the 180 degree yaw.
    pub(crate) fn send_window(&self) -> Result<()> {
        let session = self.session.as_ref().ok_or(ScanError::NotConnected)?;
        for camera in self.capabilities.cameras() {
            let alignment = &self.alignments[camera.id() as usize];
            let quads: Vec<[i32; 4]> = self
                .window
                .constraints()
                .iter()
                .map(|c| {
                    let (x1, y1) = alignment.mill_to_raw(c.x1, c.y1);
                    let (x2, y2) = alignment.mill_to_raw(c.x2, c.y2);
                    let quad = [
                        x1.round() as i32,
                        y1.round() as i32,
                        x2.round() as i32,
                        y2.round() as i32,
                    ];
                    match alignment.orientation() {
                        CableOrientation::Upstream => quad,
                        CableOrientation::Downstream => [quad[2], quad[3], quad[0], quad[1]],
                    }
                })
                .collect();
            session.send_packet(build_window(camera, &quads));
        }
        Ok(())
    }

    /// Install the periodic scan request for the given rate and format.
    pub(crate) fn start_scanning(&mut self, rate_hz: f64, format: DataFormat) -> Result<()> {
        let session = self.session.as_ref().ok_or(ScanError::NotConnected)?;
        if self.scanning {
            return Err(ScanError::AlreadyScanning);
        }
        if !rate_hz.is_finite() || rate_hz <= 0.0 {
            return Err(ScanError::invalid(format!("scan rate {rate_hz} Hz")));
        }
        if let Some(status) = self.status() {
            if rate_hz > f64::from(status.max_scan_rate) {
                return Err(ScanError::invalid(format!(
                    "scan rate {rate_hz} Hz exceeds head {} limit of {} Hz",
                    self.serial, status.max_scan_rate
                )));
            }
        }

        self.queue.clear();
        let request = ScanRequest {
            client_port: session.receive_port(),
            session_id: session.session_id(),
            head_id: self.id,
            exposure_mode: 0,
            laser_on: self.config.laser_on_time(),
            exposure: self.config.camera_exposure_time(),
            laser_detection_threshold: self.config.laser_detection_threshold(),
            saturation_threshold: self.config.saturation_threshold(),
            saturated_percentage: self.config.saturated_percentage(),
            average_intensity: self.config.average_intensity(),
            period_ns: period_ns_for_rate(rate_hz),
            scan_phase_offset_us: self.config.scan_phase_offset_us(),
            data_types: format.data_types(),
            start_col: 0,
            end_col: (RAW_PROFILE_LEN - 1) as u16,
            steps: format.steps(),
        };
        session.set_scan_request(request.encode());
        self.scanning = true;
        Ok(())
    }

    pub(crate) fn stop_scanning(&mut self) -> Result<()> {
        if !self.scanning {
            return Err(ScanError::NotScanning);
        }
        if let Some(session) = self.session.as_ref() {
            session.clear_scan_request();
        }
        self.scanning = false;
        Ok(())
    }

    pub fn try_take_next_profile(&self) -> Option<Profile> {
        self.queue.try_take()
    }

    /// Feed the queue directly so consumer paths can be tested without a
    /// device on the wire.
    #[cfg(test)]
    pub(crate) fn inject_profile_for_test(&self, timestamp_ns: u64) {
        use crate::format::DataType;
        use crate::profile::ProfilePoint;
        use crate::types::Laser;
        let profile = Profile::new(
            self.id,
            Camera::A,
            Laser::L1,
            timestamp_ns,
            Vec::new(),
            0,
            0,
            DataType::LM,
            Arc::new(vec![ProfilePoint::INVALID; RAW_PROFILE_LEN]),
            0,
            None,
            None,
        );
        self.queue.push(profile);
    }

    /// Block until the next profile arrives.
    pub fn take_next_profile(&self) -> Result<Profile> {
        self.queue.take()
    }

    pub fn take_next_profile_timeout(&self, timeout: Duration) -> Result<Profile> {
        self.queue.take_timeout(timeout)
    }

    pub fn take_next_profile_cancellable(&self, cancel: &CancelToken) -> Result<Profile> {
        self.queue.take_cancellable(cancel)
    }
}
