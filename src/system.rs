//! The scan system: head registry, lifecycle fan-out, and scheduling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use crate::discover::{discover_devices, DiscoveredDevice};
use crate::format::DataFormat;
use crate::head::ScanHead;
use crate::phase::{PhaseElement, PhaseTable};
use crate::profile::{CancelToken, Profile};
use crate::sync::{SyncDeviceRecord, SyncReceiver};
use crate::{Result, ScanError};

/// Absolute ceiling on the system scan rate, independent of what heads
/// advertise.
pub const MAX_SCAN_RATE_HZ: f64 = 5000.0;

/// Liveness poll interval during connect/disconnect.
const CONNECT_POLL: Duration = Duration::from_millis(10);

/// Settling margin subtracted from the connect budget for the
/// fresh-status wait.
const STATUS_SETTLE: Duration = Duration::from_millis(100);

/// How long a rediscovery sweep listens when `create_scan_head` meets an
/// unknown serial.
const REDISCOVER_TIMEOUT: Duration = Duration::from_secs(1);

/// Assignment of sync-device serials to encoder slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncMapping {
    pub main: u32,
    pub aux1: Option<u32>,
    pub aux2: Option<u32>,
}

/// Owns every scan head and coordinates connect, scanning, and sync.
pub struct ScanSystem {
    heads: Vec<ScanHead>,
    discovered: HashMap<u32, DiscoveredDevice>,
    next_session_id: u8,
    connected: bool,
    scanning: bool,
    phase_table: PhaseTable,
    sync: Option<SyncReceiver>,
    sync_mapping: Option<SyncMapping>,
    take_cursor: AtomicUsize,
}

impl ScanSystem {
    /// Create a system and start the sync receiver. A system without a
    /// reachable sync port still works; sync mapping is just unavailable.
    pub fn new() -> ScanSystem {
        let sync = match SyncReceiver::new() {
            Ok(receiver) => Some(receiver),
            Err(e) => {
                log::warn!("sync receiver unavailable: {e}");
                None
            }
        };
        ScanSystem {
            heads: Vec::new(),
            discovered: HashMap::new(),
            next_session_id: 0,
            connected: false,
            scanning: false,
            phase_table: PhaseTable::new(),
            sync,
            sync_mapping: None,
            take_cursor: AtomicUsize::new(0),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn scan_heads(&self) -> &[ScanHead] {
        &self.heads
    }

    pub fn scan_head(&self, id: u8) -> Option<&ScanHead> {
        self.heads.iter().find(|h| h.id() == id)
    }

    pub fn scan_head_mut(&mut self, id: u8) -> Option<&mut ScanHead> {
        self.heads.iter_mut().find(|h| h.id() == id)
    }

    pub fn scan_head_by_serial(&self, serial: u32) -> Option<&ScanHead> {
        self.heads.iter().find(|h| h.serial() == serial)
    }

    /// Devices currently known from discovery.
    pub fn discovered_devices(&self) -> &HashMap<u32, DiscoveredDevice> {
        &self.discovered
    }

    /// Run a discovery sweep and merge the results.
    pub fn discover(&mut self, timeout: Duration) -> Result<usize> {
        let found = discover_devices(timeout)?;
        let count = found.len();
        self.discovered.extend(found);
        Ok(count)
    }

    /// Register a head by serial and user-chosen id.
    ///
    /// The serial must be on the network: an unknown serial triggers one
    /// rediscovery sweep, and persistent absence is `NotFound`.
    pub fn create_scan_head(&mut self, serial: u32, id: u8) -> Result<&mut ScanHead> {
        if self.connected {
            return Err(ScanError::AlreadyConnected);
        }
        if self.scanning {
            return Err(ScanError::AlreadyScanning);
        }
        if self.heads.iter().any(|h| h.serial() == serial) {
            return Err(ScanError::invalid(format!(
                "scan head serial {serial} already created"
            )));
        }
        if self.heads.iter().any(|h| h.id() == id) {
            return Err(ScanError::invalid(format!("scan head id {id} already used")));
        }

        if !self.discovered.contains_key(&serial) {
            log::info!("serial {serial} unknown, rediscovering");
            match discover_devices(REDISCOVER_TIMEOUT) {
                Ok(found) => self.discovered.extend(found),
                Err(e) => log::warn!("rediscovery failed: {e}"),
            }
        }
        let product = self
            .discovered
            .get(&serial)
            .map(|d| d.product)
            .ok_or(ScanError::NotFound(serial))?;

        self.heads.push(ScanHead::new(serial, id, product));
        Ok(self.heads.last_mut().unwrap_or_else(|| unreachable!()))
    }

    fn enabled_indices(&self) -> Vec<usize> {
        self.heads
            .iter()
            .enumerate()
            .filter(|(_, h)| h.is_enabled())
            .map(|(i, _)| i)
            .collect()
    }

    /// Connect every enabled head.
    ///
    /// Opens all sessions, polls liveness at 10 ms until all heads answer
    /// or the deadline passes, pushes each head's window, then waits for a
    /// status refresh proving the head saw the window. Heads that never
    /// made it are torn down and returned by serial; if every head failed
    /// the whole call is a `DeviceTimeout`.
    pub fn connect(&mut self, timeout: Duration) -> Result<Vec<u32>> {
        if self.connected {
            return Err(ScanError::AlreadyConnected);
        }
        if self.scanning {
            return Err(ScanError::AlreadyScanning);
        }
        if self.heads.is_empty() {
            return Err(ScanError::invalid("no scan heads created"));
        }
        let enabled = self.enabled_indices();
        if enabled.is_empty() {
            return Err(ScanError::invalid("no enabled scan heads"));
        }

        let start = Instant::now();
        for &i in &enabled {
            self.next_session_id = self.next_session_id.wrapping_add(1);
            let session_id = self.next_session_id;
            if let Err(e) = self.heads[i].connect(session_id) {
                for &j in &enabled {
                    self.heads[j].disconnect();
                }
                return Err(e);
            }
        }

        let deadline = start + timeout;
        loop {
            let all_live = enabled.iter().all(|&i| self.heads[i].is_connected());
            if all_live || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(CONNECT_POLL);
        }

        // Window push plus per-head snapshot of the last-seen status clock.
        let mut status_marks: HashMap<usize, Option<u64>> = HashMap::new();
        for &i in &enabled {
            if self.heads[i].is_connected() {
                status_marks.insert(i, self.heads[i].status().map(|s| s.global_time_ns));
                if let Err(e) = self.heads[i].send_window() {
                    log::warn!(
                        "window push to head {} failed: {e}",
                        self.heads[i].serial()
                    );
                }
            }
        }

        // Fresh-status wait: the device acknowledges the window implicitly
        // by continuing to status at a newer global time.
        let status_deadline = deadline
            .checked_sub(STATUS_SETTLE)
            .filter(|&d| d > Instant::now())
            .unwrap_or(deadline);
        loop {
            let all_fresh = status_marks.iter().all(|(&i, &mark)| {
                self.heads[i]
                    .status()
                    .map(|s| Some(s.global_time_ns) != mark)
                    .unwrap_or(false)
            });
            if all_fresh || Instant::now() >= status_deadline {
                break;
            }
            std::thread::sleep(CONNECT_POLL);
        }

        let mut failed = Vec::new();
        for &i in &enabled {
            let fresh = status_marks
                .get(&i)
                .map(|mark| {
                    self.heads[i]
                        .status()
                        .map(|s| Some(s.global_time_ns) != *mark)
                        .unwrap_or(false)
                })
                .unwrap_or(false);
            let ok = self.heads[i].is_connected() && fresh;
            if !ok {
                if let Some(reason) = self.heads[i].version_mismatch() {
                    log::warn!("head {} failed connect: {reason}", self.heads[i].serial());
                }
                failed.push(self.heads[i].serial());
                self.heads[i].disconnect();
            }
        }

        if failed.len() == enabled.len() {
            return Err(ScanError::DeviceTimeout(format!(
                "no scan head answered within {timeout:?}"
            )));
        }
        self.connected = true;
        Ok(failed)
    }

    /// Disconnect every head. Rejected mid-scan.
    pub fn disconnect(&mut self) -> Result<()> {
        if !self.connected {
            return Err(ScanError::NotConnected);
        }
        if self.scanning {
            return Err(ScanError::AlreadyScanning);
        }
        for head in &mut self.heads {
            head.disconnect();
        }
        self.connected = false;
        Ok(())
    }

    /// Lowest scan rate every enabled head can sustain, capped by the
    /// absolute ceiling: per head the limit is the lower of the laser-on
    /// budget (1 / max laser-on time) and the advertised maximum.
    pub fn get_max_scan_rate(&self) -> f64 {
        let mut rate = MAX_SCAN_RATE_HZ;
        for head in self.heads.iter().filter(|h| h.is_enabled()) {
            let laser_limit = 1e6 / f64::from(head.configuration().laser_on_time().max);
            rate = rate.min(laser_limit);
            if let Some(status) = head.status() {
                rate = rate.min(f64::from(status.max_scan_rate));
            }
        }
        rate
    }

    /// Start scanning on every enabled head at `rate_hz`.
    pub fn start_scanning(&mut self, rate_hz: f64, format: DataFormat) -> Result<()> {
        if !self.connected {
            return Err(ScanError::NotConnected);
        }
        if self.scanning {
            return Err(ScanError::AlreadyScanning);
        }
        let max = self.get_max_scan_rate();
        if !rate_hz.is_finite() || rate_hz <= 0.0 || rate_hz > max {
            return Err(ScanError::invalid(format!(
                "scan rate {rate_hz} Hz outside (0, {max}]"
            )));
        }
        let enabled = self.enabled_indices();
        for &i in &enabled {
            if self.heads[i].is_connected() {
                self.heads[i].start_scanning(rate_hz, format)?;
            }
        }
        self.scanning = true;
        Ok(())
    }

    pub fn stop_scanning(&mut self) -> Result<()> {
        if !self.scanning {
            return Err(ScanError::NotScanning);
        }
        for head in &mut self.heads {
            if head.is_scanning() {
                let _ = head.stop_scanning();
            }
        }
        self.scanning = false;
        Ok(())
    }

    /// Take the next profile from any enabled head: non-blocking round-robin
    /// polls bounded by `timeout`, exiting early on cancellation. Returns
    /// the head id alongside the profile.
    pub fn try_take_next_profile(
        &self,
        timeout: Duration,
        cancel: Option<&CancelToken>,
    ) -> Result<(u8, Profile)> {
        let enabled: Vec<&ScanHead> = self.heads.iter().filter(|h| h.is_enabled()).collect();
        if enabled.is_empty() {
            return Err(ScanError::invalid("no enabled scan heads"));
        }
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(ScanError::Canceled);
                }
            }
            let start = self.take_cursor.fetch_add(1, Ordering::Relaxed);
            for offset in 0..enabled.len() {
                let head = enabled[(start + offset) % enabled.len()];
                if let Some(profile) = head.try_take_next_profile() {
                    return Ok((head.id(), profile));
                }
            }
            if Instant::now() >= deadline {
                return Err(ScanError::DeviceTimeout("no profile within timeout".into()));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    // -- Phase table --

    /// Append a new empty phase and return its index.
    pub fn add_phase(&mut self) -> usize {
        self.phase_table.add_phase()
    }

    /// Append an element to the newest phase, validating it against the
    /// owning head's capability.
    pub fn add_phase_element(&mut self, element: PhaseElement) -> Result<()> {
        let head = self
            .heads
            .iter()
            .find(|h| h.id() == element.head_id)
            .ok_or_else(|| {
                ScanError::invalid(format!("phase element names unknown head {}", element.head_id))
            })?;
        if !head.is_enabled() {
            return Err(ScanError::invalid(format!(
                "phase element names disabled head {}",
                element.head_id
            )));
        }
        let caps = *head.capabilities();
        self.phase_table.add_element(element, &caps)
    }

    pub fn phase_table(&self) -> &PhaseTable {
        &self.phase_table
    }

    pub fn clear_phase_table(&mut self) {
        self.phase_table.clear();
    }

    // -- Sync / encoder mapping --

    /// Copy of the live sync-device set.
    pub fn sync_snapshot(&self) -> Vec<SyncDeviceRecord> {
        self.sync
            .as_ref()
            .map(|s| s.snapshot())
            .unwrap_or_default()
    }

    /// Pin sync devices to encoder slots. Serials must be nonzero,
    /// pairwise distinct, present on the network, and Aux2 requires Aux1.
    pub fn set_scan_sync_mapping(
        &mut self,
        main: u32,
        aux1: Option<u32>,
        aux2: Option<u32>,
    ) -> Result<()> {
        if main == 0 || aux1 == Some(0) || aux2 == Some(0) {
            return Err(ScanError::invalid("sync serial of zero"));
        }
        if aux2.is_some() && aux1.is_none() {
            return Err(ScanError::invalid("Aux2 sync mapping requires Aux1"));
        }
        let mut serials = vec![main];
        serials.extend(aux1);
        serials.extend(aux2);
        for window in 0..serials.len() {
            for other in window + 1..serials.len() {
                if serials[window] == serials[other] {
                    return Err(ScanError::invalid(format!(
                        "sync serial {} mapped twice",
                        serials[window]
                    )));
                }
            }
        }
        let live = self.sync_snapshot();
        for serial in &serials {
            if !live.iter().any(|d| d.serial == *serial) {
                return Err(ScanError::NotFound(*serial));
            }
        }
        self.sync_mapping = Some(SyncMapping { main, aux1, aux2 });
        Ok(())
    }

    /// The configured mapping, or the default one: live sync serials sorted
    /// ascending, assigned Main, Aux1, Aux2 in order.
    pub fn scan_sync_mapping(&self) -> Option<SyncMapping> {
        if let Some(mapping) = self.sync_mapping {
            return Some(mapping);
        }
        let live = self.sync_snapshot();
        let mut serials: Vec<u32> = live.iter().map(|d| d.serial).collect();
        serials.sort_unstable();
        serials.first().map(|&main| SyncMapping {
            main,
            aux1: serials.get(1).copied(),
            aux2: serials.get(2).copied(),
        })
    }
}

impl Default for ScanSystem {
    fn default() -> Self {
        ScanSystem::new()
    }
}
