//! Assembled profiles, the per-head bounded queue, and cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, Sender};

use crate::format::DataType;
use crate::types::{Camera, Encoder, Laser};
use crate::{Result, ScanError};

/// Fixed column count of every produced profile.
pub const RAW_PROFILE_LEN: usize = 1456;

/// Brightness of a column with no laser signal.
pub const INVALID_BRIGHTNESS: u32 = 0;

/// Sentinel camera row marking an invalid subpixel entry.
pub const INVALID_SUBPIXEL_ROW: u16 = i16::MAX as u16;

/// Default profile-queue depth per head.
pub const DEFAULT_PROFILE_QUEUE_CAPACITY: usize = 100;

/// One column sample in mill-frame coordinates.
///
/// Invalid columns carry NaN coordinates and zero brightness; validity is
/// defined by `y.is_finite()`.
#[derive(Debug, Clone, Copy)]
pub struct ProfilePoint {
    pub x: f64,
    pub y: f64,
    pub brightness: u32,
}

impl ProfilePoint {
    pub const INVALID: ProfilePoint = ProfilePoint {
        x: f64::NAN,
        y: f64::NAN,
        brightness: INVALID_BRIGHTNESS,
    };

    pub fn is_valid(&self) -> bool {
        self.y.is_finite()
    }
}

impl Default for ProfilePoint {
    fn default() -> Self {
        ProfilePoint::INVALID
    }
}

/// Camera pixel position of a column's subpixel peak.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraCoordinate {
    pub row: u16,
    pub col: u16,
}

/// One complete laser-stripe measurement from a single exposure.
#[derive(Debug, Clone)]
pub struct Profile {
    pub head_id: u8,
    pub camera: Camera,
    pub laser: Laser,
    /// Head-local timestamp in nanoseconds.
    pub timestamp_ns: u64,
    /// Encoder counts at exposure time, indexed by [`Encoder`] order.
    pub encoder_values: Vec<i64>,
    pub laser_on_time_us: u32,
    pub exposure_time_us: u32,
    pub data_types: DataType,
    points: Arc<Vec<ProfilePoint>>,
    valid_point_count: usize,
    /// Raw greyscale image rows, present only in image mode.
    pub image: Option<Vec<u8>>,
    /// Per-column camera coordinates, present for subpixel formats.
    pub camera_coordinates: Option<Vec<CameraCoordinate>>,
}

impl Profile {
    pub(crate) fn new(
        head_id: u8,
        camera: Camera,
        laser: Laser,
        timestamp_ns: u64,
        encoder_values: Vec<i64>,
        laser_on_time_us: u32,
        exposure_time_us: u32,
        data_types: DataType,
        points: Arc<Vec<ProfilePoint>>,
        valid_point_count: usize,
        image: Option<Vec<u8>>,
        camera_coordinates: Option<Vec<CameraCoordinate>>,
    ) -> Profile {
        debug_assert_eq!(points.len(), RAW_PROFILE_LEN);
        Profile {
            head_id,
            camera,
            laser,
            timestamp_ns,
            encoder_values,
            laser_on_time_us,
            exposure_time_us,
            data_types,
            points,
            valid_point_count,
            image,
            camera_coordinates,
        }
    }

    /// Dense column-indexed point array; always `RAW_PROFILE_LEN` long.
    pub fn points(&self) -> &[ProfilePoint] {
        &self.points
    }

    /// Count of columns whose Y coordinate is finite.
    pub fn valid_point_count(&self) -> usize {
        self.valid_point_count
    }

    /// Iterator over `(column, point)` for valid columns only.
    pub fn valid_points(&self) -> impl Iterator<Item = (usize, &ProfilePoint)> {
        self.points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_valid())
    }

    /// Encoder count for one mapped encoder, if that encoder was reported.
    pub fn encoder(&self, encoder: Encoder) -> Option<i64> {
        self.encoder_values.get(encoder as usize).copied()
    }

    /// Iterator over `(encoder, value)` pairs in mapping order.
    pub fn encoders(&self) -> impl Iterator<Item = (Encoder, i64)> + '_ {
        self.encoder_values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| Encoder::from_index(i).map(|e| (e, *v)))
    }
}

/// Bounded multi-producer/multi-consumer hand-off between a session's
/// receiver thread and the application.
///
/// When the consumer falls behind, the producer evicts the oldest profile
/// and latches an overflow flag; it never blocks.
#[derive(Clone)]
pub struct ProfileQueue {
    tx: Sender<Profile>,
    rx: Receiver<Profile>,
    capacity: usize,
    overflowed: Arc<AtomicBool>,
}

impl ProfileQueue {
    pub fn new(capacity: usize) -> ProfileQueue {
        let (tx, rx) = bounded(capacity);
        ProfileQueue {
            tx,
            rx,
            capacity,
            overflowed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// True once any profile has ever been evicted to make room.
    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Relaxed)
    }

    /// Producer-side push with replace-oldest-on-overflow.
    pub(crate) fn push(&self, profile: Profile) {
        let mut profile = profile;
        loop {
            match self.tx.try_send(profile) {
                Ok(()) => return,
                Err(crossbeam_channel::TrySendError::Full(p)) => {
                    self.overflowed.store(true, Ordering::Relaxed);
                    let _ = self.rx.try_recv();
                    profile = p;
                }
                Err(crossbeam_channel::TrySendError::Disconnected(_)) => return,
            }
        }
    }

    /// Drop all queued profiles and re-arm the overflow flag.
    pub fn clear(&self) {
        while self.rx.try_recv().is_ok() {}
        self.overflowed.store(false, Ordering::Relaxed);
    }

    pub fn try_take(&self) -> Option<Profile> {
        self.rx.try_recv().ok()
    }

    /// Block until a profile is available.
    pub fn take(&self) -> Result<Profile> {
        self.rx.recv().map_err(|_| ScanError::NotConnected)
    }

    pub fn take_timeout(&self, timeout: Duration) -> Result<Profile> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => {
                ScanError::DeviceTimeout("no profile within timeout".into())
            }
            crossbeam_channel::RecvTimeoutError::Disconnected => ScanError::NotConnected,
        })
    }

    /// Block until a profile is available or the token fires.
    pub fn take_cancellable(&self, cancel: &CancelToken) -> Result<Profile> {
        select! {
            recv(self.rx) -> msg => msg.map_err(|_| ScanError::NotConnected),
            recv(cancel.channel()) -> _ => Err(ScanError::Canceled),
        }
    }
}

/// Cooperative cancellation shared between the application and blocked
/// consumer calls. Cancelling drops the internal sender, which wakes every
/// waiter selecting on [`CancelToken::channel`].
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    guard: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> CancelToken {
        let (tx, rx) = bounded::<()>(0);
        CancelToken {
            inner: Arc::new(CancelInner {
                guard: Mutex::new(Some(tx)),
                rx,
            }),
        }
    }

    /// Fire the token. Idempotent.
    pub fn cancel(&self) {
        if let Ok(mut guard) = self.inner.guard.lock() {
            guard.take();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(
            self.inner.rx.try_recv(),
            Err(crossbeam_channel::TryRecvError::Disconnected)
        )
    }

    /// Channel that disconnects when the token fires; for `select!`.
    pub(crate) fn channel(&self) -> &Receiver<()> {
        &self.inner.rx
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        CancelToken::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::DataType;

    fn test_profile(timestamp_ns: u64) -> Profile {
        Profile::new(
            1,
            Camera::A,
            Laser::L1,
            timestamp_ns,
            vec![0],
            500,
            500,
            DataType::XY | DataType::LM,
            Arc::new(vec![ProfilePoint::INVALID; RAW_PROFILE_LEN]),
            0,
            None,
            None,
        )
    }

    #[test]
    fn profile_length_is_invariant() {
        let p = test_profile(1);
        assert_eq!(p.points().len(), RAW_PROFILE_LEN);
        assert_eq!(p.valid_point_count(), 0);
        assert_eq!(p.valid_points().count(), 0);
    }

    #[test]
    fn encoder_accessor_follows_mapping_order() {
        let mut p = test_profile(1);
        p.encoder_values = vec![100, -5];
        assert_eq!(p.encoder(Encoder::Main), Some(100));
        assert_eq!(p.encoder(Encoder::Aux1), Some(-5));
        assert_eq!(p.encoder(Encoder::Aux2), None);
        let pairs: Vec<_> = p.encoders().collect();
        assert_eq!(pairs, vec![(Encoder::Main, 100), (Encoder::Aux1, -5)]);
    }

    #[test]
    fn queue_replaces_oldest_on_overflow() {
        let q = ProfileQueue::new(4);
        for i in 0..10 {
            q.push(test_profile(i));
        }
        assert_eq!(q.len(), 4);
        assert!(q.overflowed());
        // The dequeued sequence is the last `capacity` produced.
        let got: Vec<u64> = std::iter::from_fn(|| q.try_take())
            .map(|p| p.timestamp_ns)
            .collect();
        assert_eq!(got, vec![6, 7, 8, 9]);
    }

    #[test]
    fn queue_does_not_overflow_within_capacity() {
        let q = ProfileQueue::new(4);
        for i in 0..4 {
            q.push(test_profile(i));
        }
        assert_eq!(q.len(), 4);
        assert!(!q.overflowed());
    }

    #[test]
    fn overflow_recovery_at_scale() {
        // A slow consumer behind 1500 produces into a 1000-deep queue reads
        // exactly the latest 1000 by timestamp.
        let q = ProfileQueue::new(1000);
        for i in 0..1500 {
            q.push(test_profile(i));
        }
        assert_eq!(q.len(), 1000);
        assert!(q.overflowed());
        let got: Vec<u64> = std::iter::from_fn(|| q.try_take())
            .map(|p| p.timestamp_ns)
            .collect();
        let expected: Vec<u64> = (500..1500).collect();
        assert_eq!(got, expected);
    }

    #[test]
    fn clear_empties_and_rearms() {
        let q = ProfileQueue::new(2);
        q.push(test_profile(0));
        q.push(test_profile(1));
        q.push(test_profile(2));
        assert!(q.overflowed());
        q.clear();
        assert!(q.is_empty());
        assert!(!q.overflowed());
    }

    #[test]
    fn take_timeout_expires() {
        let q = ProfileQueue::new(2);
        let err = q.take_timeout(Duration::from_millis(10)).unwrap_err();
        assert!(matches!(err, ScanError::DeviceTimeout(_)));
    }

    #[test]
    fn cancel_token_wakes_blocked_take() {
        let q = ProfileQueue::new(2);
        let cancel = CancelToken::new();
        let waiter = {
            let q = q.clone();
            let cancel = cancel.clone();
            std::thread::spawn(move || q.take_cancellable(&cancel))
        };
        std::thread::sleep(Duration::from_millis(50));
        cancel.cancel();
        let result = waiter.join().unwrap();
        assert!(matches!(result, Err(ScanError::Canceled)));
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn cancel_token_does_not_preempt_available_data() {
        let q = ProfileQueue::new(2);
        q.push(test_profile(7));
        let cancel = CancelToken::new();
        let p = q.take_cancellable(&cancel).unwrap();
        assert_eq!(p.timestamp_ns, 7);
    }
}
