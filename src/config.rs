//! Per-head acquisition configuration with set-time validation.

use crate::{Result, ScanError};

pub const MIN_LASER_ON_TIME_US: u32 = 15;
pub const MAX_LASER_ON_TIME_US: u32 = 650_000;
pub const MIN_CAMERA_EXPOSURE_US: u32 = 15;
pub const MAX_CAMERA_EXPOSURE_US: u32 = 2_000_000;

/// A `{min, default, max}` time window in microseconds.
///
/// The device's auto-exposure walks `default` between `min` and `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindowUs {
    pub min: u32,
    pub default: u32,
    pub max: u32,
}

impl TimeWindowUs {
    fn validated(what: &'static str, min: u32, default: u32, max: u32, lo: u32, hi: u32) -> Result<Self> {
        for v in [min, default, max] {
            ScanError::check_range(what, i64::from(v), i64::from(lo), i64::from(hi))?;
        }
        if !(min <= default && default <= max) {
            return Err(ScanError::invalid(format!(
                "{what}: need min <= default <= max, got {min}/{default}/{max}"
            )));
        }
        Ok(TimeWindowUs { min, default, max })
    }
}

/// Acquisition settings transmitted to a head in every scan request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanHeadConfiguration {
    laser_on: TimeWindowUs,
    camera_exposure: TimeWindowUs,
    laser_detection_threshold: u32,
    saturation_threshold: u32,
    saturated_percentage: u32,
    average_intensity: u32,
    scan_phase_offset_us: u32,
}

impl Default for ScanHeadConfiguration {
    fn default() -> Self {
        ScanHeadConfiguration {
            laser_on: TimeWindowUs {
                min: 100,
                default: 500,
                max: 1000,
            },
            camera_exposure: TimeWindowUs {
                min: 10_000,
                default: 500_000,
                max: 1_000_000,
            },
            laser_detection_threshold: 120,
            saturation_threshold: 800,
            saturated_percentage: 30,
            average_intensity: 150,
            scan_phase_offset_us: 0,
        }
    }
}

impl ScanHeadConfiguration {
    /// Laser-on window in microseconds; `min <= default <= max` enforced.
    pub fn set_laser_on_time(&mut self, min: u32, default: u32, max: u32) -> Result<()> {
        self.laser_on = TimeWindowUs::validated(
            "laser on time (us)",
            min,
            default,
            max,
            MIN_LASER_ON_TIME_US,
            MAX_LASER_ON_TIME_US,
        )?;
        Ok(())
    }

    /// Camera exposure window in microseconds; `min <= default <= max`.
    pub fn set_camera_exposure_time(&mut self, min: u32, default: u32, max: u32) -> Result<()> {
        self.camera_exposure = TimeWindowUs::validated(
            "camera exposure (us)",
            min,
            default,
            max,
            MIN_CAMERA_EXPOSURE_US,
            MAX_CAMERA_EXPOSURE_US,
        )?;
        Ok(())
    }

    /// Minimum brightness for a pixel to count as laser signal (0..=1023).
    pub fn set_laser_detection_threshold(&mut self, value: u32) -> Result<()> {
        ScanError::check_range("laser detection threshold", i64::from(value), 0, 1023)?;
        self.laser_detection_threshold = value;
        Ok(())
    }

    /// Brightness above which a pixel counts as saturated (0..=1023).
    pub fn set_saturation_threshold(&mut self, value: u32) -> Result<()> {
        ScanError::check_range("saturation threshold", i64::from(value), 0, 1023)?;
        self.saturation_threshold = value;
        Ok(())
    }

    /// Percentage of saturated pixels tolerated by auto-exposure (1..=100).
    pub fn set_saturated_percentage(&mut self, value: u32) -> Result<()> {
        ScanError::check_range("saturated percentage", i64::from(value), 1, 100)?;
        self.saturated_percentage = value;
        Ok(())
    }

    /// Target average image intensity for auto-exposure (0..=255).
    pub fn set_average_intensity(&mut self, value: u32) -> Result<()> {
        ScanError::check_range("average intensity", i64::from(value), 0, 255)?;
        self.average_intensity = value;
        Ok(())
    }

    /// Offset of this head's exposure inside the scan period, microseconds.
    pub fn set_scan_phase_offset(&mut self, us: u32) -> Result<()> {
        ScanError::check_range(
            "scan phase offset (us)",
            i64::from(us),
            0,
            i64::from(MAX_CAMERA_EXPOSURE_US),
        )?;
        self.scan_phase_offset_us = us;
        Ok(())
    }

    pub fn laser_on_time(&self) -> TimeWindowUs {
        self.laser_on
    }

    pub fn camera_exposure_time(&self) -> TimeWindowUs {
        self.camera_exposure
    }

    pub fn laser_detection_threshold(&self) -> u32 {
        self.laser_detection_threshold
    }

    pub fn saturation_threshold(&self) -> u32 {
        self.saturation_threshold
    }

    pub fn saturated_percentage(&self) -> u32 {
        self.saturated_percentage
    }

    pub fn average_intensity(&self) -> u32 {
        self.average_intensity
    }

    pub fn scan_phase_offset_us(&self) -> u32 {
        self.scan_phase_offset_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_self_consistent() {
        let cfg = ScanHeadConfiguration::default();
        let l = cfg.laser_on_time();
        assert!(l.min <= l.default && l.default <= l.max);
        let e = cfg.camera_exposure_time();
        assert!(e.min <= e.default && e.default <= e.max);
    }

    #[test]
    fn window_ordering_enforced() {
        let mut cfg = ScanHeadConfiguration::default();
        assert!(cfg.set_laser_on_time(500, 100, 1000).is_err());
        assert!(cfg.set_camera_exposure_time(100, 1000, 500).is_err());
        // No partial state change on rejection.
        assert_eq!(cfg.laser_on_time().default, 500);
    }

    #[test]
    fn thresholds_rejected_out_of_range() {
        let mut cfg = ScanHeadConfiguration::default();
        assert!(cfg.set_laser_detection_threshold(1024).is_err());
        assert!(cfg.set_saturation_threshold(1024).is_err());
        assert!(cfg.set_saturated_percentage(0).is_err());
        assert!(cfg.set_saturated_percentage(101).is_err());
        assert!(cfg.set_average_intensity(256).is_err());
        assert!(cfg.set_laser_detection_threshold(1023).is_ok());
        assert!(cfg.set_saturated_percentage(100).is_ok());
    }

    #[test]
    fn laser_on_clamped_to_device_limits() {
        let mut cfg = ScanHeadConfiguration::default();
        assert!(cfg.set_laser_on_time(10, 100, 1000).is_err());
        assert!(cfg
            .set_laser_on_time(MIN_LASER_ON_TIME_US, 100, MAX_LASER_ON_TIME_US)
            .is_ok());
        assert!(cfg
            .set_laser_on_time(100, 500, MAX_LASER_ON_TIME_US + 1)
            .is_err());
    }
}
