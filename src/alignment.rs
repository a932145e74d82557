//! Per-camera geometric transform between device-frame raw samples and
//! mill-frame coordinates.
//!
//! Raw samples arrive in thousandths of an inch in the camera's own frame;
//! the mill frame is in inches. The transform is an affine rotate-and-shift
//! whose yaw term is fixed by which way the head's cable points.

use crate::{Result, ScanError};

/// Mounting orientation of a scan head relative to mill flow.
///
/// Downstream mounting flips the head 180 degrees about vertical, which the
/// transform models as a yaw of 180 degrees (`cos yaw = -1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CableOrientation {
    #[default]
    Upstream,
    Downstream,
}

impl CableOrientation {
    fn cos_yaw(self) -> f64 {
        match self {
            CableOrientation::Upstream => 1.0,
            CableOrientation::Downstream => -1.0,
        }
    }
}

/// Stored alignment for one camera: roll about the optical axis, a planar
/// shift, and the cable orientation.
#[derive(Debug, Clone, Copy)]
pub struct Alignment {
    roll_degrees: f64,
    shift_x: f64,
    shift_y: f64,
    orientation: CableOrientation,
    // Derived terms, computed once at set-time.
    sin_roll: f64,
    cos_roll: f64,
    cos_yaw: f64,
}

/// Precomputed forward-transform coefficients for the assembler hot path:
/// `x = xr * xx + yr * xy + shift_x`, `y = xr * yx + yr * yy + shift_y`
/// with raw inputs in thousandths of an inch.
#[derive(Debug, Clone, Copy)]
pub struct TransformCoeffs {
    pub xx: f64,
    pub xy: f64,
    pub yx: f64,
    pub yy: f64,
    pub shift_x: f64,
    pub shift_y: f64,
}

impl Default for Alignment {
    fn default() -> Self {
        Alignment {
            roll_degrees: 0.0,
            shift_x: 0.0,
            shift_y: 0.0,
            orientation: CableOrientation::Upstream,
            sin_roll: 0.0,
            cos_roll: 1.0,
            cos_yaw: 1.0,
        }
    }
}

impl Alignment {
    /// Build an alignment. Roll is in degrees, shifts in inches.
    /// Non-finite inputs are rejected.
    pub fn new(
        roll_degrees: f64,
        shift_x: f64,
        shift_y: f64,
        orientation: CableOrientation,
    ) -> Result<Alignment> {
        for (name, v) in [
            ("roll", roll_degrees),
            ("shift x", shift_x),
            ("shift y", shift_y),
        ] {
            if !v.is_finite() {
                return Err(ScanError::invalid(format!(
                    "alignment {name} must be finite, got {v}"
                )));
            }
        }
        let radians = roll_degrees.to_radians();
        Ok(Alignment {
            roll_degrees,
            shift_x,
            shift_y,
            orientation,
            sin_roll: radians.sin(),
            cos_roll: radians.cos(),
            cos_yaw: orientation.cos_yaw(),
        })
    }

    pub fn roll_degrees(&self) -> f64 {
        self.roll_degrees
    }

    pub fn shift_x(&self) -> f64 {
        self.shift_x
    }

    pub fn shift_y(&self) -> f64 {
        self.shift_y
    }

    pub fn orientation(&self) -> CableOrientation {
        self.orientation
    }

    /// Coefficients of the forward transform, folded with the 1/1000 raw
    /// unit scale so the assembler does two multiply-adds per axis.
    pub fn coeffs(&self) -> TransformCoeffs {
        TransformCoeffs {
            xx: self.cos_yaw * self.cos_roll / 1000.0,
            xy: -self.sin_roll / 1000.0,
            yx: self.cos_yaw * self.sin_roll / 1000.0,
            yy: self.cos_roll / 1000.0,
            shift_x: self.shift_x,
            shift_y: self.shift_y,
        }
    }

    /// Raw device point (thousandths of an inch) to mill frame (inches).
    pub fn raw_to_mill(&self, x_raw: f64, y_raw: f64) -> (f64, f64) {
        let c = self.coeffs();
        (
            x_raw * c.xx + y_raw * c.xy + c.shift_x,
            x_raw * c.yx + y_raw * c.yy + c.shift_y,
        )
    }

    /// Mill frame (inches) back to raw device units (thousandths of an
    /// inch): shifts removed, then the rotation applied with negated roll
    /// and yaw.
    pub fn mill_to_raw(&self, x_mill: f64, y_mill: f64) -> (f64, f64) {
        let dx = x_mill - self.shift_x;
        let dy = y_mill - self.shift_y;
        (
            self.cos_yaw * (dx * self.cos_roll + dy * self.sin_roll) * 1000.0,
            (-dx * self.sin_roll + dy * self.cos_roll) * 1000.0,
        )
    }
}
