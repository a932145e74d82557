//! Scan window: the laser search region in mill coordinates.
//!
//! A window is either unconstrained or a finite set of directed line
//! constraints. Each constraint keeps the points on or to the right of its
//! p1→p2 direction; a rectangle decomposes into four clockwise edges.

use crate::{Result, ScanError};

/// One directed line constraint, endpoints in mill inches.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowConstraint {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl WindowConstraint {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<WindowConstraint> {
        for v in [x1, y1, x2, y2] {
            if !v.is_finite() {
                return Err(ScanError::invalid("window constraint must be finite"));
            }
        }
        if x1 == x2 && y1 == y2 {
            return Err(ScanError::invalid("window constraint endpoints coincide"));
        }
        Ok(WindowConstraint { x1, y1, x2, y2 })
    }

    /// True when the point is on the kept side of the directed line.
    fn satisfied_by(&self, x: f64, y: f64) -> bool {
        let cross = (self.x2 - self.x1) * (y - self.y1) - (self.y2 - self.y1) * (x - self.x1);
        cross <= 0.0
    }
}

/// The laser search region for one head.
#[derive(Debug, Clone, Default)]
pub enum ScanWindow {
    /// No filtering; the head searches its full field of view.
    #[default]
    Unconstrained,
    Constrained(Vec<WindowConstraint>),
}

impl ScanWindow {
    /// Rectangular window from edge positions in mill inches.
    ///
    /// Decomposes into four clockwise constraints in a fixed order: top edge
    /// left-to-right, bottom edge right-to-left, right edge top-to-bottom,
    /// left edge bottom-to-top.
    pub fn rectangular(top: f64, bottom: f64, left: f64, right: f64) -> Result<ScanWindow> {
        for (name, v) in [
            ("top", top),
            ("bottom", bottom),
            ("left", left),
            ("right", right),
        ] {
            if !v.is_finite() {
                return Err(ScanError::invalid(format!(
                    "window {name} must be finite, got {v}"
                )));
            }
        }
        if top <= bottom {
            return Err(ScanError::invalid(format!(
                "window top ({top}) must be above bottom ({bottom})"
            )));
        }
        if right <= left {
            return Err(ScanError::invalid(format!(
                "window right ({right}) must be right of left ({left})"
            )));
        }
        Ok(ScanWindow::Constrained(vec![
            WindowConstraint::new(left, top, right, top)?,
            WindowConstraint::new(right, bottom, left, bottom)?,
            WindowConstraint::new(right, top, right, bottom)?,
            WindowConstraint::new(left, bottom, left, top)?,
        ]))
    }

    /// Arbitrary constraint set.
    pub fn constrained(constraints: Vec<WindowConstraint>) -> Result<ScanWindow> {
        if constraints.is_empty() {
            return Err(ScanError::invalid("constrained window needs constraints"));
        }
        Ok(ScanWindow::Constrained(constraints))
    }

    pub fn constraints(&self) -> &[WindowConstraint] {
        match self {
            ScanWindow::Unconstrained => &[],
            ScanWindow::Constrained(c) => c,
        }
    }

    /// True when the mill-frame point lies inside the window.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        match self {
            ScanWindow::Unconstrained => true,
            ScanWindow::Constrained(cs) => cs.iter().all(|c| c.satisfied_by(x, y)),
        }
    }
}
