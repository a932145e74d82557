//! Phase table: the ordered scan schedule across heads.
//!
//! A phase is an ordered list of elements fired together; an element binds a
//! head to a camera, a laser, or (on strobe-capable heads) a strobe port.
//! Validation happens at insert time against the head's capability.

use crate::alignment::CableOrientation;
use crate::types::{Camera, HeadKind, Laser, ScanHeadCapabilities};
use crate::{Result, ScanError};

/// Strobe elements allowed per head within one phase.
pub const MAX_STROBES_PER_HEAD_PER_PHASE: usize = 2;

/// Illumination settings for a strobe element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrobeConfig {
    /// Strobe output level, 1..=100.
    pub brightness_percent: u8,
    /// Delay from phase start to strobe fire.
    pub delay_us: u32,
}

impl StrobeConfig {
    pub fn new(brightness_percent: u8, delay_us: u32) -> Result<StrobeConfig> {
        ScanError::check_range("strobe brightness percent", i64::from(brightness_percent), 1, 100)?;
        Ok(StrobeConfig {
            brightness_percent,
            delay_us,
        })
    }
}

/// What a phase element drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseElementKind {
    Camera(Camera),
    Laser(Laser),
    /// Strobe port index into the head's laser-port list.
    Strobe(u8),
}

/// One schedulable element of a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseElement {
    pub head_id: u8,
    pub kind: PhaseElementKind,
    pub strobe: Option<StrobeConfig>,
    /// Exposure duration override for this element.
    pub duration_us: Option<u32>,
}

impl PhaseElement {
    pub fn camera(head_id: u8, camera: Camera) -> PhaseElement {
        PhaseElement {
            head_id,
            kind: PhaseElementKind::Camera(camera),
            strobe: None,
            duration_us: None,
        }
    }

    pub fn laser(head_id: u8, laser: Laser) -> PhaseElement {
        PhaseElement {
            head_id,
            kind: PhaseElementKind::Laser(laser),
            strobe: None,
            duration_us: None,
        }
    }

    pub fn strobe(head_id: u8, port: u8, config: StrobeConfig) -> PhaseElement {
        PhaseElement {
            head_id,
            kind: PhaseElementKind::Strobe(port),
            strobe: Some(config),
            duration_us: None,
        }
    }
}

/// One phase: an ordered element list.
#[derive(Debug, Clone, Default)]
pub struct Phase {
    pub elements: Vec<PhaseElement>,
}

impl Phase {
    fn strobe_count_for(&self, head_id: u8) -> usize {
        self.elements
            .iter()
            .filter(|e| e.head_id == head_id && matches!(e.kind, PhaseElementKind::Strobe(_)))
            .count()
    }
}

/// The scan schedule: an ordered list of phases.
#[derive(Debug, Clone, Default)]
pub struct PhaseTable {
    phases: Vec<Phase>,
}

impl PhaseTable {
    pub fn new() -> PhaseTable {
        PhaseTable::default()
    }

    pub fn phases(&self) -> &[Phase] {
        &self.phases
    }

    pub fn phase_count(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    pub fn clear(&mut self) {
        self.phases.clear();
    }

    /// Append a new empty phase; elements are added to the newest phase.
    pub fn add_phase(&mut self) -> usize {
        self.phases.push(Phase::default());
        self.phases.len() - 1
    }

    /// Elements referring to `head_id` across the whole table.
    pub fn elements_for_head(&self, head_id: u8) -> usize {
        self.phases
            .iter()
            .flat_map(|p| p.elements.iter())
            .filter(|e| e.head_id == head_id)
            .count()
    }

    /// Validate and append an element to the last phase.
    pub fn add_element(
        &mut self,
        element: PhaseElement,
        caps: &ScanHeadCapabilities,
    ) -> Result<()> {
        let phase = self
            .phases
            .last()
            .ok_or_else(|| ScanError::invalid("phase table has no phase; call add_phase first"))?;

        match element.kind {
            PhaseElementKind::Camera(camera) => {
                if caps.kind != HeadKind::CameraDriven {
                    return Err(ScanError::invalid(
                        "camera element on a laser-driven head",
                    ));
                }
                if camera.id() >= caps.num_cameras {
                    return Err(ScanError::invalid(format!(
                        "camera {} beyond head's {} cameras",
                        camera.id(),
                        caps.num_cameras
                    )));
                }
            }
            PhaseElementKind::Laser(laser) => {
                if caps.kind != HeadKind::LaserDriven {
                    return Err(ScanError::invalid(
                        "laser element on a camera-driven head",
                    ));
                }
                if !caps.laser_ports.contains(&laser) {
                    return Err(ScanError::invalid(format!(
                        "laser {} not wired on this head",
                        laser.id()
                    )));
                }
            }
            PhaseElementKind::Strobe(port) => {
                if !caps.strobe_capable {
                    return Err(ScanError::invalid("strobe element on a non-strobe head"));
                }
                if usize::from(port) >= caps.laser_ports.len() {
                    return Err(ScanError::invalid(format!(
                        "strobe port {port} beyond {} laser ports",
                        caps.laser_ports.len()
                    )));
                }
                if phase.strobe_count_for(element.head_id) >= MAX_STROBES_PER_HEAD_PER_PHASE {
                    return Err(ScanError::invalid(format!(
                        "head {} already has {} strobe elements in this phase",
                        element.head_id, MAX_STROBES_PER_HEAD_PER_PHASE
                    )));
                }
            }
        }

        if self.elements_for_head(element.head_id)
            >= usize::from(caps.max_configuration_groups)
        {
            return Err(ScanError::invalid(format!(
                "head {} exceeds its {} configuration groups",
                element.head_id, caps.max_configuration_groups
            )));
        }

        if let Some(phase) = self.phases.last_mut() {
            phase.elements.push(element);
        }
        Ok(())
    }
}

/// Laser driven by a strobe port, honoring mounting orientation: a
/// downstream head's port order mirrors, so the wired pair flips.
pub fn resolve_strobe_laser(
    caps: &ScanHeadCapabilities,
    orientation: CableOrientation,
    port: u8,
) -> Option<Laser> {
    let ports = caps.laser_ports;
    match orientation {
        CableOrientation::Upstream => ports.get(usize::from(port)).copied(),
        CableOrientation::Downstream => ports
            .len()
            .checked_sub(1 + usize::from(port))
            .and_then(|i| ports.get(i))
            .copied(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ProductKind;

    #[test]
    fn camera_elements_bounded_by_capability() {
        let caps = ProductKind::SingleCamera.capabilities();
        let mut table = PhaseTable::new();
        table.add_phase();
        assert!(table
            .add_element(PhaseElement::camera(1, Camera::A), &caps)
            .is_ok());
        let err = table
            .add_element(PhaseElement::camera(1, Camera::B), &caps)
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidArgument(_)));
    }

    #[test]
    fn laser_elements_only_on_laser_driven_heads() {
        let camera_caps = ProductKind::DualCamera.capabilities();
        let laser_caps = ProductKind::HexLaser.capabilities();
        let mut table = PhaseTable::new();
        table.add_phase();
        assert!(table
            .add_element(PhaseElement::laser(1, Laser::L1), &camera_caps)
            .is_err());
        assert!(table
            .add_element(PhaseElement::laser(1, Laser::L6), &laser_caps)
            .is_ok());
        assert!(table
            .add_element(PhaseElement::laser(1, Laser::L7), &laser_caps)
            .is_err());
    }

    #[test]
    fn third_strobe_in_a_phase_rejected() {
        let caps = ProductKind::HexLaser.capabilities();
        let strobe = StrobeConfig::new(50, 0).unwrap();
        let mut table = PhaseTable::new();
        table.add_phase();
        assert!(table
            .add_element(PhaseElement::strobe(2, 0, strobe), &caps)
            .is_ok());
        assert!(table
            .add_element(PhaseElement::strobe(2, 1, strobe), &caps)
            .is_ok());
        let err = table
            .add_element(PhaseElement::strobe(2, 2, strobe), &caps)
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidArgument(_)));

        // A new phase resets the per-phase strobe budget.
        table.add_phase();
        assert!(table
            .add_element(PhaseElement::strobe(2, 2, strobe), &caps)
            .is_ok());
    }

    #[test]
    fn strobes_rejected_on_camera_driven_heads() {
        let caps = ProductKind::DualCamera.capabilities();
        let strobe = StrobeConfig::new(50, 0).unwrap();
        let mut table = PhaseTable::new();
        table.add_phase();
        assert!(table
            .add_element(PhaseElement::strobe(1, 0, strobe), &caps)
            .is_err());
    }

    #[test]
    fn configuration_groups_bound_whole_table() {
        let caps = ProductKind::DualCamera.capabilities(); // 2 groups
        let mut table = PhaseTable::new();
        table.add_phase();
        assert!(table
            .add_element(PhaseElement::camera(3, Camera::A), &caps)
            .is_ok());
        table.add_phase();
        assert!(table
            .add_element(PhaseElement::camera(3, Camera::B), &caps)
            .is_ok());
        table.add_phase();
        let err = table
            .add_element(PhaseElement::camera(3, Camera::A), &caps)
            .unwrap_err();
        assert!(matches!(err, ScanError::InvalidArgument(_)));
        assert_eq!(table.elements_for_head(3), 2);
    }

    #[test]
    fn element_needs_an_open_phase() {
        let caps = ProductKind::DualCamera.capabilities();
        let mut table = PhaseTable::new();
        assert!(table
            .add_element(PhaseElement::camera(1, Camera::A), &caps)
            .is_err());
    }

    #[test]
    fn strobe_port_mapping_follows_orientation() {
        let caps = ProductKind::HexLaser.capabilities();
        assert_eq!(
            resolve_strobe_laser(&caps, CableOrientation::Upstream, 0),
            Some(Laser::L1)
        );
        assert_eq!(
            resolve_strobe_laser(&caps, CableOrientation::Downstream, 0),
            Some(Laser::L6)
        );
        assert_eq!(
            resolve_strobe_laser(&caps, CableOrientation::Upstream, 5),
            Some(Laser::L6)
        );
        assert_eq!(resolve_strobe_laser(&caps, CableOrientation::Upstream, 6), None);
    }
}
