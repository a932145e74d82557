//! Turns complete (or force-closed) fragment sets into profiles.
//!
//! Point storage comes from a ring of preinitialized slabs so the hot path
//! does not allocate per profile: a slab is reset from the sentinel pattern
//! when recycled, and only cloned if the application still holds the profile
//! that borrowed it.

use std::sync::Arc;

use crate::alignment::TransformCoeffs;
use crate::format::DataType;
use crate::fragment::FragmentSet;
use crate::profile::{
    CameraCoordinate, Profile, ProfilePoint, ProfileQueue, INVALID_SUBPIXEL_ROW, RAW_PROFILE_LEN,
};
use crate::types::Camera;

/// Sentinel raw sample: either axis at this value marks the column invalid.
pub const INVALID_XY: i16 = i16::MIN;

/// Camera image width in pixels; equals the raw profile column count.
pub const IMAGE_WIDTH: usize = RAW_PROFILE_LEN;
/// Rows carried by each non-final image-mode fragment.
pub const IMAGE_ROWS_PER_FRAGMENT: usize = 4;

/// Slots in the preallocated point ring.
pub(crate) const POINT_RING_SLOTS: usize = 100;

struct PointRing {
    slots: Vec<Arc<Vec<ProfilePoint>>>,
    next: usize,
}

impl PointRing {
    fn new(slots: usize) -> PointRing {
        PointRing {
            slots: (0..slots)
                .map(|_| Arc::new(vec![ProfilePoint::INVALID; RAW_PROFILE_LEN]))
                .collect(),
            next: 0,
        }
    }

    /// Reset the next slot, hand it to `fill`, and return a shared handle.
    /// If a consumer still holds the slot, `make_mut` falls back to a fresh
    /// allocation rather than corrupting the delivered profile.
    fn fill<R>(
        &mut self,
        fill: impl FnOnce(&mut [ProfilePoint]) -> R,
    ) -> (Arc<Vec<ProfilePoint>>, R) {
        let len = self.slots.len();
        let slot = &mut self.slots[self.next];
        self.next = (self.next + 1) % len;
        let points = Arc::make_mut(slot);
        points.fill(ProfilePoint::INVALID);
        let result = fill(points);
        (Arc::clone(slot), result)
    }
}

/// Per-session profile assembler. Owns the point ring and a producer handle
/// to the head's bounded queue.
pub(crate) struct ProfileAssembler {
    ring: PointRing,
    queue: ProfileQueue,
    /// Forward-transform coefficients indexed by camera id.
    coeffs: [TransformCoeffs; Camera::ALL.len()],
}

impl ProfileAssembler {
    pub fn new(
        queue: ProfileQueue,
        coeffs: [TransformCoeffs; Camera::ALL.len()],
    ) -> ProfileAssembler {
        ProfileAssembler {
            ring: PointRing::new(POINT_RING_SLOTS),
            queue,
            coeffs,
        }
    }

    /// Assemble one fragment set into a profile and publish it.
    pub fn assemble(&mut self, set: &FragmentSet) {
        let fragments = set.fragments();
        let first = match fragments.first() {
            Some(f) => f,
            None => return,
        };
        let coeffs = self.coeffs[first.source.camera.id() as usize];
        let total_parts = usize::from(first.num_parts);
        let start_col = usize::from(first.start_col);

        let mut valid_count = 0usize;
        let mut image: Option<Vec<u8>> = None;
        let mut camera_coords: Option<Vec<CameraCoordinate>> = None;

        let (points, ()) = self.ring.fill(|points| {
            for frag in fragments {
                let part = usize::from(frag.part_num);
                for layout in &frag.layouts {
                    let bytes = frag.payload_of(layout);
                    let step = usize::from(layout.step);
                    let stride = total_parts * step;
                    let first_col = start_col + part * step;
                    if layout.data_type == DataType::LM {
                        let mut col = first_col;
                        for &b in bytes.iter().take(layout.num_vals) {
                            if col >= RAW_PROFILE_LEN {
                                break;
                            }
                            points[col].brightness = u32::from(b);
                            col += stride;
                        }
                    } else if layout.data_type == DataType::XY {
                        let mut col = first_col;
                        for pair in bytes.chunks_exact(4).take(layout.num_vals) {
                            if col >= RAW_PROFILE_LEN {
                                break;
                            }
                            let x_raw = i16::from_be_bytes([pair[0], pair[1]]);
                            let y_raw = i16::from_be_bytes([pair[2], pair[3]]);
                            if x_raw != INVALID_XY && y_raw != INVALID_XY {
                                let xr = f64::from(x_raw);
                                let yr = f64::from(y_raw);
                                let p = &mut points[col];
                                if !p.is_valid() {
                                    valid_count += 1;
                                }
                                p.x = xr * coeffs.xx + yr * coeffs.xy + coeffs.shift_x;
                                p.y = xr * coeffs.yx + yr * coeffs.yy + coeffs.shift_y;
                            }
                            col += stride;
                        }
                    } else if layout.data_type == DataType::SP {
                        let coords = camera_coords.get_or_insert_with(default_coords);
                        let mut col = first_col;
                        for row in bytes.chunks_exact(2).take(layout.num_vals) {
                            if col >= RAW_PROFILE_LEN {
                                break;
                            }
                            coords[col] = CameraCoordinate {
                                row: u16::from_be_bytes([row[0], row[1]]),
                                col: col as u16,
                            };
                            col += stride;
                        }
                    } else if layout.data_type == DataType::IM {
                        if part + 1 < total_parts {
                            // Row data: 4 image rows per fragment.
                            let rows = image.get_or_insert_with(|| {
                                vec![
                                    0u8;
                                    total_parts.saturating_sub(1)
                                        * IMAGE_ROWS_PER_FRAGMENT
                                        * IMAGE_WIDTH
                                ]
                            });
                            let offset = part * IMAGE_ROWS_PER_FRAGMENT * IMAGE_WIDTH;
                            let n = bytes.len().min(rows.len().saturating_sub(offset));
                            rows[offset..offset + n].copy_from_slice(&bytes[..n]);
                        } else {
                            // Final fragment: subpixel (row, brightness)
                            // pairs for every image column.
                            let coords = camera_coords.get_or_insert_with(default_coords);
                            for (col, entry) in
                                bytes.chunks_exact(4).take(IMAGE_WIDTH).enumerate()
                            {
                                let row = u16::from_be_bytes([entry[0], entry[1]]);
                                let brightness = u16::from_be_bytes([entry[2], entry[3]]);
                                if brightness < 0x8000 {
                                    points[col].brightness = u32::from(brightness) / 7;
                                    coords[col] = CameraCoordinate {
                                        row,
                                        col: col as u16,
                                    };
                                } else {
                                    points[col].brightness = 0;
                                    coords[col] = CameraCoordinate {
                                        row: INVALID_SUBPIXEL_ROW,
                                        col: col as u16,
                                    };
                                }
                            }
                        }
                    }
                    // PW and VR are reserved payloads: read past, never
                    // decoded.
                }
            }
        });

        let profile = Profile::new(
            first.source.head_id,
            first.source.camera,
            first.source.laser,
            first.timestamp_ns,
            first.encoder_values.clone(),
            first.laser_on_time_us,
            first.exposure_time_us,
            first.data_types,
            points,
            valid_count,
            image,
            camera_coords,
        );
        self.queue.push(profile);
    }
}

fn default_coords() -> Vec<CameraCoordinate> {
    (0..RAW_PROFILE_LEN)
        .map(|col| CameraCoordinate {
            row: INVALID_SUBPIXEL_ROW,
            col: col as u16,
        })
        .collect()
}
