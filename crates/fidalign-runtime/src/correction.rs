//! Planar correction from a marker pose.
//!
//! Given the marker pose in the base frame, [`compute_correction`] returns
//! the three relative motions that bring the base to a standoff point
//! `offset` metres along the marker's −y axis, facing back towards the
//! marker:
//!
//! 1. rotate in place by `phi` (face the standoff point),
//! 2. drive straight by `dist`,
//! 3. rotate in place by `theta`, ending at heading `yaw + π`.
//!
//! The standoff point is flattened onto the floor (z dropped) and only the
//! marker's yaw is used; roll and pitch are ignored.

use std::f64::consts::PI;

use fidalign_perception::Transform3D;
use fidalign_perception::transform::mat_mul_point;
use serde::{Deserialize, Serialize};

/// Default standoff distance from the marker, in metres.
pub const DEFAULT_OFFSET_M: f64 = 0.75;

/// The three relative motions of an alignment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correction {
    /// Initial in-place rotation (rad).
    pub phi: f64,
    /// Straight-line translation (m).
    pub dist: f64,
    /// Final in-place rotation (rad).
    pub theta: f64,
}

/// Compute the correction for a marker at `marker` (pose of the marker in the
/// base frame) and a standoff distance of `offset` metres.
pub fn compute_correction(marker: &Transform3D, offset: f64) -> Correction {
    let r = marker.rotation.to_matrix();
    let x = mat_mul_point(&r, [0.0, -offset, 0.0, 1.0]);
    let t = marker.translation;
    let p_base = [x[0] + t.x, x[1] + t.y, x[2], 1.0];

    let phi = p_base[1].atan2(p_base[0]);
    let dist = (p_base[0] * p_base[0] + p_base[1] * p_base[1]).sqrt();
    let (_, _, z_rot_base) = marker.rotation.to_euler();
    let theta = -phi + z_rot_base + PI;

    Correction { phi, dist, theta }
}
