//! Oriented trigger volumes.
//!
//! An [`OrientedBox`] is a static box in world space described by a center
//! position, half extents (`scale`) and a yaw/pitch/roll rotation. The game
//! world is Y-up: yaw turns about Y, pitch about X and roll about Z.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

/// Local-space corner signs in the standard ordering.
///
/// Index 0 is the minimum corner and index 6 the maximum corner; the
/// containment test relies on that.
const CORNER_SIGNS: [[f64; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, -1.0, 1.0],
    [-1.0, -1.0, 1.0],
    [-1.0, 1.0, -1.0],
    [1.0, 1.0, -1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

const MIN_CORNER: usize = 0;
const MAX_CORNER: usize = 6;

/// A static oriented box used as a trigger volume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "BoxShape", into = "BoxShape")]
pub struct OrientedBox {
    /// Center of the box in world space
    position: Vector3<f64>,

    /// Half extents along the local axes
    scale: Vector3<f64>,

    /// Rotation as [yaw, pitch, roll] in radians
    rotation: Vector3<f64>,

    /// Local-space corner offsets derived from `scale`
    corners: [Vector3<f64>; 8],
}

/// Persisted form of an [`OrientedBox`]; corners are rebuilt on load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoxShape {
    pub position: Vector3<f64>,
    pub scale: Vector3<f64>,
    pub rotation: Vector3<f64>,
}

impl From<BoxShape> for OrientedBox {
    fn from(shape: BoxShape) -> Self {
        OrientedBox::new(shape.position, shape.scale, shape.rotation)
    }
}

impl From<OrientedBox> for BoxShape {
    fn from(volume: OrientedBox) -> Self {
        BoxShape {
            position: volume.position,
            scale: volume.scale,
            rotation: volume.rotation,
        }
    }
}

impl OrientedBox {
    /// Create a box from center, half extents and [yaw, pitch, roll].
    pub fn new(position: Vector3<f64>, scale: Vector3<f64>, rotation: Vector3<f64>) -> Self {
        let mut volume = Self {
            position,
            scale,
            rotation,
            corners: [Vector3::zeros(); 8],
        };
        volume.update_vertices();
        volume
    }

    /// Create an unrotated box.
    pub fn axis_aligned(position: Vector3<f64>, scale: Vector3<f64>) -> Self {
        Self::new(position, scale, Vector3::zeros())
    }

    /// Recompute the eight local corner offsets from the current scale.
    ///
    /// Must run after every scale change, before the next `contains` call.
    pub fn update_vertices(&mut self) {
        for (corner, sign) in self.corners.iter_mut().zip(CORNER_SIGNS.iter()) {
            *corner = Vector3::new(
                sign[0] * self.scale.x,
                sign[1] * self.scale.y,
                sign[2] * self.scale.z,
            );
        }
    }

    /// The box orientation as a quaternion (yaw about Y, pitch about X, roll about Z).
    pub fn orientation(&self) -> UnitQuaternion<f64> {
        let yaw = UnitQuaternion::from_axis_angle(&Vector3::y_axis(), self.rotation.x);
        let pitch = UnitQuaternion::from_axis_angle(&Vector3::x_axis(), self.rotation.y);
        let roll = UnitQuaternion::from_axis_angle(&Vector3::z_axis(), self.rotation.z);
        yaw * pitch * roll
    }

    /// Point containment test.
    ///
    /// The query point is rotated into the box frame by the inverse rotation
    /// and compared against the min/max corners on all three axes. Points on
    /// the boundary count as inside.
    pub fn contains(&self, point: &Vector3<f64>) -> bool {
        let local = self.orientation().inverse_transform_vector(&(point - self.position))
            + self.position;

        let min = self.position + self.corners[MIN_CORNER];
        let max = self.position + self.corners[MAX_CORNER];

        (0..3).all(|axis| local[axis] >= min[axis] && local[axis] <= max[axis])
    }

    /// World-space corners in the standard ordering (for drawing).
    pub fn world_corners(&self) -> [Vector3<f64>; 8] {
        let orientation = self.orientation();
        let mut out = [Vector3::zeros(); 8];
        for (dst, corner) in out.iter_mut().zip(self.corners.iter()) {
            *dst = self.position + orientation * corner;
        }
        out
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    pub fn scale(&self) -> Vector3<f64> {
        self.scale
    }

    pub fn rotation(&self) -> Vector3<f64> {
        self.rotation
    }

    /// Move the box. Corners are relative, so nothing else changes.
    pub fn set_position(&mut self, position: Vector3<f64>) {
        self.position = position;
    }

    /// Resize the box and rebuild its corners.
    pub fn set_scale(&mut self, scale: Vector3<f64>) {
        self.scale = scale;
        self.update_vertices();
    }

    /// Rotate the box. `contains` re-rotates every query, so corners stay valid.
    pub fn set_rotation(&mut self, rotation: Vector3<f64>) {
        self.rotation = rotation;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_unit_box_contains_origin() {
        let volume = OrientedBox::axis_aligned(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0));

        assert!(volume.contains(&Vector3::zeros()));
        assert!(!volume.contains(&Vector3::new(2.0, 0.0, 0.0)));
        assert!(volume.contains(&Vector3::new(1.0, -1.0, 1.0)), "boundary counts as inside");
    }

    #[test]
    fn test_offset_box() {
        let volume =
            OrientedBox::axis_aligned(Vector3::new(10.0, 5.0, -3.0), Vector3::new(2.0, 1.0, 1.0));

        assert!(volume.contains(&Vector3::new(11.5, 5.5, -3.5)));
        assert!(!volume.contains(&Vector3::new(0.0, 0.0, 0.0)));
    }

    #[test]
    fn test_yaw_quarter_turn_swaps_axes() {
        // Long along local X, thin along local Z
        let scale = Vector3::new(3.0, 1.0, 1.0);
        let flat = OrientedBox::axis_aligned(Vector3::zeros(), scale);
        let turned = OrientedBox::new(Vector3::zeros(), scale, Vector3::new(FRAC_PI_2, 0.0, 0.0));

        let along_z = Vector3::new(0.0, 0.0, 2.5);
        let along_x = Vector3::new(2.5, 0.0, 0.0);

        assert!(!flat.contains(&along_z));
        assert!(flat.contains(&along_x));

        // After a 90° yaw the long axis lies along world Z
        assert!(turned.contains(&along_z));
        assert!(!turned.contains(&along_x));
    }

    #[test]
    fn test_rotation_about_offset_center() {
        let center = Vector3::new(100.0, 0.0, 50.0);
        let volume = OrientedBox::new(center, Vector3::new(4.0, 2.0, 0.5), Vector3::new(FRAC_PI_2, 0.0, 0.0));

        assert!(volume.contains(&(center + Vector3::new(0.0, 0.0, 3.5))));
        assert!(!volume.contains(&(center + Vector3::new(3.5, 0.0, 0.0))));
    }

    #[test]
    fn test_set_scale_rebuilds_corners() {
        let mut volume = OrientedBox::axis_aligned(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0));
        let point = Vector3::new(2.0, 0.0, 0.0);
        assert!(!volume.contains(&point));

        volume.set_scale(Vector3::new(3.0, 1.0, 1.0));
        assert!(volume.contains(&point));
    }

    #[test]
    fn test_world_corners_follow_rotation() {
        let volume = OrientedBox::new(
            Vector3::zeros(),
            Vector3::new(2.0, 1.0, 1.0),
            Vector3::new(FRAC_PI_2, 0.0, 0.0),
        );
        let corners = volume.world_corners();

        // Max corner (2, 1, 1) yawed 90° lands at (1, 1, -2)
        approx::assert_relative_eq!(corners[6].x, 1.0, epsilon = 1e-9);
        approx::assert_relative_eq!(corners[6].y, 1.0, epsilon = 1e-9);
        approx::assert_relative_eq!(corners[6].z, -2.0, epsilon = 1e-9);
    }

    #[test]
    fn test_serde_rebuilds_corners() {
        let volume = OrientedBox::new(
            Vector3::new(1.0, 2.0, 3.0),
            Vector3::new(2.0, 2.0, 2.0),
            Vector3::new(0.3, 0.0, 0.0),
        );
        let json = serde_json::to_string(&volume).unwrap();
        let back: OrientedBox = serde_json::from_str(&json).unwrap();

        assert_eq!(back, volume);
        assert!(back.contains(&Vector3::new(1.0, 2.0, 3.0)));
    }
}
