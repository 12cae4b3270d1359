// Pose math shared by the box modules.
//
// All functions are pure; positions are world-space meters, angles are radians.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::{FRAC_PI_2, PI};


/// Rigid pose: position plus unit-quaternion orientation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec3,
    pub orientation: Quat,
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
    };

    pub fn new(position: Vec3, orientation: Quat) -> Self {
        Self {
            position,
            orientation,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            orientation: Quat::IDENTITY,
        }
    }

    /// Place `local` (expressed in this pose's frame) into the parent frame.
    pub fn compose(&self, local: &Pose) -> Pose {
        Pose {
            position: self.transform_point(local.position),
            orientation: self.orientation * local.orientation,
        }
    }

    /// Map a point from this pose's local frame into the parent frame.
    pub fn transform_point(&self, point: Vec3) -> Vec3 {
        self.position + self.orientation * point
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Roll/pitch/yaw about X/Y/Z, in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EulerAngles {
    pub roll: f32,
    pub pitch: f32,
    pub yaw: f32,
}

impl EulerAngles {
    pub fn is_finite(&self) -> bool {
        self.roll.is_finite() && self.pitch.is_finite() && self.yaw.is_finite()
    }
}

/// Euclidean distance between two pose positions.
pub fn distance(a: &Pose, b: &Pose) -> f32 {
    a.position.distance(b.position)
}

/// Arithmetic mean of two pose positions.
pub fn midpoint(a: &Pose, b: &Pose) -> Vec3 {
    (a.position + b.position) / 2.0
}

/// Convert a unit quaternion to roll/pitch/yaw using the atan2/asin formulation.
///
/// The pitch term is clamped: when floating-point error pushes `|sin(pitch)|`
/// to 1 or beyond, pitch saturates at ±π/2 instead of going NaN.
pub fn quaternion_to_euler_angles(q: Quat) -> EulerAngles {
    let (x, y, z, w) = (q.x, q.y, q.z, q.w);

    let sinr_cosp = 2.0 * (w * x + y * z);
    let cosr_cosp = 1.0 - 2.0 * (x * x + y * y);
    let roll = sinr_cosp.atan2(cosr_cosp);

    let sinp = 2.0 * (w * y - z * x);
    let pitch = if sinp.abs() >= 1.0 {
        FRAC_PI_2.copysign(sinp)
    } else {
        sinp.asin()
    };

    let siny_cosp = 2.0 * (w * z + x * y);
    let cosy_cosp = 1.0 - 2.0 * (y * y + z * z);
    let yaw = siny_cosp.atan2(cosy_cosp);

    EulerAngles { roll, pitch, yaw }
}

/// Orientation of `of` expressed in the frame of `relative_to`.
pub fn relative_rotation(of: &Pose, relative_to: &Pose) -> Quat {
    relative_to.orientation.inverse() * of.orientation
}

/// Corrective rotations that line the key model up with the gripping hand.
///
/// Applied as local (right-multiplied) rotations in this exact order:
/// π about X, then π/2 about Z, then π/2 about Y.
pub fn key_grip_correction() -> Quat {
    Quat::from_axis_angle(Vec3::X, PI)
        * Quat::from_axis_angle(Vec3::Z, FRAC_PI_2)
        * Quat::from_axis_angle(Vec3::Y, FRAC_PI_2)
}

/// World orientation for a key held in a hand whose wrist has `wrist` orientation.
pub fn key_grip_orientation(wrist: Quat) -> Quat {
    wrist * key_grip_correction()
}
