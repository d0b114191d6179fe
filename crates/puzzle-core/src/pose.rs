//! Piece poses and placement tolerance.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// World-space position and rotation of a piece.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Pose {
    pub const fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub const fn at(position: Vec3) -> Self {
        Self::new(position, Quat::IDENTITY)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation * Vec3::Z
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }

    /// Rotates the pose around its own position so that its up axis
    /// points to world up, keeping the heading as far as possible.
    pub fn upright(self) -> Self {
        let arc = Quat::from_rotation_arc(self.up().normalize(), Vec3::Y);
        Self {
            position: self.position,
            rotation: (arc * self.rotation).normalize(),
        }
    }

    /// Returns the pose lifted to `floor` when it sits below it.
    pub fn raised_to(self, floor: f32) -> Option<Self> {
        (self.position.y < floor).then(|| Self {
            position: Vec3::new(self.position.x, floor, self.position.z),
            rotation: self.rotation,
        })
    }
}

/// Maximum deviation from the canonical pose that still counts as placed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tolerance {
    /// Strict upper bound on the position distance.
    pub distance: f32,
    /// Strict upper bound on the angle between forward axes, in degrees.
    /// `None` ignores orientation.
    #[serde(default)]
    pub angle_degrees: Option<f32>,
}

impl Tolerance {
    pub const fn position_only(distance: f32) -> Self {
        Self {
            distance,
            angle_degrees: None,
        }
    }

    pub const fn with_angle(distance: f32, angle_degrees: f32) -> Self {
        Self {
            distance,
            angle_degrees: Some(angle_degrees),
        }
    }

    /// Pure placement check of `pose` against `anchor`.
    pub fn accepts(&self, pose: &Pose, anchor: &Pose) -> bool {
        if pose.position.distance(anchor.position) >= self.distance {
            return false;
        }
        match self.angle_degrees {
            None => true,
            Some(max) => pose.forward().angle_between(anchor.forward()).to_degrees() < max,
        }
    }
}
