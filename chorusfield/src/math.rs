//! Math types for ChorusField

pub use glam::Vec3;

/// Where an entity is and which way it faces.
///
/// `forward` and `up` are expected to be unit length and orthogonal. The
/// producer is responsible for that; nothing here re-normalizes them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub forward: Vec3,
    pub up: Vec3,
}

impl Pose {
    pub fn new(position: Vec3, forward: Vec3, up: Vec3) -> Self {
        Self {
            position,
            forward,
            up,
        }
    }

    /// Origin, facing `-Z` with `+Y` up.
    pub fn resting() -> Self {
        Self {
            position: Vec3::ZERO,
            forward: Vec3::NEG_Z,
            up: Vec3::Y,
        }
    }

    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            ..Self::resting()
        }
    }

    pub fn right(&self) -> Vec3 {
        self.forward.cross(self.up)
    }

    pub fn distance(&self, other: &Self) -> f32 {
        self.position.distance(other.position)
    }

    /// Blend towards `other`: positions linearly, orientation vectors spherically.
    pub fn blend(&self, other: &Self, t: f32) -> Self {
        Self {
            position: self.position.lerp(other.position, t),
            forward: slerp_unit(self.forward, other.forward, t),
            up: slerp_unit(self.up, other.up, t),
        }
    }

    /// Direction of `target` expressed in this pose's right/up/forward basis.
    pub fn local_direction(&self, target: Vec3) -> Vec3 {
        let to_target = (target - self.position).normalize_or_zero();
        Vec3::new(
            to_target.dot(self.right()),
            to_target.dot(self.up),
            to_target.dot(self.forward),
        )
    }
}

impl Default for Pose {
    fn default() -> Self {
        Self::resting()
    }
}

/// Spherical interpolation between two unit vectors.
///
/// Falls back to a normalized lerp when the vectors are nearly parallel or
/// opposite, where the slerp axis is undefined.
pub fn slerp_unit(a: Vec3, b: Vec3, t: f32) -> Vec3 {
    let cos_theta = a.dot(b).clamp(-1.0, 1.0);
    if cos_theta.abs() > 0.9995 {
        let blended = a.lerp(b, t);
        return if blended.length_squared() > f32::EPSILON {
            blended.normalize()
        } else {
            a
        };
    }

    let theta = cos_theta.acos();
    let sin_theta = theta.sin();
    let wa = ((1.0 - t) * theta).sin() / sin_theta;
    let wb = (t * theta).sin() / sin_theta;
    a * wa + b * wb
}

/// Maps `value` from `[min, max]` onto `[0, 1]`, unclamped.
pub fn project(value: f32, min: f32, max: f32) -> f32 {
    if (max - min).abs() <= f32::EPSILON {
        return if value < min { 0.0 } else { 1.0 };
    }
    (value - min) / (max - min)
}
