//! Time-smoothed pose interpolation.

use crate::math::{Pose, Vec3};

/// Turns discrete pose updates into a continuously queryable trajectory.
///
/// `current` is always the blend of `start` towards `end` at
/// `clamp((now - start_time) / duration, 0, 1)`. Once that reaches 1,
/// `current == end` and [`update`](Self::update) does nothing until the next
/// [`set_target`](Self::set_target).
#[derive(Debug, Clone)]
pub struct PoseTrajectory {
    start: Pose,
    end: Pose,
    current: Pose,
    start_time: f64,
    duration: f64,
    settled: bool,
}

impl Default for PoseTrajectory {
    fn default() -> Self {
        Self::new()
    }
}

impl PoseTrajectory {
    /// A trajectory resting at the origin.
    pub fn new() -> Self {
        Self::at(Pose::resting())
    }

    pub fn at(pose: Pose) -> Self {
        Self {
            start: pose,
            end: pose,
            current: pose,
            start_time: 0.0,
            duration: 0.0,
            settled: true,
        }
    }

    pub fn current(&self) -> &Pose {
        &self.current
    }

    /// The most recently requested pose.
    pub fn target(&self) -> &Pose {
        &self.end
    }

    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Re-anchors the interpolation at the currently blended pose and heads for `pose`.
    pub fn set_target(&mut self, pose: Pose, now: f64, duration: f64) {
        self.start = self.current;
        self.end = pose;
        self.start_time = now;
        self.duration = duration.max(0.0);
        self.settled = false;
    }

    pub fn set_position(&mut self, position: Vec3, now: f64, duration: f64) {
        let pose = Pose {
            position,
            ..self.end
        };
        self.set_target(pose, now, duration);
    }

    pub fn set_orientation(&mut self, forward: Vec3, up: Vec3, now: f64, duration: f64) {
        let pose = Pose {
            forward,
            up,
            ..self.end
        };
        self.set_target(pose, now, duration);
    }

    /// Advances `current` to time `now`.
    pub fn update(&mut self, now: f64) {
        if self.settled {
            return;
        }

        let progress = if self.duration > 0.0 {
            ((now - self.start_time) / self.duration).clamp(0.0, 1.0)
        } else {
            1.0
        };

        if progress >= 1.0 {
            self.current = self.end;
            self.settled = true;
        } else {
            self.current = self.start.blend(&self.end, progress as f32);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_pose_near(a: &Pose, b: &Pose) {
        assert!(a.position.distance(b.position) < 1e-5, "{:?} vs {:?}", a, b);
        assert!(a.forward.distance(b.forward) < 1e-5, "{:?} vs {:?}", a, b);
        assert!(a.up.distance(b.up) < 1e-5, "{:?} vs {:?}", a, b);
    }

    fn turned_pose() -> Pose {
        Pose::new(Vec3::new(4.0, 0.0, -2.0), Vec3::X, Vec3::Y)
    }

    #[test]
    fn reads_resting_pose_before_any_target() {
        let mut trajectory = PoseTrajectory::new();
        trajectory.update(12.0);
        assert_eq!(*trajectory.current(), Pose::resting());
    }

    #[test]
    fn hits_both_endpoints() {
        let mut trajectory = PoseTrajectory::new();
        let p0 = *trajectory.current();
        let p1 = turned_pose();

        trajectory.set_target(p1, 10.0, 2.0);
        trajectory.update(10.0);
        assert_pose_near(trajectory.current(), &p0);

        trajectory.update(12.0);
        assert_eq!(*trajectory.current(), p1);
        assert!(trajectory.is_settled());
    }

    #[test]
    fn midpoint_lies_on_the_blend() {
        let mut trajectory = PoseTrajectory::new();
        let p1 = turned_pose();
        trajectory.set_target(p1, 0.0, 1.0);
        trajectory.update(0.25);

        let current = trajectory.current();
        assert!(current.position.distance(p1.position * 0.25) < 1e-5);
        // a quarter of the 90 degree turn from -Z towards +X
        let angle = current.forward.angle_between(Vec3::NEG_Z);
        assert!((angle - std::f32::consts::FRAC_PI_8).abs() < 1e-4);
    }

    #[test]
    fn update_is_idempotent_for_the_same_time() {
        let mut trajectory = PoseTrajectory::new();
        trajectory.set_target(turned_pose(), 0.0, 1.0);
        trajectory.update(0.4);
        let first = *trajectory.current();
        trajectory.update(0.4);
        assert_eq!(*trajectory.current(), first);
    }

    #[test]
    fn zero_duration_snaps() {
        let mut trajectory = PoseTrajectory::new();
        trajectory.set_target(turned_pose(), 5.0, 0.0);
        trajectory.update(5.0);
        assert_eq!(*trajectory.current(), turned_pose());
    }

    #[test]
    fn never_overshoots() {
        let mut trajectory = PoseTrajectory::new();
        let p1 = turned_pose();
        trajectory.set_target(p1, 0.0, 1.0);
        trajectory.update(100.0);
        assert_eq!(*trajectory.current(), p1);
        trajectory.update(-3.0);
        assert_eq!(*trajectory.current(), p1);
    }

    #[test]
    fn retarget_starts_from_blended_pose() {
        let mut trajectory = PoseTrajectory::new();
        trajectory.set_target(Pose::from_position(Vec3::new(10.0, 0.0, 0.0)), 0.0, 1.0);
        trajectory.update(0.5);
        let halfway = *trajectory.current();

        trajectory.set_target(Pose::from_position(Vec3::new(0.0, 10.0, 0.0)), 0.5, 1.0);
        trajectory.update(0.5);
        assert_pose_near(trajectory.current(), &halfway);
    }

    #[test]
    fn set_position_keeps_target_orientation() {
        let mut trajectory = PoseTrajectory::new();
        trajectory.set_orientation(Vec3::X, Vec3::Y, 0.0, 0.0);
        trajectory.set_position(Vec3::new(1.0, 2.0, 3.0), 0.0, 0.0);
        trajectory.update(0.0);
        assert_eq!(trajectory.current().forward, Vec3::X);
        assert_eq!(trajectory.current().position, Vec3::new(1.0, 2.0, 3.0));
    }
}
