//! The seam between the sampler and a forward-kinematics evaluator.

use std::f64::consts::PI;

use nalgebra::Point3;

/// World-space tool point position for one joint configuration.
pub type SamplePoint = Point3<f64>;

/// One movable degree of freedom.
#[derive(Debug, Clone, PartialEq)]
pub struct JointSpec {
    /// Stable joint name.
    pub id: String,
    /// Lower limit (radians or meters).
    pub lower: f64,
    /// Upper limit, always `>= lower`.
    pub upper: f64,
}

impl JointSpec {
    /// Build a joint spec, replacing missing, non-finite or degenerate limits
    /// with `[-π, π]`.
    pub fn new(id: impl Into<String>, lower: Option<f64>, upper: Option<f64>) -> Self {
        let (lower, upper) = match (lower, upper) {
            (Some(l), Some(u)) if l.is_finite() && u.is_finite() && u > l => (l, u),
            _ => (-PI, PI),
        };
        Self {
            id: id.into(),
            lower,
            upper,
        }
    }

    /// Width of the limit interval.
    pub fn range(&self) -> f64 {
        self.upper - self.lower
    }

    /// Map `u` in `[0, 1)` onto the limit interval.
    pub fn lerp(&self, u: f64) -> f64 {
        self.lower + u * self.range()
    }
}

/// A kinematic model the sampler can drive.
///
/// Joints are addressed by their position in [`KinematicModel::movable_joints`].
/// Implementations recompute forward kinematics on demand in
/// [`KinematicModel::tool_point`].
pub trait KinematicModel {
    /// Movable joints in a stable order.
    fn movable_joints(&self) -> Vec<JointSpec>;

    /// Current value of the movable joint at `index`.
    fn joint_value(&self, index: usize) -> f64;

    /// Set the movable joint at `index`.
    fn set_joint_value(&mut self, index: usize, value: f64);

    /// World position of the tool point for the current joint values, or
    /// `None` if the model has no designated end effector.
    fn tool_point(&self) -> Option<Point3<f64>>;

    /// Reference origin for directional binning: the world position of the
    /// first movable joint, or the model root when there is none.
    fn origin(&self) -> Point3<f64>;
}

/// Joint values captured at one instant, restored verbatim later.
#[derive(Debug, Clone, PartialEq)]
pub struct PoseSnapshot {
    values: Vec<(String, f64)>,
}

impl PoseSnapshot {
    /// Capture the current movable joint values of `model`.
    pub fn capture<M: KinematicModel + ?Sized>(model: &M) -> Self {
        let values = model
            .movable_joints()
            .into_iter()
            .enumerate()
            .map(|(i, spec)| (spec.id, model.joint_value(i)))
            .collect();
        Self { values }
    }

    /// Write the captured values back onto `model`.
    pub fn restore<M: KinematicModel + ?Sized>(&self, model: &mut M) {
        for (i, (_, value)) in self.values.iter().enumerate() {
            model.set_joint_value(i, *value);
        }
    }

    /// Captured value of the joint named `id`.
    pub fn get(&self, id: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(name, _)| name == id)
            .map(|(_, v)| *v)
    }

    /// Number of captured joints.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether no joints were captured.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
