//! Serial chain forward kinematics built from a [`ChainDef`].

use std::f64::consts::PI;

use nalgebra::{Isometry3, Point3, Translation3, Unit, UnitQuaternion, Vector3};
use reach_ir::{ChainDef, JointKind, Origin};

use crate::error::{KernelError, Result};
use crate::model::{JointSpec, KinematicModel};

/// A joint of the chain with its placement resolved.
#[derive(Debug, Clone)]
struct ChainJoint {
    id: String,
    kind: JointKind,
    origin: Isometry3<f64>,
    axis: Unit<Vector3<f64>>,
    value: f64,
}

impl ChainJoint {
    fn motion(&self) -> Isometry3<f64> {
        match self.kind {
            JointKind::Fixed => Isometry3::identity(),
            JointKind::Revolute | JointKind::Continuous => Isometry3::from_parts(
                Translation3::identity(),
                UnitQuaternion::from_axis_angle(&self.axis, self.value),
            ),
            JointKind::Prismatic => Isometry3::from_parts(
                Translation3::from(self.axis.into_inner() * self.value),
                UnitQuaternion::identity(),
            ),
        }
    }
}

/// A serial kinematic chain with an optional tool point.
#[derive(Debug, Clone)]
pub struct SerialChain {
    base: Isometry3<f64>,
    joints: Vec<ChainJoint>,
    /// Chain indices of the movable joints, in order.
    movable: Vec<usize>,
    specs: Vec<JointSpec>,
    tool: Option<Vector3<f64>>,
}

fn origin_to_isometry(origin: &Origin) -> Isometry3<f64> {
    Isometry3::from_parts(
        Translation3::new(origin.xyz.x, origin.xyz.y, origin.xyz.z),
        UnitQuaternion::from_euler_angles(origin.rpy.x, origin.rpy.y, origin.rpy.z),
    )
}

impl SerialChain {
    /// Build a chain from its description.
    pub fn from_def(def: &ChainDef) -> Result<Self> {
        let mut joints = Vec::with_capacity(def.joints.len());
        let mut movable = Vec::new();
        let mut specs = Vec::new();

        for (i, joint) in def.joints.iter().enumerate() {
            let axis_vec = Vector3::new(joint.axis.x, joint.axis.y, joint.axis.z);
            let axis = match Unit::try_new(axis_vec, 1e-12) {
                Some(axis) => axis,
                None if joint.kind.is_movable() => {
                    return Err(KernelError::InvalidChain(format!(
                        "joint {} has a zero-length axis",
                        joint.id
                    )))
                }
                None => Vector3::z_axis(),
            };

            if joint.kind.is_movable() {
                let spec = match joint.kind {
                    JointKind::Continuous => JointSpec::new(&joint.id, Some(-PI), Some(PI)),
                    _ => JointSpec::new(&joint.id, joint.limits.lower, joint.limits.upper),
                };
                movable.push(i);
                specs.push(spec);
            }

            joints.push(ChainJoint {
                id: joint.id.clone(),
                kind: joint.kind,
                origin: origin_to_isometry(&joint.origin),
                axis,
                value: joint.state,
            });
        }

        Ok(Self {
            base: origin_to_isometry(&def.base),
            joints,
            movable,
            specs,
            tool: def.tool_point.map(|t| Vector3::new(t.x, t.y, t.z)),
        })
    }

    /// Number of joints including fixed ones.
    pub fn joint_count(&self) -> usize {
        self.joints.len()
    }

    /// Set a movable joint by name. Returns `false` if no movable joint has
    /// that name.
    pub fn set_joint_by_id(&mut self, id: &str, value: f64) -> bool {
        match self.specs.iter().position(|s| s.id == id) {
            Some(index) => {
                self.set_joint_value(index, value);
                true
            }
            None => false,
        }
    }

    /// World frame of every joint (before its own motion), root to tip.
    pub fn joint_frames(&self) -> Vec<(String, Isometry3<f64>)> {
        let mut frame = self.base;
        let mut frames = Vec::with_capacity(self.joints.len());
        for joint in &self.joints {
            frame *= joint.origin;
            frames.push((joint.id.clone(), frame));
            frame *= joint.motion();
        }
        frames
    }

    /// World frame after the last joint.
    pub fn tip_frame(&self) -> Isometry3<f64> {
        self.joints
            .iter()
            .fold(self.base, |frame, joint| frame * joint.origin * joint.motion())
    }
}

impl KinematicModel for SerialChain {
    fn movable_joints(&self) -> Vec<JointSpec> {
        self.specs.clone()
    }

    fn joint_value(&self, index: usize) -> f64 {
        self.movable
            .get(index)
            .map(|&i| self.joints[i].value)
            .unwrap_or(0.0)
    }

    fn set_joint_value(&mut self, index: usize, value: f64) {
        if let Some(&i) = self.movable.get(index) {
            self.joints[i].value = value;
        }
    }

    fn tool_point(&self) -> Option<Point3<f64>> {
        let offset = self.tool?;
        Some(self.tip_frame() * Point3::from(offset))
    }

    fn origin(&self) -> Point3<f64> {
        let Some(&first) = self.movable.first() else {
            return Point3::from(self.base.translation.vector);
        };
        let frame = self.joints[..first]
            .iter()
            .fold(self.base, |frame, joint| frame * joint.origin * joint.motion())
            * self.joints[first].origin;
        Point3::from(frame.translation.vector)
    }
}
