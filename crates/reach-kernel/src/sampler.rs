//! Uniform joint-space sampling of the tool point.

use rand::Rng;
use tracing::{debug, info};

use crate::abort::AbortSignal;
use crate::error::{KernelError, Result};
use crate::model::{JointSpec, KinematicModel, PoseSnapshot, SamplePoint};

/// State of a [`SampleRun`] after a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    /// More samples remain.
    Running,
    /// The requested sample count was reached.
    Finished,
    /// The abort signal was raised.
    Aborted,
}

/// Result of a complete sampling pass.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// All requested samples, in draw order.
    Complete(Vec<SamplePoint>),
    /// Cancelled; the partial cloud is dropped.
    Aborted {
        /// Samples drawn before the abort was seen.
        collected: usize,
    },
}

/// An in-progress sampling pass that can be advanced in batches.
///
/// Drivers call [`SampleRun::step`] with a batch size, restore the pose
/// snapshot, yield to their scheduler, and repeat until the run is no longer
/// [`StepStatus::Running`].
#[derive(Debug)]
pub struct SampleRun<R> {
    joints: Vec<JointSpec>,
    target: usize,
    points: Vec<SamplePoint>,
    values: Vec<f64>,
    rng: R,
}

impl<R: Rng> SampleRun<R> {
    /// Prepare a run of `target` samples against `model`.
    ///
    /// Fails before any joint is touched if the model has no tool point or
    /// no movable joints.
    pub fn new<M: KinematicModel + ?Sized>(model: &M, target: usize, rng: R) -> Result<Self> {
        if model.tool_point().is_none() {
            return Err(KernelError::NoToolPoint);
        }
        let joints = model.movable_joints();
        if joints.is_empty() {
            return Err(KernelError::NoMovableJoints);
        }
        Ok(Self {
            values: vec![0.0; joints.len()],
            joints,
            target,
            points: Vec::with_capacity(target),
            rng,
        })
    }

    /// Draw up to `batch` more samples.
    ///
    /// The abort signal is polled before every draw.
    pub fn step<M: KinematicModel + ?Sized>(
        &mut self,
        model: &mut M,
        batch: usize,
        abort: &AbortSignal,
    ) -> Result<StepStatus> {
        for _ in 0..batch {
            if abort.is_aborted() {
                return Ok(StepStatus::Aborted);
            }
            if self.points.len() >= self.target {
                return Ok(StepStatus::Finished);
            }
            for (value, joint) in self.values.iter_mut().zip(&self.joints) {
                *value = joint.lerp(self.rng.gen::<f64>());
            }
            for (i, value) in self.values.iter().enumerate() {
                model.set_joint_value(i, *value);
            }
            let point = model.tool_point().ok_or(KernelError::NoToolPoint)?;
            self.points.push(point);
        }
        if abort.is_aborted() {
            Ok(StepStatus::Aborted)
        } else if self.points.len() >= self.target {
            Ok(StepStatus::Finished)
        } else {
            Ok(StepStatus::Running)
        }
    }

    /// Samples drawn so far.
    pub fn collected(&self) -> usize {
        self.points.len()
    }

    /// Requested sample count.
    pub fn target(&self) -> usize {
        self.target
    }

    /// Completed share in `[0, 1]`.
    pub fn fraction(&self) -> f64 {
        if self.target == 0 {
            1.0
        } else {
            self.points.len() as f64 / self.target as f64
        }
    }

    /// Take the sampled cloud.
    pub fn into_points(self) -> Vec<SamplePoint> {
        self.points
    }
}

/// Sample `samples` tool point positions without yielding.
///
/// The model pose is snapshotted first, restored after every `chunk`
/// iterations and restored once more on exit, so the visible pose is the
/// same before and after the call.
pub fn sample_workspace<M, R>(
    model: &mut M,
    samples: usize,
    chunk: usize,
    rng: R,
    abort: &AbortSignal,
) -> Result<SampleOutcome>
where
    M: KinematicModel + ?Sized,
    R: Rng,
{
    let mut run = SampleRun::new(&*model, samples, rng)?;
    let snapshot = PoseSnapshot::capture(&*model);
    let chunk = chunk.max(1);
    info!(samples, joints = snapshot.len(), "sampling workspace");

    let status = loop {
        let status = run.step(model, chunk, abort);
        snapshot.restore(model);
        match status {
            Ok(StepStatus::Running) => {
                debug!(collected = run.collected(), "sampling batch done");
            }
            other => break other,
        }
    };
    snapshot.restore(model);

    match status? {
        StepStatus::Aborted => {
            info!(collected = run.collected(), "sampling aborted");
            Ok(SampleOutcome::Aborted {
                collected: run.collected(),
            })
        }
        _ => Ok(SampleOutcome::Complete(run.into_points())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point3;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    /// Two prismatic axes moving the tool point in the XY plane.
    struct Gantry {
        values: [f64; 2],
        has_tool: bool,
        writes: usize,
    }

    impl Gantry {
        fn new() -> Self {
            Self {
                values: [0.125, -0.375],
                has_tool: true,
                writes: 0,
            }
        }
    }

    impl KinematicModel for Gantry {
        fn movable_joints(&self) -> Vec<JointSpec> {
            vec![
                JointSpec::new("x", Some(0.0), Some(2.0)),
                JointSpec::new("y", Some(-1.0), Some(1.0)),
            ]
        }

        fn joint_value(&self, index: usize) -> f64 {
            self.values[index]
        }

        fn set_joint_value(&mut self, index: usize, value: f64) {
            self.writes += 1;
            self.values[index] = value;
        }

        fn tool_point(&self) -> Option<Point3<f64>> {
            self.has_tool
                .then(|| Point3::new(self.values[0], self.values[1], 0.0))
        }

        fn origin(&self) -> Point3<f64> {
            Point3::origin()
        }
    }

    #[test]
    fn returns_exactly_n_points_within_limits() {
        for n in [0usize, 1, 7, 2500, 6001] {
            let mut model = Gantry::new();
            let rng = StdRng::seed_from_u64(42);
            let outcome =
                sample_workspace(&mut model, n, 2500, rng, &AbortSignal::new()).unwrap();
            let SampleOutcome::Complete(points) = outcome else {
                panic!("unexpected abort");
            };
            assert_eq!(points.len(), n);
            for p in &points {
                assert!((0.0..2.0).contains(&p.x));
                assert!((-1.0..1.0).contains(&p.y));
            }
        }
    }

    #[test]
    fn pose_is_restored_bit_exact() {
        let mut model = Gantry::new();
        let before = PoseSnapshot::capture(&model);
        let rng = StdRng::seed_from_u64(3);
        sample_workspace(&mut model, 5000, 700, rng, &AbortSignal::new()).unwrap();
        let after = PoseSnapshot::capture(&model);
        assert_eq!(before, after);
        assert_eq!(model.values[0].to_bits(), 0.125f64.to_bits());
        assert_eq!(model.values[1].to_bits(), (-0.375f64).to_bits());
    }

    #[test]
    fn same_seed_same_cloud() {
        let draw = || {
            let mut model = Gantry::new();
            match sample_workspace(
                &mut model,
                300,
                64,
                StdRng::seed_from_u64(9),
                &AbortSignal::new(),
            )
            .unwrap()
            {
                SampleOutcome::Complete(points) => points,
                SampleOutcome::Aborted { .. } => unreachable!(),
            }
        };
        assert_eq!(draw(), draw());
    }

    #[test]
    fn abort_stops_before_touching_the_model() {
        let mut model = Gantry::new();
        let abort = AbortSignal::new();
        abort.abort();
        let outcome =
            sample_workspace(&mut model, 100, 10, StdRng::seed_from_u64(1), &abort).unwrap();
        assert_eq!(outcome, SampleOutcome::Aborted { collected: 0 });
        assert_eq!(model.values, [0.125, -0.375]);
    }

    #[test]
    fn abort_mid_run_restores_pose() {
        let mut model = Gantry::new();
        let abort = AbortSignal::new();
        let mut run = SampleRun::new(&model, 1000, StdRng::seed_from_u64(5)).unwrap();
        let snapshot = PoseSnapshot::capture(&model);

        assert_eq!(run.step(&mut model, 100, &abort).unwrap(), StepStatus::Running);
        snapshot.restore(&mut model);
        assert_eq!(run.collected(), 100);
        assert!((run.fraction() - 0.1).abs() < 1e-12);

        abort.abort();
        assert_eq!(run.step(&mut model, 100, &abort).unwrap(), StepStatus::Aborted);
        assert_eq!(run.collected(), 100);
        assert_eq!(PoseSnapshot::capture(&model), snapshot);
    }

    #[test]
    fn rejects_models_without_tool_or_joints() {
        let mut model = Gantry::new();
        model.has_tool = false;
        let err = SampleRun::new(&model, 10, StdRng::seed_from_u64(0)).unwrap_err();
        assert_eq!(err, KernelError::NoToolPoint);
        assert_eq!(model.writes, 0);

        let chain = crate::SerialChain::from_def(&reach_ir::ChainDef {
            tool_point: Some(reach_ir::Vec3::default()),
            ..Default::default()
        })
        .unwrap();
        let err = SampleRun::new(&chain, 10, StdRng::seed_from_u64(0)).unwrap_err();
        assert_eq!(err, KernelError::NoMovableJoints);
    }
}
