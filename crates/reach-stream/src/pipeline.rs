//! Cancellable, progress-reporting sample-then-upload driver.

use rand::rngs::StdRng;
use rand::SeedableRng;
use reach_ir::PipelineConfig;
use reach_kernel::{
    extract_shell, voxel_downsample, AbortSignal, KinematicModel, PoseSnapshot, SamplePoint,
    SampleRun, Shell, StepStatus,
};
use reach_pcd::ControlMessage;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, StreamError};
use crate::streamer::{send_abort, send_points, StreamOptions, StreamSummary};
use crate::transport::Transport;

const SAMPLING_LABEL: &str = "Sampling workspace";
const UPLOAD_LABEL: &str = "Uploading point cloud";

/// Where a [`WorkspacePipeline`] is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Not running; a run may start.
    Idle,
    /// Drawing joint-space samples.
    Sampling,
    /// Sending PCD2 frames.
    Uploading,
    /// Last run sent every frame.
    Done,
    /// Last run was cancelled.
    Aborted,
}

/// Receives `(percent, label)` updates. Must not block.
pub trait ProgressSink {
    /// Report progress in `[0, 100]`.
    fn report(&mut self, percent: f64, label: &str);
}

impl<F: FnMut(f64, &str)> ProgressSink for F {
    fn report(&mut self, percent: f64, label: &str) {
        self(percent, label)
    }
}

/// Progress sink that drops every update.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _percent: f64, _label: &str) {}
}

/// Products of the sampling phase.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleReport {
    /// Raw samples in draw order.
    pub points: Vec<SamplePoint>,
    /// Voxel-deduplicated samples, when a voxel size is configured.
    pub deduped: Option<Vec<SamplePoint>>,
    /// Directional shell, when a shell section is configured.
    pub shell: Option<Shell>,
}

/// Outcome of a completed [`WorkspacePipeline::run`].
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Local products of sampling.
    pub sample: SampleReport,
    /// What went over the wire.
    pub stream: StreamSummary,
}

/// Owns the configuration, state and abort flag of sampling runs.
///
/// The kinematic model is borrowed exclusively for the length of a run and
/// its pose is restored after every batch, so observers never see the
/// sampled poses.
#[derive(Debug)]
pub struct WorkspacePipeline {
    config: PipelineConfig,
    abort: AbortSignal,
    state: PipelineState,
}

impl WorkspacePipeline {
    /// Create an idle pipeline.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            config,
            abort: AbortSignal::new(),
            state: PipelineState::Idle,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Handle that cancels the current or next run.
    ///
    /// A raised flag is replaced by a fresh one when a run ends, so take a
    /// new handle for every run.
    pub fn abort_handle(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Cancel the current or next run.
    pub fn abort(&self) {
        self.abort.abort();
    }

    /// Sample the workspace and compute the configured local products,
    /// without uploading.
    pub async fn sample<M, P>(
        &mut self,
        model: &mut M,
        progress: &mut P,
    ) -> Result<SampleReport, PipelineError>
    where
        M: KinematicModel + ?Sized,
        P: ProgressSink + ?Sized,
    {
        let result = self.sample_inner(model, progress, 1.0).await;
        self.settle(&result);
        result
    }

    /// Sample the workspace and stream the raw cloud over `transport`.
    ///
    /// Fails with [`PipelineError::NoToolPoint`],
    /// [`PipelineError::NoMovableJoints`] or
    /// [`PipelineError::TransportNotReady`] before touching the model. On
    /// abort, a `pcd_abort|seq=<id>` message follows if any frame was sent.
    pub async fn run<M, T, P>(
        &mut self,
        model: &mut M,
        transport: &mut T,
        progress: &mut P,
    ) -> Result<RunReport, PipelineError>
    where
        M: KinematicModel + ?Sized,
        T: Transport + ?Sized,
        P: ProgressSink + ?Sized,
    {
        let result = self.run_inner(model, transport, progress).await;
        self.settle(&result);
        result
    }

    async fn run_inner<M, T, P>(
        &mut self,
        model: &mut M,
        transport: &mut T,
        progress: &mut P,
    ) -> Result<RunReport, PipelineError>
    where
        M: KinematicModel + ?Sized,
        T: Transport + ?Sized,
        P: ProgressSink + ?Sized,
    {
        let share = self.config.progress.sampling_fraction;
        let run = self.prepare(&*model)?;
        if !transport.is_open() {
            return Err(PipelineError::TransportNotReady);
        }

        if let Some(voxel_size) = self.config.dedup.voxel_size {
            let hint = ControlMessage::config([("voxel_size", voxel_size)]);
            transport.send_text(&hint.to_string()).await?;
        }

        let sample = self.sample_run(run, model, progress, share).await?;

        self.state = PipelineState::Uploading;
        progress.report(share * 100.0, UPLOAD_LABEL);
        let options = StreamOptions::from(&self.config.stream);
        let abort = self.abort.clone();
        let sent = send_points(transport, &sample.points, &options, &abort, |sent, count| {
            let done = sent as f64 / count.max(1) as f64;
            let pct = (share + (1.0 - share) * done) * 100.0;
            progress.report(pct.min(100.0), UPLOAD_LABEL);
        })
        .await;

        match sent {
            Ok(stream) => {
                progress.report(100.0, UPLOAD_LABEL);
                info!(
                    seq_id = stream.meta.seq_id,
                    points = stream.meta.total_points,
                    frames = stream.frames_sent,
                    "upload complete"
                );
                Ok(RunReport { sample, stream })
            }
            Err(StreamError::Aborted {
                seq_id,
                frames_sent,
            }) => {
                if frames_sent > 0 {
                    if let Err(err) = send_abort(transport, seq_id).await {
                        warn!(seq_id, %err, "failed to send abort message");
                    }
                }
                Err(PipelineError::Aborted {
                    seq_id: Some(seq_id),
                    frames_sent,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn sample_inner<M, P>(
        &mut self,
        model: &mut M,
        progress: &mut P,
        share: f64,
    ) -> Result<SampleReport, PipelineError>
    where
        M: KinematicModel + ?Sized,
        P: ProgressSink + ?Sized,
    {
        let run = self.prepare(&*model)?;
        self.sample_run(run, model, progress, share).await
    }

    fn prepare<M: KinematicModel + ?Sized>(
        &self,
        model: &M,
    ) -> Result<SampleRun<StdRng>, PipelineError> {
        let rng = match self.config.sampler.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(SampleRun::new(
            model,
            self.config.sampler.samples as usize,
            rng,
        )?)
    }

    async fn sample_run<M, P>(
        &mut self,
        mut run: SampleRun<StdRng>,
        model: &mut M,
        progress: &mut P,
        share: f64,
    ) -> Result<SampleReport, PipelineError>
    where
        M: KinematicModel + ?Sized,
        P: ProgressSink + ?Sized,
    {
        self.state = PipelineState::Sampling;
        let snapshot = PoseSnapshot::capture(&*model);
        let chunk = self.config.sampler.sample_chunk.max(1) as usize;
        info!(samples = run.target(), chunk, "sampling workspace");
        progress.report(0.0, SAMPLING_LABEL);

        let status = loop {
            let status = run.step(model, chunk, &self.abort);
            snapshot.restore(model);
            match status {
                Ok(StepStatus::Running) => {
                    progress.report(run.fraction() * share * 100.0, SAMPLING_LABEL);
                    tokio::task::yield_now().await;
                }
                other => break other,
            }
        };
        snapshot.restore(model);

        if status? == StepStatus::Aborted {
            info!(collected = run.collected(), "sampling aborted");
            return Err(PipelineError::Aborted {
                seq_id: None,
                frames_sent: 0,
            });
        }
        progress.report(share * 100.0, SAMPLING_LABEL);

        let points = run.into_points();
        let deduped = match self.config.dedup.voxel_size {
            Some(size) => Some(voxel_downsample(&points, size)?),
            None => None,
        };
        let shell = match &self.config.shell {
            Some(config) => Some(extract_shell(&points, &model.origin(), config)?),
            None => None,
        };
        debug!(
            points = points.len(),
            deduped = deduped.as_ref().map(Vec::len),
            "sampling done"
        );
        Ok(SampleReport {
            points,
            deduped,
            shell,
        })
    }

    fn settle<T>(&mut self, result: &Result<T, PipelineError>) {
        self.state = match result {
            Ok(_) => PipelineState::Done,
            Err(err) if err.is_abort() => PipelineState::Aborted,
            Err(_) => PipelineState::Idle,
        };
        if self.abort.is_aborted() {
            self.abort = AbortSignal::new();
        }
    }
}
