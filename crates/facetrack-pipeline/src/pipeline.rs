use facetrack_core::scheduler::{batch_detections, pair_results};
use facetrack_core::{
    Clock, ConfirmerError, CoordinateMapper, Detection, Dimensions, EmbeddingExtractor, FaceDetector,
    FaceTracker, Frame, GeometryError, IdentityConfirmer, IdentityState, Point, RecognitionScheduler,
    SchedulerConfig, Size, TrackedFace, TrackingId, TrackingPolicy, Verdict,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to spawn recognizer thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("confirmer: {0}")]
    Confirmer(#[from] ConfirmerError),
    #[error("config: {0}")]
    Config(#[from] crate::config::ConfigError),
}

/// Tunables for one pipeline instance.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineConfig {
    pub scheduler: SchedulerConfig,
    pub tracking: TrackingPolicy,
    /// Block each frame until a batch dispatched on that frame has been
    /// evaluated. Makes output reproducible for replays and tests; a live
    /// capture loop leaves this off.
    pub wait_for_recognition: bool,
}

/// Display-ready state of one tracked face.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceView {
    pub tracking_id: TrackingId,
    pub position: Point,
    pub size: Size,
    pub identity: IdentityState,
    pub animation_progress: f32,
}

impl From<&TrackedFace> for FaceView {
    fn from(face: &TrackedFace) -> Self {
        Self {
            tracking_id: face.tracking_id,
            position: face.position,
            size: face.size,
            identity: face.identity,
            animation_progress: face.animation_progress,
        }
    }
}

/// Emitted once per tracking id, on its first transition to Confirmed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfirmationEvent {
    pub tracking_id: TrackingId,
    pub similarity: f32,
    pub at_millis: i64,
}

/// Everything the view layer needs for one frame.
#[derive(Debug, Clone, Serialize)]
pub struct FrameOutput {
    pub sequence: u64,
    pub faces: Vec<FaceView>,
    pub confirmations: Vec<ConfirmationEvent>,
}

/// Work handed from the frame path to the recognizer thread.
struct RecognitionRequest {
    cycle: u64,
    frame: Arc<Frame>,
    faces: Vec<Detection>,
}

/// Recognizer thread's answer to one request.
struct RecognitionOutcome {
    cycle: u64,
    verdicts: Vec<Verdict>,
    failed: Vec<TrackingId>,
}

/// Frame-path end of the recognizer thread's channels.
struct RecognizerHandle {
    tx: mpsc::Sender<RecognitionRequest>,
    rx: mpsc::Receiver<RecognitionOutcome>,
}

/// Spawn the recognizer on a dedicated OS thread.
///
/// The request channel has a single slot: the scheduler never has more than
/// one batch outstanding, and anything beyond that is dropped at the sender.
fn spawn_recognizer<E: EmbeddingExtractor>(
    mut extractor: E,
    confirmer: IdentityConfirmer,
) -> Result<RecognizerHandle, PipelineError> {
    let (req_tx, mut req_rx) = mpsc::channel::<RecognitionRequest>(1);
    let (out_tx, out_rx) = mpsc::channel::<RecognitionOutcome>(1);

    std::thread::Builder::new()
        .name("facetrack-recognizer".into())
        .spawn(move || {
            tracing::info!("recognizer thread started");
            while let Some(req) = req_rx.blocking_recv() {
                let outcome = run_recognition(&mut extractor, &confirmer, req);
                if out_tx.blocking_send(outcome).is_err() {
                    break;
                }
            }
            tracing::info!("recognizer thread exiting");
        })?;

    Ok(RecognizerHandle {
        tx: req_tx,
        rx: out_rx,
    })
}

/// Extract embeddings for one batch and compare each to the reference.
fn run_recognition<E: EmbeddingExtractor>(
    extractor: &mut E,
    confirmer: &IdentityConfirmer,
    req: RecognitionRequest,
) -> RecognitionOutcome {
    let results = match extractor.extract(&req.frame, &req.faces) {
        Ok(results) => results,
        Err(err) => {
            tracing::warn!(cycle = req.cycle, error = %err, "embedding extraction failed for batch");
            Vec::new()
        }
    };

    let embeddings = if results.is_empty() {
        Vec::new()
    } else {
        pair_results(&req.faces, results)
    };

    let verdicts: Vec<Verdict> = embeddings
        .iter()
        .map(|(id, embedding)| confirmer.evaluate(*id, embedding))
        .collect();

    let failed = req
        .faces
        .iter()
        .map(|f| f.tracking_id)
        .filter(|id| !verdicts.iter().any(|v| v.tracking_id == *id))
        .collect();

    RecognitionOutcome {
        cycle: req.cycle,
        verdicts,
        failed,
    }
}

/// Per-frame entry point: detect, track, schedule recognition, emit.
pub struct FramePipeline<D: FaceDetector> {
    detector: D,
    tracker: FaceTracker,
    scheduler: RecognitionScheduler,
    /// `None` once the recognizer thread is gone; tracking carries on.
    recognizer: Option<RecognizerHandle>,
    view: Dimensions,
    mapper: Option<CoordinateMapper>,
    wait_for_recognition: bool,
}

impl<D: FaceDetector> FramePipeline<D> {
    pub fn new<E: EmbeddingExtractor>(
        detector: D,
        extractor: E,
        confirmer: IdentityConfirmer,
        clock: Arc<dyn Clock>,
        config: PipelineConfig,
        view: Dimensions,
    ) -> Result<Self, PipelineError> {
        let recognizer = spawn_recognizer(extractor, confirmer)?;
        tracing::info!(
            batch_size = config.scheduler.batch_size,
            interval_ms = config.scheduler.interval_ms,
            grace_frames = config.tracking.grace_frames,
            view_width = view.width,
            view_height = view.height,
            "frame pipeline ready"
        );

        Ok(Self {
            detector,
            tracker: FaceTracker::new(config.tracking),
            scheduler: RecognitionScheduler::new(config.scheduler, clock),
            recognizer: Some(recognizer),
            view,
            mapper: None,
            wait_for_recognition: config.wait_for_recognition,
        })
    }

    /// Build from a [`Config`](crate::config::Config): loads and validates the
    /// reference embedding, then spawns the recognizer.
    pub fn from_config<E: EmbeddingExtractor>(
        config: &crate::config::Config,
        detector: D,
        extractor: E,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, PipelineError> {
        let reference = config.load_reference()?;
        let confirmer = IdentityConfirmer::new(reference, config.identity_threshold)?;
        Self::new(detector, extractor, confirmer, clock, config.pipeline_config(), config.view())
    }

    /// Change the display size. The mapper is rebuilt on the next frame.
    pub fn set_view_dimensions(&mut self, view: Dimensions) {
        if view != self.view {
            tracing::debug!(width = view.width, height = view.height, "view resized");
            self.view = view;
        }
    }

    /// When set, each frame blocks until its recognition batch reports back.
    pub fn set_wait_for_recognition(&mut self, wait: bool) {
        self.wait_for_recognition = wait;
    }

    pub fn faces(&self) -> &[TrackedFace] {
        self.tracker.faces()
    }

    pub fn scheduler(&self) -> &RecognitionScheduler {
        &self.scheduler
    }

    /// False once the recognizer thread has exited.
    pub fn recognition_available(&self) -> bool {
        self.recognizer.is_some()
    }

    /// Process one captured frame.
    ///
    /// Never fails: a frame the detector or mapper rejects leaves the
    /// previous tracked state in place.
    pub fn process_frame(&mut self, frame: Frame) -> FrameOutput {
        let frame = Arc::new(frame);
        let sequence = frame.sequence;

        match self.detector.detect(&frame) {
            Ok(detections) => match self.mapper_for(&frame) {
                Ok(mapper) => self.tracker.update(&detections, &mapper),
                Err(err) => {
                    tracing::warn!(sequence, error = %err, "skipping geometry update");
                }
            },
            Err(err) => {
                tracing::warn!(sequence, error = %err, "face detection failed");
            }
        }

        self.tracker.tick();
        self.dispatch_if_due(&frame);

        let mut confirmations = Vec::new();
        if self.wait_for_recognition {
            confirmations.extend(self.settle());
        }
        self.drain_outcomes(&mut confirmations);

        tracing::trace!(sequence, faces = self.tracker.len(), "frame processed");

        FrameOutput {
            sequence,
            faces: self.tracker.faces().iter().map(FaceView::from).collect(),
            confirmations,
        }
    }

    /// Block until the outstanding recognition batch (if any) reports back,
    /// and apply it.
    ///
    /// Must not be called from inside an async runtime.
    pub fn settle(&mut self) -> Vec<ConfirmationEvent> {
        let mut events = Vec::new();
        if !self.scheduler.is_in_flight() {
            return events;
        }
        let Some(recognizer) = self.recognizer.as_mut() else {
            self.scheduler.complete_cycle();
            return events;
        };
        match recognizer.rx.blocking_recv() {
            Some(outcome) => self.apply_outcome(outcome, &mut events),
            None => self.recognizer_lost(),
        }
        events
    }

    fn mapper_for(&mut self, frame: &Frame) -> Result<CoordinateMapper, GeometryError> {
        let frame_dims = Dimensions::new(frame.width as f32, frame.height as f32);
        if let Some(mapper) = self.mapper.filter(|m| m.matches(frame_dims, self.view)) {
            return Ok(mapper);
        }
        let mapper = CoordinateMapper::new(frame_dims, self.view)?;
        tracing::debug!(
            frame_width = frame_dims.width,
            frame_height = frame_dims.height,
            view_width = self.view.width,
            view_height = self.view.height,
            offset = ?mapper.offset(),
            "coordinate mapper rebuilt"
        );
        self.mapper = Some(mapper);
        Ok(mapper)
    }

    fn dispatch_if_due(&mut self, frame: &Arc<Frame>) {
        let Some(recognizer) = self.recognizer.as_ref() else {
            return;
        };
        let Some(batch) = self.scheduler.begin_cycle(self.tracker.faces()) else {
            return;
        };

        let request = RecognitionRequest {
            cycle: self.scheduler.cycles(),
            frame: Arc::clone(frame),
            faces: batch_detections(self.tracker.faces(), &batch),
        };
        let sent = recognizer.tx.try_send(request);

        match sent {
            Ok(()) => {
                tracing::debug!(cycle = self.scheduler.cycles(), faces = batch.len(), "recognition dispatched");
            }
            Err(TrySendError::Full(req)) => {
                tracing::warn!(cycle = req.cycle, "recognizer busy, dropping batch");
                self.scheduler.complete_cycle();
            }
            Err(TrySendError::Closed(_)) => self.recognizer_lost(),
        }
    }

    fn drain_outcomes(&mut self, events: &mut Vec<ConfirmationEvent>) {
        loop {
            let Some(recognizer) = self.recognizer.as_mut() else {
                return;
            };
            match recognizer.rx.try_recv() {
                Ok(outcome) => self.apply_outcome(outcome, events),
                Err(TryRecvError::Empty) => return,
                Err(TryRecvError::Disconnected) => {
                    self.recognizer_lost();
                    return;
                }
            }
        }
    }

    fn apply_outcome(&mut self, outcome: RecognitionOutcome, events: &mut Vec<ConfirmationEvent>) {
        self.scheduler.complete_cycle();
        if !outcome.failed.is_empty() {
            tracing::debug!(cycle = outcome.cycle, failed = ?outcome.failed, "faces without embedding");
        }

        for verdict in outcome.verdicts.iter().filter(|v| v.confirmed) {
            let Some(similarity) = verdict.similarity else {
                continue;
            };
            // No-op if the face was evicted while its batch was in flight.
            if self.tracker.confirm(verdict.tracking_id) {
                let at_millis = self.scheduler.now_millis();
                tracing::info!(tracking_id = verdict.tracking_id, similarity, "identity confirmed");
                events.push(ConfirmationEvent {
                    tracking_id: verdict.tracking_id,
                    similarity,
                    at_millis,
                });
            }
        }
    }

    fn recognizer_lost(&mut self) {
        tracing::error!("recognizer thread exited; continuing without recognition");
        self.recognizer = None;
        self.scheduler.complete_cycle();
    }
}
