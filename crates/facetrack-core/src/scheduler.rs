//! Rate-limited recognition scheduling.
//!
//! Recognition is far more expensive than tracking, so it runs on its own
//! slow cadence. Each cycle picks the tracked faces that have gone longest
//! without a recognition attempt and hands them to the extractor as one
//! batch. Timestamps are stamped when a face is selected, whether or not its
//! extraction later succeeds, so a face that never yields an embedding cannot
//! starve the others.

use crate::tracker::TrackedFace;
use crate::types::{Detection, Embedding, TrackingId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

pub const DEFAULT_BATCH_SIZE: usize = 3;
pub const DEFAULT_INTERVAL_MS: i64 = 1000;

/// Millisecond time source.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> i64;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Externally driven clock for tests and recorded sessions.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self { now: AtomicI64::new(start_millis) }
    }

    pub fn set(&self, millis: i64) {
        self.now.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Maximum faces per recognition batch.
    pub batch_size: usize,
    /// Minimum time between recognition cycles.
    pub interval_ms: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            interval_ms: DEFAULT_INTERVAL_MS,
        }
    }
}

/// Last recognition attempt per tracking id.
///
/// May hold ids that are no longer tracked; those are harmless and get
/// pruned at the next cycle.
#[derive(Debug, Clone, Default)]
pub struct RecognitionCursor {
    last_recognized: HashMap<TrackingId, i64>,
}

impl RecognitionCursor {
    /// Last attempt for `id`, or `None` if never attempted.
    pub fn last_recognized(&self, id: TrackingId) -> Option<i64> {
        self.last_recognized.get(&id).copied()
    }

    /// Record an attempt. Never moves a timestamp backwards.
    pub fn record(&mut self, id: TrackingId, at_millis: i64) {
        let entry = self.last_recognized.entry(id).or_insert(at_millis);
        *entry = (*entry).max(at_millis);
    }

    /// Drop entries for ids not in `live`.
    pub fn retain_live(&mut self, live: &HashSet<TrackingId>) {
        self.last_recognized.retain(|id, _| live.contains(id));
    }

    pub fn len(&self) -> usize {
        self.last_recognized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_recognized.is_empty()
    }
}

/// Decides when a recognition cycle runs and which faces it covers.
pub struct RecognitionScheduler {
    config: SchedulerConfig,
    clock: Arc<dyn Clock>,
    cursor: RecognitionCursor,
    last_cycle_at: Option<i64>,
    in_flight: bool,
    cycles: u64,
}

impl RecognitionScheduler {
    pub fn new(config: SchedulerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: SchedulerConfig {
                batch_size: config.batch_size.max(1),
                interval_ms: config.interval_ms.max(0),
            },
            clock,
            cursor: RecognitionCursor::default(),
            last_cycle_at: None,
            in_flight: false,
            cycles: 0,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn cursor(&self) -> &RecognitionCursor {
        &self.cursor
    }

    pub fn now_millis(&self) -> i64 {
        self.clock.now_millis()
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight
    }

    /// Number of cycles dispatched so far.
    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// True when no batch is outstanding and the cadence interval has elapsed.
    pub fn is_due(&self) -> bool {
        if self.in_flight {
            return false;
        }
        match self.last_cycle_at {
            None => true,
            Some(last) => self.clock.now_millis().saturating_sub(last) >= self.config.interval_ms,
        }
    }

    /// The stalest tracked faces, at most `batch_size`.
    ///
    /// Never-recognized faces rank before any timestamp. Faces held through a
    /// grace period are skipped: their last detection does not describe the
    /// current frame. Ties keep tracked-set order.
    pub fn select(&self, tracked: &[TrackedFace]) -> Vec<TrackingId> {
        let mut ranked: Vec<(Option<i64>, TrackingId)> = tracked
            .iter()
            .filter(|f| f.missed_frames == 0)
            .map(|f| (self.cursor.last_recognized(f.tracking_id), f.tracking_id))
            .collect();
        // Stable sort keeps insertion order among equal timestamps; `None` sorts first.
        ranked.sort_by_key(|&(at, _)| at);
        ranked
            .into_iter()
            .take(self.config.batch_size)
            .map(|(_, id)| id)
            .collect()
    }

    /// Start a cycle if one is due.
    ///
    /// Stamps every selected id with the current time, prunes cursor entries
    /// for faces no longer tracked and marks the cycle in flight. Returns
    /// `None` when nothing is due or nothing is tracked; an empty tracked set
    /// does not use up the cadence slot.
    pub fn begin_cycle(&mut self, tracked: &[TrackedFace]) -> Option<Vec<TrackingId>> {
        if !self.is_due() {
            return None;
        }
        let batch = self.select(tracked);
        if batch.is_empty() {
            return None;
        }

        let now = self.clock.now_millis();
        let live: HashSet<TrackingId> = tracked.iter().map(|f| f.tracking_id).collect();
        self.cursor.retain_live(&live);
        for &id in &batch {
            self.cursor.record(id, now);
        }

        self.last_cycle_at = Some(now);
        self.in_flight = true;
        self.cycles += 1;

        tracing::debug!(cycle = self.cycles, batch = ?batch, now, "recognition cycle started");
        Some(batch)
    }

    /// Mark the outstanding batch as consumed.
    pub fn complete_cycle(&mut self) {
        self.in_flight = false;
    }

    /// Run one synchronous cycle if due.
    ///
    /// `extract` is called at most once, with the whole batch. Its output must
    /// be positionally aligned with the input; an output of the wrong length
    /// counts as a failure for every face in the batch. Returns the faces that
    /// produced an embedding.
    pub fn maybe_recognize<F>(&mut self, tracked: &[TrackedFace], extract: F) -> Vec<(TrackingId, Embedding)>
    where
        F: FnOnce(&[Detection]) -> Vec<Option<Embedding>>,
    {
        let Some(batch) = self.begin_cycle(tracked) else {
            return Vec::new();
        };
        let faces = batch_detections(tracked, &batch);
        let results = extract(&faces);
        self.complete_cycle();
        pair_results(&faces, results)
    }
}

/// Latest raw detections for the ids of a batch, in batch order.
pub fn batch_detections(tracked: &[TrackedFace], batch: &[TrackingId]) -> Vec<Detection> {
    batch
        .iter()
        .filter_map(|id| tracked.iter().find(|f| f.tracking_id == *id))
        .map(|f| f.detection.clone())
        .collect()
}

/// Pair extractor output with the faces it was computed for, skipping failures.
pub fn pair_results(faces: &[Detection], results: Vec<Option<Embedding>>) -> Vec<(TrackingId, Embedding)> {
    if results.len() != faces.len() {
        tracing::warn!(
            expected = faces.len(),
            got = results.len(),
            "extractor returned misaligned batch, discarding"
        );
        return Vec::new();
    }
    faces
        .iter()
        .zip(results)
        .filter_map(|(face, result)| match result {
            Some(embedding) => Some((face.tracking_id, embedding)),
            None => {
                tracing::debug!(tracking_id = face.tracking_id, "embedding extraction failed");
                None
            }
        })
        .collect()
}
