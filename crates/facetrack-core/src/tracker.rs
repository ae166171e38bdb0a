//! Cross-frame face tracking keyed by detector tracking id.
//!
//! Each tracked face carries its current display geometry and a target.
//! [`reconcile`] retargets faces from a frame's detections; [`FaceTracker::tick`]
//! advances every face one interpolation step toward its target. Keeping the
//! two apart lets the caller drive smoothing at display cadence and test it
//! step by step.

use crate::geometry::{CoordinateMapper, Point, Size};
use crate::types::{Detection, TrackingId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Below this distance an interpolated value snaps onto its target.
const SNAP_EPSILON: f32 = 1e-3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentityState {
    Unconfirmed,
    /// Terminal.
    Confirmed,
}

/// Tracking and smoothing parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackingPolicy {
    /// Fraction of the remaining distance covered per tick, in (0, 1].
    pub smoothing: f32,
    /// Fraction of the remaining confirmation progress covered per tick, in (0, 1].
    pub confirm_rate: f32,
    /// Consecutive frames a face may be missing before it is dropped.
    /// Zero drops it on the first frame it is absent.
    pub grace_frames: u32,
}

impl Default for TrackingPolicy {
    fn default() -> Self {
        Self {
            smoothing: 0.35,
            confirm_rate: 0.2,
            grace_frames: 0,
        }
    }
}

impl TrackingPolicy {
    fn clamped(self) -> Self {
        Self {
            smoothing: clamp_rate(self.smoothing),
            confirm_rate: clamp_rate(self.confirm_rate),
            grace_frames: self.grace_frames,
        }
    }
}

fn clamp_rate(rate: f32) -> f32 {
    if rate.is_finite() && rate > 0.0 {
        rate.min(1.0)
    } else {
        1.0
    }
}

/// Per-face state carried across frames.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackedFace {
    pub tracking_id: TrackingId,
    /// Smoothed display-space origin.
    pub position: Point,
    /// Smoothed display-space size.
    pub size: Size,
    pub target_position: Point,
    pub target_size: Size,
    pub identity: IdentityState,
    /// Confirmation animation progress in [0, 1].
    pub animation_progress: f32,
    /// Latest raw detection (sensor space), handed to the extractor.
    pub detection: Detection,
    pub missed_frames: u32,
}

impl TrackedFace {
    fn new(detection: &Detection, mapper: &CoordinateMapper) -> Self {
        let (position, size) = mapper.adjust_bounds(&detection.bounds);
        Self {
            tracking_id: detection.tracking_id,
            position,
            size,
            target_position: position,
            target_size: size,
            identity: IdentityState::Unconfirmed,
            animation_progress: 0.0,
            detection: detection.clone(),
            missed_frames: 0,
        }
    }

    fn retarget(&mut self, detection: &Detection, mapper: &CoordinateMapper) {
        let (position, size) = mapper.adjust_bounds(&detection.bounds);
        self.target_position = position;
        self.target_size = size;
        self.detection = detection.clone();
        self.missed_frames = 0;
    }

    fn step(&mut self, policy: &TrackingPolicy) {
        self.position.x = approach(self.position.x, self.target_position.x, policy.smoothing);
        self.position.y = approach(self.position.y, self.target_position.y, policy.smoothing);
        self.size.width = approach(self.size.width, self.target_size.width, policy.smoothing);
        self.size.height = approach(self.size.height, self.target_size.height, policy.smoothing);
        if self.identity == IdentityState::Confirmed {
            self.animation_progress = approach(self.animation_progress, 1.0, policy.confirm_rate);
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.identity == IdentityState::Confirmed
    }
}

/// One exponential-approach step. Never overshoots `target`.
pub fn approach(current: f32, target: f32, rate: f32) -> f32 {
    let next = current + (target - current) * rate;
    if (target - next).abs() < SNAP_EPSILON {
        target
    } else {
        next
    }
}

/// Reconcile the previous tracked set against one frame's detections.
///
/// Surviving faces keep their previous order, identity and current geometry
/// (only the target moves); new ids start at their mapped geometry with no
/// interpolation. Faces whose id is absent are dropped once they have been
/// missing for more than `policy.grace_frames` frames. When a frame reports
/// the same id twice, the first detection wins.
pub fn reconcile(
    previous: &[TrackedFace],
    detections: &[Detection],
    mapper: &CoordinateMapper,
    policy: &TrackingPolicy,
) -> Vec<TrackedFace> {
    let mut current: HashMap<TrackingId, &Detection> = HashMap::with_capacity(detections.len());
    for det in detections {
        if current.contains_key(&det.tracking_id) {
            tracing::debug!(tracking_id = det.tracking_id, "duplicate tracking id in frame, ignoring");
            continue;
        }
        current.insert(det.tracking_id, det);
    }

    let mut next = Vec::with_capacity(detections.len().max(previous.len()));
    let mut seen: HashSet<TrackingId> = HashSet::with_capacity(previous.len());

    for face in previous {
        if !seen.insert(face.tracking_id) {
            continue;
        }
        match current.get(&face.tracking_id) {
            Some(det) => {
                let mut face = face.clone();
                face.retarget(det, mapper);
                next.push(face);
            }
            None if face.missed_frames < policy.grace_frames => {
                let mut face = face.clone();
                face.missed_frames += 1;
                next.push(face);
            }
            None => {
                tracing::debug!(tracking_id = face.tracking_id, "face lost");
            }
        }
    }

    for det in detections {
        if seen.insert(det.tracking_id) {
            tracing::debug!(tracking_id = det.tracking_id, "new face");
            next.push(TrackedFace::new(det, mapper));
        }
    }

    next
}

/// Owner of the tracked-face set. The only writer of [`TrackedFace`] state.
#[derive(Debug, Clone, Default)]
pub struct FaceTracker {
    faces: Vec<TrackedFace>,
    policy: TrackingPolicy,
}

impl FaceTracker {
    pub fn new(policy: TrackingPolicy) -> Self {
        Self {
            faces: Vec::new(),
            policy: policy.clamped(),
        }
    }

    pub fn policy(&self) -> &TrackingPolicy {
        &self.policy
    }

    /// Replace the tracked set with the reconciliation of this frame's detections.
    pub fn update(&mut self, detections: &[Detection], mapper: &CoordinateMapper) {
        self.faces = reconcile(&self.faces, detections, mapper, &self.policy);
    }

    /// Advance every face one interpolation step.
    pub fn tick(&mut self) {
        let policy = self.policy;
        for face in &mut self.faces {
            face.step(&policy);
        }
    }

    /// Mark a face Confirmed.
    ///
    /// Returns true only on the first transition. Unknown ids (faces evicted
    /// while their recognition was in flight) are ignored.
    pub fn confirm(&mut self, tracking_id: TrackingId) -> bool {
        match self.faces.iter_mut().find(|f| f.tracking_id == tracking_id) {
            Some(face) if face.identity == IdentityState::Unconfirmed => {
                face.identity = IdentityState::Confirmed;
                true
            }
            Some(_) => false,
            None => {
                tracing::debug!(tracking_id, "confirmation for untracked face discarded");
                false
            }
        }
    }

    pub fn faces(&self) -> &[TrackedFace] {
        &self.faces
    }

    pub fn get(&self, tracking_id: TrackingId) -> Option<&TrackedFace> {
        self.faces.iter().find(|f| f.tracking_id == tracking_id)
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Dimensions;
    use crate::types::Bounds;

    fn identity_mapper() -> CoordinateMapper {
        CoordinateMapper::new(Dimensions::new(1000.0, 1000.0), Dimensions::new(1000.0, 1000.0)).unwrap()
    }

    fn det(id: TrackingId, left: f32, top: f32) -> Detection {
        Detection {
            tracking_id: id,
            bounds: Bounds { top, left, width: 100.0, height: 120.0 },
            roll_angle: 0.0,
            pitch_angle: 0.0,
            yaw_angle: 0.0,
        }
    }

    fn ids(faces: &[TrackedFace]) -> Vec<TrackingId> {
        faces.iter().map(|f| f.tracking_id).collect()
    }

    #[test]
    fn test_new_face_starts_at_target() {
        let mapper = identity_mapper();
        let faces = reconcile(&[], &[det(1, 10.0, 20.0)], &mapper, &TrackingPolicy::default());
        assert_eq!(faces.len(), 1);
        let f = &faces[0];
        assert_eq!(f.position, Point::new(10.0, 20.0));
        assert_eq!(f.position, f.target_position);
        assert_eq!(f.size, Size::new(100.0, 120.0));
        assert_eq!(f.identity, IdentityState::Unconfirmed);
        assert_eq!(f.animation_progress, 0.0);
    }

    #[test]
    fn test_existing_face_moves_only_target() {
        let mapper = identity_mapper();
        let policy = TrackingPolicy::default();
        let first = reconcile(&[], &[det(1, 10.0, 20.0)], &mapper, &policy);
        let second = reconcile(&first, &[det(1, 110.0, 20.0)], &mapper, &policy);
        assert_eq!(second[0].position, Point::new(10.0, 20.0));
        assert_eq!(second[0].target_position, Point::new(110.0, 20.0));
    }

    #[test]
    fn test_empty_detections_empty_set() {
        let mapper = identity_mapper();
        let policy = TrackingPolicy::default();
        let first = reconcile(&[], &[det(1, 0.0, 0.0), det(2, 0.0, 0.0)], &mapper, &policy);
        assert!(reconcile(&first, &[], &mapper, &policy).is_empty());
    }

    #[test]
    fn test_absent_id_dropped_next_frame() {
        let mapper = identity_mapper();
        let mut tracker = FaceTracker::new(TrackingPolicy::default());
        tracker.update(&[det(1, 0.0, 0.0), det(2, 50.0, 50.0)], &mapper);
        tracker.update(&[det(2, 55.0, 50.0)], &mapper);
        assert_eq!(ids(tracker.faces()), vec![2]);
        assert!(tracker.get(1).is_none());
    }

    #[test]
    fn test_one_face_per_id_and_stable_order() {
        let mapper = identity_mapper();
        let policy = TrackingPolicy::default();
        let first = reconcile(&[], &[det(9, 0.0, 0.0), det(3, 0.0, 0.0)], &mapper, &policy);
        // Detector reorders and adds a new id plus a duplicate.
        let second = reconcile(
            &first,
            &[det(4, 0.0, 0.0), det(3, 1.0, 1.0), det(9, 2.0, 2.0), det(3, 500.0, 500.0)],
            &mapper,
            &policy,
        );
        assert_eq!(ids(&second), vec![9, 3, 4]);
        // First detection of a duplicated id wins.
        assert_eq!(second[1].target_position, Point::new(1.0, 1.0));
    }

    #[test]
    fn test_tick_converges_without_overshoot() {
        let mapper = identity_mapper();
        let mut tracker = FaceTracker::new(TrackingPolicy::default());
        tracker.update(&[det(1, 0.0, 0.0)], &mapper);
        let target = det(1, 300.0, 200.0);

        let mut prev_x = 0.0f32;
        for _ in 0..200 {
            tracker.update(std::slice::from_ref(&target), &mapper);
            tracker.tick();
            let x = tracker.faces()[0].position.x;
            assert!(x >= prev_x, "position moved backwards: {prev_x} -> {x}");
            assert!(x <= 300.0, "overshoot: {x}");
            prev_x = x;
        }
        let face = &tracker.faces()[0];
        assert_eq!(face.position, Point::new(300.0, 200.0));
        assert_eq!(face.size, Size::new(100.0, 120.0));
    }

    #[test]
    fn test_static_detection_is_fixed_point() {
        let mapper = identity_mapper();
        let mut tracker = FaceTracker::new(TrackingPolicy::default());
        let d = det(5, 42.0, 24.0);
        for _ in 0..10 {
            tracker.update(std::slice::from_ref(&d), &mapper);
            tracker.tick();
            assert_eq!(tracker.faces()[0].position, Point::new(42.0, 24.0));
        }
    }

    #[test]
    fn test_confirm_is_one_way_and_reported_once() {
        let mapper = identity_mapper();
        let mut tracker = FaceTracker::new(TrackingPolicy::default());
        tracker.update(&[det(1, 0.0, 0.0)], &mapper);
        assert!(tracker.confirm(1));
        assert!(!tracker.confirm(1));
        tracker.update(&[det(1, 10.0, 0.0)], &mapper);
        assert_eq!(tracker.get(1).unwrap().identity, IdentityState::Confirmed);
    }

    #[test]
    fn test_confirm_unknown_id_is_noop() {
        let mut tracker = FaceTracker::new(TrackingPolicy::default());
        assert!(!tracker.confirm(42));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_confirmed_progress_rises_to_one() {
        let mapper = identity_mapper();
        let mut tracker = FaceTracker::new(TrackingPolicy::default());
        tracker.update(&[det(1, 0.0, 0.0)], &mapper);
        tracker.tick();
        assert_eq!(tracker.faces()[0].animation_progress, 0.0);

        tracker.confirm(1);
        let mut prev = 0.0;
        for _ in 0..100 {
            tracker.tick();
            let p = tracker.faces()[0].animation_progress;
            assert!(p >= prev && p <= 1.0);
            prev = p;
        }
        assert_eq!(prev, 1.0);
    }

    #[test]
    fn test_grace_period_keeps_face_frozen() {
        let mapper = identity_mapper();
        let policy = TrackingPolicy { grace_frames: 2, ..TrackingPolicy::default() };
        let mut tracker = FaceTracker::new(policy);
        tracker.update(&[det(1, 10.0, 10.0)], &mapper);
        tracker.update(&[], &mapper);
        tracker.update(&[], &mapper);
        let face = tracker.get(1).unwrap();
        assert_eq!(face.missed_frames, 2);
        assert_eq!(face.target_position, Point::new(10.0, 10.0));

        tracker.update(&[], &mapper);
        assert!(tracker.get(1).is_none());
    }

    #[test]
    fn test_grace_period_resets_on_reappearance() {
        let mapper = identity_mapper();
        let policy = TrackingPolicy { grace_frames: 1, ..TrackingPolicy::default() };
        let mut tracker = FaceTracker::new(policy);
        tracker.update(&[det(1, 10.0, 10.0)], &mapper);
        tracker.confirm(1);
        tracker.update(&[], &mapper);
        tracker.update(&[det(1, 20.0, 10.0)], &mapper);
        let face = tracker.get(1).unwrap();
        assert_eq!(face.missed_frames, 0);
        assert!(face.is_confirmed());
    }

    #[test]
    fn test_policy_rates_clamped() {
        let tracker = FaceTracker::new(TrackingPolicy {
            smoothing: 0.0,
            confirm_rate: 7.0,
            grace_frames: 0,
        });
        assert_eq!(tracker.policy().smoothing, 1.0);
        assert_eq!(tracker.policy().confirm_rate, 1.0);
    }

    #[test]
    fn test_approach_snaps() {
        assert_eq!(approach(0.9995, 1.0, 0.5), 1.0);
        assert!((approach(0.0, 10.0, 0.5) - 5.0).abs() < 1e-6);
        assert!((approach(10.0, 0.0, 0.5) - 5.0).abs() < 1e-6);
    }
}
