//! ByteTrack multi-object tracking.
//!
//! Each frame, confirmed and lost tracks are predicted forward with a Kalman
//! filter and matched against confident detections by optimal assignment on
//! IoU. Tracks left over get a second chance against low-confidence
//! detections. Tentative tracks from the previous frame are confirmed by the
//! remaining confident detections, and whatever is still unmatched starts a
//! new tentative track.

mod kalman;
mod matching;

use crate::detector::{BoundingBox, Detection, Detector, DetectorError, Device};
use crate::frame::Frame;
use kalman::{KalmanFilter, Measurement, StateCovariance, StateMean};
use serde::Deserialize;

const LOW_CONFIDENCE_MATCH_THRESHOLD: f64 = 0.5;
const TENTATIVE_MATCH_THRESHOLD: f64 = 0.7;
const DUPLICATE_IOU: f32 = 0.85;

#[derive(Debug, Deserialize, Clone)]
pub struct TrackerSettings {
    /// Detections at or above this confidence take part in the first association.
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f32,
    /// Detections above this confidence take part in the second association.
    #[serde(default = "default_low_threshold")]
    pub low_threshold: f32,
    #[serde(default = "default_new_track_threshold")]
    pub new_track_threshold: f32,
    /// Largest fused IoU distance accepted in the first association.
    #[serde(default = "default_match_threshold")]
    pub match_threshold: f32,
    /// Frames a lost track is kept for before it is dropped.
    #[serde(default = "default_track_buffer")]
    pub track_buffer: u32,
    #[serde(default = "default_fuse_score")]
    pub fuse_score: bool,
}

fn default_high_threshold() -> f32 {
    0.25
}

fn default_low_threshold() -> f32 {
    0.1
}

fn default_new_track_threshold() -> f32 {
    0.25
}

fn default_match_threshold() -> f32 {
    0.8
}

fn default_track_buffer() -> u32 {
    30
}

fn default_fuse_score() -> bool {
    true
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            high_threshold: default_high_threshold(),
            low_threshold: default_low_threshold(),
            new_track_threshold: default_new_track_threshold(),
            match_threshold: default_match_threshold(),
            track_buffer: default_track_buffer(),
            fuse_score: default_fuse_score(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackState {
    Tracked,
    Lost,
}

#[derive(Debug, Clone)]
struct Track {
    id: u64,
    state: TrackState,
    /// Tentative tracks are not reported until a second frame confirms them.
    confirmed: bool,
    last_frame: u32,
    start_frame: u32,
    mean: StateMean,
    covariance: StateCovariance,
}

impl Track {
    fn start(id: u64, detection: &Detection, kalman: &KalmanFilter, frame: u32) -> Self {
        let (mean, covariance) = kalman.initiate(&to_xyah(&detection.bbox));
        Self {
            id,
            state: TrackState::Tracked,
            confirmed: frame == 1,
            last_frame: frame,
            start_frame: frame,
            mean,
            covariance,
        }
    }

    fn bbox(&self) -> BoundingBox {
        let (cx, cy, aspect, height) = (self.mean[0], self.mean[1], self.mean[2], self.mean[3]);
        let width = aspect * height;
        BoundingBox::from_center(cx as f32, cy as f32, width as f32, height as f32)
    }

    fn predict(&mut self, kalman: &KalmanFilter) {
        let mut mean = self.mean;
        if self.state != TrackState::Tracked {
            mean[7] = 0.0;
        }
        (self.mean, self.covariance) = kalman.predict(&mean, &self.covariance);
    }

    fn update(&mut self, detection: &Detection, kalman: &KalmanFilter, frame: u32) {
        (self.mean, self.covariance) =
            kalman.update(&self.mean, &self.covariance, &to_xyah(&detection.bbox));
        self.state = TrackState::Tracked;
        self.confirmed = true;
        self.last_frame = frame;
    }

    fn age(&self) -> u32 {
        self.last_frame - self.start_frame
    }
}

fn to_xyah(bbox: &BoundingBox) -> Measurement {
    let width = (bbox.x2 - bbox.x1) as f64;
    let height = ((bbox.y2 - bbox.y1) as f64).max(1e-6);
    Measurement::new(
        (bbox.x1 as f64 + bbox.x2 as f64) / 2.0,
        (bbox.y1 as f64 + bbox.y2 as f64) / 2.0,
        width / height,
        height,
    )
}

#[derive(Debug)]
pub struct ByteTracker {
    tracked: Vec<Track>,
    lost: Vec<Track>,
    frame: u32,
    next_id: u64,
    settings: TrackerSettings,
    kalman: KalmanFilter,
}

impl ByteTracker {
    pub fn new(settings: &TrackerSettings) -> Self {
        Self {
            tracked: Vec::new(),
            lost: Vec::new(),
            frame: 0,
            next_id: 1,
            settings: settings.clone(),
            kalman: KalmanFilter::new(),
        }
    }

    /// Confirmed and tentative tracks currently followed, lost ones excluded.
    pub fn active_tracks(&self) -> usize {
        self.tracked.len()
    }

    /// Number of track ids handed out so far.
    pub fn tracks_started(&self) -> u64 {
        self.next_id - 1
    }

    /// Sets `track_id` on every detection that belongs to a confirmed track
    /// after this frame, and clears it on the others.
    pub fn update(&mut self, detections: &mut [Detection]) {
        self.frame += 1;
        let frame = self.frame;

        let mut high = Vec::new();
        let mut low = Vec::new();
        for (index, detection) in detections.iter_mut().enumerate() {
            detection.track_id = None;
            if detection.confidence >= self.settings.high_threshold {
                high.push(index);
            } else if detection.confidence > self.settings.low_threshold {
                low.push(index);
            }
        }

        let (tentative, confirmed): (Vec<Track>, Vec<Track>) = std::mem::take(&mut self.tracked)
            .into_iter()
            .partition(|track| !track.confirmed);
        let mut pool = confirmed;
        pool.append(&mut self.lost);
        for track in pool.iter_mut() {
            track.predict(&self.kalman);
        }

        let mut assigned: Vec<(usize, u64)> = Vec::new();

        let first = self.associate(
            &pool,
            detections,
            &high,
            self.settings.fuse_score,
            self.settings.match_threshold as f64,
        );
        for &(t, d) in &first.matches {
            pool[t].update(&detections[high[d]], &self.kalman, frame);
            assigned.push((high[d], pool[t].id));
        }

        let retry: Vec<usize> = first
            .unmatched_tracks
            .iter()
            .copied()
            .filter(|&t| pool[t].state == TrackState::Tracked)
            .collect();
        let retry_tracks: Vec<Track> = retry.iter().map(|&t| pool[t].clone()).collect();
        let second = self.associate(
            &retry_tracks,
            detections,
            &low,
            false,
            LOW_CONFIDENCE_MATCH_THRESHOLD,
        );
        for &(r, d) in &second.matches {
            let track = &mut pool[retry[r]];
            track.update(&detections[low[d]], &self.kalman, frame);
            assigned.push((low[d], track.id));
        }
        for &r in &second.unmatched_tracks {
            pool[retry[r]].state = TrackState::Lost;
        }

        let leftover: Vec<usize> = first.unmatched_detections.iter().map(|&d| high[d]).collect();
        let third = self.associate(
            &tentative,
            detections,
            &leftover,
            self.settings.fuse_score,
            TENTATIVE_MATCH_THRESHOLD,
        );
        let mut tentative: Vec<Option<Track>> = tentative.into_iter().map(Some).collect();
        let mut kept_tentative = Vec::new();
        for &(t, d) in &third.matches {
            if let Some(mut track) = tentative[t].take() {
                track.update(&detections[leftover[d]], &self.kalman, frame);
                assigned.push((leftover[d], track.id));
                kept_tentative.push(track);
            }
        }

        let mut started = Vec::new();
        for &d in &third.unmatched_detections {
            let detection = &detections[leftover[d]];
            if detection.confidence < self.settings.new_track_threshold {
                continue;
            }
            let track = Track::start(self.next_id, detection, &self.kalman, frame);
            self.next_id += 1;
            assigned.push((leftover[d], track.id));
            started.push(track);
        }

        let track_buffer = self.settings.track_buffer;
        let (mut tracked, lost): (Vec<Track>, Vec<Track>) = pool
            .into_iter()
            .filter(|track| frame - track.last_frame <= track_buffer)
            .partition(|track| track.state == TrackState::Tracked);
        tracked.extend(kept_tentative);
        tracked.extend(started);

        (self.tracked, self.lost) = remove_duplicates(tracked, lost);

        for (index, id) in assigned {
            if self
                .tracked
                .iter()
                .any(|track| track.id == id && track.confirmed)
            {
                detections[index].track_id = Some(id);
            }
        }
    }

    fn associate(
        &self,
        tracks: &[Track],
        detections: &[Detection],
        indices: &[usize],
        fuse_score: bool,
        threshold: f64,
    ) -> matching::Assignment {
        let track_boxes: Vec<BoundingBox> = tracks.iter().map(Track::bbox).collect();
        let detection_boxes: Vec<BoundingBox> =
            indices.iter().map(|&i| detections[i].bbox).collect();
        let mut cost = matching::iou_distance(&track_boxes, &detection_boxes);
        if fuse_score {
            let scores: Vec<f32> = indices.iter().map(|&i| detections[i].confidence).collect();
            matching::fuse_score(&mut cost, &scores);
        }
        matching::linear_assignment(&cost, threshold)
    }
}

/// Drops the younger of every tracked/lost pair that overlap almost entirely.
fn remove_duplicates(tracked: Vec<Track>, lost: Vec<Track>) -> (Vec<Track>, Vec<Track>) {
    let mut drop_tracked = vec![false; tracked.len()];
    let mut drop_lost = vec![false; lost.len()];
    for (i, a) in tracked.iter().enumerate() {
        for (j, b) in lost.iter().enumerate() {
            if a.bbox().iou(&b.bbox()) > DUPLICATE_IOU {
                if a.age() > b.age() {
                    drop_lost[j] = true;
                } else {
                    drop_tracked[i] = true;
                }
            }
        }
    }

    let keep = |tracks: Vec<Track>, dropped: Vec<bool>| -> Vec<Track> {
        tracks
            .into_iter()
            .zip(dropped)
            .filter_map(|(track, dropped)| (!dropped).then_some(track))
            .collect()
    };
    (keep(tracked, drop_tracked), keep(lost, drop_lost))
}

/// Runs a [`ByteTracker`] over the output of another detector.
///
/// The tracker belongs to the wrapper, so the inner detector's reclamation
/// hook never touches track state.
pub struct TrackingDetector<D> {
    inner: D,
    tracker: Option<ByteTracker>,
}

impl<D: Detector> TrackingDetector<D> {
    /// With `tracker` set to `None`, detections pass through untouched.
    pub fn new(inner: D, tracker: Option<ByteTracker>) -> Self {
        Self { inner, tracker }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    pub fn tracker(&self) -> Option<&ByteTracker> {
        self.tracker.as_ref()
    }
}

impl<D: Detector> Detector for TrackingDetector<D> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>, DetectorError> {
        let mut detections = self.inner.detect(frame)?;
        if let Some(tracker) = self.tracker.as_mut() {
            tracker.update(&mut detections);
        }
        Ok(detections)
    }

    fn reclaim(&mut self) {
        self.inner.reclaim();
    }

    fn device(&self) -> Device {
        self.inner.device()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedDetector;

    fn person(x: f32, confidence: f32) -> Detection {
        Detection::new(BoundingBox::new(x, 100., x + 100., 200.), 0, confidence)
    }

    fn ids(detections: &[Detection]) -> Vec<Option<u64>> {
        detections.iter().map(|d| d.track_id).collect()
    }

    #[test]
    fn test_identity_persists_while_object_moves() {
        let mut tracker = ByteTracker::new(&TrackerSettings::default());

        for step in 0..10 {
            let mut frame = vec![person(100. + 8. * step as f32, 0.9)];
            tracker.update(&mut frame);
            assert_eq!(ids(&frame), vec![Some(1)], "frame {step}");
        }
        assert_eq!(tracker.tracks_started(), 1);
    }

    #[test]
    fn test_new_object_is_confirmed_on_second_frame() {
        let mut tracker = ByteTracker::new(&TrackerSettings::default());

        let mut frame1 = vec![person(0., 0.9)];
        tracker.update(&mut frame1);

        let mut frame2 = vec![person(5., 0.9), person(400., 0.8)];
        tracker.update(&mut frame2);
        assert_eq!(ids(&frame2), vec![Some(1), None]);

        let mut frame3 = vec![person(10., 0.9), person(402., 0.8)];
        tracker.update(&mut frame3);
        assert_eq!(ids(&frame3), vec![Some(1), Some(2)]);
        assert_eq!(tracker.active_tracks(), 2);
    }

    #[test]
    fn test_low_confidence_detection_keeps_track_alive() {
        let mut tracker = ByteTracker::new(&TrackerSettings::default());

        let mut confident = vec![person(0., 0.9)];
        tracker.update(&mut confident);

        let mut occluded = vec![person(3., 0.15)];
        tracker.update(&mut occluded);
        assert_eq!(ids(&occluded), vec![Some(1)]);

        let mut noise = vec![person(300., 0.05)];
        tracker.update(&mut noise);
        assert_eq!(ids(&noise), vec![None]);
        assert_eq!(tracker.tracks_started(), 1);
    }

    #[test]
    fn test_low_confidence_detection_never_starts_a_track() {
        let mut tracker = ByteTracker::new(&TrackerSettings::default());
        let mut frame = vec![person(0., 0.2)];
        tracker.update(&mut frame);

        assert_eq!(ids(&frame), vec![None]);
        assert_eq!(tracker.tracks_started(), 0);
    }

    #[test]
    fn test_lost_track_is_recovered_within_buffer() {
        let settings = TrackerSettings {
            track_buffer: 2,
            ..TrackerSettings::default()
        };
        let mut tracker = ByteTracker::new(&settings);

        let mut first = vec![person(0., 0.9)];
        tracker.update(&mut first);
        tracker.update(&mut []);
        tracker.update(&mut []);
        assert_eq!(tracker.active_tracks(), 0);

        let mut back = vec![person(2., 0.9)];
        tracker.update(&mut back);
        assert_eq!(ids(&back), vec![Some(1)]);
    }

    #[test]
    fn test_lost_track_expires() {
        let settings = TrackerSettings {
            track_buffer: 1,
            ..TrackerSettings::default()
        };
        let mut tracker = ByteTracker::new(&settings);

        let mut first = vec![person(0., 0.9)];
        tracker.update(&mut first);
        tracker.update(&mut []);
        tracker.update(&mut []);

        let mut back = vec![person(0., 0.9)];
        tracker.update(&mut back);
        assert_eq!(ids(&back), vec![None]);

        tracker.update(&mut back);
        assert_eq!(ids(&back), vec![Some(2)]);
    }

    #[test]
    fn test_reclaim_leaves_tracks_alone() {
        let tracker = ByteTracker::new(&TrackerSettings::default());
        let mut detector =
            TrackingDetector::new(ScriptedDetector::moving_object(), Some(tracker));
        let frame = Frame::filled(8, 6, [0, 0, 0]);

        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.extend(ids(&detector.detect(&frame).unwrap()));
            detector.reclaim();
        }

        assert_eq!(seen, vec![Some(1); 3]);
        assert_eq!(detector.inner().reclaims(), 3);
        assert_eq!(detector.tracker().map(ByteTracker::active_tracks), Some(1));
    }

    #[test]
    fn test_without_tracker_detections_pass_through() {
        let mut detector = TrackingDetector::new(ScriptedDetector::moving_object(), None);
        let detections = detector.detect(&Frame::filled(8, 6, [0, 0, 0])).unwrap();

        assert_eq!(ids(&detections), vec![None]);
        assert!(detector.tracker().is_none());
    }
}
