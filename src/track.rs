// This file is part of Moonfire NVR, a security camera network video recorder.
// Copyright (C) 2024 The Moonfire NVR Authors; see AUTHORS and LICENSE.txt.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! `Tracker`: associates detections across frames,
//! emitting stable integer track IDs.
//!
//! Unlike the detector/video backends, tracking is ordinary deterministic
//! code, so this module provides one
//! complete reference implementation, [`IouTracker`], rather than a
//! capability abstraction over an injected backend.

use crate::detect::BBox;

/// One tracked object, as returned by [`Tracker::update`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Track {
    pub bbox: BBox,
    pub track_id: i64,
}

/// The `Tracker` contract.
///
/// The tracker is stateful and single-threaded; it must be called from
/// exactly one thread per engine, modeled here by `update` taking
/// `&mut self`, which the borrow checker enforces can only be called from
/// one place at a time.
pub trait Tracker: Send {
    /// `detections` are `(bbox, confidence)` pairs. Only tracks that have
    /// accumulated `min_hits` consecutive associated detections (or are
    /// still within their first `min_hits` frames of life) are returned.
    fn update(&mut self, detections: &[(BBox, f32)]) -> Vec<Track>;
}

struct TrackState {
    id: i64,
    bbox: BBox,
    hits: u32,
    age_since_hit: u32,
}

/// Greedy IOU-based multi-object tracker: associates each detection with
/// the existing track of highest IOU above `iou_threshold`, ages out
/// tracks untouched for `max_age` frames, and only reports tracks with at
/// least `min_hits` accumulated detections. Track IDs are assigned in
/// increasing order and never reused: a track ID never leaves a caller's
/// seen-set except through an explicit reset, which this tracker upholds
/// by simply never recycling a retired ID onto a new object.
pub struct IouTracker {
    max_age: u32,
    min_hits: u32,
    iou_threshold: f32,
    tracks: Vec<TrackState>,
    next_id: i64,
}

impl IouTracker {
    pub fn new(max_age: u32, min_hits: u32, iou_threshold: f32) -> Self {
        IouTracker {
            max_age,
            min_hits,
            iou_threshold,
            tracks: Vec::new(),
            next_id: 1,
        }
    }
}

impl Tracker for IouTracker {
    fn update(&mut self, detections: &[(BBox, f32)]) -> Vec<Track> {
        let mut unmatched_tracks: Vec<usize> = (0..self.tracks.len()).collect();
        let mut unmatched_dets: Vec<usize> = (0..detections.len()).collect();
        let mut matches: Vec<(usize, usize)> = Vec::new(); // (track idx, det idx)

        // Greedily pair the highest-IOU (track, detection) combination
        // above threshold, repeatedly, until no pair qualifies. Greedy
        // rather than optimal (Hungarian) assignment: deterministic, cheap,
        // and sufficient for the property tests below.
        loop {
            let mut best: Option<(usize, usize, f32)> = None;
            for &ti in &unmatched_tracks {
                for &di in &unmatched_dets {
                    let iou = self.tracks[ti].bbox.iou(&detections[di].0);
                    if iou >= self.iou_threshold {
                        if best.map(|(_, _, b)| iou > b).unwrap_or(true) {
                            best = Some((ti, di, iou));
                        }
                    }
                }
            }
            match best {
                Some((ti, di, _)) => {
                    matches.push((ti, di));
                    unmatched_tracks.retain(|&x| x != ti);
                    unmatched_dets.retain(|&x| x != di);
                }
                None => break,
            }
        }

        for (ti, di) in &matches {
            let t = &mut self.tracks[*ti];
            t.bbox = detections[*di].0;
            t.hits += 1;
            t.age_since_hit = 0;
        }
        for &ti in &unmatched_tracks {
            self.tracks[ti].age_since_hit += 1;
        }
        for &di in &unmatched_dets {
            self.tracks.push(TrackState {
                id: self.next_id,
                bbox: detections[di].0,
                hits: 1,
                age_since_hit: 0,
            });
            self.next_id += 1;
        }

        self.tracks.retain(|t| t.age_since_hit <= self.max_age);

        // Only report tracks "confirmed" by `min_hits` accumulated
        // detections, the standard SORT-style confirmation gate. The
        // end-to-end engine tests drive the engine with a scripted mock
        // `Tracker`, not `IouTracker`, precisely to sidestep this gate and
        // assert on track-ID-to-count wiring instead.
        self.tracks
            .iter()
            .filter(|t| t.hits >= self.min_hits)
            .map(|t| Track {
                bbox: t.bbox,
                track_id: t.id,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(x1: f32, y1: f32, x2: f32, y2: f32) -> BBox {
        BBox { x1, y1, x2, y2 }
    }

    #[test]
    fn same_object_keeps_same_id_across_frames() {
        let mut tracker = IouTracker::new(30, 1, 0.3);
        let t1 = tracker.update(&[(b(0.0, 0.0, 10.0, 10.0), 0.9)]);
        assert_eq!(t1.len(), 1);
        let id = t1[0].track_id;
        let t2 = tracker.update(&[(b(1.0, 1.0, 11.0, 11.0), 0.9)]);
        assert_eq!(t2.len(), 1);
        assert_eq!(t2[0].track_id, id);
    }

    #[test]
    fn ids_are_never_reused_after_retirement() {
        let mut tracker = IouTracker::new(1, 1, 0.3);
        let t1 = tracker.update(&[(b(0.0, 0.0, 10.0, 10.0), 0.9)]);
        let first_id = t1[0].track_id;
        // Object vanishes for longer than max_age: track is retired.
        tracker.update(&[]);
        tracker.update(&[]);
        // A new object appears in roughly the same place; IOU machinery
        // would happily re-match it to a live track, but the old one is
        // gone, so this must get a fresh id.
        let t3 = tracker.update(&[(b(0.0, 0.0, 10.0, 10.0), 0.9)]);
        assert_ne!(t3[0].track_id, first_id);
    }

    #[test]
    fn two_disjoint_objects_get_distinct_ids() {
        let mut tracker = IouTracker::new(30, 1, 0.3);
        let dets = [(b(0.0, 0.0, 10.0, 10.0), 0.9), (b(100.0, 100.0, 110.0, 110.0), 0.9)];
        let tracks = tracker.update(&dets);
        assert_eq!(tracks.len(), 2);
        assert_ne!(tracks[0].track_id, tracks[1].track_id);
    }

    #[test]
    fn track_survives_brief_occlusion_within_max_age() {
        let mut tracker = IouTracker::new(3, 1, 0.3);
        let t1 = tracker.update(&[(b(0.0, 0.0, 10.0, 10.0), 0.9)]);
        let id = t1[0].track_id;
        // Two frames with no detections (< max_age).
        tracker.update(&[]);
        tracker.update(&[]);
        let t2 = tracker.update(&[(b(0.0, 0.0, 10.0, 10.0), 0.9)]);
        assert_eq!(t2[0].track_id, id);
    }
}
