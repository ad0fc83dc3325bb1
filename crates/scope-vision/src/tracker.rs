//! Greedy IoU tracker used by detectors that have no identity of their own.

use crate::{iou, Bbox};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub max_age_frames: u32,
    pub iou_match_threshold: f32,
    pub max_tracks: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self { max_age_frames: 30, iou_match_threshold: 0.3, max_tracks: 256 }
    }
}

#[derive(Debug, Clone)]
struct Track {
    id: i64,
    class_id: i32,
    bbox: Bbox,
    // constant-velocity model, pixels per update
    vx: f32,
    vy: f32,
    miss: u32,
}

#[derive(Debug, Clone)]
pub struct IouTracker {
    cfg: TrackerConfig,
    next_id: i64,
    tracks: Vec<Track>,
}

impl IouTracker {
    pub fn new(cfg: TrackerConfig) -> Self {
        Self { cfg, next_id: 1, tracks: Vec::new() }
    }

    /// Associates `dets` (box, class) with live tracks and returns one id per
    /// detection; `None` once `max_tracks` is exhausted.
    pub fn update(&mut self, dets: &[(Bbox, i32)]) -> Vec<Option<i64>> {
        for t in &mut self.tracks {
            t.bbox = t.bbox.translate(t.vx, t.vy);
            t.miss += 1;
        }

        let mut ids = vec![None; dets.len()];
        let mut used_det = vec![false; dets.len()];
        for t in &mut self.tracks {
            let mut best_i = None;
            let mut best_iou = 0.0;
            for (i, (b, class_id)) in dets.iter().enumerate() {
                if used_det[i] || *class_id != t.class_id {
                    continue;
                }
                let v = iou(&t.bbox, b);
                if v > best_iou {
                    best_iou = v;
                    best_i = Some(i);
                }
            }
            let Some(i) = best_i else { continue };
            if best_iou < self.cfg.iou_match_threshold {
                continue;
            }
            let b = dets[i].0;
            used_det[i] = true;
            ids[i] = Some(t.id);

            let (ocx, ocy) = center(&t.bbox);
            let (ncx, ncy) = center(&b);
            t.vx = 0.7 * t.vx + 0.3 * (ncx - ocx);
            t.vy = 0.7 * t.vy + 0.3 * (ncy - ocy);
            t.bbox = b;
            t.miss = 0;
        }

        for (i, (b, class_id)) in dets.iter().enumerate() {
            if used_det[i] {
                continue;
            }
            if self.tracks.len() >= self.cfg.max_tracks {
                break;
            }
            self.tracks.push(Track { id: self.next_id, class_id: *class_id, bbox: *b, vx: 0.0, vy: 0.0, miss: 0 });
            ids[i] = Some(self.next_id);
            self.next_id += 1;
        }

        self.tracks.retain(|t| t.miss <= self.cfg.max_age_frames);
        ids
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }
}

fn center(b: &Bbox) -> (f32, f32) {
    ((b.x1 + b.x2) / 2.0, (b.y1 + b.y2) / 2.0)
}
