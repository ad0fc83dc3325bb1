//! Cross-model box fusion.
//!
//! Greedy and confidence-first: the highest remaining detection seeds a
//! cluster, and every later unassigned detection of the same class whose IoU
//! with the *seed* exceeds the threshold joins it. Membership is not
//! transitive: A-B and B-C overlapping while A-C do not leaves C out of A's
//! cluster.

use std::cmp::Ordering;

use scope_proto::MERGED_COLOR;

use crate::{iou, Detection};

pub fn fuse(mut detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return detections;
    }
    // stable, so equal confidences keep aggregation order
    detections.sort_by(|a, b| b.confidence.partial_cmp(&a.confidence).unwrap_or(Ordering::Equal));

    let n = detections.len();
    let mut assigned = vec![false; n];
    let mut out = Vec::new();

    for i in 0..n {
        if assigned[i] {
            continue;
        }
        assigned[i] = true;
        let seed = &detections[i];
        let mut members = vec![i];

        for j in (i + 1)..n {
            if assigned[j] {
                continue;
            }
            let cand = &detections[j];
            if cand.class_id == seed.class_id && iou(&seed.bbox, &cand.bbox) > iou_threshold {
                assigned[j] = true;
                members.push(j);
            }
        }

        if members.len() == 1 {
            let mut single = seed.clone();
            single.is_merged = false;
            out.push(single);
        } else {
            out.push(merge_cluster(&detections, &members));
        }
    }
    out
}

fn merge_cluster(detections: &[Detection], members: &[usize]) -> Detection {
    let seed = &detections[members[0]];
    let mut bbox = seed.bbox;
    let mut conf_sum = 0.0f32;
    for &m in members {
        bbox = bbox.union(&detections[m].bbox);
        conf_sum += detections[m].confidence;
    }

    Detection {
        bbox,
        confidence: conf_sum / members.len() as f32,
        class_id: seed.class_id,
        class_name: seed.class_name.clone(),
        color: MERGED_COLOR,
        track_id: None,
        is_merged: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Bbox;

    fn det(xyxy: [f32; 4], conf: f32, class_id: i32) -> Detection {
        Detection {
            bbox: Bbox::from_xyxy(xyxy),
            confidence: conf,
            class_id,
            class_name: format!("class{class_id}"),
            color: [0, 255, 0],
            track_id: Some(7),
            is_merged: false,
        }
    }

    #[test]
    fn empty_in_empty_out() {
        assert!(fuse(Vec::new(), 0.5).is_empty());
        assert!(fuse(Vec::new(), 0.0).is_empty());
    }

    #[test]
    fn overlapping_same_class_boxes_merge() {
        let out = fuse(vec![det([1.0, 1.0, 11.0, 11.0], 0.7, 2), det([0.0, 0.0, 10.0, 10.0], 0.9, 2)], 0.5);

        assert_eq!(out.len(), 1);
        let m = &out[0];
        assert_eq!(m.bbox, Bbox::new(0.0, 0.0, 11.0, 11.0));
        assert!((m.confidence - 0.8).abs() < 1e-6);
        assert!(m.is_merged);
        assert_eq!(m.color, MERGED_COLOR);
        assert_eq!(m.track_id, None);
        assert_eq!(m.class_id, 2);
        assert_eq!(m.class_name, "class2");
    }

    #[test]
    fn different_classes_never_merge() {
        let out = fuse(vec![det([0.0, 0.0, 10.0, 10.0], 0.9, 1), det([0.0, 0.0, 10.0, 10.0], 0.8, 2)], 0.5);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|d| !d.is_merged));
        assert_eq!(out[0].track_id, Some(7));
    }

    #[test]
    fn disjoint_detections_pass_through_in_confidence_order() {
        let a = det([0.0, 0.0, 10.0, 10.0], 0.4, 1);
        let b = det([50.0, 50.0, 60.0, 60.0], 0.6, 3);
        let out = fuse(vec![a.clone(), b.clone()], 0.5);
        assert_eq!(out, vec![b, a]);
    }

    #[test]
    fn threshold_is_strict() {
        let a = det([0.0, 0.0, 10.0, 10.0], 0.9, 1);
        let b = det([0.0, 0.0, 10.0, 10.0], 0.8, 1);
        let exact = iou(&a.bbox, &b.bbox);
        assert_eq!(fuse(vec![a.clone(), b.clone()], exact).len(), 2);
        assert_eq!(fuse(vec![a, b], exact - 1e-3).len(), 1);
    }

    #[test]
    fn clustering_compares_against_seed_only() {
        // A-B and B-C overlap heavily, A-C barely touch.
        let a = det([0.0, 0.0, 10.0, 10.0], 0.9, 1);
        let b = det([3.0, 0.0, 13.0, 10.0], 0.8, 1);
        let c = det([6.0, 0.0, 16.0, 10.0], 0.7, 1);
        assert!(iou(&a.bbox, &b.bbox) > 0.5);
        assert!(iou(&b.bbox, &c.bbox) > 0.5);
        assert!(iou(&a.bbox, &c.bbox) < 0.5);

        let out = fuse(vec![c, b, a], 0.5);
        assert_eq!(out.len(), 2);
        assert!(out[0].is_merged);
        assert_eq!(out[0].bbox, Bbox::new(0.0, 0.0, 13.0, 10.0));
        assert!(!out[1].is_merged);
        assert_eq!(out[1].bbox, Bbox::new(6.0, 0.0, 16.0, 10.0));
    }

    #[test]
    fn degenerate_boxes_do_not_panic() {
        let out = fuse(vec![det([5.0, 5.0, 5.0, 5.0], 0.5, 1), det([5.0, 5.0, 5.0, 5.0], 0.5, 1)], 0.1);
        assert_eq!(out.len(), 2);
    }
}
