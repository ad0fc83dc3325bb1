use scope_proto::PipelineConfig;
use std::sync::Arc;
use tokio::sync::watch;

/// Whole-snapshot configuration handoff between the control task (writer)
/// and the pipeline (reader, once per frame).
///
/// Snapshots are immutable `Arc`s; a publish swaps the pointer, so a reader
/// sees either the old or the new snapshot, never a mix.
#[derive(Debug, Clone)]
pub struct LiveConfig {
    tx: Arc<watch::Sender<Arc<PipelineConfig>>>,
}

impl LiveConfig {
    pub fn new(initial: PipelineConfig) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx: Arc::new(tx) }
    }

    /// Replaces the snapshot. Takes effect from the next frame.
    pub fn publish(&self, cfg: PipelineConfig) {
        self.tx.send_replace(Arc::new(cfg));
    }

    pub fn current_snapshot(&self) -> Arc<PipelineConfig> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<PipelineConfig>> {
        self.tx.subscribe()
    }

    /// Publishes the current snapshot with its live fields taken from
    /// `edited`; models, source and tracking mode are kept. Returns what was
    /// published.
    pub fn apply_live(&self, edited: &PipelineConfig) -> Arc<PipelineConfig> {
        let mut applied = None;
        self.tx.send_modify(|cur| {
            let next = Arc::new(cur.with_live_fields_from(edited));
            applied = Some(next.clone());
            *cur = next;
        });
        applied.unwrap_or_else(|| self.current_snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scope_proto::{ModelConfig, TrackingMode};
    use std::thread;

    fn coherent(k: u32) -> PipelineConfig {
        PipelineConfig {
            detections_per_second: k,
            box_thickness: k,
            conf_threshold: k as f32 / 1000.0,
            override_text: format!("{}: w{}", k, k),
            ..Default::default()
        }
    }

    #[test]
    fn readers_never_see_partial_snapshots() {
        let live = LiveConfig::new(coherent(0));
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let live = live.clone();
                thread::spawn(move || {
                    for i in 0..500 {
                        live.publish(coherent(w * 1000 + i));
                    }
                })
            })
            .collect();
        let readers: Vec<_> = (0..4)
            .map(|_| {
                let live = live.clone();
                thread::spawn(move || {
                    for _ in 0..2000 {
                        let s = live.current_snapshot();
                        let k = s.detections_per_second;
                        assert_eq!(s.box_thickness, k);
                        assert_eq!(s.conf_threshold, k as f32 / 1000.0);
                        assert_eq!(s.override_text, format!("{}: w{}", k, k));
                    }
                })
            })
            .collect();
        for h in writers.into_iter().chain(readers) {
            h.join().unwrap();
        }
    }

    #[test]
    fn apply_live_keeps_session_fields() {
        let start = PipelineConfig {
            models: vec![ModelConfig { path: "a.json".into(), color: [1, 2, 3], conf: None }],
            video_path: "clip.mp4".into(),
            tracking_mode: TrackingMode::Track,
            ..Default::default()
        };
        let live = LiveConfig::new(start);
        let mut rx = live.subscribe();

        let edited = PipelineConfig {
            video_path: "other.mp4".into(),
            tracking_mode: TrackingMode::Predict,
            combine_bboxes: true,
            detections_per_second: 2,
            ..Default::default()
        };
        let applied = live.apply_live(&edited);

        assert!(rx.has_changed().unwrap());
        let seen = rx.borrow_and_update().clone();
        assert_eq!(seen, applied);
        assert_eq!(seen.video_path, "clip.mp4");
        assert_eq!(seen.tracking_mode, TrackingMode::Track);
        assert_eq!(seen.models.len(), 1);
        assert!(seen.combine_bboxes);
        assert_eq!(seen.detections_per_second, 2);
    }
}
