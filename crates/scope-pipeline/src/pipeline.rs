use image::RgbImage;
use scope_proto::PipelineConfig;
use scope_vision::aggregate::Aggregator;
use scope_vision::cadence::{CadenceCtl, FrameAction};
use scope_vision::crop::prepare_input;
use scope_vision::detector::ModelLoader;
use scope_vision::fusion::fuse;
use scope_vision::overrides::{OverrideKind, OverrideMaps};
use scope_vision::render::{LabelFont, Renderer};
use scope_vision::{error_chain, Detection};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::live::LiveConfig;
use crate::sink::{FrameSink, SinkControl};
use crate::source::FrameSource;
use crate::status::{PipelineReport, PipelineStatus, StopReason, StopSignal};

/// One playback session: loaded models plus the source and sink they run
/// between. Models, source and tracking mode are fixed for the session.
pub struct Pipeline {
    live: LiveConfig,
    aggregator: Aggregator,
    source: Box<dyn FrameSource>,
    sink: Box<dyn FrameSink>,
}

impl Pipeline {
    /// Loads every configured model. Nothing is read from the source yet.
    pub fn new(
        cfg: PipelineConfig,
        loader: &dyn ModelLoader,
        source: Box<dyn FrameSource>,
        sink: Box<dyn FrameSink>,
    ) -> Result<Self, PipelineError> {
        if cfg.models.is_empty() {
            return Err(PipelineError::NoModels);
        }
        let aggregator = Aggregator::load(loader, &cfg.models, cfg.tracking_mode)?;
        info!(
            "pipeline: {} models loaded, mode={:?}, source fps={:.2}",
            aggregator.len(),
            cfg.tracking_mode,
            source.nominal_fps()
        );
        Ok(Self { live: LiveConfig::new(cfg), aggregator, source, sink })
    }

    pub fn live(&self) -> &LiveConfig {
        &self.live
    }

    /// Runs the frame loop on the blocking pool.
    pub fn spawn(self) -> PipelineHandle {
        self.spawn_with_stop(StopSignal::new())
    }

    /// Like [`Pipeline::spawn`], observing an existing stop signal.
    pub fn spawn_with_stop(self, stop: StopSignal) -> PipelineHandle {
        let (status_tx, status_rx) = watch::channel(PipelineStatus::Starting);
        let live = self.live.clone();
        let task_stop = stop.clone();
        let task = tokio::task::spawn_blocking(move || self.run(&task_stop, &status_tx));
        PipelineHandle { stop, status: status_rx, live, task }
    }

    /// Blocking frame loop. Source and sink are released before the final
    /// status is published.
    pub fn run(mut self, stop: &StopSignal, status: &watch::Sender<PipelineStatus>) -> Result<PipelineReport, PipelineError> {
        info!("pipeline: starting");
        let result = self.frame_loop(stop, status);
        drop(self);

        match &result {
            Ok(report) => {
                info!(
                    "pipeline: stopped ({:?}) after {} frames, {} detection frames",
                    report.reason, report.frames, report.detection_frames
                );
                status.send_replace(PipelineStatus::Stopped(report.reason));
            }
            Err(e) => {
                error!("pipeline: failed: {}", error_chain(e));
                status.send_replace(PipelineStatus::Failed(error_chain(e)));
            }
        }
        result
    }

    fn frame_loop(&mut self, stop: &StopSignal, status: &watch::Sender<PipelineStatus>) -> Result<PipelineReport, PipelineError> {
        let mut cadence = CadenceCtl::new(self.source.nominal_fps());
        let mut renderers = RendererCache::default();
        let mut warned = HashSet::new();
        let mut fps = FpsCounter::new(Instant::now());
        let mut retained: Vec<Detection> = Vec::new();
        let mut detection_frames = 0u64;

        let reason = loop {
            if stop.is_raised() {
                break StopReason::Requested;
            }
            let Some(mut frame) = self.source.next_frame().map_err(PipelineError::Source)? else {
                break StopReason::EndOfStream;
            };
            let cfg = self.live.current_snapshot();
            let action = cadence.tick(cfg.detections_per_second, self.aggregator.mode());
            let frame_index = cadence.frame_index();

            let (input, crop) = prepare_input(&frame, &cfg);
            match action {
                FrameAction::Detect => {
                    let raw = self.aggregator.aggregate(&input, &cfg, frame_index);
                    let n = raw.len();
                    retained = if cfg.combine_bboxes { fuse(raw, cfg.combine_iou_threshold) } else { raw };
                    detection_frames += 1;
                    debug!("pipeline: frame={} raw={} drawn={}", frame_index, n, retained.len());
                }
                FrameAction::ClearStale => retained.clear(),
            }
            drop(input);

            let maps = override_maps(&cfg, &mut warned);
            let renderer = renderers.get(cfg.font_path.as_deref());
            if let (true, Some(region)) = (cfg.show_crop_area, crop) {
                renderer.draw_crop_area(&mut frame, region);
            }
            let offset = crop.map(|r| r.offset()).unwrap_or((0, 0));
            renderer.render(&mut frame, &retained, &maps, &cfg, offset);
            let shown_fps = fps.tick(Instant::now());
            if cfg.show_fps {
                renderer.draw_fps(&mut frame, shown_fps);
            }

            status.send_replace(PipelineStatus::Running { frame: frame_index });
            if present(self.sink.as_mut(), &frame)? == SinkControl::Quit {
                break StopReason::SinkClosed;
            }
        };

        Ok(PipelineReport { frames: cadence.frame_index(), detection_frames, reason })
    }
}

fn present(sink: &mut dyn FrameSink, frame: &RgbImage) -> Result<SinkControl, PipelineError> {
    sink.present(frame).map_err(PipelineError::Sink)
}

// Parse failures are reported once per distinct text.
fn override_maps(cfg: &PipelineConfig, warned: &mut HashSet<(OverrideKind, String)>) -> OverrideMaps {
    let (maps, errors) = OverrideMaps::from_config(cfg);
    for e in errors {
        let text = match e.kind {
            OverrideKind::Names => &cfg.override_text,
            OverrideKind::Colors => &cfg.override_color_text,
        };
        if warned.insert((e.kind, text.clone())) {
            warn!("pipeline: ignoring override text: {}", e);
        }
    }
    maps
}

/// Renderer for the current `font_path`; reloaded when the path changes.
#[derive(Default)]
struct RendererCache {
    current: Option<(Option<PathBuf>, Renderer)>,
}

impl RendererCache {
    fn get(&mut self, font_path: Option<&Path>) -> &Renderer {
        if self.current.as_ref().is_some_and(|(p, _)| p.as_deref() != font_path) {
            self.current = None;
        }
        &self
            .current
            .get_or_insert_with(|| (font_path.map(Path::to_path_buf), Renderer::new(load_font(font_path))))
            .1
    }
}

fn load_font(path: Option<&Path>) -> Option<LabelFont> {
    match LabelFont::discover(path) {
        Ok(Some(font)) => Some(font),
        Ok(None) => {
            warn!("render: no system font found, labels disabled (set font_path)");
            None
        }
        Err(e) => {
            warn!("render: {}, labels disabled", error_chain(&e));
            None
        }
    }
}

/// Frames presented during the last full wall-clock second.
struct FpsCounter {
    window_start: Instant,
    frames: u32,
    shown: u32,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self { window_start: now, frames: 0, shown: 0 }
    }

    fn tick(&mut self, now: Instant) -> u32 {
        self.frames += 1;
        if now.saturating_duration_since(self.window_start) >= Duration::from_secs(1) {
            self.shown = self.frames;
            self.frames = 0;
            self.window_start = now;
        }
        self.shown
    }
}

/// Control-side handle of a running pipeline.
pub struct PipelineHandle {
    stop: StopSignal,
    status: watch::Receiver<PipelineStatus>,
    live: LiveConfig,
    task: JoinHandle<Result<PipelineReport, PipelineError>>,
}

impl PipelineHandle {
    /// Asks the loop to exit before its next frame.
    pub fn stop(&self) {
        info!("pipeline: stop requested");
        self.stop.raise();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn status(&self) -> watch::Receiver<PipelineStatus> {
        self.status.clone()
    }

    pub fn live(&self) -> &LiveConfig {
        &self.live
    }

    pub async fn join(self) -> Result<PipelineReport, PipelineError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) => Err(PipelineError::Aborted(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SinkError;
    use crate::error::SourceError;
    use image::Rgb;
    use scope_proto::{ModelConfig, ResizeMode, MERGED_COLOR};
    use scope_vision::detector::{DetectRequest, Detector, DetectorError, Slot};
    use scope_vision::{Bbox, RawBox};
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    struct VecSource {
        frames: VecDeque<RgbImage>,
        fps: f64,
    }

    impl VecSource {
        fn black(n: usize, w: u32, h: u32, fps: f64) -> Box<Self> {
            Box::new(Self { frames: (0..n).map(|_| RgbImage::new(w, h)).collect(), fps })
        }
    }

    impl FrameSource for VecSource {
        fn nominal_fps(&self) -> f64 {
            self.fps
        }
        fn next_frame(&mut self) -> Result<Option<RgbImage>, SourceError> {
            Ok(self.frames.pop_front())
        }
    }

    type Frames = Arc<Mutex<Vec<RgbImage>>>;

    #[derive(Default)]
    struct CollectSink {
        frames: Frames,
        quit_after: Option<usize>,
        // published once the first frame has been presented
        publish: Option<(LiveConfig, PipelineConfig)>,
    }

    impl FrameSink for CollectSink {
        fn present(&mut self, frame: &RgbImage) -> Result<SinkControl, SinkError> {
            let mut frames = self.frames.lock().unwrap();
            frames.push(frame.clone());
            if let Some((live, cfg)) = self.publish.take() {
                live.publish(cfg);
            }
            Ok(match self.quit_after {
                Some(n) if frames.len() >= n => SinkControl::Quit,
                _ => SinkControl::Continue,
            })
        }
    }

    struct FixedBox {
        bbox: Bbox,
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl Detector for FixedBox {
        fn detect(&mut self, _image: &RgbImage, req: &DetectRequest) -> Result<Vec<RawBox>, DetectorError> {
            self.seen.lock().unwrap().push(req.frame_index);
            Ok(vec![RawBox { bbox: self.bbox, confidence: 0.8, class_id: 0, class_name: "crate".into(), track_id: None }])
        }
    }

    #[derive(Default)]
    struct FixedLoader {
        boxes: HashMap<PathBuf, Bbox>,
        seen: Arc<Mutex<Vec<u64>>>,
    }

    impl ModelLoader for FixedLoader {
        fn load(&self, model: &ModelConfig, _slot: Slot) -> Result<Box<dyn Detector>, DetectorError> {
            let bbox = self.boxes.get(&model.path).copied().ok_or_else(|| DetectorError::Load {
                path: model.path.clone(),
                reason: "unknown model".into(),
            })?;
            Ok(Box::new(FixedBox { bbox, seen: self.seen.clone() }))
        }
    }

    fn loader(models: &[(&str, [f32; 4])]) -> FixedLoader {
        FixedLoader {
            boxes: models.iter().map(|(p, b)| (PathBuf::from(p), Bbox::from_xyxy(*b))).collect(),
            ..Default::default()
        }
    }

    fn plain_cfg(models: &[(&str, [u8; 3])]) -> PipelineConfig {
        PipelineConfig {
            models: models.iter().map(|(p, c)| ModelConfig { path: p.into(), color: *c, conf: None }).collect(),
            display_id: false,
            show_fps: false,
            box_thickness: 1,
            ..Default::default()
        }
    }

    fn run_to_end(p: Pipeline) -> PipelineReport {
        let (tx, _rx) = watch::channel(PipelineStatus::Starting);
        p.run(&StopSignal::new(), &tx).unwrap()
    }

    #[test]
    fn detects_on_cadence_and_clears_between() {
        let loader = loader(&[("a", [2.0, 2.0, 12.0, 12.0])]);
        let seen = loader.seen.clone();
        let sink = CollectSink::default();
        let frames = sink.frames.clone();
        let p = Pipeline::new(plain_cfg(&[("a", [255, 0, 0])]), &loader, VecSource::black(7, 20, 20, 30.0), Box::new(sink)).unwrap();

        let report = run_to_end(p);
        assert_eq!(report, PipelineReport { frames: 7, detection_frames: 2, reason: StopReason::EndOfStream });
        assert_eq!(*seen.lock().unwrap(), vec![3, 6]);

        let frames = frames.lock().unwrap();
        let has_box = |i: usize| frames[i].get_pixel(2, 7) == &Rgb([255, 0, 0]);
        assert_eq!((0..7).map(has_box).collect::<Vec<_>>(), vec![false, false, true, false, false, true, false]);
    }

    #[test]
    fn tracking_mode_detects_every_frame() {
        let loader = loader(&[("a", [2.0, 2.0, 12.0, 12.0])]);
        let seen = loader.seen.clone();
        let mut cfg = plain_cfg(&[("a", [255, 0, 0])]);
        cfg.tracking_mode = scope_proto::TrackingMode::Track;
        let p = Pipeline::new(cfg, &loader, VecSource::black(4, 20, 20, 30.0), Box::new(CollectSink::default())).unwrap();

        assert_eq!(run_to_end(p).detection_frames, 4);
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn published_config_applies_from_next_frame() {
        let loader = loader(&[("a", [2.0, 2.0, 12.0, 12.0]), ("b", [3.0, 3.0, 13.0, 13.0])]);
        let mut cfg = plain_cfg(&[("a", [255, 0, 0]), ("b", [0, 0, 255])]);
        cfg.detections_per_second = 0;
        let mut sink = CollectSink::default();
        let frames = sink.frames.clone();

        let p = Pipeline::new(cfg.clone(), &loader, VecSource::black(2, 20, 20, 30.0), Box::new(NullPlaceholder)).unwrap();
        let live = p.live().clone();
        sink.publish = Some((live, PipelineConfig { combine_bboxes: true, ..cfg }));
        let p = Pipeline { sink: Box::new(sink), ..p };

        run_to_end(p);
        let frames = frames.lock().unwrap();
        assert_eq!(frames[0].get_pixel(2, 7), &Rgb([255, 0, 0]));
        assert_eq!(frames[0].get_pixel(13, 8), &Rgb([0, 0, 255]));
        assert_eq!(frames[1].get_pixel(2, 7), &Rgb(MERGED_COLOR));
        assert_eq!(frames[1].get_pixel(13, 8), &Rgb(MERGED_COLOR));
    }

    struct NullPlaceholder;
    impl FrameSink for NullPlaceholder {
        fn present(&mut self, _frame: &RgbImage) -> Result<SinkControl, SinkError> {
            Ok(SinkControl::Continue)
        }
    }

    #[test]
    fn crop_mode_offsets_boxes_and_outlines_the_crop() {
        let loader = loader(&[("a", [0.0, 0.0, 10.0, 10.0])]);
        let mut cfg = plain_cfg(&[("a", [0, 0, 255])]);
        cfg.detections_per_second = 0;
        cfg.resize_mode = ResizeMode::Crop;
        cfg.yolo_input_size = 32;
        cfg.show_crop_area = true;
        let sink = CollectSink::default();
        let frames = sink.frames.clone();
        let p = Pipeline::new(cfg, &loader, VecSource::black(1, 64, 48, 30.0), Box::new(sink)).unwrap();

        run_to_end(p);
        let f = &frames.lock().unwrap()[0];
        // crop origin is (16, 8); the box is drawn over the crop outline
        assert_eq!(f.get_pixel(16, 13), &Rgb([0, 0, 255]));
        assert_eq!(f.get_pixel(26, 13), &Rgb([0, 0, 255]));
        assert_eq!(f.get_pixel(16, 30), &Rgb(scope_proto::CROP_AREA_COLOR));
    }

    #[test]
    fn stop_and_sink_quit_end_the_loop() {
        let loader = loader(&[("a", [0.0, 0.0, 1.0, 1.0])]);
        let cfg = plain_cfg(&[("a", [1, 1, 1])]);

        let p = Pipeline::new(cfg.clone(), &loader, VecSource::black(5, 8, 8, 30.0), Box::new(CollectSink::default())).unwrap();
        let stop = StopSignal::new();
        stop.raise();
        let (tx, rx) = watch::channel(PipelineStatus::Starting);
        let report = p.run(&stop, &tx).unwrap();
        assert_eq!((report.frames, report.reason), (0, StopReason::Requested));
        assert_eq!(*rx.borrow(), PipelineStatus::Stopped(StopReason::Requested));

        let sink = CollectSink { quit_after: Some(2), ..Default::default() };
        let p = Pipeline::new(cfg, &loader, VecSource::black(5, 8, 8, 30.0), Box::new(sink)).unwrap();
        let report = run_to_end(p);
        assert_eq!((report.frames, report.reason), (2, StopReason::SinkClosed));
    }

    #[test]
    fn start_fails_without_models_or_with_a_bad_model() {
        let loader = loader(&[("a", [0.0, 0.0, 1.0, 1.0])]);
        let err = Pipeline::new(PipelineConfig::default(), &loader, VecSource::black(1, 8, 8, 30.0), Box::new(NullPlaceholder)).err();
        assert!(matches!(err, Some(PipelineError::NoModels)));

        let cfg = plain_cfg(&[("a", [1, 1, 1]), ("missing.json", [1, 1, 1])]);
        match Pipeline::new(cfg, &loader, VecSource::black(1, 8, 8, 30.0), Box::new(NullPlaceholder)) {
            Err(PipelineError::ModelLoad { path, .. }) => assert_eq!(path, Path::new("missing.json")),
            _ => panic!("expected a model load error"),
        }
    }

    #[tokio::test]
    async fn spawned_pipeline_reports_status_and_joins() {
        let loader = loader(&[("a", [0.0, 0.0, 1.0, 1.0])]);
        let p = Pipeline::new(plain_cfg(&[("a", [1, 1, 1])]), &loader, VecSource::black(3, 8, 8, 30.0), Box::new(CollectSink::default())).unwrap();

        let handle = p.spawn();
        let mut status = handle.status();
        status.wait_for(|s| s.is_finished()).await.unwrap();
        assert_eq!(*status.borrow(), PipelineStatus::Stopped(StopReason::EndOfStream));
        assert_eq!(handle.join().await.unwrap().frames, 3);
    }

    #[test]
    fn fps_counter_reports_last_full_second() {
        let t0 = Instant::now();
        let mut c = FpsCounter::new(t0);
        for i in 1..=9 {
            assert_eq!(c.tick(t0 + Duration::from_millis(i * 100)), 0);
        }
        assert_eq!(c.tick(t0 + Duration::from_millis(1000)), 10);
        assert_eq!(c.tick(t0 + Duration::from_millis(1500)), 10);
    }

    #[test]
    fn override_warnings_are_deduplicated() {
        let cfg = PipelineConfig { override_enabled: true, override_text: "1 worker".into(), ..Default::default() };
        let mut warned = HashSet::new();
        assert!(override_maps(&cfg, &mut warned).names.is_empty());
        override_maps(&cfg, &mut warned);
        assert_eq!(warned.len(), 1);
    }
}
