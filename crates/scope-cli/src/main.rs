use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use scope_pipeline::{open_source, DirSink, FrameSink, LiveConfig, NullSink, Pipeline, PipelineStatus};
use scope_proto::{doctor as cfg_doctor, PipelineConfig};
use scope_vision::render::LabelFont;
use scope_vision::replay::{ReplayDetector, ReplayLoader};

#[derive(Debug, Parser)]
#[command(name = "scope", version, about = "scope - multi-model detection overlay")]
struct Cli {
    #[arg(long)]
    config: PathBuf,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check settings, model files, source and label font.
    Doctor,
    /// Play the configured source through every model.
    Run(RunArgs),
    Config { #[command(subcommand)] cmd: ConfigCmd },
}

#[derive(Debug, Subcommand)]
enum ConfigCmd {
    /// Write a settings file with every default.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Print the effective settings.
    Show,
}

#[derive(Debug, Args)]
struct RunArgs {
    /// Write rendered frames as PNGs into this directory (discarded otherwise).
    #[arg(long)]
    output: Option<PathBuf>,
    /// Rescale written frames, e.g. 1920x1080.
    #[arg(long, value_parser = parse_size)]
    viewer: Option<(u32, u32)>,
    /// Stop after this many frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s.split_once(['x', 'X']).ok_or_else(|| format!("expected WIDTHxHEIGHT, got {:?}", s))?;
    let w: u32 = w.trim().parse().map_err(|e| format!("width: {}", e))?;
    let h: u32 = h.trim().parse().map_err(|e| format!("height: {}", e))?;
    if w == 0 || h == 0 {
        return Err("viewer size must be non-zero".into());
    }
    Ok((w, h))
}

fn load_config(path: &Path) -> Result<PipelineConfig> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    toml::from_str(&s).context("parse config toml")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.cmd {
        Command::Doctor => doctor(&load_config(&cli.config)?)?,
        Command::Run(args) => run(&cli.config, args).await?,
        Command::Config { cmd } => config_cmd(&cli.config, cmd)?,
    }
    Ok(())
}

fn doctor(cfg: &PipelineConfig) -> Result<()> {
    info!("doctor: starting");

    cfg_doctor::check_thresholds(cfg)?;
    cfg_doctor::check_drawing(cfg)?;
    cfg_doctor::check_models(cfg)?;
    cfg_doctor::check_source(cfg)?;

    for m in &cfg.models {
        ReplayDetector::open(&m.path).with_context(|| format!("load model {}", m.path.display()))?;
    }

    match LabelFont::discover(cfg.font_path.as_deref()) {
        Ok(Some(font)) => info!("doctor: label font {}", font.path().display()),
        Ok(None) => warn!("doctor: no label font found, labels will be skipped (set font_path)"),
        Err(e) => warn!("doctor: font_path unusable: {:#}", anyhow::Error::new(e)),
    }

    info!("doctor: OK");
    Ok(())
}

fn config_cmd(path: &Path, cmd: ConfigCmd) -> Result<()> {
    match cmd {
        ConfigCmd::Init { force } => {
            anyhow::ensure!(force || !path.exists(), "{} exists (use --force to overwrite)", path.display());
            let text = toml::to_string_pretty(&PipelineConfig::default()).context("serialize defaults")?;
            std::fs::write(path, text).with_context(|| format!("write {}", path.display()))?;
            info!("config: wrote defaults to {}", path.display());
        }
        ConfigCmd::Show => {
            let cfg = load_config(path)?;
            print!("{}", toml::to_string_pretty(&cfg).context("serialize config")?);
        }
    }
    Ok(())
}

async fn run(config_path: &Path, args: RunArgs) -> Result<()> {
    info!("run: starting");
    let cfg = load_config(config_path)?;
    check_tunables(&cfg)?;

    let source = open_source(&cfg.source()).context("open video source")?;
    let sink: Box<dyn FrameSink> = match &args.output {
        Some(dir) => {
            let mut sink = DirSink::create(dir)?;
            if let Some((w, h)) = args.viewer {
                sink = sink.with_resize(w, h);
            }
            if let Some(n) = args.max_frames {
                sink = sink.with_limit(n);
            }
            Box::new(sink)
        }
        None => {
            anyhow::ensure!(args.max_frames.is_none(), "--max-frames needs --output");
            Box::new(NullSink::default())
        }
    };

    let pipeline = Pipeline::new(cfg, &ReplayLoader, source, sink).context("start pipeline")?;
    let handle = pipeline.spawn();
    let mut status = handle.status();
    let mut reload = ReloadSignal::new()?;

    loop {
        tokio::select! {
            _ = status.wait_for(PipelineStatus::is_finished) => break,
            res = tokio::signal::ctrl_c() => {
                res.context("listen for ctrl-c")?;
                handle.stop();
            }
            _ = reload.recv() => match reload_settings(config_path, handle.live()) {
                Ok(applied) => info!(
                    "run: settings reloaded (dps={} fusion={} dual={})",
                    applied.detections_per_second, applied.combine_bboxes, applied.dual_processing
                ),
                Err(e) => warn!("run: reload failed, keeping current settings: {:#}", e),
            },
        }
    }

    let report = handle.join().await.context("pipeline")?;
    info!(
        "run: done, {} frames ({} with detection), reason={:?}",
        report.frames, report.detection_frames, report.reason
    );
    Ok(())
}

/// Checks on settings that can change while running.
fn check_tunables(cfg: &PipelineConfig) -> Result<()> {
    cfg_doctor::check_thresholds(cfg)?;
    cfg_doctor::check_drawing(cfg)
}

/// Re-reads the settings file and publishes its live fields. Nothing is
/// published when the file does not load or fails the checks.
fn reload_settings(path: &Path, live: &LiveConfig) -> Result<Arc<PipelineConfig>> {
    let edited = load_config(path)?;
    check_tunables(&edited)?;
    Ok(live.apply_live(&edited))
}

/// SIGHUP re-reads the settings file. Never fires on other platforms.
struct ReloadSignal {
    #[cfg(unix)]
    hup: tokio::signal::unix::Signal,
}

impl ReloadSignal {
    fn new() -> Result<Self> {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let hup = signal(SignalKind::hangup()).context("install SIGHUP handler")?;
            Ok(Self { hup })
        }
        #[cfg(not(unix))]
        {
            Ok(Self {})
        }
    }

    async fn recv(&mut self) {
        #[cfg(unix)]
        if self.hup.recv().await.is_some() {
            return;
        }
        std::future::pending::<()>().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn viewer_size_parses() {
        assert_eq!(parse_size("1920x1080"), Ok((1920, 1080)));
        assert_eq!(parse_size("640X480"), Ok((640, 480)));
        assert!(parse_size("1920").is_err());
        assert!(parse_size("0x10").is_err());
    }

    #[test]
    fn init_writes_defaults_that_load_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scope.toml");

        config_cmd(&path, ConfigCmd::Init { force: false }).unwrap();
        assert_eq!(load_config(&path).unwrap(), PipelineConfig::default());
        assert!(config_cmd(&path, ConfigCmd::Init { force: false }).is_err());
        config_cmd(&path, ConfigCmd::Init { force: true }).unwrap();
    }

    #[test]
    fn reload_rejects_invalid_drawing_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scope.toml");
        let live = LiveConfig::new(PipelineConfig::default());

        std::fs::write(&path, "box_thickness = 4000000000\ncombine_bboxes = true\n").unwrap();
        assert!(reload_settings(&path, &live).is_err());
        assert_eq!(*live.current_snapshot(), PipelineConfig::default());

        std::fs::write(&path, "box_thickness = 5\ncombine_bboxes = true\n").unwrap();
        let applied = reload_settings(&path, &live).unwrap();
        assert_eq!(applied.box_thickness, 5);
        assert!(live.current_snapshot().combine_bboxes);
    }
}
