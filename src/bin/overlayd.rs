//! overlayd - detection overlay driver
//!
//! This daemon:
//! 1. Pulls frames from the configured source (`stub://` synthetic camera)
//! 2. Runs the decode cycle on every `frame_skip`-th frame
//! 3. Reconciles each emitted set onto pooled overlay handles
//! 4. Optionally triggers focus on the center target to exercise the gate
//! 5. Tears everything down on Ctrl-C or after `--frames`

use anyhow::{anyhow, Result};
use clap::Parser;
use std::cell::Cell;
use std::collections::HashMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use overlay_kernel::{
    open_source, CuePlayer, DetectionGate, FocusController, FocusOutcome, FrameOutcome,
    HandleBinding, HandleId, HandleRenderer, Pipeline, PipelineConfig, Reconciler,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "overlayd", about = "Decode detections and drive the AR overlay")]
struct Args {
    /// Config file (JSON when the extension is .json, TOML otherwise)
    #[arg(long, env = "OVERLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Stop after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Press the focus trigger every N frames
    #[arg(long, value_name = "N")]
    trigger_every: Option<u64>,

    /// Simulated cue length in seconds of frame time
    #[arg(long, default_value_t = 2.0)]
    cue_secs: f64,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

/// Renderer that tracks handle visibility and logs bindings.
#[derive(Default)]
struct LoggingRenderer {
    visible: HashMap<HandleId, bool>,
    bindings: u64,
}

impl LoggingRenderer {
    fn visible_count(&self) -> usize {
        self.visible.values().filter(|v| **v).count()
    }
}

impl HandleRenderer for LoggingRenderer {
    fn create(&mut self, id: HandleId) -> Result<()> {
        self.visible.insert(id, false);
        Ok(())
    }

    fn set_visible(&mut self, id: HandleId, visible: bool) {
        self.visible.insert(id, visible);
    }

    fn bind(&mut self, id: HandleId, binding: &HandleBinding<'_>) -> Result<()> {
        if !self.visible.contains_key(&id) {
            return Err(anyhow!("handle {:?} was never created", id));
        }
        self.bindings += 1;
        log::debug!(
            "handle {}: {} class={} at ({:.2}, {:.2}, {:.2}) scale={:.3}",
            id.0,
            binding.sprite,
            binding.class_id,
            binding.position.x,
            binding.position.y,
            binding.position.z,
            binding.scale
        );
        Ok(())
    }

    fn destroy(&mut self, id: HandleId) {
        self.visible.remove(&id);
    }
}

/// Cue player that "plays" for a fixed amount of frame time.
struct TimedCuePlayer {
    length: f64,
    remaining: f64,
}

impl TimedCuePlayer {
    fn advance(&mut self, dt: f64) {
        self.remaining = (self.remaining - dt).max(0.0);
    }
}

impl CuePlayer for TimedCuePlayer {
    fn play(&mut self, cue: &str) -> Result<()> {
        log::info!("cue: playing {}", cue);
        self.remaining = self.length;
        Ok(())
    }

    fn stop(&mut self) {
        self.remaining = 0.0;
    }

    fn is_playing(&self) -> bool {
        self.remaining > 0.0
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if args.trigger_every == Some(0) {
        return Err(anyhow!("--trigger-every must be >= 1"));
    }
    let ui = ui::Ui::new(
        ui::UiMode::parse(&args.ui),
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal(),
    );

    let cfg = {
        let _stage = ui.stage("Load configuration");
        match &args.config {
            Some(path) => PipelineConfig::load_from_path(path)?,
            None => PipelineConfig::load()?,
        }
    };

    let gate = DetectionGate::new();
    let mut pipeline = {
        let _stage = ui.stage("Prepare inference backend");
        Pipeline::from_config(&cfg, gate.clone())?
    };
    let emitted = Rc::new(Cell::new(0u64));
    let sink = Rc::clone(&emitted);
    pipeline.subscribe(move |set| sink.set(sink.get() + set.len() as u64));

    let mut source = open_source(&cfg.source)?;
    let mut reconciler = Reconciler::new(
        cfg.classes.clone(),
        cfg.projection.space,
        cfg.orientation,
        cfg.pool_batch,
    );
    let mut renderer = LoggingRenderer::default();
    let mut focus = FocusController::new(gate.clone(), &cfg.classes);
    let mut player = TimedCuePlayer {
        length: args.cue_secs.max(0.0),
        remaining: 0.0,
    };

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = Arc::clone(&running);
    ctrlc::set_handler(move || handler_flag.store(false, Ordering::SeqCst))
        .map_err(|e| anyhow!("failed to install Ctrl-C handler: {}", e))?;

    let progress = args.frames.map(|total| ui.frames(total));
    let pace = Duration::from_secs_f64(1.0 / f64::from(cfg.source.target_fps.max(1)));
    let mut last_timestamp: Option<f64> = None;
    let mut frame_count = 0u64;
    let mut last_health_log = Instant::now();

    log::info!(
        "overlayd running. source={} backend={:?} frame_skip={} watchdog={:?}",
        cfg.source.url,
        cfg.backend.kind,
        cfg.driver.frame_skip,
        cfg.driver.watchdog
    );

    while running.load(Ordering::SeqCst) {
        if args.frames.is_some_and(|limit| frame_count >= limit) {
            break;
        }
        let Some(frame) = source.next_frame()? else {
            log::info!("frame source exhausted");
            break;
        };
        frame_count += 1;
        let dt = last_timestamp.map(|t| frame.timestamp - t).unwrap_or(0.0);
        last_timestamp = Some(frame.timestamp);

        if let FrameOutcome::Decoded { .. } = pipeline.on_frame(&frame, dt as f32) {
            if let Some(set) = pipeline.latest() {
                reconciler.reconcile(set, &frame.pose, dt as f32, &mut renderer);
            }
        }

        player.advance(dt);
        focus.poll(&player);
        if args.trigger_every.is_some_and(|n| frame_count % n == 0) {
            let center = pipeline.try_get_center_target();
            match focus.trigger(center.as_ref(), &mut player) {
                FocusOutcome::Acquired { class_id } => log::info!("focus acquired on class {}", class_id),
                FocusOutcome::Released => log::info!("focus released"),
                FocusOutcome::NoTarget | FocusOutcome::NoCue { .. } => {}
            }
        }

        if let Some(bar) = &progress {
            bar.inc(1);
        }
        if last_health_log.elapsed() >= Duration::from_secs(5) {
            let stats = pipeline.stats();
            log::info!(
                "health frames={} cycles={} failed={} gated={} watchdog_resets={} detections={} visible={} pool={}",
                stats.frames,
                stats.cycles,
                stats.failed_cycles,
                stats.gated,
                stats.watchdog_resets,
                emitted.get(),
                renderer.visible_count(),
                reconciler.pool().capacity()
            );
            last_health_log = Instant::now();
        }

        if args.frames.is_none() {
            std::thread::sleep(pace);
        }
    }

    if let Some(bar) = progress {
        bar.finish_and_clear();
    }
    log::info!("shutting down after {} frames", frame_count);
    {
        let _stage = ui.stage("Teardown");
        player.stop();
        pipeline.shutdown();
        reconciler.teardown(&mut renderer);
        source.close();
    }
    log::info!(
        "overlayd stopped. {} detections emitted, {} handle bindings",
        emitted.get(),
        renderer.bindings
    );
    Ok(())
}
