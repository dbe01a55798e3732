//! decode_tensor - run one decode cycle over a saved model output
//!
//! Reads `{ "shape": [1, F, N], "data": [...] }` and prints the resulting
//! DetectionSet (suppressed, projected, with center target) as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use ndarray::{ArrayD, IxDyn};
use serde::Deserialize;
use std::io::IsTerminal;
use std::path::PathBuf;

use overlay_kernel::detect::backends::SyntheticBackend;
use overlay_kernel::{CameraPose, DetectionGate, Pipeline, PipelineConfig};

#[path = "../ui.rs"]
#[allow(dead_code)]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "decode_tensor", about = "Decode a saved [1, F, N] output tensor")]
struct Args {
    /// JSON tensor file
    input: PathBuf,

    /// Config file (defaults and OVERLAY_* overrides apply without one)
    #[arg(long, env = "OVERLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Confidence threshold override
    #[arg(long)]
    conf: Option<f32>,

    /// IoU threshold override
    #[arg(long)]
    iou: Option<f32>,

    /// First class-score channel
    #[arg(long)]
    class_offset: Option<usize>,

    /// Number of scored classes
    #[arg(long)]
    class_count: Option<usize>,

    /// Pretty-print the JSON output
    #[arg(long)]
    pretty: bool,

    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE")]
    ui: String,
}

#[derive(Deserialize)]
struct TensorFile {
    shape: Vec<usize>,
    data: Vec<f32>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let ui = ui::Ui::new(
        ui::UiMode::parse(&args.ui),
        std::io::stderr().is_terminal(),
        std::io::stdout().is_terminal(),
    );

    let mut cfg = match &args.config {
        Some(path) => PipelineConfig::load_from_path(path)?,
        None => PipelineConfig::load()?,
    };
    if let Some(conf) = args.conf {
        cfg.decoder.confidence_threshold = conf;
    }
    if let Some(iou) = args.iou {
        cfg.iou_threshold = iou;
    }
    if let Some(offset) = args.class_offset {
        cfg.decoder.classes.offset = offset;
    }
    if let Some(count) = args.class_count {
        cfg.decoder.classes.count = count;
    }
    cfg.validate().context("invalid command-line overrides")?;

    let tensor = {
        let _stage = ui.stage("Read tensor");
        let raw = std::fs::read_to_string(&args.input)
            .with_context(|| format!("failed to read {}", args.input.display()))?;
        let file: TensorFile = serde_json::from_str(&raw)
            .with_context(|| format!("invalid tensor file {}", args.input.display()))?;
        ArrayD::from_shape_vec(IxDyn(&file.shape), file.data)
            .with_context(|| format!("data does not match shape {:?}", file.shape))?
    };

    let set = {
        let _stage = ui.stage("Decode");
        let backend = SyntheticBackend::new(cfg.tensor.features, cfg.tensor.slots, cfg.decoder);
        let mut pipeline = Pipeline::new(Box::new(backend), &cfg, DetectionGate::new());
        let set = pipeline.process_output(tensor.view(), &CameraPose::identity()).clone();
        pipeline.shutdown();
        set
    };

    let json = if args.pretty {
        serde_json::to_string_pretty(&set)?
    } else {
        serde_json::to_string(&set)?
    };
    println!("{}", json);
    Ok(())
}
