use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use overlay_kernel::config::{BackendKind, PipelineConfig};
use overlay_kernel::{ExtentAxis, OrientationPolicy, ProjectionSpace};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "OVERLAY_CONFIG",
        "OVERLAY_BACKEND",
        "OVERLAY_MODEL_PATH",
        "OVERLAY_CONF_THRESHOLD",
        "OVERLAY_IOU_THRESHOLD",
        "OVERLAY_FRAME_SKIP",
        "OVERLAY_WATCHDOG_SECS",
        "OVERLAY_SOURCE_URL",
    ] {
        std::env::remove_var(key);
    }
}

fn json_file(contents: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".json")
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = json_file(
        r#"{
            "backend": {
                "kind": "synthetic",
                "jitter": 2.5,
                "seed": 7,
                "synthetic_objects": [
                    { "class_id": 2, "confidence": 0.9,
                      "bbox": { "x": 300.0, "y": 300.0, "width": 40.0, "height": 40.0 } }
                ]
            },
            "tensor": { "features": 57, "slots": 100 },
            "decoder": { "confidence_threshold": 0.55, "class_count": 8 },
            "suppression": { "iou_threshold": 0.5 },
            "driver": { "frame_skip": 2, "watchdog_secs": 4.5 },
            "projection": { "space": "world", "extent_axis": "height", "plane_size": 3.0 },
            "pool": { "batch_size": 8 },
            "orientation": { "policy": "smooth", "smooth_time": 0.2,
                             "threshold_degrees": 1.0, "update_interval": 4 },
            "source": { "url": "stub://lab", "target_fps": 15, "width": 320, "height": 240 }
        }"#,
    );

    std::env::set_var("OVERLAY_CONFIG", file.path());
    std::env::set_var("OVERLAY_CONF_THRESHOLD", "0.7");
    std::env::set_var("OVERLAY_FRAME_SKIP", "1");
    std::env::set_var("OVERLAY_SOURCE_URL", "stub://override");

    let cfg = PipelineConfig::load().expect("load config");

    assert_eq!(cfg.backend.kind, BackendKind::Synthetic);
    assert_eq!(cfg.backend.synthetic_objects.len(), 1);
    assert_eq!(cfg.backend.jitter, 2.5);
    assert_eq!(cfg.backend.seed, 7);
    assert_eq!(cfg.tensor.features, 57);
    assert_eq!(cfg.tensor.slots, 100);
    assert_eq!(cfg.decoder.confidence_threshold, 0.7);
    assert_eq!(cfg.decoder.classes.count, 8);
    assert_eq!(cfg.iou_threshold, 0.5);
    assert_eq!(cfg.driver.frame_skip, 1);
    assert_eq!(cfg.driver.watchdog, Duration::from_millis(4500));
    assert_eq!(cfg.projection.space, ProjectionSpace::World);
    assert_eq!(cfg.projection.extent_axis, ExtentAxis::Height);
    assert_eq!(cfg.projection.calibration.plane_size, 3.0);
    assert_eq!(cfg.pool_batch, 8);
    assert_eq!(
        cfg.orientation,
        OrientationPolicy::Smooth {
            smooth_time: 0.2,
            threshold_degrees: 1.0,
            update_interval: 4
        }
    );
    assert_eq!(cfg.classes.len(), 8);
    assert_eq!(cfg.source.url, "stub://override");
    assert_eq!(cfg.source.target_fps, 15);

    clear_env();
}

#[test]
fn loads_toml_config_from_explicit_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [decoder]
        confidence_threshold = 0.6

        [projection]
        offset = [0.1, -0.2]

        [orientation]
        policy = "snap"

        [[classes]]
        name = "guitar"
        sprite = "sprites/guitar.png"
        native_width = 0.8
        cue = "cues/guitar.wav"

        [[classes]]
        name = "flute"
        sprite = "sprites/flute.png"
        native_width = 0.4
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    let cfg = PipelineConfig::load_from_path(file.path()).expect("load config");

    assert_eq!(cfg.decoder.confidence_threshold, 0.6);
    assert_eq!(cfg.iou_threshold, 0.6);
    assert_eq!(cfg.orientation, OrientationPolicy::Snap);
    assert_eq!(cfg.classes.len(), 2);
    assert_eq!(cfg.classes[0].cue.as_deref(), Some("cues/guitar.wav"));
    assert_eq!(cfg.classes[1].cue, None);
    assert!((cfg.projection.calibration.offset.x - 0.1).abs() < 1e-6);

    clear_env();
}

#[test]
fn defaults_apply_without_a_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = PipelineConfig::load().expect("load defaults");
    assert_eq!(cfg.decoder.confidence_threshold, 0.5);
    assert_eq!(cfg.iou_threshold, 0.6);
    assert_eq!(cfg.driver.frame_skip, 3);
    assert_eq!(cfg.driver.watchdog, Duration::from_secs(10));
    assert_eq!(cfg.pool_batch, 5);
    assert_eq!(cfg.source.url, "stub://camera");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OVERLAY_IOU_THRESHOLD", "1.5");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("OVERLAY_FRAME_SKIP", "0");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("OVERLAY_WATCHDOG_SECS", "soon");
    assert!(PipelineConfig::load().is_err());
    clear_env();

    std::env::set_var("OVERLAY_BACKEND", "tract");
    let err = PipelineConfig::load().unwrap_err();
    assert!(err.to_string().contains("model path"));
    clear_env();

    let file = json_file(r#"{ "decoder": { "class_offset": 60, "class_count": 7 } }"#);
    assert!(PipelineConfig::load_from_path(file.path()).is_err());

    let file = json_file(r#"{ "pool": { "batch_size": 0 } }"#);
    assert!(PipelineConfig::load_from_path(file.path()).is_err());

    let file = json_file(r#"{ "decoder": { "confidence_threshold": "high" } }"#);
    assert!(PipelineConfig::load_from_path(file.path()).is_err());

    clear_env();
}

#[test]
fn overrides_after_loading_are_revalidated() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut cfg = PipelineConfig::load().expect("load defaults");
    cfg.decoder.classes.offset = 60;
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("class window"));

    let mut cfg = PipelineConfig::load().expect("load defaults");
    cfg.decoder.classes.count = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = PipelineConfig::load().expect("load defaults");
    cfg.decoder.classes.offset = 5;
    cfg.decoder.classes.count = 6;
    cfg.validate().expect("window 5..11 fits 62 features");

    clear_env();
}
