use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use object_watch::config::{BackendKind, ListenerConfig, WatchConfig};
use object_watch::DetectError;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "OBJECT_WATCH_CONFIG",
        "OBJECT_WATCH_MODEL",
        "OBJECT_WATCH_LABELS",
        "OBJECT_WATCH_BACKEND",
        "OBJECT_WATCH_CAMERA",
        "OBJECT_WATCH_MIN_SCORE",
        "OBJECT_WATCH_POLL_MS",
        "OBJECT_WATCH_LISTEN",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    file.write_all(body.as_bytes()).expect("write config");
    file
}

#[test]
fn loads_json_config_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "model_path": "/opt/models/ssd.onnx",
            "labels_path": "/opt/models/labelmap.txt",
            "backend": "stub",
            "camera": { "device": "/dev/video2", "width": 300, "height": 300 },
            "detection": { "min_score": 0.5, "poll_interval_ms": 250 },
            "listeners": [
                { "label": "person", "command": ["/usr/bin/notify", "person"] },
                { "label": "cat" }
            ]
        }"#,
    );

    std::env::set_var("OBJECT_WATCH_CONFIG", file.path());
    std::env::set_var("OBJECT_WATCH_CAMERA", "stub://bench");
    std::env::set_var("OBJECT_WATCH_MIN_SCORE", "0.35");
    std::env::set_var("OBJECT_WATCH_LISTEN", "dog, cat");

    let cfg = WatchConfig::load().expect("load config");

    assert_eq!(cfg.model_path, PathBuf::from("/opt/models/ssd.onnx"));
    assert_eq!(cfg.labels_path, PathBuf::from("/opt/models/labelmap.txt"));
    assert_eq!(cfg.backend, BackendKind::Stub);
    assert_eq!(cfg.camera.device, "stub://bench");
    assert_eq!((cfg.camera.width, cfg.camera.height), (300, 300));
    assert_eq!(cfg.detection.min_score, 0.35);
    assert_eq!(cfg.detection.poll_interval, Duration::from_millis(250));
    assert_eq!(
        cfg.listeners,
        vec![
            ListenerConfig {
                label: "person".to_string(),
                command: Some(vec!["/usr/bin/notify".to_string(), "person".to_string()]),
            },
            ListenerConfig {
                label: "cat".to_string(),
                command: None,
            },
            ListenerConfig {
                label: "dog".to_string(),
                command: None,
            },
        ]
    );

    clear_env();
}

#[test]
fn loads_toml_config() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
backend = "stub"

[camera]
device = "stub://front"

[detection]
min_score = 0.6

[[listeners]]
label = "bird"
"#,
    );

    let cfg = WatchConfig::load_from(file.path()).expect("load toml");
    assert_eq!(cfg.camera.device, "stub://front");
    assert_eq!((cfg.camera.width, cfg.camera.height), (320, 320));
    assert_eq!(cfg.detection.min_score, 0.6);
    assert_eq!(cfg.listeners.len(), 1);
    assert_eq!(cfg.listeners[0].label, "bird");

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OBJECT_WATCH_MIN_SCORE", "2.0");
    assert!(WatchConfig::load().is_err());

    std::env::set_var("OBJECT_WATCH_MIN_SCORE", "high");
    assert!(WatchConfig::load().is_err());
    clear_env();

    std::env::set_var("OBJECT_WATCH_BACKEND", "tflite");
    assert!(WatchConfig::load().is_err());
    clear_env();

    let file = config_file(".json", r#"{ "listeners": [ { "label": " " } ] }"#);
    assert!(WatchConfig::load_from(file.path()).is_err());

    clear_env();
}

#[test]
fn stub_backend_detects_end_to_end() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut labels = NamedTempFile::new().expect("labels");
    labels.write_all(b"person\nbicycle\ncar\n").expect("write labels");
    std::env::set_var("OBJECT_WATCH_LABELS", labels.path());
    std::env::set_var("OBJECT_WATCH_BACKEND", "stub");
    std::env::set_var("OBJECT_WATCH_CAMERA", "stub://camera");

    let cfg = WatchConfig::load().expect("load config");
    let detector = cfg.build_detector().expect("detector");
    assert_eq!(detector.labels().len(), 3);

    let mut source = cfg.open_source().expect("source");
    let frame = source.capture().expect("frame");
    let detections = detector
        .detect(&frame, cfg.detection.min_score)
        .expect("detect");
    assert!(detections.is_empty());

    clear_env();
}

#[test]
fn missing_label_table_aborts_startup() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("OBJECT_WATCH_LABELS", "/nonexistent/labelmap.txt");
    std::env::set_var("OBJECT_WATCH_BACKEND", "stub");
    let cfg = WatchConfig::load().expect("load config");
    let err = cfg.build_detector().err().expect("missing labels");
    assert!(matches!(err, DetectError::Resource(_)));
    assert!(err.is_fatal());

    clear_env();
}

#[cfg(not(feature = "backend-tract"))]
#[test]
fn default_backend_without_tract_feature_names_the_feature() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut labels = NamedTempFile::new().expect("labels");
    labels.write_all(b"person\n").expect("write labels");
    std::env::set_var("OBJECT_WATCH_LABELS", labels.path());

    let cfg = WatchConfig::load().expect("load config");
    assert_eq!(cfg.backend, BackendKind::Tract);
    let err = cfg.build_detector().err().expect("tract unavailable");
    assert!(err.is_fatal());
    assert!(err.to_string().contains("backend-tract"), "{}", err);

    clear_env();
}
