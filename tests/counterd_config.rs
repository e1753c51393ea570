use std::sync::Mutex;

use tempfile::NamedTempFile;

use crossing_kernel::config::CounterdConfig;
use crossing_kernel::UnmappedPolicy;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "COUNTER_CONFIG",
        "COUNTER_SOURCE_URL",
        "COUNTER_LINE_FRACTION",
        "COUNTER_MARGIN_PX",
        "COUNTER_STALE_AFTER_FRAMES",
        "COUNTER_CONFIDENCE",
        "COUNTER_DATA_DIR",
        "COUNTER_SNAPSHOT_SECS",
        "COUNTER_LOCATION",
        "COUNTER_LATITUDE",
        "COUNTER_LONGITUDE",
        "COUNTER_ALERT_CATEGORIES",
    ] {
        std::env::remove_var(key);
    }
}

fn config_file(suffix: &str, body: &str) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, body.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let cfg = CounterdConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://camera");
    assert_eq!(cfg.source.width, 640);
    assert_eq!(cfg.source.height, 480);
    assert_eq!(cfg.source.target_fps, 30);
    assert_eq!(cfg.line.fraction, 0.5);
    assert_eq!(cfg.line.margin_px, 30.0);
    assert_eq!(cfg.line.stale_after_frames, 30);
    assert_eq!(cfg.snapshot_interval.as_secs(), 300);
    assert_eq!(cfg.unmapped, UnmappedPolicy::Bucket);
    assert_eq!(
        cfg.alert_categories,
        vec!["wheelchair".to_string(), "reduced_mobility".to_string()]
    );
    assert!(cfg.location.name.is_none());
    let map = cfg.category_map().expect("category map");
    assert_eq!(map.resolve("person"), Some("adult"));
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{
            "source": { "url": "stub://gate", "width": 800, "height": 600, "target_fps": 12 },
            "line": { "fraction": 0.4, "margin_px": 20, "stale_after_frames": 45, "confidence": 0.6 },
            "categories": [
                { "name": "adult", "display_name": "Adults", "aliases": ["person"] },
                { "name": "bicycle", "aliases": ["bike"] }
            ],
            "unmapped": "drop",
            "snapshots": { "interval_secs": 60 },
            "storage": { "data_dir": "/tmp/counts" },
            "location": { "name": "North Gate", "latitude": 40.4165, "longitude": -3.7026 },
            "alerts": { "categories": ["bicycle"] }
        }"#,
    );

    std::env::set_var("COUNTER_CONFIG", file.path());
    std::env::set_var("COUNTER_LINE_FRACTION", "0.65");
    std::env::set_var("COUNTER_SNAPSHOT_SECS", "120");
    std::env::set_var("COUNTER_ALERT_CATEGORIES", "adult, bicycle");
    std::env::set_var("COUNTER_LOCATION", "  ");

    let cfg = CounterdConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://gate");
    assert_eq!(cfg.source.width, 800);
    assert_eq!(cfg.source.target_fps, 12);
    assert_eq!(cfg.line.fraction, 0.65);
    assert_eq!(cfg.line.margin_px, 20.0);
    assert_eq!(cfg.line.stale_after_frames, 45);
    assert_eq!(cfg.line.confidence, 0.6);
    assert_eq!(cfg.unmapped, UnmappedPolicy::Drop);
    assert_eq!(cfg.snapshot_interval.as_secs(), 120);
    assert_eq!(cfg.data_dir, std::path::PathBuf::from("/tmp/counts"));
    // Blank env values do not override.
    assert_eq!(cfg.location.name.as_deref(), Some("North Gate"));
    assert_eq!(cfg.location.longitude, Some(-3.7026));
    assert_eq!(cfg.alert_categories, vec!["adult", "bicycle"]);
    assert_eq!(cfg.category_names(), vec!["adult", "bicycle"]);

    let engine = cfg.engine_config().expect("engine config");
    assert_eq!(engine.categories.resolve("bike"), Some("bicycle"));
    assert_eq!(engine.unmapped, UnmappedPolicy::Drop);
    let settings = cfg.line_settings();
    assert_eq!(settings.line_fraction(), 0.65);
    assert_eq!(settings.confidence(), 0.6);

    clear_env();
}

#[test]
fn loads_toml_file() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".toml",
        r#"
unmapped = "bucket"

[source]
url = "stub://toml"

[line]
margin_px = 12.5

[location]
latitude = -33.45
longitude = -70.66
"#,
    );
    std::env::set_var("COUNTER_CONFIG", file.path());
    std::env::set_var("COUNTER_LOCATION", "Plaza");

    let cfg = CounterdConfig::load().expect("load config");
    assert_eq!(cfg.source.url, "stub://toml");
    assert_eq!(cfg.line.margin_px, 12.5);
    assert_eq!(cfg.location.latitude, Some(-33.45));
    assert_eq!(cfg.location.name.as_deref(), Some("Plaza"));

    clear_env();
}

#[test]
fn rejects_out_of_range_values() {
    let _guard = ENV_LOCK.lock().unwrap();

    for (key, value) in [
        ("COUNTER_LINE_FRACTION", "1.5"),
        ("COUNTER_MARGIN_PX", "0"),
        ("COUNTER_STALE_AFTER_FRAMES", "0"),
        ("COUNTER_SNAPSHOT_SECS", "0"),
        ("COUNTER_CONFIDENCE", "-0.1"),
        ("COUNTER_LATITUDE", "north"),
        ("COUNTER_STALE_AFTER_FRAMES", "soon"),
    ] {
        clear_env();
        std::env::set_var(key, value);
        assert!(
            CounterdConfig::load().is_err(),
            "{}={} should be rejected",
            key,
            value
        );
    }
    clear_env();
}

#[test]
fn padded_category_names_are_trimmed() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{ "categories": [ { "name": " adult ", "aliases": ["person "] } ] }"#,
    );
    std::env::set_var("COUNTER_CONFIG", file.path());
    let cfg = CounterdConfig::load().expect("load config");
    assert_eq!(cfg.category_names(), vec!["adult"]);
    let map = cfg.category_map().expect("category map");
    assert_eq!(map.resolve("person"), Some("adult"));

    clear_env();
}

#[test]
fn rejects_bad_category_set() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let file = config_file(
        ".json",
        r#"{ "categories": [
            { "name": "adult", "aliases": ["person"] },
            { "name": "child", "aliases": ["person"] }
        ] }"#,
    );
    std::env::set_var("COUNTER_CONFIG", file.path());
    assert!(CounterdConfig::load().is_err());

    clear_env();
}

#[test]
fn missing_config_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    std::env::set_var("COUNTER_CONFIG", "/nonexistent/counterd.json");
    assert!(CounterdConfig::load().is_err());

    clear_env();
}
