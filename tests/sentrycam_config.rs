use std::sync::Mutex;

use tempfile::NamedTempFile;

use sentrycam::SentrycamConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "SENTRYCAM_CONFIG",
        "SENTRYCAM_CAMERA_ID",
        "SENTRYCAM_CAMERA_DEVICE",
        "SENTRYCAM_SAVEDIR",
        "SENTRYCAM_OBJECT_STORE_ENDPOINT",
        "SENTRYCAM_OBJECT_ACCESS_KEY",
        "SENTRYCAM_OBJECT_SECRET_KEY",
        "SENTRYCAM_MQTT_HOST",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn loads_config_from_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        camera_id = "house/front"

        [camera]
        device = "stub://front"
        resolution = "1080p"
        time_delay = 0.5

        [motion]
        minsize = 200

        [motion.ignore]
        flag = [5, 5, 30, 60]

        [local]
        enabled = true
        num_workers = 2
        savedir = "/tmp/sentrycam-from-file"

        [mqtt]
        enabled = true
        host = "broker.lan"
        topic = "cams"
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");

    std::env::set_var("SENTRYCAM_CONFIG", file.path());
    std::env::set_var("SENTRYCAM_CAMERA_ID", "house/rear");
    std::env::set_var("SENTRYCAM_SAVEDIR", "/tmp/sentrycam-from-env");
    std::env::set_var("SENTRYCAM_MQTT_HOST", "other-broker.lan");

    let cfg = SentrycamConfig::load(None).expect("load config");

    assert_eq!(cfg.camera_id, "house/rear");
    assert_eq!(cfg.camera.camera.device, "stub://front");
    assert_eq!(cfg.camera.camera.resolution.to_string(), "1080p");
    assert_eq!(cfg.motion.minsize, 200);
    assert_eq!(cfg.motion.ignore.len(), 1);
    assert!(cfg.local.enabled);
    assert_eq!(cfg.local.num_workers, 2);
    assert_eq!(cfg.local.savedir.to_str().unwrap(), "/tmp/sentrycam-from-env");
    assert!(cfg.mqtt.enabled);
    assert_eq!(cfg.mqtt.host, "other-broker.lan");
    assert_eq!(cfg.mqtt.topic, "cams");

    clear_env();
}

#[test]
fn explicit_path_wins_over_env_path() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut env_file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut env_file, b"camera_id = \"from/env\"\n")
        .expect("write config");
    let mut arg_file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut arg_file, b"camera_id = \"from/arg\"\n")
        .expect("write config");

    std::env::set_var("SENTRYCAM_CONFIG", env_file.path());
    let cfg = SentrycamConfig::load(Some(arg_file.path())).expect("load config");
    assert_eq!(cfg.camera_id, "from/arg");

    clear_env();
}

#[test]
fn missing_file_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let err = SentrycamConfig::load(Some(std::path::Path::new("/nonexistent/sentrycam.toml")));
    assert!(err.is_err());
}

#[test]
fn invalid_toml_is_an_error() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    std::io::Write::write_all(&mut file, b"[camera\ndevice = ").expect("write config");
    assert!(SentrycamConfig::load(Some(file.path())).is_err());
}

#[test]
fn enabled_backend_with_missing_fields_fails_validation() {
    let _guard = ENV_LOCK.lock().unwrap();
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let toml = r#"
        [object_store]
        enabled = true
    "#;
    std::io::Write::write_all(&mut file, toml.as_bytes()).expect("write config");
    assert!(SentrycamConfig::load(Some(file.path())).is_err());
}
