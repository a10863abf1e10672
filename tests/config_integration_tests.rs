//! Integration tests for ConfigManager and configuration file handling
//!
//! These tests verify:
//! - Default configuration when no file exists
//! - Saving and reloading settings
//! - Hand-written YAML files
//! - Environment overrides
//! - Wiring a loaded configuration into the orchestrator

use camino::Utf8PathBuf;
use facesort::services::CommandPipeline;
use facesort::{ConfigManager, Orchestrator, UserConfig};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;

fn create_test_config_dir() -> (TempDir, Utf8PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
    (temp_dir, config_path)
}

fn no_env() -> Option<config::Map<String, String>> {
    Some(config::Map::new())
}

#[test]
fn test_create_config_manager() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    assert_eq!(manager.config_dir(), &config_path);
    assert_eq!(manager.user_config_path(), config_path.join("FaceSort Config.yaml"));
}

#[test]
fn test_load_default_user_config() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    let user_config = manager.load_user_config_from(no_env()).unwrap();

    assert_eq!(user_config.workers, 1);
    assert_eq!(user_config.pipeline_timeout_secs, 3600);
    assert_eq!(user_config.clustering.eps_sim, 0.55);
    assert_eq!(user_config.clustering.det_size, 640);
    assert!(user_config.results_root.is_empty());
}

#[test]
fn test_save_and_load_user_config() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    let mut user_config = UserConfig::default();
    user_config.workers = 2;
    user_config.temp_root = "/scratch/facesort".to_string();
    user_config.pipeline.program = "/opt/facesort/venv/bin/python".to_string();
    user_config.clustering.blur_thr = 60.0;

    manager.save_user_config(&user_config).unwrap();
    let loaded = manager.load_user_config_from(no_env()).unwrap();

    assert_eq!(loaded.workers, 2);
    assert_eq!(loaded.temp_root, "/scratch/facesort");
    assert_eq!(loaded.pipeline.program, "/opt/facesort/venv/bin/python");
    assert_eq!(loaded.clustering.blur_thr, 60.0);
    assert_eq!(loaded.pipeline.args, UserConfig::default().pipeline.args);
}

#[test]
fn test_hand_written_config() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    let content = r#"
results_root: "D:\\Photos\\Sorted"
pipeline_timeout_secs: 600
dialog_title: "Choose an album"
pipeline:
  program: python
  args: ["router.py", "--in", "{input}", "--out", "{output}"]
clustering:
  eps_sim: 0.5
  gpu_id: -1
"#;
    fs::write(manager.user_config_path(), content).unwrap();

    let loaded = manager.load_user_config_from(no_env()).unwrap();

    assert_eq!(loaded.results_root, "D:\\Photos\\Sorted");
    assert_eq!(loaded.pipeline_timeout_secs, 600);
    assert_eq!(loaded.dialog_title, "Choose an album");
    assert_eq!(loaded.pipeline.program, "python");
    assert_eq!(loaded.pipeline.args.len(), 5);
    assert_eq!(loaded.clustering.eps_sim, 0.5);
    assert_eq!(loaded.clustering.gpu_id, -1);
    assert_eq!(loaded.clustering.min_samples, 2);
    assert_eq!(loaded.workers, 1);
}

#[test]
fn test_environment_overrides() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();
    fs::write(manager.user_config_path(), "workers: 1\npipeline_timeout_secs: 60\n").unwrap();

    let mut env = config::Map::new();
    env.insert("FACESORT_PIPELINE_TIMEOUT_SECS".to_string(), "120".to_string());
    env.insert("FACESORT_CLUSTERING__MIN_FACE".to_string(), "64".to_string());
    env.insert("OTHER_WORKERS".to_string(), "9".to_string());

    let loaded = manager.load_user_config_from(Some(env)).unwrap();

    assert_eq!(loaded.pipeline_timeout_secs, 120);
    assert_eq!(loaded.clustering.min_face, 64);
    assert_eq!(loaded.workers, 1);
}

#[tokio::test]
async fn test_loaded_config_drives_orchestrator() {
    let (_temp_dir, config_path) = create_test_config_dir();
    let manager = ConfigManager::new(&config_path).unwrap();

    let mut user_config = UserConfig::default();
    user_config.temp_root = config_path.join("tmp").to_string();
    user_config.results_root = config_path.join("results").to_string();
    user_config.workers = 3;
    manager.save_user_config(&user_config).unwrap();

    let loaded = manager.load_user_config_from(no_env()).unwrap();
    let pipeline = Arc::new(CommandPipeline::from_config(&loaded));
    let orchestrator = Orchestrator::new(loaded, manager.config_dir(), pipeline).unwrap();

    assert_eq!(orchestrator.lifecycle().temp_root(), config_path.join("tmp"));
    assert_eq!(orchestrator.lifecycle().results_root(), config_path.join("results"));
    assert_eq!(orchestrator.config().worker_count(), 3);

    orchestrator.start().unwrap();
    orchestrator.finish().await;
}
