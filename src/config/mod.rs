use crate::models::UserConfig;
use crate::models::config::resolve_path;
use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, Environment, File, FileFormat};
use std::fs;

/// File name of the user settings inside the config directory
pub const USER_CONFIG_FILE: &str = "FaceSort Config.yaml";

/// Prefix of environment variable overrides, e.g. `FACESORT_WORKERS=2`
pub const ENV_PREFIX: &str = "FACESORT";

/// Configuration manager for the user settings file.
///
/// Settings are layered, later sources winning:
/// 1. [`UserConfig::default()`]
/// 2. `FaceSort Config.yaml` in the config directory (optional)
/// 3. `FACESORT_*` environment variables; nested keys use `__`
///    (`FACESORT_CLUSTERING__EPS_SIM=0.6`)
#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_dir: Utf8PathBuf,
    user_config_path: Utf8PathBuf,
}

impl ConfigManager {
    /// Create a new ConfigManager with the specified configuration directory.
    ///
    /// The directory is created if it doesn't exist.
    pub fn new<P: AsRef<Utf8Path>>(config_dir: P) -> Result<Self> {
        let config_dir = config_dir.as_ref().to_path_buf();

        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("Failed to create config directory: {}", config_dir))?;
        }

        Ok(Self {
            user_config_path: config_dir.join(USER_CONFIG_FILE),
            config_dir,
        })
    }

    /// Load the user configuration from file and environment.
    ///
    /// # Returns
    /// The merged UserConfig; defaults if neither source sets anything
    pub fn load_user_config(&self) -> Result<UserConfig> {
        self.load_user_config_from(None)
    }

    /// Like [`load_user_config`](Self::load_user_config), reading overrides from
    /// `env` instead of the process environment when given.
    pub fn load_user_config_from(&self, env: Option<config::Map<String, String>>) -> Result<UserConfig> {
        if self.user_config_path.exists() {
            tracing::info!("Loading user config from {}", self.user_config_path);
        } else {
            tracing::warn!(
                "User config file not found at {}, using defaults",
                self.user_config_path
            );
        }

        let settings = Config::builder()
            .add_source(File::new(self.user_config_path.as_str(), FileFormat::Yaml).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .with_context(|| format!("Failed to read user config: {}", self.user_config_path))?;

        let config: UserConfig = settings
            .try_deserialize()
            .with_context(|| format!("Failed to parse user config: {}", self.user_config_path))?;

        Ok(config)
    }

    /// Save the user configuration file.
    pub fn save_user_config(&self, config: &UserConfig) -> Result<()> {
        let yaml_string =
            serde_yaml_ng::to_string(config).context("Failed to serialize user config to YAML")?;

        fs::write(&self.user_config_path, yaml_string)
            .with_context(|| format!("Failed to write user config: {}", self.user_config_path))?;

        tracing::info!("Saved user config to {}", self.user_config_path);
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }

    pub fn user_config_path(&self) -> &Utf8Path {
        &self.user_config_path
    }

    /// Resolve a path from the config: `~` expands to the home directory and
    /// relative paths are taken from the config directory.
    pub fn resolve(&self, path: &str) -> Result<Utf8PathBuf> {
        resolve_path(path, &self.config_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_config_manager() -> (ConfigManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let config_path = Utf8PathBuf::try_from(temp_dir.path().to_path_buf()).unwrap();
        let manager = ConfigManager::new(&config_path).unwrap();
        (manager, temp_dir)
    }

    fn no_env() -> Option<config::Map<String, String>> {
        Some(config::Map::new())
    }

    #[test]
    fn test_create_config_manager_creates_dir() {
        let temp_dir = TempDir::new().unwrap();
        let nested = Utf8PathBuf::try_from(temp_dir.path().join("FaceSort Data")).unwrap();

        let manager = ConfigManager::new(&nested).unwrap();

        assert!(nested.is_dir());
        assert_eq!(manager.user_config_path(), nested.join(USER_CONFIG_FILE));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        let loaded = manager.load_user_config_from(no_env()).unwrap();
        assert_eq!(loaded, UserConfig::default());
    }

    #[test]
    fn test_load_save_user_config() {
        let (manager, _temp_dir) = create_test_config_manager();

        let mut config = UserConfig::default();
        config.workers = 3;
        config.clustering.eps_sim = 0.6;
        config.results_root = "/srv/faces".to_string();
        manager.save_user_config(&config).unwrap();

        let loaded = manager.load_user_config_from(no_env()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(
            manager.user_config_path(),
            "workers: 2\nclustering:\n  min_face: 80\n",
        )
        .unwrap();

        let loaded = manager.load_user_config_from(no_env()).unwrap();
        assert_eq!(loaded.workers, 2);
        assert_eq!(loaded.clustering.min_face, 80);
        assert_eq!(loaded.clustering.min_samples, 2);
        assert_eq!(loaded.pipeline_timeout_secs, 3600);
    }

    #[test]
    fn test_environment_overrides_file() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(manager.user_config_path(), "workers: 2\n").unwrap();

        let mut env = config::Map::new();
        env.insert("FACESORT_WORKERS".to_string(), "4".to_string());
        env.insert("FACESORT_CLUSTERING__GPU_ID".to_string(), "-1".to_string());
        env.insert("FACESORT_DEBUG_MODE".to_string(), "true".to_string());

        let loaded = manager.load_user_config_from(Some(env)).unwrap();
        assert_eq!(loaded.workers, 4);
        assert_eq!(loaded.clustering.gpu_id, -1);
        assert!(loaded.debug_mode);
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let (manager, _temp_dir) = create_test_config_manager();
        fs::write(manager.user_config_path(), "workers: [unclosed\n").unwrap();

        assert!(manager.load_user_config_from(no_env()).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_resolve_relative_paths() {
        let (manager, _temp_dir) = create_test_config_manager();
        assert_eq!(manager.resolve("logs").unwrap(), manager.config_dir().join("logs"));
        assert_eq!(
            manager.resolve("/var/log/facesort").unwrap(),
            Utf8PathBuf::from("/var/log/facesort")
        );
    }
}
