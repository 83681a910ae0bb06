//! Configuration loader with multi-source merging.

use crate::{Paths, WardenConfig};
use anyhow::{Context, Result};
use std::env;
use std::path::{Path, PathBuf};

/// Configuration loader with builder pattern.
pub struct ConfigLoader {
    project_dir: PathBuf,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default deployment directory (current dir).
    pub fn new() -> Self {
        Self {
            project_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            env_prefix: "WARDEN".to_string(),
        }
    }

    /// Set the deployment directory.
    pub fn with_project_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.project_dir = dir.as_ref().to_path_buf();
        self
    }

    /// Set the environment variable prefix (default: "WARDEN").
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Load configuration from all sources with proper precedence:
    /// built-in defaults, user config, deployment config, local overrides,
    /// environment variables.
    pub fn load(self) -> Result<WardenConfig> {
        let mut builder = config::Config::builder();

        let defaults = WardenConfig::default();
        builder = builder.add_source(config::Config::try_from(&defaults)?);

        let paths = Paths::new();
        if let Ok(user_config_file) = paths.user_config_file() {
            if user_config_file.exists() {
                builder = builder.add_source(
                    config::File::from(user_config_file)
                        .required(false)
                        .format(config::FileFormat::Toml),
                );
            }
        }

        let project_config_file = Paths::project_config_file(&self.project_dir);
        if project_config_file.exists() {
            builder = builder.add_source(
                config::File::from(project_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        let local_config_file = Paths::local_config_file(&self.project_dir);
        if local_config_file.exists() {
            builder = builder.add_source(
                config::File::from(local_config_file)
                    .required(false)
                    .format(config::FileFormat::Toml),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(&self.env_prefix)
                .separator("_")
                .try_parsing(true),
        );

        let built = builder.build().context("failed to build configuration")?;

        let mut warden_config: WardenConfig = built
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        warden_config.resolve_paths(&self.project_dir);
        warden_config
            .validate()
            .map_err(|e| anyhow::anyhow!("{e}"))?;

        Ok(warden_config)
    }

    /// Load configuration, falling back to defaults on any error. Useful
    /// for `warden-cli`'s local-simulation mode, never for a deployed replica.
    pub fn load_or_default(self) -> WardenConfig {
        self.load().unwrap_or_default()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_defaults() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let config = ConfigLoader::new()
            .with_project_dir(temp_dir.path())
            .load()
            .expect("failed to load config");

        assert_eq!(config.fault_tolerance.f, 1);
        assert_eq!(config.fault_tolerance.k, 0);
        assert_eq!(config.fault_tolerance.num_replicas(), 4);
    }

    #[test]
    fn test_load_deployment_config() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_content = r#"
[identity]
replica_id = 2
site = 1

[fault_tolerance]
f = 2
k = 1
"#;
        fs::write(project_dir.join("warden.toml"), config_content).expect("failed to write config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .load()
            .expect("failed to load config");

        assert_eq!(config.identity.replica_id.as_u32(), 2);
        assert_eq!(config.fault_tolerance.f, 2);
        assert_eq!(config.fault_tolerance.k, 1);
        assert_eq!(config.fault_tolerance.num_replicas(), 9);
    }

    #[test]
    fn test_local_overrides() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let project_dir = temp_dir.path();

        fs::write(
            project_dir.join("warden.toml"),
            "[fault_tolerance]\nf = 1\nk = 0\n",
        )
        .expect("failed to write deployment config");

        fs::write(
            project_dir.join("warden.local.toml"),
            "[fault_tolerance]\nf = 1\nk = 2\n",
        )
        .expect("failed to write local config");

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .load()
            .expect("failed to load config");

        assert_eq!(config.fault_tolerance.k, 2, "local config should override deployment config");
    }

    #[test]
    fn test_path_resolution() {
        let temp_dir = tempdir().expect("failed to create temp dir");
        let project_dir = temp_dir.path();

        let config = ConfigLoader::new()
            .with_project_dir(project_dir)
            .load()
            .expect("failed to load config");

        assert!(config.storage.data_dir.is_absolute());
    }
}
