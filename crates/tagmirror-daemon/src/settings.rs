//! Daemon settings.
//!
//! Loaded from an optional YAML, TOML or JSON file and overridden by
//! `TAGMIRROR_`-prefixed environment variables, with `__` separating nested
//! keys (`TAGMIRROR_SYNC__WORKERS=8`).

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use tagmirror_git::{RepositoryConfig, RepositoryRegistry, ResolverOptions, SyncConfig};

const ENV_PREFIX: &str = "TAGMIRROR";

/// Errors from loading or validating settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    #[error("repository {name}: {source}")]
    Repository {
        name: String,
        #[source]
        source: tagmirror_git::ConfigError,
    },

    #[error("invalid sync settings: {0}")]
    Sync(#[source] tagmirror_git::ConfigError),

    #[error("no repositories configured")]
    NoRepositories,
}

/// Top-level daemon configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory holding one bare mirror per repository.
    pub mirror_root: PathBuf,

    /// Address for the Prometheus scrape endpoint. Disabled when unset.
    pub metrics_addr: Option<SocketAddr>,

    pub sync: SyncConfig,

    pub resolver: ResolverOptions,

    /// Repositories keyed by name.
    pub repositories: BTreeMap<String, RepositoryConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mirror_root: PathBuf::from("/var/lib/tagmirror"),
            metrics_addr: None,
            sync: SyncConfig::default(),
            resolver: ResolverOptions::default(),
            repositories: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Loads settings from `path` (if given) and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        Self::from_config(builder)
    }

    /// Parses settings from an in-memory document, still honouring the
    /// environment.
    pub fn parse(contents: &str, format: FileFormat) -> Result<Self, SettingsError> {
        Self::from_config(Config::builder().add_source(File::from_str(contents, format)))
    }

    fn from_config(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
    ) -> Result<Self, SettingsError> {
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize::<Self>()?;

        settings.sync.validate().map_err(SettingsError::Sync)?;
        Ok(settings)
    }

    /// The configured repositories, named after their keys and validated.
    pub fn repository_configs(&self) -> Result<Vec<RepositoryConfig>, SettingsError> {
        self.repositories
            .iter()
            .map(|(name, config)| {
                let config = config.clone().with_name(name);
                config
                    .compile()
                    .map(|_| config)
                    .map_err(|source| SettingsError::Repository {
                        name: name.clone(),
                        source,
                    })
            })
            .collect()
    }

    /// Builds the registry for every configured repository.
    pub fn build_registry(&self) -> Result<RepositoryRegistry, SettingsError> {
        let configs = self.repository_configs()?;
        if configs.is_empty() {
            return Err(SettingsError::NoRepositories);
        }

        let registry = RepositoryRegistry::new(&self.mirror_root);
        for config in configs {
            let name = config.name().to_string();
            registry
                .register(config)
                .map_err(|source| SettingsError::Repository { name, source })?;
        }

        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const YAML: &str = r#"
mirror_root: /srv/mirrors
metrics_addr: "127.0.0.1:9100"
sync:
  workers: 2
  fetch_timeout: 30
repositories:
  app-config:
    url: https://git.example.com/org/app-config.git
    update_frequency: 300
    enable_commits: false
    blacklist_refs: ["wip/*"]
  shared:
    url: https://git.example.com/org/shared.git
    allow_hosts: ["10.0.0.0/8"]
"#;

    #[test]
    fn test_parse_yaml() {
        let settings = Settings::parse(YAML, FileFormat::Yaml).unwrap();

        assert_eq!(settings.mirror_root, PathBuf::from("/srv/mirrors"));
        assert_eq!(settings.metrics_addr, Some("127.0.0.1:9100".parse().unwrap()));
        assert_eq!(settings.sync.workers, 2);
        assert_eq!(settings.sync.fetch_timeout, Duration::from_secs(30));
        assert_eq!(settings.sync.clone_timeout, Duration::from_secs(300));
        assert_eq!(settings.repositories.len(), 2);
    }

    #[test]
    fn test_repository_names_from_keys() {
        let settings = Settings::parse(YAML, FileFormat::Yaml).unwrap();
        let configs = settings.repository_configs().unwrap();

        assert_eq!(configs[0].name(), "app-config");
        assert_eq!(configs[0].refresh_interval(), Some(Duration::from_secs(300)));
        assert_eq!(configs[0].ref_deny_list(), ["wip/*".to_string()]);
        assert_eq!(configs[1].name(), "shared");
        assert_eq!(configs[1].refresh_interval(), None);
    }

    #[test]
    fn test_build_registry() {
        let settings = Settings::parse(YAML, FileFormat::Yaml).unwrap();
        let registry = settings.build_registry().unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get("shared").unwrap().path(),
            Path::new("/srv/mirrors/shared.git")
        );
    }

    #[test]
    fn test_invalid_repository_reported_by_name() {
        let yaml = r#"
repositories:
  broken:
    url: https://git.example.com/broken.git
    allow_hosts: ["not-a-network"]
"#;
        let settings = Settings::parse(yaml, FileFormat::Yaml).unwrap();
        let err = settings.build_registry().unwrap_err();

        assert!(matches!(err, SettingsError::Repository { ref name, .. } if name == "broken"));
    }

    #[test]
    fn test_zero_durations_rejected() {
        for field in ["retry_interval", "clone_timeout", "fetch_timeout"] {
            let yaml = format!("sync:\n  {}: 0\n", field);
            let err = Settings::parse(&yaml, FileFormat::Yaml).unwrap_err();
            assert!(matches!(err, SettingsError::Sync(_)), "{}", field);
            assert!(err.to_string().contains(field));
        }

        let err = Settings::parse("sync:\n  workers: 0\n", FileFormat::Yaml).unwrap_err();
        assert!(matches!(err, SettingsError::Sync(_)));
    }

    #[test]
    fn test_empty_settings() {
        let settings = Settings::parse("{}", FileFormat::Json).unwrap();
        assert_eq!(settings.mirror_root, PathBuf::from("/var/lib/tagmirror"));
        assert!(settings.metrics_addr.is_none());
        assert!(matches!(
            settings.build_registry(),
            Err(SettingsError::NoRepositories)
        ));
    }
}
