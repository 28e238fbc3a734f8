//! Repository configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policy::{HostPolicy, RefFilter, RepositoryPolicy, SelectorPolicy, TrustPolicy};
use crate::error::ConfigError;

/// Identity and policy of one mirrored repository.
///
/// Field names follow the configuration file format. Values are immutable
/// once a mirror is created from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Unique key. Usually filled from the key of the `repositories` map.
    #[serde(default)]
    name: String,

    /// Origin clone URL.
    #[serde(alias = "uri")]
    url: String,

    /// Refresh interval in seconds; 0 disables automatic refresh.
    #[serde(default, alias = "refresh_interval")]
    update_frequency: u64,

    /// Whether clients may request an immediate refresh.
    #[serde(default)]
    enable_update_api: bool,

    #[serde(default = "default_true")]
    enable_semvers_tags: bool,

    #[serde(default = "default_true")]
    enable_tags: bool,

    #[serde(default = "default_true")]
    enable_commits: bool,

    /// Glob patterns of references that may be served.
    #[serde(default)]
    whitelist_refs: Vec<String>,

    /// Glob patterns of references that may never be served.
    #[serde(default)]
    blacklist_refs: Vec<String>,

    /// CIDR ranges the origin host must resolve within.
    #[serde(default)]
    allow_hosts: Vec<String>,

    #[serde(default)]
    gpg_verify_commit: bool,

    #[serde(default)]
    gpg_verify_tag: bool,

    #[serde(default)]
    gpg_allow_ids: Vec<String>,
}

fn default_true() -> bool {
    true
}

impl RepositoryConfig {
    /// Creates a new builder for RepositoryConfig.
    pub fn builder() -> RepositoryConfigBuilder {
        RepositoryConfigBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Returns the refresh interval, or `None` when refresh is disabled.
    pub fn refresh_interval(&self) -> Option<Duration> {
        (self.update_frequency > 0).then(|| Duration::from_secs(self.update_frequency))
    }

    pub fn update_api_enabled(&self) -> bool {
        self.enable_update_api
    }

    pub fn ref_allow_list(&self) -> &[String] {
        &self.whitelist_refs
    }

    pub fn ref_deny_list(&self) -> &[String] {
        &self.blacklist_refs
    }

    pub fn allowed_networks(&self) -> &[String] {
        &self.allow_hosts
    }

    /// Returns a copy named `name`, for entries keyed by name in a map.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Checks required fields and the repository name.
    ///
    /// Names are used as directory names, so only ASCII letters, digits,
    /// `-`, `_` and `.` are accepted, and a leading `.` is not.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::MissingField("name"));
        }
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingField("url"));
        }

        let valid_chars = self
            .name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !valid_chars || self.name.starts_with('.') {
            return Err(ConfigError::InvalidName(self.name.clone()));
        }

        Ok(())
    }

    /// Validates the configuration and compiles its policy.
    pub fn compile(&self) -> Result<RepositoryPolicy, ConfigError> {
        self.validate()?;

        Ok(RepositoryPolicy {
            selectors: SelectorPolicy::new(
                self.enable_semvers_tags,
                self.enable_commits,
                self.enable_tags,
            ),
            refs: RefFilter::new(&self.whitelist_refs, &self.blacklist_refs)?,
            hosts: HostPolicy::new(&self.allow_hosts)?,
            trust: TrustPolicy::new(
                self.gpg_verify_commit,
                self.gpg_verify_tag,
                &self.gpg_allow_ids,
            )?,
            update_api: self.enable_update_api,
        })
    }
}

/// Builder for RepositoryConfig.
#[derive(Debug)]
pub struct RepositoryConfigBuilder {
    name: Option<String>,
    url: Option<String>,
    refresh_interval: Option<Duration>,
    update_api: bool,
    semver_tags: bool,
    tags: bool,
    commits: bool,
    allow_refs: Vec<String>,
    deny_refs: Vec<String>,
    allow_hosts: Vec<String>,
    verify_commits: bool,
    verify_tags: bool,
    signer_key_ids: Vec<String>,
}

impl Default for RepositoryConfigBuilder {
    fn default() -> Self {
        Self {
            name: None,
            url: None,
            refresh_interval: None,
            update_api: false,
            semver_tags: true,
            tags: true,
            commits: true,
            allow_refs: Vec::new(),
            deny_refs: Vec::new(),
            allow_hosts: Vec::new(),
            verify_commits: false,
            verify_tags: false,
            signer_key_ids: Vec::new(),
        }
    }
}

impl RepositoryConfigBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Sets the refresh interval, truncated to whole seconds.
    pub fn refresh_interval(mut self, interval: Duration) -> Self {
        self.refresh_interval = Some(interval);
        self
    }

    pub fn update_api(mut self, enabled: bool) -> Self {
        self.update_api = enabled;
        self
    }

    pub fn semver_tags(mut self, enabled: bool) -> Self {
        self.semver_tags = enabled;
        self
    }

    /// Enables or disables branch and tag name selectors.
    pub fn tags(mut self, enabled: bool) -> Self {
        self.tags = enabled;
        self
    }

    pub fn commits(mut self, enabled: bool) -> Self {
        self.commits = enabled;
        self
    }

    pub fn allow_ref(mut self, pattern: impl Into<String>) -> Self {
        self.allow_refs.push(pattern.into());
        self
    }

    pub fn deny_ref(mut self, pattern: impl Into<String>) -> Self {
        self.deny_refs.push(pattern.into());
        self
    }

    pub fn allow_host(mut self, network: impl Into<String>) -> Self {
        self.allow_hosts.push(network.into());
        self
    }

    pub fn verify_commits(mut self, verify: bool) -> Self {
        self.verify_commits = verify;
        self
    }

    pub fn verify_tags(mut self, verify: bool) -> Self {
        self.verify_tags = verify;
        self
    }

    pub fn signer_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.signer_key_ids.push(key_id.into());
        self
    }

    /// Builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if required fields are missing or the name is invalid.
    pub fn build(self) -> Result<RepositoryConfig, ConfigError> {
        let name = self.name.ok_or(ConfigError::MissingField("name"))?;
        let url = self.url.ok_or(ConfigError::MissingField("url"))?;

        let config = RepositoryConfig {
            name,
            url,
            update_frequency: self.refresh_interval.map_or(0, |d| d.as_secs()),
            enable_update_api: self.update_api,
            enable_semvers_tags: self.semver_tags,
            enable_tags: self.tags,
            enable_commits: self.commits,
            whitelist_refs: self.allow_refs,
            blacklist_refs: self.deny_refs,
            allow_hosts: self.allow_hosts,
            gpg_verify_commit: self.verify_commits,
            gpg_verify_tag: self.verify_tags,
            gpg_allow_ids: self.signer_key_ids,
        };
        config.validate()?;

        Ok(config)
    }
}
