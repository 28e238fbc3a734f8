//! Per-repository policies compiled from configuration.

use std::net::IpAddr;

use glob::Pattern;
use ipnet::IpNet;
use tracing::debug;

use crate::error::{ConfigError, SyncError};
use crate::selector::SelectorKind;

/// Which selector kinds a repository accepts. Everything is enabled by
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorPolicy {
    semver: bool,
    commits: bool,
    references: bool,
}

impl SelectorPolicy {
    pub fn new(semver: bool, commits: bool, references: bool) -> Self {
        Self {
            semver,
            commits,
            references,
        }
    }

    pub fn allows(&self, kind: SelectorKind) -> bool {
        match kind {
            SelectorKind::Semver => self.semver,
            SelectorKind::Commit => self.commits,
            SelectorKind::Reference => self.references,
        }
    }
}

impl Default for SelectorPolicy {
    fn default() -> Self {
        Self::new(true, true, true)
    }
}

/// Strips the namespace from a reference name: `refs/tags/v1` is `v1`,
/// `refs/remotes/origin/main` is `main`.
pub fn short_ref_name(name: &str) -> &str {
    const PREFIXES: [&str; 5] = [
        "refs/tags/",
        "refs/heads/",
        "refs/remotes/origin/",
        "refs/remotes/",
        "refs/",
    ];

    PREFIXES
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name)
}

/// Allow and deny lists of glob patterns over reference names.
///
/// A name is tested in its raw and short forms. Deny wins over allow, and an
/// empty allow list admits everything not denied.
#[derive(Debug, Clone, Default)]
pub struct RefFilter {
    allow: Vec<Pattern>,
    deny: Vec<Pattern>,
}

impl RefFilter {
    pub fn new<S: AsRef<str>>(allow: &[S], deny: &[S]) -> Result<Self, ConfigError> {
        Ok(Self {
            allow: compile_patterns(allow)?,
            deny: compile_patterns(deny)?,
        })
    }

    pub fn is_unrestricted(&self) -> bool {
        self.allow.is_empty() && self.deny.is_empty()
    }

    pub fn is_allowed(&self, name: &str) -> bool {
        self.is_allowed_as(&[name])
    }

    /// Tests one reference known under several names. Any denied name
    /// rejects it; any allowed name admits it.
    pub fn is_allowed_as(&self, names: &[&str]) -> bool {
        let hit = |patterns: &[Pattern]| {
            names.iter().any(|name| {
                let short = short_ref_name(name);
                patterns.iter().any(|p| p.matches(name) || p.matches(short))
            })
        };

        if hit(&self.deny) {
            return false;
        }
        self.allow.is_empty() || hit(&self.allow)
    }
}

fn compile_patterns<S: AsRef<str>>(patterns: &[S]) -> Result<Vec<Pattern>, ConfigError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p.as_ref()).map_err(|e| ConfigError::InvalidPattern {
                pattern: p.as_ref().to_string(),
                reason: e.msg.to_string(),
            })
        })
        .collect()
}

/// Networks the origin host must resolve into.
#[derive(Debug, Clone, Default)]
pub struct HostPolicy {
    networks: Vec<IpNet>,
}

impl HostPolicy {
    /// Parses CIDR ranges; a bare address is a single-host range.
    pub fn new<S: AsRef<str>>(networks: &[S]) -> Result<Self, ConfigError> {
        let networks = networks
            .iter()
            .map(|raw| {
                let raw = raw.as_ref().trim();
                raw.parse::<IpNet>()
                    .or_else(|_| raw.parse::<IpAddr>().map(IpNet::from))
                    .map_err(|e| ConfigError::InvalidNetwork {
                        network: raw.to_string(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { networks })
    }

    pub fn is_unrestricted(&self) -> bool {
        self.networks.is_empty()
    }

    pub fn permits(&self, addr: IpAddr) -> bool {
        self.networks.iter().any(|network| network.contains(&addr))
    }

    /// Resolves the host of `url` and checks every address it maps to.
    pub async fn check(&self, url: &str) -> Result<(), SyncError> {
        if self.is_unrestricted() {
            return Ok(());
        }

        let Some((host, port)) = origin_host(url) else {
            return Err(SyncError::HostNotAllowed {
                host: url.to_string(),
                reason: "origin URL has no host".to_string(),
            });
        };

        let addrs: Vec<IpAddr> = match host.parse::<IpAddr>() {
            Ok(addr) => vec![addr],
            Err(_) => tokio::net::lookup_host((host.as_str(), port))
                .await
                .map_err(|e| SyncError::NetworkFailure(format!("resolving {}: {}", host, e)))?
                .map(|socket| socket.ip())
                .collect(),
        };

        if addrs.is_empty() {
            return Err(SyncError::NetworkFailure(format!(
                "{} resolved to no addresses",
                host
            )));
        }

        if let Some(outside) = addrs.iter().find(|addr| !self.permits(**addr)) {
            return Err(SyncError::HostNotAllowed {
                host,
                reason: format!("{} is outside the allowed networks", outside),
            });
        }

        debug!(host = %host, addresses = addrs.len(), "Origin host allowed");
        Ok(())
    }
}

/// Extracts host and port from a clone URL, defaulting the port by scheme.
fn origin_host(url: &str) -> Option<(String, u16)> {
    let parsed = gix::url::parse(url.into()).ok()?;
    let host = parsed.host()?.trim_matches(['[', ']']).to_string();
    if host.is_empty() {
        return None;
    }
    let port = parsed.port_or_default().unwrap_or(443);
    Some((host, port))
}

/// Signature requirements for resolved objects.
#[derive(Debug, Clone, Default)]
pub struct TrustPolicy {
    verify_commits: bool,
    verify_tags: bool,
    signer_key_ids: Vec<String>,
}

impl TrustPolicy {
    /// Key ids are hex, 8 to 40 digits, optionally prefixed with `0x`.
    pub fn new<S: AsRef<str>>(
        verify_commits: bool,
        verify_tags: bool,
        signer_key_ids: &[S],
    ) -> Result<Self, ConfigError> {
        let signer_key_ids = signer_key_ids
            .iter()
            .map(|raw| {
                let raw = raw.as_ref().trim();
                let hex = raw
                    .strip_prefix("0x")
                    .or_else(|| raw.strip_prefix("0X"))
                    .unwrap_or(raw);
                if (8..=40).contains(&hex.len()) && hex.bytes().all(|b| b.is_ascii_hexdigit()) {
                    Ok(hex.to_ascii_uppercase())
                } else {
                    Err(ConfigError::InvalidKeyId(raw.to_string()))
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            verify_commits,
            verify_tags,
            signer_key_ids,
        })
    }

    pub fn verify_commits(&self) -> bool {
        self.verify_commits
    }

    pub fn verify_tags(&self) -> bool {
        self.verify_tags
    }

    pub fn signer_key_ids(&self) -> &[String] {
        &self.signer_key_ids
    }

    pub fn is_enforced(&self) -> bool {
        self.verify_commits || self.verify_tags
    }
}

/// Everything a repository's configuration says about what may be served
/// and where it may come from.
#[derive(Debug, Clone, Default)]
pub struct RepositoryPolicy {
    pub selectors: SelectorPolicy,
    pub refs: RefFilter,
    pub hosts: HostPolicy,
    pub trust: TrustPolicy,
    pub update_api: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selector_policy() {
        let policy = SelectorPolicy::new(true, false, true);
        assert!(policy.allows(SelectorKind::Semver));
        assert!(!policy.allows(SelectorKind::Commit));
        assert!(policy.allows(SelectorKind::Reference));
        assert!(SelectorPolicy::default().allows(SelectorKind::Commit));
    }

    #[test]
    fn test_short_ref_name() {
        assert_eq!(short_ref_name("refs/tags/v1.0.0"), "v1.0.0");
        assert_eq!(short_ref_name("refs/heads/main"), "main");
        assert_eq!(short_ref_name("refs/remotes/origin/feature/x"), "feature/x");
        assert_eq!(short_ref_name("refs/remotes/upstream/main"), "upstream/main");
        assert_eq!(short_ref_name("main"), "main");
    }

    #[test]
    fn test_ref_filter_empty_allows_all() {
        let filter = RefFilter::default();
        assert!(filter.is_unrestricted());
        assert!(filter.is_allowed("anything"));
    }

    #[test]
    fn test_ref_filter_allow_list() {
        let filter = RefFilter::new(&["v*", "release/*"], &[]).unwrap();
        assert!(filter.is_allowed("refs/tags/v1.0.0"));
        assert!(filter.is_allowed("v2"));
        assert!(filter.is_allowed("release/2024"));
        assert!(filter.is_allowed("refs/heads/release/2024"));
        assert!(!filter.is_allowed("master"));
    }

    #[test]
    fn test_ref_filter_deny_wins() {
        let filter = RefFilter::new(&["v*"], &["*-rc*"]).unwrap();
        assert!(filter.is_allowed("v1.0.0"));
        assert!(!filter.is_allowed("v1.0.0-rc.1"));
        assert!(!filter.is_allowed("refs/tags/v1.0.0-rc.1"));

        let deny_only = RefFilter::new(&[] as &[&str], &["secret*"]).unwrap();
        assert!(deny_only.is_allowed("main"));
        assert!(!deny_only.is_allowed("refs/heads/secret-branch"));
    }

    #[test]
    fn test_ref_filter_several_names() {
        let filter = RefFilter::new(&["refs/tags/*"], &["origin/wip"]).unwrap();
        assert!(filter.is_allowed_as(&["release", "refs/tags/release"]));
        assert!(!filter.is_allowed_as(&["master", "refs/heads/master"]));
        assert!(!filter.is_allowed_as(&["origin/wip", "refs/tags/origin/wip"]));
    }

    #[test]
    fn test_ref_filter_invalid_pattern() {
        let result = RefFilter::new(&["[unclosed"], &[]);
        assert!(matches!(result, Err(ConfigError::InvalidPattern { .. })));
    }

    #[test]
    fn test_host_policy_parse() {
        let policy = HostPolicy::new(&["10.0.0.0/8", "192.168.1.10", "::1/128"]).unwrap();
        assert!(policy.permits("10.1.2.3".parse().unwrap()));
        assert!(policy.permits("192.168.1.10".parse().unwrap()));
        assert!(!policy.permits("192.168.1.11".parse().unwrap()));
        assert!(policy.permits("::1".parse().unwrap()));

        assert!(matches!(
            HostPolicy::new(&["not-a-network"]),
            Err(ConfigError::InvalidNetwork { .. })
        ));
    }

    #[test]
    fn test_origin_host() {
        assert_eq!(
            origin_host("https://git.example.com/org/repo.git"),
            Some(("git.example.com".to_string(), 443))
        );
        assert_eq!(
            origin_host("http://127.0.0.1:8080/repo.git"),
            Some(("127.0.0.1".to_string(), 8080))
        );
        assert_eq!(origin_host("/srv/git/repo.git"), None);
    }

    #[tokio::test]
    async fn test_host_check() {
        let unrestricted = HostPolicy::default();
        assert!(unrestricted.check("/srv/git/repo.git").await.is_ok());

        let policy = HostPolicy::new(&["127.0.0.0/8"]).unwrap();
        assert!(policy.check("http://127.0.0.1:8080/repo.git").await.is_ok());
        assert!(matches!(
            policy.check("http://10.0.0.1/repo.git").await,
            Err(SyncError::HostNotAllowed { .. })
        ));
        assert!(matches!(
            policy.check("/srv/git/repo.git").await,
            Err(SyncError::HostNotAllowed { .. })
        ));
    }

    #[test]
    fn test_trust_policy_key_ids() {
        let policy = TrustPolicy::new(true, false, &["0xdeadbeefcafebabe", "ABCDEF12"]).unwrap();
        assert_eq!(policy.signer_key_ids(), &["DEADBEEFCAFEBABE", "ABCDEF12"]);
        assert!(policy.is_enforced());
        assert!(!TrustPolicy::default().is_enforced());

        assert!(matches!(
            TrustPolicy::new(false, false, &["xyz"]),
            Err(ConfigError::InvalidKeyId(_))
        ));
    }
}
