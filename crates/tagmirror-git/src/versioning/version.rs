//! Lenient version parsing.

use semver::{BuildMetadata, Prerelease, Version};

/// Parses a tag name as a semantic version.
///
/// Accepts an optional `v`/`V` prefix and fills missing minor and patch
/// components with zero, so `v1` is `1.0.0` and `1.2-rc.1` is `1.2.0-rc.1`.
/// Returns `None` for anything that is not a version.
pub fn parse_version_loose(input: &str) -> Option<Version> {
    let partial = PartialVersion::parse(input).ok()?;
    if partial.wildcard {
        return None;
    }
    Some(partial.floor())
}

/// A version as written in a constraint, where trailing components may be
/// missing or wildcards (`1`, `1.x`, `1.2.*`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PartialVersion {
    pub major: Option<u64>,
    pub minor: Option<u64>,
    pub patch: Option<u64>,
    pub pre: Prerelease,
    pub build: BuildMetadata,
    /// An explicit `x`, `X` or `*` component was written.
    pub wildcard: bool,
}

impl PartialVersion {
    pub fn parse(input: &str) -> Result<Self, String> {
        let s = input.trim();
        let s = s.strip_prefix(['v', 'V']).unwrap_or(s);

        if s.is_empty() {
            return Err("empty version".to_string());
        }

        let (rest, build) = match s.split_once('+') {
            Some((rest, build)) => (
                rest,
                BuildMetadata::new(build).map_err(|e| format!("invalid build metadata: {}", e))?,
            ),
            None => (s, BuildMetadata::EMPTY),
        };

        let (core, pre) = match rest.split_once('-') {
            Some((core, pre)) => (
                core,
                Prerelease::new(pre).map_err(|e| format!("invalid pre-release: {}", e))?,
            ),
            None => (rest, Prerelease::EMPTY),
        };

        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > 3 {
            return Err(format!("too many components in {}", input));
        }

        let mut numbers = [None; 3];
        let mut wildcard_seen = false;
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            if matches!(*part, "x" | "X" | "*") {
                wildcard_seen = true;
                continue;
            }
            if wildcard_seen {
                // `1.x.3` has no meaning
                return Err(format!("number after wildcard in {}", input));
            }
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(format!("invalid component {:?} in {}", part, input));
            }
            *slot = Some(
                part.parse::<u64>()
                    .map_err(|e| format!("invalid component {:?}: {}", part, e))?,
            );
        }

        if wildcard_seen && !pre.is_empty() {
            return Err(format!("pre-release on wildcard version {}", input));
        }

        Ok(Self {
            major: numbers[0],
            minor: numbers[1],
            patch: numbers[2],
            pre,
            build,
            wildcard: wildcard_seen,
        })
    }

    /// True when any component is missing or a wildcard.
    pub fn is_partial(&self) -> bool {
        self.major.is_none() || self.minor.is_none() || self.patch.is_none()
    }

    /// The lowest concrete version described, missing parts as zero.
    pub fn floor(&self) -> Version {
        let mut version = Version::new(
            self.major.unwrap_or(0),
            self.minor.unwrap_or(0),
            self.patch.unwrap_or(0),
        );
        version.pre = self.pre.clone();
        version.build = self.build.clone();
        version
    }
}
