//! Version range constraints.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::{Prerelease, Version};

use super::version::PartialVersion;

/// A constraint string could not be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid constraint {input:?}: {reason}")]
pub struct ConstraintError {
    input: String,
    reason: String,
}

/// A semantic-version range such as `^1.0.0`, `~2.0.0-0` or
/// `>=1.2, <1.5 || 2.x`.
///
/// Comparators separated by commas or spaces must all hold; groups separated
/// by `||` are alternatives. A bare version is an exact match. A version with
/// a pre-release only satisfies a comparator whose own version carries a
/// pre-release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    raw: String,
    groups: Vec<Vec<Comparator>>,
}

impl Constraint {
    /// Parses a constraint expression.
    pub fn parse(input: &str) -> Result<Self, ConstraintError> {
        let error = |reason: String| ConstraintError {
            input: input.to_string(),
            reason,
        };

        if input.trim().is_empty() {
            return Err(error("empty constraint".to_string()));
        }

        let groups = input
            .split("||")
            .map(parse_group)
            .collect::<Result<Vec<_>, _>>()
            .map_err(error)?;

        Ok(Self {
            raw: input.trim().to_string(),
            groups,
        })
    }

    /// Returns true if `version` satisfies the constraint.
    pub fn matches(&self, version: &Version) -> bool {
        self.groups
            .iter()
            .any(|group| group.iter().all(|c| c.matches(version)))
    }

    /// Returns the constraint as written.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for Constraint {
    type Err = ConstraintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Tilde,
    Caret,
}

// Longest prefixes first so `>=` is not read as `>`.
const OPERATORS: &[(&str, Op)] = &[
    ("!=", Op::Ne),
    (">=", Op::Ge),
    ("=>", Op::Ge),
    ("<=", Op::Le),
    ("=<", Op::Le),
    ("~>", Op::Tilde),
    ("~", Op::Tilde),
    ("^", Op::Caret),
    (">", Op::Gt),
    ("<", Op::Lt),
    ("=", Op::Eq),
];

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: Version,
    inclusive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Comparator {
    lower: Option<Bound>,
    upper: Option<Bound>,
    negated: bool,
    allows_prerelease: bool,
}

impl Comparator {
    fn any(allows_prerelease: bool) -> Self {
        Self {
            lower: None,
            upper: None,
            negated: false,
            allows_prerelease,
        }
    }

    fn never() -> Self {
        Self {
            negated: true,
            ..Self::any(true)
        }
    }

    fn range(lower: Option<Bound>, upper: Option<Bound>, allows_prerelease: bool) -> Self {
        Self {
            lower,
            upper,
            negated: false,
            allows_prerelease,
        }
    }

    fn matches(&self, version: &Version) -> bool {
        if !version.pre.is_empty() && !self.allows_prerelease {
            return false;
        }

        let above = self.lower.as_ref().is_none_or(|b| {
            match version.cmp_precedence(&b.version) {
                Ordering::Greater => true,
                Ordering::Equal => b.inclusive,
                Ordering::Less => false,
            }
        });
        let below = self.upper.as_ref().is_none_or(|b| {
            match version.cmp_precedence(&b.version) {
                Ordering::Less => true,
                Ordering::Equal => b.inclusive,
                Ordering::Greater => false,
            }
        });

        (above && below) != self.negated
    }
}

fn parse_group(group: &str) -> Result<Vec<Comparator>, String> {
    let tokens: Vec<&str> = group
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    if tokens.is_empty() {
        return Err("empty alternative".to_string());
    }

    let mut comparators = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let mut token = tokens[i].to_string();

        // operator written apart from its version: `>= 1.2`
        if OPERATORS.iter().any(|(op, _)| *op == token) {
            i += 1;
            let version = tokens
                .get(i)
                .ok_or_else(|| format!("operator {} without version", token))?;
            token.push_str(version);
        }

        if tokens.get(i + 1) == Some(&"-") {
            let upper = tokens
                .get(i + 2)
                .ok_or_else(|| format!("incomplete range starting at {}", token))?;
            comparators.push(comparator(Op::Ge, &PartialVersion::parse(&token)?)?);
            comparators.push(comparator(Op::Le, &PartialVersion::parse(upper)?)?);
            i += 3;
            continue;
        }

        comparators.push(parse_comparator(&token)?);
        i += 1;
    }

    Ok(comparators)
}

fn parse_comparator(token: &str) -> Result<Comparator, String> {
    let (op, rest) = OPERATORS
        .iter()
        .find_map(|(prefix, op)| token.strip_prefix(*prefix).map(|rest| (*op, rest)))
        .unwrap_or((Op::Eq, token));

    comparator(op, &PartialVersion::parse(rest)?)
}

fn bump(component: u64) -> Result<u64, String> {
    component
        .checked_add(1)
        .ok_or_else(|| format!("version component {} is out of range", component))
}

/// Lowest possible version with the given core, below all its pre-releases.
fn ceiling(major: u64, minor: u64, patch: u64) -> Bound {
    let mut version = Version::new(major, minor, patch);
    version.pre = Prerelease::new("0").unwrap_or(Prerelease::EMPTY);
    Bound {
        version,
        inclusive: false,
    }
}

fn inclusive(version: Version) -> Bound {
    Bound {
        version,
        inclusive: true,
    }
}

fn exclusive(version: Version) -> Bound {
    Bound {
        version,
        inclusive: false,
    }
}

/// The first version past everything a partial version covers
/// (`1.x` -> `2.0.0`, `1.2.x` -> `1.3.0`).
fn successor(p: &PartialVersion) -> Result<Option<Version>, String> {
    let Some(major) = p.major else {
        return Ok(None);
    };
    Ok(match (p.minor, p.patch) {
        (None, _) => Some(Version::new(bump(major)?, 0, 0)),
        (Some(minor), None) => Some(Version::new(major, bump(minor)?, 0)),
        (Some(_), Some(_)) => None,
    })
}

/// The span covered by a partial version (`1.x` -> `[1.0.0, 2.0.0)`).
fn span(p: &PartialVersion, allows_prerelease: bool) -> Result<Comparator, String> {
    let Some(major) = p.major else {
        return Ok(Comparator::any(allows_prerelease));
    };
    let upper = match p.minor {
        None => ceiling(bump(major)?, 0, 0),
        Some(minor) => ceiling(major, bump(minor)?, 0),
    };
    Ok(Comparator::range(
        Some(inclusive(p.floor())),
        Some(upper),
        allows_prerelease,
    ))
}

fn comparator(op: Op, p: &PartialVersion) -> Result<Comparator, String> {
    let floor = p.floor();
    let allows_prerelease = !p.pre.is_empty();

    Ok(match op {
        Op::Eq if p.is_partial() => span(p, allows_prerelease)?,
        Op::Eq => Comparator::range(
            Some(inclusive(floor.clone())),
            Some(inclusive(floor)),
            allows_prerelease,
        ),
        Op::Ne if p.is_partial() => Comparator {
            negated: true,
            ..span(p, allows_prerelease)?
        },
        Op::Ne => Comparator {
            negated: true,
            ..Comparator::range(Some(inclusive(floor.clone())), Some(inclusive(floor)), true)
        },
        Op::Gt if p.is_partial() => match successor(p)? {
            Some(next) => Comparator::range(Some(inclusive(next)), None, allows_prerelease),
            None if p.major.is_none() => Comparator::never(),
            None => Comparator::range(Some(exclusive(floor)), None, allows_prerelease),
        },
        Op::Gt => Comparator::range(Some(exclusive(floor)), None, allows_prerelease),
        Op::Ge => Comparator::range(Some(inclusive(floor)), None, allows_prerelease),
        Op::Lt if p.major.is_none() => Comparator::never(),
        Op::Lt => Comparator::range(None, Some(exclusive(floor)), allows_prerelease),
        Op::Le if p.is_partial() => match successor(p)? {
            Some(next) => Comparator::range(None, Some(exclusive(next)), allows_prerelease),
            None => Comparator::any(allows_prerelease),
        },
        Op::Le => Comparator::range(None, Some(inclusive(floor)), allows_prerelease),
        Op::Tilde => tilde(p, floor, allows_prerelease)?,
        Op::Caret => caret(p, floor, allows_prerelease)?,
    })
}

fn tilde(p: &PartialVersion, floor: Version, allows_prerelease: bool) -> Result<Comparator, String> {
    let Some(major) = p.major else {
        return Ok(Comparator::any(allows_prerelease));
    };
    // ~0.0.0 accepts everything from zero up
    if !p.is_partial() && floor.major == 0 && floor.minor == 0 && floor.patch == 0 {
        return Ok(Comparator::range(Some(inclusive(floor)), None, allows_prerelease));
    }
    let upper = match p.minor {
        None => ceiling(bump(major)?, 0, 0),
        Some(minor) => ceiling(major, bump(minor)?, 0),
    };
    Ok(Comparator::range(Some(inclusive(floor)), Some(upper), allows_prerelease))
}

fn caret(p: &PartialVersion, floor: Version, allows_prerelease: bool) -> Result<Comparator, String> {
    let Some(major) = p.major else {
        return Ok(Comparator::any(allows_prerelease));
    };
    let upper = if major > 0 || p.minor.is_none() {
        ceiling(bump(major)?, 0, 0)
    } else if floor.minor > 0 || p.patch.is_none() {
        ceiling(0, bump(floor.minor)?, 0)
    } else {
        ceiling(0, 0, bump(floor.patch)?)
    };
    Ok(Comparator::range(Some(inclusive(floor)), Some(upper), allows_prerelease))
}
