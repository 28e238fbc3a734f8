//! Semantic-version handling for tag selection.
//!
//! Tag names are parsed leniently (`v1.2`, `1.2.3-rc.1`) and matched against
//! range constraints such as `^1.0.0`, `~2.0.0-0` or `>=1.2, <1.5 || 2.x`.

mod constraint;
mod index;
mod version;

pub use constraint::{Constraint, ConstraintError};
pub use index::{SemverRef, SemverTagIndex};
pub use version::parse_version_loose;

pub use ::semver::Version;
