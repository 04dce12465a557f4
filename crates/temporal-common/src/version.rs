//! Temporal server version parsing and upgrade gating
//!
//! Temporal only supports moving one minor release line at a time: a
//! cluster on 1.17.x may go to any later 1.17 patch or to any 1.18.x, but
//! never straight to 1.19. Downgrades are never allowed. A small set of
//! releases is known to be broken and is refused outright, with the patched
//! replacement named in the error.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Lowest Temporal version the operator can manage
pub const MIN_SUPPORTED_VERSION: Version = Version::new(1, 14, 0);

/// First Temporal version the operator does not know how to manage
pub const MAX_SUPPORTED_VERSION_EXCLUSIVE: Version = Version::new(1, 26, 0);

/// First version shipping the internal-frontend service
pub const INTERNAL_FRONTEND_MIN_VERSION: Version = Version::new(1, 20, 0);

/// First version supporting a secondary visibility store (dual visibility)
pub const SECONDARY_VISIBILITY_MIN_VERSION: Version = Version::new(1, 21, 0);

/// Releases known to be broken, each mapped to the recommended replacement
const BROKEN_RELEASES: &[(Version, Version)] = &[
    (Version::new(1, 20, 0), Version::new(1, 20, 1)),
    (Version::new(1, 21, 0), Version::new(1, 21, 1)),
];

/// Errors from parsing or gating versions
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VersionError {
    /// The string is not `MAJOR.MINOR.PATCH`
    #[error("invalid version '{input}': {reason}")]
    Parse {
        /// The rejected input
        input: String,
        /// Why it was rejected
        reason: String,
    },

    /// Target is older than the running version
    #[error("downgrade from {current} to {candidate} is not allowed")]
    Downgrade {
        /// Running version
        current: Version,
        /// Requested version
        candidate: Version,
    },

    /// Target skips at least one minor release line
    #[error(
        "upgrade from {current} to {candidate} is not allowed: \
         only sequential minor upgrades are allowed (next allowed minor is {next})"
    )]
    SkippedMinor {
        /// Running version
        current: Version,
        /// Requested version
        candidate: Version,
        /// The highest minor line reachable from `current`
        next: Version,
    },

    /// Target is outside the operator's supported range
    #[error("version {version} is not supported: supported versions are {range}")]
    Unsupported {
        /// Requested version
        version: Version,
        /// The supported range
        range: VersionRange,
    },

    /// Target is on the broken-release list
    #[error("version {version} is known to be broken, use {recommended} instead")]
    Broken {
        /// Requested version
        version: Version,
        /// Patched replacement
        recommended: Version,
    },
}

/// A semantic version of the managed Temporal server
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    /// Major component
    pub major: u64,
    /// Minor component
    pub minor: u64,
    /// Patch component
    pub patch: u64,
    /// Optional pre-release tag (`1.22.0-rc.1` has `rc.1`)
    pub pre: Option<String>,
}

impl Version {
    /// Construct a release version
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
            pre: None,
        }
    }

    /// Parse `MAJOR.MINOR.PATCH[-PRE]` with an optional leading `v`
    pub fn parse(input: &str) -> Result<Self, VersionError> {
        let err = |reason: &str| VersionError::Parse {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = input.trim();
        let trimmed = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let (core, pre) = match trimmed.split_once('-') {
            Some((core, pre)) if !pre.is_empty() => (core, Some(pre.to_string())),
            Some(_) => return Err(err("empty pre-release")),
            None => (trimmed, None),
        };

        let mut parts = core.split('.');
        let mut next = |name: &str| -> Result<u64, VersionError> {
            let part = parts
                .next()
                .ok_or_else(|| err(&format!("missing {name} component")))?;
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(err(&format!("{name} component '{part}' is not a number")));
            }
            part.parse::<u64>()
                .map_err(|e| err(&format!("{name} component: {e}")))
        };

        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;
        if parts.next().is_some() {
            return Err(err("too many components"));
        }

        Ok(Self {
            major,
            minor,
            patch,
            pre,
        })
    }

    /// `self >= other`
    pub fn greater_or_equal(&self, other: &Version) -> bool {
        self >= other
    }

    /// `self < other`
    pub fn less_than(&self, other: &Version) -> bool {
        self < other
    }

    /// `self == other`, ignoring nothing
    pub fn equal(&self, other: &Version) -> bool {
        self == other
    }

    /// First release of the next minor line
    pub fn next_minor(&self) -> Version {
        Version::new(self.major, self.minor.saturating_add(1), 0)
    }

    /// Versions a cluster running `self` may move to
    ///
    /// Includes `self`, later patches of the same minor and every patch of
    /// the next minor line.
    pub fn upgrade_constraint(&self) -> VersionRange {
        VersionRange {
            min: self.clone(),
            max_exclusive: self.next_minor().next_minor(),
        }
    }

    /// Check if this release is known to be broken
    ///
    /// Returns the recommended replacement when it is.
    pub fn is_broken(&self) -> Option<Version> {
        BROKEN_RELEASES
            .iter()
            .find(|(broken, _)| broken == self)
            .map(|(_, recommended)| recommended.clone())
    }

    /// Whether `self` is at least `min`
    pub fn supports(&self, min: &Version) -> bool {
        self >= min
    }

    /// The minor line formatted for schema directories (`v1.18`)
    pub fn minor_line(&self) -> String {
        format!("v{}.{}", self.major, self.minor)
    }

    /// Version as a DNS-label-safe suffix (`1-18-4`)
    pub fn dashed(&self) -> String {
        self.to_string().replace(['.', '+'], "-").to_lowercase()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)?;
        if let Some(pre) = &self.pre {
            write!(f, "-{pre}")?;
        }
        Ok(())
    }
}

impl FromStr for Version {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.patch)
            .cmp(&(other.major, other.minor, other.patch))
            .then_with(|| match (&self.pre, &other.pre) {
                (None, None) => Ordering::Equal,
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Version::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Half-open version range `[min, max_exclusive)`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    /// Inclusive lower bound
    pub min: Version,
    /// Exclusive upper bound
    pub max_exclusive: Version,
}

impl VersionRange {
    /// Whether `version` lies inside the range
    pub fn contains(&self, version: &Version) -> bool {
        version >= &self.min && version < &self.max_exclusive
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ">= {}, < {}", self.min, self.max_exclusive)
    }
}

/// The range of versions the operator manages
pub fn supported_versions() -> VersionRange {
    VersionRange {
        min: MIN_SUPPORTED_VERSION,
        max_exclusive: MAX_SUPPORTED_VERSION_EXCLUSIVE,
    }
}

/// Check that a version is supported and not known to be broken
pub fn check_supported(version: &Version) -> Result<(), VersionError> {
    let range = supported_versions();
    if !range.contains(version) {
        return Err(VersionError::Unsupported {
            version: version.clone(),
            range,
        });
    }
    if let Some(recommended) = version.is_broken() {
        return Err(VersionError::Broken {
            version: version.clone(),
            recommended,
        });
    }
    Ok(())
}

/// Check a version transition against the sequential-upgrade rule
pub fn check_upgrade(current: &Version, candidate: &Version) -> Result<(), VersionError> {
    if candidate < current {
        return Err(VersionError::Downgrade {
            current: current.clone(),
            candidate: candidate.clone(),
        });
    }
    if !current.upgrade_constraint().contains(candidate) {
        return Err(VersionError::SkippedMinor {
            current: current.clone(),
            candidate: candidate.clone(),
            next: current.next_minor(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn v(s: &str) -> Version {
        Version::parse(s).unwrap()
    }

    #[rstest]
    #[case("1.18.4", 1, 18, 4, None)]
    #[case("v1.22.0", 1, 22, 0, None)]
    #[case("1.23.0-rc.1", 1, 23, 0, Some("rc.1"))]
    #[case(" 1.2.3 ", 1, 2, 3, None)]
    fn parses_versions(
        #[case] input: &str,
        #[case] major: u64,
        #[case] minor: u64,
        #[case] patch: u64,
        #[case] pre: Option<&str>,
    ) {
        let parsed = v(input);
        assert_eq!(parsed.major, major);
        assert_eq!(parsed.minor, minor);
        assert_eq!(parsed.patch, patch);
        assert_eq!(parsed.pre.as_deref(), pre);
    }

    #[rstest]
    #[case("")]
    #[case("1.18")]
    #[case("1.18.x")]
    #[case("1.18.4.1")]
    #[case("1.18.4-")]
    #[case("latest")]
    fn rejects_malformed_versions(#[case] input: &str) {
        assert!(matches!(
            Version::parse(input),
            Err(VersionError::Parse { .. })
        ));
    }

    #[test]
    fn ordering_follows_numeric_components() {
        assert!(v("1.10.0").greater_or_equal(&v("1.9.9")));
        assert!(v("1.18.3").less_than(&v("1.18.10")));
        assert!(v("1.18.3").equal(&v("v1.18.3")));
        assert!(v("1.22.0-rc.1").less_than(&v("1.22.0")));
    }

    #[test]
    fn next_minor_resets_patch() {
        assert_eq!(v("1.17.5").next_minor(), v("1.18.0"));
    }

    #[test]
    fn next_minor_saturates_at_the_largest_minor() {
        let top = Version::new(1, u64::MAX, 3);
        assert_eq!(top.next_minor(), Version::new(1, u64::MAX, 0));
        assert!(matches!(
            check_upgrade(&top, &Version::new(1, u64::MAX, 4)),
            Err(VersionError::SkippedMinor { .. })
        ));
    }

    /// Upgrade monotonicity: `v1 -> v2` is allowed iff `v2` is inside
    /// `v1.upgrade_constraint()`.
    #[rstest]
    #[case("1.17.5", "1.18.0", true)]
    #[case("1.17.5", "1.18.3", true)]
    #[case("1.17.5", "1.17.5", true)]
    #[case("1.17.5", "1.17.9", true)]
    #[case("1.17.5", "1.19.0", false)]
    #[case("1.17.5", "1.16.6", false)]
    #[case("1.17.5", "1.17.4", false)]
    #[case("1.17.5", "2.0.0", false)]
    fn upgrade_monotonicity(#[case] from: &str, #[case] to: &str, #[case] allowed: bool) {
        let (from, to) = (v(from), v(to));
        assert_eq!(check_upgrade(&from, &to).is_ok(), allowed);
        assert_eq!(from.upgrade_constraint().contains(&to), allowed);
    }

    #[test]
    fn skipped_minor_names_the_rule() {
        let err = check_upgrade(&v("1.17.5"), &v("1.19.0")).unwrap_err();
        assert!(err
            .to_string()
            .contains("only sequential minor upgrades are allowed"));
        assert!(err.to_string().contains("1.18.0"));
    }

    #[test]
    fn downgrade_is_reported_as_such() {
        let err = check_upgrade(&v("1.17.5"), &v("1.16.6")).unwrap_err();
        assert!(matches!(err, VersionError::Downgrade { .. }));
    }

    #[test]
    fn broken_releases_recommend_replacement() {
        assert_eq!(v("1.20.0").is_broken(), Some(v("1.20.1")));
        assert_eq!(v("1.20.1").is_broken(), None);

        let err = check_supported(&v("1.21.0")).unwrap_err();
        assert!(err.to_string().contains("use 1.21.1 instead"));
    }

    #[test]
    fn supported_range_bounds() {
        assert!(check_supported(&v("1.14.0")).is_ok());
        assert!(check_supported(&v("1.25.2")).is_ok());
        assert!(matches!(
            check_supported(&v("1.13.9")),
            Err(VersionError::Unsupported { .. })
        ));
        assert!(matches!(
            check_supported(&v("1.26.0")),
            Err(VersionError::Unsupported { .. })
        ));
    }

    #[test]
    fn serde_round_trips_as_string() {
        let json = serde_json::to_string(&v("1.18.4")).unwrap();
        assert_eq!(json, "\"1.18.4\"");
        let back: Version = serde_json::from_str("\"v1.18.4\"").unwrap();
        assert_eq!(back, v("1.18.4"));
    }

    #[test]
    fn helpers_format_for_names_and_schema_dirs() {
        assert_eq!(v("1.18.4").dashed(), "1-18-4");
        assert_eq!(v("1.18.4").minor_line(), "v1.18");
        assert!(v("1.21.0").supports(&SECONDARY_VISIBILITY_MIN_VERSION));
        assert!(!v("1.19.2").supports(&INTERNAL_FRONTEND_MIN_VERSION));
    }
}
