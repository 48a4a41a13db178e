//! Version ordering and floating version requests.
//!
//! Versions compare by their numeric segments first (missing segments count
//! as zero) and then by qualifier rank:
//!
//! ```text
//! alpha < beta < milestone < rc < other < snapshot < release < sp
//! ```
//!
//! so `1.0-SNAPSHOT` sorts below `1.0` and `1.0.0.RELEASE` equals `1.0.0`.
//! Timestamped snapshot builds (`1.0-20240102.030405-7`) rank as snapshots
//! ordered by timestamp and build number.

use crate::error::VersionRangeError;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;

/// Suffix marking a mutable snapshot version.
pub const SNAPSHOT_SUFFIX: &str = "-SNAPSHOT";

/// Version strings that request the newest available version.
const LATEST_MARKERS: &[&str] = &["", "+", "latest", "LATEST"];

/// Version strings that request the newest non-snapshot version.
const RELEASE_MARKERS: &[&str] = &["release", "RELEASE"];

/// A parsed, comparable version.
///
/// Equality follows the ordering, so `1.0` and `1.0.0` are equal even though
/// their textual forms differ; [`Version::as_str`] returns the original text.
#[derive(Debug, Clone)]
pub struct Version {
    raw: String,
    numbers: Vec<u64>,
    qualifier: Qualifier,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Qualifier {
    Alpha(u64),
    Beta(u64),
    Milestone(u64),
    ReleaseCandidate(u64),
    Other(String),
    Snapshot { timestamp: String, build: u64 },
    Release,
    ServicePack(u64),
}

impl Version {
    /// Parse a version string. Parsing never fails: unrecognised text is
    /// kept as a qualifier and ordered lexically among other qualifiers.
    ///
    /// # Examples
    ///
    /// ```
    /// use stubrun_common::Version;
    ///
    /// assert!(Version::parse("1.0-SNAPSHOT") < Version::parse("1.0"));
    /// assert!(Version::parse("1.9") < Version::parse("1.10"));
    /// ```
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        let split = trimmed
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(trimmed.len());
        let (numeric, rest) = trimmed.split_at(split);
        let numbers = numeric
            .split('.')
            .filter(|segment| !segment.is_empty())
            .map(|segment| segment.parse::<u64>().unwrap_or(u64::MAX))
            .collect();
        let qualifier = classify_qualifier(rest.trim_start_matches(['.', '-', '_']));
        Self {
            raw: trimmed.to_owned(),
            numbers,
            qualifier,
        }
    }

    /// Return the original version text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Return true for snapshot markers and timestamped snapshot builds.
    #[must_use]
    pub fn is_snapshot(&self) -> bool {
        matches!(self.qualifier, Qualifier::Snapshot { .. })
    }

    fn number_at(&self, index: usize) -> u64 {
        self.numbers.get(index).copied().unwrap_or(0)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let width = self.numbers.len().max(other.numbers.len());
        (0..width)
            .map(|index| self.number_at(index).cmp(&other.number_at(index)))
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
            .then_with(|| self.qualifier.cmp(&other.qualifier))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for Version {}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn classify_qualifier(raw: &str) -> Qualifier {
    let lower = raw.to_ascii_lowercase();
    match lower.as_str() {
        "" | "ga" | "final" | "release" => return Qualifier::Release,
        "snapshot" => {
            return Qualifier::Snapshot {
                timestamp: String::new(),
                build: 0,
            };
        }
        _ => {}
    }
    if let Some((_, timestamp, build)) = split_timestamp_suffix(&lower) {
        return Qualifier::Snapshot {
            timestamp: timestamp.to_owned(),
            build,
        };
    }

    let letters_end = lower
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(lower.len());
    let (letters, tail) = lower.split_at(letters_end);
    let tail = tail.trim_start_matches(['.', '-', '_']);
    let number = if tail.is_empty() {
        Some(0)
    } else {
        tail.parse::<u64>().ok()
    };
    let Some(number) = number else {
        return Qualifier::Other(lower.clone());
    };
    let has_number = !tail.is_empty();
    match letters {
        "alpha" => Qualifier::Alpha(number),
        "a" if has_number => Qualifier::Alpha(number),
        "beta" => Qualifier::Beta(number),
        "b" if has_number => Qualifier::Beta(number),
        "milestone" => Qualifier::Milestone(number),
        "m" if has_number => Qualifier::Milestone(number),
        "rc" | "cr" => Qualifier::ReleaseCandidate(number),
        "sp" => Qualifier::ServicePack(number),
        _ => Qualifier::Other(lower.clone()),
    }
}

/// Split `<prefix>-<yyyyMMdd.HHmmss>-<build>` into its parts, or the bare
/// `<yyyyMMdd.HHmmss>-<build>` qualifier when no prefix is present.
fn split_timestamp_suffix(value: &str) -> Option<(&str, &str, u64)> {
    let (head, build) = value.rsplit_once('-')?;
    if build.is_empty() || !build.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let build = build.parse().ok()?;
    let (prefix, timestamp) = match head.rsplit_once('-') {
        Some((prefix, timestamp)) => (prefix, timestamp),
        None => ("", head),
    };
    is_snapshot_timestamp(timestamp).then_some((prefix, timestamp, build))
}

fn is_snapshot_timestamp(value: &str) -> bool {
    let Some((date, time)) = value.split_once('.') else {
        return false;
    };
    date.len() == 8
        && time.len() == 6
        && date.bytes().all(|b| b.is_ascii_digit())
        && time.bytes().all(|b| b.is_ascii_digit())
}

/// Return true when `version` ends with the `-SNAPSHOT` marker.
#[must_use]
pub fn is_snapshot_marker(version: &str) -> bool {
    version
        .len()
        .checked_sub(SNAPSHOT_SUFFIX.len())
        .and_then(|start| version.get(start..))
        .is_some_and(|suffix| suffix.eq_ignore_ascii_case(SNAPSHOT_SUFFIX))
}

/// Return the directory version for `version`.
///
/// Timestamped snapshot builds live under their `-SNAPSHOT` base version;
/// every other version is its own base.
///
/// # Examples
///
/// ```
/// use stubrun_common::version::base_version;
///
/// assert_eq!(base_version("1.0-20240102.030405-7"), "1.0-SNAPSHOT");
/// assert_eq!(base_version("1.0"), "1.0");
/// ```
#[must_use]
pub fn base_version(version: &str) -> Cow<'_, str> {
    match split_timestamp_suffix(version) {
        Some((prefix, _, _)) if !prefix.is_empty() => {
            Cow::Owned(format!("{prefix}{SNAPSHOT_SUFFIX}"))
        }
        _ => Cow::Borrowed(version),
    }
}

/// Return the `(timestamp, build)` pair of a timestamped snapshot build.
///
/// # Examples
///
/// ```
/// use stubrun_common::version::snapshot_build_of;
///
/// assert_eq!(snapshot_build_of("1.0-20240102.030405-7"), Some(("20240102.030405", 7)));
/// assert_eq!(snapshot_build_of("1.0-SNAPSHOT"), None);
/// ```
#[must_use]
pub fn snapshot_build_of(version: &str) -> Option<(&str, u64)> {
    split_timestamp_suffix(version)
        .filter(|(prefix, _, _)| !prefix.is_empty())
        .map(|(_, timestamp, build)| (timestamp, build))
}

/// Build the timestamped version for a snapshot marker.
///
/// # Examples
///
/// ```
/// use stubrun_common::version::timestamped_version;
///
/// assert_eq!(
///     timestamped_version("1.0-SNAPSHOT", "20240102.030405", 7),
///     "1.0-20240102.030405-7"
/// );
/// ```
#[must_use]
pub fn timestamped_version(snapshot: &str, timestamp: &str, build: u64) -> String {
    let prefix = if is_snapshot_marker(snapshot) {
        snapshot
            .get(..snapshot.len() - SNAPSHOT_SUFFIX.len())
            .unwrap_or(snapshot)
    } else {
        snapshot
    };
    format!("{prefix}-{timestamp}-{build}")
}

/// A version requirement taken from a coordinate's version field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionRequest {
    /// A fixed version, used as-is.
    Concrete(Version),
    /// A `-SNAPSHOT` marker to be pinned to a timestamped build if one exists.
    Snapshot(String),
    /// The newest available version, snapshots included.
    Latest,
    /// The newest available non-snapshot version.
    Release,
    /// The newest available version inside a range.
    Range(VersionRange),
}

impl VersionRequest {
    /// Classify a coordinate version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionRangeError`] when the value looks like a range but
    /// is malformed.
    ///
    /// # Examples
    ///
    /// ```
    /// use stubrun_common::VersionRequest;
    ///
    /// assert_eq!(VersionRequest::parse("+").expect("valid"), VersionRequest::Latest);
    /// assert!(matches!(
    ///     VersionRequest::parse("[1.0,2.0)").expect("valid"),
    ///     VersionRequest::Range(_)
    /// ));
    /// ```
    pub fn parse(raw: &str) -> Result<Self, VersionRangeError> {
        let trimmed = raw.trim();
        if LATEST_MARKERS.contains(&trimmed) {
            return Ok(Self::Latest);
        }
        if RELEASE_MARKERS.contains(&trimmed) {
            return Ok(Self::Release);
        }
        if trimmed.starts_with(['[', '(']) || trimmed.ends_with([']', ')']) {
            return VersionRange::parse(trimmed).map(Self::Range);
        }
        if is_snapshot_marker(trimmed) {
            return Ok(Self::Snapshot(trimmed.to_owned()));
        }
        Ok(Self::Concrete(Version::parse(trimmed)))
    }

    /// Return true when the version can be used without any lookup.
    #[must_use]
    pub fn is_concrete(&self) -> bool {
        matches!(self, Self::Concrete(_))
    }

    /// Return true when the request needs a version listing to resolve.
    #[must_use]
    pub fn is_floating(&self) -> bool {
        matches!(self, Self::Latest | Self::Release | Self::Range(_))
    }

    /// Return true when `candidate` satisfies this request.
    #[must_use]
    pub fn accepts(&self, candidate: &Version) -> bool {
        match self {
            Self::Concrete(version) => version == candidate,
            Self::Snapshot(marker) => candidate.as_str() == marker,
            Self::Latest => true,
            Self::Release => !candidate.is_snapshot(),
            Self::Range(range) => range.contains(candidate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: Version,
    inclusive: bool,
}

/// A Maven-style version range such as `[1.0,2.0)`, `[1.0,)` or `[1.5]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionRange {
    raw: String,
    lower: Option<Bound>,
    upper: Option<Bound>,
}

impl VersionRange {
    /// Parse a bracketed range expression.
    ///
    /// # Errors
    ///
    /// Returns [`VersionRangeError`] for missing brackets, more than two
    /// bounds, exclusive exact ranges, or inverted bounds.
    pub fn parse(raw: &str) -> Result<Self, VersionRangeError> {
        let trimmed = raw.trim();
        let unbracketed = || VersionRangeError::Unbracketed {
            value: trimmed.to_owned(),
        };
        let lower_inclusive = match trimmed.chars().next() {
            Some('[') => true,
            Some('(') => false,
            _ => return Err(unbracketed()),
        };
        let upper_inclusive = match trimmed.chars().last() {
            Some(']') => true,
            Some(')') => false,
            _ => return Err(unbracketed()),
        };
        let inner = trimmed
            .get(1..trimmed.len().saturating_sub(1))
            .filter(|_| trimmed.len() >= 2)
            .ok_or_else(unbracketed)?;

        let (lower, upper) = match inner.split_once(',') {
            None => {
                if !(lower_inclusive && upper_inclusive) {
                    return Err(VersionRangeError::ExclusiveExact {
                        value: trimmed.to_owned(),
                    });
                }
                let exact = Bound {
                    version: Version::parse(inner),
                    inclusive: true,
                };
                (Some(exact.clone()), Some(exact))
            }
            Some((_, upper)) if upper.contains(',') => {
                return Err(VersionRangeError::TooManyBounds {
                    value: trimmed.to_owned(),
                });
            }
            Some((lower, upper)) => (
                bound(lower, lower_inclusive),
                bound(upper, upper_inclusive),
            ),
        };

        if let (Some(low), Some(high)) = (&lower, &upper) {
            let inverted = match low.version.cmp(&high.version) {
                Ordering::Greater => true,
                Ordering::Equal => !(low.inclusive && high.inclusive),
                Ordering::Less => false,
            };
            if inverted {
                return Err(VersionRangeError::Inverted {
                    value: trimmed.to_owned(),
                });
            }
        }

        Ok(Self {
            raw: trimmed.to_owned(),
            lower,
            upper,
        })
    }

    /// Return true when `version` lies inside the range.
    #[must_use]
    pub fn contains(&self, version: &Version) -> bool {
        let above_lower = self.lower.as_ref().is_none_or(|low| {
            if low.inclusive {
                version >= &low.version
            } else {
                version > &low.version
            }
        });
        let below_upper = self.upper.as_ref().is_none_or(|high| {
            if high.inclusive {
                version <= &high.version
            } else {
                version < &high.version
            }
        });
        above_lower && below_upper
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn bound(raw: &str, inclusive: bool) -> Option<Bound> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| Bound {
        version: Version::parse(raw),
        inclusive,
    })
}
