//! Artifact coordinates.
//!
//! A coordinate names one retrievable artifact as
//! `group:artifact:version[:classifier]`. Every component doubles as a path
//! segment in the cache and unpack layouts, so validation rejects anything
//! that could address a different directory.

use crate::error::CoordinateError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated artifact coordinate.
///
/// Equality, hashing and ordering cover every component, so a coordinate
/// without a classifier is distinct from one with an empty classifier.
///
/// # Examples
///
/// ```
/// use stubrun_common::Coordinate;
///
/// let coordinate: Coordinate = "org.example.stubs:bootService:0.0.1-SNAPSHOT:stubs"
///     .parse()
///     .expect("valid coordinate");
/// assert_eq!(coordinate.group(), "org.example.stubs");
/// assert_eq!(coordinate.classifier(), Some("stubs"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Coordinate {
    group: String,
    artifact: String,
    version: String,
    classifier: Option<String>,
}

impl Coordinate {
    /// Create a coordinate without a classifier.
    ///
    /// The version may be empty, which requests the newest available version.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError`] when the group or artifact is empty, the
    /// group has an empty dot-separated segment, or any component is not a
    /// safe path segment.
    pub fn new(
        group: impl Into<String>,
        artifact: impl Into<String>,
        version: impl Into<String>,
    ) -> Result<Self, CoordinateError> {
        let group = group.into();
        let artifact = artifact.into();
        let version = version.into();
        require_non_empty("group", &group)?;
        require_non_empty("artifact", &artifact)?;
        validate_segment("group", &group)?;
        validate_group(&group)?;
        validate_segment("artifact", &artifact)?;
        validate_segment("version", &version)?;
        Ok(Self {
            group,
            artifact,
            version,
            classifier: None,
        })
    }

    /// Return a copy of this coordinate carrying `classifier`.
    ///
    /// An empty classifier is allowed and is kept distinct from no
    /// classifier at all.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError::InvalidSegment`] for unsafe classifiers.
    pub fn with_classifier(self, classifier: impl Into<String>) -> Result<Self, CoordinateError> {
        let classifier = classifier.into();
        validate_segment("classifier", &classifier)?;
        Ok(Self {
            classifier: Some(classifier),
            ..self
        })
    }

    /// Return a copy of this coordinate with `version` substituted.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinateError::InvalidSegment`] for unsafe versions.
    pub fn with_version(&self, version: impl Into<String>) -> Result<Self, CoordinateError> {
        let version = version.into();
        validate_segment("version", &version)?;
        Ok(Self {
            version,
            ..self.clone()
        })
    }

    /// Return the group identifier.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Return the artifact identifier.
    #[must_use]
    pub fn artifact(&self) -> &str {
        &self.artifact
    }

    /// Return the requested or resolved version string.
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Return the classifier, if any.
    #[must_use]
    pub fn classifier(&self) -> Option<&str> {
        self.classifier.as_deref()
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.group, self.artifact, self.version)?;
        if let Some(classifier) = &self.classifier {
            write!(f, ":{classifier}")?;
        }
        Ok(())
    }
}

impl FromStr for Coordinate {
    type Err = CoordinateError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = value.split(':').collect();
        match parts.as_slice() {
            [group, artifact] => Self::new(*group, *artifact, ""),
            [group, artifact, version] => Self::new(*group, *artifact, *version),
            [group, artifact, version, classifier] => {
                Self::new(*group, *artifact, *version)?.with_classifier(*classifier)
            }
            _ => Err(CoordinateError::Malformed {
                value: value.to_owned(),
            }),
        }
    }
}

impl TryFrom<String> for Coordinate {
    type Error = CoordinateError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Coordinate> for String {
    fn from(value: Coordinate) -> Self {
        value.to_string()
    }
}

fn require_non_empty(component: &'static str, value: &str) -> Result<(), CoordinateError> {
    if value.trim().is_empty() {
        return Err(CoordinateError::EmptyComponent { component });
    }
    Ok(())
}

fn validate_group(group: &str) -> Result<(), CoordinateError> {
    if group.split('.').any(str::is_empty) {
        return Err(CoordinateError::InvalidSegment {
            component: "group",
            value: group.to_owned(),
            reason: "group segments between '.' must not be empty",
        });
    }
    Ok(())
}

fn validate_segment(component: &'static str, value: &str) -> Result<(), CoordinateError> {
    let reason = if value == "." || value == ".." {
        Some("relative directory names are reserved")
    } else if value.contains(['/', '\\']) {
        Some("path separators are not allowed")
    } else if value.contains(':') {
        Some("':' separates coordinate components")
    } else if value.chars().any(char::is_control) {
        Some("control characters are not allowed")
    } else {
        None
    };
    match reason {
        Some(reason) => Err(CoordinateError::InvalidSegment {
            component,
            value: value.to_owned(),
            reason,
        }),
        None => Ok(()),
    }
}
