//! Error types for coordinate and version request validation.
//!
//! Each variant names the rejected input and the constraint it violated.

use thiserror::Error;

/// Errors arising from invalid coordinate values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinateError {
    /// A required component (group or artifact) is empty.
    #[error("coordinate {component} must not be empty")]
    EmptyComponent {
        /// Name of the empty component.
        component: &'static str,
    },

    /// A component cannot be used as a single path segment.
    #[error("coordinate {component} \"{value}\" is not a valid path segment: {reason}")]
    InvalidSegment {
        /// Name of the offending component.
        component: &'static str,
        /// The rejected value.
        value: String,
        /// Description of the violation.
        reason: &'static str,
    },

    /// The textual form has too few or too many `:`-separated parts.
    #[error("invalid coordinate \"{value}\"; expected group:artifact[:version[:classifier]]")]
    Malformed {
        /// The rejected coordinate string.
        value: String,
    },
}

/// Errors arising from malformed version range expressions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionRangeError {
    /// The range is missing its opening or closing bracket.
    #[error("version range \"{value}\" must start with '[' or '(' and end with ']' or ')'")]
    Unbracketed {
        /// The rejected range.
        value: String,
    },

    /// The range has more than two bounds.
    #[error("version range \"{value}\" must have at most two bounds")]
    TooManyBounds {
        /// The rejected range.
        value: String,
    },

    /// A single-version range is not inclusive on both sides.
    #[error("exact version range \"{value}\" must use '[' and ']'")]
    ExclusiveExact {
        /// The rejected range.
        value: String,
    },

    /// The lower bound is above the upper bound.
    #[error("version range \"{value}\" has its lower bound above its upper bound")]
    Inverted {
        /// The rejected range.
        value: String,
    },
}
