//! Error types for the ckbdyn core library.
//!
//! Defines the error enum exposed by the public API and a convenient result
//! alias.

use std::fmt;

use thiserror::Error;

/// Stable codes describing [`GeneratorError`] variants.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum GeneratorErrorCode {
    /// A configuration parameter was outside its accepted range.
    InvalidParameters,
    /// The configured distributions cannot realise a graph of the requested
    /// size.
    ConfigurationInfeasible,
    /// `run` was invoked a second time on the same generator.
    AlreadyRun,
    /// An output getter was called before the generator finished running.
    NotFinished,
    /// The run observed its cancellation token and stopped.
    Cancelled,
}

impl GeneratorErrorCode {
    /// Return the stable machine-readable representation of this error code.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParameters => "GENERATOR_INVALID_PARAMETERS",
            Self::ConfigurationInfeasible => "GENERATOR_CONFIGURATION_INFEASIBLE",
            Self::AlreadyRun => "GENERATOR_ALREADY_RUN",
            Self::NotFinished => "GENERATOR_NOT_FINISHED",
            Self::Cancelled => "GENERATOR_CANCELLED",
        }
    }
}

impl fmt::Display for GeneratorErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error type produced when configuring or running the generator.
#[non_exhaustive]
#[derive(Clone, Debug, Error, PartialEq)]
pub enum GeneratorError {
    /// A configuration parameter was outside its accepted range.
    #[error("invalid generator configuration: {reason}")]
    InvalidParameters {
        /// Human-friendly explanation of the configuration issue.
        reason: String,
    },
    /// The configured distributions cannot realise a graph of the requested
    /// size: in expectation there will be too few communities for the node
    /// with the largest membership demand.
    #[error(
        "graph impossible to realise: in expectation there will be \
         {expected_communities:.2} communities but a node may request \
         {max_memberships} memberships"
    )]
    ConfigurationInfeasible {
        /// Expected community count under the configured distributions.
        expected_communities: f64,
        /// Largest membership count the membership distribution can draw.
        max_memberships: usize,
    },
    /// `run` was invoked a second time on the same generator.
    #[error("run has already been called")]
    AlreadyRun,
    /// An output getter was called before the generator finished running.
    #[error("the generator has not finished running")]
    NotFinished,
    /// The run observed its cancellation token and stopped without producing
    /// partial streams.
    #[error("the run was cancelled")]
    Cancelled,
}

impl GeneratorError {
    /// Retrieve the stable [`GeneratorErrorCode`] for this error.
    pub const fn code(&self) -> GeneratorErrorCode {
        match self {
            Self::InvalidParameters { .. } => GeneratorErrorCode::InvalidParameters,
            Self::ConfigurationInfeasible { .. } => GeneratorErrorCode::ConfigurationInfeasible,
            Self::AlreadyRun => GeneratorErrorCode::AlreadyRun,
            Self::NotFinished => GeneratorErrorCode::NotFinished,
            Self::Cancelled => GeneratorErrorCode::Cancelled,
        }
    }
}

/// Convenient alias for results returned by the core API.
pub type Result<T> = core::result::Result<T, GeneratorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = GeneratorError::InvalidParameters {
            reason: "n must be at least 1".into(),
        };
        assert_eq!(err.code(), GeneratorErrorCode::InvalidParameters);
        assert_eq!(err.code().as_str(), "GENERATOR_INVALID_PARAMETERS");
        assert_eq!(
            GeneratorError::Cancelled.code().as_str(),
            "GENERATOR_CANCELLED"
        );
    }

    #[test]
    fn infeasible_message_names_both_quantities() {
        let err = GeneratorError::ConfigurationInfeasible {
            expected_communities: 1.5,
            max_memberships: 4,
        };
        let message = err.to_string();
        assert!(message.contains("1.50"));
        assert!(message.contains('4'));
    }
}
