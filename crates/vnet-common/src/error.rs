//! Common error types for vnet.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`VnetError`].
pub type VnetResult<T> = Result<T, VnetError>;

/// Errors across the vnet crates.
#[derive(Error, Diagnostic, Debug)]
pub enum VnetError {
    /// A kernel or platform resource does not exist.
    #[error("{kind} not found: {name}")]
    #[diagnostic(code(vnet::not_found))]
    NotFound {
        /// Resource kind ("link", "container", ...).
        kind: &'static str,
        /// Resource name.
        name: String,
    },

    /// Observed state did not reach the target within the attempt bound.
    #[error("{name} did not converge to {target} after {attempts} attempts")]
    #[diagnostic(
        code(vnet::convergence_timeout),
        help("Check the container log with `lxc info --show-log <name>`")
    )]
    ConvergenceTimeout {
        /// Machine name.
        name: String,
        /// Target state.
        target: String,
        /// Number of polls performed.
        attempts: u32,
    },

    /// A machine name or bridge index is not part of the configuration.
    #[error("Unknown reference: {message}")]
    #[diagnostic(code(vnet::config_reference))]
    ConfigReference {
        /// The error message.
        message: String,
    },

    /// A uniquely named resource already exists.
    #[error("Resource already exists: {resource}")]
    #[diagnostic(
        code(vnet::resource_conflict),
        help("Remove the existing resource or pick another name")
    )]
    ResourceConflict {
        /// The conflicting resource.
        resource: String,
    },

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(vnet::config))]
    Config {
        /// The error message.
        message: String,
    },

    /// An external command failed.
    #[error("{program} failed: {message}")]
    #[diagnostic(code(vnet::command))]
    Command {
        /// The program that was executed.
        program: String,
        /// Stderr or spawn error.
        message: String,
    },

    /// The operator declined a confirmation prompt.
    #[error("Operation aborted by user")]
    #[diagnostic(code(vnet::aborted))]
    Aborted,

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(vnet::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(vnet::serialization))]
    Serialization(String),
}

impl VnetError {
    /// Whether this error means the resource is absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<serde_json::Error> for VnetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for VnetError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = VnetError::NotFound {
            kind: "container",
            name: "router100".to_string(),
        };
        assert_eq!(err.to_string(), "container not found: router100");
        assert!(err.is_not_found());
    }

    #[test]
    fn timeout_display() {
        let err = VnetError::ConvergenceTimeout {
            name: "router100".to_string(),
            target: "Running".to_string(),
            attempts: 15,
        };
        assert_eq!(
            err.to_string(),
            "router100 did not converge to Running after 15 attempts"
        );
        assert!(!err.is_not_found());
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: VnetError = io_err.into();
        assert!(matches!(err, VnetError::Io(_)));
    }
}
