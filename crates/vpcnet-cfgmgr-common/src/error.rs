//! Error types for dataplane programming operations.
//!
//! This module defines the error types used throughout the vpcnet crates.
//! All errors implement `std::error::Error` via `thiserror`.
//!
//! The variants fall into four groups that callers handle differently:
//!
//! | Group | Variants | Behavior |
//! |-------|----------|----------|
//! | Precondition | [`CfgMgrError::Precondition`] | Raised before any side effect |
//! | Environment | [`CfgMgrError::InvalidEnvironment`] | Fatal, never repaired |
//! | Registry | [`CfgMgrError::VpcNotFound`], [`CfgMgrError::TagsExhausted`] | Fatal to the operation |
//! | Command | [`CfgMgrError::CommandFailed`] | Aggregated, surfaced at operation end |
//! | Task | [`CfgMgrError::TaskAborted`] | The intent's outcome is unknown |

use std::io;
use thiserror::Error;

/// Result type alias for dataplane operations.
pub type CfgMgrResult<T> = Result<T, CfgMgrError>;

/// Errors that can occur while programming the local switch.
#[derive(Debug, Error)]
pub enum CfgMgrError {
    /// An input argument failed validation.
    #[error("Precondition violated for {field}: {message}")]
    Precondition {
        /// The argument that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// The integration/tunnel bridge pair is in a state this host cannot use.
    #[error("Invalid environment: {detail}")]
    InvalidEnvironment {
        /// What was observed.
        detail: String,
    },

    /// The registry holds no entry for the VPC.
    #[error("VPC '{vpc_id}' not found in registry")]
    VpcNotFound {
        /// The VPC identifier.
        vpc_id: String,
    },

    /// No isolation tag is left to hand out.
    #[error("No isolation tag available for VPC '{vpc_id}'")]
    TagsExhausted {
        /// The VPC that asked for a tag.
        vpc_id: String,
    },

    /// A switch command returned a non-zero status.
    ///
    /// When an operation issues several commands this carries the last
    /// failure observed.
    #[error("Command failed: '{command}' (exit code {exit_code})")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// The exit code.
        exit_code: i32,
    },

    /// Failed to execute a shell command (spawn error).
    #[error("Failed to execute shell command '{command}': {source}")]
    ShellExec {
        /// The command that failed to execute.
        command: String,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// An intent's task panicked or was cancelled before returning.
    #[error("Intent task aborted: {detail}")]
    TaskAborted {
        /// The runtime's description of the abort.
        detail: String,
    },

    /// IO error while reading or writing configuration.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl CfgMgrError {
    /// Creates a precondition error.
    pub fn precondition(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Precondition {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid environment error.
    pub fn invalid_environment(detail: impl Into<String>) -> Self {
        Self::InvalidEnvironment {
            detail: detail.into(),
        }
    }

    /// Creates a VPC not found error.
    pub fn vpc_not_found(vpc_id: impl Into<String>) -> Self {
        Self::VpcNotFound {
            vpc_id: vpc_id.into(),
        }
    }

    /// Creates a command failure error.
    pub fn command_failed(command: impl Into<String>, exit_code: i32) -> Self {
        Self::CommandFailed {
            command: command.into(),
            exit_code,
        }
    }

    /// Creates a task aborted error.
    pub fn task_aborted(detail: impl Into<String>) -> Self {
        Self::TaskAborted {
            detail: detail.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error was raised before anything was changed.
    pub fn is_precondition(&self) -> bool {
        matches!(self, CfgMgrError::Precondition { .. })
    }

    /// Returns true if this error indicates a transient condition
    /// that may succeed on retry.
    ///
    /// Nothing in this crate retries on its own; this only informs callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CfgMgrError::CommandFailed { .. } | CfgMgrError::ShellExec { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CfgMgrError::precondition("vpc_id", "is empty");
        assert_eq!(err.to_string(), "Precondition violated for vpc_id: is empty");
    }

    #[test]
    fn test_invalid_environment() {
        let err = CfgMgrError::invalid_environment("br-int=true br-tun=false");
        assert_eq!(
            err.to_string(),
            "Invalid environment: br-int=true br-tun=false"
        );
    }

    #[test]
    fn test_command_failed() {
        let err = CfgMgrError::command_failed("add-br br-int", 1);
        assert!(err.to_string().contains("add-br br-int"));
        assert!(err.to_string().contains("exit code 1"));
    }

    #[test]
    fn test_vpc_not_found() {
        let err = CfgMgrError::vpc_not_found("vpc-1");
        assert_eq!(err.to_string(), "VPC 'vpc-1' not found in registry");
    }

    #[test]
    fn test_task_aborted() {
        let err = CfgMgrError::task_aborted("task 7 panicked");
        assert_eq!(err.to_string(), "Intent task aborted: task 7 panicked");
        assert!(!err.is_retryable());
        assert!(!matches!(err, CfgMgrError::InvalidEnvironment { .. }));
    }

    #[test]
    fn test_is_retryable() {
        assert!(CfgMgrError::command_failed("br-exists br-int", 2).is_retryable());
        assert!(!CfgMgrError::precondition("tunnel_id", "is 0").is_retryable());
        assert!(!CfgMgrError::invalid_environment("half built").is_retryable());
        assert!(!CfgMgrError::vpc_not_found("vpc-1").is_retryable());
    }

    #[test]
    fn test_is_precondition() {
        assert!(CfgMgrError::precondition("port_name", "is empty").is_precondition());
        assert!(!CfgMgrError::vpc_not_found("vpc-1").is_precondition());
    }
}
