//! Error types for yu-exec

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during local or remote execution
#[derive(Error, Debug, Clone)]
pub enum ExecError {
    /// Failed to establish the transport to the remote host
    #[error("connection to {host} failed: {message}")]
    ConnectionFailed {
        /// Target host
        host: String,
        /// Underlying transport error
        message: String,
    },

    /// Authentication failed
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Command exited with a non-zero status where success was required
    #[error("command failed: {status} - {message}")]
    CommandFailed {
        /// Exit status code
        status: i32,
        /// Captured output
        message: String,
    },

    /// Transport fault while a command was running; the connection is still up
    #[error("failed to execute {command} on {host}: {message}")]
    ExecFailed {
        /// Target host
        host: String,
        /// Command that was running
        command: String,
        /// Underlying transport error
        message: String,
    },

    /// Command timed out
    #[error("execution of {command} on {host} timed out ({timeout:?})")]
    Timeout {
        /// Target host
        host: String,
        /// Command that exceeded the timeout
        command: String,
        /// Timeout duration that was exceeded
        timeout: Duration,
    },

    /// The transport was found closed after a fault
    #[error("SSH connection to {host} was lost")]
    ConnectionLost {
        /// Target host
        host: String,
    },

    /// SFTP subsystem or protocol error
    #[error("SFTP error on {host}: {message}")]
    Sftp {
        /// Target host
        host: String,
        /// Protocol error
        message: String,
    },

    /// Remote path does not exist
    #[error("{path} does not exist on {host}")]
    NotFound {
        /// Target host ("localhost" for local paths)
        host: String,
        /// Missing path
        path: String,
    },

    /// Destination exists but is not a directory
    #[error("the path {path} already exists on {host} and is not a directory")]
    PathConflict {
        /// Host holding the conflicting path
        host: String,
        /// Conflicting path
        path: String,
    },

    /// Local source is missing or not a directory
    #[error("{0} is not a directory")]
    NotADirectory(String),

    /// SSH key error
    #[error("SSH key error: {0}")]
    SshKeyError(String),

    /// Process spawn error
    #[error("failed to spawn process: {0}")]
    SpawnError(String),

    /// Local filesystem error during a transfer
    #[error("local I/O error on {path}: {message}")]
    LocalIo {
        /// Local path involved
        path: String,
        /// I/O error message
        message: String,
    },

    /// Connection not established
    #[error("not connected")]
    NotConnected,
}

impl ExecError {
    /// Whether the error comes from the transport rather than the request.
    ///
    /// These are the faults a reconnect can plausibly cure.
    #[must_use]
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            ExecError::ConnectionFailed { .. }
                | ExecError::ConnectionLost { .. }
                | ExecError::ExecFailed { .. }
                | ExecError::Sftp { .. }
                | ExecError::NotConnected
        )
    }

    /// Whether the error is a command timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout { .. })
    }

    /// Whether the error reports a missing path
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, ExecError::NotFound { .. })
    }

    pub(crate) fn local_io(path: impl AsRef<std::path::Path>, err: &std::io::Error) -> Self {
        ExecError::LocalIo {
            path: path.as_ref().display().to_string(),
            message: err.to_string(),
        }
    }
}
