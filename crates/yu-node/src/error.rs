//! Error types for yu-node

use thiserror::Error;
use yu_exec::{ExecError, KeyError};

/// Errors from `RemoteNode` operations
#[derive(Error, Debug)]
pub enum NodeError {
    /// Node was never connected, or was closed
    #[error("node session to {host} not connected")]
    NotConnected {
        /// Node address
        host: String,
    },

    /// Neither a key nor a password is available
    #[error("no authentication provided for {host}")]
    NoCredentials {
        /// Node address
        host: String,
    },

    /// Reconnect requested before any username was used
    #[error("no username has been provided for the reconnect to {host}")]
    NoUsername {
        /// Node address
        host: String,
    },

    /// SSH key could not be resolved
    #[error(transparent)]
    KeyNotFound(#[from] KeyError),

    /// `mkdir` target's parent does not exist
    #[error("cannot create {path} on {host}: it is not a leaf directory")]
    NotLeafDirectory {
        /// Requested directory
        path: String,
        /// Node address
        host: String,
    },

    /// Transport or command failure
    #[error("{action} on {host} failed: {source}")]
    Exec {
        /// Node address
        host: String,
        /// Operation that failed
        action: String,
        #[source]
        source: ExecError,
    },
}

impl NodeError {
    /// Underlying execution error, if any
    #[must_use]
    pub fn exec_error(&self) -> Option<&ExecError> {
        match self {
            NodeError::Exec { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Whether a command exceeded its timeout
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        self.exec_error().is_some_and(ExecError::is_timeout)
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.exec_error().is_some_and(ExecError::is_not_found)
    }
}

/// Errors from `BuildNode` operations
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("cannot perform {action} as the directory ({path}) does not exist")]
    MissingDirectory { path: String, action: &'static str },

    #[error("failed to clone {repo}: {message}")]
    GitClone { repo: String, message: String },

    #[error("cmake command failed with code {status}: {message}")]
    CMake { status: i32, message: String },

    #[error("make command failed with code {status}: {message}")]
    Make { status: i32, message: String },

    #[error(transparent)]
    Node(#[from] NodeError),
}
