//! Error types for yu-pkg

use thiserror::Error;
use yu_exec::ExecError;
use yu_node::NodeError;

use crate::types::PackageManagerType;

/// Errors that can occur during package operations
#[derive(Error, Debug)]
pub enum PackageError {
    /// Package manager exited non-zero
    #[error("{manager} {action} failed with status {status}: {output}")]
    CommandFailed {
        manager: PackageManagerType,
        /// What was attempted, e.g. `install requests`
        action: String,
        status: i32,
        /// Combined stdout and stderr
        output: String,
    },

    /// yum cannot install by name on a remote node
    #[error("couldn't install {package} on {host}: attempting to install remotely without a package file")]
    RemoteInstallRequiresFile { package: String, host: String },

    /// `--downloadonly` finished but no matching file appeared
    #[error("couldn't find the downloaded package for {0}")]
    DownloadNotFound(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Node(#[from] NodeError),
}

impl PackageError {
    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        PackageError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Output captured from a failed package manager run
    #[must_use]
    pub fn output(&self) -> Option<&str> {
        match self {
            PackageError::CommandFailed { output, .. } => Some(output),
            _ => None,
        }
    }
}
