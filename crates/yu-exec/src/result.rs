//! Result types for command execution and remote file metadata

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Result of a command execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit status code (0 for success)
    pub status: i32,
    /// stdout output
    pub stdout: String,
    /// stderr output
    pub stderr: String,
    /// Time taken to execute
    pub duration: Duration,
}

impl CommandOutput {
    /// Build an output that carries only a status and a message, with no process behind it
    pub fn synthetic(status: i32, message: impl Into<String>) -> Self {
        Self {
            status,
            stdout: message.into(),
            stderr: String::new(),
            duration: Duration::ZERO,
        }
    }

    /// Check if command succeeded (exit code 0)
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }

    /// Combine stdout and stderr
    #[must_use]
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

const S_IFMT: u32 = 0o170_000;
const S_IFDIR: u32 = 0o040_000;
const S_IFREG: u32 = 0o100_000;
const S_IFLNK: u32 = 0o120_000;

/// File metadata reported by `stat`/`lstat`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileStat {
    /// Full mode: file type bits plus permission bits
    pub mode: u32,
    /// Size in bytes
    pub size: u64,
}

impl FileStat {
    /// Create a stat record from a raw mode and size
    #[must_use]
    pub fn new(mode: u32, size: u64) -> Self {
        Self { mode, size }
    }

    #[must_use]
    pub fn is_dir(&self) -> bool {
        self.mode & S_IFMT == S_IFDIR
    }

    #[must_use]
    pub fn is_file(&self) -> bool {
        self.mode & S_IFMT == S_IFREG
    }

    #[must_use]
    pub fn is_symlink(&self) -> bool {
        self.mode & S_IFMT == S_IFLNK
    }

    /// Permission bits only (including setuid/setgid/sticky)
    #[must_use]
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }
}

impl From<&russh_sftp::protocol::FileAttributes> for FileStat {
    fn from(attrs: &russh_sftp::protocol::FileAttributes) -> Self {
        Self {
            mode: attrs.permissions.unwrap_or(0),
            size: attrs.size.unwrap_or(0),
        }
    }
}

/// Transport settings for an SSH session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Port (default 22)
    #[serde(default = "default_port")]
    pub port: u16,
    /// Keep-alive interval in seconds
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_interval_secs: u64,
    /// Unanswered keep-alives before the transport gives up
    #[serde(default = "default_keepalive_max")]
    pub keepalive_max: usize,
    /// Drop the connection after this many idle seconds (unset: never)
    #[serde(default)]
    pub inactivity_timeout_secs: Option<u64>,
    /// Terminal type requested when a command runs in a shell
    #[serde(default = "default_term")]
    pub term: String,
}

fn default_port() -> u16 {
    22
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_keepalive_max() -> usize {
    3
}

fn default_term() -> String {
    "xterm".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            keepalive_interval_secs: default_keepalive_secs(),
            keepalive_max: default_keepalive_max(),
            inactivity_timeout_secs: None,
            term: default_term(),
        }
    }
}

impl SessionConfig {
    /// Set custom port
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Keep-alive interval as a `Duration`
    #[must_use]
    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_secs(self.keepalive_interval_secs)
    }
}
