//! Remote node: one transport plus the reconnect-once policy

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use yu_exec::{
    CommandOutput, ExecError, FileStat, KeyError, KeySource, ResolvedKey, Session, SessionConfig,
    Transport, shell_quote,
};

use crate::error::NodeError;
use crate::location::Location;
use crate::traits::Node;

const HOSTNAME_FILE: &str = "/proc/sys/kernel/hostname";

/// A transfer or filesystem call that can be replayed after a reconnect
#[derive(Debug, Clone, Copy)]
enum FsOp<'a> {
    CopyFileTo {
        local_file: &'a Path,
        destination_filename: Option<&'a str>,
        destination_dir: Option<&'a str>,
    },
    CopyFileFrom {
        remote_file: &'a str,
        destination_filename: Option<&'a str>,
        destination_dir: Option<&'a Path>,
    },
    CopyDirTo {
        local_dir: &'a Path,
        destination_dir: Option<&'a str>,
    },
    CopyDirFrom {
        remote_dir: &'a str,
        destination_dir: Option<&'a Path>,
    },
    DeleteFile {
        path: &'a str,
        error_if_not_exists: bool,
    },
    DeleteDir {
        path: &'a str,
        contents_only: bool,
    },
    Mkdir {
        path: &'a str,
    },
}

impl FsOp<'_> {
    fn action(&self) -> &'static str {
        match self {
            FsOp::CopyFileTo { .. } => "copy_file_to",
            FsOp::CopyFileFrom { .. } => "copy_file_from",
            FsOp::CopyDirTo { .. } => "copy_dir_to",
            FsOp::CopyDirFrom { .. } => "copy_dir_from",
            FsOp::DeleteFile { .. } => "delete_file",
            FsOp::DeleteDir { .. } => "delete_dir",
            FsOp::Mkdir { .. } => "mkdir",
        }
    }

    async fn apply<T: Transport>(&self, transport: &T) -> Result<(), ExecError> {
        match *self {
            FsOp::CopyFileTo {
                local_file,
                destination_filename,
                destination_dir,
            } => {
                transport
                    .copy_file_to(local_file, destination_filename, destination_dir)
                    .await
            }
            FsOp::CopyFileFrom {
                remote_file,
                destination_filename,
                destination_dir,
            } => {
                transport
                    .copy_file_from(remote_file, destination_filename, destination_dir)
                    .await
            }
            FsOp::CopyDirTo {
                local_dir,
                destination_dir,
            } => transport.copy_dir_to(local_dir, destination_dir).await,
            FsOp::CopyDirFrom {
                remote_dir,
                destination_dir,
            } => transport.copy_dir_from(remote_dir, destination_dir).await,
            FsOp::DeleteFile {
                path,
                error_if_not_exists,
            } => transport.delete_file(path, error_if_not_exists).await,
            FsOp::DeleteDir {
                path,
                contents_only,
            } => transport.delete_dir(path, contents_only).await,
            FsOp::Mkdir { path } => transport.mkdir(path).await,
        }
    }
}

/// A host reached over one transport
///
/// Created disconnected. Operations never connect implicitly: a node that has not
/// been connected rejects filesystem calls with [`NodeError::NotConnected`] and
/// answers `command` with a failed [`CommandOutput`].
///
/// When an operation fails with a transport fault the node reconnects once with
/// the last username and retries the operation once with the same arguments.
pub struct RemoteNode<T: Transport = Session> {
    location: Location,
    transport: T,
    connected: bool,
    connected_as_root: bool,
    connected_username: Option<String>,
    password: Option<String>,
    ssh_key: Option<ResolvedKey>,
    configured_hostname: Option<String>,
}

impl RemoteNode<Session> {
    /// Create a disconnected node for `address` with default SSH settings
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_config(address, SessionConfig::default())
    }

    pub fn with_config(address: impl Into<String>, config: SessionConfig) -> Self {
        let address = address.into();
        Self::with_transport(Session::new(address, config))
    }
}

impl<T: Transport> std::fmt::Debug for RemoteNode<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteNode")
            .field("location", &self.location)
            .field("connected", &self.connected)
            .field("connected_username", &self.connected_username)
            .field("has_key", &self.ssh_key.is_some())
            .finish_non_exhaustive()
    }
}

impl<T: Transport> RemoteNode<T> {
    /// Wrap an existing transport; the node takes its address from the transport
    pub fn with_transport(transport: T) -> Self {
        Self {
            location: Location::new(transport.host()),
            transport,
            connected: false,
            connected_as_root: false,
            connected_username: None,
            password: None,
            ssh_key: None,
            configured_hostname: None,
        }
    }

    /// Register a private key file; it must exist
    ///
    /// # Errors
    /// Returns `NodeError::KeyNotFound` if `path` is not a file
    pub fn set_ssh_key(&mut self, path: impl Into<PathBuf>) -> Result<(), NodeError> {
        self.set_ssh_key_source(&KeySource::Path(path.into()))
    }

    /// Register a private key from any [`KeySource`]
    ///
    /// # Errors
    /// Returns `NodeError::KeyNotFound` if the key cannot be resolved
    pub fn set_ssh_key_source(&mut self, source: &KeySource) -> Result<(), NodeError> {
        let resolved = source.resolve()?;
        debug!(host = %self.location, key = %resolved.path().display(), "registered SSH key");
        self.ssh_key = Some(resolved);
        Ok(())
    }

    /// Remember a password for later connects and reconnects
    pub fn set_password(&mut self, password: impl Into<String>) {
        self.password = Some(password.into());
    }

    /// Connect as `username`
    ///
    /// A registered key wins over any password. Without a key, `password` or the
    /// remembered password is used, and a password that succeeds is remembered.
    ///
    /// # Errors
    /// `NoCredentials` when neither a key nor a password is available,
    /// `KeyNotFound` when the registered key has disappeared, `Exec` when the
    /// transport refuses the connection or the credentials.
    #[instrument(skip(self, password), fields(host = %self.location))]
    pub async fn connect(&mut self, username: &str, password: Option<&str>) -> Result<(), NodeError> {
        let host = self.location.address().to_string();
        let password = password.map(str::to_string).or_else(|| self.password.clone());

        let key = self.ssh_key.as_ref().map(ResolvedKey::path);
        let result = match (key, password.as_deref()) {
            (Some(key), _) => {
                if !key.is_file() {
                    return Err(KeyError::NotFound(key.display().to_string()).into());
                }
                self.transport.connect(username, None, Some(key)).await
            }
            (None, Some(password)) => self.transport.connect(username, Some(password), None).await,
            (None, None) => return Err(NodeError::NoCredentials { host }),
        };

        result.map_err(|source| NodeError::Exec {
            host: host.clone(),
            action: "connect".to_string(),
            source,
        })?;

        if self.ssh_key.is_none() {
            self.password = password;
        }
        self.connected = true;
        self.connected_as_root = username == "root";
        self.connected_username = Some(username.to_string());

        info!(host = %host, user = %username, "node connected");
        Ok(())
    }

    /// Close the transport and connect again
    ///
    /// Uses the last connected username when `username` is `None`.
    ///
    /// # Errors
    /// `NoUsername` when no username is known, otherwise as `connect`
    #[instrument(skip(self, password), fields(host = %self.location))]
    pub async fn reconnect(
        &mut self,
        username: Option<&str>,
        password: Option<&str>,
    ) -> Result<(), NodeError> {
        if let Err(e) = self.transport.close().await {
            debug!(host = %self.location, error = %e, "ignoring close failure before reconnect");
        }
        self.connected = false;

        let username = match username {
            Some(username) => username.to_string(),
            None => self
                .connected_username
                .clone()
                .ok_or_else(|| NodeError::NoUsername {
                    host: self.location.address().to_string(),
                })?,
        };

        self.connect(&username, password).await
    }

    /// Close the transport; the node must be connected again before further use
    ///
    /// # Errors
    /// Returns `NodeError::Exec` if the disconnect fails
    pub async fn close(&mut self) -> Result<(), NodeError> {
        self.connected = false;
        self.transport
            .close()
            .await
            .map_err(|source| self.exec_failure("close", source))
    }

    /// Run a command on the node
    ///
    /// Never errors for connection state: a disconnected node yields status 1 and
    /// a "not connected" message. After a transport fault the node reconnects and
    /// retries once; if that also fails the result is status 1 with
    /// "(attempted one retry)".
    ///
    /// # Errors
    /// Only a timeout is an error, on either attempt.
    #[instrument(skip(self), fields(host = %self.location))]
    pub async fn command(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        shell: bool,
    ) -> Result<CommandOutput, NodeError> {
        if !self.connected {
            warn!(host = %self.location, command = %command, "command on disconnected node");
            return Ok(CommandOutput::synthetic(
                1,
                format!("Node session to {} not connected", self.location),
            ));
        }

        match self.transport.exec_command(command, timeout, shell).await {
            Ok(output) => Ok(output),
            Err(e) if e.is_transport_fault() => {
                warn!(host = %self.location, error = %e, "transport fault during command, reconnecting once");
                self.connected = false;
                let retry_failed = CommandOutput::synthetic(
                    1,
                    format!(
                        "Node session to {} not connected (attempted one retry)",
                        self.location
                    ),
                );

                if let Err(e) = self.reconnect(None, None).await {
                    warn!(host = %self.location, error = %e, "reconnect failed");
                    return Ok(retry_failed);
                }

                match self.transport.exec_command(command, timeout, shell).await {
                    Ok(output) => Ok(output),
                    Err(e) if e.is_timeout() => Err(self.exec_failure("command", e)),
                    Err(e) => {
                        warn!(host = %self.location, error = %e, "command retry failed");
                        Ok(retry_failed)
                    }
                }
            }
            Err(e) => Err(self.exec_failure("command", e)),
        }
    }

    /// Upload one file, named after the source unless `destination_filename` is given
    pub async fn copy_file_to(
        &mut self,
        local_file: &Path,
        destination_filename: Option<&str>,
        destination_dir: Option<&str>,
    ) -> Result<(), NodeError> {
        self.run_with_retry(FsOp::CopyFileTo {
            local_file,
            destination_filename,
            destination_dir,
        })
        .await
    }

    /// Download one file into `destination_dir` or the working directory
    pub async fn copy_file_from(
        &mut self,
        remote_file: &str,
        destination_filename: Option<&str>,
        destination_dir: Option<&Path>,
    ) -> Result<(), NodeError> {
        self.run_with_retry(FsOp::CopyFileFrom {
            remote_file,
            destination_filename,
            destination_dir,
        })
        .await
    }

    /// Copy `local_dir` to `destination_dir/<name>` on the node
    pub async fn copy_dir_to(
        &mut self,
        local_dir: &Path,
        destination_dir: Option<&str>,
    ) -> Result<(), NodeError> {
        self.run_with_retry(FsOp::CopyDirTo {
            local_dir,
            destination_dir,
        })
        .await
    }

    /// Copy `remote_dir` to `destination_dir/<name>` locally
    pub async fn copy_dir_from(
        &mut self,
        remote_dir: &str,
        destination_dir: Option<&Path>,
    ) -> Result<(), NodeError> {
        self.run_with_retry(FsOp::CopyDirFrom {
            remote_dir,
            destination_dir,
        })
        .await
    }

    /// Remove a remote file; a missing file is only an error when `error_if_not_exists`
    pub async fn delete_file(
        &mut self,
        path: &str,
        error_if_not_exists: bool,
    ) -> Result<(), NodeError> {
        self.run_with_retry(FsOp::DeleteFile {
            path,
            error_if_not_exists,
        })
        .await
    }

    /// Delete a directory tree, or only its contents
    pub async fn delete_dir(&mut self, path: &str, contents_only: bool) -> Result<(), NodeError> {
        self.run_with_retry(FsOp::DeleteDir {
            path,
            contents_only,
        })
        .await
    }

    /// Create a leaf directory; the parent must already exist
    ///
    /// # Errors
    /// `NotLeafDirectory` when the parent is missing
    pub async fn mkdir(&mut self, path: &str) -> Result<(), NodeError> {
        self.ensure_connected()?;

        let parent = parent_dir(path);
        if !self.parent_is_dir(parent).await? {
            return Err(NodeError::NotLeafDirectory {
                path: path.to_string(),
                host: self.location.address().to_string(),
            });
        }

        self.run_with_retry(FsOp::Mkdir { path }).await
    }

    /// Whether `path` exists; stat failures count as absent
    pub async fn exists(&self, path: &str, follow_symlinks: bool) -> Result<bool, NodeError> {
        Ok(self.probe(path, follow_symlinks).await?.is_some())
    }

    /// Whether `path` is a regular file
    pub async fn is_file(&self, path: &str, follow_symlinks: bool) -> Result<bool, NodeError> {
        Ok(self
            .probe(path, follow_symlinks)
            .await?
            .is_some_and(|stat| stat.is_file()))
    }

    /// Whether `path` is a directory
    pub async fn is_dir(&self, path: &str, follow_symlinks: bool) -> Result<bool, NodeError> {
        Ok(self
            .probe(path, follow_symlinks)
            .await?
            .is_some_and(|stat| stat.is_dir()))
    }

    /// Extract a `.tar.gz` in the directory that contains it
    ///
    /// # Errors
    /// Returns `NodeError::Exec` wrapping `CommandFailed` when tar exits non-zero
    pub async fn extract_tar(&mut self, path_to_tar: &str) -> Result<CommandOutput, NodeError> {
        let (directory, filename) = split_path(path_to_tar);
        let command = format!(
            "cd {}; tar -xvzf {}",
            shell_quote(directory),
            shell_quote(filename)
        );

        let output = self.command(&command, None, false).await?;
        if !output.success() {
            return Err(self.exec_failure(
                "extract_tar",
                ExecError::CommandFailed {
                    status: output.status,
                    message: output.combined_output(),
                },
            ));
        }
        Ok(output)
    }

    /// Hostname the node reports for itself, cached after the first read
    ///
    /// `Ok(None)` when the hostname file cannot be read.
    pub async fn get_configured_hostname(&mut self) -> Result<Option<String>, NodeError> {
        if let Some(hostname) = &self.configured_hostname {
            return Ok(Some(hostname.clone()));
        }

        let output = self
            .command(&format!("cat {HOSTNAME_FILE}"), None, false)
            .await?;
        if !output.success() {
            debug!(host = %self.location, status = output.status, "could not read configured hostname");
            return Ok(None);
        }

        let hostname = output.stdout.trim().to_string();
        self.configured_hostname = Some(hostname.clone());
        Ok(Some(hostname))
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    #[must_use]
    pub fn is_connected_as_root(&self) -> bool {
        self.connected && self.connected_as_root
    }

    #[must_use]
    pub fn location(&self) -> &Location {
        &self.location
    }

    #[must_use]
    pub fn host_to_connect_to(&self) -> &str {
        self.location.address()
    }

    #[must_use]
    pub fn connected_username(&self) -> Option<&str> {
        self.connected_username.as_deref()
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn ensure_connected(&self) -> Result<(), NodeError> {
        if self.connected {
            Ok(())
        } else {
            Err(NodeError::NotConnected {
                host: self.location.address().to_string(),
            })
        }
    }

    fn exec_failure(&self, action: &str, source: ExecError) -> NodeError {
        NodeError::Exec {
            host: self.location.address().to_string(),
            action: action.to_string(),
            source,
        }
    }

    async fn probe(&self, path: &str, follow_symlinks: bool) -> Result<Option<FileStat>, NodeError> {
        self.ensure_connected()?;
        match self.transport.stat(path, follow_symlinks).await {
            Ok(stat) => Ok(Some(stat)),
            Err(e) => {
                debug!(host = %self.location, path = %path, error = %e, "stat probe failed");
                Ok(None)
            }
        }
    }

    /// Stat `parent` for `mkdir`, reconnecting once on a transport fault
    ///
    /// Path errors mean "not a directory"; a second transport fault is returned.
    async fn parent_is_dir(&mut self, parent: &str) -> Result<bool, NodeError> {
        let stat = match self.transport.stat(parent, true).await {
            Err(e) if e.is_transport_fault() => {
                warn!(host = %self.location, path = %parent, error = %e, "transport fault during stat, reconnecting once");
                self.connected = false;
                self.reconnect(None, None).await?;
                self.transport.stat(parent, true).await
            }
            other => other,
        };

        match stat {
            Ok(stat) => Ok(stat.is_dir()),
            Err(e) if e.is_transport_fault() => Err(self.exec_failure("mkdir", e)),
            Err(e) => {
                debug!(host = %self.location, path = %parent, error = %e, "parent directory stat failed");
                Ok(false)
            }
        }
    }

    async fn run_with_retry(&mut self, op: FsOp<'_>) -> Result<(), NodeError> {
        self.ensure_connected()?;
        let action = op.action();

        match op.apply(&self.transport).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_transport_fault() => {
                warn!(host = %self.location, action, error = %e, "transport fault, reconnecting once");
                self.connected = false;
                self.reconnect(None, None).await?;
                op.apply(&self.transport)
                    .await
                    .map_err(|e| self.exec_failure(action, e))
            }
            Err(e) => Err(self.exec_failure(action, e)),
        }
    }
}

#[async_trait]
impl<T: Transport> Node for RemoteNode<T> {
    fn location(&self) -> &Location {
        &self.location
    }

    async fn command(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        shell: bool,
    ) -> Result<CommandOutput, NodeError> {
        RemoteNode::command(self, command, timeout, shell).await
    }

    async fn is_dir(&mut self, path: &str) -> Result<bool, NodeError> {
        RemoteNode::is_dir(self, path, true).await
    }

    async fn copy_file_to(
        &mut self,
        local_file: &Path,
        destination_filename: Option<&str>,
        destination_dir: Option<&str>,
    ) -> Result<(), NodeError> {
        RemoteNode::copy_file_to(self, local_file, destination_filename, destination_dir).await
    }

    async fn delete_file(
        &mut self,
        path: &str,
        error_if_not_exists: bool,
    ) -> Result<(), NodeError> {
        RemoteNode::delete_file(self, path, error_if_not_exists).await
    }
}

/// Directory part of a remote path: `/` for top-level entries, `.` for bare names
fn parent_dir(path: &str) -> &str {
    split_path(path).0
}

fn split_path(path: &str) -> (&str, &str) {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", name)) => ("/", name),
        Some((dir, name)) => (dir, name),
        None => (".", trimmed),
    }
}
