//! SSH session: command execution and SFTP file transfer using russh

use std::borrow::Cow;
use std::future::Future;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::keys::ssh_key;
use russh::keys::{PrivateKeyWithHashAlg, load_secret_key};
use russh::{ChannelMsg, Disconnect, client};
use russh_sftp::client::SftpSession;
use russh_sftp::client::error::Error as SftpClientError;
use russh_sftp::protocol::{FileAttributes, StatusCode};
use tokio::io::AsyncWriteExt;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};

use crate::error::ExecError;
use crate::result::{CommandOutput, FileStat, SessionConfig};
use crate::traits::Transport;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// SSH client handler for russh
#[derive(Debug)]
struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // Accept all server keys (like StrictHostKeyChecking=no)
        Ok(true)
    }
}

enum Credential<'a> {
    Key(&'a Path),
    Password(&'a str),
}

/// One SSH connection to a single host
///
/// Created unconnected; `connect` authenticates and `close` releases the handle.
/// Every file operation opens its own SFTP subsystem channel on the shared
/// connection and closes it when done.
pub struct Session {
    host: String,
    config: SessionConfig,
    handle: Option<client::Handle<SshClientHandler>>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("host", &self.host)
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Create an unconnected session for `host`
    pub fn new(host: impl Into<String>, config: SessionConfig) -> Self {
        Self {
            host: host.into(),
            config,
            handle: None,
        }
    }

    /// Session settings
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Whether a handle is held and the transport has not been closed
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_closed())
    }

    fn handle(&self) -> Result<&client::Handle<SshClientHandler>, ExecError> {
        self.handle.as_ref().ok_or(ExecError::NotConnected)
    }

    /// Classify a russh fault: a closed transport means the connection is gone
    fn transport_fault(&self, action: &str, err: &russh::Error) -> ExecError {
        let closed = self.handle.as_ref().is_none_or(|h| h.is_closed());
        if closed {
            warn!(host = %self.host, action = %action, error = %err, "SSH connection lost");
            ExecError::ConnectionLost {
                host: self.host.clone(),
            }
        } else {
            ExecError::Sftp {
                host: self.host.clone(),
                message: format!("{action}: {err}"),
            }
        }
    }

    fn sftp_error(&self, path: &str, err: SftpClientError) -> ExecError {
        match err {
            SftpClientError::Status(status)
                if matches!(status.status_code, StatusCode::NoSuchFile) =>
            {
                ExecError::NotFound {
                    host: self.host.clone(),
                    path: path.to_string(),
                }
            }
            other => ExecError::Sftp {
                host: self.host.clone(),
                message: format!("{path}: {other}"),
            },
        }
    }

    async fn open_sftp(&self) -> Result<SftpSession, ExecError> {
        let handle = self.handle()?;

        let channel = handle
            .channel_open_session()
            .await
            .map_err(|e| self.transport_fault("open SFTP channel", &e))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| self.transport_fault("request SFTP subsystem", &e))?;

        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| ExecError::Sftp {
                host: self.host.clone(),
                message: format!("SFTP handshake: {e}"),
            })
    }

    async fn close_sftp(&self, sftp: SftpSession) {
        if let Err(e) = sftp.close().await {
            debug!(host = %self.host, error = %e, "failed to close SFTP session");
        }
    }

    async fn sftp_stat(
        &self,
        sftp: &SftpSession,
        path: &str,
        follow_symlinks: bool,
    ) -> Result<FileStat, ExecError> {
        let attrs = if follow_symlinks {
            sftp.metadata(path).await
        } else {
            sftp.symlink_metadata(path).await
        }
        .map_err(|e| self.sftp_error(path, e))?;

        Ok(FileStat::from(&attrs))
    }

    async fn chmod_remote(&self, sftp: &SftpSession, path: &str, mode: u32) -> Result<(), ExecError> {
        let attrs = FileAttributes {
            size: None,
            uid: None,
            user: None,
            gid: None,
            group: None,
            permissions: Some(mode),
            atime: None,
            mtime: None,
        };
        sftp.set_metadata(path, attrs)
            .await
            .map_err(|e| self.sftp_error(path, e))
    }

    /// Upload one file and apply the local permission bits to the copy
    async fn put_file(
        &self,
        sftp: &SftpSession,
        local_path: &Path,
        remote_path: &str,
    ) -> Result<(), ExecError> {
        debug!(host = %self.host, local = %local_path.display(), remote = %remote_path, "uploading file");

        let mut local_file = tokio::fs::File::open(local_path)
            .await
            .map_err(|e| ExecError::local_io(local_path, &e))?;
        let mode = local_file
            .metadata()
            .await
            .map_err(|e| ExecError::local_io(local_path, &e))?
            .permissions()
            .mode();

        let mut remote_file = sftp
            .create(remote_path)
            .await
            .map_err(|e| self.sftp_error(remote_path, e))?;
        tokio::io::copy(&mut local_file, &mut remote_file)
            .await
            .map_err(|e| ExecError::Sftp {
                host: self.host.clone(),
                message: format!("writing {remote_path}: {e}"),
            })?;
        remote_file
            .shutdown()
            .await
            .map_err(|e| ExecError::Sftp {
                host: self.host.clone(),
                message: format!("closing {remote_path}: {e}"),
            })?;

        self.chmod_remote(sftp, remote_path, mode & 0o7777).await
    }

    /// Download one file and apply the remote permission bits to the copy
    async fn get_file(
        &self,
        sftp: &SftpSession,
        remote_path: &str,
        local_path: &Path,
    ) -> Result<(), ExecError> {
        debug!(host = %self.host, remote = %remote_path, local = %local_path.display(), "downloading file");

        let mut remote_file = sftp
            .open(remote_path)
            .await
            .map_err(|e| self.sftp_error(remote_path, e))?;
        let mut local_file = tokio::fs::File::create(local_path)
            .await
            .map_err(|e| ExecError::local_io(local_path, &e))?;
        tokio::io::copy(&mut remote_file, &mut local_file)
            .await
            .map_err(|e| ExecError::Sftp {
                host: self.host.clone(),
                message: format!("reading {remote_path}: {e}"),
            })?;
        local_file
            .flush()
            .await
            .map_err(|e| ExecError::local_io(local_path, &e))?;

        let stat = self.sftp_stat(sftp, remote_path, true).await?;
        tokio::fs::set_permissions(
            local_path,
            std::fs::Permissions::from_mode(stat.permissions()),
        )
        .await
        .map_err(|e| ExecError::local_io(local_path, &e))
    }

    /// Mirror `local_dir` under `destination_dir`, directories before their contents
    async fn upload_dir(
        &self,
        sftp: &SftpSession,
        local_dir: &Path,
        destination_dir: &str,
    ) -> Result<(), ExecError> {
        for item in local_tree(local_dir).await? {
            match item {
                UploadItem::Dir(relative) => {
                    let remote_dir = remote_join(destination_dir, &relative);
                    match self.sftp_stat(sftp, &remote_dir, false).await {
                        Ok(stat) if !stat.is_dir() => {
                            return Err(ExecError::PathConflict {
                                host: self.host.clone(),
                                path: remote_dir,
                            });
                        }
                        Ok(_) => {}
                        Err(e) if e.is_not_found() => {
                            sftp.create_dir(remote_dir.as_str())
                                .await
                                .map_err(|e| self.sftp_error(&remote_dir, e))?;
                        }
                        Err(e) => return Err(e),
                    }
                }
                UploadItem::File { local, relative } => {
                    self.put_file(sftp, &local, &remote_join(destination_dir, &relative))
                        .await?;
                }
            }
        }
        Ok(())
    }

    /// `chain` holds the canonical remote directories from the root down to `remote_dir`
    fn download_dir<'a>(
        &'a self,
        sftp: &'a SftpSession,
        remote_dir: &'a str,
        destination_dir: &'a Path,
        chain: Vec<String>,
    ) -> BoxFuture<'a, Result<(), ExecError>> {
        Box::pin(async move {
            let entries = sftp
                .read_dir(remote_dir)
                .await
                .map_err(|e| self.sftp_error(remote_dir, e))?;

            let local_copy_dir = destination_dir.join(remote_file_name(remote_dir));
            match tokio::fs::metadata(&local_copy_dir).await {
                Ok(meta) if !meta.is_dir() => {
                    return Err(ExecError::PathConflict {
                        host: "localhost".to_string(),
                        path: local_copy_dir.display().to_string(),
                    });
                }
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    tokio::fs::create_dir(&local_copy_dir)
                        .await
                        .map_err(|e| ExecError::local_io(&local_copy_dir, &e))?;
                }
                Err(e) => return Err(ExecError::local_io(&local_copy_dir, &e)),
            }

            for entry in entries {
                let name = entry.file_name();
                if name == "." || name == ".." {
                    continue;
                }
                let remote_path = remote_join(remote_dir, &name);
                let stat = self.sftp_stat(sftp, &remote_path, false).await?;

                if stat.is_dir() {
                    let mut next = chain.clone();
                    next.push(remote_join(chain.last().map_or(remote_dir, String::as_str), &name));
                    self.download_dir(sftp, &remote_path, &local_copy_dir, next)
                        .await?;
                } else if stat.is_file() {
                    self.get_file(sftp, &remote_path, &local_copy_dir.join(&name))
                        .await?;
                } else if stat.is_symlink() {
                    let target = match self.sftp_stat(sftp, &remote_path, true).await {
                        Ok(target) => target,
                        Err(e) if e.is_not_found() => {
                            warn!(host = %self.host, path = %remote_path, "skipping dangling symlink");
                            continue;
                        }
                        Err(e) => return Err(e),
                    };

                    if target.is_file() {
                        self.get_file(sftp, &remote_path, &local_copy_dir.join(&name))
                            .await?;
                    } else if target.is_dir() {
                        let resolved = sftp
                            .canonicalize(remote_path.as_str())
                            .await
                            .map_err(|e| self.sftp_error(&remote_path, e))?;
                        if closes_remote_cycle(&resolved, &chain) {
                            debug!(host = %self.host, path = %remote_path, target = %resolved, "skipping symlink back into the walk");
                            continue;
                        }
                        let mut next = chain.clone();
                        next.push(resolved);
                        self.download_dir(sftp, &remote_path, &local_copy_dir, next)
                            .await?;
                    }
                }
            }
            Ok(())
        })
    }

    async fn run_channel(
        &self,
        handle: &client::Handle<SshClientHandler>,
        command: &str,
        shell: bool,
    ) -> Result<(i32, Vec<u8>, Vec<u8>), russh::Error> {
        let mut channel = handle.channel_open_session().await?;

        if shell {
            channel
                .request_pty(false, &self.config.term, 80, 24, 0, 0, &[])
                .await?;
        }
        channel.exec(true, command).await?;

        let mut status = -1;
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();

        // The exit status may arrive after EOF, so drain until the channel closes
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { data } => {
                    stdout.extend_from_slice(&data);
                }
                ChannelMsg::ExtendedData { data, ext } => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    status = i32::try_from(exit_status).unwrap_or(-1);
                }
                ChannelMsg::ExitSignal { signal_name, .. } => {
                    debug!(host = %self.host, signal = ?signal_name, "remote command terminated by signal");
                }
                _ => {}
            }
        }

        Ok((status, stdout, stderr))
    }
}

#[async_trait]
impl Transport for Session {
    fn host(&self) -> &str {
        &self.host
    }

    #[instrument(skip(self, password, key), fields(host = %self.host))]
    async fn connect(
        &mut self,
        username: &str,
        password: Option<&str>,
        key: Option<&Path>,
    ) -> Result<(), ExecError> {
        let credential = match (key, password) {
            (Some(key_path), _) => Credential::Key(key_path),
            (None, Some(password)) => Credential::Password(password),
            (None, None) => {
                return Err(ExecError::AuthenticationFailed(
                    "must provide a key file or a password to connect".to_string(),
                ));
            }
        };

        if self.handle.is_some() {
            if let Err(e) = self.close().await {
                warn!(host = %self.host, error = %e, "failed to close previous SSH session");
            }
        }

        info!(
            host = %self.host,
            port = self.config.port,
            user = %username,
            "connecting to SSH"
        );

        let config = client::Config {
            keepalive_interval: Some(self.config.keepalive_interval()),
            keepalive_max: self.config.keepalive_max,
            inactivity_timeout: self.config.inactivity_timeout_secs.map(Duration::from_secs),
            ..Default::default()
        };

        let mut session = client::connect(
            Arc::new(config),
            (self.host.as_str(), self.config.port),
            SshClientHandler,
        )
        .await
        .map_err(|e| ExecError::ConnectionFailed {
            host: self.host.clone(),
            message: e.to_string(),
        })?;

        let (method, auth_res) = match credential {
            Credential::Key(key_path) => {
                let key_pair = load_secret_key(key_path, None).map_err(|e| {
                    ExecError::SshKeyError(format!("{}: {e}", key_path.display()))
                })?;

                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .ok()
                    .flatten()
                    .flatten();
                let res = session
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg),
                    )
                    .await
                    .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;
                ("public key", res)
            }
            Credential::Password(password) => {
                let res = session
                    .authenticate_password(username, password)
                    .await
                    .map_err(|e| ExecError::AuthenticationFailed(e.to_string()))?;
                ("password", res)
            }
        };

        if !auth_res.success() {
            return Err(ExecError::AuthenticationFailed(format!(
                "{method} authentication as {username} rejected by {}",
                self.host
            )));
        }

        info!(host = %self.host, user = %username, "SSH connected and authenticated");

        self.handle = Some(session);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        if let Some(session) = self.handle.take() {
            if session.is_closed() {
                return Ok(());
            }
            session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
                .map_err(|e| ExecError::ConnectionFailed {
                    host: self.host.clone(),
                    message: format!("disconnect: {e}"),
                })?;
            info!(host = %self.host, "SSH disconnected");
        }
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.host))]
    async fn exec_command(
        &self,
        command: &str,
        timeout_duration: Option<Duration>,
        shell: bool,
    ) -> Result<CommandOutput, ExecError> {
        let handle = self.handle()?;

        debug!(command = %command, shell, "executing remote command");

        let start = Instant::now();
        let run = self.run_channel(handle, command, shell);

        let result = match timeout_duration {
            Some(limit) => match timeout(limit, run).await {
                Ok(result) => result,
                Err(_) => {
                    error!(
                        command = %command,
                        timeout = ?limit,
                        elapsed = ?start.elapsed(),
                        "command timed out"
                    );
                    return Err(ExecError::Timeout {
                        host: self.host.clone(),
                        command: command.to_string(),
                        timeout: limit,
                    });
                }
            },
            None => run.await,
        };

        let (status, stdout, stderr) = result.map_err(|e| {
            if handle.is_closed() {
                warn!(command = %command, error = %e, "SSH connection lost during command");
                ExecError::ConnectionLost {
                    host: self.host.clone(),
                }
            } else {
                ExecError::ExecFailed {
                    host: self.host.clone(),
                    command: command.to_string(),
                    message: e.to_string(),
                }
            }
        })?;

        let duration = start.elapsed();

        debug!(
            command = %command,
            status = status,
            duration = ?duration,
            "remote command completed"
        );

        Ok(CommandOutput {
            status,
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            duration,
        })
    }

    #[instrument(skip(self), fields(host = %self.host))]
    async fn copy_file_to(
        &self,
        local_file: &Path,
        destination_filename: Option<&str>,
        destination_dir: Option<&str>,
    ) -> Result<(), ExecError> {
        let filename = match destination_filename {
            Some(name) => name.to_string(),
            None => local_file_name(local_file)?,
        };
        let remote_path = remote_join(destination_dir.unwrap_or(""), &filename);

        let sftp = self.open_sftp().await?;
        let result = self.put_file(&sftp, local_file, &remote_path).await;
        self.close_sftp(sftp).await;
        result
    }

    #[instrument(skip(self), fields(host = %self.host))]
    async fn copy_file_from(
        &self,
        remote_file: &str,
        destination_filename: Option<&str>,
        destination_dir: Option<&Path>,
    ) -> Result<(), ExecError> {
        let filename = destination_filename.unwrap_or_else(|| remote_file_name(remote_file));
        let local_path = match destination_dir {
            Some(dir) => dir.join(filename),
            None => PathBuf::from(filename),
        };

        let sftp = self.open_sftp().await?;
        let result = self.get_file(&sftp, remote_file, &local_path).await;
        self.close_sftp(sftp).await;
        result
    }

    #[instrument(skip(self), fields(host = %self.host))]
    async fn copy_dir_to(
        &self,
        local_dir: &Path,
        destination_dir: Option<&str>,
    ) -> Result<(), ExecError> {
        if !local_dir.is_dir() {
            return Err(ExecError::NotADirectory(local_dir.display().to_string()));
        }

        let sftp = self.open_sftp().await?;
        let result = self
            .upload_dir(&sftp, local_dir, destination_dir.unwrap_or(""))
            .await;
        self.close_sftp(sftp).await;
        result
    }

    #[instrument(skip(self), fields(host = %self.host))]
    async fn copy_dir_from(
        &self,
        remote_dir: &str,
        destination_dir: Option<&Path>,
    ) -> Result<(), ExecError> {
        let destination = match destination_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().map_err(|e| ExecError::local_io(".", &e))?,
        };

        let sftp = self.open_sftp().await?;
        let result = match sftp.canonicalize(remote_dir).await {
            Ok(root) => {
                self.download_dir(&sftp, remote_dir, &destination, vec![root])
                    .await
            }
            Err(e) => Err(self.sftp_error(remote_dir, e)),
        };
        self.close_sftp(sftp).await;
        result
    }

    #[instrument(skip(self), fields(host = %self.host))]
    async fn delete_file(
        &self,
        remote_path: &str,
        error_if_not_exists: bool,
    ) -> Result<(), ExecError> {
        let sftp = self.open_sftp().await?;
        let result = match sftp.remove_file(remote_path).await {
            Ok(()) => Ok(()),
            Err(e) => match self.sftp_error(remote_path, e) {
                err if err.is_not_found() && !error_if_not_exists => {
                    debug!(path = %remote_path, "file already absent");
                    Ok(())
                }
                err => Err(err),
            },
        };
        self.close_sftp(sftp).await;
        result
    }

    #[instrument(skip(self), fields(host = %self.host))]
    async fn delete_dir(&self, remote_dir: &str, contents_only: bool) -> Result<(), ExecError> {
        let output = self
            .exec_command(&format!("rm -rf {}", shell_quote(remote_dir)), None, false)
            .await?;
        if !output.success() {
            return Err(ExecError::CommandFailed {
                status: output.status,
                message: format!(
                    "failed to delete {remote_dir} on {}: {}",
                    self.host,
                    output.combined_output().trim()
                ),
            });
        }

        if contents_only {
            self.mkdir(remote_dir).await?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(host = %self.host))]
    async fn mkdir(&self, remote_dir: &str) -> Result<(), ExecError> {
        let sftp = self.open_sftp().await?;
        let result = sftp
            .create_dir(remote_dir)
            .await
            .map_err(|e| self.sftp_error(remote_dir, e));
        self.close_sftp(sftp).await;
        result
    }

    async fn stat(&self, remote_path: &str, follow_symlinks: bool) -> Result<FileStat, ExecError> {
        let sftp = self.open_sftp().await?;
        let result = self.sftp_stat(&sftp, remote_path, follow_symlinks).await;
        self.close_sftp(sftp).await;
        result
    }
}

/// Quote one argument for a POSIX shell
#[must_use]
pub fn shell_quote(arg: &str) -> String {
    shell_escape::unix::escape(Cow::Borrowed(arg)).into_owned()
}

/// Join a remote directory and a name with `/`; an empty directory means the login directory
fn remote_join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Last component of a remote path, ignoring trailing slashes
fn remote_file_name(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed)
}

fn local_file_name(path: &Path) -> Result<String, ExecError> {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .ok_or_else(|| ExecError::LocalIo {
            path: path.display().to_string(),
            message: "path has no file name".to_string(),
        })
}

/// Whether `candidate` is `dir` itself or one of its ancestors (component-wise)
fn is_ancestor_or_self(candidate: &str, dir: &str) -> bool {
    Path::new(dir).starts_with(Path::new(candidate))
}

/// Whether a remote link to `target` re-enters a directory on the walk or one of its ancestors
fn closes_remote_cycle(target: &str, chain: &[String]) -> bool {
    chain.iter().any(|dir| is_ancestor_or_self(target, dir))
}

/// Local counterpart of [`closes_remote_cycle`] over canonical paths
fn closes_local_cycle(target: &Path, chain: &[PathBuf]) -> bool {
    chain.iter().any(|dir| dir.starts_with(target))
}

/// One step of a directory upload, relative to the destination directory
#[derive(Debug, Clone, PartialEq, Eq)]
enum UploadItem {
    Dir(String),
    File { local: PathBuf, relative: String },
}

/// Flatten `root` into upload steps, following symlinks that do not close a cycle
async fn local_tree(root: &Path) -> Result<Vec<UploadItem>, ExecError> {
    let canonical_root = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| ExecError::local_io(root, &e))?;
    let mut items = Vec::new();
    let mut pending = vec![(root.to_path_buf(), local_file_name(root)?, vec![canonical_root])];

    while let Some((dir, relative_dir, chain)) = pending.pop() {
        items.push(UploadItem::Dir(relative_dir.clone()));

        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| ExecError::local_io(&dir, &e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ExecError::local_io(&dir, &e))?
        {
            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            let relative = remote_join(&relative_dir, &name);
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| ExecError::local_io(&path, &e))?;

            if file_type.is_file() {
                items.push(UploadItem::File {
                    local: path,
                    relative,
                });
            } else if file_type.is_dir() {
                let mut next = chain.clone();
                if let Some(current) = chain.last() {
                    next.push(current.join(&name));
                }
                pending.push((path, relative, next));
            } else if file_type.is_symlink() {
                let Ok(target) = tokio::fs::metadata(&path).await else {
                    warn!(path = %path.display(), "skipping dangling symlink");
                    continue;
                };
                if target.is_file() {
                    items.push(UploadItem::File {
                        local: path,
                        relative,
                    });
                } else if target.is_dir() {
                    let canonical = tokio::fs::canonicalize(&path)
                        .await
                        .map_err(|e| ExecError::local_io(&path, &e))?;
                    if closes_local_cycle(&canonical, &chain) {
                        debug!(path = %path.display(), target = %canonical.display(), "skipping symlink back into the walk");
                        continue;
                    }
                    let mut next = chain.clone();
                    next.push(canonical);
                    pending.push((path, relative, next));
                }
            }
        }
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_join() {
        assert_eq!(remote_join("", "lab"), "lab");
        assert_eq!(remote_join("/home/ops", "lab"), "/home/ops/lab");
        assert_eq!(remote_join("/home/ops/", "lab"), "/home/ops/lab");
    }

    #[test]
    fn test_remote_file_name() {
        assert_eq!(remote_file_name("/opt/sdl/journal"), "journal");
        assert_eq!(remote_file_name("/opt/sdl/journal/"), "journal");
        assert_eq!(remote_file_name("journal"), "journal");
    }

    #[test]
    fn test_is_ancestor_or_self() {
        assert!(is_ancestor_or_self("/data", "/data/a/b"));
        assert!(is_ancestor_or_self("/data/a/b", "/data/a/b"));
        assert!(!is_ancestor_or_self("/data/a/b/c", "/data/a/b"));
        assert!(!is_ancestor_or_self("/data/other", "/data/a"));
        // component-wise, not string prefix
        assert!(!is_ancestor_or_self("/data/a", "/data/ab"));
    }

    #[test]
    fn test_closes_remote_cycle() {
        let chain = vec!["/data/a".to_string(), "/data/b".to_string()];
        // a -> b -> back to a
        assert!(closes_remote_cycle("/data/a", &chain));
        assert!(closes_remote_cycle("/data", &chain));
        assert!(closes_remote_cycle("/data/b", &chain));
        assert!(!closes_remote_cycle("/data/c", &chain));
        assert!(!closes_remote_cycle("/data/a/inner", &chain));
    }

    fn relative_paths(items: &[UploadItem]) -> Vec<String> {
        let mut paths: Vec<String> = items
            .iter()
            .map(|item| match item {
                UploadItem::Dir(relative) => format!("{relative}/"),
                UploadItem::File { relative, .. } => relative.clone(),
            })
            .collect();
        paths.sort();
        paths
    }

    #[tokio::test]
    async fn test_local_tree_skips_link_to_ancestor() {
        let root = tempfile::tempdir().unwrap();
        let top = root.path().join("top");
        let nested = top.join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("f.txt"), "x").unwrap();
        std::os::unix::fs::symlink(&top, nested.join("up")).unwrap();

        let items = local_tree(&top).await.unwrap();
        assert_eq!(
            relative_paths(&items),
            vec!["top/", "top/a/", "top/a/b/", "top/a/b/f.txt"]
        );
    }

    #[tokio::test]
    async fn test_local_tree_stops_mutual_links() {
        let root = tempfile::tempdir().unwrap();
        let a = root.path().join("a");
        let b = root.path().join("b");
        std::fs::create_dir(&a).unwrap();
        std::fs::create_dir(&b).unwrap();
        std::fs::write(a.join("in_a"), "a").unwrap();
        std::fs::write(b.join("in_b"), "b").unwrap();
        std::os::unix::fs::symlink(&b, a.join("l")).unwrap();
        std::os::unix::fs::symlink(&a, b.join("m")).unwrap();

        let items = local_tree(&a).await.unwrap();
        assert_eq!(
            relative_paths(&items),
            vec!["a/", "a/in_a", "a/l/", "a/l/in_b"]
        );
    }

    #[tokio::test]
    async fn test_local_tree_orders_dirs_before_contents() {
        let root = tempfile::tempdir().unwrap();
        let top = root.path().join("top");
        std::fs::create_dir_all(top.join("sub")).unwrap();
        std::fs::write(top.join("sub").join("f"), "x").unwrap();
        std::fs::write(root.path().join("outside"), "x").unwrap();
        std::os::unix::fs::symlink(root.path().join("outside"), top.join("linked")).unwrap();

        let items = local_tree(&top).await.unwrap();
        assert_eq!(items[0], UploadItem::Dir("top".to_string()));
        let sub = items
            .iter()
            .position(|i| *i == UploadItem::Dir("top/sub".to_string()))
            .unwrap();
        let file = items
            .iter()
            .position(|i| matches!(i, UploadItem::File { relative, .. } if relative == "top/sub/f"))
            .unwrap();
        assert!(sub < file);
        assert!(relative_paths(&items).contains(&"top/linked".to_string()));
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/tmp/plain"), "/tmp/plain");
        assert_eq!(shell_quote("/tmp/with space"), "'/tmp/with space'");
    }

    #[tokio::test]
    async fn test_unconnected_session_rejects_operations() {
        let session = Session::new("db1.example.com", SessionConfig::default());
        assert!(!session.is_connected());

        let result = session.exec_command("true", None, false).await;
        assert!(matches!(result, Err(ExecError::NotConnected)));

        let result = session.stat("/tmp", true).await;
        assert!(matches!(result, Err(ExecError::NotConnected)));
    }

    #[tokio::test]
    async fn test_connect_requires_credentials() {
        let mut session = Session::new("db1.example.com", SessionConfig::default());
        let result = session.connect("root", None, None).await;
        assert!(matches!(result, Err(ExecError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn test_close_unconnected_is_noop() {
        let mut session = Session::new("db1.example.com", SessionConfig::default());
        assert!(session.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_copy_dir_to_rejects_missing_source() {
        let session = Session::new("db1.example.com", SessionConfig::default());
        let result = session
            .copy_dir_to(Path::new("/nonexistent/yu-src"), Some("/tmp"))
            .await;
        assert!(matches!(result, Err(ExecError::NotADirectory(_))));
    }
}
