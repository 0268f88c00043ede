//! Executor and transport traits

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExecError;
use crate::result::{CommandOutput, FileStat};

/// Runs a program with arguments and captures its output
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run `program` with `args`
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ExecError>;

    /// Run `program` with `args`, failing with `ExecError::Timeout` after `timeout`
    async fn run_with_timeout(
        &self,
        program: &str,
        args: &[&str],
        timeout: Duration,
    ) -> Result<CommandOutput, ExecError>;

    fn executor_type(&self) -> &'static str;
}

/// One authenticated channel to a single host: command execution plus file transfer.
///
/// `Session` is the SSH implementation; `RemoteNode` is written against this trait so
/// its reconnect policy does not depend on a live server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Host this transport talks to
    fn host(&self) -> &str;

    /// Authenticate as `username`; a key takes priority over a password
    async fn connect(
        &mut self,
        username: &str,
        password: Option<&str>,
        key: Option<&Path>,
    ) -> Result<(), ExecError>;

    /// Release the channel; closing an unconnected transport is a no-op
    async fn close(&mut self) -> Result<(), ExecError>;

    async fn exec_command(
        &self,
        command: &str,
        timeout: Option<Duration>,
        shell: bool,
    ) -> Result<CommandOutput, ExecError>;

    async fn copy_file_to(
        &self,
        local_file: &Path,
        destination_filename: Option<&str>,
        destination_dir: Option<&str>,
    ) -> Result<(), ExecError>;

    async fn copy_file_from(
        &self,
        remote_file: &str,
        destination_filename: Option<&str>,
        destination_dir: Option<&Path>,
    ) -> Result<(), ExecError>;

    async fn copy_dir_to(
        &self,
        local_dir: &Path,
        destination_dir: Option<&str>,
    ) -> Result<(), ExecError>;

    async fn copy_dir_from(
        &self,
        remote_dir: &str,
        destination_dir: Option<&Path>,
    ) -> Result<(), ExecError>;

    async fn delete_file(&self, remote_path: &str, error_if_not_exists: bool)
    -> Result<(), ExecError>;

    async fn delete_dir(&self, remote_dir: &str, contents_only: bool) -> Result<(), ExecError>;

    async fn mkdir(&self, remote_dir: &str) -> Result<(), ExecError>;

    async fn stat(&self, remote_path: &str, follow_symlinks: bool) -> Result<FileStat, ExecError>;
}
