//! Node capability trait

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use yu_exec::CommandOutput;

use crate::error::NodeError;
use crate::location::Location;

/// The remote-execution capability that builds and package installs need
///
/// `RemoteNode` is the production implementation.
#[async_trait]
pub trait Node: Send {
    fn location(&self) -> &Location;

    /// Run a command; see `RemoteNode::command` for the soft-failure contract
    async fn command(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
        shell: bool,
    ) -> Result<CommandOutput, NodeError>;

    /// Existence check: `Ok(false)` for missing paths and non-directories
    async fn is_dir(&mut self, path: &str) -> Result<bool, NodeError>;

    async fn copy_file_to(
        &mut self,
        local_file: &Path,
        destination_filename: Option<&str>,
        destination_dir: Option<&str>,
    ) -> Result<(), NodeError>;

    async fn delete_file(&mut self, path: &str, error_if_not_exists: bool)
    -> Result<(), NodeError>;
}
