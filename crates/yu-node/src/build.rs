//! Build steps (git clone, cmake, make) on top of any [`Node`]

use tracing::{info, instrument, warn};
use yu_exec::shell_quote;

use crate::error::BuildError;
use crate::traits::Node;

/// Where `git_clone` checks out when the caller has no preference
pub const DEFAULT_CHECKOUT_LOCATION: &str = "/tmp";

/// A node that can build software
pub struct BuildNode<N: Node> {
    node: N,
}

impl<N: Node> BuildNode<N> {
    pub fn new(node: N) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut N {
        &mut self.node
    }

    pub fn into_inner(self) -> N {
        self.node
    }

    /// Clone `repo_address` (with submodules) into `checkout_location`
    ///
    /// Returns the path of the checkout: `checkout_location/<project>`, where the
    /// project is the last URL segment without its extension.
    ///
    /// # Errors
    /// `MissingDirectory` when `checkout_location` is not a directory, `GitClone`
    /// when git exits non-zero
    #[instrument(skip(self), fields(host = %self.node.location()))]
    pub async fn git_clone(
        &mut self,
        repo_address: &str,
        checkout_location: &str,
    ) -> Result<String, BuildError> {
        self.require_dir(checkout_location, "git clone").await?;

        let command = format!(
            "cd {}; git clone --recurse-submodules {}",
            shell_quote(checkout_location),
            shell_quote(repo_address)
        );
        let output = self.node.command(&command, None, false).await?;
        if !output.success() {
            warn!(repo = %repo_address, status = output.status, "git clone failed");
            return Err(BuildError::GitClone {
                repo: repo_address.to_string(),
                message: output.combined_output(),
            });
        }

        let checkout = join(checkout_location, project_name(repo_address));
        info!(repo = %repo_address, checkout = %checkout, "cloned repository");
        Ok(checkout)
    }

    /// Run `cmake <arguments...>` in `directory`
    #[instrument(skip(self, arguments), fields(host = %self.node.location()))]
    pub async fn run_cmake<S: AsRef<str>>(
        &mut self,
        directory: &str,
        arguments: &[S],
    ) -> Result<(), BuildError> {
        self.require_dir(directory, "cmake command").await?;

        let output = self
            .node
            .command(&tool_command(directory, "cmake", arguments), None, false)
            .await?;
        if !output.success() {
            return Err(BuildError::CMake {
                status: output.status,
                message: output.combined_output(),
            });
        }
        Ok(())
    }

    /// Run `make <arguments...>` in `directory`
    #[instrument(skip(self, arguments), fields(host = %self.node.location()))]
    pub async fn run_make<S: AsRef<str>>(
        &mut self,
        directory: &str,
        arguments: &[S],
    ) -> Result<(), BuildError> {
        self.require_dir(directory, "make command").await?;

        let output = self
            .node
            .command(&tool_command(directory, "make", arguments), None, false)
            .await?;
        if !output.success() {
            return Err(BuildError::Make {
                status: output.status,
                message: output.combined_output(),
            });
        }
        Ok(())
    }

    async fn require_dir(&mut self, path: &str, action: &'static str) -> Result<(), BuildError> {
        if self.node.is_dir(path).await? {
            Ok(())
        } else {
            Err(BuildError::MissingDirectory {
                path: path.to_string(),
                action,
            })
        }
    }
}

// Arguments are passed through unquoted so callers can use shell syntax in them
fn tool_command<S: AsRef<str>>(directory: &str, tool: &str, arguments: &[S]) -> String {
    let mut command = format!("cd {}; {tool}", shell_quote(directory));
    for arg in arguments {
        command.push(' ');
        command.push_str(arg.as_ref());
    }
    command
}

/// `https://host/org/project.git` -> `project`
fn project_name(repo_address: &str) -> &str {
    let last = repo_address
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or(repo_address);
    match last.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => last,
    }
}

fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}
