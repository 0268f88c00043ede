//! pip adapter

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument};
use yu_exec::{CommandOutput, Executor, shell_quote};
use yu_node::Node;

use crate::error::PackageError;
use crate::traits::PackageManager;
use crate::types::{PackageManagerType, PackageSummary, PipSource};

/// Where the pip bootstrap script is published
pub const GET_PIP_URL: &str = "https://bootstrap.pypa.io/get-pip.py";
pub const GET_PIP_SCRIPT_NAME: &str = "get-pip.py";

/// Default interpreter used for `python -m pip`
pub const DEFAULT_PYTHON: &str = "python3";

/// pip through `python -m pip`
///
/// Local calls go through the executor with an argument vector. Remote calls are
/// rendered as shell commands and run with `Node::command`.
pub struct Pip {
    executor: Arc<dyn Executor>,
    python: String,
    http: reqwest::Client,
    get_pip_url: String,
}

impl Pip {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            python: DEFAULT_PYTHON.to_string(),
            http: reqwest::Client::new(),
            get_pip_url: GET_PIP_URL.to_string(),
        }
    }

    /// Use a different interpreter for local pip calls
    #[must_use]
    pub fn with_python(mut self, python: impl Into<String>) -> Self {
        self.python = python.into();
        self
    }

    #[must_use]
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Fetch the bootstrap script from somewhere other than PyPA
    #[must_use]
    pub fn with_get_pip_url(mut self, url: impl Into<String>) -> Self {
        self.get_pip_url = url.into();
        self
    }

    pub fn python(&self) -> &str {
        &self.python
    }

    async fn pip(&self, args: &[&str]) -> Result<CommandOutput, PackageError> {
        let mut full_args = vec!["-m", "pip"];
        full_args.extend_from_slice(args);
        Ok(self.executor.run(&self.python, &full_args).await?)
    }

    async fn pip_checked(&self, action: &str, args: &[&str]) -> Result<CommandOutput, PackageError> {
        let output = self.pip(args).await?;
        if !output.success() {
            return Err(command_failed(action, &output));
        }
        Ok(output)
    }

    /// Download `get-pip.py` into `destination_dir` and return its path
    #[instrument(skip(self))]
    pub async fn download_get_pip_script(
        &self,
        destination_dir: &Path,
    ) -> Result<PathBuf, PackageError> {
        let response = self
            .http
            .get(&self.get_pip_url)
            .send()
            .await?
            .error_for_status()?;
        let body = response.bytes().await?;

        let location = destination_dir.join(GET_PIP_SCRIPT_NAME);
        tokio::fs::write(&location, &body)
            .await
            .map_err(|e| PackageError::io(&location, e))?;

        info!(path = %location.display(), bytes = body.len(), "downloaded get-pip script");
        Ok(location)
    }

    /// `pip download -d <dir> <name>`; `dir` defaults to the working directory
    #[instrument(skip(self))]
    pub async fn download_package(
        &self,
        name: &str,
        target_dir: Option<&Path>,
    ) -> Result<(), PackageError> {
        let target_dir = match target_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().map_err(|e| PackageError::io(".", e))?,
        };
        let target = target_dir.to_string_lossy();

        self.pip_checked(&format!("download {name}"), &["download", "-d", target.as_ref(), name])
            .await?;
        Ok(())
    }

    pub async fn download_packages<S: AsRef<str>>(
        &self,
        names: &[S],
        target_dir: Option<&Path>,
    ) -> Result<(), PackageError> {
        for name in names {
            self.download_package(name.as_ref(), target_dir).await?;
        }
        Ok(())
    }

    pub async fn is_package_installed_on<N: Node>(
        &self,
        node: &mut N,
        name: &str,
    ) -> Result<bool, PackageError> {
        if node.location().is_local() {
            return self.is_package_installed(name).await;
        }

        let output = node
            .command(&format!("pip show {}", shell_quote(name)), None, false)
            .await?;
        Ok(output.success())
    }

    /// Install on `node`; a local node installs through the executor
    #[instrument(skip(self, node), fields(host = %node.location()))]
    pub async fn install_package_on<N: Node>(
        &self,
        node: &mut N,
        source: &PipSource,
    ) -> Result<(), PackageError> {
        if node.location().is_local() {
            debug!("installing locally");
            return match source {
                PipSource::Package(name) => self.install_package(name).await,
                PipSource::Wheel(path) => self.install_package(&path.to_string_lossy()).await,
            };
        }

        let (label, target) = match source {
            PipSource::Package(name) => (name.clone(), name.clone()),
            PipSource::Wheel(path) => {
                let file_name = path
                    .file_name()
                    .map(|name| name.to_string_lossy().to_string())
                    .ok_or_else(|| {
                        PackageError::io(
                            path,
                            std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
                        )
                    })?;
                info!(wheel = %path.display(), "copying wheel to node");
                node.copy_file_to(path, None, None).await?;
                (path.display().to_string(), file_name)
            }
        };

        let output = node
            .command(
                &format!("python -m pip install --no-index {}", shell_quote(&target)),
                None,
                false,
            )
            .await?;
        if !output.success() {
            return Err(command_failed(
                &format!("install {label} on {}", node.location()),
                &output,
            ));
        }

        info!(package = %label, "installed");
        Ok(())
    }

    /// `pip install -U <name>`
    pub async fn update_package(&self, name: &str) -> Result<(), PackageError> {
        self.pip_checked(&format!("update {name}"), &["install", "-U", name])
            .await?;
        Ok(())
    }

    /// `pip uninstall --yes <name>`
    pub async fn uninstall_package(&self, name: &str) -> Result<(), PackageError> {
        self.pip_checked(&format!("uninstall {name}"), &["uninstall", "--yes", name])
            .await?;
        info!(package = %name, "uninstalled");
        Ok(())
    }

    pub async fn uninstall_package_from<N: Node>(
        &self,
        node: &mut N,
        name: &str,
    ) -> Result<(), PackageError> {
        if node.location().is_local() {
            return self.uninstall_package(name).await;
        }

        let output = node
            .command(&format!("pip uninstall --yes {}", shell_quote(name)), None, false)
            .await?;
        if !output.success() {
            return Err(command_failed(
                &format!("uninstall {name} from {}", node.location()),
                &output,
            ));
        }
        Ok(())
    }

    /// Parsed `pip show <name>`
    ///
    /// # Errors
    /// `CommandFailed` when the package is not installed
    pub async fn show_package(&self, name: &str) -> Result<PackageSummary, PackageError> {
        let output = self
            .pip_checked(&format!("show {name}"), &["show", name])
            .await?;
        Ok(PackageSummary::parse(&output.stdout))
    }
}

#[async_trait]
impl PackageManager for Pip {
    async fn is_package_installed(&self, name: &str) -> Result<bool, PackageError> {
        Ok(self.pip(&["show", name]).await?.success())
    }

    #[instrument(skip(self))]
    async fn install_package(&self, name: &str) -> Result<(), PackageError> {
        self.pip_checked(&format!("install {name}"), &["install", name])
            .await?;
        info!(package = %name, "installed");
        Ok(())
    }

    async fn install_packages(&self, names: &[String]) -> Result<(), PackageError> {
        let mut args = vec!["install"];
        args.extend(names.iter().map(String::as_str));
        self.pip_checked(&format!("install {}", names.join(" ")), &args)
            .await?;
        Ok(())
    }

    async fn remove_package(&self, name: &str) -> Result<(), PackageError> {
        self.uninstall_package(name).await
    }

    fn manager_type(&self) -> PackageManagerType {
        PackageManagerType::Pip
    }
}

fn command_failed(action: &str, output: &CommandOutput) -> PackageError {
    PackageError::CommandFailed {
        manager: PackageManagerType::Pip,
        action: action.to_string(),
        status: output.status,
        output: output.combined_output(),
    }
}
