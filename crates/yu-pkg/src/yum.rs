//! yum adapter (RHEL/CentOS)

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use yu_exec::{CommandOutput, Executor, shell_quote};
use yu_node::Node;

use crate::error::PackageError;
use crate::traits::PackageManager;
use crate::types::{PackageManagerType, YumSource};

pub const YUM_CONFIG_FILE: &str = "/etc/yum.conf";
pub const YUM_REPO_DIR: &str = "/etc/yum.repos.d";

/// Comment written above a `proxy=` line that this adapter manages
pub const PROXY_CONFIG_MARKER: &str = "# Proxy settings added by yu";

/// yum package manager
///
/// Commands run through the executor, prefixed with `sudo` when configured.
/// The proxy setting and repo files are edited directly on the local filesystem.
pub struct Yum {
    executor: Arc<dyn Executor>,
    config_file: PathBuf,
    repo_dir: PathBuf,
    use_sudo: bool,
}

impl Yum {
    pub fn new(executor: Arc<dyn Executor>) -> Self {
        Self {
            executor,
            config_file: PathBuf::from(YUM_CONFIG_FILE),
            repo_dir: PathBuf::from(YUM_REPO_DIR),
            use_sudo: false,
        }
    }

    #[must_use]
    pub fn with_config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_file = path.into();
        self
    }

    #[must_use]
    pub fn with_repo_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.repo_dir = path.into();
        self
    }

    /// Prefix every yum invocation with `sudo`
    #[must_use]
    pub fn with_sudo(mut self, use_sudo: bool) -> Self {
        self.use_sudo = use_sudo;
        self
    }

    async fn yum(&self, args: &[&str]) -> Result<CommandOutput, PackageError> {
        let output = if self.use_sudo {
            let mut sudo_args = vec!["yum"];
            sudo_args.extend_from_slice(args);
            self.executor.run("sudo", &sudo_args).await?
        } else {
            self.executor.run("yum", args).await?
        };
        Ok(output)
    }

    async fn yum_checked(&self, action: &str, args: &[&str]) -> Result<CommandOutput, PackageError> {
        let output = self.yum(args).await?;
        if !output.success() {
            return Err(command_failed(action, &output));
        }
        Ok(output)
    }

    /// Shell form of a yum invocation for `Node::command`
    fn remote_command(&self, args: &str) -> String {
        if self.use_sudo {
            format!("sudo yum {args}")
        } else {
            format!("yum {args}")
        }
    }

    /// Point yum at `proxy` (`host:port` or a full URL)
    #[instrument(skip(self))]
    pub async fn set_system_proxy(&self, proxy: &str) -> Result<(), PackageError> {
        let proxy = if proxy.starts_with("http://") {
            proxy.to_string()
        } else {
            format!("http://{proxy}")
        };

        let contents = match tokio::fs::read_to_string(&self.config_file).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(PackageError::io(&self.config_file, e)),
        };

        tokio::fs::write(&self.config_file, apply_proxy(&contents, &proxy))
            .await
            .map_err(|e| PackageError::io(&self.config_file, e))?;

        info!(config = %self.config_file.display(), proxy = %proxy, "configured yum proxy");
        Ok(())
    }

    /// Whether any enabled repo id contains `name`
    pub async fn repo_is_configured(&self, name: &str) -> Result<bool, PackageError> {
        let output = self.yum_checked("repolist", &["-q", "repolist"]).await?;
        Ok(parse_repo_ids(&output.stdout).any(|id| id.contains(name)))
    }

    /// Write `<repo_dir>/<id>.repo` with a single enabled repository
    pub async fn add_repo(
        &self,
        repo_id: &str,
        repo_name: &str,
        baseurl: &str,
        gpgcheck: bool,
    ) -> Result<PathBuf, PackageError> {
        let data = format!(
            "[{repo_id}]\nname={repo_name}\nbaseurl={baseurl}\nenabled=1\ngpgcheck={}\n",
            u8::from(gpgcheck)
        );
        self.add_repo_with_raw_data(repo_id, &data).await
    }

    /// Write `repo_data` verbatim to `<repo_dir>/<id>.repo`
    pub async fn add_repo_with_raw_data(
        &self,
        repo_id: &str,
        repo_data: &str,
    ) -> Result<PathBuf, PackageError> {
        let path = self.repo_dir.join(format!("{repo_id}.repo"));
        tokio::fs::write(&path, repo_data)
            .await
            .map_err(|e| PackageError::io(&path, e))?;
        info!(repo = %repo_id, path = %path.display(), "wrote yum repo file");
        Ok(path)
    }

    pub async fn is_package_installed_on<N: Node>(
        &self,
        node: &mut N,
        name: &str,
    ) -> Result<bool, PackageError> {
        if node.location().is_local() {
            return self.is_package_installed(name).await;
        }

        let command = self.remote_command(&format!(
            "-q --disablerepo='*' list installed {}",
            shell_quote(name)
        ));
        Ok(node.command(&command, None, false).await?.success())
    }

    /// `yum localinstall` of an already downloaded package, repositories disabled
    #[instrument(skip(self))]
    pub async fn install_local_package(&self, path: &Path) -> Result<(), PackageError> {
        let location = path.to_string_lossy();
        self.yum_checked(
            &format!("localinstall {location}"),
            &["localinstall", "-y", "-q", "--disablerepo=*", location.as_ref()],
        )
        .await?;
        info!(package = %location, "installed local package");
        Ok(())
    }

    /// Install on `node`; a remote node needs a package file
    #[instrument(skip(self, node), fields(host = %node.location()))]
    pub async fn install_package_on<N: Node>(
        &self,
        node: &mut N,
        source: &YumSource,
    ) -> Result<(), PackageError> {
        if node.location().is_local() {
            debug!("installing locally");
            return match source {
                YumSource::File(path) => self.install_local_package(path).await,
                YumSource::Name(name) => self.install_package(name).await,
            };
        }

        let path = match source {
            YumSource::File(path) => path,
            YumSource::Name(name) => {
                warn!(package = %name, "remote install without a package file");
                return Err(PackageError::RemoteInstallRequiresFile {
                    package: name.clone(),
                    host: node.location().to_string(),
                });
            }
        };
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .ok_or_else(|| {
                PackageError::io(
                    path,
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "no file name"),
                )
            })?;

        info!(package = %path.display(), "copying package to node");
        node.copy_file_to(path, None, None).await?;

        let command = self.remote_command(&format!(
            "localinstall -y --disablerepo='*' {}",
            shell_quote(&file_name)
        ));
        let output = node.command(&command, None, false).await?;
        if !output.success() {
            return Err(command_failed(
                &format!("localinstall {} on {}", path.display(), node.location()),
                &output,
            ));
        }

        debug!(package = %file_name, "removing copied package");
        node.delete_file(&file_name, false).await?;
        info!(package = %file_name, "installed");
        Ok(())
    }

    /// `yum --downloadonly reinstall` and the path of the newest matching file
    ///
    /// # Errors
    /// `DownloadNotFound` when nothing in the directory starts with `name`
    #[instrument(skip(self))]
    pub async fn download_package(
        &self,
        name: &str,
        download_dir: Option<&Path>,
    ) -> Result<PathBuf, PackageError> {
        let download_dir = match download_dir {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().map_err(|e| PackageError::io(".", e))?,
        };
        let downloaddir_arg = format!("--downloaddir={}", download_dir.display());

        self.yum_checked(
            &format!("download {name}"),
            &["-q", "--downloadonly", &downloaddir_arg, "reinstall", name],
        )
        .await?;

        newest_download(&download_dir, name)
            .await?
            .ok_or_else(|| PackageError::DownloadNotFound(name.to_string()))
    }

    pub async fn download_packages<S: AsRef<str>>(
        &self,
        names: &[S],
        download_dir: &Path,
    ) -> Result<Vec<PathBuf>, PackageError> {
        let mut downloaded = Vec::with_capacity(names.len());
        for name in names {
            downloaded.push(self.download_package(name.as_ref(), Some(download_dir)).await?);
        }
        Ok(downloaded)
    }

    pub async fn remove_package_from<N: Node>(
        &self,
        node: &mut N,
        name: &str,
    ) -> Result<(), PackageError> {
        if node.location().is_local() {
            return self.remove_package(name).await;
        }

        let command = self.remote_command(&format!(
            "-y -q --disablerepo='*' remove {}",
            shell_quote(name)
        ));
        let output = node.command(&command, None, false).await?;
        if !output.success() {
            return Err(command_failed(
                &format!("remove {name} from {}", node.location()),
                &output,
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl PackageManager for Yum {
    async fn is_package_installed(&self, name: &str) -> Result<bool, PackageError> {
        Ok(self
            .yum(&["-q", "list", "installed", name])
            .await?
            .success())
    }

    #[instrument(skip(self))]
    async fn install_package(&self, name: &str) -> Result<(), PackageError> {
        self.yum_checked(&format!("install {name}"), &["-y", "-q", "install", name])
            .await?;
        info!(package = %name, "installed");
        Ok(())
    }

    async fn install_packages(&self, names: &[String]) -> Result<(), PackageError> {
        let mut args = vec!["-y", "-q", "install"];
        args.extend(names.iter().map(String::as_str));
        self.yum_checked(&format!("install {}", names.join(" ")), &args)
            .await?;
        Ok(())
    }

    async fn remove_package(&self, name: &str) -> Result<(), PackageError> {
        self.yum_checked(
            &format!("remove {name}"),
            &["-y", "-q", "--disablerepo=*", "remove", name],
        )
        .await?;
        Ok(())
    }

    fn manager_type(&self) -> PackageManagerType {
        PackageManagerType::Yum
    }
}

fn command_failed(action: &str, output: &CommandOutput) -> PackageError {
    PackageError::CommandFailed {
        manager: PackageManagerType::Yum,
        action: action.to_string(),
        status: output.status,
        output: output.combined_output(),
    }
}

/// Rewrite yum.conf contents so exactly one managed `proxy=` line remains
///
/// The first `proxy=` line, or the line after the marker, becomes `proxy=<proxy>`;
/// later `proxy=` lines are dropped. Without either, the marker and the setting
/// are appended.
pub fn apply_proxy(contents: &str, proxy: &str) -> String {
    let proxy_line = format!("proxy={proxy}");
    let mut lines = Vec::new();
    let mut replace_next = false;
    let mut done = false;

    for line in contents.lines() {
        if line.starts_with("proxy=") || replace_next {
            replace_next = false;
            if !done {
                lines.push(proxy_line.clone());
                done = true;
            }
        } else if line.starts_with(PROXY_CONFIG_MARKER) {
            lines.push(line.to_string());
            replace_next = true;
        } else {
            lines.push(line.to_string());
        }
    }

    if !done {
        if !replace_next {
            lines.push(PROXY_CONFIG_MARKER.to_string());
        }
        lines.push(proxy_line);
    }

    let mut out = lines.join("\n");
    out.push('\n');
    out
}

/// Repo ids from `yum -q repolist`: first column, header skipped
fn parse_repo_ids(output: &str) -> impl Iterator<Item = &str> {
    output
        .trim()
        .lines()
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
}

/// Most recently modified file in `dir` whose name starts with `prefix`
async fn newest_download(dir: &Path, prefix: &str) -> Result<Option<PathBuf>, PackageError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| PackageError::io(dir, e))?;
    let mut newest: Option<(SystemTime, PathBuf)> = None;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| PackageError::io(dir, e))?
    {
        if !entry.file_name().to_string_lossy().starts_with(prefix) {
            continue;
        }
        let modified = entry
            .metadata()
            .await
            .and_then(|meta| meta.modified())
            .map_err(|e| PackageError::io(entry.path(), e))?;
        if newest.as_ref().is_none_or(|(time, _)| modified >= *time) {
            newest = Some((modified, entry.path()));
        }
    }

    Ok(newest.map(|(_, path)| path))
}
