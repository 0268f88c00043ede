//! Subcommands and their handlers

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Subcommand;
use eyre::{Result, WrapErr};
use tracing::warn;
use yu_exec::LocalExecutor;
use yu_net::ConnectivityChecker;
use yu_node::{BuildNode, DEFAULT_CHECKOUT_LOCATION, Location, RemoteNode};
use yu_pkg::{Pip, PipSource, Yum, YumSource};

use crate::config::Config;
use crate::factory;

#[derive(Subcommand)]
pub enum Commands {
    /// Run a command on a host
    Exec {
        host: String,
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
        /// Run inside a pseudo-terminal
        #[arg(long)]
        shell: bool,
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },
    /// Copy a local file or directory to a host
    Put {
        host: String,
        local: PathBuf,
        /// Remote directory (default: login directory)
        #[arg(long)]
        dest_dir: Option<String>,
    },
    /// Copy a file or directory from a host
    Get {
        host: String,
        remote: String,
        /// Local directory (default: working directory)
        #[arg(long)]
        dest_dir: Option<PathBuf>,
        /// Copy a whole directory tree
        #[arg(long)]
        dir: bool,
    },
    /// Print the hostname a host reports for itself
    Hostname { host: String },
    /// Clone a git repository, with submodules, on a host
    #[command(name = "clone")]
    GitClone {
        host: String,
        repo: String,
        #[arg(long, default_value = DEFAULT_CHECKOUT_LOCATION)]
        into: String,
    },
    /// Run cmake in a directory on a host
    Cmake {
        host: String,
        dir: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// Run make in a directory on a host
    Make {
        host: String,
        dir: String,
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
    /// pip packages, locally or on a host
    #[command(subcommand)]
    Pip(PipCommand),
    /// yum packages, locally or on a host
    #[command(subcommand)]
    Yum(YumCommand),
    /// Diagnose DNS, IP and HTTP reachability from this machine
    Connectivity {
        /// Only check this URL
        #[arg(long)]
        url: Option<String>,
        /// HTTP proxy, `host:port` or a URL
        #[arg(long)]
        proxy: Option<String>,
        /// Only ping these hosts
        #[arg(long, num_args = 1..)]
        ping: Vec<String>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum PipCommand {
    /// Print `pip show` fields of a local package
    Show { name: String },
    /// Exit 0 when the package is installed
    Installed {
        name: String,
        #[arg(long)]
        host: Option<String>,
    },
    /// Install a package name or a `.whl` file
    Install {
        package: String,
        #[arg(long)]
        host: Option<String>,
    },
    Uninstall {
        name: String,
        #[arg(long)]
        host: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum YumCommand {
    /// Exit 0 when the package is installed
    Installed {
        name: String,
        #[arg(long)]
        host: Option<String>,
    },
    /// Install a package; remote hosts need an `.rpm` file
    Install {
        package: String,
        #[arg(long)]
        host: Option<String>,
    },
    Remove {
        name: String,
        #[arg(long)]
        host: Option<String>,
    },
    /// Exit 0 when a local repo id contains `name`
    RepoConfigured { name: String },
}

/// Shared state for one CLI invocation
pub struct App {
    config: Config,
    user: Option<String>,
}

impl App {
    pub fn new(config: Config, user: Option<String>) -> Self {
        Self { config, user }
    }

    pub async fn run(&self, command: Commands) -> Result<ExitCode> {
        match command {
            Commands::Exec {
                host,
                timeout,
                shell,
                command,
            } => self.exec(&host, timeout.map(Duration::from_secs), shell, &command).await,
            Commands::Put {
                host,
                local,
                dest_dir,
            } => self.put(&host, &local, dest_dir.as_deref()).await,
            Commands::Get {
                host,
                remote,
                dest_dir,
                dir,
            } => self.get(&host, &remote, dest_dir.as_deref(), dir).await,
            Commands::Hostname { host } => self.hostname(&host).await,
            Commands::GitClone { host, repo, into } => self.clone_repo(&host, &repo, &into).await,
            Commands::Cmake { host, dir, args } => self.build_tool(&host, Tool::Cmake, &dir, &args).await,
            Commands::Make { host, dir, args } => self.build_tool(&host, Tool::Make, &dir, &args).await,
            Commands::Pip(command) => self.pip(command).await,
            Commands::Yum(command) => self.yum(command).await,
            Commands::Connectivity {
                url,
                proxy,
                ping,
                json,
            } => self.connectivity(url, proxy, &ping, json).await,
        }
    }

    async fn connect(&self, host: &str) -> Result<RemoteNode> {
        let entry = self.config.resolve_host(host);
        factory::connect_node(&entry, &self.config.ssh, self.user.as_deref()).await
    }

    /// Connected node for `host`, or an unconnected local node
    async fn target(&self, host: Option<&str>) -> Result<RemoteNode> {
        match host {
            Some(host) => self.connect(host).await,
            None => Ok(RemoteNode::new(Location::LOCALHOST)),
        }
    }

    async fn exec(
        &self,
        host: &str,
        timeout: Option<Duration>,
        shell: bool,
        command: &[String],
    ) -> Result<ExitCode> {
        let mut node = self.connect(host).await?;
        let result = node.command(&command.join(" "), timeout, shell).await;
        close(&mut node).await;

        let output = result?;
        print!("{}", output.stdout);
        eprint!("{}", output.stderr);
        Ok(exit_code(output.status))
    }

    async fn put(&self, host: &str, local: &Path, dest_dir: Option<&str>) -> Result<ExitCode> {
        let mut node = self.connect(host).await?;
        let result = if local.is_dir() {
            node.copy_dir_to(local, dest_dir).await
        } else {
            node.copy_file_to(local, None, dest_dir).await
        };
        close(&mut node).await;

        result.wrap_err_with(|| format!("failed to copy {} to {host}", local.display()))?;
        Ok(ExitCode::SUCCESS)
    }

    async fn get(
        &self,
        host: &str,
        remote: &str,
        dest_dir: Option<&Path>,
        dir: bool,
    ) -> Result<ExitCode> {
        let mut node = self.connect(host).await?;
        let result = if dir {
            node.copy_dir_from(remote, dest_dir).await
        } else {
            node.copy_file_from(remote, None, dest_dir).await
        };
        close(&mut node).await;

        result.wrap_err_with(|| format!("failed to copy {remote} from {host}"))?;
        Ok(ExitCode::SUCCESS)
    }

    async fn hostname(&self, host: &str) -> Result<ExitCode> {
        let mut node = self.connect(host).await?;
        let result = node.get_configured_hostname().await;
        close(&mut node).await;

        match result? {
            Some(hostname) => {
                println!("{hostname}");
                Ok(ExitCode::SUCCESS)
            }
            None => {
                eprintln!("{host}: hostname could not be read");
                Ok(ExitCode::FAILURE)
            }
        }
    }

    async fn clone_repo(&self, host: &str, repo: &str, into: &str) -> Result<ExitCode> {
        let mut build = BuildNode::new(self.connect(host).await?);
        let result = build.git_clone(repo, into).await;
        close(build.node_mut()).await;

        println!("{}", result?);
        Ok(ExitCode::SUCCESS)
    }

    async fn build_tool(
        &self,
        host: &str,
        tool: Tool,
        dir: &str,
        args: &[String],
    ) -> Result<ExitCode> {
        let mut build = BuildNode::new(self.connect(host).await?);
        let result = match tool {
            Tool::Cmake => build.run_cmake(dir, args).await,
            Tool::Make => build.run_make(dir, args).await,
        };
        close(build.node_mut()).await;

        result?;
        Ok(ExitCode::SUCCESS)
    }

    fn pip_adapter(&self) -> Pip {
        Pip::new(Arc::new(LocalExecutor::new())).with_python(self.config.pip.python.clone())
    }

    async fn pip(&self, command: PipCommand) -> Result<ExitCode> {
        let pip = self.pip_adapter();
        match command {
            PipCommand::Show { name } => {
                let summary = pip.show_package(&name).await?;
                for (key, value) in summary.iter() {
                    println!("{key}: {value}");
                }
                Ok(ExitCode::SUCCESS)
            }
            PipCommand::Installed { name, host } => {
                let mut node = self.target(host.as_deref()).await?;
                let result = pip.is_package_installed_on(&mut node, &name).await;
                close(&mut node).await;
                Ok(presence(result?))
            }
            PipCommand::Install { package, host } => {
                let mut node = self.target(host.as_deref()).await?;
                let result = pip.install_package_on(&mut node, &pip_source(&package)).await;
                close(&mut node).await;
                result?;
                Ok(ExitCode::SUCCESS)
            }
            PipCommand::Uninstall { name, host } => {
                let mut node = self.target(host.as_deref()).await?;
                let result = pip.uninstall_package_from(&mut node, &name).await;
                close(&mut node).await;
                result?;
                Ok(ExitCode::SUCCESS)
            }
        }
    }

    fn yum_adapter(&self) -> Yum {
        let config = &self.config.yum;
        Yum::new(Arc::new(LocalExecutor::new()))
            .with_config_file(config.config_file.clone())
            .with_repo_dir(config.repo_dir.clone())
            .with_sudo(config.use_sudo)
    }

    async fn yum(&self, command: YumCommand) -> Result<ExitCode> {
        let yum = self.yum_adapter();
        match command {
            YumCommand::Installed { name, host } => {
                let mut node = self.target(host.as_deref()).await?;
                let result = yum.is_package_installed_on(&mut node, &name).await;
                close(&mut node).await;
                Ok(presence(result?))
            }
            YumCommand::Install { package, host } => {
                let mut node = self.target(host.as_deref()).await?;
                let result = yum.install_package_on(&mut node, &yum_source(&package)).await;
                close(&mut node).await;
                result?;
                Ok(ExitCode::SUCCESS)
            }
            YumCommand::Remove { name, host } => {
                let mut node = self.target(host.as_deref()).await?;
                let result = yum.remove_package_from(&mut node, &name).await;
                close(&mut node).await;
                result?;
                Ok(ExitCode::SUCCESS)
            }
            YumCommand::RepoConfigured { name } => Ok(presence(yum.repo_is_configured(&name).await?)),
        }
    }

    async fn connectivity(
        &self,
        url: Option<String>,
        proxy: Option<String>,
        ping: &[String],
        json: bool,
    ) -> Result<ExitCode> {
        let mut config = self.config.connectivity.clone();
        if proxy.is_some() {
            config.proxy = proxy;
        }
        let checker = ConnectivityChecker::new(Arc::new(LocalExecutor::new()), config)?;

        if url.is_none() && ping.is_empty() {
            let status = checker.check_connectivity().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print!("{status}");
            }
            return Ok(presence(status.can_access_external_url));
        }

        let reachable = match &url {
            Some(url) => Some(checker.can_access_web_address(url, None).await),
            None => None,
        };
        let pings = checker.check_ping_list(ping).await;

        if json {
            let report = serde_json::json!({
                "url": url,
                "reachable": reachable,
                "ping": pings,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        } else {
            if let (Some(url), Some(reachable)) = (&url, reachable) {
                println!("{url}: {}", if reachable { "reachable" } else { "unreachable" });
            }
            for (host, ok) in &pings {
                println!("{host}: {}", if *ok { "answers ping" } else { "no reply" });
            }
        }

        let all_ok = reachable.unwrap_or(true) && pings.values().all(|ok| *ok);
        Ok(presence(all_ok))
    }
}

#[derive(Clone, Copy)]
enum Tool {
    Cmake,
    Make,
}

async fn close(node: &mut RemoteNode) {
    if !node.is_connected() {
        return;
    }
    if let Err(e) = node.close().await {
        warn!(host = %node.location(), error = %e, "failed to close node");
    }
}

fn exit_code(status: i32) -> ExitCode {
    ExitCode::from(status_byte(status))
}

/// Remote exit status as a process exit byte; out-of-range values become 1
fn status_byte(status: i32) -> u8 {
    u8::try_from(status).unwrap_or(1)
}

fn presence(found: bool) -> ExitCode {
    if found {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Wheel files are copied to the node; anything else is a package name
fn pip_source(package: &str) -> PipSource {
    if package.ends_with(".whl") {
        PipSource::Wheel(PathBuf::from(package))
    } else {
        PipSource::Package(package.to_string())
    }
}

fn yum_source(package: &str) -> YumSource {
    if package.ends_with(".rpm") {
        YumSource::File(PathBuf::from(package))
    } else {
        YumSource::Name(package.to_string())
    }
}
