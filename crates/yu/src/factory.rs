//! Node factory: turns a host entry into a connected `RemoteNode`

use std::path::PathBuf;

use eyre::{Result, WrapErr};
use yu_exec::{KeySource, SessionConfig};
use yu_node::RemoteNode;

use crate::config::HostConfig;

/// Key files tried when a host entry names no credentials
const DEFAULT_KEY_FILES: [&str; 2] = ["id_ed25519", "id_rsa"];

/// Key source for `host`: explicit file, then key variable, then a default key in `~/.ssh`
fn key_source(host: &HostConfig, ssh_dir: Option<PathBuf>) -> Option<KeySource> {
    if let Some(path) = &host.ssh_key {
        return Some(KeySource::Path(path.clone()));
    }
    if let Some(var) = &host.ssh_key_env {
        return Some(KeySource::Env(var.clone()));
    }
    if host.password_env.is_some() {
        return None;
    }

    let ssh_dir = ssh_dir?;
    DEFAULT_KEY_FILES
        .iter()
        .map(|name| ssh_dir.join(name))
        .find(|path| path.is_file())
        .map(KeySource::Path)
}

/// Build and connect a node for `host`, logging in as `user` or the entry's user
///
/// # Errors
/// Fails when the key cannot be resolved, the password variable is unset, or the
/// connection is refused.
pub async fn connect_node(
    host: &HostConfig,
    session: &SessionConfig,
    user: Option<&str>,
) -> Result<RemoteNode> {
    let mut node = RemoteNode::with_config(host.addr.clone(), session.clone());

    let ssh_dir = dirs::home_dir().map(|home| home.join(".ssh"));
    if let Some(source) = key_source(host, ssh_dir) {
        node.set_ssh_key_source(&source)
            .wrap_err_with(|| format!("cannot use SSH key for {}", host.name))?;
    }
    if let Some(var) = &host.password_env {
        let password = std::env::var(var)
            .wrap_err_with(|| format!("password variable {var} for {} is not set", host.name))?;
        node.set_password(password);
    }

    let user = user.unwrap_or(host.user.as_str());
    node.connect(user, None)
        .await
        .wrap_err_with(|| format!("failed to connect to {} as {user}", host.addr))?;
    tracing::debug!(host = %host.name, addr = %host.addr, user = %user, "node ready");
    Ok(node)
}
