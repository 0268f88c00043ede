use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use yu_exec::{CommandOutput, ExecError, FileStat, Transport};
use yu_node::{NodeError, RemoteNode};

const HOST: &str = "build7.example.com";

/// Records every call and fails the next ones from a queue
#[derive(Default)]
struct MockTransport {
    calls: Mutex<Vec<String>>,
    connects: Mutex<Vec<(String, Option<String>, Option<PathBuf>)>>,
    failures: Mutex<VecDeque<ExecError>>,
    connect_failures: Mutex<VecDeque<ExecError>>,
    outputs: Mutex<HashMap<String, CommandOutput>>,
    stats: Mutex<HashMap<String, FileStat>>,
    stat_failures: Mutex<VecDeque<ExecError>>,
}

impl MockTransport {
    fn fail_next(&self, err: ExecError) {
        self.failures.lock().unwrap().push_back(err);
    }

    fn fail_next_connect(&self, err: ExecError) {
        self.connect_failures.lock().unwrap().push_back(err);
    }

    fn respond(&self, command: &str, status: i32, stdout: &str) {
        self.outputs
            .lock()
            .unwrap()
            .insert(command.to_string(), CommandOutput::synthetic(status, stdout));
    }

    fn fail_next_stat(&self, err: ExecError) {
        self.stat_failures.lock().unwrap().push_back(err);
    }

    fn add_stat(&self, path: &str, mode: u32) {
        self.stats
            .lock()
            .unwrap()
            .insert(path.to_string(), FileStat::new(mode, 0));
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn connects(&self) -> Vec<(String, Option<String>, Option<PathBuf>)> {
        self.connects.lock().unwrap().clone()
    }

    fn record(&self, call: String) -> Result<(), ExecError> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn host(&self) -> &str {
        HOST
    }

    async fn connect(
        &mut self,
        username: &str,
        password: Option<&str>,
        key: Option<&Path>,
    ) -> Result<(), ExecError> {
        self.connects.lock().unwrap().push((
            username.to_string(),
            password.map(str::to_string),
            key.map(Path::to_path_buf),
        ));
        match self.connect_failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&mut self) -> Result<(), ExecError> {
        self.calls.lock().unwrap().push("close".to_string());
        Ok(())
    }

    async fn exec_command(
        &self,
        command: &str,
        _timeout: Option<Duration>,
        _shell: bool,
    ) -> Result<CommandOutput, ExecError> {
        self.record(format!("exec {command}"))?;
        Ok(self
            .outputs
            .lock()
            .unwrap()
            .get(command)
            .cloned()
            .unwrap_or_else(|| CommandOutput::synthetic(0, "")))
    }

    async fn copy_file_to(
        &self,
        local_file: &Path,
        destination_filename: Option<&str>,
        destination_dir: Option<&str>,
    ) -> Result<(), ExecError> {
        self.record(format!(
            "copy_file_to {} {destination_filename:?} {destination_dir:?}",
            local_file.display()
        ))
    }

    async fn copy_file_from(
        &self,
        remote_file: &str,
        _destination_filename: Option<&str>,
        _destination_dir: Option<&Path>,
    ) -> Result<(), ExecError> {
        self.record(format!("copy_file_from {remote_file}"))
    }

    async fn copy_dir_to(
        &self,
        local_dir: &Path,
        destination_dir: Option<&str>,
    ) -> Result<(), ExecError> {
        self.record(format!("copy_dir_to {} {destination_dir:?}", local_dir.display()))
    }

    async fn copy_dir_from(
        &self,
        remote_dir: &str,
        _destination_dir: Option<&Path>,
    ) -> Result<(), ExecError> {
        self.record(format!("copy_dir_from {remote_dir}"))
    }

    async fn delete_file(
        &self,
        remote_path: &str,
        error_if_not_exists: bool,
    ) -> Result<(), ExecError> {
        self.record(format!("delete_file {remote_path} {error_if_not_exists}"))
    }

    async fn delete_dir(&self, remote_dir: &str, contents_only: bool) -> Result<(), ExecError> {
        self.record(format!("delete_dir {remote_dir} {contents_only}"))
    }

    async fn mkdir(&self, remote_dir: &str) -> Result<(), ExecError> {
        self.record(format!("mkdir {remote_dir}"))
    }

    async fn stat(&self, remote_path: &str, _follow_symlinks: bool) -> Result<FileStat, ExecError> {
        if let Some(err) = self.stat_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.stats
            .lock()
            .unwrap()
            .get(remote_path)
            .copied()
            .ok_or_else(|| ExecError::NotFound {
                host: HOST.to_string(),
                path: remote_path.to_string(),
            })
    }
}

fn lost() -> ExecError {
    ExecError::ConnectionLost {
        host: HOST.to_string(),
    }
}

fn timed_out(command: &str) -> ExecError {
    ExecError::Timeout {
        host: HOST.to_string(),
        command: command.to_string(),
        timeout: Duration::from_secs(1),
    }
}

async fn connected_node(user: &str) -> RemoteNode<MockTransport> {
    let mut node = RemoteNode::with_transport(MockTransport::default());
    node.connect(user, Some("secret")).await.unwrap();
    node
}

#[tokio::test]
async fn test_never_connected_node_rejects_operations() {
    let mut node = RemoteNode::with_transport(MockTransport::default());

    let err = node.mkdir("/tmp/new").await.unwrap_err();
    assert!(matches!(err, NodeError::NotConnected { .. }));

    let err = node.delete_file("/tmp/x", false).await.unwrap_err();
    assert!(matches!(err, NodeError::NotConnected { .. }));

    let err = node
        .copy_file_to(Path::new("/etc/hosts"), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, NodeError::NotConnected { .. }));

    let err = node.exists("/tmp", true).await.unwrap_err();
    assert!(matches!(err, NodeError::NotConnected { .. }));

    let output = node.command("uptime", None, false).await.unwrap();
    assert_eq!(output.status, 1);
    assert!(output.stdout.contains("not connected"));
    assert!(output.stdout.contains(HOST));

    assert!(node.transport().calls().is_empty());
    assert!(node.transport().connects().is_empty());
}

#[tokio::test]
async fn test_connect_requires_credentials() {
    let mut node = RemoteNode::with_transport(MockTransport::default());
    let err = node.connect("root", None).await.unwrap_err();
    assert!(matches!(err, NodeError::NoCredentials { .. }));
    assert!(!node.is_connected());
}

#[tokio::test]
async fn test_root_flag_follows_username() {
    let node = connected_node("root").await;
    assert!(node.is_connected());
    assert!(node.is_connected_as_root());
    assert_eq!(node.connected_username(), Some("root"));

    let node = connected_node("ops").await;
    assert!(node.is_connected());
    assert!(!node.is_connected_as_root());
}

#[tokio::test]
async fn test_remembered_password_is_used() {
    let mut node = RemoteNode::with_transport(MockTransport::default());
    node.set_password("hunter2");
    node.connect("ops", None).await.unwrap();

    let connects = node.transport().connects();
    assert_eq!(connects[0].1.as_deref(), Some("hunter2"));
}

#[tokio::test]
async fn test_key_takes_priority_over_password() {
    let dir = tempfile::tempdir().unwrap();
    let key = dir.path().join("id_ed25519");
    std::fs::write(&key, b"key").unwrap();

    let mut node = RemoteNode::with_transport(MockTransport::default());
    node.set_ssh_key(&key).unwrap();
    node.connect("root", Some("ignored")).await.unwrap();

    let connects = node.transport().connects();
    assert_eq!(connects[0].1, None);
    assert_eq!(connects[0].2.as_deref(), Some(key.as_path()));
}

#[tokio::test]
async fn test_missing_key_is_rejected() {
    let mut node = RemoteNode::with_transport(MockTransport::default());
    let err = node.set_ssh_key("/nonexistent/id_rsa").unwrap_err();
    assert!(matches!(err, NodeError::KeyNotFound(_)));
    assert!(err.to_string().contains("is not a valid key"));
}

#[tokio::test]
async fn test_failed_connect_leaves_node_disconnected() {
    let mut node = RemoteNode::with_transport(MockTransport::default());
    node.transport()
        .fail_next_connect(ExecError::AuthenticationFailed("rejected".to_string()));

    let err = node.connect("root", Some("wrong")).await.unwrap_err();
    assert!(matches!(err, NodeError::Exec { .. }));
    assert!(!node.is_connected());
}

#[tokio::test]
async fn test_reconnect_without_username_fails() {
    let mut node = RemoteNode::with_transport(MockTransport::default());
    node.set_password("secret");
    let err = node.reconnect(None, None).await.unwrap_err();
    assert!(matches!(err, NodeError::NoUsername { .. }));
}

#[tokio::test]
async fn test_transport_fault_reconnects_once_and_retries_same_call() {
    let mut node = connected_node("ops").await;
    node.transport().fail_next(lost());

    node.delete_file("/tmp/stale.lock", false).await.unwrap();

    let calls = node.transport().calls();
    assert_eq!(
        calls,
        vec![
            "delete_file /tmp/stale.lock false",
            "close",
            "delete_file /tmp/stale.lock false",
        ]
    );

    let connects = node.transport().connects();
    assert_eq!(connects.len(), 2);
    assert_eq!(connects[1].0, "ops");
    assert_eq!(connects[1].1.as_deref(), Some("secret"));
    assert!(node.is_connected());
}

#[tokio::test]
async fn test_second_fault_is_returned() {
    let mut node = connected_node("ops").await;
    node.transport().fail_next(lost());
    node.transport().fail_next(lost());

    let err = node
        .copy_dir_to(Path::new("/srv/lab"), Some("/home/ops"))
        .await
        .unwrap_err();
    assert!(matches!(
        err.exec_error(),
        Some(ExecError::ConnectionLost { .. })
    ));
    assert_eq!(node.transport().connects().len(), 2);
}

#[tokio::test]
async fn test_path_errors_are_not_retried() {
    let mut node = connected_node("ops").await;
    node.transport().fail_next(ExecError::NotFound {
        host: HOST.to_string(),
        path: "/opt/missing".to_string(),
    });

    let err = node
        .copy_file_from("/opt/missing", None, None)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(node.transport().calls(), vec!["copy_file_from /opt/missing"]);
    assert_eq!(node.transport().connects().len(), 1);
}

#[tokio::test]
async fn test_command_retries_after_fault() {
    let mut node = connected_node("root").await;
    node.transport().respond("uptime", 0, "up 3 days");
    node.transport().fail_next(lost());

    let output = node.command("uptime", None, false).await.unwrap();
    assert!(output.success());
    assert_eq!(output.stdout, "up 3 days");
    assert_eq!(node.transport().connects().len(), 2);
}

#[tokio::test]
async fn test_command_soft_fails_after_retry() {
    let mut node = connected_node("root").await;
    node.transport().fail_next(lost());
    node.transport().fail_next(lost());

    let output = node.command("uptime", None, false).await.unwrap();
    assert_eq!(output.status, 1);
    assert!(output.stdout.contains("attempted one retry"));
}

#[tokio::test]
async fn test_command_soft_fails_when_reconnect_fails() {
    let mut node = connected_node("root").await;
    node.transport().fail_next(lost());
    node.transport().fail_next_connect(ExecError::ConnectionFailed {
        host: HOST.to_string(),
        message: "refused".to_string(),
    });

    let output = node.command("uptime", None, false).await.unwrap();
    assert_eq!(output.status, 1);
    assert!(output.stdout.contains("attempted one retry"));
}

#[tokio::test]
async fn test_command_timeout_on_retry_is_an_error() {
    let mut node = connected_node("root").await;
    node.transport().fail_next(lost());
    node.transport().fail_next(timed_out("make -j8"));

    let err = node
        .command("make -j8", Some(Duration::from_secs(1)), false)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_command_timeout_is_not_retried() {
    let mut node = connected_node("root").await;
    node.transport().fail_next(timed_out("sleep 60"));

    let err = node
        .command("sleep 60", Some(Duration::from_secs(1)), false)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(node.transport().connects().len(), 1);
}

#[tokio::test]
async fn test_probes() {
    let node = connected_node("root").await;
    node.transport().add_stat("/etc/hosts", 0o100_644);
    node.transport().add_stat("/etc", 0o040_755);

    assert!(node.exists("/etc/hosts", true).await.unwrap());
    assert!(node.is_file("/etc/hosts", true).await.unwrap());
    assert!(!node.is_dir("/etc/hosts", true).await.unwrap());
    assert!(node.is_dir("/etc", true).await.unwrap());
    assert!(!node.exists("/etc/missing", true).await.unwrap());
    assert!(!node.is_file("/etc/missing", true).await.unwrap());
}

#[tokio::test]
async fn test_mkdir_requires_existing_parent() {
    let mut node = connected_node("root").await;

    let err = node.mkdir("/srv/missing/new").await.unwrap_err();
    assert!(matches!(err, NodeError::NotLeafDirectory { .. }));
    assert!(node.transport().calls().is_empty());

    node.transport().add_stat("/srv", 0o040_755);
    node.mkdir("/srv/new").await.unwrap();
    assert_eq!(node.transport().calls(), vec!["mkdir /srv/new"]);
}

#[tokio::test]
async fn test_mkdir_parent_check_reconnects_after_lost_connection() {
    let mut node = connected_node("builder").await;
    node.transport().add_stat("/srv", 0o040_755);
    node.transport().fail_next_stat(lost());

    node.mkdir("/srv/new").await.unwrap();

    assert_eq!(node.transport().connects().len(), 2);
    assert_eq!(node.transport().calls(), vec!["close", "mkdir /srv/new"]);
    assert!(node.is_connected());
}

#[tokio::test]
async fn test_mkdir_parent_check_returns_second_fault() {
    let mut node = connected_node("builder").await;
    node.transport().add_stat("/srv", 0o040_755);
    node.transport().fail_next_stat(lost());
    node.transport().fail_next_stat(lost());

    let err = node.mkdir("/srv/new").await.unwrap_err();
    assert!(matches!(
        err,
        NodeError::Exec {
            source: ExecError::ConnectionLost { .. },
            ..
        }
    ));
    assert_eq!(node.transport().calls(), vec!["close"]);
}

#[tokio::test]
async fn test_delete_dir_passes_contents_only() {
    let mut node = connected_node("root").await;
    node.delete_dir("/opt/sdl/journal", true).await.unwrap();
    assert_eq!(
        node.transport().calls(),
        vec!["delete_dir /opt/sdl/journal true"]
    );
}

#[tokio::test]
async fn test_configured_hostname_is_cached() {
    let mut node = connected_node("root").await;
    node.transport()
        .respond("cat /proc/sys/kernel/hostname", 0, "build7\n");

    assert_eq!(
        node.get_configured_hostname().await.unwrap().as_deref(),
        Some("build7")
    );
    assert_eq!(
        node.get_configured_hostname().await.unwrap().as_deref(),
        Some("build7")
    );
    assert_eq!(node.transport().calls().len(), 1);
}

#[tokio::test]
async fn test_unreadable_hostname_is_none() {
    let mut node = connected_node("root").await;
    node.transport()
        .respond("cat /proc/sys/kernel/hostname", 1, "No such file");

    assert_eq!(node.get_configured_hostname().await.unwrap(), None);
}

#[tokio::test]
async fn test_extract_tar_runs_in_archive_directory() {
    let mut node = connected_node("root").await;
    node.extract_tar("/tmp/release.tar.gz").await.unwrap();
    assert_eq!(
        node.transport().calls(),
        vec!["exec cd /tmp; tar -xvzf release.tar.gz"]
    );

    node.transport()
        .respond("cd /tmp; tar -xvzf broken.tar.gz", 2, "gzip: stdin: not in gzip format");
    let err = node.extract_tar("/tmp/broken.tar.gz").await.unwrap_err();
    assert!(matches!(
        err.exec_error(),
        Some(ExecError::CommandFailed { status: 2, .. })
    ));
}

#[tokio::test]
async fn test_close_disconnects() {
    let mut node = connected_node("root").await;
    node.close().await.unwrap();
    assert!(!node.is_connected());

    let err = node.delete_dir("/tmp/x", false).await.unwrap_err();
    assert!(matches!(err, NodeError::NotConnected { .. }));
}
