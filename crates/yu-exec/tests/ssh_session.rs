//! Live SSH tests
//!
//! Run with `YU_TEST_SSH_HOST`, `YU_TEST_SSH_USER` and `YU_TEST_SSH_PASSWORD` set:
//! `cargo test -p yu-exec --test ssh_session -- --ignored`

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use yu_exec::{ExecError, Session, SessionConfig, Transport};

async fn connected_session() -> Session {
    let host = std::env::var("YU_TEST_SSH_HOST").expect("YU_TEST_SSH_HOST not set");
    let user = std::env::var("YU_TEST_SSH_USER").unwrap_or_else(|_| "root".to_string());
    let password = std::env::var("YU_TEST_SSH_PASSWORD").expect("YU_TEST_SSH_PASSWORD not set");

    let mut session = Session::new(host, SessionConfig::default());
    session
        .connect(&user, Some(&password), None)
        .await
        .expect("failed to connect");
    session
}

fn scratch_dir(tag: &str) -> String {
    format!("/tmp/yu-test-{tag}-{}", std::process::id())
}

#[tokio::test]
#[ignore = "requires SSH server"]
async fn test_exec_command() {
    let mut session = connected_session().await;

    let output = session
        .exec_command("echo hello; exit 3", None, false)
        .await
        .unwrap();
    assert_eq!(output.status, 3);
    assert_eq!(output.stdout.trim(), "hello");

    session.close().await.unwrap();
    assert!(!session.is_connected());
}

#[tokio::test]
#[ignore = "requires SSH server"]
async fn test_delete_dir_contents_only() {
    let session = connected_session().await;
    let dir = scratch_dir("contents");

    session
        .exec_command(&format!("mkdir -p {dir}/sub && touch {dir}/a {dir}/sub/b"), None, false)
        .await
        .unwrap();

    session.delete_dir(&dir, true).await.unwrap();
    assert!(session.stat(&dir, true).await.unwrap().is_dir());
    let listing = session
        .exec_command(&format!("ls -A {dir}"), None, false)
        .await
        .unwrap();
    assert!(listing.stdout.trim().is_empty());

    session.delete_dir(&dir, false).await.unwrap();
    assert!(session.stat(&dir, true).await.unwrap_err().is_not_found());
}

#[tokio::test]
#[ignore = "requires SSH server"]
async fn test_delete_missing_file() {
    let session = connected_session().await;
    let path = format!("{}/missing", scratch_dir("missing"));

    session.delete_file(&path, false).await.unwrap();
    let err = session.delete_file(&path, true).await.unwrap_err();
    assert!(matches!(err, ExecError::NotFound { .. }));
}

#[tokio::test]
#[ignore = "requires SSH server"]
async fn test_copy_dir_onto_file_conflicts() {
    let session = connected_session().await;
    let remote_parent = scratch_dir("conflict");
    session.mkdir(&remote_parent).await.unwrap();

    let local = tempfile::tempdir().unwrap();
    let src = local.path().join("payload");
    std::fs::create_dir(&src).unwrap();
    std::fs::write(src.join("f"), b"x").unwrap();

    session
        .exec_command(&format!("touch {remote_parent}/payload"), None, false)
        .await
        .unwrap();

    let err = session
        .copy_dir_to(&src, Some(&remote_parent))
        .await
        .unwrap_err();
    match err {
        ExecError::PathConflict { path, .. } => assert!(path.ends_with("payload")),
        other => panic!("unexpected error: {other}"),
    }

    session.delete_dir(&remote_parent, false).await.unwrap();
}

#[tokio::test]
#[ignore = "requires SSH server"]
async fn test_dir_round_trip_preserves_modes() {
    let session = connected_session().await;
    let remote_parent = scratch_dir("roundtrip");
    session.mkdir(&remote_parent).await.unwrap();

    let local = tempfile::tempdir().unwrap();
    let src = local.path().join("tree");
    std::fs::create_dir_all(src.join("bin")).unwrap();
    std::fs::write(src.join("README"), b"docs").unwrap();
    std::fs::write(src.join("bin").join("run.sh"), b"#!/bin/sh\n").unwrap();
    std::fs::set_permissions(
        src.join("bin").join("run.sh"),
        std::fs::Permissions::from_mode(0o750),
    )
    .unwrap();

    session.copy_dir_to(&src, Some(&remote_parent)).await.unwrap();

    let back = tempfile::tempdir().unwrap();
    session
        .copy_dir_from(&format!("{remote_parent}/tree"), Some(back.path()))
        .await
        .unwrap();

    let copied = back.path().join("tree");
    assert_eq!(std::fs::read(copied.join("README")).unwrap(), b"docs");
    let mode = std::fs::metadata(copied.join("bin").join("run.sh"))
        .unwrap()
        .permissions()
        .mode();
    assert_eq!(mode & 0o777, 0o750);
    assert!(Path::new(&copied.join("bin")).is_dir());

    session.delete_dir(&remote_parent, false).await.unwrap();
}

#[tokio::test]
#[ignore = "requires SSH server"]
async fn test_copy_dir_from_skips_symlink_cycles() {
    let session = connected_session().await;
    let remote_parent = scratch_dir("links");

    // a/to_b -> b and b/to_a -> a form a cycle between siblings; a/up -> a is a self link
    session
        .exec_command(
            &format!(
                "mkdir -p {remote_parent}/a {remote_parent}/b \
                 && echo a > {remote_parent}/a/in_a && echo b > {remote_parent}/b/in_b \
                 && ln -s {remote_parent}/b {remote_parent}/a/to_b \
                 && ln -s {remote_parent}/a {remote_parent}/b/to_a \
                 && ln -s {remote_parent}/a {remote_parent}/a/up"
            ),
            None,
            false,
        )
        .await
        .unwrap();

    let back = tempfile::tempdir().unwrap();
    session
        .copy_dir_from(&format!("{remote_parent}/a"), Some(back.path()))
        .await
        .unwrap();

    let copied = back.path().join("a");
    assert_eq!(std::fs::read(copied.join("in_a")).unwrap(), b"a\n");
    assert_eq!(std::fs::read(copied.join("to_b").join("in_b")).unwrap(), b"b\n");
    assert!(!copied.join("to_b").join("to_a").exists());
    assert!(!copied.join("up").exists());

    session.delete_dir(&remote_parent, false).await.unwrap();
}
