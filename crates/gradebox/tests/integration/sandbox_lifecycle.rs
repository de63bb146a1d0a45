use std::sync::Arc;

use gradebox::isolate::{BoxPool, IsolateBox};
use gradebox::model::Command;
use gradebox::{
    CommandRunner, IsolateBackend, LogAlertSink, SandboxFile, SandboxHandle, SandboxManager,
    SandboxSpec,
};

use super::test_config;

#[tokio::test]
#[ignore = "requires root"]
async fn test_box_init_and_cleanup() {
    let config = test_config();
    let mut sandbox = IsolateBox::init(0, config.isolate_binary(), config.cgroup)
        .await
        .expect("Failed to create sandbox");

    let path = sandbox.file_path("probe.txt").unwrap();
    sandbox.write_file("probe.txt", b"x").await.unwrap();
    assert!(path.exists());

    sandbox.cleanup().await.expect("Failed to cleanup sandbox");
    assert!(!sandbox.is_initialized());
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_box_pool_hands_out_distinct_ids() {
    let config = test_config();
    let pool = BoxPool::new(10, 2, config.isolate_binary(), config.cgroup);

    let mut first = pool.acquire().await.expect("Failed to acquire box");
    let mut second = pool.acquire().await.expect("Failed to acquire second box");
    assert_ne!(first.id(), second.id());
    assert_eq!(pool.available(), 0);

    first.cleanup().await.expect("Failed to cleanup first box");
    second.cleanup().await.expect("Failed to cleanup second box");
    drop(first);
    drop(second);
    assert_eq!(pool.available(), 2);
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_backend_runs_commands_with_env_and_files() {
    let config = Arc::new(test_config());
    let backend = IsolateBackend::new(config.clone()).expect("Failed to build backend");
    let manager = SandboxManager::new(backend, Arc::new(LogAlertSink));
    let runner = CommandRunner::from_config(&config.grading);

    let spec = SandboxSpec::new(config.default_image.clone()).with_env("usernames", "ada alan");
    let mut handle = manager.create(&spec).await.expect("Failed to create sandbox");
    handle
        .copy_files_in(&[SandboxFile::new("greeting.txt", "hi")])
        .await
        .expect("Failed to copy files");

    let greet = Command::new(r#"read -r line < greeting.txt; echo "$line $usernames""#);
    let completed = runner
        .run(&mut handle, &greet, None)
        .await
        .expect("Failed to run command");
    assert_eq!(completed.return_code, 0);
    assert_eq!(completed.stdout_text(), "hi ada alan\n");

    let completed = runner
        .run(&mut handle, &Command::new("cat"), Some(b"from stdin".as_slice()))
        .await
        .unwrap();
    assert_eq!(completed.stdout, b"from stdin");

    let completed = runner
        .run(&mut handle, &Command::new("exit 3"), None)
        .await
        .unwrap();
    assert_eq!(completed.return_code, 3);
    assert!(!completed.timed_out);

    manager.dispose(handle).await;
}

#[tokio::test]
#[ignore = "requires root"]
async fn test_backend_reports_timeouts() {
    let config = Arc::new(test_config());
    let backend = IsolateBackend::new(config.clone()).unwrap();
    let manager = SandboxManager::new(backend, Arc::new(LogAlertSink));
    let runner = CommandRunner::from_config(&config.grading);

    let mut handle = manager
        .create(&SandboxSpec::new(config.default_image.clone()))
        .await
        .unwrap();
    let completed = runner
        .run(&mut handle, &Command::new("sleep 10").with_time_limit(1), None)
        .await
        .unwrap();
    assert!(completed.timed_out);
    assert_ne!(completed.return_code, 0);

    manager.dispose(handle).await;
}
