use gradebox::isolate::MetaFile;
use gradebox::types::ExecutionStatus;

use super::fixture_path;

fn load_meta_fixture(name: &str) -> MetaFile {
    let path = fixture_path(&format!("meta/{name}"));
    let content = std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("Failed to read meta fixture {}: {}", path.display(), e));
    MetaFile::parse(&content).unwrap_or_else(|e| panic!("Failed to parse {name}: {e}"))
}

#[test]
fn test_meta_success() {
    let meta = load_meta_fixture("success.meta");
    assert_eq!(meta.status(), ExecutionStatus::Ok);
    assert_eq!(meta.exit_code(), Some(0));
    assert_eq!(meta.return_code(), 0);
    assert!(!meta.timed_out());
    assert!((meta.time().unwrap() - 0.042).abs() < 0.001);
}

#[test]
fn test_meta_runtime_error() {
    let meta = load_meta_fixture("runtime_error.meta");
    assert_eq!(meta.status(), ExecutionStatus::RuntimeError);
    assert_eq!(meta.return_code(), 1);
    assert_eq!(meta.message(), Some("Exited with error status 1"));
}

#[test]
fn test_meta_timeout() {
    let meta = load_meta_fixture("timeout.meta");
    assert_eq!(meta.status(), ExecutionStatus::TimedOut);
    assert!(meta.timed_out());
    // killed without an exit code or signal
    assert_eq!(meta.return_code(), -1);
}

#[test]
fn test_meta_signal() {
    let meta = load_meta_fixture("signal.meta");
    assert_eq!(meta.status(), ExecutionStatus::Signaled);
    assert_eq!(meta.signal(), Some(11)); // SIGSEGV
    assert_eq!(meta.return_code(), 139);
}

#[test]
fn test_meta_internal_error() {
    let meta = load_meta_fixture("internal_error.meta");
    assert_eq!(meta.status(), ExecutionStatus::InternalError);
    assert!(meta.time().is_none());
}

#[test]
fn test_meta_malformed() {
    let path = fixture_path("meta/malformed.meta");
    let content = std::fs::read_to_string(path).unwrap();
    let err = MetaFile::parse(&content).unwrap_err();
    assert_eq!(err.line_number, 2);
}
