use runner_core::config::RunnerConfig;
use runner_core::{Command, JobStatus, Runner, RunnerError, RunnerHandle, RunnerKind};
use runner_local::{stdout_path, LocalRunner};
use std::path::Path;
use std::time::{Duration, Instant};

fn runner(grace_ms: u64) -> LocalRunner {
    let mut config = RunnerConfig::new("local", RunnerKind::Local);
    config.grace_period_ms = Some(grace_ms);
    LocalRunner::new(config)
}

async fn wait_terminal(runner: &LocalRunner, handle: &RunnerHandle) -> JobStatus {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let status = runner.check_status(handle).await.unwrap();
        if status.is_terminal() || Instant::now() > deadline {
            return status;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_echo_completes_with_captured_output() {
    let job_dir = tempfile::tempdir().unwrap();
    let runner = runner(1000);
    let cmd = Command::new(["echo", "hi"]).with_cwd(job_dir.path());

    let handle = runner.submit(&cmd, job_dir.path()).await.unwrap();
    assert!(matches!(handle, RunnerHandle::Local { .. }));
    assert_eq!(wait_terminal(&runner, &handle).await, JobStatus::Completed);

    let out = std::fs::read_to_string(stdout_path(job_dir.path())).unwrap();
    assert_eq!(out, "hi\n");
}

#[tokio::test]
async fn test_nonzero_exit_is_failed() {
    let job_dir = tempfile::tempdir().unwrap();
    let runner = runner(1000);
    let cmd = Command::new(["sh", "-c", "exit 1"]).with_cwd(job_dir.path());
    let handle = runner.submit(&cmd, job_dir.path()).await.unwrap();
    assert_eq!(wait_terminal(&runner, &handle).await, JobStatus::Failed);
    // recorded exit is stable across checks
    assert_eq!(runner.check_status(&handle).await.unwrap(), JobStatus::Failed);
}

#[tokio::test]
async fn test_external_kill_is_interrupted() {
    let job_dir = tempfile::tempdir().unwrap();
    let runner = runner(1000);
    let cmd = Command::new(["sleep", "30"]).with_cwd(job_dir.path());
    let handle = runner.submit(&cmd, job_dir.path()).await.unwrap();
    assert_eq!(runner.check_status(&handle).await.unwrap(), JobStatus::Running);

    let RunnerHandle::Local { pid, .. } = handle else {
        panic!("expected a local handle");
    };
    let killed = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .unwrap();
    assert!(killed.success());

    assert_eq!(wait_terminal(&runner, &handle).await, JobStatus::Interrupted);
}

#[tokio::test]
async fn test_missing_executable_is_submission_error() {
    let job_dir = tempfile::tempdir().unwrap();
    let runner = runner(1000);
    let cmd = Command::new(["definitely-not-a-real-binary-4d1f"]).with_cwd(job_dir.path());
    let err = runner.submit(&cmd, job_dir.path()).await.unwrap_err();
    assert!(matches!(err, RunnerError::Submission(_)));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_empty_command_is_submission_error() {
    let job_dir = tempfile::tempdir().unwrap();
    let runner = runner(1000);
    let err = runner
        .submit(&Command::new(Vec::<String>::new()), job_dir.path())
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::Submission(_)));
}

#[tokio::test]
async fn test_unknown_pid_reports_unknown() {
    let runner = runner(1000);
    let status = runner
        .check_status(&RunnerHandle::Local { seq: 999_999, pid: 999_999 })
        .await
        .unwrap();
    assert_eq!(status, JobStatus::Unknown);
}

#[tokio::test]
async fn test_foreign_handle_rejected() {
    let runner = runner(1000);
    let err = runner
        .check_status(&RunnerHandle::Remote { job_id: "x".into() })
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::ForeignHandle { .. }));
}

#[tokio::test]
async fn test_cancel_interrupts_and_is_idempotent() {
    let job_dir = tempfile::tempdir().unwrap();
    let runner = runner(2000);
    let cmd = Command::new(["sleep", "30"]).with_cwd(job_dir.path());
    let handle = runner.submit(&cmd, job_dir.path()).await.unwrap();

    runner.cancel(&handle).await.unwrap();
    assert_eq!(runner.check_status(&handle).await.unwrap(), JobStatus::Interrupted);

    runner.cancel(&handle).await.unwrap();
    assert_eq!(runner.check_status(&handle).await.unwrap(), JobStatus::Interrupted);
}

#[tokio::test]
async fn test_cancel_escalates_to_kill() {
    let job_dir = tempfile::tempdir().unwrap();
    let runner = runner(200);
    let cmd = Command::new(["sh", "-c", "trap '' INT; sleep 5"]).with_cwd(job_dir.path());
    let handle = runner.submit(&cmd, job_dir.path()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    let started = Instant::now();
    runner.cancel(&handle).await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(runner.check_status(&handle).await.unwrap(), JobStatus::Interrupted);
}

#[tokio::test]
async fn test_cancel_finished_job_is_noop() {
    let job_dir = tempfile::tempdir().unwrap();
    let runner = runner(1000);
    let cmd = Command::new(["true"]).with_cwd(job_dir.path());
    let handle = runner.submit(&cmd, job_dir.path()).await.unwrap();
    assert_eq!(wait_terminal(&runner, &handle).await, JobStatus::Completed);

    runner.cancel(&handle).await.unwrap();
    assert_eq!(runner.check_status(&handle).await.unwrap(), JobStatus::Completed);
    runner.cancel(&RunnerHandle::Local { seq: 999_998, pid: 999_998 }).await.unwrap();
}

#[tokio::test]
async fn test_env_and_cwd_are_applied() {
    let job_dir = tempfile::tempdir().unwrap();
    let exec_dir = tempfile::tempdir().unwrap();
    let mut config = RunnerConfig::new("local", RunnerKind::Local);
    config.env.insert("FROM_RUNNER".into(), "r".into());
    let runner = LocalRunner::new(config);

    let cmd = Command::new(["sh", "-c", "printf '%s %s %s' \"$FROM_RUNNER\" \"$FOO\" \"$(pwd -P)\""])
        .with_cwd(exec_dir.path())
        .with_env("FOO", "bar");
    let handle = runner.submit(&cmd, job_dir.path()).await.unwrap();
    assert_eq!(wait_terminal(&runner, &handle).await, JobStatus::Completed);

    let out = std::fs::read_to_string(stdout_path(job_dir.path())).unwrap();
    let expected = format!("r bar {}", exec_dir.path().canonicalize().unwrap().display());
    assert_eq!(out, expected);
}

#[tokio::test]
async fn test_batch_submit_preserves_order() {
    let dirs: Vec<_> = (0..3).map(|_| tempfile::tempdir().unwrap()).collect();
    let runner = runner(1000);
    let submissions = vec![
        (Command::new(["true"]), dirs[0].path().to_path_buf()),
        (Command::new(["no-such-binary-8c2e"]), dirs[1].path().to_path_buf()),
        (Command::new(["false"]), dirs[2].path().to_path_buf()),
    ];
    let results = runner.batch_submit(&submissions).await;
    assert_eq!(results.len(), 3);
    assert!(matches!(results[1], Err(RunnerError::Submission(_))));

    let first = results[0].as_ref().unwrap().clone();
    let third = results[2].as_ref().unwrap().clone();
    assert_eq!(wait_terminal(&runner, &first).await, JobStatus::Completed);
    assert_eq!(wait_terminal(&runner, &third).await, JobStatus::Failed);

    let statuses = runner.batch_check_status(&[third, first]).await.unwrap();
    assert_eq!(statuses, vec![JobStatus::Failed, JobStatus::Completed]);
    assert!(Path::new(&dirs[1].path().join("stdout")).exists());
}

#[tokio::test]
async fn test_abandoned_cancel_keeps_tracking_child() {
    let job_dir = tempfile::tempdir().unwrap();
    let runner = runner(1500);
    let cmd = Command::new(["sh", "-c", "trap '' INT; sleep 5"]).with_cwd(job_dir.path());
    let handle = runner.submit(&cmd, job_dir.path()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let abandoned = tokio::time::timeout(Duration::from_millis(200), runner.cancel(&handle)).await;
    assert!(abandoned.is_err());
    assert_eq!(runner.check_status(&handle).await.unwrap(), JobStatus::Running);

    runner.cancel(&handle).await.unwrap();
    assert_eq!(runner.check_status(&handle).await.unwrap(), JobStatus::Interrupted);
}

#[tokio::test]
async fn test_handles_are_keyed_by_sequence_not_pid() {
    let job_dir = tempfile::tempdir().unwrap();
    let runner = runner(1000);
    let cmd = Command::new(["sleep", "1"]).with_cwd(job_dir.path());
    let first = runner.submit(&cmd, job_dir.path()).await.unwrap();
    let second = runner.submit(&cmd, job_dir.path()).await.unwrap();

    let (RunnerHandle::Local { seq: a, pid }, RunnerHandle::Local { seq: b, .. }) = (&first, &second) else {
        panic!("expected local handles");
    };
    assert_ne!(a, b);

    // same pid, handle never issued by this runner
    let alias = RunnerHandle::Local { seq: a + b + 100, pid: *pid };
    assert_eq!(runner.check_status(&alias).await.unwrap(), JobStatus::Unknown);
    assert_eq!(runner.check_status(&first).await.unwrap(), JobStatus::Running);

    runner.batch_cancel(&[first, second]).await.unwrap();
}
