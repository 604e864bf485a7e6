
use rouster::{EventKind, ExecCommand, RuntimeError, SessionConfig, SessionController, SessionError};
use rstest::*;
use std::sync::Arc;
use test_utils::{strings, Reply, ScriptedRunner, FAKE_ID};
use tokio_test::{assert_err, assert_ok};

fn config_with(exec: &[&str]) -> SessionConfig {
    SessionConfig {
        exec: exec.iter().map(|c| ExecCommand::from(*c)).collect(),
        ..Default::default()
    }
}

fn controller(config: SessionConfig, runner: &Arc<ScriptedRunner>) -> SessionController {
    SessionController::with_runner(config, runner.clone()).with_cwd("/home/dev/project")
}

#[fixture]
fn runner() -> Arc<ScriptedRunner> {
    Arc::new(ScriptedRunner::healthy())
}

#[tokio::test]
async fn test_failing_command_does_not_stop_batch() {
    let runner = Arc::new(ScriptedRunner::docker(|args| {
        (args[0] == "exec" && args[2] == "B").then(|| Reply::fail(2, "B failed"))
    }));
    let mut session = controller(config_with(&["A", "B", "C"]), &runner);

    let report = assert_ok!(session.run().await);

    let records = report.results.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].command, vec!["A"]);
    assert!(records[0].succeeded());
    assert_eq!(records[1].command, vec!["B"]);
    assert!(!records[1].succeeded());
    assert_eq!(records[1].exit_code(), Some(2));
    assert_eq!(records[2].command, vec!["C"]);
    assert!(records[2].succeeded());
    assert_eq!(report.results.failures().count(), 1);

    assert_eq!(
        runner.verbs(),
        vec!["--version", "run", "exec", "exec", "exec", "kill", "rm"]
    );
}

#[rstest]
#[tokio::test]
async fn test_full_session_sequence(runner: Arc<ScriptedRunner>) {
    let config = SessionConfig {
        volumes: vec!["./data:/app/data".to_string()],
        publish: vec!["3000:3000".to_string()],
        working_dir: Some("/app".to_string()),
        ..config_with(&["ls -la 'my dir' \"another dir\""])
    };
    let mut session = controller(config, &runner);

    let report = assert_ok!(session.run().await);

    assert_eq!(report.container_id.as_ref().map(|id| id.as_str()), Some(FAKE_ID));
    assert_eq!(report.runtime.version, "24.0.7");
    assert!(report.results.all_succeeded());
    assert!(report.status.is_none());
    assert_eq!(
        runner.calls(),
        vec![
            strings(&["--version"]),
            strings(&[
                "run", "-d",
                "-v", "/home/dev/project/data:/app/data",
                "-p", "3000:3000",
                "-w", "/app",
                "-it", "node:latest", "/bin/bash",
            ]),
            strings(&["exec", FAKE_ID, "ls", "-la", "my dir", "another dir"]),
            strings(&["kill", FAKE_ID]),
            strings(&["rm", "-v", FAKE_ID]),
        ]
    );
}

#[rstest]
#[tokio::test]
async fn test_pre_tokenized_command_is_not_split(runner: Arc<ScriptedRunner>) {
    let config = SessionConfig {
        exec: vec![ExecCommand::Tokens(strings(&["sh", "-c", "echo a b"]))],
        ..Default::default()
    };
    let mut session = controller(config, &runner);

    assert_ok!(session.run().await);

    assert_eq!(
        runner.calls_for("exec"),
        vec![strings(&["exec", FAKE_ID, "sh", "-c", "echo a b"])]
    );
}

#[rstest]
#[tokio::test]
async fn test_relative_volume_resolves_against_current_dir(runner: Arc<ScriptedRunner>) {
    let config = SessionConfig {
        volumes: vec!["./data:/app/data".to_string()],
        ..Default::default()
    };
    let mut session = SessionController::with_runner(config, runner.clone());
    let cwd = std::env::current_dir().unwrap();

    assert_ok!(session.run().await);

    let run = &runner.calls_for("run")[0];
    let expected = format!("{}/data:/app/data", cwd.display().to_string().trim_end_matches('/'));
    assert_eq!(run[2], "-v");
    assert_eq!(run[3], expected);
}

#[rstest]
#[case(true, true, vec!["--version", "run", "kill", "rm"])]
#[case(true, false, vec!["--version", "run", "kill"])]
#[case(false, true, vec!["--version", "run"])]
#[case(false, false, vec!["--version", "run"])]
#[tokio::test]
async fn test_shutdown_policy(
    runner: Arc<ScriptedRunner>,
    #[case] kill_on_exit: bool,
    #[case] remove_on_exit: bool,
    #[case] expected: Vec<&str>,
) {
    let config = SessionConfig {
        kill_on_exit,
        remove_on_exit,
        ..Default::default()
    };
    let mut session = controller(config, &runner);

    assert_ok!(session.run().await);

    assert_eq!(runner.verbs(), expected);
}

#[tokio::test]
async fn test_kill_failure_still_attempts_rm_and_succeeds() {
    let runner = Arc::new(ScriptedRunner::docker(|args| {
        (args[0] == "kill").then(|| Reply::fail(1, "container is not running"))
    }));
    let mut session = controller(config_with(&["true"]), &runner);

    let report = assert_ok!(session.run().await);

    assert!(report.results.all_succeeded());
    assert_eq!(runner.verbs(), vec!["--version", "run", "exec", "kill", "rm"]);
    assert_eq!(runner.calls_for("rm"), vec![strings(&["rm", "-v", FAKE_ID])]);
}

#[rstest]
#[case::kill_fails_rm_succeeds(true, false, true, None)]
#[case::kill_and_rm_fail(true, true, true, Some("rm"))]
#[case::rm_alone_fails(false, true, true, Some("rm"))]
#[case::kill_fails_without_rm(true, false, false, Some("kill"))]
#[case::clean_shutdown(false, false, true, None)]
#[tokio::test]
async fn test_shutdown_error_reporting(
    #[case] kill_fails: bool,
    #[case] rm_fails: bool,
    #[case] remove_on_exit: bool,
    #[case] failed_verb: Option<&str>,
) {
    let runner = Arc::new(ScriptedRunner::docker(move |args| match args[0].as_str() {
        "kill" if kill_fails => Some(Reply::fail(1, "container is not running")),
        "rm" if rm_fails => Some(Reply::fail(1, "removal in progress")),
        _ => None,
    }));
    let config = SessionConfig {
        remove_on_exit,
        ..Default::default()
    };
    let mut session = controller(config, &runner);

    let result = session.run().await;

    match failed_verb {
        None => {
            assert_ok!(result);
        }
        Some(expected) => match assert_err!(result) {
            SessionError::Shutdown(RuntimeError::NonZeroExit { verb, .. }) => assert_eq!(verb, expected),
            other => panic!("expected shutdown error, got {:?}", other),
        },
    }
    assert_eq!(runner.calls_for("kill").len(), 1);
    assert_eq!(runner.calls_for("rm").len(), usize::from(remove_on_exit));
}

#[tokio::test]
async fn test_rm_failure_is_reported() {
    let runner = Arc::new(ScriptedRunner::docker(|args| {
        (args[0] == "rm").then(|| Reply::fail(1, "removal in progress"))
    }));
    let mut session = controller(SessionConfig::default(), &runner);

    let err = assert_err!(session.run().await);
    assert!(err.to_string().contains("removal in progress"));
}

#[tokio::test]
async fn test_start_failure_is_fatal() {
    let runner = Arc::new(ScriptedRunner::docker(|args| {
        (args[0] == "run").then(|| Reply::fail(125, "pull access denied"))
    }));
    let mut session = controller(config_with(&["ls"]), &runner);

    let err = assert_err!(session.run().await);

    assert!(matches!(err, SessionError::Start(_)));
    assert!(runner.calls_for("exec").is_empty());
}

#[tokio::test]
async fn test_missing_runtime_is_fatal() {
    let runner = Arc::new(ScriptedRunner::docker(|_| Some(Reply::SpawnFailure)));
    let config = SessionConfig {
        runtime: "definitely-not-docker".to_string(),
        ..config_with(&["ls"])
    };
    let mut session = controller(config, &runner);

    let err = assert_err!(session.run().await);

    assert!(matches!(err, SessionError::RuntimeUnavailable { .. }));
    assert!(err.to_string().contains("definitely-not-docker"));
    assert_eq!(runner.verbs(), vec!["--version"]);
}

#[tokio::test]
async fn test_unparseable_version_is_not_fatal() {
    let runner = Arc::new(ScriptedRunner::docker(|args| {
        (args[0] == "--version").then(|| Reply::ok(&["podman version 4.9.3"]))
    }));
    let mut session = controller(SessionConfig::default(), &runner);

    let report = assert_ok!(session.run().await);
    assert_eq!(report.runtime.version, "unknown");
}

#[rstest]
#[tokio::test]
async fn test_attach_mode_skips_run(runner: Arc<ScriptedRunner>) {
    let config = SessionConfig {
        attach_to: Some("web_1".to_string()),
        kill_on_exit: false,
        ..config_with(&["npm test"])
    };
    let mut session = controller(config, &runner);

    let report = assert_ok!(session.run().await);

    assert_eq!(report.container_id.unwrap().as_str(), "web_1");
    assert_eq!(
        runner.calls(),
        vec![strings(&["--version"]), strings(&["exec", "web_1", "npm", "test"])]
    );
}

#[rstest]
#[tokio::test]
async fn test_attach_to_blank_id_fails(runner: Arc<ScriptedRunner>) {
    let config = SessionConfig {
        attach_to: Some("  ".to_string()),
        ..Default::default()
    };
    let mut session = controller(config, &runner);

    assert!(matches!(session.run().await, Err(SessionError::Attach(_))));
}

#[rstest]
#[tokio::test]
async fn test_pull_before_run(runner: Arc<ScriptedRunner>) {
    let config = SessionConfig {
        pull: true,
        image: "alpine:3".to_string(),
        ..Default::default()
    };
    let mut session = controller(config, &runner);

    assert_ok!(session.run().await);

    assert_eq!(runner.calls()[1], strings(&["pull", "alpine:3"]));
    assert_eq!(runner.verbs()[2], "run");
}

#[rstest]
#[tokio::test]
async fn test_output_status_queries_last_container(runner: Arc<ScriptedRunner>) {
    let config = SessionConfig {
        output_status: true,
        remove_on_exit: false,
        ..Default::default()
    };
    let mut session = controller(config, &runner);

    let report = assert_ok!(session.run().await);

    assert_eq!(report.status.as_deref(), Some("exited"));
    assert_eq!(runner.verbs(), vec!["--version", "run", "kill", "inspect"]);
}

#[rstest]
#[tokio::test]
async fn test_output_handlers_only_live_during_execute(runner: Arc<ScriptedRunner>) {
    let mut session = controller(config_with(&["ls"]), &runner);

    assert_ok!(session.run().await);

    let events = session.client().events();
    assert_eq!(events.handler_count(EventKind::Stdout), 0);
    assert_eq!(events.handler_count(EventKind::Stderr), 0);
}

#[rstest]
#[tokio::test]
async fn test_verbose_handlers_are_released_after_session(runner: Arc<ScriptedRunner>) {
    let config = SessionConfig {
        verbose: true,
        ..config_with(&["ls"])
    };
    let mut session = controller(config, &runner);

    assert_ok!(session.run().await);

    for kind in EventKind::lifecycle() {
        assert_eq!(session.client().events().handler_count(kind), 0, "{kind} still subscribed");
    }
}

#[rstest]
#[tokio::test]
async fn test_empty_exec_line_is_recorded_as_failure(runner: Arc<ScriptedRunner>) {
    let mut session = controller(config_with(&["   ", "pwd"]), &runner);

    let report = assert_ok!(session.run().await);

    let records = report.results.records();
    assert!(matches!(records[0].result, Err(RuntimeError::EmptyCommand)));
    assert!(records[1].succeeded());
    assert_eq!(runner.calls_for("exec").len(), 1);
}
