#![cfg(unix)]

use std::path::Path;
use std::time::Duration;

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::Value;
use serde_json::json;
use tempfile::tempdir;
use tokio::time::Instant;
use toybox_core::AdapterSpec;
use toybox_core::SessionState;
use toybox_core::Supervisor;
use toybox_core::SupervisorError;
use toybox_core::SupervisorSettings;
use toybox_core::parser::ParserKind;
use toybox_core::parser::RuleSpec;

const ECHO_PROGRAM: &str =
    r#"sh -c 'echo READY; while IFS= read -r line; do echo "ECHO:$line"; done'"#;

fn settings(root: &Path) -> SupervisorSettings {
    SupervisorSettings {
        root_dir: root.to_path_buf(),
        shutdown_timeout_ms: 2_000,
        stop_poll_interval_ms: 20,
        read_backoff_ms: 10,
        ..SupervisorSettings::default()
    }
}

fn adapter(id: &str, command: &str) -> AdapterSpec {
    AdapterSpec {
        command: Some(command.to_string()),
        ..AdapterSpec::custom(id)
    }
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

fn event_records(supervisor: &Supervisor) -> Vec<Value> {
    std::fs::read_to_string(supervisor.events().path())
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("record is json"))
        .collect()
}

fn event_types(supervisor: &Supervisor) -> Vec<String> {
    event_records(supervisor)
        .iter()
        .filter_map(|record| record["type"].as_str().map(str::to_string))
        .collect()
}

fn kill_externally(pid: u32) {
    let status = std::process::Command::new("kill")
        .args(["-9", &pid.to_string()])
        .status()
        .expect("run kill");
    assert!(status.success(), "kill -9 {pid} failed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_send_stop_round_trip() {
    let dir = tempdir().expect("tempdir");
    let supervisor = Supervisor::open(adapter("lifecycle-echo", ECHO_PROGRAM), settings(dir.path()))
        .expect("supervisor");
    assert!(!supervisor.status().running);

    supervisor.start().await.expect("start");
    let status = supervisor.status();
    assert!(status.running, "{status:?}");
    assert!(status.pid.is_some());
    assert_eq!(status.resolved_command.as_ref().map(|argv| argv[0].as_str()), Some("sh"));

    // Starting again while running changes nothing.
    supervisor.start().await.expect("second start");
    assert_eq!(supervisor.status().pid, status.pid);

    wait_until("READY banner", || supervisor.output().contains("READY")).await;
    supervisor.send("ping").await.expect("send");
    wait_until("echoed line", || supervisor.output().contains("ECHO:ping")).await;

    supervisor.stop().await.expect("stop");
    let stopped = supervisor.status();
    assert!(!stopped.running);
    assert_eq!(stopped.state, SessionState::Stopped);
    assert_eq!(stopped.pid, None);

    supervisor.stop().await.expect("second stop");
    assert!(!supervisor.status().running);
    assert_matches!(
        supervisor.send("late").await,
        Err(SupervisorError::NotRunning { .. })
    );

    assert_eq!(
        event_types(&supervisor),
        vec![
            "TOYBOX_RUNTIME_STARTED".to_string(),
            "TOYBOX_RUNTIME_STOPPED".to_string()
        ]
    );
    let records = event_records(&supervisor);
    assert_eq!(records[0]["source"], json!("toybox:lifecycle-echo"));
    assert_eq!(records[0]["payload"]["command"][0], json!("sh"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn output_lines_become_events_with_carried_depth() {
    let dir = tempdir().expect("tempdir");
    let spec = AdapterSpec {
        parser: ParserKind::Rules,
        rules: vec![RuleSpec::new(r"\S", "LINE_SEEN")],
        ..adapter(
            "lifecycle-depth",
            r#"sh -c 'echo "Level 3"; echo "found sword"; echo "Level 4"; exec sleep 30'"#,
        )
    };
    let supervisor = Supervisor::open(spec, settings(dir.path())).expect("supervisor");
    supervisor.start().await.expect("start");

    wait_until("three line events", || {
        event_types(&supervisor)
            .iter()
            .filter(|kind| kind.as_str() == "LINE_SEEN")
            .count()
            == 3
    })
    .await;
    let depths: Vec<Value> = event_records(&supervisor)
        .iter()
        .filter(|record| record["type"] == json!("LINE_SEEN"))
        .map(|record| record["payload"]["depth"].clone())
        .collect();
    assert_eq!(depths, vec![json!(3), json!(3), json!(4)]);
    assert_eq!(supervisor.status().last_scalar, 4);

    supervisor.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn natural_exit_is_recorded() {
    let dir = tempdir().expect("tempdir");
    let supervisor = Supervisor::open(
        adapter("lifecycle-exit", "sh -c 'echo bye; exit 3'"),
        settings(dir.path()),
    )
    .expect("supervisor");
    supervisor.start().await.expect("start");

    wait_until("session teardown", || {
        supervisor.status().state == SessionState::Stopped
    })
    .await;
    let status = supervisor.status();
    assert!(!status.running);
    assert_eq!(status.exit_code, Some(3));
    assert!(status.last_error.is_some());

    let records = event_records(&supervisor);
    let stopped = records
        .iter()
        .find(|record| record["type"] == json!("TOYBOX_RUNTIME_STOPPED"))
        .expect("stopped event");
    assert_eq!(stopped["payload"]["reason"], json!("exited"));
    assert_eq!(stopped["payload"]["exit_code"], json!(3));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn external_kill_is_observed_and_restart_works() {
    let dir = tempdir().expect("tempdir");
    let supervisor = Supervisor::open(
        adapter("lifecycle-kill", "sh -c 'echo READY; exec sleep 30'"),
        settings(dir.path()),
    )
    .expect("supervisor");
    supervisor.start().await.expect("start");
    wait_until("READY banner", || supervisor.output().contains("READY")).await;

    let pid = supervisor.status().pid.expect("pid while running");
    kill_externally(pid);

    wait_until("running to clear", || !supervisor.status().running).await;
    wait_until("session teardown", || {
        supervisor.status().state == SessionState::Stopped
    })
    .await;
    let status = supervisor.status();
    assert!(status.exit_code.is_some() || status.terminating_signal.is_some());
    assert_matches!(
        supervisor.send("anyone there?").await,
        Err(SupervisorError::NotRunning { .. })
    );

    supervisor.start().await.expect("restart");
    let restarted = supervisor.status();
    assert!(restarted.running);
    assert_ne!(restarted.pid, Some(pid));
    assert_eq!(restarted.last_error, None);
    supervisor.stop().await.expect("stop");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stubborn_child_is_killed_after_timeout() {
    let dir = tempdir().expect("tempdir");
    let settings = SupervisorSettings {
        shutdown_timeout_ms: 300,
        ..settings(dir.path())
    };
    let supervisor = Supervisor::open(
        adapter(
            "lifecycle-stubborn",
            r#"sh -c 'trap "" TERM; echo READY; while :; do sleep 1; done'"#,
        ),
        settings,
    )
    .expect("supervisor");
    supervisor.start().await.expect("start");
    wait_until("READY banner", || supervisor.output().contains("READY")).await;

    supervisor.stop().await.expect("escalated stop");
    let status = supervisor.status();
    assert!(!status.running);
    assert_eq!(status.state, SessionState::Stopped);

    let stopped = event_records(&supervisor)
        .into_iter()
        .find(|record| record["type"] == json!("TOYBOX_RUNTIME_STOPPED"))
        .expect("stopped event");
    assert_eq!(stopped["payload"]["reason"], json!("killed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timeout_without_escalation_is_reported() {
    let dir = tempdir().expect("tempdir");
    let settings = SupervisorSettings {
        shutdown_timeout_ms: 300,
        escalate_on_timeout: false,
        ..settings(dir.path())
    };
    let supervisor = Supervisor::open(
        adapter(
            "lifecycle-timeout",
            r#"sh -c 'trap "" TERM; echo READY; while :; do sleep 1; done'"#,
        ),
        settings,
    )
    .expect("supervisor");
    supervisor.start().await.expect("start");
    wait_until("READY banner", || supervisor.output().contains("READY")).await;
    let pid = supervisor.status().pid.expect("pid while running");

    let err = supervisor.stop().await.expect_err("timeout");
    assert_matches!(err, SupervisorError::ShutdownTimeout { timeout_ms: 300, .. });
    let status = supervisor.status();
    assert!(!status.running);
    assert_eq!(status.state, SessionState::Stopped);
    assert!(status.last_error.is_some());

    kill_externally(pid);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_executable_is_a_spawn_error() {
    let dir = tempdir().expect("tempdir");
    let supervisor = Supervisor::open(
        adapter("lifecycle-missing", "/nonexistent/toybox-runtime --flag"),
        settings(dir.path()),
    )
    .expect("supervisor");

    let err = supervisor.start().await.expect_err("spawn fails");
    assert_matches!(err, SupervisorError::Spawn { .. });
    let status = supervisor.status();
    assert_eq!(status.state, SessionState::Failed);
    assert!(!status.running);
    assert!(status.last_error.is_some());
}
