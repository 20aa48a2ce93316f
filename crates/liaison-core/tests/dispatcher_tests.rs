//! Dispatcher integration tests
//!
//! End-to-end flows through the dispatcher with a recording notifier and a
//! fake assistant script: resolution, the busy rejection, permission
//! mediation, cancellation, and operator commands.

#![cfg(unix)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{MockNotifier, fake_cli, wait_for};
use liaison_core::config::Config;
use liaison_core::dispatch::{Command, Dispatcher};
use liaison_core::registry::SessionStatus;

const WAIT: Duration = Duration::from_secs(10);

fn test_config(cli_path: &str, workdir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.cli_path = cli_path.to_string();
    config.default_working_dir = Some(workdir.to_string_lossy().into_owned());
    config.turn_timeout_secs = 15;
    config.permission_timeout_secs = 15;
    config.status_tick_secs = 1;
    config
}

fn chat() -> String {
    "operator".to_string()
}

#[tokio::test]
async fn first_message_runs_a_turn_and_records_the_conversation() {
    let (_cli_dir, cli) = fake_cli(
        r#"echo '{"type":"assistant","message":{"content":[{"type":"text","text":"listing"}]}}'
echo '{"type":"result","result":"README.md and src/","session_id":"conv-1"}'"#,
    );
    let workdir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MockNotifier::new());
    let dispatcher = Dispatcher::new(&test_config(&cli, workdir.path()), notifier.clone());

    dispatcher.handle_message(&chat(), "list files").await.unwrap();
    wait_for(WAIT, || notifier.saw_text("README.md and src/")).await;

    let sessions = dispatcher.registry().list();
    assert_eq!(sessions.len(), 1);
    let session = &sessions[0];
    assert_eq!(session.status, SessionStatus::Idle);
    assert_eq!(session.conversation_id.as_deref(), Some("conv-1"));
    // First answer derived a topic title
    assert!(session.title.is_some());
}

#[tokio::test]
async fn busy_session_rejects_second_message() {
    let (_cli_dir, cli) = fake_cli(
        r#"sleep 1
echo '{"type":"result","result":"done at last","session_id":"conv-2"}'"#,
    );
    let workdir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MockNotifier::new());
    let dispatcher = Dispatcher::new(&test_config(&cli, workdir.path()), notifier.clone());

    dispatcher.handle_message(&chat(), "first").await.unwrap();
    wait_for(WAIT, || !dispatcher.registry().list().is_empty()).await;

    dispatcher.handle_message(&chat(), "second").await.unwrap();
    wait_for(WAIT, || notifier.saw_text("busy")).await;

    // The first turn still completes normally
    wait_for(WAIT, || notifier.saw_text("done at last")).await;
    assert_eq!(dispatcher.registry().list()[0].status, SessionStatus::Idle);
}

#[tokio::test]
async fn independent_sessions_run_in_parallel() {
    let (_cli_dir, cli) = fake_cli(
        r#"sleep 1
echo "{\"type\":\"result\",\"result\":\"done in $(basename $PWD)\",\"session_id\":\"conv-$(basename $PWD)\"}""#,
    );
    let workdir_a = tempfile::tempdir().unwrap();
    let workdir_b = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MockNotifier::new());
    let dispatcher = Dispatcher::new(&test_config(&cli, workdir_a.path()), notifier.clone());

    let key_a = workdir_a.path().to_string_lossy().into_owned();
    let key_b = workdir_b.path().to_string_lossy().into_owned();
    dispatcher
        .dispatch_text(&chat(), "go", Some(&key_a), false)
        .await
        .unwrap();
    dispatcher
        .dispatch_text(&chat(), "go", Some(&key_b), false)
        .await
        .unwrap();

    // Both sessions hold running turns at the same time
    wait_for(WAIT, || {
        dispatcher
            .registry()
            .list()
            .iter()
            .filter(|s| s.status == SessionStatus::Running)
            .count()
            == 2
    })
    .await;

    wait_for(WAIT, || {
        dispatcher
            .registry()
            .list()
            .iter()
            .all(|s| s.status == SessionStatus::Idle)
    })
    .await;
}

#[tokio::test]
async fn permission_deny_cancels_and_releases_the_session() {
    let (_cli_dir, cli) = fake_cli(
        r#"echo '{"type":"result","result":"","session_id":"conv-3","permission_denials":[{"tool_name":"Write","tool_input":{"file_path":"/tmp/x"},"tool_use_id":"t1"}]}'"#,
    );
    let workdir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MockNotifier::new());
    let dispatcher = Dispatcher::new(&test_config(&cli, workdir.path()), notifier.clone());

    dispatcher.handle_message(&chat(), "write it").await.unwrap();
    wait_for(WAIT, || notifier.last_choice_options().is_some()).await;

    let options = notifier.last_choice_options().unwrap();
    let deny = options
        .iter()
        .find(|(_, action)| action.ends_with(":deny"))
        .expect("deny option present");
    dispatcher.handle_action(&chat(), &deny.1).await.unwrap();

    wait_for(WAIT, || notifier.saw_text("Cancelled")).await;
    let session = &dispatcher.registry().list()[0];
    assert_eq!(session.status, SessionStatus::Idle);
}

#[tokio::test]
async fn permission_approval_resumes_and_answers() {
    let (_cli_dir, cli) = fake_cli(
        r#"case "$*" in
  *--allowed-tools*) echo '{"type":"result","result":"file written","session_id":"conv-4"}';;
  *) echo '{"type":"result","result":"","session_id":"conv-4","permission_denials":[{"tool_name":"Write","tool_input":{"file_path":"/tmp/x"},"tool_use_id":"t1"}]}';;
esac"#,
    );
    let workdir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MockNotifier::new());
    let dispatcher = Dispatcher::new(&test_config(&cli, workdir.path()), notifier.clone());

    dispatcher.handle_message(&chat(), "write it").await.unwrap();
    wait_for(WAIT, || notifier.last_choice_options().is_some()).await;

    // While awaiting permission the session is busy
    assert_eq!(
        dispatcher.registry().list()[0].status,
        SessionStatus::AwaitingPermission
    );
    dispatcher.handle_message(&chat(), "another").await.unwrap();
    wait_for(WAIT, || notifier.saw_text("busy")).await;

    let options = notifier.last_choice_options().unwrap();
    let allow = options
        .iter()
        .find(|(_, action)| action.ends_with(":allow"))
        .expect("allow option present");
    dispatcher.handle_action(&chat(), &allow.1).await.unwrap();

    wait_for(WAIT, || notifier.saw_text("file written")).await;
    assert_eq!(dispatcher.registry().list()[0].status, SessionStatus::Idle);
}

#[tokio::test]
async fn stale_permission_action_is_reported() {
    let (_cli_dir, cli) = fake_cli(r#"echo '{"type":"result","result":"ok","session_id":"c"}'"#);
    let workdir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MockNotifier::new());
    let dispatcher = Dispatcher::new(&test_config(&cli, workdir.path()), notifier.clone());

    dispatcher
        .handle_action(&chat(), "perm:deadbeef:allow")
        .await
        .unwrap();
    assert!(notifier.saw_text("No pending permission request"));
}

#[tokio::test]
async fn cancel_with_no_turn_is_a_reported_noop() {
    let (_cli_dir, cli) = fake_cli(r#"echo '{"type":"result","result":"ok","session_id":"c"}'"#);
    let workdir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MockNotifier::new());
    let dispatcher = Dispatcher::new(&test_config(&cli, workdir.path()), notifier.clone());

    // No sessions at all
    dispatcher.handle_command(&chat(), Command::Cancel).await.unwrap();
    assert!(notifier.saw_text("Nothing to cancel"));

    // A session exists but is idle
    dispatcher.registry().get_or_create(
        workdir.path().to_string_lossy().as_ref(),
    );
    dispatcher.handle_command(&chat(), Command::Cancel).await.unwrap();
    let count = notifier
        .texts()
        .iter()
        .filter(|t| t.contains("Nothing to cancel"))
        .count();
    assert_eq!(count, 2);
}

#[tokio::test]
async fn cancel_stops_a_running_turn() {
    let (_cli_dir, cli) = fake_cli("exec sleep 30");
    let workdir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MockNotifier::new());
    let dispatcher = Dispatcher::new(&test_config(&cli, workdir.path()), notifier.clone());

    dispatcher.handle_message(&chat(), "hang").await.unwrap();
    wait_for(WAIT, || {
        dispatcher
            .registry()
            .list()
            .first()
            .is_some_and(|s| s.status == SessionStatus::Running)
    })
    .await;

    dispatcher.handle_command(&chat(), Command::Cancel).await.unwrap();
    wait_for(WAIT, || notifier.saw_text("Cancelled")).await;
    wait_for(WAIT, || {
        dispatcher.registry().list()[0].status == SessionStatus::Idle
    })
    .await;
}

#[tokio::test]
async fn help_and_status_commands_reply() {
    let (_cli_dir, cli) = fake_cli(r#"echo '{"type":"result","result":"ok","session_id":"c"}'"#);
    let workdir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MockNotifier::new());
    let dispatcher = Dispatcher::new(&test_config(&cli, workdir.path()), notifier.clone());

    dispatcher.handle_message(&chat(), "/help").await.unwrap();
    assert!(notifier.saw_text("Commands"));

    dispatcher.handle_message(&chat(), "/status").await.unwrap();
    assert!(notifier.saw_text("No sessions."));

    dispatcher.handle_message(&chat(), "/frobnicate").await.unwrap();
    assert!(notifier.saw_text("Unknown command"));
}

#[tokio::test]
async fn remove_command_reports_outcomes() {
    let (_cli_dir, cli) = fake_cli(r#"echo '{"type":"result","result":"ok","session_id":"c"}'"#);
    let workdir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MockNotifier::new());
    let dispatcher = Dispatcher::new(&test_config(&cli, workdir.path()), notifier.clone());

    let key = workdir.path().to_string_lossy().into_owned();
    dispatcher.registry().get_or_create(&key);

    dispatcher
        .handle_command(&chat(), Command::Remove(key.clone()))
        .await
        .unwrap();
    assert!(notifier.saw_text("Removed session"));

    dispatcher
        .handle_command(&chat(), Command::Remove(key))
        .await
        .unwrap();
    assert!(notifier.saw_text("No session for"));
}

#[tokio::test]
async fn failed_turn_releases_the_session() {
    let (_cli_dir, cli) = fake_cli(
        r#"echo 'exploded' >&2
exit 2"#,
    );
    let workdir = tempfile::tempdir().unwrap();
    let notifier = Arc::new(MockNotifier::new());
    let dispatcher = Dispatcher::new(&test_config(&cli, workdir.path()), notifier.clone());

    dispatcher.handle_message(&chat(), "crash").await.unwrap();
    wait_for(WAIT, || notifier.saw_text("Turn failed")).await;
    assert_eq!(dispatcher.registry().list()[0].status, SessionStatus::Idle);
}
