use std::time::Duration;

use winrs_core::{CommandState, ConnectionConfig, Credentials, ShellId};
use winrs_shell::{FailureKind, OutputOptions, Shell, ShellError, ShellState};
use winrs_wsman::{
    WsmanClient,
    envelope::{NS_ADDRESSING, NS_SHELL},
    testing::{ScriptedTransport, replies},
    xml::parse,
};

const EXPIRED_REASON: &str = "The WS-Management service cannot process the request because the request contained invalid selectors for the resource.";
const QUOTA_REASON: &str = "The WS-Management service cannot process the request. This user is allowed a maximum number of concurrent operations, which has been exceeded.";

fn shell(transport: &ScriptedTransport) -> Shell<ScriptedTransport> {
    Shell::new(WsmanClient::new(
        transport.clone(),
        ConnectionConfig::new("dc01.example.org"),
        &Credentials::new("svc", "secret"),
    ))
}

/// Operation names of every request sent, e.g. `Create`, `Signal:Terminate`.
fn operations(transport: &ScriptedTransport) -> Vec<String> {
    transport
        .bodies()
        .iter()
        .map(|body| {
            let document = parse(body).expect("sent document should parse");
            let action = document
                .find(NS_ADDRESSING, "Action")
                .map(|node| node.text.rsplit('/').next().unwrap_or_default().to_string())
                .unwrap_or_default();
            match document.find(NS_SHELL, "Code") {
                Some(code) => format!(
                    "{action}:{}",
                    code.text.rsplit('/').next().unwrap_or_default()
                ),
                None => action,
            }
        })
        .collect()
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| part.to_string()).collect()
}

async fn connected(transport: &ScriptedTransport) -> Shell<ScriptedTransport> {
    transport.reply_ok(replies::created("SHELL-1"));
    let mut shell = shell(transport);
    shell.connect().await.expect("connect should succeed");
    shell
}

#[tokio::test]
async fn output_over_three_receives_terminates_once() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport
        .reply_ok(replies::command("CMD-1"))
        .reply_ok(replies::output("CMD-1", "one\r\n", "", None))
        .reply_ok(replies::output("CMD-1", "two\r\n", "", None))
        .reply_ok(replies::output("CMD-1", "three\r\n", "", Some(0)))
        .reply_ok(replies::empty());

    let handle = shell
        .execute(&args(&["cmd", "/c", "dir"]), None)
        .await
        .expect("execute should succeed");

    let mut stream = shell.get_output(handle, OutputOptions::default());
    let mut states = Vec::new();
    let mut stdout = String::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.expect("receive should succeed");
        states.push((chunk.sequence, chunk.state));
        stdout.push_str(chunk.stdout());
    }
    drop(stream);

    assert_eq!(
        states,
        vec![
            (0, CommandState::Running),
            (1, CommandState::Running),
            (2, CommandState::Done),
        ]
    );
    assert_eq!(stdout, "one\ntwo\nthree\n");
    assert_eq!(
        operations(&transport),
        vec![
            "Create",
            "Command",
            "Receive",
            "Receive",
            "Receive",
            "Signal:Terminate"
        ]
    );
    assert_eq!(transport.remaining(), 0);
}

#[tokio::test]
async fn timeouts_below_the_limit_are_retried() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport.reply_ok(replies::command("CMD-1"));
    for _ in 0..2 {
        transport.reply_fault(replies::timed_out());
    }
    transport
        .reply_ok(replies::output("CMD-1", "done", "", Some(0)))
        .reply_ok(replies::empty());

    let handle = shell
        .execute(&args(&["ping", "-n", "60", "localhost"]), None)
        .await
        .expect("execute should succeed");
    let options = OutputOptions {
        timeout_retries: 3,
        ..OutputOptions::default()
    };
    let output = shell
        .get_data(handle, options)
        .await
        .expect("output should arrive after retries");

    assert_eq!(output.get("stdout").map(String::as_str), Some("done"));
    let receives = operations(&transport)
        .iter()
        .filter(|op| *op == "Receive")
        .count();
    assert_eq!(receives, 3);
}

#[tokio::test]
async fn timeouts_at_the_limit_propagate() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport.reply_ok(replies::command("CMD-1"));
    for _ in 0..3 {
        transport.reply_fault(replies::timed_out());
    }
    transport
        .reply_ok(replies::empty())
        .reply_ok(replies::output("CMD-1", "never seen", "", Some(0)));

    let handle = shell
        .execute(&args(&["pause"]), None)
        .await
        .expect("execute should succeed");
    let options = OutputOptions {
        timeout_retries: 3,
        ..OutputOptions::default()
    };
    let mut stream = shell.get_output(handle, options);

    let err = stream
        .next()
        .await
        .expect("stream should yield an item")
        .expect_err("timeouts should propagate");
    assert!(err.fault().is_some_and(|fault| fault.is_timed_out()));
    assert!(stream.next().await.is_none());
    drop(stream);

    let ops = operations(&transport);
    assert_eq!(ops.iter().filter(|op| *op == "Receive").count(), 3);
    assert_eq!(ops.last().map(String::as_str), Some("Signal:Terminate"));
    assert_eq!(transport.remaining(), 1);
}

#[tokio::test]
async fn quota_fault_reconnects_once_and_retries() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport
        .reply_fault(replies::fault("InternalError", QUOTA_REASON))
        .reply_ok(replies::empty())
        .reply_ok(replies::created("SHELL-2"))
        .reply_ok(replies::command("CMD-9"));

    let handle = shell
        .execute(&args(&["hostname"]), None)
        .await
        .expect("execute should succeed after reconnect");

    assert_eq!(handle.shell_id, ShellId("SHELL-2".to_string()));
    assert_eq!(shell.shell_id(), Some(&ShellId("SHELL-2".to_string())));
    assert_eq!(shell.generation(), 2);
    assert_eq!(
        operations(&transport),
        vec!["Create", "Command", "Delete", "Create", "Command"]
    );
}

#[tokio::test]
async fn expired_shell_reconnects_once_and_retries() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport
        .reply_fault(replies::fault("InvalidSelectors", EXPIRED_REASON))
        .reply_fault(replies::fault("InvalidSelectors", EXPIRED_REASON))
        .reply_ok(replies::created("SHELL-2"))
        .reply_ok(replies::command("CMD-2"));

    let handle = shell
        .execute(&args(&["hostname"]), None)
        .await
        .expect("execute should succeed on a fresh shell");

    assert_eq!(handle.shell_id, ShellId("SHELL-2".to_string()));
    assert_eq!(handle.command_id.0, "CMD-2");
    assert_eq!(shell.state(), ShellState::Active);
    assert_eq!(shell.generation(), 2);
    assert_eq!(
        operations(&transport),
        vec!["Create", "Command", "Delete", "Create", "Command"]
    );
    assert_eq!(transport.remaining(), 0);
}

#[tokio::test]
async fn second_quota_fault_propagates() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport
        .reply_fault(replies::fault("InternalError", QUOTA_REASON))
        .reply_fault(replies::fault("InvalidSelectors", "gone"))
        .reply_ok(replies::created("SHELL-2"))
        .reply_fault(replies::fault("InternalError", QUOTA_REASON));

    let err = shell
        .execute(&args(&["hostname"]), None)
        .await
        .expect_err("second failure should propagate");

    assert!(err.fault().is_some_and(|fault| fault.is_quota_exceeded()));
    assert_eq!(
        operations(&transport),
        vec!["Create", "Command", "Delete", "Create", "Command"]
    );
}

#[tokio::test]
async fn other_faults_do_not_reconnect() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport.reply_fault(replies::fault("AccessDenied", "Access is denied."));

    let err = shell
        .execute(&args(&["whoami"]), None)
        .await
        .expect_err("fault should propagate");
    assert!(err.fault().is_some_and(|fault| fault.has_code("AccessDenied")));
    assert_eq!(operations(&transport), vec!["Create", "Command"]);
}

#[tokio::test]
async fn stdin_is_sent_after_the_command() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport
        .reply_ok(replies::command("CMD-1"))
        .reply_ok(replies::empty());

    shell
        .execute(&args(&["sort"]), Some("b\na"))
        .await
        .expect("execute should succeed");
    assert_eq!(operations(&transport), vec!["Create", "Command", "Send"]);
}

#[tokio::test]
async fn execute_without_shell_is_rejected() {
    let transport = ScriptedTransport::new();
    let mut shell = shell(&transport);

    let err = shell
        .execute(&args(&["dir"]), None)
        .await
        .expect_err("execute needs a shell");
    assert!(matches!(err, ShellError::NotConnected));
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn close_twice_is_harmless() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport.reply_ok(replies::empty());

    shell.close(None).await.expect("first close should succeed");
    shell.close(None).await.expect("second close should succeed");

    assert_eq!(shell.state(), ShellState::Closed);
    assert_eq!(shell.shell_id(), None);
    assert_eq!(operations(&transport), vec!["Create", "Delete"]);
}

#[tokio::test]
async fn close_without_shell_sends_nothing() {
    let transport = ScriptedTransport::new();
    let mut shell = shell(&transport);

    shell.close(None).await.expect("close should succeed");
    assert_eq!(shell.state(), ShellState::Unconnected);
    assert!(transport.sent().is_empty());
}

#[tokio::test]
async fn abandoned_output_is_terminated_before_next_request() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport
        .reply_ok(replies::command("CMD-1"))
        .reply_ok(replies::output("CMD-1", "partial", "", None))
        .reply_ok(replies::empty())
        .reply_ok(replies::empty());

    let handle = shell
        .execute(&args(&["type", "big.log"]), None)
        .await
        .expect("execute should succeed");
    {
        let mut stream = shell.get_output(handle, OutputOptions::default());
        let chunk = stream
            .next()
            .await
            .expect("stream should yield")
            .expect("receive should succeed");
        assert_eq!(chunk.stdout(), "partial");
    }

    assert_eq!(
        operations(&transport),
        vec!["Create", "Command", "Receive"]
    );

    shell.close(None).await.expect("close should succeed");
    assert_eq!(
        operations(&transport),
        vec!["Create", "Command", "Receive", "Signal:Terminate", "Delete"]
    );
}

#[tokio::test]
async fn terminate_interrupted_by_caller_is_sent_again() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport
        .reply_ok(replies::command("CMD-1"))
        .reply_ok(replies::output("CMD-1", "done", "", Some(0)))
        .stall()
        .reply_ok(replies::empty())
        .reply_ok(replies::empty());

    let handle = shell
        .execute(&args(&["hostname"]), None)
        .await
        .expect("execute should succeed");
    {
        let mut stream = shell.get_output(handle, OutputOptions::default());
        let waited = tokio::time::timeout(Duration::from_millis(50), stream.next()).await;
        assert!(waited.is_err(), "terminate should still be pending");
    }

    shell.close(None).await.expect("close should succeed");
    assert_eq!(
        operations(&transport),
        vec![
            "Create",
            "Command",
            "Receive",
            "Signal:Terminate",
            "Signal:Terminate",
            "Delete"
        ]
    );
    assert_eq!(transport.remaining(), 0);
}

#[tokio::test]
async fn non_zero_exit_is_a_command_failure() {
    let transport = ScriptedTransport::new();
    let mut shell = connected(&transport).await;
    transport
        .reply_ok(replies::command("CMD-1"))
        .reply_ok(replies::output("CMD-1", "", "not found\r\n", Some(2)))
        .reply_ok(replies::empty());

    let err = shell
        .run(&args(&["type", "missing.txt"]), None)
        .await
        .expect_err("non-zero exit should fail");

    let failure = err.command_failure().expect("error should be a command failure");
    assert_eq!(failure.kind, FailureKind::ExitCode);
    assert_eq!(failure.exit_code, 2);
    assert_eq!(failure.stderr, "not found\n");
    assert_eq!(
        failure.output.get("stderr").map(String::as_str),
        Some("not found\n")
    );
}

#[tokio::test]
async fn list_shells_reads_ids_from_enumeration() {
    let transport = ScriptedTransport::new();
    transport
        .reply_ok(replies::enumerate("ctx"))
        .reply_ok(replies::shells(&["S-1", "S-2"]));
    let mut shell = shell(&transport);

    let shells = shell.list_shells().await.expect("listing should succeed");
    assert_eq!(
        shells,
        vec![ShellId("S-1".to_string()), ShellId("S-2".to_string())]
    );
    assert_eq!(operations(&transport), vec!["Enumerate", "Pull"]);
}
