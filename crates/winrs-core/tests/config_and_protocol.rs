use std::time::Duration;

use winrs_core::{
    CommandHandle, CommandId, CommandState, ConnectionConfig, Credentials, DEFAULT_HTTPS_PORT,
    DEFAULT_HTTP_PORT, ShellId, SignalCode, WINRM_CODEPAGE,
};

#[test]
fn config_defaults_follow_scheme() {
    let config = ConnectionConfig::new("dc01.example.org");
    assert!(config.encrypted);
    assert_eq!(config.port(), DEFAULT_HTTPS_PORT);
    assert_eq!(config.url("wsman"), "https://dc01.example.org:5986/wsman");
    assert_eq!(config.connection_timeout(), Duration::from_secs(1800));
    assert_eq!(config.request_timeout(), Duration::from_secs(300));
    assert_eq!(config.shell_lifetime(), Duration::from_secs(600));
    assert_eq!(config.codepage, WINRM_CODEPAGE);

    let plain = config.with_encrypted(false);
    assert_eq!(plain.port(), DEFAULT_HTTP_PORT);
    assert_eq!(plain.url("/wsman"), "http://dc01.example.org:5985/wsman");

    let explicit = plain.with_port(8080);
    assert_eq!(explicit.url("/wsman"), "http://dc01.example.org:8080/wsman");
}

#[test]
fn config_deserializes_with_defaults() {
    let config: ConnectionConfig =
        serde_json::from_str(r#"{"host": "ex01", "request_timeout_secs": 60}"#)
            .expect("config should deserialize");

    assert_eq!(config.host, "ex01");
    assert_eq!(config.request_timeout(), Duration::from_secs(60));
    assert_eq!(config.shell_lifetime_secs, 600);
    assert_eq!(config.locale, "en-US");
    assert_eq!(config.max_envelope_size, 3_073_741_824);
}

#[test]
fn credentials_debug_hides_secret() {
    let credentials = Credentials::new("svc-sync", "hunter2");
    let rendered = format!("{credentials:?}");
    assert!(rendered.contains("svc-sync"));
    assert!(!rendered.contains("hunter2"));
    assert_eq!(credentials.secret(), "hunter2");
}

#[test]
fn command_state_reads_last_uri_segment() {
    let base = "http://schemas.microsoft.com/wbem/wsman/1/windows/shell/CommandState";
    assert_eq!(CommandState::from_uri(&format!("{base}/Done")), CommandState::Done);
    assert_eq!(
        CommandState::from_uri(&format!("{base}/Running")),
        CommandState::Running
    );
    assert_eq!(
        CommandState::from_uri(&format!("{base}/Pending")),
        CommandState::Running
    );
}

#[test]
fn handle_and_signal_render() {
    let handle = CommandHandle {
        shell_id: ShellId("S-1".to_string()),
        command_id: CommandId("C-9".to_string()),
    };
    assert_eq!(handle.to_string(), "S-1/C-9");
    assert_eq!(SignalCode::Terminate.as_str(), "Terminate");
    assert_eq!(SignalCode::CtrlC.as_str(), "ctrl_c");
}
