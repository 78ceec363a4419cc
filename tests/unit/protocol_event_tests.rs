use serde_json::json;

use agent_relay::protocol::client::TurnRequest;
use agent_relay::protocol::events::{parse_inbound_line, Inbound, RawEvent};
use agent_relay::models::message::EnhancedMode;
use agent_relay::AppError;

fn event_line(msg: &serde_json::Value) -> String {
    json!({ "method": "event", "params": { "msg": msg } }).to_string()
}

#[test]
fn parses_session_configured_event() {
    let line = event_line(&json!({
        "type": "session_configured",
        "session_id": "abc",
        "model": "o3"
    }));
    let parsed = parse_inbound_line(&line).expect("parse");
    assert_eq!(
        parsed,
        Some(Inbound::Event(RawEvent::SessionConfigured {
            session_id: "abc".into(),
            model: Some("o3".into()),
        }))
    );
}

#[test]
fn parses_exec_begin_with_defaults() {
    let line = event_line(&json!({ "type": "exec_command_begin", "call_id": "c1" }));
    let Some(Inbound::Event(event)) = parse_inbound_line(&line).expect("parse") else {
        panic!("expected event");
    };
    assert_eq!(
        event,
        RawEvent::ExecCommandBegin {
            call_id: "c1".into(),
            command: vec![],
            cwd: None,
        }
    );
    assert_eq!(event.kind(), "exec_command_begin");
}

#[test]
fn unit_like_events_parse() {
    let line = event_line(&json!({ "type": "task_started" }));
    assert_eq!(
        parse_inbound_line(&line).expect("parse"),
        Some(Inbound::Event(RawEvent::TaskStarted {}))
    );
}

#[test]
fn unknown_event_type_is_tolerated() {
    let line = event_line(&json!({ "type": "brand_new_event", "x": 1 }));
    assert_eq!(
        parse_inbound_line(&line).expect("parse"),
        Some(Inbound::Event(RawEvent::Unknown))
    );
}

#[test]
fn successful_response_carries_result() {
    let parsed = parse_inbound_line(r#"{"id":7,"result":{"session_id":"abc"}}"#).expect("parse");
    let Some(Inbound::Response { id, outcome }) = parsed else {
        panic!("expected response");
    };
    assert_eq!(id, 7);
    assert_eq!(outcome.expect("ok")["session_id"], "abc");
}

#[test]
fn error_response_carries_rpc_error() {
    let parsed =
        parse_inbound_line(r#"{"id":3,"error":{"code":-32600,"message":"bad request"}}"#)
            .expect("parse");
    let Some(Inbound::Response { id, outcome }) = parsed else {
        panic!("expected response");
    };
    assert_eq!(id, 3);
    let err = outcome.unwrap_err();
    assert_eq!(err.code, -32600);
    assert_eq!(err.message, "bad request");
}

#[test]
fn response_without_result_is_null() {
    let parsed = parse_inbound_line(r#"{"id":1}"#).expect("parse");
    assert_eq!(
        parsed,
        Some(Inbound::Response {
            id: 1,
            outcome: Ok(serde_json::Value::Null),
        })
    );
}

#[test]
fn other_methods_and_blank_lines_are_skipped() {
    assert_eq!(parse_inbound_line("   ").expect("parse"), None);
    assert_eq!(
        parse_inbound_line(r#"{"method":"log","params":{"line":"x"}}"#).expect("parse"),
        None
    );
}

#[test]
fn malformed_json_is_a_protocol_error() {
    let err = parse_inbound_line("{not json").unwrap_err();
    assert!(matches!(err, AppError::Protocol(ref msg) if msg.contains("malformed json")));
}

#[test]
fn event_without_params_is_a_protocol_error() {
    let err = parse_inbound_line(r#"{"method":"event"}"#).unwrap_err();
    assert!(matches!(err, AppError::Protocol(_)));
}

#[test]
fn envelope_without_method_or_id_is_a_protocol_error() {
    let err = parse_inbound_line(r#"{"result":{}}"#).unwrap_err();
    assert!(matches!(err, AppError::Protocol(ref msg) if msg.contains("neither method")));
}

#[test]
fn effective_prompt_prepends_resume_context() {
    let mut request = TurnRequest {
        prompt: "fix bug".into(),
        cwd: "/work".into(),
        mode: EnhancedMode::new("default"),
        resume_context: None,
    };
    assert_eq!(request.effective_prompt(), "fix bug");

    request.resume_context = Some("[Context from the previous session]\nUser: hi".into());
    assert_eq!(
        request.effective_prompt(),
        "[Context from the previous session]\nUser: hi\n\nfix bug"
    );
}
