mod common;

use common::{harness, tab, ScriptedHost};
use serde_json::Value;
use tabhop_core::contract::{NewTabRequest, Request, Response, Sender, SwitchTabRequest};
use tabhop_core::runtime::{handle_line, serve};
use tabhop_core::transport::{handle_json, handle_request, ErrorCode, TransportResponse};

fn error_code(raw: &str) -> ErrorCode {
    match serde_json::from_str::<TransportResponse>(raw).unwrap() {
        TransportResponse::Err { error } => error.code,
        TransportResponse::Ok { response } => panic!("expected error, got {response:?}"),
    }
}

#[tokio::test]
async fn request_handler_returns_ok_transport_response() {
    let h = harness(ScriptedHost::with_tabs(vec![tab(1, "Alpha", "https://a.com")]));

    let response = handle_request(&h.service, Sender::default(), Request::GetRecentTabs).await;

    let encoded = tabhop_core::transport::encode(&response);
    assert!(encoded.contains("\"status\":\"ok\""));
    assert!(encoded.contains("\"name\":\"get-recent-tabs\""));
}

#[tokio::test]
async fn json_handler_returns_invalid_json_error_code() {
    let h = harness(ScriptedHost::default());

    let raw = handle_json(&h.service, Sender::default(), "{not-json").await;

    assert_eq!(error_code(&raw), ErrorCode::InvalidJson);
}

#[tokio::test]
async fn json_handler_returns_invalid_request_error_code() {
    let h = harness(ScriptedHost::default());
    let payload = serde_json::to_string(&Request::NewTab(NewTabRequest { url: " ".into() })).unwrap();

    let raw = handle_json(&h.service, Sender::default(), &payload).await;

    assert_eq!(error_code(&raw), ErrorCode::InvalidRequest);
}

#[tokio::test]
async fn json_handler_maps_host_failures() {
    let h = harness(ScriptedHost::default());
    h.host.unreachable.lock().unwrap().insert(9);
    let payload =
        serde_json::to_string(&Request::SwitchTab(SwitchTabRequest { tab_id: 9 })).unwrap();

    let raw = handle_json(&h.service, Sender::default(), &payload).await;

    assert_eq!(error_code(&raw), ErrorCode::Host);
}

#[tokio::test]
async fn wire_names_are_kebab_case() {
    let h = harness(ScriptedHost::with_tabs(vec![tab(2, "Beta", "https://b.com")]));

    let raw = handle_json(
        &h.service,
        Sender::tab(1),
        r#"{"name":"switch-tab","body":{"tabId":2}}"#,
    )
    .await;

    match serde_json::from_str::<TransportResponse>(&raw).unwrap() {
        TransportResponse::Ok { response } => assert!(matches!(response, Response::SwitchTab(_))),
        TransportResponse::Err { error } => panic!("unexpected error {error:?}"),
    }
    assert_eq!(h.host.activated(), vec![2]);
}

#[tokio::test]
async fn line_handler_reads_the_sender_tab() {
    let h = harness(ScriptedHost::with_tabs(vec![
        tab(1, "Caller", "https://caller.com"),
        tab(2, "Other", "https://other.com"),
    ]));

    let raw = handle_line(&h.service, r#"{"name":"get-all","body":{},"tabId":1}"#).await;

    let value: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(value["status"], "ok");
    let results = value["response"]["body"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], "2");
    assert!(value["response"]["body"]["fuseIndex"].is_object());
}

#[tokio::test]
async fn line_handler_answers_control_signals() {
    let host = ScriptedHost::with_tabs(vec![
        tab(1, "One", "https://one.com"),
        tab(2, "Two", "https://two.com"),
    ]);
    host.unreachable.lock().unwrap().insert(2);
    let h = harness(host);

    let cleanup: Value =
        serde_json::from_str(&handle_line(&h.service, r#"{"type":"cleanup-old-context"}"#).await)
            .unwrap();
    let reinject: Value = serde_json::from_str(
        &handle_line(&h.service, r#"{"type":"reinject-context","tabId":1}"#).await,
    )
    .unwrap();
    let orphan: Value =
        serde_json::from_str(&handle_line(&h.service, r#"{"type":"reinject-context"}"#).await)
            .unwrap();

    assert_eq!(cleanup["status"], "ok");
    assert_eq!(cleanup["report"]["attempted"], 2);
    assert_eq!(cleanup["report"]["delivered"], 1);
    assert_eq!(cleanup["report"]["failed"], 1);
    assert_eq!(reinject["ack"]["success"], true);
    assert_eq!(orphan["ack"]["success"], false);
}

#[tokio::test]
async fn line_handler_rejects_bad_envelopes() {
    let h = harness(ScriptedHost::default());

    assert_eq!(error_code(&handle_line(&h.service, "nope").await), ErrorCode::InvalidJson);
    assert_eq!(
        error_code(&handle_line(&h.service, r#"{"name":"launch-rocket"}"#).await),
        ErrorCode::InvalidRequest
    );
    assert_eq!(
        error_code(&handle_line(&h.service, r#"{"type":"self-destruct"}"#).await),
        ErrorCode::InvalidRequest
    );
    assert_eq!(
        error_code(&handle_line(&h.service, r#"{"name":"get-recent-tabs","tabId":"x"}"#).await),
        ErrorCode::InvalidRequest
    );
}

#[tokio::test]
async fn serve_answers_one_line_per_request() {
    let h = harness(ScriptedHost::with_tabs(vec![tab(3, "Gamma", "https://c.com")]));
    let input = concat!(
        r#"{"name":"get-recent-tabs"}"#,
        "\n\n",
        r#"{"name":"new-tab","body":{"url":"https://new.com"}}"#,
        "\n",
    );
    let mut output = Vec::new();

    serve(&h.service, input.as_bytes(), &mut output).await.unwrap();

    let text = String::from_utf8(output).unwrap();
    let lines: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0]["response"]["name"], "get-recent-tabs");
    assert_eq!(lines[0]["response"]["body"]["results"][0]["title"], "Gamma");
    assert_eq!(lines[1]["response"]["body"]["success"], true);
    assert_eq!(h.host.created(), vec!["https://new.com"]);
}
