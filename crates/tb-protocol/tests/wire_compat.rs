// Pin the wire JSON shape independently of handler logic.

use tb_protocol::frames::{AuthPayload, ClientFrame, ServerFrame};

#[test]
fn chat_frame_round_trip() {
    let json = r#"{"type":"chat","message":"hello"}"#;
    let frame: ClientFrame = serde_json::from_str(json).unwrap();
    match frame {
        ClientFrame::Chat { message } => assert_eq!(message, "hello"),
        other => panic!("expected chat frame, got {:?}", other),
    }
}

#[test]
fn auth_frame_bearer_token() {
    let json = r#"{"type":"auth","auth_type":"bearer_token","token":"T"}"#;
    let frame: ClientFrame = serde_json::from_str(json).unwrap();
    match frame {
        ClientFrame::Auth {
            credentials: AuthPayload::BearerToken { token },
        } => assert_eq!(token, "T"),
        other => panic!("expected bearer auth frame, got {:?}", other),
    }
}

#[test]
fn auth_frame_basic_auth() {
    let json = r#"{"type":"auth","auth_type":"basic_auth","username":"user","password":"pass"}"#;
    let frame: ClientFrame = serde_json::from_str(json).unwrap();
    match frame {
        ClientFrame::Auth {
            credentials: AuthPayload::BasicAuth { username, password },
        } => {
            assert_eq!(username, "user");
            assert_eq!(password, "pass");
        }
        other => panic!("expected basic auth frame, got {:?}", other),
    }
}

#[test]
fn auth_frame_oauth2() {
    let json = r#"{"type":"auth","auth_type":"oauth2_client_credentials","client_id":"id","client_secret":"secret","token_url":"https://example.com/token","scope":"read"}"#;
    let frame: ClientFrame = serde_json::from_str(json).unwrap();
    assert!(matches!(
        frame,
        ClientFrame::Auth {
            credentials: AuthPayload::Oauth2ClientCredentials { .. }
        }
    ));
}

#[test]
fn logout_and_ping_frames_have_no_body() {
    let logout: ClientFrame = serde_json::from_str(r#"{"type":"logout"}"#).unwrap();
    assert!(matches!(logout, ClientFrame::Logout));

    let ping: ClientFrame = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
    assert!(matches!(ping, ClientFrame::Ping));
}

#[test]
fn unknown_frame_type_fails_to_parse() {
    let json = r#"{"type":"shutdown"}"#;
    let result: Result<ClientFrame, _> = serde_json::from_str(json);
    assert!(result.is_err(), "unknown frame type must not parse");
}

#[test]
fn connection_established_serialization() {
    let frame = ServerFrame::ConnectionEstablished {
        session_id: "sess-1".into(),
        timestamp: "2026-01-01T00:00:00Z".into(),
    };
    let json = frame.to_json();
    assert!(json.contains(r#""type":"connection_established""#));
    assert!(json.contains("sess-1"));
}

#[test]
fn error_frame_helper_sets_timestamp() {
    let frame = ServerFrame::error("boom");
    let json = frame.to_json();
    assert!(json.contains(r#""type":"error""#));
    assert!(json.contains("boom"));
    assert!(json.contains("timestamp"));
}

#[test]
fn ai_response_omits_absent_optional_fields() {
    let frame = ServerFrame::AiResponse {
        message: "hi".into(),
        tool_calls: None,
        tool_results: None,
        timestamp: "2026-01-01T00:00:00Z".into(),
    };
    let json = frame.to_json();
    assert!(!json.contains("tool_calls"));
    assert!(!json.contains("tool_results"));
}
