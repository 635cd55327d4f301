use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use futures_util::{SinkExt, StreamExt};
use loro::{ExportMode, LoroDoc};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tower::ServiceExt;

use crate::config::Config;
use crate::db::MemoryCollabStore;
use crate::services::auth_service::tests::{signed_token, SECRET};
use crate::ws::hub::DocumentRef;
use crate::{build_app, AppState};

const DEV_TOKEN: &str = "dev-token";

fn test_state() -> AppState {
    let config = Config {
        auth_jwt_secret: Some(SECRET.to_string()),
        auth_dev_token: Some(DEV_TOKEN.to_string()),
        ..Config::default()
    };
    AppState::new(config, Arc::new(MemoryCollabStore::new()))
}

async fn get(app: &Router, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
    let mut request = Request::builder().uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let response = app.clone().oneshot(request.body(Body::empty()).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn text_update(text: &str) -> Vec<u8> {
    let author = LoroDoc::new();
    author.get_text("text").insert(0, text).unwrap();
    author.commit();
    author.export(ExportMode::all_updates()).unwrap()
}

/// Open session S1 through the hub with one edit applied, returning the client id
async fn seed_session(state: &AppState) -> String {
    let (tx, _rx) = mpsc::unbounded_channel();
    let client_id = state.hub.on_connect(tx).await;
    state.hub.authenticate(&client_id, DEV_TOKEN, Some("u1"), Some("Ada")).await;
    state.hub.join_session(&client_id, "S1", None, DocumentRef::default()).await.unwrap();
    state.hub.apply_update(&client_id, &text_update("plot 7")).await.unwrap();
    client_id
}

#[tokio::test]
async fn health_and_ready_need_no_token() {
    let app = build_app(test_state());

    let (status, body) = get(&app, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = get(&app, "/api/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn api_routes_require_a_valid_token() {
    let app = build_app(test_state());

    let (status, _) = get(&app, "/api/v1/diagnostics", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = get(&app, "/api/v1/diagnostics", Some("forged")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = get(&app, "/api/v1/diagnostics", Some(&signed_token("u9", Some("Ops")))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["n_conn"], 0);

    let request = Request::builder()
        .uri("/api/v1/diagnostics")
        .header(header::COOKIE, format!("auth_token={}", DEV_TOKEN))
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn unknown_session_is_not_found() {
    let app = build_app(test_state());
    for uri in [
        "/api/v1/sessions/nope",
        "/api/v1/sessions/nope/document",
        "/api/v1/sessions/nope/versions",
        "/api/v1/sessions/nope/events",
    ] {
        let (status, body) = get(&app, uri, Some(DEV_TOKEN)).await;
        assert_eq!(status, StatusCode::NOT_FOUND, "{}", uri);
        assert_eq!(body["code"], 404);
    }
}

#[tokio::test]
async fn document_is_served_live_then_from_storage() {
    let state = test_state();
    let app = build_app(state.clone());
    let client_id = seed_session(&state).await;

    let (status, body) = get(&app, "/api/v1/sessions/S1", Some(DEV_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["session"]["documentType"], "field_notes");
    assert_eq!(body["liveClients"], 1);
    assert_eq!(body["documentLoaded"], true);
    assert_eq!(body["participants"][0]["userId"], "u1");

    let (status, body) = get(&app, "/api/v1/sessions/S1/document?format=both", Some(DEV_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "live");
    assert_eq!(body["json"], json!({"text": "plot 7"}));
    assert!(body["binary"].is_string());

    // Last member leaving writes the final version and unloads the document
    state.hub.leave_session(&client_id).await.unwrap();

    let (status, body) = get(&app, "/api/v1/sessions/S1/document", Some(DEV_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"], "stored");
    assert_eq!(body["version"], 1);
    assert_eq!(body["json"], json!({"text": "plot 7"}));
    assert!(body["binary"].is_null());

    let (_, body) = get(&app, "/api/v1/sessions/S1/versions", Some(DEV_TOKEN)).await;
    assert_eq!(body["versions"].as_array().unwrap().len(), 1);
    assert_eq!(body["versions"][0]["metadata"]["reason"], "final");

    let (status, body) = get(&app, "/api/v1/sessions/S1/versions/1?format=binary", Some(DEV_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["json"].is_null());
    assert!(body["binary"].is_string());

    let (status, _) = get(&app, "/api/v1/sessions/S1/versions/9", Some(DEV_TOKEN)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(&app, "/api/v1/sessions/S1/document?format=xml", Some(DEV_TOKEN)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn events_feed_is_bounded() {
    let state = test_state();
    let app = build_app(state.clone());
    seed_session(&state).await;

    let (status, body) = get(&app, "/api/v1/sessions/S1/events", Some(DEV_TOKEN)).await;
    assert_eq!(status, StatusCode::OK);
    let kinds: Vec<&str> = body["events"].as_array().unwrap().iter().filter_map(|e| e["eventType"].as_str()).collect();
    assert_eq!(kinds, vec!["update", "join"]);

    let (_, body) = get(&app, "/api/v1/sessions/S1/events?limit=1", Some(DEV_TOKEN)).await;
    assert_eq!(body["events"].as_array().unwrap().len(), 1);

    for limit in ["0", "501"] {
        let (status, _) = get(&app, &format!("/api/v1/sessions/S1/events?limit={}", limit), Some(DEV_TOKEN)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

async fn next_json<S>(socket: &mut S) -> Value
where
    S: StreamExt<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>> + Unpin,
{
    loop {
        match socket.next().await {
            Some(Ok(WsMessage::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("socket ended: {:?}", other),
        }
    }
}

#[tokio::test]
async fn websocket_clients_collaborate_end_to_end() {
    let state = test_state();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}{}", listener.local_addr().unwrap(), state.config.ws_path);
    let app = build_app(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let (mut alice, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    let (mut bob, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();
    assert_eq!(next_json(&mut alice).await["type"], "welcome");
    assert_eq!(next_json(&mut bob).await["type"], "welcome");

    for (socket, user) in [(&mut alice, "alice"), (&mut bob, "bob")] {
        let auth = json!({"type": "auth", "token": DEV_TOKEN, "userId": user, "username": user});
        socket.send(WsMessage::text(auth.to_string())).await.unwrap();
        assert_eq!(next_json(socket).await["type"], "auth_success");
        let join = json!({"type": "join_session", "sessionId": "field-day"});
        socket.send(WsMessage::text(join.to_string())).await.unwrap();
        assert_eq!(next_json(socket).await["type"], "initialState");
        assert_eq!(next_json(socket).await["type"], "clientList");
    }
    assert_eq!(next_json(&mut alice).await["type"], "clientJoin");

    use base64::{engine::general_purpose, Engine as _};
    let update = general_purpose::STANDARD.encode(text_update("lichen on north face"));
    let msg = json!({"type": "update", "update": update});
    alice.send(WsMessage::text(msg.to_string())).await.unwrap();

    let received = next_json(&mut bob).await;
    assert_eq!(received["type"], "yjsUpdate");
    assert_eq!(received["update"], update);

    bob.send(WsMessage::text(r#"{"type":"ping"}"#)).await.unwrap();
    assert_eq!(next_json(&mut bob).await["type"], "pong");

    bob.close(None).await.unwrap();
    assert_eq!(next_json(&mut alice).await["type"], "clientLeave");

    let live = state.hub.live_document("field-day").await.unwrap().unwrap();
    assert_eq!(live.json, json!({"text": "lichen on north face"}));
}
