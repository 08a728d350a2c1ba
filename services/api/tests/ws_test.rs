//! Live-query tests over a real WebSocket connection.

use api_lib::adapters::MemoryIdentityProvider;
use api_lib::config::Config;
use api_lib::web::{router, state::AppState};
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use chrono::Duration;
use futures::{SinkExt, StreamExt};
use sapt_core::MemoryStore;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tower::ServiceExt;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serves a fresh in-memory app on a random local port. The returned router
/// shares its state with the served one.
async fn start_server() -> (Router, SocketAddr) {
    let state = AppState::new(
        Arc::new(MemoryStore::new()),
        Arc::new(MemoryIdentityProvider::new(Duration::days(1))),
        Arc::new(Config::in_memory()),
    );
    let app = router(Arc::new(state)).unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let served = app.clone();
    tokio::spawn(async move {
        axum::serve(listener, served).await.unwrap();
    });
    (app, addr)
}

async fn post(app: &Router, uri: &str, cookie: Option<&str>, body: Value) -> (StatusCode, Option<String>, Value) {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let request = builder.body(Body::from(body.to_string())).unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::to_string);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, cookie, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
}

/// Signs up and returns (session cookie, uid).
async fn sign_up(app: &Router, email: &str, role: &str) -> (String, String) {
    let body = json!({ "email": email, "password": "secret1", "role": role });
    let (status, cookie, body) = post(app, "/auth/signup", None, body).await;
    assert_eq!(status, StatusCode::CREATED);
    (cookie.unwrap(), body["uid"].as_str().unwrap().to_string())
}

async fn connect(addr: SocketAddr, cookie: &str) -> Client {
    let mut request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    request
        .headers_mut()
        .insert("cookie", HeaderValue::from_str(cookie).unwrap());
    let (socket, _) = connect_async(request).await.unwrap();
    socket
}

async fn send_json(socket: &mut Client, message: Value) {
    socket.send(Message::Text(message.to_string())).await.unwrap();
}

/// The next server message, failing the test after a few seconds of silence.
async fn next_json(socket: &mut Client) -> Value {
    loop {
        let frame = tokio::time::timeout(std::time::Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for a server message")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

#[tokio::test]
async fn websocket_requires_a_session() {
    let (_app, addr) = start_server().await;
    let request = format!("ws://{}/ws", addr).into_client_request().unwrap();
    assert!(connect_async(request).await.is_err());
}

#[tokio::test]
async fn my_tasks_topic_streams_until_unsubscribed() {
    let (app, addr) = start_server().await;
    let (supervisor, _) = sign_up(&app, "sup@example.com", "supervisor").await;
    let (student, student_uid) = sign_up(&app, "stu@example.com", "student").await;
    let mut socket = connect(addr, &student).await;

    let my_tasks = json!({ "kind": "my_tasks" });
    send_json(&mut socket, json!({ "type": "subscribe", "topic": my_tasks })).await;
    let ack = next_json(&mut socket).await;
    assert_eq!(ack["type"], "subscribed");
    let first = next_json(&mut socket).await;
    assert_eq!(first["type"], "snapshot");
    assert_eq!(first["records"], json!([]));

    let task = json!({ "title": "Lab report", "assignedTo": student_uid, "dueDate": "2024-05-10" });
    let (status, _, _) = post(&app, "/tasks", Some(&supervisor), task).await;
    assert_eq!(status, StatusCode::CREATED);
    let second = next_json(&mut socket).await;
    assert_eq!(second["type"], "snapshot");
    assert_eq!(second["topic"], my_tasks);
    assert_eq!(second["records"][0]["title"], "Lab report");

    send_json(&mut socket, json!({ "type": "subscribe", "topic": my_tasks })).await;
    assert_eq!(next_json(&mut socket).await["type"], "error");

    send_json(&mut socket, json!({ "type": "unsubscribe", "topic": my_tasks })).await;
    assert_eq!(next_json(&mut socket).await["type"], "unsubscribed");

    let task = json!({ "title": "Second report", "assignedTo": student_uid, "dueDate": "2024-05-17" });
    let (status, _, _) = post(&app, "/tasks", Some(&supervisor), task).await;
    assert_eq!(status, StatusCode::CREATED);
    let quiet = tokio::time::timeout(std::time::Duration::from_millis(300), socket.next()).await;
    assert!(quiet.is_err(), "unexpected frame after unsubscribe: {:?}", quiet);
}

#[tokio::test]
async fn team_topics_are_refused_to_students() {
    let (app, addr) = start_server().await;
    let (student, _) = sign_up(&app, "stu@example.com", "student").await;
    let mut socket = connect(addr, &student).await;

    send_json(&mut socket, json!({ "type": "subscribe", "topic": { "kind": "all_tasks" } })).await;
    let refused = next_json(&mut socket).await;
    assert_eq!(refused["type"], "subscription_ended");
    assert_eq!(refused["topic"]["kind"], "all_tasks");

    let range = json!({ "kind": "attendance", "start": "2024-05-06", "end": "2024-05-10" });
    send_json(&mut socket, json!({ "type": "subscribe", "topic": range })).await;
    assert_eq!(next_json(&mut socket).await["type"], "subscription_ended");

    send_json(&mut socket, json!({ "type": "shout" })).await;
    assert_eq!(next_json(&mut socket).await["type"], "error");
}

#[tokio::test]
async fn supervisors_watch_attendance_ranges() {
    let (app, addr) = start_server().await;
    let (supervisor, _) = sign_up(&app, "sup@example.com", "supervisor").await;
    let (_, employee_uid) = sign_up(&app, "emp@example.com", "employee").await;
    let mut socket = connect(addr, &supervisor).await;

    let range = json!({ "kind": "attendance", "start": "2024-05-06", "end": "2024-05-10" });
    send_json(&mut socket, json!({ "type": "subscribe", "topic": range })).await;
    assert_eq!(next_json(&mut socket).await["type"], "subscribed");
    assert_eq!(next_json(&mut socket).await["records"], json!([]));

    let mark = json!({ "userId": employee_uid, "date": "2024-05-08", "status": "late" });
    let (status, _, _) = post(&app, "/attendance", Some(&supervisor), mark).await;
    assert_eq!(status, StatusCode::CREATED);
    let snapshot = next_json(&mut socket).await;
    assert_eq!(snapshot["records"][0]["status"], "late");
}
