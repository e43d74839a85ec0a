use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::time::timeout;

use coursegen_client_core::CourseClient;
use coursegen_client_core::auth::CredentialStore;
use coursegen_client_core::config::Config;
use coursegen_client_core::session::{AuditSession, SessionError, SessionUpdate};
use coursegen_client_core::transport::websocket::{CloseDisposition, ConnectionState};
use coursegen_proto::{Author, SessionStatus, TerminalReason};

/// How the fake audit server treats the n-th connection (1-based).
#[derive(Clone, Copy)]
enum Script {
    /// Snapshot, then a 1011 close on the first connection; chat afterwards.
    DropFirst,
    /// Close every connection with the given code before sending anything.
    CloseWith(u16),
    /// Snapshot, then announce the course is being generated and finished.
    FinishCourse,
}

struct AuditServer {
    script: Script,
    connections: AtomicUsize,
    session_ids: Mutex<Vec<Option<String>>>,
    received: Mutex<Vec<Value>>,
    close_codes: Mutex<Vec<Option<u16>>>,
}

#[derive(Deserialize)]
struct ChannelQuery {
    session_id: Option<String>,
}

async fn upgrade(
    ws: WebSocketUpgrade,
    State(server): State<Arc<AuditServer>>,
    Query(query): Query<ChannelQuery>,
) -> Response {
    server.session_ids.lock().push(query.session_id);
    ws.on_upgrade(move |socket| serve_socket(socket, server))
}

/// Id the server hands out on a connection that did not name a session.
const ASSIGNED_SESSION: &str = "sess-42";

fn snapshot_frame(session_id: &str) -> Message {
    Message::Text(
        json!({
            "type": "session_info",
            "session_id": session_id,
            "reset_count": 0,
            "messages": [
                {"id": "b0", "who": "bot", "type": "chat", "text": "What would you like to learn?"}
            ]
        })
        .to_string(),
    )
}

fn close_frame(code: u16, reason: &'static str) -> Message {
    Message::Close(Some(CloseFrame {
        code,
        reason: Cow::Borrowed(reason),
    }))
}

async fn serve_socket(mut socket: WebSocket, server: Arc<AuditServer>) {
    let connection = server.connections.fetch_add(1, Ordering::SeqCst) + 1;

    match server.script {
        Script::CloseWith(code) => {
            let _ = socket.send(close_frame(code, "no subscription")).await;
            return;
        }
        Script::DropFirst if connection == 1 => {
            let _ = socket.send(snapshot_frame(ASSIGNED_SESSION)).await;
            let _ = socket.send(close_frame(1011, "restarting")).await;
            return;
        }
        Script::FinishCourse => {
            let _ = socket.send(snapshot_frame(ASSIGNED_SESSION)).await;
            let _ = socket
                .send(Message::Text(json!({"type": "course_created_start"}).to_string()))
                .await;
            let _ = socket
                .send(Message::Text(
                    json!({"type": "course_generation_done"}).to_string(),
                ))
                .await;
        }
        Script::DropFirst => {
            let _ = socket.send(snapshot_frame(ASSIGNED_SESSION)).await;
        }
    }

    let mut replies = 0;
    while let Some(Ok(message)) = socket.recv().await {
        match message {
            Message::Text(text) => {
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                let said = frame["text"].as_str().unwrap_or_default().to_string();
                server.received.lock().push(frame);
                let reply = if said == "bye" {
                    json!({"type": "duplicate_connection", "message": "opened in another tab"})
                } else {
                    replies += 1;
                    json!({
                        "id": format!("c{connection}-r{replies}"),
                        "who": "bot",
                        "type": "chat",
                        "text": format!("noted: {said}"),
                    })
                };
                if socket.send(Message::Text(reply.to_string())).await.is_err() {
                    break;
                }
            }
            Message::Close(frame) => {
                server.close_codes.lock().push(frame.map(|f| f.code));
                break;
            }
            _ => {}
        }
    }
}

async fn spawn_server(script: Script) -> (Arc<AuditServer>, String) {
    let server = Arc::new(AuditServer {
        script,
        connections: AtomicUsize::new(0),
        session_ids: Mutex::new(Vec::new()),
        received: Mutex::new(Vec::new()),
        close_codes: Mutex::new(Vec::new()),
    });
    let router = Router::new()
        .route("/ws/audit", get(upgrade))
        .with_state(server.clone());
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind audit server");
    let addr = listener.local_addr().expect("server addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });
    (server, format!("ws://{addr}"))
}

fn open_session(ws_host: String, session_id: Option<&str>) -> AuditSession {
    let config = Config {
        ws_host,
        reconnect_delay: Duration::from_millis(150),
        ..Config::default()
    };
    let client = CourseClient::with_store(config, Arc::new(CredentialStore::in_memory()))
        .expect("client");
    client.open_websocket_session(session_id.map(str::to_string))
}

async fn wait_for(
    session: &mut AuditSession,
    mut matches: impl FnMut(&SessionUpdate) -> bool,
) -> SessionUpdate {
    timeout(Duration::from_secs(10), async {
        loop {
            let update = session.next_update().await.expect("session closed");
            if matches(&update) {
                return update;
            }
        }
    })
    .await
    .expect("timed out waiting for session update")
}

#[tokio::test]
async fn chat_survives_a_server_restart() {
    let (server, host) = spawn_server(Script::DropFirst).await;
    let mut session = open_session(host, None);
    session.connect().expect("connect");

    let update = wait_for(&mut session, |u| matches!(u, SessionUpdate::Snapshot { .. })).await;
    assert_eq!(
        update,
        SessionUpdate::Snapshot {
            session_id: Some("sess-42".into())
        }
    );
    assert_eq!(session.session_id(), Some("sess-42"));

    wait_for(&mut session, |u| {
        *u == SessionUpdate::Connection(ConnectionState::Closed(CloseDisposition::Reconnecting))
    })
    .await;
    wait_for(&mut session, |u| matches!(u, SessionUpdate::Snapshot { .. })).await;
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
    assert_eq!(session.log().len(), 1);
    // The reconnect resumes the session the server assigned on first contact.
    assert_eq!(
        server.session_ids.lock().clone(),
        vec![None, Some("sess-42".to_string())]
    );

    let sent = session.send_chat("  SQL joins ").expect("send");
    assert_eq!(sent.payload, "SQL joins");
    assert!(matches!(
        session.send_chat("again"),
        Err(SessionError::AwaitingReply)
    ));

    let reply = wait_for(&mut session, |u| matches!(u, SessionUpdate::Appended(_))).await;
    let SessionUpdate::Appended(event) = reply else {
        unreachable!();
    };
    assert_eq!(event.who, Author::Server);
    assert_eq!(event.payload, "noted: SQL joins");
    assert_eq!(session.log().len(), 3);
    assert!(session.can_send());

    assert_eq!(
        server.received.lock().clone(),
        vec![json!({"who": "user", "type": "chat", "text": "SQL joins"})]
    );
}

#[tokio::test]
async fn duplicate_connection_is_terminal() {
    let (server, host) = spawn_server(Script::DropFirst).await;
    // Skip the scripted drop so the first connection is the chatting one.
    server.connections.store(1, Ordering::SeqCst);
    let mut session = open_session(host, Some("sess-42"));
    session.connect().expect("connect");

    wait_for(&mut session, |u| matches!(u, SessionUpdate::Snapshot { .. })).await;
    session.send_chat("bye").expect("send");

    let update = wait_for(&mut session, |u| {
        matches!(
            u,
            SessionUpdate::Connection(ConnectionState::Closed(CloseDisposition::Terminal(_)))
        )
    })
    .await;
    assert_eq!(
        update,
        SessionUpdate::Connection(ConnectionState::Closed(CloseDisposition::Terminal(
            TerminalReason::DuplicateSession
        )))
    );
    assert_eq!(session.log().status(), SessionStatus::Terminal);
    assert!(!session.can_send());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.connections.load(Ordering::SeqCst), 2);
    assert_eq!(server.close_codes.lock().clone(), vec![Some(4000)]);
    assert_eq!(
        server.session_ids.lock().clone(),
        vec![Some("sess-42".to_string())]
    );
}

#[tokio::test]
async fn rejected_credential_close_is_not_retried() {
    let (server, host) = spawn_server(Script::CloseWith(4001)).await;
    let mut session = open_session(host, Some("sess-42"));
    session.connect().expect("connect");

    let update = wait_for(&mut session, |u| {
        matches!(u, SessionUpdate::Connection(ConnectionState::Closed(_)))
    })
    .await;
    assert_eq!(
        update,
        SessionUpdate::Connection(ConnectionState::Closed(CloseDisposition::Terminal(
            TerminalReason::CredentialRejected
        )))
    );

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
    assert_eq!(session.log().status(), SessionStatus::Terminal);
}

#[tokio::test]
async fn finished_course_closes_without_reconnecting() {
    let (server, host) = spawn_server(Script::FinishCourse).await;
    let mut session = open_session(host, Some("sess-42"));
    session.connect().expect("connect");

    assert_eq!(
        wait_for(&mut session, |u| matches!(u, SessionUpdate::Status(_))).await,
        SessionUpdate::Status(SessionStatus::Busy)
    );
    assert_eq!(
        wait_for(&mut session, |u| matches!(u, SessionUpdate::Status(_))).await,
        SessionUpdate::Status(SessionStatus::Done)
    );
    wait_for(&mut session, |u| {
        *u == SessionUpdate::Connection(ConnectionState::Closed(CloseDisposition::Stopped))
    })
    .await;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);
    assert_eq!(server.close_codes.lock().clone(), vec![Some(1000)]);
    assert!(matches!(
        session.send_chat("one more"),
        Err(SessionError::NotConnected)
    ));
}
