//! End-to-end relay tests over real WebSocket connections.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use sealpost::{
    ClientConnection, ClientNotice, ClientRequest, ClientSession, CryptoError, FileCredentials,
    Hub, HubHandle, KeyPair, MemoryCredentials, Server, ServerEvent,
};
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(10);

async fn start_relay() -> (Server, HubHandle) {
    let (hub, _task) = Hub::new(Box::new(MemoryCredentials::new())).spawn();
    let server = Server::bind("127.0.0.1:0", hub.clone()).await.unwrap();
    (server, hub)
}

fn session(identity: &str) -> ClientSession {
    ClientSession::with_key_pair(identity, KeyPair::generate().unwrap())
}

async fn join(url: &str, identity: &str, proof: &str) -> (ClientConnection, ClientSession) {
    let mut session = session(identity);
    let mut conn = ClientConnection::connect(url).await.unwrap();
    conn.register(&mut session, proof).await.unwrap();
    (conn, session)
}

/// Handle events until `done` accepts a notice.
async fn pump_until(
    conn: &mut ClientConnection,
    session: &mut ClientSession,
    done: impl Fn(&ClientNotice) -> bool,
) -> ClientNotice {
    tokio::time::timeout(TIMEOUT, async {
        loop {
            let event = conn.recv().await.expect("relay closed").unwrap();
            if let Some(notice) = conn.dispatch(session, event).await.unwrap() {
                if done(&notice) {
                    return notice;
                }
            }
        }
    })
    .await
    .expect("timed out waiting for notice")
}

/// Bring two fresh clients online and let them exchange keys.
async fn pair(
    url: &str,
) -> (
    (ClientConnection, ClientSession),
    (ClientConnection, ClientSession),
) {
    let (mut a_conn, mut alice) = join(url, "alice", "x1").await;
    let (mut b_conn, mut bob) = join(url, "bob", "").await;
    assert!(bob.roster().contains("alice"));

    tokio::join!(
        pump_until(&mut a_conn, &mut alice, |n| *n == ClientNotice::PeerKey("bob".into())),
        pump_until(&mut b_conn, &mut bob, |n| *n == ClientNotice::PeerKey("alice".into())),
    );
    ((a_conn, alice), (b_conn, bob))
}

#[tokio::test]
async fn test_full_conversation() {
    let (server, _hub) = start_relay().await;
    let ((mut a_conn, mut alice), (mut b_conn, mut bob)) = pair(&server.url()).await;

    a_conn.send(&alice.compose("bob", "Hello Bob").unwrap()).await.unwrap();
    let notice = pump_until(&mut b_conn, &mut bob, |n| {
        matches!(n, ClientNotice::Message { .. })
    })
    .await;
    assert_eq!(
        notice,
        ClientNotice::Message {
            from: "alice".to_string(),
            text: "Hello Bob".to_string(),
        }
    );

    b_conn.send(&bob.compose("alice", "Hi Alice").unwrap()).await.unwrap();
    let notice = pump_until(&mut a_conn, &mut alice, |n| {
        matches!(n, ClientNotice::Message { .. })
    })
    .await;
    assert_eq!(
        notice,
        ClientNotice::Message {
            from: "bob".to_string(),
            text: "Hi Alice".to_string(),
        }
    );
    server.shutdown();
}

#[tokio::test]
async fn test_messages_arrive_in_send_order() {
    let (server, _hub) = start_relay().await;
    let ((mut a_conn, alice), (mut b_conn, mut bob)) = pair(&server.url()).await;

    for i in 0..10 {
        a_conn
            .send(&alice.compose("bob", &format!("message {i}")).unwrap())
            .await
            .unwrap();
    }
    for i in 0..10 {
        let notice = pump_until(&mut b_conn, &mut bob, |n| {
            matches!(n, ClientNotice::Message { .. })
        })
        .await;
        assert_eq!(
            notice,
            ClientNotice::Message {
                from: "alice".to_string(),
                text: format!("message {i}"),
            }
        );
    }
}

#[tokio::test]
async fn test_tampered_envelope_is_undecryptable() {
    let (server, _hub) = start_relay().await;
    let ((mut a_conn, alice), (mut b_conn, mut bob)) = pair(&server.url()).await;

    let ClientRequest::SendEncryptedMessage { envelope, .. } =
        alice.compose("bob", "integrity matters").unwrap()
    else {
        panic!("expected an encrypted message");
    };
    let mut sealed = sealpost::Envelope::decode(&envelope).unwrap();
    sealed.ciphertext[0] ^= 0x01;

    a_conn
        .send(&ClientRequest::SendEncryptedMessage {
            recipient: "bob".to_string(),
            envelope: sealed.encode(),
        })
        .await
        .unwrap();

    let notice = pump_until(&mut b_conn, &mut bob, |n| {
        matches!(n, ClientNotice::Undecryptable { .. })
    })
    .await;
    assert_eq!(
        notice,
        ClientNotice::Undecryptable {
            from: "alice".to_string(),
            error: CryptoError::AuthenticationFailure,
        }
    );
}

#[tokio::test]
async fn test_disconnect_announces_offline() {
    let (server, hub) = start_relay().await;
    let ((a_conn, _alice), (mut b_conn, mut bob)) = pair(&server.url()).await;

    drop(a_conn);
    let notice = pump_until(&mut b_conn, &mut bob, |n| {
        matches!(n, ClientNotice::PeerOffline(_))
    })
    .await;
    assert_eq!(notice, ClientNotice::PeerOffline("alice".to_string()));
    assert!(!bob.roster().contains("alice"));
    assert!(!hub.online().await.contains("alice"));
}

#[tokio::test]
async fn test_duplicate_identity_refused() {
    let (server, hub) = start_relay().await;
    let (_first, _alice) = join(&server.url(), "alice", "").await;

    let mut impostor = session("alice");
    let mut conn = ClientConnection::connect(&server.url()).await.unwrap();
    let err = conn.register(&mut impostor, "").await.unwrap_err();
    assert!(err.to_string().contains("already online"), "{err}");
    assert_eq!(hub.online().await.len(), 1);
}

#[tokio::test]
async fn test_credentials_survive_restart() {
    let tmp = tempfile::TempDir::new().unwrap();
    let path = tmp.path().join("credentials.json");

    {
        let (hub, task) = Hub::new(Box::new(FileCredentials::open(&path).unwrap())).spawn();
        let server = Server::bind("127.0.0.1:0", hub.clone()).await.unwrap();
        let (mut conn, mut alice) = join(&server.url(), "alice", "x1").await;

        conn.send(&alice.change_credential("x2").unwrap()).await.unwrap();
        let notice = pump_until(&mut conn, &mut alice, |n| {
            matches!(n, ClientNotice::CredentialChanged { .. })
        })
        .await;
        assert_eq!(notice, ClientNotice::CredentialChanged { ok: true });
        server.shutdown();
        hub.shutdown();
        // The stopped hub hands back its state; dropping it flushes the store.
        drop(task.await.unwrap());
    }

    let (hub, _task) = Hub::new(Box::new(FileCredentials::open(&path).unwrap())).spawn();
    let server = Server::bind("127.0.0.1:0", hub).await.unwrap();

    let mut conn = ClientConnection::connect(&server.url()).await.unwrap();
    let mut alice = session("alice");
    assert!(conn.register(&mut alice, "x1").await.is_err());
    assert!(conn.register(&mut alice, "x2").await.is_ok());
}

#[tokio::test]
async fn test_garbage_frames_do_not_close_session() {
    let (server, hub) = start_relay().await;
    let (mut ws, _) = tokio_tungstenite::connect_async(server.url()).await.unwrap();

    ws.send(Message::Text("{ not json".to_string())).await.unwrap();
    ws.send(Message::Text(r#"{"type":"shout"}"#.to_string())).await.unwrap();
    ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();
    ws.send(Message::Text(
        r#"{"type":"register","identity":"carol"}"#.to_string(),
    ))
    .await
    .unwrap();

    let mut events = Vec::new();
    tokio::time::timeout(TIMEOUT, async {
        while let Some(Ok(message)) = ws.next().await {
            if let Message::Text(text) = message {
                let event: ServerEvent = serde_json::from_str(&text).unwrap();
                let last = matches!(event, ServerEvent::RegisterResult { .. });
                events.push(event);
                if last {
                    break;
                }
            }
        }
    })
    .await
    .unwrap();

    assert_eq!(
        events,
        vec![
            ServerEvent::OnlineUsers { users: vec![] },
            ServerEvent::RegisterResult { ok: true },
        ]
    );
    assert!(hub.online().await.contains("carol"));
}

#[tokio::test]
async fn test_oversized_frame_dropped() {
    let (hub, _task) = Hub::new(Box::new(MemoryCredentials::new())).spawn();
    let server = Server::bind_with_limit("127.0.0.1:0", hub.clone(), 1024)
        .await
        .unwrap();
    let ((mut a_conn, alice), (mut b_conn, mut bob)) = pair(&server.url()).await;

    // A readable message, over the limit but under the socket's hard cap.
    a_conn
        .send(&alice.compose("bob", &"x".repeat(1500)).unwrap())
        .await
        .unwrap();
    a_conn
        .send(&ClientRequest::SendEncryptedMessage {
            recipient: "bob".to_string(),
            envelope: "small".to_string(),
        })
        .await
        .unwrap();

    let notice = pump_until(&mut b_conn, &mut bob, |n| {
        matches!(
            n,
            ClientNotice::Message { .. } | ClientNotice::Undecryptable { .. }
        )
    })
    .await;
    assert!(matches!(
        notice,
        ClientNotice::Undecryptable {
            error: CryptoError::MalformedEnvelope(_),
            ..
        }
    ));
    assert!(hub.online().await.contains("alice"));
}
