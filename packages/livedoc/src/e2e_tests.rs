//! End-to-end tests: a real axum server on a loopback port, driven by
//! the real connection manager over a real WebSocket.

use std::sync::Arc;
use std::sync::atomic::AtomicUsize;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::sync::{RwLock, mpsc};

use doc_index::{DocumentProcessor, ExtractiveAnswerer, HashEmbedder, IndexConfig, VectorIndex};

use crate::client::{
    ClientEvent, ClientHandle, ConnectionManager, LinkState, RetryPolicy, ServerRegistry,
    SessionUpdate,
};
use crate::server::{self, AppState, UploadLimits};
use crate::ws::ClientMessage;

async fn spawn_server(tmp: &tempfile::TempDir) -> (u16, tokio::task::JoinHandle<()>) {
    let state = AppState {
        index: Arc::new(RwLock::new(
            VectorIndex::load_or_create(
                tmp.path().join("index"),
                Box::new(HashEmbedder::new(64)),
                IndexConfig {
                    max_results: 5,
                    similarity_threshold: 0.0,
                },
            )
            .unwrap(),
        )),
        processor: Arc::new(
            DocumentProcessor::new(tmp.path().join("uploads"), 50, 10).unwrap(),
        ),
        answerer: Arc::new(ExtractiveAnswerer::without_delay()),
        server_port: 0,
        active_clients: Arc::new(AtomicUsize::new(0)),
        limits: UploadLimits {
            max_file_size_bytes: 1024 * 1024,
            allowed_extensions: vec!["txt".to_string()],
        },
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let state = AppState {
        server_port: port,
        ..state
    };
    let app = server::router(state);
    let task = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (port, task)
}

fn start_client(
    endpoints: Vec<(String, u16)>,
    max_attempts: u32,
) -> (ClientHandle, mpsc::Receiver<ClientEvent>) {
    let registry = ServerRegistry::new(endpoints);
    let (events_tx, events_rx) = mpsc::channel(1024);
    let (manager, handle) = ConnectionManager::new(
        registry,
        RetryPolicy {
            max_attempts,
            backoff: Duration::from_millis(10),
        },
        events_tx,
    );
    tokio::spawn(manager.run());
    (handle, events_rx)
}

async fn next_event(events: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("event channel closed")
}

async fn wait_connected(events: &mut mpsc::Receiver<ClientEvent>) {
    loop {
        if let ClientEvent::State(LinkState::Connected) = next_event(events).await {
            return;
        }
    }
}

#[tokio::test]
async fn full_pipeline_over_a_real_socket() {
    let tmp = tempfile::tempdir().unwrap();
    let (port, _server) = spawn_server(&tmp).await;
    let (handle, mut events) = start_client(vec![("127.0.0.1".to_string(), port)], 3);

    wait_connected(&mut events).await;

    // Upload runs to its terminal envelope.
    handle
        .send(ClientMessage::FileUpload {
            filename: "notes.txt".to_string(),
            file_data: BASE64.encode(b"tokio is an asynchronous runtime for the rust language"),
        })
        .unwrap();
    let chunks_added = loop {
        match next_event(&mut events).await {
            ClientEvent::Update(SessionUpdate::Indexed { chunks_added }) => break chunks_added,
            ClientEvent::Update(SessionUpdate::Failed { message, .. }) => {
                panic!("upload failed: {message}")
            }
            _ => {}
        }
    };
    assert_eq!(chunks_added, 1);

    // Search finds the uploaded content.
    handle
        .send(ClientMessage::SearchQuery {
            query: "rust runtime".to_string(),
        })
        .unwrap();
    loop {
        if let ClientEvent::Update(SessionUpdate::SearchResults { results, query, .. }) =
            next_event(&mut events).await
        {
            assert_eq!(query, "rust runtime");
            assert!(!results.is_empty());
            assert_eq!(results[0].metadata.filename, "notes.txt");
            break;
        }
    }

    // The streamed answer reassembles exactly.
    handle
        .send(ClientMessage::AskQuestion {
            question: "what is tokio".to_string(),
        })
        .unwrap();
    let mut assembled = String::new();
    loop {
        match next_event(&mut events).await {
            ClientEvent::Update(SessionUpdate::AnswerDelta { chunk, .. }) => {
                assembled.push_str(&chunk);
            }
            ClientEvent::Update(SessionUpdate::AnswerComplete {
                response,
                context_used,
                ..
            }) => {
                assert_eq!(assembled, response);
                assert!(context_used);
                break;
            }
            ClientEvent::Update(SessionUpdate::Failed { message, .. }) => {
                panic!("question failed: {message}")
            }
            _ => {}
        }
    }

    handle.shutdown();
}

#[tokio::test]
async fn client_fails_over_to_the_secondary() {
    let tmp = tempfile::tempdir().unwrap();
    let (port, _server) = spawn_server(&tmp).await;

    // Primary refuses connections; the secondary is live.
    let (handle, mut events) = start_client(
        vec![
            ("127.0.0.1".to_string(), 1),
            ("127.0.0.1".to_string(), port),
        ],
        5,
    );

    let mut connecting = 0;
    loop {
        match next_event(&mut events).await {
            ClientEvent::State(LinkState::Connecting) => connecting += 1,
            ClientEvent::State(LinkState::Connected) => break,
            ClientEvent::State(LinkState::Failed) => panic!("gave up instead of failing over"),
            _ => {}
        }
    }
    assert!(connecting >= 2, "expected a failed dial before the live one");

    // The auto-issued stats request completes on the secondary.
    loop {
        if let ClientEvent::Update(SessionUpdate::Stats {
            total_documents,
            server_port,
            ..
        }) = next_event(&mut events).await
        {
            assert_eq!(total_documents, 0);
            assert_eq!(server_port, port);
            break;
        }
    }

    handle.shutdown();
}

#[tokio::test]
async fn lost_server_ends_in_failed_after_ceiling() {
    // A server that completes the handshake, hangs up, and goes away.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((stream, _)) = listener.accept().await {
            if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                drop(ws);
            }
        }
        // Listener dropped here; later dials are refused.
    });

    let (handle, mut events) = start_client(vec![("127.0.0.1".to_string(), port)], 2);
    wait_connected(&mut events).await;

    let mut saw_disconnected = false;
    loop {
        match next_event(&mut events).await {
            ClientEvent::State(LinkState::Disconnected { .. }) => saw_disconnected = true,
            ClientEvent::State(LinkState::Failed) => break,
            _ => {}
        }
    }
    assert!(saw_disconnected);
    assert_eq!(handle.state(), LinkState::Failed);
}
