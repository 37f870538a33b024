//! Request/response correlation between live nodes.
//!
//! Requests travel over the requester's session; replies come back over the
//! responder's own session and are matched in the requester's registry.

mod common;

use common::*;
use peerlink_wire::{LocalNode, RemoteSessionManager, WireConfig, WireError};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Round trips
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ping_pong_between_two_nodes() {
    let a = start_node(free_port(), "echo", Arc::new(Echo)).await;
    let b_port = free_port();
    let _b = start_node(b_port, "echo", Arc::new(Echo)).await;

    let session = within(a.new_session(&remote(b_port))).await.unwrap();
    let handle = session.request("ping").unwrap();
    let key = handle.key().to_string();

    assert_eq!(within(handle.wait()).await.unwrap(), b"pong");
    assert!(!a.listeners().contains(&key));
}

#[tokio::test]
async fn test_responder_reuses_its_session_for_replies() {
    let a_port = free_port();
    let a = start_node(a_port, "echo", Arc::new(Echo)).await;
    let b_port = free_port();
    let b = start_node(b_port, "echo", Arc::new(Echo)).await;

    let session = within(a.new_session(&remote(b_port))).await.unwrap();
    for i in 0..5 {
        let payload = format!("msg-{i}");
        let reply = within(session.request(payload.clone()).unwrap().wait()).await.unwrap();
        assert_eq!(reply, format!("re:{payload}").into_bytes());
    }

    // B answered over one pooled session back to A.
    assert_eq!(b.session_count(), 1);
    assert!(b.session(&remote(a_port)).is_some());
}

#[tokio::test]
async fn test_handler_selected_by_descriptor() {
    let b_port = free_port();
    let b_local = LocalNode::new(HOST, b_port)
        .with_default_handler("echo", Arc::new(Echo))
        .with_handler("upper", Arc::new(Upper));
    let _b = RemoteSessionManager::start(b_local, WireConfig::default())
        .await
        .unwrap();

    // A advertises "upper", so B runs its Upper handler for A's requests.
    let a_local = LocalNode::new(HOST, free_port()).with_default_handler("upper", Arc::new(Echo));
    let a = RemoteSessionManager::start(a_local, WireConfig::default())
        .await
        .unwrap();

    let session = within(a.new_session(&remote(b_port))).await.unwrap();
    let reply = within(session.request("shout").unwrap().wait()).await.unwrap();
    assert_eq!(reply, b"SHOUT");
}

#[tokio::test]
async fn test_manual_reply_mode() {
    let a = start_node(free_port(), "echo", Arc::new(Echo)).await;
    let b_port = free_port();
    let _b = start_node(b_port, "manual", Arc::new(ManualEcho)).await;

    let session = within(a.new_session(&remote(b_port))).await.unwrap();
    let recorder = Arc::new(Recorder::default());
    let key = session.request_with_listener("hi", recorder.clone()).unwrap();

    eventually(|| recorder.count() == 1).await;
    // The returned payload is not sent in manual mode.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.replies(), vec![(key.clone(), b"manual:hi".to_vec())]);
    assert!(session.remove_listener(&key));
}

// ---------------------------------------------------------------------------
// Caller-managed listeners
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_self_session_listener_sees_reply_once() {
    let port = free_port();
    let silent = Arc::new(Silent::default());
    let node = start_node(port, "silent", silent.clone()).await;
    let session = within(node.new_session(&remote(port))).await.unwrap();

    let recorder = Arc::new(Recorder::default());
    let key = session.request_with_listener("ping", recorder.clone()).unwrap();
    session.reply(&key, "pong").unwrap();

    eventually(|| recorder.count() == 1).await;
    eventually(|| silent.seen.lock().unwrap().len() == 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.replies(), vec![(key.clone(), b"pong".to_vec())]);

    assert!(node.listeners().contains(&key));
    assert!(session.remove_listener(&key));
    assert!(!node.listeners().contains(&key));
}

#[tokio::test]
async fn test_listener_sees_only_its_own_replies() {
    let port = free_port();
    let node = start_node(port, "silent", Arc::new(Silent::default())).await;
    let session = within(node.new_session(&remote(port))).await.unwrap();

    let first = Arc::new(Recorder::default());
    let second = Arc::new(Recorder::default());
    let first_key = session.request_with_listener("one", first.clone()).unwrap();
    let second_key = session.request_with_listener("two", second.clone()).unwrap();
    assert_ne!(first_key, second_key);

    session.reply(&second_key, "for-two").unwrap();
    eventually(|| second.count() == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(first.count(), 0);
    assert_eq!(second.replies()[0].1, b"for-two");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_identical_requests_get_distinct_keys() {
    let a = start_node(free_port(), "echo", Arc::new(Echo)).await;
    let b_port = free_port();
    let silent = Arc::new(Silent::default());
    let _b = start_node(b_port, "silent", silent.clone()).await;

    let session = within(a.new_session(&remote(b_port))).await.unwrap();
    let handles: Vec<_> = (0..10_000)
        .map(|_| session.request("same").unwrap())
        .collect();

    let keys: HashSet<&str> = handles.iter().map(|handle| handle.key()).collect();
    assert_eq!(keys.len(), 10_000);
    assert_eq!(a.listeners().len(), 10_000);
    eventually(|| silent.seen.lock().unwrap().len() == 10_000).await;
}

// ---------------------------------------------------------------------------
// Races and teardown
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_immediate_replies_are_never_lost() {
    let a = start_node(free_port(), "echo", Arc::new(Echo)).await;
    let b_port = free_port();
    let _b = start_node(b_port, "echo", Arc::new(Echo)).await;
    let session = within(a.new_session(&remote(b_port))).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..200 {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            let payload = format!("req-{i}");
            let handle = session.request(payload.clone()).unwrap();
            let key = handle.key().to_string();
            let reply = handle.wait().await.unwrap();
            assert_eq!(reply, format!("re:{payload}").into_bytes());
            key
        }));
    }

    let mut keys = HashSet::new();
    for task in tasks {
        keys.insert(within(task).await.unwrap());
    }
    assert_eq!(keys.len(), 200);
    assert!(a.listeners().is_empty());
}

#[tokio::test]
async fn test_shutdown_drops_pending_replies() {
    let a = start_node(free_port(), "echo", Arc::new(Echo)).await;
    let b_port = free_port();
    let _b = start_node(b_port, "silent", Arc::new(Silent::default())).await;

    let session = within(a.new_session(&remote(b_port))).await.unwrap();
    let handle = session.request("ping").unwrap();
    let key = handle.key().to_string();
    a.shutdown();

    match within(handle.wait()).await {
        Err(WireError::ReplyDropped(dropped)) => assert_eq!(dropped, key),
        other => panic!("Expected ReplyDropped, got {other:?}"),
    }
    assert!(matches!(session.request("again"), Err(WireError::ConnectionClosed)));
}
