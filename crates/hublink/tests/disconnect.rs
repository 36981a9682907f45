//! Disconnect and drain scenarios.

use std::sync::Arc;

use hublink::{
    Connection, InboundMessage, InvocationError, MemPeer, MemTransport, OutboundMessage,
};
use serde_json::json;

fn connect() -> (Arc<Connection<MemTransport>>, MemPeer) {
    let (transport, peer) = MemTransport::pair();
    let connection = Arc::new(Connection::new(transport));
    tokio::spawn(connection.clone().run());
    (connection, peer)
}

#[tokio::test]
async fn disconnect_resolves_pending_blocking_call() {
    let (connection, mut peer) = connect();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.invoke_blocking("Add", vec![json!(1)], "int").await }
    });

    let message = peer.next_outbound().await.expect("invocation message");
    assert!(matches!(message, OutboundMessage::Invocation { .. }));

    peer.close();

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, InvocationError::ConnectionLost));
    assert!(connection.pending_invocations().is_empty());
}

#[tokio::test]
async fn disconnect_closes_streams_with_connection_lost() {
    let (connection, mut peer) = connect();

    let mut call = connection
        .invoke_streaming("Counter", vec![json!(10)], "int")
        .await
        .unwrap();

    let message = peer.next_outbound().await.expect("stream invocation");
    let OutboundMessage::StreamInvocation { invocation_id, .. } = message else {
        panic!("expected a stream invocation, got {message:?}");
    };

    peer.push(InboundMessage::StreamItem {
        invocation_id,
        item: json!(1),
    })
    .await;
    peer.close();

    assert_eq!(call.next_item().await.unwrap().unwrap(), json!(1));
    let err = call.next_item().await.expect("terminal error").unwrap_err();
    assert!(matches!(err, InvocationError::ConnectionLost));
    assert!(call.next_item().await.is_none());
    assert!(connection.pending_invocations().is_empty());
}

#[tokio::test]
async fn close_message_drains_pending_calls() {
    let (connection, mut peer) = connect();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.invoke_blocking("Add", vec![json!(1)], "int").await }
    });

    let message = peer.next_outbound().await.expect("invocation message");
    assert!(matches!(message, OutboundMessage::Invocation { .. }));

    peer.push(InboundMessage::Close {
        error: Some("server going away".into()),
    })
    .await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, InvocationError::ConnectionLost));
    assert!(connection.pending_invocations().is_empty());
}

#[tokio::test]
async fn local_close_drains_pending_calls() {
    let (connection, mut peer) = connect();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.invoke_blocking("Add", vec![json!(1)], "int").await }
    });

    let message = peer.next_outbound().await.expect("invocation message");
    assert!(matches!(message, OutboundMessage::Invocation { .. }));
    assert!(connection.is_connected());

    connection.close();
    assert!(!connection.is_connected());

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, InvocationError::ConnectionLost));
    assert!(connection.pending_invocations().is_empty());
}

#[tokio::test]
async fn calls_after_disconnect_are_refused() {
    let (connection, mut peer) = connect();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.invoke_blocking("Add", vec![json!(1)], "int").await }
    });
    let _ = peer.next_outbound().await.expect("invocation message");
    peer.close();
    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, InvocationError::ConnectionLost));

    // The registry is closed by the drain: nothing registered afterwards can
    // be left unresolved.
    let err = connection
        .invoke_blocking("Add", vec![json!(2)], "int")
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::ConnectionLost));
    assert!(connection.pending_invocations().is_empty());
}
