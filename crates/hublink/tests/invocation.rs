//! Blocking and fire-and-forget invocation scenarios.

use std::sync::Arc;
use std::time::Duration;

use hublink::{
    Connection, InboundMessage, InvocationError, MemPeer, MemTransport, OutboundMessage,
};
use serde_json::json;

fn connect() -> (Arc<Connection<MemTransport>>, MemPeer) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();

    let (transport, peer) = MemTransport::pair();
    let connection = Arc::new(Connection::new(transport));
    tokio::spawn(connection.clone().run());
    (connection, peer)
}

#[tokio::test]
async fn blocking_call_resolves_with_server_result() {
    let (connection, mut peer) = connect();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move {
            connection
                .invoke_blocking("Add", vec![json!(2), json!(3)], "int")
                .await
        }
    });

    let message = peer.next_outbound().await.expect("invocation message");
    let OutboundMessage::Invocation {
        invocation_id,
        target,
        arguments,
        non_blocking,
    } = message
    else {
        panic!("expected an invocation message, got {message:?}");
    };
    assert_eq!(invocation_id.as_str(), "1");
    assert_eq!(target, "Add");
    assert_eq!(arguments, vec![json!(2), json!(3)]);
    assert!(!non_blocking);

    peer.push(InboundMessage::Completion {
        invocation_id,
        result: Some(json!(5)),
        error: None,
    })
    .await;

    let result = call.await.unwrap().unwrap();
    assert_eq!(result, json!(5));
    assert!(connection.pending_invocations().is_empty());
}

#[tokio::test]
async fn remote_error_surfaces_to_the_caller() {
    let (connection, mut peer) = connect();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.invoke_blocking("Explode", vec![], "int").await }
    });

    let message = peer.next_outbound().await.expect("invocation message");
    let OutboundMessage::Invocation { invocation_id, .. } = message else {
        panic!("expected an invocation message, got {message:?}");
    };

    peer.push(InboundMessage::Completion {
        invocation_id,
        result: None,
        error: Some("boom".into()),
    })
    .await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, InvocationError::Remote(message) if message == "boom"));
    assert!(connection.pending_invocations().is_empty());
}

#[tokio::test]
async fn duplicate_completion_is_discarded() {
    let (connection, mut peer) = connect();

    let call = tokio::spawn({
        let connection = connection.clone();
        async move { connection.invoke_blocking("Add", vec![json!(1)], "int").await }
    });

    let message = peer.next_outbound().await.expect("invocation message");
    let OutboundMessage::Invocation { invocation_id, .. } = message else {
        panic!("expected an invocation message, got {message:?}");
    };

    peer.push(InboundMessage::Completion {
        invocation_id: invocation_id.clone(),
        result: Some(json!(1)),
        error: None,
    })
    .await;
    // Late duplicate for the same id: dropped as unknown, never redelivered.
    peer.push(InboundMessage::Completion {
        invocation_id,
        result: Some(json!(99)),
        error: None,
    })
    .await;

    assert_eq!(call.await.unwrap().unwrap(), json!(1));

    // The dispatch loop survived the duplicate and keeps routing new calls.
    let second = tokio::spawn({
        let connection = connection.clone();
        async move { connection.invoke_blocking("Add", vec![json!(2)], "int").await }
    });
    let message = peer.next_outbound().await.expect("second invocation");
    let OutboundMessage::Invocation { invocation_id, .. } = message else {
        panic!("expected an invocation message, got {message:?}");
    };
    assert_eq!(invocation_id.as_str(), "2");
    peer.push(InboundMessage::Completion {
        invocation_id,
        result: Some(json!(2)),
        error: None,
    })
    .await;
    assert_eq!(second.await.unwrap().unwrap(), json!(2));
}

#[tokio::test]
async fn non_blocking_invocation_is_never_registered() {
    let (connection, mut peer) = connect();

    connection
        .invoke("Notify", vec![json!("hello")])
        .await
        .unwrap();

    let message = peer.next_outbound().await.expect("invocation message");
    let OutboundMessage::Invocation {
        invocation_id,
        target,
        arguments,
        non_blocking,
    } = message
    else {
        panic!("expected an invocation message, got {message:?}");
    };
    assert_eq!(invocation_id.as_str(), "1");
    assert_eq!(target, "Notify");
    assert_eq!(arguments, vec![json!("hello")]);
    assert!(non_blocking);
    assert!(connection.pending_invocations().is_empty());
}

#[tokio::test]
async fn send_failure_resolves_immediately_without_leak() {
    let (transport, _peer) = MemTransport::pair();
    let connection = Arc::new(Connection::new(transport));
    connection.close();

    let err = connection
        .invoke_blocking("Add", vec![json!(1)], "int")
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::SendFailed(_)));
    assert!(connection.pending_invocations().is_empty());

    let err = connection.invoke("Notify", vec![]).await.unwrap_err();
    assert!(matches!(err, InvocationError::SendFailed(_)));
}

#[tokio::test]
async fn timeout_cancels_locally_and_notifies_the_server() {
    let (transport, mut peer) = MemTransport::pair();
    let connection = Arc::new(
        Connection::new(transport).with_call_timeout(Some(Duration::from_millis(50))),
    );
    tokio::spawn(connection.clone().run());

    let err = connection
        .invoke_blocking("Slow", vec![], "int")
        .await
        .unwrap_err();
    assert!(matches!(err, InvocationError::Cancelled));
    assert!(connection.pending_invocations().is_empty());

    let first = peer.next_outbound().await.expect("invocation message");
    assert!(matches!(first, OutboundMessage::Invocation { .. }));
    let second = peer.next_outbound().await.expect("cancellation notice");
    let OutboundMessage::CancelInvocation { invocation_id } = second else {
        panic!("expected a cancellation notice, got {second:?}");
    };
    assert_eq!(invocation_id.as_str(), "1");

    // A completion arriving after the timeout is dropped as unknown.
    peer.push(InboundMessage::Completion {
        invocation_id,
        result: Some(json!(1)),
        error: None,
    })
    .await;
    assert!(connection.pending_invocations().is_empty());
}
