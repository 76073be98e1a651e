//! Subscription registry behaviour as seen through a `StreamClient`.

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{MockConnector, client, config, next_socket, refused, wait_for_state};
use futures::StreamExt;
use serde_json::json;
use venue_link::{
    ReconnectConfig, TransportError,
    stream::{ConnectionState, Frame, SubscriptionStatus},
};

#[tokio::test(start_paused = true)]
async fn test_cancel_active_sends_unsubscribe() {
    let (connector, mut opened) = MockConnector::new();
    let client = client(config(), connector);

    client.connect().await.unwrap();
    let mut socket = next_socket(&mut opened).await;

    let mut sub = client
        .subscribe("book", json!({"symbol": "BTC", "depth": 10}))
        .await
        .unwrap();
    assert_eq!(
        socket.next_sent_json().await,
        json!({"op": "subscribe", "channel": "book", "params": {"depth": 10, "symbol": "BTC"}})
    );

    sub.cancel();
    sub.cancel();
    assert!(sub.is_canceled());
    assert!(sub.recv().await.is_none());

    assert_eq!(
        socket.next_sent_json().await,
        json!({"op": "unsubscribe", "channel": "book", "params": {"depth": 10, "symbol": "BTC"}})
    );
    assert_eq!(client.subscription_count().await, 0);
    assert!(socket.sent.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_pending_sends_nothing() {
    let (connector, mut opened) = MockConnector::new();
    let connector = connector.then(refused());
    let client = client(
        config().reconnect(ReconnectConfig::new().initial_delay(Duration::from_secs(1)).jitter(0.0)),
        connector,
    );

    let connecting = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };
    wait_for_state(&client, ConnectionState::Reconnecting).await;

    let sub = client.subscribe("trades", json!({"symbol": "ETH"})).await.unwrap();
    let infos = client.subscriptions().await;
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].status, SubscriptionStatus::Pending);
    drop(sub);

    connecting.await.unwrap().unwrap();
    let mut socket = next_socket(&mut opened).await;
    assert_eq!(client.subscription_count().await, 0);
    assert!(socket.sent.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_subscribe_before_connect_is_sent_on_open() {
    let (connector, mut opened) = MockConnector::new();
    let client = client(config(), connector);

    let _sub = client.subscribe("ticker", json!(null)).await.unwrap();
    assert_eq!(
        client.subscriptions().await[0].status,
        SubscriptionStatus::Pending
    );

    client.connect().await.unwrap();
    let mut socket = next_socket(&mut opened).await;
    assert_eq!(
        socket.next_sent_json().await,
        json!({"op": "subscribe", "channel": "ticker"})
    );
    assert_eq!(
        client.subscriptions().await[0].status,
        SubscriptionStatus::Active
    );
}

#[tokio::test(start_paused = true)]
async fn test_identical_subscriptions_share_one_entry() {
    let (connector, mut opened) = MockConnector::new();
    let client = client(config(), connector);

    client.connect().await.unwrap();
    let mut socket = next_socket(&mut opened).await;

    let mut a = client.subscribe("trades", json!({"symbol": "BTC"})).await.unwrap();
    let mut b = client.subscribe("trades", json!({"symbol": "BTC"})).await.unwrap();
    socket.next_sent().await;
    assert_eq!(a.id(), b.id());

    let infos = client.subscriptions().await;
    assert_eq!(infos.len(), 1);
    assert_eq!(infos[0].consumers, 2);
    assert!(socket.sent.try_recv().is_err());

    socket.push(r#"{"channel":"trades","params":{"symbol":"BTC"},"px":1}"#);
    assert!(a.recv().await.is_some());
    assert!(b.recv().await.is_some());

    // The venue only hears about the last consumer leaving.
    a.cancel();
    assert_eq!(client.subscriptions().await[0].consumers, 1);
    b.cancel();
    assert_eq!(
        socket.next_sent_json().await["op"],
        json!("unsubscribe")
    );
}

#[tokio::test(start_paused = true)]
async fn test_messages_reach_only_their_subscription_in_order() {
    let (connector, mut opened) = MockConnector::new();
    let client = client(config().max_frame_size(128), connector);

    client.connect().await.unwrap();
    let socket = next_socket(&mut opened).await;
    let btc = client.subscribe("trades", json!({"symbol": "BTC"})).await.unwrap();
    let mut eth = client.subscribe("trades", json!({"symbol": "ETH"})).await.unwrap();

    socket.push("not json at all");
    socket.push(r#"{"channel":"unknown","data":1}"#);
    socket.push(&format!(
        r#"{{"channel":"trades","params":{{"symbol":"BTC"}},"pad":"{}"}}"#,
        "x".repeat(256)
    ));
    for n in 0..3 {
        socket.push(&format!(
            r#"{{"channel":"trades","params":{{"symbol":"BTC"}},"n":{n}}}"#
        ));
    }
    socket.push_frame(Frame::binary(Bytes::from_static(
        br#"{"channel":"trades","params":{"symbol":"ETH"},"n":9}"#,
    )));

    let frames: Vec<_> = btc.into_stream().take(3).collect().await;
    assert_eq!(
        frames,
        (0..3)
            .map(|n| Frame::text(format!(
                r#"{{"channel":"trades","params":{{"symbol":"BTC"}},"n":{n}}}"#
            )))
            .collect::<Vec<_>>()
    );
    assert!(!eth.recv().await.unwrap().is_empty());
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn test_venue_pings_are_answered() {
    let (connector, mut opened) = MockConnector::new();
    let client = client(config(), connector);

    client.connect().await.unwrap();
    let mut socket = next_socket(&mut opened).await;

    socket.push_frame(Frame::Ping(Bytes::from_static(b"hb-1")));
    assert_eq!(
        socket.next_sent().await,
        Frame::Pong(Bytes::from_static(b"hb-1"))
    );

    socket.push(r#"{"op":"ping","ts":42}"#);
    assert_eq!(socket.next_sent_json().await, json!({"op": "pong"}));
}

#[tokio::test(start_paused = true)]
async fn test_send_requires_connected() {
    let (connector, mut opened) = MockConnector::new();
    let client = client(config(), connector);

    assert!(matches!(
        client.send(Frame::text("early")).await,
        Err(TransportError::NotConnected)
    ));

    client.connect().await.unwrap();
    let mut socket = next_socket(&mut opened).await;
    client.send(Frame::text(r#"{"op":"login"}"#)).await.unwrap();
    assert_eq!(socket.next_sent().await, Frame::text(r#"{"op":"login"}"#));

    client.disconnect().await.unwrap();
    assert!(matches!(
        client.send(Frame::text("late")).await,
        Err(TransportError::NotConnected)
    ));
}
