//! Periodic market data broadcasts.

use std::time::Duration;
use tradesim_client::{MarketData, ServerMessage, TradeClient};
use tradesim_tests::{TestServer, test_config};

async fn next_snapshot(client: &mut TradeClient) -> MarketData {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        match client.recv_timeout(remaining).await.expect("recv") {
            Some(ServerMessage::MarketData(snapshot)) => return snapshot,
            Some(_) => continue,
            None => panic!("no market data within deadline"),
        }
    }
}

#[tokio::test]
async fn test_snapshot_arrives_without_a_request() {
    let server = TestServer::start(test_config(Some(100)))
        .await
        .expect("server");
    let mut client = server.client().await.expect("connect");

    let snapshot = next_snapshot(&mut client).await;
    assert_eq!(snapshot.event, "market_data");
    assert!(snapshot.timestamp > 0);

    let book = snapshot.data.get("A").expect("default symbol");
    for levels in [&book.buy, &book.sell].into_iter().flatten() {
        assert!(!levels.is_empty() && levels.len() <= 5);
        assert!(levels.iter().all(|l| l.volume >= 1));
    }
    if let Some(bids) = &book.buy {
        assert!(bids.windows(2).all(|w| w[0].price > w[1].price));
        assert!(bids.iter().all(|l| l.price >= 1));
    }
    if let Some(asks) = &book.sell {
        assert!(asks.windows(2).all(|w| w[0].price < w[1].price));
    }
    if let (Some(bid), Some(ask)) = (book.best_bid(), book.best_ask()) {
        assert!(bid.price < ask.price);
    }

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_snapshots_fan_out_to_every_client() {
    let server = TestServer::start(test_config(Some(100)))
        .await
        .expect("server");
    let mut first = server.client().await.expect("connect first");
    let mut second = server.client().await.expect("connect second");

    let a = next_snapshot(&mut first).await;
    let b = next_snapshot(&mut second).await;
    assert!(a.data.contains_key("A"));
    assert!(b.data.contains_key("A"));

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_timestamps_do_not_go_backwards() {
    let server = TestServer::start(test_config(Some(50)))
        .await
        .expect("server");
    let mut client = server.client().await.expect("connect");

    let mut last = 0;
    for _ in 0..4 {
        let snapshot = next_snapshot(&mut client).await;
        assert!(snapshot.timestamp >= last);
        last = snapshot.timestamp;
    }

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_responses_interleave_with_broadcasts() {
    let server = TestServer::start(test_config(Some(50)))
        .await
        .expect("server");
    let mut client = server.client().await.expect("connect");

    let _ = next_snapshot(&mut client).await;
    client.login("a", "b").await.expect("send");

    let response = client
        .recv_response(Duration::from_secs(2))
        .await
        .expect("recv");
    assert!(matches!(response, Some(ServerMessage::Login(r)) if r.is_success()));

    server.shutdown().await.expect("shutdown");
}

#[tokio::test]
async fn test_disabled_simulation_sends_nothing() {
    let server = TestServer::start(test_config(None)).await.expect("server");
    let mut client = server.client().await.expect("connect");

    let message = client
        .recv_timeout(Duration::from_millis(400))
        .await
        .expect("recv");
    assert!(message.is_none());

    server.shutdown().await.expect("shutdown");
}
