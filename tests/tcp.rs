//! Peers over TCP loopback.

use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use hubwire::{Context, DeliveryMode, Peer, Schema, SchemaBuilder, TcpConfig, TcpTransport};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Position {
    player: String,
    coords: Vec<f32>,
}

async fn recv<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for message")
        .expect("channel closed")
}

async fn server(schema: Schema) -> Peer {
    let config = TcpConfig::server("127.0.0.1:0".parse().unwrap());
    let peer = Peer::builder(schema).build(TcpTransport::new(config));
    peer.start().await.unwrap();
    peer
}

async fn client(schema: Schema) -> Peer {
    let peer = Peer::builder(schema).build(TcpTransport::new(TcpConfig::client()));
    peer.start().await.unwrap();
    peer
}

#[tokio::test]
async fn test_round_trip_over_tcp() {
    let server = server(
        SchemaBuilder::new()
            .hub("game", |game| {
                game.async_route_fn_with("move", |ctx: Context, pos: Position| async move {
                    ctx.send("game/moved", &pos).await
                })
            })
            .build()
            .unwrap(),
    )
    .await;
    let addr = server.local_addr().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = client(
        SchemaBuilder::new()
            .route_fn_with("game/moved", move |_ctx, pos: Position| {
                let _ = tx.send(pos);
                Ok(())
            })
            .build()
            .unwrap(),
    )
    .await;

    let ctx = client.connect(addr, Bytes::new()).await.unwrap();
    let pos = Position {
        player: "p1".to_string(),
        coords: vec![1.5, -2.0, 0.25],
    };

    for _ in 0..3 {
        ctx.send("game/move", &pos).await.unwrap();
    }
    for _ in 0..3 {
        assert_eq!(recv(&mut rx).await, pos);
    }
}

#[tokio::test]
async fn test_disconnect_fires_lifecycle_route() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let connects = tx.clone();
    let server = server(
        SchemaBuilder::new()
            .on_connect_fn(move |_ctx| {
                let _ = connects.send("connect");
                Ok(())
            })
            .on_disconnect_fn(move |_ctx| {
                let _ = tx.send("disconnect");
                Ok(())
            })
            .build()
            .unwrap(),
    )
    .await;
    let addr = server.local_addr().unwrap();

    let client = client(Schema::default()).await;
    client.connect(addr, Bytes::new()).await.unwrap();
    assert_eq!(recv(&mut rx).await, "connect");
    assert_eq!(server.connections().len(), 1);

    client.stop("bye");
    assert_eq!(recv(&mut rx).await, "disconnect");
}

#[tokio::test]
async fn test_unreliable_delivery() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let server = server(
        SchemaBuilder::new()
            .route_fn_with("tick", move |_ctx, n: u64| {
                let _ = tx.send(n);
                Ok(())
            })
            .build()
            .unwrap(),
    )
    .await;
    let addr = server.local_addr().unwrap();

    let client = client(Schema::default()).await;
    let ctx = client
        .connect(addr, Bytes::new())
        .await
        .unwrap()
        .with_delivery(DeliveryMode::Unreliable);

    ctx.send("tick", &1u64).await.unwrap();
    assert_eq!(recv(&mut rx).await, 1);
}
