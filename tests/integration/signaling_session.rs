//! End-to-end signaling sessions against an in-process relay.
//!
//! Validates the relay's delivery rules over real WebSocket connections:
//! - `join-room` announces the joiner to existing room members only
//! - offers, answers, ICE candidates and transcripts reach only their target
//! - mic status and departures reach every other session, across rooms
//! - unknown targets and junk frames produce no output anywhere
//! - abrupt socket loss is handled like a clean close
//! - concurrent joins into one room each see a consistent member set

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use huddle_proto::codec;
use huddle_proto::id::{ConnectionId, RoomId};
use huddle_proto::signal::{ClientEvent, ServerEvent};
use huddle_relay::relay::{self, RelayState};
use serde_json::json;
use tokio::sync::Barrier;
use tokio_tungstenite::tungstenite::Message;

type Client =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Start the relay in-process, returning its state and a ws:// URL.
async fn start_relay() -> (Arc<RelayState>, String, tokio::task::JoinHandle<()>) {
    let state = Arc::new(RelayState::new());
    let (addr, handle) = relay::start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start relay server");
    (state, format!("ws://{addr}/ws"), handle)
}

/// Connect a client and read its welcome frame.
async fn connect(url: &str) -> (Client, ConnectionId) {
    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    match recv(&mut ws).await {
        ServerEvent::Welcome { connection_id } => (ws, connection_id),
        other => panic!("expected Welcome, got {other:?}"),
    }
}

async fn send(ws: &mut Client, event: &ClientEvent) {
    let text = codec::encode(event).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn recv(ws: &mut Client) -> ServerEvent {
    let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("recv timed out")
        .unwrap()
        .unwrap();
    codec::decode(msg.to_text().unwrap()).unwrap()
}

/// Assert that nothing arrives on `ws` for a short while.
async fn assert_silent(ws: &mut Client) {
    let result = tokio::time::timeout(Duration::from_millis(150), ws.next()).await;
    assert!(result.is_err(), "expected no frame, got {result:?}");
}

/// Join `room` and wait until the relay has applied the membership change.
async fn join(state: &RelayState, ws: &mut Client, id: &ConnectionId, room: &str, user: &str) {
    send(
        ws,
        &ClientEvent::JoinRoom {
            room_id: RoomId::from(room),
            user_id: user.to_string(),
        },
    )
    .await;
    let room = RoomId::from(room);
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.room_of(id).as_ref() != Some(&room) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("join was never applied");
}

#[tokio::test]
async fn join_announces_to_existing_members_only() {
    let (state, url, _handle) = start_relay().await;
    let (mut ws_a, a) = connect(&url).await;
    let (mut ws_b, b) = connect(&url).await;
    let (mut ws_c, c) = connect(&url).await;

    join(&state, &mut ws_a, &a, "r1", "user-a").await;
    join(&state, &mut ws_c, &c, "r2", "user-c").await;
    join(&state, &mut ws_b, &b, "r1", "user-b").await;

    assert_eq!(
        recv(&mut ws_a).await,
        ServerEvent::UserConnected("user-b".into())
    );
    assert_silent(&mut ws_b).await;
    assert_silent(&mut ws_c).await;
}

#[tokio::test]
async fn offer_then_disconnect_scenario() {
    let (state, url, _handle) = start_relay().await;
    let (mut ws_a, a) = connect(&url).await;
    let (mut ws_b, b) = connect(&url).await;

    join(&state, &mut ws_a, &a, "r1", "user-a").await;
    join(&state, &mut ws_b, &b, "r1", "user-b").await;
    let _ = recv(&mut ws_a).await; // user-connected(user-b)

    send(
        &mut ws_a,
        &ClientEvent::Offer {
            offer: json!("X"),
            target_id: b.clone(),
        },
    )
    .await;
    assert_eq!(
        recv(&mut ws_b).await,
        ServerEvent::Offer {
            offer: json!("X"),
            sender_id: a.clone(),
        }
    );

    ws_a.close(None).await.unwrap();
    assert_eq!(
        recv(&mut ws_b).await,
        ServerEvent::UserDisconnected(a.clone())
    );
    assert_eq!(state.members_of(&RoomId::from("r1")), HashSet::from([b]));
    assert!(state.room_of(&a).is_none());
}

#[tokio::test]
async fn mic_status_reaches_every_other_session() {
    let (state, url, _handle) = start_relay().await;
    let (mut ws_a, a) = connect(&url).await;
    let (mut ws_b, b) = connect(&url).await;
    let (mut ws_c, c) = connect(&url).await;

    join(&state, &mut ws_a, &a, "r1", "user-a").await;
    join(&state, &mut ws_b, &b, "r1", "user-b").await;
    let _ = recv(&mut ws_a).await;
    join(&state, &mut ws_c, &c, "r2", "user-c").await;

    send(
        &mut ws_a,
        &ClientEvent::MicStatus {
            mic_on: true,
            sender_id: a.to_string(),
            target_id: Some(b.clone()),
        },
    )
    .await;

    let expected = ServerEvent::MicStatus {
        mic_on: true,
        sender_id: a.to_string(),
    };
    assert_eq!(recv(&mut ws_b).await, expected);
    assert_eq!(recv(&mut ws_c).await, expected);
    assert_silent(&mut ws_a).await;
}

#[tokio::test]
async fn unknown_target_produces_nothing() {
    let (_state, url, _handle) = start_relay().await;
    let (mut ws_d, d) = connect(&url).await;
    let (mut ws_e, e) = connect(&url).await;

    send(
        &mut ws_d,
        &ClientEvent::Offer {
            offer: json!("Y"),
            target_id: ConnectionId::from("unknown-id"),
        },
    )
    .await;
    assert_silent(&mut ws_d).await;
    assert_silent(&mut ws_e).await;

    // D is still a working connection.
    send(
        &mut ws_d,
        &ClientEvent::IceCandidate {
            candidate: json!({ "candidate": "candidate:0 1 UDP 1 10.0.0.1 9 typ host" }),
            target_id: e,
        },
    )
    .await;
    assert_eq!(
        recv(&mut ws_e).await,
        ServerEvent::IceCandidate {
            candidate: json!({ "candidate": "candidate:0 1 UDP 1 10.0.0.1 9 typ host" }),
            sender_id: d,
        }
    );
}

#[tokio::test]
async fn targeted_messages_ignore_room_boundaries() {
    let (state, url, _handle) = start_relay().await;
    let (mut ws_a, a) = connect(&url).await;
    let (mut ws_b, b) = connect(&url).await;

    join(&state, &mut ws_a, &a, "r1", "user-a").await;
    join(&state, &mut ws_b, &b, "r2", "user-b").await;

    send(
        &mut ws_a,
        &ClientEvent::TranscriptionMessage {
            transcript: json!("bonjour"),
            translation: json!("hello"),
            target_id: b,
        },
    )
    .await;
    assert_eq!(
        recv(&mut ws_b).await,
        ServerEvent::TranscriptionMessage {
            transcript: json!("bonjour"),
            translation: json!("hello"),
        }
    );
}

#[tokio::test]
async fn messages_from_one_connection_stay_ordered() {
    let (_state, url, _handle) = start_relay().await;
    let (mut ws_a, _a) = connect(&url).await;
    let (mut ws_b, b) = connect(&url).await;

    for i in 0..50 {
        send(
            &mut ws_a,
            &ClientEvent::IceCandidate {
                candidate: json!(i),
                target_id: b.clone(),
            },
        )
        .await;
    }

    for i in 0..50 {
        match recv(&mut ws_b).await {
            ServerEvent::IceCandidate { candidate, .. } => {
                assert_eq!(candidate, json!(i), "order violated at candidate {i}");
            }
            other => panic!("expected IceCandidate, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn junk_frames_do_not_break_the_connection() {
    let (_state, url, _handle) = start_relay().await;
    let (mut ws_a, _a) = connect(&url).await;
    let (mut ws_b, b) = connect(&url).await;

    ws_a.send(Message::Text("hello?".into())).await.unwrap();
    ws_a.send(Message::Binary(vec![0xde, 0xad].into()))
        .await
        .unwrap();
    ws_a.send(Message::Text(r#"{"event":"offer","data":{"targetId":42}}"#.into()))
        .await
        .unwrap();

    send(
        &mut ws_a,
        &ClientEvent::Answer {
            answer: json!("Z"),
            target_id: b,
        },
    )
    .await;
    assert!(matches!(recv(&mut ws_b).await, ServerEvent::Answer { .. }));
}

#[tokio::test]
async fn room_is_pruned_after_last_member_leaves() {
    let (state, url, _handle) = start_relay().await;
    let (mut ws_a, a) = connect(&url).await;
    let (mut ws_b, _b) = connect(&url).await;

    join(&state, &mut ws_a, &a, "solo", "user-a").await;
    assert_eq!(state.room_count(), 1);

    ws_a.close(None).await.unwrap();
    assert_eq!(recv(&mut ws_b).await, ServerEvent::UserDisconnected(a));
    assert_eq!(state.room_count(), 0);
    assert_eq!(state.connection_count(), 1);
}

#[tokio::test]
async fn dropped_socket_is_treated_as_disconnect() {
    let (state, url, _handle) = start_relay().await;
    let (mut ws_a, a) = connect(&url).await;
    let (mut ws_b, b) = connect(&url).await;

    join(&state, &mut ws_a, &a, "r1", "user-a").await;
    join(&state, &mut ws_b, &b, "r1", "user-b").await;
    let _ = recv(&mut ws_a).await; // user-connected(user-b)

    // No close frame: the TCP stream just goes away.
    drop(ws_a);

    assert_eq!(
        recv(&mut ws_b).await,
        ServerEvent::UserDisconnected(a.clone())
    );
    assert_eq!(state.members_of(&RoomId::from("r1")), HashSet::from([b]));
    assert!(state.room_of(&a).is_none());
    assert_eq!(state.connection_count(), 1);
}

#[tokio::test]
async fn concurrent_joins_see_consistent_membership() {
    const CLIENTS: usize = 8;

    let (state, url, _handle) = start_relay().await;
    let mut clients = Vec::with_capacity(CLIENTS);
    for _ in 0..CLIENTS {
        clients.push(connect(&url).await);
    }

    let barrier = Arc::new(Barrier::new(CLIENTS));
    let tasks: Vec<_> = clients
        .into_iter()
        .enumerate()
        .map(|(i, (mut ws, id))| {
            let barrier = Arc::clone(&barrier);
            tokio::spawn(async move {
                barrier.wait().await;
                send(
                    &mut ws,
                    &ClientEvent::JoinRoom {
                        room_id: RoomId::from("crowd"),
                        user_id: format!("user-{i}"),
                    },
                )
                .await;
                (ws, id, format!("user-{i}"))
            })
        })
        .collect();

    let mut joined = Vec::with_capacity(CLIENTS);
    for task in tasks {
        joined.push(task.await.unwrap());
    }

    let room = RoomId::from("crowd");
    tokio::time::timeout(Duration::from_secs(5), async {
        while state.members_of(&room).len() < CLIENTS {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("not every join was applied");

    let mut counts = Vec::with_capacity(CLIENTS);
    for (mut ws, _id, own_user) in joined {
        let mut announced = HashSet::new();
        while let Ok(frame) = tokio::time::timeout(Duration::from_millis(200), ws.next()).await {
            let msg = frame.unwrap().unwrap();
            match codec::decode(msg.to_text().unwrap()).unwrap() {
                ServerEvent::UserConnected(user) => {
                    assert_ne!(user, own_user, "joiner was told about itself");
                    assert!(announced.insert(user), "duplicate user-connected");
                }
                other => panic!("expected UserConnected, got {other:?}"),
            }
        }
        counts.push(announced.len());
    }

    // Each member hears about everyone who joined after it, so the counts
    // are exactly 0..N in some order.
    counts.sort_unstable();
    assert_eq!(counts, (0..CLIENTS).collect::<Vec<_>>());
    assert_eq!(counts.iter().sum::<usize>(), CLIENTS * (CLIENTS - 1) / 2);
    assert_eq!(state.members_of(&room).len(), CLIENTS);
}
