//! End-to-end scenarios driving two simulated clients against a
//! [`RoomServer`] over the in-memory mock transport.

use std::time::Duration;

use roomhub::mock::WsSent;
use roomhub::{Message, RoomServer, RoomServerConfig, TransportEvent};

async fn settle() {
    for _ in 0..4 {
        tokio::task::yield_now().await;
    }
}

fn expect_binary(sent: WsSent) -> Vec<u8> {
    match sent {
        WsSent::Binary(bytes) => bytes,
        other => panic!("expected a binary frame, got {other:?}"),
    }
}

#[tokio::test]
async fn join_then_broadcast() {
    let server = RoomServer::new(RoomServerConfig::default());

    let (a, _a_in, mut a_out) = server.accept_mock().await;
    let a_join_ack = Message::decode(&expect_binary(a_out.recv().await.unwrap())).unwrap();
    assert_eq!(a_join_ack.event, "join_ack");

    let (b, b_in, mut b_out) = server.accept_mock().await;
    let b_join_ack = Message::decode(&expect_binary(b_out.recv().await.unwrap())).unwrap();
    assert_eq!(b_join_ack.event, "join_ack");
    let members: Vec<String> = serde_json::from_slice(&b_join_ack.payload).unwrap();
    assert!(members.contains(&a.id().to_string()));

    // A observes B's arrival as a new_member broadcast.
    let new_member = Message::decode(&expect_binary(a_out.recv().await.unwrap())).unwrap();
    assert_eq!(new_member.event, "new_member");
    assert_eq!(new_member.payload, b.id().as_bytes());

    let chat = Message::construct("root", "chat", "", "", b"hi".to_vec());
    b_in.send(TransportEvent::Binary(chat.encode())).await.unwrap();

    let received = Message::decode(&expect_binary(a_out.recv().await.unwrap())).unwrap();
    assert_eq!(received.src, b.id());
    assert_eq!(received.payload, b"hi".to_vec());

    settle().await;
    assert!(b_out.try_recv().is_err(), "B must not receive its own broadcast");
}

#[tokio::test]
async fn direct_message_and_unknown_dst() {
    let server = RoomServer::new(RoomServerConfig::default());
    let (a, a_in, mut a_out) = server.accept_mock().await;
    a_out.recv().await.unwrap(); // join_ack

    let (b, _b_in, mut b_out) = server.accept_mock().await;
    b_out.recv().await.unwrap(); // join_ack
    a_out.recv().await.unwrap(); // new_member for B

    let whisper = Message::construct("root", "whisper", b.id(), "", b"ok".to_vec());
    a_in.send(TransportEvent::Binary(whisper.encode())).await.unwrap();

    let received = Message::decode(&expect_binary(b_out.recv().await.unwrap())).unwrap();
    assert_eq!(received.event, "whisper");
    assert_eq!(received.src, a.id());
    assert_eq!(received.payload, b"ok".to_vec());

    settle().await;
    assert!(b_out.try_recv().is_err(), "no further delivery after the whisper");

    let to_unknown = Message::construct("root", "whisper", "ghost", "", b"nope".to_vec());
    a_in.send(TransportEvent::Binary(to_unknown.encode())).await.unwrap();
    settle().await;
    assert!(a_out.try_recv().is_err(), "unknown dst is dropped silently, not bounced back");
}

#[tokio::test]
async fn leave_and_room_gc() {
    let server = RoomServer::new(RoomServerConfig::default());
    let (a, a_in, mut a_out) = server.accept_mock().await;
    a_out.recv().await.unwrap(); // root join_ack
    let (b, b_in, mut b_out) = server.accept_mock().await;
    b_out.recv().await.unwrap(); // root join_ack
    a_out.recv().await.unwrap(); // new_member(B) on root

    let join_chess = Message::construct("chess", "join", "", "", Vec::new());
    a_in.send(TransportEvent::Binary(join_chess.clone().encode())).await.unwrap();
    let ack = Message::decode(&expect_binary(a_out.recv().await.unwrap())).unwrap();
    assert_eq!(ack.event, "join_ack");
    assert_eq!(ack.room, "chess");

    b_in.send(TransportEvent::Binary(join_chess.encode())).await.unwrap();
    b_out.recv().await.unwrap(); // chess join_ack
    a_out.recv().await.unwrap(); // new_member(B) on chess

    let before = server.room_count();
    assert!(before >= 2, "root and chess both tracked");

    let leave_chess = Message::construct("chess", "leave", "", "", Vec::new());
    a_in.send(TransportEvent::Binary(leave_chess.clone().encode())).await.unwrap();
    let a_leave_ack = Message::decode(&expect_binary(a_out.recv().await.unwrap())).unwrap();
    assert_eq!(a_leave_ack.event, "leave_ack");
    assert_eq!(a_leave_ack.payload, a.id().as_bytes());

    b_in.send(TransportEvent::Binary(leave_chess.encode())).await.unwrap();
    let b_leave_ack = Message::decode(&expect_binary(b_out.recv().await.unwrap())).unwrap();
    assert_eq!(b_leave_ack.event, "leave_ack");
    assert_eq!(b_leave_ack.payload, b.id().as_bytes());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(server.room_count(), before - 1, "chess was removed once empty");
}

#[tokio::test]
async fn slow_consumer_is_evicted_without_erroring_the_sender() {
    let mut config = RoomServerConfig::default();
    config.outbound_capacity = 4;
    let server = RoomServer::new(config);

    let (a, a_in, mut a_out) = server.accept_mock().await;
    a_out.recv().await.unwrap(); // join_ack
    let (b, _b_in, _b_out) = server.accept_mock().await;
    // _b_out is deliberately never drained: the mock channel (capacity 32)
    // plus B's outbound queue (capacity 4) together bound how many
    // broadcasts land before B's enqueue starts failing. Keeping it alive
    // (rather than dropping it) means B's writer blocks waiting for mock
    // channel capacity instead of erroring out immediately.
    a_out.recv().await.unwrap(); // new_member(B)

    for i in 0..64u32 {
        let msg = Message::construct("root", "chat", "", "", i.to_be_bytes().to_vec());
        a_in.send(TransportEvent::Binary(msg.encode())).await.unwrap();
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!server.contains_conn(b.id()), "B should have been evicted as a slow consumer");
    assert!(server.contains_conn(a.id()), "A is unaffected by B's eviction");
}

#[tokio::test]
async fn malformed_frame_terminates_the_sender_and_notifies_room() {
    let server = RoomServer::new(RoomServerConfig::default());
    let (a, a_in, mut a_out) = server.accept_mock().await;
    a_out.recv().await.unwrap(); // join_ack
    let (b, _b_in, mut b_out) = server.accept_mock().await;
    b_out.recv().await.unwrap(); // join_ack
    a_out.recv().await.unwrap(); // new_member(B)

    a_in.send(TransportEvent::Binary(vec![0u8; 10])).await.unwrap();

    let member_left = Message::decode(&expect_binary(b_out.recv().await.unwrap())).unwrap();
    assert_eq!(member_left.event, "member_left");
    assert_eq!(member_left.payload, a.id().as_bytes());

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!server.contains_conn(a.id()), "A's connection is torn down after a malformed frame");
}

#[tokio::test]
async fn ping_pong_liveness_keeps_a_responsive_client_connected() {
    let mut config = RoomServerConfig::default();
    config.ping_period = Duration::from_millis(20);
    config.read_deadline = Duration::from_millis(200);
    let server = RoomServer::new(config);

    let (a, a_in, mut a_out) = server.accept_mock().await;
    a_out.recv().await.unwrap(); // join_ack

    let ping = a_out.recv().await.expect("server should ping within the period");
    assert!(matches!(ping, WsSent::Ping));

    a_in.send(TransportEvent::Pong).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.contains_conn(a.id()), "a pong keeps the connection alive past the read deadline");
}
