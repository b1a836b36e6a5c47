use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Decoder, Encoder};

use super::pipe::PIPE_CAPACITY;
use super::{ByteConn, Conn, JsonCodec, NetConn, NetListener, Pipe, transmit};
use crate::config::NetConfig;
use crate::message::Message;
use crate::utils::Error;

#[tokio::test]
async fn test_pipe_delivers_in_order_both_ways() {
    let (a, b) = Pipe::pair();
    for i in 0..3 {
        a.write(Message::new(format!("count/{i}"))).await.unwrap();
    }
    for i in 0..3 {
        assert_eq!(b.read().await.unwrap().action, format!("count/{i}"));
    }

    b.write(Message::new("back")).await.unwrap();
    assert_eq!(a.read().await.unwrap().action, "back");
}

#[tokio::test]
async fn test_pipe_write_waits_for_reader_when_full() {
    let (a, b) = Pipe::pair();
    for _ in 0..PIPE_CAPACITY {
        a.write(Message::new("fill")).await.unwrap();
    }

    let overflow =
        tokio::time::timeout(Duration::from_millis(50), a.write(Message::new("overflow"))).await;
    assert!(overflow.is_err(), "write beyond capacity should wait");

    b.read().await.unwrap();
    tokio::time::timeout(Duration::from_millis(50), a.write(Message::new("fits")))
        .await
        .expect("a slot was freed")
        .unwrap();
}

#[tokio::test]
async fn test_pipe_close_fails_both_ends() {
    let (a, b) = Pipe::pair();
    a.write(Message::new("buffered")).await.unwrap();

    b.close().await.unwrap();
    assert!(a.is_closed());
    assert!(matches!(b.read().await, Err(Error::ClosedConnection)));
    assert!(matches!(a.read().await, Err(Error::ClosedConnection)));
    assert!(matches!(
        a.write(Message::new("late")).await,
        Err(Error::ClosedConnection)
    ));
}

#[tokio::test]
async fn test_pipe_close_wakes_pending_read() {
    let (a, b) = Pipe::pair();
    let a = Arc::new(a);
    let reader = tokio::spawn({
        let a = a.clone();
        async move { a.read().await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    b.close().await.unwrap();
    assert!(matches!(reader.await.unwrap(), Err(Error::ClosedConnection)));
}

#[tokio::test]
async fn test_pipe_rejects_invalid_messages() {
    let (a, _b) = Pipe::pair();
    let mut msg = Message::new("ping");
    msg.id.clear();
    assert!(matches!(a.write(msg).await, Err(Error::InvalidMessage(_))));
}

#[test]
fn test_codec_skips_filler_and_waits_for_whole_values() {
    let mut codec = JsonCodec;
    let mut buf = BytesMut::new();
    let msg = Message::new("ping");
    let data = msg.encode().unwrap();

    buf.extend_from_slice(b"  \n ");
    assert!(codec.decode(&mut buf).unwrap().is_none());
    assert!(buf.is_empty());

    let (head, tail) = data.split_at(data.len() / 2);
    buf.extend_from_slice(b" ");
    buf.extend_from_slice(head);
    assert!(codec.decode(&mut buf).unwrap().is_none());

    buf.extend_from_slice(tail);
    buf.extend_from_slice(b"\n  ");
    assert_eq!(codec.decode(&mut buf).unwrap(), Some(msg));
    assert!(codec.decode(&mut buf).unwrap().is_none());
}

#[test]
fn test_codec_decodes_back_to_back_values() {
    let mut codec = JsonCodec;
    let mut buf = BytesMut::from(&br#"{"id":"1","action":"ping"}{"id":"2","action":"ack"}"#[..]);
    assert_eq!(codec.decode(&mut buf).unwrap().unwrap().action, "ping");
    assert_eq!(codec.decode(&mut buf).unwrap().unwrap().action, "ack");
    assert!(buf.is_empty());
}

#[test]
fn test_codec_reports_garbage() {
    let mut codec = JsonCodec;
    let mut buf = BytesMut::from(&b"not json"[..]);
    assert!(matches!(codec.decode(&mut buf), Err(Error::Decode(_))));

    let mut buf = BytesMut::from(&br#"{"id": 5}"#[..]);
    assert!(matches!(codec.decode(&mut buf), Err(Error::Decode(_))));
}

#[test]
fn test_codec_terminates_values_with_newline() {
    let mut codec = JsonCodec;
    let mut buf = BytesMut::new();
    codec.encode(Message::new("ping"), &mut buf).unwrap();
    assert_eq!(buf.last(), Some(&b'\n'));
    assert_eq!(buf.iter().filter(|b| **b == b'\n').count(), 1);
}

#[tokio::test]
async fn test_byte_conn_over_duplex() {
    let (left, right) = tokio::io::duplex(4096);
    let a = ByteConn::new(left);
    let b = ByteConn::new(right);

    let msg = Message::with_payload("sensor/temp", &json!({"celsius": 21})).unwrap();
    a.write(msg.clone()).await.unwrap();
    assert_eq!(b.read().await.unwrap(), msg);

    a.close().await.unwrap();
    assert!(matches!(a.read().await, Err(Error::ClosedConnection)));
    assert!(matches!(b.read().await, Err(Error::ClosedConnection)));
}

#[tokio::test]
async fn test_byte_conn_reads_foreign_writers() {
    let (mut raw, stream) = tokio::io::duplex(4096);
    let conn = ByteConn::new(stream);

    raw.write_all(b"   {\"id\":\"1\",\"action\":\"ping\"}  \n{\"id\":\"2\",\"action\":\"ack\"}")
        .await
        .unwrap();
    assert_eq!(conn.read().await.unwrap().action, "ping");
    assert_eq!(conn.read().await.unwrap().action, "ack");

    raw.write_all(b"{\"id\":\"3\"}\n").await.unwrap();
    assert!(matches!(conn.read().await, Err(Error::InvalidMessage(_))));
}

#[tokio::test]
async fn test_net_conn_over_tcp_survives_keepalive() {
    let listener = NetListener::bind(&NetConfig::new("tcp://127.0.0.1:0"))
        .await
        .unwrap();
    let addr = listener.local_addr().unwrap();
    let cfg = NetConfig {
        address: format!("tcp://{addr}"),
        keepalive_secs: 1,
        ..NetConfig::default()
    };

    let (client, server) = tokio::join!(NetConn::dial(&cfg), listener.accept());
    let client = client.unwrap();
    let server = server.unwrap();
    assert!(!client.is_verified());
    assert!(!server.is_verified());

    client.write(Message::new("hello")).await.unwrap();
    assert_eq!(server.read().await.unwrap().action, "hello");

    // at least one keepalive byte goes over the wire in between
    tokio::time::sleep(Duration::from_millis(1200)).await;

    client.write(Message::new("after")).await.unwrap();
    assert_eq!(server.read().await.unwrap().action, "after");
    server.write(Message::new("ack")).await.unwrap();
    assert_eq!(client.read().await.unwrap().action, "ack");
}

#[tokio::test]
async fn test_keepalive_loop_returns_write_error() {
    let (_peer, stream) = tokio::io::duplex(64);
    let conn = NetConn::new(stream, false, "test");
    conn.close().await.unwrap();

    let err = conn
        .keepalive_loop(Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(err.is_transport());
}

#[tokio::test]
async fn test_transmit_pumps_until_one_side_fails() {
    let (a1, a2) = Pipe::pair();
    let (b1, b2) = Pipe::pair();
    let pump = tokio::spawn(async move { transmit(&a2, &b1).await });

    a1.write(Message::new("there")).await.unwrap();
    assert_eq!(b2.read().await.unwrap().action, "there");
    b2.write(Message::new("back")).await.unwrap();
    assert_eq!(a1.read().await.unwrap().action, "back");

    a1.close().await.unwrap();
    assert!(matches!(pump.await.unwrap(), Error::ClosedConnection));
    assert!(matches!(b2.read().await, Err(Error::ClosedConnection)));
}
