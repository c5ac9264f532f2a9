// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use log::LevelFilter;
use mtlink_crypto::{HEADER_LEN, ObfuscatedCipher};
use mtlink_mtproto::mtp::{MSG_CONTAINER_ID, MsgSequencer};
use mtlink_mtproto::transport::{Abridged, Intermediate, Obfuscated};
use mtlink_mtsender::net::Connector;
use mtlink_mtsender::{
    BatchLimits, Connection, ConnectionState, InvocationError, PendingRequest, RequestBatcher,
};
use simple_logger::SimpleLogger;
use std::collections::VecDeque;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

/// Hands out one end of an in-memory pipe per connection attempt.
struct PipeConnector(Mutex<VecDeque<DuplexStream>>);

impl Connector for PipeConnector {
    type Stream = DuplexStream;

    fn connect(&self) -> impl Future<Output = Result<DuplexStream, io::Error>> + Send {
        let stream = self.0.lock().unwrap().pop_front();
        async move {
            stream.ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionRefused, "no pipe"))
        }
    }
}

/// A connector good for `count` connections, along with the server end of each.
fn pipes(count: usize) -> (PipeConnector, VecDeque<DuplexStream>) {
    let (clients, servers) = (0..count).map(|_| tokio::io::duplex(64 * 1024)).unzip();
    (PipeConnector(Mutex::new(clients)), servers)
}

fn init_logging() {
    // Several tests may race to install the logger.
    let _ = SimpleLogger::new().with_level(LevelFilter::Debug).init();
}

/// Read one intermediate packet, returning its payload.
async fn read_intermediate(server: &mut DuplexStream) -> Vec<u8> {
    let mut len = [0; 4];
    server.read_exact(&mut len).await.unwrap();
    let mut payload = vec![0; u32::from_le_bytes(len) as usize];
    server.read_exact(&mut payload).await.unwrap();
    payload
}

async fn expect_tag(server: &mut DuplexStream, tag: &[u8]) {
    let mut got = vec![0; tag.len()];
    server.read_exact(&mut got).await.unwrap();
    assert_eq!(got, tag);
}

async fn wait_for_state<T, C>(conn: &Connection<T, C>, state: ConnectionState)
where
    T: mtlink_mtproto::transport::Transport + Send + 'static,
    C: Connector,
{
    while conn.state() != state {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn roundtrip_with_intermediate() {
    init_logging();
    let (connector, mut servers) = pipes(1);
    let mut server = servers.pop_front().unwrap();
    let conn = Connection::new(Intermediate::new(), connector);
    conn.connect().await.unwrap();
    expect_tag(&mut server, &[0xee; 4]).await;

    conn.send(b"Hey!Hey!".to_vec()).unwrap();
    conn.send(vec![7; 1024]).unwrap();
    assert_eq!(read_intermediate(&mut server).await, b"Hey!Hey!");
    assert_eq!(read_intermediate(&mut server).await, vec![7; 1024]);

    // Two packets in a single write, then one split across writes.
    server
        .write_all(&[8, 0, 0, 0, 1, 1, 1, 1, 1, 1, 1, 1, 12, 0, 0, 0])
        .await
        .unwrap();
    server.write_all(b"Bye!Bye!Bye!").await.unwrap();
    assert_eq!(conn.receive().await.unwrap(), vec![1; 8]);
    assert_eq!(conn.receive().await.unwrap(), b"Bye!Bye!Bye!");

    conn.disconnect().await;
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn disconnect_rejects_pending_requests() {
    init_logging();
    let (connector, mut servers) = pipes(1);
    let mut server = servers.pop_front().unwrap();
    let batcher = Arc::new(RequestBatcher::new(
        MsgSequencer::new(),
        BatchLimits::default(),
    ));
    let conn = Connection::new(Intermediate::new(), connector).with_batcher(Arc::clone(&batcher));
    conn.connect().await.unwrap();
    expect_tag(&mut server, &[0xee; 4]).await;

    let receivers = (0..3)
        .map(|i| {
            let (request, rx) = PendingRequest::new(vec![i; 8]);
            batcher.append(request);
            rx
        })
        .collect::<Vec<_>>();

    conn.disconnect().await;
    for rx in receivers {
        assert!(matches!(rx.await, Ok(Err(InvocationError::NotConnected))));
    }
    assert!(batcher.is_empty());

    // Nothing else reaches the peer once disconnected.
    assert!(matches!(
        conn.send(vec![0; 8]),
        Err(InvocationError::NotConnected)
    ));
    let mut rest = Vec::new();
    server.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
}

#[tokio::test]
async fn peer_failure_rejects_requests_in_flight() {
    init_logging();
    let (connector, mut servers) = pipes(1);
    let mut server = servers.pop_front().unwrap();
    let batcher = Arc::new(RequestBatcher::new(
        MsgSequencer::new(),
        BatchLimits::default(),
    ));
    let conn = Connection::new(Intermediate::new(), connector).with_batcher(Arc::clone(&batcher));
    conn.connect().await.unwrap();
    expect_tag(&mut server, &[0xee; 4]).await;

    let (request, rx) = PendingRequest::new(vec![1; 8]);
    batcher.append(request);
    let batch = batcher.try_next().unwrap();
    conn.send(batch.encoded().to_vec()).unwrap();
    assert_eq!(read_intermediate(&mut server).await, batch.encoded());

    let pending = conn.receive();
    // A negative length is how the server reports an error status.
    server.write_all(&[4, 0, 0, 0]).await.unwrap();
    server.write_all(&(-404i32).to_le_bytes()).await.unwrap();

    assert!(matches!(pending.await, Err(InvocationError::NotConnected)));
    assert!(matches!(
        rx.await,
        Ok(Err(InvocationError::Net(mtlink_mtsender::NetError::Transport(
            mtlink_mtproto::transport::Error::BadStatus { status: 404 }
        ))))
    ));
    wait_for_state(&conn, ConnectionState::Disconnected).await;
    drop(batch);
}

#[tokio::test]
async fn batches_flow_through_the_connection() {
    init_logging();
    let (connector, mut servers) = pipes(1);
    let mut server = servers.pop_front().unwrap();
    let batcher = RequestBatcher::new(MsgSequencer::new(), BatchLimits::default());
    let conn = Connection::new(Abridged::new(), connector);
    conn.connect().await.unwrap();
    expect_tag(&mut server, &[0xef]).await;

    let first = batcher.append(PendingRequest::new(b"Hey!".to_vec()).0);
    batcher.append(PendingRequest::new(b"Bye!Bye!".to_vec()).0.after(first));
    batcher.append(PendingRequest::new(vec![3; 16]).0);

    let batch = batcher.next().await.unwrap();
    assert!(batch.is_container());
    assert_eq!(batch.entries().len(), 3);
    conn.send(batch.encoded().to_vec()).unwrap();

    let mut len = [0; 1];
    server.read_exact(&mut len).await.unwrap();
    assert_eq!(len[0] as usize * 4, batch.encoded().len());
    let mut packet = vec![0; batch.encoded().len()];
    server.read_exact(&mut packet).await.unwrap();
    assert_eq!(packet, batch.encoded());
    assert_eq!(packet[16..20], MSG_CONTAINER_ID.to_le_bytes());
    assert_eq!(packet[20..24], 3i32.to_le_bytes());

    conn.disconnect().await;
}

#[tokio::test]
async fn obfuscated_connection_is_readable_by_peer() {
    init_logging();
    let (connector, mut servers) = pipes(1);
    let mut server = servers.pop_front().unwrap();
    let conn = Connection::new(Obfuscated::new(Intermediate::new()), connector);
    conn.connect().await.unwrap();

    let mut head = [0; HEADER_LEN];
    server.read_exact(&mut head).await.unwrap();
    head.reverse();
    let mut peer = ObfuscatedCipher::new(&head);
    peer.decrypt(&mut [0; HEADER_LEN]);

    conn.send(b"Hey!Hey!".to_vec()).unwrap();
    let mut packet = [0; 12];
    server.read_exact(&mut packet).await.unwrap();
    peer.decrypt(&mut packet);
    assert_eq!(&packet, b"\x08\x00\x00\x00Hey!Hey!");

    let mut reply = *b"\x0c\x00\x00\x00Bye!Bye!Bye!";
    peer.encrypt(&mut reply);
    server.write_all(&reply).await.unwrap();
    assert_eq!(conn.receive().await.unwrap(), b"Bye!Bye!Bye!");

    conn.disconnect().await;
}

#[tokio::test]
async fn reconnect_starts_over() {
    init_logging();
    let (connector, mut servers) = pipes(2);
    let mut first = servers.pop_front().unwrap();
    let mut second = servers.pop_front().unwrap();
    let conn = Connection::new(Intermediate::new(), connector);

    conn.connect().await.unwrap();
    expect_tag(&mut first, &[0xee; 4]).await;
    drop(first);
    assert!(matches!(
        conn.receive().await,
        Err(InvocationError::NotConnected)
    ));
    wait_for_state(&conn, ConnectionState::Disconnected).await;

    conn.connect().await.unwrap();
    expect_tag(&mut second, &[0xee; 4]).await;
    conn.send(b"Hey!Hey!".to_vec()).unwrap();
    assert_eq!(read_intermediate(&mut second).await, b"Hey!Hey!");

    second.write_all(&[8, 0, 0, 0]).await.unwrap();
    second.write_all(b"Bye!Bye!").await.unwrap();
    assert_eq!(conn.receive().await.unwrap(), b"Bye!Bye!");

    conn.disconnect().await;
    assert!(conn.connect().await.is_err());
    assert_eq!(conn.state(), ConnectionState::Disconnected);
}
