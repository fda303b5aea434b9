use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chat_relay::codec::StringCodec;
use chat_relay::server::Relay;
use futures::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tokio_util::codec::{FramedRead, FramedWrite};

const READ_TIMEOUT: Duration = Duration::from_secs(3);
// long enough for the relay to observe a disconnect and evict
const SETTLE: Duration = Duration::from_millis(200);

async fn start_relay() -> Result<(SocketAddr, JoinHandle<io::Result<()>>)> {
    let relay = Relay::bind("127.0.0.1:0".parse()?).await?;
    let addr = relay.local_addr()?;
    let server = tokio::spawn(relay.run());
    Ok((addr, server))
}

struct Client {
    stream: FramedRead<OwnedReadHalf, StringCodec>,
    sink: FramedWrite<OwnedWriteHalf, StringCodec>,
}

impl Client {
    /// Connects and sends the name frame. The relay registers peers
    /// asynchronously, so tests that depend on registration order call
    /// `join_synced` instead.
    async fn join(addr: SocketAddr, name: &str) -> Result<Self> {
        let tcp = TcpStream::connect(addr).await?;
        let (reader, writer) = tcp.into_split();
        let mut client = Self {
            stream: FramedRead::new(reader, StringCodec::new()),
            sink: FramedWrite::new(writer, StringCodec::new()),
        };
        client.send(name).await?;
        Ok(client)
    }

    /// Joins and then chats once, waiting for the self-echo. Receiving
    /// the echo proves the peer is in the registry; peers that joined
    /// earlier drain the same probe broadcast via `expect`.
    async fn join_synced(addr: SocketAddr, name: &str) -> Result<Self> {
        let mut client = Self::join(addr, name).await?;
        client.send("knock").await?;
        client.expect(&format!("{name}: knock")).await?;
        Ok(client)
    }

    async fn send(&mut self, msg: &str) -> Result<()> {
        self.sink.send(msg).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<String> {
        let frame = timeout(READ_TIMEOUT, self.stream.next())
            .await
            .context("timed out waiting for a broadcast")?
            .context("connection closed by the relay")??;
        Ok(frame)
    }

    async fn expect(&mut self, wanted: &str) -> Result<()> {
        let got = self.recv().await?;
        if got != wanted {
            bail!("expected broadcast {wanted:?}, got {got:?}");
        }
        Ok(())
    }

    /// Asserts nothing is delivered within a short window.
    async fn expect_silence(&mut self) -> Result<()> {
        match timeout(SETTLE, self.stream.next()).await {
            Err(_) => Ok(()),
            Ok(frame) => bail!("expected no broadcast, got {frame:?}"),
        }
    }

    /// Asserts the relay closed this client's connection.
    async fn expect_closed(&mut self) -> Result<()> {
        loop {
            match timeout(READ_TIMEOUT, self.stream.next())
                .await
                .context("timed out waiting for the relay to close")?
            {
                None => return Ok(()),
                // drain whatever was broadcast before the eviction
                Some(Ok(_)) => continue,
                Some(Err(_)) => return Ok(()),
            }
        }
    }
}

#[tokio::test]
async fn sender_gets_own_message_back_prefixed() -> Result<()> {
    let (addr, server) = start_relay().await?;
    let mut alice = Client::join(addr, "Alice").await?;
    alice.send("hello").await?;
    alice.expect("Alice: hello").await?;
    server.abort();
    Ok(())
}

#[tokio::test]
async fn two_clients_see_messages_in_the_same_order() -> Result<()> {
    let (addr, server) = start_relay().await?;
    let mut a = Client::join_synced(addr, "A").await?;
    let mut b = Client::join_synced(addr, "B").await?;
    a.expect("B: knock").await?;

    a.send("hi").await?;
    a.expect("A: hi").await?;
    b.expect("A: hi").await?;

    b.send("yo").await?;
    a.expect("B: yo").await?;
    b.expect("B: yo").await?;

    server.abort();
    Ok(())
}

#[tokio::test]
async fn interleaved_senders_yield_one_total_order() -> Result<()> {
    let (addr, server) = start_relay().await?;
    let mut a = Client::join_synced(addr, "A").await?;
    let mut b = Client::join_synced(addr, "B").await?;
    a.expect("B: knock").await?;

    for i in 0..5 {
        a.send(&format!("a{i}")).await?;
        b.send(&format!("b{i}")).await?;
    }

    let mut seen_by_a = Vec::new();
    let mut seen_by_b = Vec::new();
    for _ in 0..10 {
        seen_by_a.push(a.recv().await?);
        seen_by_b.push(b.recv().await?);
    }

    // every client observes the same global order
    assert_eq!(seen_by_a, seen_by_b);

    // and each sender's own messages stay in send order within it
    let from_a: Vec<&str> = seen_by_a
        .iter()
        .filter(|msg| msg.starts_with("A: "))
        .map(|msg| msg.as_str())
        .collect();
    let from_b: Vec<&str> = seen_by_a
        .iter()
        .filter(|msg| msg.starts_with("B: "))
        .map(|msg| msg.as_str())
        .collect();
    assert_eq!(from_a, ["A: a0", "A: a1", "A: a2", "A: a3", "A: a4"]);
    assert_eq!(from_b, ["B: b0", "B: b1", "B: b2", "B: b3", "B: b4"]);

    server.abort();
    Ok(())
}

#[tokio::test]
async fn abrupt_disconnect_leaves_other_clients_unaffected() -> Result<()> {
    let (addr, server) = start_relay().await?;
    let a = Client::join_synced(addr, "A").await?;
    let mut b = Client::join_synced(addr, "B").await?;
    let mut c = Client::join_synced(addr, "C").await?;
    b.expect("C: knock").await?;

    drop(a);
    sleep(SETTLE).await;

    b.send("still here").await?;
    b.expect("B: still here").await?;
    c.expect("B: still here").await?;

    c.send("me too").await?;
    b.expect("C: me too").await?;
    c.expect("C: me too").await?;

    server.abort();
    Ok(())
}

#[tokio::test]
async fn connection_without_a_name_is_never_admitted() -> Result<()> {
    let (addr, server) = start_relay().await?;

    // connects and goes away without ever sending a name frame
    let ghost = TcpStream::connect(addr).await?;
    drop(ghost);
    sleep(SETTLE).await;

    let mut alice = Client::join(addr, "Alice").await?;
    alice.send("hello").await?;
    alice.expect("Alice: hello").await?;
    alice.expect_silence().await?;

    server.abort();
    Ok(())
}

#[tokio::test]
async fn oversized_frame_faults_only_its_sender() -> Result<()> {
    let (addr, server) = start_relay().await?;
    let eve = Client::join_synced(addr, "Eve").await?;
    let mut bob = Client::join_synced(addr, "Bob").await?;

    // claim a frame far past the relay's inbound cap; the decode error
    // faults Eve before any payload byte is sent
    let Client { stream, sink } = eve;
    let mut raw = sink.into_inner();
    raw.write_all(&[0xFF, 0xFF]).await?;
    let mut eve = Client { stream, sink: FramedWrite::new(raw, StringCodec::new()) };

    bob.send("anyone there").await?;
    bob.expect("Bob: anyone there").await?;

    eve.expect_closed().await?;

    server.abort();
    Ok(())
}

#[tokio::test]
async fn evicted_peer_stops_appearing_in_broadcasts() -> Result<()> {
    let (addr, server) = start_relay().await?;
    let mut a = Client::join_synced(addr, "A").await?;
    let mut b = Client::join_synced(addr, "B").await?;
    a.expect("B: knock").await?;

    // a message B wrote just before vanishing may or may not be relayed,
    // so close B cleanly with nothing in flight
    drop(b);
    sleep(SETTLE).await;

    a.send("alone now").await?;
    a.expect("A: alone now").await?;
    a.expect_silence().await?;

    server.abort();
    Ok(())
}
