//! The relay: admits connections, fans every chat frame out to all
//! connected peers in one global order, and evicts peers whose I/O fails.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use compact_str::CompactString;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, Receiver, Sender};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};

use crate::codec::StringCodec;

pub const MAX_MSG_LEN: usize = 400;
// an outbound frame is one capped payload plus one capped name and ": "
const MAX_OUT_LEN: usize = 2 * MAX_MSG_LEN + 2;
const EVENT_CHANNEL_CAPACITY: usize = 1024;
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

type PeerId = u64;

enum Event {
    Joined {
        name: CompactString,
        addr: SocketAddr,
        stream: FramedRead<OwnedReadHalf, StringCodec>,
        sink: FramedWrite<OwnedWriteHalf, StringCodec>,
    },
    Inbound {
        id: PeerId,
        payload: String,
    },
    Closed {
        id: PeerId,
    },
}

/// One connected client. Owned exclusively by the relay task; the read
/// half lives in the peer's reader task and reaches the relay only as
/// `Event`s carrying this peer's id.
struct Peer {
    id: PeerId,
    name: CompactString,
    addr: SocketAddr,
    sink: FramedWrite<OwnedWriteHalf, StringCodec>,
    reader: JoinHandle<()>,
    faulted: bool,
}

/// The broadcast loop's state: the listener, the ordered peer registry,
/// and both ends of the event channel. Nothing else ever mutates the
/// registry.
pub struct Relay {
    listener: TcpListener,
    peers: Vec<Peer>,
    next_id: PeerId,
    events_tx: Sender<Event>,
    events_rx: Receiver<Event>,
}

impl Relay {
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Ok(Self {
            listener,
            peers: Vec::new(),
            next_id: 0,
            events_tx,
            events_rx,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Runs until the process is terminated. Accepted sockets get a
    /// handshake task; everything else arrives as events, one at a time,
    /// which is what gives every peer the same view of message order.
    pub async fn run(mut self) -> io::Result<()> {
        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    let (tcp, addr) = accepted?;
                    tokio::spawn(admit(tcp, addr, self.events_tx.clone()));
                },
                event = self.events_rx.recv() => {
                    match event {
                        Some(event) => self.handle_event(event).await,
                        // unreachable, the relay holds a sender of its own
                        None => return Ok(()),
                    }
                },
            }
        }
    }

    async fn handle_event(&mut self, event: Event) {
        match event {
            Event::Joined {
                name,
                addr,
                stream,
                sink,
            } => {
                let id = self.next_id;
                self.next_id += 1;
                let reader = tokio::spawn(pump_reader(id, stream, self.events_tx.clone()));
                tracing::info!("{addr} connected, name {name}");
                self.peers.push(Peer {
                    id,
                    name,
                    addr,
                    sink,
                    reader,
                    faulted: false,
                });
            }
            Event::Inbound { id, payload } => {
                let name = match self.peers.iter().find(|peer| peer.id == id) {
                    Some(peer) => peer.name.clone(),
                    // the sender was evicted while this frame was in flight
                    None => return,
                };
                let msg = format!("{name}: {payload}");
                self.broadcast(&msg).await;
                self.evict_faulted();
            }
            Event::Closed { id } => {
                if let Some(peer) = self.peers.iter_mut().find(|peer| peer.id == id) {
                    peer.faulted = true;
                }
                self.evict_faulted();
            }
        }
    }

    /// Delivers one message to every peer in registry order, the sender
    /// included. A failed or timed-out write faults that peer only;
    /// delivery continues to the rest.
    async fn broadcast(&mut self, msg: &str) {
        for peer in &mut self.peers {
            match timeout(WRITE_TIMEOUT, peer.sink.send(msg)).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::trace!("write to {} failed: {err}", peer.name);
                    peer.faulted = true;
                }
                Err(_) => {
                    tracing::trace!("write to {} timed out", peer.name);
                    peer.faulted = true;
                }
            }
        }
    }

    /// Removes every faulted peer. Runs after each delivery pass, so the
    /// registry never carries a faulted peer into the next event.
    fn evict_faulted(&mut self) {
        self.peers.retain(|peer| {
            if !peer.faulted {
                return true;
            }
            peer.reader.abort();
            tracing::info!("{} disconnected, name {}", peer.addr, peer.name);
            false
        });
    }
}

/// Admission handshake: the first frame a client sends is its display
/// name. A connection that errors, disconnects, or stays silent past the
/// deadline is dropped without ever becoming a peer.
async fn admit(tcp: TcpStream, addr: SocketAddr, events: Sender<Event>) {
    let (reader, writer) = tcp.into_split();
    let mut stream = FramedRead::new(reader, StringCodec::new_with_max_length(MAX_MSG_LEN));
    let sink = FramedWrite::new(writer, StringCodec::new_with_max_length(MAX_OUT_LEN));
    let name = match timeout(HANDSHAKE_TIMEOUT, stream.next()).await {
        Ok(Some(Ok(name))) => CompactString::from(name),
        Ok(Some(Err(_))) | Ok(None) | Err(_) => {
            tracing::trace!("{addr} dropped before sending a name");
            return;
        }
    };
    let _ = events
        .send(Event::Joined {
            name,
            addr,
            stream,
            sink,
        })
        .await;
}

/// Forwards a peer's decoded frames to the relay in arrival order. Ends
/// on EOF or a decode error, reporting closure so the peer gets evicted.
async fn pump_reader(
    id: PeerId,
    mut stream: FramedRead<OwnedReadHalf, StringCodec>,
    events: Sender<Event>,
) {
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(payload) => {
                if events.send(Event::Inbound { id, payload }).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                tracing::trace!("read from peer {id} failed: {err}");
                break;
            }
        }
    }
    let _ = events.send(Event::Closed { id }).await;
}
