use std::net::SocketAddr;
use std::ops::{AddAssign, RangeInclusive};
use std::time::Duration;

use chat_relay::codec::StringCodec;
use chat_relay::{connection_refused, parse_socket_addr, random_msg, random_name, stdout_logging};
use futures::SinkExt;
use tokio::net::{
    tcp::{OwnedReadHalf, OwnedWriteHalf},
    TcpStream,
};
use tokio::task::JoinSet;
use tokio_stream::StreamExt;
use tokio_util::codec::{FramedRead, FramedWrite};

const LEN_PREFIX: usize = 2;

struct Bot<M> {
    msgs: M,
    msg_delay: RangeInclusive<u64>,
    sink: FramedWrite<OwnedWriteHalf, StringCodec>,
    stream: FramedRead<OwnedReadHalf, StringCodec>,
    stats: Stats,
}

#[derive(Default, Debug)]
struct Stats {
    sent_bytes: usize,
    got_bytes: usize,
    sent_msgs: usize,
    got_msgs: usize,
}

impl AddAssign for Stats {
    fn add_assign(&mut self, rhs: Self) {
        self.sent_bytes += rhs.sent_bytes;
        self.sent_msgs += rhs.sent_msgs;
        self.got_bytes += rhs.got_bytes;
        self.got_msgs += rhs.got_msgs;
    }
}

impl<M: Iterator<Item = String>> Bot<M> {
    async fn new(addr: SocketAddr, msgs: M, msg_delay: RangeInclusive<u64>) -> anyhow::Result<Self> {
        let conn = TcpStream::connect(addr).await?;
        let (reader, writer) = conn.into_split();
        let mut sink = FramedWrite::new(writer, StringCodec::new());
        let stream = FramedRead::new(reader, StringCodec::new());
        // first frame on the wire is always the bot's name
        sink.send(random_name()).await?;
        Ok(Self {
            msgs,
            msg_delay,
            sink,
            stream,
            stats: Stats::default(),
        })
    }
    async fn chat(mut self) -> anyhow::Result<Stats> {
        for msg in self.msgs {
            let msg_len = msg.len();
            self.sink.send(msg).await?;
            self.stats.sent_bytes += msg_len + LEN_PREFIX;
            self.stats.sent_msgs += 1;
            let sleep = tokio::time::sleep(
                Duration::from_millis(fastrand::u64(self.msg_delay.clone()))
            );
            tokio::pin!(sleep);
            loop {
                tokio::select! {
                    option = self.stream.next() => {
                        if let Some(result) = option {
                            let msg = result?;
                            self.stats.got_bytes += msg.len() + LEN_PREFIX;
                            self.stats.got_msgs += 1;
                        }
                    },
                    _ = &mut sleep => {
                        break;
                    },
                };
            }
        }
        Ok(self.stats)
    }
}

struct Chatty {
    send_msgs: usize,
    msgs_sent: usize,
}

impl Chatty {
    fn new() -> Self {
        Self {
            send_msgs: 100,
            msgs_sent: 0,
        }
    }
}

impl Iterator for Chatty {
    type Item = String;
    fn next(&mut self) -> Option<Self::Item> {
        if self.msgs_sent >= self.send_msgs {
            return None;
        }
        self.msgs_sent += 1;
        Some(random_msg())
    }
}

struct StressTest {
    send_msgs: usize,
    msgs_sent: usize,
}

impl StressTest {
    fn new() -> Self {
        Self {
            send_msgs: 100000,
            msgs_sent: 0,
        }
    }
}

impl Iterator for StressTest {
    type Item = String;
    fn next(&mut self) -> Option<Self::Item> {
        if self.msgs_sent >= self.send_msgs {
            return None;
        }
        self.msgs_sent += 1;
        Some(random_msg())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let addr = parse_socket_addr();
    stdout_logging();
    let conn = match TcpStream::connect(addr).await {
        Ok(conn) => conn,
        Err(err) => {
            match err.kind() {
                std::io::ErrorKind::ConnectionRefused => {
                    tracing::error!("{}", connection_refused(addr));
                    std::process::exit(1)
                }
                // got unexpected err, re-throw
                _ => Err(err)?,
            }
        }
    };
    drop(conn);

    let mut stats = Stats::default();
    let mut set = JoinSet::new();
    tracing::info!("spawning bots");

    // spawn 6 chatty bots
    for _ in 0..6 {
        let bot = Bot::new(addr, Chatty::new(), 2000..=4000).await?;
        set.spawn(bot.chat());
    }

    // spawn 100 stress-test bots
    for _ in 0..100 {
        let bot = Bot::new(addr, StressTest::new(), 100..=200).await?;
        set.spawn(bot.chat());
    }

    tracing::info!("waiting for all bots to finish");
    while let Some(join_result) = set.join_next().await {
        let chat_result = join_result?;
        match chat_result {
            Ok(bot_stats) => stats += bot_stats,
            Err(err) => {
                tracing::error!("{err}");
            }
        }
    }

    tracing::info!("sent bytes - {}", stats.sent_bytes);
    tracing::info!("got bytes  - {}", stats.got_bytes);
    tracing::info!("sent msgs  - {}", stats.sent_msgs);
    tracing::info!("got msgs   - {}", stats.got_msgs);

    Ok(())
}
