pub mod codec;
pub mod server;

// BOT TRAFFIC GENERATION //

const ADJECTIVES: [&str; 16] = [
    "amber", "bold", "brisk", "calm", "clever", "dusty", "eager", "fuzzy",
    "glad", "keen", "lucky", "mellow", "quiet", "rapid", "sly", "witty",
];

const ANIMALS: [&str; 16] = [
    "badger", "crane", "ferret", "gecko", "heron", "ibis", "lemur", "lynx",
    "marmot", "otter", "puffin", "raven", "shrew", "stoat", "tapir", "wren",
];

const WORDS: [&str; 24] = [
    "the", "a", "some", "every", "quick", "slow", "red", "green", "small",
    "huge", "fox", "dog", "bird", "river", "stone", "cloud", "jumps",
    "runs", "sleeps", "sings", "over", "under", "near", "beyond",
];

pub fn choose<T: Copy>(array: &[T]) -> T {
    array[fastrand::usize(..array.len())]
}

pub fn random_name() -> String {
    let adjective = choose(&ADJECTIVES);
    let animal = choose(&ANIMALS);
    format!("{adjective}{animal}")
}

pub fn random_msg() -> String {
    let mut msg = String::with_capacity(32);
    let words = fastrand::u8(2..=10);
    for _ in 1..words {
        msg.push_str(choose(&WORDS));
        msg.push(' ');
    }
    msg.push_str(choose(&WORDS));
    msg
}

// COMMAND LINE //

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use clap::Parser;

pub const DEFAULT_IP: IpAddr = IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1));

#[derive(Parser)]
#[command(long_about = None)]
struct Cli {
    /// port to listen on (server) or connect to (bots)
    port: u16,

    #[arg(short, long, default_value_t = DEFAULT_IP)]
    ip: IpAddr,
}

pub fn parse_socket_addr() -> SocketAddr {
    let cli = Cli::parse();
    SocketAddr::new(cli.ip, cli.port)
}

// LOGGING //

use std::io;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

pub fn stdout_logging() {
    let subscriber = tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(
            fmt::Layer::new()
                .without_time()
                .compact()
                .with_ansi(true)
                .with_writer(io::stdout),
        );
    tracing::subscriber::set_global_default(subscriber)
        .expect("Unable to set a global subscriber");
}

// MISC //

pub fn connection_refused(tried: SocketAddr) -> String {
    let mut msg = format!("No server listening on {tried}\n");
    msg.push_str("Try running: cargo run --release --bin relay-server -- ");
    msg.push_str(&tried.port().to_string());
    if tried.ip() != DEFAULT_IP {
        msg.push_str(" -i ");
        msg.push_str(&tried.ip().to_string());
    }
    msg
}
