use std::io;

use chat_relay::server::Relay;
use chat_relay::{parse_socket_addr, stdout_logging};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[tokio::main]
async fn main() -> Result<(), io::Error> {
    stdout_logging();
    let addr = parse_socket_addr();
    let relay = match Relay::bind(addr).await {
        Ok(relay) => relay,
        Err(err) => {
            tracing::error!("Failed to bind {addr}: {err}");
            std::process::exit(1);
        }
    };
    tracing::info!("Listening on {addr}");
    relay.run().await
}
