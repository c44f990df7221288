//! TCP listener transport.
//!
//! One task per connection; each task owns its [`LinkSession`] and
//! writes replies in wire order. SECURE authentication runs after the
//! reply has been flushed, so the reply latency carries no information
//! about the cryptographic outcome.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use crate::dispatch::PacketHandler;
use crate::error::ServerError;
use crate::session::{LinkSession, SessionEvent};

/// Accept listener connections forever.
///
/// # Errors
///
/// Returns an error if the listen socket cannot be bound. Per-connection
/// failures are logged and end only that connection.
pub async fn run(listen: SocketAddr, handler: Arc<PacketHandler>) -> Result<(), ServerError> {
    let listener = TcpListener::bind(listen).await?;
    info!(%listen, "accepting listener connections");

    loop {
        let (stream, peer) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            debug!(%peer, "connection opened");
            if let Err(error) = handle_connection(stream, &handler).await {
                warn!(%peer, %error, "connection failed");
            }
            debug!(%peer, "connection closed");
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    handler: &PacketHandler,
) -> Result<(), ServerError> {
    let mut session = LinkSession::new();
    let mut buf = [0u8; 4096];

    loop {
        let read = stream.read(&mut buf).await?;
        if read == 0 {
            return Ok(());
        }
        for event in session.receive(&buf[..read]) {
            match event {
                SessionEvent::Respond(response) => {
                    stream.write_all(response.as_bytes()).await?;
                }
                SessionEvent::Packet(packet) => {
                    let (response, job) = handler.dispatch(&packet);
                    stream.write_all(response.as_bytes()).await?;
                    // Reply first; only then touch the crypto.
                    if let Some(job) = job {
                        handler.authenticate(job);
                    }
                }
            }
        }
        stream.flush().await?;
    }
}
