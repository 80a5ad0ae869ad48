//! Datagram transports for OSC.

use std::net::SocketAddr;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info};

use crate::message::OscMessage;
use crate::reply::ReplyError;

/// Largest datagram we accept. Full `/cueLists` replies can be big.
const MAX_DATAGRAM: usize = 65_536;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, message: &OscMessage) -> Result<(), ReplyError>;

    /// Next datagram's messages. `Ok(None)` once the transport is closed.
    ///
    /// Must be cancel-safe: the client polls it inside `select!`.
    async fn recv(&self) -> Result<Option<Vec<OscMessage>>, ReplyError>;

    fn describe(&self) -> String;
}

/// UDP transport. QLab replies to the port a message was sent from, so one
/// socket both sends and listens.
pub struct UdpTransport {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl UdpTransport {
    /// Bind the first free local port in `port+1 ..= port+attempts`.
    pub async fn bind(host: &str, port: u16, attempts: u16) -> Result<Self> {
        let peer = tokio::net::lookup_host((host, port))
            .await
            .with_context(|| format!("failed to resolve QLab host {}", host))?
            .next()
            .with_context(|| format!("no address found for QLab host {}", host))?;
        let bind_ip = if peer.is_ipv4() { "0.0.0.0" } else { "::" };

        for offset in 1..=attempts {
            let Some(local_port) = port.checked_add(offset) else {
                break;
            };
            match UdpSocket::bind((bind_ip, local_port)).await {
                Ok(socket) => {
                    info!("Listening for QLab replies on port {} (peer {})", local_port, peer);
                    return Ok(Self { socket, peer });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    debug!("Port {} in use, trying next port", local_port);
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("failed to bind reply port {}", local_port));
                }
            }
        }

        bail!("failed to bind a reply port after {} attempts", attempts)
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.socket.local_addr().context("reply socket has no local address")
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send(&self, message: &OscMessage) -> Result<(), ReplyError> {
        let bytes = message.encode()?;
        self.socket
            .send_to(&bytes, self.peer)
            .await
            .map_err(|e| ReplyError::Transport(format!("send to {} failed: {}", self.peer, e)))?;
        Ok(())
    }

    async fn recv(&self) -> Result<Option<Vec<OscMessage>>, ReplyError> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (len, from) = self
            .socket
            .recv_from(&mut buf)
            .await
            .map_err(|e| ReplyError::Transport(format!("receive failed: {}", e)))?;
        if from.ip() != self.peer.ip() {
            debug!("Ignoring datagram from unexpected sender {}", from);
            return Ok(Some(Vec::new()));
        }
        OscMessage::decode(&buf[..len]).map(Some)
    }

    fn describe(&self) -> String {
        format!("udp://{}", self.peer)
    }
}

/// In-memory transport pair. Messages still go through OSC encoding so
/// both ends see exactly what a socket would carry.
pub struct LoopbackTransport {
    name: String,
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl LoopbackTransport {
    pub fn pair() -> (LoopbackTransport, LoopbackTransport) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            LoopbackTransport {
                name: "loopback-a".to_string(),
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            LoopbackTransport {
                name: "loopback-b".to_string(),
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, message: &OscMessage) -> Result<(), ReplyError> {
        let bytes = message.encode()?;
        self.tx
            .send(bytes)
            .map_err(|_| ReplyError::Transport(format!("{}: peer closed", self.name)))
    }

    async fn recv(&self) -> Result<Option<Vec<OscMessage>>, ReplyError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(bytes) => OscMessage::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
