//! Art-Net ingestion (Art-Net 4, receive side)
//!
//! One receiver per process: binds UDP 6454, parses ArtDmx datagrams and
//! fans the frames out to every hub runner over a broadcast channel. The hot
//! path only parses and hands off; malformed datagrams are dropped silently
//! with a counter increment.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use tokio::net::UdpSocket;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::status::StatusRegistry;

/// Standard Art-Net port
pub const ARTNET_PORT: u16 = 6454;

const ARTNET_ID: &[u8; 8] = b"Art-Net\0";
const OP_DMX: u16 = 0x5000;
const MIN_PROTOCOL_VERSION: u16 = 14;

/// Broadcast capacity; a slow runner lags rather than stalling the receiver.
const FRAME_CHANNEL_CAPACITY: usize = 64;

/// A parsed ArtDmx frame
#[derive(Debug, Clone)]
pub struct ArtDmxFrame {
    /// 15-bit port address
    pub universe: u16,
    pub sequence: u8,
    /// DMX slots, up to 512 bytes
    pub data: Arc<[u8]>,
}

/// Parse an ArtDmx datagram. Returns `None` for anything else.
pub fn parse_art_dmx(payload: &[u8]) -> Option<ArtDmxFrame> {
    if payload.len() < 18 {
        return None;
    }
    if &payload[0..8] != ARTNET_ID {
        return None;
    }

    // OpCode (little-endian): only ArtDmx is consumed
    let opcode = u16::from_le_bytes([payload[8], payload[9]]);
    if opcode != OP_DMX {
        return None;
    }

    // Protocol version (big-endian)
    let version = u16::from_be_bytes([payload[10], payload[11]]);
    if version < MIN_PROTOCOL_VERSION {
        return None;
    }

    let sequence = payload[12];
    // payload[13] is Physical, informational only

    // Port-Address (little-endian, 15 bits)
    let universe = u16::from_le_bytes([payload[14], payload[15]]) & 0x7FFF;

    // Data length (big-endian)
    let length = u16::from_be_bytes([payload[16], payload[17]]) as usize;
    if length == 0 || length > 512 {
        return None;
    }
    let data = payload.get(18..18 + length)?;

    Some(ArtDmxFrame {
        universe,
        sequence,
        data: data.into(),
    })
}

/// The process-wide Art-Net receiver
pub struct ArtNetReceiver {
    frames: broadcast::Sender<ArtDmxFrame>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
    local_addr: SocketAddr,
}

impl ArtNetReceiver {
    /// Bind UDP 6454 on the given interface address and start the parse loop.
    pub async fn bind(bind_ip: &str, status: StatusRegistry) -> Result<Self> {
        let ip: IpAddr = bind_ip.parse().map_err(|_| {
            hueflow_core::ConfigError::Invalid(format!(
                "artnet.bindIp {:?} is not an IP address",
                bind_ip
            ))
        })?;
        let socket = UdpSocket::bind(SocketAddr::new(ip, ARTNET_PORT)).await?;
        let local_addr = socket.local_addr()?;
        info!("Art-Net receiver bound on {}", local_addr);
        status.receiver_bound(local_addr);

        let (frames, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(recv_loop(
            socket,
            frames.clone(),
            cancel.clone(),
            status,
        ));

        Ok(Self {
            frames,
            cancel,
            task,
            local_addr,
        })
    }

    /// Subscribe a runner to the frame fan-out.
    pub fn subscribe(&self) -> broadcast::Receiver<ArtDmxFrame> {
        self.frames.subscribe()
    }

    /// Bound socket address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the parse loop and release the socket.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Art-Net receiver task ended abnormally: {}", e);
        }
    }
}

async fn recv_loop(
    socket: UdpSocket,
    frames: broadcast::Sender<ArtDmxFrame>,
    cancel: CancellationToken,
    status: StatusRegistry,
) {
    let mut buf = [0u8; 1024];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Art-Net receiver: shutting down");
                break;
            }
            received = socket.recv_from(&mut buf) => {
                match received {
                    Ok((len, _peer)) => match parse_art_dmx(&buf[..len]) {
                        Some(frame) => {
                            status.record_frame(frame.universe);
                            // No subscribers is fine; frames are ephemeral
                            let _ = frames.send(frame);
                        }
                        None => status.record_malformed(),
                    },
                    Err(e) => {
                        warn!("Art-Net receiver: socket error: {}", e);
                        break;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build a valid ArtDmx datagram for tests.
    fn art_dmx_packet(universe: u16, sequence: u8, data: &[u8]) -> Vec<u8> {
        let mut packet = vec![0u8; 18 + data.len()];
        packet[0..8].copy_from_slice(b"Art-Net\0");
        packet[8..10].copy_from_slice(&0x5000u16.to_le_bytes());
        packet[10..12].copy_from_slice(&14u16.to_be_bytes());
        packet[12] = sequence;
        packet[13] = 0;
        packet[14..16].copy_from_slice(&universe.to_le_bytes());
        packet[16..18].copy_from_slice(&(data.len() as u16).to_be_bytes());
        packet[18..].copy_from_slice(data);
        packet
    }

    #[test]
    fn test_parse_art_dmx() {
        let data = [0xFF, 0x00, 0x7F, 0x01];
        let frame = parse_art_dmx(&art_dmx_packet(3, 42, &data)).unwrap();
        assert_eq!(frame.universe, 3);
        assert_eq!(frame.sequence, 42);
        assert_eq!(&frame.data[..], &data);
    }

    #[test]
    fn test_universe_is_15_bit() {
        let frame = parse_art_dmx(&art_dmx_packet(0x8003, 0, &[0])).unwrap();
        assert_eq!(frame.universe, 3);
    }

    #[test]
    fn test_rejects_wrong_id() {
        let mut packet = art_dmx_packet(0, 0, &[0]);
        packet[0] = b'X';
        assert!(parse_art_dmx(&packet).is_none());
    }

    #[test]
    fn test_rejects_non_dmx_opcode() {
        let mut packet = art_dmx_packet(0, 0, &[0]);
        // ArtPoll (0x2000)
        packet[8..10].copy_from_slice(&0x2000u16.to_le_bytes());
        assert!(parse_art_dmx(&packet).is_none());
    }

    #[test]
    fn test_rejects_truncated_and_oversized() {
        assert!(parse_art_dmx(b"Art-Net\0").is_none());

        let mut packet = art_dmx_packet(0, 0, &[0; 4]);
        // Claims more data than the datagram carries
        packet[16..18].copy_from_slice(&512u16.to_be_bytes());
        assert!(parse_art_dmx(&packet).is_none());

        let mut packet = art_dmx_packet(0, 0, &[0; 513]);
        packet[16..18].copy_from_slice(&513u16.to_be_bytes());
        assert!(parse_art_dmx(&packet).is_none());
    }

    #[test]
    fn test_rejects_old_protocol_version() {
        let mut packet = art_dmx_packet(0, 0, &[0]);
        packet[10..12].copy_from_slice(&13u16.to_be_bytes());
        assert!(parse_art_dmx(&packet).is_none());
    }

    #[tokio::test]
    async fn test_receiver_parses_and_broadcasts() {
        let status = StatusRegistry::new();
        // Port 6454 may be taken on a shared test host, so drive the parse
        // path through a loopback socket pair only when the bind succeeds.
        let receiver = match ArtNetReceiver::bind("127.0.0.1", status.clone()).await {
            Ok(r) => r,
            Err(_) => return,
        };
        let mut frames = receiver.subscribe();

        let sender = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        sender
            .send_to(&art_dmx_packet(1, 7, &[0xAA, 0xBB]), receiver.local_addr())
            .await
            .unwrap();
        sender
            .send_to(b"garbage", receiver.local_addr())
            .await
            .unwrap();

        let frame = frames.recv().await.unwrap();
        assert_eq!(frame.universe, 1);
        assert_eq!(&frame.data[..], &[0xAA, 0xBB]);

        receiver.shutdown().await;
        assert_eq!(status.snapshot().receiver.frames_total, 1);
    }
}
