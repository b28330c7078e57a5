//! DTLS-PSK streaming transport
//!
//! One controller per hub: a PSK-authenticated DTLS session to UDP 2100
//! carrying update packets at a bounded cadence, with a keepalive obligation
//! when the DMX source goes quiet. The hub drops the streaming session
//! without traffic, so the last update is cached and resent while idle.
//!
//! State machine: `Idle -> Handshaking -> Open -> Closed`. Terminal edges
//! emit `Closed` (after `Error` on failure paths); closing is idempotent.
//! No automatic reconnect — the hub runner owns that decision.

use std::io::{Read, Write};
use std::net::UdpSocket;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use openssl::error::ErrorStack;
use openssl::ssl::{Ssl, SslContext, SslMethod, SslStream};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::{BridgeError, Result};
use crate::hue::stream::protocol;
use hueflow_core::ColorUpdate;

/// Hue Entertainment streaming port
pub const STREAM_PORT: u16 = 2100;
/// TLS_PSK_WITH_AES_128_GCM_SHA256 in OpenSSL cipher-list spelling
const PSK_CIPHER: &str = "PSK-AES128-GCM-SHA256";
/// Handshake attempts before giving up
const HANDSHAKE_ATTEMPTS: u32 = 4;
/// Per-attempt socket timeout during the handshake
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(2);
/// Default send floor: 40 ms between packets (~25 Hz ceiling)
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(40);
/// Keepalive timer period
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_millis(1000);
/// Resend the cached update once no send attempt was serviced for this long
const KEEPALIVE_STALE_AFTER: Duration = Duration::from_millis(2000);

/// Controller lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    Handshaking,
    Open,
    Closed,
}

/// Error kinds surfaced through [`StreamEvent::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    DtlsHandshake,
    TransportLoss,
}

/// Lifecycle events delivered to the owning runner
#[derive(Debug)]
pub enum StreamEvent {
    /// Peer authenticated; the session is open
    Connected,
    /// Failure detail, emitted before `Closed` on error edges
    Error {
        kind: StreamErrorKind,
        message: String,
    },
    /// Terminal: the session is gone
    Closed,
}

/// Outcome of a [`StreamController::send_update`] call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Datagram written to the socket
    Sent,
    /// State is not `Open`
    NotOpen,
    /// The min-interval gate blocked the write
    Throttled,
    /// Rate-halving policy skipped this packet
    Skipped,
}

/// Where encoded packets go. Production installs the DTLS sink; tests
/// install a recording sink.
trait PacketSink: Send {
    fn send(&mut self, packet: &[u8]) -> std::io::Result<()>;
    fn close(&mut self) {}
}

struct Inner {
    state: StreamState,
    sink: Option<Box<dyn PacketSink>>,
    min_interval: Duration,
    halve_rate: bool,
    skip_flag: bool,
    last_sent_at: Option<Instant>,
    /// Any serviced send attempt, throttled or not
    last_attempt_at: Option<Instant>,
    /// Last encoded packet, kept for keepalive resends
    last_packet: Option<Vec<u8>>,
}

/// DTLS-PSK streaming controller for one hub.
pub struct StreamController {
    hub: String,
    host: String,
    config_id: String,
    psk_identity: String,
    psk_secret: Vec<u8>,
    events: mpsc::UnboundedSender<StreamEvent>,
    inner: Mutex<Inner>,
}

impl StreamController {
    pub fn new(
        hub: &str,
        host: &str,
        config_id: &str,
        psk_identity: &str,
        psk_secret: Vec<u8>,
        events: mpsc::UnboundedSender<StreamEvent>,
    ) -> Self {
        Self {
            hub: hub.to_string(),
            host: host.to_string(),
            config_id: config_id.to_string(),
            psk_identity: psk_identity.to_string(),
            psk_secret,
            events,
            inner: Mutex::new(Inner {
                state: StreamState::Idle,
                sink: None,
                min_interval: DEFAULT_MIN_INTERVAL,
                halve_rate: false,
                skip_flag: false,
                last_sent_at: None,
                last_attempt_at: None,
                last_packet: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    /// Enable or disable the skip-every-other-packet policy. Enabling it
    /// halves the effective update rate. Off by default.
    pub fn set_halve_rate(&self, on: bool) {
        let mut guard = self.lock();
        guard.halve_rate = on;
        guard.skip_flag = false;
    }

    /// Run the DTLS-PSK client handshake. Valid from `Idle` only.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut guard = self.lock();
            if guard.state != StreamState::Idle {
                return Err(BridgeError::DtlsHandshake(format!(
                    "connect() in state {:?}",
                    guard.state
                )));
            }
            guard.state = StreamState::Handshaking;
        }

        info!(
            "hub {}: DTLS handshake with {}:{}",
            self.hub, self.host, STREAM_PORT
        );
        let host = self.host.clone();
        let identity = self.psk_identity.clone();
        let secret = self.psk_secret.clone();
        let handshake =
            tokio::task::spawn_blocking(move || dtls_handshake(&host, &identity, &secret)).await;

        let stream = match handshake {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                self.fail(StreamErrorKind::DtlsHandshake, &e.to_string());
                return Err(e);
            }
            Err(join) => {
                let e = BridgeError::DtlsHandshake(format!("handshake task failed: {}", join));
                self.fail(StreamErrorKind::DtlsHandshake, &e.to_string());
                return Err(e);
            }
        };

        {
            let mut guard = self.lock();
            if guard.state != StreamState::Handshaking {
                // close() raced the handshake; discard the fresh session
                drop(guard);
                let mut sink = DtlsSink { stream };
                sink.close();
                return Err(BridgeError::Shutdown);
            }
            guard.sink = Some(Box::new(DtlsSink { stream }));
            guard.state = StreamState::Open;
        }

        info!("hub {}: DTLS connected", self.hub);
        let _ = self.events.send(StreamEvent::Connected);
        Ok(())
    }

    /// Encode and send one update packet, subject to the min-interval gate.
    ///
    /// Every serviced attempt refreshes the cached last-known update, even
    /// when throttled, so keepalive resends carry the newest colors.
    pub fn send_update(&self, updates: &[ColorUpdate]) -> Result<SendOutcome> {
        let now = Instant::now();
        let packet = protocol::encode_update(&self.config_id, updates);

        let failure = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if inner.state != StreamState::Open {
                return Ok(SendOutcome::NotOpen);
            }

            inner.last_attempt_at = Some(now);
            inner.last_packet = Some(packet);

            if let Some(last) = inner.last_sent_at {
                if now.duration_since(last) < inner.min_interval {
                    return Ok(SendOutcome::Throttled);
                }
            }

            if inner.halve_rate {
                inner.skip_flag = !inner.skip_flag;
                if inner.skip_flag {
                    inner.last_sent_at = Some(now);
                    return Ok(SendOutcome::Skipped);
                }
            }

            let sink = match inner.sink.as_mut() {
                Some(sink) => sink,
                None => return Ok(SendOutcome::NotOpen),
            };
            let packet = inner.last_packet.as_deref().unwrap_or_default();
            match sink.send(packet) {
                Ok(()) => {
                    inner.last_sent_at = Some(now);
                    None
                }
                Err(e) => {
                    close_inner(inner);
                    Some(e)
                }
            }
        };

        match failure {
            None => Ok(SendOutcome::Sent),
            Some(e) => {
                let err = BridgeError::TransportLoss(e.to_string());
                self.emit_loss(&err);
                Err(err)
            }
        }
    }

    /// One keepalive timer tick. Resends the cached packet, bypassing the
    /// min-interval gate, when the session is open, a cached update exists
    /// and no send attempt was serviced within the staleness window.
    /// Returns whether a resend happened.
    pub fn keepalive_tick(&self) -> Result<bool> {
        let now = Instant::now();

        let failure = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            if inner.state != StreamState::Open {
                return Ok(false);
            }
            let stale = match inner.last_attempt_at {
                Some(at) => now.duration_since(at) >= KEEPALIVE_STALE_AFTER,
                None => false,
            };
            if !stale {
                return Ok(false);
            }
            let packet = match inner.last_packet.as_deref() {
                Some(packet) => packet,
                None => return Ok(false),
            };
            let sink = match inner.sink.as_mut() {
                Some(sink) => sink,
                None => return Ok(false),
            };
            match sink.send(packet) {
                Ok(()) => {
                    inner.last_sent_at = Some(now);
                    None
                }
                Err(e) => {
                    close_inner(inner);
                    Some(e)
                }
            }
        };

        match failure {
            None => {
                debug!("hub {}: keepalive resend", self.hub);
                Ok(true)
            }
            Some(e) => {
                let err = BridgeError::TransportLoss(e.to_string());
                self.emit_loss(&err);
                Err(err)
            }
        }
    }

    /// Close the session. Idempotent; only the first close emits `Closed`.
    pub fn close(&self) {
        let emitted = {
            let mut guard = self.lock();
            if guard.state == StreamState::Closed {
                false
            } else {
                close_inner(&mut guard);
                true
            }
        };
        if emitted {
            info!("hub {}: stream closed", self.hub);
            let _ = self.events.send(StreamEvent::Closed);
        }
    }

    fn fail(&self, kind: StreamErrorKind, message: &str) {
        let emitted = {
            let mut guard = self.lock();
            if guard.state == StreamState::Closed {
                false
            } else {
                close_inner(&mut guard);
                true
            }
        };
        if emitted {
            let _ = self.events.send(StreamEvent::Error {
                kind,
                message: message.to_string(),
            });
            let _ = self.events.send(StreamEvent::Closed);
        }
    }

    fn emit_loss(&self, err: &BridgeError) {
        let _ = self.events.send(StreamEvent::Error {
            kind: StreamErrorKind::TransportLoss,
            message: err.to_string(),
        });
        let _ = self.events.send(StreamEvent::Closed);
    }

    #[cfg(test)]
    fn open_with_sink(&self, sink: Box<dyn PacketSink>) {
        let mut guard = self.lock();
        guard.sink = Some(sink);
        guard.state = StreamState::Open;
    }
}

/// Tear down the transport and mark the state terminal. Callers emit events
/// after releasing the lock.
fn close_inner(inner: &mut Inner) {
    if let Some(mut sink) = inner.sink.take() {
        sink.close();
    }
    inner.state = StreamState::Closed;
}

// --- DTLS transport ---

/// Adapts a connected UDP socket to the Read/Write pair OpenSSL drives.
#[derive(Debug)]
struct UdpChannel {
    socket: UdpSocket,
}

impl Read for UdpChannel {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.socket.recv(buf)
    }
}

impl Write for UdpChannel {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.socket.send(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

struct DtlsSink {
    stream: SslStream<UdpChannel>,
}

impl PacketSink for DtlsSink {
    fn send(&mut self, packet: &[u8]) -> std::io::Result<()> {
        self.stream.write_all(packet)
    }

    fn close(&mut self) {
        // close_notify is best-effort over UDP
        let _ = self.stream.shutdown();
    }
}

fn psk_context(identity: &str, secret: &[u8]) -> std::result::Result<SslContext, ErrorStack> {
    let mut builder = SslContext::builder(SslMethod::dtls())?;
    builder.set_cipher_list(PSK_CIPHER)?;

    let identity = identity.as_bytes().to_vec();
    let secret = secret.to_vec();
    builder.set_psk_client_callback(move |_ssl, _hint, identity_buf, psk_buf| {
        if identity.len() + 1 > identity_buf.len() || secret.len() > psk_buf.len() {
            return Err(ErrorStack::get());
        }
        identity_buf[..identity.len()].copy_from_slice(&identity);
        identity_buf[identity.len()] = 0;
        psk_buf[..secret.len()].copy_from_slice(&secret);
        Ok(secret.len())
    });

    Ok(builder.build())
}

/// Blocking DTLS-PSK client handshake with a bounded number of attempts.
fn dtls_handshake(
    host: &str,
    identity: &str,
    secret: &[u8],
) -> Result<SslStream<UdpChannel>> {
    let ctx = psk_context(identity, secret)
        .map_err(|e| BridgeError::DtlsHandshake(e.to_string()))?;

    let mut last_error = String::new();
    for attempt in 1..=HANDSHAKE_ATTEMPTS {
        match dtls_attempt(&ctx, host) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!(
                    "DTLS handshake attempt {}/{} failed: {}",
                    attempt, HANDSHAKE_ATTEMPTS, e
                );
                last_error = e;
            }
        }
    }
    Err(BridgeError::DtlsHandshake(last_error))
}

fn dtls_attempt(ctx: &SslContext, host: &str) -> std::result::Result<SslStream<UdpChannel>, String> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).map_err(|e| e.to_string())?;
    socket
        .connect((host, STREAM_PORT))
        .map_err(|e| e.to_string())?;
    socket
        .set_read_timeout(Some(HANDSHAKE_TIMEOUT))
        .map_err(|e| e.to_string())?;
    socket
        .set_write_timeout(Some(HANDSHAKE_TIMEOUT))
        .map_err(|e| e.to_string())?;

    let ssl = Ssl::new(ctx).map_err(|e| e.to_string())?;
    ssl.connect(UdpChannel { socket })
        .map_err(|e| e.to_string())
}
