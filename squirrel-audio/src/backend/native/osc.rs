//! OSC over UDP transport to an out-of-process host.
//!
//! Envelopes travel as a single JSON string argument at `/squirrel/av`.
//! Legacy messages map onto `/param <id> <value>` and `/iplug <action> <path>`.
//! The host answers with JSON envelopes at `/squirrel/event`, which a receive
//! thread decodes and queues for `poll`.
//!
//! A bound socket says nothing about the host, so the transport only counts
//! as live once something arrives at `/squirrel/event`. `connect` sends a
//! `hello` envelope and waits up to the handshake for the reply; while the
//! host stays silent, `poll` repeats the hello once per `HELLO_INTERVAL`.

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use rosc::{OscMessage, OscPacket, OscType};
use serde_json::json;
use squirrel_types::WireEnvelope;

use super::legacy::LegacyMessage;
use super::transport::{NativeTransport, OutboundMessage};
use crate::error::{AudioError, AudioResult};

pub const ENVELOPE_ADDR: &str = "/squirrel/av";
pub const EVENT_ADDR: &str = "/squirrel/event";
const PARAM_ADDR: &str = "/param";
const IPLUG_ADDR: &str = "/iplug";
pub const HELLO: &str = "hello";
const HELLO_INTERVAL: Duration = Duration::from_secs(1);

pub struct OscTransport {
    socket: UdpSocket,
    host_addr: SocketAddr,
    inbound: Receiver<WireEnvelope>,
    running: Arc<AtomicBool>,
    host_seen: Arc<AtomicBool>,
    last_hello: Instant,
    batch: bool,
    recv_thread: Option<JoinHandle<()>>,
}

impl OscTransport {
    pub fn connect(host_addr: &str, bind_addr: &str, batch: bool, handshake: Duration) -> std::io::Result<Self> {
        let host_addr = host_addr.to_socket_addrs()?.next().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("no address for {}", host_addr))
        })?;
        let socket = UdpSocket::bind(bind_addr)?;

        let recv_socket = socket.try_clone()?;
        recv_socket.set_read_timeout(Some(Duration::from_millis(50)))?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let host_seen = Arc::new(AtomicBool::new(false));
        let (flag, seen) = (Arc::clone(&running), Arc::clone(&host_seen));
        let handle = thread::Builder::new()
            .name("osc-recv".into())
            .spawn(move || receive_loop(recv_socket, tx, flag, seen))?;

        log::info!(target: "audio::native", "osc transport {} -> {}", socket.local_addr()?, host_addr);
        let mut transport = Self {
            socket,
            host_addr,
            inbound: rx,
            running,
            host_seen,
            last_hello: Instant::now(),
            batch,
            recv_thread: Some(handle),
        };
        transport.say_hello();

        let deadline = Instant::now() + handshake;
        while !transport.is_live() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        if !transport.is_live() {
            log::info!(target: "audio::native", "no answer from native host at {}", host_addr);
        }
        Ok(transport)
    }

    fn say_hello(&mut self) {
        self.last_hello = Instant::now();
        let hello = WireEnvelope::new(HELLO, json!({ "batch": self.batch }));
        let sent = to_packet(&OutboundMessage::Envelope(hello))
            .and_then(|packet| rosc::encoder::encode(&packet).map_err(|e| AudioError::Transport(e.to_string())))
            .and_then(|buf| self.socket.send_to(&buf, self.host_addr).map_err(AudioError::from));
        if let Err(e) = sent {
            log::debug!(target: "audio::native", "hello to {} failed: {}", self.host_addr, e);
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn host_addr(&self) -> SocketAddr {
        self.host_addr
    }
}

impl NativeTransport for OscTransport {
    fn is_live(&self) -> bool {
        self.running.load(Ordering::SeqCst) && self.host_seen.load(Ordering::SeqCst)
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    fn send(&mut self, message: &OutboundMessage) -> AudioResult {
        if !self.is_live() {
            return Err(AudioError::TransportUnavailable);
        }
        let packet = to_packet(message)?;
        let buf = rosc::encoder::encode(&packet).map_err(|e| AudioError::Transport(e.to_string()))?;
        self.socket.send_to(&buf, self.host_addr)?;
        Ok(())
    }

    fn poll(&mut self) -> Vec<WireEnvelope> {
        if !self.host_seen.load(Ordering::SeqCst)
            && self.running.load(Ordering::SeqCst)
            && self.last_hello.elapsed() >= HELLO_INTERVAL
        {
            self.say_hello();
        }
        self.inbound.try_iter().collect()
    }
}

impl Drop for OscTransport {
    fn drop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.recv_thread.take() {
            let _ = handle.join();
        }
    }
}

pub fn to_packet(message: &OutboundMessage) -> AudioResult<OscPacket> {
    let (addr, args) = match message {
        OutboundMessage::Envelope(envelope) => {
            (ENVELOPE_ADDR, vec![OscType::String(serde_json::to_string(envelope)?)])
        }
        OutboundMessage::Legacy(LegacyMessage::Param { id, value }) => {
            (PARAM_ADDR, vec![OscType::String(id.as_str().to_string()), OscType::Float(*value as f32)])
        }
        OutboundMessage::Legacy(LegacyMessage::Iplug { action, relative_path }) => {
            (IPLUG_ADDR, vec![OscType::String(action.clone()), OscType::String(relative_path.clone())])
        }
    };
    Ok(OscPacket::Message(OscMessage { addr: addr.to_string(), args }))
}

fn receive_loop(socket: UdpSocket, tx: Sender<WireEnvelope>, running: Arc<AtomicBool>, seen: Arc<AtomicBool>) {
    let mut buf = [0u8; 65_536];
    while running.load(Ordering::SeqCst) {
        match socket.recv(&mut buf) {
            Ok(n) => match rosc::decoder::decode_udp(&buf[..n]) {
                Ok((_, packet)) => handle_packet(&packet, &tx, &seen),
                Err(e) => log::debug!(target: "audio::native", "undecodable osc packet: {:?}", e),
            },
            Err(ref e)
                if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue
            }
            Err(e) => {
                log::warn!(target: "audio::native", "osc receive failed: {}", e);
                break;
            }
        }
    }
    running.store(false, Ordering::SeqCst);
}

/// Recursively unpack bundles and queue every event envelope except the
/// host's hello reply.
fn handle_packet(packet: &OscPacket, tx: &Sender<WireEnvelope>, seen: &AtomicBool) {
    match packet {
        OscPacket::Message(msg) if msg.addr == EVENT_ADDR => match msg.args.first() {
            Some(OscType::String(json)) => match serde_json::from_str::<WireEnvelope>(json) {
                Ok(envelope) => {
                    if !seen.swap(true, Ordering::SeqCst) {
                        log::info!(target: "audio::native", "native host answered");
                    }
                    if envelope.kind != HELLO {
                        let _ = tx.send(envelope);
                    }
                }
                Err(e) => log::warn!(target: "audio::native", "bad event envelope: {}", e),
            },
            _ => log::debug!(target: "audio::native", "{} without a json argument", EVENT_ADDR),
        },
        OscPacket::Message(msg) => {
            log::trace!(target: "audio::native", "ignoring osc message {}", msg.addr);
        }
        OscPacket::Bundle(bundle) => {
            for p in &bundle.content {
                handle_packet(p, tx, seen);
            }
        }
    }
}
