//! Native transport abstraction and the in-process channel transport.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use serde_json::Value;
use squirrel_types::{AudioEvent, WireEnvelope};

use super::legacy::LegacyMessage;
use crate::error::{AudioError, AudioResult};

/// One message handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundMessage {
    /// `{type, payload}`; a single command or a `batch`.
    Envelope(WireEnvelope),
    /// Per-field message for hosts without the envelope protocol.
    Legacy(LegacyMessage),
}

impl OutboundMessage {
    pub fn to_json(&self) -> AudioResult<Value> {
        let value = match self {
            OutboundMessage::Envelope(envelope) => serde_json::to_value(envelope)?,
            OutboundMessage::Legacy(message) => serde_json::to_value(message)?,
        };
        Ok(value)
    }
}

/// Send/poll primitives offered by the environment hosting the DSP engine.
///
/// Implementations must never block: `send` hands the message off, `poll`
/// returns whatever arrived since the last call.
pub trait NativeTransport: Send {
    fn is_live(&self) -> bool;

    /// Whether the host understands `{type, payload}` envelopes (and `batch`).
    fn supports_batch(&self) -> bool;

    fn send(&mut self, message: &OutboundMessage) -> AudioResult;

    fn poll(&mut self) -> Vec<WireEnvelope>;
}

/// Transport over crossbeam channels to a `HostEndpoint` in the same process.
pub struct ChannelTransport {
    outbound: Sender<Value>,
    inbound: Receiver<WireEnvelope>,
    alive: Arc<AtomicBool>,
    batch: bool,
}

/// The host side of a `ChannelTransport`. Dropping it takes the transport offline.
pub struct HostEndpoint {
    received: Receiver<Value>,
    events: Sender<WireEnvelope>,
    alive: Arc<AtomicBool>,
}

impl ChannelTransport {
    pub fn pair(batch: bool) -> (ChannelTransport, HostEndpoint) {
        let (out_tx, out_rx) = crossbeam_channel::unbounded();
        let (in_tx, in_rx) = crossbeam_channel::unbounded();
        let alive = Arc::new(AtomicBool::new(true));
        let transport = ChannelTransport {
            outbound: out_tx,
            inbound: in_rx,
            alive: Arc::clone(&alive),
            batch,
        };
        let endpoint = HostEndpoint { received: out_rx, events: in_tx, alive };
        (transport, endpoint)
    }
}

impl NativeTransport for ChannelTransport {
    fn is_live(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn supports_batch(&self) -> bool {
        self.batch
    }

    fn send(&mut self, message: &OutboundMessage) -> AudioResult {
        if !self.is_live() {
            return Err(AudioError::TransportUnavailable);
        }
        self.outbound
            .send(message.to_json()?)
            .map_err(|_| AudioError::TransportUnavailable)
    }

    fn poll(&mut self) -> Vec<WireEnvelope> {
        self.inbound.try_iter().collect()
    }
}

impl HostEndpoint {
    /// Messages sent by the bridge since the last call, as JSON.
    pub fn received(&self) -> Vec<Value> {
        self.received.try_iter().collect()
    }

    pub fn emit(&self, envelope: WireEnvelope) {
        let _ = self.events.send(envelope);
    }

    /// Emit a typed event the way a host would serialise it.
    pub fn emit_event(&self, event: &AudioEvent) -> AudioResult {
        self.emit(event.to_wire()?);
        Ok(())
    }

    pub fn disconnect(&self) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

impl Drop for HostEndpoint {
    fn drop(&mut self) {
        self.disconnect();
    }
}
