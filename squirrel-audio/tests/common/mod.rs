#![allow(dead_code)]
//! Test harness utilities for squirrel-audio integration tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use squirrel_audio::backend::fallback::decode::{ClipLoader, DecodedClip};
use squirrel_audio::backend::fallback::mixer;
use squirrel_audio::{
    AudioBackend, AudioError, AudioFacade, AudioResult, BusEvent, ChannelTransport, ClockMode,
    FallbackBackend, HostEndpoint, NativeBridgeBackend, NativeTransport, OutboundMessage, Topic,
};
use squirrel_types::{AudioEvent, ClipId, EventKind, WireEnvelope};

pub const RATE: u32 = 48_000;

/// Serves synthetic clips by locator; anything else fails to decode.
#[derive(Default, Clone)]
pub struct MemoryLoader {
    clips: HashMap<String, Arc<DecodedClip>>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mono clip of `frames` frames holding a constant 0.5.
    pub fn with_clip(mut self, locator: &str, frames: usize) -> Self {
        self.clips.insert(locator.to_string(), Arc::new(DecodedClip::new(vec![0.5; frames], 1, RATE)));
        self
    }
}

impl ClipLoader for MemoryLoader {
    fn load(&self, locator: &str) -> AudioResult<DecodedClip> {
        self.clips
            .get(locator)
            .map(|clip| (**clip).clone())
            .ok_or_else(|| AudioError::DecodeFailure { locator: locator.to_string(), reason: "no such clip".into() })
    }
}

/// Fallback on a manually advanced clock with deterministic follow-action rolls.
pub fn fallback(loader: MemoryLoader) -> FallbackBackend {
    let mut backend = FallbackBackend::new(RATE, Box::new(loader), 16).unwrap().with_seed(7);
    backend.set_clock(ClockMode::External);
    backend
}

/// The clips most tests use: `kick.wav` two seconds long, `pad.wav` one second.
pub fn standard_loader() -> MemoryLoader {
    MemoryLoader::new().with_clip("kick.wav", 2 * RATE as usize).with_clip("pad.wav", RATE as usize)
}

/// Render `frames` frames of the fallback's mixer.
pub fn advance(backend: &FallbackBackend, frames: u64) {
    mixer::lock(&backend.mixer()).advance(frames);
}

/// Pump until the collected events satisfy `done`, or panic after `timeout`.
pub fn pump_until<F>(backend: &mut dyn AudioBackend, timeout: Duration, done: F) -> Vec<AudioEvent>
where
    F: Fn(&[AudioEvent]) -> bool,
{
    let start = Instant::now();
    let mut events = Vec::new();
    loop {
        backend.pump();
        events.extend(backend.drain_events());
        if done(&events) {
            return events;
        }
        if Instant::now().duration_since(start) > timeout {
            panic!("Timed out pumping {} backend; got {:?}", backend.kind(), events);
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

/// Pump until `clip_ready` (or `decode_failed`) for `clip` arrives.
pub fn wait_decoded(backend: &mut dyn AudioBackend, clip: &str) -> Vec<AudioEvent> {
    pump_until(backend, Duration::from_secs(5), |events| {
        events.iter().any(|e| match e {
            AudioEvent::ClipReady { clip_id, .. } | AudioEvent::DecodeFailed { clip_id, .. } => {
                clip_id.as_str() == clip
            }
            _ => false,
        })
    })
}

/// Pump until `clip` reports ready. Events stay queued in the backend.
pub fn wait_ready(backend: &mut dyn AudioBackend, clip: &str) {
    let id = ClipId::new(clip);
    let start = Instant::now();
    loop {
        backend.pump();
        if backend.query_clip(&id).ok().flatten().map_or(false, |info| info.ready) {
            return;
        }
        if Instant::now().duration_since(start) > Duration::from_secs(5) {
            panic!("Timed out waiting for clip {} to decode", clip);
        }
        std::thread::sleep(Duration::from_millis(2));
    }
}

pub fn count_kind(events: &[AudioEvent], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

/// Subscribe and collect everything delivered on `topic`.
pub fn collect(facade: &mut AudioFacade, topic: Topic) -> Arc<Mutex<Vec<BusEvent>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&log);
    facade.subscribe(topic, move |event| sink.lock().unwrap().push(event.clone()));
    log
}

pub fn kinds(log: &Arc<Mutex<Vec<BusEvent>>>) -> Vec<EventKind> {
    log.lock().unwrap().iter().map(|e| e.event.kind()).collect()
}

/// Native bridge over an in-process channel to a fake host.
pub fn native(batch: bool) -> (NativeBridgeBackend, HostEndpoint) {
    let (transport, host) = ChannelTransport::pair(batch);
    (NativeBridgeBackend::new(Box::new(transport)), host)
}

/// Channel transport whose sends can be made to fail while it stays live.
pub struct FlakyTransport {
    inner: ChannelTransport,
    failing: Arc<AtomicBool>,
}

impl NativeTransport for FlakyTransport {
    fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    fn supports_batch(&self) -> bool {
        self.inner.supports_batch()
    }

    fn send(&mut self, message: &OutboundMessage) -> AudioResult {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AudioError::Transport("message too long".into()));
        }
        self.inner.send(message)
    }

    fn poll(&mut self) -> Vec<WireEnvelope> {
        self.inner.poll()
    }
}

/// Native bridge over a `FlakyTransport`; the flag switches send failures on and off.
pub fn flaky_native(batch: bool) -> (NativeBridgeBackend, HostEndpoint, Arc<AtomicBool>) {
    let (inner, host) = ChannelTransport::pair(batch);
    let failing = Arc::new(AtomicBool::new(false));
    let transport = FlakyTransport { inner, failing: Arc::clone(&failing) };
    (NativeBridgeBackend::new(Box::new(transport)), host, failing)
}

pub fn write_wav(path: &Path, frames: usize, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let s = ((i as f32 / 20.0).sin() * 8000.0) as i16;
        writer.write_sample(s).unwrap();
        writer.write_sample(s).unwrap();
    }
    writer.finalize().unwrap();
}
