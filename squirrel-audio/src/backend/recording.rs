//! Backend that records every call for assertions.
//!
//! The facade owns the `RecordingBackend` as a `Box<dyn AudioBackend>` while
//! the test keeps the `Arc<Recorder>` to inspect what arrived and to inject
//! events as if the engine had produced them.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use squirrel_types::{
    AudioEvent, BackendKind, ClipId, ClipInfo, ClipRef, ClipSpec, Command, FollowActionArgs,
    JumpOpts, MarkerArgs, MarkerRef, MidiMapping, PlayOpts, SetParamOpts, StopClipOpts, StopOpts,
    VoiceId,
};

use super::AudioBackend;
use crate::error::{AudioError, AudioResult};

/// A call recorded by `RecordingBackend`.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordedOp {
    Call(Command),
    Batch(Vec<Command>),
    Midi(Vec<u8>),
    Pump,
}

#[derive(Default)]
pub struct Recorder {
    ops: Mutex<Vec<RecordedOp>>,
    pending: Mutex<Vec<AudioEvent>>,
    failing: Mutex<Vec<&'static str>>,
    available: AtomicBool,
    next_voice: AtomicU64,
}

impl Recorder {
    /// Return all recorded operations.
    pub fn operations(&self) -> Vec<RecordedOp> {
        locked(&self.ops).clone()
    }

    pub fn clear(&self) {
        locked(&self.ops).clear();
    }

    /// Count operations matching a predicate.
    pub fn count<F: Fn(&RecordedOp) -> bool>(&self, f: F) -> usize {
        locked(&self.ops).iter().filter(|op| f(op)).count()
    }

    pub fn find<F: Fn(&RecordedOp) -> bool>(&self, f: F) -> Option<RecordedOp> {
        locked(&self.ops).iter().find(|op| f(op)).cloned()
    }

    /// All `dispatch_batch` payloads, in call order.
    pub fn batches(&self) -> Vec<Vec<Command>> {
        locked(&self.ops)
            .iter()
            .filter_map(|op| match op {
                RecordedOp::Batch(batch) => Some(batch.clone()),
                _ => None,
            })
            .collect()
    }

    /// Queue an event for the next `drain_events`.
    pub fn push_event(&self, event: AudioEvent) {
        locked(&self.pending).push(event);
    }

    /// Make every later call of `name` fail.
    pub fn fail_on(&self, name: &'static str) {
        locked(&self.failing).push(name);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn record(&self, command: Command) -> AudioResult {
        let name = command.name();
        locked(&self.ops).push(RecordedOp::Call(command));
        if locked(&self.failing).contains(&name) {
            return Err(AudioError::InvalidArgument(format!("{} rejected by recorder", name)));
        }
        Ok(())
    }
}

pub struct RecordingBackend {
    kind: BackendKind,
    recorder: Arc<Recorder>,
}

impl RecordingBackend {
    pub fn new(kind: BackendKind) -> (Self, Arc<Recorder>) {
        let recorder = Arc::new(Recorder::default());
        recorder.set_available(true);
        (Self { kind, recorder: Arc::clone(&recorder) }, recorder)
    }
}

impl AudioBackend for RecordingBackend {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    fn is_available(&self) -> bool {
        self.recorder.available.load(Ordering::SeqCst)
    }

    fn create_clip(&mut self, spec: ClipSpec) -> AudioResult {
        self.recorder.record(Command::CreateClip(spec))
    }

    fn destroy_clip(&mut self, id: &ClipId) -> AudioResult {
        self.recorder.record(Command::DestroyClip(ClipRef { id: id.clone() }))
    }

    fn play(&mut self, opts: PlayOpts) -> AudioResult<VoiceId> {
        self.recorder.record(Command::Play(opts))?;
        let n = self.recorder.next_voice.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(VoiceId::from_counter(n))
    }

    fn stop(&mut self, opts: &StopOpts) -> AudioResult {
        self.recorder.record(Command::Stop(opts.clone()))
    }

    fn stop_clip(&mut self, opts: &StopClipOpts) -> AudioResult {
        self.recorder.record(Command::StopClip(opts.clone()))
    }

    fn jump(&mut self, opts: &JumpOpts) -> AudioResult {
        self.recorder.record(Command::Jump(opts.clone()))
    }

    fn set_param(&mut self, opts: &SetParamOpts) -> AudioResult {
        self.recorder.record(Command::SetParam(opts.clone()))
    }

    fn map_midi(&mut self, mapping: MidiMapping) -> AudioResult {
        self.recorder.record(Command::MapMidi(mapping))
    }

    fn add_marker(&mut self, args: &MarkerArgs) -> AudioResult {
        self.recorder.record(Command::AddMarker(args.clone()))
    }

    fn remove_marker(&mut self, args: &MarkerRef) -> AudioResult {
        self.recorder.record(Command::RemoveMarker(args.clone()))
    }

    fn set_marker_follow_actions(&mut self, args: &FollowActionArgs) -> AudioResult {
        self.recorder.record(Command::SetMarkerFollowActions(args.clone()))
    }

    fn clear_marker_follow_actions(&mut self, args: &MarkerRef) -> AudioResult {
        self.recorder.record(Command::ClearMarkerFollowActions(args.clone()))
    }

    fn query_clip(&self, id: &ClipId) -> AudioResult<Option<ClipInfo>> {
        self.recorder.record(Command::QueryClip(ClipRef { id: id.clone() }))?;
        Ok(None)
    }

    fn midi_input(&mut self, data: &[u8]) -> AudioResult {
        locked(&self.recorder.ops).push(RecordedOp::Midi(data.to_vec()));
        Ok(())
    }

    fn pump(&mut self) {
        locked(&self.recorder.ops).push(RecordedOp::Pump);
    }

    fn drain_events(&mut self) -> Vec<AudioEvent> {
        std::mem::take(&mut *locked(&self.recorder.pending))
    }

    fn dispatch_batch(&mut self, batch: Vec<Command>) -> AudioResult {
        locked(&self.recorder.ops).push(RecordedOp::Batch(batch));
        Ok(())
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
