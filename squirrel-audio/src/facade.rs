//! The facade callers talk to.
//!
//! `play`, `jump` and `set_param` go straight to the active backend. Every
//! other mutating call is queued and handed over once per frame by `tick`
//! as a single `dispatch_batch`. The facade holds no audio state itself:
//! clips and voices live in the backends, which is what makes swapping the
//! active backend safe.

use squirrel_types::{
    AudioEvent, BackendKind, ClipId, ClipInfo, ClipRef, ClipSpec, Command, FollowActionArgs,
    JumpOpts, MarkerArgs, MarkerRef, MidiMapping, PlayOpts, SetParamOpts, StopClipOpts, StopOpts,
    VoiceId,
};

use crate::backend::{AudioBackend, Outcome};
use crate::bus::{BusEvent, EventBus, SubscriptionId, Topic};
use crate::error::{AudioError, AudioResult};

#[derive(Default)]
pub struct AudioFacade {
    backends: Vec<Box<dyn AudioBackend>>,
    active: Option<usize>,
    queue: Vec<Command>,
    bus: EventBus,
}

impl AudioFacade {
    pub fn new() -> Self {
        Self::default()
    }

    // ─── Backends ───────────────────────────────────────────────────

    /// Add a backend, replacing (and returning) one of the same kind.
    pub fn register_backend(&mut self, backend: Box<dyn AudioBackend>) -> Option<Box<dyn AudioBackend>> {
        let kind = backend.kind();
        match self.backends.iter().position(|b| b.kind() == kind) {
            Some(index) => Some(std::mem::replace(&mut self.backends[index], backend)),
            None => {
                self.backends.push(backend);
                None
            }
        }
    }

    pub fn has_backend(&self, kind: BackendKind) -> bool {
        self.backends.iter().any(|b| b.kind() == kind)
    }

    pub fn active_backend(&self) -> Option<BackendKind> {
        self.active.map(|index| self.backends[index].kind())
    }

    pub fn backend(&self, kind: BackendKind) -> Option<&dyn AudioBackend> {
        self.backends.iter().find(|b| b.kind() == kind).map(|b| b.as_ref())
    }

    /// Make `kind` the active backend and publish `backend_changed`.
    ///
    /// Nothing is migrated: clips and voices stay with the backend that
    /// created them. Events the previous backend had not delivered yet are
    /// discarded. Queued commands stay queued and go to the new backend.
    pub fn set_backend(&mut self, kind: BackendKind) -> AudioResult {
        let Some(index) = self.backends.iter().position(|b| b.kind() == kind) else {
            let err = AudioError::UnknownBackend(kind);
            log::warn!(target: "audio::facade", "set_backend: {}", err);
            return Err(err);
        };
        let previous = self.active_backend();
        if let Some(old) = self.active.filter(|&old| old != index) {
            let dropped = self.backends[old].drain_events().len();
            if dropped > 0 {
                log::debug!(target: "audio::facade", "discarded {} undelivered {} events", dropped, self.backends[old].kind());
            }
        }
        self.active = Some(index);
        log::info!(target: "audio::facade", "audio backend: {}", kind);
        self.bus.emit(Some(kind), AudioEvent::BackendChanged { backend: kind, previous });
        Ok(())
    }

    /// Activate the first registered, available backend in `order`. With
    /// none available, no backend is active afterwards.
    pub fn detect_and_set_backend(&mut self, order: &[BackendKind]) -> Option<BackendKind> {
        let found = order
            .iter()
            .copied()
            .find(|&kind| self.backend(kind).map_or(false, |b| b.is_available()));
        match found {
            Some(kind) => self.set_backend(kind).ok().map(|_| kind),
            None => {
                log::warn!(target: "audio::facade", "no available audio backend among {:?}", order);
                self.active = None;
                None
            }
        }
    }

    fn active_mut(&mut self) -> AudioResult<&mut Box<dyn AudioBackend>> {
        match self.active {
            Some(index) => Ok(&mut self.backends[index]),
            None => Err(AudioError::NoActiveBackend),
        }
    }

    // ─── Events ─────────────────────────────────────────────────────

    pub fn subscribe<F>(&mut self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: FnMut(&BusEvent) + Send + 'static,
    {
        self.bus.subscribe(topic, handler)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    // ─── Commands ───────────────────────────────────────────────────

    /// Route a command by its latency class: immediate commands and queries
    /// run now, the rest wait for the next `tick`.
    pub fn submit(&mut self, command: Command) -> AudioResult<Outcome> {
        let name = command.name();
        let result = if command.is_immediate() || command.is_query() {
            self.active_mut().and_then(|backend| backend.apply(command))
        } else {
            self.enqueue(command).map(|_| Outcome::Accepted)
        };
        if let Err(e) = &result {
            log::warn!(target: "audio::facade", "{} failed: {}", name, e);
        }
        result
    }

    fn enqueue(&mut self, command: Command) -> AudioResult {
        if self.active.is_none() {
            return Err(AudioError::NoActiveBackend);
        }
        self.queue.push(command);
        Ok(())
    }

    fn queued(&mut self, command: Command) -> AudioResult {
        self.submit(command).map(|_| ())
    }

    pub fn create_clip(&mut self, spec: ClipSpec) -> AudioResult {
        self.queued(Command::CreateClip(spec))
    }

    pub fn destroy_clip(&mut self, id: &ClipId) -> AudioResult {
        self.queued(Command::DestroyClip(ClipRef { id: id.clone() }))
    }

    pub fn play(&mut self, opts: PlayOpts) -> AudioResult<VoiceId> {
        match self.submit(Command::Play(opts))? {
            Outcome::Voice(id) => Ok(id),
            other => Err(AudioError::InvalidArgument(format!("play produced {:?}", other))),
        }
    }

    pub fn stop(&mut self, opts: StopOpts) -> AudioResult {
        self.queued(Command::Stop(opts))
    }

    pub fn stop_clip(&mut self, opts: StopClipOpts) -> AudioResult {
        self.queued(Command::StopClip(opts))
    }

    pub fn jump(&mut self, opts: JumpOpts) -> AudioResult {
        self.submit(Command::Jump(opts)).map(|_| ())
    }

    pub fn set_param(&mut self, opts: SetParamOpts) -> AudioResult {
        self.submit(Command::SetParam(opts)).map(|_| ())
    }

    pub fn map_midi(&mut self, mapping: MidiMapping) -> AudioResult {
        self.queued(Command::MapMidi(mapping))
    }

    pub fn add_marker(&mut self, args: MarkerArgs) -> AudioResult {
        self.queued(Command::AddMarker(args))
    }

    pub fn remove_marker(&mut self, args: MarkerRef) -> AudioResult {
        self.queued(Command::RemoveMarker(args))
    }

    pub fn set_marker_follow_actions(&mut self, args: FollowActionArgs) -> AudioResult {
        self.queued(Command::SetMarkerFollowActions(args))
    }

    pub fn clear_marker_follow_actions(&mut self, args: MarkerRef) -> AudioResult {
        self.queued(Command::ClearMarkerFollowActions(args))
    }

    /// Answered by the active backend right away; commands still queued for
    /// this frame are not reflected.
    pub fn query_clip(&mut self, id: &ClipId) -> AudioResult<Option<ClipInfo>> {
        match self.submit(Command::QueryClip(ClipRef { id: id.clone() }))? {
            Outcome::Clip(info) => Ok(info),
            other => Err(AudioError::InvalidArgument(format!("query_clip produced {:?}", other))),
        }
    }

    /// Raw MIDI from an input port, handed to the active backend now.
    pub fn midi_input(&mut self, data: &[u8]) -> AudioResult {
        let result = self.active_mut().and_then(|backend| backend.midi_input(data));
        if let Err(e) = &result {
            log::warn!(target: "audio::facade", "midi input failed: {}", e);
        }
        result
    }

    // ─── Frame ──────────────────────────────────────────────────────

    pub fn pending_commands(&self) -> usize {
        self.queue.len()
    }

    /// Hand the queued commands to the active backend as one batch. Does
    /// nothing when the queue is empty.
    pub fn flush(&mut self) -> AudioResult {
        if self.queue.is_empty() {
            return Ok(());
        }
        let Some(index) = self.active else {
            log::warn!(target: "audio::facade", "{} queued commands wait for a backend", self.queue.len());
            return Err(AudioError::NoActiveBackend);
        };
        let batch = std::mem::take(&mut self.queue);
        let count = batch.len();
        let backend = &mut self.backends[index];
        if let Err(e) = backend.dispatch_batch(batch) {
            log::warn!(target: "audio::facade", "{} backend dropped a batch of {}: {}", backend.kind(), count, e);
            return Err(e);
        }
        Ok(())
    }

    /// One frame: flush the queue, let the active backend make progress and
    /// publish what it produced. Returns the number of events published.
    pub fn tick(&mut self) -> usize {
        let _ = self.flush();
        let Some(index) = self.active else {
            return 0;
        };
        let backend = &mut self.backends[index];
        backend.pump();
        let origin = backend.kind();
        let events = backend.drain_events();
        let count = events.len();
        for event in events {
            self.bus.emit(Some(origin), event);
        }
        count
    }
}
