//! Bridge to a host-owned DSP engine.
//!
//! Produces no audio. Each accepted command is checked against a local
//! mirror of clip metadata and voice ownership, then relayed over a
//! `NativeTransport`: as `{type, payload}` envelopes when the host speaks the
//! envelope protocol, otherwise translated to legacy per-field messages.
//! Events polled from the host are parsed and queued for the facade.

pub mod legacy;
pub mod osc;
pub mod transport;

use std::collections::HashMap;

use squirrel_types::{
    AudioEvent, BackendKind, ClipId, ClipInfo, ClipRef, ClipSpec, Command, FollowActionArgs,
    JumpOpts, MarkerArgs, MarkerRef, MidiMapping, ParamTarget, PlayOpts, SetParamOpts,
    StopClipOpts, StopOpts, VoiceId, WireEnvelope,
};

use super::{AudioBackend, ClipTable};
use crate::config::{Config, NativeTransportKind};
use crate::error::{AudioError, AudioResult};
use osc::OscTransport;
use transport::{NativeTransport, OutboundMessage};

/// Bridge-side view of what the host holds.
#[derive(Debug, Clone, Default)]
pub struct Mirror {
    clips: ClipTable,
    voices: HashMap<VoiceId, ClipId>,
    /// Decoded length and rate reported by `clip_ready`.
    ready: HashMap<ClipId, (u64, u32)>,
}

impl Mirror {
    pub fn clips(&self) -> &ClipTable {
        &self.clips
    }

    pub fn clips_mut(&mut self) -> &mut ClipTable {
        &mut self.clips
    }

    pub fn voice_clip(&self, id: &VoiceId) -> Option<&ClipId> {
        self.voices.get(id)
    }

    pub fn adopt_voice(&mut self, id: VoiceId, clip_id: ClipId) {
        self.voices.insert(id, clip_id);
    }

    pub fn forget_voice(&mut self, id: &VoiceId) -> Option<ClipId> {
        self.voices.remove(id)
    }

    pub fn voice_count(&self) -> usize {
        self.voices.len()
    }

    /// A legacy host has a single transport, so stopping anything stops every voice.
    fn forget_all_voices(&mut self) {
        self.voices.clear();
    }

    fn voices_of(&self, clip_id: &ClipId) -> Vec<VoiceId> {
        let mut ids: Vec<VoiceId> =
            self.voices.iter().filter(|(_, c)| *c == clip_id).map(|(v, _)| v.clone()).collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    fn forget_clip(&mut self, clip_id: &ClipId) {
        self.voices.retain(|_, c| c != clip_id);
        self.ready.remove(clip_id);
    }

    /// Keep voice ownership in step with what the host reports.
    fn observe(&mut self, event: &AudioEvent) {
        match event {
            AudioEvent::VoiceStarted { clip_id, voice_id, .. } => {
                if self.clips.contains(clip_id) {
                    self.voices.insert(voice_id.clone(), clip_id.clone());
                }
            }
            AudioEvent::VoiceEnded { voice_id, .. } => {
                self.voices.remove(voice_id);
            }
            AudioEvent::ClipReady { clip_id, frames, sample_rate } => {
                self.ready.insert(clip_id.clone(), (*frames, *sample_rate));
            }
            _ => {}
        }
    }

    fn info(&self, id: &ClipId) -> Option<ClipInfo> {
        let spec = self.clips.get(id).ok()?;
        let ready = self.ready.get(id);
        Some(ClipInfo {
            id: id.clone(),
            mode: spec.mode,
            frames: ready.map(|r| r.0),
            sample_rate: ready.map(|r| r.1),
            ready: ready.is_some(),
            markers: spec.markers.clone(),
            sprites: spec.sprites.clone(),
            active_voices: self.voices_of(id),
        })
    }
}

pub struct NativeBridgeBackend {
    transport: Option<Box<dyn NativeTransport>>,
    mirror: Mirror,
    next_voice: u64,
    was_live: bool,
    events: Vec<AudioEvent>,
}

impl NativeBridgeBackend {
    pub fn new(transport: Box<dyn NativeTransport>) -> Self {
        let was_live = transport.is_live();
        Self { transport: Some(transport), mirror: Mirror::default(), next_voice: 0, was_live, events: Vec::new() }
    }

    /// A bridge with nothing to talk to; every command fails with `TransportUnavailable`.
    pub fn disconnected() -> Self {
        Self { transport: None, mirror: Mirror::default(), next_voice: 0, was_live: false, events: Vec::new() }
    }

    pub fn from_config(config: &Config) -> Self {
        match config.native_transport() {
            NativeTransportKind::None => Self::disconnected(),
            NativeTransportKind::Osc => {
                match OscTransport::connect(
                    &config.host_addr(),
                    &config.bind_addr(),
                    config.native_batch(),
                    config.handshake(),
                ) {
                    Ok(transport) => Self::new(Box::new(transport)),
                    Err(e) => {
                        log::warn!(target: "audio::native", "osc transport to {} unavailable: {}", config.host_addr(), e);
                        Self::disconnected()
                    }
                }
            }
        }
    }

    pub fn set_transport(&mut self, transport: Box<dyn NativeTransport>) {
        self.was_live = transport.is_live();
        self.transport = Some(transport);
    }

    pub fn mirror(&self) -> &Mirror {
        &self.mirror
    }

    fn require_live(&self) -> AudioResult {
        match &self.transport {
            Some(transport) if transport.is_live() => Ok(()),
            _ => Err(AudioError::TransportUnavailable),
        }
    }

    fn batch_capable(&self) -> bool {
        self.transport.as_ref().map_or(false, |t| t.supports_batch())
    }

    fn send(&mut self, message: OutboundMessage) -> AudioResult {
        match self.transport.as_mut() {
            Some(transport) if transport.is_live() => transport.send(&message),
            _ => Err(AudioError::TransportUnavailable),
        }
    }

    fn allocate_voice(&mut self, requested: Option<VoiceId>) -> VoiceId {
        if let Some(id) = requested {
            if self.mirror.voice_clip(&id).is_none() {
                return id;
            }
        }
        loop {
            self.next_voice += 1;
            let id = VoiceId::from_counter(self.next_voice);
            if self.mirror.voice_clip(&id).is_none() {
                return id;
            }
        }
    }

    fn voice_failed(&mut self, clip_id: &ClipId, voice_id: Option<VoiceId>, error: &AudioError) {
        log::warn!(target: "audio::native", "voice on {} rejected: {}", clip_id, error);
        self.events.push(AudioEvent::VoiceFailed { clip_id: clip_id.clone(), voice_id, error: error.to_string() });
    }

    fn stage_play(&mut self, mut opts: PlayOpts) -> AudioResult<(VoiceId, PlayOpts)> {
        if let Err(e) = self.mirror.clips.resolve_range(&opts.clip_id, opts.start.as_ref(), opts.end.as_ref()) {
            self.voice_failed(&opts.clip_id, None, &e);
            return Err(e);
        }
        let id = self.allocate_voice(opts.voice_id.take());
        opts.voice_id = Some(id.clone());
        self.mirror.adopt_voice(id.clone(), opts.clip_id.clone());
        Ok((id, opts))
    }

    /// Validate a command against the mirror and apply its effect there.
    fn stage(&mut self, command: Command) -> AudioResult<Command> {
        match command {
            Command::CreateClip(spec) => {
                self.mirror.clips.insert(spec.clone())?;
                Ok(Command::CreateClip(spec))
            }
            Command::DestroyClip(clip) => {
                self.mirror.clips.remove(&clip.id)?;
                self.mirror.forget_clip(&clip.id);
                Ok(Command::DestroyClip(clip))
            }
            Command::Play(opts) => self.stage_play(opts).map(|(_, opts)| Command::Play(opts)),
            Command::Stop(opts) => {
                self.mirror
                    .forget_voice(&opts.voice_id)
                    .ok_or_else(|| AudioError::UnknownVoice(opts.voice_id.clone()))?;
                Ok(Command::Stop(opts))
            }
            Command::StopClip(opts) => {
                self.mirror.clips.get(&opts.clip_id)?;
                for voice_id in self.mirror.voices_of(&opts.clip_id) {
                    self.mirror.forget_voice(&voice_id);
                }
                Ok(Command::StopClip(opts))
            }
            Command::Jump(opts) => {
                let Some(clip_id) = self.mirror.voice_clip(&opts.voice_id).cloned() else {
                    return Err(AudioError::UnknownVoice(opts.voice_id));
                };
                if let Err(e) = self.mirror.clips.resolve_jump(&clip_id, &opts.to) {
                    self.voice_failed(&clip_id, Some(opts.voice_id.clone()), &e);
                    return Err(e);
                }
                Ok(Command::Jump(opts))
            }
            Command::SetParam(opts) => {
                let scoped = || {
                    opts.id
                        .clone()
                        .ok_or_else(|| AudioError::InvalidArgument(format!("{:?} parameter needs an id", opts.target)))
                };
                match opts.target {
                    ParamTarget::Global => {}
                    ParamTarget::Clip => {
                        self.mirror.clips.get(&ClipId::new(scoped()?))?;
                    }
                    ParamTarget::Voice => {
                        let voice_id = VoiceId::new(scoped()?);
                        if self.mirror.voice_clip(&voice_id).is_none() {
                            return Err(AudioError::UnknownVoice(voice_id));
                        }
                    }
                }
                Ok(Command::SetParam(opts))
            }
            Command::AddMarker(args) => {
                self.mirror.clips.add_marker(&args)?;
                Ok(Command::AddMarker(args))
            }
            Command::RemoveMarker(args) => {
                self.mirror.clips.remove_marker(&args)?;
                Ok(Command::RemoveMarker(args))
            }
            Command::SetMarkerFollowActions(args) => {
                self.mirror.clips.set_follow_actions(&args)?;
                Ok(Command::SetMarkerFollowActions(args))
            }
            Command::ClearMarkerFollowActions(args) => {
                self.mirror.clips.clear_follow_actions(&args)?;
                Ok(Command::ClearMarkerFollowActions(args))
            }
            Command::MapMidi(_) | Command::QueryClip(_) => Ok(command),
        }
    }

    fn relay(&mut self, command: &Command) -> AudioResult {
        if self.batch_capable() {
            return self.send(OutboundMessage::Envelope(command.to_wire()?));
        }
        let messages = match legacy::translate(command, &self.mirror) {
            Ok(messages) => messages,
            Err(e @ AudioError::BackendTranslationGap(_)) => {
                log::warn!(target: "audio::native", "dropping {}: {}", command.name(), e);
                return Err(e);
            }
            Err(e) => return Err(e),
        };
        for message in messages {
            self.send(OutboundMessage::Legacy(message))?;
        }
        if matches!(command, Command::Stop(_) | Command::StopClip(_)) {
            self.mirror.forget_all_voices();
        }
        Ok(())
    }

    /// Stage, then relay. A command the transport did not take leaves the
    /// mirror as it was; a translation gap keeps the staged change.
    fn submit(&mut self, command: Command) -> AudioResult<Command> {
        self.require_live()?;
        let snapshot = self.mirror.clone();
        let staged = self.stage(command)?;
        if let Err(e) = self.relay(&staged) {
            if !matches!(e, AudioError::BackendTranslationGap(_)) {
                self.mirror = snapshot;
            }
            return Err(e);
        }
        Ok(staged)
    }
}

impl AudioBackend for NativeBridgeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn is_available(&self) -> bool {
        self.require_live().is_ok()
    }

    fn create_clip(&mut self, spec: ClipSpec) -> AudioResult {
        self.submit(Command::CreateClip(spec)).map(|_| ())
    }

    fn destroy_clip(&mut self, id: &ClipId) -> AudioResult {
        self.submit(Command::DestroyClip(ClipRef { id: id.clone() })).map(|_| ())
    }

    fn play(&mut self, opts: PlayOpts) -> AudioResult<VoiceId> {
        self.require_live()?;
        let snapshot = self.mirror.clone();
        let (id, opts) = self.stage_play(opts)?;
        let command = Command::Play(opts);
        if let Err(e) = self.relay(&command) {
            self.mirror = snapshot;
            return Err(e);
        }
        Ok(id)
    }

    fn stop(&mut self, opts: &StopOpts) -> AudioResult {
        self.submit(Command::Stop(opts.clone())).map(|_| ())
    }

    fn stop_clip(&mut self, opts: &StopClipOpts) -> AudioResult {
        self.submit(Command::StopClip(opts.clone())).map(|_| ())
    }

    fn jump(&mut self, opts: &JumpOpts) -> AudioResult {
        self.submit(Command::Jump(opts.clone())).map(|_| ())
    }

    fn set_param(&mut self, opts: &SetParamOpts) -> AudioResult {
        self.submit(Command::SetParam(opts.clone())).map(|_| ())
    }

    fn map_midi(&mut self, mapping: MidiMapping) -> AudioResult {
        self.submit(Command::MapMidi(mapping)).map(|_| ())
    }

    fn add_marker(&mut self, args: &MarkerArgs) -> AudioResult {
        self.submit(Command::AddMarker(args.clone())).map(|_| ())
    }

    fn remove_marker(&mut self, args: &MarkerRef) -> AudioResult {
        self.submit(Command::RemoveMarker(args.clone())).map(|_| ())
    }

    fn set_marker_follow_actions(&mut self, args: &FollowActionArgs) -> AudioResult {
        self.submit(Command::SetMarkerFollowActions(args.clone())).map(|_| ())
    }

    fn clear_marker_follow_actions(&mut self, args: &MarkerRef) -> AudioResult {
        self.submit(Command::ClearMarkerFollowActions(args.clone())).map(|_| ())
    }

    fn query_clip(&self, id: &ClipId) -> AudioResult<Option<ClipInfo>> {
        Ok(self.mirror.info(id))
    }

    fn pump(&mut self) {
        let Some(transport) = self.transport.as_mut() else {
            return;
        };
        let live = transport.is_live();
        if self.was_live && !live {
            log::warn!(target: "audio::native", "native host went away");
        }
        self.was_live = live;
        for envelope in transport.poll() {
            let event = AudioEvent::from_wire(envelope);
            self.mirror.observe(&event);
            self.events.push(event);
        }
    }

    fn drain_events(&mut self) -> Vec<AudioEvent> {
        std::mem::take(&mut self.events)
    }

    /// One `batch` envelope per frame when the host supports it; otherwise
    /// each command is translated on its own.
    fn dispatch_batch(&mut self, batch: Vec<Command>) -> AudioResult {
        self.require_live()?;
        if !self.batch_capable() {
            for command in batch {
                let name = command.name();
                if let Err(e) = self.submit(command) {
                    log::warn!(target: "audio::native", "batched {} failed: {}", name, e);
                }
            }
            return Ok(());
        }

        let snapshot = self.mirror.clone();
        let mut accepted = Vec::with_capacity(batch.len());
        for command in batch {
            let name = command.name();
            match self.stage(command) {
                Ok(staged) => accepted.push(staged),
                Err(e) => log::warn!(target: "audio::native", "batched {} rejected: {}", name, e),
            }
        }
        if accepted.is_empty() {
            return Ok(());
        }
        let envelope = WireEnvelope::batch(&accepted)?;
        if let Err(e) = self.send(OutboundMessage::Envelope(envelope)) {
            self.mirror = snapshot;
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use squirrel_types::{EndReason, StartPos};
    use transport::ChannelTransport;

    #[test]
    fn mirror_follows_host_voice_events() {
        let mut mirror = Mirror::default();
        mirror.clips_mut().insert(ClipSpec::new("c1", "a.wav")).unwrap();
        mirror.observe(&AudioEvent::VoiceStarted {
            clip_id: "c1".into(),
            voice_id: "host-7".into(),
            start_frame: 0,
            at: 0.0,
        });
        assert_eq!(mirror.voice_clip(&"host-7".into()), Some(&ClipId::new("c1")));
        mirror.observe(&AudioEvent::VoiceEnded {
            clip_id: "c1".into(),
            voice_id: "host-7".into(),
            reason: EndReason::Finished,
        });
        assert_eq!(mirror.voice_count(), 0);
    }

    #[test]
    fn play_carries_the_allocated_voice_id() {
        let (transport, host) = ChannelTransport::pair(true);
        let mut bridge = NativeBridgeBackend::new(Box::new(transport));
        bridge.create_clip(ClipSpec::new("c1", "a.wav").with_marker("A", 48_000)).unwrap();
        let voice = bridge.play(PlayOpts::new("c1").at(StartPos::Marker { marker: "A".into() })).unwrap();

        let sent = host.received();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1]["type"], "play");
        assert_eq!(sent[1]["payload"]["voice_id"], json!(voice.as_str()));
        assert_eq!(sent[1]["payload"]["start"], json!({ "marker": "A" }));
    }

    #[test]
    fn unresolved_marker_is_rejected_locally() {
        let (transport, host) = ChannelTransport::pair(true);
        let mut bridge = NativeBridgeBackend::new(Box::new(transport));
        bridge.create_clip(ClipSpec::new("c1", "a.wav")).unwrap();
        host.received();

        let err = bridge.play(PlayOpts::new("c1").at(StartPos::Marker { marker: "nope".into() })).unwrap_err();
        assert!(matches!(err, AudioError::UnresolvedReference { .. }));
        assert!(host.received().is_empty());
        let events = bridge.drain_events();
        assert!(matches!(events.as_slice(), [AudioEvent::VoiceFailed { voice_id: None, .. }]));
    }

    #[test]
    fn without_transport_everything_is_unavailable() {
        let mut bridge = NativeBridgeBackend::disconnected();
        assert!(!bridge.is_available());
        assert_eq!(bridge.create_clip(ClipSpec::new("c1", "a.wav")), Err(AudioError::TransportUnavailable));
        assert_eq!(bridge.play(PlayOpts::new("c1")), Err(AudioError::TransportUnavailable));
        assert_eq!(bridge.dispatch_batch(Vec::new()), Err(AudioError::TransportUnavailable));
    }
}
