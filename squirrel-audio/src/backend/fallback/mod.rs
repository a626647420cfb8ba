//! In-process fallback engine.
//!
//! Used when no native host is reachable. Clips decode on a worker thread,
//! voices are scheduled on the software mixer's clock, and `pump` turns
//! mixer progress into `voice_ended`, `marker_hit` and follow-action events.
//! Timing is best-effort: markers are detected at pump granularity.

pub mod decode;
pub mod mixer;
pub mod output;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use squirrel_types::{
    db_to_gain, AudioEvent, BackendKind, ClipId, ClipInfo, ClipSpec, EndReason, Envelope,
    FollowAction, FollowActionArgs, FollowKind, JumpOpts, JumpTarget, LoadMode, LoopMode, LoopSpec,
    MarkerArgs, MarkerRef, MidiAction, MidiMapping, MidiMessage, ParamTarget, PlayOpts,
    SetParamOpts, StartPos, StopClipOpts, StopOpts, VoiceId, When,
};

use super::{AudioBackend, ClipTable, PlayEnd};
use crate::config::Config;
use crate::error::{AudioError, AudioResult};
use decode::{ClipLoader, DecodeJob, DecodeWorker, DecodedClip, WavLoader};
use mixer::{lock, LoopRegion, SharedMixer, SoftwareMixer, SourceId, SourceSpec};

/// Who advances the mixer clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// `pump` renders the frames elapsed since the last pump.
    WallClock,
    /// An output stream (or a test) renders the mixer.
    External,
}

enum BufferState {
    /// Stream clip that has not been played yet.
    Idle,
    Decoding,
    Ready(Arc<DecodedClip>),
    Failed(String),
}

struct ClipState {
    buffer: BufferState,
    generation: u64,
}

struct Voice {
    id: VoiceId,
    clip_id: ClipId,
    /// `None` while the clip is still decoding.
    source: Option<SourceId>,
    start_frame: u64,
    end: PlayEnd,
    looping: Option<LoopSpec>,
    /// Mixer frame the voice was scheduled for.
    start_at: u64,
    gain_db_delta: f32,
    pan_delta: f32,
    velocity: f32,
    speed: f64,
    envelope: Envelope,
    xfade: Option<u64>,
    attack_override: Option<u64>,
    follow: Vec<FollowAction>,
    last_position: u64,
}

struct FollowTrigger {
    voice_id: VoiceId,
    clip_id: ClipId,
    marker: String,
    action: FollowAction,
}

pub struct FallbackBackend {
    clips: ClipTable,
    buffers: HashMap<ClipId, ClipState>,
    voices: Vec<Voice>,
    mixer: SharedMixer,
    decoder: DecodeWorker,
    clock: ClockMode,
    clock_origin: (Instant, u64),
    next_voice: u64,
    next_generation: u64,
    mappings: Vec<MidiMapping>,
    held_notes: HashMap<(String, u8), Vec<VoiceId>>,
    rng: StdRng,
    events: Vec<AudioEvent>,
}

impl FallbackBackend {
    pub fn new(sample_rate: u32, loader: Box<dyn ClipLoader>, decode_queue: usize) -> std::io::Result<Self> {
        Ok(Self {
            clips: ClipTable::new(),
            buffers: HashMap::new(),
            voices: Vec::new(),
            mixer: SoftwareMixer::shared(sample_rate),
            decoder: DecodeWorker::spawn(loader, decode_queue)?,
            clock: ClockMode::WallClock,
            clock_origin: (Instant::now(), 0),
            next_voice: 0,
            next_generation: 0,
            mappings: Vec::new(),
            held_notes: HashMap::new(),
            rng: StdRng::from_entropy(),
            events: Vec::new(),
        })
    }

    pub fn from_config(config: &Config) -> std::io::Result<Self> {
        let loader = WavLoader::new(config.asset_root());
        Self::new(config.sample_rate(), Box::new(loader), config.decode_queue())
    }

    /// Deterministic follow-action rolls.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn mixer(&self) -> SharedMixer {
        Arc::clone(&self.mixer)
    }

    pub fn set_clock(&mut self, clock: ClockMode) {
        self.clock = clock;
        self.clock_origin = (Instant::now(), lock(&self.mixer).current_frame());
    }

    fn allocate_voice(&mut self, requested: Option<VoiceId>) -> VoiceId {
        if let Some(id) = requested {
            if !self.voices.iter().any(|v| v.id == id) {
                return id;
            }
        }
        loop {
            self.next_voice += 1;
            let id = VoiceId::from_counter(self.next_voice);
            if !self.voices.iter().any(|v| v.id == id) {
                return id;
            }
        }
    }

    fn voice_index(&self, id: &VoiceId) -> AudioResult<usize> {
        self.voices
            .iter()
            .position(|v| &v.id == id)
            .ok_or_else(|| AudioError::UnknownVoice(id.clone()))
    }

    fn frames(&self, secs: f32) -> u64 {
        (secs.max(0.0) as f64 * lock(&self.mixer).sample_rate() as f64) as u64
    }

    fn ready_buffer(&self, clip_id: &ClipId) -> Option<Arc<DecodedClip>> {
        match self.buffers.get(clip_id).map(|s| &s.buffer) {
            Some(BufferState::Ready(buffer)) => Some(Arc::clone(buffer)),
            _ => None,
        }
    }

    /// Linear gain and pan of a voice from its clip defaults and its own offsets.
    fn voice_mix(&self, voice: &Voice) -> (f32, f32) {
        let (clip_gain_db, clip_pan) = self
            .clips
            .get(&voice.clip_id)
            .map(|spec| (spec.gain_db.unwrap_or(0.0), spec.pan.unwrap_or(0.0)))
            .unwrap_or((0.0, 0.0));
        let gain = db_to_gain(clip_gain_db + voice.gain_db_delta) * voice.velocity;
        (gain, (clip_pan + voice.pan_delta).clamp(-1.0, 1.0))
    }

    fn start_source(&self, voice: &Voice, buffer: Arc<DecodedClip>) -> SourceId {
        let (gain, pan) = self.voice_mix(voice);
        let end = match voice.end {
            PlayEnd::Frame(frame) => Some(frame),
            PlayEnd::ClipEnd | PlayEnd::NoteOff => None,
        };
        let looping = voice
            .looping
            .and_then(|spec| loop_region(&spec, voice.start_frame, end, buffer.frames()));
        let attack_frames = voice.attack_override.unwrap_or_else(|| self.frames(voice.envelope.a));
        let spec = SourceSpec {
            buffer,
            start_at: voice.start_at,
            offset: voice.start_frame,
            end,
            looping,
            gain,
            pan,
            speed: voice.speed,
            attack_frames,
        };
        lock(&self.mixer).start(spec)
    }

    fn refresh_mix(&self, voice: &Voice) {
        if let Some(source) = voice.source {
            let (gain, pan) = self.voice_mix(voice);
            lock(&self.mixer).set_gain_pan(source, gain, pan);
        }
    }

    /// Remove a voice, fade its source over `release` frames and report why it ended.
    fn end_voice(&mut self, index: usize, reason: EndReason, release: u64) -> Voice {
        let voice = self.voices.remove(index);
        if let Some(source) = voice.source {
            lock(&self.mixer).release(source, release);
        }
        self.events.push(AudioEvent::VoiceEnded {
            clip_id: voice.clip_id.clone(),
            voice_id: voice.id.clone(),
            reason,
        });
        voice
    }

    fn voice_failed(&mut self, clip_id: &ClipId, voice_id: Option<VoiceId>, error: &AudioError) {
        log::warn!(target: "audio::fallback", "voice on {} failed: {}", clip_id, error);
        self.events.push(AudioEvent::VoiceFailed {
            clip_id: clip_id.clone(),
            voice_id,
            error: error.to_string(),
        });
    }

    fn request_decode(&mut self, clip_id: &ClipId) {
        let Ok(spec) = self.clips.get(clip_id) else {
            return;
        };
        let locator = spec.path_or_bookmark.clone();
        self.next_generation += 1;
        let generation = self.next_generation;
        if let Some(state) = self.buffers.get_mut(clip_id) {
            state.buffer = BufferState::Decoding;
            state.generation = generation;
        }
        let job = DecodeJob { clip_id: clip_id.clone(), locator, generation };
        if let Err(e) = self.decoder.submit(job) {
            self.decode_failed(clip_id, e.to_string());
        }
    }

    fn decode_failed(&mut self, clip_id: &ClipId, reason: String) {
        log::warn!(target: "audio::fallback", "decode of {} failed: {}", clip_id, reason);
        if let Some(state) = self.buffers.get_mut(clip_id) {
            state.buffer = BufferState::Failed(reason.clone());
        }
        self.events.push(AudioEvent::DecodeFailed { clip_id: clip_id.clone(), error: reason });
        while let Some(index) = self
            .voices
            .iter()
            .position(|v| &v.clip_id == clip_id && v.source.is_none())
        {
            self.end_voice(index, EndReason::DecodeFailed, 0);
        }
    }

    fn collect_decodes(&mut self) {
        for outcome in self.decoder.completed() {
            let current = self.buffers.get(&outcome.clip_id).map(|s| s.generation);
            if current != Some(outcome.generation) {
                log::debug!(target: "audio::fallback", "dropping stale decode of {}", outcome.clip_id);
                continue;
            }
            let buffer = match outcome.result {
                Ok(buffer) => buffer,
                Err(e) => {
                    let reason = match e {
                        AudioError::DecodeFailure { reason, .. } => reason,
                        other => other.to_string(),
                    };
                    self.decode_failed(&outcome.clip_id, reason);
                    continue;
                }
            };
            if let Some(state) = self.buffers.get_mut(&outcome.clip_id) {
                state.buffer = BufferState::Ready(Arc::clone(&buffer));
            }
            self.events.push(AudioEvent::ClipReady {
                clip_id: outcome.clip_id.clone(),
                frames: buffer.frames(),
                sample_rate: buffer.sample_rate,
            });

            let now = lock(&self.mixer).current_frame();
            let mut missed = 0;
            for index in 0..self.voices.len() {
                let voice = &self.voices[index];
                if voice.clip_id != outcome.clip_id || voice.source.is_some() {
                    continue;
                }
                if voice.start_at < now {
                    missed = missed.max(now - voice.start_at);
                    self.voices[index].start_at = now;
                }
                let source = self.start_source(&self.voices[index], Arc::clone(&buffer));
                self.voices[index].source = Some(source);
            }
            if missed > 0 {
                self.events.push(AudioEvent::ClipStreamXrun {
                    clip_id: outcome.clip_id.clone(),
                    frames_missed: missed,
                });
            }
        }
    }

    fn advance_clock(&mut self) {
        if self.clock != ClockMode::WallClock {
            return;
        }
        let mut mixer = lock(&self.mixer);
        let (origin, origin_frame) = self.clock_origin;
        let target = origin_frame + (origin.elapsed().as_secs_f64() * mixer.sample_rate() as f64) as u64;
        let current = mixer.current_frame();
        if target > current {
            mixer.advance(target - current);
        }
    }

    fn rolls(&mut self, action: &FollowAction) -> bool {
        let p = action.probability();
        if p >= 1.0 {
            true
        } else if p <= 0.0 {
            false
        } else {
            self.rng.gen::<f64>() < p
        }
    }

    /// Emit `marker_hit` for markers crossed since the last scan, pick follow
    /// actions, and collect voices whose source reached its end.
    fn scan_voices(&mut self) -> (Vec<FollowTrigger>, Vec<VoiceId>) {
        let (positions, ended) = {
            let mut mixer = lock(&self.mixer);
            let ended = mixer.take_ended();
            let positions: Vec<Option<u64>> = self
                .voices
                .iter()
                .map(|v| v.source.and_then(|s| mixer.position(s)))
                .collect();
            (positions, ended)
        };

        let mut candidates: Vec<(VoiceId, ClipId, String, Vec<FollowAction>)> = Vec::new();
        let mut finished = Vec::new();
        for (index, voice) in self.voices.iter_mut().enumerate() {
            let Some(source) = voice.source else {
                continue;
            };
            let ended_at = ended.iter().find(|e| e.id == source).map(|e| e.position);
            let Some(now) = positions[index].or(ended_at) else {
                continue;
            };
            if let Ok(spec) = self.clips.get(&voice.clip_id) {
                let pingpong = voice.looping.map_or(false, |l| l.mode == LoopMode::Pingpong);
                let wrap_start = voice.looping.and_then(|l| l.start).unwrap_or(voice.start_frame);
                let mut hits: Vec<_> = spec
                    .markers
                    .iter()
                    .filter(|m| crossed(voice.last_position, now, m.frame, wrap_start, pingpong))
                    .collect();
                hits.sort_by_key(|m| m.frame);
                for marker in hits {
                    self.events.push(AudioEvent::MarkerHit {
                        clip_id: voice.clip_id.clone(),
                        voice_id: voice.id.clone(),
                        marker: marker.name.clone(),
                        frame: marker.frame,
                    });
                    let actions: Vec<FollowAction> =
                        marker.follow_actions.iter().chain(voice.follow.iter()).cloned().collect();
                    if !actions.is_empty() {
                        candidates.push((voice.id.clone(), voice.clip_id.clone(), marker.name.clone(), actions));
                    }
                }
            }
            voice.last_position = now;
            if ended_at.is_some() && positions[index].is_none() {
                finished.push(voice.id.clone());
            }
        }

        // one follow action per voice per scan
        let mut triggers: Vec<FollowTrigger> = Vec::new();
        for (voice_id, clip_id, marker, actions) in candidates {
            if triggers.iter().any(|t| t.voice_id == voice_id) {
                continue;
            }
            if let Some(action) = actions.into_iter().find(|a| self.rolls(a)) {
                triggers.push(FollowTrigger { voice_id, clip_id, marker, action });
            }
        }
        (triggers, finished)
    }

    fn fire(&mut self, trigger: FollowTrigger) {
        let mark = self.events.len();
        let FollowTrigger { voice_id, clip_id, marker, action } = trigger;
        let start = action.target_marker.clone().map(|marker| StartPos::Marker { marker });
        let result = match (action.action, &action.target_clip_id) {
            (FollowKind::Jump, Some(target)) if *target != clip_id => self
                .voice_index(&voice_id)
                .map(|index| self.end_voice(index, EndReason::Jumped, 0))
                .and_then(|_| self.play(play_at(target, start))),
            (FollowKind::Jump, _) => {
                let to = match action.target_marker.clone() {
                    Some(marker) => JumpTarget::Marker { marker },
                    None => JumpTarget::Frame(0),
                };
                self.jump_voice(&voice_id, &to, None)
            }
            (FollowKind::Play, target) => {
                let target = target.clone().unwrap_or_else(|| clip_id.clone());
                self.play(play_at(&target, start))
            }
        };
        match result {
            Ok(new_voice_id) => {
                let fired = AudioEvent::FollowActionFired {
                    clip_id,
                    voice_id,
                    marker,
                    action,
                    new_voice_id: Some(new_voice_id),
                };
                self.events.insert(mark, fired);
            }
            Err(e) => {
                log::warn!(target: "audio::fallback", "follow action at {}:{} failed: {}", clip_id, marker, e);
            }
        }
    }

    /// Release the voice over the crossfade and replay its clip from `to`
    /// under a new id.
    fn jump_voice(&mut self, voice_id: &VoiceId, to: &JumpTarget, xfade: Option<u64>) -> AudioResult<VoiceId> {
        let index = self.voice_index(voice_id)?;
        let clip_id = self.voices[index].clip_id.clone();
        let target = match self.clips.resolve_jump(&clip_id, to) {
            Ok(target) => target,
            Err(e) => {
                // the voice keeps playing where it was
                self.voice_failed(&clip_id, Some(voice_id.clone()), &e);
                return Err(e);
            }
        };
        let xfade = xfade.or(self.voices[index].xfade).unwrap_or(0);
        let old = self.end_voice(index, EndReason::Jumped, xfade);

        let now = lock(&self.mixer).current_frame();
        let id = self.allocate_voice(None);
        let mut voice = Voice {
            id: id.clone(),
            source: None,
            start_frame: target,
            start_at: now,
            attack_override: (xfade > 0).then_some(xfade),
            last_position: target,
            ..old
        };
        if matches!(voice.end, PlayEnd::Frame(end) if end <= target) {
            voice.end = PlayEnd::ClipEnd;
        }
        self.events.push(AudioEvent::VoiceStarted {
            clip_id: voice.clip_id.clone(),
            voice_id: id.clone(),
            start_frame: target,
            at: lock(&self.mixer).current_time(),
        });
        if let Some(buffer) = self.ready_buffer(&voice.clip_id) {
            voice.source = Some(self.start_source(&voice, buffer));
        }
        self.voices.push(voice);
        Ok(id)
    }

    fn run_mapping(&mut self, mapping: &MidiMapping, message: MidiMessage) -> AudioResult {
        match (&mapping.action, message) {
            (MidiAction::SetParam { target, id, name, min, max }, _) => {
                let raw = match message {
                    MidiMessage::ControlChange { value, .. } => value,
                    MidiMessage::NoteOn { velocity, .. } => velocity,
                    MidiMessage::NoteOff { .. } => return Ok(()),
                };
                let value = min + (raw as f64 / 127.0) * (max - min);
                self.set_param(&SetParamOpts { target: *target, id: id.clone(), name: name.clone(), value })
            }
            (MidiAction::PlayClip { clip_id, start }, MidiMessage::NoteOn { note, velocity, .. }) => {
                let mut opts = play_at(clip_id, start.clone());
                opts.velocity = Some(velocity as f32 / 127.0);
                let voice_id = self.play(opts)?;
                self.held_notes.entry((mapping.id.clone(), note)).or_default().push(voice_id);
                Ok(())
            }
            (MidiAction::PlayClip { .. }, MidiMessage::NoteOff { note, .. }) => {
                for voice_id in self.held_notes.remove(&(mapping.id.clone(), note)).unwrap_or_default() {
                    // the voice may have finished on its own
                    if self.voice_index(&voice_id).is_ok() {
                        self.stop(&StopOpts { voice_id, release_ms: None })?;
                    }
                }
                Ok(())
            }
            (MidiAction::StopClip { clip_id }, MidiMessage::NoteOn { .. })
            | (MidiAction::StopClip { clip_id }, MidiMessage::ControlChange { value: 64..=127, .. }) => {
                self.stop_clip(&StopClipOpts { clip_id: clip_id.clone(), release_ms: None })
            }
            _ => Ok(()),
        }
    }
}

fn play_at(clip_id: &ClipId, start: Option<StartPos>) -> PlayOpts {
    let mut opts = PlayOpts::new(clip_id.as_str());
    opts.start = start;
    opts
}

fn loop_region(spec: &LoopSpec, start: u64, end: Option<u64>, frames: u64) -> Option<LoopRegion> {
    if spec.mode == LoopMode::Off || spec.passes() == Some(0) {
        return None;
    }
    let region_start = spec.start.unwrap_or(start);
    let region_end = spec.end.or(end).unwrap_or(frames).min(frames);
    (region_end > region_start).then_some(LoopRegion {
        start: region_start,
        end: region_end,
        pingpong: spec.mode == LoopMode::Pingpong,
        passes: spec.passes(),
    })
}

/// Whether moving from `last` to `now` passed `frame`. Moving backwards means
/// a forward loop wrapped to `wrap_start`, or a ping-pong loop is descending.
fn crossed(last: u64, now: u64, frame: u64, wrap_start: u64, pingpong: bool) -> bool {
    if now >= last {
        frame > last && frame <= now
    } else if pingpong {
        frame >= now && frame < last
    } else {
        frame > last || (frame >= wrap_start && frame <= now)
    }
}

impl AudioBackend for FallbackBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Fallback
    }

    fn is_available(&self) -> bool {
        true
    }

    fn create_clip(&mut self, spec: ClipSpec) -> AudioResult {
        let id = spec.id.clone();
        let mode = spec.mode;
        self.clips.insert(spec)?;
        self.buffers.insert(id.clone(), ClipState { buffer: BufferState::Idle, generation: 0 });
        if mode == LoadMode::Preload {
            self.request_decode(&id);
        }
        log::debug!(target: "audio::fallback", "created clip {} ({})", id, mode.as_str());
        Ok(())
    }

    fn destroy_clip(&mut self, id: &ClipId) -> AudioResult {
        self.clips.remove(id)?;
        while let Some(index) = self.voices.iter().position(|v| &v.clip_id == id) {
            self.end_voice(index, EndReason::ClipDestroyed, 0);
        }
        self.buffers.remove(id);
        Ok(())
    }

    fn play(&mut self, opts: PlayOpts) -> AudioResult<VoiceId> {
        let range = match self.clips.resolve_range(&opts.clip_id, opts.start.as_ref(), opts.end.as_ref()) {
            Ok(range) => range,
            Err(e) => {
                self.voice_failed(&opts.clip_id, None, &e);
                return Err(e);
            }
        };
        let spec = self.clips.get(&opts.clip_id)?;
        let envelope = opts.envelope_override.unwrap_or_else(|| spec.envelope());
        if let Some(BufferState::Failed(reason)) = self.buffers.get(&opts.clip_id).map(|s| &s.buffer) {
            let err = AudioError::DecodeFailure {
                locator: spec.path_or_bookmark.clone(),
                reason: reason.clone(),
            };
            self.voice_failed(&opts.clip_id, None, &err);
            return Err(err);
        }

        let (now, sample_rate) = {
            let mixer = lock(&self.mixer);
            (mixer.current_frame(), mixer.sample_rate())
        };
        let start_at = match opts.when {
            When::Now => now,
            When::BufferOffset { value } => now.saturating_add(value),
            When::HostSampleTime { value } => {
                log::debug!(target: "audio::fallback", "hostSampleTime {} has no meaning here, playing now", value);
                now
            }
        };

        let id = self.allocate_voice(opts.voice_id.clone());
        let mut voice = Voice {
            id: id.clone(),
            clip_id: opts.clip_id.clone(),
            source: None,
            start_frame: range.start,
            end: range.end,
            looping: opts.looping,
            start_at,
            gain_db_delta: opts.gain_db_delta.unwrap_or(0.0),
            pan_delta: opts.pan_delta.unwrap_or(0.0),
            velocity: opts.velocity.unwrap_or(1.0).clamp(0.0, 1.0),
            speed: 2f64.powf(opts.pitch_cents.unwrap_or(0.0) as f64 / 1200.0),
            envelope,
            xfade: opts.xfade_samples,
            attack_override: None,
            follow: opts.follow,
            last_position: range.start,
        };
        self.events.push(AudioEvent::VoiceStarted {
            clip_id: opts.clip_id.clone(),
            voice_id: id.clone(),
            start_frame: range.start,
            at: start_at as f64 / sample_rate.max(1) as f64,
        });

        let idle = matches!(self.buffers.get(&opts.clip_id).map(|s| &s.buffer), Some(BufferState::Idle));
        if let Some(buffer) = self.ready_buffer(&opts.clip_id) {
            voice.source = Some(self.start_source(&voice, buffer));
        }
        self.voices.push(voice);
        if idle {
            self.request_decode(&opts.clip_id);
        }
        Ok(id)
    }

    fn stop(&mut self, opts: &StopOpts) -> AudioResult {
        let index = self.voice_index(&opts.voice_id)?;
        let release = match opts.release_ms {
            Some(ms) => self.frames(ms / 1000.0),
            None => self.frames(self.voices[index].envelope.r),
        };
        self.end_voice(index, EndReason::Stopped, release);
        Ok(())
    }

    fn stop_clip(&mut self, opts: &StopClipOpts) -> AudioResult {
        self.clips.get(&opts.clip_id)?;
        let ids: Vec<VoiceId> = self
            .voices
            .iter()
            .filter(|v| v.clip_id == opts.clip_id)
            .map(|v| v.id.clone())
            .collect();
        for voice_id in ids {
            self.stop(&StopOpts { voice_id, release_ms: opts.release_ms })?;
        }
        Ok(())
    }

    fn jump(&mut self, opts: &JumpOpts) -> AudioResult {
        self.jump_voice(&opts.voice_id, &opts.to, opts.xfade_samples).map(|_| ())
    }

    fn set_param(&mut self, opts: &SetParamOpts) -> AudioResult {
        let value = opts.value as f32;
        if !value.is_finite() {
            return Err(AudioError::InvalidArgument(format!("{} = {}", opts.name, opts.value)));
        }
        let unknown = || AudioError::InvalidArgument(format!("unknown {:?} parameter '{}'", opts.target, opts.name));
        let scoped_id = || {
            opts.id
                .clone()
                .ok_or_else(|| AudioError::InvalidArgument(format!("{:?} parameter needs an id", opts.target)))
        };
        match opts.target {
            ParamTarget::Global => match opts.name.as_str() {
                "gain" => lock(&self.mixer).set_output_gain(value),
                _ => return Err(unknown()),
            },
            ParamTarget::Clip => {
                let clip_id = ClipId::new(scoped_id()?);
                let spec = self.clips.get_mut(&clip_id)?;
                match opts.name.as_str() {
                    "gain_db" => spec.gain_db = Some(value),
                    "pan" => spec.pan = Some(value.clamp(-1.0, 1.0)),
                    _ => return Err(unknown()),
                }
                for voice in self.voices.iter().filter(|v| v.clip_id == clip_id) {
                    self.refresh_mix(voice);
                }
            }
            ParamTarget::Voice => {
                let index = self.voice_index(&VoiceId::new(scoped_id()?))?;
                match opts.name.as_str() {
                    "gain_db" => self.voices[index].gain_db_delta = value,
                    "pan" => self.voices[index].pan_delta = value,
                    _ => return Err(unknown()),
                }
                self.refresh_mix(&self.voices[index]);
            }
        }
        Ok(())
    }

    fn map_midi(&mut self, mapping: MidiMapping) -> AudioResult {
        match self.mappings.iter_mut().find(|m| m.id == mapping.id) {
            Some(existing) => *existing = mapping,
            None => self.mappings.push(mapping),
        }
        Ok(())
    }

    fn add_marker(&mut self, args: &MarkerArgs) -> AudioResult {
        self.clips.add_marker(args)
    }

    fn remove_marker(&mut self, args: &MarkerRef) -> AudioResult {
        self.clips.remove_marker(args).map(|_| ())
    }

    fn set_marker_follow_actions(&mut self, args: &FollowActionArgs) -> AudioResult {
        self.clips.set_follow_actions(args)
    }

    fn clear_marker_follow_actions(&mut self, args: &MarkerRef) -> AudioResult {
        self.clips.clear_follow_actions(args)
    }

    fn query_clip(&self, id: &ClipId) -> AudioResult<Option<ClipInfo>> {
        let Ok(spec) = self.clips.get(id) else {
            return Ok(None);
        };
        let buffer = self.ready_buffer(id);
        Ok(Some(ClipInfo {
            id: id.clone(),
            mode: spec.mode,
            frames: buffer.as_ref().map(|b| b.frames()),
            sample_rate: buffer.as_ref().map(|b| b.sample_rate),
            ready: buffer.is_some(),
            markers: spec.markers.clone(),
            sprites: spec.sprites.clone(),
            active_voices: self.voices.iter().filter(|v| &v.clip_id == id).map(|v| v.id.clone()).collect(),
        }))
    }

    fn midi_input(&mut self, data: &[u8]) -> AudioResult {
        let Some(message) = MidiMessage::parse(data) else {
            return Ok(());
        };
        let matched: Vec<MidiMapping> =
            self.mappings.iter().filter(|m| m.matches(&message)).cloned().collect();
        for mapping in matched {
            if let Err(e) = self.run_mapping(&mapping, message) {
                log::warn!(target: "audio::fallback", "midi mapping {} failed: {}", mapping.id, e);
            }
        }
        Ok(())
    }

    fn pump(&mut self) {
        self.advance_clock();
        self.collect_decodes();
        let (triggers, finished) = self.scan_voices();
        for trigger in triggers {
            self.fire(trigger);
        }
        for voice_id in finished {
            if let Ok(index) = self.voice_index(&voice_id) {
                self.end_voice(index, EndReason::Finished, 0);
            }
        }
    }

    fn drain_events(&mut self) -> Vec<AudioEvent> {
        std::mem::take(&mut self.events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossing_forward() {
        assert!(crossed(100, 200, 150, 0, false));
        assert!(crossed(100, 200, 200, 0, false));
        assert!(!crossed(100, 200, 100, 0, false));
        assert!(!crossed(100, 200, 250, 0, false));
    }

    #[test]
    fn crossing_after_loop_wrap() {
        // loop 50..300 wrapped from 280 to 60
        assert!(crossed(280, 60, 290, 50, false));
        assert!(crossed(280, 60, 55, 50, false));
        assert!(!crossed(280, 60, 100, 50, false));
        // ping-pong descending from 280 to 200
        assert!(crossed(280, 200, 250, 0, true));
        assert!(!crossed(280, 200, 290, 0, true));
    }

    #[test]
    fn loop_region_defaults_to_voice_range() {
        let spec = LoopSpec { mode: LoopMode::Forward, start: None, end: None, count: None };
        let region = loop_region(&spec, 100, Some(400), 1000).unwrap();
        assert_eq!((region.start, region.end, region.passes), (100, 400, None));

        let off = LoopSpec { mode: LoopMode::Off, ..spec };
        assert!(loop_region(&off, 100, None, 1000).is_none());

        let empty = LoopSpec { mode: LoopMode::Forward, start: Some(500), end: Some(500), count: None };
        assert!(loop_region(&empty, 0, None, 1000).is_none());
    }
}
