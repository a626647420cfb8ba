//! Backend contract: what the facade asks an engine to do.
//!
//! `AudioBackend` captures the playback operations independently of where the
//! audio is produced. The native bridge relays them to a host-owned DSP engine,
//! the fallback executes them in-process, and `RecordingBackend` records them
//! for tests. `Ok` means "accepted for processing"; outcomes that happen later
//! (a voice ending, a decode failing) arrive as events from `drain_events`.

pub mod clip_table;
pub mod fallback;
pub mod native;
pub mod recording;

use squirrel_types::{
    AudioEvent, BackendKind, ClipId, ClipInfo, ClipSpec, Command, FollowActionArgs, JumpOpts,
    MarkerArgs, MarkerRef, MidiMapping, PlayOpts, SetParamOpts, StopClipOpts, StopOpts, VoiceId,
};

use crate::error::AudioResult;

pub use clip_table::{ClipTable, PlayEnd, ResolvedRange};

/// What a single applied command produced.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Accepted,
    Voice(VoiceId),
    Clip(Option<ClipInfo>),
}

pub trait AudioBackend: Send {
    fn kind(&self) -> BackendKind;

    /// Whether this backend can run right now (transport connected, device present).
    fn is_available(&self) -> bool;

    fn create_clip(&mut self, spec: ClipSpec) -> AudioResult;

    /// Ends every voice of the clip and forgets it.
    fn destroy_clip(&mut self, id: &ClipId) -> AudioResult;

    fn play(&mut self, opts: PlayOpts) -> AudioResult<VoiceId>;

    /// Fails for unknown or already-ended voices.
    fn stop(&mut self, opts: &StopOpts) -> AudioResult;

    fn stop_clip(&mut self, opts: &StopClipOpts) -> AudioResult;

    fn jump(&mut self, opts: &JumpOpts) -> AudioResult;

    fn set_param(&mut self, opts: &SetParamOpts) -> AudioResult;

    fn map_midi(&mut self, mapping: MidiMapping) -> AudioResult;

    fn add_marker(&mut self, args: &MarkerArgs) -> AudioResult;

    fn remove_marker(&mut self, args: &MarkerRef) -> AudioResult;

    fn set_marker_follow_actions(&mut self, args: &FollowActionArgs) -> AudioResult;

    fn clear_marker_follow_actions(&mut self, args: &MarkerRef) -> AudioResult;

    /// `Ok(None)` for a clip this backend does not know.
    fn query_clip(&self, id: &ClipId) -> AudioResult<Option<ClipInfo>>;

    /// Raw MIDI bytes from an input port. Backends that receive MIDI on
    /// their own ignore this.
    fn midi_input(&mut self, _data: &[u8]) -> AudioResult {
        Ok(())
    }

    /// Advance asynchronous work: decode completions, ended voices, inbound messages.
    fn pump(&mut self) {}

    /// Events produced since the last drain, oldest first.
    fn drain_events(&mut self) -> Vec<AudioEvent>;

    /// Apply a frame's worth of commands in order. A failing command is
    /// logged and the rest still run.
    fn dispatch_batch(&mut self, batch: Vec<Command>) -> AudioResult {
        for command in batch {
            let name = command.name();
            if let Err(e) = self.apply(command) {
                log::warn!(target: "audio", "{} backend: batched {} failed: {}", self.kind(), name, e);
            }
        }
        Ok(())
    }

    /// Route one command to the matching operation.
    fn apply(&mut self, command: Command) -> AudioResult<Outcome> {
        match command {
            Command::CreateClip(spec) => self.create_clip(spec).map(|_| Outcome::Accepted),
            Command::DestroyClip(clip) => self.destroy_clip(&clip.id).map(|_| Outcome::Accepted),
            Command::Play(opts) => self.play(opts).map(Outcome::Voice),
            Command::Stop(opts) => self.stop(&opts).map(|_| Outcome::Accepted),
            Command::StopClip(opts) => self.stop_clip(&opts).map(|_| Outcome::Accepted),
            Command::Jump(opts) => self.jump(&opts).map(|_| Outcome::Accepted),
            Command::SetParam(opts) => self.set_param(&opts).map(|_| Outcome::Accepted),
            Command::MapMidi(mapping) => self.map_midi(mapping).map(|_| Outcome::Accepted),
            Command::AddMarker(args) => self.add_marker(&args).map(|_| Outcome::Accepted),
            Command::RemoveMarker(args) => self.remove_marker(&args).map(|_| Outcome::Accepted),
            Command::SetMarkerFollowActions(args) => {
                self.set_marker_follow_actions(&args).map(|_| Outcome::Accepted)
            }
            Command::ClearMarkerFollowActions(args) => {
                self.clear_marker_follow_actions(&args).map(|_| Outcome::Accepted)
            }
            Command::QueryClip(clip) => self.query_clip(&clip.id).map(Outcome::Clip),
        }
    }
}
