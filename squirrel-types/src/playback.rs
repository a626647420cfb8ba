//! Arguments of the playback and mutation commands.

use serde::{Deserialize, Serialize};

use crate::clip::{Envelope, FollowAction};
use crate::{ClipId, VoiceId};

/// When a voice should begin sounding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum When {
    #[default]
    Now,
    /// Absolute host sample clock position.
    HostSampleTime { value: u64 },
    /// Frames from now.
    BufferOffset { value: u64 },
}

/// Where inside the clip playback begins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StartPos {
    Frame(u64),
    Marker { marker: String },
    Sprite { sprite: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndSymbol {
    UntilNoteOff,
    ClipEnd,
}

/// Where playback stops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EndPos {
    Frame(u64),
    Marker { marker: String },
    Symbol(EndSymbol),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopMode {
    #[default]
    Off,
    Forward,
    Pingpong,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopKeyword {
    Sustain,
}

/// Number of passes through the loop region, or `"sustain"` to loop until stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LoopCount {
    Times(u32),
    Keyword(LoopKeyword),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopSpec {
    pub mode: LoopMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<LoopCount>,
}

impl LoopSpec {
    pub fn forward(start: u64, end: u64) -> Self {
        Self { mode: LoopMode::Forward, start: Some(start), end: Some(end), count: None }
    }

    /// Remaining passes; `None` loops until the voice is stopped.
    pub fn passes(&self) -> Option<u32> {
        match self.count {
            Some(LoopCount::Times(n)) => Some(n),
            Some(LoopCount::Keyword(LoopKeyword::Sustain)) | None => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayOpts {
    pub clip_id: ClipId,
    /// Requested voice id. Bridges that allocate ids on the caller side fill this in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<VoiceId>,
    #[serde(default)]
    pub when: When,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<StartPos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<EndPos>,
    #[serde(rename = "loop", default, skip_serializing_if = "Option::is_none")]
    pub looping: Option<LoopSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch_cents: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain_db_delta: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pan_delta: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_override: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xfade_samples: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow: Vec<FollowAction>,
}

impl PlayOpts {
    pub fn new(clip_id: impl Into<String>) -> Self {
        Self {
            clip_id: ClipId::new(clip_id),
            voice_id: None,
            when: When::Now,
            start: None,
            end: None,
            looping: None,
            velocity: None,
            pitch_cents: None,
            gain_db_delta: None,
            pan_delta: None,
            envelope_override: None,
            xfade_samples: None,
            follow: Vec::new(),
        }
    }

    pub fn at(mut self, start: StartPos) -> Self {
        self.start = Some(start);
        self
    }

    pub fn until(mut self, end: EndPos) -> Self {
        self.end = Some(end);
        self
    }

    pub fn when(mut self, when: When) -> Self {
        self.when = when;
        self
    }

    pub fn looped(mut self, spec: LoopSpec) -> Self {
        self.looping = Some(spec);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopOpts {
    pub voice_id: VoiceId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_ms: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopClipOpts {
    pub clip_id: ClipId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_ms: Option<f32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JumpTarget {
    Frame(u64),
    Marker { marker: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JumpOpts {
    pub voice_id: VoiceId,
    pub to: JumpTarget,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xfade_samples: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamTarget {
    Global,
    Clip,
    Voice,
}

fn default_param_name() -> String {
    "gain".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetParamOpts {
    pub target: ParamTarget,
    /// Clip or voice id for the scoped targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default = "default_param_name")]
    pub name: String,
    pub value: f64,
}

impl SetParamOpts {
    pub fn global(name: impl Into<String>, value: f64) -> Self {
        Self { target: ParamTarget::Global, id: None, name: name.into(), value }
    }

    pub fn scoped(target: ParamTarget, id: impl Into<String>, name: impl Into<String>, value: f64) -> Self {
        Self { target, id: Some(id.into()), name: name.into(), value }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipRef {
    pub id: ClipId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerArgs {
    pub clip_id: ClipId,
    pub name: String,
    pub frame: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkerRef {
    pub clip_id: ClipId,
    #[serde(alias = "marker")]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowActionArgs {
    pub clip_id: ClipId,
    pub marker: String,
    pub actions: Vec<FollowAction>,
}
