//! Shared data model for the squirrel audio control plane.
//!
//! Everything that crosses a crate or process boundary lives here: clip and
//! voice identifiers, playback arguments, the `Command` envelope the facade
//! batches, and the `AudioEvent` stream the backends publish.

pub mod clip;
pub mod command;
pub mod event;
pub mod midi;
pub mod playback;

pub use clip::{ClipInfo, ClipSpec, Envelope, FollowAction, FollowKind, LoadMode, Marker, Sprite};
pub use command::{Command, WireEnvelope};
pub use event::{AudioEvent, EndReason, EventKind};
pub use midi::{MidiAction, MidiMapping, MidiMessage, MidiSource};
pub use playback::{
    ClipRef, EndPos, EndSymbol, FollowActionArgs, JumpOpts, JumpTarget, LoopCount, LoopKeyword,
    LoopMode, LoopSpec, MarkerArgs, MarkerRef, ParamTarget, PlayOpts, SetParamOpts, StartPos,
    StopClipOpts, StopOpts, When,
};

/// Caller-chosen identifier of a clip.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct ClipId(String);

impl ClipId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ClipId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClipId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Identifier of one playback instance. Allocated by the backend as `v1`, `v2`, ...
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct VoiceId(String);

impl VoiceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
    pub fn from_counter(n: u64) -> Self {
        Self(format!("v{}", n))
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VoiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VoiceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Which engine executes commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Host-owned DSP engine reached over a message bridge.
    #[serde(alias = "iplug")]
    Native,
    /// In-process software engine.
    #[serde(alias = "html")]
    Fallback,
}

impl BackendKind {
    pub const ALL: [BackendKind; 2] = [BackendKind::Native, BackendKind::Fallback];

    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Native => "native",
            BackendKind::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" | "iplug" => Ok(BackendKind::Native),
            "fallback" | "html" => Ok(BackendKind::Fallback),
            other => Err(format!("unknown backend '{}'", other)),
        }
    }
}

/// Decibels to linear amplitude.
pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}
