use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clip::ClipSpec;
use crate::midi::MidiMapping;
use crate::playback::{
    ClipRef, FollowActionArgs, JumpOpts, MarkerArgs, MarkerRef, PlayOpts, SetParamOpts,
    StopClipOpts, StopOpts,
};

/// One facade operation, serialised as `{"name": ..., "arg": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "arg", rename_all = "snake_case")]
pub enum Command {
    CreateClip(ClipSpec),
    DestroyClip(ClipRef),
    Play(PlayOpts),
    Stop(StopOpts),
    StopClip(StopClipOpts),
    Jump(JumpOpts),
    SetParam(SetParamOpts),
    MapMidi(MidiMapping),
    AddMarker(MarkerArgs),
    RemoveMarker(MarkerRef),
    SetMarkerFollowActions(FollowActionArgs),
    ClearMarkerFollowActions(MarkerRef),
    QueryClip(ClipRef),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateClip(_) => "create_clip",
            Command::DestroyClip(_) => "destroy_clip",
            Command::Play(_) => "play",
            Command::Stop(_) => "stop",
            Command::StopClip(_) => "stop_clip",
            Command::Jump(_) => "jump",
            Command::SetParam(_) => "set_param",
            Command::MapMidi(_) => "map_midi",
            Command::AddMarker(_) => "add_marker",
            Command::RemoveMarker(_) => "remove_marker",
            Command::SetMarkerFollowActions(_) => "set_marker_follow_actions",
            Command::ClearMarkerFollowActions(_) => "clear_marker_follow_actions",
            Command::QueryClip(_) => "query_clip",
        }
    }

    /// Latency-sensitive commands bypass the per-frame batch.
    pub fn is_immediate(&self) -> bool {
        matches!(self, Command::Play(_) | Command::Jump(_) | Command::SetParam(_))
    }

    /// Read-only commands answered synchronously.
    pub fn is_query(&self) -> bool {
        matches!(self, Command::QueryClip(_))
    }

    /// The `{type, payload}` form used on native bridges.
    pub fn to_wire(&self) -> serde_json::Result<WireEnvelope> {
        let mut value = serde_json::to_value(self)?;
        let payload = value.get_mut("arg").map(Value::take).unwrap_or(Value::Null);
        Ok(WireEnvelope::new(self.name(), payload))
    }
}

/// `{type, payload}` message exchanged with a native host in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl WireEnvelope {
    pub const BATCH: &'static str = "batch";

    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self { kind: kind.into(), payload }
    }

    /// Wrap a frame's queued commands as one `batch` message.
    pub fn batch(commands: &[Command]) -> serde_json::Result<Self> {
        Ok(Self::new(Self::BATCH, serde_json::to_value(commands)?))
    }
}
