//! Per-field message shape for hosts that predate the envelope protocol.
//!
//! Such hosts expose three parameters (`gain`, `play`, `position`) and a
//! file-load action. Commands with no equivalent are translation gaps.

use serde::{Deserialize, Serialize};
use squirrel_types::{Command, ParamTarget};

use super::Mirror;
use crate::error::{AudioError, AudioResult};

/// Upper bound of the host's position parameter.
pub const LEGACY_POSITION_MAX: u64 = 1_000_000;

/// Host gain parameter range (linear).
const LEGACY_GAIN_MAX: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegacyParam {
    Gain,
    Play,
    Position,
}

impl LegacyParam {
    pub fn as_str(self) -> &'static str {
        match self {
            LegacyParam::Gain => "gain",
            LegacyParam::Play => "play",
            LegacyParam::Position => "position",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LegacyMessage {
    Param { id: LegacyParam, value: f64 },
    Iplug {
        action: String,
        #[serde(rename = "relativePath")]
        relative_path: String,
    },
}

impl LegacyMessage {
    fn param(id: LegacyParam, value: f64) -> Self {
        LegacyMessage::Param { id, value }
    }
}

/// Frame position as the host's position parameter.
///
/// The host reads the value as a frame index, so frames pass through
/// unchanged and saturate at `LEGACY_POSITION_MAX`.
pub fn legacy_position(frames: u64) -> f64 {
    frames.min(LEGACY_POSITION_MAX) as f64
}

/// Translate one command. References are resolved against the mirror, so
/// the command must already have been staged.
pub fn translate(command: &Command, mirror: &Mirror) -> AudioResult<Vec<LegacyMessage>> {
    match command {
        Command::CreateClip(spec) => Ok(vec![LegacyMessage::Iplug {
            action: "loadLocalPath".to_string(),
            relative_path: spec.path_or_bookmark.clone(),
        }]),
        Command::Play(opts) => {
            let mut messages = Vec::with_capacity(2);
            if opts.start.is_some() {
                let range = mirror.clips().resolve_range(&opts.clip_id, opts.start.as_ref(), None)?;
                messages.push(LegacyMessage::param(LegacyParam::Position, legacy_position(range.start)));
            }
            messages.push(LegacyMessage::param(LegacyParam::Play, 1.0));
            Ok(messages)
        }
        // halts the whole host; the bridge forgets every mirrored voice once this is sent
        Command::Stop(_) | Command::StopClip(_) => Ok(vec![LegacyMessage::param(LegacyParam::Play, 0.0)]),
        Command::Jump(opts) => {
            let clip_id = mirror
                .voice_clip(&opts.voice_id)
                .ok_or_else(|| AudioError::UnknownVoice(opts.voice_id.clone()))?;
            let frame = mirror.clips().resolve_jump(clip_id, &opts.to)?;
            Ok(vec![LegacyMessage::param(LegacyParam::Position, legacy_position(frame))])
        }
        Command::SetParam(opts) if opts.target == ParamTarget::Global && opts.name == "gain" => {
            let value = if opts.value.is_nan() { 0.0 } else { opts.value.clamp(0.0, LEGACY_GAIN_MAX) };
            Ok(vec![LegacyMessage::param(LegacyParam::Gain, value)])
        }
        other => Err(AudioError::BackendTranslationGap(other.name())),
    }
}
