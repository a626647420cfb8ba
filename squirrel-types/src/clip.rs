use serde::{Deserialize, Serialize};

use crate::{ClipId, VoiceId};

/// How a clip's audio is brought into memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadMode {
    /// Decode fully when the clip is created.
    #[default]
    Preload,
    /// Defer decoding until the first play.
    Stream,
}

impl LoadMode {
    pub fn as_str(self) -> &'static str {
        match self {
            LoadMode::Preload => "preload",
            LoadMode::Stream => "stream",
        }
    }
}

/// Attack/decay/release in seconds, sustain as a level in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub a: f32,
    pub d: f32,
    pub s: f32,
    pub r: f32,
}

impl Default for Envelope {
    fn default() -> Self {
        Self { a: 0.001, d: 0.05, s: 0.8, r: 0.1 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FollowKind {
    Jump,
    Play,
}

/// Action taken when a voice crosses a marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowAction {
    pub action: FollowKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_clip_id: Option<ClipId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<f64>,
}

impl FollowAction {
    /// Firing probability, defaulting to certain and clamped into 0..=1.
    pub fn probability(&self) -> f64 {
        match self.probability {
            Some(p) if p.is_nan() => 0.0,
            Some(p) => p.clamp(0.0, 1.0),
            None => 1.0,
        }
    }
}

/// Named frame position inside a clip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Marker {
    pub name: String,
    pub frame: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow_actions: Vec<FollowAction>,
}

impl Marker {
    pub fn new(name: impl Into<String>, frame: u64) -> Self {
        Self { name: name.into(), frame, follow_actions: Vec::new() }
    }
}

/// Named frame range inside a clip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sprite {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

/// Everything needed to register a clip with a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipSpec {
    pub id: ClipId,
    pub path_or_bookmark: String,
    #[serde(default)]
    pub mode: LoadMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gain_db: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pan: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub envelope_default: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<Marker>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sprites: Vec<Sprite>,
}

impl ClipSpec {
    pub fn new(id: impl Into<String>, path_or_bookmark: impl Into<String>) -> Self {
        Self {
            id: ClipId::new(id),
            path_or_bookmark: path_or_bookmark.into(),
            mode: LoadMode::Preload,
            gain_db: None,
            pan: None,
            envelope_default: None,
            markers: Vec::new(),
            sprites: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: LoadMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_marker(mut self, name: impl Into<String>, frame: u64) -> Self {
        self.markers.push(Marker::new(name, frame));
        self
    }

    pub fn with_sprite(mut self, name: impl Into<String>, start: u64, end: u64) -> Self {
        self.sprites.push(Sprite { name: name.into(), start, end });
        self
    }

    pub fn envelope(&self) -> Envelope {
        self.envelope_default.unwrap_or_default()
    }
}

/// Snapshot answered by `query_clip`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClipInfo {
    pub id: ClipId,
    pub mode: LoadMode,
    /// Decoded length, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frames: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub markers: Vec<Marker>,
    #[serde(default)]
    pub sprites: Vec<Sprite>,
    #[serde(default)]
    pub active_voices: Vec<VoiceId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_spec_defaults_to_preload() {
        let spec: ClipSpec =
            serde_json::from_str(r#"{"id":"c","path_or_bookmark":"a.wav"}"#).unwrap();
        assert_eq!(spec.mode, LoadMode::Preload);
        assert!(spec.markers.is_empty());
        assert_eq!(spec.envelope(), Envelope { a: 0.001, d: 0.05, s: 0.8, r: 0.1 });
    }

    #[test]
    fn follow_probability_is_clamped() {
        let mut action = FollowAction {
            action: FollowKind::Jump,
            target_marker: None,
            target_clip_id: None,
            probability: None,
        };
        assert_eq!(action.probability(), 1.0);
        action.probability = Some(3.0);
        assert_eq!(action.probability(), 1.0);
        action.probability = Some(-1.0);
        assert_eq!(action.probability(), 0.0);
    }
}
