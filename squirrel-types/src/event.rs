//! Events published by backends on the facade bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clip::{ClipInfo, FollowAction};
use crate::command::WireEnvelope;
use crate::{BackendKind, ClipId, VoiceId};

/// Why a voice stopped sounding.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// Reached its end frame or the end of the buffer.
    #[default]
    Finished,
    Stopped,
    /// Replaced by a new voice after a jump.
    Jumped,
    ClipDestroyed,
    DecodeFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum AudioEvent {
    VoiceStarted {
        clip_id: ClipId,
        voice_id: VoiceId,
        #[serde(default)]
        start_frame: u64,
        /// Engine time in seconds at which the voice is scheduled.
        #[serde(default)]
        at: f64,
    },
    VoiceEnded {
        clip_id: ClipId,
        voice_id: VoiceId,
        #[serde(default)]
        reason: EndReason,
    },
    MarkerHit {
        clip_id: ClipId,
        voice_id: VoiceId,
        marker: String,
        frame: u64,
    },
    FollowActionFired {
        clip_id: ClipId,
        voice_id: VoiceId,
        marker: String,
        action: FollowAction,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_voice_id: Option<VoiceId>,
    },
    ClipStreamXrun {
        clip_id: ClipId,
        #[serde(default)]
        frames_missed: u64,
    },
    BackendChanged {
        backend: BackendKind,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        previous: Option<BackendKind>,
    },
    ClipReady {
        clip_id: ClipId,
        #[serde(default)]
        frames: u64,
        #[serde(default)]
        sample_rate: u32,
    },
    DecodeFailed {
        clip_id: ClipId,
        error: String,
    },
    VoiceFailed {
        clip_id: ClipId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        voice_id: Option<VoiceId>,
        error: String,
    },
    ClipInfo(ClipInfo),
    /// Host event with no typed counterpart, kept verbatim.
    #[serde(skip)]
    Native { kind: String, payload: Value },
}

impl AudioEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            AudioEvent::VoiceStarted { .. } => EventKind::VoiceStarted,
            AudioEvent::VoiceEnded { .. } => EventKind::VoiceEnded,
            AudioEvent::MarkerHit { .. } => EventKind::MarkerHit,
            AudioEvent::FollowActionFired { .. } => EventKind::FollowActionFired,
            AudioEvent::ClipStreamXrun { .. } => EventKind::ClipStreamXrun,
            AudioEvent::BackendChanged { .. } => EventKind::BackendChanged,
            AudioEvent::ClipReady { .. } => EventKind::ClipReady,
            AudioEvent::DecodeFailed { .. } => EventKind::DecodeFailed,
            AudioEvent::VoiceFailed { .. } => EventKind::VoiceFailed,
            AudioEvent::ClipInfo(_) => EventKind::ClipInfo,
            AudioEvent::Native { kind, .. } => EventKind::Native(kind.clone()),
        }
    }

    pub fn voice_id(&self) -> Option<&VoiceId> {
        match self {
            AudioEvent::VoiceStarted { voice_id, .. }
            | AudioEvent::VoiceEnded { voice_id, .. }
            | AudioEvent::MarkerHit { voice_id, .. }
            | AudioEvent::FollowActionFired { voice_id, .. } => Some(voice_id),
            AudioEvent::VoiceFailed { voice_id, .. } => voice_id.as_ref(),
            _ => None,
        }
    }

    /// Parse a host message. Unknown types, and known types whose payload
    /// does not fit, are kept as `Native`.
    pub fn from_wire(envelope: WireEnvelope) -> AudioEvent {
        let known = EventKind::from_name(&envelope.kind);
        if !matches!(known, EventKind::Native(_)) {
            let tagged = serde_json::json!({ "type": envelope.kind, "payload": envelope.payload });
            if let Ok(event) = serde_json::from_value::<AudioEvent>(tagged) {
                return event;
            }
        }
        AudioEvent::Native { kind: envelope.kind, payload: envelope.payload }
    }

    pub fn to_wire(&self) -> serde_json::Result<WireEnvelope> {
        if let AudioEvent::Native { kind, payload } = self {
            return Ok(WireEnvelope::new(kind.clone(), payload.clone()));
        }
        serde_json::from_value(serde_json::to_value(self)?)
    }
}

/// The `type` of an event, used for subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    VoiceStarted,
    VoiceEnded,
    MarkerHit,
    FollowActionFired,
    ClipStreamXrun,
    BackendChanged,
    ClipReady,
    DecodeFailed,
    VoiceFailed,
    ClipInfo,
    Native(String),
}

impl EventKind {
    pub fn from_name(name: &str) -> EventKind {
        match name {
            "voice_started" => EventKind::VoiceStarted,
            "voice_ended" => EventKind::VoiceEnded,
            "marker_hit" => EventKind::MarkerHit,
            "follow_action_fired" => EventKind::FollowActionFired,
            "clip_stream_xrun" => EventKind::ClipStreamXrun,
            "backend_changed" => EventKind::BackendChanged,
            "clip_ready" => EventKind::ClipReady,
            "decode_failed" => EventKind::DecodeFailed,
            "voice_failed" => EventKind::VoiceFailed,
            "clip_info" => EventKind::ClipInfo,
            other => EventKind::Native(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::VoiceStarted => "voice_started",
            EventKind::VoiceEnded => "voice_ended",
            EventKind::MarkerHit => "marker_hit",
            EventKind::FollowActionFired => "follow_action_fired",
            EventKind::ClipStreamXrun => "clip_stream_xrun",
            EventKind::BackendChanged => "backend_changed",
            EventKind::ClipReady => "clip_ready",
            EventKind::DecodeFailed => "decode_failed",
            EventKind::VoiceFailed => "voice_failed",
            EventKind::ClipInfo => "clip_info",
            EventKind::Native(name) => name,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_host_events_parse_typed() {
        let envelope = WireEnvelope::new(
            "voice_ended",
            serde_json::json!({ "clip_id": "c1", "voice_id": "v3" }),
        );
        match AudioEvent::from_wire(envelope) {
            AudioEvent::VoiceEnded { clip_id, voice_id, reason } => {
                assert_eq!(clip_id.as_str(), "c1");
                assert_eq!(voice_id.as_str(), "v3");
                assert_eq!(reason, EndReason::Finished);
            }
            other => panic!("expected VoiceEnded, got {:?}", other),
        }
    }

    #[test]
    fn unknown_host_events_are_kept_raw() {
        let envelope = WireEnvelope::new("record_done", serde_json::json!({ "path": "take1.wav" }));
        let event = AudioEvent::from_wire(envelope.clone());
        assert_eq!(event.kind(), EventKind::Native("record_done".into()));
        assert_eq!(event.to_wire().unwrap(), envelope);
    }

    #[test]
    fn malformed_known_event_falls_back_to_native() {
        let envelope = WireEnvelope::new("marker_hit", serde_json::json!({ "oops": true }));
        let event = AudioEvent::from_wire(envelope);
        assert_eq!(event.kind(), EventKind::Native("marker_hit".into()));
    }

    #[test]
    fn typed_events_render_type_and_payload() {
        let event = AudioEvent::BackendChanged { backend: BackendKind::Fallback, previous: None };
        let wire = event.to_wire().unwrap();
        assert_eq!(wire.kind, "backend_changed");
        assert_eq!(wire.payload["backend"], "fallback");
    }
}
