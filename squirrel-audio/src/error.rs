use squirrel_types::{BackendKind, ClipId, VoiceId};

/// Every failure a facade or backend operation can report.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AudioError {
    #[error("no audio backend is active")]
    NoActiveBackend,

    #[error("backend '{0}' is not registered")]
    UnknownBackend(BackendKind),

    #[error("unknown clip '{0}'")]
    UnknownClip(ClipId),

    #[error("clip '{0}' already exists")]
    DuplicateClip(ClipId),

    #[error("unknown voice '{0}'")]
    UnknownVoice(VoiceId),

    #[error("clip '{clip_id}' has no {what} named '{name}'")]
    UnresolvedReference { clip_id: ClipId, what: &'static str, name: String },

    #[error("clip '{clip_id}' already has a {what} named '{name}'")]
    DuplicateName { clip_id: ClipId, what: &'static str, name: String },

    #[error("native transport is not connected")]
    TransportUnavailable,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode '{locator}': {reason}")]
    DecodeFailure { locator: String, reason: String },

    #[error("'{0}' has no legacy translation")]
    BackendTranslationGap(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}

impl AudioError {
    pub fn unresolved_marker(clip_id: &ClipId, name: &str) -> Self {
        AudioError::UnresolvedReference { clip_id: clip_id.clone(), what: "marker", name: name.to_string() }
    }

    pub fn unresolved_sprite(clip_id: &ClipId, name: &str) -> Self {
        AudioError::UnresolvedReference { clip_id: clip_id.clone(), what: "sprite", name: name.to_string() }
    }
}

impl From<std::io::Error> for AudioError {
    fn from(e: std::io::Error) -> Self {
        AudioError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for AudioError {
    fn from(e: serde_json::Error) -> Self {
        AudioError::Transport(format!("encode: {}", e))
    }
}

pub type AudioResult<T = ()> = Result<T, AudioError>;
