//! MIDI mappings declared by the UI and the channel messages they react to.

use serde::{Deserialize, Serialize};

use crate::playback::{ParamTarget, StartPos};
use crate::ClipId;

/// Incoming controller event. `channel: None` listens on every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MidiSource {
    Cc {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<u8>,
        controller: u8,
    },
    Note {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        channel: Option<u8>,
        /// `None` reacts to any note.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<u8>,
    },
}

/// What a matched mapping does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MidiAction {
    /// Scale a 0..=127 controller value into `min..=max` and set the parameter.
    SetParam {
        target: ParamTarget,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        name: String,
        #[serde(default)]
        min: f64,
        #[serde(default = "default_max")]
        max: f64,
    },
    /// Play on note-on, stop the voices it started on note-off.
    PlayClip {
        clip_id: ClipId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        start: Option<StartPos>,
    },
    /// Stop every voice of a clip on note-on.
    StopClip { clip_id: ClipId },
}

fn default_max() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MidiMapping {
    pub id: String,
    pub source: MidiSource,
    pub action: MidiAction,
}

impl MidiMapping {
    pub fn matches(&self, message: &MidiMessage) -> bool {
        let want_channel = |want: Option<u8>, got: u8| want.map_or(true, |c| c == got);
        match (self.source, *message) {
            (MidiSource::Cc { channel, controller }, MidiMessage::ControlChange { channel: ch, controller: cc, .. }) => {
                want_channel(channel, ch) && controller == cc
            }
            (MidiSource::Note { channel, note }, MidiMessage::NoteOn { channel: ch, note: n, .. })
            | (MidiSource::Note { channel, note }, MidiMessage::NoteOff { channel: ch, note: n }) => {
                want_channel(channel, ch) && note.map_or(true, |want| want == n)
            }
            _ => false,
        }
    }
}

/// Channel voice messages the mappings understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
}

impl MidiMessage {
    /// Parse a raw message. Anything other than note and CC messages yields `None`.
    pub fn parse(data: &[u8]) -> Option<MidiMessage> {
        let (&status, rest) = data.split_first()?;
        if rest.len() < 2 {
            return None;
        }
        let channel = status & 0x0F;
        match status & 0xF0 {
            0x80 => Some(MidiMessage::NoteOff { channel, note: rest[0] }),
            // velocity 0 = note off
            0x90 if rest[1] == 0 => Some(MidiMessage::NoteOff { channel, note: rest[0] }),
            0x90 => Some(MidiMessage::NoteOn { channel, note: rest[0], velocity: rest[1] }),
            0xB0 => Some(MidiMessage::ControlChange { channel, controller: rest[0], value: rest[1] }),
            _ => None,
        }
    }
}
