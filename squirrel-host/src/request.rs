//! Line protocol read from stdin and written to stdout.
//!
//! Each input line is a facade command (`{"name": "play", "arg": {...}}`) or
//! one of the host controls `set_backend`, `detect_backend` and `quit`.
//! Output lines are `{type, payload}` envelopes: published events carry their
//! origin, command outcomes are typed `result` or `error`.

use serde_json::{json, Value};
use squirrel_audio::{AudioError, BusEvent, Outcome};
use squirrel_types::{BackendKind, Command};

#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Command(Command),
    SetBackend(BackendKind),
    /// Empty means the configured preference order.
    DetectBackend(Vec<BackendKind>),
    Quit,
}

pub fn parse_request(line: &str) -> Result<Request, String> {
    let value: Value = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let name = value.get("name").and_then(Value::as_str).unwrap_or_default();
    let arg = value.get("arg");
    match name {
        "quit" => Ok(Request::Quit),
        "set_backend" => {
            let kind = arg.and_then(Value::as_str).ok_or("set_backend needs a backend name")?;
            kind.parse().map(Request::SetBackend)
        }
        "detect_backend" => {
            let names = arg.and_then(Value::as_array).map(Vec::as_slice).unwrap_or_default();
            names
                .iter()
                .map(|n| n.as_str().ok_or_else(|| format!("bad backend {}", n)).and_then(str::parse))
                .collect::<Result<Vec<_>, _>>()
                .map(Request::DetectBackend)
        }
        _ => serde_json::from_value(value).map(Request::Command).map_err(|e| e.to_string()),
    }
}

pub fn event_line(event: &BusEvent) -> Value {
    let origin = event.origin.map(BackendKind::as_str);
    match event.event.to_wire() {
        Ok(wire) => json!({ "type": wire.kind, "origin": origin, "payload": wire.payload }),
        Err(e) => json!({ "type": "error", "payload": { "error": e.to_string() } }),
    }
}

pub fn outcome_line(name: &str, result: &Result<Outcome, AudioError>) -> Option<Value> {
    match result {
        Ok(Outcome::Accepted) => None,
        Ok(Outcome::Voice(id)) => Some(json!({ "type": "result", "payload": { "name": name, "voice_id": id } })),
        Ok(Outcome::Clip(info)) => Some(json!({ "type": "result", "payload": { "name": name, "clip": info } })),
        Err(e) => Some(error_line(name, &e.to_string())),
    }
}

pub fn error_line(name: &str, error: &str) -> Value {
    json!({ "type": "error", "payload": { "name": name, "error": error } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use squirrel_types::{AudioEvent, ClipId, EndReason, VoiceId};

    #[test]
    fn parses_facade_commands() {
        let request = parse_request(r#"{"name":"play","arg":{"clip_id":"c1"}}"#).unwrap();
        assert!(matches!(request, Request::Command(Command::Play(opts)) if opts.clip_id.as_str() == "c1"));
    }

    #[test]
    fn parses_host_controls() {
        assert_eq!(parse_request(r#"{"name":"quit"}"#), Ok(Request::Quit));
        assert_eq!(
            parse_request(r#"{"name":"set_backend","arg":"html"}"#),
            Ok(Request::SetBackend(BackendKind::Fallback))
        );
        assert_eq!(
            parse_request(r#"{"name":"detect_backend","arg":["native","fallback"]}"#),
            Ok(Request::DetectBackend(vec![BackendKind::Native, BackendKind::Fallback]))
        );
        assert_eq!(parse_request(r#"{"name":"detect_backend"}"#), Ok(Request::DetectBackend(Vec::new())));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_request("not json").is_err());
        assert!(parse_request(r#"{"name":"fly","arg":{}}"#).is_err());
        assert!(parse_request(r#"{"name":"set_backend","arg":"vst"}"#).is_err());
    }

    #[test]
    fn events_carry_their_origin() {
        let event = BusEvent {
            origin: Some(BackendKind::Fallback),
            event: AudioEvent::VoiceEnded {
                clip_id: ClipId::new("c1"),
                voice_id: VoiceId::new("v1"),
                reason: EndReason::Stopped,
            },
        };
        let line = event_line(&event);
        assert_eq!(line["type"], "voice_ended");
        assert_eq!(line["origin"], "fallback");
        assert_eq!(line["payload"]["reason"], "stopped");
    }

    #[test]
    fn accepted_commands_print_nothing() {
        assert_eq!(outcome_line("stop", &Ok(Outcome::Accepted)), None);
        let line = outcome_line("play", &Ok(Outcome::Voice(VoiceId::new("v3")))).unwrap();
        assert_eq!(line["payload"]["voice_id"], "v3");
        let line = outcome_line("play", &Err(AudioError::NoActiveBackend)).unwrap();
        assert_eq!(line["type"], "error");
    }
}
