mod common;

use std::sync::{Arc, Mutex};

use squirrel_audio::backend::recording::{RecordedOp, Recorder, RecordingBackend};
use squirrel_audio::{AudioError, AudioFacade, BusEvent, Topic};
use squirrel_types::{
    AudioEvent, BackendKind, ClipId, ClipSpec, Command, EndReason, EventKind, MarkerArgs,
    PlayOpts, SetParamOpts, StopClipOpts, StopOpts, VoiceId,
};

use common::{collect, kinds};

fn facade_with(kind: BackendKind) -> (AudioFacade, Arc<Recorder>) {
    let mut facade = AudioFacade::new();
    let (backend, recorder) = RecordingBackend::new(kind);
    facade.register_backend(Box::new(backend));
    facade.set_backend(kind).unwrap();
    recorder.clear();
    (facade, recorder)
}

fn two_backends() -> (AudioFacade, Arc<Recorder>, Arc<Recorder>) {
    let mut facade = AudioFacade::new();
    let (native, native_rec) = RecordingBackend::new(BackendKind::Native);
    let (fallback, fallback_rec) = RecordingBackend::new(BackendKind::Fallback);
    facade.register_backend(Box::new(native));
    facade.register_backend(Box::new(fallback));
    (facade, native_rec, fallback_rec)
}

fn calls(recorder: &Recorder) -> Vec<RecordedOp> {
    recorder.operations().into_iter().filter(|op| *op != RecordedOp::Pump).collect()
}

#[test]
fn test_queued_commands_arrive_as_one_ordered_batch() {
    let (mut facade, recorder) = facade_with(BackendKind::Fallback);
    facade.create_clip(ClipSpec::new("c1", "kick.wav")).unwrap();
    facade
        .add_marker(MarkerArgs { clip_id: ClipId::new("c1"), name: "A".into(), frame: 100 })
        .unwrap();
    facade.stop(StopOpts { voice_id: VoiceId::new("v9"), release_ms: None }).unwrap();
    facade.stop_clip(StopClipOpts { clip_id: ClipId::new("c1"), release_ms: Some(10.0) }).unwrap();
    assert_eq!(facade.pending_commands(), 4);
    assert!(recorder.batches().is_empty());

    facade.tick();

    let batches = recorder.batches();
    assert_eq!(batches.len(), 1);
    let names: Vec<&str> = batches[0].iter().map(Command::name).collect();
    assert_eq!(names, vec!["create_clip", "add_marker", "stop", "stop_clip"]);
    assert_eq!(facade.pending_commands(), 0);
}

#[test]
fn test_empty_frame_dispatches_nothing() {
    let (mut facade, recorder) = facade_with(BackendKind::Fallback);
    facade.tick();
    facade.tick();
    assert!(recorder.batches().is_empty());
    assert_eq!(recorder.count(|op| *op == RecordedOp::Pump), 2);
}

#[test]
fn test_immediate_commands_bypass_the_queue() {
    let (mut facade, recorder) = facade_with(BackendKind::Native);
    facade.create_clip(ClipSpec::new("c1", "kick.wav")).unwrap();
    let voice = facade.play(PlayOpts::new("c1")).unwrap();
    facade.set_param(SetParamOpts::global("gain", 0.5)).unwrap();
    assert_eq!(voice, VoiceId::new("v1"));

    facade.tick();

    let ops = calls(&recorder);
    assert_eq!(ops.len(), 3);
    assert!(matches!(&ops[0], RecordedOp::Call(Command::Play(opts)) if opts.clip_id.as_str() == "c1"));
    assert!(matches!(&ops[1], RecordedOp::Call(Command::SetParam(_))));
    assert!(matches!(&ops[2], RecordedOp::Batch(batch) if batch.len() == 1));
}

#[test]
fn test_query_is_answered_synchronously() {
    let (mut facade, recorder) = facade_with(BackendKind::Fallback);
    assert_eq!(facade.query_clip(&ClipId::new("nope")), Ok(None));
    assert_eq!(facade.pending_commands(), 0);
    assert_eq!(recorder.count(|op| matches!(op, RecordedOp::Call(Command::QueryClip(_)))), 1);
}

#[test]
fn test_play_without_backend_fails_without_events() {
    let mut facade = AudioFacade::new();
    let log = collect(&mut facade, Topic::All);

    assert_eq!(facade.play(PlayOpts::new("c1")), Err(AudioError::NoActiveBackend));
    assert_eq!(facade.create_clip(ClipSpec::new("c1", "kick.wav")), Err(AudioError::NoActiveBackend));
    assert_eq!(facade.pending_commands(), 0);
    assert_eq!(facade.tick(), 0);
    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_set_backend_publishes_backend_changed() {
    let (mut facade, _native, _fallback) = two_backends();
    let log = collect(&mut facade, Topic::Kind(EventKind::BackendChanged));

    facade.set_backend(BackendKind::Fallback).unwrap();
    facade.set_backend(BackendKind::Native).unwrap();

    let events: Vec<AudioEvent> = log.lock().unwrap().iter().map(|e| e.event.clone()).collect();
    assert_eq!(
        events,
        vec![
            AudioEvent::BackendChanged { backend: BackendKind::Fallback, previous: None },
            AudioEvent::BackendChanged { backend: BackendKind::Native, previous: Some(BackendKind::Fallback) },
        ]
    );
    assert_eq!(facade.active_backend(), Some(BackendKind::Native));
}

#[test]
fn test_set_backend_to_unregistered_kind_fails() {
    let mut facade = AudioFacade::new();
    let (backend, _recorder) = RecordingBackend::new(BackendKind::Fallback);
    facade.register_backend(Box::new(backend));
    assert_eq!(facade.set_backend(BackendKind::Native), Err(AudioError::UnknownBackend(BackendKind::Native)));
    assert_eq!(facade.active_backend(), None);
}

#[test]
fn test_only_the_active_backend_receives_commands() {
    let (mut facade, native, fallback) = two_backends();
    facade.set_backend(BackendKind::Fallback).unwrap();
    facade.play(PlayOpts::new("c1")).unwrap();
    facade.create_clip(ClipSpec::new("c1", "kick.wav")).unwrap();
    facade.tick();

    facade.set_backend(BackendKind::Native).unwrap();
    fallback.clear();
    facade.play(PlayOpts::new("c2")).unwrap();
    facade.tick();

    assert!(calls(&fallback).is_empty());
    assert_eq!(fallback.count(|op| *op == RecordedOp::Pump), 0);
    let native_calls = calls(&native);
    assert_eq!(native_calls.len(), 1);
    assert!(matches!(&native_calls[0], RecordedOp::Call(Command::Play(opts)) if opts.clip_id.as_str() == "c2"));
}

#[test]
fn test_queued_commands_follow_a_backend_swap() {
    let (mut facade, native, fallback) = two_backends();
    facade.set_backend(BackendKind::Fallback).unwrap();
    facade.create_clip(ClipSpec::new("c1", "kick.wav")).unwrap();
    facade.set_backend(BackendKind::Native).unwrap();
    facade.tick();

    assert!(fallback.batches().is_empty());
    assert_eq!(native.batches().len(), 1);
}

#[test]
fn test_events_carry_their_origin() {
    let (mut facade, native, fallback) = two_backends();
    facade.set_backend(BackendKind::Fallback).unwrap();
    let scoped = collect(&mut facade, Topic::Scoped(BackendKind::Fallback, EventKind::VoiceEnded));
    let other = collect(&mut facade, Topic::Scoped(BackendKind::Native, EventKind::VoiceEnded));
    let bare = collect(&mut facade, Topic::Kind(EventKind::VoiceEnded));

    let ended = AudioEvent::VoiceEnded {
        clip_id: ClipId::new("c1"),
        voice_id: VoiceId::new("v1"),
        reason: EndReason::Finished,
    };
    fallback.push_event(ended.clone());
    native.push_event(ended.clone());
    assert_eq!(facade.tick(), 1);

    assert_eq!(
        *scoped.lock().unwrap(),
        vec![BusEvent { origin: Some(BackendKind::Fallback), event: ended.clone() }]
    );
    assert!(other.lock().unwrap().is_empty());
    assert_eq!(bare.lock().unwrap().len(), 1);
}

#[test]
fn test_events_of_the_old_backend_are_dropped_on_swap() {
    let (mut facade, _native, fallback) = two_backends();
    facade.set_backend(BackendKind::Fallback).unwrap();
    let log = collect(&mut facade, Topic::Kind(EventKind::VoiceEnded));

    fallback.push_event(AudioEvent::VoiceEnded {
        clip_id: ClipId::new("c1"),
        voice_id: VoiceId::new("v1"),
        reason: EndReason::Stopped,
    });
    facade.set_backend(BackendKind::Native).unwrap();
    facade.tick();
    facade.set_backend(BackendKind::Fallback).unwrap();
    facade.tick();

    assert!(log.lock().unwrap().is_empty());
}

#[test]
fn test_detect_picks_first_available_in_order() {
    let (mut facade, native, _fallback) = two_backends();
    native.set_available(false);

    assert_eq!(
        facade.detect_and_set_backend(&[BackendKind::Native, BackendKind::Fallback]),
        Some(BackendKind::Fallback)
    );
    native.set_available(true);
    assert_eq!(
        facade.detect_and_set_backend(&[BackendKind::Native, BackendKind::Fallback]),
        Some(BackendKind::Native)
    );
}

#[test]
fn test_detect_with_nothing_available_clears_the_active_backend() {
    let (mut facade, native, fallback) = two_backends();
    facade.set_backend(BackendKind::Native).unwrap();
    native.set_available(false);
    fallback.set_available(false);

    assert_eq!(facade.detect_and_set_backend(&BackendKind::ALL), None);
    assert_eq!(facade.active_backend(), None);
    assert_eq!(facade.play(PlayOpts::new("c1")), Err(AudioError::NoActiveBackend));
}

#[test]
fn test_register_replaces_same_kind() {
    let (mut facade, first) = facade_with(BackendKind::Fallback);
    let (backend, second) = RecordingBackend::new(BackendKind::Fallback);
    assert!(facade.register_backend(Box::new(backend)).is_some());
    assert!(facade.has_backend(BackendKind::Fallback));

    facade.play(PlayOpts::new("c1")).unwrap();
    assert!(calls(&first).is_empty());
    assert_eq!(calls(&second).len(), 1);
}

#[test]
fn test_panicking_subscriber_does_not_block_others() {
    let (mut facade, recorder) = facade_with(BackendKind::Fallback);
    facade.subscribe(Topic::All, |_e: &BusEvent| panic!("subscriber bug"));
    let log = collect(&mut facade, Topic::All);

    recorder.push_event(AudioEvent::ClipReady { clip_id: ClipId::new("c1"), frames: 10, sample_rate: 48_000 });
    facade.tick();
    assert_eq!(kinds(&log), vec![EventKind::ClipReady]);
}

#[test]
fn test_unsubscribe_stops_delivery() {
    let (mut facade, recorder) = facade_with(BackendKind::Fallback);
    let seen = Arc::new(Mutex::new(0));
    let counter = Arc::clone(&seen);
    let id = facade.subscribe(Topic::Kind(EventKind::ClipReady), move |_e: &BusEvent| {
        *counter.lock().unwrap() += 1;
    });

    let ready = AudioEvent::ClipReady { clip_id: ClipId::new("c1"), frames: 10, sample_rate: 48_000 };
    recorder.push_event(ready.clone());
    facade.tick();
    assert!(facade.unsubscribe(id));
    recorder.push_event(ready);
    facade.tick();
    assert_eq!(*seen.lock().unwrap(), 1);
}

#[test]
fn test_failed_immediate_command_is_reported() {
    let (mut facade, recorder) = facade_with(BackendKind::Fallback);
    recorder.fail_on("play");
    assert!(matches!(facade.play(PlayOpts::new("c1")), Err(AudioError::InvalidArgument(_))));
    assert_eq!(facade.pending_commands(), 0);
}

#[test]
fn test_midi_goes_to_the_active_backend() {
    let (mut facade, recorder) = facade_with(BackendKind::Fallback);
    facade.midi_input(&[0x90, 36, 100]).unwrap();
    assert_eq!(calls(&recorder), vec![RecordedOp::Midi(vec![0x90, 36, 100])]);
}
