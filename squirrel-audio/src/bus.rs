//! Topic-based publish/subscribe for audio events.
//!
//! Subscribers register on a [`Topic`]: every event, one event kind, or one
//! event kind coming from a specific backend. A published event reaches each
//! matching subscription exactly once, in subscription order. Handler panics
//! are caught and logged so one faulty subscriber cannot starve the rest.

use std::panic::{self, AssertUnwindSafe};

use squirrel_types::{AudioEvent, BackendKind, EventKind};

/// An event as delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct BusEvent {
    /// Backend that produced the event. `None` for facade-level events.
    pub origin: Option<BackendKind>,
    pub event: AudioEvent,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Topic {
    All,
    Kind(EventKind),
    /// Only events of this kind from this backend.
    Scoped(BackendKind, EventKind),
}

impl Topic {
    fn matches(&self, published: &BusEvent, kind: &EventKind) -> bool {
        match self {
            Topic::All => true,
            Topic::Kind(want) => want == kind,
            Topic::Scoped(backend, want) => published.origin == Some(*backend) && want == kind,
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Topic::All => f.write_str("*"),
            Topic::Kind(kind) => write!(f, "{}", kind),
            Topic::Scoped(backend, kind) => write!(f, "av:audio:{}:{}", backend, kind),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

pub type EventHandler = Box<dyn FnMut(&BusEvent) + Send>;

struct Subscription {
    id: SubscriptionId,
    topic: Topic,
    handler: EventHandler,
}

#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    next_id: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&mut self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: FnMut(&BusEvent) + Send + 'static,
    {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        self.subscriptions.push(Subscription { id, topic, handler: Box::new(handler) });
        id
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Deliver to every matching subscription. Returns how many handlers ran
    /// to completion.
    pub fn publish(&mut self, published: &BusEvent) -> usize {
        let kind = published.event.kind();
        let mut delivered = 0;
        for sub in self.subscriptions.iter_mut() {
            if !sub.topic.matches(published, &kind) {
                continue;
            }
            let handler = &mut sub.handler;
            match panic::catch_unwind(AssertUnwindSafe(|| handler(published))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    log::warn!(
                        target: "audio::bus",
                        "subscriber on '{}' panicked handling {}: {}",
                        sub.topic, kind, message
                    );
                }
            }
        }
        delivered
    }

    pub fn emit(&mut self, origin: Option<BackendKind>, event: AudioEvent) -> usize {
        self.publish(&BusEvent { origin, event })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use squirrel_types::{ClipId, EndReason, VoiceId};

    fn ended(voice: &str) -> AudioEvent {
        AudioEvent::VoiceEnded {
            clip_id: ClipId::new("c1"),
            voice_id: VoiceId::new(voice),
            reason: EndReason::Finished,
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, tag: &'static str) -> impl FnMut(&BusEvent) + Send {
        let log = Arc::clone(log);
        move |_e: &BusEvent| log.lock().unwrap().push(tag.to_string())
    }

    #[test]
    fn delivers_in_subscription_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(Topic::Kind(EventKind::VoiceEnded), recorder(&log, "a"));
        bus.subscribe(Topic::All, recorder(&log, "b"));
        bus.subscribe(Topic::Scoped(BackendKind::Fallback, EventKind::VoiceEnded), recorder(&log, "c"));
        bus.subscribe(Topic::Kind(EventKind::MarkerHit), recorder(&log, "skip"));

        let delivered = bus.emit(Some(BackendKind::Fallback), ended("v1"));
        assert_eq!(delivered, 3);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn scoped_topic_filters_on_origin() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(Topic::Scoped(BackendKind::Native, EventKind::VoiceEnded), recorder(&log, "native"));
        bus.emit(Some(BackendKind::Fallback), ended("v1"));
        bus.emit(None, ended("v2"));
        assert!(log.lock().unwrap().is_empty());
        bus.emit(Some(BackendKind::Native), ended("v3"));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn panicking_handler_does_not_stop_delivery() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        bus.subscribe(Topic::All, |_e: &BusEvent| panic!("boom"));
        bus.subscribe(Topic::All, recorder(&log, "after"));

        let delivered = bus.emit(None, ended("v1"));
        assert_eq!(delivered, 1);
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }

    #[test]
    fn unsubscribe_reports_existence() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut bus = EventBus::new();
        let id = bus.subscribe(Topic::All, recorder(&log, "x"));
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(None, ended("v1"));
        assert!(log.lock().unwrap().is_empty());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn scoped_topic_renders_channel_name() {
        let topic = Topic::Scoped(BackendKind::Native, EventKind::MarkerHit);
        assert_eq!(topic.to_string(), "av:audio:native:marker_hit");
    }
}
