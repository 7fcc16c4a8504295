//! Typed record lifecycle events.
//!
//! # Responsibility
//! - Route lifecycle notifications to subscribers keyed by event kind and
//!   entity type.
//!
//! # Invariants
//! - Publishing never depends on how many subscribers exist.
//! - Handlers receive the record read-only.

use crate::model::record::Record;
use crate::model::value::Value;
use std::collections::BTreeMap;

/// Lifecycle point or application-defined event name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    BeforeSave,
    AfterSave,
    BeforeDelete,
    AfterDelete,
    Custom(String),
}

impl EventKind {
    pub fn custom(name: impl Into<String>) -> Self {
        Self::Custom(name.into())
    }
}

/// Data handed to every subscriber.
#[derive(Debug)]
pub struct EventContext<'a> {
    pub kind: &'a EventKind,
    pub record: &'a Record,
    pub payload: &'a [Value],
}

impl EventContext<'_> {
    pub fn entity(&self) -> &str {
        self.record.entity()
    }
}

/// Subscriber callback.
pub type EventHandler = Box<dyn Fn(&EventContext<'_>)>;

/// Subscription registry for one session.
#[derive(Default)]
pub struct EventBus {
    handlers: BTreeMap<(EventKind, String), Vec<EventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        entity: impl Into<String>,
        kind: EventKind,
        handler: impl Fn(&EventContext<'_>) + 'static,
    ) {
        self.handlers
            .entry((kind, entity.into()))
            .or_default()
            .push(Box::new(handler));
    }

    /// Invokes every handler subscribed to `(kind, record.entity())`.
    pub fn publish(&self, kind: &EventKind, record: &Record, payload: &[Value]) {
        let key = (kind.clone(), record.entity().to_string());
        let Some(handlers) = self.handlers.get(&key) else {
            return;
        };
        let context = EventContext {
            kind,
            record,
            payload,
        };
        for handler in handlers {
            handler(&context);
        }
    }

    pub fn subscriber_count(&self, entity: &str, kind: &EventKind) -> usize {
        self.handlers
            .get(&(kind.clone(), entity.to_string()))
            .map_or(0, Vec::len)
    }
}
