//! Typed publish/subscribe channel owned by one runtime.
//!
//! Handlers run in registration order. A handler that returns an error or
//! panics is logged and skipped; the remaining handlers of the same emission
//! still run.

use std::{
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    rc::Rc,
};

use serde::Serialize;
use serde_json::Value;

/// Event types a handler can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    Ready,
    Change,
    Submit,
    FieldShow,
    FieldHide,
    Reset,
    Error,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Ready => "ready",
            EventKind::Change => "change",
            EventKind::Submit => "submit",
            EventKind::FieldShow => "fieldShow",
            EventKind::FieldHide => "fieldHide",
            EventKind::Reset => "reset",
            EventKind::Error => "error",
        };
        f.write_str(name)
    }
}

/// An event and its payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum FormEvent {
    Ready { schema: Value },
    Change { field: String, value: Value, form_data: Value },
    Submit { form_data: Value },
    FieldShow { field: String, reason: String },
    FieldHide { field: String, reason: String },
    Reset { form_data: Value },
    Error { message: String },
}

impl FormEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            FormEvent::Ready { .. } => EventKind::Ready,
            FormEvent::Change { .. } => EventKind::Change,
            FormEvent::Submit { .. } => EventKind::Submit,
            FormEvent::FieldShow { .. } => EventKind::FieldShow,
            FormEvent::FieldHide { .. } => EventKind::FieldHide,
            FormEvent::Reset { .. } => EventKind::Reset,
            FormEvent::Error { .. } => EventKind::Error,
        }
    }
}

/// Event handler. Returning an error does not stop other handlers.
pub type Handler = Rc<dyn Fn(&FormEvent) -> anyhow::Result<()>>;

/// Token returned by a subscription, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

struct Entry {
    token: Subscription,
    /// `None` subscribes to every event.
    kind: Option<EventKind>,
    handler: Handler,
}

/// Per-runtime event bus.
#[derive(Default)]
pub struct EventBus {
    entries: Vec<Entry>,
    next_token: u64,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.entries.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribe(&mut self, kind: Option<EventKind>, handler: Handler) -> Subscription {
        let token = Subscription(self.next_token);
        self.next_token += 1;
        self.entries.push(Entry {
            token,
            kind,
            handler,
        });
        token
    }

    /// Subscribe to one event type.
    pub fn on(
        &mut self,
        kind: EventKind,
        handler: impl Fn(&FormEvent) -> anyhow::Result<()> + 'static,
    ) -> Subscription {
        self.subscribe(Some(kind), Rc::new(handler))
    }

    /// Subscribe to every event. The handler can tell events apart with
    /// [`FormEvent::kind`].
    pub fn on_any(
        &mut self,
        handler: impl Fn(&FormEvent) -> anyhow::Result<()> + 'static,
    ) -> Subscription {
        self.subscribe(None, Rc::new(handler))
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn off(&mut self, token: Subscription) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.token != token);
        self.entries.len() != before
    }

    /// Number of handlers that would receive an event of `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.entries
            .iter()
            .filter(|e| e.kind.is_none_or(|k| k == kind))
            .count()
    }

    /// Deliver `event` to every matching handler.
    pub fn emit(&self, event: &FormEvent) {
        let kind = event.kind();
        let handlers: Vec<Handler> = self
            .entries
            .iter()
            .filter(|e| e.kind.is_none_or(|k| k == kind))
            .map(|e| e.handler.clone())
            .collect();

        trace!("emit {kind} to {} handler(s)", handlers.len());
        for handler in handlers {
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("{kind} handler failed: {e:#}"),
                Err(_) => warn!("{kind} handler panicked"),
            }
        }
    }
}
