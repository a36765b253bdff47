//! Synchronous, ordered fan-out of dashboard events to registered handlers.
//!
//! Delivery happens on the emitting task, in registration order, with every
//! handler isolated from the others: a handler that returns an error or
//! panics is reported to the fallback channel and delivery continues with the
//! next one. Async consumers can additionally tap a broadcast
//! [`stream`](EventEmitter::stream).

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::event::DashboardEvent;

/// Result returned by event handlers.
pub type HandlerResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

type Callback = Arc<dyn Fn(&DashboardEvent) -> HandlerResult + Send + Sync>;
type Fallback = Arc<dyn Fn(&DeliveryFailure) + Send + Sync>;

/// Which events a subscription receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Every event (wildcard).
    All,
    /// Only events whose wire type equals the given string.
    Type(String),
}

impl EventFilter {
    /// Filter on one wire event type, e.g. `"filterSelectionChanged"`.
    pub fn of_type(event_type: impl Into<String>) -> Self {
        Self::Type(event_type.into())
    }

    /// Whether a subscription with this filter receives `event`.
    pub fn matches(&self, event: &DashboardEvent) -> bool {
        match self {
            Self::All => true,
            Self::Type(event_type) => event.event_type() == event_type,
        }
    }
}

/// Report of a handler that failed to process an event.
#[derive(Debug, Clone)]
pub struct DeliveryFailure {
    pub subscription: u64,
    pub event_type: &'static str,
    pub correlation_id: Option<String>,
    pub message: String,
    /// `true` when the handler panicked rather than returning an error.
    pub panicked: bool,
}

struct Registration {
    id: u64,
    filter: EventFilter,
    callback: Callback,
}

struct Inner {
    registrations: Mutex<Vec<Registration>>,
    next_id: AtomicU64,
    fallback: Fallback,
    stream_tx: broadcast::Sender<DashboardEvent>,
}

impl Inner {
    fn registrations(&self) -> MutexGuard<'_, Vec<Registration>> {
        // Handlers never run under this lock, so a poisoned guard still holds
        // a consistent list.
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publishes events to subscribers.
///
/// Cheap to clone; all clones share the same subscriber list.
#[derive(Clone)]
pub struct EventEmitter {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("subscribers", &self.subscriber_count())
            .finish_non_exhaustive()
    }
}

impl EventEmitter {
    /// Create an emitter whose delivery failures are logged with
    /// `tracing::error!`.
    ///
    /// # Arguments
    ///
    /// * `stream_buffer` - Capacity of the broadcast channel behind
    ///   [`stream`](Self::stream); slow stream consumers skip events once it
    ///   overflows.
    pub fn new(stream_buffer: usize) -> Self {
        Self::with_fallback(stream_buffer, |failure: &DeliveryFailure| {
            tracing::error!(
                subscription = failure.subscription,
                event_type = failure.event_type,
                correlation_id = failure.correlation_id.as_deref(),
                panicked = failure.panicked,
                error = %failure.message,
                "event handler failed"
            );
        })
    }

    /// Create an emitter with a custom fallback channel for delivery failures.
    pub fn with_fallback(
        stream_buffer: usize,
        fallback: impl Fn(&DeliveryFailure) + Send + Sync + 'static,
    ) -> Self {
        let (stream_tx, _) = broadcast::channel(stream_buffer.max(1));
        Self {
            inner: Arc::new(Inner {
                registrations: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                fallback: Arc::new(fallback),
                stream_tx,
            }),
        }
    }

    /// Register a handler.
    ///
    /// The handler stays registered until [`Subscription::dispose`] is called;
    /// dropping the returned handle does not unsubscribe.
    pub fn on<F>(&self, filter: EventFilter, handler: F) -> Subscription
    where
        F: Fn(&DashboardEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.registrations().push(Registration {
            id,
            filter,
            callback: Arc::new(handler),
        });
        tracing::debug!(subscription = id, "event handler registered");
        Subscription {
            id,
            emitter: Arc::downgrade(&self.inner),
            disposed: AtomicBool::new(false),
        }
    }

    /// Deliver `event` to every matching handler, in registration order.
    ///
    /// The subscriber list is snapshotted before delivery starts: handlers
    /// added or disposed during delivery take effect from the next event.
    pub fn emit(&self, event: &DashboardEvent) {
        let targets: Vec<(u64, Callback)> = self
            .inner
            .registrations()
            .iter()
            .filter(|registration| registration.filter.matches(event))
            .map(|registration| (registration.id, Arc::clone(&registration.callback)))
            .collect();

        for (id, callback) in targets {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| callback(event)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => (e.to_string(), false),
                Err(payload) => (panic_message(payload.as_ref()), true),
            };
            (self.inner.fallback)(&DeliveryFailure {
                subscription: id,
                event_type: event.event_type(),
                correlation_id: event.correlation_id.clone(),
                message: failure.0,
                panicked: failure.1,
            });
        }

        // No stream consumers is not an error.
        let _ = self.inner.stream_tx.send(event.clone());
    }

    /// Every event emitted from now on, as an async stream.
    pub fn stream(&self) -> BroadcastStream<DashboardEvent> {
        BroadcastStream::new(self.inner.stream_tx.subscribe())
    }

    /// Number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        self.inner.registrations().len()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Handle to a registered event handler.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    emitter: Weak<Inner>,
    disposed: AtomicBool,
}

impl Subscription {
    /// Id reported in [`DeliveryFailure::subscription`].
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove the handler. Idempotent.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(inner) = self.emitter.upgrade() {
            inner.registrations().retain(|r| r.id != self.id);
            tracing::debug!(subscription = self.id, "event handler disposed");
        }
    }

    /// `false` once disposed or once the emitter itself is gone.
    pub fn is_active(&self) -> bool {
        !self.disposed.load(Ordering::Acquire) && self.emitter.strong_count() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBody;
    use std::sync::Mutex;
    use tokio_stream::StreamExt;

    fn renamed(title: &str) -> DashboardEvent {
        DashboardEvent::new(
            EventBody::DashboardRenamed {
                title: title.to_string(),
            },
            Some(format!("corr-{title}")),
        )
    }

    fn drilled() -> DashboardEvent {
        DashboardEvent::new(
            EventBody::DrillTriggered {
                widget_id: "w1".into(),
                definition: serde_json::Value::Null,
            },
            None,
        )
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> Callback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let log = Arc::clone(&log);
            move |tag: &str| -> Callback {
                let log = Arc::clone(&log);
                let tag = tag.to_string();
                Arc::new(move |event: &DashboardEvent| {
                    log.lock()
                        .expect("lock")
                        .push(format!("{tag}:{}", event.event_type()));
                    Ok(())
                })
            }
        };
        (log, make)
    }

    #[test]
    fn delivers_in_registration_order_including_wildcards() {
        let emitter = EventEmitter::new(8);
        let (log, make) = recorder();
        let a = make("a");
        let b = make("b");
        let c = make("c");
        let _s1 = emitter.on(EventFilter::of_type("dashboardRenamed"), move |e| a(e));
        let _s2 = emitter.on(EventFilter::All, move |e| b(e));
        let _s3 = emitter.on(EventFilter::of_type("dashboardRenamed"), move |e| c(e));

        emitter.emit(&renamed("x"));
        emitter.emit(&drilled());

        assert_eq!(
            *log.lock().expect("lock"),
            vec![
                "a:dashboardRenamed",
                "b:dashboardRenamed",
                "c:dashboardRenamed",
                "b:drillTriggered",
            ]
        );
    }

    #[test]
    fn failing_and_panicking_handlers_do_not_stop_delivery() {
        let failures = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&failures);
        let emitter = EventEmitter::with_fallback(8, move |failure: &DeliveryFailure| {
            sink.lock().expect("lock").push(failure.clone());
        });
        let (log, make) = recorder();
        let last = make("last");

        let _s1 = emitter.on(EventFilter::All, |_| Err("nope".into()));
        let _s2 = emitter.on(EventFilter::All, |_| panic!("kaboom"));
        let _s3 = emitter.on(EventFilter::All, move |e| last(e));

        emitter.emit(&renamed("x"));

        assert_eq!(*log.lock().expect("lock"), vec!["last:dashboardRenamed"]);
        let failures = failures.lock().expect("lock");
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].message, "nope");
        assert!(!failures[0].panicked);
        assert_eq!(failures[1].message, "kaboom");
        assert!(failures[1].panicked);
        assert_eq!(failures[1].correlation_id.as_deref(), Some("corr-x"));
    }

    #[test]
    fn dispose_during_delivery_takes_effect_for_next_event() {
        let emitter = EventEmitter::new(8);
        let (log, make) = recorder();
        let second = make("second");
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let slot_for_first = Arc::clone(&slot);
        let _first = emitter.on(EventFilter::All, move |_| {
            if let Some(sub) = slot_for_first.lock().expect("lock").as_ref() {
                sub.dispose();
            }
            Ok(())
        });
        let sub = emitter.on(EventFilter::All, move |e| second(e));
        *slot.lock().expect("lock") = Some(sub);

        emitter.emit(&renamed("one"));
        emitter.emit(&renamed("two"));

        // Snapshot semantics: the disposed handler still sees the event that
        // was in flight when it was disposed, and nothing after.
        assert_eq!(*log.lock().expect("lock"), vec!["second:dashboardRenamed"]);
        assert_eq!(emitter.subscriber_count(), 1);
    }

    #[test]
    fn dispose_is_idempotent_and_drop_keeps_handler() {
        let emitter = EventEmitter::new(8);
        let sub = emitter.on(EventFilter::All, |_| Ok(()));
        drop(emitter.on(EventFilter::All, |_| Ok(())));
        assert_eq!(emitter.subscriber_count(), 2);

        sub.dispose();
        sub.dispose();
        assert!(!sub.is_active());
        assert_eq!(emitter.subscriber_count(), 1);
    }

    #[test]
    fn handler_may_subscribe_during_delivery() {
        let emitter = EventEmitter::new(8);
        let inner = emitter.clone();
        let _s = emitter.on(EventFilter::of_type("dashboardRenamed"), move |_| {
            let _ = inner.on(EventFilter::All, |_| Ok(()));
            Ok(())
        });
        emitter.emit(&renamed("x"));
        assert_eq!(emitter.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn stream_receives_emitted_events() {
        let emitter = EventEmitter::new(8);
        let mut stream = emitter.stream();
        emitter.emit(&renamed("x"));
        emitter.emit(&drilled());

        let first = stream
            .next()
            .await
            .expect("stream should yield")
            .expect("no lag");
        assert_eq!(first.event_type(), "dashboardRenamed");
        let second = stream
            .next()
            .await
            .expect("stream should yield")
            .expect("no lag");
        assert_eq!(second.event_type(), "drillTriggered");
    }
}
