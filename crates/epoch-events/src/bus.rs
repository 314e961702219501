use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Result of a cancellable listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventResult {
    /// Pass to the next listener.
    Continue,
    /// Stop here; the action proceeds and the listener took care of it.
    Handled,
    /// Stop here; the action is refused.
    Cancel,
}

impl EventResult {
    pub fn is_cancelled(&self) -> bool {
        *self == EventResult::Cancel
    }
}

type Callback<E, R> = Arc<dyn Fn(&E) -> anyhow::Result<R> + Send + Sync>;

/// A registered listener with its owner label.
struct ListenerEntry<E, R> {
    owner: String,
    listener_id: u64,
    callback: Callback<E, R>,
}

impl<E, R> Clone for ListenerEntry<E, R> {
    fn clone(&self) -> Self {
        Self {
            owner: self.owner.clone(),
            listener_id: self.listener_id,
            callback: self.callback.clone(),
        }
    }
}

impl<E, R> ListenerEntry<E, R> {
    /// Run the callback. A panic comes back as an error.
    fn call(&self, event: &E) -> anyhow::Result<R> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.callback)(event))) {
            Ok(result) => result,
            Err(payload) => Err(anyhow::anyhow!("panicked: {}", panic_message(&*payload))),
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown cause"
    }
}

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Append-only listener list. Invocations work on a snapshot, so a
/// registration racing an invocation is seen by the next one or not at all.
struct Listeners<E, R> {
    entries: RwLock<Arc<[ListenerEntry<E, R>]>>,
}

impl<E, R> Listeners<E, R> {
    fn new() -> Self {
        Self {
            entries: RwLock::new(Arc::from(Vec::new())),
        }
    }

    fn push(&self, owner: &str, callback: Callback<E, R>) -> u64 {
        let listener_id = NEXT_LISTENER_ID.fetch_add(1, Ordering::Relaxed);
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut list = guard.to_vec();
        list.push(ListenerEntry {
            owner: owner.to_string(),
            listener_id,
            callback,
        });
        *guard = Arc::from(list);
        listener_id
    }

    fn snapshot(&self) -> Arc<[ListenerEntry<E, R>]> {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// A cancellable event. Listeners run in registration order until one
/// returns something other than [`EventResult::Continue`].
pub struct CancellableEvent<E> {
    name: &'static str,
    listeners: Listeners<E, EventResult>,
}

impl<E> CancellableEvent<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Listeners::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Register a listener. Returns its id.
    pub fn register<F>(&self, owner: &str, callback: F) -> u64
    where
        F: Fn(&E) -> anyhow::Result<EventResult> + Send + Sync + 'static,
    {
        self.listeners.push(owner, Arc::new(callback))
    }

    /// Run the listeners. A listener that fails or panics is logged and
    /// counts as `Continue`.
    pub fn invoke(&self, event: &E) -> EventResult {
        for entry in self.listeners.snapshot().iter() {
            match entry.call(event) {
                Ok(EventResult::Continue) => {}
                Ok(result) => return result,
                Err(e) => warn!(
                    "Listener {} of '{}' on {} failed: {:#}",
                    entry.listener_id, entry.owner, self.name, e
                ),
            }
        }
        EventResult::Continue
    }

    pub fn len(&self) -> usize {
        self.listeners.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> fmt::Debug for CancellableEvent<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellableEvent")
            .field("name", &self.name)
            .field("listeners", &self.len())
            .finish()
    }
}

/// A notification. Every listener runs regardless of what the others do.
pub struct Event<E> {
    name: &'static str,
    listeners: Listeners<E, ()>,
}

impl<E> Event<E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            listeners: Listeners::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn register<F>(&self, owner: &str, callback: F) -> u64
    where
        F: Fn(&E) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.listeners.push(owner, Arc::new(callback))
    }

    /// Run every listener. Failures and panics are logged.
    pub fn fire(&self, event: &E) {
        for entry in self.listeners.snapshot().iter() {
            if let Err(e) = entry.call(event) {
                warn!(
                    "Listener {} of '{}' on {} failed: {:#}",
                    entry.listener_id, entry.owner, self.name, e
                );
            }
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<E> fmt::Debug for Event<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("name", &self.name)
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_no_listeners_continues() {
        let event: CancellableEvent<u32> = CancellableEvent::new("test");
        assert_eq!(event.invoke(&1), EventResult::Continue);
        assert!(event.is_empty());
    }

    #[test]
    fn test_registration_order_is_invocation_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let event: Event<&'static str> = Event::new("test");
        for owner in ["first", "second", "third"] {
            let seen = seen.clone();
            event.register(owner, move |_| {
                seen.lock().unwrap().push(owner);
                Ok(())
            });
        }
        event.fire(&"go");
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_cancel_stops_later_listeners() {
        let calls = Arc::new(AtomicU64::new(0));
        let event: CancellableEvent<i32> = CancellableEvent::new("test");
        let c = calls.clone();
        event.register("guard", move |value| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(if *value < 0 {
                EventResult::Cancel
            } else {
                EventResult::Continue
            })
        });
        let c = calls.clone();
        event.register("late", move |_| {
            c.fetch_add(10, Ordering::SeqCst);
            Ok(EventResult::Continue)
        });

        assert_eq!(event.invoke(&-1), EventResult::Cancel);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(event.invoke(&1), EventResult::Continue);
        assert_eq!(calls.load(Ordering::SeqCst), 12);
    }

    #[test]
    fn test_handled_is_returned() {
        let event: CancellableEvent<()> = CancellableEvent::new("test");
        event.register("a", |_| Ok(EventResult::Handled));
        event.register("b", |_| Ok(EventResult::Cancel));
        assert_eq!(event.invoke(&()), EventResult::Handled);
    }

    #[test]
    fn test_failing_listener_does_not_stop_others() {
        let reached = Arc::new(AtomicU64::new(0));
        let event: Event<()> = Event::new("test");
        event.register("broken", |_| anyhow::bail!("boom"));
        let r = reached.clone();
        event.register("fine", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        event.fire(&());
        assert_eq!(reached.load(Ordering::SeqCst), 1);

        let cancellable: CancellableEvent<()> = CancellableEvent::new("test");
        cancellable.register("broken", |_| anyhow::bail!("boom"));
        cancellable.register("guard", |_| Ok(EventResult::Cancel));
        assert_eq!(cancellable.invoke(&()), EventResult::Cancel);
    }

    #[test]
    fn test_panicking_listener_is_contained() {
        let reached = Arc::new(AtomicU64::new(0));
        let event: Event<Vec<u8>> = Event::new("test");
        event.register("indexes", |v| {
            let _ = v[3];
            Ok(())
        });
        let r = reached.clone();
        event.register("fine", move |_| {
            r.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        event.fire(&Vec::new());
        assert_eq!(reached.load(Ordering::SeqCst), 1);

        let cancellable: CancellableEvent<()> = CancellableEvent::new("test");
        cancellable.register("panics", |_| panic!("listener bug"));
        assert_eq!(cancellable.invoke(&()), EventResult::Continue);
        cancellable.register("guard", |_| Ok(EventResult::Cancel));
        assert_eq!(cancellable.invoke(&()), EventResult::Cancel);
    }

    #[test]
    fn test_panic_message() {
        fn bad(_: &()) -> anyhow::Result<()> {
            panic!("bad {}", 7)
        }
        let entry: ListenerEntry<(), ()> = ListenerEntry {
            owner: "test".into(),
            listener_id: 0,
            callback: Arc::new(bad),
        };
        assert_eq!(entry.call(&()).unwrap_err().to_string(), "panicked: bad 7");
    }

    #[test]
    fn test_register_during_invoke_uses_snapshot() {
        let event: Arc<CancellableEvent<()>> = Arc::new(CancellableEvent::new("test"));
        let inner = event.clone();
        event.register("adder", move |_| {
            inner.register("added", |_| Ok(EventResult::Cancel));
            Ok(EventResult::Continue)
        });
        // The listener added mid-invoke is not part of this invocation.
        assert_eq!(event.invoke(&()), EventResult::Continue);
        assert_eq!(event.len(), 2);
        assert_eq!(event.invoke(&()), EventResult::Cancel);
    }

    #[test]
    fn test_concurrent_registration() {
        let event: Arc<Event<()>> = Arc::new(Event::new("test"));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let event = event.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        event.register(&format!("t{}", i), |_| Ok(()));
                        event.fire(&());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(event.len(), 400);
    }
}
