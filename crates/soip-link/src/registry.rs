use std::sync::{Arc, Condvar, Mutex, OnceLock};

/// Object-safe view of a `LinkHandler<D>` the registry can hold regardless
/// of which `SerialDevice` it is parameterized over.
pub trait LinkHandlerDyn: Send + Sync {
    fn id(&self) -> &str;
    fn is_alive(&self) -> bool;
    fn shutdown(&self) -> bool;
    /// Joins the handler's RX/TX worker threads. Idempotent: a second call
    /// after the first observes no threads left to join.
    fn join(&self);
}

/// Process-wide set of live link handlers, with a reaper for dead ones.
pub struct HandlerRegistry {
    handlers: Mutex<Vec<Arc<dyn LinkHandlerDyn>>>,
    cv: Condvar,
}

static REGISTRY: OnceLock<HandlerRegistry> = OnceLock::new();

impl HandlerRegistry {
    #[must_use]
    pub fn global() -> &'static HandlerRegistry {
        REGISTRY.get_or_init(|| HandlerRegistry { handlers: Mutex::new(Vec::new()), cv: Condvar::new() })
    }

    pub fn register(&self, handler: Arc<dyn LinkHandlerDyn>) {
        tracing::info!(id = handler.id(), "link registered");
        self.handlers.lock().unwrap().push(handler);
    }

    /// Called by a handler's `shutdown()` once it has torn itself down, so
    /// anyone waiting on the registry (the client-only main loop, or the
    /// Acceptor's interleaved sweep) wakes up and reaps it.
    pub fn notify_death(&self) {
        self.cv.notify_all();
    }

    /// Drops dead handlers from the live set, joining their worker threads
    /// first. Returns the number reaped.
    pub fn sweep(&self) -> usize {
        let mut handlers = self.handlers.lock().unwrap();
        let before = handlers.len();
        handlers.retain(|h| {
            if h.is_alive() {
                true
            } else {
                h.join();
                tracing::info!(id = h.id(), "link reaped");
                false
            }
        });
        before - handlers.len()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.lock().unwrap().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Blocks the calling thread, sweeping on every death notification,
    /// until the registry is empty. Used by a client-only process (no
    /// Acceptor) as its main-thread wait.
    pub fn wait_until_empty(&self) {
        let mut handlers = self.handlers.lock().unwrap();
        loop {
            handlers.retain(|h| {
                if h.is_alive() {
                    true
                } else {
                    h.join();
                    false
                }
            });
            if handlers.is_empty() {
                return;
            }
            handlers = self.cv.wait(handlers).unwrap();
        }
    }
}
