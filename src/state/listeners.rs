use parking_lot::Mutex;
use std::sync::Arc;

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered list of event listeners. Every listener fires once per event, in
/// registration order.
pub struct Listeners<T> {
    listeners: Arc<Mutex<Vec<Listener<T>>>>,
}

impl<T> Listeners<T> {
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add(&self, listener: impl Fn(&T) + Send + Sync + 'static) {
        self.listeners.lock().push(Arc::new(listener));
    }

    /// Listeners run outside the lock so they may register further listeners.
    pub fn fire(&self, event: &T) {
        let listeners = self.listeners.lock().clone();
        for listener in listeners {
            listener(event);
        }
    }

    /// Independent copy holding the same listeners.
    pub fn snapshot(&self) -> Self {
        Self {
            listeners: Arc::new(Mutex::new(self.listeners.lock().clone())),
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

impl<T> Default for Listeners<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fire_in_registration_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let listeners = Listeners::<u32>::new();
        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            listeners.add(move |value| seen.lock().push(format!("{}{}", tag, value)));
        }

        listeners.fire(&1);
        listeners.fire(&2);

        assert_eq!(*seen.lock(), vec!["a1", "b1", "c1", "a2", "b2", "c2"]);
    }

    #[test]
    fn test_listener_may_register_during_fire() {
        let listeners = Arc::new(Listeners::<()>::new());
        let inner = listeners.clone();
        listeners.add(move |_| inner.add(|_| {}));

        listeners.fire(&());
        assert_eq!(listeners.len(), 2);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let listeners = Listeners::<()>::new();
        listeners.add(|_| {});
        let copy = listeners.snapshot();
        copy.add(|_| {});
        assert_eq!(listeners.len(), 1);
        assert_eq!(copy.len(), 2);
    }
}
