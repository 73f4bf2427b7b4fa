//! A dependency that may become available after its consumer has been constructed.

use std::sync::{Arc, Mutex};

type AvailabilityCallback<T> = Box<dyn FnOnce(Arc<T>) + Send + 'static>;

/// Holds an optional component (for example the auth module) that can be provided at any
/// time, or never. Consumers register interest with [`Deferred::when_available`].
pub struct Deferred<T: ?Sized> {
    state: Mutex<DeferredState<T>>,
}

struct DeferredState<T: ?Sized> {
    value: Option<Arc<T>>,
    pending: Vec<AvailabilityCallback<T>>,
}

impl<T: ?Sized + Send + Sync + 'static> Deferred<T> {
    /// Creates a deferred value that is not yet available.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DeferredState {
                value: None,
                pending: Vec::new(),
            }),
        }
    }

    /// Creates a deferred value that is already available.
    pub fn available(value: Arc<T>) -> Self {
        let deferred = Self::new();
        deferred.provide(value);
        deferred
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.lock_state().value.clone()
    }

    /// Runs `callback` with the value, immediately if it is already available or later
    /// from [`Deferred::provide`].
    pub fn when_available<F>(&self, callback: F)
    where
        F: FnOnce(Arc<T>) + Send + 'static,
    {
        let value = {
            let mut state = self.lock_state();
            match state.value.clone() {
                Some(value) => value,
                None => {
                    state.pending.push(Box::new(callback));
                    return;
                }
            }
        };
        callback(value);
    }

    /// Makes the value available and flushes pending callbacks. Only the first call has
    /// an effect.
    pub fn provide(&self, value: Arc<T>) {
        let callbacks = {
            let mut state = self.lock_state();
            if state.value.is_some() {
                log::warn!("deferred value provided more than once; ignoring");
                return;
            }
            state.value = Some(value.clone());
            std::mem::take(&mut state.pending)
        };
        for callback in callbacks {
            callback(value.clone());
        }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DeferredState<T>> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: ?Sized + Send + Sync + 'static> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}
