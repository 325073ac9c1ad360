use std::sync::{Arc, RwLock};

/// Published synchronously before a driver is unloaded. Every listener has
/// returned by the time `EventBus::publish_pre_unload` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverPreUnloadEvent {
    pub driver_id: i64,
}

/// After-the-fact lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    DriverRegistered {
        driver_id: i64,
        implementation_id: String,
    },
    DriverUnloaded {
        driver_id: i64,
    },
}

pub trait UnloadListener: Send + Sync {
    fn on_pre_unload(&self, event: &DriverPreUnloadEvent);
}

pub trait LifecycleListener: Send + Sync {
    fn on_event(&self, event: &LifecycleEvent);
}

#[derive(Default)]
pub struct EventBus {
    unload_listeners: RwLock<Vec<Arc<dyn UnloadListener>>>,
    lifecycle_listeners: RwLock<Vec<Arc<dyn LifecycleListener>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_pre_unload(&self, listener: Arc<dyn UnloadListener>) {
        if let Ok(mut listeners) = self.unload_listeners.write() {
            listeners.push(listener);
        }
    }

    pub fn subscribe_lifecycle(&self, listener: Arc<dyn LifecycleListener>) {
        if let Ok(mut listeners) = self.lifecycle_listeners.write() {
            listeners.push(listener);
        }
    }

    pub fn publish_pre_unload(&self, event: &DriverPreUnloadEvent) {
        // Listeners may take their time (closing pools); don't hold the lock.
        let listeners: Vec<_> = match self.unload_listeners.read() {
            Ok(l) => l.clone(),
            Err(_) => return,
        };
        for listener in listeners {
            listener.on_pre_unload(event);
        }
    }

    pub fn publish(&self, event: &LifecycleEvent) {
        let listeners: Vec<_> = match self.lifecycle_listeners.read() {
            Ok(l) => l.clone(),
            Err(_) => return,
        };
        for listener in listeners {
            listener.on_event(event);
        }
    }
}
