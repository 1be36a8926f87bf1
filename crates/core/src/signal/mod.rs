//! Cross-thread signals that carry no data.
//!
//! [`CancelToken`] asks an in-flight request to finish early. [`Wakeup`]
//! interrupts a blocked `wait_event` call. Neither gives access to the bus,
//! so code holding one cannot call back into it.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use crate::handle::Client;

/// Advisory abort flag shared between a pending request and the code
/// executing it.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Notification hook invoked when a handle has something to read.
///
/// It runs on whatever thread produced the event, possibly while the engine
/// is busy, so it must return quickly and must not call into the bus.
pub type WakeupCallback = Arc<dyn Fn() + Send + Sync>;

/// Cloneable, signal-only view of a handle.
///
/// Waking is latched: if nobody is blocked in `wait_event`, the next call
/// returns immediately. Waking a destroyed handle does nothing.
#[derive(Clone)]
pub struct Wakeup {
    client: Weak<Client>,
}

impl Wakeup {
    pub(crate) fn new(client: &Arc<Client>) -> Self {
        Self {
            client: Arc::downgrade(client),
        }
    }

    pub fn wake(&self) {
        if let Some(client) = self.client.upgrade() {
            client.wakeup();
        }
    }
}

impl fmt::Debug for Wakeup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wakeup")
            .field("alive", &(self.client.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn waking_a_dead_handle_is_harmless() {
        let wakeup = Wakeup { client: Weak::new() };
        wakeup.wake();
        assert!(format!("{wakeup:?}").contains("alive: false"));
    }
}
