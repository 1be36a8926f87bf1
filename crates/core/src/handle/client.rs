//! Per-handle state shared between the owning caller and the engine.
//!
//! Lock order: the engine lock may be held while taking a client lock, never
//! the other way around. Wakeup callbacks run after the client lock has been
//! released.

use std::collections::HashSet;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};
use serde::{Deserialize, Serialize};

use crate::clock::Deadline;
use crate::observer::PropertyObserver;
use crate::property::PropertyStore;
use crate::queue::EventQueue;
use crate::request::RequestTable;
use crate::signal::WakeupCallback;
use crate::{BusError, Event, EventKind, LogLevel, Result};

/// Whether a handle keeps the engine alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandleKind {
    /// Counts towards keeping the engine alive.
    Strong,
    /// Told to shut down once the last strong handle is gone.
    Weak,
}

/// Lifecycle of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HandleState {
    /// Created standalone; only configuration works until initialization.
    Uninitialized,
    Active,
    /// The engine is going away; only destruction is left to do.
    ShuttingDown,
    Destroyed,
}

pub(crate) struct ClientState {
    pub lifecycle: HandleState,
    pub queue: EventQueue,
    pub observer: PropertyObserver,
    pub requests: RequestTable,
    pub disabled: HashSet<EventKind>,
    pub log_level: LogLevel,
    wakeup_pending: bool,
}

pub(crate) struct Client {
    id: u64,
    name: String,
    kind: HandleKind,
    state: Mutex<ClientState>,
    changed: Condvar,
    callback: Mutex<Option<WakeupCallback>>,
}

impl Client {
    pub fn new(
        id: u64,
        name: String,
        kind: HandleKind,
        lifecycle: HandleState,
        capacity: usize,
        log_level: LogLevel,
    ) -> Self {
        Self {
            id,
            name,
            kind,
            state: Mutex::new(ClientState {
                lifecycle,
                queue: EventQueue::new(capacity),
                observer: PropertyObserver::new(),
                requests: RequestTable::new(),
                disabled: HashSet::from([EventKind::Tick]),
                log_level,
                wakeup_pending: false,
            }),
            changed: Condvar::new(),
            callback: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    pub fn lock(&self) -> MutexGuard<'_, ClientState> {
        self.state.lock()
    }

    pub fn lifecycle(&self) -> HandleState {
        self.state.lock().lifecycle
    }

    /// Fails unless the handle is past initialization and not destroyed.
    pub fn ensure_active(&self) -> Result<()> {
        match self.lifecycle() {
            HandleState::Active | HandleState::ShuttingDown => Ok(()),
            HandleState::Uninitialized | HandleState::Destroyed => Err(BusError::Uninitialized),
        }
    }

    pub fn set_callback(&self, callback: Option<WakeupCallback>) {
        *self.callback.lock() = callback;
    }

    /// Wakes a waiter and runs the wakeup callback. Call without holding the
    /// client lock.
    pub fn signal(&self) {
        self.changed.notify_all();
        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Queues an unsolicited or reply event subject to the event mask and
    /// queue capacity. Returns whether it was queued.
    pub fn deliver(&self, event: Event) -> bool {
        let queued = {
            let mut state = self.state.lock();
            if state.lifecycle == HandleState::Destroyed {
                return false;
            }
            if !event.kind.is_always_delivered() && state.disabled.contains(&event.kind) {
                return false;
            }
            state.queue.push(event)
        };
        self.signal();
        queued
    }

    /// Queues an event that must not be dropped. Returns `false` only if the
    /// handle is already destroyed.
    pub fn deliver_forced(&self, event: Event) -> bool {
        {
            let mut state = self.state.lock();
            if state.lifecycle == HandleState::Destroyed {
                return false;
            }
            state.queue.force_push(event);
        }
        self.signal();
        true
    }

    /// Completes pending request `seq` with its reply event.
    pub fn deliver_reply(&self, seq: u64, event: Event) {
        {
            let mut state = self.state.lock();
            if state.lifecycle == HandleState::Destroyed {
                return;
            }
            if state.requests.complete(seq).is_none() {
                return;
            }
            state.queue.push_reserved(event);
        }
        self.signal();
    }

    /// Drops pending request `seq` without a reply and gives back its slot.
    pub fn abandon_request(&self, seq: u64) {
        let mut state = self.state.lock();
        if state.requests.complete(seq).is_some() {
            state.queue.release();
        }
        drop(state);
        self.changed.notify_all();
    }

    /// Records the new state of property `name` for this client's
    /// observers. Called by the engine with its lock held.
    pub fn notify_property(&self, name: &str, store: &PropertyStore) {
        let observed = self.state.lock().observer.record(name, store);
        if observed {
            self.signal();
        }
    }

    /// Latched wakeup: interrupts the current wait, or the next one if no
    /// thread is waiting.
    pub fn wakeup(&self) {
        self.state.lock().wakeup_pending = true;
        self.signal();
    }

    /// Moves the client to `ShuttingDown` and queues the terminal event.
    pub fn begin_shutdown(&self) {
        {
            let mut state = self.state.lock();
            if matches!(state.lifecycle, HandleState::Destroyed | HandleState::ShuttingDown) {
                return;
            }
            state.lifecycle = HandleState::ShuttingDown;
            state.queue.force_push(Event::shutdown());
        }
        self.signal();
    }

    /// Tears down every per-handle registration. Nothing can be registered
    /// against the client afterwards.
    pub fn mark_destroyed(&self) {
        {
            let mut state = self.state.lock();
            state.lifecycle = HandleState::Destroyed;
            state.queue.clear();
            state.observer.clear();
            state.requests.clear();
        }
        self.changed.notify_all();
        self.callback.lock().take();
    }

    /// Blocks until an event is available, the timeout elapses or a wakeup
    /// arrives. `None` waits forever and `Some(Duration::ZERO)` polls.
    ///
    /// Observed property changes are turned into events only here, once the
    /// queue has run dry, which is what coalesces them per drain cycle. Only
    /// the client lock is taken, so a busy engine never delays a poll.
    pub fn wait_event(&self, timeout: Option<Duration>) -> Event {
        let deadline = Deadline::after(timeout);
        loop {
            let mut state = self.state.lock();
            if state.lifecycle == HandleState::Destroyed {
                return Event::none();
            }
            if let Some(event) = state.queue.pop() {
                state.wakeup_pending = false;
                return event;
            }
            if state.observer.is_dirty() {
                let budget = state.queue.free_slots();
                for event in state.observer.collect(budget) {
                    state.queue.push(event);
                }
                if let Some(event) = state.queue.pop() {
                    state.wakeup_pending = false;
                    return event;
                }
            }
            if state.wakeup_pending {
                state.wakeup_pending = false;
                return Event::none();
            }
            match deadline {
                _ if deadline.expired() => return Event::none(),
                Deadline::Never => self.changed.wait(&mut state),
                Deadline::At(at) => {
                    self.changed.wait_until(&mut state, at);
                }
            }
        }
    }

    /// Blocks until every pending request of this client has replied.
    pub fn wait_requests(&self) {
        let mut state = self.state.lock();
        while !state.requests.is_empty() && state.lifecycle != HandleState::Destroyed {
            self.changed.wait(&mut state);
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}
