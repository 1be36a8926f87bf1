//! Synchronous extension points that block the engine until acknowledged.
//!
//! Registrations are ordered globally by `(priority, seq)`. Lower priority
//! runs first. That is the reverse of what most readers expect, and it is
//! kept that way on purpose so existing handlers keep their relative order.
//!
//! Firing a hook walks the registrations for that name one at a time: the
//! owning handle gets a [`EventKind::Hook`] event and the firing thread
//! blocks until that handle calls `hook_continue` with the event's id, or
//! until the handle is destroyed.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::{Condvar, Mutex};

use crate::handle::Client;
use crate::{BusError, Event, EventKind, EventPayload, Result};

/// One handle's interest in a named hook point.
#[derive(Debug, Clone)]
pub struct HookRegistration {
    pub name: String,
    pub priority: i32,
    /// Global registration order.
    pub seq: u64,
    pub client_id: u64,
    /// Echoed as `reply_token` of every hook event for this registration.
    pub token: u64,
    client: Weak<Client>,
}

/// Where a named hook point currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Idle,
    Firing,
    /// Waiting for the given client to continue.
    Blocked(u64),
}

#[derive(Debug)]
struct Waiter {
    name: String,
    client_id: u64,
}

#[derive(Debug, Default)]
struct HookState {
    next_seq: u64,
    next_id: u64,
    registrations: Vec<HookRegistration>,
    waiting: HashMap<u64, Waiter>,
    firing: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct HookRegistry {
    state: Mutex<HookState>,
    acked: Condvar,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn add(&self, client: &Arc<Client>, token: u64, name: &str, priority: i32) -> Result<()> {
        if name.is_empty() {
            return Err(BusError::InvalidParameter);
        }
        let mut state = self.state.lock();
        state.next_seq += 1;
        let seq = state.next_seq;
        state.registrations.push(HookRegistration {
            name: name.to_string(),
            priority,
            seq,
            client_id: client.id(),
            token,
            client: Arc::downgrade(client),
        });
        state.registrations.sort_by_key(|r| (r.priority, r.seq));
        tracing::debug!(hook = name, priority, seq, client = client.id(), "hook registered");
        Ok(())
    }

    /// Registrations for `name` in firing order.
    pub fn registrations(&self, name: &str) -> Vec<HookRegistration> {
        self.state
            .lock()
            .registrations
            .iter()
            .filter(|r| r.name == name)
            .cloned()
            .collect()
    }

    pub fn phase(&self, name: &str) -> HookPhase {
        let state = self.state.lock();
        if let Some(waiter) = state.waiting.values().find(|w| w.name == name) {
            return HookPhase::Blocked(waiter.client_id);
        }
        match state.firing.get(name) {
            Some(count) if *count > 0 => HookPhase::Firing,
            _ => HookPhase::Idle,
        }
    }

    /// Runs every handler registered for `name`, blocking until each one
    /// has continued. Returns how many handlers were run.
    ///
    /// Must not be called while holding the engine lock.
    pub fn fire(&self, name: &str) -> usize {
        let targets = {
            let mut state = self.state.lock();
            *state.firing.entry(name.to_string()).or_default() += 1;
            state
                .registrations
                .iter()
                .filter(|r| r.name == name)
                .cloned()
                .collect::<Vec<_>>()
        };
        tracing::trace!(hook = name, handlers = targets.len(), "firing hook");

        let mut ran = 0;
        for registration in targets {
            let Some(client) = registration.client.upgrade() else {
                continue;
            };
            let id = {
                let mut state = self.state.lock();
                if !state.registrations.iter().any(|r| r.seq == registration.seq) {
                    continue;
                }
                state.next_id += 1;
                let id = state.next_id;
                state.waiting.insert(
                    id,
                    Waiter {
                        name: name.to_string(),
                        client_id: registration.client_id,
                    },
                );
                id
            };

            let event = Event::new(EventKind::Hook)
                .with_token(registration.token)
                .with_payload(EventPayload::Hook {
                    name: name.to_string(),
                    id,
                });
            if client.deliver_forced(event) {
                let mut state = self.state.lock();
                while state.waiting.contains_key(&id) {
                    self.acked.wait(&mut state);
                }
                ran += 1;
            } else {
                self.state.lock().waiting.remove(&id);
            }
        }

        let mut state = self.state.lock();
        if let Some(count) = state.firing.get_mut(name) {
            *count -= 1;
            if *count == 0 {
                state.firing.remove(name);
            }
        }
        ran
    }

    /// Acknowledges hook event `id` on behalf of `client_id`.
    pub fn continue_hook(&self, client_id: u64, id: u64) -> Result<()> {
        let mut state = self.state.lock();
        match state.waiting.get(&id) {
            Some(waiter) if waiter.client_id == client_id => {
                state.waiting.remove(&id);
                self.acked.notify_all();
                Ok(())
            }
            _ => Err(BusError::InvalidParameter),
        }
    }

    /// Drops every registration of a client and releases any hook it is
    /// currently blocking, as if it had continued.
    pub fn remove_client(&self, client_id: u64) {
        let mut state = self.state.lock();
        state.registrations.retain(|r| r.client_id != client_id);
        let before = state.waiting.len();
        state.waiting.retain(|_, w| w.client_id != client_id);
        if state.waiting.len() != before {
            tracing::debug!(client = client_id, "released hook blocked by destroyed client");
        }
        self.acked.notify_all();
    }
}
