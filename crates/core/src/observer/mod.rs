//! Per-handle property observation with change coalescing.
//!
//! The engine records a snapshot of every watched property as it is written,
//! while it still holds its own lock. Change events are materialized lazily
//! from those snapshots when the owning handle drains an otherwise empty
//! queue, so any number of writes between two drains collapse into one event
//! carrying the latest value. Draining never needs the engine lock.

use crate::property::PropertyStore;
use crate::request::check_property_name;
use crate::{Event, Format, PropertyEvent, Result, Value};

/// Property state as seen at the time of the last write.
#[derive(Debug, Clone, PartialEq)]
struct Snapshot {
    generation: u64,
    /// Converted to the observed format. `None` when retrieval failed or no
    /// format was requested.
    value: Option<Value>,
}

impl Snapshot {
    fn take(store: &PropertyStore, name: &str, format: Format) -> Self {
        let value = match format {
            Format::None => None,
            format => store.get_as(name, format).ok(),
        };
        Self {
            generation: store.generation_of(name),
            value,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservedProperty {
    pub name: String,
    pub format: Format,
    pub token: u64,
    latest: Snapshot,
    /// Generation reported by the last emitted event. `None` until the
    /// initial event has gone out.
    emitted: Option<u64>,
    /// Data of the last emitted event.
    last_value: Option<Value>,
}

#[derive(Debug, Default)]
pub struct PropertyObserver {
    entries: Vec<ObservedProperty>,
    dirty: bool,
}

impl PropertyObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers interest in `name`, seeded from the current store. Observing
    /// a property that does not exist is allowed.
    pub fn observe(&mut self, token: u64, name: &str, format: Format, store: &PropertyStore) -> Result<()> {
        check_property_name(name)?;
        self.entries.push(ObservedProperty {
            name: name.to_string(),
            format,
            token,
            latest: Snapshot::take(store, name, format),
            emitted: None,
            last_value: None,
        });
        self.dirty = true;
        Ok(())
    }

    /// Removes every registration made with `token`. Returns the count.
    pub fn unobserve(&mut self, token: u64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.token != token);
        before - self.entries.len()
    }

    pub fn observes(&self, name: &str) -> bool {
        self.entries.iter().any(|entry| entry.name == name)
    }

    /// Refreshes the snapshot of every registration for `name` after a
    /// write. Returns whether `name` is observed at all.
    pub fn record(&mut self, name: &str, store: &PropertyStore) -> bool {
        let mut observed = false;
        for entry in self.entries.iter_mut().filter(|entry| entry.name == name) {
            entry.latest = Snapshot::take(store, name, entry.format);
            observed = true;
        }
        self.dirty |= observed;
        observed
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.dirty = false;
    }

    /// Builds at most `budget` change events from the recorded snapshots.
    ///
    /// Initial events come first, then changes in registration order. If
    /// the budget runs out the observer stays dirty and the remaining
    /// changes are picked up by the next call.
    pub fn collect(&mut self, budget: usize) -> Vec<Event> {
        let mut events = Vec::new();
        if !self.dirty {
            return events;
        }
        let initial = (0..self.entries.len()).filter(|&i| self.entries[i].emitted.is_none());
        let changed = (0..self.entries.len()).filter(|&i| self.entries[i].emitted.is_some());
        let order: Vec<usize> = initial.chain(changed).collect();

        for index in order {
            let entry = &self.entries[index];
            if entry.emitted == Some(entry.latest.generation) {
                continue;
            }
            if events.len() >= budget {
                return events;
            }
            if let Some(event) = Self::refresh(&mut self.entries[index]) {
                events.push(event);
            }
        }
        self.dirty = false;
        events
    }

    fn refresh(entry: &mut ObservedProperty) -> Option<Event> {
        let first = entry.emitted.is_none();
        entry.emitted = Some(entry.latest.generation);

        let current = entry.latest.value.clone();
        if entry.format != Format::None {
            if !first && current == entry.last_value {
                return None;
            }
            entry.last_value = current.clone();
        }
        let format = match (&current, entry.format) {
            (Some(_), format) => format,
            (None, _) => Format::None,
        };
        let property = PropertyEvent {
            name: entry.name.clone(),
            format,
            value: current,
        };
        Some(Event::property_change(entry.token, property))
    }
}
