//! Shared helpers for the bus integration tests.

#![allow(dead_code)]

use std::time::Duration;

use mediabus_core::{BusConfig, Event, EventKind, Handle};

/// Generous bound so a broken implementation fails instead of hanging.
pub const PATIENCE: Duration = Duration::from_secs(5);

pub fn active() -> Handle {
    active_with(BusConfig::default())
}

pub fn active_with(config: BusConfig) -> Handle {
    let handle = Handle::with_config(config).expect("create handle");
    handle.initialize().expect("initialize engine");
    handle
}

pub fn poll(handle: &Handle) -> Event {
    handle.wait_event(Some(Duration::ZERO))
}

pub fn next(handle: &Handle) -> Event {
    handle.wait_event(Some(PATIENCE))
}

/// Waits for the next event of `kind`, skipping anything else.
pub fn next_of(handle: &Handle, kind: EventKind) -> Event {
    loop {
        let event = next(handle);
        if event.kind == kind || event.is_none() {
            return event;
        }
    }
}
