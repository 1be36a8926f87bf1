//! Core library for the media control bus.
//!
//! One serialized engine is shared by any number of client handles. Each
//! handle owns a bounded event queue, a set of observed properties, its
//! pending asynchronous requests and its hook registrations. Callers issue
//! commands and property requests against the engine, synchronously or by
//! token, and drain their own queue with [`Handle::wait_event`].
//!
//! ```no_run
//! use mediabus_core::{EventKind, Format, Handle, Value};
//!
//! let handle = Handle::create()?;
//! handle.initialize()?;
//! handle.observe_property(1, "volume", Format::Int64)?;
//! handle.command_async(2, Value::args(["set", "volume", "60"]))?;
//! loop {
//!     let event = handle.wait_event(None);
//!     if event.kind == EventKind::Shutdown {
//!         break;
//!     }
//!     println!("{}", event.to_value());
//! }
//! # Ok::<(), mediabus_core::BusError>(())
//! ```

mod clock;
mod command;
pub mod config;
mod engine;
pub mod error;
mod event;
mod handle;
mod hook;
mod observer;
mod options;
mod property;
mod queue;
mod request;
mod signal;
mod value;

pub use clock::monotonic_time_us;
pub use command::{Command, CommandContext, CommandHandler};
pub use config::{BusConfig, ConfigError};
pub use engine::EnginePhase;
pub use error::{error_string, BusError, Result};
pub use event::{Event, EventKind, EventPayload, LogLevel, LogMessage, PropertyEvent};
pub use handle::{Handle, HandleKind, HandleState};
pub use hook::{HookPhase, HookRegistration};
pub use request::RequestKind;
pub use signal::{CancelToken, Wakeup, WakeupCallback};
pub use value::{Format, Value};
