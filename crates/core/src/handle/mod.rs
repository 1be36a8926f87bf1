//! The caller-facing handle.
//!
//! A [`Handle`] is one caller's private view of a shared engine: its own
//! event queue, observed properties, pending requests and hook
//! registrations. Handles are not `Clone`. Dropping one has the same effect
//! as [`Handle::destroy`].

mod client;

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

pub(crate) use client::Client;
pub use client::{HandleKind, HandleState};

use crate::clock::{monotonic_time_us, timeout_from_secs};
use crate::command::{Command, CommandHandler};
use crate::engine::{Engine, EnginePhase};
use crate::hook::{HookPhase, HookRegistration};
use crate::options;
use crate::request::{check_property_name, AsyncOp};
use crate::signal::{Wakeup, WakeupCallback};
use crate::{BusConfig, BusError, Event, EventKind, Format, LogLevel, Result, Value};

/// One caller's connection to an engine.
///
/// A fresh standalone handle starts [`HandleState::Uninitialized`]: only
/// configuration (property and option writes, declarations, command
/// registration) works until [`Handle::initialize`] runs.
pub struct Handle {
    engine: Arc<Engine>,
    client: Arc<Client>,
    attached: bool,
}

impl Handle {
    /// Creates a standalone engine with default configuration and returns
    /// its first strong handle. The handle starts out uninitialized.
    pub fn create() -> Result<Handle> {
        Self::with_config(BusConfig::default())
    }

    /// Like [`Handle::create`], with explicit engine configuration.
    pub fn with_config(config: BusConfig) -> Result<Handle> {
        let (engine, client) = Engine::create(config)?;
        Ok(Self::from_parts(engine, client))
    }

    fn from_parts(engine: Arc<Engine>, client: Arc<Client>) -> Self {
        Self {
            engine,
            client,
            attached: true,
        }
    }

    /// Starts the engine. Fails with [`BusError::InvalidParameter`] if it
    /// has already been initialized.
    pub fn initialize(&self) -> Result<()> {
        self.engine.initialize()
    }

    /// Attaches a new strong handle to this handle's engine, which must be
    /// initialized. The name is sanitized and made unique.
    pub fn create_client(&self, name: Option<&str>) -> Result<Handle> {
        let client = self.engine.create_client(name, HandleKind::Strong)?;
        Ok(Self::from_parts(Arc::clone(&self.engine), client))
    }

    /// Like [`Handle::create_client`], but the new handle does not keep the
    /// engine alive.
    pub fn create_weak_client(&self, name: Option<&str>) -> Result<Handle> {
        let client = self.engine.create_client(name, HandleKind::Weak)?;
        Ok(Self::from_parts(Arc::clone(&self.engine), client))
    }

    /// Unique name of this handle among the live handles of its engine.
    pub fn client_name(&self) -> &str {
        self.client.name()
    }

    /// Process-unique id, never reused.
    pub fn client_id(&self) -> u64 {
        self.client.id()
    }

    pub fn kind(&self) -> HandleKind {
        self.client.kind()
    }

    /// Lifecycle state of this handle.
    pub fn state(&self) -> HandleState {
        self.client.lifecycle()
    }

    pub fn engine_phase(&self) -> EnginePhase {
        self.engine.phase()
    }

    pub fn config(&self) -> &BusConfig {
        self.engine.config()
    }

    /// Detaches this handle. If it was the last strong handle, every other
    /// handle receives [`EventKind::Shutdown`] and this call blocks until
    /// they have all been destroyed.
    pub fn destroy(mut self) {
        self.detach(false);
    }

    /// Shuts the engine down regardless of other strong handles and blocks
    /// until every handle is gone. Only the first caller waits; later
    /// callers return once teardown has started.
    pub fn terminate_and_wait(mut self) {
        self.detach(true);
    }

    fn detach(&mut self, terminate: bool) {
        if !self.attached {
            return;
        }
        self.attached = false;
        self.engine.destroy_client(&self.client, terminate);
    }

    /// Runs a command synchronously and returns its result.
    pub fn command(&self, args: &Value) -> Result<Value> {
        self.client.ensure_active()?;
        self.engine.run_command(self.client.id(), args, None)
    }

    /// Runs a text command line such as `set volume 50`. Arguments are
    /// split on whitespace, with quoting, and passed as strings.
    pub fn command_string(&self, line: &str) -> Result<Value> {
        self.client.ensure_active()?;
        let command = Command::parse_line(line)?;
        self.engine.run_parsed(self.client.id(), &command, None)
    }

    /// Queues a command. Its outcome arrives later as a
    /// [`EventKind::CommandReply`] carrying `token`. An error returned here
    /// means no reply will be sent.
    pub fn command_async(&self, token: u64, args: Value) -> Result<()> {
        self.engine.submit(&self.client, token, AsyncOp::Command(args))
    }

    /// Asks every pending request with `token` to stop early. Replies are
    /// still delivered. Returns how many requests were flagged.
    pub fn abort_async(&self, token: u64) -> usize {
        let aborted = self.client.lock().requests.abort(token);
        if aborted > 0 {
            tracing::debug!(client = self.client.id(), token, aborted, "abort requested");
        }
        aborted
    }

    /// Number of asynchronous requests still waiting for their reply.
    pub fn pending_requests(&self) -> usize {
        self.client.lock().requests.len()
    }

    /// Blocks until every pending asynchronous request has replied.
    pub fn wait_async_requests(&self) {
        self.client.wait_requests();
    }

    /// Reads a property as a [`Format::Node`] value.
    pub fn get_property(&self, name: &str) -> Result<Value> {
        self.get_property_as(name, Format::Node)
    }

    /// Reads a property converted to `format`. Fails with
    /// [`BusError::Uninitialized`] before initialization.
    pub fn get_property_as(&self, name: &str, format: Format) -> Result<Value> {
        self.client.ensure_active()?;
        check_property_name(name)?;
        self.engine.get_property_as(name, format)
    }

    pub fn get_property_string(&self, name: &str) -> Result<String> {
        match self.get_property_as(name, Format::String)? {
            Value::String(text) => Ok(text),
            _ => Err(BusError::UnsupportedFormat),
        }
    }

    /// Writes a property. Allowed before initialization as initial
    /// configuration.
    pub fn set_property(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        check_property_name(name)?;
        self.engine.set_property(name, value.into())
    }

    /// Sets a property from text, parsed into the property's current
    /// format.
    pub fn set_property_string(&self, name: &str, text: &str) -> Result<()> {
        self.set_property(name, Value::from(text))
    }

    /// Queues a property read answered by a
    /// [`EventKind::GetPropertyReply`] carrying `token`.
    pub fn get_property_async(&self, token: u64, name: &str, format: Format) -> Result<()> {
        let op = AsyncOp::GetProperty {
            name: name.to_string(),
            format,
        };
        self.engine.submit(&self.client, token, op)
    }

    /// Queues a property write answered by a
    /// [`EventKind::SetPropertyReply`] carrying `token`.
    pub fn set_property_async(&self, token: u64, name: &str, value: impl Into<Value>) -> Result<()> {
        let op = AsyncOp::SetProperty {
            name: name.to_string(),
            value: value.into(),
        };
        self.engine.submit(&self.client, token, op)
    }

    /// Watches `name`. The next drain yields an initial event with the
    /// current value, later writes are coalesced per drain cycle.
    pub fn observe_property(&self, token: u64, name: &str, format: Format) -> Result<()> {
        self.client.ensure_active()?;
        {
            let state = self.engine.lock();
            let mut client = self.client.lock();
            if client.lifecycle == HandleState::Destroyed {
                return Err(BusError::Uninitialized);
            }
            client.observer.observe(token, name, format, &state.properties)?;
        }
        self.client.signal();
        Ok(())
    }

    /// Removes every observation registered with `token` and returns how
    /// many there were.
    pub fn unobserve_property(&self, token: u64) -> Result<usize> {
        self.client.ensure_active()?;
        Ok(self.client.lock().observer.unobserve(token))
    }

    /// Sets an option. Works before and after initialization; before it,
    /// options may also configure read-only properties.
    pub fn set_option(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        self.engine.lock().set_option(name, value.into())
    }

    /// Sets an option from text, parsed into the option's current format.
    pub fn set_option_string(&self, name: &str, text: &str) -> Result<()> {
        self.set_option(name, Value::from(text))
    }

    /// Applies every default-section entry of an option file as if by
    /// [`Handle::set_option_string`]. Entries that fail to apply are logged
    /// and skipped; a missing or malformed file fails as a whole with
    /// [`BusError::InvalidParameter`]. Returns how many entries applied.
    pub fn load_config_file(&self, path: impl AsRef<Path>) -> Result<usize> {
        let entries = options::load(path.as_ref())?;
        let applied = self.engine.lock().apply_options(entries);
        tracing::debug!(path = %path.as_ref().display(), applied, "option file loaded");
        Ok(applied)
    }

    /// Registers for hook `name`. Lower priorities run first.
    pub fn hook_add(&self, token: u64, name: &str, priority: i32) -> Result<()> {
        self.client.ensure_active()?;
        self.engine.hooks().add(&self.client, token, name, priority)
    }

    /// Lets the engine proceed past the hook event with internal `id`.
    pub fn hook_continue(&self, id: u64) -> Result<()> {
        self.engine.hooks().continue_hook(self.client.id(), id)
    }

    /// Registrations for hook `name`, in the order they fire.
    pub fn hook_registrations(&self, name: &str) -> Vec<HookRegistration> {
        self.engine.hooks().registrations(name)
    }

    /// Whether hook `name` is idle, firing or waiting on a handle.
    pub fn hook_phase(&self, name: &str) -> HookPhase {
        self.engine.hooks().phase(name)
    }

    /// `None` waits forever, `Some(Duration::ZERO)` polls. Returns an event
    /// of kind [`EventKind::None`] on timeout or wakeup.
    pub fn wait_event(&self, timeout: Option<Duration>) -> Event {
        self.client.wait_event(timeout)
    }

    /// Negative waits forever, zero polls.
    pub fn wait_event_secs(&self, seconds: f64) -> Event {
        self.wait_event(timeout_from_secs(seconds))
    }

    /// Interrupts the current or next [`Handle::wait_event`].
    pub fn wakeup(&self) {
        self.client.wakeup();
    }

    /// A cloneable waker usable from any thread.
    pub fn waker(&self) -> Wakeup {
        Wakeup::new(&self.client)
    }

    /// Installs (or with `None` removes) the callback run whenever this
    /// handle gets an event or a wakeup. It must not call into the bus.
    pub fn set_wakeup_callback(&self, callback: Option<WakeupCallback>) {
        self.client.set_callback(callback);
    }

    /// Enables or disables delivery of one event kind. Replies, hooks and
    /// property changes are delivered regardless.
    pub fn request_event(&self, kind: EventKind, enable: bool) -> Result<()> {
        self.client.ensure_active()?;
        if kind == EventKind::None || (kind == EventKind::Shutdown && !enable) {
            return Err(BusError::InvalidParameter);
        }
        let mut state = self.client.lock();
        if enable {
            state.disabled.remove(&kind);
        } else {
            state.disabled.insert(kind);
        }
        Ok(())
    }

    /// Sets the minimum level of log messages delivered to this handle,
    /// by name (`"no"` turns them off).
    pub fn request_log_messages(&self, min_level: &str) -> Result<()> {
        self.client.ensure_active()?;
        let level = LogLevel::parse(min_level)?;
        self.client.lock().log_level = level;
        Ok(())
    }

    /// Adds or replaces a command available to every handle of the engine.
    pub fn register_command<H>(&self, name: &str, handler: H) -> Result<()>
    where
        H: CommandHandler + 'static,
    {
        self.engine.register_command(name, Arc::new(handler))
    }

    /// Declares a property owned by the host. `None` makes it exist but
    /// read as unavailable.
    pub fn declare_property(&self, name: &str, initial: Option<Value>, writable: bool) -> Result<()> {
        self.engine.lock().declare_property(name, initial, writable)
    }

    /// Names of every property the engine knows about, sorted.
    pub fn property_names(&self) -> Vec<String> {
        self.engine.lock().properties.names().map(str::to_string).collect()
    }

    /// Host-side write that ignores writability.
    pub fn update_property(&self, name: &str, value: Option<Value>) -> Result<()> {
        self.engine.lock().update_property(name, value)
    }

    /// Same as [`monotonic_time_us`].
    pub fn time_us(&self) -> i64 {
        monotonic_time_us()
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.detach(false);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.client.id())
            .field("name", &self.client.name())
            .field("kind", &self.client.kind())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active() -> Handle {
        let handle = Handle::create().unwrap();
        handle.initialize().unwrap();
        handle
    }

    #[test]
    fn standalone_handle_starts_uninitialized() {
        let handle = Handle::create().unwrap();
        assert_eq!(handle.state(), HandleState::Uninitialized);
        assert_eq!(handle.client_name(), "main");
        assert_eq!(handle.kind(), HandleKind::Strong);

        assert_eq!(
            handle.command(&Value::args(["ignore"])),
            Err(BusError::Uninitialized)
        );
        assert_eq!(
            handle.command_async(1, Value::args(["ignore"])),
            Err(BusError::Uninitialized)
        );
        assert_eq!(handle.command_string("ignore"), Err(BusError::Uninitialized));
        assert_eq!(handle.hook_add(1, "on_load", 0), Err(BusError::Uninitialized));
        assert!(handle.create_client(None).is_err());

        // Initial configuration is allowed before initialize.
        handle.set_property("volume", 30i64).unwrap();
        handle.set_option_string("speed", "1.5").unwrap();
        handle.declare_property("duration", None, false).unwrap();

        // Everything else waits for initialize.
        assert_eq!(handle.get_property("volume"), Err(BusError::Uninitialized));
        assert_eq!(handle.get_property_string("volume"), Err(BusError::Uninitialized));
        assert_eq!(
            handle.observe_property(1, "volume", Format::Int64),
            Err(BusError::Uninitialized)
        );
        assert_eq!(handle.unobserve_property(1), Err(BusError::Uninitialized));
        assert_eq!(
            handle.request_event(EventKind::Tick, true),
            Err(BusError::Uninitialized)
        );
        assert_eq!(handle.request_log_messages("info"), Err(BusError::Uninitialized));

        handle.initialize().unwrap();
        assert_eq!(handle.state(), HandleState::Active);
        assert_eq!(handle.get_property("volume").unwrap(), Value::Int64(30));
        assert_eq!(handle.get_property("speed").unwrap(), Value::from("1.5"));
    }

    #[test]
    fn request_event_guards_shutdown() {
        let handle = active();
        assert_eq!(
            handle.request_event(EventKind::Shutdown, false),
            Err(BusError::InvalidParameter)
        );
        assert_eq!(
            handle.request_event(EventKind::None, true),
            Err(BusError::InvalidParameter)
        );
        assert!(handle.request_event(EventKind::Tick, true).is_ok());
        assert!(handle.request_event(EventKind::Idle, false).is_ok());
        assert_eq!(handle.request_log_messages("loud"), Err(BusError::InvalidParameter));
        assert!(handle.request_log_messages("warn").is_ok());
    }

    #[test]
    fn property_strings_follow_the_stored_format() {
        let handle = active();
        handle.declare_property("speed", Some(Value::Double(1.0)), true).unwrap();
        handle.set_property_string("speed", "1.5").unwrap();
        assert_eq!(handle.get_property("speed").unwrap(), Value::Double(1.5));
        assert_eq!(handle.get_property_string("speed").unwrap(), "1.500000");
        assert_eq!(
            handle.set_property_string("speed", "fast"),
            Err(BusError::UnsupportedFormat)
        );
        assert_eq!(handle.get_property(""), Err(BusError::InvalidParameter));
    }

    #[test]
    fn options_configure_read_only_properties_until_initialized() {
        let handle = Handle::create().unwrap();
        handle.declare_property("cache", Some(Value::Flag(false)), false).unwrap();
        assert_eq!(handle.set_property("cache", true), Err(BusError::SetFailed));
        handle.set_option_string("cache", "yes").unwrap();
        handle.set_option("demuxer", "lavf").unwrap();
        assert_eq!(handle.set_option("", 1i64), Err(BusError::InvalidParameter));

        handle.initialize().unwrap();
        assert_eq!(handle.get_property("cache").unwrap(), Value::Flag(true));
        assert_eq!(handle.set_option("cache", false), Err(BusError::SetFailed));
        handle.set_option("demuxer", "mkv").unwrap();
        assert_eq!(handle.get_property_string("demuxer").unwrap(), "mkv");
    }

    #[test]
    fn command_strings_are_split_and_run() {
        let handle = active();
        handle.command_string(r#"set title "two words""#).unwrap();
        assert_eq!(handle.get_property_string("title").unwrap(), "two words");
        assert_eq!(handle.command_string("  "), Err(BusError::InvalidParameter));
        assert_eq!(handle.command_string("no-such-command"), Err(BusError::NotFound));
        assert_eq!(
            handle.command_string("set title \"open"),
            Err(BusError::InvalidParameter)
        );
    }

    #[test]
    fn option_files_apply_the_default_section() {
        let path = std::env::temp_dir().join(format!("mediabus-options-{}.conf", std::process::id()));
        std::fs::write(
            &path,
            "# defaults\nvolume=40\nmute\nlocked=1\n[night]\nvolume=10\n",
        )
        .unwrap();

        let handle = Handle::create().unwrap();
        handle.declare_property("volume", Some(Value::Int64(100)), true).unwrap();
        handle.initialize().unwrap();
        handle.declare_property("locked", Some(Value::Int64(0)), false).unwrap();
        handle.request_log_messages("warn").unwrap();

        let applied = handle.load_config_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(applied, 2);
        assert_eq!(handle.get_property("volume").unwrap(), Value::Int64(40));
        assert_eq!(handle.get_property_string("mute").unwrap(), "yes");
        assert_eq!(handle.get_property("locked").unwrap(), Value::Int64(0));

        let warning = handle.wait_event(Some(Duration::ZERO));
        assert_eq!(warning.kind, EventKind::LogMessage);
        assert_eq!(handle.load_config_file(&path), Err(BusError::InvalidParameter));
    }
}
