//! The shared, serialized engine behind every handle.
//!
//! All canonical state lives in [`EngineState`] behind one mutex. Client
//! locks may be taken while it is held, never the reverse. Hook firing
//! releases the engine lock while it blocks.

mod dispatcher;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::command::{Command, CommandContext, CommandHandler, CommandRegistry};
use crate::handle::{Client, HandleKind, HandleState};
use crate::hook::HookRegistry;
use crate::options::OptionEntry;
use crate::property::PropertyStore;
use crate::request::{self, check_property_name, AsyncOp};
use crate::{
    BusConfig, BusError, CancelToken, Event, EventKind, EventPayload, Format, LogLevel, LogMessage,
    Result, Value,
};

use dispatcher::{Dispatcher, Job};

/// Ids are process-wide so they are never reused across engines.
static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Lifecycle of the shared engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    /// Accepting configuration, not yet dispatching requests.
    Uninitialized,
    Active,
    /// Every handle has been told to shut down.
    ShuttingDown,
    /// The last handle is gone and the dispatcher has stopped.
    Destroyed,
}

pub(crate) struct EngineState {
    pub phase: EnginePhase,
    pub clients: BTreeMap<u64, Arc<Client>>,
    pub properties: PropertyStore,
    pub commands: CommandRegistry,
    strong: usize,
    /// Set while a destroying caller blocks on the remaining handles.
    finalizer: bool,
}

impl EngineState {
    /// Client write followed by observer notification.
    pub fn set_property(&mut self, name: &str, value: Value) -> Result<()> {
        self.properties.set(name, value)?;
        self.notify_observers(name);
        Ok(())
    }

    /// Option write. Before initialization this is initial configuration
    /// and may set read-only or unavailable properties; afterwards it follows
    /// the client write rules.
    pub fn set_option(&mut self, name: &str, value: Value) -> Result<()> {
        if self.phase == EnginePhase::Uninitialized {
            self.properties.configure(name, value)?;
        } else {
            self.properties.set(name, value)?;
        }
        self.notify_observers(name);
        Ok(())
    }

    /// Applies option entries one by one. Entries that fail are logged and
    /// skipped. Returns how many were applied.
    pub fn apply_options(&mut self, entries: Vec<OptionEntry>) -> usize {
        let mut applied = 0;
        for entry in entries {
            let OptionEntry { line, name, value } = entry;
            match self.set_option(&name, Value::from(value)) {
                Ok(()) => applied += 1,
                Err(err) => {
                    self.log(LogLevel::Warn, "config", &format!("line {line}: {name}: {err}"));
                }
            }
        }
        applied
    }

    pub fn update_property(&mut self, name: &str, value: Option<Value>) -> Result<()> {
        self.properties.update(name, value)?;
        self.notify_observers(name);
        Ok(())
    }

    pub fn declare_property(&mut self, name: &str, initial: Option<Value>, writable: bool) -> Result<()> {
        self.properties.declare(name, initial, writable)?;
        self.notify_observers(name);
        Ok(())
    }

    fn notify_observers(&self, name: &str) {
        for client in self.clients.values() {
            client.notify_property(name, &self.properties);
        }
    }

    pub fn broadcast(&self, event: &Event) {
        for client in self.clients.values() {
            client.deliver(event.clone());
        }
    }

    /// Emits a log line through `tracing` and to every handle whose
    /// threshold admits `level`.
    pub fn log(&self, level: LogLevel, prefix: &str, text: &str) {
        let line = text.trim_end_matches('\n');
        match level {
            LogLevel::No => return,
            LogLevel::Fatal | LogLevel::Error => tracing::error!(prefix, "{line}"),
            LogLevel::Warn => tracing::warn!(prefix, "{line}"),
            LogLevel::Info => tracing::info!(prefix, "{line}"),
            LogLevel::V | LogLevel::Debug => tracing::debug!(prefix, "{line}"),
            LogLevel::Trace => tracing::trace!(prefix, "{line}"),
        }
        let message = LogMessage {
            prefix: prefix.to_string(),
            level,
            text: format!("{line}\n"),
        };
        for client in self.clients.values() {
            let admitted = client.lock().log_level.admits(level);
            if admitted {
                let event = Event::new(EventKind::LogMessage).with_payload(EventPayload::Log(message.clone()));
                client.deliver(event);
            }
        }
    }

    /// Resolves a handle by name or by `@<id>`.
    pub fn find_client(&self, target: &str) -> Option<&Arc<Client>> {
        if let Some(id) = target.strip_prefix('@').and_then(|id| id.parse::<u64>().ok()) {
            return self.clients.get(&id);
        }
        self.clients.values().find(|client| client.name() == target)
    }

    pub fn client_message(&self, target: Option<&str>, args: Vec<String>) -> Result<()> {
        let event = Event::new(EventKind::ClientMessage).with_payload(EventPayload::ClientMessage(args));
        match target {
            None => self.broadcast(&event),
            Some(target) => {
                let client = self.find_client(target).ok_or(BusError::NotFound)?;
                client.deliver(event);
            }
        }
        Ok(())
    }

    /// Every handle gets exactly one shutdown event.
    pub fn begin_shutdown(&mut self) {
        if self.phase != EnginePhase::Destroyed {
            self.phase = EnginePhase::ShuttingDown;
        }
        tracing::info!(clients = self.clients.len(), "engine shutting down");
        for client in self.clients.values() {
            client.begin_shutdown();
        }
    }

    fn unique_name(&self, requested: Option<&str>, prefix: &str, id: u64) -> String {
        let base = match requested {
            Some(name) if !name.is_empty() => sanitize(name),
            _ => format!("{prefix}{id}"),
        };
        let taken = |candidate: &str| self.clients.values().any(|c| c.name() == candidate);
        if !taken(&base) {
            return base;
        }
        (2u64..)
            .map(|n| format!("{base}{n}"))
            .find(|candidate| !taken(candidate))
            .unwrap_or_else(|| format!("{base}_{id}"))
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

pub(crate) struct Engine {
    config: BusConfig,
    state: Mutex<EngineState>,
    teardown: Condvar,
    hooks: HookRegistry,
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl Engine {
    /// Creates an uninitialized engine together with its first strong
    /// handle.
    pub fn create(config: BusConfig) -> Result<(Arc<Engine>, Arc<Client>)> {
        config.validate()?;
        let engine = Arc::new(Engine {
            state: Mutex::new(EngineState {
                phase: EnginePhase::Uninitialized,
                clients: BTreeMap::new(),
                properties: PropertyStore::new(),
                commands: CommandRegistry::with_builtins(),
                strong: 0,
                finalizer: false,
            }),
            teardown: Condvar::new(),
            hooks: HookRegistry::new(),
            dispatcher: Mutex::new(None),
            config,
        });
        let client = {
            let mut state = engine.state.lock();
            let name = engine.config.main_client_name.clone();
            engine.attach(&mut state, Some(&name), HandleKind::Strong, HandleState::Uninitialized)
        };
        Ok((engine, client))
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn phase(&self) -> EnginePhase {
        self.state.lock().phase
    }

    pub fn lock(&self) -> MutexGuard<'_, EngineState> {
        self.state.lock()
    }

    /// Starts the dispatcher and activates every handle created so far.
    pub fn initialize(self: &Arc<Self>) -> Result<()> {
        let mut state = self.state.lock();
        if state.phase != EnginePhase::Uninitialized {
            return Err(BusError::InvalidParameter);
        }
        let dispatcher = Dispatcher::start(Arc::clone(self), &self.config.dispatcher_name)?;
        *self.dispatcher.lock() = Some(dispatcher);
        state.phase = EnginePhase::Active;
        for client in state.clients.values() {
            let mut client_state = client.lock();
            if client_state.lifecycle == HandleState::Uninitialized {
                client_state.lifecycle = HandleState::Active;
            }
        }
        tracing::info!(clients = state.clients.len(), "engine initialized");
        Ok(())
    }

    /// Attaches a new handle to an active engine.
    pub fn create_client(&self, name: Option<&str>, kind: HandleKind) -> Result<Arc<Client>> {
        let mut state = self.state.lock();
        if state.phase != EnginePhase::Active {
            return Err(BusError::Uninitialized);
        }
        Ok(self.attach(&mut state, name, kind, HandleState::Active))
    }

    fn attach(
        &self,
        state: &mut EngineState,
        requested: Option<&str>,
        kind: HandleKind,
        lifecycle: HandleState,
    ) -> Arc<Client> {
        let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
        let name = state.unique_name(requested, &self.config.client_name_prefix, id);
        let client = Arc::new(Client::new(
            id,
            name,
            kind,
            lifecycle,
            self.config.queue_capacity,
            self.config.default_log_level,
        ));
        state.clients.insert(id, Arc::clone(&client));
        if kind == HandleKind::Strong {
            state.strong += 1;
        }
        tracing::debug!(client = id, name = client.name(), ?kind, "client attached");
        client
    }

    /// Detaches `client` from every subsystem.
    ///
    /// When the last strong handle goes, or `terminate` is set, the remaining
    /// handles are told to shut down and the first caller to get here blocks
    /// until all of them are destroyed. Returns whether this call performed
    /// the final teardown.
    pub fn destroy_client(&self, client: &Arc<Client>, terminate: bool) -> bool {
        client.mark_destroyed();
        self.hooks.remove_client(client.id());

        let mut state = self.state.lock();
        if state.clients.remove(&client.id()).is_none() {
            return false;
        }
        if client.kind() == HandleKind::Strong {
            state.strong = state.strong.saturating_sub(1);
        }
        tracing::debug!(client = client.id(), name = client.name(), "client destroyed");

        if state.phase == EnginePhase::Destroyed {
            return false;
        }
        let must_finalize = !state.finalizer && (terminate || state.strong == 0);
        if must_finalize {
            state.finalizer = true;
            state.begin_shutdown();
            while !state.clients.is_empty() {
                self.teardown.wait(&mut state);
            }
            self.finalize(state);
            return true;
        }
        if state.clients.is_empty() && !state.finalizer {
            self.finalize(state);
            return true;
        }
        self.teardown.notify_all();
        false
    }

    fn finalize(&self, mut state: MutexGuard<'_, EngineState>) {
        state.phase = EnginePhase::Destroyed;
        state.finalizer = false;
        drop(state);
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.stop();
        }
        self.teardown.notify_all();
        tracing::info!("engine destroyed");
    }

    /// Validates an asynchronous request and queues it for the dispatcher.
    /// A failure here means no reply event will ever be produced.
    pub fn submit(&self, client: &Arc<Client>, token: u64, op: AsyncOp) -> Result<()> {
        client.ensure_active()?;
        match &op {
            AsyncOp::Command(args) => {
                let command = Command::parse(args)?;
                if !self.state.lock().commands.contains(command.name()) {
                    return Err(BusError::NotFound);
                }
            }
            AsyncOp::GetProperty { name, .. } | AsyncOp::SetProperty { name, .. } => {
                check_property_name(name)?;
            }
        }

        let (seq, cancel) = {
            let mut state = client.lock();
            if state.lifecycle == HandleState::Destroyed {
                return Err(BusError::Uninitialized);
            }
            state.queue.reserve()?;
            state.requests.insert(token, op.kind())
        };
        let job = Job {
            client: Arc::clone(client),
            seq,
            token,
            op,
            cancel,
        };
        let submitted = match self.dispatcher.lock().as_ref() {
            Some(dispatcher) => dispatcher.submit(job),
            None => Err(BusError::Uninitialized),
        };
        if let Err(err) = submitted {
            client.abandon_request(seq);
            return Err(err);
        }
        tracing::trace!(client = client.id(), token, seq, "request queued");
        Ok(())
    }

    /// Executes one request on the dispatcher and replies to its client.
    pub fn run_job(&self, job: Job) {
        let Job {
            client,
            seq,
            token,
            op,
            cancel,
        } = job;
        let (kind, aborted) = match client.lock().requests.get(seq) {
            Some(pending) => (pending.kind, pending.abort_requested()),
            None => return,
        };
        tracing::trace!(client = client.id(), token, ?kind, aborted, "running request");
        let event = match op {
            AsyncOp::Command(args) => {
                request::command_reply(token, self.run_command(client.id(), &args, Some(cancel)))
            }
            AsyncOp::GetProperty { name, format } => {
                let result = self.get_property_as(&name, format);
                request::get_property_reply(token, name, format, result)
            }
            AsyncOp::SetProperty { name, value } => {
                request::set_property_reply(token, self.set_property(&name, value))
            }
        };
        client.deliver_reply(seq, event);
    }

    /// Runs a command with the engine lock held for its whole duration,
    /// except while the handler fires a hook.
    pub fn run_command(&self, caller: u64, args: &Value, cancel: Option<CancelToken>) -> Result<Value> {
        self.run_parsed(caller, &Command::parse(args)?, cancel)
    }

    pub fn run_parsed(&self, caller: u64, command: &Command, cancel: Option<CancelToken>) -> Result<Value> {
        let state = self.state.lock();
        let handler = state.commands.get(command.name()).ok_or(BusError::NotFound)?;
        tracing::debug!(command = command.name(), caller, "running command");
        let mut ctx = CommandContext::new(self, state, caller, cancel);
        handler.run(&mut ctx, command).map_err(|err| {
            tracing::debug!(command = command.name(), error = %err, "command failed");
            err
        })
    }

    pub fn register_command(&self, name: &str, handler: Arc<dyn CommandHandler>) -> Result<()> {
        self.state.lock().commands.insert(name, handler)
    }

    pub fn get_property_as(&self, name: &str, format: Format) -> Result<Value> {
        self.state.lock().properties.get_as(name, format)
    }

    pub fn set_property(&self, name: &str, value: Value) -> Result<()> {
        self.state.lock().set_property(name, value)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("phase", &self.phase())
            .finish()
    }
}
