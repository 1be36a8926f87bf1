//! Events delivered to a handle's queue.
//!
//! An [`Event`] is immutable once it has been queued and is handed to the
//! owning handle exactly once. Unsolicited events carry `reply_token == 0`.

use serde::{Deserialize, Serialize};

use crate::{BusError, Format, Result, Value};

/// Identifies what an [`Event`] reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Nothing happened: the wait timed out or was woken up.
    None,
    /// The engine is going away; the handle should destroy itself.
    Shutdown,
    LogMessage,
    GetPropertyReply,
    SetPropertyReply,
    CommandReply,
    StartFile,
    EndFile,
    FileLoaded,
    Idle,
    Tick,
    ClientMessage,
    VideoReconfig,
    AudioReconfig,
    Seek,
    PlaybackRestart,
    PropertyChange,
    /// At least one event was dropped because the queue was full.
    QueueOverflow,
    /// A hook is blocking the engine until the handle continues it.
    Hook,
}

impl EventKind {
    pub const ALL: [EventKind; 19] = [
        EventKind::None,
        EventKind::Shutdown,
        EventKind::LogMessage,
        EventKind::GetPropertyReply,
        EventKind::SetPropertyReply,
        EventKind::CommandReply,
        EventKind::StartFile,
        EventKind::EndFile,
        EventKind::FileLoaded,
        EventKind::Idle,
        EventKind::Tick,
        EventKind::ClientMessage,
        EventKind::VideoReconfig,
        EventKind::AudioReconfig,
        EventKind::Seek,
        EventKind::PlaybackRestart,
        EventKind::PropertyChange,
        EventKind::QueueOverflow,
        EventKind::Hook,
    ];

    /// Short symbolic name, lower case with dashes.
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::None => "none",
            EventKind::Shutdown => "shutdown",
            EventKind::LogMessage => "log-message",
            EventKind::GetPropertyReply => "get-property-reply",
            EventKind::SetPropertyReply => "set-property-reply",
            EventKind::CommandReply => "command-reply",
            EventKind::StartFile => "start-file",
            EventKind::EndFile => "end-file",
            EventKind::FileLoaded => "file-loaded",
            EventKind::Idle => "idle",
            EventKind::Tick => "tick",
            EventKind::ClientMessage => "client-message",
            EventKind::VideoReconfig => "video-reconfig",
            EventKind::AudioReconfig => "audio-reconfig",
            EventKind::Seek => "seek",
            EventKind::PlaybackRestart => "playback-restart",
            EventKind::PropertyChange => "property-change",
            EventKind::QueueOverflow => "event-queue-overflow",
            EventKind::Hook => "hook",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Whether a handle may be producing this kind itself through a request.
    /// Such events bypass the per-handle event mask.
    pub(crate) fn is_always_delivered(&self) -> bool {
        matches!(
            self,
            EventKind::Shutdown
                | EventKind::GetPropertyReply
                | EventKind::SetPropertyReply
                | EventKind::CommandReply
                | EventKind::PropertyChange
                | EventKind::QueueOverflow
                | EventKind::Hook
        )
    }

    /// Kinds the engine may broadcast on its own initiative.
    pub(crate) fn is_unsolicited(&self) -> bool {
        !matches!(
            self,
            EventKind::None
                | EventKind::GetPropertyReply
                | EventKind::SetPropertyReply
                | EventKind::CommandReply
                | EventKind::PropertyChange
                | EventKind::QueueOverflow
                | EventKind::Hook
        )
    }
}

/// Severity of a log message. Lower is more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum LogLevel {
    /// Disables delivery entirely; never attached to a message.
    No = 0,
    Fatal = 10,
    Error = 20,
    Warn = 30,
    Info = 40,
    V = 50,
    Debug = 60,
    Trace = 70,
}

impl LogLevel {
    /// Lower-case name accepted by [`LogLevel::parse`].
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::No => "no",
            LogLevel::Fatal => "fatal",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::V => "v",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    pub fn parse(name: &str) -> Result<Self> {
        match name {
            "no" => Ok(LogLevel::No),
            "fatal" => Ok(LogLevel::Fatal),
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "v" => Ok(LogLevel::V),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            _ => Err(BusError::InvalidParameter),
        }
    }

    /// Whether a handle subscribed at `self` receives a message at `level`.
    pub fn admits(&self, level: LogLevel) -> bool {
        level != LogLevel::No && level <= *self
    }
}

impl TryFrom<String> for LogLevel {
    type Error = BusError;

    fn try_from(value: String) -> Result<Self> {
        LogLevel::parse(&value)
    }
}

impl From<LogLevel> for String {
    fn from(value: LogLevel) -> Self {
        value.name().to_string()
    }
}

/// Property snapshot attached to change notifications and get replies.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEvent {
    pub name: String,
    /// Always the requested format, except `None` when the value could not
    /// be retrieved.
    pub format: Format,
    pub value: Option<Value>,
}

/// A log line delivered to handles whose threshold admits its level.
#[derive(Debug, Clone, PartialEq)]
pub struct LogMessage {
    pub prefix: String,
    pub level: LogLevel,
    /// One line, newline terminated.
    pub text: String,
}

/// Kind-specific data carried by an [`Event`].
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EventPayload {
    #[default]
    None,
    Property(PropertyEvent),
    Log(LogMessage),
    ClientMessage(Vec<String>),
    Hook {
        name: String,
        /// Internal id to hand back to `hook_continue`.
        id: u64,
    },
    /// Result data of a command reply.
    Command(Value),
}

/// A single notification or reply.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    /// Outcome of a failed request; `None` on success and for
    /// notifications.
    pub error: Option<BusError>,
    /// Caller token of the request or observation this event answers.
    pub reply_token: u64,
    pub payload: EventPayload,
}

impl Event {
    /// The sentinel returned by a wait that produced nothing.
    pub fn none() -> Self {
        Self::new(EventKind::None)
    }

    /// A payload-less event of `kind`.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            error: None,
            reply_token: 0,
            payload: EventPayload::None,
        }
    }

    pub fn is_none(&self) -> bool {
        self.kind == EventKind::None
    }

    pub(crate) fn with_token(mut self, token: u64) -> Self {
        self.reply_token = token;
        self
    }

    pub(crate) fn with_payload(mut self, payload: EventPayload) -> Self {
        self.payload = payload;
        self
    }

    pub(crate) fn with_error(mut self, error: Option<BusError>) -> Self {
        self.error = error;
        self
    }

    pub(crate) fn shutdown() -> Self {
        Self::new(EventKind::Shutdown)
    }

    pub(crate) fn queue_overflow() -> Self {
        Self::new(EventKind::QueueOverflow)
    }

    pub(crate) fn property_change(token: u64, property: PropertyEvent) -> Self {
        Self::new(EventKind::PropertyChange)
            .with_token(token)
            .with_payload(EventPayload::Property(property))
    }

    /// The property snapshot, for property changes and get replies.
    pub fn property(&self) -> Option<&PropertyEvent> {
        match &self.payload {
            EventPayload::Property(property) => Some(property),
            _ => None,
        }
    }

    /// Converts the event into a map suitable for scripting consumers.
    pub fn to_value(&self) -> Value {
        let mut map = Value::map([("event", Value::from(self.kind.name()))]);
        if self.reply_token != 0 {
            // Tokens are opaque; keep the bit pattern.
            map.insert("id", Value::Int64(self.reply_token as i64));
        }
        if let Some(error) = self.error {
            map.insert("error", Value::from(error.to_string()));
        }
        match &self.payload {
            EventPayload::None => {}
            EventPayload::Property(property) => {
                map.insert("name", Value::from(property.name.as_str()));
                if let Some(value) = &property.value {
                    map.insert("data", value.clone());
                }
            }
            EventPayload::Log(message) => {
                map.insert("prefix", Value::from(message.prefix.as_str()));
                map.insert("level", Value::from(message.level.name()));
                map.insert("text", Value::from(message.text.as_str()));
            }
            EventPayload::ClientMessage(args) => {
                map.insert("args", Value::args(args.iter().cloned()));
            }
            EventPayload::Hook { name, id } => {
                map.insert("hook_name", Value::from(name.as_str()));
                map.insert("hook_id", Value::Int64(*id as i64));
            }
            EventPayload::Command(result) => {
                map.insert("result", result.clone());
            }
        }
        map
    }
}
