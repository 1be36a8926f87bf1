//! Correlation of caller tokens with in-flight asynchronous requests.
//!
//! Tokens are chosen by the caller and never interpreted: they may repeat
//! across requests and `0` is an ordinary value. Each accepted request gets
//! an internal sequence number, and its reply event carries the token back.

use std::collections::HashMap;

use crate::{BusError, CancelToken, Event, EventKind, EventPayload, Format, PropertyEvent, Result, Value};

/// What an asynchronous request asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Command,
    GetProperty,
    SetProperty,
}

impl RequestKind {
    /// Event kind of the reply this request produces.
    pub fn reply_kind(&self) -> EventKind {
        match self {
            RequestKind::Command => EventKind::CommandReply,
            RequestKind::GetProperty => EventKind::GetPropertyReply,
            RequestKind::SetProperty => EventKind::SetPropertyReply,
        }
    }
}

/// Work queued for the dispatcher on behalf of a handle.
#[derive(Debug, Clone)]
pub(crate) enum AsyncOp {
    Command(Value),
    GetProperty { name: String, format: Format },
    SetProperty { name: String, value: Value },
}

impl AsyncOp {
    pub fn kind(&self) -> RequestKind {
        match self {
            AsyncOp::Command(_) => RequestKind::Command,
            AsyncOp::GetProperty { .. } => RequestKind::GetProperty,
            AsyncOp::SetProperty { .. } => RequestKind::SetProperty,
        }
    }
}

#[derive(Debug)]
pub struct PendingRequest {
    pub token: u64,
    pub kind: RequestKind,
    cancel: CancelToken,
}

impl PendingRequest {
    pub fn abort_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Pending requests of a single handle, keyed by internal sequence number.
#[derive(Debug, Default)]
pub struct RequestTable {
    next_seq: u64,
    pending: HashMap<u64, PendingRequest>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a request and hands back its sequence number together with
    /// the abort flag the executing code should poll.
    pub fn insert(&mut self, token: u64, kind: RequestKind) -> (u64, CancelToken) {
        self.next_seq += 1;
        let seq = self.next_seq;
        let cancel = CancelToken::new();
        self.pending.insert(
            seq,
            PendingRequest {
                token,
                kind,
                cancel: cancel.clone(),
            },
        );
        (seq, cancel)
    }

    pub fn complete(&mut self, seq: u64) -> Option<PendingRequest> {
        self.pending.remove(&seq)
    }

    /// Marks every pending request with `token` for abort. Returns how many
    /// were marked.
    pub fn abort(&mut self, token: u64) -> usize {
        let mut marked = 0;
        for request in self.pending.values().filter(|r| r.token == token) {
            request.cancel.cancel();
            marked += 1;
        }
        marked
    }

    pub fn get(&self, seq: u64) -> Option<&PendingRequest> {
        self.pending.get(&seq)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops every pending request, asking the executing code to stop.
    pub fn clear(&mut self) {
        for request in self.pending.values() {
            request.cancel.cancel();
        }
        self.pending.clear();
    }
}

pub(crate) fn command_reply(token: u64, result: Result<Value>) -> Event {
    let (error, data) = match result {
        Ok(data) => (None, data),
        Err(err) => (Some(err), Value::None),
    };
    Event::new(EventKind::CommandReply)
        .with_token(token)
        .with_error(error)
        .with_payload(EventPayload::Command(data))
}

/// Failed reads report format `None` and no data.
pub(crate) fn get_property_reply(token: u64, name: String, format: Format, result: Result<Value>) -> Event {
    let (error, property) = match result {
        Ok(value) => (
            None,
            PropertyEvent {
                name,
                format,
                value: Some(value),
            },
        ),
        Err(err) => (
            Some(err),
            PropertyEvent {
                name,
                format: Format::None,
                value: None,
            },
        ),
    };
    Event::new(EventKind::GetPropertyReply)
        .with_token(token)
        .with_error(error)
        .with_payload(EventPayload::Property(property))
}

pub(crate) fn set_property_reply(token: u64, result: Result<()>) -> Event {
    Event::new(EventKind::SetPropertyReply)
        .with_token(token)
        .with_error(result.err())
}

/// Validation applied before a property request is accepted.
pub(crate) fn check_property_name(name: &str) -> Result<()> {
    if name.is_empty() || name.chars().any(char::is_control) {
        return Err(BusError::InvalidParameter);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abort_marks_every_request_sharing_a_token() {
        let mut table = RequestTable::new();
        let (first, first_cancel) = table.insert(5, RequestKind::Command);
        let (_, second_cancel) = table.insert(5, RequestKind::GetProperty);
        let (_, other_cancel) = table.insert(6, RequestKind::Command);

        assert_eq!(table.abort(5), 2);
        assert!(first_cancel.is_cancelled());
        assert!(second_cancel.is_cancelled());
        assert!(!other_cancel.is_cancelled());
        assert!(table.get(first).unwrap().abort_requested());
        assert_eq!(table.abort(99), 0);
    }

    #[test]
    fn sequence_numbers_distinguish_repeated_tokens() {
        let mut table = RequestTable::new();
        let (a, _) = table.insert(0, RequestKind::Command);
        let (b, _) = table.insert(0, RequestKind::Command);
        assert_ne!(a, b);

        assert_eq!(table.complete(a).map(|r| r.token), Some(0));
        assert_eq!(table.len(), 1);
        assert!(table.complete(a).is_none());
        table.complete(b);
        assert!(table.is_empty());
    }

    #[test]
    fn failed_reads_drop_the_format() {
        let event = get_property_reply(3, "volume".into(), Format::Int64, Err(BusError::Unavailable));
        assert_eq!(event.kind, EventKind::GetPropertyReply);
        assert_eq!(event.reply_token, 3);
        assert_eq!(event.error, Some(BusError::Unavailable));
        let property = event.property().unwrap();
        assert_eq!(property.format, Format::None);
        assert!(property.value.is_none());
    }

    #[test]
    fn command_replies_carry_result_data() {
        let event = command_reply(9, Ok(Value::Int64(1)));
        assert_eq!(event.error, None);
        assert_eq!(event.payload, EventPayload::Command(Value::Int64(1)));

        let failed = command_reply(9, Err(BusError::CommandFailed));
        assert_eq!(failed.error, Some(BusError::CommandFailed));
        assert_eq!(failed.payload, EventPayload::Command(Value::None));
    }

    #[test]
    fn property_names_are_validated() {
        assert!(check_property_name("volume").is_ok());
        assert_eq!(check_property_name(""), Err(BusError::InvalidParameter));
        assert_eq!(check_property_name("a\nb"), Err(BusError::InvalidParameter));
    }
}
