//! Option files applied through the option channel.
//!
//! One `name=value` entry per line. Surrounding whitespace is ignored,
//! blank lines and `#` comments are skipped, and a bare `name` stands for
//! `name=yes`. A leading `--` on the name is accepted so that command-line
//! spellings can be pasted in. Values may be wrapped in double or single
//! quotes. A `[profile]` header starts a named section; only entries of the
//! default section (before any header, or under `[default]`) are applied.

use std::path::Path;

use crate::{BusError, Result};

/// One option assignment read from a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OptionEntry {
    /// 1-based line number, for diagnostics.
    pub line: usize,
    pub name: String,
    pub value: String,
}

/// Reads and parses an option file. A missing or unreadable file is an
/// [`BusError::InvalidParameter`].
pub(crate) fn load(path: &Path) -> Result<Vec<OptionEntry>> {
    let text = std::fs::read_to_string(path).map_err(|err| {
        tracing::warn!(path = %path.display(), error = %err, "cannot read option file");
        BusError::InvalidParameter
    })?;
    parse(&text)
}

/// Parses option file text. Any malformed line rejects the whole file.
pub(crate) fn parse(text: &str) -> Result<Vec<OptionEntry>> {
    let mut entries = Vec::new();
    let mut in_default = true;
    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(header) = line.strip_prefix('[') {
            let profile = header.strip_suffix(']').ok_or(BusError::InvalidParameter)?;
            in_default = profile.trim() == "default";
            continue;
        }
        if !in_default {
            continue;
        }
        let (name, value) = match line.split_once('=') {
            Some((name, value)) => (name.trim(), unquote(value.trim())?),
            None => (line, "yes".to_string()),
        };
        let name = name.strip_prefix("--").unwrap_or(name);
        if name.is_empty() {
            return Err(BusError::InvalidParameter);
        }
        entries.push(OptionEntry {
            line: index + 1,
            name: name.to_string(),
            value,
        });
    }
    Ok(entries)
}

fn unquote(value: &str) -> Result<String> {
    for quote in ['"', '\''] {
        if let Some(rest) = value.strip_prefix(quote) {
            let inner = rest.strip_suffix(quote).ok_or(BusError::InvalidParameter)?;
            return Ok(inner.to_string());
        }
    }
    Ok(value.to_string())
}
