//! Splitting of text command lines into arguments.
//!
//! Arguments are separated by whitespace. Double quotes allow spaces and
//! backslash escapes (`\"`, `\\`, `\n`, `\t`), single quotes take their
//! content literally, and `#` at the start of an argument begins a comment.

use std::iter::Peekable;
use std::str::Chars;

use crate::{BusError, Result};

/// Splits `line` into arguments. Unterminated quotes and dangling escapes
/// are rejected with [`BusError::InvalidParameter`].
pub(crate) fn split(line: &str) -> Result<Vec<String>> {
    let mut words = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        match chars.peek() {
            None | Some('#') => break,
            Some(_) => {}
        }
        let mut word = String::new();
        while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
            match c {
                '"' => double_quoted(&mut chars, &mut word)?,
                '\'' => single_quoted(&mut chars, &mut word)?,
                c => word.push(c),
            }
        }
        words.push(word);
    }
    Ok(words)
}

fn double_quoted(chars: &mut Peekable<Chars<'_>>, word: &mut String) -> Result<()> {
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(()),
            '\\' => {
                let escaped = chars.next().ok_or(BusError::InvalidParameter)?;
                word.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
            }
            c => word.push(c),
        }
    }
    Err(BusError::InvalidParameter)
}

fn single_quoted(chars: &mut Peekable<Chars<'_>>, word: &mut String) -> Result<()> {
    for c in chars.by_ref() {
        if c == '\'' {
            return Ok(());
        }
        word.push(c);
    }
    Err(BusError::InvalidParameter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_whitespace() {
        assert_eq!(split("  set volume\t50 ").unwrap(), ["set", "volume", "50"]);
        assert!(split("   ").unwrap().is_empty());
    }

    #[test]
    fn honours_quotes_and_escapes() {
        assert_eq!(
            split(r#"print-text "two words" 'raw \n' "a\"b\\c\n""#).unwrap(),
            ["print-text", "two words", r"raw \n", "a\"b\\c\n"]
        );
        assert_eq!(split(r#"set title ab"c d"e"#).unwrap(), ["set", "title", "abc de"]);
        assert_eq!(split(r#"show """#).unwrap(), ["show", ""]);
    }

    #[test]
    fn stops_at_comments() {
        assert_eq!(split("quit # bye").unwrap(), ["quit"]);
        assert_eq!(split("seek a#b").unwrap(), ["seek", "a#b"]);
    }

    #[test]
    fn rejects_unterminated_input() {
        assert_eq!(split(r#"print-text "open"#), Err(BusError::InvalidParameter));
        assert_eq!(split("print-text 'open"), Err(BusError::InvalidParameter));
        assert_eq!(split(r#"print-text "\"#), Err(BusError::InvalidParameter));
    }
}
