//! Quoting and re-parsing of replay command arguments.
//!
//! Every argument in a replay file is rendered so that the line can be
//! split back into the exact original bytes: printable UTF-8 text is
//! double-quoted with `\"` and `\\` escapes, anything else (control
//! bytes, invalid UTF-8) is carried as `"\x<base64>"`. Bare tokens
//! (command names, scores, timestamps) pass through untouched.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::{Error, Result};

/// Render one argument for a replay command line.
pub fn format_arg(value: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(value) {
        if text.chars().all(|c| !c.is_control()) {
            return format!("\"{}\"", escape(text));
        }
    }
    format!("\"\\x{}\"", BASE64.encode(value))
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            _ => out.push(c),
        }
    }
    out
}

/// Split a replay line into its argument byte strings.
///
/// Inverse of [`format_arg`]: quoted tokens are unescaped (or base64
/// decoded when they carry the `\x` binary marker), unquoted tokens are
/// taken verbatim. Fails on unterminated quotes or bad base64, which
/// importers count as per-record errors.
pub fn split_line(line: &str) -> Result<Vec<Vec<u8>>> {
    let mut args = Vec::new();
    let mut chars = line.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            args.push(read_quoted(&mut chars, line)?);
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() {
                    break;
                }
                token.push(c);
                chars.next();
            }
            args.push(token.into_bytes());
        }
    }

    Ok(args)
}

fn read_quoted(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, line: &str) -> Result<Vec<u8>> {
    let mut raw = String::new();
    let mut closed = false;

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('"') => raw.push_str("\\\""),
                Some('\\') => raw.push_str("\\\\"),
                Some(other) => {
                    raw.push('\\');
                    raw.push(other);
                }
                None => return Err(Error::Parse(format!("dangling escape in line: {line}"))),
            },
            '"' => {
                closed = true;
                break;
            }
            _ => raw.push(c),
        }
    }

    if !closed {
        return Err(Error::Parse(format!("unterminated quote in line: {line}")));
    }

    // Binary marker: the whole token is base64 after the \x prefix.
    if let Some(b64) = raw.strip_prefix("\\x") {
        return BASE64
            .decode(b64)
            .map_err(|e| Error::Parse(format!("bad base64 payload: {e}")));
    }

    Ok(unescape(&raw))
}

fn unescape(raw: &str) -> Vec<u8> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some('"') => out.push('"'),
                Some('\\') => out.push('\\'),
                Some(other) => {
                    out.push('\\');
                    out.push(other);
                }
                None => out.push('\\'),
            }
        } else {
            out.push(c);
        }
    }
    out.into_bytes()
}
