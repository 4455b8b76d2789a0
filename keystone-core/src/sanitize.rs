//! Identifier and literal sanitization for query text.
//!
//! Values are always bound as statement parameters. [`sanitize_identifier`]
//! guards the names that cannot be bound (tables, columns).
//! [`sanitize_value`] renders literals for diagnostics only, and
//! [`sanitize_query_text`] normalizes generated SQL before execution.

use chrono::SecondsFormat;

use crate::error::SanitizeError;
use crate::value::SqlValue;

/// Longest identifier Postgres accepts without truncation (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Validate a table or column name for interpolation.
///
/// The permitted alphabet is `[A-Za-z0-9_]` and the name must start with a
/// letter or underscore. Names that would change under stripping are
/// rejected rather than silently rewritten.
pub fn sanitize_identifier(name: &str) -> Result<String, SanitizeError> {
    let stripped: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if stripped.len() != name.len() {
        return Err(SanitizeError::invalid_identifier(
            name,
            "contains characters outside [A-Za-z0-9_]",
        ));
    }

    match stripped.chars().next() {
        None => Err(SanitizeError::invalid_identifier(name, "is empty")),
        Some(first) if !(first.is_ascii_alphabetic() || first == '_') => Err(
            SanitizeError::invalid_identifier(name, "must start with a letter or underscore"),
        ),
        Some(_) if stripped.len() > MAX_IDENTIFIER_LEN => Err(SanitizeError::invalid_identifier(
            name,
            format!("exceeds {MAX_IDENTIFIER_LEN} bytes"),
        )),
        Some(_) => Ok(stripped),
    }
}

/// Render a value as a SQL literal.
pub fn sanitize_value(value: &SqlValue) -> Result<String, SanitizeError> {
    match value {
        SqlValue::Null => Ok("NULL".to_string()),
        SqlValue::Bool(true) => Ok("TRUE".to_string()),
        SqlValue::Bool(false) => Ok("FALSE".to_string()),
        SqlValue::Int(i) => Ok(i.to_string()),
        SqlValue::Float(f) if f.is_finite() => Ok(f.to_string()),
        SqlValue::Float(_) => Err(SanitizeError::UnsupportedValueType {
            type_name: "non-finite float".to_string(),
        }),
        SqlValue::Text(s) => Ok(quote(s)),
        SqlValue::Timestamp(ts) => Ok(quote(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))),
        SqlValue::Json(_) => Err(SanitizeError::UnsupportedValueType {
            type_name: value.type_name().to_string(),
        }),
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            other => out.push(other),
        }
    }
    out.push('\'');
    out
}

/// Normalize query text: drop `--` comments, collapse whitespace, and end
/// with exactly one `;`.
///
/// Quoted literals are copied verbatim. This is a normalizer, not a
/// replacement for parameter binding.
pub fn sanitize_query_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 1);
    let mut chars = text.chars().peekable();
    let mut pending_space = false;

    while let Some(c) = chars.next() {
        if c == '\'' {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.push(c);
            copy_literal(&mut chars, &mut out);
            continue;
        }

        if c == '-' && chars.peek() == Some(&'-') {
            for skipped in chars.by_ref() {
                if skipped == '\n' {
                    break;
                }
            }
            pending_space = true;
            continue;
        }

        if c.is_whitespace() {
            pending_space = true;
            continue;
        }

        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    let body = out.trim_end_matches(|c: char| c == ';' || c.is_whitespace());
    format!("{body};")
}

/// Copy the rest of a quoted literal, honoring `''` and backslash escapes.
fn copy_literal(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, out: &mut String) {
    while let Some(c) = chars.next() {
        out.push(c);
        match c {
            '\\' => {
                if let Some(escaped) = chars.next() {
                    out.push(escaped);
                }
            }
            '\'' => {
                if chars.peek() == Some(&'\'') {
                    if let Some(doubled) = chars.next() {
                        out.push(doubled);
                    }
                } else {
                    return;
                }
            }
            _ => {}
        }
    }
}
