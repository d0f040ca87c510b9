//! # Shared Types: Values, Errors, and the Diagnostic Sink
//!
//! Cross-cutting types consumed by every other `urfa-*` crate: the typed leaf
//! [`Value`] carried through hashes and wire attributes, the three-valued
//! [`ErrorKind`] the original C library returns from nearly every entry
//! point, and [`UrfaError`], which collapses that C library's two error
//! channels (a negative return code, and a message left on a fixed-size
//! per-context buffer) into a single `std::error::Error` value.

use std::fmt;
use std::net::Ipv4Addr;

/// Severity/category of a failure, mirroring the upstream library's
/// `OURFA_ERROR_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Success. Rarely constructed directly; `Result::Ok` is used instead.
    Ok,
    /// Allocation or OS-level failure.
    System,
    /// Schema violation, protocol violation, configuration misuse, or an
    /// interpreter failure.
    Other,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Ok => "ok",
            ErrorKind::System => "system",
            ErrorKind::Other => "other",
        };
        f.write_str(s)
    }
}

/// A structured error carrying a [`ErrorKind`] and a formatted, English
/// message. Every fallible public entry point in this crate family returns
/// this type (or a `thiserror` variant that wraps it).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct UrfaError {
    pub kind: ErrorKind,
    pub message: String,
}

impl UrfaError {
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Other,
            message: message.into(),
        }
    }

    pub fn system(message: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::System,
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for UrfaError {
    fn from(e: std::io::Error) -> Self {
        UrfaError::system(e.to_string())
    }
}

/// Optional diagnostic hook, invoked alongside (never instead of) the
/// `tracing` events each crate emits. Mirrors the C API's
/// `(kind, user_ctx, formatted_message) -> kind` error callback: a sink may
/// downgrade or upgrade the reported kind by returning a different one.
pub trait ErrorSink {
    fn report(&self, kind: ErrorKind, message: &str) -> ErrorKind;
}

/// An [`ErrorSink`] that does nothing and passes the kind through unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ErrorSink for NullSink {
    fn report(&self, kind: ErrorKind, _message: &str) -> ErrorKind {
        kind
    }
}

/// A typed leaf value, as stored in a [parameter hash](https://en.wikipedia.org/wiki/Associative_array)
/// or carried by a single wire attribute.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    Int(i32),
    Long(i64),
    Double(f64),
    Str(String),
    Ip(Ipv4Addr),
}

impl Value {
    /// Coerces the value to its textual form, the way the XML loader's
    /// `default="..."` attributes and `IF`/`SET` literal comparisons do.
    pub fn as_text(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Long(v) => v.to_string(),
            Value::Double(v) => v.to_string(),
            Value::Str(v) => v.clone(),
            Value::Ip(v) => v.to_string(),
        }
    }

    /// Interprets the value as a signed integer, as needed by `FOR`'s
    /// `from`/`count` expressions and array indices.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v as i64),
            Value::Long(v) => Some(*v),
            Value::Double(v) => Some(*v as i64),
            Value::Str(v) => v.trim().parse().ok(),
            Value::Ip(_) => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_as_int_parses_string() {
        assert_eq!(Value::Str("42".into()).as_int(), Some(42));
        assert_eq!(Value::Str("  7 ".into()).as_int(), Some(7));
        assert_eq!(Value::Str("nope".into()).as_int(), None);
    }

    #[test]
    fn value_as_text_round_trips_numbers() {
        assert_eq!(Value::Int(-3).as_text(), "-3");
        assert_eq!(Value::Long(9_000_000_000).as_text(), "9000000000");
    }

    #[test]
    fn null_sink_passes_kind_through() {
        let sink = NullSink;
        assert_eq!(sink.report(ErrorKind::Other, "x"), ErrorKind::Other);
    }

    #[test]
    fn value_serializes_untagged_as_json() {
        assert_eq!(serde_json::to_string(&Value::Int(7)).unwrap(), "7");
        assert_eq!(
            serde_json::to_string(&Value::Str("hi".into())).unwrap(),
            "\"hi\""
        );
        assert_eq!(
            serde_json::to_string(&Value::Ip("10.0.0.1".parse().unwrap())).unwrap(),
            "\"10.0.0.1\""
        );
    }
}
