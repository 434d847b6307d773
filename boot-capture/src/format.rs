//! Rendering of log arguments into captured lines.

use std::fmt;

use serde::Serialize;
use tracing::field::{Field, Visit};

/// Display adapter rendering a value as compact JSON.
///
/// Falls back to the value's `Debug` form when serialization fails, so it
/// is always safe to use in a log call:
///
/// ```
/// use boot_capture::Json;
///
/// let payload = serde_json::json!({"id": 7});
/// tracing::info!(payload = %Json(&payload), "received");
/// assert_eq!(Json(&payload).to_string(), r#"{"id":7}"#);
/// ```
pub struct Json<'a, T: ?Sized>(pub &'a T);

impl<T: Serialize + fmt::Debug + ?Sized> fmt::Display for Json<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self.0),
        }
    }
}

/// Join rendered arguments with single spaces and terminate the line.
pub fn join_line<I, S>(parts: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut line = String::new();
    for (i, part) in parts.into_iter().enumerate() {
        if i > 0 {
            line.push(' ');
        }
        line.push_str(part.as_ref());
    }
    line.push('\n');
    line
}

/// Collects the fields of a tracing event as rendered arguments.
///
/// The `message` field comes first and renders bare; every other field
/// renders as `name=value`, strings without quotes.
#[derive(Default)]
pub(crate) struct ArgVisitor {
    message: Option<String>,
    fields: Vec<String>,
}

impl ArgVisitor {
    pub(crate) fn into_line(self) -> String {
        join_line(self.message.into_iter().chain(self.fields))
    }
}

impl Visit for ArgVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_string());
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = Some(format!("{value:?}"));
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}
