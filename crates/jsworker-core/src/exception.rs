//! Exception formatting.
//!
//! A [`Diagnostic`] is the engine-neutral description of a script failure.
//! [`Diagnostic::format`] renders it as
//!
//! ```text
//! test.js:1
//! 1+
//! ^^
//! SyntaxError: unexpected token in expression: ''
//!     at test.js:1
//! ```
//!
//! and falls back to the bare exception text when no location is known.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rquickjs::convert::Coerced;
use rquickjs::{CaughtError, Ctx, FromJs};

/// File name QuickJS assigns to source evaluated without one.
pub(crate) const ANONYMOUS_SCRIPT: &str = "eval_script";

/// Where a failure happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Script name or module URL.
    pub resource_name: String,
    /// 1-based line number.
    pub line_number: u32,
    /// The text of the offending line, empty when the source is unknown.
    pub source_line: String,
    /// 0-based column where the underline starts.
    pub start_column: usize,
    /// 0-based column where the underline ends (exclusive).
    pub end_column: usize,
}

/// A captured script failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// The exception rendered as a string, e.g. `"TypeError: x is not a function"`.
    pub exception: String,
    /// Location metadata, when the engine supplied any.
    pub location: Option<Location>,
    /// Stack trace including the exception header, when available.
    pub stack_trace: Option<String>,
}

impl Diagnostic {
    /// A diagnostic with no location or stack.
    pub fn message(exception: impl Into<String>) -> Self {
        Self {
            exception: exception.into(),
            location: None,
            stack_trace: None,
        }
    }

    /// Render the diagnostic for humans.
    pub fn format(&self) -> String {
        let Some(location) = &self.location else {
            return format!("{}\n", self.exception);
        };

        let mut out = format!(
            "{}:{}\n{}\n",
            location.resource_name, location.line_number, location.source_line
        );
        out.push_str(&" ".repeat(location.start_column));
        out.push_str(&"^".repeat(location.end_column.saturating_sub(location.start_column)));
        out.push('\n');

        let trailer = self
            .stack_trace
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.exception);
        out.push_str(trailer);
        out.push('\n');
        out
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

/// Source text of every script and module loaded into an instance, keyed by
/// resource name, so diagnostics can quote the offending line.
#[derive(Debug, Clone, Default)]
pub(crate) struct SourceMap(Arc<Mutex<HashMap<String, String>>>);

impl SourceMap {
    pub(crate) fn insert(&self, name: &str, source: &str) {
        self.0.lock().insert(name.to_owned(), source.to_owned());
    }

    fn contains(&self, name: &str) -> bool {
        self.0.lock().contains_key(name)
    }

    fn line(&self, name: &str, line_number: u32) -> Option<String> {
        let index = usize::try_from(line_number.checked_sub(1)?).ok()?;
        self.0
            .lock()
            .get(name)
            .and_then(|source| source.lines().nth(index).map(str::to_owned))
    }
}

/// A diagnostic plus what the engine told us about its origin.
#[derive(Debug)]
pub(crate) struct Captured {
    pub(crate) diagnostic: Diagnostic,
    /// Thrown by the parser before any statement ran.
    pub(crate) compile_error: bool,
}

/// Turn a caught engine failure into a [`Diagnostic`].
///
/// `script_name` stands in for the anonymous file name QuickJS gives to
/// evaluated scripts.
pub(crate) fn capture<'js>(
    ctx: &Ctx<'js>,
    caught: CaughtError<'js>,
    sources: &SourceMap,
    script_name: &str,
) -> Captured {
    let exception = match caught {
        CaughtError::Exception(exception) => exception,
        CaughtError::Value(value) => {
            let text = Coerced::<String>::from_js(ctx, value)
                .map_or_else(|_| "<unprintable value>".to_owned(), |c| c.0);
            return Captured {
                diagnostic: Diagnostic::message(text),
                compile_error: false,
            };
        }
        CaughtError::Error(error) => {
            return Captured {
                diagnostic: Diagnostic::message(error.to_string()),
                compile_error: false,
            };
        }
    };

    let object = exception.as_object();
    let name = object.get::<_, Option<String>>("name").ok().flatten();
    let file = object.get::<_, Option<String>>("fileName").ok().flatten();
    let line = object.get::<_, Option<i32>>("lineNumber").ok().flatten();
    let column = object.get::<_, Option<i32>>("columnNumber").ok().flatten();
    let header = exception_string(name.as_deref(), exception.message().as_deref());

    let stack = exception
        .stack()
        .map(|s| s.replace(ANONYMOUS_SCRIPT, script_name))
        .filter(|s| !s.trim().is_empty());
    let compile_error =
        name.as_deref() == Some("SyntaxError") && !stack.as_deref().is_some_and(has_call_frames);

    let resource = |file: Option<String>| {
        file.filter(|f| f != ANONYMOUS_SCRIPT)
            .unwrap_or_else(|| script_name.to_owned())
    };
    let reported = line
        .and_then(|line| u32::try_from(line).ok())
        .filter(|line| *line > 0)
        .map(|line| {
            let column = column.and_then(|c| u32::try_from(c).ok());
            (resource(file), line, column)
        });
    let frames = stack.as_deref().map(frame_locations).unwrap_or_default();

    // Native frames and engine-internal files have no source to quote.
    let origin = reported
        .clone()
        .filter(|(file, ..)| sources.contains(file))
        .or_else(|| frames.iter().find(|(file, ..)| sources.contains(file)).cloned())
        .or(reported)
        .or_else(|| frames.into_iter().next());

    let location = origin.map(|(resource_name, line_number, column)| {
        let source_line = sources.line(&resource_name, line_number).unwrap_or_default();
        let (start_column, end_column) = underline_span(&source_line, column);
        Location {
            resource_name,
            line_number,
            source_line,
            start_column,
            end_column,
        }
    });

    let stack_trace = stack.map(|s| format!("{header}\n{}", s.trim_end()));

    Captured {
        diagnostic: Diagnostic {
            exception: header,
            location,
            stack_trace,
        },
        compile_error,
    }
}

fn exception_string(name: Option<&str>, message: Option<&str>) -> String {
    match (name, message.filter(|m| !m.is_empty())) {
        (Some(name), Some(message)) => format!("{name}: {message}"),
        (Some(name), None) => name.to_owned(),
        (None, Some(message)) => message.to_owned(),
        (None, None) => "Error".to_owned(),
    }
}

/// Parser errors carry a single location frame; anything thrown while
/// running has at least one `at fn (file:line)` frame.
fn has_call_frames(stack: &str) -> bool {
    stack
        .lines()
        .filter_map(|line| line.trim().strip_prefix("at "))
        .any(|frame| frame.contains(" ("))
}

/// Every `file:line[:column]` in a QuickJS stack trace, skipping native frames.
fn frame_locations(stack: &str) -> Vec<(String, u32, Option<u32>)> {
    stack.lines().filter_map(frame_location).collect()
}

fn frame_location(line: &str) -> Option<(String, u32, Option<u32>)> {
    let frame = line.trim().strip_prefix("at ")?;
    let target = match frame.rfind('(') {
        Some(open) if frame.ends_with(')') => &frame[open + 1..frame.len() - 1],
        _ => frame,
    };
    let (rest, last) = target.rsplit_once(':')?;
    let last: u32 = last.parse().ok()?;
    match rest.rsplit_once(':') {
        Some((file, line)) if line.parse::<u32>().is_ok() => {
            Some((file.to_owned(), line.parse().ok()?, Some(last)))
        }
        _ => Some((rest.to_owned(), last, None)),
    }
}

/// Columns to underline: the reported column, or the whole statement text.
fn underline_span(source_line: &str, column: Option<u32>) -> (usize, usize) {
    if let Some(column) = column.filter(|c| *c > 0) {
        let start = (column - 1) as usize;
        return (start, start + 1);
    }
    let start = source_line.chars().count() - source_line.trim_start().chars().count();
    let end = source_line.trim_end().chars().count();
    (start, end.max(start))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn located(stack: Option<&str>) -> Diagnostic {
        Diagnostic {
            exception: "ReferenceError: x is not defined".into(),
            location: Some(Location {
                resource_name: "main.js".into(),
                line_number: 3,
                source_line: "  foo(x);".into(),
                start_column: 6,
                end_column: 7,
            }),
            stack_trace: stack.map(str::to_owned),
        }
    }

    #[test]
    fn test_format_without_location() {
        let diagnostic = Diagnostic::message("boom");
        assert_eq!(diagnostic.format(), "boom\n");
    }

    #[test]
    fn test_format_with_stack() {
        let diagnostic = located(Some(
            "ReferenceError: x is not defined\n    at <eval> (main.js:3)",
        ));
        assert_eq!(
            diagnostic.format(),
            "main.js:3\n  foo(x);\n      ^\nReferenceError: x is not defined\n    at <eval> (main.js:3)\n"
        );
    }

    #[test]
    fn test_format_without_stack_repeats_exception() {
        let formatted = located(None).format();
        assert!(formatted.ends_with("      ^\nReferenceError: x is not defined\n"));
        assert_eq!(formatted, located(Some("")).format());
    }

    #[test]
    fn test_display_matches_format() {
        let diagnostic = located(None);
        assert_eq!(diagnostic.to_string(), diagnostic.format());
    }

    #[test]
    fn test_exception_string() {
        assert_eq!(exception_string(Some("TypeError"), Some("bad")), "TypeError: bad");
        assert_eq!(exception_string(Some("Error"), Some("")), "Error");
        assert_eq!(exception_string(None, Some("bad")), "bad");
        assert_eq!(exception_string(None, None), "Error");
    }

    #[test]
    fn test_has_call_frames() {
        assert!(!has_call_frames("    at test.js:1\n"));
        assert!(has_call_frames("    at <eval> (test.js:1)\n"));
        assert!(has_call_frames("    at parse (native)\n    at f (a.js:2:5)\n"));
    }

    #[test]
    fn test_frame_locations() {
        assert_eq!(
            frame_locations("    at test.js:1\n"),
            vec![("test.js".into(), 1, None)]
        );
        assert_eq!(
            frame_locations("    at parse (native)\n    at f (https://x.test/a.js:2:5)\n"),
            vec![("https://x.test/a.js".into(), 2, Some(5))]
        );
        assert_eq!(
            frame_locations("    at g (lib.js:3)\n    at <eval> (https://x.test/b.js:7)\n"),
            vec![
                ("lib.js".into(), 3, None),
                ("https://x.test/b.js".into(), 7, None)
            ]
        );
        assert!(frame_locations("no frames here").is_empty());
    }

    #[test]
    fn test_underline_span() {
        assert_eq!(underline_span("1+", None), (0, 2));
        assert_eq!(underline_span("   throw e;  ", None), (3, 11));
        assert_eq!(underline_span("foo(x)", Some(5)), (4, 5));
        assert_eq!(underline_span("", None), (0, 0));
    }

    #[test]
    fn test_source_map_line() {
        let sources = SourceMap::default();
        sources.insert("a.js", "let a = 1;\nlet b = 2;\n");

        assert_eq!(sources.line("a.js", 2).as_deref(), Some("let b = 2;"));
        assert_eq!(sources.line("a.js", 0), None);
        assert_eq!(sources.line("a.js", 9), None);
        assert_eq!(sources.line("missing.js", 1), None);
        assert!(sources.contains("a.js"));
        assert!(!sources.contains("missing.js"));
    }
}
