//! Extracting a JSON object from free-form model output.
//!
//! Model responses wrap JSON in code fences, surround it with chatter, leave
//! trailing commas behind or switch to single quotes and bare `True`. [`extract`]
//! tries a fixed sequence of increasingly forgiving stages and reports every
//! stage's failure when none succeeds, so the diagnostic can be fed back to
//! the model verbatim.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

/// Marker reported when the text holds no `{ ... }` span at all.
pub const NO_OBJECT_BRACES: &str = "no_object_braces_found";

/// Marker reported for blank input.
pub const EMPTY_OUTPUT: &str = "empty_output";

/// Outcome of [`extract`].
#[derive(Debug, Clone, PartialEq)]
pub enum ParseResult {
    /// A JSON object was recovered
    Ok(Map<String, Value>),
    /// Nothing usable; the string says which stages failed and why
    Err(String),
}

impl ParseResult {
    /// True when an object was recovered.
    pub fn is_ok(&self) -> bool {
        matches!(self, ParseResult::Ok(_))
    }

    /// The recovered object, if any.
    pub fn value(&self) -> Option<&Map<String, Value>> {
        match self {
            ParseResult::Ok(map) => Some(map),
            ParseResult::Err(_) => None,
        }
    }

    /// The diagnostic, if extraction failed.
    pub fn error(&self) -> Option<&str> {
        match self {
            ParseResult::Ok(_) => None,
            ParseResult::Err(e) => Some(e),
        }
    }

    /// Converts into a standard `Result`.
    pub fn into_result(self) -> Result<Map<String, Value>, String> {
        match self {
            ParseResult::Ok(map) => Ok(map),
            ParseResult::Err(e) => Err(e),
        }
    }
}

/// Extracts the first well-formed JSON object from `text`.
///
/// Stages, first success wins:
/// 1. strip surrounding code fences and parse strictly,
/// 2. drop trailing commas and parse again,
/// 3. convert single quotes and `True`/`False`/`None` and parse again,
/// 4. repeat 1-3 on the substring from the first `{` to the last `}`.
///
/// A value that parses but is not an object counts as a failure.
///
/// # Examples
///
/// ```
/// use quill_narrative::{ParseResult, extract};
///
/// let text = "Here is the result:\n```json\n{\"a\": 1,}\n```\nThanks!";
/// let ParseResult::Ok(map) = extract(text) else { panic!("not recovered") };
/// assert_eq!(map["a"], 1);
///
/// let failed = extract("no json here");
/// assert!(failed.error().unwrap().contains("no_object_braces_found"));
/// ```
pub fn extract(text: &str) -> ParseResult {
    if text.trim().is_empty() {
        return ParseResult::Err(EMPTY_OUTPUT.to_string());
    }

    let mut diagnostics = Vec::new();
    if let Some(map) = parse_stages(strip_fences(text), "", &mut diagnostics) {
        return ParseResult::Ok(map);
    }

    match object_span(text) {
        Some(span) => {
            if let Some(map) = parse_stages(span, "span_", &mut diagnostics) {
                return ParseResult::Ok(map);
            }
        }
        None => diagnostics.push(format!("span: {}", NO_OBJECT_BRACES)),
    }

    tracing::debug!(
        text_len = text.len(),
        stages = diagnostics.len(),
        "No JSON object recovered"
    );
    ParseResult::Err(diagnostics.join("; "))
}

/// Decodes the first JSON object in `text` into `T`.
///
/// # Errors
///
/// Returns the extractor diagnostic, or the decoder message when the object
/// does not match `T`.
pub fn parse_as<T: DeserializeOwned>(text: &str) -> Result<T, String> {
    let map = extract(text).into_result()?;
    serde_json::from_value(Value::Object(map)).map_err(|e| format!("decode: {}", e))
}

fn parse_stages(
    candidate: &str,
    prefix: &str,
    diagnostics: &mut Vec<String>,
) -> Option<Map<String, Value>> {
    match try_object(candidate) {
        Ok(map) => return Some(map),
        Err(e) => diagnostics.push(format!("{}strict: {}", prefix, e)),
    }

    let without_commas = remove_trailing_commas(candidate);
    match try_object(&without_commas) {
        Ok(map) => return Some(map),
        Err(e) => diagnostics.push(format!("{}trailing_comma: {}", prefix, e)),
    }

    let lenient = remove_trailing_commas(&lenient_literals(candidate));
    match try_object(&lenient) {
        Ok(map) => Some(map),
        Err(e) => {
            diagnostics.push(format!("{}lenient: {}", prefix, e));
            None
        }
    }
}

fn try_object(candidate: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(candidate) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("NotAnObject: parsed {}", kind_name(&other))),
        Err(e) => Err(format!("{:?}: {}", e.classify(), e)),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Strips one surrounding markdown code fence, if present.
fn strip_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (```json) up to the first newline.
    let body = match rest.find('\n') {
        Some(pos) => &rest[pos + 1..],
        None => rest,
    };
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

fn object_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Drops commas that directly precede `}` or `]`, outside string literals.
fn remove_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for (pos, c) in text.char_indices() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let rest = text[pos + 1..].trim_start();
                if !(rest.starts_with('}') || rest.starts_with(']')) {
                    out.push(c);
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Rewrites loose literals into JSON.
///
/// Single-quoted strings become double-quoted (embedded `"` escaped), bare
/// `True`, `False` and `None` become `true`, `false` and `null`. Text inside
/// double-quoted strings is left alone.
fn lenient_literals(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                out.push('"');
                while let Some(inner) = chars.next() {
                    out.push(inner);
                    match inner {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            '\'' => {
                out.push('"');
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(escaped) => {
                                out.push('\\');
                                out.push(escaped);
                            }
                            None => out.push('\\'),
                        },
                        '"' => out.push_str("\\\""),
                        '\'' => break,
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    _ => &word,
                });
            }
            other => out.push(other),
        }
    }
    out
}
