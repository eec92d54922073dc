//! Result extractor
//!
//! Recovers a JSON object from free-form model output. This is a heuristic,
//! not a grammar: the first `{` is matched to its balanced `}` and that span
//! is parsed. Only the first object is considered; later objects are ignored.
//!
//! Extraction never fails. When nothing parses, the raw text is kept
//! verbatim and `parse_error` says why.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Outcome of an extraction attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    pub raw_output: String,
    pub parsed_output: Option<Value>,
    pub parse_error: Option<String>,
}

impl Extraction {
    pub fn is_parsed(&self) -> bool {
        self.parsed_output.is_some()
    }

    /// The parsed value, or an `{"raw_output", "parse_error"}` wrapper
    pub fn into_value(self) -> Value {
        match self.parsed_output {
            Some(value) => value,
            None => unparsed_wrapper(&self.raw_output, self.parse_error.as_deref()),
        }
    }
}

/// Builds the wrapper used in place of a value when nothing could be parsed
pub fn unparsed_wrapper(raw_output: &str, parse_error: Option<&str>) -> Value {
    let mut wrapper = serde_json::Map::new();
    wrapper.insert("raw_output".to_string(), Value::String(raw_output.to_string()));
    if let Some(err) = parse_error {
        wrapper.insert("parse_error".to_string(), Value::String(err.to_string()));
    }
    Value::Object(wrapper)
}

/// Extracts the first JSON object embedded in `raw`
pub fn extract(raw: &str) -> Extraction {
    match find_object_span(raw) {
        Ok(span) => match serde_json::from_str::<Value>(span) {
            Ok(value) => Extraction {
                raw_output: raw.to_string(),
                parsed_output: Some(value),
                parse_error: None,
            },
            Err(e) => {
                tracing::debug!("JSON extraction failed: {}", e);
                failed(raw, format!("invalid JSON: {}", e))
            }
        },
        Err(reason) => failed(raw, reason.to_string()),
    }
}

fn failed(raw: &str, reason: String) -> Extraction {
    Extraction {
        raw_output: raw.to_string(),
        parsed_output: None,
        parse_error: Some(reason),
    }
}

/// Locates the brace-delimited candidate span
///
/// Prefers the balanced match of the first `{`; falls back to the greedy
/// span up to the last `}` when the braces never balance.
fn find_object_span(text: &str) -> Result<&str, &'static str> {
    let start = text.find('{').ok_or("no JSON object found")?;

    if let Some(end) = balanced_end(text, start) {
        return Ok(&text[start..=end]);
    }

    match text.rfind('}') {
        Some(end) if end > start => Ok(&text[start..=end]),
        _ => Err("unterminated JSON object"),
    }
}

/// Byte index of the `}` closing the `{` at `start`, string and escape aware
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }

    None
}
