use serde_json::Value;

/// Keys under which verification stages list their candidate terms
const CANDIDATE_KEYS: [&str; 4] = ["keywords", "golden_keywords", "candidates", "terms"];

/// Fields naming the term when a candidate is an object
const TERM_FIELDS: [&str; 3] = ["keyword", "term", "name"];

/// Collects candidate terms from a stage's structured output
///
/// Accepts arrays of strings or of objects carrying a `keyword`, `term` or
/// `name` field. Blank entries are skipped; duplicates keep their first
/// position.
pub fn candidate_terms(output: &Value) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();

    for key in CANDIDATE_KEYS {
        let Some(items) = output.get(key).and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            let text = match item {
                Value::String(s) => Some(s.as_str()),
                Value::Object(map) => TERM_FIELDS
                    .iter()
                    .find_map(|field| map.get(*field).and_then(Value::as_str)),
                _ => None,
            };
            if let Some(text) = text.map(str::trim).filter(|t| !t.is_empty()) {
                if !terms.iter().any(|t| t == text) {
                    terms.push(text.to_string());
                }
            }
        }
    }

    terms
}
