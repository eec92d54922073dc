//! Prompt templates
//!
//! Placeholders: each asks for a single JSON object so the extractor can
//! pick the answer out of whatever prose surrounds it.

use serde_json::Value;
use sourcer_engine::StageContext;
use sourcer_engine::engine::SAFETY_DECISIONS_KEY;
use sourcer_engine::stage::ExecutionError;

pub type Template = fn(&StageContext) -> Result<String, ExecutionError>;

pub fn sourcing(ctx: &StageContext) -> Result<String, ExecutionError> {
    Ok(format!(
        "You are a product researcher for an online marketplace.\n\
         Research the market for: {}\n\
         Answer with one JSON object: {{\"products\": [{{\"name\", \"price_krw\", \"monthly_searches\"}}], \"summary\"}}",
        ctx.query
    ))
}

pub fn competitor_analysis(ctx: &StageContext) -> Result<String, ExecutionError> {
    let sourcing = ctx.input("sourcing")?;
    Ok(format!(
        "Analyse the top competitors for: {}\n\
         Market research:\n{}\n\
         Answer with one JSON object: {{\"competitors\": [{{\"name\", \"rating\", \"weakness\"}}], \"gaps\": []}}",
        ctx.query, sourcing
    ))
}

pub fn keyword_verification(ctx: &StageContext) -> Result<String, ExecutionError> {
    let sourcing = ctx.input("sourcing")?;
    let competitors = ctx.input("competitor_analysis")?;
    Ok(format!(
        "Propose search keywords for a listing of: {}\n\
         Market research:\n{}\n\
         Competitors:\n{}\n\
         Answer with one JSON object: {{\"keywords\": []}}",
        ctx.query, sourcing, competitors
    ))
}

pub fn content_creation(ctx: &StageContext) -> Result<String, ExecutionError> {
    let verified = ctx.input("keyword_verification")?;
    let keywords = safe_keywords(verified);
    Ok(format!(
        "Write a product listing for: {}\n\
         Use only these keywords: {}\n\
         Answer with one JSON object: {{\"title\", \"description\", \"hashtags\": []}}",
        ctx.query,
        keywords.join(", ")
    ))
}

/// Terms the safety gate let through
///
/// Falls back to an empty list when the stage carries no decisions.
pub fn safe_keywords(verified: &Value) -> Vec<String> {
    verified
        .get(SAFETY_DECISIONS_KEY)
        .and_then(Value::as_array)
        .map(|decisions| {
            decisions
                .iter()
                .filter(|d| d.get("is_safe").and_then(Value::as_bool) == Some(true))
                .filter_map(|d| d.get("term").and_then(Value::as_str))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn ctx(inputs: HashMap<String, Value>) -> StageContext {
        StageContext {
            run_id: Uuid::new_v4(),
            query: "wireless earbuds".to_string(),
            inputs,
        }
    }

    #[test]
    fn test_safe_keywords_drop_rejected_terms() {
        let verified = json!({
            "keywords": ["earbuds", "나이키 earbuds"],
            "safety_decisions": [
                {"term": "earbuds", "is_safe": true},
                {"term": "나이키 earbuds", "is_safe": false},
            ]
        });
        assert_eq!(safe_keywords(&verified), vec!["earbuds"]);
    }

    #[test]
    fn test_content_prompt_lists_only_safe_keywords() {
        let verified = json!({
            "safety_decisions": [
                {"term": "earbuds case", "is_safe": true},
                {"term": "삼성 earbuds", "is_safe": false},
            ]
        });
        let prompt = content_creation(&ctx(HashMap::from([(
            "keyword_verification".to_string(),
            verified,
        )])))
        .unwrap();
        assert!(prompt.contains("earbuds case"));
        assert!(!prompt.contains("삼성"));
    }

    #[test]
    fn test_missing_predecessor() {
        assert!(matches!(
            competitor_analysis(&ctx(HashMap::new())),
            Err(ExecutionError::MissingInput(_))
        ));
    }
}
