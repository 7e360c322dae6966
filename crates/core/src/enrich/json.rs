use crate::domain::portfolio::PortfolioNarrative;
use crate::enrich::contract::LlmNarrative;
use anyhow::Context;

/// Pull the JSON object out of a model reply: markdown fences first, then a
/// bare first-'{' to last-'}' span.
pub fn extract_json(text: &str) -> Option<String> {
    let trimmed = text.trim();
    match strip_fences(trimmed) {
        Some(inner) => Some(inner),
        None => brace_span(trimmed),
    }
}

fn strip_fences(text: &str) -> Option<String> {
    let rest = text.strip_prefix("```")?;
    // Drop the info string ("json", ...) up to the first newline.
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    let body = body.rfind("```").map(|end| &body[..end]).unwrap_or(body);
    Some(body.trim().to_string())
}

fn brace_span(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| text[start..=end].to_string())
}

pub fn parse_narrative(
    text: &str,
    expected_symbols: &[String],
) -> anyhow::Result<PortfolioNarrative> {
    let json_str = extract_json(text).unwrap_or_else(|| text.trim().to_string());
    let parsed = serde_json::from_str::<LlmNarrative>(&json_str).with_context(|| {
        format!("LLM output is not valid JSON for the narrative schema: {json_str}")
    })?;
    parsed.validate_and_into_narrative(expected_symbols)
}
