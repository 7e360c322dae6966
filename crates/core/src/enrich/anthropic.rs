use crate::config::Settings;
use crate::domain::portfolio::PortfolioNarrative;
use crate::enrich::contract::LlmNarrative;
use crate::enrich::error::NarrativeModelError;
use crate::enrich::json;
use crate::enrich::{NarrativeClient, NarrativeInput, Provider};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-3-5-sonnet-latest";
const DEFAULT_MAX_TOKENS: u32 = 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const TOOL_NAME_EMIT_NARRATIVE: &str = "emit_narrative";
const REPAIR_ATTEMPTS: u32 = 2;

#[derive(Debug, Clone)]
pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
}

impl AnthropicClient {
    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        let api_key = settings.require_anthropic_api_key()?.to_string();
        let base_url =
            std::env::var("ANTHROPIC_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model = std::env::var("ANTHROPIC_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let max_tokens = std::env::var("ANTHROPIC_MAX_TOKENS")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_MAX_TOKENS);
        let timeout_secs = std::env::var("ANTHROPIC_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            http,
            api_key,
            base_url,
            model,
            max_tokens,
        })
    }

    /// One messages-API round trip with the narrative tool forced on.
    async fn post_messages(
        &self,
        content: String,
        max_tokens: u32,
    ) -> anyhow::Result<(serde_json::Value, MessagesResponse)> {
        let req = MessagesRequest {
            model: self.model.clone(),
            max_tokens,
            system: Self::system_prompt(),
            messages: vec![ChatMessage {
                role: "user",
                content,
            }],
            tools: Self::tools(),
            tool_choice: serde_json::json!({"type": "tool", "name": TOOL_NAME_EMIT_NARRATIVE}),
        };

        let res = self
            .http
            .post(format!("{}/v1/messages", self.base_url.trim_end_matches('/')))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&req)
            .send()
            .await
            .context("Anthropic request failed")?;

        let status = res.status();
        let body = res
            .text()
            .await
            .context("failed to read Anthropic response body")?;
        if !status.is_success() {
            let raw_response_json = serde_json::from_str(&body).ok();
            return Err(NarrativeModelError {
                provider: Provider::Anthropic,
                stage: "http",
                detail: format!("status={status}"),
                raw_output: Some(body),
                raw_response_json,
            }
            .into());
        }

        let raw: serde_json::Value = serde_json::from_str(&body)
            .with_context(|| format!("failed to parse Anthropic response JSON: {body}"))?;
        let parsed: MessagesResponse = serde_json::from_value(raw.clone())
            .context("failed to decode Anthropic messages response")?;
        Ok((raw, parsed))
    }

    fn tools() -> Vec<ToolSpec> {
        // Item count varies with the portfolio, so symbol coverage is
        // enforced by contract validation, not the schema.
        let schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["headline", "market_comment", "items"],
            "properties": {
                "headline": {"type": "string"},
                "market_comment": {"type": ["string", "null"]},
                "items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": ["symbol", "commentary", "conviction"],
                        "properties": {
                            "symbol": {"type": "string"},
                            "commentary": {"type": "string"},
                            "conviction": {"type": ["number", "null"]}
                        }
                    }
                }
            }
        });

        vec![ToolSpec {
            name: TOOL_NAME_EMIT_NARRATIVE,
            description: "Emit the final portfolio narrative as structured JSON",
            input_schema: schema,
        }]
    }

    fn system_prompt() -> String {
        [
            "You are a portfolio commentator for ASX equities.",
            "You annotate an already-final numeric portfolio. Never suggest changing it.",
            "Return ONLY valid JSON. Do not wrap in markdown. Do not include any extra keys.",
            "No trailing commas. No comments. Use double quotes for all JSON strings.",
            "Output schema:",
            "{",
            "  \"headline\": \"one-line portfolio headline\",",
            "  \"market_comment\": \"optional broader-market remark\",",
            "  \"items\": [",
            "    {",
            "      \"symbol\": \"CBA.AX\",",
            "      \"commentary\": \"1-2 sentences on this position\",",
            "      \"conviction\": 0.0",
            "    }",
            "  ]",
            "}",
            "Rules:",
            "- items must cover every provided position symbol exactly once",
            "- market_comment key MUST be present (use null if none)",
            "- conviction key MUST be present (use null if unknown)",
            "- conviction (if present) must be in [0, 1]",
        ]
        .join("\n")
    }

    fn user_prompt(input: &NarrativeInput) -> String {
        format!(
            "Task: Write commentary for this recommended ASX portfolio (strategy={}, risk_tolerance={}, tier={}).\n\nPositions JSON:\n{}",
            input.strategy,
            input.risk_tolerance,
            input.tier.label(),
            input.positions_json()
        )
    }

    fn repair_prompt(previous_reply: &str, expected_symbols: &[String]) -> String {
        let schema = [
            "{",
            "  \"headline\": \"...\",",
            "  \"market_comment\": null,",
            "  \"items\": [",
            "    {",
            "      \"symbol\": \"CBA.AX\",",
            "      \"commentary\": \"...\",",
            "      \"conviction\": null",
            "    }",
            "  ]",
            "}",
        ]
        .join("\n");

        format!(
            "Your previous reply did not satisfy the narrative contract.\n\n\
TASK: Output ONLY a single JSON object that exactly matches the schema and rules.\n\
- Do NOT include any markdown, prose, or code fences.\n\
- Do NOT include trailing commas or comments.\n\
- Use double quotes for all JSON strings.\n\
- items MUST contain exactly one entry per symbol in: {}.\n\
- Each item MUST include keys: symbol, commentary, conviction.\n\n\
SCHEMA:\n{schema}\n\n\
REJECTED REPLY (for reference only; DO NOT copy verbatim):\n{previous_reply}",
            expected_symbols.join(", ")
        )
    }

    /// Forced tool payload, if the model emitted one.
    fn tool_payload(res: &MessagesResponse) -> Option<&serde_json::Value> {
        res.content.iter().find_map(|block| match block {
            ReplyBlock::ToolUse { name, input } if name == TOOL_NAME_EMIT_NARRATIVE => Some(input),
            _ => None,
        })
    }

    fn joined_text(res: &MessagesResponse) -> String {
        res.content
            .iter()
            .filter_map(|block| match block {
                ReplyBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Tool payload first; plain text (fenced or bare JSON) as fallback.
    fn decode_narrative(
        res: &MessagesResponse,
        expected_symbols: &[String],
    ) -> anyhow::Result<PortfolioNarrative> {
        if let Some(payload) = Self::tool_payload(res) {
            let parsed: LlmNarrative = serde_json::from_value(payload.clone())
                .context("tool_use input does not match the narrative contract")?;
            return parsed.validate_and_into_narrative(expected_symbols);
        }
        json::parse_narrative(&Self::joined_text(res), expected_symbols)
    }

    /// What to quote back at the model in a repair prompt.
    fn reply_for_repair(res: &MessagesResponse) -> String {
        match Self::tool_payload(res) {
            Some(payload) => payload.to_string(),
            None => Self::joined_text(res),
        }
    }

    pub async fn narrate_portfolio_with_raw(
        &self,
        input: NarrativeInput,
    ) -> anyhow::Result<(PortfolioNarrative, serde_json::Value)> {
        let (mut raw, mut res) = self
            .post_messages(Self::user_prompt(&input), self.max_tokens)
            .await?;

        // Truncated replies never validate; retry once with a higher ceiling
        // before burning repair attempts.
        if res.stop_reason.as_deref() == Some("max_tokens") {
            let bumped = self.max_tokens.saturating_mul(2).max(4096);
            tracing::warn!(
                from = self.max_tokens,
                to = bumped,
                "Anthropic stop_reason=max_tokens; retrying once with higher max_tokens"
            );
            (raw, res) = self
                .post_messages(Self::user_prompt(&input), bumped)
                .await?;
        }

        let mut last_err = match Self::decode_narrative(&res, &input.expected_symbols) {
            Ok(narrative) => return Ok((narrative, raw)),
            Err(err) => err,
        };
        let mut last_reply = Self::reply_for_repair(&res);

        for attempt in 1..=REPAIR_ATTEMPTS {
            tracing::warn!(
                attempt,
                error = %last_err,
                "narrative reply invalid; requesting repair"
            );
            let (next_raw, next_res) = self
                .post_messages(
                    Self::repair_prompt(&last_reply, &input.expected_symbols),
                    self.max_tokens,
                )
                .await?;
            match Self::decode_narrative(&next_res, &input.expected_symbols) {
                Ok(narrative) => return Ok((narrative, next_raw)),
                Err(err) => {
                    last_err = err;
                    last_reply = Self::reply_for_repair(&next_res);
                    raw = next_raw;
                }
            }
        }

        Err(NarrativeModelError {
            provider: Provider::Anthropic,
            stage: "decode_after_repair",
            detail: format!("{last_err:#}"),
            raw_output: Some(last_reply),
            raw_response_json: Some(raw),
        }
        .into())
    }
}

#[async_trait::async_trait]
impl NarrativeClient for AnthropicClient {
    fn provider(&self) -> Provider {
        Provider::Anthropic
    }

    async fn narrate_portfolio(
        &self,
        input: NarrativeInput,
    ) -> anyhow::Result<PortfolioNarrative> {
        let (narrative, _raw) = self.narrate_portfolio_with_raw(input).await?;
        Ok(narrative)
    }
}

#[derive(Debug, Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<ChatMessage>,
    tools: Vec<ToolSpec>,
    tool_choice: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Debug, Serialize)]
struct ToolSpec {
    name: &'static str,
    description: &'static str,
    input_schema: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ReplyBlock>,

    #[serde(default)]
    stop_reason: Option<String>,
}

// Thinking and any future block types land in Unknown; only text and
// tool_use carry narrative output.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ReplyBlock {
    #[serde(rename = "text")]
    Text { text: String },

    #[serde(rename = "tool_use")]
    ToolUse {
        #[serde(default)]
        name: String,
        #[serde(default)]
        input: serde_json::Value,
    },

    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn expected() -> Vec<String> {
        vec!["BHP.AX".to_string(), "CBA.AX".to_string()]
    }

    #[test]
    fn decodes_a_forced_tool_reply() {
        let res = MessagesResponse {
            content: vec![ReplyBlock::ToolUse {
                name: TOOL_NAME_EMIT_NARRATIVE.to_string(),
                input: json!({
                    "headline": "Banks lead, miners hedge",
                    "market_comment": null,
                    "items": [
                        {"symbol": "CBA.AX", "commentary": "Anchor position.", "conviction": 0.7},
                        {"symbol": "BHP.AX", "commentary": "Commodity ballast.", "conviction": null},
                    ],
                }),
            }],
            stop_reason: None,
        };

        let narrative = AnthropicClient::decode_narrative(&res, &expected()).unwrap();
        assert_eq!(narrative.headline, "Banks lead, miners hedge");
        assert_eq!(narrative.items.len(), 2);
        assert_eq!(narrative.items[0].conviction, Some(0.7));
    }

    #[test]
    fn falls_back_to_fenced_text_when_no_tool_block() {
        let body = json!({
            "headline": "Two-stock starter",
            "market_comment": "Quiet session.",
            "items": [
                {"symbol": "BHP.AX", "commentary": "Iron ore exposure.", "conviction": 0.6},
                {"symbol": "CBA.AX", "commentary": "Dividend anchor.", "conviction": 0.5},
            ],
        });
        let res = MessagesResponse {
            content: vec![ReplyBlock::Text {
                text: format!("Here you go:\n```json\n{body}\n```"),
            }],
            stop_reason: None,
        };

        let narrative = AnthropicClient::decode_narrative(&res, &expected()).unwrap();
        assert_eq!(narrative.headline, "Two-stock starter");
        assert_eq!(narrative.market_comment.as_deref(), Some("Quiet session."));
    }

    #[test]
    fn rejects_a_tool_reply_missing_a_symbol() {
        let res = MessagesResponse {
            content: vec![ReplyBlock::ToolUse {
                name: TOOL_NAME_EMIT_NARRATIVE.to_string(),
                input: json!({
                    "headline": "Partial",
                    "market_comment": null,
                    "items": [
                        {"symbol": "CBA.AX", "commentary": "Only one.", "conviction": null},
                    ],
                }),
            }],
            stop_reason: None,
        };

        assert!(AnthropicClient::decode_narrative(&res, &expected()).is_err());
    }

    #[test]
    fn unknown_blocks_are_ignored_in_text_joins() {
        let raw = json!({
            "content": [
                {"type": "server_tool_use", "id": "x"},
                {"type": "text", "text": "part one"},
                {"type": "text", "text": "part two"},
            ],
            "stop_reason": "end_turn",
        });
        let res: MessagesResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(AnthropicClient::joined_text(&res), "part one\npart two");
    }
}
