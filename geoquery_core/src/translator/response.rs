use super::TranslationMode;
use crate::sql::validator::extract_select;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

static JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)^```(?:json)?\s*(.*?)\s*```$").unwrap());

/// Fields of a structured reply. Only `sql` is required.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StructuredReply {
    pub sql: String,
    #[serde(default)]
    pub explanation: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, rename = "queryType")]
    pub query_type: Option<String>,
}

/// Classification of raw model output.
#[derive(Debug, Clone, PartialEq)]
pub enum RawOutcome {
    /// A JSON reply whose `sql` holds a SELECT; `sql` is already extracted.
    Structured(StructuredReply),
    /// A SELECT found in free text.
    Plain(String),
    /// Nothing usable; carries the raw content.
    Unparseable(String),
}

fn strip_json_fence(content: &str) -> &str {
    let trimmed = content.trim();
    JSON_FENCE
        .captures(trimmed)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .unwrap_or(trimmed)
}

fn parse_structured(content: &str) -> Option<StructuredReply> {
    let body = strip_json_fence(content);
    let reply = serde_json::from_str::<StructuredReply>(body).ok().or_else(|| {
        // JSON object surrounded by prose
        let start = body.find('{')?;
        let end = body.rfind('}')?;
        if end <= start {
            return None;
        }
        serde_json::from_str::<StructuredReply>(&body[start..=end]).ok()
    })?;

    let sql = extract_select(&reply.sql)?;
    Some(StructuredReply {
        sql,
        confidence: reply.confidence.map(|c| c.clamp(0.0, 1.0)),
        ..reply
    })
}

pub fn classify(content: &str, mode: TranslationMode) -> RawOutcome {
    if mode == TranslationMode::Structured {
        if let Some(reply) = parse_structured(content) {
            return RawOutcome::Structured(reply);
        }
        debug!("Structured reply did not parse, falling back to plain extraction");
    }

    match extract_select(content) {
        Some(sql) => RawOutcome::Plain(sql),
        None => RawOutcome::Unparseable(content.to_string()),
    }
}
