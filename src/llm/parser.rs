//! Turn raw oracle replies into structured stratagems
//!
//! Models wrap their JSON in all sorts of noise: reasoning blocks, markdown
//! fences, chatty preambles, trailing commas. Sanitization peels those off
//! in a fixed order before handing the text to serde. Any failure is a
//! `Parse` error, which callers treat as "no stratagem".

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::error::{Result, SwarmError};
use crate::core::types::Vec2;

/// A decision returned by the oracle for one agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stratagem {
    #[serde(rename = "stratagem_name", default)]
    pub name: String,
    #[serde(default)]
    pub justification: String,
    pub action: StratagemAction,
}

/// What the agent should do next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StratagemAction {
    Move {
        position: Vec2,
    },
    /// Target is kept as text; it is resolved against the live roster when applied
    Attack {
        #[serde(rename = "targetId")]
        target_id: String,
    },
    Hold,
}

impl StratagemAction {
    pub fn label(&self) -> &'static str {
        match self {
            StratagemAction::Move { .. } => "MOVE",
            StratagemAction::Attack { .. } => "ATTACK",
            StratagemAction::Hold => "HOLD",
        }
    }
}

/// Sanitize a raw reply and parse it as a stratagem
pub fn parse_stratagem(raw: &str) -> Result<Stratagem> {
    let json = sanitize_response(raw)?;
    let mut value: Value = serde_json::from_str(&json)
        .map_err(|e| SwarmError::parse(format!("invalid JSON: {} - Response: {}", e, json)))?;

    // Models are inconsistent about the tag's case
    if let Some(tag) = value
        .get_mut("action")
        .and_then(|action| action.get_mut("type"))
    {
        if let Some(text) = tag.as_str() {
            *tag = Value::String(text.trim().to_ascii_uppercase());
        }
    }

    serde_json::from_value(value)
        .map_err(|e| SwarmError::parse(format!("reply does not match stratagem schema: {}", e)))
}

/// Reduce a raw reply to the JSON object it contains
pub fn sanitize_response(raw: &str) -> Result<String> {
    let text = strip_think_blocks(raw);

    let body = match extract_fenced(&text) {
        Some(inner) => inner.trim(),
        None => {
            let trimmed = text.trim();
            if trimmed.starts_with('{') && trimmed.ends_with('}') {
                trimmed
            } else {
                extract_json(trimmed)?
            }
        }
    };

    if body.is_empty() {
        return Err(SwarmError::parse("empty response"));
    }

    Ok(strip_trailing_commas(body))
}

/// Remove `<think>...</think>` reasoning blocks
fn strip_think_blocks(raw: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut rest = raw;
    // Some templates emit the opening tag in the prompt, so only the close shows up
    if !rest.contains(OPEN) {
        if let Some(end) = rest.find(CLOSE) {
            rest = &rest[end + CLOSE.len()..];
        }
    }

    let mut out = String::with_capacity(rest.len());
    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);
        match rest[start..].find(CLOSE) {
            Some(end) => rest = &rest[start + end + CLOSE.len()..],
            // Unterminated block: everything after it is reasoning
            None => return out,
        }
    }
    out.push_str(rest);
    out
}

/// Inner content of the first markdown code fence, if any
fn extract_fenced(text: &str) -> Option<&str> {
    const FENCE: &str = "```";
    let start = text.find(FENCE)? + FENCE.len();
    let after = &text[start..];
    // Skip the language tag line (```json)
    let content = match after.find('\n') {
        Some(i) if after[..i].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &after[i + 1..],
        _ => after,
    };
    match content.find(FENCE) {
        Some(end) => Some(&content[..end]),
        None => Some(content),
    }
}

/// Extract JSON object from a reply (handles surrounding text)
fn extract_json(response: &str) -> Result<&str> {
    let start = response
        .find('{')
        .ok_or_else(|| SwarmError::parse("No JSON found in response"))?;
    let end = response
        .rfind('}')
        .ok_or_else(|| SwarmError::parse("No closing brace found in response"))?;
    if end < start {
        return Err(SwarmError::parse("Closing brace precedes opening brace"));
    }
    Ok(&response[start..=end])
}

/// Drop commas that directly precede `}` or `]`, leaving string contents alone
fn strip_trailing_commas(json: &str) -> String {
    let chars: Vec<char> = json.chars().collect();
    let mut out = String::with_capacity(json.len());
    let mut in_string = false;
    let mut escaped = false;

    for (i, &c) in chars.iter().enumerate() {
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
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}
