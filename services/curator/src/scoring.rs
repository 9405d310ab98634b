use std::sync::Arc;

use dataset::{Record, RecordPatch};
use extract::{extract, strip_reasoning_blocks};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::prompts::{PromptCategory, PromptResolver, PromptRole};
use crate::provider::{stream_to_end, ChatRequest, GenerationParams, ModelProvider};
use crate::rewrite::{DeltaSink, RewriteError, RewriteField, StreamUpdate};

/// Rates a record 1..=5 with one model call.
pub struct Scorer {
    provider: Arc<dyn ModelProvider>,
    prompts: Arc<dyn PromptResolver>,
    params: GenerationParams,
}

impl Scorer {
    pub fn new(provider: Arc<dyn ModelProvider>, prompts: Arc<dyn PromptResolver>, params: GenerationParams) -> Self {
        Self { provider, prompts, params }
    }

    pub async fn score(&self, item: &Record, cancel: &CancellationToken, on_delta: DeltaSink<'_>) -> Result<RecordPatch, RewriteError> {
        let req = ChatRequest {
            system_prompt: self.prompts.system_prompt(PromptCategory::Autoscore, PromptRole::Score),
            user_prompt: render_item(item),
            params: self.params.clone(),
        };
        let raw = stream_to_end(self.provider.as_ref(), &req, cancel, |acc| {
            let extraction = extract(acc);
            on_delta(StreamUpdate { field: RewriteField::Answer, accumulated: acc, extraction: &extraction });
        })
        .await?;

        parse_score(&raw)
            .map(RecordPatch::score)
            .ok_or_else(|| RewriteError::Parse(format!("no score in reply: {}", raw.trim())))
    }
}

fn render_item(item: &Record) -> String {
    let mut out = String::new();
    match item.messages.as_deref().filter(|m| !m.is_empty()) {
        Some(messages) => {
            out.push_str("## Conversation\n");
            for m in messages {
                if let Some(r) = m.reasoning.as_deref().filter(|r| !r.trim().is_empty()) {
                    out.push_str(&format!("{} (reasoning): {}\n", m.role, r.trim()));
                }
                out.push_str(&format!("{}: {}\n", m.role, m.content.trim()));
            }
        }
        None => {
            out.push_str(&format!("## Query\n{}\n\n", item.seed_text().trim()));
            out.push_str(&format!("## Reasoning\n{}\n\n", item.reasoning.trim()));
            out.push_str(&format!("## Answer\n{}\n", item.answer.trim()));
        }
    }
    out
}

/// `{"score": n}` anywhere in the visible reply, else its first standalone
/// digit 1..=5. Reasoning blocks are ignored.
pub fn parse_score(text: &str) -> Option<u8> {
    let visible = strip_reasoning_blocks(text);
    let trimmed = visible.as_str();
    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if let Ok(v) = serde_json::from_str::<Value>(&trimmed[start..=end]) {
                let n = match &v["score"] {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                if let Some(n) = n {
                    let n = n.round();
                    return (1.0..=5.0).contains(&n).then_some(n as u8);
                }
            }
        }
    }

    let chars: Vec<char> = trimmed.chars().collect();
    for (i, c) in chars.iter().enumerate() {
        let Some(d) = c.to_digit(10) else { continue };
        let at = |j: Option<usize>| j.and_then(|j| chars.get(j)).copied();
        let digit = |j: Option<usize>| at(j).is_some_and(|ch| ch.is_ascii_digit());
        let dot = |j: Option<usize>| at(j) == Some('.');
        // part of a longer or decimal number
        let glued = digit(i.checked_sub(1))
            || digit(Some(i + 1))
            || (dot(i.checked_sub(1)) && digit(i.checked_sub(2)))
            || (dot(Some(i + 1)) && digit(Some(i + 2)));
        if (1..=5).contains(&d) && !glued {
            return Some(d as u8);
        }
    }
    None
}
