//! Rewrite Strategy: regenerates one or two fields of a record through
//! streaming model calls, folding every delta through the field extractor.

use std::fmt::Write as _;
use std::sync::Arc;

use dataset::{Message, MessagePatch, Record, RecordPatch};
use extract::{extract, sanitize_reasoning, ExtractionResult, Field};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::prompts::{PromptCategory, PromptResolver, PromptRole};
use crate::provider::{stream_to_end, ChatRequest, GenerationParams, ModelError, ModelProvider};

#[derive(Debug, Error)]
pub enum RewriteError {
    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Transport(ModelError),

    #[error("unusable response: {0}")]
    Parse(String),

    #[error("invalid target: {0}")]
    InvalidTarget(String),
}

impl From<ModelError> for RewriteError {
    fn from(e: ModelError) -> Self {
        match e {
            ModelError::Cancelled => RewriteError::Cancelled,
            other => RewriteError::Transport(other),
        }
    }
}

impl RewriteError {
    /// Transport and parse failures may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RewriteError::Transport(_) | RewriteError::Parse(_))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewriteField {
    Query,
    Reasoning,
    Answer,
    Both,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "target", rename_all = "snake_case")]
pub enum RewriteTarget {
    Query,
    Reasoning,
    Answer,
    Both,
    MessageQuery { index: usize },
    MessageReasoning { index: usize },
    MessageAnswer { index: usize },
    MessageBoth { index: usize },
}

impl RewriteTarget {
    pub fn field(self) -> RewriteField {
        match self {
            RewriteTarget::Query | RewriteTarget::MessageQuery { .. } => RewriteField::Query,
            RewriteTarget::Reasoning | RewriteTarget::MessageReasoning { .. } => RewriteField::Reasoning,
            RewriteTarget::Answer | RewriteTarget::MessageAnswer { .. } => RewriteField::Answer,
            RewriteTarget::Both | RewriteTarget::MessageBoth { .. } => RewriteField::Both,
        }
    }

    pub fn message_index(self) -> Option<usize> {
        match self {
            RewriteTarget::MessageQuery { index }
            | RewriteTarget::MessageReasoning { index }
            | RewriteTarget::MessageAnswer { index }
            | RewriteTarget::MessageBoth { index } => Some(index),
            _ => None,
        }
    }
}

/// Live view of one streaming call.
pub struct StreamUpdate<'a> {
    /// What this call produces; `Both` only in combined mode.
    pub field: RewriteField,
    pub accumulated: &'a str,
    pub extraction: &'a ExtractionResult,
}

pub type DeltaSink<'a> = &'a mut (dyn FnMut(StreamUpdate<'_>) + Send);

/// The text a rewrite works from, resolved from either the record itself or
/// one message of a conversation.
#[derive(Debug, Default)]
struct Slot {
    index: Option<usize>,
    history: Vec<Message>,
    query: String,
    reasoning: String,
    answer: String,
}

impl Slot {
    fn patch(&self, query: Option<String>, reasoning: Option<String>, answer: Option<String>) -> RecordPatch {
        match self.index {
            None => RecordPatch { query, reasoning, answer, ..Default::default() },
            Some(index) => RecordPatch {
                message: Some(MessagePatch { index, content: query.or(answer), reasoning }),
                ..Default::default()
            },
        }
    }
}

fn resolve(item: &Record, target: RewriteTarget) -> Result<(RewriteField, Slot), RewriteError> {
    let field = target.field();
    let messages = match item.messages.as_deref() {
        Some(m) if !m.is_empty() => m,
        _ => {
            if target.message_index().is_some() {
                return Err(RewriteError::InvalidTarget(format!("record {} has no messages", item.id)));
            }
            let slot = Slot {
                query: item.seed_text().to_string(),
                reasoning: item.reasoning.clone(),
                answer: item.answer.clone(),
                ..Default::default()
            };
            return Ok((field, slot));
        }
    };

    // item-level targets on a conversation address its first user turn or
    // its last assistant turn
    let index = match target.message_index() {
        Some(i) => i,
        None if field == RewriteField::Query => messages
            .iter()
            .position(Message::is_user)
            .ok_or_else(|| RewriteError::InvalidTarget(format!("record {} has no user message", item.id)))?,
        None => messages
            .iter()
            .rposition(|m| !m.is_user())
            .ok_or_else(|| RewriteError::InvalidTarget(format!("record {} has no assistant message", item.id)))?,
    };

    let msg = messages
        .get(index)
        .ok_or_else(|| RewriteError::InvalidTarget(format!("message index {index} out of range ({} messages)", messages.len())))?;

    if field == RewriteField::Query {
        if !msg.is_user() {
            return Err(RewriteError::InvalidTarget(format!("message {index} is not a user message")));
        }
        let slot = Slot {
            index: Some(index),
            history: messages[..index].to_vec(),
            query: msg.content.clone(),
            ..Default::default()
        };
        return Ok((field, slot));
    }

    if msg.is_user() {
        return Err(RewriteError::InvalidTarget(format!("message {index} is a user message")));
    }
    let (history, query) = match messages[..index].iter().rposition(Message::is_user) {
        Some(u) => (messages[..u].to_vec(), messages[u].content.clone()),
        None => (messages[..index].to_vec(), item.seed_text().to_string()),
    };
    let slot = Slot {
        index: Some(index),
        history,
        query,
        reasoning: msg.reasoning.clone().unwrap_or_default(),
        answer: msg.content.clone(),
    };
    Ok((field, slot))
}

fn section(out: &mut String, title: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    let _ = write!(out, "## {title}\n{}\n\n", body.trim());
}

fn user_prompt(slot: &Slot, role: PromptRole, reasoning: &str) -> String {
    let mut out = String::new();
    if !slot.history.is_empty() {
        let mut convo = String::new();
        for m in &slot.history {
            let _ = writeln!(convo, "{}: {}", m.role, m.content.trim());
        }
        section(&mut out, "Conversation so far", &convo);
    }
    section(&mut out, "Query", &slot.query);

    match role {
        PromptRole::Query => out.push_str("Rewrite the query above."),
        PromptRole::Reasoning => {
            section(&mut out, "Answer", &slot.answer);
            section(&mut out, "Current reasoning", reasoning);
            out.push_str("Write the reasoning for this query.");
        }
        PromptRole::Answer => {
            section(&mut out, "Reasoning", reasoning);
            section(&mut out, "Current answer", &slot.answer);
            out.push_str("Write the final answer for this query.");
        }
        PromptRole::Combined | PromptRole::Score => {
            section(&mut out, "Current reasoning", reasoning);
            section(&mut out, "Current answer", &slot.answer);
            out.push_str("Write the reasoning and the final answer for this query.");
        }
    }
    out
}

pub struct RewriteStrategy {
    provider: Arc<dyn ModelProvider>,
    prompts: Arc<dyn PromptResolver>,
    params: GenerationParams,
}

impl RewriteStrategy {
    pub fn new(provider: Arc<dyn ModelProvider>, prompts: Arc<dyn PromptResolver>, params: GenerationParams) -> Self {
        Self { provider, prompts, params }
    }

    /// Produces the patch for `target` without touching `item`. Performs no
    /// retries; cancellation surfaces as [`RewriteError::Cancelled`].
    pub async fn rewrite(
        &self,
        item: &Record,
        target: RewriteTarget,
        cancel: &CancellationToken,
        on_delta: DeltaSink<'_>,
    ) -> Result<RecordPatch, RewriteError> {
        let (field, slot) = resolve(item, target)?;
        debug!(item_id=%item.id, ?target, split = self.params.split_field_requests, "rewrite: start");

        match field {
            RewriteField::Query => {
                let prompt = user_prompt(&slot, PromptRole::Query, &slot.reasoning);
                let query = self.single(Field::Query, PromptRole::Query, prompt, cancel, on_delta).await?;
                Ok(slot.patch(Some(query), None, None))
            }
            RewriteField::Reasoning => {
                let prompt = user_prompt(&slot, PromptRole::Reasoning, &slot.reasoning);
                let reasoning = self.single(Field::Reasoning, PromptRole::Reasoning, prompt, cancel, on_delta).await?;
                Ok(slot.patch(None, Some(reasoning), None))
            }
            RewriteField::Answer => {
                let prompt = user_prompt(&slot, PromptRole::Answer, &slot.reasoning);
                let answer = self.single(Field::Answer, PromptRole::Answer, prompt, cancel, on_delta).await?;
                Ok(slot.patch(None, None, Some(answer)))
            }
            RewriteField::Both if self.params.split_field_requests => {
                let prompt = user_prompt(&slot, PromptRole::Reasoning, &slot.reasoning);
                let reasoning = self.single(Field::Reasoning, PromptRole::Reasoning, prompt, cancel, on_delta).await?;
                let prompt = user_prompt(&slot, PromptRole::Answer, &reasoning);
                let answer = self.single(Field::Answer, PromptRole::Answer, prompt, cancel, on_delta).await?;
                Ok(slot.patch(None, Some(reasoning), Some(answer)))
            }
            RewriteField::Both => {
                let prompt = user_prompt(&slot, PromptRole::Combined, &slot.reasoning);
                let (raw, extraction) = self.call(PromptRole::Combined, RewriteField::Both, prompt, cancel, on_delta).await?;

                // A lone field is read as reasoning and the stored answer is
                // kept: it cannot be told apart from a single-blob reply.
                let answer = extraction.has_both().then(|| extraction.answer.clone()).flatten();
                let reasoning = extraction
                    .pick(Field::Reasoning, &raw)
                    .map(|r| sanitize_reasoning(&r))
                    .filter(|r| !r.is_empty())
                    .ok_or_else(|| RewriteError::Parse("response contained no reasoning".into()))?;
                Ok(slot.patch(None, Some(reasoning), answer.map(|a| a.trim().to_string())))
            }
        }
    }

    async fn single(
        &self,
        field: Field,
        role: PromptRole,
        prompt: String,
        cancel: &CancellationToken,
        on_delta: DeltaSink<'_>,
    ) -> Result<String, RewriteError> {
        let call_field = match field {
            Field::Query => RewriteField::Query,
            Field::Reasoning => RewriteField::Reasoning,
            Field::Answer => RewriteField::Answer,
        };
        let (raw, extraction) = self.call(role, call_field, prompt, cancel, on_delta).await?;
        let value = extraction.pick(field, &raw).unwrap_or_default();
        let value = if field == Field::Reasoning { sanitize_reasoning(&value) } else { value };
        if value.is_empty() {
            return Err(RewriteError::Parse(format!("response contained no {field:?}").to_lowercase()));
        }
        Ok(value)
    }

    async fn call(
        &self,
        role: PromptRole,
        call_field: RewriteField,
        user_prompt: String,
        cancel: &CancellationToken,
        on_delta: DeltaSink<'_>,
    ) -> Result<(String, ExtractionResult), RewriteError> {
        let req = ChatRequest {
            system_prompt: self.prompts.system_prompt(PromptCategory::Rewrite, role),
            user_prompt,
            params: self.params.clone(),
        };
        let raw = stream_to_end(self.provider.as_ref(), &req, cancel, |acc| {
            let extraction = extract(acc);
            on_delta(StreamUpdate { field: call_field, accumulated: acc, extraction: &extraction });
        })
        .await?;
        let extraction = extract(&raw);
        Ok((raw, extraction))
    }
}
