use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptCategory {
    Rewrite,
    Autoscore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    Query,
    Reasoning,
    Answer,
    /// Reasoning and answer in one response.
    Combined,
    Score,
}

/// Supplies system-prompt text per `(category, role)`.
pub trait PromptResolver: Send + Sync {
    fn system_prompt(&self, category: PromptCategory, role: PromptRole) -> String;
}

const REWRITE_QUERY: &str = "You rewrite user queries for a reasoning dataset. \
Keep the original intent and every constraint, fix ambiguity and grammar, and do not answer it. \
Respond with JSON only: {\"query\": \"<rewritten query>\"}";

const REWRITE_REASONING: &str = "You write the step-by-step reasoning that leads to the given answer. \
Think through the problem carefully and do not restate the final answer as a separate section. \
Respond with JSON only: {\"reasoning\": \"<reasoning>\"}";

const REWRITE_ANSWER: &str = "You write the final answer to the query, consistent with the reasoning provided. \
Be complete and precise. Respond with JSON only: {\"answer\": \"<answer>\"}";

const REWRITE_COMBINED: &str = "You produce a reasoning trace and a final answer for the query. \
Respond with JSON only, reasoning first: {\"reasoning\": \"<reasoning>\", \"answer\": \"<answer>\"}";

const AUTOSCORE: &str = "You grade dataset entries for quality. Consider correctness of the answer, \
soundness of the reasoning and clarity of the query. Reply with JSON only: {\"score\": N} \
where N is an integer from 1 (unusable) to 5 (excellent).";

/// Built-in prompts, optionally overridden from a JSON file of the form
/// `{"rewrite.reasoning": "...", "autoscore.score": "..."}`.
#[derive(Clone, Debug, Default)]
pub struct PromptSet {
    overrides: HashMap<(PromptCategory, PromptRole), String>,
}

impl PromptSet {
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read prompts file {}", path.display()))?;
        let raw: HashMap<String, String> = serde_json::from_slice(&bytes).context("Prompts file must be a JSON object of strings")?;

        let mut overrides = HashMap::new();
        for (key, text) in raw {
            let (category, role) = parse_key(&key).with_context(|| format!("Unknown prompt key: {key}"))?;
            overrides.insert((category, role), text);
        }
        Ok(Self { overrides })
    }

    pub fn with_override(mut self, category: PromptCategory, role: PromptRole, text: impl Into<String>) -> Self {
        self.overrides.insert((category, role), text.into());
        self
    }
}

fn parse_key(key: &str) -> Option<(PromptCategory, PromptRole)> {
    let (c, r) = key.split_once('.')?;
    let category = serde_json::from_value(serde_json::Value::String(c.to_string())).ok()?;
    let role = serde_json::from_value(serde_json::Value::String(r.to_string())).ok()?;
    Some((category, role))
}

impl PromptResolver for PromptSet {
    fn system_prompt(&self, category: PromptCategory, role: PromptRole) -> String {
        if let Some(text) = self.overrides.get(&(category, role)) {
            return text.clone();
        }
        match (category, role) {
            (PromptCategory::Autoscore, _) | (_, PromptRole::Score) => AUTOSCORE,
            (PromptCategory::Rewrite, PromptRole::Query) => REWRITE_QUERY,
            (PromptCategory::Rewrite, PromptRole::Reasoning) => REWRITE_REASONING,
            (PromptCategory::Rewrite, PromptRole::Answer) => REWRITE_ANSWER,
            (PromptCategory::Rewrite, PromptRole::Combined) => REWRITE_COMBINED,
        }
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_override_keys() {
        assert_eq!(parse_key("rewrite.combined"), Some((PromptCategory::Rewrite, PromptRole::Combined)));
        assert_eq!(parse_key("autoscore.score"), Some((PromptCategory::Autoscore, PromptRole::Score)));
        assert_eq!(parse_key("rewrite"), None);
        assert_eq!(parse_key("rewrite.bogus"), None);
    }

    #[test]
    fn override_wins() {
        let set = PromptSet::default().with_override(PromptCategory::Rewrite, PromptRole::Answer, "custom");
        assert_eq!(set.system_prompt(PromptCategory::Rewrite, PromptRole::Answer), "custom");
        assert!(set.system_prompt(PromptCategory::Rewrite, PromptRole::Query).contains("\"query\""));
    }
}
