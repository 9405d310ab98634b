use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type RecordId = String;

pub const ROLE_USER: &str = "user";

/// Keys consulted, in order, when a record's `query` is blank.
const QUERY_ALIASES: &[&str] = &["instruction", "question", "prompt", "input"];
const SEED_KEY: &str = "full_seed";

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl Message {
    pub fn is_user(&self) -> bool {
        self.role.eq_ignore_ascii_case(ROLE_USER)
    }
}

/// One dataset entry being curated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: RecordId,
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub answer: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<Message>>,
    /// 0 = unrated, 1..=5 = rated
    #[serde(default)]
    pub score: u8,
    #[serde(default)]
    pub is_duplicate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_group_id: Option<String>,
    #[serde(default)]
    pub is_discarded: bool,
    #[serde(default)]
    pub has_unsaved_changes: bool,

    /// Imported keys this model does not know about (aliases, `full_seed`, ...).
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>, query: impl Into<String>, reasoning: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            query: query.into(),
            reasoning: reasoning.into(),
            answer: answer.into(),
            ..Default::default()
        }
    }

    /// Multi-turn records carry a non-empty message list; their `query` and
    /// `answer` are derived for display only.
    pub fn is_multi_turn(&self) -> bool {
        self.messages.as_ref().is_some_and(|m| !m.is_empty())
    }

    /// The text that identifies this record for duplicate detection.
    pub fn primary_query(&self) -> &str {
        if let Some(messages) = self.messages.as_ref().filter(|m| !m.is_empty()) {
            if let Some(first_user) = messages.iter().find(|m| m.is_user()) {
                return &first_user.content;
            }
        }
        &self.query
    }

    /// Source query for instruction building: `query`, then the alias keys,
    /// then `full_seed`. Blank values are skipped.
    pub fn seed_text(&self) -> &str {
        if !self.primary_query().trim().is_empty() {
            return self.primary_query();
        }
        QUERY_ALIASES
            .iter()
            .chain(std::iter::once(&SEED_KEY))
            .filter_map(|k| self.extra.get(*k).and_then(Value::as_str))
            .find(|v| !v.trim().is_empty())
            .unwrap_or("")
    }
}

/// Field-level change for one message of a multi-turn record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePatch {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

/// A set of field replacements applied atomically by merge-by-ID.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_discarded: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessagePatch>,
}

impl RecordPatch {
    pub fn score(score: u8) -> Self {
        Self { score: Some(score), ..Default::default() }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Applies every present field. Returns whether anything changed.
    /// A message patch pointing past the end of the conversation is ignored.
    pub fn apply(&self, rec: &mut Record) -> bool {
        let mut changed = false;

        fn set<T: PartialEq + Clone>(slot: &mut T, v: &Option<T>, changed: &mut bool) {
            if let Some(v) = v {
                if slot != v {
                    *slot = v.clone();
                    *changed = true;
                }
            }
        }

        set(&mut rec.query, &self.query, &mut changed);
        set(&mut rec.reasoning, &self.reasoning, &mut changed);
        set(&mut rec.answer, &self.answer, &mut changed);
        set(&mut rec.score, &self.score.map(|s| s.min(5)), &mut changed);
        set(&mut rec.is_discarded, &self.is_discarded, &mut changed);

        if let Some(mp) = &self.message {
            if let Some(msg) = rec.messages.as_mut().and_then(|m| m.get_mut(mp.index)) {
                set(&mut msg.content, &mp.content, &mut changed);
                if let Some(r) = &mp.reasoning {
                    if msg.reasoning.as_deref() != Some(r.as_str()) {
                        msg.reasoning = Some(r.clone());
                        changed = true;
                    }
                }
            }
        }

        if changed {
            rec.has_unsaved_changes = true;
        }
        changed
    }
}
