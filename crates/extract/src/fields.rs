use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::scan::{scan_object, Cursor, Values};
use crate::REASONING_TAGS;

const REASONING_KEY: &str = "reasoning";
const QUERY_KEY: &str = "query";
/// Keys read as the answer, in priority order.
const ANSWER_KEYS: &[&str] = &["answer", "response", "text", QUERY_KEY];

/// The semantic field a caller wants out of a response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Field {
    Query,
    Reasoning,
    Answer,
}

/// How the buffer was interpreted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Shape {
    #[default]
    Empty,
    Json,
    Tagged,
    Plain,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    pub reasoning: Option<String>,
    /// First present of `answer`, `response`, `text`, `query`.
    pub answer: Option<String>,
    /// The `query` key specifically, when a JSON response carried one.
    pub query: Option<String>,
    pub has_answer_start: bool,
    pub shape: Shape,
}

impl ExtractionResult {
    /// True when both reasoning and an answer-synonym were recovered.
    pub fn has_both(&self) -> bool {
        non_blank(&self.reasoning) && non_blank(&self.answer)
    }

    /// Reads `field` with its fallback order:
    /// - `Query`: query, then answer
    /// - `Answer`: answer
    /// - `Reasoning`: reasoning, then answer
    ///
    /// and finally the whole `raw` buffer when no structure was found.
    pub fn pick(&self, field: Field, raw: &str) -> Option<String> {
        let candidates: &[&Option<String>] = match field {
            Field::Query => &[&self.query, &self.answer],
            Field::Answer => &[&self.answer],
            Field::Reasoning => &[&self.reasoning, &self.answer],
        };
        if let Some(v) = candidates
            .iter()
            .find_map(|v| v.as_deref().map(str::trim).filter(|s| !s.is_empty()))
        {
            return Some(v.to_string());
        }
        match self.shape {
            Shape::Plain => Some(raw.trim().to_string()).filter(|s| !s.is_empty()),
            _ => None,
        }
    }
}

fn non_blank(v: &Option<String>) -> bool {
    v.as_deref().is_some_and(|s| !s.trim().is_empty())
}

/// Parses the accumulated response text.
pub fn extract(buffer: &str) -> ExtractionResult {
    let text = strip_fence(buffer.trim());
    if text.is_empty() {
        return ExtractionResult::default();
    }

    // a leading brace is JSON even if its strings mention reasoning tags
    let structured = if text.starts_with('{') {
        extract_json(text, false)
    } else {
        extract_tagged(text).or_else(|| find_json(text))
    };
    structured.unwrap_or_else(|| plain(text))
}

fn plain(text: &str) -> ExtractionResult {
    let answer = text.trim().to_string();
    ExtractionResult {
        has_answer_start: !answer.is_empty(),
        answer: Some(answer),
        shape: Shape::Plain,
        ..Default::default()
    }
}

/// Drops a leading markdown code fence line and a trailing fence. A fence
/// whose info line has not finished arriving yields empty text.
fn strip_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let Some(nl) = rest.find('\n') else {
        return "";
    };
    let body = &rest[nl + 1..];
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// An object after some prose ("Sure! {...}", an intro line before a fence).
/// Only accepted once a known key has shown up.
fn find_json(text: &str) -> Option<ExtractionResult> {
    let start = text.find('{')?;
    extract_json(&text[start..], true)
}

/// Reads the top-level keys of the object at the start of `text`. Values
/// always come from the scanner so a partial and a complete buffer agree;
/// serde only decides whether the object is finished.
fn extract_json(text: &str, require_known: bool) -> Option<ExtractionResult> {
    let complete = matches!(
        serde_json::Deserializer::from_str(text).into_iter::<Value>().next(),
        Some(Ok(Value::Object(_)))
    );

    let mut values = Values::new();
    // '{' is one byte, so slicing past it stays on a char boundary
    scan_object(&mut Cursor::new(&text[1..]), &mut values);

    let known = |k: &str| values.get(k).cloned();
    let reasoning = known(REASONING_KEY);
    let answer = ANSWER_KEYS.iter().find_map(|&k| known(k));
    let query = known(QUERY_KEY);

    if (complete || require_known) && reasoning.is_none() && answer.is_none() {
        // a finished object with no field we know is just text
        return None;
    }

    Some(ExtractionResult {
        has_answer_start: answer.as_deref().is_some_and(|a| !a.is_empty()),
        reasoning,
        answer,
        query,
        shape: Shape::Json,
    })
}

fn extract_tagged(text: &str) -> Option<ExtractionResult> {
    // ASCII lowering keeps byte offsets aligned with `text`
    let lower = text.to_ascii_lowercase();

    for (open, close) in REASONING_TAGS {
        if text.len() < open.len() && open.starts_with(lower.as_str()) {
            // an opening tag still arriving
            return Some(ExtractionResult { shape: Shape::Tagged, ..Default::default() });
        }

        let open_at = lower.find(open);
        let close_at = lower.find(close);

        let (before, reasoning, after) = match (open_at, close_at) {
            (Some(o), Some(c)) if c >= o + open.len() => {
                (&text[..o], &text[o + open.len()..c], &text[c + close.len()..])
            }
            (Some(o), _) => {
                let inner = &text[o + open.len()..];
                (&text[..o], trim_partial_suffix(inner, close), "")
            }
            (None, Some(c)) => ("", &text[..c], &text[c + close.len()..]),
            (None, None) => continue,
        };
        let reasoning = reasoning.trim().to_string();

        let rest = format!("{}{}", before.trim(), after.trim());
        let rest = strip_fence(rest.trim());

        // JSON after the tags: its keys win, the tag body backs up reasoning
        let structured = if rest.starts_with('{') { extract_json(rest, false) } else { find_json(rest) };
        if let Some(mut res) = structured {
            if !non_blank(&res.reasoning) {
                res.reasoning = Some(reasoning);
            }
            return Some(res);
        }

        let answer = rest.to_string();
        return Some(ExtractionResult {
            reasoning: Some(reasoning),
            has_answer_start: !answer.is_empty(),
            answer: Some(answer).filter(|a| !a.is_empty()),
            query: None,
            shape: Shape::Tagged,
        });
    }
    None
}

/// Removes a trailing prefix of `tag` (e.g. `</thi`) from streaming text.
fn trim_partial_suffix<'a>(text: &'a str, tag: &str) -> &'a str {
    for n in (1..tag.len()).rev() {
        if let Some(stripped) = text.strip_suffix(&tag[..n]) {
            return stripped;
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_buffer() {
        let r = extract("");
        assert_eq!(r, ExtractionResult::default());
        assert!(!r.has_answer_start);
        assert_eq!(extract("   \n").shape, Shape::Empty);
    }

    #[test]
    fn complete_json_in_either_order() {
        for buf in [
            r#"{"reasoning": "R1", "answer": "A1"}"#,
            r#"{"answer": "A1", "reasoning": "R1"}"#,
        ] {
            let r = extract(buf);
            assert_eq!(r.reasoning.as_deref(), Some("R1"));
            assert_eq!(r.answer.as_deref(), Some("A1"));
            assert!(r.has_answer_start);
            assert_eq!(r.shape, Shape::Json);
        }
    }

    #[test]
    fn answer_synonyms() {
        assert_eq!(extract(r#"{"response": "x"}"#).answer.as_deref(), Some("x"));
        assert_eq!(extract(r#"{"text": "y"}"#).answer.as_deref(), Some("y"));
        let r = extract(r#"{"query": "q"}"#);
        assert_eq!(r.answer.as_deref(), Some("q"));
        assert_eq!(r.query.as_deref(), Some("q"));
        assert_eq!(extract(r#"{"text": "t", "answer": "a"}"#).answer.as_deref(), Some("a"));
    }

    #[test]
    fn every_prefix_recovers_without_raw_escapes() {
        let full = r#"{"reasoning": "step \"one\"\nstep two \\ done", "answer": "final\tanswer"}"#;
        let reasoning = "step \"one\"\nstep two \\ done";
        let answer = "final\tanswer";

        for end in 0..=full.len() {
            let r = extract(&full[..end]);
            if let Some(got) = &r.reasoning {
                assert!(reasoning.starts_with(got.as_str()), "prefix {end}: {got:?}");
            }
            if let Some(got) = &r.answer {
                assert!(answer.starts_with(got.as_str()), "prefix {end}: {got:?}");
            }
        }
        let done = extract(full);
        assert_eq!(done.reasoning.as_deref(), Some(reasoning));
        assert_eq!(done.answer.as_deref(), Some(answer));
    }

    #[test]
    fn has_answer_start_tracks_answer_key() {
        let r = extract(r#"{"reasoning": "thinking hard", "ans"#);
        assert_eq!(r.reasoning.as_deref(), Some("thinking hard"));
        assert!(!r.has_answer_start);

        let r = extract(r#"{"reasoning": "done", "answer": ""#);
        assert!(!r.has_answer_start);

        let r = extract(r#"{"reasoning": "done", "answer": "H"#);
        assert!(r.has_answer_start);
        assert_eq!(r.answer.as_deref(), Some("H"));
    }

    #[test]
    fn fenced_json() {
        let r = extract("```json\n{\"reasoning\": \"r\", \"answer\": \"a\"}\n```");
        assert_eq!(r.reasoning.as_deref(), Some("r"));
        assert_eq!(r.answer.as_deref(), Some("a"));
        assert_eq!(extract("```js").shape, Shape::Empty);
    }

    #[test]
    fn tagged_reasoning() {
        let r = extract("<think>why</think>\nbecause");
        assert_eq!(r.reasoning.as_deref(), Some("why"));
        assert_eq!(r.answer.as_deref(), Some("because"));
        assert!(r.has_answer_start);

        let r = extract("<think>still going</thi");
        assert_eq!(r.reasoning.as_deref(), Some("still going"));
        assert!(r.answer.is_none());
        assert!(!r.has_answer_start);

        assert_eq!(extract("<thi").shape, Shape::Tagged);
        assert_eq!(extract("<THINKING>x</THINKING>y").answer.as_deref(), Some("y"));
    }

    #[test]
    fn plain_text_is_answer() {
        let r = extract("Just an answer.");
        assert_eq!(r.shape, Shape::Plain);
        assert_eq!(r.answer.as_deref(), Some("Just an answer."));
        assert!(r.has_answer_start);
        assert!(r.reasoning.is_none());
    }

    #[test]
    fn unknown_complete_object_is_plain() {
        let r = extract(r#"{"foo": "bar"}"#);
        assert_eq!(r.shape, Shape::Plain);
    }

    #[test]
    fn json_after_reasoning_tags() {
        let raw = "<think>let me think</think>{\"answer\": \"X\"}";
        let r = extract(raw);
        assert_eq!(r.shape, Shape::Json);
        assert_eq!(r.pick(Field::Answer, raw).as_deref(), Some("X"));
        assert_eq!(r.reasoning.as_deref(), Some("let me think"));

        let raw = "<think>hmm</think>\n{\"reasoning\": \"R\"}";
        assert_eq!(extract(raw).pick(Field::Reasoning, raw).as_deref(), Some("R"));

        let raw = "<think>a { brace</think>\n```json\n{\"reasoning\": \"R\", \"answer\": \"A\"}\n```";
        let r = extract(raw);
        assert_eq!(r.reasoning.as_deref(), Some("R"));
        assert_eq!(r.answer.as_deref(), Some("A"));

        // the object has not arrived yet: no raw brace leaks into the answer
        let r = extract("<think>done</think>{\"ans");
        assert_eq!(r.reasoning.as_deref(), Some("done"));
        assert!(r.answer.is_none());
    }

    #[test]
    fn json_after_prose() {
        let raw = "Sure! {\"answer\": \"Y\"}";
        assert_eq!(extract(raw).pick(Field::Answer, raw).as_deref(), Some("Y"));

        let raw = "Here you go:\n```json\n{\"reasoning\": \"r\", \"answer\": \"a\"}\n```";
        let r = extract(raw);
        assert_eq!(r.reasoning.as_deref(), Some("r"));
        assert_eq!(r.answer.as_deref(), Some("a"));

        // braces in ordinary prose stay prose
        let raw = "Use {x} as a placeholder.";
        let r = extract(raw);
        assert_eq!(r.shape, Shape::Plain);
        assert_eq!(r.pick(Field::Answer, raw).as_deref(), Some(raw));
    }

    #[test]
    fn nested_keys_never_shadow_top_level() {
        let full = r#"{"reasoning":"R","alt":{"answer":"deep"},"answer":"top"}"#;
        for end in full.find("\"answer\":\"top").unwrap()..=full.len() {
            let r = extract(&full[..end]);
            if let Some(a) = &r.answer {
                assert!("top".starts_with(a.as_str()), "prefix {end}: {a:?}");
            }
        }
        assert_eq!(extract(full).answer.as_deref(), Some("top"));

        let full = r#"{"reasoning":"R","answer":"top","alt":{"answer":"deep"}}"#;
        assert_eq!(extract(&full[..full.len() - 1]).answer.as_deref(), Some("top"));
        assert_eq!(extract(full).answer.as_deref(), Some("top"));

        let r = extract(r#"{"result": {"answer": "deep"}}"#);
        assert_eq!(r.shape, Shape::Plain);
    }

    #[test]
    fn null_values_are_absent() {
        let r = extract(r#"{"reasoning": null, "answer": "a"}"#);
        assert!(r.reasoning.is_none());
        assert_eq!(r.answer.as_deref(), Some("a"));
    }

    #[test]
    fn pick_fallbacks() {
        let raw = "plain reply";
        let r = extract(raw);
        assert_eq!(r.pick(Field::Reasoning, raw).as_deref(), Some("plain reply"));

        let raw = r#"{"answer": "only answer"}"#;
        let r = extract(raw);
        assert_eq!(r.pick(Field::Reasoning, raw).as_deref(), Some("only answer"));
        assert_eq!(r.pick(Field::Query, raw).as_deref(), Some("only answer"));

        let raw = r#"{"reasoning": "r"#;
        assert_eq!(extract(raw).pick(Field::Answer, raw), None);
    }
}
