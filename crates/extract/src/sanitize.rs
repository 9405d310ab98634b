use crate::REASONING_TAGS;

const LABELS: &[&str] = &["reasoning:", "thinking:", "thought process:"];

/// Strips delimiter markup that leaks into a reasoning rewrite: reasoning
/// tags anywhere in the text, code-fence lines and a leading label.
pub fn sanitize_reasoning(text: &str) -> String {
    let mut out = text.to_string();
    for (open, close) in REASONING_TAGS {
        out = remove_ignore_case(&out, open);
        out = remove_ignore_case(&out, close);
    }

    let out: Vec<&str> = out
        .lines()
        .filter(|l| !l.trim_start().starts_with("```"))
        .collect();
    let mut out = out.join("\n").trim().to_string();

    let lower = out.to_ascii_lowercase();
    if let Some(label) = LABELS.iter().find(|l| lower.starts_with(**l)) {
        out = out[label.len()..].trim_start().to_string();
    }
    out
}

/// Drops reasoning blocks, tags and content, leaving only the visible reply.
/// An unclosed block runs to the end of the text; a stray closing tag hides
/// everything before it.
pub fn strip_reasoning_blocks(text: &str) -> String {
    let mut out = text.to_string();
    for (open, close) in REASONING_TAGS {
        loop {
            let lower = out.to_ascii_lowercase();
            let Some(o) = lower.find(open) else { break };
            let body = o + open.len();
            let end = lower[body..].find(close).map_or(out.len(), |c| body + c + close.len());
            out.replace_range(o..end, " ");
        }
        if let Some(c) = out.to_ascii_lowercase().find(close) {
            out.replace_range(..c + close.len(), "");
        }
    }
    out.trim().to_string()
}

fn remove_ignore_case(text: &str, needle: &str) -> String {
    let lower = text.to_ascii_lowercase();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for (at, _) in lower.match_indices(needle) {
        out.push_str(&text[last..at]);
        last = at + needle.len();
    }
    out.push_str(&text[last..]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_fences() {
        let raw = "<think>\nFirst, consider X.\n</think>";
        assert_eq!(sanitize_reasoning(raw), "First, consider X.");

        let raw = "```\n<REASONING>a</reasoning>\n```";
        assert_eq!(sanitize_reasoning(raw), "a");
    }

    #[test]
    fn strips_leading_label_only() {
        assert_eq!(sanitize_reasoning("Reasoning: because"), "because");
        assert_eq!(sanitize_reasoning("Because reasoning: matters"), "Because reasoning: matters");
    }

    #[test]
    fn reasoning_blocks_removed_with_content() {
        assert_eq!(strip_reasoning_blocks("<think>score 1? {maybe}</think>\n{\"score\": 4}"), "{\"score\": 4}");
        assert_eq!(strip_reasoning_blocks("a <THINKING>x</thinking> b"), "a   b");
        assert_eq!(strip_reasoning_blocks("<think>still 2"), "");
        assert_eq!(strip_reasoning_blocks("rated 3</think> 5"), "5");
        assert_eq!(strip_reasoning_blocks("plain 3"), "plain 3");
    }

    #[test]
    fn clean_text_untouched() {
        assert_eq!(sanitize_reasoning("  step 1\nstep 2 "), "step 1\nstep 2");
    }
}
