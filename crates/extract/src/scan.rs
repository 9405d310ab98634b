//! Tolerant scanner for possibly-truncated JSON objects.

use std::collections::HashMap;

pub(crate) struct Cursor<'a> {
    chars: std::iter::Peekable<std::str::Chars<'a>>,
}

impl<'a> Cursor<'a> {
    pub(crate) fn new(text: &'a str) -> Self {
        Self { chars: text.chars().peekable() }
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.peek().copied()
    }

    fn bump(&mut self) -> Option<char> {
        self.chars.next()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }
}

/// String values recovered per (lower-cased) key. First occurrence wins.
pub(crate) type Values = HashMap<String, String>;

/// Walks an object whose opening brace was already consumed, collecting its
/// own string and primitive values. Nested objects are consumed but not
/// read. Stops quietly at the end of input.
pub(crate) fn scan_object(cur: &mut Cursor<'_>, out: &mut Values) {
    loop {
        cur.skip_ws();
        match cur.peek() {
            None => return,
            Some('}') => {
                cur.bump();
                return;
            }
            Some('"') => {
                cur.bump();
            }
            Some(_) => {
                cur.bump();
                continue;
            }
        }

        let (key, closed) = read_string(cur);
        if !closed {
            return;
        }
        cur.skip_ws();
        if cur.peek() != Some(':') {
            continue;
        }
        cur.bump();
        cur.skip_ws();

        match cur.peek() {
            None => return,
            Some('"') => {
                cur.bump();
                let (value, _) = read_string(cur);
                out.entry(key.to_lowercase()).or_insert(value);
            }
            Some('{') => {
                cur.bump();
                scan_object(cur, &mut Values::new());
            }
            Some('[') => skip_array(cur),
            Some(_) => {
                let raw = read_primitive(cur);
                if !raw.is_empty() && raw != "null" {
                    out.entry(key.to_lowercase()).or_insert(raw);
                }
            }
        }
    }
}

/// Reads a string body after its opening quote, unescaping as it goes.
/// Returns the text and whether the closing quote was seen. An escape cut
/// off by the end of input is dropped rather than emitted raw.
pub(crate) fn read_string(cur: &mut Cursor<'_>) -> (String, bool) {
    let mut out = String::new();
    while let Some(c) = cur.bump() {
        match c {
            '"' => return (out, true),
            '\\' => match cur.bump() {
                None => break,
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some('r') => out.push('\r'),
                Some('b') => out.push('\u{8}'),
                Some('f') => out.push('\u{c}'),
                Some('u') => match read_unicode(cur) {
                    Some(ch) => out.push(ch),
                    None => break,
                },
                Some(other) => out.push(other),
            },
            c => out.push(c),
        }
    }
    (out, false)
}

fn read_hex4(cur: &mut Cursor<'_>) -> Option<u32> {
    let mut v = 0u32;
    for _ in 0..4 {
        v = v * 16 + cur.bump()?.to_digit(16)?;
    }
    Some(v)
}

fn read_unicode(cur: &mut Cursor<'_>) -> Option<char> {
    let hi = read_hex4(cur)?;
    if (0xD800..0xDC00).contains(&hi) {
        if cur.bump()? != '\\' || cur.bump()? != 'u' {
            return Some(char::REPLACEMENT_CHARACTER);
        }
        let lo = read_hex4(cur)?;
        let code = 0x10000 + ((hi - 0xD800) << 10) + (lo.wrapping_sub(0xDC00) & 0x3FF);
        return Some(char::from_u32(code).unwrap_or(char::REPLACEMENT_CHARACTER));
    }
    Some(char::from_u32(hi).unwrap_or(char::REPLACEMENT_CHARACTER))
}

fn read_primitive(cur: &mut Cursor<'_>) -> String {
    let mut raw = String::new();
    while let Some(c) = cur.peek() {
        if c == ',' || c == '}' || c.is_whitespace() {
            break;
        }
        raw.push(c);
        cur.bump();
    }
    raw
}

fn skip_array(cur: &mut Cursor<'_>) {
    let mut depth = 0usize;
    while let Some(c) = cur.bump() {
        match c {
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return;
                }
            }
            '"' => {
                read_string(cur);
            }
            _ => {}
        }
    }
}
