//! Incremental field extraction for streamed model output.
//!
//! `extract` is a pure function of the accumulated text. It is meant to be
//! called after every delta on a growing buffer and never fails: truncated
//! JSON, half-open delimiters and plain prose all yield a best-effort result.

mod fields;
mod sanitize;
mod scan;

pub use fields::{extract, ExtractionResult, Field, Shape};
pub use sanitize::{sanitize_reasoning, strip_reasoning_blocks};

/// Paired reasoning delimiters recognized outside of JSON responses.
pub const REASONING_TAGS: &[(&str, &str)] = &[
    ("<think>", "</think>"),
    ("<thinking>", "</thinking>"),
    ("<reasoning>", "</reasoning>"),
];
