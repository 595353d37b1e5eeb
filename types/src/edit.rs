//! Text edits in LSP coordinates and their application to a string.
//!
//! Positions are zero-based lines and UTF-16 code-unit columns, which is what
//! the server sends. [`apply_edits`] resolves every edit against the original
//! text before mutating, so the batch is order-independent.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Position {
    pub line: u32,
    pub character: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, character: u32) -> Self {
        Self { line, character }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

impl Range {
    #[must_use]
    pub const fn new(start: Position, end: Position) -> Self {
        Self { start, end }
    }
}

/// A single replace operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

impl TextEdit {
    #[must_use]
    pub fn new(range: Range, new_text: impl Into<String>) -> Self {
        Self {
            range,
            new_text: new_text.into(),
        }
    }
}

/// Reply to a fix request: the edits and the document version they were
/// computed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixResult {
    pub document_version: i32,
    #[serde(default)]
    pub edits: Vec<TextEdit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EditError {
    #[error("edit range is inverted: {start:?} > {end:?}")]
    InvertedRange { start: Position, end: Position },
    #[error("edits overlap at line {line}, character {character}")]
    Overlapping { line: u32, character: u32 },
}

/// Apply a batch of edits to `text` atomically.
///
/// Either every edit is applied or, on error, `text` is left untouched (the
/// result is a new string). Positions past the end of a line clamp to the line
/// end; lines past the end of the text clamp to the text end.
pub fn apply_edits(text: &str, edits: &[TextEdit]) -> Result<String, EditError> {
    let mut resolved = Vec::with_capacity(edits.len());
    for edit in edits {
        let Range { start, end } = edit.range;
        if start > end {
            return Err(EditError::InvertedRange { start, end });
        }
        resolved.push((
            start,
            byte_offset(text, start),
            byte_offset(text, end),
            edit.new_text.as_str(),
        ));
    }

    // Stable sort keeps insertion order for edits at the same offset.
    resolved.sort_by_key(|&(_, start, end, _)| (start, end));
    for pair in resolved.windows(2) {
        let (_, _, prev_end, _) = pair[0];
        let (pos, next_start, _, _) = pair[1];
        if prev_end > next_start {
            return Err(EditError::Overlapping {
                line: pos.line,
                character: pos.character,
            });
        }
    }

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (_, start, end, new_text) in resolved {
        out.push_str(&text[cursor..start]);
        out.push_str(new_text);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    Ok(out)
}

fn byte_offset(text: &str, pos: Position) -> usize {
    let mut line_start = 0;
    for _ in 0..pos.line {
        match text[line_start..].find('\n') {
            Some(i) => line_start += i + 1,
            None => return text.len(),
        }
    }

    let rest = &text[line_start..];
    let mut line = rest.find('\n').map_or(rest, |i| &rest[..i]);
    line = line.strip_suffix('\r').unwrap_or(line);

    let mut units = 0u32;
    for (idx, ch) in line.char_indices() {
        if units >= pos.character {
            return line_start + idx;
        }
        units += ch.len_utf16() as u32;
    }
    line_start + line.len()
}
