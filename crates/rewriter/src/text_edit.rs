use std::ops::Range;

/// A single replacement against the original byte offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEdit {
    pub range: Range<usize>,
    pub new_text: String,
}

/// Apply replacements in one pass. Edits are ordered by start offset first,
/// so offsets recorded against the original source stay valid; an edit that
/// overlaps an earlier one is dropped.
pub fn apply_edits(source: &str, mut edits: Vec<TextEdit>) -> String {
    edits.sort_by_key(|edit| edit.range.start);
    let mut output = String::with_capacity(source.len());
    let mut cursor = 0;
    for TextEdit { range, new_text } in edits {
        if range.start < cursor {
            continue;
        }
        output.push_str(&source[cursor..range.start]);
        output.push_str(&new_text);
        cursor = range.end;
    }
    output.push_str(&source[cursor..]);
    output
}
