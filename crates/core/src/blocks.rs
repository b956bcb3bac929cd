//! Positional document blocks
//!
//! A document is split into blocks by blank lines (`"\n\n"`) when it
//! contains at least one, otherwise by single newlines. Blocks are
//! addressed by ordinal index (`b_<index>`) and are recomputed from the
//! current content on every access.
//!
//! Block identity is positional: an edit that inserts or removes a
//! delimiter shifts every later block, so a held `b_3` may afterwards refer
//! to different text. Locks follow the index, not the text.
//!
//! Offsets are counted in `char`s.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Prefix of every block id on the wire
const BLOCK_ID_PREFIX: &str = "b_";

/// Labels never exceed this many characters
pub const MAX_LABEL_CHARS: usize = 32;

/// Excerpt length used when a block's first line is blank
const EXCERPT_CHARS: usize = 30;

/// Ordinal block identifier, `b_<index>` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockId(u32);

impl BlockId {
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", BLOCK_ID_PREFIX, self.0)
    }
}

impl FromStr for BlockId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(BLOCK_ID_PREFIX)
            .ok_or_else(|| Error::InvalidBlock(s.to_string()))?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidBlock(s.to_string()));
        }
        digits
            .parse::<u32>()
            .map(BlockId)
            .map_err(|_| Error::InvalidBlock(s.to_string()))
    }
}

impl TryFrom<String> for BlockId {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<BlockId> for String {
    fn from(id: BlockId) -> Self {
        id.to_string()
    }
}

/// Character span of a block, `start..end`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: usize,
    pub end: usize,
}

/// A block located in a document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub id: BlockId,
    pub label: String,
    pub range: BlockRange,
}

/// Delimiter in effect for a document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delimiter {
    BlankLine,
    Newline,
}

impl Delimiter {
    fn detect(content: &str) -> Self {
        if content.contains("\n\n") {
            Delimiter::BlankLine
        } else {
            Delimiter::Newline
        }
    }

    fn width(self) -> usize {
        match self {
            Delimiter::BlankLine => 2,
            Delimiter::Newline => 1,
        }
    }

    fn matches_at(self, chars: &[char], i: usize) -> bool {
        match self {
            Delimiter::BlankLine => {
                chars.get(i) == Some(&'\n') && chars.get(i + 1) == Some(&'\n')
            }
            Delimiter::Newline => chars.get(i) == Some(&'\n'),
        }
    }

    /// First delimiter at or after `from`
    fn find(self, chars: &[char], from: usize) -> Option<usize> {
        (from..chars.len()).find(|&i| self.matches_at(chars, i))
    }
}

/// Locate the block containing character offset `pos` (clamped to the
/// content length).
pub fn block_at(content: &str, pos: usize) -> BlockInfo {
    let chars: Vec<char> = content.chars().collect();
    let len = chars.len();
    let p = pos.min(len);
    let delim = Delimiter::detect(content);

    let mut start = 0;
    let mut index: u32 = 0;
    let mut i = 0;
    while i < len && i < p {
        if delim.matches_at(&chars, i) {
            index = index.saturating_add(1);
            start = i + delim.width();
            i += delim.width();
        } else {
            i += 1;
        }
    }

    let end = delim.find(&chars, start).unwrap_or(len);
    let range = BlockRange { start, end };
    BlockInfo {
        id: BlockId(index),
        label: label_for(&chars[start..end], index),
        range,
    }
}

/// Span of block `index`. Empty content yields `0..0`; an index past the
/// last block yields `len..len`.
pub fn block_range(content: &str, index: u32) -> BlockRange {
    let chars: Vec<char> = content.chars().collect();
    range_in(&chars, Delimiter::detect(content), index)
}

fn range_in(chars: &[char], delim: Delimiter, index: u32) -> BlockRange {
    let len = chars.len();
    if len == 0 {
        return BlockRange { start: 0, end: 0 };
    }

    let mut start = 0;
    let mut current = 0;
    while current < index && start <= len {
        let end = delim.find(chars, start).unwrap_or(len);
        start = if end >= len { len } else { end + delim.width() };
        current += 1;
    }
    if start > len {
        return BlockRange { start: len, end: len };
    }

    let end = delim.find(chars, start).unwrap_or(len).max(start);
    BlockRange { start, end }
}

/// Number of blocks in a document
fn block_count(content: &str) -> usize {
    match Delimiter::detect(content) {
        Delimiter::BlankLine => content.split("\n\n").count(),
        Delimiter::Newline => content.split('\n').count(),
    }
}

/// All blocks of a document, in order
pub fn blocks(content: &str) -> Vec<BlockInfo> {
    let chars: Vec<char> = content.chars().collect();
    let delim = Delimiter::detect(content);
    (0..block_count(content))
        .map(|i| {
            let index = i as u32;
            let range = range_in(&chars, delim, index);
            BlockInfo {
                id: BlockId(index),
                label: label_for(&chars[range.start..range.end], index),
                range,
            }
        })
        .collect()
}

/// Human-readable label for block `id` of `content`
pub fn label_of(content: &str, id: BlockId) -> String {
    let range = block_range(content, id.index());
    let chars: Vec<char> = content.chars().collect();
    label_for(&chars[range.start..range.end], id.index())
}

/// Clamp a client-supplied label to the label length limit
pub fn clamp_label(label: &str) -> String {
    label.trim().chars().take(MAX_LABEL_CHARS).collect()
}

fn label_for(block: &[char], index: u32) -> String {
    let text: String = block.iter().collect();
    let first_line = text.split('\n').next().unwrap_or("");
    let first_line = first_line.strip_suffix('\r').unwrap_or(first_line).trim();

    let base = if !first_line.is_empty() {
        first_line.to_string()
    } else {
        let excerpt: String = text.trim().chars().take(EXCERPT_CHARS).collect();
        if excerpt.is_empty() {
            format!("Block {}", u64::from(index) + 1)
        } else {
            excerpt
        }
    };
    base.chars().take(MAX_LABEL_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_id_parse_and_format() {
        let id: BlockId = "b_12".parse().unwrap();
        assert_eq!(id.index(), 12);
        assert_eq!(id.to_string(), "b_12");

        assert!("b_".parse::<BlockId>().is_err());
        assert!("12".parse::<BlockId>().is_err());
        assert!("b_-1".parse::<BlockId>().is_err());
        assert!("b_+1".parse::<BlockId>().is_err());
        assert!("b_1x".parse::<BlockId>().is_err());
        assert!("b_99999999999".parse::<BlockId>().is_err());
    }

    #[test]
    fn test_block_id_serde_as_string() {
        let json = serde_json::to_string(&BlockId::new(3)).unwrap();
        assert_eq!(json, "\"b_3\"");
        let back: BlockId = serde_json::from_str("\"b_3\"").unwrap();
        assert_eq!(back, BlockId::new(3));
        assert!(serde_json::from_str::<BlockId>("\"block3\"").is_err());
    }

    #[test]
    fn test_blank_line_delimiter_wins_when_present() {
        let doc = "# Title\nline two\n\nSecond para";
        assert_eq!(block_count(doc), 2);

        let first = block_at(doc, 3);
        assert_eq!(first.id, BlockId::new(0));
        assert_eq!(first.label, "# Title");
        assert_eq!(first.range, BlockRange { start: 0, end: 16 });

        let second = block_at(doc, 20);
        assert_eq!(second.id, BlockId::new(1));
        assert_eq!(second.label, "Second para");
        assert_eq!(second.range, BlockRange { start: 18, end: 29 });
    }

    #[test]
    fn test_single_newline_fallback() {
        let doc = "one\ntwo\nthree";
        assert_eq!(block_count(doc), 3);
        assert_eq!(block_at(doc, 0).id, BlockId::new(0));
        assert_eq!(block_at(doc, 5).id, BlockId::new(1));
        assert_eq!(block_at(doc, 8).label, "three");
        assert_eq!(block_range(doc, 1), BlockRange { start: 4, end: 7 });
    }

    #[test]
    fn test_caret_on_delimiter_stays_in_previous_block() {
        // The delimiter at offset 3 only counts once the caret is past it
        let doc = "one\ntwo";
        assert_eq!(block_at(doc, 3).id, BlockId::new(0));
        assert_eq!(block_at(doc, 4).id, BlockId::new(1));
    }

    #[test]
    fn test_position_is_clamped() {
        let doc = "a\nb";
        assert_eq!(block_at(doc, 999).id, BlockId::new(1));
        assert_eq!(block_at("", 5).range, BlockRange { start: 0, end: 0 });
    }

    #[test]
    fn test_range_of_missing_block() {
        assert_eq!(block_range("", 0), BlockRange { start: 0, end: 0 });
        assert_eq!(block_range("", 4), BlockRange { start: 0, end: 0 });
        assert_eq!(block_range("a\nb", 7), BlockRange { start: 3, end: 3 });
    }

    #[test]
    fn test_label_fallbacks() {
        // Blank first line falls back to an excerpt of the block
        let doc = "intro\n\n   \nbody text here\n\nend";
        assert_eq!(label_of(doc, BlockId::new(1)), "body text here");

        // Empty block gets an ordinal label
        assert_eq!(label_of("a\n\n\n\nb", BlockId::new(1)), "Block 2");

        // Long first lines are truncated
        let long = "x".repeat(100);
        assert_eq!(label_of(&long, BlockId::new(0)).chars().count(), MAX_LABEL_CHARS);

        // Windows line endings do not leak into labels
        assert_eq!(label_of("title\r\nrest", BlockId::new(0)), "title");
    }

    #[test]
    fn test_offsets_count_chars_not_bytes() {
        let doc = "héllo\nwörld";
        let second = block_at(doc, 7);
        assert_eq!(second.id, BlockId::new(1));
        assert_eq!(second.range, BlockRange { start: 6, end: 11 });
        assert_eq!(second.label, "wörld");
    }

    #[test]
    fn test_blocks_agree_with_ranges() {
        let doc = "a\n\n\nb\n\nc";
        let all = blocks(doc);
        assert_eq!(all.len(), 3);
        for block in &all {
            assert_eq!(block.range, block_range(doc, block.id.index()));
            let located = block_at(doc, block.range.end);
            assert_eq!(located.id, block.id);
        }
    }

    #[test]
    fn test_clamp_label() {
        assert_eq!(clamp_label("  Intro  "), "Intro");
        assert_eq!(clamp_label(&"y".repeat(40)).len(), MAX_LABEL_CHARS);
    }
}
