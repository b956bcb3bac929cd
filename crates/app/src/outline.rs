//! `quire blocks` - list the lockable blocks of a markdown file

use std::path::Path;

use quire_core::{blocks, Result};

/// One tab-separated line per block: id, character span, label
pub fn outline(content: &str) -> Vec<String> {
    blocks::blocks(content)
        .into_iter()
        .map(|block| {
            format!(
                "{}\t{}..{}\t{}",
                block.id, block.range.start, block.range.end, block.label
            )
        })
        .collect()
}

pub fn run(path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    for line in outline(&content) {
        println!("{}", line);
    }
    Ok(())
}
