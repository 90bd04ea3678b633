use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

/// Product names in file order, one per line. Blank lines are dropped and names are trimmed.
pub fn load_names(path: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("reading input list {}", path.display()))?;
    Ok(parse_names(&text))
}

pub fn parse_names(text: &str) -> Vec<String> {
    text.trim_start_matches('\u{feff}')
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect()
}
