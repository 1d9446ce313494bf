//! Channel list files.
//!
//! One channel name per line. `##` starts a comment line, and so does a
//! `#` followed by whitespace. A `#` glued to a word is a channel name
//! written with its usual prefix, so `#general` means the channel
//! `general`.

use std::path::Path;

use anyhow::{Context, Result};

pub fn parse_channel_list(path: &Path) -> Result<Vec<String>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read channel list: {}", path.display()))?;
    Ok(parse_lines(&contents))
}

fn parse_lines(contents: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with("##") {
            continue;
        }
        let name = match line.strip_prefix('#') {
            // "# comment" is a comment; "#general" is a channel.
            Some(rest) if rest.starts_with(char::is_whitespace) => continue,
            Some(rest) => rest,
            None => line,
        };
        let name = name.trim().to_string();
        if !name.is_empty() && !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comments_and_names() {
        let contents = "\
## channels to migrate
# this line is also a comment
general
#random
  #design
random

";
        assert_eq!(parse_lines(contents), vec!["general", "random", "design"]);
    }

    #[test]
    fn test_empty_file() {
        assert!(parse_lines("## nothing here\n").is_empty());
    }
}
