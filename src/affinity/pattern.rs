use std::fmt;

use regex::{Regex, RegexBuilder};

use crate::error::EngineError;

/// Process name matcher.
///
/// A plain name such as `game` or `game.exe` matches any executable whose stem (the part
/// before the first dot) is equal ignoring case. A pattern containing `*` or `?` is a glob
/// over the whole executable name, also case-insensitive.
#[derive(Debug, Clone)]
pub struct NamePattern {
    source: String,
    matcher: Matcher,
}

#[derive(Debug, Clone)]
enum Matcher {
    Stem(String),
    Glob(Regex),
}

fn stem(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

fn glob_to_regex(glob: &str) -> String {
    let mut out = String::with_capacity(glob.len() + 8);
    out.push('^');
    for ch in glob.chars() {
        match ch {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            other => out.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    out.push('$');
    out
}

impl NamePattern {
    pub fn new(pattern: &str) -> Result<Self, EngineError> {
        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(EngineError::Config("process name pattern is empty".into()));
        }

        let matcher = if trimmed.contains(['*', '?']) {
            let regex = RegexBuilder::new(&glob_to_regex(trimmed))
                .case_insensitive(true)
                .build()
                .map_err(|e| EngineError::Config(format!("bad pattern {trimmed:?}: {e}")))?;
            Matcher::Glob(regex)
        } else {
            Matcher::Stem(stem(trimmed).to_lowercase())
        };

        Ok(Self {
            source: trimmed.to_string(),
            matcher,
        })
    }

    /// Tests an executable name, e.g. `Game.exe` or `firefox`.
    pub fn matches(&self, executable: &str) -> bool {
        match &self.matcher {
            Matcher::Stem(wanted) => stem(executable).to_lowercase() == *wanted,
            Matcher::Glob(regex) => regex.is_match(executable),
        }
    }
}

impl fmt::Display for NamePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_name_matches_the_stem() {
        let pattern = NamePattern::new("Game").unwrap();
        assert!(pattern.matches("game.exe"));
        assert!(pattern.matches("GAME"));
        assert!(!pattern.matches("gamelauncher.exe"));

        let with_ext = NamePattern::new("game.exe").unwrap();
        assert!(with_ext.matches("Game"));
    }

    #[test]
    fn globs_cover_the_full_name() {
        let pattern = NamePattern::new("chrome*.exe").unwrap();
        assert!(pattern.matches("Chrome.exe"));
        assert!(pattern.matches("chrome_crashpad.exe"));
        assert!(!pattern.matches("chrome"));

        let single = NamePattern::new("worker?").unwrap();
        assert!(single.matches("worker1"));
        assert!(!single.matches("worker10"));
    }

    #[test]
    fn regex_metacharacters_are_literal() {
        let pattern = NamePattern::new("a+b*").unwrap();
        assert!(pattern.matches("a+b.bin"));
        assert!(!pattern.matches("aab"));
    }

    #[test]
    fn empty_pattern_is_rejected() {
        assert!(matches!(NamePattern::new("  "), Err(EngineError::Config(_))));
    }
}
