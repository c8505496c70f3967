//! A small, dependency-free INI-style parser.
//!
//! Follows the same shape as the workspace's own `inish` crate: `[group]`
//! headers, `key = value` lines, `#`/`;` comments, blank lines ignored. A
//! bare `key = value` before any `[group]` header belongs to the implicit
//! `General` group.

use std::collections::HashMap;

pub type Groups = HashMap<String, HashMap<String, String>>;

/// One non-fatal problem encountered while parsing a single line.
#[derive(Debug, Clone)]
pub struct ParseWarning {
    pub line: usize,
    pub message: String,
}

pub struct Parsed {
    pub groups: Groups,
    pub warnings: Vec<ParseWarning>,
}

/// Parse INI-style text. Never fails outright: malformed lines are
/// recorded as warnings and skipped rather than aborting the whole load.
pub fn parse(text: &str, default_group: &str) -> Parsed {
    let mut groups: Groups = HashMap::new();
    let mut warnings = Vec::new();
    let mut current = default_group.to_string();

    for (idx, raw_line) in text.lines().enumerate() {
        let line = raw_line.trim();
        let lineno = idx + 1;

        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if line.starts_with('[') {
            match line.find(']') {
                Some(end) => current = line[1..end].trim().to_string(),
                None => warnings.push(ParseWarning {
                    line: lineno,
                    message: format!("unterminated group header: {}", line),
                }),
            }
            continue;
        }

        match line.find('=') {
            Some(eq) => {
                let key = line[..eq].trim();
                let value = line[eq + 1..].trim();
                if key.is_empty() {
                    warnings.push(ParseWarning {
                        line: lineno,
                        message: "empty key".to_string(),
                    });
                    continue;
                }
                groups
                    .entry(current.clone())
                    .or_insert_with(HashMap::new)
                    .insert(key.to_string(), strip_quotes(value).to_string());
            }
            None => warnings.push(ParseWarning {
                line: lineno,
                message: format!("line is not a key=value pair: {}", line),
            }),
        }
    }

    Parsed { groups, warnings }
}

fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let first = bytes[0];
        let last = bytes[bytes.len() - 1];
        if (first == b'"' && last == b'"') || (first == b'\'' && last == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_groups_and_fallback() {
        let text = "PAMService = login\n[seat0]\nDefaultUser = guest%S\n";
        let parsed = parse(text, "General");
        assert_eq!(
            parsed.groups.get("General").unwrap().get("PAMService"),
            Some(&"login".to_string())
        );
        assert_eq!(
            parsed.groups.get("seat0").unwrap().get("DefaultUser"),
            Some(&"guest%S".to_string())
        );
    }

    #[test]
    fn skips_malformed_lines_without_failing() {
        let text = "[General]\nnot-a-kv-line\nAutoLogin = true\n";
        let parsed = parse(text, "General");
        assert_eq!(parsed.warnings.len(), 1);
        assert_eq!(
            parsed.groups.get("General").unwrap().get("AutoLogin"),
            Some(&"true".to_string())
        );
    }

    #[test]
    fn strips_matched_quotes() {
        let text = "[General]\nSessionCmd = \"/bin/echo hi\"\n";
        let parsed = parse(text, "General");
        assert_eq!(
            parsed.groups.get("General").unwrap().get("SessionCmd"),
            Some(&"/bin/echo hi".to_string())
        );
    }

    #[test]
    fn ignores_comments_and_blank_lines() {
        let text = "; a comment\n\n# another\n[General]\nAutoLogin = false\n";
        let parsed = parse(text, "General");
        assert!(parsed.warnings.is_empty());
        assert_eq!(
            parsed.groups.get("General").unwrap().get("AutoLogin"),
            Some(&"false".to_string())
        );
    }
}
