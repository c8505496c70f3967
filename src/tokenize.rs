//! Splits a `SessionCmd` string into an argv vector.
//!
//! Tokens are either bare whitespace-delimited words or single/double
//! quoted strings (quotes may contain embedded whitespace); a quoted
//! token is then unescaped with `enquote`, decoding backslash escapes the
//! same way a shell would inside a quoted argument.

use crate::error::{Error, Result};

pub fn tokenize(cmd: &str) -> Result<Vec<String>> {
    let mut tokens = Vec::new();
    let chars: Vec<char> = cmd.chars().collect();
    let mut i = 0;

    while i < chars.len() {
        while i < chars.len() && chars[i].is_whitespace() {
            i += 1;
        }
        if i >= chars.len() {
            break;
        }

        let quote = chars[i];
        if quote == '\'' || quote == '"' {
            let start = i;
            i += 1;
            while i < chars.len() && chars[i] != quote {
                if chars[i] == '\\' && i + 1 < chars.len() {
                    i += 1;
                }
                i += 1;
            }
            if i >= chars.len() {
                return Err(Error::SessionSetup(format!(
                    "unterminated quote in session command: {}",
                    cmd
                )));
            }
            i += 1;
            let raw: String = chars[start..i].iter().collect();
            let unquoted = enquote::unquote(&raw)
                .map_err(|e| Error::SessionSetup(format!("bad quoting in {:?}: {:?}", raw, e)))?;
            tokens.push(unquoted);
        } else {
            let start = i;
            while i < chars.len() && !chars[i].is_whitespace() {
                i += 1;
            }
            tokens.push(chars[start..i].iter().collect());
        }
    }

    Ok(tokens)
}

/// Resolve the argv to exec for a session when `SessionCmd` is unset:
/// fall back to the user's login shell, and failing that, a bare
/// `systemd --user` so the seat still produces a usable session.
pub fn fallback_argv(shell: Option<&str>) -> Vec<String> {
    match shell {
        Some(shell) if !shell.is_empty() => vec![shell.to_string()],
        _ => vec!["systemd".to_string(), "--user".to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bare_words() {
        assert_eq!(
            tokenize("/bin/sh -c run").unwrap(),
            vec!["/bin/sh", "-c", "run"]
        );
    }

    #[test]
    fn keeps_quoted_spaces_together() {
        assert_eq!(
            tokenize("/bin/sh -c \"echo hello world\"").unwrap(),
            vec!["/bin/sh", "-c", "echo hello world"]
        );
    }

    #[test]
    fn decodes_backslash_escapes_inside_quotes() {
        assert_eq!(
            tokenize(r#"/bin/sh -c "line one\nline two""#).unwrap(),
            vec!["/bin/sh", "-c", "line one\nline two"]
        );
    }

    #[test]
    fn rejects_unterminated_quote() {
        assert!(tokenize("/bin/sh -c \"unterminated").is_err());
    }

    #[test]
    fn fallback_prefers_shell_over_systemd_user() {
        assert_eq!(fallback_argv(Some("/bin/bash")), vec!["/bin/bash"]);
        assert_eq!(fallback_argv(None), vec!["systemd", "--user"]);
        assert_eq!(fallback_argv(Some("")), vec!["systemd", "--user"]);
    }
}
