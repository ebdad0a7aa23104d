//! Line parsing - expansion, tokenizing, aliases and trailing redirects
//!
//! A line goes through these steps, in order:
//! 1. `$name` expansion over the raw text
//! 2. splitting into tokens (`"` quoting, `#` comments)
//! 3. alias substitution, one token at a time
//! 4. removal of trailing `<in`, `>out` and `&` markers
//!
//! There is no further grammar: no `|`, `;`, `&&` or globbing. Pipelines are
//! spelled out with the `pipes` builtin instead.

use super::tables::{AliasTable, VarTable};
use super::{BUFFER_SIZE, MAX_TOKENS};
use crate::error::{Result, ShellError};

/// Longest line (in bytes) the pipeline accepts, after expansion.
pub const LINE_LIMIT: usize = BUFFER_SIZE - 1;

/// Number of trailing tokens examined for redirect/background markers.
const REDIRECT_WINDOW: usize = 3;

/// Trailing redirect/background markers removed from a command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Redirects {
    /// `<path`: file connected to standard input
    pub input: Option<String>,
    /// `>path`: file truncated and connected to standard output
    pub output: Option<String>,
    /// Trailing `&`
    pub background: bool,
}

impl Redirects {
    pub fn is_redirected(&self) -> bool {
        self.input.is_some() || self.output.is_some()
    }
}

fn check_line_length(text: &str) -> Result<()> {
    if text.len() > LINE_LIMIT {
        return Err(ShellError::LineTooLong { limit: LINE_LIMIT });
    }
    Ok(())
}

/// Replace `$name` references with variable values.
///
/// A reference is `$` followed by an ASCII letter; the name runs over ASCII
/// alphanumerics and `_`. Unset variables expand to nothing. A `$` that does
/// not start a reference is kept as-is.
pub fn expand_variables(line: &str, vars: &VarTable) -> Result<String> {
    check_line_length(line)?;

    let mut out = String::with_capacity(line.len());
    let mut rest = line;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if after.starts_with(|c: char| c.is_ascii_alphabetic()) {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            if let Some(value) = vars.get(&after[..end]) {
                out.push_str(value);
            }
            rest = &after[end..];
        } else {
            out.push('$');
            rest = after;
        }

        check_line_length(&out)?;
    }

    out.push_str(rest);
    check_line_length(&out)?;
    Ok(out)
}

/// Split an (already expanded) line into tokens.
///
/// - `"` toggles quoting and is dropped; quoted and unquoted pieces of one word join
/// - inside quotes, blanks belong to the token
/// - `#` at the start of a word (outside quotes) ends the line
/// - an unterminated quote runs to the end of the line
pub fn tokenize(line: &str) -> Result<Vec<String>> {
    fn finish(tokens: &mut Vec<String>, buf: &mut String) -> Result<()> {
        if tokens.len() >= MAX_TOKENS {
            return Err(ShellError::TooManyTokens { limit: MAX_TOKENS });
        }
        tokens.push(std::mem::take(buf));
        Ok(())
    }

    let mut tokens = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut reading = false;

    for ch in line.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                // `""` still makes an (empty) token
                reading = true;
            }
            '#' if !in_quotes && !reading => break,
            ' ' | '\t' if !in_quotes => {
                if reading {
                    finish(&mut tokens, &mut buf)?;
                    reading = false;
                }
            }
            other => {
                buf.push(other);
                reading = true;
            }
        }
    }

    if reading {
        finish(&mut tokens, &mut buf)?;
    }

    Ok(tokens)
}

/// Replace every token that names an alias with the alias text.
///
/// The substitution is literal and single-level: a multi-word expansion stays a
/// single token. Lines starting with `unalias` are left alone so an alias can
/// always be removed by name.
pub fn map_aliases(tokens: &mut [String], aliases: &AliasTable) {
    if tokens.first().is_some_and(|t| t == "unalias") {
        return;
    }

    for token in tokens.iter_mut() {
        if let Some(expansion) = aliases.get(token) {
            *token = expansion.to_string();
        }
    }
}

fn marker_path(token: &str, marker: char) -> Option<String> {
    token
        .strip_prefix(marker)
        .filter(|path| !path.is_empty())
        .map(str::to_string)
}

/// Strip trailing `&`, `<path` and `>path` tokens.
///
/// At most the last three tokens are examined, rightmost first, and the scan
/// stops at the first token that is not a marker. A bare `<`/`>` followed by a
/// path counts as one marker spanning two tokens.
pub fn extract_redirects(tokens: &mut Vec<String>) -> Redirects {
    let mut redirects = Redirects::default();
    let mut examined = 0usize;

    while examined < REDIRECT_WINDOW {
        let Some(last) = tokens.last() else { break };

        if last == "&" {
            redirects.background = true;
            tokens.pop();
            examined += 1;
            continue;
        }
        if let Some(path) = marker_path(last, '<') {
            redirects.input = Some(path);
            tokens.pop();
            examined += 1;
            continue;
        }
        if let Some(path) = marker_path(last, '>') {
            redirects.output = Some(path);
            tokens.pop();
            examined += 1;
            continue;
        }

        // Spaced form: `> out` / `< in`
        if examined + 2 <= REDIRECT_WINDOW && tokens.len() >= 2 {
            let op = tokens[tokens.len() - 2].as_str();
            if op == "<" || op == ">" {
                let is_input = op == "<";
                let path = tokens.pop().unwrap_or_default();
                tokens.pop();
                if is_input {
                    redirects.input = Some(path);
                } else {
                    redirects.output = Some(path);
                }
                examined += 2;
                continue;
            }
        }

        break;
    }

    redirects
}

#[cfg(test)]
mod tests {
    use super::*;

    fn toks(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_tokenize_quoted_spaces() {
        assert_eq!(tokenize(r#"echo  "a b"  c"#).unwrap(), toks(&["echo", "a b", "c"]));
    }

    #[test]
    fn test_tokenize_comment() {
        assert_eq!(tokenize("echo hi # rest is ignored").unwrap(), toks(&["echo", "hi"]));
        assert!(tokenize("# only a comment").unwrap().is_empty());
    }

    #[test]
    fn test_tokenize_hash_inside_word_or_quotes() {
        assert_eq!(tokenize("echo a#b").unwrap(), toks(&["echo", "a#b"]));
        assert_eq!(tokenize(r##"echo "# not a comment""##).unwrap(), toks(&["echo", "# not a comment"]));
    }

    #[test]
    fn test_tokenize_joined_quotes_and_empty() {
        assert_eq!(tokenize(r#"a"b c"d"#).unwrap(), toks(&["ab cd"]));
        assert_eq!(tokenize(r#"echo "" x"#).unwrap(), toks(&["echo", "", "x"]));
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        assert_eq!(tokenize(r#"echo "open end"#).unwrap(), toks(&["echo", "open end"]));
    }

    #[test]
    fn test_tokenize_tabs_and_blank_line() {
        assert_eq!(tokenize("\tpid\t ").unwrap(), toks(&["pid"]));
        assert!(tokenize("   ").unwrap().is_empty());
    }

    #[test]
    fn test_tokenize_token_limit() {
        let ok = vec!["x"; MAX_TOKENS].join(" ");
        assert_eq!(tokenize(&ok).unwrap().len(), MAX_TOKENS);

        let too_many = vec!["x"; MAX_TOKENS + 1].join(" ");
        assert_eq!(
            tokenize(&too_many),
            Err(ShellError::TooManyTokens { limit: MAX_TOKENS })
        );
    }

    #[test]
    fn test_expand_variables() {
        let mut vars = VarTable::default();
        vars.set("X", "5").unwrap();
        assert_eq!(expand_variables("print $X$X", &vars).unwrap(), "print 55");
    }

    #[test]
    fn test_expand_unset_and_literal_dollar() {
        let mut vars = VarTable::default();
        vars.set("name_1", "v").unwrap();
        assert_eq!(expand_variables("a$missing.b", &vars).unwrap(), "a.b");
        assert_eq!(expand_variables("$name_1-$", &vars).unwrap(), "v-$");
        assert_eq!(expand_variables("cost $5", &vars).unwrap(), "cost $5");
    }

    #[test]
    fn test_expand_is_case_sensitive() {
        let mut vars = VarTable::default();
        vars.set("x", "lower").unwrap();
        assert_eq!(expand_variables("$X $x", &vars).unwrap(), " lower");
    }

    #[test]
    fn test_expand_line_too_long() {
        let mut vars = VarTable::default();
        vars.set("BIG", &"y".repeat(300)).unwrap();
        assert_eq!(
            expand_variables("$BIG $BIG", &vars),
            Err(ShellError::LineTooLong { limit: LINE_LIMIT })
        );

        let raw = "z".repeat(LINE_LIMIT + 1);
        assert!(expand_variables(&raw, &vars).is_err());
    }

    #[test]
    fn test_map_aliases_single_token() {
        let mut aliases = AliasTable::default();
        aliases.add("ll", "dirls").unwrap();
        aliases.add("both", "echo two words").unwrap();

        let mut tokens = toks(&["ll", "both", "x"]);
        map_aliases(&mut tokens, &aliases);
        assert_eq!(tokens, toks(&["dirls", "echo two words", "x"]));
    }

    #[test]
    fn test_map_aliases_skipped_for_unalias() {
        let mut aliases = AliasTable::default();
        aliases.add("ll", "dirls").unwrap();

        let mut tokens = toks(&["unalias", "ll"]);
        map_aliases(&mut tokens, &aliases);
        assert_eq!(tokens, toks(&["unalias", "ll"]));
    }

    #[test]
    fn test_redirects_background_and_output() {
        let mut tokens = toks(&["cmd", "a", ">out", "&"]);
        let r = extract_redirects(&mut tokens);
        assert!(r.background);
        assert_eq!(r.output.as_deref(), Some("out"));
        assert_eq!(r.input, None);
        assert_eq!(tokens, toks(&["cmd", "a"]));
    }

    #[test]
    fn test_redirects_spaced_form() {
        let mut tokens = toks(&["cmd", "a", ">", "out", "&"]);
        let r = extract_redirects(&mut tokens);
        assert!(r.background);
        assert_eq!(r.output.as_deref(), Some("out"));
        assert_eq!(tokens, toks(&["cmd", "a"]));
    }

    #[test]
    fn test_redirects_none() {
        let mut tokens = toks(&["cmd", "a", "b"]);
        let r = extract_redirects(&mut tokens);
        assert_eq!(r, Redirects::default());
        assert!(!r.is_redirected());
        assert_eq!(tokens, toks(&["cmd", "a", "b"]));
    }

    #[test]
    fn test_redirects_window_is_three_tokens() {
        let mut tokens = toks(&["cat", "<in", ">out", "&", "&"]);
        let r = extract_redirects(&mut tokens);
        assert!(r.background);
        assert_eq!(r.output.as_deref(), Some("out"));
        assert_eq!(r.input, None);
        assert_eq!(tokens, toks(&["cat", "<in"]));
    }

    #[test]
    fn test_redirects_stop_at_plain_token() {
        let mut tokens = toks(&["cmd", ">out", "plain"]);
        let r = extract_redirects(&mut tokens);
        assert_eq!(r, Redirects::default());
        assert_eq!(tokens.len(), 3);

        // a bare marker with nothing after it is an ordinary argument
        let mut tokens = toks(&["cmd", ">"]);
        assert_eq!(extract_redirects(&mut tokens), Redirects::default());
        assert_eq!(tokens, toks(&["cmd", ">"]));
    }

    #[test]
    fn test_redirects_any_order_in_window() {
        let mut tokens = toks(&["cmd", "&", "<in", ">out"]);
        let r = extract_redirects(&mut tokens);
        assert!(r.background);
        assert_eq!(r.input.as_deref(), Some("in"));
        assert_eq!(r.output.as_deref(), Some("out"));
        assert_eq!(tokens, toks(&["cmd"]));
    }
}
