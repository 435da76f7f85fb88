//! Query tokenizing and compilation to FTS5 match expressions.
//!
//! User queries never reach FTS5 verbatim. They are split with the same
//! rules the `unicode61` tokenizer applies at index time and re-emitted as
//! quoted terms, so stray operators or punctuation degrade to plain term
//! matching instead of producing a syntax error.
//!
//! Supported syntax:
//! - `quick fox`: both terms must appear (conjunction)
//! - `"quick fox"`: phrase
//! - `qui*`: prefix match
//! - `fox OR dog`: either side may match

/// A single clause in a conjunctive group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Term { text: String, prefix: bool },
    Phrase(Vec<String>),
}

/// A parsed query: a disjunction of conjunctive groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Query {
    pub groups: Vec<Vec<Clause>>,
}

/// Split text into lowercase tokens on every non-alphanumeric character.
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|s| !s.is_empty())
        .map(str::to_lowercase)
        .collect()
}

impl Query {
    /// Parse a raw query string. Never fails; unknown syntax becomes terms.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let mut groups = Vec::new();
        let mut current: Vec<Clause> = Vec::new();
        let mut rest = raw;

        loop {
            rest = rest.trim_start();
            if rest.is_empty() {
                break;
            }

            if let Some(after_quote) = rest.strip_prefix('"')
                && let Some(end) = after_quote.find('"')
            {
                let tokens = tokenize(&after_quote[..end]);
                match tokens.len() {
                    0 => {}
                    1 => current.push(Clause::Term {
                        text: tokens.into_iter().next().unwrap_or_default(),
                        prefix: false,
                    }),
                    _ => current.push(Clause::Phrase(tokens)),
                }
                rest = &after_quote[end + 1..];
                continue;
            }

            let word_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
            let word = &rest[..word_end];
            rest = &rest[word_end..];

            if word == "OR" {
                if !current.is_empty() {
                    groups.push(std::mem::take(&mut current));
                }
                continue;
            }

            let prefix = word.ends_with('*');
            let tokens = tokenize(word);
            let count = tokens.len();
            for (i, text) in tokens.into_iter().enumerate() {
                current.push(Clause::Term {
                    text,
                    prefix: prefix && i + 1 == count,
                });
            }
        }

        if !current.is_empty() {
            groups.push(current);
        }

        Self { groups }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Render as an FTS5 match expression, or `None` when there is nothing
    /// to match.
    #[must_use]
    pub fn to_fts5(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }

        let rendered: Vec<String> = self
            .groups
            .iter()
            .map(|group| {
                group
                    .iter()
                    .map(render_clause)
                    .collect::<Vec<_>>()
                    .join(" AND ")
            })
            .collect();

        if rendered.len() == 1 {
            rendered.into_iter().next()
        } else {
            Some(
                rendered
                    .iter()
                    .map(|group| format!("({group})"))
                    .collect::<Vec<_>>()
                    .join(" OR "),
            )
        }
    }
}

// Tokens are alphanumeric only, so quoting needs no escaping.
fn render_clause(clause: &Clause) -> String {
    match clause {
        Clause::Term { text, prefix: true } => format!("\"{text}\"*"),
        Clause::Term { text, prefix: false } => format!("\"{text}\""),
        Clause::Phrase(tokens) => format!("\"{}\"", tokens.join(" ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile(raw: &str) -> Option<String> {
        Query::parse(raw).to_fts5()
    }

    #[test]
    fn tokenize_splits_on_punctuation() {
        assert_eq!(tokenize("Hello, World! can't"), vec!["hello", "world", "can", "t"]);
        assert_eq!(tokenize("snake_case-name"), vec!["snake", "case", "name"]);
        assert!(tokenize("  ... ").is_empty());
    }

    #[test]
    fn empty_query_compiles_to_nothing() {
        assert_eq!(compile(""), None);
        assert_eq!(compile("   "), None);
        assert_eq!(compile("*** ()"), None);
    }

    #[test]
    fn terms_are_conjunctive() {
        assert_eq!(compile("fox dog"), Some(r#""fox" AND "dog""#.to_string()));
    }

    #[test]
    fn phrase_and_prefix() {
        assert_eq!(
            compile(r#""Quick Brown" fo*"#),
            Some(r#""quick brown" AND "fo"*"#.to_string())
        );
    }

    #[test]
    fn or_splits_groups() {
        assert_eq!(
            compile("fox OR lazy dog"),
            Some(r#"("fox") OR ("lazy" AND "dog")"#.to_string())
        );
        assert_eq!(compile("OR fox OR"), Some(r#""fox""#.to_string()));
    }

    #[test]
    fn unbalanced_quote_degrades_to_terms() {
        assert_eq!(
            compile(r#""quick fox"#),
            Some(r#""quick" AND "fox""#.to_string())
        );
    }

    #[test]
    fn fts_operators_are_neutralised() {
        assert_eq!(
            compile("NEAR(a b) content:x -y ^z"),
            Some(r#""near" AND "a" AND "b" AND "content" AND "x" AND "y" AND "z""#.to_string())
        );
        assert_eq!(compile("and not"), Some(r#""and" AND "not""#.to_string()));
    }
}
