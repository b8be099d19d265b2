//! Text-level SQL building blocks shared by every emitter: identifier and
//! literal quoting, list expansion, and surgery on introspected
//! `CREATE INDEX` definitions.

use itertools::Itertools;
use regex::Regex;

lazy_static::lazy_static! {
    static ref CREATE_INDEX_RE: Regex =
        Regex::new(r"(?i)CREATE\s+(UNIQUE\s+)?INDEX\s+").expect("Is a valid regex");
}

/// Quotes `name` as a SQL identifier.
pub fn ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quotes `text` as a SQL string literal.
pub fn literal(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Renders a value read back as text into a literal with an explicit cast,
/// `NULL` when absent.
pub fn typed_literal(value: Option<&str>, sql_type: &str) -> String {
    match value {
        Some(v) => format!("{}::{}", literal(v), sql_type),
        None => "NULL".to_string(),
    }
}

/// Joins `parts` with `", "`.
pub fn comma<I>(parts: I) -> String
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    parts.into_iter().map(|p| p.as_ref().to_string()).join(", ")
}

/// Joins `parts` with `" AND "`.
pub fn and<I>(parts: I) -> String
where
    I: IntoIterator,
    I::Item: AsRef<str>,
{
    parts
        .into_iter()
        .map(|p| p.as_ref().to_string())
        .join(" AND ")
}

/// Rewrites an introspected index definition to `CREATE [UNIQUE] INDEX IF
/// NOT EXISTS`, so re-creation against the lifted table is idempotent.
pub fn index_if_not_exists(indexdef: &str) -> String {
    CREATE_INDEX_RE
        .replace(indexdef, |caps: &regex::Captures| match caps.get(1) {
            Some(_) => "CREATE UNIQUE INDEX IF NOT EXISTS ".to_string(),
            None => "CREATE INDEX IF NOT EXISTS ".to_string(),
        })
        .into_owned()
}

/// Removes the named columns from the key list of an index definition.
///
/// Operates on the first parenthesised group of the definition (the key
/// columns of a `pg_indexes.indexdef`), understanding nested parentheses in
/// expression entries and optional per-column modifiers such as `DESC`.
pub fn strip_index_columns(indexdef: &str, drop: &[&str]) -> String {
    let open = match indexdef.find('(') {
        Some(i) => i,
        None => return indexdef.to_string(),
    };

    let mut depth = 0usize;
    let mut close = None;
    for (i, c) in indexdef[open..].char_indices() {
        match c {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    close = Some(open + i);
                    break;
                }
            }
            _ => {}
        }
    }
    let close = match close {
        Some(i) => i,
        None => return indexdef.to_string(),
    };

    let kept = split_top_level(&indexdef[open + 1..close])
        .into_iter()
        .filter(|entry| {
            let name = entry
                .split_whitespace()
                .next()
                .unwrap_or("")
                .trim_matches('"');
            !drop.contains(&name)
        })
        .collect::<Vec<_>>();

    format!(
        "{}({}){}",
        &indexdef[..open],
        kept.join(", "),
        &indexdef[close + 1..]
    )
}

/// Splits a comma-separated list, ignoring commas inside parentheses.
fn split_top_level(list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                current.push(c);
            }
            ',' if depth == 0 => {
                out.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out
}
