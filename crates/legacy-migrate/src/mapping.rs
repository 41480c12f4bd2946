//! Field mapping descriptions derived from a unit's SELECT and INSERT
//! statements.
//!
//! Mappings are documentation, not executable code: inspection surfaces show
//! them so an operator can see which legacy field feeds which target column
//! and under what transform. They are built once per unit by pairing the
//! parsed SELECT columns with the parsed INSERT columns and the unit's
//! transform notes, target-side driven (a target column with no matching
//! source shows `-`).

use serde::Serialize;

/// One source-field-to-target-field mapping, with a human transform note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldMapping {
    pub source_field: String,
    pub target_field: String,
    pub transform_note: String,
}

/// Parse the column list of a `SELECT col, fn(a, b) AS c, ... FROM t` query.
///
/// Splits at top-level commas only, so function arguments (`ISNULL(a, b)`)
/// stay intact; an ` AS alias` keeps the alias, since that is the name the
/// row comes back under.
pub fn parse_select_columns(select_query: &str) -> Vec<String> {
    let upper = select_query.to_uppercase();
    let Some(start) = upper.find("SELECT") else {
        return Vec::new();
    };
    let start = start + "SELECT".len();
    let end = upper[start..]
        .find(" FROM")
        .map(|pos| start + pos)
        .unwrap_or(select_query.len());

    split_top_level(&select_query[start..end])
        .into_iter()
        .map(|col| {
            // Keep an alias when present, else the raw expression.
            let upper_col = col.to_uppercase();
            if let Some(pos) = upper_col.rfind(" AS ") {
                col[pos + 4..].trim().to_string()
            } else {
                col.trim().to_string()
            }
        })
        .filter(|c| !c.is_empty())
        .collect()
}

/// Parse the column list of `INSERT INTO table (col, ...) VALUES (...)`.
pub fn parse_insert_columns(insert_query: &str) -> Vec<String> {
    let Some(open) = insert_query.find('(') else {
        return Vec::new();
    };
    let Some(close) = insert_query[open..].find(')').map(|p| open + p) else {
        return Vec::new();
    };
    split_top_level(&insert_query[open + 1..close])
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect()
}

/// Parse the target table name of `INSERT INTO table (...)`.
pub fn parse_insert_table(insert_query: &str) -> Option<String> {
    let upper = insert_query.to_uppercase();
    let start = upper.find("INSERT INTO")? + "INSERT INTO".len();
    let rest = insert_query[start..].trim_start();
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '(')
        .unwrap_or(rest.len());
    let table = rest[..end].trim();
    if table.is_empty() {
        None
    } else {
        Some(table.to_string())
    }
}

/// Build mappings target-side driven: one entry per INSERT column, paired
/// positionally with SELECT columns and transform notes.
pub fn build_mappings(
    select_query: &str,
    insert_query: &str,
    notes: &[String],
) -> Vec<FieldMapping> {
    let sources = parse_select_columns(select_query);
    let targets = parse_insert_columns(insert_query);

    targets
        .into_iter()
        .enumerate()
        .map(|(i, target)| FieldMapping {
            source_field: sources.get(i).cloned().unwrap_or_else(|| "-".to_string()),
            target_field: target,
            transform_note: notes.get(i).cloned().unwrap_or_else(|| "Unknown".to_string()),
        })
        .collect()
}

/// Split on commas that are not nested inside parentheses.
fn split_top_level(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();

    for ch in input.chars() {
        match ch {
            '(' => {
                depth += 1;
                current.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 => {
                parts.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}
