//! Helpers shared by SQL speaking runners.

pub const DEFAULT_ROW_LIMIT: usize = 1000;

/// Appends `LIMIT <limit>` to a single `SELECT` statement that has none.
/// Anything else (multiple statements, DML, an existing limit) is returned
/// unchanged apart from trailing whitespace and semicolons.
pub fn apply_auto_limit(query: &str, limit: usize) -> String {
    let statement = query.trim().trim_end_matches(';').trim_end();
    if statement.contains(';') || !is_select(statement) || has_limit(statement) {
        return query.to_string();
    }
    format!("{} LIMIT {}", statement, limit)
}

fn is_select(statement: &str) -> bool {
    statement
        .split_whitespace()
        .next()
        .is_some_and(|w| w.eq_ignore_ascii_case("select") || w.eq_ignore_ascii_case("with"))
}

fn has_limit(statement: &str) -> bool {
    statement
        .split(|c: char| c.is_whitespace() || c == '(' || c == ')')
        .any(|w| w.eq_ignore_ascii_case("limit"))
}
