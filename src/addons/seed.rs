//! Seed data import.
//!
//! Runs an addon's bundled `install.sql` against the persistence
//! boundary. Statements are split line by line (accumulate until a line
//! ends with `;`), comment lines are skipped, the `__PREFIX__` table
//! placeholder is substituted, and plain inserts are rewritten to
//! ignore-on-conflict form. Individual statement failures are logged and
//! skipped so one bad seed statement does not block a re-install.

use std::fs;
use std::path::Path;

use tracing::warn;

use super::store::TransactionalStore;
use super::AddonError;

/// Table-prefix placeholder recognized in seed SQL.
pub const PREFIX_PLACEHOLDER: &str = "__PREFIX__";

/// Imports `sql_path` into the store. A missing file is a no-op.
/// Returns the number of statements that executed successfully.
pub fn import_seed(
    sql_path: &Path,
    store: &dyn TransactionalStore,
    table_prefix: &str,
) -> Result<usize, AddonError> {
    if !sql_path.is_file() {
        return Ok(0);
    }

    let text = fs::read_to_string(sql_path)
        .map_err(|e| AddonError::WriteError(format!("{}: {}", sql_path.display(), e)))?;

    let mut imported = 0;
    for statement in split_statements(&text) {
        let statement = rewrite_statement(&statement, table_prefix);
        match store.execute(&statement) {
            Ok(()) => imported += 1,
            // Deliberate leniency: idempotent re-installs hit duplicate
            // rows and existing tables.
            Err(e) => warn!("seed statement skipped ({}): {}", e, statement.trim()),
        }
    }
    Ok(imported)
}

/// Splits line-oriented SQL into statements: lines accumulate until one
/// ends with `;`; empty lines and `--`/`/*` comment lines are dropped.
#[must_use]
pub fn split_statements(text: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") || trimmed.starts_with("/*") {
            continue;
        }
        current.push_str(line);
        current.push('\n');
        if trimmed.ends_with(';') {
            statements.push(std::mem::take(&mut current));
        }
    }
    statements
}

/// Applies the prefix substitution and the insert rewrite.
#[must_use]
pub fn rewrite_statement(statement: &str, table_prefix: &str) -> String {
    let statement = replace_ignore_case(statement, PREFIX_PLACEHOLDER, table_prefix);
    replace_ignore_case(&statement, "INSERT INTO ", "INSERT IGNORE INTO ")
}

/// Case-insensitive replacement of every occurrence of `needle`.
fn replace_ignore_case(haystack: &str, needle: &str, replacement: &str) -> String {
    if needle.is_empty() {
        return haystack.to_string();
    }
    let lower_haystack = haystack.to_lowercase();
    let lower_needle = needle.to_lowercase();

    let mut out = String::with_capacity(haystack.len());
    let mut pos = 0;
    while let Some(found) = lower_haystack[pos..].find(&lower_needle) {
        let start = pos + found;
        out.push_str(&haystack[pos..start]);
        out.push_str(replacement);
        pos = start + needle.len();
    }
    out.push_str(&haystack[pos..]);
    out
}
