//! Best-effort retargeting of dependent-object definitions.
//!
//! After a table is rebuilt, its indices, views and triggers have to be
//! recreated from their stored `CREATE ...` text. When the rebuild renamed
//! the table or some of its columns, that text still names the old
//! identifiers. [`RenameSet::rewrite`] substitutes them.
//!
//! This is deliberately not a SQL parser. The text is scanned for identifier
//! tokens in the forms SQLite accepts (`bare`, `"double"`, `` `backtick` ``
//! and `[bracket]`), and matching tokens are replaced:
//!
//! - the table name is replaced wherever it appears;
//! - a column name is replaced when it is unqualified, or qualified by the
//!   table name, `NEW` or `OLD`;
//! - a bare word directly followed by `(` is treated as a function call and
//!   left alone;
//! - the name of the object being created is left alone.
//!
//! Triggers attached to other tables are read in [`ColumnScope::Foreign`]:
//! there `NEW`, `OLD` and unqualified names belong to the other table, so
//! only table-qualified columns are rewritten.
//!
//! String literals and comments are not recognised. A word inside a string
//! literal that happens to equal a renamed identifier is rewritten as well.
//!
//! # Examples
//!
//! ```
//! use schema_rebuild_core::RenameSet;
//!
//! let renames = RenameSet::new("people", "people").with_column("name", "full_name");
//! assert_eq!(
//!     renames.rewrite("CREATE INDEX idx_name ON people(name)"),
//!     "CREATE INDEX idx_name ON people(full_name)"
//! );
//! ```

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::sql::{is_plain_identifier, quote_identifier};
use crate::types::{CatalogEntry, ObjectKind, names_match};

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"[0-9][A-Za-z0-9_.]*|"(?:[^"]|"")*"|`(?:[^`]|``)*`|\[[^\]]*\]|(?:[A-Za-z_]|[^\x00-\x7F])(?:[A-Za-z0-9_$]|[^\x00-\x7F])*"#,
    )
    .expect("static regex must compile")
});

/// An identifier occurrence inside definition text.
#[derive(Debug, Clone)]
struct IdentToken {
    start: usize,
    end: usize,
    /// Unquoted identifier value.
    value: String,
    /// Opening quote character, `None` for bare words.
    quote: Option<char>,
}

/// Splits `sql` into identifier tokens. Numeric literals are skipped.
fn identifier_tokens(sql: &str) -> Vec<IdentToken> {
    TOKEN_RE
        .find_iter(sql)
        .filter_map(|m| {
            let text = m.as_str();
            let first = text.chars().next()?;
            let (value, quote) = match first {
                '0'..='9' => return None,
                '"' => (text[1..text.len() - 1].replace("\"\"", "\""), Some('"')),
                '`' => (text[1..text.len() - 1].replace("``", "`"), Some('`')),
                '[' => (text[1..text.len() - 1].to_string(), Some('[')),
                _ => (text.to_string(), None),
            };
            Some(IdentToken {
                start: m.start(),
                end: m.end(),
                value,
                quote,
            })
        })
        .collect()
}

/// Returns `true` if `sql` contains `name` as an identifier token.
///
/// Used to find views and triggers whose text mentions a table.
pub fn references_identifier(sql: &str, name: &str) -> bool {
    identifier_tokens(sql)
        .iter()
        .any(|t| names_match(&t.value, name))
}

/// Which column references in a definition belong to the rebuilt table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnScope {
    /// Unqualified names and `NEW.`/`OLD.` refer to the rebuilt table. Used
    /// for indices, views and triggers on the table or on a view over it.
    Owned,
    /// Trigger attached to another table. Only names qualified by the
    /// rebuilt table are known to be its columns.
    Foreign,
}

/// How one identifier token relates to the rebuilt table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reference {
    Column,
    /// Unqualified name inside a trigger on another table.
    Ambiguous,
    Unrelated,
}

/// Old and new names that dependent definitions have to follow.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenameSet {
    /// Table name before the rebuild.
    pub table: String,
    /// Table name after the rebuild (may equal `table`).
    pub new_table: String,
    /// `(old, new)` column renames.
    pub columns: Vec<(String, String)>,
    /// Columns that no longer exist after the rebuild.
    pub dropped: Vec<String>,
    /// Views over the table that are recreated with it. Triggers on these
    /// views see the table's columns through `NEW` and `OLD`.
    #[serde(default)]
    pub views: Vec<String>,
}

impl RenameSet {
    pub fn new(table: &str, new_table: &str) -> Self {
        Self {
            table: table.to_string(),
            new_table: new_table.to_string(),
            columns: Vec::new(),
            dropped: Vec::new(),
            views: Vec::new(),
        }
    }

    pub fn with_column(mut self, old: &str, new: &str) -> Self {
        self.columns.push((old.to_string(), new.to_string()));
        self
    }

    pub fn with_dropped(mut self, column: &str) -> Self {
        self.dropped.push(column.to_string());
        self
    }

    pub fn with_view(mut self, view: &str) -> Self {
        self.views.push(view.to_string());
        self
    }

    /// Returns `true` when nothing needs to be rewritten.
    pub fn is_identity(&self) -> bool {
        self.table == self.new_table && self.columns.is_empty()
    }

    /// Returns `true` if `name` is the rebuilt table or one of its views.
    pub fn owns(&self, name: &str) -> bool {
        names_match(name, &self.table)
            || names_match(name, &self.new_table)
            || self.views.iter().any(|v| names_match(v, name))
    }

    /// Scope in which the definition of `object` is read.
    pub fn scope_of(&self, object: &CatalogEntry) -> ColumnScope {
        if object.kind == ObjectKind::Trigger && !self.owns(&object.table_name) {
            ColumnScope::Foreign
        } else {
            ColumnScope::Owned
        }
    }

    fn table_renamed(&self) -> bool {
        self.table != self.new_table
    }

    fn column_target(&self, name: &str) -> Option<&str> {
        self.columns
            .iter()
            .find(|(old, _)| names_match(old, name))
            .map(|(_, new)| new.as_str())
    }

    fn affects(&self, name: &str) -> bool {
        self.column_target(name).is_some() || self.dropped.iter().any(|d| names_match(d, name))
    }

    fn classify(&self, sql: &str, tokens: &[IdentToken], index: usize, scope: ColumnScope) -> Reference {
        let token = &tokens[index];
        if token.quote.is_none() && sql[token.end..].trim_start().starts_with('(') {
            return Reference::Unrelated;
        }
        if followed_by_dot(sql, tokens, index) || object_name_index(sql, tokens) == Some(index) {
            return Reference::Unrelated;
        }
        match (qualifier(sql, tokens, index), scope) {
            (None, ColumnScope::Owned) => Reference::Column,
            (None, ColumnScope::Foreign) => Reference::Ambiguous,
            (Some(q), _) if names_match(&q.value, &self.table) || names_match(&q.value, &self.new_table) => {
                Reference::Column
            }
            (Some(q), ColumnScope::Owned)
                if q.quote.is_none()
                    && (q.value.eq_ignore_ascii_case("NEW") || q.value.eq_ignore_ascii_case("OLD")) =>
            {
                Reference::Column
            }
            (Some(_), _) => Reference::Unrelated,
        }
    }

    /// Rewrites every reference to a renamed table or column, reading `sql`
    /// in [`ColumnScope::Owned`].
    ///
    /// All renames are applied in one pass, so swapping two column names
    /// works as expected. The name of the object being created is never
    /// rewritten.
    pub fn rewrite(&self, sql: &str) -> String {
        self.rewrite_in(sql, ColumnScope::Owned)
    }

    /// Like [`RenameSet::rewrite`], for a definition read in `scope`.
    /// Ambiguous names are left untouched.
    pub fn rewrite_in(&self, sql: &str, scope: ColumnScope) -> String {
        if self.is_identity() {
            return sql.to_string();
        }
        let tokens = identifier_tokens(sql);
        let name_index = object_name_index(sql, &tokens);
        let mut out = String::with_capacity(sql.len() + 16);
        let mut last = 0;

        for (index, token) in tokens.iter().enumerate() {
            if name_index == Some(index) {
                continue;
            }
            let column_target = self
                .column_target(&token.value)
                .filter(|_| self.classify(sql, &tokens, index, scope) == Reference::Column);
            let replacement = match column_target {
                Some(new) => Some(new),
                None if self.table_renamed() && names_match(&token.value, &self.table) => {
                    Some(self.new_table.as_str())
                }
                None => None,
            };
            if let Some(new) = replacement {
                out.push_str(&sql[last..token.start]);
                out.push_str(&requote(new, token.quote));
                last = token.end;
            }
        }
        out.push_str(&sql[last..]);
        out
    }

    /// Returns the first dropped column that `sql` still references.
    pub fn dropped_reference(&self, sql: &str, scope: ColumnScope) -> Option<&str> {
        if self.dropped.is_empty() {
            return None;
        }
        let tokens = identifier_tokens(sql);
        tokens.iter().enumerate().find_map(|(index, token)| {
            self.dropped
                .iter()
                .find(|d| names_match(d, &token.value))
                .filter(|_| self.classify(sql, &tokens, index, scope) == Reference::Column)
                .map(String::as_str)
        })
    }

    /// Returns the first unqualified name in a foreign trigger that equals a
    /// renamed or dropped column. Such a name may belong to either table.
    pub fn ambiguous_reference<'s>(&self, sql: &'s str, scope: ColumnScope) -> Option<&'s str> {
        if scope == ColumnScope::Owned || (self.columns.is_empty() && self.dropped.is_empty()) {
            return None;
        }
        let tokens = identifier_tokens(sql);
        tokens.iter().enumerate().find_map(|(index, token)| {
            (self.affects(&token.value) && self.classify(sql, &tokens, index, scope) == Reference::Ambiguous)
                .then(|| &sql[token.start..token.end])
        })
    }
}

/// Index of the created object's name in `CREATE [TEMP] [UNIQUE]
/// INDEX|VIEW|TRIGGER [IF NOT EXISTS] [schema.]name`.
fn object_name_index(sql: &str, tokens: &[IdentToken]) -> Option<usize> {
    let is = |i: usize, word: &str| {
        tokens
            .get(i)
            .is_some_and(|t| t.quote.is_none() && t.value.eq_ignore_ascii_case(word))
    };
    if !is(0, "CREATE") {
        return None;
    }
    let mut i = 1;
    while is(i, "TEMP") || is(i, "TEMPORARY") || is(i, "UNIQUE") {
        i += 1;
    }
    if !(is(i, "INDEX") || is(i, "VIEW") || is(i, "TRIGGER")) {
        return None;
    }
    i += 1;
    if is(i, "IF") && is(i + 1, "NOT") && is(i + 2, "EXISTS") {
        i += 3;
    }
    if followed_by_dot(sql, tokens, i) {
        i += 1;
    }
    (i < tokens.len()).then_some(i)
}

fn followed_by_dot(sql: &str, tokens: &[IdentToken], index: usize) -> bool {
    tokens
        .get(index + 1)
        .is_some_and(|next| sql[tokens[index].end..next.start].trim() == ".")
}

fn qualifier<'t>(sql: &str, tokens: &'t [IdentToken], index: usize) -> Option<&'t IdentToken> {
    let prev = tokens.get(index.checked_sub(1)?)?;
    (sql[prev.end..tokens[index].start].trim() == ".").then_some(prev)
}

/// Writes `name` using the quoting style of the token it replaces.
fn requote(name: &str, quote: Option<char>) -> String {
    match quote {
        None if is_plain_identifier(name) => name.to_string(),
        Some('`') => format!("`{}`", name.replace('`', "``")),
        Some('[') if !name.contains(']') => format!("[{name}]"),
        _ => quote_identifier(name),
    }
}

/// Result of rewriting one dependent object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RewriteOutcome {
    /// Updated definition text, ready to execute.
    Rewritten(String),
    /// The object cannot be carried over; `original` is kept for manual repair.
    Unrecoverable { original: String, reason: String },
}

/// Produces the definition a dependent object should be recreated with.
pub trait DependentRewriter {
    fn rewrite(&self, object: &CatalogEntry, renames: &RenameSet) -> RewriteOutcome;
}

/// The default [`DependentRewriter`]: token substitution via [`RenameSet`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TextualRewriter;

impl DependentRewriter for TextualRewriter {
    fn rewrite(&self, object: &CatalogEntry, renames: &RenameSet) -> RewriteOutcome {
        let Some(sql) = object.sql.as_deref() else {
            return RewriteOutcome::Unrecoverable {
                original: String::new(),
                reason: format!("{} {} has no stored definition", object.kind, object.name),
            };
        };
        let scope = renames.scope_of(object);
        if let Some(column) = renames.dropped_reference(sql, scope) {
            return RewriteOutcome::Unrecoverable {
                original: sql.to_string(),
                reason: format!("references dropped column \"{column}\""),
            };
        }
        if let Some(name) = renames.ambiguous_reference(sql, scope) {
            return RewriteOutcome::Unrecoverable {
                original: sql.to_string(),
                reason: format!(
                    "trigger on \"{}\" uses unqualified {name}, which may be a column of either table",
                    object.table_name
                ),
            };
        }
        RewriteOutcome::Rewritten(renames.rewrite_in(sql, scope))
    }
}
