//! Lightweight scanner for stored `CREATE TABLE` text.
//!
//! The table-info pragmas report names, types, nullability, defaults, keys
//! and foreign keys, but not CHECK expressions, collations, AUTOINCREMENT or
//! table options. Those are recovered here from the definition text.
//!
//! The scanner only tokenizes and tracks parenthesis depth. It understands
//! string literals, quoted identifiers and comments well enough that keywords
//! inside them are never mistaken for clauses.

use serde::{Deserialize, Serialize};

use crate::types::names_match;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Word,
    Quoted,
    Str,
    Number,
    Punct,
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
    start: usize,
    end: usize,
}

impl Token<'_> {
    fn is_word(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct && self.text.starts_with(c)
    }

    /// Identifier value with quoting removed.
    fn ident(&self) -> String {
        match self.kind {
            TokenKind::Quoted | TokenKind::Str => {
                let inner = &self.text[1..self.text.len().saturating_sub(1).max(1)];
                match self.text.as_bytes()[0] {
                    b'"' => inner.replace("\"\"", "\""),
                    b'`' => inner.replace("``", "`"),
                    b'\'' => inner.replace("''", "'"),
                    _ => inner.to_string(),
                }
            }
            _ => self.text.to_string(),
        }
    }
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

/// Finds the end of a quoted run starting at `start`, honouring doubled
/// closing characters. Unterminated runs extend to the end of input.
fn quoted_end(bytes: &[u8], start: usize, close: u8, doubled: bool) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == close {
            if doubled && bytes.get(i + 1) == Some(&close) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn tokenize(sql: &str) -> Vec<Token<'_>> {
    let bytes = sql.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let start = i;
        let kind = match b {
            _ if b.is_ascii_whitespace() => {
                i += 1;
                continue;
            }
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
                continue;
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i = (i + 2).min(bytes.len());
                continue;
            }
            b'\'' => {
                i = quoted_end(bytes, i, b'\'', true);
                TokenKind::Str
            }
            b'"' => {
                i = quoted_end(bytes, i, b'"', true);
                TokenKind::Quoted
            }
            b'`' => {
                i = quoted_end(bytes, i, b'`', true);
                TokenKind::Quoted
            }
            b'[' => {
                i = quoted_end(bytes, i, b']', false);
                TokenKind::Quoted
            }
            b'0'..=b'9' => {
                while i < bytes.len() && (is_word_byte(bytes[i]) || bytes[i] == b'.') {
                    i += 1;
                }
                TokenKind::Number
            }
            _ if is_word_byte(b) => {
                while i < bytes.len() && is_word_byte(bytes[i]) {
                    i += 1;
                }
                TokenKind::Word
            }
            _ => {
                i += sql[i..].chars().next().map_or(1, char::len_utf8);
                TokenKind::Punct
            }
        };
        tokens.push(Token {
            kind,
            text: &sql[start..i],
            start,
            end: i,
        });
    }
    tokens
}

/// Returns the index of the `)` matching the `(` at `open`.
fn matching_paren(tokens: &[Token<'_>], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, token) in tokens.iter().enumerate().skip(open) {
        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') {
            depth = depth.checked_sub(1)?;
            if depth == 0 {
                return Some(i);
            }
        }
    }
    None
}

/// Source text between the parentheses of the group opening at `open`.
fn group_text<'a>(sql: &'a str, tokens: &[Token<'a>], open: usize) -> Option<(&'a str, usize)> {
    let close = matching_paren(tokens, open)?;
    Some((sql[tokens[open].end..tokens[close].start].trim(), close))
}

/// Per-column details only present in the definition text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnClause {
    pub name: String,
    /// Column CHECK expressions in declaration order.
    pub checks: Vec<String>,
    pub collation: Option<String>,
    pub autoincrement: bool,
    /// `GENERATED ALWAYS AS (...)` or `AS (...)`.
    pub generated: bool,
}

impl ColumnClause {
    /// All CHECK expressions of the column as one expression.
    ///
    /// A CHECK only fails when its expression is false, so joining with
    /// `AND` accepts exactly the rows the separate constraints accept.
    pub fn check(&self) -> Option<String> {
        match self.checks.as_slice() {
            [] => None,
            [only] => Some(only.clone()),
            all => Some(
                all.iter()
                    .map(|c| format!("({c})"))
                    .collect::<Vec<_>>()
                    .join(" AND "),
            ),
        }
    }
}

/// A `DEFERRABLE` clause on a foreign key, keyed by its child columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDeferral {
    pub columns: Vec<String>,
    /// Normalised clause text, e.g. `DEFERRABLE INITIALLY DEFERRED`.
    pub clause: String,
}

/// What [`scan_create_table`] recovered from a definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableScan {
    pub columns: Vec<ColumnClause>,
    /// Table-level CHECK expressions.
    pub checks: Vec<String>,
    /// The primary key is declared as a separate `PRIMARY KEY(...)` clause.
    pub primary_key_clause: bool,
    pub without_rowid: bool,
    pub strict: bool,
    pub is_virtual: bool,
    pub deferrals: Vec<ForeignKeyDeferral>,
    /// Names given with `CONSTRAINT name`.
    pub constraint_names: Vec<String>,
    /// `ON CONFLICT` clauses, described as `"<constraint> ON CONFLICT <action>"`.
    pub conflict_clauses: Vec<String>,
}

impl TableScan {
    pub fn column(&self, name: &str) -> Option<&ColumnClause> {
        self.columns.iter().find(|c| names_match(&c.name, name))
    }

    pub fn generated_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|c| c.generated)
            .map(|c| c.name.as_str())
            .collect()
    }

    /// Returns the `DEFERRABLE` clause of the foreign key on `columns`.
    pub fn deferral(&self, columns: &[String]) -> Option<&str> {
        self.deferrals
            .iter()
            .find(|d| {
                d.columns.len() == columns.len()
                    && d.columns.iter().zip(columns).all(|(a, b)| names_match(a, b))
            })
            .map(|d| d.clause.as_str())
    }
}

/// Reads `[NOT] DEFERRABLE [INITIALLY DEFERRED|IMMEDIATE]` starting at `i`.
/// Returns the normalised text and the index after the clause.
fn deferrable_clause(item: &[Token<'_>], i: usize) -> Option<(String, usize)> {
    let mut end = i;
    if item.get(end)?.is_word("NOT") {
        end += 1;
    }
    if !item.get(end)?.is_word("DEFERRABLE") {
        return None;
    }
    end += 1;
    if item.get(end).is_some_and(|t| t.is_word("INITIALLY")) && item.get(end + 1).is_some() {
        end += 2;
    }
    let words: Vec<String> = item[i..end].iter().map(|t| t.text.to_ascii_uppercase()).collect();
    Some((words.join(" "), end))
}

/// Reads `ON CONFLICT <action>` starting at `i`.
fn conflict_action(item: &[Token<'_>], i: usize) -> Option<String> {
    let is_on_conflict = item.get(i)?.is_word("ON") && item.get(i + 1)?.is_word("CONFLICT");
    is_on_conflict.then(|| item.get(i + 2).map_or_else(String::new, |t| t.text.to_ascii_uppercase()))
}

const TABLE_CONSTRAINT_STARTS: [&str; 5] = ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

/// Scans a `CREATE TABLE` statement.
///
/// Returns `None` if `sql` is not a `CREATE TABLE` statement or its column
/// list is malformed. `CREATE TABLE ... AS SELECT` yields an empty scan.
///
/// # Examples
///
/// ```
/// use schema_rebuild_core::scan_create_table;
///
/// let scan = scan_create_table(
///     "CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, \
///      name TEXT COLLATE NOCASE CHECK (length(name) > 0)) STRICT",
/// )
/// .unwrap();
/// assert!(scan.column("id").unwrap().autoincrement);
/// assert_eq!(scan.column("name").unwrap().check().as_deref(), Some("length(name) > 0"));
/// assert_eq!(scan.column("name").unwrap().collation.as_deref(), Some("NOCASE"));
/// assert!(scan.strict);
/// ```
pub fn scan_create_table(sql: &str) -> Option<TableScan> {
    let tokens = tokenize(sql);
    let mut pos = 0;
    let mut scan = TableScan::default();

    if !tokens.get(pos)?.is_word("CREATE") {
        return None;
    }
    pos += 1;
    while tokens.get(pos)?.is_word("TEMP") || tokens.get(pos)?.is_word("TEMPORARY") {
        pos += 1;
    }
    if tokens.get(pos)?.is_word("VIRTUAL") {
        scan.is_virtual = true;
        return Some(scan);
    }
    if !tokens.get(pos)?.is_word("TABLE") {
        return None;
    }
    pos += 1;

    let open = tokens[pos..]
        .iter()
        .position(|t| t.is_punct('(') || t.is_word("AS"))
        .map(|offset| pos + offset)?;
    if tokens[open].is_word("AS") {
        return Some(scan);
    }
    let close = matching_paren(&tokens, open)?;

    let mut item_start = open + 1;
    let mut depth = 0usize;
    for i in open + 1..=close {
        let token = &tokens[i];
        if token.is_punct('(') {
            depth += 1;
        } else if token.is_punct(')') && depth > 0 {
            depth -= 1;
        } else if depth == 0 && (token.is_punct(',') || i == close) {
            scan_item(sql, &tokens[item_start..i], &mut scan);
            item_start = i + 1;
        }
    }

    for token in &tokens[close + 1..] {
        if token.is_word("ROWID") {
            scan.without_rowid = true;
        } else if token.is_word("STRICT") {
            scan.strict = true;
        }
    }
    Some(scan)
}

fn scan_item<'a>(sql: &'a str, item: &[Token<'a>], scan: &mut TableScan) {
    let Some(first) = item.first() else {
        return;
    };
    let is_constraint =
        first.kind == TokenKind::Word && TABLE_CONSTRAINT_STARTS.iter().any(|k| first.is_word(k));
    if is_constraint {
        scan_table_constraint(sql, item, scan);
    } else {
        scan_column(sql, item, scan);
    }
}

fn scan_table_constraint<'a>(sql: &'a str, item: &[Token<'a>], scan: &mut TableScan) {
    let mut i = 0;
    if item[0].is_word("CONSTRAINT") {
        if let Some(name) = item.get(1) {
            scan.constraint_names.push(name.ident());
        }
        i = 2;
    }
    let Some(head) = item.get(i) else {
        return;
    };
    let open = item.iter().skip(i).position(|t| t.is_punct('(')).map(|offset| i + offset);
    if head.is_word("PRIMARY") || head.is_word("UNIQUE") {
        if head.is_word("PRIMARY") {
            scan.primary_key_clause = true;
        }
        let after = open.and_then(|o| matching_paren(item, o)).map_or(item.len(), |c| c + 1);
        if let Some(action) = conflict_action(item, after) {
            let kind = if head.is_word("PRIMARY") { "PRIMARY KEY" } else { "UNIQUE" };
            scan.conflict_clauses.push(format!("{kind} ON CONFLICT {action}"));
        }
    } else if head.is_word("CHECK") {
        if let Some((text, _)) = open.and_then(|o| group_text(sql, item, o)) {
            scan.checks.push(text.to_string());
        }
    } else if head.is_word("FOREIGN") {
        let Some((open, close)) = open.and_then(|o| Some((o, matching_paren(item, o)?))) else {
            return;
        };
        let columns: Vec<String> = item[open + 1..close]
            .iter()
            .filter(|t| !t.is_punct(','))
            .map(Token::ident)
            .collect();
        let clause = (close + 1..item.len()).find_map(|j| deferrable_clause(item, j));
        if let Some((clause, _)) = clause {
            scan.deferrals.push(ForeignKeyDeferral { columns, clause });
        }
    }
}

fn scan_column<'a>(sql: &'a str, item: &[Token<'a>], scan: &mut TableScan) {
    let mut column = ColumnClause {
        name: item[0].ident(),
        ..ColumnClause::default()
    };
    // Constraint the next ON CONFLICT belongs to.
    let mut last_constraint = "";
    let mut i = 1;
    while i < item.len() {
        let token = &item[i];
        let next_is_group = item.get(i + 1).is_some_and(|t| t.is_punct('('));
        if token.is_punct('(') {
            // Type arguments such as VARCHAR(255) or a DEFAULT expression.
            i = matching_paren(item, i).unwrap_or(item.len() - 1) + 1;
            continue;
        }
        if token.is_word("CONSTRAINT") {
            if let Some(name) = item.get(i + 1) {
                scan.constraint_names.push(name.ident());
                i += 2;
                continue;
            }
        } else if token.is_word("CHECK") && next_is_group {
            if let Some((text, close)) = group_text(sql, item, i + 1) {
                column.checks.push(text.to_string());
                i = close + 1;
                continue;
            }
        } else if token.is_word("COLLATE") {
            if let Some(name) = item.get(i + 1) {
                column.collation = Some(name.ident());
                i += 2;
                continue;
            }
        } else if let Some(action) = conflict_action(item, i) {
            scan.conflict_clauses.push(format!(
                "{last_constraint} ON CONFLICT {action} on column \"{}\"",
                column.name
            ));
            i += 3;
            continue;
        } else if let Some((clause, end)) = deferrable_clause(item, i) {
            scan.deferrals.push(ForeignKeyDeferral {
                columns: vec![column.name.clone()],
                clause,
            });
            i = end;
            continue;
        } else if token.is_word("NOT") && item.get(i + 1).is_some_and(|t| t.is_word("NULL")) {
            last_constraint = "NOT NULL";
            i += 2;
            continue;
        } else if token.is_word("PRIMARY") {
            last_constraint = "PRIMARY KEY";
        } else if token.is_word("UNIQUE") {
            last_constraint = "UNIQUE";
        } else if token.is_word("AUTOINCREMENT") {
            column.autoincrement = true;
        } else if token.is_word("GENERATED") || (token.is_word("AS") && next_is_group) {
            column.generated = true;
        }
        i += 1;
    }
    scan.columns.push(column);
}
