//! Safe SQL identifier handling.
//!
//! Every table and column name that ends up in generated SQL goes through
//! [`Ident`]. Nothing caller-provided is concatenated into SQL text without it.
//!
//! - Table names use [`Ident::parse`]: dotted notation and quoted parts are
//!   supported (`public.items`, `"Audit"."Items"`). Unquoted parts are
//!   validated against `[A-Za-z_][A-Za-z0-9_$]*`.
//! - Column names use [`Ident::column`]: the name is taken literally, must
//!   match the same allow-list, and is always rendered double-quoted so the
//!   exact spelling (case included) reaches the database and the JSON keys.
//!
//! # Example
//! ```ignore
//! use pgbatch::Ident;
//!
//! let t = Ident::parse("public.test_items")?;
//! let c = Ident::column("createdAt")?;
//! assert_eq!(c.to_sql(), r#""createdAt""#);
//! # Ok::<(), pgbatch::BatchError>(())
//! ```

use crate::error::{BatchError, BatchResult};

/// A part of a SQL identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentPart {
    /// Bare name, folded to lower case by the server.
    Unquoted(String),
    /// Double-quoted name, kept verbatim.
    Quoted(String),
}

impl IdentPart {
    /// The identifier text without quoting.
    pub fn name(&self) -> &str {
        match self {
            IdentPart::Unquoted(s) | IdentPart::Quoted(s) => s,
        }
    }

    fn write_sql(&self, out: &mut String) {
        match self {
            IdentPart::Unquoted(s) => out.push_str(s),
            IdentPart::Quoted(s) => {
                out.push('"');
                out.push_str(&s.replace('"', "\"\""));
                out.push('"');
            }
        }
    }
}

/// A validated table or column identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ident {
    pub parts: Vec<IdentPart>,
}

/// `catalog.schema.table` is the longest name Postgres accepts for a relation.
const MAX_PARTS: usize = 3;

/// Check `name` against `[A-Za-z_][A-Za-z0-9_$]*`.
fn check_bare(name: &str, what: &str) -> BatchResult<()> {
    let mut chars = name.chars();
    match chars.next() {
        None => return Err(BatchError::validation(format!("{what} cannot be empty"))),
        Some(c) if c != '_' && !c.is_ascii_alphabetic() => {
            return Err(BatchError::validation(format!(
                "Invalid {what} start character '{c}' in {name:?}"
            )));
        }
        Some(_) => {}
    }
    match chars.find(|c| *c != '_' && *c != '$' && !c.is_ascii_alphanumeric()) {
        Some(c) => Err(BatchError::validation(format!(
            "Invalid character '{c}' in {what} {name:?}"
        ))),
        None => Ok(()),
    }
}

/// Split one part off the front of `rest`, returning it and the remainder
/// (which starts at the following `.`, if any).
fn split_part(rest: &str) -> BatchResult<(IdentPart, &str)> {
    let Some(quoted) = rest.strip_prefix('"') else {
        let end = rest.find('.').unwrap_or(rest.len());
        let (name, tail) = rest.split_at(end);
        check_bare(name, "identifier")?;
        return Ok((IdentPart::Unquoted(name.to_string()), tail));
    };

    let mut name = String::new();
    let mut chars = quoted.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if c != '"' {
            name.push(c);
            continue;
        }
        if chars.peek().is_some_and(|(_, next)| *next == '"') {
            chars.next();
            name.push('"');
            continue;
        }
        if name.is_empty() {
            return Err(BatchError::validation("Empty quoted identifier"));
        }
        return Ok((IdentPart::Quoted(name), &quoted[i + 1..]));
    }
    Err(BatchError::validation("Unclosed quoted identifier"))
}

impl Ident {
    /// A single-part column identifier, always rendered quoted.
    ///
    /// The name must match `[A-Za-z_][A-Za-z0-9_$]*`.
    pub fn column(name: &str) -> BatchResult<Self> {
        check_bare(name, "column name")?;
        Ok(Self {
            parts: vec![IdentPart::Quoted(name.to_string())],
        })
    }

    /// Parse a table name: `items`, `public.items`, `public."Items"`.
    pub fn parse(s: &str) -> BatchResult<Self> {
        if s.contains('\0') {
            return Err(BatchError::validation(
                "Identifier cannot contain NUL character",
            ));
        }

        let mut parts = Vec::new();
        let mut rest = s;
        loop {
            let (part, tail) = split_part(rest)?;
            parts.push(part);
            match tail.chars().next() {
                None => break,
                Some('.') => rest = &tail[1..],
                Some(c) => {
                    return Err(BatchError::validation(format!(
                        "Expected '.' between identifier parts, got '{c}'"
                    )));
                }
            }
        }

        if parts.len() > MAX_PARTS {
            return Err(BatchError::validation(format!(
                "Identifier {s:?} has more than {MAX_PARTS} parts"
            )));
        }
        Ok(Self { parts })
    }

    /// The last part, unquoted (`items` for `public.items`).
    pub fn name(&self) -> &str {
        self.parts.last().map(IdentPart::name).unwrap_or_default()
    }

    /// Render the identifier as SQL.
    pub fn to_sql(&self) -> String {
        let mut out = String::with_capacity(self.name().len() + 2);
        self.write_sql(&mut out);
        out
    }

    pub(crate) fn write_sql(&self, out: &mut String) {
        for (i, part) in self.parts.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            part.write_sql(out);
        }
    }
}

impl std::fmt::Display for Ident {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_sql())
    }
}
