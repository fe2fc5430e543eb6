use crate::error::{Error, Result};
use crate::types::{NamedParams, SqlValue};

/// Positional placeholder syntax of a driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1, $2, ...` (PostgreSQL)
    Dollar,
    /// `?` (SQLite, MySQL)
    Question,
    /// `@p1, @p2, ...` (SQL Server)
    AtP,
    /// `:1, :2, ...` (Oracle)
    ColonNumber,
}

impl PlaceholderStyle {
    fn render(&self, index: usize, out: &mut String) {
        match self {
            PlaceholderStyle::Dollar => {
                out.push('$');
                out.push_str(&index.to_string());
            }
            PlaceholderStyle::Question => out.push('?'),
            PlaceholderStyle::AtP => {
                out.push_str("@p");
                out.push_str(&index.to_string());
            }
            PlaceholderStyle::ColonNumber => {
                out.push(':');
                out.push_str(&index.to_string());
            }
        }
    }
}

/// SQL rewritten to positional placeholders with values in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct ExpandedSql {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// Rewrite `:name` placeholders into `style`, collecting their values.
///
/// Quoted literals and identifiers are copied verbatim, and `::` casts and `:=`
/// assignments are not treated as placeholders. A name used twice is bound twice.
///
/// ```rust
/// use dbqueue::driver::{expand_named_params, PlaceholderStyle};
/// use dbqueue::types::NamedParams;
///
/// let params = NamedParams::new().with("id", 5i64).with("queueName", "mail");
/// let expanded = expand_named_params(
///     "DELETE FROM t WHERE q = :queueName AND id = :id::bigint",
///     &params,
///     PlaceholderStyle::Dollar,
/// ).unwrap();
/// assert_eq!(expanded.sql, "DELETE FROM t WHERE q = $1 AND id = $2::bigint");
/// assert_eq!(expanded.values.len(), 2);
/// ```
pub fn expand_named_params(
    sql: &str,
    params: &NamedParams,
    style: PlaceholderStyle,
) -> Result<ExpandedSql> {
    expand(sql, params, style, false)
}

/// Like [`expand_named_params`], but a NULL value is written as a bare `NULL` literal
/// instead of a placeholder.
///
/// For servers that type every parameter: a literal NULL takes the type of the
/// column it is assigned to.
///
/// ```rust
/// use dbqueue::driver::{expand_named_params_inline_nulls, PlaceholderStyle};
/// use dbqueue::types::{NamedParams, SqlValue};
///
/// let params = NamedParams::new().with("q", "mail").with("priority", SqlValue::Null);
/// let expanded = expand_named_params_inline_nulls(
///     "INSERT INTO t (q, priority) VALUES (:q, :priority)",
///     &params,
///     PlaceholderStyle::Dollar,
/// ).unwrap();
/// assert_eq!(expanded.sql, "INSERT INTO t (q, priority) VALUES ($1, NULL)");
/// assert_eq!(expanded.values.len(), 1);
/// ```
pub fn expand_named_params_inline_nulls(
    sql: &str,
    params: &NamedParams,
    style: PlaceholderStyle,
) -> Result<ExpandedSql> {
    expand(sql, params, style, true)
}

fn expand(
    sql: &str,
    params: &NamedParams,
    style: PlaceholderStyle,
    inline_nulls: bool,
) -> Result<ExpandedSql> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                let end = closing_quote(&chars, i);
                out.extend(&chars[i..end]);
                i = end;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                let end = chars[i..]
                    .iter()
                    .position(|&ch| ch == '\n')
                    .map_or(chars.len(), |p| i + p);
                out.extend(&chars[i..end]);
                i = end;
            }
            ':' if chars.get(i + 1) == Some(&':') => {
                out.push_str("::");
                i += 2;
            }
            ':' if chars.get(i + 1).is_some_and(|ch| is_name_start(*ch)) => {
                let start = i + 1;
                let mut end = start;
                while end < chars.len() && is_name_part(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let value = params
                    .get(&name)
                    .ok_or_else(|| Error::MissingParameter { name: name.clone() })?;
                if inline_nulls && matches!(value, SqlValue::Null) {
                    out.push_str("NULL");
                } else {
                    values.push(value.clone());
                    style.render(values.len(), &mut out);
                }
                i = end;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    Ok(ExpandedSql { sql: out, values })
}

/// Index one past the quote that closes the literal opened at `start`.
/// A doubled quote inside the literal is an escaped quote.
fn closing_quote(chars: &[char], start: usize) -> usize {
    let quote = chars[start];
    let mut i = start + 1;
    while i < chars.len() {
        if chars[i] == quote {
            if chars.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    chars.len()
}

fn is_name_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_name_part(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}
