//! `::<type> AS <name>` type decorations.
//!
//! With stripping enabled, a projection written as `total::numeric AS amount`
//! declares the result column `amount` with type `numeric`, and the whole
//! decoration is removed from the text handed downstream.

use regex::Regex;
use std::ops::Range;
use std::sync::OnceLock;

use super::lexer::{code_ranges, is_code};
use crate::error::QueryBindError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoration {
    /// From the `::` through the end of the alias.
    pub range: Range<usize>,
    /// Type as written, whitespace collapsed.
    pub data_type: String,
    /// Alias, unquoted.
    pub alias: String,
}

fn type_regex() -> &'static Regex {
    static TYPE_REGEX: OnceLock<Regex> = OnceLock::new();
    TYPE_REGEX.get_or_init(|| {
        Regex::new(
            r#"(?i)^\s*("[^"]+"|[A-Za-z_][\w\.]*(?:\s+(?:varying|precision|with|without|time|zone))*(?:\s*\(\s*\d+(?:\s*,\s*\d+)*\s*\))?(?:\s*\[\s*\])*)"#,
        )
        .expect("Invalid type regex pattern")
    })
}

fn as_regex() -> &'static Regex {
    static AS_REGEX: OnceLock<Regex> = OnceLock::new();
    AS_REGEX.get_or_init(|| Regex::new(r"(?i)^\s+as\b").expect("Invalid AS regex pattern"))
}

fn alias_regex() -> &'static Regex {
    static ALIAS_REGEX: OnceLock<Regex> = OnceLock::new();
    ALIAS_REGEX.get_or_init(|| {
        Regex::new(r#"^\s+([A-Za-z_]\w*|"[^"]+")"#).expect("Invalid alias regex pattern")
    })
}

// Words that can follow a projection, so they cannot be its alias.
const RESERVED: &[&str] = &[
    "from", "where", "group", "order", "having", "limit", "offset", "union", "intersect",
    "except", "join", "on", "as", "and", "or", "returning", "window",
];

fn fragment(sql: &str, start: usize) -> String {
    let end = sql[start..]
        .char_indices()
        .nth(32)
        .map_or(sql.len(), |(i, _)| start + i);
    sql[start..end].trim_end().to_string()
}

/// Find every decoration in the code regions of `sql`.
///
/// Plain casts (`::type` not followed by `AS`) are left alone, and so is
/// anything inside parentheses, where `AS` belongs to `CAST(.. AS type)` or
/// to a nested query rather than to a projection item.
pub fn decorations(sql: &str) -> Result<Vec<Decoration>, QueryBindError> {
    let code = code_ranges(sql);
    let mut out = Vec::new();
    let mut search = 0;
    let mut depth = 0usize;
    let mut counted = 0;

    while let Some(found) = sql[search..].find("::") {
        let start = search + found;
        search = start + 2;
        if !is_code(&code, start) {
            continue;
        }
        depth = paren_depth(sql, &code, counted..start, depth);
        counted = start;

        let rest = &sql[start + 2..];
        let Some(ty) = type_regex().captures(rest).and_then(|c| c.get(1)) else {
            return Err(QueryBindError::MalformedCast {
                fragment: fragment(sql, start),
            });
        };
        if ty.as_str().eq_ignore_ascii_case("as") {
            return Err(QueryBindError::MalformedCast {
                fragment: fragment(sql, start),
            });
        }

        let after_type = start + 2 + ty.end();
        let Some(as_kw) = as_regex().find(&sql[after_type..]) else {
            continue;
        };
        if depth > 0 {
            continue;
        }
        let after_as = after_type + as_kw.end();
        let alias = alias_regex()
            .captures(&sql[after_as..])
            .and_then(|c| c.get(1))
            .filter(|m| !RESERVED.iter().any(|r| m.as_str().eq_ignore_ascii_case(r)));
        let Some(alias) = alias else {
            return Err(QueryBindError::MalformedCast {
                fragment: fragment(sql, start),
            });
        };

        let end = after_as + alias.end();
        out.push(Decoration {
            range: start..end,
            data_type: ty.as_str().split_whitespace().collect::<Vec<_>>().join(" "),
            alias: alias.as_str().trim_matches('"').to_string(),
        });
        search = end;
    }

    Ok(out)
}

fn paren_depth(sql: &str, code: &[Range<usize>], span: Range<usize>, depth: usize) -> usize {
    let offset = span.start;
    sql.as_bytes()[span]
        .iter()
        .enumerate()
        .filter(|(i, _)| is_code(code, offset + i))
        .fold(depth, |depth, (_, b)| match b {
            b'(' => depth + 1,
            b')' => depth.saturating_sub(1),
            _ => depth,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_decoration() {
        let sql = "SELECT id, total::numeric AS amount FROM orders";
        let decorations = decorations(sql).unwrap();
        assert_eq!(decorations.len(), 1);
        let d = &decorations[0];
        assert_eq!(d.data_type, "numeric");
        assert_eq!(d.alias, "amount");
        assert_eq!(&sql[d.range.clone()], "::numeric AS amount");
    }

    #[test]
    fn test_multiword_and_parameterized_types() {
        let sql = "SELECT a::character  varying(20) AS name, b::timestamp with time zone as \"At\", c::int[] AS ids";
        let d = decorations(sql).unwrap();
        assert_eq!(d[0].data_type, "character varying(20)");
        assert_eq!(d[1].data_type, "timestamp with time zone");
        assert_eq!(d[1].alias, "At");
        assert_eq!(d[2].data_type, "int[]");
    }

    #[test]
    fn test_plain_cast_untouched() {
        let sql = "SELECT id::text, created_at::date FROM orders WHERE x = '::bad AS from'";
        assert!(decorations(sql).unwrap().is_empty());
    }

    #[test]
    fn test_as_prefix_is_not_as() {
        assert!(decorations("SELECT a::int as_of FROM t").unwrap().is_empty());
    }

    #[test]
    fn test_nested_as_is_not_a_decoration() {
        let sql = "SELECT CAST(status::text AS varchar) AS s, (SELECT 1::int AS one) AS o FROM orders";
        assert!(decorations(sql).unwrap().is_empty());

        let sql = "SELECT CAST(a AS int), b::numeric(10, 2) AS total, c FROM t WHERE d IN ('(')";
        let d = decorations(sql).unwrap();
        assert_eq!(d.len(), 1);
        assert_eq!(d[0].alias, "total");
        assert_eq!(d[0].data_type, "numeric(10, 2)");
    }

    #[test]
    fn test_malformed() {
        assert!(matches!(
            decorations("SELECT total:: AS amount FROM t"),
            Err(QueryBindError::MalformedCast { .. })
        ));
        assert!(matches!(
            decorations("SELECT total::numeric AS FROM t"),
            Err(QueryBindError::MalformedCast { .. })
        ));
        assert!(matches!(
            decorations("SELECT total::"),
            Err(QueryBindError::MalformedCast { .. })
        ));
    }
}
