//! Byte-level segmentation of a query text.
//!
//! Placeholder scanning and decoration stripping must only look at plain SQL
//! code, never inside string literals, quoted identifiers or comments. This
//! splits a text into those regions without tokenizing it.

use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Code,
    /// `'...'` or `$tag$...$tag$`
    String,
    /// `"..."` or `` `...` ``
    QuotedIdent,
    /// `-- ...` or `/* ... */`
    Comment,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub kind: SegmentKind,
    pub range: Range<usize>,
}

/// Split `sql` into contiguous segments covering the whole text.
///
/// Unterminated literals and comments run to the end of the input.
pub fn segments(sql: &str) -> Vec<Segment> {
    let bytes = sql.as_bytes();
    let mut out = Vec::new();
    let mut code_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let special = match bytes[i] {
            b'\'' => Some((SegmentKind::String, quoted_end(bytes, i, b'\''))),
            b'"' => Some((SegmentKind::QuotedIdent, quoted_end(bytes, i, b'"'))),
            b'`' => Some((SegmentKind::QuotedIdent, quoted_end(bytes, i, b'`'))),
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                Some((SegmentKind::Comment, line_comment_end(bytes, i)))
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                Some((SegmentKind::Comment, block_comment_end(bytes, i)))
            }
            b'$' => dollar_quote_end(sql, i).map(|end| (SegmentKind::String, end)),
            _ => None,
        };

        match special {
            Some((kind, end)) => {
                if code_start < i {
                    out.push(Segment {
                        kind: SegmentKind::Code,
                        range: code_start..i,
                    });
                }
                out.push(Segment { kind, range: i..end });
                i = end;
                code_start = end;
            }
            None => i += 1,
        }
    }

    if code_start < bytes.len() {
        out.push(Segment {
            kind: SegmentKind::Code,
            range: code_start..bytes.len(),
        });
    }
    out
}

/// Ranges of plain code, in order.
pub fn code_ranges(sql: &str) -> Vec<Range<usize>> {
    segments(sql)
        .into_iter()
        .filter(|s| s.kind == SegmentKind::Code)
        .map(|s| s.range)
        .collect()
}

/// Whether byte offset `pos` lies in plain code.
pub fn is_code(ranges: &[Range<usize>], pos: usize) -> bool {
    ranges.iter().any(|r| r.contains(&pos))
}

// A doubled quote character escapes itself.
fn quoted_end(bytes: &[u8], start: usize, quote: u8) -> usize {
    let mut i = start + 1;
    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    bytes.len()
}

fn line_comment_end(bytes: &[u8], start: usize) -> usize {
    bytes[start..]
        .iter()
        .position(|&b| b == b'\n')
        .map_or(bytes.len(), |p| start + p)
}

// Postgres block comments nest.
fn block_comment_end(bytes: &[u8], start: usize) -> usize {
    let mut depth = 0usize;
    let mut i = start;
    while i + 1 < bytes.len() {
        match (bytes[i], bytes[i + 1]) {
            (b'/', b'*') => {
                depth += 1;
                i += 2;
            }
            (b'*', b'/') => {
                depth -= 1;
                i += 2;
                if depth == 0 {
                    return i;
                }
            }
            _ => i += 1,
        }
    }
    bytes.len()
}

/// End of a `$tag$ ... $tag$` literal starting at `start`, if one starts
/// there. `$1` is a positional parameter, not a tag.
fn dollar_quote_end(sql: &str, start: usize) -> Option<usize> {
    let rest = &sql[start + 1..];
    let tag_len = rest.find('$')?;
    let tag = &rest[..tag_len];
    let valid_tag = tag
        .chars()
        .next()
        .map_or(true, |c| c.is_ascii_alphabetic() || c == '_')
        && tag.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid_tag {
        return None;
    }
    let delimiter = &sql[start..start + tag_len + 2];
    let body_start = start + delimiter.len();
    Some(
        sql[body_start..]
            .find(delimiter)
            .map_or(sql.len(), |p| body_start + p + delimiter.len()),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<(SegmentKind, &str)> {
        segments(sql)
            .into_iter()
            .map(|s| (s.kind, &sql[s.range]))
            .collect()
    }

    #[test]
    fn test_strings_and_idents() {
        let sql = r#"SELECT 'it''s ?' AS "a?b" FROM t"#;
        assert_eq!(
            kinds(sql),
            vec![
                (SegmentKind::Code, "SELECT "),
                (SegmentKind::String, "'it''s ?'"),
                (SegmentKind::Code, " AS "),
                (SegmentKind::QuotedIdent, "\"a?b\""),
                (SegmentKind::Code, " FROM t"),
            ]
        );
    }

    #[test]
    fn test_comments() {
        let sql = "SELECT 1 -- why?\nFROM /* a /* nested */ ? */ t";
        let k = kinds(sql);
        assert_eq!(k[1], (SegmentKind::Comment, "-- why?"));
        assert_eq!(k[3], (SegmentKind::Comment, "/* a /* nested */ ? */"));
        assert_eq!(k[4], (SegmentKind::Code, " t"));
    }

    #[test]
    fn test_dollar_quotes_vs_parameters() {
        let sql = "SELECT $$a ? b$$, $body$x$body$ WHERE id = $1";
        let k = kinds(sql);
        assert_eq!(k[1], (SegmentKind::String, "$$a ? b$$"));
        assert_eq!(k[3], (SegmentKind::String, "$body$x$body$"));
        assert_eq!(k.last().unwrap(), &(SegmentKind::Code, " WHERE id = $1"));
    }

    #[test]
    fn test_unterminated_runs_to_end() {
        let sql = "SELECT 'open";
        assert_eq!(kinds(sql)[1], (SegmentKind::String, "'open"));
    }

    #[test]
    fn test_code_ranges() {
        let sql = "a 'b' c";
        let ranges = code_ranges(sql);
        assert_eq!(ranges, vec![0..2, 5..7]);
        assert!(is_code(&ranges, 0));
        assert!(!is_code(&ranges, 3));
    }
}
