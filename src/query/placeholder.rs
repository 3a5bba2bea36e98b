//! Placeholder discovery in query texts.
//!
//! Four spellings are supported (see [`PlaceholderStyle`]). Scanning only
//! looks at plain code, so `?` inside a string literal or `:name` inside a
//! comment is left alone, and `::` casts are never read as `:name`.

use std::ops::Range;

use super::lexer::code_ranges;
use crate::config::PlaceholderStyle;
use crate::error::QueryBindError;

const MARKER_PREFIX: &str = "__sb_param_";

/// Identifier a placeholder at `position` is rewritten to before parsing.
pub fn marker(position: usize) -> String {
    format!("{MARKER_PREFIX}{position}")
}

/// Inverse of [`marker`].
pub fn parse_marker(ident: &str) -> Option<usize> {
    ident
        .strip_prefix(MARKER_PREFIX)
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|&n| n > 0)
}

/// A distinct parameter. Its position is its index in [`Scan::params`] + 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    /// Type written inside a delimited placeholder.
    pub declared: Option<String>,
    pub interpolate: bool,
}

/// One spelling of a parameter in the text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub range: Range<usize>,
    /// Index into [`Scan::params`].
    pub param: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Scan {
    pub params: Vec<ParamSpec>,
    /// Ordered by position in the text.
    pub occurrences: Vec<Occurrence>,
}

impl Scan {
    fn named(&mut self, range: Range<usize>, spec: ParamSpec) -> Result<(), QueryBindError> {
        let index = match self.params.iter().position(|p| p.name == spec.name) {
            Some(index) => {
                let existing = &mut self.params[index];
                match (existing.declared.clone(), spec.declared) {
                    (Some(first), Some(second)) if !first.eq_ignore_ascii_case(&second) => {
                        return Err(QueryBindError::ConflictingParameterType {
                            name: spec.name,
                            first,
                            second,
                        });
                    }
                    (None, Some(second)) => existing.declared = Some(second),
                    _ => {}
                }
                existing.interpolate |= spec.interpolate;
                index
            }
            None => {
                self.params.push(spec);
                self.params.len() - 1
            }
        };
        self.occurrences.push(Occurrence { range, param: index });
        Ok(())
    }
}

/// Find every placeholder in `sql`.
///
/// `interpolate_all` marks every parameter as a textual substitution point.
pub fn scan(
    sql: &str,
    style: &PlaceholderStyle,
    interpolate_all: bool,
) -> Result<Scan, QueryBindError> {
    let mut scan = match style {
        PlaceholderStyle::Delimited { delimiter } => scan_delimited(sql, delimiter)?,
        PlaceholderStyle::Question => scan_question(sql),
        PlaceholderStyle::Dollar => scan_dollar(sql)?,
        PlaceholderStyle::Colon => scan_colon(sql)?,
    };
    if interpolate_all {
        for param in &mut scan.params {
            param.interpolate = true;
        }
    }
    Ok(scan)
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn is_identifier(s: &str) -> bool {
    let bytes = s.as_bytes();
    !bytes.is_empty() && is_ident_start(bytes[0]) && bytes.iter().all(|&b| is_ident_char(b))
}

fn scan_delimited(sql: &str, delimiter: &str) -> Result<Scan, QueryBindError> {
    let mut scan = Scan::default();
    if delimiter.is_empty() {
        return Ok(scan);
    }
    for code in code_ranges(sql) {
        let mut cursor = code.start;
        while let Some(found) = sql[cursor..code.end].find(delimiter) {
            let start = cursor + found;
            let inner_start = start + delimiter.len();
            let Some(close) = sql[inner_start..code.end].find(delimiter) else {
                return Err(QueryBindError::UnterminatedPlaceholder { offset: start });
            };
            let inner_end = inner_start + close;
            let end = inner_end + delimiter.len();
            let spec = parse_delimited(&sql[inner_start..inner_end], start)?;
            scan.named(start..end, spec)?;
            cursor = end;
        }
    }
    Ok(scan)
}

/// `name [type][,flag...]`
fn parse_delimited(content: &str, offset: usize) -> Result<ParamSpec, QueryBindError> {
    let mut parts = content.split(',');
    let head = parts.next().unwrap_or_default().trim();
    if head.is_empty() {
        return Err(QueryBindError::EmptyPlaceholder { offset });
    }

    let mut words = head.split_whitespace();
    let name = words.next().unwrap_or_default();
    if !is_identifier(name) {
        return Err(QueryBindError::InvalidPlaceholder {
            text: content.to_string(),
            offset,
        });
    }
    let declared = words.collect::<Vec<_>>().join(" ");

    let mut interpolate = false;
    for flag in parts.map(str::trim).filter(|f| !f.is_empty()) {
        if flag.eq_ignore_ascii_case("interpolate") {
            interpolate = true;
        } else {
            return Err(QueryBindError::InvalidPlaceholder {
                text: content.to_string(),
                offset,
            });
        }
    }

    Ok(ParamSpec {
        name: name.to_string(),
        declared: (!declared.is_empty()).then_some(declared),
        interpolate,
    })
}

fn scan_question(sql: &str) -> Scan {
    let mut scan = Scan::default();
    for code in code_ranges(sql) {
        for (i, b) in sql.as_bytes()[code.clone()].iter().enumerate() {
            if *b == b'?' {
                let start = code.start + i;
                scan.params.push(ParamSpec {
                    name: format!("p{}", scan.params.len() + 1),
                    declared: None,
                    interpolate: false,
                });
                scan.occurrences.push(Occurrence {
                    range: start..start + 1,
                    param: scan.params.len() - 1,
                });
            }
        }
    }
    scan
}

fn scan_dollar(sql: &str) -> Result<Scan, QueryBindError> {
    let bytes = sql.as_bytes();
    let mut found: Vec<(Range<usize>, usize)> = Vec::new();

    for code in code_ranges(sql) {
        let mut i = code.start;
        while i < code.end {
            let preceded_by_ident = i > 0 && is_ident_char(bytes[i - 1]);
            if bytes[i] == b'$' && !preceded_by_ident {
                let digits = bytes[i + 1..code.end]
                    .iter()
                    .take_while(|b| b.is_ascii_digit())
                    .count();
                if digits > 0 {
                    let end = i + 1 + digits;
                    let text = &sql[i..end];
                    let position = text[1..].parse::<usize>().unwrap_or(0);
                    if position == 0 {
                        return Err(QueryBindError::InvalidPlaceholder {
                            text: text.to_string(),
                            offset: i,
                        });
                    }
                    found.push((i..end, position));
                    i = end;
                    continue;
                }
            }
            i += 1;
        }
    }

    let highest = found.iter().map(|(_, p)| *p).max().unwrap_or(0);
    for position in 1..=highest {
        if !found.iter().any(|(_, p)| *p == position) {
            return Err(QueryBindError::MissingPosition { position, highest });
        }
    }

    Ok(Scan {
        params: (1..=highest)
            .map(|n| ParamSpec {
                name: format!("p{n}"),
                declared: None,
                interpolate: false,
            })
            .collect(),
        occurrences: found
            .into_iter()
            .map(|(range, position)| Occurrence {
                range,
                param: position - 1,
            })
            .collect(),
    })
}

fn scan_colon(sql: &str) -> Result<Scan, QueryBindError> {
    let bytes = sql.as_bytes();
    let mut scan = Scan::default();

    for code in code_ranges(sql) {
        let mut i = code.start;
        while i < code.end {
            let is_candidate = bytes[i] == b':'
                && (i == 0 || bytes[i - 1] != b':')
                && bytes.get(i + 1).is_some_and(|&b| is_ident_start(b))
                && i + 1 < code.end;
            if is_candidate {
                let len = bytes[i + 1..code.end]
                    .iter()
                    .take_while(|&&b| is_ident_char(b))
                    .count();
                let end = i + 1 + len;
                scan.named(
                    i..end,
                    ParamSpec {
                        name: sql[i + 1..end].to_string(),
                        declared: None,
                        interpolate: false,
                    },
                )?;
                i = end;
                continue;
            }
            i += 1;
        }
    }
    Ok(scan)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delimited() -> PlaceholderStyle {
        PlaceholderStyle::default()
    }

    fn texts<'a>(sql: &'a str, scan: &Scan) -> Vec<&'a str> {
        scan.occurrences.iter().map(|o| &sql[o.range.clone()]).collect()
    }

    #[test]
    fn test_marker_round_trip() {
        assert_eq!(parse_marker(&marker(3)), Some(3));
        assert_eq!(parse_marker("__sb_param_0"), None);
        assert_eq!(parse_marker("customer_id"), None);
    }

    #[test]
    fn test_delimited_with_types_and_reuse() {
        let sql = "SELECT * FROM t WHERE a = %%id int%% OR b = %%id%% AND c = %%name character  varying%%";
        let scan = scan(sql, &delimited(), false).unwrap();
        assert_eq!(scan.params.len(), 2);
        assert_eq!(scan.params[0].declared.as_deref(), Some("int"));
        assert_eq!(scan.params[1].declared.as_deref(), Some("character varying"));
        assert_eq!(scan.occurrences.len(), 3);
        assert_eq!(scan.occurrences[1].param, 0);
        assert_eq!(texts(sql, &scan)[1], "%%id%%");
    }

    #[test]
    fn test_delimited_interpolate_flag() {
        let scan = scan("SELECT * FROM %%tbl text,interpolate%%", &delimited(), false).unwrap();
        assert!(scan.params[0].interpolate);
        let scan = super::scan("SELECT %%a%%", &delimited(), true).unwrap();
        assert!(scan.params[0].interpolate);
    }

    #[test]
    fn test_custom_delimiter() {
        let style = PlaceholderStyle::Delimited {
            delimiter: "@@".into(),
        };
        let scan = scan("SELECT @@id bigint@@ %%x%%", &style, false).unwrap();
        assert_eq!(scan.params.len(), 1);
        assert_eq!(scan.params[0].name, "id");
    }

    #[test]
    fn test_delimited_errors() {
        assert_eq!(
            scan("SELECT %%id int", &delimited(), false),
            Err(QueryBindError::UnterminatedPlaceholder { offset: 7 })
        );
        assert_eq!(
            scan("SELECT %%  %%", &delimited(), false),
            Err(QueryBindError::EmptyPlaceholder { offset: 7 })
        );
        assert!(matches!(
            scan("SELECT %%1abc%%", &delimited(), false),
            Err(QueryBindError::InvalidPlaceholder { .. })
        ));
        assert!(matches!(
            scan("SELECT %%a int,bogus%%", &delimited(), false),
            Err(QueryBindError::InvalidPlaceholder { .. })
        ));
        assert_eq!(
            scan("SELECT %%a int%%, %%a text%%", &delimited(), false),
            Err(QueryBindError::ConflictingParameterType {
                name: "a".into(),
                first: "int".into(),
                second: "text".into(),
            })
        );
    }

    #[test]
    fn test_question_skips_literals() {
        let sql = "SELECT '?' , \"?\" -- ?\n FROM t WHERE a = ? AND b = ?";
        let scan = scan(sql, &PlaceholderStyle::Question, false).unwrap();
        assert_eq!(scan.params.len(), 2);
        assert_eq!(scan.params[1].name, "p2");
        assert_eq!(texts(sql, &scan), vec!["?", "?"]);
    }

    #[test]
    fn test_dollar_positions() {
        let sql = "SELECT * FROM t WHERE a = $2 AND b = $1 OR c = $2";
        let scan = scan(sql, &PlaceholderStyle::Dollar, false).unwrap();
        assert_eq!(scan.params.len(), 2);
        assert_eq!(scan.occurrences[0].param, 1);
        assert_eq!(scan.occurrences[1].param, 0);
        assert_eq!(scan.occurrences[2].param, 1);
    }

    #[test]
    fn test_dollar_errors() {
        assert!(matches!(
            scan("SELECT $0", &PlaceholderStyle::Dollar, false),
            Err(QueryBindError::InvalidPlaceholder { .. })
        ));
        assert_eq!(
            scan("SELECT $1, $3", &PlaceholderStyle::Dollar, false),
            Err(QueryBindError::MissingPosition {
                position: 2,
                highest: 3
            })
        );
    }

    #[test]
    fn test_dollar_ignores_dollar_quotes() {
        let sql = "SELECT $$ $9 $$ WHERE a = $1";
        let scan = scan(sql, &PlaceholderStyle::Dollar, false).unwrap();
        assert_eq!(scan.params.len(), 1);
    }

    #[test]
    fn test_colon_skips_casts() {
        let sql = "SELECT a::text FROM t WHERE b = :id AND c = :name AND d = :id";
        let scan = scan(sql, &PlaceholderStyle::Colon, false).unwrap();
        let names: Vec<_> = scan.params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name"]);
        assert_eq!(scan.occurrences.len(), 3);
        assert_eq!(texts(sql, &scan)[0], ":id");
    }
}
