use crate::error::QueryBindError;

/// One entry of an explicit result-field list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub data_type: Option<String>,
}

/// Parse `name [type], name [type], ...`.
///
/// Commas inside parentheses belong to the type, so `numeric(10, 2)` is a
/// single type.
pub fn parse_fields(spec: &str) -> Result<Vec<FieldSpec>, QueryBindError> {
    let mut fields: Vec<FieldSpec> = Vec::new();

    for (index, entry) in split_top_level(spec).into_iter().enumerate() {
        let entry = entry.trim();
        if entry.is_empty() {
            return Err(QueryBindError::InvalidFields(format!(
                "field {} is empty",
                index + 1
            )));
        }

        let (name, rest) = split_name(entry).ok_or_else(|| {
            QueryBindError::InvalidFields(format!("{entry:?} does not start with a field name"))
        })?;
        if fields.iter().any(|f| f.name.eq_ignore_ascii_case(&name)) {
            return Err(QueryBindError::InvalidFields(format!(
                "field {name:?} is listed twice"
            )));
        }

        let data_type = rest.split_whitespace().collect::<Vec<_>>().join(" ");
        fields.push(FieldSpec {
            name,
            data_type: (!data_type.is_empty()).then_some(data_type),
        });
    }

    Ok(fields)
}

fn split_top_level(spec: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (i, c) in spec.char_indices() {
        match c {
            '(' => depth += 1,
            ')' => depth -= 1,
            ',' if depth == 0 => {
                parts.push(&spec[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&spec[start..]);
    parts
}

// A bare identifier or a double-quoted one.
fn split_name(entry: &str) -> Option<(String, &str)> {
    if let Some(quoted) = entry.strip_prefix('"') {
        let end = quoted.find('"')?;
        if end == 0 {
            return None;
        }
        return Some((quoted[..end].to_string(), &quoted[end + 1..]));
    }

    let end = entry
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(entry.len());
    let name = &entry[..end];
    let starts_ok = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let rest = &entry[end..];
    if !starts_ok || !(rest.is_empty() || rest.starts_with(char::is_whitespace)) {
        return None;
    }
    Some((name.to_string(), rest))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fields() {
        let fields = parse_fields("id bigint, amount numeric(10, 2), note, \"Full Name\" text").unwrap();
        assert_eq!(
            fields,
            vec![
                FieldSpec {
                    name: "id".into(),
                    data_type: Some("bigint".into())
                },
                FieldSpec {
                    name: "amount".into(),
                    data_type: Some("numeric(10, 2)".into())
                },
                FieldSpec {
                    name: "note".into(),
                    data_type: None
                },
                FieldSpec {
                    name: "Full Name".into(),
                    data_type: Some("text".into())
                },
            ]
        );
    }

    #[test]
    fn test_invalid_fields() {
        for bad in ["id int,", ", id", "1id int", "id-x int", "a int, A text", "\"\" int"] {
            assert!(
                matches!(parse_fields(bad), Err(QueryBindError::InvalidFields(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
