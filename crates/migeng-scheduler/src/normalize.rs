//! Step 2 of the tick: flatten multi-valued columns into JSON arrays before
//! they're snapshotted into a member's `data_json` (spec §4.2 step 2).

use migeng_runbook::{MultiValuedColumn, MultiValuedFormat};
use serde_json::Value;

pub fn normalize_row(columns: &mut serde_json::Map<String, Value>, multi_valued: &[MultiValuedColumn]) {
    for col in multi_valued {
        let Some(raw) = columns.get(&col.name) else { continue };
        let Some(normalized) = normalize_value(raw, col.format) else { continue };
        columns.insert(col.name.clone(), normalized);
    }
}

fn normalize_value(raw: &Value, format: MultiValuedFormat) -> Option<Value> {
    match format {
        MultiValuedFormat::JsonArray => match raw {
            Value::Array(_) => Some(raw.clone()),
            Value::String(s) => serde_json::from_str::<Value>(s).ok().filter(Value::is_array),
            _ => None,
        },
        MultiValuedFormat::SemicolonDelimited => split_delimited(raw, ';'),
        MultiValuedFormat::CommaDelimited => split_delimited(raw, ','),
    }
}

fn split_delimited(raw: &Value, sep: char) -> Option<Value> {
    let s = raw.as_str()?;
    let values: Vec<Value> = s
        .split(sep)
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| Value::String(part.to_string()))
        .collect();
    Some(Value::Array(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_semicolon_delimited_values() {
        let mut columns = serde_json::Map::new();
        columns.insert("aliases".into(), json!("a@x.com; b@x.com ;c@x.com"));
        normalize_row(
            &mut columns,
            &[MultiValuedColumn { name: "aliases".into(), format: MultiValuedFormat::SemicolonDelimited }],
        );
        assert_eq!(columns["aliases"], json!(["a@x.com", "b@x.com", "c@x.com"]));
    }

    #[test]
    fn parses_json_array_strings() {
        let mut columns = serde_json::Map::new();
        columns.insert("tags".into(), json!("[\"a\",\"b\"]"));
        normalize_row(
            &mut columns,
            &[MultiValuedColumn { name: "tags".into(), format: MultiValuedFormat::JsonArray }],
        );
        assert_eq!(columns["tags"], json!(["a", "b"]));
    }

    #[test]
    fn leaves_untouched_columns_alone() {
        let mut columns = serde_json::Map::new();
        columns.insert("mailbox".into(), json!("alice@example.com"));
        normalize_row(&mut columns, &[]);
        assert_eq!(columns["mailbox"], json!("alice@example.com"));
    }
}
