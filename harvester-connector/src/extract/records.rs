use std::collections::BTreeMap;

use harvester_common::{datasource::DATA_PATH_SELECTOR_KEY, error::Error, record::Record};
use serde_json::Value;

use super::json_path;

/// Maps a JSON document onto records.
/// ---
/// `_data_path` selects the record root; an array root yields one record
/// per element. Remaining selectors map output fields to paths inside each
/// item. Without field selectors objects are kept whole and scalars are
/// wrapped as `{"value": ...}`.
pub fn records_from_json(
    document: &Value,
    selectors: &BTreeMap<String, String>,
) -> Result<Vec<Record>, Error> {
    let root = match selectors
        .get(DATA_PATH_SELECTOR_KEY)
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
    {
        Some(path) => json_path::resolve(document, path).ok_or_else(|| {
            Error::CollectionFailure(format!("data path '{path}' not found in response"))
        })?,
        None => document,
    };

    let fields: Vec<(&String, &String)> = selectors
        .iter()
        .filter(|(field, _)| field.as_str() != DATA_PATH_SELECTOR_KEY)
        .collect();

    let items: Vec<&Value> = match root {
        Value::Array(items) => items.iter().collect(),
        Value::Null => Vec::new(),
        other => vec![other],
    };

    Ok(items
        .into_iter()
        .map(|item| {
            if fields.is_empty() {
                return whole(item);
            }
            fields
                .iter()
                .filter_map(|(field, path)| {
                    json_path::resolve(item, path).map(|v| (field.to_string(), v.clone()))
                })
                .collect()
        })
        .collect())
}

fn whole(item: &Value) -> Record {
    match item {
        Value::Object(map) => map.clone(),
        other => {
            let mut record = Record::new();
            record.insert("value".to_string(), other.clone());
            record
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn selectors(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn data_path_and_field_paths() {
        let doc = json!({
            "data": {"list": [
                {"id": 1, "author": {"name": "ana"}, "tags": ["x", "y"]},
                {"id": 2, "author": {"name": "bo"}}
            ]}
        });

        let records = records_from_json(
            &doc,
            &selectors(&[
                ("_data_path", "data.list"),
                ("id", "id"),
                ("author", "author.name"),
                ("first_tag", "tags[0]"),
            ]),
        )
        .unwrap();

        assert_eq!(records.len(), 2);
        assert_eq!(records[0]["author"], "ana");
        assert_eq!(records[0]["first_tag"], "x");
        assert!(!records[1].contains_key("first_tag"));
    }

    #[test]
    fn whole_objects_without_field_selectors() {
        let doc = json!([{"a": 1}, 7]);
        let records = records_from_json(&doc, &BTreeMap::new()).unwrap();

        assert_eq!(records[0]["a"], 1);
        assert_eq!(records[1]["value"], 7);
    }

    #[test]
    fn missing_data_path_fails_collection() {
        let err = records_from_json(&json!({"data": {}}), &selectors(&[("_data_path", "data.rows")]))
            .unwrap_err();
        assert!(matches!(err, Error::CollectionFailure(_)));
    }
}
