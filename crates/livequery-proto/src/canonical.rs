//! Bracketed query-string canonicalization.
//!
//! Nested JSON objects are flattened into `path=value` pairs where the path
//! uses bracketed segments (`with[comments][with][author]=true`). Object keys
//! are visited in sorted order so structurally equal values always produce
//! the same string regardless of the key order they were built with.
//!
//! Leaf values are written as JSON literals, so `"5"` and `5` stay distinct.
//! Parsing is lenient: a value that is not valid JSON is read back as a
//! plain string, which keeps hand-written URLs such as `locale=en` working.

use serde_json::{Map, Value};

use crate::error::Error;

/// Most bracketed segments accepted in one query key.
///
/// Leaves room for a `with` tree nested to the resolver's default depth
/// (`with[a][with][b]...` spends two segments per level).
pub const MAX_PATH_SEGMENTS: usize = 64;

/// Flatten a JSON object into ordered `(path, literal)` pairs.
///
/// Non-object values flatten to nothing.
pub fn flatten(value: &Value) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    if let Value::Object(map) = value {
        for (key, child) in sorted_entries(map) {
            walk(&encode_segment(key), child, &mut pairs);
        }
    }
    pairs
}

fn walk(path: &str, value: &Value, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) if !map.is_empty() => {
            for (key, child) in sorted_entries(map) {
                walk(&format!("{path}[{}]", encode_segment(key)), child, out);
            }
        }
        Value::Array(items) if !items.is_empty() => {
            for (index, child) in items.iter().enumerate() {
                walk(&format!("{path}[{index}]"), child, out);
            }
        }
        leaf => out.push((path.to_string(), leaf.to_string())),
    }
}

fn sorted_entries(map: &Map<String, Value>) -> Vec<(&String, &Value)> {
    let mut entries: Vec<_> = map.iter().collect();
    entries.sort_by(|a, b| a.0.cmp(b.0));
    entries
}

fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Join flattened pairs into a query string.
pub fn to_query_string(pairs: &[(String, String)]) -> String {
    pairs
        .iter()
        .map(|(path, literal)| format!("{path}={}", urlencoding::encode(literal)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Flatten a JSON object straight into its canonical query string.
pub fn canonical_query(value: &Value) -> String {
    to_query_string(&flatten(value))
}

/// Parse a bracketed query string back into a JSON object.
///
/// Objects whose keys are exactly `0..n` are turned back into arrays.
pub fn unflatten(query: &str) -> Result<Value, Error> {
    let mut root = Value::Object(Map::new());

    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (raw_path, raw_value) = pair.split_once('=').unwrap_or((pair, ""));
        let segments = parse_path(raw_path)?;
        let literal = decode(raw_value)?;
        let value = serde_json::from_str(&literal).unwrap_or(Value::String(literal));
        insert(&mut root, &segments, value, raw_path)?;
    }

    Ok(restore_arrays(root))
}

fn decode(raw: &str) -> Result<String, Error> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .map_err(|e| Error::MalformedTopic(format!("invalid percent-encoding: {e}")))
}

fn parse_path(raw: &str) -> Result<Vec<String>, Error> {
    let (head, mut rest) = match raw.find('[') {
        Some(pos) => (&raw[..pos], &raw[pos..]),
        None => (raw, ""),
    };
    if head.is_empty() {
        return Err(Error::MalformedTopic(format!("empty key in `{raw}`")));
    }

    let mut segments = vec![decode(head)?];
    while !rest.is_empty() {
        if segments.len() == MAX_PATH_SEGMENTS {
            return Err(Error::MalformedTopic(format!(
                "key nested deeper than {MAX_PATH_SEGMENTS} segments"
            )));
        }
        let close = match (rest.starts_with('['), rest.find(']')) {
            (true, Some(close)) => close,
            _ => return Err(Error::MalformedTopic(format!("unbalanced brackets in `{raw}`"))),
        };
        segments.push(decode(&rest[1..close])?);
        rest = &rest[close + 1..];
    }
    Ok(segments)
}

fn insert(node: &mut Value, segments: &[String], value: Value, raw: &str) -> Result<(), Error> {
    let conflict = || Error::MalformedTopic(format!("conflicting key `{raw}`"));

    let map = node.as_object_mut().ok_or_else(conflict)?;
    let (first, rest) = match segments.split_first() {
        Some(split) => split,
        None => return Err(conflict()),
    };

    if rest.is_empty() {
        if map.contains_key(first) {
            return Err(conflict());
        }
        map.insert(first.clone(), value);
        return Ok(());
    }

    let child = map
        .entry(first.clone())
        .or_insert_with(|| Value::Object(Map::new()));
    insert(child, rest, value, raw)
}

fn restore_arrays(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let is_sequence = !map.is_empty()
                && (0..map.len()).all(|i| map.contains_key(&i.to_string()));
            if is_sequence {
                let mut map = map;
                let items = (0..map.len())
                    .filter_map(|i| map.remove(&i.to_string()))
                    .map(restore_arrays)
                    .collect();
                Value::Array(items)
            } else {
                Value::Object(
                    map.into_iter()
                        .map(|(k, v)| (k, restore_arrays(v)))
                        .collect(),
                )
            }
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_flatten_nested_with() {
        let value = json!({"with": {"comments": {"with": {"author": true}}}});
        assert_eq!(
            canonical_query(&value),
            "with[comments][with][author]=true"
        );
    }

    #[test]
    fn test_flatten_ignores_key_order() {
        let a: Value =
            serde_json::from_str(r#"{"where":{"status":"draft","views":5},"limit":10}"#).unwrap();
        let b: Value =
            serde_json::from_str(r#"{"limit":10,"where":{"views":5,"status":"draft"}}"#).unwrap();
        assert_eq!(canonical_query(&a), canonical_query(&b));
    }

    #[test]
    fn test_string_and_number_leaves_differ() {
        let a = json!({"where": {"views": 5}});
        let b = json!({"where": {"views": "5"}});
        assert_ne!(canonical_query(&a), canonical_query(&b));
    }

    #[test]
    fn test_unflatten_restores_structure() {
        let value = json!({
            "where": {"or": [{"status": "draft"}, {"deletedAt": null}], "tags": []},
            "with": {"author": true},
            "limit": 10
        });
        let query = canonical_query(&value);
        assert_eq!(unflatten(&query).unwrap(), value);
    }

    #[test]
    fn test_unflatten_lenient_plain_strings() {
        let value = unflatten("locale=en&with[author]=true").unwrap();
        assert_eq!(value, json!({"locale": "en", "with": {"author": true}}));
    }

    #[test]
    fn test_unflatten_rejects_conflicts() {
        assert!(matches!(
            unflatten("with=true&with[author]=true"),
            Err(Error::MalformedTopic(_))
        ));
        assert!(matches!(
            unflatten("with[author=true"),
            Err(Error::MalformedTopic(_))
        ));
    }

    #[test]
    fn test_unflatten_rejects_deep_nesting() {
        let deep = format!("where{}=1", "[a]".repeat(3_000));
        assert!(matches!(unflatten(&deep), Err(Error::MalformedTopic(_))));

        let at_limit = format!("where{}=1", "[a]".repeat(MAX_PATH_SEGMENTS - 1));
        assert!(unflatten(&at_limit).is_ok());
        let over_limit = format!("where{}=1", "[a]".repeat(MAX_PATH_SEGMENTS));
        assert!(unflatten(&over_limit).is_err());
    }

    #[test]
    fn test_keys_with_brackets_are_escaped() {
        let value = json!({"where": {"a[b]": 1}});
        let query = canonical_query(&value);
        assert!(query.starts_with("where[a%5Bb%5D]="));
        assert_eq!(unflatten(&query).unwrap(), value);
    }
}
