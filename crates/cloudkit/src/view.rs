use std::collections::BTreeMap;

use crate::config::ViewConfig;

/// Projects `data`'s top-level fields named in `view.extracted_keys` into an
/// equality-filterable string map, or `None` if any required key is missing or not
/// a JSON scalar. Shared by every [`crate::adapter::Adapter`] implementation so
/// `map`/`unmap` behave identically regardless of backend.
#[must_use]
pub fn extract(view: &ViewConfig, data: &serde_json::Value) -> Option<BTreeMap<String, String>> {
    let object = data.as_object()?;
    let mut values = BTreeMap::new();
    for key in &view.extracted_keys {
        let value = object.get(key)?;
        let rendered = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Bool(_) | serde_json::Value::Number(_) => value.to_string(),
            _ => return None,
        };
        values.insert(key.clone(), rendered);
    }
    Some(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn view() -> ViewConfig {
        ViewConfig {
            name: "fruits_by_color".into(),
            observed_collection: "fruits".into(),
            extracted_keys: vec!["color".into()],
        }
    }

    #[test]
    fn extracts_present_string_key() {
        let data = serde_json::json!({ "color": "red", "kind": "apple" });
        let extracted = extract(&view(), &data).expect("key present");
        assert_eq!(extracted.get("color").map(String::as_str), Some("red"));
    }

    #[test]
    fn skips_document_missing_required_key() {
        let data = serde_json::json!({ "kind": "apple" });
        assert!(extract(&view(), &data).is_none());
    }

    #[test]
    fn skips_non_scalar_value() {
        let data = serde_json::json!({ "color": { "nested": true } });
        assert!(extract(&view(), &data).is_none());
    }

    #[test]
    fn renders_numeric_and_boolean_scalars() {
        let view = ViewConfig {
            name: "v".into(),
            observed_collection: "c".into(),
            extracted_keys: vec!["n".into(), "b".into()],
        };
        let data = serde_json::json!({ "n": 42, "b": true });
        let extracted = extract(&view, &data).expect("keys present");
        assert_eq!(extracted.get("n").map(String::as_str), Some("42"));
        assert_eq!(extracted.get("b").map(String::as_str), Some("true"));
    }
}
