//! Strict-mode JSON schema generation for structured output.
//!
//! Schema-constrained responses require every object schema to be closed
//! (`additionalProperties: false`), every property listed in `required`
//! (nullable ones included), and no `$ref` indirection. `strict_schema`
//! rewrites a schemars draft-07 root schema into that shape in one
//! traversal.

use schemars::JsonSchema;
use serde_json::{json, Map, Value};

/// Cutoff for self-referential types; schemars has already given up on
/// truly infinite schemas before this depth.
const MAX_DEPTH: usize = 32;

pub fn schema_name<T: JsonSchema>() -> String {
    T::schema_name()
}

pub fn strict_schema<T: JsonSchema>() -> Value {
    let root = serde_json::to_value(schemars::schema_for!(T)).unwrap_or_else(|_| json!({}));
    let defs = match root.get("definitions") {
        Some(Value::Object(defs)) => defs.clone(),
        _ => Map::new(),
    };

    let mut schema = strictify(&root, &defs, 0);
    if let Value::Object(map) = &mut schema {
        map.remove("definitions");
        map.remove("$schema");
    }
    schema
}

fn strictify(node: &Value, defs: &Map<String, Value>, depth: usize) -> Value {
    if depth > MAX_DEPTH {
        return node.clone();
    }
    match node {
        Value::Object(map) => {
            // resolve indirection before rewriting the node itself
            if let Some(Value::String(reference)) = map.get("$ref") {
                if let Some(name) = reference.strip_prefix("#/definitions/") {
                    if let Some(definition) = defs.get(name) {
                        return strictify(definition, defs, depth + 1);
                    }
                }
            }
            if let Some(Value::Array(wrapped)) = map.get("allOf") {
                if let [inner] = wrapped.as_slice() {
                    return strictify(inner, defs, depth + 1);
                }
            }

            let mut out = Map::with_capacity(map.len() + 2);
            for (key, child) in map {
                out.insert(key.clone(), strictify(child, defs, depth + 1));
            }
            if out.get("type") == Some(&json!("object")) {
                out.insert("additionalProperties".to_string(), json!(false));
                if let Some(Value::Object(props)) = out.get("properties") {
                    let every_property: Vec<Value> = props.keys().map(|k| json!(k)).collect();
                    out.insert("required".to_string(), Value::Array(every_property));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| strictify(v, defs, depth)).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct DraftIdea {
        title: String,
        body: String,
        snippet: Option<String>,
    }

    #[allow(dead_code)]
    #[derive(Deserialize, JsonSchema)]
    struct IdeaBatch {
        ideas: Vec<DraftIdea>,
    }

    #[test]
    fn objects_are_closed_with_every_property_required() {
        let schema = strict_schema::<DraftIdea>();
        let obj = schema.as_object().unwrap();

        assert_eq!(obj.get("additionalProperties"), Some(&json!(false)));

        let required: Vec<&str> = obj["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|v| v.as_str())
            .collect();
        assert!(required.contains(&"title"));
        assert!(required.contains(&"body"));
        // nullable fields are still listed
        assert!(required.contains(&"snippet"));
    }

    #[test]
    fn nested_definitions_are_inlined() {
        let schema = strict_schema::<IdeaBatch>();
        let obj = schema.as_object().unwrap();

        assert!(!obj.contains_key("definitions"));
        assert!(!obj.contains_key("$schema"));

        let items = &obj["properties"]["ideas"]["items"];
        assert!(items.get("$ref").is_none());
        assert_eq!(items.get("additionalProperties"), Some(&json!(false)));
    }

    #[test]
    fn name_follows_the_type() {
        assert_eq!(schema_name::<IdeaBatch>(), "IdeaBatch");
    }
}
