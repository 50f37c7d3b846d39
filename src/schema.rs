/*!
    JSON-schema helpers shared by the normalizer, the runner and the form builder.

    `resolve` follows a single `$ref` against the spec's schema dictionary and
    `synthesize` walks a schema to build a representative example value. A
    `$ref` that points nowhere is not an error: both functions return `None`
    and callers degrade to an empty sample or an empty form.
*/

use log::warn;
use serde_json::{Map, Value};

/// Reference prefixes understood by [`resolve`].
const REF_PREFIXES: &[&str] = &["#/components/schemas/", "#/definitions/"];

/// Recursion depth past the root at which [`synthesize`] gives up.
pub const MAX_SAMPLE_DEPTH: usize = 4;

/// Named schemas from `components.schemas` (v3) or `definitions` (v2).
///
/// Read-only once a spec is loaded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDictionary {
    schemas: Map<String, Value>,
}

impl SchemaDictionary {
    pub fn new(schemas: Map<String, Value>) -> Self {
        SchemaDictionary { schemas }
    }

    /// Pull the dictionary out of a parsed OpenAPI v3 or Swagger v2 document.
    pub fn from_document(document: &Value) -> Self {
        let schemas = document
            .pointer("/components/schemas")
            .or_else(|| document.get("definitions"))
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        SchemaDictionary { schemas }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.schemas.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.schemas.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

/// Name a `$ref` string points at, with the known prefixes stripped.
///
/// A single-segment local ref names its target directly (`#/Node` names `Node`).
/// Any other pointer, such as `#/components/responses/Book`, is returned whole
/// and never matches a dictionary entry.
pub fn ref_name(reference: &str) -> &str {
    if let Some(name) = REF_PREFIXES.iter().find_map(|prefix| reference.strip_prefix(prefix)) {
        return name;
    }
    match reference.strip_prefix("#/") {
        Some(name) if !name.is_empty() && !name.contains('/') => name,
        _ => reference,
    }
}

/// Resolve a schema that may be a `$ref` against `dictionary`.
///
/// Inline schemas come back unchanged. A dangling reference yields `None`.
pub fn resolve<'a>(schema: &'a Value, dictionary: &'a SchemaDictionary) -> Option<&'a Value> {
    match schema.get("$ref").and_then(Value::as_str) {
        Some(reference) => {
            let resolved = dictionary.get(ref_name(reference));
            if resolved.is_none() {
                warn!("Unresolved schema reference: {}", reference);
            }
            resolved
        }
        None => Some(schema),
    }
}

/// Build an example value for `schema`.
///
/// Returns `None` when the schema cannot be resolved or when the walk goes
/// deeper than [`MAX_SAMPLE_DEPTH`] levels below the root.
pub fn synthesize(schema: &Value, dictionary: &SchemaDictionary) -> Option<Value> {
    synthesize_at(schema, dictionary, 0)
}

fn synthesize_at(schema: &Value, dictionary: &SchemaDictionary, depth: usize) -> Option<Value> {
    if depth > MAX_SAMPLE_DEPTH {
        return None;
    }
    let schema = resolve(schema, dictionary)?;
    // ref to a ref
    if schema.get("$ref").is_some() {
        return synthesize_at(schema, dictionary, depth + 1);
    }

    if let Some(example) = schema.get("example") {
        return Some(example.clone());
    }
    if let Some(default) = schema.get("default") {
        return Some(default.clone());
    }
    if let Some(first) = schema.get("enum").and_then(Value::as_array).and_then(|e| e.first()) {
        return Some(first.clone());
    }

    if let Some(parts) = schema.get("allOf").and_then(Value::as_array) {
        return Some(merge_all_of(parts, dictionary, depth));
    }
    if let Some(first) = ["oneOf", "anyOf"]
        .iter()
        .find_map(|key| schema.get(*key).and_then(Value::as_array).and_then(|alts| alts.first()))
    {
        return synthesize_at(first, dictionary, depth);
    }

    let kind = schema_type(schema);
    if kind == Some("object") || schema.get("properties").is_some() {
        return Some(Value::Object(synthesize_properties(schema, dictionary, depth)));
    }

    match kind {
        Some("array") => {
            let items = match schema.get("items") {
                Some(items) => synthesize_at(items, dictionary, depth + 1).into_iter().collect(),
                None => Vec::new(),
            };
            Some(Value::Array(items))
        }
        Some("integer") | Some("number") => Some(Value::from(0)),
        Some("boolean") => Some(Value::Bool(true)),
        _ => Some(Value::String(string_for_format(
            schema.get("format").and_then(Value::as_str),
        ))),
    }
}

fn synthesize_properties(schema: &Value, dictionary: &SchemaDictionary, depth: usize) -> Map<String, Value> {
    let mut out = Map::new();
    if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
        for (name, property) in properties {
            // Values past the depth bound are dropped, as JSON would drop an undefined.
            if let Some(value) = synthesize_at(property, dictionary, depth + 1) {
                out.insert(name.clone(), value);
            }
        }
    }
    out
}

fn merge_all_of(parts: &[Value], dictionary: &SchemaDictionary, depth: usize) -> Value {
    let mut merged = Map::new();
    for part in parts {
        match synthesize_at(part, dictionary, depth + 1) {
            Some(Value::Object(fields)) => merged.extend(fields),
            Some(other) if merged.is_empty() => return other,
            _ => {}
        }
    }
    Value::Object(merged)
}

/// The schema's `type`, taking the first non-null entry of a type array.
pub fn schema_type(schema: &Value) -> Option<&str> {
    match schema.get("type")? {
        Value::String(kind) => Some(kind.as_str()),
        Value::Array(kinds) => kinds.iter().filter_map(Value::as_str).find(|k| *k != "null"),
        _ => None,
    }
}

fn string_for_format(format: Option<&str>) -> String {
    match format {
        Some("date-time") => "1970-01-01T00:00:00Z",
        Some("date") => "1970-01-01",
        Some("email") => "user@example.com",
        Some("uuid") => "00000000-0000-0000-0000-000000000000",
        Some("uri") | Some("url") => "https://example.com",
        _ => "",
    }
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn dictionary(value: Value) -> SchemaDictionary {
        match value {
            Value::Object(map) => SchemaDictionary::new(map),
            _ => panic!("dictionary fixture must be an object"),
        }
    }

    fn library() -> SchemaDictionary {
        dictionary(json!({
            "Book": {
                "type": "object",
                "required": ["title"],
                "properties": {
                    "title": {"type": "string", "example": "Dune"},
                    "pages": {"type": "integer"},
                    "available": {"type": "boolean"},
                    "status": {"type": "string", "enum": ["shelved", "loaned"]},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "category": {"$ref": "#/components/schemas/Category"}
                }
            },
            "Category": {
                "type": "object",
                "properties": {"name": {"type": "string", "default": "fiction"}}
            },
            "Node": {
                "properties": {"child": {"$ref": "#/Node"}}
            }
        }))
    }

    #[test]
    fn resolves_both_prefixes() {
        let dict = library();
        let v3 = json!({"$ref": "#/components/schemas/Book"});
        let v2 = json!({"$ref": "#/definitions/Book"});
        assert_eq!(resolve(&v3, &dict), dict.get("Book"));
        assert_eq!(resolve(&v2, &dict), dict.get("Book"));
    }

    #[test]
    fn missing_ref_resolves_to_none() {
        let dict = library();
        let schema = json!({"$ref": "#/components/schemas/Missing"});
        assert_eq!(resolve(&schema, &dict), None);
        assert_eq!(synthesize(&schema, &dict), None);
    }

    #[test]
    fn only_schema_pointers_name_schemas() {
        let dict = library();
        assert_eq!(ref_name("#/Node"), "Node");
        assert_eq!(ref_name("#/components/responses/Book"), "#/components/responses/Book");
        assert_eq!(resolve(&json!({"$ref": "#/components/responses/Book"}), &dict), None);
        assert_eq!(resolve(&json!({"$ref": "#/parameters/Book"}), &dict), None);
        assert!(resolve(&json!({"$ref": "#/Book"}), &dict).is_some());
    }

    #[test]
    fn inline_schema_is_returned_unchanged() {
        let dict = library();
        let schema = json!({"type": "string"});
        assert_eq!(resolve(&schema, &dict), Some(&schema));
    }

    #[test]
    fn resolution_is_idempotent() {
        let dict = library();
        for schema in [
            json!({"$ref": "#/components/schemas/Book"}),
            json!({"$ref": "#/definitions/Category"}),
            json!({"type": "integer"}),
        ] {
            let once = resolve(&schema, &dict).unwrap();
            let twice = resolve(once, &dict).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn synthesizes_book_in_declaration_order() {
        let dict = library();
        let sample = synthesize(&json!({"$ref": "#/components/schemas/Book"}), &dict).unwrap();
        assert_eq!(
            sample,
            json!({
                "title": "Dune",
                "pages": 0,
                "available": true,
                "status": "shelved",
                "tags": [""],
                "category": {"name": "fiction"}
            })
        );
        let keys: Vec<&String> = sample.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["title", "pages", "available", "status", "tags", "category"]);
    }

    #[test]
    fn cyclic_reference_stops_at_depth_bound() {
        let dict = library();
        let sample = synthesize(&json!({"$ref": "#/Node"}), &dict).unwrap();

        let mut levels = 0;
        let mut cursor = &sample;
        while let Some(obj) = cursor.as_object() {
            levels += 1;
            match obj.get("child") {
                Some(child) => cursor = child,
                None => break,
            }
        }
        assert_eq!(levels, MAX_SAMPLE_DEPTH + 1);
        // round-trips through text
        let text = serde_json::to_string(&sample).unwrap();
        assert_eq!(serde_json::from_str::<Value>(&text).unwrap(), sample);
    }

    #[test]
    fn array_of_unresolvable_items_is_empty() {
        let dict = library();
        let schema = json!({"type": "array", "items": {"$ref": "#/definitions/Nope"}});
        assert_eq!(synthesize(&schema, &dict), Some(json!([])));
    }

    #[test]
    fn primitive_defaults() {
        let dict = SchemaDictionary::default();
        assert_eq!(synthesize(&json!({"type": "number"}), &dict), Some(json!(0)));
        assert_eq!(synthesize(&json!({"type": "boolean"}), &dict), Some(json!(true)));
        assert_eq!(synthesize(&json!({}), &dict), Some(json!("")));
        assert_eq!(synthesize(&json!({"type": ["integer", "null"]}), &dict), Some(json!(0)));
        assert_eq!(
            synthesize(&json!({"type": "string", "format": "email"}), &dict),
            Some(json!("user@example.com"))
        );
    }

    #[test]
    fn example_beats_default() {
        let dict = SchemaDictionary::default();
        let schema = json!({"type": "integer", "example": 7, "default": 3});
        assert_eq!(synthesize(&schema, &dict), Some(json!(7)));
    }

    #[test]
    fn all_of_merges_members() {
        let dict = library();
        let schema = json!({
            "allOf": [
                {"$ref": "#/components/schemas/Category"},
                {"type": "object", "properties": {"id": {"type": "integer"}}}
            ]
        });
        assert_eq!(synthesize(&schema, &dict), Some(json!({"name": "fiction", "id": 0})));
    }

    #[test]
    fn dictionary_from_v2_document() {
        let doc = json!({"swagger": "2.0", "definitions": {"Reader": {"type": "object"}}});
        let dict = SchemaDictionary::from_document(&doc);
        assert_eq!(dict.names().collect::<Vec<_>>(), ["Reader"]);
    }
}
