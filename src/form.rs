//! Auto-generated forms for request bodies.
//!
//! Fields come from the resolved schema's declared properties. Values start
//! from a synthesized sample and every edit hands back the whole form state
//! as JSON text, which the caller drops into the request body.

use crate::schema::{resolve, schema_type, synthesize, SchemaDictionary};
use serde::Serialize;
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Number,
    Text,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FormField {
    pub name: String,
    pub kind: InputKind,
    pub required: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AutoForm {
    fields: Vec<FormField>,
    values: Map<String, Value>,
}

impl AutoForm {
    /// Build the form for `schema`. An unresolvable schema gives an empty form.
    pub fn from_schema(schema: &Value, schemas: &SchemaDictionary) -> Self {
        let Some(resolved) = resolve(schema, schemas) else {
            return AutoForm::default();
        };
        let required: Vec<&str> = resolved
            .get("required")
            .and_then(Value::as_array)
            .map(|r| r.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let fields = resolved
            .get("properties")
            .and_then(Value::as_object)
            .map(|properties| {
                properties
                    .iter()
                    .map(|(name, property)| {
                        let property = resolve(property, schemas).unwrap_or(property);
                        FormField {
                            name: name.clone(),
                            kind: match schema_type(property) {
                                Some("integer") | Some("number") => InputKind::Number,
                                _ => InputKind::Text,
                            },
                            required: required.contains(&name.as_str()),
                            description: property
                                .get("description")
                                .and_then(Value::as_str)
                                .map(str::to_string),
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let values = match synthesize(schema, schemas) {
            Some(Value::Object(sample)) => sample,
            _ => Map::new(),
        };
        AutoForm { fields, values }
    }

    pub fn fields(&self) -> &[FormField] {
        &self.fields
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn values(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Apply one edit and return the serialized form state.
    ///
    /// Number fields keep the typed number when the input parses, the raw
    /// text otherwise, so a half-typed value is never lost.
    pub fn set(&mut self, name: &str, input: &str) -> String {
        let kind = self
            .fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.kind)
            .unwrap_or(InputKind::Text);
        let value = match kind {
            InputKind::Number => parse_number(input).unwrap_or_else(|| Value::String(input.to_string())),
            InputKind::Text => Value::String(input.to_string()),
        };
        self.values.insert(name.to_string(), value);
        self.to_json()
    }

    /// Required fields that are missing or blank.
    pub fn missing_required(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.required)
            .filter(|f| match self.values.get(&f.name) {
                None | Some(Value::Null) => true,
                Some(Value::String(s)) => s.trim().is_empty(),
                Some(_) => false,
            })
            .map(|f| f.name.as_str())
            .collect()
    }

    pub fn to_json(&self) -> String {
        let state = Value::Object(self.values.clone());
        serde_json::to_string_pretty(&state).unwrap_or_else(|_| state.to_string())
    }
}

fn parse_number(input: &str) -> Option<Value> {
    let trimmed = input.trim();
    if let Ok(n) = trimmed.parse::<i64>() {
        return Some(Value::from(n));
    }
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schemas() -> SchemaDictionary {
        let Value::Object(map) = json!({
            "Reader": {
                "type": "object",
                "required": ["name", "email"],
                "properties": {
                    "name": {"type": "string", "description": "Full name"},
                    "email": {"type": "string", "format": "email"},
                    "maxLoans": {"type": "integer", "default": 3}
                }
            }
        }) else {
            unreachable!()
        };
        SchemaDictionary::new(map)
    }

    #[test]
    fn fields_follow_schema() {
        let form = AutoForm::from_schema(&json!({"$ref": "#/components/schemas/Reader"}), &schemas());
        let summary: Vec<(&str, InputKind, bool)> =
            form.fields().iter().map(|f| (f.name.as_str(), f.kind, f.required)).collect();
        assert_eq!(
            summary,
            [
                ("name", InputKind::Text, true),
                ("email", InputKind::Text, true),
                ("maxLoans", InputKind::Number, false)
            ]
        );
        assert_eq!(form.value("maxLoans"), Some(&json!(3)));
        assert_eq!(form.fields()[0].description.as_deref(), Some("Full name"));
    }

    #[test]
    fn edits_emit_whole_state() {
        let mut form = AutoForm::from_schema(&json!({"$ref": "#/definitions/Reader"}), &schemas());
        form.set("name", "Ada");
        let json_text = form.set("maxLoans", "5");
        let state: Value = serde_json::from_str(&json_text).unwrap();
        assert_eq!(state, json!({"name": "Ada", "email": "user@example.com", "maxLoans": 5}));

        let json_text = form.set("maxLoans", "5.");
        let state: Value = serde_json::from_str(&json_text).unwrap();
        assert_eq!(state["maxLoans"], json!(5.0));
    }

    #[test]
    fn missing_schema_gives_empty_form() {
        let form = AutoForm::from_schema(&json!({"$ref": "#/components/schemas/Ghost"}), &schemas());
        assert!(form.fields().is_empty());
        assert_eq!(form.to_json(), "{}");
    }

    #[test]
    fn blank_required_fields_are_reported() {
        let mut form = AutoForm::from_schema(&json!({"$ref": "#/components/schemas/Reader"}), &schemas());
        assert_eq!(form.missing_required(), ["name"]);
        form.set("name", "Grace");
        assert!(form.missing_required().is_empty());
    }
}
