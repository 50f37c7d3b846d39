/*!
    Generic list/detail rendering for resource records, plus the schema graph view.

    Backends wrap collections differently. [`extract_records`] is the one
    place that knows the accepted shapes; see [`RECORD_SHAPES`] for the order
    they are tried in.
*/

use crate::schema::{ref_name, SchemaDictionary};
use serde_json::Value;
use std::fmt::Write as _;

const MAX_CELL_WIDTH: usize = 40;

/// Accepted collection shapes, tried in order:
/// 1. a top-level array,
/// 2. an object with a `data` array,
/// 3. an object with a `Data` array.
pub const RECORD_SHAPES: &[Option<&str>] = &[None, Some("data"), Some("Data")];

/// Pull the record array out of a list response.
pub fn extract_records(response: &Value) -> Option<&Vec<Value>> {
    RECORD_SHAPES.iter().find_map(|shape| match shape {
        None => response.as_array(),
        Some(key) => response.get(*key).and_then(Value::as_array),
    })
}

/// Unwrap a single-record response: `{data: {...}}` / `{Data: {...}}` or the object itself.
pub fn extract_record(response: &Value) -> &Value {
    ["data", "Data"]
        .iter()
        .find_map(|key| response.get(*key).filter(|v| v.is_object()))
        .unwrap_or(response)
}

/// Columns for `records`: `explicit` when given, otherwise every key in first-seen order.
pub fn infer_columns(records: &[Value], explicit: Option<&[String]>) -> Vec<String> {
    if let Some(columns) = explicit.filter(|c| !c.is_empty()) {
        return columns.to_vec();
    }
    let mut columns: Vec<String> = Vec::new();
    for record in records {
        if let Some(fields) = record.as_object() {
            for key in fields.keys() {
                if !columns.contains(key) {
                    columns.push(key.clone());
                }
            }
        }
    }
    columns
}

/// Display text for one cell.
pub fn cell_text(value: Option<&Value>) -> String {
    let text = match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    };
    truncate(&text.replace('\n', " "), MAX_CELL_WIDTH)
}

fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() <= width {
        return text.to_string();
    }
    let mut out: String = text.chars().take(width.saturating_sub(1)).collect();
    out.push('…');
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl AutoTable {
    pub fn new(records: &[Value], explicit: Option<&[String]>) -> Self {
        let columns = infer_columns(records, explicit);
        let rows = records
            .iter()
            .map(|record| columns.iter().map(|c| cell_text(record.get(c))).collect())
            .collect();
        AutoTable { columns, rows }
    }

    pub fn render(&self) -> String {
        if self.columns.is_empty() {
            return "(no records)\n".to_string();
        }
        let widths: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| {
                self.rows
                    .iter()
                    .map(|r| r[i].chars().count())
                    .chain(std::iter::once(c.chars().count()))
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = String::new();
        let line = |cells: &[String]| -> String {
            cells
                .iter()
                .zip(&widths)
                .map(|(cell, w)| format!("{:<width$}", cell, width = *w))
                .collect::<Vec<_>>()
                .join("  ")
                .trim_end()
                .to_string()
        };
        let _ = writeln!(out, "{}", line(&self.columns));
        let _ = writeln!(
            out,
            "{}",
            widths.iter().map(|w| "-".repeat(*w)).collect::<Vec<_>>().join("  ")
        );
        for row in &self.rows {
            let _ = writeln!(out, "{}", line(row));
        }
        out
    }
}

/// Key/value listing of a single record.
pub fn render_detail(record: &Value) -> String {
    let Some(fields) = record.as_object() else {
        return format!("{}\n", record);
    };
    let width = fields.keys().map(|k| k.chars().count()).max().unwrap_or(0);
    let mut out = String::new();
    for (key, value) in fields {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let _ = writeln!(out, "{:<width$}  {}", key, text, width = width);
    }
    out
}

/// One reference from a schema property to another named schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaEdge {
    pub from: String,
    pub property: String,
    pub to: String,
}

/// Reference graph between the named schemas of a spec.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphView {
    pub nodes: Vec<String>,
    pub edges: Vec<SchemaEdge>,
}

impl GraphView {
    pub fn from_dictionary(schemas: &SchemaDictionary) -> Self {
        let nodes: Vec<String> = schemas.names().map(str::to_string).collect();
        let mut edges = Vec::new();
        for (name, schema) in schemas.iter() {
            if let Some(properties) = schema.get("properties").and_then(Value::as_object) {
                for (property, property_schema) in properties {
                    let mut targets = Vec::new();
                    collect_refs(property_schema, &mut targets);
                    for target in targets {
                        edges.push(SchemaEdge {
                            from: name.to_string(),
                            property: property.clone(),
                            to: target,
                        });
                    }
                }
            }
            if let Some(parts) = schema.get("allOf").and_then(Value::as_array) {
                for part in parts {
                    if let Some(reference) = part.get("$ref").and_then(Value::as_str) {
                        edges.push(SchemaEdge {
                            from: name.to_string(),
                            property: "allOf".to_string(),
                            to: ref_name(reference).to_string(),
                        });
                    }
                }
            }
        }
        GraphView { nodes, edges }
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for node in &self.nodes {
            let _ = writeln!(out, "{}", node);
            for edge in self.edges.iter().filter(|e| &e.from == node) {
                let _ = writeln!(out, "  {} -> {}", edge.property, edge.to);
            }
        }
        out
    }

    pub fn to_dot(&self) -> String {
        let mut out = String::from("digraph schemas {\n");
        for node in &self.nodes {
            let _ = writeln!(out, "  \"{}\";", node);
        }
        for edge in &self.edges {
            let _ = writeln!(out, "  \"{}\" -> \"{}\" [label=\"{}\"];", edge.from, edge.to, edge.property);
        }
        out.push_str("}\n");
        out
    }
}

fn collect_refs(schema: &Value, out: &mut Vec<String>) {
    match schema {
        Value::Object(map) => {
            if let Some(reference) = map.get("$ref").and_then(Value::as_str) {
                let name = ref_name(reference).to_string();
                if !out.contains(&name) {
                    out.push(name);
                }
            }
            for key in ["items", "additionalProperties"] {
                if let Some(nested) = map.get(key) {
                    collect_refs(nested, out);
                }
            }
            for key in ["allOf", "oneOf", "anyOf"] {
                if let Some(alternatives) = map.get(key).and_then(Value::as_array) {
                    for alt in alternatives {
                        collect_refs(alt, out);
                    }
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|item| collect_refs(item, out)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn record_shapes_in_order() {
        let plain = json!([{"id": 1}]);
        let wrapped = json!({"data": [{"id": 2}], "Data": [{"id": 3}]});
        let upper = json!({"Data": [{"id": 3}]});
        assert_eq!(extract_records(&plain).unwrap()[0]["id"], 1);
        assert_eq!(extract_records(&wrapped).unwrap()[0]["id"], 2);
        assert_eq!(extract_records(&upper).unwrap()[0]["id"], 3);
        assert_eq!(extract_records(&json!({"items": []})), None);
    }

    #[test]
    fn single_record_unwrap() {
        let wrapped = json!({"data": {"id": 1}});
        assert_eq!(extract_record(&wrapped), &json!({"id": 1}));
        let bare = json!({"id": 2, "data": "x"});
        assert_eq!(extract_record(&bare), &bare);
    }

    #[test]
    fn columns_union_in_first_seen_order() {
        let records = vec![json!({"id": 1, "title": "Dune"}), json!({"id": 2, "author": "Herbert"})];
        assert_eq!(infer_columns(&records, None), ["id", "title", "author"]);
        let explicit = vec!["title".to_string()];
        assert_eq!(infer_columns(&records, Some(&explicit)), ["title"]);
    }

    #[test]
    fn renders_table() {
        let records = vec![
            json!({"id": 1, "title": "Dune", "tags": ["sf"]}),
            json!({"id": 22, "title": null}),
        ];
        let table = AutoTable::new(&records, None);
        assert_eq!(
            table.render(),
            indoc! {r#"
                id  title  tags
                --  -----  ------
                1   Dune   ["sf"]
                22
            "#}
        );
    }

    #[test]
    fn long_cells_are_truncated() {
        let text = cell_text(Some(&json!("x".repeat(100))));
        assert_eq!(text.chars().count(), MAX_CELL_WIDTH);
        assert!(text.ends_with('…'));
    }

    #[test]
    fn renders_detail() {
        let record = json!({"id": 7, "title": "Emma", "isbn": null});
        assert_eq!(render_detail(&record), "id     7\ntitle  Emma\nisbn   \n");
    }

    #[test]
    fn schema_graph() {
        let Value::Object(map) = json!({
            "Book": {"properties": {
                "category": {"$ref": "#/components/schemas/Category"},
                "authors": {"type": "array", "items": {"$ref": "#/components/schemas/Author"}}
            }},
            "Category": {"properties": {"parent": {"$ref": "#/components/schemas/Category"}}},
            "Author": {"type": "object"}
        }) else {
            unreachable!()
        };
        let graph = GraphView::from_dictionary(&SchemaDictionary::new(map));
        assert_eq!(graph.nodes, ["Book", "Category", "Author"]);
        assert_eq!(graph.edges.len(), 3);
        assert_eq!(
            graph.render(),
            "Book\n  category -> Category\n  authors -> Author\nCategory\n  parent -> Category\nAuthor\n"
        );
        assert!(graph.to_dot().contains("\"Book\" -> \"Author\" [label=\"authors\"];"));
    }
}
