/*!
    OpenAPI / Swagger normalization.

    This module turns a raw OpenAPI v3 or Swagger v2 document into a
    version-agnostic [`NormalizedSpec`]: a flat list of endpoints, the tag
    registry, and document metadata including the schema dictionary.

    Individual malformed operations never fail the whole document; they are
    normalized as far as possible. Only a document with nothing to read is
    rejected with [`AppError::EmptySpec`].
*/

use crate::error::{AppError, AppResult};
use crate::schema::SchemaDictionary;
use log::{debug, info, warn};
use serde::{Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, RwLock};

/// HTTP methods recognized under a path item, in emission order.
const HTTP_METHODS: &[&str] = &["get", "post", "put", "delete", "patch", "options", "head"];

const DEFAULT_CONTENT_TYPE: &str = "application/json";
const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
}

impl HttpMethod {
    pub fn parse(method: &str) -> Option<Self> {
        match method.to_ascii_lowercase().as_str() {
            "get" => Some(HttpMethod::Get),
            "post" => Some(HttpMethod::Post),
            "put" => Some(HttpMethod::Put),
            "delete" => Some(HttpMethod::Delete),
            "patch" => Some(HttpMethod::Patch),
            "options" => Some(HttpMethod::Options),
            "head" => Some(HttpMethod::Head),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Head => "HEAD",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Grouping key of an endpoint.
///
/// `Untagged` renders as `default` but is never equal to a real tag that
/// happens to be called `default`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EndpointTag {
    Named(String),
    Untagged,
}

impl EndpointTag {
    pub const UNTAGGED_LABEL: &'static str = "default";

    pub fn label(&self) -> &str {
        match self {
            EndpointTag::Named(name) => name,
            EndpointTag::Untagged => Self::UNTAGGED_LABEL,
        }
    }

    pub fn is_untagged(&self) -> bool {
        matches!(self, EndpointTag::Untagged)
    }
}

impl fmt::Display for EndpointTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointTag::Named(name) => f.write_str(name),
            EndpointTag::Untagged => write!(f, "({})", Self::UNTAGGED_LABEL),
        }
    }
}

impl Serialize for EndpointTag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EndpointTag::Named(name) => serializer.serialize_some(name),
            EndpointTag::Untagged => serializer.serialize_none(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamLocation {
    Path,
    Query,
    Header,
    Cookie,
}

impl ParamLocation {
    pub fn parse(location: &str) -> Option<Self> {
        match location {
            "path" => Some(ParamLocation::Path),
            "query" => Some(ParamLocation::Query),
            "header" => Some(ParamLocation::Header),
            "cookie" => Some(ParamLocation::Cookie),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamLocation::Path => "path",
            ParamLocation::Query => "query",
            ParamLocation::Header => "header",
            ParamLocation::Cookie => "cookie",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub location: ParamLocation,
    pub required: bool,
    pub schema: Value,
    pub description: Option<String>,
}

impl Parameter {
    /// `location:name`, the key parameters are deduplicated by.
    pub fn key(&self) -> String {
        format!("{}:{}", self.location.as_str(), self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestBody {
    pub content_type: String,
    pub schema: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedEndpoint {
    /// `"{METHOD} {path}"`.
    pub id: String,
    pub path: String,
    pub method: HttpMethod,
    pub tag: EndpointTag,
    pub operation_id: Option<String>,
    /// Declared summary, or a fallback derived from the operation id or path.
    pub summary: String,
    pub description: Option<String>,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    pub requires_auth: bool,
    pub deprecated: bool,
}

impl NormalizedEndpoint {
    pub fn parameters_in(&self, location: ParamLocation) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(move |p| p.location == location)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagInfo {
    pub name: EndpointTag,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecMeta {
    pub title: String,
    pub version: String,
    pub server_url: String,
    pub schemas: SchemaDictionary,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedSpec {
    pub endpoints: Vec<NormalizedEndpoint>,
    pub tags: Vec<TagInfo>,
    pub meta: SpecMeta,
}

impl NormalizedSpec {
    pub fn endpoint(&self, id: &str) -> Option<&NormalizedEndpoint> {
        self.endpoints.iter().find(|e| e.id == id)
    }

    /// Find the endpoint for `method` + raw path template.
    pub fn find(&self, method: HttpMethod, path: &str) -> Option<&NormalizedEndpoint> {
        self.endpoints.iter().find(|e| e.method == method && e.path == path)
    }
}

/// Decode raw spec text: JSON first, YAML when JSON fails.
pub fn parse_document(text: &str) -> AppResult<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value) => Ok(value),
        Err(json_err) => {
            debug!("Spec is not JSON ({}), trying YAML", json_err);
            Ok(serde_yaml::from_str::<Value>(text)?)
        }
    }
}

/// Decode and normalize in one step.
pub fn load_text(text: &str) -> AppResult<NormalizedSpec> {
    normalize(&parse_document(text)?)
}

/// Normalize a parsed OpenAPI v3 or Swagger v2 document.
pub fn normalize(document: &Value) -> AppResult<NormalizedSpec> {
    let root = match document.as_object() {
        Some(root) if !root.is_empty() => root,
        _ => return Err(AppError::EmptySpec),
    };
    let paths = root
        .get("paths")
        .and_then(Value::as_object)
        .ok_or(AppError::EmptySpec)?;

    let tag_descriptions = declared_tag_descriptions(document);
    let document_consumes = string_list(document.get("consumes"));
    let document_security = document.get("security");

    let mut endpoints: Vec<NormalizedEndpoint> = Vec::new();
    let mut tags: Vec<TagInfo> = Vec::new();
    let mut seen_ids: HashSet<String> = HashSet::new();

    for (path, path_item) in paths {
        let Some(item) = path_item.as_object() else {
            warn!("Skipping path {} with non-object item", path);
            continue;
        };
        let shared_params = item.get("parameters");

        for method_key in HTTP_METHODS {
            let Some(operation) = item.get(*method_key).filter(|op| op.is_object()) else {
                continue;
            };
            let Some(method) = HttpMethod::parse(method_key) else {
                continue;
            };

            let tag = operation
                .get("tags")
                .and_then(Value::as_array)
                .and_then(|t| t.first())
                .and_then(Value::as_str)
                .map(|name| EndpointTag::Named(name.to_string()))
                .unwrap_or(EndpointTag::Untagged);
            if !tags.iter().any(|t| t.name == tag) {
                let description = match &tag {
                    EndpointTag::Named(name) => tag_descriptions
                        .iter()
                        .find(|(n, _)| n == name)
                        .and_then(|(_, d)| d.clone()),
                    EndpointTag::Untagged => None,
                };
                tags.push(TagInfo { name: tag.clone(), description });
            }

            // Collect every tag the operation declares, not just the grouping one.
            for extra in string_list(operation.get("tags")).into_iter().skip(1) {
                let extra_tag = EndpointTag::Named(extra);
                if !tags.iter().any(|t| t.name == extra_tag) {
                    let description = tag_descriptions
                        .iter()
                        .find(|(n, _)| n == extra_tag.label())
                        .and_then(|(_, d)| d.clone());
                    tags.push(TagInfo { name: extra_tag, description });
                }
            }

            let operation_id = operation
                .get("operationId")
                .and_then(Value::as_str)
                .map(str::to_string);
            let summary = operation
                .get("summary")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .map(str::to_string)
                .or_else(|| operation_id.clone())
                .unwrap_or_else(|| format!("{} {}", method, path));

            let mut id = format!("{} {}", method, path);
            if !seen_ids.insert(id.clone()) {
                let mut n = 2;
                while seen_ids.contains(&format!("{id}#{n}")) {
                    n += 1;
                }
                warn!("Duplicate endpoint {}, keeping it as {}#{}", id, id, n);
                id = format!("{id}#{n}");
                seen_ids.insert(id.clone());
            }

            let parameters = merge_parameters(document, shared_params, operation.get("parameters"));
            let request_body = extract_request_body(document, shared_params, operation, &document_consumes);
            let requires_auth = requires_auth(operation.get("security"), document_security);

            endpoints.push(NormalizedEndpoint {
                id,
                path: path.clone(),
                method,
                tag,
                operation_id,
                summary,
                description: operation
                    .get("description")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                parameters,
                request_body,
                requires_auth,
                deprecated: operation
                    .get("deprecated")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            });
        }
    }

    let meta = SpecMeta {
        title: document
            .pointer("/info/title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        version: document
            .pointer("/info/version")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        server_url: server_url(document),
        schemas: SchemaDictionary::from_document(document),
    };
    info!(
        "Normalized spec '{}' {}: {} endpoints, {} tags, {} schemas",
        meta.title,
        meta.version,
        endpoints.len(),
        tags.len(),
        meta.schemas.len()
    );
    Ok(NormalizedSpec { endpoints, tags, meta })
}

/// Server base URL: v3 `servers[0].url`, else v2 `scheme://host+basePath`, else empty.
pub fn server_url(document: &Value) -> String {
    if let Some(url) = document.pointer("/servers/0/url").and_then(Value::as_str) {
        return url.to_string();
    }
    if let Some(host) = document.get("host").and_then(Value::as_str) {
        let scheme = document
            .pointer("/schemes/0")
            .and_then(Value::as_str)
            .unwrap_or("https");
        let base_path = document.get("basePath").and_then(Value::as_str).unwrap_or("");
        return format!("{scheme}://{host}{base_path}");
    }
    String::new()
}

fn declared_tag_descriptions(document: &Value) -> Vec<(String, Option<String>)> {
    document
        .get("tags")
        .and_then(Value::as_array)
        .map(|declared| {
            declared
                .iter()
                .filter_map(|t| {
                    let name = t.get("name")?.as_str()?.to_string();
                    let description = t.get("description").and_then(Value::as_str).map(str::to_string);
                    Some((name, description))
                })
                .collect()
        })
        .unwrap_or_default()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
        .unwrap_or_default()
}

/// `security` on the operation wins; otherwise the document default applies.
/// Only an explicitly empty list opts out.
fn requires_auth(operation: Option<&Value>, document: Option<&Value>) -> bool {
    let declared = operation.or(document);
    !matches!(declared.and_then(Value::as_array), Some(list) if list.is_empty())
}

/// Follow a local `$ref` (parameters, request bodies) with a JSON pointer.
fn follow_local_ref<'a>(document: &'a Value, value: &'a Value) -> &'a Value {
    match value.get("$ref").and_then(Value::as_str) {
        Some(reference) => match reference.strip_prefix('#').and_then(|ptr| document.pointer(ptr)) {
            Some(target) => target,
            None => {
                warn!("Unresolved reference {}", reference);
                value
            }
        },
        None => value,
    }
}

/// Union path-item and operation parameters; operation wins on `location:name`.
///
/// Body and formData parameters are request-body material and are left out.
pub fn merge_parameters(document: &Value, path_level: Option<&Value>, operation_level: Option<&Value>) -> Vec<Parameter> {
    let mut merged: Vec<Parameter> = Vec::new();
    for source in [path_level, operation_level].into_iter().flatten() {
        let Some(list) = source.as_array() else {
            continue;
        };
        for raw in list {
            let Some(param) = parse_parameter(follow_local_ref(document, raw)) else {
                continue;
            };
            match merged.iter_mut().find(|p| p.location == param.location && p.name == param.name) {
                Some(existing) => *existing = param,
                None => merged.push(param),
            }
        }
    }
    merged
}

fn parse_parameter(raw: &Value) -> Option<Parameter> {
    let name = raw.get("name")?.as_str()?.to_string();
    let location_str = raw.get("in")?.as_str()?;
    if location_str == "body" || location_str == "formData" {
        return None;
    }
    let Some(location) = ParamLocation::parse(location_str) else {
        warn!("Ignoring parameter {} with unknown location {}", name, location_str);
        return None;
    };
    let required = location == ParamLocation::Path
        || raw.get("required").and_then(Value::as_bool).unwrap_or(false);
    Some(Parameter {
        name,
        location,
        required,
        schema: raw.get("schema").cloned().unwrap_or_else(|| inline_v2_schema(raw)),
        description: raw.get("description").and_then(Value::as_str).map(str::to_string),
    })
}

/// Swagger v2 keeps simple parameter schemas inline on the parameter object.
fn inline_v2_schema(raw: &Value) -> Value {
    let mut schema = Map::new();
    for key in ["type", "format", "items", "enum", "default", "example", "minimum", "maximum"] {
        if let Some(v) = raw.get(key) {
            schema.insert(key.to_string(), v.clone());
        }
    }
    if !schema.contains_key("type") {
        schema.insert("type".to_string(), json!("string"));
    }
    Value::Object(schema)
}

/// Request body from v3 `requestBody.content`, or from v2 `in: body` / `formData` parameters.
///
/// v2 parameters are merged like [`merge_parameters`]: path-item first, the
/// operation's own replace them on `in:name`.
pub fn extract_request_body(
    document: &Value,
    path_level: Option<&Value>,
    operation: &Value,
    document_consumes: &[String],
) -> Option<RequestBody> {
    if let Some(raw) = operation.get("requestBody") {
        let body = follow_local_ref(document, raw);
        let (content_type, media) = body
            .get("content")
            .and_then(Value::as_object)
            .and_then(|content| content.iter().next())?;
        return Some(RequestBody {
            content_type: content_type.clone(),
            schema: media.get("schema").cloned(),
        });
    }

    let mut params: Vec<&Value> = Vec::new();
    for source in [path_level, operation.get("parameters")].into_iter().flatten() {
        for raw in source.as_array().into_iter().flatten() {
            let param = follow_local_ref(document, raw);
            match params
                .iter()
                .position(|p| p.get("in") == param.get("in") && p.get("name") == param.get("name"))
            {
                Some(index) => params[index] = param,
                None => params.push(param),
            }
        }
    }
    let consumes = {
        let op_consumes = string_list(operation.get("consumes"));
        if op_consumes.is_empty() {
            document_consumes.to_vec()
        } else {
            op_consumes
        }
    };

    if let Some(body_param) = params
        .iter()
        .find(|p| p.get("in").and_then(Value::as_str) == Some("body"))
    {
        return Some(RequestBody {
            content_type: consumes
                .first()
                .cloned()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            schema: body_param.get("schema").cloned(),
        });
    }

    let form_fields: Vec<&&Value> = params
        .iter()
        .filter(|p| p.get("in").and_then(Value::as_str) == Some("formData"))
        .collect();
    if form_fields.is_empty() {
        return None;
    }
    let mut properties = Map::new();
    let mut required = Vec::new();
    for field in form_fields {
        let Some(name) = field.get("name").and_then(Value::as_str) else {
            continue;
        };
        properties.insert(name.to_string(), inline_v2_schema(field));
        if field.get("required").and_then(Value::as_bool).unwrap_or(false) {
            required.push(json!(name));
        }
    }
    Some(RequestBody {
        content_type: consumes
            .first()
            .cloned()
            .unwrap_or_else(|| FORM_CONTENT_TYPE.to_string()),
        schema: Some(json!({"type": "object", "properties": properties, "required": required})),
    })
}

/// Shared, atomically replaceable view of the currently loaded spec.
///
/// Readers hold an `Arc` snapshot; a reload swaps the whole snapshot at once.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle {
    current: Arc<RwLock<Arc<NormalizedSpec>>>,
}

impl SnapshotHandle {
    pub fn new(spec: NormalizedSpec) -> Self {
        SnapshotHandle {
            current: Arc::new(RwLock::new(Arc::new(spec))),
        }
    }

    pub fn snapshot(&self) -> Arc<NormalizedSpec> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, spec: NormalizedSpec) {
        let next = Arc::new(spec);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn empty_documents_are_rejected() {
        assert!(matches!(normalize(&Value::Null), Err(AppError::EmptySpec)));
        assert!(matches!(normalize(&json!({})), Err(AppError::EmptySpec)));
        assert!(matches!(
            normalize(&json!({"openapi": "3.0.0", "info": {"title": "x"}})),
            Err(AppError::EmptySpec)
        ));
    }

    #[test]
    fn empty_paths_object_yields_no_endpoints() {
        let spec = normalize(&json!({"openapi": "3.0.0", "paths": {}})).unwrap();
        assert!(spec.endpoints.is_empty());
    }

    #[test]
    fn yaml_fallback() {
        let text = "openapi: 3.0.0\ninfo:\n  title: Library\n  version: '1'\npaths:\n  /books:\n    get:\n      summary: List books\n";
        let spec = load_text(text).unwrap();
        assert_eq!(spec.meta.title, "Library");
        assert_eq!(spec.endpoints[0].id, "GET /books");
    }

    #[test]
    fn v2_server_url_defaults_to_https() {
        let doc = json!({"swagger": "2.0", "host": "library.local:8080", "basePath": "/api"});
        assert_eq!(server_url(&doc), "https://library.local:8080/api");
        let doc = json!({"swagger": "2.0", "host": "h", "schemes": ["http"]});
        assert_eq!(server_url(&doc), "http://h");
        assert_eq!(server_url(&json!({})), "");
    }

    #[test]
    fn summary_fallbacks() {
        let doc = json!({"paths": {
            "/a": {"get": {"operationId": "listA"}},
            "/b": {"get": {}}
        }});
        let spec = normalize(&doc).unwrap();
        assert_eq!(spec.endpoints[0].summary, "listA");
        assert_eq!(spec.endpoints[1].summary, "GET /b");
    }

    #[test]
    fn untagged_sentinel_differs_from_literal_default_tag() {
        let doc = json!({"paths": {
            "/a": {"get": {"tags": ["default"]}},
            "/b": {"get": {}}
        }});
        let spec = normalize(&doc).unwrap();
        assert_eq!(spec.tags.len(), 2);
        assert_ne!(spec.endpoints[0].tag, spec.endpoints[1].tag);
        assert_eq!(spec.endpoints[1].tag.label(), "default");
        assert!(spec.endpoints[1].tag.is_untagged());
    }

    #[test]
    fn tag_descriptions_come_from_document() {
        let doc = json!({
            "tags": [{"name": "books", "description": "Book catalogue"}],
            "paths": {
                "/books": {"get": {"tags": ["books"]}},
                "/readers": {"get": {"tags": ["readers"]}}
            }
        });
        let spec = normalize(&doc).unwrap();
        assert_eq!(spec.tags[0].description.as_deref(), Some("Book catalogue"));
        assert_eq!(spec.tags[1].description, None);
    }

    #[test]
    fn parameter_refs_are_followed() {
        let doc = json!({
            "components": {"parameters": {"Page": {"name": "page", "in": "query", "schema": {"type": "integer"}}}},
            "paths": {"/books": {"get": {"parameters": [{"$ref": "#/components/parameters/Page"}]}}}
        });
        let spec = normalize(&doc).unwrap();
        let param = &spec.endpoints[0].parameters[0];
        assert_eq!(param.name, "page");
        assert_eq!(param.schema, json!({"type": "integer"}));
    }

    #[test]
    fn v2_form_data_becomes_body() {
        let doc = json!({"swagger": "2.0", "paths": {"/login": {"post": {
            "parameters": [
                {"in": "formData", "name": "email", "type": "string", "required": true},
                {"in": "formData", "name": "password", "type": "string"}
            ]
        }}}});
        let spec = normalize(&doc).unwrap();
        let body = spec.endpoints[0].request_body.as_ref().unwrap();
        assert_eq!(body.content_type, FORM_CONTENT_TYPE);
        assert_eq!(body.schema.as_ref().unwrap()["required"], json!(["email"]));
        assert!(spec.endpoints[0].parameters.is_empty());
    }

    #[test]
    fn v2_path_level_body_parameter_is_kept() {
        let doc = json!({"swagger": "2.0", "paths": {"/books": {
            "parameters": [{"in": "body", "name": "payload", "schema": {"type": "object"}}],
            "post": {"summary": "Add"},
            "put": {
                "summary": "Replace",
                "parameters": [{"in": "body", "name": "payload", "schema": {"$ref": "#/definitions/Book"}}]
            }
        }}});
        let spec = normalize(&doc).unwrap();
        let add = spec.find(HttpMethod::Post, "/books").unwrap();
        assert_eq!(
            add.request_body,
            Some(RequestBody {
                content_type: DEFAULT_CONTENT_TYPE.to_string(),
                schema: Some(json!({"type": "object"}))
            })
        );
        assert!(add.parameters.is_empty());
        let replace = spec.find(HttpMethod::Put, "/books").unwrap();
        assert_eq!(
            replace.request_body.as_ref().unwrap().schema,
            Some(json!({"$ref": "#/definitions/Book"}))
        );
    }

    #[test]
    fn snapshot_replace_is_seen_by_every_reader() {
        let handle = SnapshotHandle::default();
        let reader = handle.clone();
        let before = reader.snapshot();
        handle.replace(normalize(&json!({"paths": {"/x": {"get": {}}}})).unwrap());
        assert!(before.endpoints.is_empty());
        assert_eq!(reader.snapshot().endpoints.len(), 1);
        assert_eq!(handle.snapshot().endpoints.len(), 1);
    }
}
