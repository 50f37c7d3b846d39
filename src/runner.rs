/*!
    Endpoint runner: parameter/body editing and live execution of one endpoint.

    Selecting an endpoint resets all editable state synchronously and bumps
    a generation counter. A response that arrives for an older generation
    is dropped, so a late reply is never shown under a newer endpoint.
    Only one execution runs at a time; `loading` blocks a second one.
*/

use crate::error::{AppError, AppResult};
use crate::http::{ApiClient, PreparedRequest, RawResponse};
use crate::schema::{synthesize, SchemaDictionary};
use crate::spec::{NormalizedEndpoint, ParamLocation};
use log::{debug, info, warn};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use serde_json::Value;

/// Characters left unescaped, matching `encodeURIComponent`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    Json(Value),
    Text(String),
}

impl ResponseBody {
    /// JSON when the text parses, the raw text otherwise.
    pub fn from_text(text: &str) -> Self {
        serde_json::from_str(text)
            .map(ResponseBody::Json)
            .unwrap_or_else(|_| ResponseBody::Text(text.to_string()))
    }

    pub fn render(&self) -> String {
        match self {
            ResponseBody::Json(value) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
            ResponseBody::Text(text) => text.clone(),
        }
    }
}

/// Result of one execution: a response or an error, never both.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ExecutionOutcome {
    Response {
        status: u16,
        elapsed_ms: u64,
        body: ResponseBody,
    },
    Error {
        error: String,
    },
}

impl ExecutionOutcome {
    pub fn from_response(response: &RawResponse) -> Self {
        ExecutionOutcome::Response {
            status: response.status,
            elapsed_ms: response.elapsed_ms,
            body: ResponseBody::from_text(&response.body),
        }
    }
}

/// Proof that an execution was started for a given selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
}

#[derive(Debug, Default)]
pub struct EndpointRunner {
    endpoint: Option<NormalizedEndpoint>,
    /// Parameter values keyed by `location:name`, in declaration order.
    values: Vec<(String, String)>,
    body: String,
    outcome: Option<ExecutionOutcome>,
    validation_error: Option<String>,
    loading: bool,
    generation: u64,
}

impl EndpointRunner {
    pub fn new() -> Self {
        EndpointRunner::default()
    }

    /// Reset parameters, body, and result for `endpoint`.
    ///
    /// Every parameter starts empty; a declared body is pre-filled with a
    /// pretty-printed synthesized sample.
    pub fn select(&mut self, endpoint: &NormalizedEndpoint, schemas: &SchemaDictionary) {
        self.generation += 1;
        self.loading = false;
        self.outcome = None;
        self.validation_error = None;
        self.values = endpoint.parameters.iter().map(|p| (p.key(), String::new())).collect();
        self.body = endpoint
            .request_body
            .as_ref()
            .and_then(|body| body.schema.as_ref())
            .and_then(|schema| synthesize(schema, schemas))
            .map(|sample| serde_json::to_string_pretty(&sample).unwrap_or_default())
            .unwrap_or_default();
        self.endpoint = Some(endpoint.clone());
        debug!("Runner selected {} (generation {})", endpoint.id, self.generation);
    }

    pub fn endpoint(&self) -> Option<&NormalizedEndpoint> {
        self.endpoint.as_ref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_body(&mut self, body: &str) {
        self.body = body.to_string();
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn outcome(&self) -> Option<&ExecutionOutcome> {
        self.outcome.as_ref()
    }

    pub fn validation_error(&self) -> Option<&str> {
        self.validation_error.as_deref()
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    /// Set a parameter by `location:name`, or by bare name when only one location declares it.
    pub fn set_param(&mut self, name: &str, value: &str) -> AppResult<()> {
        let index = match self.values.iter().position(|(key, _)| key == name) {
            Some(index) => index,
            None => {
                let matches: Vec<usize> = self
                    .values
                    .iter()
                    .enumerate()
                    .filter(|(_, (key, _))| key.split_once(':').map(|(_, n)| n) == Some(name))
                    .map(|(i, _)| i)
                    .collect();
                match matches.as_slice() {
                    [index] => *index,
                    [] => {
                        warn!("Unknown parameter {}", name);
                        return Err(AppError::UnknownParameter(name.to_string()));
                    }
                    _ => {
                        let candidates: Vec<String> = matches.iter().map(|i| self.values[*i].0.clone()).collect();
                        warn!("Parameter {} is declared in several locations: {}", name, candidates.join(", "));
                        return Err(AppError::AmbiguousParameter {
                            name: name.to_string(),
                            candidates,
                        });
                    }
                }
            }
        };
        self.values[index].1 = value.to_string();
        Ok(())
    }

    /// Build the request for the current selection without sending it.
    pub fn prepare(&self, base_url: &str, token: Option<&str>) -> AppResult<PreparedRequest> {
        let endpoint = self
            .endpoint
            .as_ref()
            .ok_or_else(|| AppError::UnknownEndpoint("no endpoint selected".to_string()))?;
        build_request(endpoint, &self.values, &self.body, base_url, token)
    }

    /// Mark an execution as started. `None` while another one is in flight.
    pub fn begin(&mut self) -> Option<Ticket> {
        if self.loading || self.endpoint.is_none() {
            return None;
        }
        self.loading = true;
        self.outcome = None;
        self.validation_error = None;
        Some(Ticket {
            generation: self.generation,
        })
    }

    /// Record an outcome. Outcomes for a superseded selection are dropped.
    pub fn finish(&mut self, ticket: Ticket, outcome: ExecutionOutcome) -> bool {
        if ticket.generation != self.generation {
            debug!(
                "Dropping stale outcome for generation {} (current {})",
                ticket.generation, self.generation
            );
            return false;
        }
        self.loading = false;
        self.outcome = Some(outcome);
        true
    }

    /// Validate, send, and record the outcome for the selected endpoint.
    ///
    /// Body validation failures are returned before anything is sent and
    /// kept in [`validation_error`](Self::validation_error). Transport
    /// failures become [`ExecutionOutcome::Error`].
    pub async fn execute(&mut self, client: &ApiClient) -> AppResult<Option<&ExecutionOutcome>> {
        let config = client.config();
        let request = match self.prepare(config.base_url(), config.token()) {
            Ok(request) => request,
            Err(AppError::RequestBodyParse(message)) => {
                self.validation_error = Some(message.clone());
                return Err(AppError::RequestBodyParse(message));
            }
            Err(e) => return Err(e),
        };
        let Some(ticket) = self.begin() else {
            debug!("Execution already in flight, ignoring");
            return Ok(None);
        };
        info!("{} {}", request.method, request.url);
        let outcome = match client.send(&request).await {
            Ok(response) => ExecutionOutcome::from_response(&response),
            Err(e) => ExecutionOutcome::Error { error: e.to_string() },
        };
        self.finish(ticket, outcome);
        Ok(self.outcome.as_ref())
    }
}

fn lookup<'a>(values: &'a [(String, String)], key: &str) -> &'a str {
    values
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .unwrap_or("")
}

/// Assemble URL, headers, and body for `endpoint` from the given parameter values.
pub fn build_request(
    endpoint: &NormalizedEndpoint,
    values: &[(String, String)],
    body: &str,
    base_url: &str,
    token: Option<&str>,
) -> AppResult<PreparedRequest> {
    let mut path = endpoint.path.clone();
    for param in endpoint.parameters_in(ParamLocation::Path) {
        let value = lookup(values, &param.key());
        if value.is_empty() {
            warn!("Path parameter {} is empty", param.name);
        }
        path = path.replace(&format!("{{{}}}", param.name), &encode_component(value));
    }

    let query: Vec<String> = endpoint
        .parameters_in(ParamLocation::Query)
        .filter_map(|param| {
            let value = lookup(values, &param.key());
            (!value.is_empty()).then(|| format!("{}={}", encode_component(&param.name), encode_component(value)))
        })
        .collect();

    let mut url = format!("{}{}", base_url.trim_end_matches('/'), path);
    if !query.is_empty() {
        url.push(if url.contains('?') { '&' } else { '?' });
        url.push_str(&query.join("&"));
    }

    let mut headers: Vec<(String, String)> = vec![("Accept".to_string(), "application/json".to_string())];
    for param in endpoint.parameters_in(ParamLocation::Header) {
        let value = lookup(values, &param.key());
        if !value.is_empty() {
            headers.push((param.name.clone(), value.to_string()));
        }
    }
    let cookies: Vec<String> = endpoint
        .parameters_in(ParamLocation::Cookie)
        .filter_map(|param| {
            let value = lookup(values, &param.key());
            (!value.is_empty()).then(|| format!("{}={}", param.name, encode_component(value)))
        })
        .collect();
    if !cookies.is_empty() {
        headers.push(("Cookie".to_string(), cookies.join("; ")));
    }
    if endpoint.requires_auth {
        if let Some(token) = token.filter(|t| !t.trim().is_empty()) {
            headers.push(("Authorization".to_string(), format!("Bearer {}", token)));
        }
    }

    let mut payload = None;
    if let Some(request_body) = &endpoint.request_body {
        headers.push(("Content-Type".to_string(), request_body.content_type.clone()));
        if !body.trim().is_empty() {
            let parsed: Value =
                serde_json::from_str(body).map_err(|e| AppError::RequestBodyParse(e.to_string()))?;
            payload = Some(serialize_body(&parsed, &request_body.content_type));
        }
    }

    Ok(PreparedRequest {
        method: endpoint.method.to_string(),
        url,
        headers,
        body: payload,
    })
}

/// Encode a parsed body for `content_type`.
///
/// Form bodies are `key=value` pairs; every other type is sent as JSON.
pub fn serialize_body(body: &Value, content_type: &str) -> String {
    if content_type.starts_with("application/x-www-form-urlencoded") {
        if let Value::Object(fields) = body {
            return fields
                .iter()
                .map(|(k, v)| {
                    let text = match v {
                        Value::String(s) => s.clone(),
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    format!("{}={}", encode_component(k), encode_component(&text))
                })
                .collect::<Vec<_>>()
                .join("&");
        }
    }
    body.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::normalize;
    use serde_json::json;

    fn spec() -> crate::spec::NormalizedSpec {
        normalize(&json!({
            "openapi": "3.0.0",
            "security": [{"bearerAuth": []}],
            "paths": {
                "/books/{id}/files": {
                    "parameters": [{"name": "id", "in": "path", "required": true, "schema": {"type": "string"}}],
                    "get": {
                        "parameters": [
                            {"name": "format", "in": "query", "schema": {"type": "string"}},
                            {"name": "page", "in": "query", "schema": {"type": "integer"}},
                            {"name": "X-Trace", "in": "header", "schema": {"type": "string"}}
                        ]
                    }
                },
                "/books": {
                    "post": {
                        "requestBody": {"content": {"application/json": {"schema": {"$ref": "#/components/schemas/Book"}}}}
                    }
                },
                "/public": {"get": {"security": []}}
            },
            "components": {"schemas": {"Book": {
                "type": "object",
                "properties": {"title": {"type": "string"}, "pages": {"type": "integer"}}
            }}}
        }))
        .unwrap()
    }

    #[test]
    fn selection_resets_state_and_prefills_body() {
        let spec = spec();
        let mut runner = EndpointRunner::new();
        runner.select(&spec.endpoints[0], &spec.meta.schemas);
        runner.set_param("id", "42").unwrap();
        runner.select(&spec.endpoints[1], &spec.meta.schemas);
        assert_eq!(runner.value("path:id"), None);
        assert_eq!(runner.body(), "{\n  \"title\": \"\",\n  \"pages\": 0\n}");

        runner.select(&spec.endpoints[0], &spec.meta.schemas);
        assert_eq!(runner.value("path:id"), Some(""));
        assert_eq!(runner.body(), "");
    }

    #[test]
    fn path_query_and_header_substitution() {
        let spec = spec();
        let mut runner = EndpointRunner::new();
        runner.select(&spec.endpoints[0], &spec.meta.schemas);
        runner.set_param("id", "a b").unwrap();
        runner.set_param("format", "pdf").unwrap();
        runner.set_param("X-Trace", "t-1").unwrap();
        let request = runner.prepare("https://library.local/api/", Some("tok")).unwrap();
        assert_eq!(request.url, "https://library.local/api/books/a%20b/files?format=pdf");
        assert_eq!(request.header("X-Trace"), Some("t-1"));
        assert_eq!(request.header("Accept"), Some("application/json"));
        assert_eq!(request.header("Authorization"), Some("Bearer tok"));
        assert_eq!(request.body, None);
    }

    #[test]
    fn bare_name_in_two_locations_needs_a_location() {
        let spec = normalize(&json!({"paths": {"/books/{id}": {"get": {"parameters": [
            {"in": "path", "name": "id", "required": true},
            {"in": "query", "name": "id"}
        ]}}}}))
        .unwrap();
        let mut runner = EndpointRunner::new();
        runner.select(&spec.endpoints[0], &spec.meta.schemas);

        let err = runner.set_param("id", "7").unwrap_err();
        assert!(matches!(
            err,
            AppError::AmbiguousParameter { ref candidates, .. } if candidates == &["path:id", "query:id"]
        ));
        assert_eq!(runner.value("path:id"), Some(""));
        assert_eq!(runner.value("query:id"), Some(""));

        runner.set_param("path:id", "7").unwrap();
        runner.set_param("query:id", "8").unwrap();
        let request = runner.prepare("http://h", None).unwrap();
        assert_eq!(request.url, "http://h/books/7?id=8");
        assert!(matches!(runner.set_param("page", "1"), Err(AppError::UnknownParameter(_))));
    }

    #[test]
    fn explicit_empty_security_skips_auth_header() {
        let spec = spec();
        let mut runner = EndpointRunner::new();
        runner.select(&spec.endpoints[2], &spec.meta.schemas);
        let request = runner.prepare("http://h", Some("tok")).unwrap();
        assert_eq!(request.header("Authorization"), None);
    }

    #[test]
    fn invalid_body_is_a_validation_error() {
        let spec = spec();
        let mut runner = EndpointRunner::new();
        runner.select(&spec.endpoints[1], &spec.meta.schemas);
        runner.set_body("{ not json");
        assert!(matches!(runner.prepare("http://h", None), Err(AppError::RequestBodyParse(_))));

        runner.set_body("   ");
        let request = runner.prepare("http://h", None).unwrap();
        assert_eq!(request.body, None);
        assert_eq!(request.header("Content-Type"), Some("application/json"));
    }

    #[test]
    fn stale_outcome_is_dropped_after_reselect() {
        let spec = spec();
        let mut runner = EndpointRunner::new();
        runner.select(&spec.endpoints[0], &spec.meta.schemas);
        let ticket = runner.begin().unwrap();
        assert!(runner.is_loading());
        assert!(runner.begin().is_none());

        runner.select(&spec.endpoints[2], &spec.meta.schemas);
        let late = ExecutionOutcome::Error { error: "late".to_string() };
        assert!(!runner.finish(ticket, late));
        assert_eq!(runner.outcome(), None);
        assert!(!runner.is_loading());
    }

    #[test]
    fn form_bodies_are_url_encoded() {
        let body = json!({"email": "a@b.c", "remember": true});
        assert_eq!(
            serialize_body(&body, "application/x-www-form-urlencoded"),
            "email=a%40b.c&remember=true"
        );
        assert_eq!(serialize_body(&body, "application/json"), r#"{"email":"a@b.c","remember":true}"#);
    }

    #[test]
    fn response_body_falls_back_to_text() {
        assert_eq!(ResponseBody::from_text(r#"{"ok":1}"#), ResponseBody::Json(json!({"ok": 1})));
        assert_eq!(ResponseBody::from_text("pong"), ResponseBody::Text("pong".to_string()));
    }
}
