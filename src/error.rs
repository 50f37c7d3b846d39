use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Spec is empty or has no paths")]
    EmptySpec,
    #[error("Failed to fetch spec{}: {message}", status_suffix(.status))]
    SpecFetch { status: Option<u16>, message: String },
    #[error("Request body is not valid JSON: {0}")]
    RequestBodyParse(String),
    #[error("Endpoint execution failed{}: {message}", status_suffix(.status))]
    EndpointExecution { status: Option<u16>, message: String },
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Unknown endpoint: {0}")]
    UnknownEndpoint(String),
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),
    #[error("Parameter '{name}' is ambiguous; use one of {}", .candidates.join(", "))]
    AmbiguousParameter { name: String, candidates: Vec<String> },
    #[error("Unknown resource: {0}")]
    UnknownResource(String),
    #[error("Resource {resource} does not support {operation}")]
    UnsupportedOperation { resource: String, operation: String },
    #[error("Connector error: {0}")]
    Connector(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AppResult<T> = Result<T, AppError>;

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_fetch_message_includes_status() {
        let err = AppError::SpecFetch {
            status: Some(404),
            message: "not found".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to fetch spec (HTTP 404): not found");

        let err = AppError::SpecFetch {
            status: None,
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to fetch spec: connection refused");
    }

    #[test]
    fn ambiguous_parameter_lists_candidates() {
        let err = AppError::AmbiguousParameter {
            name: "id".to_string(),
            candidates: vec!["path:id".to_string(), "query:id".to_string()],
        };
        assert_eq!(err.to_string(), "Parameter 'id' is ambiguous; use one of path:id, query:id");
    }
}
