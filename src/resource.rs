//! CRUD calls against one catalog resource.
//!
//! Each operation goes through the endpoint bound to the matching
//! [`Capability`]. Unlike the runner, a non-2xx status here is an error:
//! callers want records, not raw responses.

use crate::catalog::{Capability, ResourceDescriptor};
use crate::error::{AppError, AppResult};
use crate::http::ApiClient;
use crate::runner::{build_request, ResponseBody};
use crate::spec::NormalizedEndpoint;
use crate::table::{extract_record, extract_records};
use log::{debug, info};
use serde_json::Value;

pub struct ResourceManager<'a> {
    resource: &'a ResourceDescriptor,
    client: &'a ApiClient,
}

impl<'a> ResourceManager<'a> {
    pub fn new(resource: &'a ResourceDescriptor, client: &'a ApiClient) -> Self {
        ResourceManager { resource, client }
    }

    pub fn resource(&self) -> &ResourceDescriptor {
        self.resource
    }

    fn endpoint_for(&self, capability: Capability) -> AppResult<(&'a NormalizedEndpoint, Option<&'a str>)> {
        let binding = self
            .resource
            .binding(capability)
            .ok_or_else(|| AppError::UnsupportedOperation {
                resource: self.resource.display_name.clone(),
                operation: capability.to_string(),
            })?;
        let endpoint = self
            .resource
            .endpoint(&binding.endpoint_id)
            .ok_or_else(|| AppError::UnknownEndpoint(binding.endpoint_id.clone()))?;
        Ok((endpoint, binding.id_param.as_deref()))
    }

    async fn call(&self, capability: Capability, id: Option<&str>, body: Option<&Value>) -> AppResult<Value> {
        let (endpoint, id_param) = self.endpoint_for(capability)?;
        let mut values: Vec<(String, String)> = Vec::new();
        if let (Some(param), Some(id)) = (id_param, id) {
            values.push((format!("path:{param}"), id.to_string()));
        }
        let body_text = body.map(Value::to_string).unwrap_or_default();
        let config = self.client.config();
        let mut request = build_request(endpoint, &values, &body_text, config.base_url(), config.token())?;
        if request.body.is_none() && endpoint.request_body.is_none() && body.is_some() {
            request.headers.push(("Content-Type".to_string(), "application/json".to_string()));
            request.body = Some(body_text);
        }

        info!("{} {} ({})", request.method, request.url, capability);
        let response = self.client.send(&request).await?;
        if !response.is_success() {
            return Err(AppError::EndpointExecution {
                status: Some(response.status),
                message: response.body,
            });
        }
        debug!("{} returned {} bytes", endpoint.id, response.body.len());
        Ok(match ResponseBody::from_text(&response.body) {
            ResponseBody::Json(value) => value,
            ResponseBody::Text(text) if text.trim().is_empty() => Value::Null,
            ResponseBody::Text(text) => Value::String(text),
        })
    }

    pub async fn list(&self) -> AppResult<Vec<Value>> {
        let response = self.call(Capability::List, None, None).await?;
        extract_records(&response).cloned().ok_or_else(|| AppError::EndpointExecution {
            status: None,
            message: format!("Unrecognized list response for {}", self.resource.display_name),
        })
    }

    pub async fn get(&self, id: &str) -> AppResult<Value> {
        let response = self.call(Capability::Get, Some(id), None).await?;
        Ok(extract_record(&response).clone())
    }

    pub async fn create(&self, body: &Value) -> AppResult<Value> {
        let response = self.call(Capability::Create, None, Some(body)).await?;
        Ok(extract_record(&response).clone())
    }

    pub async fn update(&self, id: &str, body: &Value) -> AppResult<Value> {
        let response = self.call(Capability::Update, Some(id), Some(body)).await?;
        Ok(extract_record(&response).clone())
    }

    pub async fn delete(&self, id: &str) -> AppResult<()> {
        self.call(Capability::Delete, Some(id), None).await?;
        Ok(())
    }
}
