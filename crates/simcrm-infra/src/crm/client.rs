//! HttpCrmClient -- concrete [`CrmApi`] implementation over HTTP.
//!
//! Speaks a generic CRM-style REST surface: record create/update/search,
//! associations, property definitions, and pipelines. Responses are mapped
//! onto the engine's error classes: 429 (with Retry-After) becomes
//! `RateLimited`, 5xx and network trouble become `Transient`, other 4xx
//! become `Permanent`.
//!
//! The API token is wrapped in [`secrecy::SecretString`] and never appears
//! in Debug output or logs.

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;

use simcrm_core::crm::CrmApi;
use simcrm_types::crm::{
    AssociationRequest, CrmRecord, Pipeline, PropertyDefinition, RecordPayload, SearchQuery,
};
use simcrm_types::error::CrmError;
use simcrm_types::job::RecordType;

use super::types::{
    OptionsBody, PipelineListResponse, PropertyListResponse, RecordBody, SearchBody,
    SearchResponse,
};

/// HTTP client for the external CRM API.
pub struct HttpCrmClient {
    client: reqwest::Client,
    base_url: String,
    api_token: SecretString,
}

impl HttpCrmClient {
    pub fn new(base_url: impl Into<String>, api_token: SecretString) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to create reqwest client");
        Self {
            client,
            base_url: base_url.into(),
            api_token,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(self.api_token.expose_secret())
            .header("content-type", "application/json")
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<T, CrmError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(map_transport_error)?;
        let response = check_status(response)?;
        response
            .json()
            .await
            .map_err(|e| CrmError::Permanent(format!("malformed CRM response: {e}")))
    }

    async fn send_ok(&self, builder: reqwest::RequestBuilder) -> Result<(), CrmError> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .map_err(map_transport_error)?;
        check_status(response)?;
        Ok(())
    }
}

/// Map an HTTP status onto the engine's CRM error classes.
pub(crate) fn classify_status(status: u16, retry_after_secs: Option<u64>, body: &str) -> CrmError {
    if status == 429 {
        return CrmError::RateLimited {
            retry_after_ms: retry_after_secs.map(|s| s * 1000),
        };
    }
    if status >= 500 {
        return CrmError::Transient(format!("CRM returned {status}: {body}"));
    }
    CrmError::Permanent(format!("CRM returned {status}: {body}"))
}

fn map_transport_error(error: reqwest::Error) -> CrmError {
    CrmError::Transient(format!("CRM request failed: {error}"))
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, CrmError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let retry_after_secs = response
        .headers()
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.parse::<u64>().ok());
    Err(classify_status(
        status.as_u16(),
        retry_after_secs,
        status.canonical_reason().unwrap_or(""),
    ))
}

impl CrmApi for HttpCrmClient {
    async fn create_record(
        &self,
        record_type: RecordType,
        payload: &RecordPayload,
    ) -> Result<CrmRecord, CrmError> {
        let url = self.url(&format!("/crm/v1/records/{record_type}"));
        self.send_json(self.client.post(&url).json(&RecordBody {
            properties: &payload.properties,
        }))
        .await
    }

    async fn update_record(
        &self,
        record_type: RecordType,
        id: &str,
        payload: &RecordPayload,
    ) -> Result<CrmRecord, CrmError> {
        let url = self.url(&format!("/crm/v1/records/{record_type}/{id}"));
        self.send_json(self.client.patch(&url).json(&RecordBody {
            properties: &payload.properties,
        }))
        .await
    }

    async fn search_records(
        &self,
        record_type: RecordType,
        query: &SearchQuery,
    ) -> Result<Vec<CrmRecord>, CrmError> {
        let url = self.url(&format!("/crm/v1/records/{record_type}/search"));
        let response: SearchResponse = self
            .send_json(self.client.post(&url).json(&SearchBody {
                property: &query.property,
                value: &query.value,
                limit: query.limit,
            }))
            .await?;
        Ok(response.results)
    }

    async fn associate(&self, request: &AssociationRequest) -> Result<(), CrmError> {
        let url = self.url("/crm/v1/associations");
        self.send_ok(self.client.post(&url).json(request)).await
    }

    async fn list_properties(
        &self,
        record_type: RecordType,
    ) -> Result<Vec<PropertyDefinition>, CrmError> {
        let url = self.url(&format!("/crm/v1/properties/{record_type}"));
        let response: PropertyListResponse = self.send_json(self.client.get(&url)).await?;
        Ok(response.results)
    }

    async fn create_property(
        &self,
        record_type: RecordType,
        definition: &PropertyDefinition,
    ) -> Result<(), CrmError> {
        let url = self.url(&format!("/crm/v1/properties/{record_type}"));
        self.send_ok(self.client.post(&url).json(definition)).await
    }

    async fn add_property_options(
        &self,
        record_type: RecordType,
        property: &str,
        options: &[String],
    ) -> Result<(), CrmError> {
        let url = self.url(&format!("/crm/v1/properties/{record_type}/{property}/options"));
        self.send_ok(self.client.post(&url).json(&OptionsBody { options }))
            .await
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>, CrmError> {
        let url = self.url("/crm/v1/pipelines");
        let response: PipelineListResponse = self.send_json(self.client.get(&url)).await?;
        Ok(response.results)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
