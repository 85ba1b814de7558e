//! Port trait for the external CRM-style API.
//!
//! Implemented by `simcrm-infra`'s HTTP client in production and by an
//! in-memory fake in tests. All calls are made through the governor, which
//! owns concurrency limits, retries, and timeouts.

use simcrm_types::crm::{
    AssociationRequest, CrmRecord, Pipeline, PropertyDefinition, RecordPayload, SearchQuery,
};
use simcrm_types::error::CrmError;
use simcrm_types::job::RecordType;

/// The external CRM API surface the engine needs.
pub trait CrmApi: Send + Sync {
    /// Create a record and return it with its CRM-assigned id.
    fn create_record(
        &self,
        record_type: RecordType,
        payload: &RecordPayload,
    ) -> impl std::future::Future<Output = Result<CrmRecord, CrmError>> + Send;

    /// Patch an existing record.
    fn update_record(
        &self,
        record_type: RecordType,
        id: &str,
        payload: &RecordPayload,
    ) -> impl std::future::Future<Output = Result<CrmRecord, CrmError>> + Send;

    /// Exact-match search on a single property.
    fn search_records(
        &self,
        record_type: RecordType,
        query: &SearchQuery,
    ) -> impl std::future::Future<Output = Result<Vec<CrmRecord>, CrmError>> + Send;

    /// Associate two existing records.
    fn associate(
        &self,
        request: &AssociationRequest,
    ) -> impl std::future::Future<Output = Result<(), CrmError>> + Send;

    /// List the property definitions of a record type.
    fn list_properties(
        &self,
        record_type: RecordType,
    ) -> impl std::future::Future<Output = Result<Vec<PropertyDefinition>, CrmError>> + Send;

    /// Create a missing property definition.
    fn create_property(
        &self,
        record_type: RecordType,
        definition: &PropertyDefinition,
    ) -> impl std::future::Future<Output = Result<(), CrmError>> + Send;

    /// Add option values to an enumerated property.
    fn add_property_options(
        &self,
        record_type: RecordType,
        property: &str,
        options: &[String],
    ) -> impl std::future::Future<Output = Result<(), CrmError>> + Send;

    /// List deal pipelines with their stages.
    fn list_pipelines(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<Pipeline>, CrmError>> + Send;
}
