//! Service layer: the document store, the ingestion coordinator and the
//! query surface offered to orchestration layers.

pub mod document_store;
pub mod functional_patterns;
pub mod ingestion_service;
pub mod query_capabilities;
