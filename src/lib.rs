//! Ingestion core for Brazilian electronic fiscal documents (NF-e, NFC-e,
//! CT-e and MDF-e).
//!
//! Raw XML goes through [`parser`] into a canonical
//! [`FiscalDocument`](models::fiscal_document::FiscalDocument), is checked by
//! the rule battery in [`functional`], and is stored exactly once per document
//! key by [`services::document_store`]. The
//! [`IngestionCoordinator`](services::ingestion_service::IngestionCoordinator)
//! ties the stages together.

pub mod config;
pub mod error;
pub mod functional;
pub mod models;
pub mod parser;
pub mod schema;
pub mod services;
pub mod utils;

pub use error::{ParseError, ServiceError, ServiceResult};
pub use functional::validation_engine::{ValidationConfig, ValidationEngine};
pub use models::fiscal_document::query::SearchFilter;
pub use services::{
    document_store::DocumentStore,
    ingestion_service::{CancellationFlag, IngestOutcome, IngestionCoordinator},
};
