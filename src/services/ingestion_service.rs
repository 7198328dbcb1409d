//! Ingestion Coordinator
//!
//! Orchestrates parse, validate and store for single payloads and batches.
//! The coordinator holds no mutable state: it can be cloned freely and driven
//! from several submission sources against the same store.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use rayon::prelude::*;
use serde::Serialize;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    config::app::{AppConfig, DEFAULT_BATCH_CHUNK_SIZE},
    error::{ParseError, ServiceError, ServiceResult},
    functional::validation_engine::ValidationEngine,
    models::{
        fiscal_document::{DocumentRef, FiscalDocument, UpsertOutcome},
        validation_issue::ValidationIssue,
    },
    parser::parse_document_at,
    services::document_store::DocumentStore,
};

/// Result of ingesting one payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IngestOutcome {
    /// New document stored without issues.
    Stored { document: DocumentRef },
    /// The key was already stored; nothing was written.
    Duplicate { document: DocumentRef },
    ParseFailed(ParseError),
    /// New document stored together with the issues validation raised.
    ValidationErrors {
        document: DocumentRef,
        issues: Vec<ValidationIssue>,
    },
    /// Nothing was committed; the submission may be retried.
    StorageFailed { document_key: String, reason: String },
}

impl IngestOutcome {
    /// The stored identity, for outcomes that reached the database.
    pub fn document(&self) -> Option<&DocumentRef> {
        match self {
            IngestOutcome::Stored { document }
            | IngestOutcome::Duplicate { document }
            | IngestOutcome::ValidationErrors { document, .. } => Some(document),
            IngestOutcome::ParseFailed(_) | IngestOutcome::StorageFailed { .. } => None,
        }
    }

    /// True when this submission wrote a new document.
    pub fn is_stored(&self) -> bool {
        matches!(
            self,
            IngestOutcome::Stored { .. } | IngestOutcome::ValidationErrors { .. }
        )
    }
}

/// Shared flag a caller flips to stop a running batch.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Counts per outcome kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchSummary {
    pub stored: usize,
    pub duplicates: usize,
    pub parse_failures: usize,
    pub stored_with_issues: usize,
    pub storage_failures: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub batch_id: Uuid,
    /// One outcome per processed input, in input order.
    pub outcomes: Vec<IngestOutcome>,
    pub submitted: usize,
    /// Set when the batch stopped early; inputs past `outcomes.len()` were
    /// never processed.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn summary(&self) -> BatchSummary {
        self.outcomes
            .iter()
            .fold(BatchSummary::default(), |mut summary, outcome| {
                match outcome {
                    IngestOutcome::Stored { .. } => summary.stored += 1,
                    IngestOutcome::Duplicate { .. } => summary.duplicates += 1,
                    IngestOutcome::ParseFailed(_) => summary.parse_failures += 1,
                    IngestOutcome::ValidationErrors { .. } => summary.stored_with_issues += 1,
                    IngestOutcome::StorageFailed { .. } => summary.storage_failures += 1,
                }
                summary
            })
    }
}

type Prepared = Result<(FiscalDocument, Vec<ValidationIssue>), ParseError>;

#[derive(Clone)]
pub struct IngestionCoordinator {
    store: DocumentStore,
    engine: ValidationEngine,
    chunk_size: usize,
}

impl IngestionCoordinator {
    pub fn new(store: DocumentStore, engine: ValidationEngine) -> Self {
        Self {
            store,
            engine,
            chunk_size: DEFAULT_BATCH_CHUNK_SIZE,
        }
    }

    /// Opens the store and builds the engine from the application config.
    pub fn from_config(config: &AppConfig) -> ServiceResult<Self> {
        let store = DocumentStore::connect(&config.database)?;
        let engine = ValidationEngine::new(config.validation.clone());
        Ok(Self::new(store, engine).with_chunk_size(config.ingest.batch_chunk_size))
    }

    /// Number of payloads prepared in parallel before their results are
    /// stored. Values below one are treated as one.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn store(&self) -> &DocumentStore {
        &self.store
    }

    pub fn engine(&self) -> &ValidationEngine {
        &self.engine
    }

    fn prepare(&self, payload: &[u8], now: DateTime<Utc>) -> Prepared {
        let document = parse_document_at(payload, now)?;
        let issues = self.engine.validate_at(&document, now);
        Ok((document, issues))
    }

    fn commit(&self, prepared: Prepared) -> IngestOutcome {
        let (document, issues) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                tracing::warn!(%error, "payload rejected by parser");
                return IngestOutcome::ParseFailed(error);
            }
        };

        match self.store.upsert(&document, &issues) {
            Ok(UpsertOutcome::AlreadyExists(existing)) => {
                tracing::info!(document_key = %existing.document_key, "duplicate submission");
                IngestOutcome::Duplicate { document: existing }
            }
            Ok(UpsertOutcome::Inserted(stored)) if issues.is_empty() => {
                tracing::info!(document_key = %stored.document_key, "document stored");
                IngestOutcome::Stored { document: stored }
            }
            Ok(UpsertOutcome::Inserted(stored)) => {
                tracing::info!(
                    document_key = %stored.document_key,
                    issues = issues.len(),
                    errors = issues.iter().filter(|issue| issue.is_error()).count(),
                    "document stored with validation issues"
                );
                IngestOutcome::ValidationErrors {
                    document: stored,
                    issues,
                }
            }
            Err(error) => {
                tracing::error!(document_key = %document.document_key, %error, "storage failed");
                IngestOutcome::StorageFailed {
                    document_key: document.document_key,
                    reason: error.to_string(),
                }
            }
        }
    }

    /// Runs one payload through the pipeline. Never panics on bad input:
    /// every payload yields exactly one outcome.
    #[instrument(skip_all, fields(bytes = payload.len()))]
    pub fn ingest(&self, payload: &[u8]) -> IngestOutcome {
        let now = Utc::now();
        self.commit(self.prepare(payload, now))
    }

    /// Ingests a batch. Payloads are parsed and validated in parallel chunks,
    /// then stored one by one in input order. A failing payload never affects
    /// the others. `cancel` is checked before every chunk and every store;
    /// documents committed before cancellation stay committed.
    #[instrument(skip_all, fields(batch_id = tracing::field::Empty, submitted = payloads.len()))]
    pub fn ingest_batch<P>(&self, payloads: &[P], cancel: &CancellationFlag) -> BatchReport
    where
        P: AsRef<[u8]> + Sync,
    {
        let batch_id = Uuid::new_v4();
        tracing::Span::current().record("batch_id", tracing::field::display(batch_id));
        let now = Utc::now();
        let mut outcomes = Vec::with_capacity(payloads.len());
        let mut cancelled = false;

        'chunks: for chunk in payloads.chunks(self.chunk_size) {
            if cancel.is_cancelled() {
                cancelled = true;
                break;
            }

            let prepared: Vec<Prepared> = chunk
                .par_iter()
                .map(|payload| self.prepare(payload.as_ref(), now))
                .collect();

            for result in prepared {
                if cancel.is_cancelled() {
                    cancelled = true;
                    break 'chunks;
                }
                outcomes.push(self.commit(result));
            }
        }

        let report = BatchReport {
            batch_id,
            outcomes,
            submitted: payloads.len(),
            cancelled,
        };
        let summary = report.summary();
        tracing::info!(
            processed = report.outcomes.len(),
            stored = summary.stored + summary.stored_with_issues,
            duplicates = summary.duplicates,
            failed = summary.parse_failures + summary.storage_failures,
            cancelled,
            "batch finished"
        );
        report
    }

    /// Runs [`ingest`](Self::ingest) on tokio's blocking pool.
    pub async fn ingest_async(&self, payload: Vec<u8>) -> ServiceResult<IngestOutcome> {
        let coordinator = self.clone();
        tokio::task::spawn_blocking(move || coordinator.ingest(&payload))
            .await
            .map_err(|e| {
                ServiceError::storage_failure("ingestion task did not complete")
                    .with_context(|ctx| ctx.with_tag("ingest").with_detail(e.to_string()))
            })
    }

    /// Ingests independent submissions concurrently, one blocking task each.
    /// Results are in input order.
    pub async fn ingest_many_async(
        &self,
        payloads: Vec<Vec<u8>>,
    ) -> Vec<ServiceResult<IngestOutcome>> {
        join_all(payloads.into_iter().map(|payload| self.ingest_async(payload))).await
    }
}
