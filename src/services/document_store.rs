//! Document Store - QueryReader pipelines over the fiscal document tables
//!
//! The store is the only component that touches the database. It is built once
//! from a pool and handed by value (it is cheap to clone) to every component
//! that reads or writes documents.

use chrono::{DateTime, Utc};

use crate::{
    config::{
        app::DatabaseConfig,
        db::{init_db_pool, Pool},
    },
    error::ServiceResult,
    models::{
        fiscal_document::{
            operations as document_ops,
            query::{DocumentStatistics, SearchFilter},
            validators as document_validators,
            DocumentSummary, FiscalDocument, StoredDocument, UpsertOutcome,
        },
        validation_issue::ValidationIssue,
    },
    services::functional_patterns::{run_query, QueryReader},
};

const TAG: &str = "document_store";

/// Build a QueryReader for the full record stored under `key`. The header,
/// items and issues are read in one transaction.
pub fn find_by_key_reader(key: String) -> QueryReader<StoredDocument> {
    QueryReader::new(move |conn| document_ops::find_document_by_key(&key, conn)).transaction()
}

pub fn exists_reader(key: String) -> QueryReader<bool> {
    QueryReader::new(move |conn| document_ops::document_exists(&key, conn))
}

/// Build a QueryReader for a filtered search, resolving relative bounds
/// against `now` and rejecting invalid filters before any query runs
pub fn search_reader(filter: SearchFilter, now: DateTime<Utc>) -> QueryReader<Vec<DocumentSummary>> {
    let resolved = filter.resolve(now);
    let guard_filter = resolved.clone();
    QueryReader::new(move |conn| document_ops::search_documents(&resolved, conn))
        .guarded(move || document_validators::validate_search_filter(&guard_filter))
}

pub fn statistics_reader(filter: SearchFilter, now: DateTime<Utc>) -> QueryReader<DocumentStatistics> {
    let resolved = filter.resolve(now);
    let guard_filter = resolved.clone();
    QueryReader::new(move |conn| document_ops::document_statistics(&resolved, conn))
        .transaction()
        .guarded(move || document_validators::validate_search_filter(&guard_filter))
}

pub fn delete_by_key_reader(key: String) -> QueryReader<bool> {
    QueryReader::new(move |conn| document_ops::delete_document_by_key(&key, conn))
}

pub fn set_issue_resolved_reader(issue_id: i32, resolved: bool) -> QueryReader<()> {
    QueryReader::new(move |conn| document_ops::set_issue_resolved(issue_id, resolved, conn))
}

/// Handle to the document database.
#[derive(Clone)]
pub struct DocumentStore {
    pool: Pool,
}

impl DocumentStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Opens (and migrates) the database described by `config`.
    pub fn connect(config: &DatabaseConfig) -> ServiceResult<Self> {
        init_db_pool(config).map(Self::new)
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    fn run<T>(&self, reader: QueryReader<T>) -> ServiceResult<T> {
        run_query(reader, &self.pool).map_err(|e| e.with_context(|ctx| ctx.with_tag(TAG)))
    }

    /// Stores `document` with its items and `issues` as one atomic unit.
    ///
    /// # Returns
    ///
    /// `Inserted` for a new key; `AlreadyExists` with the stored identity when
    /// the key is already present, in which case nothing is written.
    pub fn upsert(
        &self,
        document: &FiscalDocument,
        issues: &[ValidationIssue],
    ) -> ServiceResult<UpsertOutcome> {
        let mut conn = self.pool.get()?;
        document_ops::upsert_document(document, issues, &mut conn)
            .map_err(|e| e.with_context(|ctx| ctx.with_tag(TAG)))
    }

    pub fn find_by_key(&self, key: &str) -> ServiceResult<StoredDocument> {
        self.run(find_by_key_reader(key.to_string()))
    }

    pub fn exists(&self, key: &str) -> ServiceResult<bool> {
        self.run(exists_reader(key.to_string()))
    }

    /// Searches with relative bounds (`days_back`) resolved against the
    /// current time.
    pub fn search(&self, filter: &SearchFilter) -> ServiceResult<Vec<DocumentSummary>> {
        self.search_at(filter, Utc::now())
    }

    pub fn search_at(
        &self,
        filter: &SearchFilter,
        now: DateTime<Utc>,
    ) -> ServiceResult<Vec<DocumentSummary>> {
        self.run(search_reader(filter.clone(), now))
    }

    /// Aggregates over the documents matching `filter`; paging is ignored.
    pub fn statistics(&self, filter: &SearchFilter) -> ServiceResult<DocumentStatistics> {
        self.statistics_at(filter, Utc::now())
    }

    pub fn statistics_at(
        &self,
        filter: &SearchFilter,
        now: DateTime<Utc>,
    ) -> ServiceResult<DocumentStatistics> {
        self.run(statistics_reader(filter.clone(), now))
    }

    /// Removes the document and, by cascade, its items and issues.
    ///
    /// # Returns
    ///
    /// `true` when a document was removed, `false` when the key was unknown.
    pub fn delete_by_key(&self, key: &str) -> ServiceResult<bool> {
        self.run(delete_by_key_reader(key.to_string()))
    }

    pub fn set_issue_resolved(&self, issue_id: i32, resolved: bool) -> ServiceResult<()> {
        self.run(set_issue_resolved_reader(issue_id, resolved))
    }
}
