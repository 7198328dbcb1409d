//! Data-access operations for fiscal documents.
//!
//! Every function takes a plain connection so callers decide how the
//! connection is obtained and composed (see `services::functional_patterns`).

use std::collections::BTreeMap;

use chrono::Utc;
use diesel::{
    dsl::{count_star, exists},
    prelude::*,
    result::DatabaseErrorKind,
    sqlite::Sqlite,
};
use rust_decimal::Decimal;

use crate::{
    config::db::Connection,
    error::{ServiceError, ServiceResult},
    models::{
        fiscal_document::{
            decimal_column,
            query::{DocumentStatistics, ResolvedFilter, SeverityCount, TypeBreakdown},
            DocumentRef, DocumentSummary, DocumentSummaryRow, DocumentType, FiscalDocument,
            FiscalDocumentRow, NewFiscalDocument, StoredDocument, UpsertOutcome,
        },
        line_item::{LineItemRow, NewLineItem},
        validation_issue::{NewValidationIssue, Severity, ValidationIssue, ValidationIssueRow},
    },
    schema::{fiscal_documents, line_items, validation_issues},
};

/// Maximum number of bound ids per `IN (...)` clause.
const ID_CHUNK_SIZE: usize = 500;

fn storage_error(action: &str, err: diesel::result::Error) -> ServiceError {
    log::error!("Failed to {}: {}", action, err);
    ServiceError::storage_failure(format!("Failed to {}", action))
        .with_context(|ctx| ctx.with_tag("dfe").with_detail(err.to_string()))
}

fn document_ref(id: i32, document_key: String, document_type: &str) -> ServiceResult<DocumentRef> {
    let document_type = document_type.parse::<DocumentType>().map_err(|_| {
        ServiceError::storage_failure("corrupt document_type column")
            .with_context(|ctx| ctx.with_tag("dfe").with_detail(document_type.to_string()))
    })?;
    Ok(DocumentRef {
        id,
        document_key,
        document_type,
    })
}

fn find_ref_row(key: &str, conn: &mut Connection) -> QueryResult<Option<(i32, String)>> {
    fiscal_documents::table
        .filter(fiscal_documents::document_key.eq(key))
        .select((fiscal_documents::id, fiscal_documents::document_type))
        .first::<(i32, String)>(conn)
        .optional()
}

/// Result of the write transaction, before the stored type is re-parsed.
struct Written {
    inserted: bool,
    id: i32,
    document_type: String,
}

/// Stores a document with its items and issues in one IMMEDIATE transaction.
///
/// A key that is already present yields [`UpsertOutcome::AlreadyExists`] and
/// writes nothing. The stored document is never updated.
pub fn upsert_document(
    document: &FiscalDocument,
    issues: &[ValidationIssue],
    conn: &mut Connection,
) -> ServiceResult<UpsertOutcome> {
    let created_at = Utc::now();
    let new_document = NewFiscalDocument::from_document(document, created_at)?;
    let key = document.document_key.as_str();

    let written = conn.immediate_transaction::<_, diesel::result::Error, _>(|conn| {
        if let Some((id, document_type)) = find_ref_row(key, conn)? {
            return Ok(Written {
                inserted: false,
                id,
                document_type,
            });
        }

        diesel::insert_into(fiscal_documents::table)
            .values(&new_document)
            .execute(conn)?;

        let document_id = fiscal_documents::table
            .filter(fiscal_documents::document_key.eq(key))
            .select(fiscal_documents::id)
            .first::<i32>(conn)?;

        let new_items: Vec<NewLineItem> = document
            .items
            .iter()
            .map(|item| NewLineItem::from_item(document_id, item))
            .collect();
        if !new_items.is_empty() {
            diesel::insert_into(line_items::table)
                .values(&new_items)
                .execute(conn)?;
        }

        let new_issues: Vec<NewValidationIssue> = issues
            .iter()
            .map(|issue| NewValidationIssue::from_issue(document_id, issue, created_at))
            .collect();
        if !new_issues.is_empty() {
            diesel::insert_into(validation_issues::table)
                .values(&new_issues)
                .execute(conn)?;
        }

        Ok(Written {
            inserted: true,
            id: document_id,
            document_type: document.document_type.as_str().to_string(),
        })
    });

    match written {
        Ok(written) => {
            let reference = document_ref(written.id, key.to_string(), &written.document_type)?;
            if written.inserted {
                log::debug!(
                    "Stored fiscal document {} with {} items and {} issues",
                    key,
                    document.items.len(),
                    issues.len()
                );
                Ok(UpsertOutcome::Inserted(reference))
            } else {
                log::debug!("Fiscal document {} already stored", key);
                Ok(UpsertOutcome::AlreadyExists(reference))
            }
        }
        // A concurrent writer committed the same key first.
        Err(diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info)) => {
            let message = info.message().to_string();
            match find_ref_row(key, conn) {
                Ok(Some((id, document_type))) => {
                    log::debug!("Fiscal document {} lost insert race, reading back", key);
                    Ok(UpsertOutcome::AlreadyExists(document_ref(
                        id,
                        key.to_string(),
                        &document_type,
                    )?))
                }
                Ok(None) => {
                    log::error!("Failed to store fiscal document {}: {}", key, message);
                    Err(ServiceError::storage_failure("Failed to store fiscal document")
                        .with_context(|ctx| {
                            ctx.with_tag("dfe")
                                .with_detail(message)
                                .with_metadata("document_key", key)
                        }))
                }
                Err(err) => Err(storage_error("re-read fiscal document", err)),
            }
        }
        Err(err) => Err(storage_error("store fiscal document", err)
            .with_context(|ctx| ctx.with_metadata("document_key", key))),
    }
}

/// Loads a document with its items (by item number) and issues (in
/// validation order).
pub fn find_document_by_key(key: &str, conn: &mut Connection) -> ServiceResult<StoredDocument> {
    let row = fiscal_documents::table
        .filter(fiscal_documents::document_key.eq(key))
        .select(FiscalDocumentRow::as_select())
        .first::<FiscalDocumentRow>(conn)
        .map_err(|err| match err {
            diesel::result::Error::NotFound => {
                ServiceError::not_found(format!("Fiscal document with key {} not found", key))
                    .with_context(|ctx| ctx.with_tag("dfe"))
            }
            other => storage_error("find fiscal document", other),
        })?;

    let items = line_items::table
        .filter(line_items::document_id.eq(row.id))
        .select(LineItemRow::as_select())
        .order(line_items::item_number.asc())
        .load::<LineItemRow>(conn)
        .map_err(|err| storage_error("load line items", err))?
        .into_iter()
        .map(LineItemRow::into_item)
        .collect::<ServiceResult<Vec<_>>>()?;

    let issues = validation_issues::table
        .filter(validation_issues::document_id.eq(row.id))
        .select(ValidationIssueRow::as_select())
        .order(validation_issues::id.asc())
        .load::<ValidationIssueRow>(conn)
        .map_err(|err| storage_error("load validation issues", err))?
        .into_iter()
        .map(ValidationIssueRow::into_stored)
        .collect::<ServiceResult<Vec<_>>>()?;

    let id = row.id;
    let created_at = row.created_at.and_utc();
    Ok(StoredDocument {
        id,
        document: row.into_document(items)?,
        issues,
        created_at,
    })
}

pub fn document_exists(key: &str, conn: &mut Connection) -> ServiceResult<bool> {
    diesel::select(exists(
        fiscal_documents::table.filter(fiscal_documents::document_key.eq(key)),
    ))
    .get_result::<bool>(conn)
    .map_err(|err| storage_error("check fiscal document", err))
}

fn filtered_documents(filter: &ResolvedFilter) -> fiscal_documents::BoxedQuery<'static, Sqlite> {
    let mut query = fiscal_documents::table.into_boxed();

    if let Some(document_type) = filter.document_type {
        query = query.filter(fiscal_documents::document_type.eq(document_type.as_str()));
    }
    if let Some(tax_id) = &filter.issuer_tax_id {
        query = query.filter(fiscal_documents::issuer_tax_id.eq(tax_id.clone()));
    }
    if let Some(from) = filter.issued_from {
        query = query.filter(fiscal_documents::issue_date.ge(from.naive_utc()));
    }
    if let Some(to) = filter.issued_to {
        query = query.filter(fiscal_documents::issue_date.le(to.naive_utc()));
    }

    query
}

/// Returns header summaries, newest issue date first.
pub fn search_documents(
    filter: &ResolvedFilter,
    conn: &mut Connection,
) -> ServiceResult<Vec<DocumentSummary>> {
    filtered_documents(filter)
        .select(DocumentSummaryRow::as_select())
        .order((
            fiscal_documents::issue_date.desc(),
            fiscal_documents::created_at.desc(),
            fiscal_documents::id.desc(),
        ))
        .limit(filter.limit)
        .offset(filter.offset)
        .load::<DocumentSummaryRow>(conn)
        .map_err(|err| storage_error("search fiscal documents", err))?
        .into_iter()
        .map(DocumentSummary::try_from)
        .collect()
}

fn value_overflow(scope: &str) -> ServiceError {
    ServiceError::storage_failure("total value overflow")
        .with_context(|ctx| ctx.with_tag("dfe").with_metadata("scope", scope))
}

/// Aggregates over every document matching `filter`; paging is ignored.
/// Run it inside a transaction so the counts come from one snapshot.
pub fn document_statistics(
    filter: &ResolvedFilter,
    conn: &mut Connection,
) -> ServiceResult<DocumentStatistics> {
    let headers = filtered_documents(filter)
        .select((
            fiscal_documents::id,
            fiscal_documents::document_type,
            fiscal_documents::total_document,
        ))
        .load::<(i32, String, String)>(conn)
        .map_err(|err| storage_error("load document totals", err))?;

    if headers.is_empty() {
        return Ok(DocumentStatistics::empty());
    }

    let mut by_type: BTreeMap<DocumentType, (i64, Decimal)> = BTreeMap::new();
    let mut total_value = Decimal::ZERO;
    for (_, document_type, total_document) in &headers {
        let document_type = document_type.parse::<DocumentType>().map_err(|_| {
            ServiceError::storage_failure("corrupt document_type column")
                .with_context(|ctx| ctx.with_detail(document_type.clone()))
        })?;
        let value = decimal_column("total_document", total_document)?;
        let entry = by_type.entry(document_type).or_insert((0, Decimal::ZERO));
        entry.0 += 1;
        entry.1 = entry
            .1
            .checked_add(value)
            .ok_or_else(|| value_overflow(document_type.as_str()))?;
        total_value = total_value
            .checked_add(value)
            .ok_or_else(|| value_overflow("all"))?;
    }

    let (total_items, issue_counts) = if filter.is_unconstrained() {
        let items = line_items::table
            .count()
            .get_result::<i64>(conn)
            .map_err(|err| storage_error("count line items", err))?;
        let issues = validation_issues::table
            .group_by((validation_issues::severity, validation_issues::resolved))
            .select((
                validation_issues::severity,
                validation_issues::resolved,
                count_star(),
            ))
            .load::<(String, bool, i64)>(conn)
            .map_err(|err| storage_error("count validation issues", err))?;
        (items, issues)
    } else {
        let ids: Vec<i32> = headers.iter().map(|(id, _, _)| *id).collect();
        let mut items = 0;
        let mut issues = Vec::new();
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            items += line_items::table
                .filter(line_items::document_id.eq_any(chunk.to_vec()))
                .count()
                .get_result::<i64>(conn)
                .map_err(|err| storage_error("count line items", err))?;
            issues.extend(
                validation_issues::table
                    .filter(validation_issues::document_id.eq_any(chunk.to_vec()))
                    .group_by((validation_issues::severity, validation_issues::resolved))
                    .select((
                        validation_issues::severity,
                        validation_issues::resolved,
                        count_star(),
                    ))
                    .load::<(String, bool, i64)>(conn)
                    .map_err(|err| storage_error("count validation issues", err))?,
            );
        }
        (items, issues)
    };

    let mut by_severity: BTreeMap<Severity, i64> = BTreeMap::new();
    let mut total_issues = 0;
    let mut unresolved_issues = 0;
    for (severity, resolved, count) in issue_counts {
        let severity = severity.parse::<Severity>().map_err(|_| {
            ServiceError::storage_failure("corrupt severity column")
                .with_context(|ctx| ctx.with_detail(severity.clone()))
        })?;
        *by_severity.entry(severity).or_insert(0) += count;
        total_issues += count;
        if !resolved {
            unresolved_issues += count;
        }
    }

    Ok(DocumentStatistics {
        total_documents: headers.len() as i64,
        total_items,
        total_issues,
        unresolved_issues,
        total_value,
        by_type: by_type
            .into_iter()
            .map(|(document_type, (count, total_value))| TypeBreakdown {
                document_type,
                count,
                total_value,
            })
            .collect(),
        issues_by_severity: by_severity
            .into_iter()
            .map(|(severity, count)| SeverityCount { severity, count })
            .collect(),
    })
}

/// Deletes a document and, through the foreign keys, its items and issues.
/// Returns whether a row was removed.
pub fn delete_document_by_key(key: &str, conn: &mut Connection) -> ServiceResult<bool> {
    let deleted = diesel::delete(
        fiscal_documents::table.filter(fiscal_documents::document_key.eq(key)),
    )
    .execute(conn)
    .map_err(|err| storage_error("delete fiscal document", err))?;

    if deleted > 0 {
        log::debug!("Deleted fiscal document {}", key);
    }
    Ok(deleted > 0)
}

pub fn set_issue_resolved(issue_id: i32, resolved: bool, conn: &mut Connection) -> ServiceResult<()> {
    let updated = diesel::update(validation_issues::table.find(issue_id))
        .set(validation_issues::resolved.eq(resolved))
        .execute(conn)
        .map_err(|err| storage_error("update validation issue", err))?;

    if updated == 0 {
        Err(
            ServiceError::not_found(format!("Validation issue with id {} not found", issue_id))
                .with_context(|ctx| ctx.with_tag("dfe")),
        )
    } else {
        Ok(())
    }
}
