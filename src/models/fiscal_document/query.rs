//! Filter and aggregate types shared by search and statistics.

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::fiscal_document::DocumentType;
use crate::models::validation_issue::Severity;

pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 500;

/// Optional constraints for search and statistics. A `None` field does not
/// constrain anything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchFilter {
    pub document_type: Option<DocumentType>,
    pub issuer_tax_id: Option<String>,
    /// Inclusive lower bound on the issue date.
    pub issued_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the issue date.
    pub issued_to: Option<DateTime<Utc>>,
    /// Shorthand for `issued_from = now - days_back days`.
    pub days_back: Option<u32>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document_type(mut self, document_type: DocumentType) -> Self {
        self.document_type = Some(document_type);
        self
    }

    pub fn issuer(mut self, tax_id: impl Into<String>) -> Self {
        self.issuer_tax_id = Some(tax_id.into());
        self
    }

    pub fn issued_between(mut self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        self.issued_from = Some(from);
        self.issued_to = Some(to);
        self
    }

    pub fn days_back(mut self, days: u32) -> Self {
        self.days_back = Some(days);
        self
    }

    pub fn page(mut self, limit: i64, offset: i64) -> Self {
        self.limit = Some(limit);
        self.offset = Some(offset);
        self
    }

    /// Turns the sugar fields into concrete bounds relative to `now`. A
    /// `days_back` window reaching before the earliest representable date
    /// puts no lower bound on the issue date.
    pub fn resolve(&self, now: DateTime<Utc>) -> ResolvedFilter {
        let days_bound = self.days_back.and_then(|days| {
            Duration::try_days(i64::from(days)).and_then(|window| now.checked_sub_signed(window))
        });

        let issued_from = match (self.issued_from, days_bound) {
            (Some(explicit), Some(relative)) => Some(explicit.max(relative)),
            (explicit, relative) => explicit.or(relative),
        };

        ResolvedFilter {
            document_type: self.document_type,
            issuer_tax_id: self
                .issuer_tax_id
                .as_ref()
                .map(|id| id.trim().to_string())
                .filter(|id| !id.is_empty()),
            issued_from,
            issued_to: self.issued_to,
            limit: self
                .limit
                .map(|limit| limit.clamp(1, MAX_PAGE_SIZE))
                .unwrap_or(DEFAULT_PAGE_SIZE),
            offset: self.offset.unwrap_or(0).max(0),
        }
    }
}

/// A [`SearchFilter`] with `days_back` folded in and paging clamped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFilter {
    pub document_type: Option<DocumentType>,
    pub issuer_tax_id: Option<String>,
    pub issued_from: Option<DateTime<Utc>>,
    pub issued_to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl ResolvedFilter {
    pub fn is_unconstrained(&self) -> bool {
        self.document_type.is_none()
            && self.issuer_tax_id.is_none()
            && self.issued_from.is_none()
            && self.issued_to.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeBreakdown {
    pub document_type: DocumentType,
    pub count: i64,
    pub total_value: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCount {
    pub severity: Severity,
    pub count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatistics {
    pub total_documents: i64,
    pub total_items: i64,
    pub total_issues: i64,
    pub unresolved_issues: i64,
    /// Sum of `total_document` over the matching documents.
    pub total_value: Decimal,
    pub by_type: Vec<TypeBreakdown>,
    pub issues_by_severity: Vec<SeverityCount>,
}

impl DocumentStatistics {
    pub fn empty() -> Self {
        Self {
            total_documents: 0,
            total_items: 0,
            total_issues: 0,
            unresolved_issues: 0,
            total_value: Decimal::ZERO,
            by_type: Vec::new(),
            issues_by_severity: Vec::new(),
        }
    }
}
