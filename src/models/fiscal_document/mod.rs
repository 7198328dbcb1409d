//! Fiscal Document Module
//!
//! Canonical in-memory document model plus the Diesel row types used to
//! persist it.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};
use crate::models::line_item::LineItem;
use crate::models::validation_issue::StoredIssue;
use crate::schema::fiscal_documents;

pub mod operations;
pub mod query;
pub mod validators;

/// Legal family of a fiscal document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    /// NF-e, model 55.
    ProductInvoice,
    /// NFC-e, model 65.
    ConsumerInvoice,
    /// CT-e, model 57.
    TransportManifest,
    /// MDF-e, model 58.
    FreightManifest,
}

impl DocumentType {
    pub const ALL: [DocumentType; 4] = [
        DocumentType::ProductInvoice,
        DocumentType::ConsumerInvoice,
        DocumentType::TransportManifest,
        DocumentType::FreightManifest,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DocumentType::ProductInvoice => "product_invoice",
            DocumentType::ConsumerInvoice => "consumer_invoice",
            DocumentType::TransportManifest => "transport_manifest",
            DocumentType::FreightManifest => "freight_manifest",
        }
    }

    /// Two-digit model code carried inside the document key.
    pub fn model_code(self) -> &'static str {
        match self {
            DocumentType::ProductInvoice => "55",
            DocumentType::ConsumerInvoice => "65",
            DocumentType::TransportManifest => "57",
            DocumentType::FreightManifest => "58",
        }
    }

    pub fn from_model_code(code: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.model_code() == code.trim())
    }

    pub fn is_invoice(self) -> bool {
        matches!(
            self,
            DocumentType::ProductInvoice | DocumentType::ConsumerInvoice
        )
    }

    /// Tax kinds a document of this type may legitimately carry.
    pub fn allowed_tax_kinds(self) -> &'static [TaxKind] {
        match self {
            DocumentType::ProductInvoice => &TaxKind::ALL,
            DocumentType::ConsumerInvoice => {
                &[TaxKind::Icms, TaxKind::Pis, TaxKind::Cofins, TaxKind::Iss]
            }
            DocumentType::TransportManifest => &[TaxKind::Icms],
            DocumentType::FreightManifest => &[],
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| {
                ServiceError::invalid_input(format!("unknown document type '{}'", value))
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaxKind {
    Icms,
    Ipi,
    Pis,
    Cofins,
    Iss,
}

impl TaxKind {
    pub const ALL: [TaxKind; 5] = [
        TaxKind::Icms,
        TaxKind::Ipi,
        TaxKind::Pis,
        TaxKind::Cofins,
        TaxKind::Iss,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaxKind::Icms => "ICMS",
            TaxKind::Ipi => "IPI",
            TaxKind::Pis => "PIS",
            TaxKind::Cofins => "COFINS",
            TaxKind::Iss => "ISS",
        }
    }
}

impl fmt::Display for TaxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Amount per tax kind. A kind that never appeared is zero.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxAmounts {
    pub icms: Decimal,
    pub ipi: Decimal,
    pub pis: Decimal,
    pub cofins: Decimal,
    pub iss: Decimal,
}

impl TaxAmounts {
    pub fn get(&self, kind: TaxKind) -> Decimal {
        match kind {
            TaxKind::Icms => self.icms,
            TaxKind::Ipi => self.ipi,
            TaxKind::Pis => self.pis,
            TaxKind::Cofins => self.cofins,
            TaxKind::Iss => self.iss,
        }
    }

    pub fn set(&mut self, kind: TaxKind, amount: Decimal) {
        let slot = match kind {
            TaxKind::Icms => &mut self.icms,
            TaxKind::Ipi => &mut self.ipi,
            TaxKind::Pis => &mut self.pis,
            TaxKind::Cofins => &mut self.cofins,
            TaxKind::Iss => &mut self.iss,
        };
        *slot = amount;
    }

    pub fn with(mut self, kind: TaxKind, amount: Decimal) -> Self {
        self.set(kind, amount);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaxKind, Decimal)> + '_ {
        TaxKind::ALL.into_iter().map(move |kind| (kind, self.get(kind)))
    }

    /// Sum of every kind, or `None` when it does not fit in a `Decimal`.
    pub fn total(&self) -> Option<Decimal> {
        self.iter()
            .try_fold(Decimal::ZERO, |total, (_, amount)| total.checked_add(amount))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    pub tax_id: String,
    pub name: String,
}

/// Fields that only exist for one document family.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DocumentDetails {
    Invoice {
        operation_nature: Option<String>,
        operation_type: Option<String>,
        authorization_protocol: Option<String>,
    },
    Transport {
        cfop: Option<String>,
        modal: Option<String>,
        origin_city: Option<String>,
        destination_city: Option<String>,
        amount_receivable: Option<Decimal>,
    },
    Freight {
        modal: Option<String>,
        origin_state: Option<String>,
        destination_state: Option<String>,
        cargo_quantity: Option<Decimal>,
        referenced_keys: Vec<String>,
    },
}

impl DocumentDetails {
    pub fn empty_for(document_type: DocumentType) -> Self {
        match document_type {
            DocumentType::ProductInvoice | DocumentType::ConsumerInvoice => {
                DocumentDetails::Invoice {
                    operation_nature: None,
                    operation_type: None,
                    authorization_protocol: None,
                }
            }
            DocumentType::TransportManifest => DocumentDetails::Transport {
                cfop: None,
                modal: None,
                origin_city: None,
                destination_city: None,
                amount_receivable: None,
            },
            DocumentType::FreightManifest => DocumentDetails::Freight {
                modal: None,
                origin_state: None,
                destination_state: None,
                cargo_quantity: None,
                referenced_keys: Vec::new(),
            },
        }
    }
}

/// Canonical record produced by the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalDocument {
    pub document_type: DocumentType,
    pub document_key: String,
    pub document_number: String,
    pub series: String,
    pub issue_date: DateTime<Utc>,
    pub issuer: Party,
    pub recipient: Option<Party>,
    pub total_products: Decimal,
    pub total_taxes: Decimal,
    pub total_document: Decimal,
    pub tax_totals: TaxAmounts,
    pub details: DocumentDetails,
    pub items: Vec<LineItem>,
    pub raw_content: String,
    pub parsed_at: DateTime<Utc>,
}

/// Identity of a persisted document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: i32,
    pub document_key: String,
    pub document_type: DocumentType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "document", rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted(DocumentRef),
    /// The key was already stored; nothing was written.
    AlreadyExists(DocumentRef),
}

impl UpsertOutcome {
    pub fn document(&self) -> &DocumentRef {
        match self {
            UpsertOutcome::Inserted(document) | UpsertOutcome::AlreadyExists(document) => {
                document
            }
        }
    }

    pub fn is_inserted(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted(_))
    }
}

/// Full record returned by key lookups.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredDocument {
    pub id: i32,
    pub document: FiscalDocument,
    pub issues: Vec<StoredIssue>,
    pub created_at: DateTime<Utc>,
}

/// Header-only view returned by searches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: i32,
    pub document_key: String,
    pub document_type: DocumentType,
    pub document_number: String,
    pub series: String,
    pub issue_date: DateTime<Utc>,
    pub issuer: Party,
    pub recipient: Option<Party>,
    pub total_products: Decimal,
    pub total_taxes: Decimal,
    pub total_document: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = fiscal_documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct FiscalDocumentRow {
    pub id: i32,
    pub document_key: String,
    pub document_type: String,
    pub document_number: String,
    pub series: String,
    pub issue_date: NaiveDateTime,
    pub issuer_tax_id: String,
    pub issuer_name: String,
    pub recipient_tax_id: Option<String>,
    pub recipient_name: Option<String>,
    pub total_products: String,
    pub total_taxes: String,
    pub total_document: String,
    pub icms_total: String,
    pub ipi_total: String,
    pub pis_total: String,
    pub cofins_total: String,
    pub iss_total: String,
    pub details: String,
    pub raw_content: String,
    pub parsed_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = fiscal_documents)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewFiscalDocument {
    pub document_key: String,
    pub document_type: String,
    pub document_number: String,
    pub series: String,
    pub issue_date: NaiveDateTime,
    pub issuer_tax_id: String,
    pub issuer_name: String,
    pub recipient_tax_id: Option<String>,
    pub recipient_name: Option<String>,
    pub total_products: String,
    pub total_taxes: String,
    pub total_document: String,
    pub icms_total: String,
    pub ipi_total: String,
    pub pis_total: String,
    pub cofins_total: String,
    pub iss_total: String,
    pub details: String,
    pub raw_content: String,
    pub parsed_at: NaiveDateTime,
    pub created_at: NaiveDateTime,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = fiscal_documents)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct DocumentSummaryRow {
    pub id: i32,
    pub document_key: String,
    pub document_type: String,
    pub document_number: String,
    pub series: String,
    pub issue_date: NaiveDateTime,
    pub issuer_tax_id: String,
    pub issuer_name: String,
    pub recipient_tax_id: Option<String>,
    pub recipient_name: Option<String>,
    pub total_products: String,
    pub total_taxes: String,
    pub total_document: String,
    pub created_at: NaiveDateTime,
}

impl NewFiscalDocument {
    pub fn from_document(document: &FiscalDocument, created_at: DateTime<Utc>) -> ServiceResult<Self> {
        let details = serde_json::to_string(&document.details).map_err(|err| {
            ServiceError::storage_failure("failed to encode document details")
                .with_context(|ctx| ctx.with_detail(err.to_string()))
        })?;

        Ok(Self {
            document_key: document.document_key.clone(),
            document_type: document.document_type.as_str().to_string(),
            document_number: document.document_number.clone(),
            series: document.series.clone(),
            issue_date: document.issue_date.naive_utc(),
            issuer_tax_id: document.issuer.tax_id.clone(),
            issuer_name: document.issuer.name.clone(),
            recipient_tax_id: document.recipient.as_ref().map(|p| p.tax_id.clone()),
            recipient_name: document.recipient.as_ref().map(|p| p.name.clone()),
            total_products: document.total_products.to_string(),
            total_taxes: document.total_taxes.to_string(),
            total_document: document.total_document.to_string(),
            icms_total: document.tax_totals.icms.to_string(),
            ipi_total: document.tax_totals.ipi.to_string(),
            pis_total: document.tax_totals.pis.to_string(),
            cofins_total: document.tax_totals.cofins.to_string(),
            iss_total: document.tax_totals.iss.to_string(),
            details,
            raw_content: document.raw_content.clone(),
            parsed_at: document.parsed_at.naive_utc(),
            created_at: created_at.naive_utc(),
        })
    }
}

/// Reads a decimal column written by this crate.
pub(crate) fn decimal_column(column: &'static str, value: &str) -> ServiceResult<Decimal> {
    Decimal::from_str(value).map_err(|err| {
        ServiceError::storage_failure(format!("corrupt decimal in column {}", column))
            .with_context(|ctx| ctx.with_detail(format!("{}: {}", value, err)))
    })
}

fn document_type_column(value: &str) -> ServiceResult<DocumentType> {
    value.parse().map_err(|_| {
        ServiceError::storage_failure("corrupt document_type column")
            .with_context(|ctx| ctx.with_detail(value.to_string()))
    })
}

fn party(tax_id: Option<String>, name: Option<String>) -> Option<Party> {
    match (tax_id, name) {
        (None, None) => None,
        (tax_id, name) => Some(Party {
            tax_id: tax_id.unwrap_or_default(),
            name: name.unwrap_or_default(),
        }),
    }
}

impl FiscalDocumentRow {
    pub fn into_document(self, items: Vec<LineItem>) -> ServiceResult<FiscalDocument> {
        let details: DocumentDetails = serde_json::from_str(&self.details).map_err(|err| {
            ServiceError::storage_failure("corrupt document details")
                .with_context(|ctx| ctx.with_detail(err.to_string()))
        })?;

        Ok(FiscalDocument {
            document_type: document_type_column(&self.document_type)?,
            document_key: self.document_key,
            document_number: self.document_number,
            series: self.series,
            issue_date: self.issue_date.and_utc(),
            issuer: Party {
                tax_id: self.issuer_tax_id,
                name: self.issuer_name,
            },
            recipient: party(self.recipient_tax_id, self.recipient_name),
            total_products: decimal_column("total_products", &self.total_products)?,
            total_taxes: decimal_column("total_taxes", &self.total_taxes)?,
            total_document: decimal_column("total_document", &self.total_document)?,
            tax_totals: TaxAmounts {
                icms: decimal_column("icms_total", &self.icms_total)?,
                ipi: decimal_column("ipi_total", &self.ipi_total)?,
                pis: decimal_column("pis_total", &self.pis_total)?,
                cofins: decimal_column("cofins_total", &self.cofins_total)?,
                iss: decimal_column("iss_total", &self.iss_total)?,
            },
            details,
            items,
            raw_content: self.raw_content,
            parsed_at: self.parsed_at.and_utc(),
        })
    }
}

impl TryFrom<DocumentSummaryRow> for DocumentSummary {
    type Error = ServiceError;

    fn try_from(row: DocumentSummaryRow) -> Result<Self, Self::Error> {
        Ok(DocumentSummary {
            id: row.id,
            document_type: document_type_column(&row.document_type)?,
            document_key: row.document_key,
            document_number: row.document_number,
            series: row.series,
            issue_date: row.issue_date.and_utc(),
            issuer: Party {
                tax_id: row.issuer_tax_id,
                name: row.issuer_name,
            },
            recipient: party(row.recipient_tax_id, row.recipient_name),
            total_products: decimal_column("total_products", &row.total_products)?,
            total_taxes: decimal_column("total_taxes", &row.total_taxes)?,
            total_document: decimal_column("total_document", &row.total_document)?,
            created_at: row.created_at.and_utc(),
        })
    }
}
