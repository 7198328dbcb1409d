//! Document Validation Rules
//!
//! Each rule inspects a canonical [`FiscalDocument`] and reports findings as
//! [`ValidationIssue`]s. Rules never fail: bad domain data becomes an issue.
//! [`default_rules`] fixes the evaluation order, which in turn fixes the order
//! of the issues the engine emits.

use chrono::{DateTime, Utc};
use itertools::Itertools;
use rust_decimal::Decimal;

use crate::functional::fiscal_codes::{
    is_digits, is_tax_id_format, is_valid_cfop, is_valid_document_key, is_valid_ncm,
    is_valid_tax_id, key_issuer, key_model, CNPJ_LENGTH, DOCUMENT_KEY_LENGTH,
};
use crate::functional::validation_engine::ValidationConfig;
use crate::models::fiscal_document::{DocumentDetails, DocumentType, FiscalDocument, Party};
use crate::models::line_item::LineItem;
use crate::models::validation_issue::ValidationIssue;

/// Stable issue codes, one per rule.
pub mod codes {
    pub const DOC_KEY_FORMAT: &str = "DOC_KEY_FORMAT";
    pub const DOC_KEY_CHECK_DIGIT: &str = "DOC_KEY_CHECK_DIGIT";
    pub const DOC_KEY_MODEL_MISMATCH: &str = "DOC_KEY_MODEL_MISMATCH";
    pub const DOC_KEY_ISSUER_MISMATCH: &str = "DOC_KEY_ISSUER_MISMATCH";
    pub const HEADER_FIELD_MISSING: &str = "HEADER_FIELD_MISSING";
    pub const PARTY_TAX_ID_FORMAT: &str = "PARTY_TAX_ID_FORMAT";
    pub const PARTY_TAX_ID_CHECKSUM: &str = "PARTY_TAX_ID_CHECKSUM";
    pub const RECIPIENT_MISSING: &str = "RECIPIENT_MISSING";
    pub const RECIPIENT_IS_ISSUER: &str = "RECIPIENT_IS_ISSUER";
    pub const ITEMS_MISSING: &str = "ITEMS_MISSING";
    pub const ITEM_FIELD_MISSING: &str = "ITEM_FIELD_MISSING";
    pub const ITEM_TOTAL_MISMATCH: &str = "ITEM_TOTAL_MISMATCH";
    pub const TOTAL_PRODUCTS_MISMATCH: &str = "TOTAL_PRODUCTS_MISMATCH";
    pub const TAX_TOTAL_MISMATCH: &str = "TAX_TOTAL_MISMATCH";
    pub const TAX_KIND_NOT_APPLICABLE: &str = "TAX_KIND_NOT_APPLICABLE";
    pub const ITEM_NCM_FORMAT: &str = "ITEM_NCM_FORMAT";
    pub const ITEM_CFOP_FORMAT: &str = "ITEM_CFOP_FORMAT";
    pub const ITEM_CFOP_NOT_CONSUMER: &str = "ITEM_CFOP_NOT_CONSUMER";
    pub const FREIGHT_NO_REFERENCED_DOCUMENTS: &str = "FREIGHT_NO_REFERENCED_DOCUMENTS";
    pub const FREIGHT_REFERENCED_KEY_FORMAT: &str = "FREIGHT_REFERENCED_KEY_FORMAT";
    pub const ISSUE_DATE_IN_FUTURE: &str = "ISSUE_DATE_IN_FUTURE";
    pub const ISSUE_DATE_TOO_OLD: &str = "ISSUE_DATE_TOO_OLD";
    pub const HIGH_TOTAL_VALUE: &str = "HIGH_TOTAL_VALUE";
}

/// Everything a rule may consult besides the document itself.
#[derive(Debug, Clone, Copy)]
pub struct RuleContext<'a> {
    pub config: &'a ValidationConfig,
    pub now: DateTime<Utc>,
}

impl<'a> RuleContext<'a> {
    pub fn new(config: &'a ValidationConfig, now: DateTime<Utc>) -> Self {
        Self { config, now }
    }

    /// Inclusive tolerance check. Arithmetic overflow counts as a mismatch.
    pub fn within_tolerance(&self, actual: Decimal, expected: Decimal) -> bool {
        actual
            .checked_sub(expected)
            .map(|difference| difference.abs() <= self.config.amount_tolerance)
            .unwrap_or(false)
    }
}

/// Core rule trait. Implementations are stateless unit structs.
pub trait DocumentRule: Send + Sync {
    fn code(&self) -> &'static str;

    fn applies_to(&self, _document_type: DocumentType) -> bool {
        true
    }

    fn check(&self, document: &FiscalDocument, context: &RuleContext<'_>) -> Vec<ValidationIssue>;
}

/// The full battery in evaluation order.
pub fn default_rules() -> Vec<Box<dyn DocumentRule>> {
    vec![
        Box::new(DocumentKeyFormat),
        Box::new(DocumentKeyCheckDigit),
        Box::new(DocumentKeyModel),
        Box::new(DocumentKeyIssuer),
        Box::new(HeaderFieldsPresent),
        Box::new(PartyTaxIdFormat),
        Box::new(PartyTaxIdChecksum),
        Box::new(RecipientPresent),
        Box::new(RecipientIsIssuer),
        Box::new(ItemsPresent),
        Box::new(ItemFieldsPresent),
        Box::new(ItemTotalConsistent),
        Box::new(TotalProductsConsistent),
        Box::new(TaxTotalsConsistent),
        Box::new(TaxKindApplicable),
        Box::new(ItemNcmFormat),
        Box::new(ItemCfopFormat),
        Box::new(ConsumerCfop),
        Box::new(FreightHasReferences),
        Box::new(FreightReferenceFormat),
        Box::new(IssueDateNotInFuture),
        Box::new(IssueDateNotTooOld),
        Box::new(HighTotalValue),
    ]
}

fn checked_sum(amounts: impl IntoIterator<Item = Decimal>) -> Option<Decimal> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, |total, amount| total.checked_add(amount))
}

fn item_field(item: &LineItem, field: &str) -> String {
    format!("items[{}].{}", item.item_number, field)
}

fn parties(document: &FiscalDocument) -> impl Iterator<Item = (&'static str, &Party)> {
    std::iter::once(("issuer", &document.issuer))
        .chain(document.recipient.as_ref().map(|recipient| ("recipient", recipient)))
}

pub struct DocumentKeyFormat;

impl DocumentRule for DocumentKeyFormat {
    fn code(&self) -> &'static str {
        codes::DOC_KEY_FORMAT
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        if is_digits(&document.document_key, DOCUMENT_KEY_LENGTH) {
            return Vec::new();
        }
        vec![ValidationIssue::error(
            self.code(),
            format!(
                "document key must be {} digits, got '{}'",
                DOCUMENT_KEY_LENGTH, document.document_key
            ),
        )
        .with_field("document_key")]
    }
}

/// Only meaningful once the key has the right shape.
pub struct DocumentKeyCheckDigit;

impl DocumentRule for DocumentKeyCheckDigit {
    fn code(&self) -> &'static str {
        codes::DOC_KEY_CHECK_DIGIT
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let key = &document.document_key;
        if !is_digits(key, DOCUMENT_KEY_LENGTH) || is_valid_document_key(key) {
            return Vec::new();
        }
        vec![ValidationIssue::error(
            self.code(),
            format!("document key {} has an invalid check digit", key),
        )
        .with_field("document_key")
        .with_suggestion("verify the key against the authorization protocol")]
    }
}

pub struct DocumentKeyModel;

impl DocumentRule for DocumentKeyModel {
    fn code(&self) -> &'static str {
        codes::DOC_KEY_MODEL_MISMATCH
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let expected = document.document_type.model_code();
        match key_model(&document.document_key) {
            Some(model) if model != expected => vec![ValidationIssue::warning(
                self.code(),
                format!(
                    "document key carries model {} but the document is a {} (model {})",
                    model, document.document_type, expected
                ),
            )
            .with_field("document_key")],
            _ => Vec::new(),
        }
    }
}

pub struct DocumentKeyIssuer;

impl DocumentRule for DocumentKeyIssuer {
    fn code(&self) -> &'static str {
        codes::DOC_KEY_ISSUER_MISMATCH
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let issuer = &document.issuer.tax_id;
        if !is_digits(issuer, CNPJ_LENGTH) {
            return Vec::new();
        }
        match key_issuer(&document.document_key) {
            Some(embedded) if embedded != issuer => vec![ValidationIssue::warning(
                self.code(),
                format!(
                    "document key carries issuer {} but the issuer CNPJ is {}",
                    embedded, issuer
                ),
            )
            .with_field("issuer.tax_id")],
            _ => Vec::new(),
        }
    }
}

pub struct HeaderFieldsPresent;

impl DocumentRule for HeaderFieldsPresent {
    fn code(&self) -> &'static str {
        codes::HEADER_FIELD_MISSING
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        [
            ("document_number", &document.document_number),
            ("series", &document.series),
            ("issuer.name", &document.issuer.name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| {
            ValidationIssue::error(self.code(), format!("{} is required", field)).with_field(field)
        })
        .collect()
    }
}

pub struct PartyTaxIdFormat;

impl DocumentRule for PartyTaxIdFormat {
    fn code(&self) -> &'static str {
        codes::PARTY_TAX_ID_FORMAT
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        parties(document)
            .filter(|(_, party)| !is_tax_id_format(&party.tax_id))
            .map(|(role, party)| {
                ValidationIssue::error(
                    self.code(),
                    format!(
                        "{} tax id '{}' must be 11 (CPF) or 14 (CNPJ) digits",
                        role, party.tax_id
                    ),
                )
                .with_field(format!("{}.tax_id", role))
            })
            .collect()
    }
}

pub struct PartyTaxIdChecksum;

impl DocumentRule for PartyTaxIdChecksum {
    fn code(&self) -> &'static str {
        codes::PARTY_TAX_ID_CHECKSUM
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        parties(document)
            .filter(|(_, party)| {
                is_tax_id_format(&party.tax_id) && !is_valid_tax_id(&party.tax_id)
            })
            .map(|(role, party)| {
                ValidationIssue::warning(
                    self.code(),
                    format!("{} tax id {} has invalid check digits", role, party.tax_id),
                )
                .with_field(format!("{}.tax_id", role))
            })
            .collect()
    }
}

pub struct RecipientPresent;

impl DocumentRule for RecipientPresent {
    fn code(&self) -> &'static str {
        codes::RECIPIENT_MISSING
    }

    fn applies_to(&self, document_type: DocumentType) -> bool {
        matches!(
            document_type,
            DocumentType::ProductInvoice | DocumentType::TransportManifest
        )
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        if document.recipient.is_some() {
            return Vec::new();
        }
        vec![ValidationIssue::error(
            self.code(),
            format!("a {} must identify its recipient", document.document_type),
        )
        .with_field("recipient")]
    }
}

pub struct RecipientIsIssuer;

impl DocumentRule for RecipientIsIssuer {
    fn code(&self) -> &'static str {
        codes::RECIPIENT_IS_ISSUER
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        match &document.recipient {
            Some(recipient)
                if !recipient.tax_id.is_empty() && recipient.tax_id == document.issuer.tax_id =>
            {
                vec![ValidationIssue::info(
                    self.code(),
                    format!("issuer and recipient share tax id {}", recipient.tax_id),
                )
                .with_field("recipient.tax_id")]
            }
            _ => Vec::new(),
        }
    }
}

pub struct ItemsPresent;

impl DocumentRule for ItemsPresent {
    fn code(&self) -> &'static str {
        codes::ITEMS_MISSING
    }

    fn applies_to(&self, document_type: DocumentType) -> bool {
        document_type.is_invoice()
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        if !document.items.is_empty() {
            return Vec::new();
        }
        vec![
            ValidationIssue::error(self.code(), "invoice has no line items").with_field("items"),
        ]
    }
}

pub struct ItemFieldsPresent;

impl DocumentRule for ItemFieldsPresent {
    fn code(&self) -> &'static str {
        codes::ITEM_FIELD_MISSING
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        document
            .items
            .iter()
            .flat_map(|item| {
                [
                    ("product_code", &item.product_code),
                    ("description", &item.description),
                ]
                .into_iter()
                .filter(|(_, value)| value.trim().is_empty())
                .map(move |(field, _)| {
                    ValidationIssue::warning(
                        self.code(),
                        format!("item {} has no {}", item.item_number, field),
                    )
                    .with_field(item_field(item, field))
                })
            })
            .collect()
    }
}

pub struct ItemTotalConsistent;

impl DocumentRule for ItemTotalConsistent {
    fn code(&self) -> &'static str {
        codes::ITEM_TOTAL_MISMATCH
    }

    fn check(&self, document: &FiscalDocument, context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        document
            .items
            .iter()
            .filter_map(|item| {
                let expected = item.quantity.checked_mul(item.unit_price);
                let consistent = expected
                    .map(|expected| context.within_tolerance(item.total_price, expected))
                    .unwrap_or(false);
                if consistent {
                    return None;
                }
                let expected = expected
                    .map(|value| value.round_dp(2).to_string())
                    .unwrap_or_else(|| "an overflowing amount".to_string());
                Some(
                    ValidationIssue::error(
                        self.code(),
                        format!(
                            "item {} total {} differs from quantity {} x unit price {} = {}",
                            item.item_number, item.total_price, item.quantity, item.unit_price,
                            expected
                        ),
                    )
                    .with_field(item_field(item, "total_price")),
                )
            })
            .collect()
    }
}

pub struct TotalProductsConsistent;

impl DocumentRule for TotalProductsConsistent {
    fn code(&self) -> &'static str {
        codes::TOTAL_PRODUCTS_MISMATCH
    }

    fn check(&self, document: &FiscalDocument, context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        if document.items.is_empty() {
            return Vec::new();
        }
        let sum = checked_sum(document.items.iter().map(|item| item.total_price));
        if sum
            .map(|sum| context.within_tolerance(sum, document.total_products))
            .unwrap_or(false)
        {
            return Vec::new();
        }
        let sum = sum.map(|sum| sum.to_string()).unwrap_or_else(|| "overflow".to_string());
        vec![ValidationIssue::error(
            self.code(),
            format!(
                "item totals sum to {} but total products is {}",
                sum, document.total_products
            ),
        )
        .with_field("total_products")
        .with_suggestion(format!(
            "differences up to {} are tolerated",
            context.config.amount_tolerance
        ))]
    }
}

pub struct TaxTotalsConsistent;

impl DocumentRule for TaxTotalsConsistent {
    fn code(&self) -> &'static str {
        codes::TAX_TOTAL_MISMATCH
    }

    fn applies_to(&self, document_type: DocumentType) -> bool {
        document_type.is_invoice()
    }

    fn check(&self, document: &FiscalDocument, context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        if document.items.is_empty() {
            return Vec::new();
        }
        document
            .tax_totals
            .iter()
            .filter_map(|(kind, declared)| {
                let sum = checked_sum(document.items.iter().map(|item| item.taxes.get(kind)));
                if sum
                    .map(|sum| context.within_tolerance(sum, declared))
                    .unwrap_or(false)
                {
                    return None;
                }
                let sum = sum.map(|sum| sum.to_string()).unwrap_or_else(|| "overflow".to_string());
                Some(
                    ValidationIssue::error(
                        self.code(),
                        format!(
                            "{} on items sums to {} but the document declares {}",
                            kind, sum, declared
                        ),
                    )
                    .with_field(format!("tax_totals.{}", kind.as_str().to_lowercase())),
                )
            })
            .collect()
    }
}

pub struct TaxKindApplicable;

impl DocumentRule for TaxKindApplicable {
    fn code(&self) -> &'static str {
        codes::TAX_KIND_NOT_APPLICABLE
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let allowed = document.document_type.allowed_tax_kinds();
        document
            .tax_totals
            .iter()
            .filter(|(kind, _)| !allowed.contains(kind))
            .filter_map(|(kind, declared)| {
                let items = document
                    .items
                    .iter()
                    .filter(|item| !item.taxes.get(kind).is_zero())
                    .map(|item| item.item_number)
                    .collect::<Vec<_>>();
                if declared.is_zero() && items.is_empty() {
                    return None;
                }
                let mut message = format!(
                    "{} is not applicable to a {} (document amount {})",
                    kind, document.document_type, declared
                );
                if !items.is_empty() {
                    message.push_str(&format!(", items {}", items.iter().join(", ")));
                }
                Some(
                    ValidationIssue::warning(self.code(), message)
                        .with_field(format!("tax_totals.{}", kind.as_str().to_lowercase())),
                )
            })
            .collect()
    }
}

pub struct ItemNcmFormat;

impl DocumentRule for ItemNcmFormat {
    fn code(&self) -> &'static str {
        codes::ITEM_NCM_FORMAT
    }

    fn applies_to(&self, document_type: DocumentType) -> bool {
        document_type.is_invoice()
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        document
            .items
            .iter()
            .filter_map(|item| {
                let message = match item.ncm.as_deref().map(str::trim) {
                    None | Some("") => format!("item {} has no NCM code", item.item_number),
                    Some(ncm) if !is_valid_ncm(ncm) => format!(
                        "item {} NCM '{}' must be 8 digits (or 00 for services)",
                        item.item_number, ncm
                    ),
                    Some(_) => return None,
                };
                Some(
                    ValidationIssue::warning(self.code(), message)
                        .with_field(item_field(item, "ncm")),
                )
            })
            .collect()
    }
}

pub struct ItemCfopFormat;

impl DocumentRule for ItemCfopFormat {
    fn code(&self) -> &'static str {
        codes::ITEM_CFOP_FORMAT
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let cfop_required = document.document_type.is_invoice();
        document
            .items
            .iter()
            .filter_map(|item| {
                let message = match item.cfop.as_deref().map(str::trim) {
                    None | Some("") if cfop_required => {
                        format!("item {} has no CFOP", item.item_number)
                    }
                    None | Some("") => return None,
                    Some(cfop) if !is_valid_cfop(cfop) => format!(
                        "item {} CFOP '{}' is not a valid operation code",
                        item.item_number, cfop
                    ),
                    Some(_) => return None,
                };
                Some(
                    ValidationIssue::warning(self.code(), message)
                        .with_field(item_field(item, "cfop")),
                )
            })
            .collect()
    }
}

/// Consumer sales are always intrastate, so their CFOP belongs to the 5xxx group.
pub struct ConsumerCfop;

impl DocumentRule for ConsumerCfop {
    fn code(&self) -> &'static str {
        codes::ITEM_CFOP_NOT_CONSUMER
    }

    fn applies_to(&self, document_type: DocumentType) -> bool {
        document_type == DocumentType::ConsumerInvoice
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        document
            .items
            .iter()
            .filter_map(|item| {
                let cfop = item.cfop.as_deref().map(str::trim)?;
                if !is_valid_cfop(cfop) || cfop.starts_with('5') {
                    return None;
                }
                Some(
                    ValidationIssue::warning(
                        self.code(),
                        format!(
                            "item {} CFOP {} is not an intrastate sale code",
                            item.item_number, cfop
                        ),
                    )
                    .with_field(item_field(item, "cfop"))
                    .with_suggestion("consumer invoices use CFOP 5xxx"),
                )
            })
            .collect()
    }
}

fn referenced_keys(document: &FiscalDocument) -> &[String] {
    match &document.details {
        DocumentDetails::Freight {
            referenced_keys, ..
        } => referenced_keys,
        _ => &[],
    }
}

pub struct FreightHasReferences;

impl DocumentRule for FreightHasReferences {
    fn code(&self) -> &'static str {
        codes::FREIGHT_NO_REFERENCED_DOCUMENTS
    }

    fn applies_to(&self, document_type: DocumentType) -> bool {
        document_type == DocumentType::FreightManifest
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        if !referenced_keys(document).is_empty() {
            return Vec::new();
        }
        vec![ValidationIssue::warning(
            self.code(),
            "freight manifest does not reference any transported document",
        )
        .with_field("details.referenced_keys")]
    }
}

pub struct FreightReferenceFormat;

impl DocumentRule for FreightReferenceFormat {
    fn code(&self) -> &'static str {
        codes::FREIGHT_REFERENCED_KEY_FORMAT
    }

    fn applies_to(&self, document_type: DocumentType) -> bool {
        document_type == DocumentType::FreightManifest
    }

    fn check(&self, document: &FiscalDocument, _context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        referenced_keys(document)
            .iter()
            .enumerate()
            .filter(|(_, key)| !is_digits(key, DOCUMENT_KEY_LENGTH))
            .map(|(index, key)| {
                ValidationIssue::warning(
                    self.code(),
                    format!("referenced key '{}' is not {} digits", key, DOCUMENT_KEY_LENGTH),
                )
                .with_field(format!("details.referenced_keys[{}]", index))
            })
            .collect()
    }
}

pub struct IssueDateNotInFuture;

impl DocumentRule for IssueDateNotInFuture {
    fn code(&self) -> &'static str {
        codes::ISSUE_DATE_IN_FUTURE
    }

    fn check(&self, document: &FiscalDocument, context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        let latest = match context.now.checked_add_signed(context.config.max_clock_skew) {
            Some(latest) => latest,
            None => return Vec::new(),
        };
        if document.issue_date <= latest {
            return Vec::new();
        }
        vec![ValidationIssue::error(
            self.code(),
            format!(
                "issue date {} is later than {}",
                document.issue_date.to_rfc3339(),
                latest.to_rfc3339()
            ),
        )
        .with_field("issue_date")]
    }
}

pub struct IssueDateNotTooOld;

impl DocumentRule for IssueDateNotTooOld {
    fn code(&self) -> &'static str {
        codes::ISSUE_DATE_TOO_OLD
    }

    fn check(&self, document: &FiscalDocument, context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        if document.issue_date >= context.config.min_issue_date {
            return Vec::new();
        }
        vec![ValidationIssue::warning(
            self.code(),
            format!(
                "issue date {} predates {}",
                document.issue_date.to_rfc3339(),
                context.config.min_issue_date.to_rfc3339()
            ),
        )
        .with_field("issue_date")]
    }
}

pub struct HighTotalValue;

impl DocumentRule for HighTotalValue {
    fn code(&self) -> &'static str {
        codes::HIGH_TOTAL_VALUE
    }

    fn check(&self, document: &FiscalDocument, context: &RuleContext<'_>) -> Vec<ValidationIssue> {
        if document.total_document <= context.config.high_value_threshold {
            return Vec::new();
        }
        vec![ValidationIssue::info(
            self.code(),
            format!(
                "document total {} exceeds {}",
                document.total_document, context.config.high_value_threshold
            ),
        )
        .with_field("total_document")]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fiscal_document::{TaxAmounts, TaxKind};
    use crate::models::validation_issue::Severity;
    use chrono::TimeZone;
    use rust_decimal::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap()
    }

    fn item(number: i32, quantity: Decimal, unit_price: Decimal, total: Decimal) -> LineItem {
        LineItem {
            item_number: number,
            product_code: format!("P{}", number),
            description: "Parafuso".to_string(),
            ncm: Some("73181500".to_string()),
            cfop: Some("5102".to_string()),
            unit: "UN".to_string(),
            quantity,
            unit_price,
            total_price: total,
            taxes: TaxAmounts::default(),
        }
    }

    fn invoice() -> FiscalDocument {
        FiscalDocument {
            document_type: DocumentType::ProductInvoice,
            document_key: "35240511222333000181550010000012341123456789".to_string(),
            document_number: "1234".to_string(),
            series: "1".to_string(),
            issue_date: Utc.with_ymd_and_hms(2024, 5, 10, 9, 30, 0).unwrap(),
            issuer: Party {
                tax_id: "11222333000181".to_string(),
                name: "Ferragens Paulista Ltda".to_string(),
            },
            recipient: Some(Party {
                tax_id: "33456471000168".to_string(),
                name: "Construtora Horizonte SA".to_string(),
            }),
            total_products: dec!(150.00),
            total_taxes: dec!(27.00),
            total_document: dec!(150.00),
            tax_totals: TaxAmounts::default().with(TaxKind::Icms, dec!(27.00)),
            details: DocumentDetails::empty_for(DocumentType::ProductInvoice),
            items: vec![
                LineItem {
                    taxes: TaxAmounts::default().with(TaxKind::Icms, dec!(18.00)),
                    ..item(1, dec!(10), dec!(10.00), dec!(100.00))
                },
                LineItem {
                    taxes: TaxAmounts::default().with(TaxKind::Icms, dec!(9.00)),
                    ..item(2, dec!(5), dec!(10.00), dec!(50.00))
                },
            ],
            raw_content: String::new(),
            parsed_at: now(),
        }
    }

    fn run(rule: &dyn DocumentRule, document: &FiscalDocument) -> Vec<ValidationIssue> {
        let config = ValidationConfig::default();
        rule.check(document, &RuleContext::new(&config, now()))
    }

    #[test]
    fn battery_is_clean_for_consistent_invoice() {
        let document = invoice();
        let issues: Vec<_> = default_rules()
            .iter()
            .filter(|rule| rule.applies_to(document.document_type))
            .flat_map(|rule| run(rule.as_ref(), &document))
            .collect();
        assert!(issues.is_empty(), "unexpected issues: {:?}", issues);
    }

    #[test]
    fn codes_are_unique_and_ordered() {
        let codes: Vec<_> = default_rules().iter().map(|rule| rule.code()).collect();
        assert_eq!(codes.len(), 23);
        assert_eq!(codes.iter().unique().count(), 23);
        assert_eq!(codes[0], codes::DOC_KEY_FORMAT);
        assert_eq!(codes[22], codes::HIGH_TOTAL_VALUE);
    }

    #[test]
    fn malformed_key_skips_dependent_checks() {
        let mut document = invoice();
        document.document_key = "NFe123".to_string();
        assert_eq!(run(&DocumentKeyFormat, &document).len(), 1);
        assert!(run(&DocumentKeyCheckDigit, &document).is_empty());
        assert!(run(&DocumentKeyModel, &document).is_empty());
        assert!(run(&DocumentKeyIssuer, &document).is_empty());
    }

    #[test]
    fn wrong_check_digit_is_error() {
        let mut document = invoice();
        document.document_key = "35240511222333000181550010000012341123456788".to_string();
        let issues = run(&DocumentKeyCheckDigit, &document);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
    }

    #[test]
    fn model_and_issuer_mismatch_are_warnings() {
        let mut document = invoice();
        document.document_type = DocumentType::ConsumerInvoice;
        document.issuer.tax_id = "04571234000140".to_string();
        let model = run(&DocumentKeyModel, &document);
        let issuer = run(&DocumentKeyIssuer, &document);
        assert_eq!(model[0].severity, Severity::Warning);
        assert_eq!(issuer[0].field.as_deref(), Some("issuer.tax_id"));
    }

    #[test]
    fn header_fields_reported_individually() {
        let mut document = invoice();
        document.series = " ".to_string();
        document.issuer.name.clear();
        let fields: Vec<_> = run(&HeaderFieldsPresent, &document)
            .into_iter()
            .filter_map(|issue| issue.field)
            .collect();
        assert_eq!(fields, vec!["series", "issuer.name"]);
    }

    #[test]
    fn tax_id_shape_and_checksum() {
        let mut document = invoice();
        document.issuer.tax_id = "12345678900".to_string();
        document.recipient.as_mut().unwrap().tax_id = "ABC".to_string();
        let format = run(&PartyTaxIdFormat, &document);
        let checksum = run(&PartyTaxIdChecksum, &document);
        assert_eq!(format.len(), 1);
        assert_eq!(format[0].field.as_deref(), Some("recipient.tax_id"));
        assert_eq!(checksum.len(), 1);
        assert_eq!(checksum[0].field.as_deref(), Some("issuer.tax_id"));
    }

    #[test]
    fn recipient_rules() {
        let mut document = invoice();
        document.recipient.as_mut().unwrap().tax_id = document.issuer.tax_id.clone();
        assert_eq!(run(&RecipientIsIssuer, &document)[0].severity, Severity::Info);

        document.recipient = None;
        assert_eq!(run(&RecipientPresent, &document).len(), 1);
        assert!(!RecipientPresent.applies_to(DocumentType::ConsumerInvoice));
    }

    #[test]
    fn item_total_tolerance_is_inclusive() {
        let mut document = invoice();
        document.items[0].total_price = dec!(100.01);
        assert!(run(&ItemTotalConsistent, &document).is_empty());

        document.items[0].total_price = dec!(100.02);
        let issues = run(&ItemTotalConsistent, &document);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].field.as_deref(), Some("items[1].total_price"));
    }

    #[test]
    fn total_products_discrepancy() {
        let mut document = invoice();
        document.total_products = dec!(151.00);
        let issues = run(&TotalProductsConsistent, &document);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].is_error());

        document.total_products = dec!(150.01);
        assert!(run(&TotalProductsConsistent, &document).is_empty());
    }

    #[test]
    fn tax_mismatch_is_reported_per_kind() {
        let mut document = invoice();
        document.tax_totals.set(TaxKind::Icms, dec!(30.00));
        document.tax_totals.set(TaxKind::Pis, dec!(1.00));
        let fields: Vec<_> = run(&TaxTotalsConsistent, &document)
            .into_iter()
            .filter_map(|issue| issue.field)
            .collect();
        assert_eq!(fields, vec!["tax_totals.icms", "tax_totals.pis"]);
    }

    #[test]
    fn tax_kind_applicability_lists_items() {
        let mut document = invoice();
        document.document_type = DocumentType::ConsumerInvoice;
        document.items[1].taxes.set(TaxKind::Ipi, dec!(2.50));
        let issues = run(&TaxKindApplicable, &document);
        assert_eq!(issues.len(), 1);
        assert!(issues[0].message.contains("IPI"));
        assert!(issues[0].message.ends_with("items 2"));
    }

    #[test]
    fn ncm_and_cfop_formats() {
        let mut document = invoice();
        document.items[0].ncm = None;
        document.items[1].ncm = Some("7318".to_string());
        document.items[1].cfop = Some("4102".to_string());
        assert_eq!(run(&ItemNcmFormat, &document).len(), 2);
        assert_eq!(run(&ItemCfopFormat, &document).len(), 1);

        document.document_type = DocumentType::ConsumerInvoice;
        document.items[0].cfop = Some("6102".to_string());
        let consumer = run(&ConsumerCfop, &document);
        assert_eq!(consumer.len(), 1);
        assert_eq!(consumer[0].field.as_deref(), Some("items[1].cfop"));
    }

    #[test]
    fn transport_items_without_cfop_are_accepted() {
        let mut document = invoice();
        document.document_type = DocumentType::TransportManifest;
        document.items[0].cfop = None;
        assert!(run(&ItemCfopFormat, &document).is_empty());
    }

    #[test]
    fn freight_references() {
        let mut document = invoice();
        document.document_type = DocumentType::FreightManifest;
        document.details = DocumentDetails::empty_for(DocumentType::FreightManifest);
        assert_eq!(run(&FreightHasReferences, &document).len(), 1);

        if let DocumentDetails::Freight {
            referenced_keys, ..
        } = &mut document.details
        {
            referenced_keys.push("35240511222333000181550010000012341123456789".to_string());
            referenced_keys.push("123".to_string());
        }
        assert!(run(&FreightHasReferences, &document).is_empty());
        let format = run(&FreightReferenceFormat, &document);
        assert_eq!(format.len(), 1);
        assert_eq!(format[0].field.as_deref(), Some("details.referenced_keys[1]"));
    }

    #[test]
    fn temporal_bounds() {
        let mut document = invoice();
        document.issue_date = now() + chrono::Duration::minutes(5);
        assert!(run(&IssueDateNotInFuture, &document).is_empty());

        document.issue_date = now() + chrono::Duration::minutes(6);
        assert_eq!(run(&IssueDateNotInFuture, &document).len(), 1);

        document.issue_date = Utc.with_ymd_and_hms(2005, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(run(&IssueDateNotTooOld, &document).len(), 1);
    }

    #[test]
    fn high_value_threshold_is_strict() {
        let mut document = invoice();
        document.total_document = dec!(1000000.00);
        assert!(run(&HighTotalValue, &document).is_empty());

        document.total_document = dec!(1000000.01);
        assert_eq!(run(&HighTotalValue, &document)[0].severity, Severity::Info);
    }
}
