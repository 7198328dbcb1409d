//! MDF-e (model 58) extraction. Manifests carry no line items or taxes; the
//! transported documents are kept as referenced keys.

use chrono::{DateTime, Utc};

use crate::error::ParseError;
use crate::models::fiscal_document::{DocumentDetails, DocumentType, FiscalDocument, TaxAmounts};
use crate::parser::fields::{
    document_key, issue_date, issuer, optional_decimal, optional_text, required, required_decimal,
    text_or_empty,
};
use crate::parser::xml::XmlElement;

const TYPE: DocumentType = DocumentType::FreightManifest;

fn referenced_keys(info: &XmlElement) -> Vec<String> {
    info.child("infDoc")
        .map(|documents| {
            documents
                .descendants()
                .filter(|element| element.name == "chNFe" || element.name == "chCTe")
                .filter_map(XmlElement::text)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn parse_freight(
    root: &XmlElement,
    info: &XmlElement,
    raw_content: &str,
    parsed_at: DateTime<Utc>,
) -> Result<FiscalDocument, ParseError> {
    let ide = required(info.child("ide"), TYPE, "ide")?;
    let tot = required(info.child("tot"), TYPE, "tot")?;
    let cargo_value = required_decimal(tot, "vCarga", TYPE, "tot/vCarga")?;

    Ok(FiscalDocument {
        document_type: TYPE,
        document_key: document_key(info, root.find("infProt"), TYPE, "chMDFe")?,
        document_number: text_or_empty(ide, "nMDF"),
        series: text_or_empty(ide, "serie"),
        issue_date: issue_date(ide, TYPE)?,
        issuer: issuer(info, TYPE)?,
        recipient: None,
        total_products: cargo_value,
        total_taxes: rust_decimal::Decimal::ZERO,
        total_document: cargo_value,
        tax_totals: TaxAmounts::default(),
        details: DocumentDetails::Freight {
            modal: optional_text(ide, "modal"),
            origin_state: optional_text(ide, "UFIni"),
            destination_state: optional_text(ide, "UFFim"),
            cargo_quantity: optional_decimal(tot, "qCarga", TYPE, "tot/qCarga")?,
            referenced_keys: referenced_keys(info),
        },
        items: Vec::new(),
        raw_content: raw_content.to_string(),
        parsed_at,
    })
}
