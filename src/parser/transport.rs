//! CT-e (model 57) extraction. Each service component of the freight price
//! becomes one line item.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::error::ParseError;
use crate::models::fiscal_document::{
    DocumentDetails, DocumentType, FiscalDocument, TaxAmounts, TaxKind,
};
use crate::models::line_item::LineItem;
use crate::parser::fields::{
    decimal_value, document_key, issue_date, issuer, optional_decimal, optional_text, recipient,
    required, required_decimal, text_or_empty,
};
use crate::parser::xml::XmlElement;

const TYPE: DocumentType = DocumentType::TransportManifest;
const SERVICE_UNIT: &str = "SV";

fn component_item(
    component: &XmlElement,
    item_number: i32,
    cfop: Option<&String>,
) -> Result<LineItem, ParseError> {
    let value = component
        .text_at("vComp")
        .ok_or_else(|| {
            ParseError::schema(
                TYPE,
                format!("vPrest/Comp[{}]/vComp", item_number),
                "value is missing",
            )
        })
        .and_then(|literal| {
            decimal_value(literal, TYPE, &format!("vPrest/Comp[{}]/vComp", item_number))
        })?;

    Ok(LineItem {
        item_number,
        product_code: item_number.to_string(),
        description: text_or_empty(component, "xNome"),
        ncm: None,
        cfop: cfop.cloned(),
        unit: SERVICE_UNIT.to_string(),
        quantity: Decimal::ONE,
        unit_price: value,
        total_price: value,
        taxes: TaxAmounts::default(),
    })
}

pub(crate) fn parse_transport(
    root: &XmlElement,
    info: &XmlElement,
    raw_content: &str,
    parsed_at: DateTime<Utc>,
) -> Result<FiscalDocument, ParseError> {
    let ide = required(info.child("ide"), TYPE, "ide")?;
    let cfop = optional_text(ide, "CFOP");

    let prest = required(info.child("vPrest"), TYPE, "vPrest")?;
    let total = required_decimal(prest, "vTPrest", TYPE, "vPrest/vTPrest")?;

    let items = prest
        .children_named("Comp")
        .enumerate()
        .map(|(index, component)| component_item(component, index as i32 + 1, cfop.as_ref()))
        .collect::<Result<Vec<_>, _>>()?;

    let mut tax_totals = TaxAmounts::default();
    let icms = info
        .at("imp/ICMS")
        .and_then(|group| group.find("vICMS"))
        .and_then(XmlElement::text)
        .map(|literal| decimal_value(literal, TYPE, "imp/ICMS/vICMS"))
        .transpose()?;
    if let Some(icms) = icms {
        tax_totals.set(TaxKind::Icms, icms);
    }
    let declared_taxes = optional_decimal(info, "imp/vTotTrib", TYPE, "imp/vTotTrib")?;
    let total_taxes = match declared_taxes.filter(|declared| !declared.is_zero()) {
        Some(declared) => declared,
        None => tax_totals
            .total()
            .ok_or_else(|| ParseError::schema(TYPE, "imp", "tax totals overflow"))?,
    };

    Ok(FiscalDocument {
        document_type: TYPE,
        document_key: document_key(info, root.find("infProt"), TYPE, "chCTe")?,
        document_number: text_or_empty(ide, "nCT"),
        series: text_or_empty(ide, "serie"),
        issue_date: issue_date(ide, TYPE)?,
        issuer: issuer(info, TYPE)?,
        recipient: recipient(info),
        total_products: total,
        total_taxes,
        total_document: total,
        tax_totals,
        details: DocumentDetails::Transport {
            cfop,
            modal: optional_text(ide, "modal"),
            origin_city: optional_text(ide, "xMunIni"),
            destination_city: optional_text(ide, "xMunFim"),
            amount_receivable: optional_decimal(prest, "vRec", TYPE, "vPrest/vRec")?,
        },
        items,
        raw_content: raw_content.to_string(),
        parsed_at,
    })
}
