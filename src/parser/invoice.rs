//! NF-e (model 55) and NFC-e (model 65) extraction.

use chrono::{DateTime, Utc};

use crate::error::ParseError;
use crate::models::fiscal_document::{
    DocumentDetails, DocumentType, FiscalDocument, TaxAmounts, TaxKind,
};
use crate::models::line_item::LineItem;
use crate::parser::fields::{
    decimal_value, document_key, issue_date, issuer, key_model_code, optional_decimal,
    optional_text, recipient, required, required_decimal, text_or_empty,
};
use crate::parser::xml::XmlElement;

/// Item-level tax group and the value tag inside it.
const ITEM_TAX_GROUPS: [(TaxKind, &str, &str); 5] = [
    (TaxKind::Icms, "ICMS", "vICMS"),
    (TaxKind::Ipi, "IPI", "vIPI"),
    (TaxKind::Pis, "PIS", "vPIS"),
    (TaxKind::Cofins, "COFINS", "vCOFINS"),
    (TaxKind::Iss, "ISSQN", "vISSQN"),
];

fn invoice_type(ide: &XmlElement, key: &str) -> Result<DocumentType, ParseError> {
    let model = ide
        .text_at("mod")
        .or_else(|| key_model_code(key));

    model
        .and_then(DocumentType::from_model_code)
        .filter(|kind| kind.is_invoice())
        .ok_or_else(|| {
            ParseError::schema(
                DocumentType::ProductInvoice,
                "ide/mod",
                format!("model {:?} is not an invoice model (55 or 65)", model.unwrap_or("")),
            )
        })
}

fn line_item(
    det: &XmlElement,
    item_number: i32,
    document_type: DocumentType,
) -> Result<LineItem, ParseError> {
    let prefix = format!("det[{}]", item_number);
    let prod = required(det.child("prod"), document_type, &format!("{}/prod", prefix))?;
    let field = |tag: &str| format!("{}/prod/{}", prefix, tag);

    let mut taxes = TaxAmounts::default();
    if let Some(imposto) = det.child("imposto") {
        for (kind, group, value_tag) in ITEM_TAX_GROUPS {
            let amount = imposto
                .child(group)
                .and_then(|group| group.find(value_tag))
                .and_then(XmlElement::text)
                .map(|literal| {
                    decimal_value(
                        literal,
                        document_type,
                        &format!("{}/imposto/{}/{}", prefix, group, value_tag),
                    )
                })
                .transpose()?;
            if let Some(amount) = amount {
                taxes.set(kind, amount);
            }
        }
    }

    Ok(LineItem {
        item_number,
        product_code: text_or_empty(prod, "cProd"),
        description: text_or_empty(prod, "xProd"),
        ncm: optional_text(prod, "NCM"),
        cfop: optional_text(prod, "CFOP"),
        unit: text_or_empty(prod, "uCom"),
        quantity: required_decimal(prod, "qCom", document_type, &field("qCom"))?,
        unit_price: required_decimal(prod, "vUnCom", document_type, &field("vUnCom"))?,
        total_price: required_decimal(prod, "vProd", document_type, &field("vProd"))?,
        taxes,
    })
}

pub(crate) fn parse_invoice(
    root: &XmlElement,
    info: &XmlElement,
    raw_content: &str,
    parsed_at: DateTime<Utc>,
) -> Result<FiscalDocument, ParseError> {
    let ide = required(info.child("ide"), DocumentType::ProductInvoice, "ide")?;
    let protocol = root.find("infProt");
    let document_key = document_key(info, protocol, DocumentType::ProductInvoice, "chNFe")?;
    let document_type = invoice_type(ide, &document_key)?;

    let totals = required(info.at("total/ICMSTot"), document_type, "total/ICMSTot")?;
    let total_field = |tag: &str| format!("total/ICMSTot/{}", tag);
    let mut tax_totals = TaxAmounts::default();
    for (kind, tag) in [
        (TaxKind::Icms, "vICMS"),
        (TaxKind::Ipi, "vIPI"),
        (TaxKind::Pis, "vPIS"),
        (TaxKind::Cofins, "vCOFINS"),
    ] {
        if let Some(amount) = optional_decimal(totals, tag, document_type, &total_field(tag))? {
            tax_totals.set(kind, amount);
        }
    }
    let iss_path = "total/ISSQNtot/vISS";
    if let Some(iss) = optional_decimal(info, iss_path, document_type, iss_path)? {
        tax_totals.set(TaxKind::Iss, iss);
    }

    let declared_taxes =
        optional_decimal(totals, "vTotTrib", document_type, &total_field("vTotTrib"))?;
    let total_taxes = match declared_taxes.filter(|declared| !declared.is_zero()) {
        Some(declared) => declared,
        None => tax_totals.total().ok_or_else(|| {
            ParseError::schema(document_type, "total/ICMSTot", "tax totals overflow")
        })?,
    };

    let items = info
        .children_named("det")
        .enumerate()
        .map(|(index, det)| line_item(det, index as i32 + 1, document_type))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FiscalDocument {
        document_type,
        document_number: text_or_empty(ide, "nNF"),
        series: text_or_empty(ide, "serie"),
        issue_date: issue_date(ide, document_type)?,
        issuer: issuer(info, document_type)?,
        recipient: recipient(info),
        total_products: required_decimal(totals, "vProd", document_type, &total_field("vProd"))?,
        total_taxes,
        total_document: required_decimal(totals, "vNF", document_type, &total_field("vNF"))?,
        tax_totals,
        details: DocumentDetails::Invoice {
            operation_nature: optional_text(ide, "natOp"),
            operation_type: optional_text(ide, "tpNF"),
            authorization_protocol: protocol.and_then(|prot| optional_text(prot, "nProt")),
        },
        items,
        document_key,
        raw_content: raw_content.to_string(),
        parsed_at,
    })
}
