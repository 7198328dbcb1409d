//! Field extraction shared by the per-family parsers.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;

use crate::error::ParseError;
use crate::models::fiscal_document::{DocumentType, Party};
use crate::parser::xml::XmlElement;

pub(crate) fn optional_text(element: &XmlElement, path: &str) -> Option<String> {
    element.text_at(path).map(str::to_string)
}

pub(crate) fn text_or_empty(element: &XmlElement, path: &str) -> String {
    optional_text(element, path).unwrap_or_default()
}

pub(crate) fn required<'a>(
    element: Option<&'a XmlElement>,
    document_type: DocumentType,
    field: &str,
) -> Result<&'a XmlElement, ParseError> {
    element.ok_or_else(|| ParseError::schema(document_type, field, "element is missing"))
}

/// Parses a monetary or quantity literal. Scale is kept as written.
pub(crate) fn decimal_value(
    literal: &str,
    document_type: DocumentType,
    field: &str,
) -> Result<Decimal, ParseError> {
    let value = Decimal::from_str(literal.trim()).map_err(|_| {
        ParseError::schema(
            document_type,
            field,
            format!("'{}' is not a decimal number", literal.trim()),
        )
    })?;
    if value.is_sign_negative() && !value.is_zero() {
        return Err(ParseError::schema(
            document_type,
            field,
            format!("'{}' is negative", literal.trim()),
        ));
    }
    Ok(value)
}

pub(crate) fn optional_decimal(
    element: &XmlElement,
    path: &str,
    document_type: DocumentType,
    field: &str,
) -> Result<Option<Decimal>, ParseError> {
    element
        .text_at(path)
        .map(|literal| decimal_value(literal, document_type, field))
        .transpose()
}

pub(crate) fn required_decimal(
    element: &XmlElement,
    path: &str,
    document_type: DocumentType,
    field: &str,
) -> Result<Decimal, ParseError> {
    optional_decimal(element, path, document_type, field)?
        .ok_or_else(|| ParseError::schema(document_type, field, "value is missing"))
}

/// Reads `dhEmi` (RFC 3339 or naive UTC) or the legacy date-only `dEmi`.
pub(crate) fn issue_date(ide: &XmlElement, document_type: DocumentType) -> Result<DateTime<Utc>, ParseError> {
    if let Some(literal) = ide.text_at("dhEmi") {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(literal) {
            return Ok(parsed.with_timezone(&Utc));
        }
        return NaiveDateTime::parse_from_str(literal, "%Y-%m-%dT%H:%M:%S")
            .map(|naive| naive.and_utc())
            .map_err(|_| {
                ParseError::schema(
                    document_type,
                    "ide/dhEmi",
                    format!("'{}' is not a valid timestamp", literal),
                )
            });
    }

    if let Some(literal) = ide.text_at("dEmi") {
        return NaiveDate::parse_from_str(literal, "%Y-%m-%d")
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| naive.and_utc())
            .ok_or_else(|| {
                ParseError::schema(
                    document_type,
                    "ide/dEmi",
                    format!("'{}' is not a valid date", literal),
                )
            });
    }

    Err(ParseError::schema(document_type, "ide/dhEmi", "issue date is missing"))
}

fn tax_id(party: &XmlElement) -> Option<String> {
    ["CNPJ", "CPF", "idEstrangeiro"]
        .iter()
        .find_map(|tag| party.text_at(tag))
        .map(str::to_string)
}

/// The issuer must carry a tax id; without it no record can be keyed to a
/// taxpayer.
pub(crate) fn issuer(info: &XmlElement, document_type: DocumentType) -> Result<Party, ParseError> {
    let emit = required(info.child("emit"), document_type, "emit")?;
    let tax_id = tax_id(emit)
        .ok_or_else(|| ParseError::schema(document_type, "emit/CNPJ", "issuer tax id is missing"))?;
    Ok(Party {
        tax_id,
        name: text_or_empty(emit, "xNome"),
    })
}

/// A present `dest` element always yields a party, even with blank fields, so
/// the validator can report what is wrong with it.
pub(crate) fn recipient(info: &XmlElement) -> Option<Party> {
    info.child("dest").map(|dest| Party {
        tax_id: tax_id(dest).unwrap_or_default(),
        name: text_or_empty(dest, "xNome"),
    })
}

/// Key from the info element's `Id` attribute (letter prefix dropped), or
/// from the authorization protocol (`infProt`).
pub(crate) fn document_key(
    info: &XmlElement,
    protocol: Option<&XmlElement>,
    document_type: DocumentType,
    protocol_key_tag: &str,
) -> Result<String, ParseError> {
    let from_id = info
        .attribute("Id")
        .map(|id| id.trim().trim_start_matches(|c: char| c.is_ascii_alphabetic()))
        .filter(|key| !key.is_empty());
    if let Some(key) = from_id {
        return Ok(key.to_string());
    }

    protocol
        .and_then(|prot| prot.text_at(protocol_key_tag))
        .map(str::to_string)
        .ok_or_else(|| ParseError::schema(document_type, "Id", "document key is missing"))
}

/// Model digits (positions 21-22) of a 44-digit key.
pub(crate) fn key_model_code(key: &str) -> Option<&str> {
    if key.len() == 44 && key.bytes().all(|b| b.is_ascii_digit()) {
        key.get(20..22)
    } else {
        None
    }
}
