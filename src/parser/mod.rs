//! Document Parser
//!
//! Turns raw payload bytes into a canonical [`FiscalDocument`]. The document
//! family is detected from the info element present in the tree; the
//! per-family modules extract header, totals, items and details.
//!
//! Parsing is a pure function of the input bytes (plus the `parsed_at`
//! stamp) and is safe to run concurrently.

use chrono::{DateTime, Utc};

use crate::error::ParseError;
use crate::models::fiscal_document::FiscalDocument;

mod fields;
mod freight;
mod invoice;
mod transport;
pub mod xml;

use xml::XmlElement;

const UTF8_BOM: char = '\u{feff}';

/// Schema family, identified by its info element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFamily {
    /// `infNFe`, covering models 55 and 65.
    Invoice,
    /// `infCte`.
    Transport,
    /// `infMDFe`.
    Freight,
}

impl DocumentFamily {
    pub const ALL: [DocumentFamily; 3] = [
        DocumentFamily::Invoice,
        DocumentFamily::Transport,
        DocumentFamily::Freight,
    ];

    pub fn marker(self) -> &'static str {
        match self {
            DocumentFamily::Invoice => "infNFe",
            DocumentFamily::Transport => "infCte",
            DocumentFamily::Freight => "infMDFe",
        }
    }

    fn from_marker(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|family| family.marker() == name)
    }
}

/// Finds the first info element in document order. Manifests embed
/// `infNFe` references below their own info element, so order matters.
pub fn detect_family(root: &XmlElement) -> Result<(DocumentFamily, &XmlElement), ParseError> {
    std::iter::once(root)
        .chain(root.descendants())
        .find_map(|element| {
            DocumentFamily::from_marker(&element.name).map(|family| (family, element))
        })
        .ok_or_else(|| {
            ParseError::unrecognized(format!(
                "root <{}> contains none of infNFe, infCte, infMDFe",
                root.name
            ))
        })
}

/// Decodes the payload as UTF-8 text. A leading byte-order mark is dropped.
fn decode(payload: &[u8]) -> Result<&str, ParseError> {
    let text = std::str::from_utf8(payload)
        .map_err(|err| ParseError::malformed(format!("payload is not UTF-8: {}", err)))?;
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);

    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return Err(ParseError::malformed("payload is empty"));
    }
    if !trimmed.starts_with('<') {
        return Err(ParseError::malformed("payload is not markup"));
    }
    Ok(text)
}

/// Parses a payload, stamping it with the current time.
pub fn parse_document(payload: &[u8]) -> Result<FiscalDocument, ParseError> {
    parse_document_at(payload, Utc::now())
}

pub fn parse_document_at(
    payload: &[u8],
    parsed_at: DateTime<Utc>,
) -> Result<FiscalDocument, ParseError> {
    let text = decode(payload)?;
    let root = xml::parse_tree(text)?;
    let (family, info) = detect_family(&root)?;

    match family {
        DocumentFamily::Invoice => invoice::parse_invoice(&root, info, text, parsed_at),
        DocumentFamily::Transport => transport::parse_transport(&root, info, text, parsed_at),
        DocumentFamily::Freight => freight::parse_freight(&root, info, text, parsed_at),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fiscal_document::{DocumentDetails, DocumentType, TaxKind};
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn dec(value: &str) -> Decimal {
        Decimal::from_str(value).unwrap()
    }

    fn parsed_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap()
    }

    const NFE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<nfeProc xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00">
  <NFe>
    <infNFe Id="NFe35240511222333000181550010000012341123456789" versao="4.00">
      <ide><natOp>VENDA</natOp><mod>55</mod><serie>1</serie><nNF>1234</nNF>
        <dhEmi>2024-05-10T10:30:00-03:00</dhEmi><tpNF>1</tpNF></ide>
      <emit><CNPJ>11222333000181</CNPJ><xNome>Emitente Ltda</xNome></emit>
      <dest><CNPJ>33456471000168</CNPJ><xNome>Destinatario SA</xNome></dest>
      <det nItem="7">
        <prod><cProd>A1</cProd><xProd>Parafuso</xProd><NCM>73181500</NCM><CFOP>5102</CFOP>
          <uCom>UN</uCom><qCom>10.0000</qCom><vUnCom>2.5000</vUnCom><vProd>25.00</vProd></prod>
        <imposto><ICMS><ICMS00><vICMS>4.50</vICMS></ICMS00></ICMS>
          <IPI><IPITrib><vIPI>1.25</vIPI></IPITrib></IPI></imposto>
      </det>
      <det nItem="9">
        <prod><cProd>B2</cProd><xProd>Porca</xProd><NCM>73181600</NCM><CFOP>5102</CFOP>
          <uCom>UN</uCom><qCom>5</qCom><vUnCom>3.00</vUnCom><vProd>15.00</vProd></prod>
        <imposto><ICMS><ICMS00><vICMS>2.70</vICMS></ICMS00></ICMS></imposto>
      </det>
      <total><ICMSTot><vProd>40.00</vProd><vICMS>7.20</vICMS><vIPI>1.25</vIPI>
        <vPIS>0.00</vPIS><vCOFINS>0.00</vCOFINS><vNF>41.25</vNF></ICMSTot></total>
    </infNFe>
  </NFe>
  <protNFe><infProt><chNFe>35240511222333000181550010000012341123456789</chNFe>
    <nProt>135240000000001</nProt></infProt></protNFe>
</nfeProc>"#;

    #[test]
    fn parses_product_invoice() {
        let doc = parse_document_at(NFE.as_bytes(), parsed_at()).unwrap();

        assert_eq!(doc.document_type, DocumentType::ProductInvoice);
        assert_eq!(doc.document_key, "35240511222333000181550010000012341123456789");
        assert_eq!(doc.document_number, "1234");
        assert_eq!(doc.series, "1");
        assert_eq!(
            doc.issue_date,
            Utc.with_ymd_and_hms(2024, 5, 10, 13, 30, 0).unwrap()
        );
        assert_eq!(doc.issuer.tax_id, "11222333000181");
        assert_eq!(doc.recipient.as_ref().unwrap().name, "Destinatario SA");
        assert_eq!(doc.total_products, dec("40.00"));
        assert_eq!(doc.total_document, dec("41.25"));
        assert_eq!(doc.total_taxes, dec("8.45"));
        assert_eq!(doc.tax_totals.get(TaxKind::Ipi), dec("1.25"));
        assert_eq!(doc.parsed_at, parsed_at());
        assert_eq!(doc.raw_content, NFE);

        let numbers: Vec<i32> = doc.items.iter().map(|item| item.item_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(doc.items[0].quantity.to_string(), "10.0000");
        assert_eq!(doc.items[0].taxes.get(TaxKind::Icms), dec("4.50"));
        assert_eq!(doc.items[1].taxes.get(TaxKind::Ipi), Decimal::ZERO);

        match &doc.details {
            DocumentDetails::Invoice {
                operation_nature,
                authorization_protocol,
                ..
            } => {
                assert_eq!(operation_nature.as_deref(), Some("VENDA"));
                assert_eq!(authorization_protocol.as_deref(), Some("135240000000001"));
            }
            other => panic!("unexpected details {:?}", other),
        }
    }

    #[test]
    fn declared_tax_total_wins_when_present() {
        let xml = NFE.replace("<vNF>41.25</vNF>", "<vNF>41.25</vNF><vTotTrib>9.99</vTotTrib>");
        let doc = parse_document_at(xml.as_bytes(), parsed_at()).unwrap();
        assert_eq!(doc.total_taxes, dec("9.99"));
    }

    #[test]
    fn overflowing_tax_totals_are_schema_violation() {
        let max = Decimal::MAX.to_string();
        let xml = NFE.replace(
            "<vICMS>7.20</vICMS><vIPI>1.25</vIPI>",
            &format!("<vICMS>{max}</vICMS><vIPI>{max}</vIPI>"),
        );
        let err = parse_document_at(xml.as_bytes(), parsed_at()).unwrap_err();
        assert!(matches!(err, ParseError::SchemaViolation { ref field, .. } if field == "total/ICMSTot"));

        let declared = xml.replace("<vNF>41.25</vNF>", "<vNF>41.25</vNF><vTotTrib>9.99</vTotTrib>");
        let doc = parse_document_at(declared.as_bytes(), parsed_at()).unwrap();
        assert_eq!(doc.total_taxes, dec("9.99"));
    }

    #[test]
    fn consumer_model_from_ide() {
        let xml = NFE.replace("<mod>55</mod>", "<mod>65</mod>");
        let doc = parse_document_at(xml.as_bytes(), parsed_at()).unwrap();
        assert_eq!(doc.document_type, DocumentType::ConsumerInvoice);
    }

    #[test]
    fn model_falls_back_to_key_digits() {
        let xml = NFE.replace("<mod>55</mod>", "");
        let doc = parse_document_at(xml.as_bytes(), parsed_at()).unwrap();
        assert_eq!(doc.document_type, DocumentType::ProductInvoice);
    }

    #[test]
    fn foreign_model_is_schema_violation() {
        let xml = NFE.replace("<mod>55</mod>", "<mod>57</mod>");
        let err = parse_document_at(xml.as_bytes(), parsed_at()).unwrap_err();
        assert!(matches!(err, ParseError::SchemaViolation { ref field, .. } if field == "ide/mod"));
    }

    #[test]
    fn missing_issuer_tax_id_is_schema_violation() {
        let xml = NFE.replace("<CNPJ>11222333000181</CNPJ>", "");
        let err = parse_document_at(xml.as_bytes(), parsed_at()).unwrap_err();
        assert!(matches!(err, ParseError::SchemaViolation { ref field, .. } if field == "emit/CNPJ"));
    }

    #[test]
    fn negative_amount_is_schema_violation() {
        let xml = NFE.replace("<vProd>15.00</vProd>", "<vProd>-15.00</vProd>");
        let err = parse_document_at(xml.as_bytes(), parsed_at()).unwrap_err();
        assert!(matches!(err, ParseError::SchemaViolation { ref field, .. } if field == "det[2]/prod/vProd"));
    }

    #[test]
    fn bom_is_tolerated() {
        let mut payload = "\u{feff}".as_bytes().to_vec();
        payload.extend_from_slice(NFE.as_bytes());
        assert!(parse_document_at(&payload, parsed_at()).is_ok());
    }

    #[test]
    fn classifies_bad_payloads() {
        let cases: [(&[u8], &str); 5] = [
            (b"", "malformed"),
            (b"   ", "malformed"),
            (b"{\"json\": true}", "malformed"),
            (&[0x3c, 0xff, 0xfe], "malformed"),
            (b"<invoice><number>1</number></invoice>", "unrecognized"),
        ];

        for (payload, expected) in cases {
            let err = parse_document_at(payload, parsed_at()).unwrap_err();
            let kind = match err {
                ParseError::MalformedInput { .. } => "malformed",
                ParseError::UnrecognizedFormat { .. } => "unrecognized",
                ParseError::SchemaViolation { .. } => "schema",
            };
            assert_eq!(kind, expected, "payload {:?}", payload);
        }
    }

    #[test]
    fn parses_transport_manifest() {
        let xml = r#"<cteProc><CTe><infCte Id="CTe35240511222333000181570010000005551556677888">
  <ide><CFOP>5353</CFOP><mod>57</mod><serie>1</serie><nCT>555</nCT>
    <dhEmi>2024-05-11T08:00:00-03:00</dhEmi><modal>01</modal>
    <xMunIni>SAO PAULO</xMunIni><xMunFim>CAMPINAS</xMunFim></ide>
  <emit><CNPJ>11222333000181</CNPJ><xNome>Transportadora</xNome></emit>
  <dest><CNPJ>33456471000168</CNPJ><xNome>Cliente</xNome></dest>
  <vPrest><vTPrest>150.00</vTPrest><vRec>150.00</vRec>
    <Comp><xNome>FRETE PESO</xNome><vComp>120.00</vComp></Comp>
    <Comp><xNome>PEDAGIO</xNome><vComp>30.00</vComp></Comp></vPrest>
  <imp><ICMS><ICMS00><vBC>150.00</vBC><vICMS>18.00</vICMS></ICMS00></ICMS></imp>
</infCte></CTe></cteProc>"#;

        let doc = parse_document_at(xml.as_bytes(), parsed_at()).unwrap();
        assert_eq!(doc.document_type, DocumentType::TransportManifest);
        assert_eq!(doc.document_number, "555");
        assert_eq!(doc.total_document, dec("150.00"));
        assert_eq!(doc.total_taxes, dec("18.00"));
        assert_eq!(doc.items.len(), 2);
        assert_eq!(doc.items[1].description, "PEDAGIO");
        assert_eq!(doc.items[1].product_code, "2");
        assert_eq!(doc.items[1].cfop.as_deref(), Some("5353"));
        assert_eq!(doc.items[1].quantity, Decimal::ONE);
    }

    #[test]
    fn parses_freight_manifest() {
        let xml = r#"<mdfeProc><MDFe><infMDFe Id="MDFe35240511222333000181580010000000771998877665">
  <ide><mod>58</mod><serie>1</serie><nMDF>77</nMDF><modal>1</modal>
    <dhEmi>2024-05-12T07:00:00-03:00</dhEmi><UFIni>SP</UFIni><UFFim>RJ</UFFim></ide>
  <emit><CNPJ>11222333000181</CNPJ><xNome>Transportadora</xNome></emit>
  <infDoc><infMunDescarga><xMunDescarga>RIO</xMunDescarga>
    <infNFe><chNFe>35240511222333000181550010000012341123456789</chNFe></infNFe>
    <infCTe><chCTe>35240511222333000181570010000005551556677888</chCTe></infCTe>
  </infMunDescarga></infDoc>
  <tot><qCTe>1</qCTe><qNFe>1</qNFe><vCarga>5000.00</vCarga><qCarga>1200.5000</qCarga></tot>
</infMDFe></MDFe></mdfeProc>"#;

        let doc = parse_document_at(xml.as_bytes(), parsed_at()).unwrap();
        assert_eq!(doc.document_type, DocumentType::FreightManifest);
        assert!(doc.recipient.is_none());
        assert!(doc.items.is_empty());
        assert_eq!(doc.total_document, dec("5000.00"));
        match doc.details {
            DocumentDetails::Freight {
                referenced_keys,
                cargo_quantity,
                ..
            } => {
                assert_eq!(referenced_keys.len(), 2);
                assert_eq!(cargo_quantity, Some(dec("1200.5000")));
            }
            other => panic!("unexpected details {:?}", other),
        }
    }
}
