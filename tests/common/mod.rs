#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use dfe_ingest::config::app::DatabaseConfig;
use dfe_ingest::functional::fiscal_codes::document_key_check_digit;
use dfe_ingest::DocumentStore;
use tempfile::TempDir;

pub const ISSUER_CNPJ: &str = "11222333000181";
pub const RECIPIENT_CNPJ: &str = "33456471000168";
pub const OTHER_CNPJ: &str = "04571234000140";

pub const NFE_KEY: &str = "35240511222333000181550010000012341123456789";
pub const CTE_KEY: &str = "35240511222333000181570010000005551556677888";
pub const MDFE_KEY: &str = "35240511222333000181580010000000771998877665";

/// Reference clock used by tests that resolve relative date filters.
pub fn reference_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 20, 12, 0, 0).unwrap()
}

/// Builds a key with a valid check digit for `issuer`, `model` and `number`.
pub fn document_key(issuer: &str, model: &str, number: u32) -> String {
    let body = format!("352405{}{}001{:09}1{:08}", issuer, model, number, number);
    let digit = document_key_check_digit(&body).expect("43 digits");
    format!("{}{}", body, digit)
}

/// Opens a fresh, migrated store in a temporary directory. Keep the
/// returned directory alive for as long as the store is used.
pub fn temp_store() -> (TempDir, DocumentStore) {
    let dir = tempfile::tempdir().expect("temp dir");
    let config = DatabaseConfig {
        url: dir.path().join("documents.db").to_string_lossy().into_owned(),
        pool_size: 8,
        ..DatabaseConfig::default()
    };
    let store = DocumentStore::connect(&config).expect("store opens");
    (dir, store)
}

/// Product invoice builder. The defaults describe a clean two-item NF-e.
#[derive(Debug, Clone)]
pub struct InvoiceXml {
    pub key: String,
    pub model: &'static str,
    pub number: String,
    pub issuer: String,
    pub issued_at: DateTime<Utc>,
    pub total_products: String,
    pub total_document: String,
}

impl Default for InvoiceXml {
    fn default() -> Self {
        Self {
            key: NFE_KEY.to_string(),
            model: "55",
            number: "1234".to_string(),
            issuer: ISSUER_CNPJ.to_string(),
            issued_at: Utc.with_ymd_and_hms(2024, 5, 10, 12, 30, 0).unwrap(),
            total_products: "150.00".to_string(),
            total_document: "150.00".to_string(),
        }
    }
}

impl InvoiceXml {
    pub fn numbered(number: u32) -> Self {
        Self {
            key: document_key(ISSUER_CNPJ, "55", number),
            number: number.to_string(),
            ..Self::default()
        }
    }

    pub fn issued_at(mut self, issued_at: DateTime<Utc>) -> Self {
        self.issued_at = issued_at;
        self
    }

    pub fn issuer(mut self, cnpj: &str) -> Self {
        self.key = format!("{}{}{}", &self.key[..6], cnpj, &self.key[20..43]);
        let digit = document_key_check_digit(&self.key).expect("43 digits");
        self.key.push_str(&digit.to_string());
        self.issuer = cnpj.to_string();
        self
    }

    pub fn total_products(mut self, total: &str) -> Self {
        self.total_products = total.to_string();
        self
    }

    pub fn total_document(mut self, total: &str) -> Self {
        self.total_document = total.to_string();
        self
    }

    pub fn build(&self) -> String {
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<nfeProc xmlns="http://www.portalfiscal.inf.br/nfe" versao="4.00">
  <NFe>
    <infNFe Id="NFe{key}" versao="4.00">
      <ide><natOp>VENDA</natOp><mod>{model}</mod><serie>1</serie><nNF>{number}</nNF>
        <dhEmi>{issued}</dhEmi><tpNF>1</tpNF></ide>
      <emit><CNPJ>{issuer}</CNPJ><xNome>Ferragens Paulista Ltda</xNome></emit>
      <dest><CNPJ>{recipient}</CNPJ><xNome>Construtora Horizonte SA</xNome></dest>
      <det nItem="1">
        <prod><cProd>P1</cProd><xProd>Parafuso</xProd><NCM>73181500</NCM><CFOP>5102</CFOP>
          <uCom>UN</uCom><qCom>10.0000</qCom><vUnCom>10.00</vUnCom><vProd>100.00</vProd></prod>
        <imposto><ICMS><ICMS00><vICMS>18.00</vICMS></ICMS00></ICMS></imposto>
      </det>
      <det nItem="2">
        <prod><cProd>P2</cProd><xProd>Porca</xProd><NCM>73181600</NCM><CFOP>5102</CFOP>
          <uCom>UN</uCom><qCom>5</qCom><vUnCom>10.00</vUnCom><vProd>50.00</vProd></prod>
        <imposto><ICMS><ICMS00><vICMS>9.00</vICMS></ICMS00></ICMS></imposto>
      </det>
      <total><ICMSTot><vProd>{total_products}</vProd><vICMS>27.00</vICMS><vNF>{total_document}</vNF></ICMSTot></total>
    </infNFe>
  </NFe>
</nfeProc>"#,
            key = self.key,
            model = self.model,
            number = self.number,
            issued = self.issued_at.to_rfc3339(),
            issuer = self.issuer,
            recipient = RECIPIENT_CNPJ,
            total_products = self.total_products,
            total_document = self.total_document,
        )
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.build().into_bytes()
    }
}

pub fn cte_xml() -> String {
    format!(
        r#"<cteProc><CTe><infCte Id="CTe{key}">
  <ide><CFOP>5353</CFOP><mod>57</mod><serie>1</serie><nCT>555</nCT>
    <dhEmi>2024-05-11T08:00:00-03:00</dhEmi><modal>01</modal>
    <xMunIni>SAO PAULO</xMunIni><xMunFim>CAMPINAS</xMunFim></ide>
  <emit><CNPJ>{issuer}</CNPJ><xNome>Transportadora Rapida Ltda</xNome></emit>
  <dest><CNPJ>{recipient}</CNPJ><xNome>Construtora Horizonte SA</xNome></dest>
  <vPrest><vTPrest>150.00</vTPrest><vRec>150.00</vRec>
    <Comp><xNome>FRETE PESO</xNome><vComp>120.00</vComp></Comp>
    <Comp><xNome>PEDAGIO</xNome><vComp>30.00</vComp></Comp></vPrest>
  <imp><ICMS><ICMS00><vBC>150.00</vBC><vICMS>18.00</vICMS></ICMS00></ICMS></imp>
</infCte></CTe></cteProc>"#,
        key = CTE_KEY,
        issuer = ISSUER_CNPJ,
        recipient = RECIPIENT_CNPJ,
    )
}

pub fn mdfe_xml() -> String {
    format!(
        r#"<mdfeProc><MDFe><infMDFe Id="MDFe{key}">
  <ide><mod>58</mod><serie>1</serie><nMDF>77</nMDF><modal>1</modal>
    <dhEmi>2024-05-12T07:00:00-03:00</dhEmi><UFIni>SP</UFIni><UFFim>RJ</UFFim></ide>
  <emit><CNPJ>{issuer}</CNPJ><xNome>Transportadora Rapida Ltda</xNome></emit>
  <infDoc><infMunDescarga><xMunDescarga>RIO DE JANEIRO</xMunDescarga>
    <infNFe><chNFe>{nfe}</chNFe></infNFe>
    <infCTe><chCTe>{cte}</chCTe></infCTe>
  </infMunDescarga></infDoc>
  <tot><qCTe>1</qCTe><qNFe>1</qNFe><vCarga>5000.00</vCarga><qCarga>1200.5000</qCarga></tot>
</infMDFe></MDFe></mdfeProc>"#,
        key = MDFE_KEY,
        issuer = ISSUER_CNPJ,
        nfe = NFE_KEY,
        cte = CTE_KEY,
    )
}
