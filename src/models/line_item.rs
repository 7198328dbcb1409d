//! Line items belong to exactly one fiscal document and are removed with it.

use diesel::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::ServiceResult;
use crate::models::fiscal_document::{decimal_column, TaxAmounts};
use crate::schema::line_items;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// 1-based position assigned by the parser.
    pub item_number: i32,
    pub product_code: String,
    pub description: String,
    pub ncm: Option<String>,
    pub cfop: Option<String>,
    pub unit: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub total_price: Decimal,
    pub taxes: TaxAmounts,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = line_items)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct LineItemRow {
    pub id: i32,
    pub document_id: i32,
    pub item_number: i32,
    pub product_code: String,
    pub description: String,
    pub ncm: Option<String>,
    pub cfop: Option<String>,
    pub unit: String,
    pub quantity: String,
    pub unit_price: String,
    pub total_price: String,
    pub icms_amount: String,
    pub ipi_amount: String,
    pub pis_amount: String,
    pub cofins_amount: String,
    pub iss_amount: String,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = line_items)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewLineItem {
    pub document_id: i32,
    pub item_number: i32,
    pub product_code: String,
    pub description: String,
    pub ncm: Option<String>,
    pub cfop: Option<String>,
    pub unit: String,
    pub quantity: String,
    pub unit_price: String,
    pub total_price: String,
    pub icms_amount: String,
    pub ipi_amount: String,
    pub pis_amount: String,
    pub cofins_amount: String,
    pub iss_amount: String,
}

impl NewLineItem {
    pub fn from_item(document_id: i32, item: &LineItem) -> Self {
        Self {
            document_id,
            item_number: item.item_number,
            product_code: item.product_code.clone(),
            description: item.description.clone(),
            ncm: item.ncm.clone(),
            cfop: item.cfop.clone(),
            unit: item.unit.clone(),
            quantity: item.quantity.to_string(),
            unit_price: item.unit_price.to_string(),
            total_price: item.total_price.to_string(),
            icms_amount: item.taxes.icms.to_string(),
            ipi_amount: item.taxes.ipi.to_string(),
            pis_amount: item.taxes.pis.to_string(),
            cofins_amount: item.taxes.cofins.to_string(),
            iss_amount: item.taxes.iss.to_string(),
        }
    }
}

impl LineItemRow {
    pub fn into_item(self) -> ServiceResult<LineItem> {
        Ok(LineItem {
            item_number: self.item_number,
            product_code: self.product_code,
            description: self.description,
            ncm: self.ncm,
            cfop: self.cfop,
            unit: self.unit,
            quantity: decimal_column("quantity", &self.quantity)?,
            unit_price: decimal_column("unit_price", &self.unit_price)?,
            total_price: decimal_column("total_price", &self.total_price)?,
            taxes: TaxAmounts {
                icms: decimal_column("icms_amount", &self.icms_amount)?,
                ipi: decimal_column("ipi_amount", &self.ipi_amount)?,
                pis: decimal_column("pis_amount", &self.pis_amount)?,
                cofins: decimal_column("cofins_amount", &self.cofins_amount)?,
                iss: decimal_column("iss_amount", &self.iss_amount)?,
            },
        })
    }
}
