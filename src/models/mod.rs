pub mod fiscal_document;
pub mod line_item;
pub mod validation_issue;
