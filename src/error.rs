//! Error types shared across the ingestion core.
//!
//! `ParseError` covers inputs that cannot become a canonical document at all.
//! `ServiceError` covers the store and query surface; it carries an
//! [`ErrorContext`] so callers can attach tags, details and metadata as the
//! error travels up.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::models::fiscal_document::DocumentType;

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Non-recoverable failures raised while turning raw bytes into a document.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseError {
    #[error("unrecognized document format: {reason}")]
    UnrecognizedFormat { reason: String },

    #[error("malformed input: {reason}")]
    MalformedInput { reason: String },

    #[error("schema violation in {document_type}: {field}: {reason}")]
    SchemaViolation {
        document_type: DocumentType,
        field: String,
        reason: String,
    },
}

impl ParseError {
    pub fn unrecognized(reason: impl Into<String>) -> Self {
        ParseError::UnrecognizedFormat {
            reason: reason.into(),
        }
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        ParseError::MalformedInput {
            reason: reason.into(),
        }
    }

    pub fn schema(
        document_type: DocumentType,
        field: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        ParseError::SchemaViolation {
            document_type,
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Extra information attached to a [`ServiceError`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorContext {
    pub tags: Vec<String>,
    pub detail: Option<String>,
    pub metadata: BTreeMap<String, String>,
}

impl ErrorContext {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(detail) = &self.detail {
            write!(f, " ({})", detail)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("{error_message}{context}")]
    InvalidInput {
        error_message: String,
        context: ErrorContext,
    },

    #[error("{error_message}{context}")]
    NotFound {
        error_message: String,
        context: ErrorContext,
    },

    /// A storage fault. Nothing was committed for the failing operation and
    /// the caller may retry.
    #[error("{error_message}{context}")]
    StorageFailure {
        error_message: String,
        context: ErrorContext,
    },
}

impl ServiceError {
    pub fn invalid_input(message: impl Into<String>) -> Self {
        ServiceError::InvalidInput {
            error_message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound {
            error_message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn storage_failure(message: impl Into<String>) -> Self {
        ServiceError::StorageFailure {
            error_message: message.into(),
            context: ErrorContext::default(),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            ServiceError::InvalidInput { error_message, .. }
            | ServiceError::NotFound { error_message, .. }
            | ServiceError::StorageFailure { error_message, .. } => error_message,
        }
    }

    pub fn context(&self) -> &ErrorContext {
        match self {
            ServiceError::InvalidInput { context, .. }
            | ServiceError::NotFound { context, .. }
            | ServiceError::StorageFailure { context, .. } => context,
        }
    }

    /// Rewrites the attached context through `f`.
    pub fn with_context<F>(self, f: F) -> Self
    where
        F: FnOnce(ErrorContext) -> ErrorContext,
    {
        match self {
            ServiceError::InvalidInput {
                error_message,
                context,
            } => ServiceError::InvalidInput {
                error_message,
                context: f(context),
            },
            ServiceError::NotFound {
                error_message,
                context,
            } => ServiceError::NotFound {
                error_message,
                context: f(context),
            },
            ServiceError::StorageFailure {
                error_message,
                context,
            } => ServiceError::StorageFailure {
                error_message,
                context: f(context),
            },
        }
    }

    pub fn with_tag(self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        self.with_context(|ctx| ctx.with_tag(tag))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ServiceError::NotFound { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::StorageFailure { .. })
    }
}

impl From<diesel::result::Error> for ServiceError {
    fn from(err: diesel::result::Error) -> Self {
        match err {
            diesel::result::Error::NotFound => ServiceError::not_found("record not found"),
            other => ServiceError::storage_failure("database operation failed")
                .with_context(|ctx| ctx.with_detail(other.to_string())),
        }
    }
}

impl From<r2d2::Error> for ServiceError {
    fn from(err: r2d2::Error) -> Self {
        ServiceError::storage_failure("failed to get database connection")
            .with_context(|ctx| ctx.with_tag("pool").with_detail(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_is_rendered_after_the_message() {
        let err = ServiceError::storage_failure("insert failed")
            .with_context(|ctx| ctx.with_tag("dfe").with_detail("disk I/O error"));

        assert_eq!(err.to_string(), "insert failed (disk I/O error)");
        assert_eq!(err.context().tags, vec!["dfe".to_string()]);
        assert!(err.is_retryable());
    }

    #[test]
    fn tags_are_not_duplicated() {
        let err = ServiceError::not_found("missing").with_tag("dfe").with_tag("dfe");
        assert_eq!(err.context().tags.len(), 1);
        assert!(err.is_not_found());
        assert!(!err.is_retryable());
    }

    #[test]
    fn diesel_not_found_maps_to_not_found() {
        let err: ServiceError = diesel::result::Error::NotFound.into();
        assert!(err.is_not_found());
    }

    #[test]
    fn schema_violation_names_type_and_field() {
        let err = ParseError::schema(DocumentType::ProductInvoice, "emit/CNPJ", "missing");
        assert_eq!(
            err.to_string(),
            "schema violation in product_invoice: emit/CNPJ: missing"
        );
    }
}
