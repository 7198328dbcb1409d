//! Validation issues: findings produced by the rule battery and stored with
//! their document.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};
use crate::schema::validation_issues;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Error => "error",
            Severity::Warning => "warning",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = ServiceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "error" => Ok(Severity::Error),
            "warning" => Ok(Severity::Warning),
            "info" => Ok(Severity::Info),
            other => Err(ServiceError::invalid_input(format!(
                "unknown severity '{}'",
                other
            ))),
        }
    }
}

/// A finding produced by one validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub code: String,
    pub severity: Severity,
    pub message: String,
    pub field: Option<String>,
    pub suggestion: Option<String>,
}

impl ValidationIssue {
    pub fn new(code: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity,
            message: message.into(),
            field: None,
            suggestion: None,
        }
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Error, message)
    }

    pub fn warning(code: &str, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Warning, message)
    }

    pub fn info(code: &str, message: impl Into<String>) -> Self {
        Self::new(code, Severity::Info, message)
    }

    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// An issue as persisted: the finding plus its review state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredIssue {
    pub id: i32,
    #[serde(flatten)]
    pub issue: ValidationIssue,
    pub resolved: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = validation_issues)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct ValidationIssueRow {
    pub id: i32,
    pub document_id: i32,
    pub code: String,
    pub severity: String,
    pub message: String,
    pub field: Option<String>,
    pub suggestion: Option<String>,
    pub resolved: bool,
    pub created_at: NaiveDateTime,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = validation_issues)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewValidationIssue {
    pub document_id: i32,
    pub code: String,
    pub severity: String,
    pub message: String,
    pub field: Option<String>,
    pub suggestion: Option<String>,
    pub resolved: bool,
    pub created_at: NaiveDateTime,
}

impl NewValidationIssue {
    pub fn from_issue(document_id: i32, issue: &ValidationIssue, created_at: DateTime<Utc>) -> Self {
        Self {
            document_id,
            code: issue.code.clone(),
            severity: issue.severity.as_str().to_string(),
            message: issue.message.clone(),
            field: issue.field.clone(),
            suggestion: issue.suggestion.clone(),
            resolved: false,
            created_at: created_at.naive_utc(),
        }
    }
}

impl ValidationIssueRow {
    pub fn into_stored(self) -> ServiceResult<StoredIssue> {
        let severity = self.severity.parse().map_err(|_| {
            ServiceError::storage_failure("corrupt severity column")
                .with_context(|ctx| ctx.with_detail(self.severity.clone()))
        })?;

        Ok(StoredIssue {
            id: self.id,
            issue: ValidationIssue {
                code: self.code,
                severity,
                message: self.message,
                field: self.field,
                suggestion: self.suggestion,
            },
            resolved: self.resolved,
            created_at: self.created_at.and_utc(),
        })
    }
}
