//! Iterator-Based Validation Engine
//!
//! Runs the rule battery from [`validation_rules`](super::validation_rules)
//! over a canonical document. The engine is pure: it never mutates the
//! document and its output depends only on the document, the configuration
//! and the clock passed to [`ValidationEngine::validate_at`].

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;

use crate::functional::validation_rules::{default_rules, DocumentRule, RuleContext};
use crate::models::fiscal_document::FiscalDocument;
use crate::models::validation_issue::ValidationIssue;

/// Tolerances and thresholds used by the rule battery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Largest accepted absolute difference between reconciled amounts.
    pub amount_tolerance: Decimal,
    /// How far past the current time an issue date may lie.
    pub max_clock_skew: chrono::Duration,
    /// Issue dates before this instant are implausible.
    pub min_issue_date: DateTime<Utc>,
    /// Totals strictly above this value raise an informational notice.
    pub high_value_threshold: Decimal,
    /// Truncate the issue list to this many entries.
    pub max_issues: Option<usize>,
}

impl Default for ValidationConfig {
    /// Defaults:
    /// - `amount_tolerance = 0.01`
    /// - `max_clock_skew = 5 minutes`
    /// - `min_issue_date = 2006-01-01T00:00:00Z`
    /// - `high_value_threshold = 1,000,000.00`
    /// - `max_issues = None`
    fn default() -> Self {
        Self {
            amount_tolerance: Decimal::new(1, 2),
            max_clock_skew: chrono::Duration::minutes(5),
            min_issue_date: Utc
                .with_ymd_and_hms(2006, 1, 1, 0, 0, 0)
                .single()
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            high_value_threshold: Decimal::new(100_000_000, 2),
            max_issues: None,
        }
    }
}

/// Validation engine over a fixed, ordered rule list.
///
/// Cloning is cheap; the rule list is shared.
#[derive(Clone)]
pub struct ValidationEngine {
    config: ValidationConfig,
    rules: Arc<Vec<Box<dyn DocumentRule>>>,
}

impl ValidationEngine {
    /// Creates an engine running the full default battery.
    pub fn new(config: ValidationConfig) -> Self {
        Self::with_rules(config, default_rules())
    }

    /// Creates an engine over a caller-chosen rule list, evaluated in the
    /// given order.
    pub fn with_rules(config: ValidationConfig, rules: Vec<Box<dyn DocumentRule>>) -> Self {
        Self {
            config,
            rules: Arc::new(rules),
        }
    }

    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// Issue codes of the configured rules, in evaluation order.
    pub fn rule_codes(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.rules.iter().map(|rule| rule.code())
    }

    /// Validates `document` against the battery using `now` as the clock.
    ///
    /// # Returns
    ///
    /// Issues in rule order, then in item or tax-kind order within a rule.
    /// Empty when the document is clean.
    pub fn validate_at(&self, document: &FiscalDocument, now: DateTime<Utc>) -> Vec<ValidationIssue> {
        let context = RuleContext::new(&self.config, now);
        let limit = self.config.max_issues.unwrap_or(usize::MAX);

        self.rules
            .iter()
            .filter(|rule| rule.applies_to(document.document_type))
            .flat_map(|rule| rule.check(document, &context))
            .take(limit)
            .collect()
    }

    /// Validates `document` against the current time.
    pub fn validate(&self, document: &FiscalDocument) -> Vec<ValidationIssue> {
        self.validate_at(document, Utc::now())
    }
}

impl Default for ValidationEngine {
    fn default() -> Self {
        Self::new(ValidationConfig::default())
    }
}

impl fmt::Debug for ValidationEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidationEngine")
            .field("config", &self.config)
            .field("rules", &self.rules.len())
            .finish()
    }
}
