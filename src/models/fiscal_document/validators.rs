use once_cell::sync::OnceCell;

use crate::{
    error::{ServiceError, ServiceResult},
    models::fiscal_document::query::ResolvedFilter,
    services::functional_patterns::{validation_rules, Validator},
};

/// Validator for resolved search and statistics filters
pub fn search_filter_validator() -> Validator<ResolvedFilter> {
    Validator::new()
        .rule(|filter: &ResolvedFilter| {
            filter.issuer_tax_id.as_ref().map_or(Ok(()), |tax_id| {
                validation_rules::pattern("issuer_tax_id", r"^[0-9]{1,14}$")(tax_id)
            })
        })
        .rule(|filter: &ResolvedFilter| match (filter.issued_from, filter.issued_to) {
            (Some(from), Some(to)) if from > to => Err(ServiceError::invalid_input(format!(
                "issued_from ({}) is after issued_to ({})",
                from.to_rfc3339(),
                to.to_rfc3339()
            ))),
            _ => Ok(()),
        })
}

/// Validate a ResolvedFilter
pub fn validate_search_filter(filter: &ResolvedFilter) -> ServiceResult<()> {
    static SEARCH_FILTER_VALIDATOR: OnceCell<Validator<ResolvedFilter>> = OnceCell::new();
    SEARCH_FILTER_VALIDATOR
        .get_or_init(search_filter_validator)
        .validate(filter)
        .map_err(|err| err.with_tag("search_filter"))
}
