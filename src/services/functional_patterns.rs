//! Functional Patterns for the Service Layer
//!
//! Small combinators used by the document store: a reader over a database
//! connection and a rule-list validator.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::RwLock;

use diesel::Connection as _;
use once_cell::sync::Lazy;
use regex::Regex;

use crate::{
    config::db::{Connection, Pool},
    error::{ServiceError, ServiceResult},
};

/// Composable query operations using the Reader monad pattern
///
/// Builds database work from smaller pieces without passing the connection
/// around until the reader is run.
pub struct QueryReader<T> {
    run: Box<dyn Fn(&mut Connection) -> ServiceResult<T> + Send + Sync>,
}

impl<T> QueryReader<T> {
    /// Create a new QueryReader from a function
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&mut Connection) -> ServiceResult<T> + Send + Sync + 'static,
    {
        Self { run: Box::new(f) }
    }

    /// Execute the query with the provided connection
    pub fn run(&self, conn: &mut Connection) -> ServiceResult<T> {
        (self.run)(conn)
    }

    /// Run a check on the input before the query touches the connection
    pub fn guarded<F>(self, guard: F) -> QueryReader<T>
    where
        F: Fn() -> ServiceResult<()> + Send + Sync + 'static,
        T: 'static,
    {
        QueryReader::new(move |conn| {
            guard()?;
            self.run(conn)
        })
    }

    /// Execute this query within a (deferred) transaction
    pub fn transaction(self) -> QueryReader<T>
    where
        T: 'static,
    {
        QueryReader::new(move |conn| {
            conn.transaction::<T, ServiceError, _>(|conn| {
                self.run(conn).inspect_err(|e| {
                    if !e.is_not_found() {
                        log::error!("Transaction operation failed, rolling back: {}", e);
                    }
                })
            })
        })
    }
}

/// Execute a QueryReader with a connection from the pool
pub fn run_query<T>(reader: QueryReader<T>, pool: &Pool) -> ServiceResult<T> {
    let mut conn = pool.get().map_err(|e| {
        log::error!("Failed to get database connection: {}", e);
        ServiceError::from(e)
    })?;
    reader.run(&mut conn)
}

/// Functional validation combinator
pub struct Validator<T> {
    rules: Vec<Box<dyn Fn(&T) -> ServiceResult<()> + Send + Sync>>,
    _phantom: PhantomData<T>,
}

impl<T> Validator<T> {
    /// Create a new empty validator
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            _phantom: PhantomData,
        }
    }

    /// Add a validation rule
    pub fn rule<F>(mut self, rule: F) -> Self
    where
        F: Fn(&T) -> ServiceResult<()> + Send + Sync + 'static,
    {
        self.rules.push(Box::new(rule));
        self
    }

    /// Validate the input against all rules, stopping at the first failure
    pub fn validate(&self, input: &T) -> ServiceResult<()> {
        for rule in &self.rules {
            rule(input)?;
        }
        Ok(())
    }
}

impl<T> Default for Validator<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Common reusable validation rules
pub mod validation_rules {
    use super::*;

    static REGEX_CACHE: Lazy<RwLock<HashMap<&'static str, Regex>>> =
        Lazy::new(|| RwLock::new(HashMap::new()));

    fn cached_regex(pattern: &'static str) -> ServiceResult<Regex> {
        if let Ok(cache) = REGEX_CACHE.read() {
            if let Some(regex) = cache.get(pattern) {
                return Ok(regex.clone());
            }
        }

        let regex = Regex::new(pattern).map_err(|err| {
            ServiceError::invalid_input("invalid validation pattern")
                .with_context(|ctx| ctx.with_detail(err.to_string()))
        })?;
        if let Ok(mut cache) = REGEX_CACHE.write() {
            cache.insert(pattern, regex.clone());
        }
        Ok(regex)
    }

    /// Validate that a value matches a regex pattern
    pub fn pattern(
        field_name: &'static str,
        pattern: &'static str,
    ) -> impl Fn(&String) -> ServiceResult<()> {
        move |value: &String| {
            if cached_regex(pattern)?.is_match(value) {
                Ok(())
            } else {
                Err(ServiceError::invalid_input(format!(
                    "{} format is invalid",
                    field_name
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validator_stops_at_first_failure() {
        let validator = Validator::<i32>::new()
            .rule(|&x| {
                if x > 0 {
                    Ok(())
                } else {
                    Err(ServiceError::invalid_input("Must be positive"))
                }
            })
            .rule(|&x| {
                if x < 100 {
                    Ok(())
                } else {
                    Err(ServiceError::invalid_input("Must be below 100"))
                }
            });

        assert!(validator.validate(&50).is_ok());
        assert_eq!(
            validator.validate(&-1).unwrap_err().message(),
            "Must be positive"
        );
        assert!(validator.validate(&101).is_err());
    }

    #[test]
    fn test_pattern_rule() {
        let digits = validation_rules::pattern("code", r"^\d+$");
        assert!(digits(&"123".to_string()).is_ok());
        assert!(digits(&"12a".to_string()).is_err());
    }

    #[test]
    fn test_invalid_pattern_is_an_error_not_a_panic() {
        assert!(validation_rules::pattern("broken", "(")(&"x".to_string()).is_err());
    }
}
