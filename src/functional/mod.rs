//! Pure building blocks for the validation stage: identifier checks, the
//! document rule battery and the engine that runs it.

pub mod fiscal_codes;
pub mod validation_engine;
pub mod validation_rules;
