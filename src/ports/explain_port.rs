//! Trade explanation port trait.

use crate::domain::error::SigtraderError;
use chrono::NaiveDate;

/// Produces a human-readable rationale for one signal. Implementations
/// may call external services; failures surface as
/// [`SigtraderError::ExternalService`] and callers are expected to
/// treat them as non-fatal.
pub trait ExplainPort {
    fn explain(
        &self,
        ticker: &str,
        signal: &str,
        price: f64,
        date: NaiveDate,
        features: &[(&str, f64)],
    ) -> Result<String, SigtraderError>;
}
