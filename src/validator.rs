//! Response validation as a capability object.
//!
//! The source's dynamic `parse(unknown) -> T` validator is modeled, per the re-architecture
//! guidance, as a single-method trait: `T` is the post-parse type, and the caller supplies a
//! value carrying that contract (commonly a closure or a `serde`-deriving type's own
//! `TryFrom<serde_json::Value>` impl via a thin adapter).

use serde_json::Value;

/// A single validation failure, accumulated into `EngineError::ResponseValidation`.
#[derive(Debug, Clone)]
pub struct ValidationError(pub String);

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `validator.parse(unknown) -> T`, reshaped as a trait object the engine calls once per
/// successful response when `clientMode == strict`.
pub trait ResponseValidator<T>: Send + Sync {
    fn parse(&self, data: &Value) -> Result<T, Vec<ValidationError>>;
}

/// Adapts any `Fn(&Value) -> Result<T, Vec<ValidationError>>` into a [`ResponseValidator`],
/// the common case of a caller-supplied closure rather than a hand-written impl.
pub struct FnValidator<F>(pub F);

impl<T, F> ResponseValidator<T> for FnValidator<F>
where
    F: Fn(&Value) -> Result<T, Vec<ValidationError>> + Send + Sync,
{
    fn parse(&self, data: &Value) -> Result<T, Vec<ValidationError>> {
        (self.0)(data)
    }
}
