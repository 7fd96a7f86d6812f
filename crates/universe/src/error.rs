//! Error types for the universe core.
//!
//! Every fallible core operation returns [`UniverseError`]. Delivery problems
//! are collected into [`DeliveryErrors`] by the fan-out paths and are logged
//! rather than surfaced to the caller that triggered them.

use std::fmt;

/// Categorized failure of a core operation.
#[derive(Debug, thiserror::Error)]
pub enum UniverseError {
    /// The request is invalid and had no effect (self-parenting, cross-world
    /// reparenting, malformed options)
    #[error("Validation error: {0}")]
    Validation(String),

    /// The addressed attribute, object, world or session does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// The durable store rejected a call. In-memory state may already reflect
    /// the change.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// A message could not be handed to one or more sessions
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryErrors),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, UniverseError>;

/// Aggregate of independent delivery failures.
///
/// Fan-out keeps going after a failure and records it here, so one bad
/// session or scope never hides the others.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryErrors {
    errors: Vec<String>,
}

impl DeliveryErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    /// Appends every failure of `other`, prefixed with `context`.
    pub fn extend_with(&mut self, context: &str, other: DeliveryErrors) {
        self.errors
            .extend(other.errors.into_iter().map(|e| format!("{context}: {e}")));
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(String::as_str)
    }

    /// `Ok(())` when nothing failed.
    pub fn into_result(self) -> std::result::Result<(), DeliveryErrors> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for DeliveryErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.len() {
            0 => write!(f, "no errors"),
            1 => write!(f, "{}", self.errors[0]),
            n => {
                write!(f, "{n} errors occurred:")?;
                for e in &self.errors {
                    write!(f, "\n\t* {e}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for DeliveryErrors {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_errors_keep_every_failure() {
        let mut errs = DeliveryErrors::new();
        assert!(errs.clone().into_result().is_ok());

        errs.push("session a closed");
        let mut scoped = DeliveryErrors::new();
        scoped.push("world gone");
        errs.extend_with("world", scoped);

        assert_eq!(errs.len(), 2);
        let text = errs.to_string();
        assert!(text.contains("session a closed"));
        assert!(text.contains("world: world gone"));
        assert!(matches!(
            UniverseError::from(errs),
            UniverseError::Delivery(_)
        ));
    }
}
