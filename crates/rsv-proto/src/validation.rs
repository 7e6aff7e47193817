//! Field validation helpers shared by the payload types.

/// Validation error for wire payload fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Required field is empty
    EmptyField { field: &'static str },
    /// Numeric field must be strictly positive
    NotPositive { field: &'static str, value: i64 },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyField { field } => write!(f, "required field '{}' is empty", field),
            Self::NotPositive { field, value } => {
                write!(f, "field '{}' must be positive, got {}", field, value)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

pub(crate) fn require_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    Ok(())
}

pub(crate) fn require_positive(field: &'static str, value: i32) -> Result<(), ValidationError> {
    if value <= 0 {
        return Err(ValidationError::NotPositive {
            field,
            value: value.into(),
        });
    }
    Ok(())
}
