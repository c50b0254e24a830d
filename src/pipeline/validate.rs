//! Structural and value-sanity checks run before a batch is hashed

use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyBatch,
    MissingField { row: usize, field: &'static str },
    Negative { row: usize, field: &'static str },
    NotFinite { row: usize, field: &'static str },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::EmptyBatch => write!(f, "Batch contains no records"),
            ValidationError::MissingField { row, field } => {
                write!(f, "Row {}: '{}' is missing or empty", row, field)
            }
            ValidationError::Negative { row, field } => {
                write!(f, "Row {}: '{}' must not be negative", row, field)
            }
            ValidationError::NotFinite { row, field } => {
                write!(f, "Row {}: '{}' is not a finite number", row, field)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

pub fn require_text(row: usize, field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField { row, field });
    }
    Ok(())
}

pub fn require_finite(row: usize, field: &'static str, value: f64) -> Result<(), ValidationError> {
    if !value.is_finite() {
        return Err(ValidationError::NotFinite { row, field });
    }
    Ok(())
}

/// Finite and `>= 0`
pub fn require_non_negative(row: usize, field: &'static str, value: f64) -> Result<(), ValidationError> {
    require_finite(row, field, value)?;
    if value < 0.0 {
        return Err(ValidationError::Negative { row, field });
    }
    Ok(())
}

/// Absent values pass; present ones must be `>= 0`
pub fn require_non_negative_decimal(
    row: usize,
    field: &'static str,
    value: Option<Decimal>,
) -> Result<(), ValidationError> {
    match value {
        Some(v) if v.is_sign_negative() && !v.is_zero() => Err(ValidationError::Negative { row, field }),
        _ => Ok(()),
    }
}

pub fn require_records(count: usize) -> Result<(), ValidationError> {
    if count == 0 {
        return Err(ValidationError::EmptyBatch);
    }
    Ok(())
}
