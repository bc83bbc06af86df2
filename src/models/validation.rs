use serde::Serialize;

use crate::errors::AppError;

/// A single rejected property value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub property: String,
    pub invalid_value: String,
    pub message: String,
}

impl Violation {
    pub fn new(property: impl Into<String>, invalid_value: impl ToString, message: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            invalid_value: invalid_value.to_string(),
            message: message.into(),
        }
    }
}

/// Surfaces the first violation as a `BadRequest`, or `Ok(())` when there are none.
pub fn ensure_valid(violations: Vec<Violation>) -> Result<(), AppError> {
    match violations.into_iter().next() {
        Some(v) => Err(AppError::bad_request(format!("{}: {}", v.property, v.message))),
        None => Ok(()),
    }
}

pub(crate) fn check_length(
    violations: &mut Vec<Violation>,
    property: &'static str,
    value: &str,
    max: usize,
) {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        violations.push(Violation::new(property, value, "This value should not be blank."));
    } else if trimmed.chars().count() > max {
        violations.push(Violation::new(
            property,
            value,
            format!("This value is too long. It should have {max} characters or less."),
        ));
    }
}

pub(crate) fn check_optional_length(
    violations: &mut Vec<Violation>,
    property: &'static str,
    value: Option<&str>,
    max: usize,
) {
    if let Some(value) = value {
        if value.chars().count() > max {
            violations.push(Violation::new(
                property,
                value,
                format!("This value is too long. It should have {max} characters or less."),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_violation_becomes_the_error() {
        let mut violations = Vec::new();
        check_length(&mut violations, "name", "   ", 50);
        check_length(&mut violations, "prefix", "toolong", 5);
        assert_eq!(violations.len(), 2);

        let err = ensure_valid(violations).unwrap_err();
        match err {
            AppError::BadRequest(msg) => assert!(msg.starts_with("name:")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn no_violations_is_ok() {
        let mut violations = Vec::new();
        check_length(&mut violations, "name", "Support", 50);
        check_optional_length(&mut violations, "description", None, 100);
        assert!(ensure_valid(violations).is_ok());
    }
}
