//! Type-specific field parameters and value constraints.
//!
//! Parameters arrive as loose JSON, are parsed into [`FieldParameters`] per
//! field type, and are stored back in normalized form.

use std::collections::HashSet;
use std::fmt;
use std::sync::OnceLock;

use chrono::{Duration as Days, NaiveDate};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::models::dictionary::FieldType;
use crate::models::validation::Violation;

pub const NUMBER_MIN: i32 = -1_000_000_000;
pub const NUMBER_MAX: i32 = 1_000_000_000;
pub const DURATION_MAX: u32 = 999_999 * 60 + 59;
pub const STRING_MAX_LENGTH: u32 = 250;
pub const TEXT_MAX_LENGTH: u32 = 10_000;

const DECIMAL_SCALE: i128 = 10_000_000_000;

/// Fixed-point decimal with ten fraction digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Decimal(i128);

impl Decimal {
    pub const MIN: Decimal = Decimal(-(99_999_999_999_999_999_999i128));
    pub const MAX: Decimal = Decimal(99_999_999_999_999_999_999i128);

    pub fn parse(s: &str) -> Option<Decimal> {
        static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
        let pattern = PATTERN
            .get_or_init(|| Regex::new(r"^(-)?(\d{1,10})(?:\.(\d{1,10}))?$").ok())
            .as_ref()?;

        let caps = pattern.captures(s.trim())?;
        let int: i128 = caps.get(2)?.as_str().parse().ok()?;
        let frac = caps.get(3).map_or("", |m| m.as_str());
        let frac: i128 = format!("{frac:0<10}").parse().ok()?;
        let magnitude = int * DECIMAL_SCALE + frac;

        Some(Decimal(if caps.get(1).is_some() { -magnitude } else { magnitude }))
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        let int = abs / DECIMAL_SCALE;
        let frac = format!("{:010}", abs % DECIMAL_SCALE);
        let frac = frac.trim_end_matches('0');
        if frac.is_empty() {
            write!(f, "{sign}{int}")
        } else {
            write!(f, "{sign}{int}.{frac}")
        }
    }
}

/// Duration in minutes, written as `h:mm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Minutes(pub u32);

impl Minutes {
    pub fn parse(s: &str) -> Option<Minutes> {
        let (hours, minutes) = s.trim().split_once(':')?;
        if hours.is_empty() || hours.len() > 6 || minutes.len() != 2 {
            return None;
        }
        if !hours.bytes().chain(minutes.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }
        let hours: u32 = hours.parse().ok()?;
        let minutes: u32 = minutes.parse().ok()?;
        if minutes > 59 {
            return None;
        }
        Some(Minutes(hours * 60 + minutes))
    }
}

impl fmt::Display for Minutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}", self.0 / 60, self.0 % 60)
    }
}

/// Regex rules of textual fields.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Pcre {
    pub check: Option<String>,
    pub search: Option<String>,
    pub replace: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldParameters {
    Checkbox { default: bool },
    /// Bounds and default are day offsets from the current date.
    Date { minimum: i32, maximum: i32, default: Option<i32> },
    Decimal { minimum: Decimal, maximum: Decimal, default: Option<Decimal> },
    Duration { minimum: Minutes, maximum: Minutes, default: Option<Minutes> },
    Issue,
    /// Default is the id of one of the field's list items.
    List { default: Option<Uuid> },
    Number { minimum: i32, maximum: i32, default: Option<i32> },
    String { length: u32, default: Option<String>, pcre: Pcre },
    Text { length: u32, default: Option<String>, pcre: Pcre },
}

#[derive(Debug, Default, Deserialize)]
struct RawParameters {
    minimum: Option<Value>,
    maximum: Option<Value>,
    default: Option<Value>,
    length: Option<Value>,
    pcre: Option<Pcre>,
}

fn bad(property: &str, message: impl fmt::Display) -> AppError {
    AppError::bad_request(format!("parameters.{property}: {message}"))
}

fn int_param(raw: Option<&Value>, property: &str, lo: i64, hi: i64) -> AppResult<Option<i64>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let n = v.as_i64().ok_or_else(|| bad(property, "must be an integer"))?;
            if n < lo || n > hi {
                return Err(bad(property, format!("must be between {lo} and {hi}")));
            }
            Ok(Some(n))
        }
    }
}

fn text_param(raw: Option<&Value>, property: &str) -> AppResult<Option<String>> {
    match raw {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(_) => Err(bad(property, "must be a string")),
    }
}

fn decimal_param(raw: Option<&Value>, property: &str) -> AppResult<Option<Decimal>> {
    text_param(raw, property)?
        .map(|s| Decimal::parse(&s).ok_or_else(|| bad(property, format!("'{s}' is not a valid decimal"))))
        .transpose()
}

fn duration_param(raw: Option<&Value>, property: &str) -> AppResult<Option<Minutes>> {
    text_param(raw, property)?
        .map(|s| match Minutes::parse(&s) {
            Some(m) if m.0 <= DURATION_MAX => Ok(m),
            _ => Err(bad(property, format!("'{s}' is not a valid duration"))),
        })
        .transpose()
}

fn check_range<T: PartialOrd + fmt::Display + Copy>(minimum: T, maximum: T, default: Option<T>) -> AppResult<()> {
    if minimum > maximum {
        return Err(bad("minimum", format!("{minimum} is greater than maximum {maximum}")));
    }
    if let Some(d) = default {
        if d < minimum || d > maximum {
            return Err(bad("default", format!("{d} is out of range [{minimum}, {maximum}]")));
        }
    }
    Ok(())
}

fn parse_pcre(pcre: Option<Pcre>) -> AppResult<Pcre> {
    let pcre = pcre.unwrap_or_default();
    for (property, pattern) in [("pcre.check", &pcre.check), ("pcre.search", &pcre.search)] {
        if let Some(pattern) = pattern {
            Regex::new(pattern).map_err(|err| bad(property, err))?;
        }
    }
    Ok(pcre)
}

fn parse_textual(raw: &RawParameters, max_length: u32) -> AppResult<(u32, Option<String>)> {
    let length = int_param(raw.length.as_ref(), "length", 1, i64::from(max_length))?
        .map_or(max_length, |n| n as u32);
    let default = text_param(raw.default.as_ref(), "default")?;
    if let Some(d) = &default {
        if d.chars().count() > length as usize {
            return Err(bad("default", format!("is longer than {length} characters")));
        }
    }
    Ok((length, default))
}

impl FieldParameters {
    /// Parses and checks the parameters of a field of type `field_type`.
    pub fn parse(field_type: FieldType, raw: Option<&Value>) -> AppResult<FieldParameters> {
        let raw: RawParameters = match raw {
            None | Some(Value::Null) => RawParameters::default(),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|err| AppError::bad_request(format!("parameters: {err}")))?,
        };

        let params = match field_type {
            FieldType::Checkbox => FieldParameters::Checkbox {
                default: match raw.default {
                    None | Some(Value::Null) => false,
                    Some(Value::Bool(b)) => b,
                    Some(_) => return Err(bad("default", "must be a boolean")),
                },
            },
            FieldType::Date => {
                let (lo, hi) = (i64::from(i32::MIN), i64::from(i32::MAX));
                let minimum = int_param(raw.minimum.as_ref(), "minimum", lo, hi)?.map_or(i32::MIN, |n| n as i32);
                let maximum = int_param(raw.maximum.as_ref(), "maximum", lo, hi)?.map_or(i32::MAX, |n| n as i32);
                let default = int_param(raw.default.as_ref(), "default", lo, hi)?.map(|n| n as i32);
                check_range(minimum, maximum, default)?;
                FieldParameters::Date { minimum, maximum, default }
            }
            FieldType::Decimal => {
                let minimum = decimal_param(raw.minimum.as_ref(), "minimum")?.unwrap_or(Decimal::MIN);
                let maximum = decimal_param(raw.maximum.as_ref(), "maximum")?.unwrap_or(Decimal::MAX);
                let default = decimal_param(raw.default.as_ref(), "default")?;
                check_range(minimum, maximum, default)?;
                FieldParameters::Decimal { minimum, maximum, default }
            }
            FieldType::Duration => {
                let minimum = duration_param(raw.minimum.as_ref(), "minimum")?.unwrap_or(Minutes(0));
                let maximum = duration_param(raw.maximum.as_ref(), "maximum")?.unwrap_or(Minutes(DURATION_MAX));
                let default = duration_param(raw.default.as_ref(), "default")?;
                check_range(minimum, maximum, default)?;
                FieldParameters::Duration { minimum, maximum, default }
            }
            FieldType::Issue => FieldParameters::Issue,
            FieldType::List => {
                let default = text_param(raw.default.as_ref(), "default")?
                    .map(|s| Uuid::parse_str(&s).map_err(|_| bad("default", "must be a list item id")))
                    .transpose()?;
                FieldParameters::List { default }
            }
            FieldType::Number => {
                let (lo, hi) = (i64::from(NUMBER_MIN), i64::from(NUMBER_MAX));
                let minimum = int_param(raw.minimum.as_ref(), "minimum", lo, hi)?.map_or(NUMBER_MIN, |n| n as i32);
                let maximum = int_param(raw.maximum.as_ref(), "maximum", lo, hi)?.map_or(NUMBER_MAX, |n| n as i32);
                let default = int_param(raw.default.as_ref(), "default", lo, hi)?.map(|n| n as i32);
                check_range(minimum, maximum, default)?;
                FieldParameters::Number { minimum, maximum, default }
            }
            FieldType::String => {
                let (length, default) = parse_textual(&raw, STRING_MAX_LENGTH)?;
                FieldParameters::String { length, default, pcre: parse_pcre(raw.pcre)? }
            }
            FieldType::Text => {
                let (length, default) = parse_textual(&raw, TEXT_MAX_LENGTH)?;
                FieldParameters::Text { length, default, pcre: parse_pcre(raw.pcre)? }
            }
        };

        Ok(params)
    }

    pub fn list_default(&self) -> Option<Uuid> {
        match self {
            FieldParameters::List { default } => *default,
            _ => None,
        }
    }

    /// Normalized JSON for storage.
    pub fn to_json(&self) -> Value {
        match self {
            FieldParameters::Checkbox { default } => json!({ "default": default }),
            FieldParameters::Date { minimum, maximum, default } => {
                json!({ "minimum": minimum, "maximum": maximum, "default": default })
            }
            FieldParameters::Decimal { minimum, maximum, default } => json!({
                "minimum": minimum.to_string(),
                "maximum": maximum.to_string(),
                "default": default.map(|d| d.to_string()),
            }),
            FieldParameters::Duration { minimum, maximum, default } => json!({
                "minimum": minimum.to_string(),
                "maximum": maximum.to_string(),
                "default": default.map(|d| d.to_string()),
            }),
            FieldParameters::Issue => json!({}),
            FieldParameters::List { default } => json!({ "default": default }),
            FieldParameters::Number { minimum, maximum, default } => {
                json!({ "minimum": minimum, "maximum": maximum, "default": default })
            }
            FieldParameters::String { length, default, pcre } | FieldParameters::Text { length, default, pcre } => json!({
                "length": length,
                "default": default,
                "pcre": { "check": pcre.check, "search": pcre.search, "replace": pcre.replace },
            }),
        }
    }

    /// Checks a submitted value for a field named `name`.
    ///
    /// `today` anchors date offsets, `list_items` holds the ids of the field's items.
    pub fn validate_value(
        &self,
        name: &str,
        value: &Value,
        today: NaiveDate,
        list_items: &HashSet<Uuid>,
    ) -> Vec<Violation> {
        let mut violations = Vec::new();
        let mut reject = |message: String| violations.push(Violation::new(name, value, message));

        match self {
            FieldParameters::Checkbox { .. } => {
                if !value.is_boolean() {
                    reject("This value should be of type boolean.".to_string());
                }
            }
            FieldParameters::Date { minimum, maximum, .. } => {
                match value.as_str().and_then(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()) {
                    None => reject("This value is not a valid date.".to_string()),
                    Some(date) => {
                        let lo = today
                            .checked_add_signed(Days::days(i64::from(*minimum)))
                            .unwrap_or(NaiveDate::MIN);
                        let hi = today
                            .checked_add_signed(Days::days(i64::from(*maximum)))
                            .unwrap_or(NaiveDate::MAX);
                        if date < lo || date > hi {
                            reject(format!("This value should be between {lo} and {hi}."));
                        }
                    }
                }
            }
            FieldParameters::Decimal { minimum, maximum, .. } => {
                let parsed = match value {
                    Value::String(s) => Decimal::parse(s),
                    Value::Number(n) => Decimal::parse(&n.to_string()),
                    _ => None,
                };
                match parsed {
                    None => reject("This value should be a decimal number.".to_string()),
                    Some(d) if d < *minimum || d > *maximum => {
                        reject(format!("This value should be between {minimum} and {maximum}."))
                    }
                    Some(_) => {}
                }
            }
            FieldParameters::Duration { minimum, maximum, .. } => match value.as_str().and_then(Minutes::parse) {
                None => reject("This value should be a duration.".to_string()),
                Some(m) if m < *minimum || m > *maximum => {
                    reject(format!("This value should be between {minimum} and {maximum}."))
                }
                Some(_) => {}
            },
            FieldParameters::Issue => {
                if value.as_str().and_then(|s| Uuid::parse_str(s).ok()).is_none() {
                    reject("This value should be an issue id.".to_string());
                }
            }
            FieldParameters::List { .. } => {
                let known = value
                    .as_str()
                    .and_then(|s| Uuid::parse_str(s).ok())
                    .map_or(false, |id| list_items.contains(&id));
                if !known {
                    reject("The value you selected is not a valid choice.".to_string());
                }
            }
            FieldParameters::Number { minimum, maximum, .. } => match value.as_i64() {
                None => reject("This value should be of type integer.".to_string()),
                Some(n) if n < i64::from(*minimum) || n > i64::from(*maximum) => {
                    reject(format!("This value should be between {minimum} and {maximum}."))
                }
                Some(_) => {}
            },
            FieldParameters::String { length, pcre, .. } | FieldParameters::Text { length, pcre, .. } => {
                match value.as_str() {
                    None => reject("This value should be of type string.".to_string()),
                    Some(s) => {
                        if s.chars().count() > *length as usize {
                            reject(format!("This value is too long. It should have {length} characters or less."));
                        }
                        if let Some(check) = pcre.check.as_deref().and_then(|p| Regex::new(p).ok()) {
                            if !check.is_match(s) {
                                reject("This value is not valid.".to_string());
                            }
                        }
                    }
                }
            }
        }

        violations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 10).unwrap()
    }

    #[test]
    fn number_min_above_max_is_bad_request() {
        let err = FieldParameters::parse(FieldType::Number, Some(&json!({"minimum": 10, "maximum": 1}))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn number_default_must_be_in_range() {
        let err = FieldParameters::parse(
            FieldType::Number,
            Some(&json!({"minimum": 1, "maximum": 5, "default": 6})),
        )
        .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let ok = FieldParameters::parse(FieldType::Number, Some(&json!({"minimum": 1, "maximum": 5, "default": 5}))).unwrap();
        assert_eq!(ok, FieldParameters::Number { minimum: 1, maximum: 5, default: Some(5) });
    }

    #[test]
    fn number_bounds_default_to_type_limits() {
        let params = FieldParameters::parse(FieldType::Number, None).unwrap();
        assert_eq!(params, FieldParameters::Number { minimum: NUMBER_MIN, maximum: NUMBER_MAX, default: None });

        let err = FieldParameters::parse(FieldType::Number, Some(&json!({"maximum": 2_000_000_000i64}))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn decimals_compare_exactly() {
        let params = FieldParameters::parse(
            FieldType::Decimal,
            Some(&json!({"minimum": "0.1", "maximum": "0.30", "default": "0.3"})),
        )
        .unwrap();
        assert_eq!(params.to_json()["maximum"], json!("0.3"));

        let err = FieldParameters::parse(FieldType::Decimal, Some(&json!({"minimum": "1.5", "maximum": "-1"}))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        assert!(Decimal::parse("12345678901").is_none());
        assert_eq!(Decimal::parse("-3.14").unwrap().to_string(), "-3.14");
    }

    #[test]
    fn durations_use_hours_and_minutes() {
        assert_eq!(Minutes::parse("1:30"), Some(Minutes(90)));
        assert_eq!(Minutes::parse("0:60"), None);
        assert_eq!(Minutes(125).to_string(), "2:05");

        let err = FieldParameters::parse(FieldType::Duration, Some(&json!({"minimum": "2:00", "maximum": "1:00"}))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }

    #[test]
    fn string_default_fits_length_and_pcre_compiles() {
        let err = FieldParameters::parse(FieldType::String, Some(&json!({"length": 3, "default": "abcd"}))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let err = FieldParameters::parse(FieldType::Text, Some(&json!({"pcre": {"check": "(unclosed"}}))).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let ok = FieldParameters::parse(FieldType::String, Some(&json!({"length": 10, "pcre": {"check": "^\\d+$"}}))).unwrap();
        assert_eq!(ok.to_json()["length"], json!(10));
    }

    #[test]
    fn checkbox_default_must_be_boolean() {
        assert_eq!(
            FieldParameters::parse(FieldType::Checkbox, Some(&json!({"default": true}))).unwrap(),
            FieldParameters::Checkbox { default: true }
        );
        assert!(FieldParameters::parse(FieldType::Checkbox, Some(&json!({"default": "yes"}))).is_err());
    }

    #[test]
    fn values_are_checked_against_constraints() {
        let none = HashSet::new();
        let number = FieldParameters::Number { minimum: 1, maximum: 5, default: None };
        assert!(number.validate_value("Priority", &json!(3), today(), &none).is_empty());
        assert_eq!(number.validate_value("Priority", &json!(9), today(), &none).len(), 1);

        let date = FieldParameters::Date { minimum: 0, maximum: 7, default: None };
        assert!(date.validate_value("Due", &json!("2026-03-12"), today(), &none).is_empty());
        assert_eq!(date.validate_value("Due", &json!("2026-03-01"), today(), &none)[0].property, "Due");

        let string = FieldParameters::parse(FieldType::String, Some(&json!({"length": 5, "pcre": {"check": "^[a-z]+$"}}))).unwrap();
        assert!(string.validate_value("Code", &json!("abc"), today(), &none).is_empty());
        assert_eq!(string.validate_value("Code", &json!("ABCDEFG"), today(), &none).len(), 2);

        let item = Uuid::new_v4();
        let list = FieldParameters::List { default: None };
        assert!(list.validate_value("Kind", &json!(item.to_string()), today(), &HashSet::from([item])).is_empty());
        assert_eq!(list.validate_value("Kind", &json!(Uuid::new_v4().to_string()), today(), &HashSet::from([item])).len(), 1);
    }
}
