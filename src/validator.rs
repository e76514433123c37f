//! Per-endpoint input validation.
//!
//! An endpoint registers a list of [`Rule`] records at startup. Each rule
//! names one parameter, its requirement level, a typed parse and an
//! optional predicate. Validation fetches the parameter from the form
//! parameters first and the JSON payload second, and stops at the first
//! failing rule; the failure message becomes the 400 body.

use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::http::Request;

/// A typed parameter value produced by a rule's parse step, handed to the
/// rule's predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Str(String),
    Int(i32),
    Long(i64),
    Double(f64),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
}

impl InputValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            InputValue::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Integral view across `Int` and `Long`.
    pub fn as_long(&self) -> Option<i64> {
        match self {
            InputValue::Int(v) => Some(*v as i64),
            InputValue::Long(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_double(&self) -> Option<f64> {
        match self {
            InputValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            InputValue::Date(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_datetime(&self) -> Option<NaiveDateTime> {
        match self {
            InputValue::DateTime(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Str,
    Int,
    Long,
    Double,
    Date,
    DateTime,
}

impl ParamKind {
    /// Strict full-value parse; partial consumption is a format error.
    pub fn parse(&self, raw: &str) -> Option<InputValue> {
        match self {
            ParamKind::Str => Some(InputValue::Str(raw.to_string())),
            ParamKind::Int => strict_int(raw).map(InputValue::Int),
            ParamKind::Long => strict_long(raw).map(InputValue::Long),
            ParamKind::Double => raw.parse().ok().map(InputValue::Double),
            ParamKind::Date => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .map(InputValue::Date),
            ParamKind::DateTime => NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
                .ok()
                .map(InputValue::DateTime),
        }
    }
}

fn strict_int(raw: &str) -> Option<i32> {
    if raw.starts_with('+') {
        return None;
    }
    raw.parse().ok()
}

fn strict_long(raw: &str) -> Option<i64> {
    if raw.starts_with('+') {
        return None;
    }
    raw.parse().ok()
}

#[derive(Debug, Error, PartialEq)]
pub enum ValidationError {
    #[error("Validation failed for parameter '{0}': Required parameter is missing.")]
    MissingRequiredParam(String),
    #[error("Validation failed for parameter '{0}': Invalid value: '{1}'")]
    InvalidFormat(String, String),
    #[error("Validation failed for parameter '{0}': {1}")]
    CustomRuleFailed(String, String),
}

type Predicate = Arc<dyn Fn(&InputValue) -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Rule {
    name: String,
    required: bool,
    kind: ParamKind,
    predicate: Option<Predicate>,
    message: String,
}

impl Rule {
    pub fn required(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            required: true,
            kind,
            predicate: None,
            message: String::new(),
        }
    }

    pub fn optional(name: &str, kind: ParamKind) -> Self {
        Self {
            name: name.to_string(),
            required: false,
            kind,
            predicate: None,
            message: String::new(),
        }
    }

    /// Attach a predicate; `message` is surfaced to the client when it
    /// returns false.
    pub fn check<F>(mut self, predicate: F, message: &str) -> Self
    where
        F: Fn(&InputValue) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self.message = message.to_string();
        self
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("required", &self.required)
            .field("kind", &self.kind)
            .field("has_predicate", &self.predicate.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Validator {
    rules: Vec<Rule>,
}

impl Validator {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn validate(&self, req: &Request) -> Result<(), ValidationError> {
        for rule in &self.rules {
            let Some(raw) = req.raw_param(&rule.name) else {
                if rule.required {
                    return Err(ValidationError::MissingRequiredParam(rule.name.clone()));
                }
                continue;
            };
            let Some(value) = rule.kind.parse(&raw) else {
                return Err(ValidationError::InvalidFormat(rule.name.clone(), raw));
            };
            if let Some(predicate) = &rule.predicate {
                if !predicate(&value) {
                    return Err(ValidationError::CustomRuleFailed(
                        rule.name.clone(),
                        rule.message.clone(),
                    ));
                }
            }
        }
        Ok(())
    }
}
