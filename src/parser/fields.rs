//! Typed field access over a `parsedJson` payload.

use super::ParseError;
use crate::domain::Amount;
use serde_json::Value;

/// Borrowed view over an event payload object.
#[derive(Debug, Clone, Copy)]
pub struct Payload<'a>(&'a Value);

impl<'a> Payload<'a> {
    pub fn new(value: &'a Value) -> Result<Self, ParseError> {
        if value.is_object() {
            Ok(Payload(value))
        } else {
            Err(ParseError::NotAnObject)
        }
    }

    fn get(&self, field: &str) -> Option<&'a Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    pub fn str(&self, field: &str) -> Result<String, ParseError> {
        self.opt_str(field)?
            .ok_or_else(|| ParseError::MissingField(field.to_string()))
    }

    pub fn opt_str(&self, field: &str) -> Result<Option<String>, ParseError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(other) => Err(invalid(field, format!("expected string, got {}", other))),
        }
    }

    /// Move `TypeName`: either a plain string or `{ "name": "..." }`.
    pub fn type_name(&self, field: &str) -> Result<String, ParseError> {
        match self.get(field) {
            None => Err(ParseError::MissingField(field.to_string())),
            Some(Value::String(s)) => Ok(s.clone()),
            Some(Value::Object(obj)) => obj
                .get("name")
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .ok_or_else(|| invalid(field, "type name object without name".to_string())),
            Some(other) => Err(invalid(field, format!("expected type name, got {}", other))),
        }
    }

    pub fn amount(&self, field: &str) -> Result<Amount, ParseError> {
        self.opt_amount(field)?
            .ok_or_else(|| ParseError::MissingField(field.to_string()))
    }

    pub fn opt_amount(&self, field: &str) -> Result<Option<Amount>, ParseError> {
        self.opt_str(field)?
            .map(|s| Amount::from_str_canonical(&s).map_err(|e| invalid(field, e.to_string())))
            .transpose()
    }

    pub fn u64(&self, field: &str) -> Result<u64, ParseError> {
        self.opt_u64(field)?
            .ok_or_else(|| ParseError::MissingField(field.to_string()))
    }

    pub fn opt_u64(&self, field: &str) -> Result<Option<u64>, ParseError> {
        self.opt_str(field)?
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|e| invalid(field, format!("{}: {}", s, e)))
            })
            .transpose()
    }

    pub fn bool(&self, field: &str) -> Result<bool, ParseError> {
        self.opt_bool(field)?
            .ok_or_else(|| ParseError::MissingField(field.to_string()))
    }

    pub fn opt_bool(&self, field: &str) -> Result<Option<bool>, ParseError> {
        match self.get(field) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::String(s)) if s == "true" || s == "false" => Ok(Some(s == "true")),
            Some(other) => Err(invalid(field, format!("expected bool, got {}", other))),
        }
    }
}

fn invalid(field: &str, reason: String) -> ParseError {
    ParseError::InvalidField {
        field: field.to_string(),
        reason,
    }
}
