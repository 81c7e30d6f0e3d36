//! Conditional-skip rules attached to hierarchy levels.
//!
//! A [`Predicate`] is a list of field/operator/value clauses combined with AND.
//! It is evaluated against the request's opaque form payload when the engine
//! resolves the next level; a level whose predicate is false is skipped.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ValidationError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    In,
    Exists,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Contains => "contains",
            Self::In => "in",
            Self::Exists => "exists",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Clause {
    /// Dotted path into the payload, e.g. `amount` or `vendor.country`.
    pub field: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

impl Clause {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self { field: field.into(), operator, value }
    }

    pub fn evaluate(&self, payload: &Value) -> bool {
        let actual = lookup(payload, &self.field);

        match self.operator {
            Operator::Exists => actual.is_some_and(|value| !value.is_null()),
            Operator::Ne => match actual {
                Some(actual) => !values_equal(actual, &self.value),
                None => true,
            },
            Operator::Eq => actual.is_some_and(|actual| values_equal(actual, &self.value)),
            Operator::Gt => compare(actual, &self.value).is_some_and(|ord| ord.is_gt()),
            Operator::Gte => compare(actual, &self.value).is_some_and(|ord| ord.is_ge()),
            Operator::Lt => compare(actual, &self.value).is_some_and(|ord| ord.is_lt()),
            Operator::Lte => compare(actual, &self.value).is_some_and(|ord| ord.is_le()),
            Operator::Contains => actual.is_some_and(|actual| contains(actual, &self.value)),
            Operator::In => actual.is_some_and(|actual| contains(&self.value, actual)),
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.field.trim().is_empty() {
            return Err(ValidationError::InvalidCondition {
                reason: "condition field is required".to_owned(),
            });
        }

        if self.operator == Operator::In && !self.value.is_array() {
            return Err(ValidationError::InvalidCondition {
                reason: format!("`in` on `{}` needs a list value", self.field),
            });
        }

        let ordered =
            matches!(self.operator, Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte);
        if ordered && as_decimal(&self.value).is_none() {
            return Err(ValidationError::InvalidCondition {
                reason: format!(
                    "`{}` on `{}` needs a numeric value",
                    self.operator.as_str(),
                    self.field
                ),
            });
        }

        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Predicate {
    pub clauses: Vec<Clause>,
}

impl Predicate {
    pub fn new(clauses: Vec<Clause>) -> Result<Self, ValidationError> {
        let predicate = Self { clauses };
        predicate.validate()?;
        Ok(predicate)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.clauses.is_empty() {
            return Err(ValidationError::InvalidCondition {
                reason: "a conditional level needs at least one clause".to_owned(),
            });
        }
        self.clauses.iter().try_for_each(Clause::validate)
    }

    pub fn evaluate(&self, payload: &Value) -> bool {
        self.clauses.iter().all(|clause| clause.evaluate(payload))
    }
}

fn lookup<'a>(payload: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .map(str::trim)
        .try_fold(payload, |current, segment| match current {
            Value::Object(map) => map.get(segment),
            Value::Array(items) => segment.parse::<usize>().ok().and_then(|index| items.get(index)),
            _ => None,
        })
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(number) => Decimal::from_str(&number.to_string())
            .or_else(|_| Decimal::from_scientific(&number.to_string()))
            .ok(),
        Value::String(raw) => Decimal::from_str(raw.trim().replace(',', "").as_str()).ok(),
        _ => None,
    }
}

fn normalize_text(raw: &str) -> String {
    raw.trim().to_lowercase()
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if let (Some(left), Some(right)) = (as_decimal(actual), as_decimal(expected)) {
        return left == right;
    }

    match (actual, expected) {
        (Value::String(left), Value::String(right)) => {
            normalize_text(left) == normalize_text(right)
        }
        _ => actual == expected,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let actual = as_decimal(actual?)?;
    let expected = as_decimal(expected)?;
    Some(actual.cmp(&expected))
}

fn contains(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| values_equal(item, needle)),
        Value::String(text) => match needle {
            Value::String(part) => normalize_text(text).contains(&normalize_text(part)),
            _ => false,
        },
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{Clause, Operator, Predicate};
    use crate::errors::ValidationError;

    fn payload() -> serde_json::Value {
        json!({
            "amount": 125000.50,
            "currency": "USD",
            "vendor": { "country": "DE", "tags": ["critical", "recurring"] },
            "importType": "Sea Freight",
            "quantity": "1,200"
        })
    }

    #[test]
    fn numeric_comparisons_use_decimal_semantics() {
        let payload = payload();
        assert!(Clause::new("amount", Operator::Gt, json!(100000)).evaluate(&payload));
        assert!(Clause::new("amount", Operator::Lte, json!("125000.50")).evaluate(&payload));
        assert!(!Clause::new("amount", Operator::Lt, json!(125000.5)).evaluate(&payload));
        assert!(Clause::new("quantity", Operator::Gte, json!(1200)).evaluate(&payload));
    }

    #[test]
    fn string_equality_ignores_case_and_whitespace() {
        let payload = payload();
        assert!(Clause::new("importType", Operator::Eq, json!(" sea freight ")).evaluate(&payload));
        assert!(Clause::new("currency", Operator::Ne, json!("EUR")).evaluate(&payload));
    }

    #[test]
    fn nested_paths_and_membership() {
        let payload = payload();
        let country = Clause::new("vendor.country", Operator::In, json!(["de", "fr"]));
        assert!(country.evaluate(&payload));
        let tags = Clause::new("vendor.tags", Operator::Contains, json!("Critical"));
        assert!(tags.evaluate(&payload));
        assert!(Clause::new("vendor.tags.1", Operator::Eq, json!("recurring")).evaluate(&payload));
    }

    #[test]
    fn missing_fields_only_satisfy_ne() {
        let payload = payload();
        assert!(!Clause::new("budget.code", Operator::Eq, json!("X")).evaluate(&payload));
        assert!(!Clause::new("budget.code", Operator::Exists, json!(null)).evaluate(&payload));
        assert!(!Clause::new("budget.limit", Operator::Gt, json!(1)).evaluate(&payload));
        assert!(Clause::new("budget.code", Operator::Ne, json!("X")).evaluate(&payload));
    }

    #[test]
    fn predicate_is_and_combined() {
        let predicate = Predicate::new(vec![
            Clause::new("amount", Operator::Gte, json!(100000)),
            Clause::new("currency", Operator::Eq, json!("EUR")),
        ])
        .expect("valid predicate");

        assert!(!predicate.evaluate(&payload()));
    }

    #[test]
    fn empty_predicate_is_rejected() {
        let error = Predicate::new(Vec::new()).expect_err("empty predicate");
        assert!(matches!(error, ValidationError::InvalidCondition { .. }));
    }

    #[test]
    fn ordered_operator_needs_numeric_value() {
        let error = Predicate::new(vec![Clause::new("amount", Operator::Gt, json!("lots"))])
            .expect_err("non-numeric bound");
        assert!(matches!(error, ValidationError::InvalidCondition { .. }));
    }
}
