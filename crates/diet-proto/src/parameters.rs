use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Largest value a numeric parameter may take; consumers read them as 32-bit ints.
pub const MAX_FIELD_VALUE: i64 = i32::MAX as i64;

const EXTRA_USER_CHARS: [char; 6] = ['å', 'Å', 'ø', 'Ø', 'æ', 'Æ'];

/// Parameters as they arrive over HTTP, before any constraint is checked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterRequest {
    pub calories: Option<i64>,
    pub range: Option<i64>,
    pub meals_per_day: Option<i64>,
    pub days: Option<i64>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid parameters: {}", summarize(.violations))]
pub struct ValidationError {
    pub violations: Vec<FieldViolation>,
}

fn summarize(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("{}: {}", v.field, v.message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    pub fn has_violation(&self, field: &str) -> bool {
        self.violations.iter().any(|v| v.field == field)
    }
}

impl ParameterRequest {
    pub fn validate(self) -> Result<ParameterMessage, ValidationError> {
        ParameterMessage::try_from(self)
    }
}

/// Validated diet parameters, ready to publish.
///
/// Every numeric field present is in `1..=MAX_FIELD_VALUE`, and `user`, when
/// present, is a non-empty run of ASCII letters, digits and `åÅøØæÆ`. The
/// only way to build one is through validation, so holding a value is proof
/// the constraints were checked. Decoding re-runs the same checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "ParameterRequest")]
pub struct ParameterMessage {
    calories: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    range: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    meals_per_day: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    days: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
}

impl ParameterMessage {
    pub fn calories(&self) -> u32 {
        self.calories
    }

    pub fn range(&self) -> Option<u32> {
        self.range
    }

    pub fn meals_per_day(&self) -> Option<u32> {
        self.meals_per_day
    }

    pub fn days(&self) -> Option<u32> {
        self.days
    }

    pub fn user(&self) -> Option<&str> {
        self.user.as_deref()
    }

    /// Compact JSON with camelCase names; absent optional fields are left out.
    pub fn encode(&self) -> serde_json::Result<Bytes> {
        serde_json::to_vec(self).map(Bytes::from)
    }

    pub fn decode(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

impl TryFrom<ParameterRequest> for ParameterMessage {
    type Error = ValidationError;

    fn try_from(request: ParameterRequest) -> Result<Self, Self::Error> {
        let mut violations = Vec::new();

        let calories = match request.calories {
            Some(value) => positive("calories", value, &mut violations),
            None => {
                violations.push(FieldViolation {
                    field: "calories",
                    message: "must not be null".into(),
                });
                None
            }
        };
        let range = optional_positive("range", request.range, &mut violations);
        let meals_per_day =
            optional_positive("mealsPerDay", request.meals_per_day, &mut violations);
        let days = optional_positive("days", request.days, &mut violations);

        if let Some(user) = &request.user {
            if !is_permitted_user(user) {
                violations.push(FieldViolation {
                    field: "user",
                    message: "must contain only numbers 0-9 and letters a-z, A-Z, åÅøØæÆ".into(),
                });
            }
        }

        match calories {
            Some(calories) if violations.is_empty() => Ok(ParameterMessage {
                calories,
                range,
                meals_per_day,
                days,
                user: request.user,
            }),
            _ => Err(ValidationError { violations }),
        }
    }
}

fn optional_positive(
    field: &'static str,
    value: Option<i64>,
    violations: &mut Vec<FieldViolation>,
) -> Option<u32> {
    value.and_then(|value| positive(field, value, violations))
}

fn positive(field: &'static str, value: i64, violations: &mut Vec<FieldViolation>) -> Option<u32> {
    if value <= 0 {
        violations.push(FieldViolation {
            field,
            message: "must be a positive number".into(),
        });
        return None;
    }
    if value > MAX_FIELD_VALUE {
        violations.push(FieldViolation {
            field,
            message: format!("must not exceed {MAX_FIELD_VALUE}"),
        });
        return None;
    }
    u32::try_from(value).ok()
}

fn is_permitted_user(user: &str) -> bool {
    !user.is_empty()
        && user
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || EXTRA_USER_CHARS.contains(&c))
}
