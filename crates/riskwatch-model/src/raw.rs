//! Raw upstream prediction shapes
//!
//! The backend is inconsistent: the same metric arrives under several names,
//! numbers sometimes arrive as strings, and company identity is either flat or
//! nested under `company`. [`RawPrediction`] accepts all of it without ever
//! failing on a field-level type mismatch; bad values simply become `None`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Nested company object some endpoints return
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawCompany {
    /// Company id
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,
    /// Ticker symbol
    #[serde(deserialize_with = "lenient_string")]
    pub symbol: Option<String>,
    /// Display name
    #[serde(deserialize_with = "lenient_string")]
    pub name: Option<String>,
}

/// Prediction record as returned by the API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawPrediction {
    /// Prediction id
    #[serde(deserialize_with = "lenient_string")]
    pub id: Option<String>,

    /// Flat company id
    #[serde(deserialize_with = "lenient_string")]
    pub company_id: Option<String>,
    /// Flat company symbol
    #[serde(deserialize_with = "lenient_string")]
    pub company_symbol: Option<String>,
    /// Alternative symbol field
    #[serde(deserialize_with = "lenient_string")]
    pub symbol: Option<String>,
    /// Flat company name
    #[serde(deserialize_with = "lenient_string")]
    pub company_name: Option<String>,
    /// Nested company object
    #[serde(deserialize_with = "lenient_company")]
    pub company: Option<RawCompany>,

    /// Reporting year
    #[serde(deserialize_with = "lenient_i64")]
    pub reporting_year: Option<i64>,
    /// Alternative year field
    #[serde(deserialize_with = "lenient_i64")]
    pub year: Option<i64>,
    /// Reporting quarter (`Q1`, `q1`, `1`)
    #[serde(deserialize_with = "lenient_string")]
    pub reporting_quarter: Option<String>,
    /// Alternative quarter field
    #[serde(deserialize_with = "lenient_string")]
    pub quarter: Option<String>,

    /// Long-term debt / total capital
    #[serde(deserialize_with = "lenient_f64")]
    pub long_term_debt_to_total_capital: Option<f64>,
    /// Short alias of the above
    #[serde(deserialize_with = "lenient_f64")]
    pub ltdtc: Option<f64>,
    /// Total debt / EBITDA
    #[serde(deserialize_with = "lenient_f64")]
    pub total_debt_to_ebitda: Option<f64>,
    /// Alias of the above
    #[serde(deserialize_with = "lenient_f64")]
    pub debt_to_ebitda: Option<f64>,
    /// Net income margin
    #[serde(deserialize_with = "lenient_f64")]
    pub net_income_margin: Option<f64>,
    /// EBIT / interest expense
    #[serde(deserialize_with = "lenient_f64")]
    pub ebit_to_interest_expense: Option<f64>,
    /// Alias of the above
    #[serde(deserialize_with = "lenient_f64")]
    pub interest_coverage: Option<f64>,
    /// Return on assets
    #[serde(deserialize_with = "lenient_f64")]
    pub return_on_assets: Option<f64>,
    /// Alias of the above
    #[serde(deserialize_with = "lenient_f64")]
    pub roa: Option<f64>,
    /// SG&A margin
    #[serde(deserialize_with = "lenient_f64")]
    pub sga_margin: Option<f64>,
    /// Return on capital
    #[serde(deserialize_with = "lenient_f64")]
    pub return_on_capital: Option<f64>,
    /// Alias of the above
    #[serde(deserialize_with = "lenient_f64")]
    pub roc: Option<f64>,

    /// Annual model probability
    #[serde(deserialize_with = "lenient_f64")]
    pub probability: Option<f64>,
    /// Generic default probability
    #[serde(deserialize_with = "lenient_f64")]
    pub default_probability: Option<f64>,
    /// Quarterly ensemble probability
    #[serde(deserialize_with = "lenient_f64")]
    pub ensemble_probability: Option<f64>,
    /// Quarterly logistic model probability
    #[serde(deserialize_with = "lenient_f64")]
    pub logistic_probability: Option<f64>,
    /// Quarterly gradient-boosting probability
    #[serde(deserialize_with = "lenient_f64")]
    pub gbm_probability: Option<f64>,

    /// Risk level label
    #[serde(deserialize_with = "lenient_string")]
    pub risk_level: Option<String>,
    /// Alternative risk label
    #[serde(deserialize_with = "lenient_string")]
    pub risk_category: Option<String>,
    /// Model confidence
    #[serde(deserialize_with = "lenient_f64")]
    pub confidence: Option<f64>,

    /// Visibility label
    #[serde(deserialize_with = "lenient_string")]
    pub access_level: Option<String>,
    /// Alternative visibility label
    #[serde(deserialize_with = "lenient_string")]
    pub organization_access: Option<String>,
    /// Owning organization id
    #[serde(deserialize_with = "lenient_string")]
    pub organization_id: Option<String>,
    /// Owning organization name
    #[serde(deserialize_with = "lenient_string")]
    pub organization_name: Option<String>,

    /// Creator id
    #[serde(deserialize_with = "lenient_string")]
    pub created_by: Option<String>,
    /// Creator email
    #[serde(deserialize_with = "lenient_string")]
    pub created_by_email: Option<String>,
    /// Creation timestamp (RFC 3339)
    #[serde(deserialize_with = "lenient_string")]
    pub created_at: Option<String>,
}

impl RawPrediction {
    /// Raw record with just an id
    #[must_use]
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            ..Self::default()
        }
    }

    /// Decode a record from JSON, never failing on individual fields
    ///
    /// # Errors
    /// Returns error only when `value` is not a JSON object
    pub fn from_json(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

/// First non-`None` value in priority order
pub(crate) fn first_present<T: Copy>(candidates: &[Option<T>]) -> Option<T> {
    candidates.iter().find_map(|c| *c)
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_f64))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(|v| match v {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }))
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }))
}

fn lenient_company<'de, D>(deserializer: D) -> Result<Option<RawCompany>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

fn value_as_f64(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    n.is_finite().then_some(n)
}
