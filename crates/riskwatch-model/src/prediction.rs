//! Canonical prediction records
//!
//! Every upstream shape is normalized into one [`Prediction`]; the two kinds
//! differ only in their reporting period and metric set.

use crate::error::ModelError;
use crate::scope::{Role, Scope};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Opaque server-assigned prediction identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PredictionId(pub String);

impl PredictionId {
    /// Create identifier from any string-like value
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PredictionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PredictionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Prediction variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    /// Yearly reporting period
    Annual,
    /// Quarterly reporting period
    Quarterly,
}

impl PredictionKind {
    /// Both kinds, annual first
    pub const ALL: [PredictionKind; 2] = [PredictionKind::Annual, PredictionKind::Quarterly];

    /// Wire name of the kind
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            PredictionKind::Annual => "annual",
            PredictionKind::Quarterly => "quarterly",
        }
    }
}

impl fmt::Display for PredictionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PredictionKind {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "annual" => Ok(PredictionKind::Annual),
            "quarterly" => Ok(PredictionKind::Quarterly),
            other => Err(ModelError::UnknownKind(other.to_string())),
        }
    }
}

/// Fiscal quarter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Quarter {
    /// First quarter
    Q1,
    /// Second quarter
    Q2,
    /// Third quarter
    Q3,
    /// Fourth quarter
    Q4,
}

impl Quarter {
    /// Quarter from its number (1-4)
    #[must_use]
    pub fn from_number(n: i64) -> Option<Self> {
        match n {
            1 => Some(Quarter::Q1),
            2 => Some(Quarter::Q2),
            3 => Some(Quarter::Q3),
            4 => Some(Quarter::Q4),
            _ => None,
        }
    }

    /// Quarter number (1-4)
    #[inline]
    #[must_use]
    pub fn number(&self) -> u8 {
        match self {
            Quarter::Q1 => 1,
            Quarter::Q2 => 2,
            Quarter::Q3 => 3,
            Quarter::Q4 => 4,
        }
    }
}

impl fmt::Display for Quarter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{}", self.number())
    }
}

impl FromStr for Quarter {
    type Err = ModelError;

    /// Accepts `Q3`, `q3` and `3`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let digits = trimmed
            .strip_prefix('Q')
            .or_else(|| trimmed.strip_prefix('q'))
            .unwrap_or(trimmed);
        digits
            .parse::<i64>()
            .ok()
            .and_then(Quarter::from_number)
            .ok_or_else(|| ModelError::InvalidQuarter(s.to_string()))
    }
}

/// Reporting period of a prediction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReportingPeriod {
    /// Fiscal year
    pub year: i32,
    /// Quarter, present only for quarterly predictions
    pub quarter: Option<Quarter>,
}

impl ReportingPeriod {
    /// Annual period
    #[inline]
    #[must_use]
    pub fn annual(year: i32) -> Self {
        Self { year, quarter: None }
    }

    /// Quarterly period
    #[inline]
    #[must_use]
    pub fn quarterly(year: i32, quarter: Quarter) -> Self {
        Self {
            year,
            quarter: Some(quarter),
        }
    }
}

impl fmt::Display for ReportingPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.quarter {
            Some(q) => write!(f, "{} {}", self.year, q),
            None => write!(f, "{}", self.year),
        }
    }
}

/// Risk bucket derived from the upstream risk level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskCategory {
    /// Low risk
    Low,
    /// Medium risk
    Medium,
    /// High risk
    High,
    /// Critical risk
    Critical,
}

impl RiskCategory {
    /// Parse an upstream label, case-insensitively
    #[must_use]
    pub fn parse_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskCategory::Low),
            "medium" | "moderate" => Some(RiskCategory::Medium),
            "high" => Some(RiskCategory::High),
            "critical" | "very_high" => Some(RiskCategory::Critical),
            _ => None,
        }
    }
}

/// Ratios attached to annual predictions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnualMetrics {
    /// Long-term debt / total capital
    pub long_term_debt_to_total_capital: Option<f64>,
    /// Total debt / EBITDA
    pub total_debt_to_ebitda: Option<f64>,
    /// Net income margin
    pub net_income_margin: Option<f64>,
    /// EBIT / interest expense
    pub ebit_to_interest_expense: Option<f64>,
    /// Return on assets
    pub return_on_assets: Option<f64>,
}

/// Ratios attached to quarterly predictions
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct QuarterlyMetrics {
    /// Total debt / EBITDA
    pub total_debt_to_ebitda: Option<f64>,
    /// SG&A margin
    pub sga_margin: Option<f64>,
    /// Long-term debt / total capital
    pub long_term_debt_to_total_capital: Option<f64>,
    /// Return on capital
    pub return_on_capital: Option<f64>,
}

/// Kind-specific metric set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RiskMetrics {
    /// Annual ratios
    Annual(AnnualMetrics),
    /// Quarterly ratios
    Quarterly(QuarterlyMetrics),
}

impl RiskMetrics {
    /// Kind these metrics belong to
    #[inline]
    #[must_use]
    pub fn kind(&self) -> PredictionKind {
        match self {
            RiskMetrics::Annual(_) => PredictionKind::Annual,
            RiskMetrics::Quarterly(_) => PredictionKind::Quarterly,
        }
    }
}

/// Canonical prediction record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Server-assigned identifier
    pub id: PredictionId,
    /// Subject company identifier
    pub company_id: String,
    /// Ticker symbol; the natural key within a scope and period
    pub company_symbol: String,
    /// Company display name
    pub company_name: String,
    /// Period the prediction covers
    pub reporting_period: ReportingPeriod,
    /// Kind-specific ratios
    pub risk_metrics: RiskMetrics,
    /// Canonical default probability in [0, 1]
    pub default_probability: f64,
    /// Risk bucket, if the upstream provided one
    pub risk_category: Option<RiskCategory>,
    /// Model confidence in [0, 1]
    pub confidence: f64,
    /// Visibility scope; decides the partition
    pub scope: Scope,
    /// Owning organization (organization scope only)
    pub organization_id: Option<String>,
    /// Owning organization name (organization scope only)
    pub organization_name: Option<String>,
    /// Creator user id
    pub created_by: Option<String>,
    /// Creator email
    pub created_by_email: Option<String>,
    /// Creation timestamp
    pub created_at: Option<DateTime<Utc>>,
}

impl Prediction {
    /// Kind of this prediction
    #[inline]
    #[must_use]
    pub fn kind(&self) -> PredictionKind {
        self.risk_metrics.kind()
    }

    /// Whether this record lives in a system partition
    #[inline]
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.scope == Scope::System
    }
}

/// Payload sent on create and update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    /// Ticker symbol
    pub company_symbol: String,
    /// Company display name
    pub company_name: String,
    /// Period the prediction covers
    pub reporting_period: ReportingPeriod,
    /// Ratios to score
    pub risk_metrics: RiskMetrics,
    /// Share within this organization instead of keeping it personal
    pub organization_id: Option<String>,
}

impl PredictionInput {
    /// Create input for an annual prediction
    #[must_use]
    pub fn annual(
        symbol: impl Into<String>,
        name: impl Into<String>,
        year: i32,
        metrics: AnnualMetrics,
    ) -> Self {
        Self {
            company_symbol: symbol.into(),
            company_name: name.into(),
            reporting_period: ReportingPeriod::annual(year),
            risk_metrics: RiskMetrics::Annual(metrics),
            organization_id: None,
        }
    }

    /// Create input for a quarterly prediction
    #[must_use]
    pub fn quarterly(
        symbol: impl Into<String>,
        name: impl Into<String>,
        year: i32,
        quarter: Quarter,
        metrics: QuarterlyMetrics,
    ) -> Self {
        Self {
            company_symbol: symbol.into(),
            company_name: name.into(),
            reporting_period: ReportingPeriod::quarterly(year, quarter),
            risk_metrics: RiskMetrics::Quarterly(metrics),
            organization_id: None,
        }
    }

    /// Share with an organization
    #[inline]
    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    /// Kind of prediction this input produces
    #[inline]
    #[must_use]
    pub fn kind(&self) -> PredictionKind {
        self.risk_metrics.kind()
    }
}

/// Authenticated user as exposed by the auth collaborator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentUser {
    /// User id
    pub id: String,
    /// Login email
    pub email: Option<String>,
    /// Role
    pub role: Role,
    /// Organization membership, if any
    pub organization_id: Option<String>,
}

impl CurrentUser {
    /// Create user with a role
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            email: None,
            role,
            organization_id: None,
        }
    }

    /// With email
    #[inline]
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// With organization
    #[inline]
    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quarter_parsing() {
        assert_eq!("q2".parse::<Quarter>().unwrap(), Quarter::Q2);
        assert_eq!("Q4".parse::<Quarter>().unwrap(), Quarter::Q4);
        assert_eq!("3".parse::<Quarter>().unwrap(), Quarter::Q3);
        assert!("Q5".parse::<Quarter>().is_err());
        assert!("first".parse::<Quarter>().is_err());
    }

    #[test]
    fn risk_category_labels() {
        assert_eq!(RiskCategory::parse_label("HIGH"), Some(RiskCategory::High));
        assert_eq!(RiskCategory::parse_label(" low "), Some(RiskCategory::Low));
        assert_eq!(RiskCategory::parse_label("unknown"), None);
    }

    #[test]
    fn period_display() {
        assert_eq!(ReportingPeriod::annual(2023).to_string(), "2023");
        assert_eq!(
            ReportingPeriod::quarterly(2024, Quarter::Q3).to_string(),
            "2024 Q3"
        );
    }

    #[test]
    fn input_kind_follows_metrics() {
        let input = PredictionInput::quarterly(
            "ACME",
            "Acme Corp",
            2024,
            Quarter::Q1,
            QuarterlyMetrics::default(),
        )
        .with_organization("org-1");
        assert_eq!(input.kind(), PredictionKind::Quarterly);
        assert_eq!(input.organization_id.as_deref(), Some("org-1"));
    }

    #[test]
    fn category_serializes_uppercase() {
        let json = serde_json::to_string(&RiskCategory::Critical).unwrap();
        assert_eq!(json, "\"CRITICAL\"");
    }
}
