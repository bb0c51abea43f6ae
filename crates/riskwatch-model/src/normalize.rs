//! Prediction normalizer
//!
//! Turns a [`RawPrediction`] into a canonical [`Prediction`]. The function is
//! total: it never fails and never produces `NaN`. Alias priority is fixed:
//!
//! - Annual probability: `probability`, `default_probability`
//! - Quarterly probability: `ensemble_probability`, `logistic_probability`,
//!   `gbm_probability`, `default_probability`
//! - Risk category: `risk_level`, `risk_category`
//! - Scope (user responses): `access_level`, `organization_access`
//!
//! Records from the system endpoints are forced into [`Scope::System`]
//! regardless of any visibility label the server attached.

use crate::prediction::{
    AnnualMetrics, Prediction, PredictionId, PredictionKind, Quarter, QuarterlyMetrics,
    ReportingPeriod, RiskCategory, RiskMetrics,
};
use crate::raw::{first_present, RawPrediction};
use crate::scope::Scope;
use chrono::{DateTime, Datelike, Utc};

/// Which endpoint family a raw record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Personal/organization endpoints; scope comes from the record
    User,
    /// Platform endpoints; scope is always system
    System,
}

/// Normalizer with an explicit fallback year
///
/// Records without a reporting year get `fallback_year`, and quarterly records
/// without a quarter get `Q1`. Both fallbacks mask missing upstream data; they
/// are kept because the dashboard relies on every record having a period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Normalizer {
    fallback_year: i32,
}

impl Normalizer {
    /// Normalizer falling back to `year`
    #[inline]
    #[must_use]
    pub fn with_fallback_year(year: i32) -> Self {
        Self {
            fallback_year: year,
        }
    }

    /// Normalizer falling back to the current calendar year
    #[inline]
    #[must_use]
    pub fn current() -> Self {
        Self::with_fallback_year(Utc::now().year())
    }

    /// Year used when the record has none
    #[inline]
    #[must_use]
    pub fn fallback_year(&self) -> i32 {
        self.fallback_year
    }

    /// Normalize one record
    #[must_use]
    pub fn normalize(
        &self,
        raw: &RawPrediction,
        kind: PredictionKind,
        origin: Origin,
    ) -> Prediction {
        let company = raw.company.clone().unwrap_or_default();
        let scope = resolve_scope(raw, origin);

        let (organization_id, organization_name) = if scope == Scope::Organization {
            (raw.organization_id.clone(), raw.organization_name.clone())
        } else {
            (None, None)
        };

        Prediction {
            id: PredictionId::new(raw.id.clone().unwrap_or_default()),
            company_id: raw.company_id.clone().or(company.id).unwrap_or_default(),
            company_symbol: raw
                .company_symbol
                .clone()
                .or_else(|| raw.symbol.clone())
                .or(company.symbol)
                .map(|s| s.trim().to_ascii_uppercase())
                .unwrap_or_default(),
            company_name: raw.company_name.clone().or(company.name).unwrap_or_default(),
            reporting_period: self.reporting_period(raw, kind),
            risk_metrics: metrics(raw, kind),
            default_probability: default_probability(raw, kind),
            risk_category: risk_category(raw),
            confidence: finite(raw.confidence).map_or(0.0, unit_interval),
            scope,
            organization_id,
            organization_name,
            created_by: raw.created_by.clone(),
            created_by_email: raw.created_by_email.clone(),
            created_at: raw.created_at.as_deref().and_then(parse_timestamp),
        }
    }

    fn reporting_period(&self, raw: &RawPrediction, kind: PredictionKind) -> ReportingPeriod {
        let year = first_present(&[raw.reporting_year, raw.year])
            .and_then(|y| i32::try_from(y).ok())
            .unwrap_or_else(|| {
                tracing::debug!(
                    id = ?raw.id,
                    fallback = self.fallback_year,
                    "record has no reporting year"
                );
                self.fallback_year
            });

        match kind {
            PredictionKind::Annual => ReportingPeriod::annual(year),
            PredictionKind::Quarterly => {
                let quarter = raw
                    .reporting_quarter
                    .as_deref()
                    .or(raw.quarter.as_deref())
                    .and_then(|q| q.parse::<Quarter>().ok())
                    .unwrap_or(Quarter::Q1);
                ReportingPeriod::quarterly(year, quarter)
            }
        }
    }
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::current()
    }
}

/// Normalize with the current-year fallback
#[must_use]
pub fn normalize(raw: &RawPrediction, kind: PredictionKind, origin: Origin) -> Prediction {
    Normalizer::current().normalize(raw, kind, origin)
}

fn resolve_scope(raw: &RawPrediction, origin: Origin) -> Scope {
    match origin {
        Origin::System => Scope::System,
        Origin::User => raw
            .access_level
            .as_deref()
            .or(raw.organization_access.as_deref())
            .and_then(|label| label.parse::<Scope>().ok())
            .unwrap_or(Scope::Personal),
    }
}

fn default_probability(raw: &RawPrediction, kind: PredictionKind) -> f64 {
    let picked = match kind {
        PredictionKind::Annual => first_finite(&[raw.probability, raw.default_probability]),
        PredictionKind::Quarterly => first_finite(&[
            raw.ensemble_probability,
            raw.logistic_probability,
            raw.gbm_probability,
            raw.default_probability,
        ]),
    };
    picked.map_or(0.0, unit_interval)
}

fn risk_category(raw: &RawPrediction) -> Option<RiskCategory> {
    raw.risk_level
        .as_deref()
        .or(raw.risk_category.as_deref())
        .and_then(RiskCategory::parse_label)
}

fn metrics(raw: &RawPrediction, kind: PredictionKind) -> RiskMetrics {
    match kind {
        PredictionKind::Annual => RiskMetrics::Annual(AnnualMetrics {
            long_term_debt_to_total_capital: first_finite(&[
                raw.long_term_debt_to_total_capital,
                raw.ltdtc,
            ]),
            total_debt_to_ebitda: first_finite(&[raw.total_debt_to_ebitda, raw.debt_to_ebitda]),
            net_income_margin: finite(raw.net_income_margin),
            ebit_to_interest_expense: first_finite(&[
                raw.ebit_to_interest_expense,
                raw.interest_coverage,
            ]),
            return_on_assets: first_finite(&[raw.return_on_assets, raw.roa]),
        }),
        PredictionKind::Quarterly => RiskMetrics::Quarterly(QuarterlyMetrics {
            total_debt_to_ebitda: first_finite(&[raw.total_debt_to_ebitda, raw.debt_to_ebitda]),
            sga_margin: finite(raw.sga_margin),
            long_term_debt_to_total_capital: first_finite(&[
                raw.long_term_debt_to_total_capital,
                raw.ltdtc,
            ]),
            return_on_capital: first_finite(&[raw.return_on_capital, raw.roc]),
        }),
    }
}

/// First finite value in priority order
fn first_finite(candidates: &[Option<f64>]) -> Option<f64> {
    candidates.iter().find_map(|c| finite(*c))
}

fn finite(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite())
}

fn unit_interval(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn raw(value: serde_json::Value) -> RawPrediction {
        serde_json::from_value(value).unwrap()
    }

    fn normalizer() -> Normalizer {
        Normalizer::with_fallback_year(2020)
    }

    #[test]
    fn quarterly_prefers_ensemble_probability() {
        let record = raw(json!({
            "ensemble_probability": 0.11,
            "logistic_probability": 0.22,
            "gbm_probability": 0.33,
            "default_probability": 0.44,
        }));
        let p = normalizer().normalize(&record, PredictionKind::Quarterly, Origin::User);
        assert_eq!(p.default_probability, 0.11);
    }

    #[test]
    fn quarterly_falls_through_aliases() {
        let record = raw(json!({"gbm_probability": 0.33, "default_probability": 0.44}));
        let p = normalizer().normalize(&record, PredictionKind::Quarterly, Origin::User);
        assert_eq!(p.default_probability, 0.33);
    }

    #[test]
    fn annual_ignores_quarterly_aliases() {
        let record = raw(json!({"ensemble_probability": 0.9, "default_probability": 0.2}));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.default_probability, 0.2);

        let record = raw(json!({"probability": 0.05, "default_probability": 0.2}));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.default_probability, 0.05);
    }

    #[test]
    fn missing_probability_is_zero() {
        let p =
            normalizer().normalize(&RawPrediction::default(), PredictionKind::Annual, Origin::User);
        assert_eq!(p.default_probability, 0.0);
        assert!(!p.default_probability.is_nan());
    }

    #[test]
    fn system_origin_overrides_access_label() {
        let record = raw(json!({
            "access_level": "organization",
            "organization_id": "org-1",
        }));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::System);
        assert_eq!(p.scope, Scope::System);
        assert_eq!(p.organization_id, None);
    }

    #[test]
    fn user_origin_reads_access_labels() {
        let record = raw(json!({
            "organization_access": "organization",
            "organization_id": "org-1",
            "organization_name": "Org One",
        }));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.scope, Scope::Organization);
        assert_eq!(p.organization_id.as_deref(), Some("org-1"));
        assert_eq!(p.organization_name.as_deref(), Some("Org One"));

        let record = raw(json!({
            "access_level": "personal",
            "organization_access": "organization",
        }));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.scope, Scope::Personal);
    }

    #[test]
    fn user_origin_defaults_to_personal() {
        let record = raw(json!({"organization_id": "org-1"}));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.scope, Scope::Personal);
        assert_eq!(p.organization_id, None);
    }

    #[test]
    fn missing_period_uses_fallbacks() {
        let p = normalizer().normalize(
            &RawPrediction::default(),
            PredictionKind::Quarterly,
            Origin::User,
        );
        assert_eq!(p.reporting_period, ReportingPeriod::quarterly(2020, Quarter::Q1));

        let p =
            normalizer().normalize(&RawPrediction::default(), PredictionKind::Annual, Origin::User);
        assert_eq!(p.reporting_period, ReportingPeriod::annual(2020));
    }

    #[test]
    fn quarter_label_normalized() {
        let record = raw(json!({"year": 2024, "quarter": "q3"}));
        let p = normalizer().normalize(&record, PredictionKind::Quarterly, Origin::User);
        assert_eq!(p.reporting_period, ReportingPeriod::quarterly(2024, Quarter::Q3));

        let record = raw(json!({"reporting_year": 2024, "reporting_quarter": 2}));
        let p = normalizer().normalize(&record, PredictionKind::Quarterly, Origin::User);
        assert_eq!(p.reporting_period.quarter, Some(Quarter::Q2));
    }

    #[test]
    fn annual_never_carries_quarter() {
        let record = raw(json!({"reporting_year": 2022, "reporting_quarter": "Q4"}));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.reporting_period, ReportingPeriod::annual(2022));
    }

    #[test]
    fn risk_category_priority() {
        let record = raw(json!({"risk_level": "high", "risk_category": "low"}));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.risk_category, Some(RiskCategory::High));

        let record = raw(json!({"risk_category": "CRITICAL"}));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.risk_category, Some(RiskCategory::Critical));
    }

    #[test]
    fn company_identity_from_nested_shape() {
        let record = raw(json!({
            "id": "p1",
            "company": {"id": "c1", "symbol": "acme", "name": "Acme Corp"},
        }));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.company_id, "c1");
        assert_eq!(p.company_symbol, "ACME");
        assert_eq!(p.company_name, "Acme Corp");
    }

    #[test]
    fn metric_aliases() {
        let record = raw(json!({"ltdtc": 0.4, "roa": "0.07", "interest_coverage": 3.5}));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        match p.risk_metrics {
            RiskMetrics::Annual(m) => {
                assert_eq!(m.long_term_debt_to_total_capital, Some(0.4));
                assert_eq!(m.return_on_assets, Some(0.07));
                assert_eq!(m.ebit_to_interest_expense, Some(3.5));
                assert_eq!(m.net_income_margin, None);
            }
            RiskMetrics::Quarterly(_) => panic!("expected annual metrics"),
        }
    }

    #[test]
    fn audit_fields_parsed() {
        let record = raw(json!({
            "created_by": "u1",
            "created_by_email": "u1@example.com",
            "created_at": "2024-03-01T12:00:00Z",
        }));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.created_by.as_deref(), Some("u1"));
        assert!(p.created_at.is_some());

        let record = raw(json!({"created_at": "yesterday"}));
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.created_at, None);
    }

    #[test]
    fn non_finite_values_are_dropped() {
        let record = RawPrediction {
            ensemble_probability: Some(f64::NAN),
            logistic_probability: Some(0.3),
            confidence: Some(f64::INFINITY),
            sga_margin: Some(f64::NAN),
            roc: Some(f64::NEG_INFINITY),
            ..RawPrediction::default()
        };
        let p = normalizer().normalize(&record, PredictionKind::Quarterly, Origin::User);
        assert_eq!(p.default_probability, 0.3);
        assert_eq!(p.confidence, 0.0);
        match p.risk_metrics {
            RiskMetrics::Quarterly(m) => {
                assert_eq!(m.sga_margin, None);
                assert_eq!(m.return_on_capital, None);
            }
            RiskMetrics::Annual(_) => panic!("expected quarterly metrics"),
        }

        let record = RawPrediction {
            probability: Some(f64::NAN),
            ..RawPrediction::default()
        };
        let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::User);
        assert_eq!(p.default_probability, 0.0);
    }

    proptest! {
        #[test]
        fn prop_probability_in_unit_interval(
            ensemble in proptest::option::of(-10.0f64..10.0),
            logistic in proptest::option::of(-10.0f64..10.0),
            confidence in proptest::option::of(-10.0f64..10.0),
        ) {
            let record = RawPrediction {
                ensemble_probability: ensemble,
                logistic_probability: logistic,
                confidence,
                ..RawPrediction::default()
            };
            let p = normalizer().normalize(&record, PredictionKind::Quarterly, Origin::User);
            prop_assert!((0.0..=1.0).contains(&p.default_probability));
            prop_assert!((0.0..=1.0).contains(&p.confidence));
        }

        #[test]
        fn prop_normalization_is_deterministic(
            ensemble in proptest::option::of(0.0f64..1.0),
            logistic in proptest::option::of(0.0f64..1.0),
            gbm in proptest::option::of(0.0f64..1.0),
        ) {
            let record = RawPrediction {
                ensemble_probability: ensemble,
                logistic_probability: logistic,
                gbm_probability: gbm,
                ..RawPrediction::default()
            };
            let a = normalizer().normalize(&record, PredictionKind::Quarterly, Origin::User);
            let b = normalizer().normalize(&record, PredictionKind::Quarterly, Origin::User);
            prop_assert_eq!(a.default_probability, b.default_probability);
            if let Some(e) = ensemble {
                prop_assert_eq!(a.default_probability, e);
            }
        }

        #[test]
        fn prop_system_origin_always_system(label in "[a-z]{0,12}") {
            let record = RawPrediction {
                access_level: Some(label),
                ..RawPrediction::default()
            };
            let p = normalizer().normalize(&record, PredictionKind::Annual, Origin::System);
            prop_assert_eq!(p.scope, Scope::System);
        }
    }
}
