//! Testing utilities for the riskwatch workspace
//!
//! An in-memory backend serving every collaborator trait, plus record fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use riskwatch_cache::{ListRequest, PredictionApi, Visibility};
use riskwatch_model::{
    ApiError, CurrentUser, Normalizer, Origin, PredictionId, PredictionInput, PredictionKind,
    RawPrediction, RiskCategory, RiskMetrics, Role,
};
use riskwatch_sync::{
    DashboardStats, JobId, JobStatus, JobStatusReport, JobStatusSource, RiskDistribution,
    StatsSource,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::watch;

type Endpoint = (Visibility, PredictionKind);

/// In-memory backend with call counting, gating and failure injection
pub struct FakeBackend {
    records: Mutex<HashMap<Endpoint, Vec<RawPrediction>>>,
    list_failures: Mutex<HashMap<Endpoint, ApiError>>,
    mutation_failure: Mutex<Option<ApiError>>,
    stats_failure: Mutex<Option<ApiError>>,
    job_reports: Mutex<HashMap<JobId, VecDeque<JobStatusReport>>>,
    job_records: Mutex<HashMap<JobId, Vec<(PredictionKind, RawPrediction)>>>,
    request_log: Mutex<Vec<ListRequest>>,
    gate: watch::Sender<bool>,
    list_calls: AtomicUsize,
    mutation_calls: AtomicUsize,
    stats_calls: AtomicUsize,
    job_calls: AtomicUsize,
}

impl Default for FakeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeBackend {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            records: Mutex::new(HashMap::new()),
            list_failures: Mutex::new(HashMap::new()),
            mutation_failure: Mutex::new(None),
            stats_failure: Mutex::new(None),
            job_reports: Mutex::new(HashMap::new()),
            job_records: Mutex::new(HashMap::new()),
            request_log: Mutex::new(Vec::new()),
            gate,
            list_calls: AtomicUsize::new(0),
            mutation_calls: AtomicUsize::new(0),
            stats_calls: AtomicUsize::new(0),
            job_calls: AtomicUsize::new(0),
        }
    }

    /// Backend with a small data set in every partition
    ///
    /// - user annual: `p1` personal, `p2` and `p3` organization
    /// - user quarterly: `q1` organization, `q2` personal
    /// - system annual: `s1`, `s2`
    /// - system quarterly: `sq1`
    pub fn seeded() -> Self {
        let backend = Self::new();
        backend.set_records(
            Visibility::User,
            PredictionKind::Annual,
            vec![
                raw_annual("p1", "ACME", "personal", 0.05),
                raw_annual("p2", "GLOBX", "organization", 0.30),
                raw_annual("p3", "INITECH", "organization", 0.72),
            ],
        );
        backend.set_records(
            Visibility::User,
            PredictionKind::Quarterly,
            vec![
                raw_quarterly("q1", "GLOBX", "organization", 0.22),
                raw_quarterly("q2", "ACME", "personal", 0.08),
            ],
        );
        backend.set_records(
            Visibility::System,
            PredictionKind::Annual,
            vec![
                raw_annual("s1", "UMBRL", "system", 0.41),
                raw_annual("s2", "WAYNE", "system", 0.03),
            ],
        );
        backend.set_records(
            Visibility::System,
            PredictionKind::Quarterly,
            vec![raw_quarterly("sq1", "STARK", "system", 0.12)],
        );
        backend
    }

    // ========== Data ==========

    pub fn set_records(
        &self,
        visibility: Visibility,
        kind: PredictionKind,
        records: Vec<RawPrediction>,
    ) {
        self.records.lock().insert((visibility, kind), records);
    }

    pub fn records(&self, visibility: Visibility, kind: PredictionKind) -> Vec<RawPrediction> {
        self.records.lock().get(&(visibility, kind)).cloned().unwrap_or_default()
    }

    // ========== Failure injection ==========

    /// Fail every list call to an endpoint until cleared
    pub fn fail_list(&self, visibility: Visibility, kind: PredictionKind, error: ApiError) {
        self.list_failures.lock().insert((visibility, kind), error);
    }

    /// Fail the next create/update/delete call
    pub fn fail_next_mutation(&self, error: ApiError) {
        *self.mutation_failure.lock() = Some(error);
    }

    /// Fail statistics calls until cleared
    pub fn fail_stats(&self, error: Option<ApiError>) {
        *self.stats_failure.lock() = error;
    }

    pub fn clear_failures(&self) {
        self.list_failures.lock().clear();
        *self.mutation_failure.lock() = None;
        *self.stats_failure.lock() = None;
    }

    // ========== Gating ==========

    /// Park list calls until `release`
    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Yield until at least `n` list calls have arrived
    pub async fn wait_for_list_calls(&self, n: usize) {
        while self.list_calls() < n {
            tokio::task::yield_now().await;
        }
    }

    // ========== Jobs ==========

    /// Script the reports a job will return, in order; the last one repeats
    pub fn script_job(&self, id: JobId, reports: Vec<JobStatusReport>) {
        self.job_reports.lock().insert(id, reports.into());
    }

    /// Records the job inserts into the user partitions once it reports completed
    pub fn job_creates(&self, id: JobId, records: Vec<(PredictionKind, RawPrediction)>) {
        self.job_records.lock().insert(id, records);
    }

    // ========== Inspection ==========

    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn mutation_calls(&self) -> usize {
        self.mutation_calls.load(Ordering::SeqCst)
    }

    pub fn stats_calls(&self) -> usize {
        self.stats_calls.load(Ordering::SeqCst)
    }

    pub fn job_calls(&self) -> usize {
        self.job_calls.load(Ordering::SeqCst)
    }

    pub fn request_log(&self) -> Vec<ListRequest> {
        self.request_log.lock().clone()
    }

    pub fn reset_counters(&self) {
        self.list_calls.store(0, Ordering::SeqCst);
        self.mutation_calls.store(0, Ordering::SeqCst);
        self.stats_calls.store(0, Ordering::SeqCst);
        self.job_calls.store(0, Ordering::SeqCst);
        self.request_log.lock().clear();
    }

    fn take_mutation_failure(&self) -> Result<(), ApiError> {
        self.mutation_calls.fetch_add(1, Ordering::SeqCst);
        match self.mutation_failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl PredictionApi for FakeBackend {
    async fn list(&self, request: ListRequest) -> Result<Vec<RawPrediction>, ApiError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.request_log.lock().push(request);

        let mut gate = self.gate.subscribe();
        let _ = gate.wait_for(|open| *open).await;

        let endpoint = (request.visibility, request.kind);
        if let Some(err) = self.list_failures.lock().get(&endpoint) {
            return Err(err.clone());
        }
        let records = self.records(request.visibility, request.kind);
        let offset = request.offset as usize;
        Ok(records
            .into_iter()
            .skip(offset)
            .take(request.limit as usize)
            .collect())
    }

    async fn create(
        &self,
        kind: PredictionKind,
        input: &PredictionInput,
    ) -> Result<RawPrediction, ApiError> {
        self.take_mutation_failure()?;
        let raw = raw_from_input(&uuid::Uuid::new_v4().to_string(), input);
        self.records
            .lock()
            .entry((Visibility::User, kind))
            .or_default()
            .insert(0, raw.clone());
        Ok(raw)
    }

    async fn update(
        &self,
        kind: PredictionKind,
        id: &PredictionId,
        input: &PredictionInput,
    ) -> Result<RawPrediction, ApiError> {
        self.take_mutation_failure()?;
        let mut records = self.records.lock();
        let list = records.entry((Visibility::User, kind)).or_default();
        let slot = list
            .iter_mut()
            .find(|r| r.id.as_deref() == Some(id.as_str()))
            .ok_or_else(|| ApiError::NotFound(format!("prediction {id}")))?;
        *slot = raw_from_input(id.as_str(), input);
        Ok(slot.clone())
    }

    async fn delete(&self, kind: PredictionKind, id: &PredictionId) -> Result<(), ApiError> {
        self.take_mutation_failure()?;
        let mut records = self.records.lock();
        let mut removed = 0;
        for visibility in [Visibility::User, Visibility::System] {
            if let Some(list) = records.get_mut(&(visibility, kind)) {
                let before = list.len();
                list.retain(|r| r.id.as_deref() != Some(id.as_str()));
                removed += before - list.len();
            }
        }
        if removed == 0 {
            return Err(ApiError::NotFound(format!("prediction {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl StatsSource for FakeBackend {
    async fn dashboard_stats(&self, user: &CurrentUser) -> Result<DashboardStats, ApiError> {
        self.stats_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.stats_failure.lock().clone() {
            return Err(err);
        }

        let normalizer = Normalizer::with_fallback_year(2024);
        let mut visibilities = vec![Visibility::System];
        if user.role.requires_user_data() {
            visibilities.push(Visibility::User);
        }

        let mut stats = DashboardStats::default();
        let mut companies = BTreeSet::new();
        let mut probability_sum = 0.0;
        let mut distribution = RiskDistribution::default();
        for visibility in visibilities {
            for kind in PredictionKind::ALL {
                for raw in self.records(visibility, kind) {
                    let p = normalizer.normalize(&raw, kind, visibility.origin());
                    match kind {
                        PredictionKind::Annual => stats.annual_predictions += 1,
                        PredictionKind::Quarterly => stats.quarterly_predictions += 1,
                    }
                    probability_sum += p.default_probability;
                    match p.risk_category {
                        Some(RiskCategory::Low) => distribution.low += 1,
                        Some(RiskCategory::Medium) => distribution.medium += 1,
                        Some(RiskCategory::High) => distribution.high += 1,
                        Some(RiskCategory::Critical) => distribution.critical += 1,
                        None => {}
                    }
                    companies.insert(p.company_symbol);
                }
            }
        }
        let total = stats.annual_predictions + stats.quarterly_predictions;
        stats.total_companies = companies.len() as u64;
        stats.risk_distribution = distribution;
        if total > 0 {
            stats.average_default_probability = probability_sum / total as f64;
        }
        Ok(stats)
    }
}

#[async_trait]
impl JobStatusSource for FakeBackend {
    async fn job_status(&self, id: &JobId) -> Result<JobStatusReport, ApiError> {
        self.job_calls.fetch_add(1, Ordering::SeqCst);
        let report = {
            let mut jobs = self.job_reports.lock();
            let queue = jobs
                .get_mut(id)
                .ok_or_else(|| ApiError::NotFound(format!("job {id}")))?;
            match queue.len() {
                0 => return Err(ApiError::NotFound(format!("job {id}"))),
                1 => queue[0].clone(),
                _ => queue
                    .pop_front()
                    .unwrap_or_else(|| JobStatusReport::new(JobStatus::Pending, 0)),
            }
        };
        if report.status == JobStatus::Completed {
            if let Some(created) = self.job_records.lock().remove(id) {
                let mut records = self.records.lock();
                for (kind, raw) in created {
                    records.entry((Visibility::User, kind)).or_default().insert(0, raw);
                }
            }
        }
        Ok(report)
    }
}

// ========== Fixtures ==========

fn risk_label(probability: f64) -> &'static str {
    match probability {
        p if p < 0.1 => "low",
        p if p < 0.4 => "medium",
        p if p < 0.7 => "high",
        _ => "critical",
    }
}

/// Annual record as the API returns it
pub fn raw_annual(id: &str, symbol: &str, access: &str, probability: f64) -> RawPrediction {
    RawPrediction {
        company_symbol: Some(symbol.to_string()),
        company_name: Some(format!("{symbol} Corp")),
        reporting_year: Some(2024),
        probability: Some(probability),
        risk_level: Some(risk_label(probability).to_string()),
        confidence: Some(0.9),
        access_level: Some(access.to_string()),
        organization_id: (access == "organization").then(|| "org-1".to_string()),
        long_term_debt_to_total_capital: Some(0.4),
        total_debt_to_ebitda: Some(2.5),
        net_income_margin: Some(0.08),
        ebit_to_interest_expense: Some(6.0),
        return_on_assets: Some(0.05),
        ..RawPrediction::with_id(id)
    }
}

/// Quarterly record as the API returns it
pub fn raw_quarterly(id: &str, symbol: &str, access: &str, ensemble: f64) -> RawPrediction {
    RawPrediction {
        company_symbol: Some(symbol.to_string()),
        company_name: Some(format!("{symbol} Corp")),
        reporting_year: Some(2024),
        reporting_quarter: Some("Q2".to_string()),
        ensemble_probability: Some(ensemble),
        logistic_probability: Some((ensemble + 0.1).min(1.0)),
        risk_level: Some(risk_label(ensemble).to_string()),
        confidence: Some(0.8),
        access_level: Some(access.to_string()),
        organization_id: (access == "organization").then(|| "org-1".to_string()),
        total_debt_to_ebitda: Some(3.1),
        sga_margin: Some(0.2),
        long_term_debt_to_total_capital: Some(0.35),
        return_on_capital: Some(0.11),
        ..RawPrediction::with_id(id)
    }
}

/// Record the backend stores for a create/update payload
pub fn raw_from_input(id: &str, input: &PredictionInput) -> RawPrediction {
    let access = if input.organization_id.is_some() {
        "organization"
    } else {
        "personal"
    };
    let mut raw = RawPrediction {
        company_symbol: Some(input.company_symbol.clone()),
        company_name: Some(input.company_name.clone()),
        reporting_year: Some(i64::from(input.reporting_period.year)),
        reporting_quarter: input.reporting_period.quarter.map(|q| q.to_string()),
        access_level: Some(access.to_string()),
        organization_id: input.organization_id.clone(),
        risk_level: Some("medium".to_string()),
        confidence: Some(0.85),
        ..RawPrediction::with_id(id)
    };
    match input.risk_metrics {
        RiskMetrics::Annual(m) => {
            raw.probability = Some(0.2);
            raw.long_term_debt_to_total_capital = m.long_term_debt_to_total_capital;
            raw.total_debt_to_ebitda = m.total_debt_to_ebitda;
            raw.net_income_margin = m.net_income_margin;
            raw.ebit_to_interest_expense = m.ebit_to_interest_expense;
            raw.return_on_assets = m.return_on_assets;
        }
        RiskMetrics::Quarterly(m) => {
            raw.ensemble_probability = Some(0.2);
            raw.total_debt_to_ebitda = m.total_debt_to_ebitda;
            raw.sga_margin = m.sga_margin;
            raw.long_term_debt_to_total_capital = m.long_term_debt_to_total_capital;
            raw.return_on_capital = m.return_on_capital;
        }
    }
    raw
}

/// Authenticated user for a role; non-individual roles belong to `org-1`
pub fn user(role: Role) -> CurrentUser {
    let user =
        CurrentUser::new(format!("user-{role}"), role).with_email(format!("{role}@example.com"));
    match role {
        Role::User | Role::SuperAdmin => user,
        _ => user.with_organization("org-1"),
    }
}

pub fn annual_input(symbol: &str) -> PredictionInput {
    PredictionInput::annual(symbol, format!("{symbol} Corp"), 2024, Default::default())
}

pub fn quarterly_input(symbol: &str) -> PredictionInput {
    PredictionInput::quarterly(
        symbol,
        format!("{symbol} Corp"),
        2024,
        riskwatch_model::Quarter::Q3,
        Default::default(),
    )
}

/// Normalize a fixture the way the store does
pub fn normalized(
    raw: &RawPrediction,
    kind: PredictionKind,
    origin: Origin,
) -> riskwatch_model::Prediction {
    Normalizer::with_fallback_year(2024).normalize(raw, kind, origin)
}
