//! Seeded dashboard session simulator
//!
//! Drives a [`SyncCoordinator`] through a random but reproducible sequence of
//! session operations over a [`FlakyNetwork`], and after every step checks
//! that the cache never shows a record outside the active scope, never keeps a
//! record in the wrong partition, and never shows a deleted record.

use crate::network::FlakyNetwork;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use riskwatch_cache::{FetchOutcome, PartitionKey};
use riskwatch_model::{default_scope_for, ActiveScope, PredictionId, PredictionKind, Role, Scope};
use riskwatch_sync::{JobId, JobStatus, JobStatusReport, JobSummary, SyncConfig, SyncCoordinator};
use riskwatch_test_utils::{
    annual_input, quarterly_input, raw_annual, raw_quarterly, user, FakeBackend,
};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Seed for the operation stream and the network
    pub seed: u64,
    /// Number of operations to run
    pub steps: u64,
    /// Role of the simulated user
    pub role: Role,
    /// Probability that a network call fails transiently
    pub failure_rate: f64,
    /// Stop at the first violation
    pub stop_on_first_violation: bool,
    /// Sync layer configuration under test
    pub sync: SyncConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            steps: 500,
            role: Role::OrgMember,
            failure_rate: 0.1,
            stop_on_first_violation: false,
            sync: SyncConfig::default()
                .with_login_settle_delay(Duration::ZERO)
                .with_failed_job_retention(None),
        }
    }
}

/// Invariant violation observed after a step
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "violation", rename_all = "snake_case")]
pub enum Violation {
    /// A `super_admin` ended up outside the system scope
    ScopeNotCapped {
        /// Step index
        step: u64,
        /// Scope in effect
        active: ActiveScope,
    },
    /// A read returned a record the active scope does not admit
    ScopeLeak {
        /// Step index
        step: u64,
        /// Scope in effect
        active: ActiveScope,
        /// Offending record
        id: String,
        /// Its scope
        scope: Scope,
    },
    /// A record sits in a partition its scope or kind does not route to
    MisroutedRecord {
        /// Step index
        step: u64,
        /// Partition holding it
        partition: String,
        /// Offending record
        id: String,
    },
    /// A successfully deleted record is still cached
    DeletedStillCached {
        /// Step index
        step: u64,
        /// Deleted record
        id: String,
    },
    /// Statistics stayed fresh across a successful mutation
    StatsNotInvalidated {
        /// Step index
        step: u64,
    },
    /// A completed fetch left a scope other than the role default
    DefaultScopeNotRestored {
        /// Step index
        step: u64,
        /// Role default
        expected: ActiveScope,
        /// Scope in effect
        actual: ActiveScope,
    },
    /// Data survived a logout
    DataAfterLogout {
        /// Step index
        step: u64,
        /// Records left
        remaining: usize,
    },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ScopeNotCapped { step, active } => {
                write!(f, "step {step}: super_admin scope is {active}")
            }
            Self::ScopeLeak { step, active, id, scope } => {
                write!(f, "step {step}: {scope} record {id} visible under {active}")
            }
            Self::MisroutedRecord { step, partition, id } => {
                write!(f, "step {step}: record {id} misrouted to {partition}")
            }
            Self::DeletedStillCached { step, id } => {
                write!(f, "step {step}: deleted record {id} still cached")
            }
            Self::StatsNotInvalidated { step } => {
                write!(f, "step {step}: statistics not invalidated by mutation")
            }
            Self::DefaultScopeNotRestored { step, expected, actual } => {
                write!(f, "step {step}: scope {actual} after fetch, expected {expected}")
            }
            Self::DataAfterLogout { step, remaining } => {
                write!(f, "step {step}: {remaining} records left after logout")
            }
        }
    }
}

/// Counters collected during a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SimulatorStats {
    /// Operations executed
    pub steps_run: u64,
    /// Fetches that reached the network and replaced partitions
    pub fetches: u64,
    /// Fetches answered from the cache
    pub cache_hits: u64,
    /// Fetches that failed
    pub fetch_failures: u64,
    /// Scope filter changes
    pub scope_changes: u64,
    /// Mutations accepted by the backend
    pub mutations_ok: u64,
    /// Mutations rejected or dropped
    pub mutations_failed: u64,
    /// Statistics reads
    pub stats_reads: u64,
    /// Statistics reads that failed
    pub stats_failures: u64,
    /// Bulk jobs started
    pub jobs_started: u64,
    /// Bulk jobs that reached `completed`
    pub jobs_completed: u64,
    /// Logout/login cycles
    pub relogins: u64,
    /// Failures injected by the network
    pub injected_failures: u64,
}

/// Simulator result
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    /// Configuration the run used
    pub config: SimulatorConfig,
    /// Run counters
    pub stats: SimulatorStats,
    /// Violations, in order
    pub violations: Vec<Violation>,
}

impl SimulatorReport {
    /// Whether no invariant was violated
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Plain text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Riskwatch Session Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Role: {}\n", self.config.role));
        report.push_str(&format!("Failure Rate: {:.2}\n", self.config.failure_rate));
        report.push_str(&format!("Steps Run: {}\n", self.stats.steps_run));
        report.push_str(&format!("Fetches: {}\n", self.stats.fetches));
        report.push_str(&format!("Cache Hits: {}\n", self.stats.cache_hits));
        report.push_str(&format!("Fetch Failures: {}\n", self.stats.fetch_failures));
        report.push_str(&format!("Scope Changes: {}\n", self.stats.scope_changes));
        report.push_str(&format!(
            "Mutations: {} ok, {} failed\n",
            self.stats.mutations_ok, self.stats.mutations_failed
        ));
        report.push_str(&format!(
            "Stats Reads: {} ({} failed)\n",
            self.stats.stats_reads, self.stats.stats_failures
        ));
        report.push_str(&format!(
            "Bulk Jobs: {} started, {} completed\n",
            self.stats.jobs_started, self.stats.jobs_completed
        ));
        report.push_str(&format!("Relogins: {}\n", self.stats.relogins));
        report.push_str(&format!("Injected Failures: {}\n", self.stats.injected_failures));
        report.push_str(&format!("Violations: {}\n", self.violations.len()));

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                report.push_str(&format!("{}. {}\n", i + 1, v));
            }
        }

        report.push_str(&format!(
            "\n=== Result: {} ===\n",
            if self.passed() { "PASS" } else { "FAIL" }
        ));

        report
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Refresh { force: bool },
    SetScope(ActiveScope),
    Create(PredictionKind),
    Update,
    Delete,
    Stats { force: bool },
    StartBulkJob { succeeds: bool },
    PollJobs,
    Invalidate,
    Relogin,
}

fn pick_operation(rng: &mut StdRng) -> Operation {
    const SCOPES: [ActiveScope; 4] = [
        ActiveScope::Personal,
        ActiveScope::Organization,
        ActiveScope::System,
        ActiveScope::All,
    ];
    let kind = if rng.random_bool(0.5) {
        PredictionKind::Annual
    } else {
        PredictionKind::Quarterly
    };
    match rng.random_range(0..100u32) {
        0..=14 => Operation::Refresh { force: rng.random_bool(0.5) },
        15..=29 => Operation::SetScope(SCOPES[rng.random_range(0..SCOPES.len())]),
        30..=41 => Operation::Create(kind),
        42..=51 => Operation::Update,
        52..=61 => Operation::Delete,
        62..=71 => Operation::Stats { force: rng.random_bool(0.3) },
        72..=77 => Operation::StartBulkJob { succeeds: rng.random_bool(0.7) },
        78..=89 => Operation::PollJobs,
        90..=95 => Operation::Invalidate,
        _ => Operation::Relogin,
    }
}

struct Session {
    sync: SyncCoordinator,
    network: Arc<FlakyNetwork>,
    rng: StdRng,
    role: Role,
    stats: SimulatorStats,
    violations: Vec<Violation>,
    next_job: u64,
}

impl Session {
    fn visibility(&self) -> &'static str {
        match self.role {
            Role::User | Role::SuperAdmin => "personal",
            _ => "organization",
        }
    }

    fn note_fetch(&mut self, step: u64, outcome: Result<FetchOutcome, riskwatch_sync::SyncError>) {
        match outcome {
            Ok(FetchOutcome::Refreshed { .. }) => {
                self.stats.fetches += 1;
                let expected = ActiveScope::from(default_scope_for(self.role));
                let actual = self.sync.store().active_scope();
                if actual != expected {
                    self.violations.push(Violation::DefaultScopeNotRestored {
                        step,
                        expected,
                        actual,
                    });
                }
            }
            Ok(FetchOutcome::CacheHit) => self.stats.cache_hits += 1,
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(step, error = %err, "fetch failed");
                self.stats.fetch_failures += 1;
            }
        }
    }

    /// Random record from the cached partitions
    fn pick_cached(&mut self) -> Option<(PredictionId, PredictionKind)> {
        let candidates: Vec<(PredictionId, PredictionKind)> = PartitionKey::ALL
            .iter()
            .flat_map(|key| {
                self.sync
                    .store()
                    .partition(*key)
                    .iter()
                    .map(|p| (p.id.clone(), key.kind))
                    .collect::<Vec<_>>()
            })
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..candidates.len());
        Some(candidates[index].clone())
    }

    fn check_stats_invalidated(&mut self, step: u64) {
        if self.sync.stats().last_fetched_at().is_some() {
            self.violations.push(Violation::StatsNotInvalidated { step });
        }
    }

    async fn apply(&mut self, step: u64, operation: Operation) {
        tracing::trace!(step, ?operation, "applying operation");
        match operation {
            Operation::Refresh { force } => {
                let outcome = self.sync.refresh(force).await;
                self.note_fetch(step, outcome);
            }
            Operation::SetScope(scope) => {
                self.sync.set_active_scope(scope);
                self.stats.scope_changes += 1;
            }
            Operation::Create(kind) => {
                let symbol = format!("SIM{step}");
                let mut input = match kind {
                    PredictionKind::Annual => annual_input(&symbol),
                    PredictionKind::Quarterly => quarterly_input(&symbol),
                };
                if let Some(org) = self.sync.store().session().and_then(|u| u.organization_id) {
                    input = input.with_organization(org);
                }
                match self.sync.create_prediction(&input).await {
                    Ok(_) => {
                        self.stats.mutations_ok += 1;
                        self.check_stats_invalidated(step);
                    }
                    Err(_) => self.stats.mutations_failed += 1,
                }
            }
            Operation::Update => {
                let Some((id, kind)) = self.pick_cached() else {
                    return;
                };
                let symbol = format!("UPD{step}");
                let input = match kind {
                    PredictionKind::Annual => annual_input(&symbol),
                    PredictionKind::Quarterly => quarterly_input(&symbol),
                };
                match self.sync.update_prediction(&id, &input).await {
                    Ok(_) => {
                        self.stats.mutations_ok += 1;
                        self.check_stats_invalidated(step);
                    }
                    Err(_) => self.stats.mutations_failed += 1,
                }
            }
            Operation::Delete => {
                let Some((id, kind)) = self.pick_cached() else {
                    return;
                };
                match self.sync.delete_prediction(&id, kind).await {
                    Ok(()) => {
                        self.stats.mutations_ok += 1;
                        self.check_stats_invalidated(step);
                        let still_cached = PartitionKey::ALL
                            .iter()
                            .filter(|key| key.kind == kind)
                            .any(|key| {
                                self.sync.store().partition(*key).iter().any(|p| p.id == id)
                            });
                        if still_cached {
                            self.violations.push(Violation::DeletedStillCached {
                                step,
                                id: id.to_string(),
                            });
                        }
                    }
                    Err(_) => self.stats.mutations_failed += 1,
                }
            }
            Operation::Stats { force } => {
                self.stats.stats_reads += 1;
                if self.sync.dashboard_stats(force).await.is_err() {
                    self.stats.stats_failures += 1;
                }
            }
            Operation::StartBulkJob { succeeds } => {
                // One job at a time keeps the poll order deterministic
                if self.sync.jobs().active_count() > 0 {
                    return;
                }
                self.next_job += 1;
                let id = JobId::new(format!("sim-job-{}", self.next_job));
                let finish = if succeeds {
                    JobStatusReport::new(JobStatus::Completed, 100).with_summary(JobSummary {
                        total_rows: 2,
                        successful_rows: 2,
                        ..JobSummary::default()
                    })
                } else {
                    JobStatusReport::new(JobStatus::Failed, 40).with_error("row 3: unknown company")
                };
                let backend = self.network.backend();
                backend.script_job(
                    id.clone(),
                    vec![JobStatusReport::new(JobStatus::Processing, 50), finish],
                );
                let access = self.visibility();
                backend.job_creates(
                    id.clone(),
                    vec![
                        (
                            PredictionKind::Annual,
                            raw_annual(&format!("{id}-a"), &format!("BLK{step}"), access, 0.25),
                        ),
                        (
                            PredictionKind::Quarterly,
                            raw_quarterly(&format!("{id}-q"), &format!("BLK{step}"), access, 0.55),
                        ),
                    ],
                );
                self.sync.track_bulk_job(id, format!("upload-{step}.csv"));
                self.stats.jobs_started += 1;
            }
            Operation::PollJobs => {
                self.sync.jobs().poll_once().await;
                self.stats.jobs_completed += self
                    .sync
                    .jobs()
                    .jobs()
                    .iter()
                    .filter(|job| job.status == JobStatus::Completed)
                    .count() as u64;
                self.sync.jobs().clear_finished();
            }
            Operation::Invalidate => self.sync.store().invalidate_cache(),
            Operation::Relogin => {
                self.sync.on_logout();
                let remaining = self.sync.store().counts().total();
                if remaining > 0 {
                    self.violations.push(Violation::DataAfterLogout { step, remaining });
                }
                self.stats.relogins += 1;
                let outcome = self.sync.on_login(user(self.role)).await;
                self.note_fetch(step, outcome);
            }
        }
    }

    fn check_invariants(&mut self, step: u64) {
        let store = self.sync.store();
        let active = store.active_scope();
        if self.role == Role::SuperAdmin && active != ActiveScope::System {
            self.violations.push(Violation::ScopeNotCapped { step, active });
        }

        for kind in PredictionKind::ALL {
            for p in store.get_filtered(kind) {
                if !active.admits(p.scope) {
                    self.violations.push(Violation::ScopeLeak {
                        step,
                        active,
                        id: p.id.to_string(),
                        scope: p.scope,
                    });
                }
            }
        }

        for key in PartitionKey::ALL {
            for p in store.partition(key).iter() {
                if PartitionKey::route(p.scope, p.kind()) != key {
                    self.violations.push(Violation::MisroutedRecord {
                        step,
                        partition: key.to_string(),
                        id: p.id.to_string(),
                    });
                }
            }
        }
    }
}

/// Run a seeded session against a flaky in-memory backend
pub async fn run_simulator(config: SimulatorConfig) -> SimulatorReport {
    let backend = Arc::new(FakeBackend::seeded());
    let network = Arc::new(FlakyNetwork::new(
        backend,
        config.seed.wrapping_add(1),
        config.failure_rate,
    ));
    let sync = SyncCoordinator::with_backend(config.sync.clone(), Arc::clone(&network));

    let mut session = Session {
        sync,
        network,
        rng: StdRng::seed_from_u64(config.seed),
        role: config.role,
        stats: SimulatorStats::default(),
        violations: Vec::new(),
        next_job: 0,
    };

    tracing::info!(
        seed = config.seed,
        role = %config.role,
        steps = config.steps,
        "simulation started"
    );
    let outcome = session.sync.on_session_established(user(config.role)).await;
    session.note_fetch(0, outcome);
    session.check_invariants(0);

    for step in 1..=config.steps {
        let operation = pick_operation(&mut session.rng);
        session.apply(step, operation).await;
        session.check_invariants(step);
        session.stats.steps_run += 1;

        if config.stop_on_first_violation && !session.violations.is_empty() {
            tracing::warn!(step, "stopping at first violation");
            break;
        }
    }

    session.sync.on_logout();
    session.stats.injected_failures = session.network.injected_failures();
    tracing::info!(
        steps = session.stats.steps_run,
        violations = session.violations.len(),
        "simulation finished"
    );

    SimulatorReport {
        config,
        stats: session.stats,
        violations: session.violations,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn config(role: Role, failure_rate: f64) -> SimulatorConfig {
        SimulatorConfig {
            steps: 150,
            role,
            failure_rate,
            ..SimulatorConfig::default()
        }
    }

    #[tokio::test]
    async fn reliable_network_passes_for_every_role() {
        for role in Role::ALL {
            let report = run_simulator(config(role, 0.0)).await;
            assert!(report.passed(), "{role}: {}", report.generate_text());
            assert_eq!(report.stats.steps_run, 150);
            assert_eq!(report.stats.fetch_failures, 0);
            assert_eq!(report.stats.injected_failures, 0);
        }
    }

    #[tokio::test]
    async fn flaky_network_keeps_invariants() {
        let report = run_simulator(config(Role::OrgAdmin, 0.3)).await;
        assert!(report.passed(), "{}", report.generate_text());
        assert!(report.stats.injected_failures > 0);
    }

    #[tokio::test]
    async fn same_seed_same_run() {
        let first = run_simulator(config(Role::User, 0.2)).await;
        let second = run_simulator(config(Role::User, 0.2)).await;
        assert_eq!(first.stats, second.stats);
        assert_eq!(first.violations, second.violations);
    }

    #[test]
    fn report_text_lists_violations() {
        let report = SimulatorReport {
            config: SimulatorConfig::default(),
            stats: SimulatorStats::default(),
            violations: vec![Violation::DeletedStillCached {
                step: 7,
                id: "p3".to_string(),
            }],
        };
        let text = report.generate_text();
        assert!(!report.passed());
        assert!(text.contains("1. step 7: deleted record p3 still cached"));
        assert!(text.ends_with("=== Result: FAIL ===\n"));
    }

    #[test]
    fn report_serializes_to_json() {
        let report = SimulatorReport {
            config: SimulatorConfig::default(),
            stats: SimulatorStats::default(),
            violations: vec![Violation::StatsNotInvalidated { step: 2 }],
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["config"]["seed"], 42);
        assert_eq!(json["violations"][0]["violation"], "stats_not_invalidated");
    }
}
