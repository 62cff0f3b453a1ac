//! Scenario Registry: owns the scenarios and drives
//! Provisioner → Runner → Verifier for each of them.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::future::{join_all, FutureExt};
use indexmap::IndexMap;

use crate::config::HarnessConfig;
use crate::namespace::NamespaceFactory;
use crate::provisioner::provision;
use crate::report::{AggregateReport, ScenarioReport, Verdict};
use crate::runner::{run_exploit, AbortedRun, Exploit, RunError, RunLimits};
use crate::scenario::{Scenario, ScenarioError};
use crate::verifier::verify;

/// A scenario together with the exploit attempted against it
#[derive(Clone)]
pub struct RegisteredScenario {
    pub definition: Arc<Scenario>,
    pub exploit: Arc<dyn Exploit>,
    pub fingerprint: String,
}

/// What `register` did with a scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    Registered,
    /// Same content as an already registered scenario; skipped
    Duplicate { of: String },
}

pub struct ScenarioRegistry {
    scenarios: IndexMap<String, RegisteredScenario>,
    factory: NamespaceFactory,
    limits: RunLimits,
    parallel: bool,
}

impl ScenarioRegistry {
    pub fn new(config: &HarnessConfig) -> Self {
        Self {
            scenarios: IndexMap::new(),
            factory: NamespaceFactory::new(config.ledger()),
            limits: config.limits(),
            parallel: config.parallel,
        }
    }

    pub fn with_limits(mut self, limits: RunLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn factory(&self) -> &NamespaceFactory {
        &self.factory
    }

    /// Add a scenario. Names must be unique. A scenario is skipped when one
    /// already registered has the same fingerprint and an exploit with the
    /// same description; scenarios holding opaque custom predicates are
    /// always registered.
    pub fn register(
        &mut self,
        scenario: Scenario,
        exploit: Arc<dyn Exploit>,
    ) -> Result<Registration, ScenarioError> {
        if self.scenarios.contains_key(scenario.name()) {
            return Err(ScenarioError::DuplicateName(scenario.name().to_string()));
        }

        let fingerprint = scenario.fingerprint();
        let attack = exploit.describe();
        let duplicate = scenario.is_comparable().then(|| {
            self.scenarios.values().find(|entry| {
                entry.fingerprint == fingerprint && entry.exploit.describe() == attack
            })
        });
        if let Some(existing) = duplicate.flatten() {
            let of = existing.definition.name().to_string();
            log::warn!(
                "Scenario '{}' duplicates '{}' (fingerprint {}), skipping",
                scenario.name(),
                of,
                &fingerprint[..12]
            );
            return Ok(Registration::Duplicate { of });
        }

        log::debug!("Registered scenario '{}'", scenario.name());
        self.scenarios.insert(
            scenario.name().to_string(),
            RegisteredScenario {
                definition: Arc::new(scenario),
                exploit,
                fingerprint,
            },
        );
        Ok(Registration::Registered)
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&RegisteredScenario> {
        self.scenarios.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredScenario> {
        self.scenarios.values()
    }

    pub fn names(&self) -> Vec<&str> {
        self.scenarios.keys().map(String::as_str).collect()
    }

    /// Run one scenario in a fresh namespace.
    pub async fn run(&self, name: &str) -> Result<ScenarioReport, ScenarioError> {
        let entry = self
            .scenarios
            .get(name)
            .ok_or_else(|| ScenarioError::UnknownScenario(name.to_string()))?;
        Ok(self.execute_isolated(entry).await)
    }

    pub async fn run_all(&self) -> AggregateReport {
        self.run_matching(|_| true).await
    }

    /// Run every scenario whose name satisfies `filter`, in registration
    /// order. A failing scenario never stops the others.
    pub async fn run_matching(&self, filter: impl Fn(&str) -> bool) -> AggregateReport {
        let selected: Vec<&RegisteredScenario> = self
            .scenarios
            .values()
            .filter(|entry| filter(entry.definition.name()))
            .collect();
        log::info!(
            "Running {} scenario(s){}",
            selected.len(),
            if self.parallel { " concurrently" } else { "" }
        );

        let reports = if self.parallel {
            join_all(selected.into_iter().map(|entry| self.execute_isolated(entry))).await
        } else {
            let mut reports = Vec::with_capacity(selected.len());
            for entry in selected {
                reports.push(self.execute_isolated(entry).await);
            }
            reports
        };
        AggregateReport::new(reports)
    }

    /// Run one scenario, turning a panic in caller code (exploit planning,
    /// custom predicates, subsystems) into a failed report.
    async fn execute_isolated(&self, entry: &RegisteredScenario) -> ScenarioReport {
        let started = Instant::now();
        match AssertUnwindSafe(self.execute(entry)).catch_unwind().await {
            Ok(report) => report,
            Err(payload) => {
                let name = entry.definition.name();
                let message = panic_message(payload.as_ref());
                log::error!("Scenario '{}' panicked: {}", name, message);
                ScenarioReport {
                    verdict: Verdict::panicked(name, &message),
                    fingerprint: entry.fingerprint.clone(),
                    duration_ms: elapsed_ms(started),
                    trace: Vec::new(),
                    assertions: Vec::new(),
                }
            }
        }
    }

    async fn execute(&self, entry: &RegisteredScenario) -> ScenarioReport {
        let scenario = &entry.definition;
        let name = scenario.name();
        let started = Instant::now();
        let mut namespace = self.factory.checkout(name);

        let mut trace = Vec::new();
        let mut assertions = Vec::new();
        let verdict = match provision(scenario, &mut namespace).await {
            Err(e) => {
                log::warn!("Scenario '{}' setup error: {}", name, e);
                Verdict::setup_error(name, &e)
            }
            Ok(()) => match run_exploit(entry.exploit.as_ref(), &mut namespace, &self.limits).await
            {
                // aborted runs skip verification entirely
                Err(AbortedRun { error, trace: partial }) => {
                    trace = partial;
                    match error {
                        RunError::Timeout(reason) => {
                            log::warn!("Scenario '{}' timed out: {}", name, reason);
                            Verdict::timeout(name, reason)
                        }
                        RunError::Planning(message) => Verdict::planning_failed(name, &message),
                        RunError::Ledger(e) => Verdict::ledger_failed(name, &e.to_string()),
                    }
                }
                Ok(outcome) => {
                    trace = outcome.trace().to_vec();
                    let report = verify(scenario.postconditions(), &mut namespace).await;
                    let verdict = match report.failure() {
                        Some(failure) => Verdict::assertion_failed(name, failure),
                        None => Verdict::pass(name),
                    };
                    assertions = report.results;
                    verdict
                }
            },
        };
        drop(namespace);

        let duration_ms = elapsed_ms(started);
        log::info!("Scenario '{}': {} ({} ms)", name, verdict.status, duration_ms);
        ScenarioReport {
            verdict,
            fingerprint: entry.fingerprint.clone(),
            duration_ms,
            trace,
            assertions,
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with a non-string payload".to_string()
    }
}
