//! Exploit Runner.
//!
//! An exploit is a pure planning function: it looks at an [`ExploitView`] of
//! the provisioned namespace and returns the ordered [`Step`]s to issue. The
//! runner executes them one at a time, records what happened and never
//! inspects or rewrites the plan.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{BoxFuture, FutureExt};
use gauntlet_common::primitives::derive_contract_address;
use gauntlet_common::{
    Address, Amount, Arg, Call, CallData, Contract, FailureKind, LedgerError, Revert,
    SubsystemSpec,
};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::namespace::Namespace;

/// Caller-authored attack, invoked once per run.
pub trait Exploit: Send + Sync {
    fn plan(&self, view: &ExploitView) -> anyhow::Result<Vec<Step>>;

    fn describe(&self) -> String {
        "exploit".to_string()
    }
}

impl<F> Exploit for F
where
    F: Fn(&ExploitView) -> anyhow::Result<Vec<Step>> + Send + Sync,
{
    fn plan(&self, view: &ExploitView) -> anyhow::Result<Vec<Step>> {
        self(view)
    }
}

/// The empty action sequence
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopExploit;

impl Exploit for NoopExploit {
    fn plan(&self, _view: &ExploitView) -> anyhow::Result<Vec<Step>> {
        Ok(Vec::new())
    }

    fn describe(&self) -> String {
        "noop".to_string()
    }
}

#[derive(Debug, Clone)]
struct ViewedActor {
    address: Address,
    signer: bool,
    nonce: u64,
}

/// What an exploit may know before it runs: names, addresses, nonces and
/// the clock. Balances and storage are deliberately absent.
#[derive(Debug, Clone)]
pub struct ExploitView {
    timestamp: u64,
    actors: IndexMap<String, ViewedActor>,
    subsystems: IndexMap<String, (Address, u64)>,
}

impl ExploitView {
    pub fn new(timestamp: u64) -> Self {
        Self {
            timestamp,
            actors: IndexMap::new(),
            subsystems: IndexMap::new(),
        }
    }

    pub fn add_actor(&mut self, name: &str, address: Address, signer: bool, nonce: u64) {
        self.actors.insert(
            name.to_string(),
            ViewedActor {
                address,
                signer,
                nonce,
            },
        );
    }

    pub fn add_subsystem(&mut self, label: &str, address: Address, nonce: u64) {
        self.subsystems.insert(label.to_string(), (address, nonce));
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn actor(&self, name: &str) -> anyhow::Result<Address> {
        self.actors
            .get(name)
            .map(|actor| actor.address)
            .ok_or_else(|| anyhow::anyhow!("unknown actor '{}'", name))
    }

    pub fn subsystem(&self, label: &str) -> anyhow::Result<Address> {
        self.subsystems
            .get(label)
            .map(|(address, _)| *address)
            .ok_or_else(|| anyhow::anyhow!("unknown subsystem '{}'", label))
    }

    pub fn is_signer(&self, name: &str) -> bool {
        self.actors.get(name).is_some_and(|actor| actor.signer)
    }

    /// Names of the actors the exploit may sign for
    pub fn signers(&self) -> Vec<&str> {
        self.actors
            .iter()
            .filter(|(_, actor)| actor.signer)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Current nonce of an actor or subsystem
    pub fn nonce(&self, name: &str) -> anyhow::Result<u64> {
        if let Some(actor) = self.actors.get(name) {
            return Ok(actor.nonce);
        }
        self.subsystems
            .get(name)
            .map(|(_, nonce)| *nonce)
            .ok_or_else(|| anyhow::anyhow!("unknown account '{}'", name))
    }

    /// Address of the `offset`-th deployment `name` makes from now on.
    /// Every transaction an actor sends consumes a nonce, deployments or not.
    pub fn predict_address(&self, name: &str, offset: u64) -> anyhow::Result<Address> {
        let creator = match self.actors.get(name) {
            Some(actor) => actor.address,
            None => self.subsystem(name)?,
        };
        Ok(derive_contract_address(&creator, self.nonce(name)? + offset))
    }
}

/// One action of an exploit sequence
#[derive(Debug, Clone)]
pub enum Step {
    Call {
        actor: String,
        target: Address,
        data: CallData,
        value: Amount,
    },
    Deploy {
        actor: String,
        contract: Arc<dyn Contract>,
        constructor: Vec<Arg>,
        value: Amount,
    },
    AdvanceTime(u64),
    /// All-or-nothing group: a failing member rolls back the whole group
    Atomic(Vec<Step>),
}

impl Step {
    pub fn call(actor: &str, target: Address, data: CallData) -> Self {
        Self::call_with_value(actor, target, data, Amount::zero())
    }

    pub fn call_with_value(actor: &str, target: Address, data: CallData, value: Amount) -> Self {
        Step::Call {
            actor: actor.to_string(),
            target,
            data,
            value,
        }
    }

    pub fn deploy(actor: &str, contract: Arc<dyn Contract>, constructor: Vec<Arg>) -> Self {
        Step::Deploy {
            actor: actor.to_string(),
            contract,
            constructor,
            value: Amount::zero(),
        }
    }

    /// Number of ledger-facing steps, counting into atomic groups
    pub fn weight(&self) -> usize {
        match self {
            Step::Atomic(steps) => steps.iter().map(Step::weight).sum(),
            _ => 1,
        }
    }
}

/// Ceilings applied to one exploit run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLimits {
    pub max_steps: usize,
    pub timeout: Duration,
    /// Ledger operations the whole sequence may meter
    pub op_budget: Option<u64>,
}

impl Default for RunLimits {
    fn default() -> Self {
        Self {
            max_steps: 256,
            timeout: Duration::from_secs(10),
            op_budget: Some(100_000),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimeoutReason {
    StepCeiling { limit: usize, requested: usize },
    WallClock { limit_ms: u64 },
    OpBudget { budget: u64 },
}

impl fmt::Display for TimeoutReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutReason::StepCeiling { limit, requested } => {
                write!(f, "step ceiling of {limit} exceeded ({requested} steps planned)")
            }
            TimeoutReason::WallClock { limit_ms } => {
                write!(f, "wall-clock limit of {limit_ms} ms exceeded")
            }
            TimeoutReason::OpBudget { budget } => write!(f, "op budget of {budget} exhausted"),
        }
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("exploit planning failed: {0}")]
    Planning(String),
    #[error("timeout: {0}")]
    Timeout(TimeoutReason),
    #[error("ledger failure: {0}")]
    Ledger(#[from] LedgerError),
}

/// A run that stopped before its plan finished, with the steps recorded
/// up to that point
#[derive(Debug, Error)]
#[error("{error}")]
pub struct AbortedRun {
    pub error: RunError,
    pub trace: Vec<StepRecord>,
}

impl From<RunError> for AbortedRun {
    fn from(error: RunError) -> Self {
        Self {
            error,
            trace: Vec::new(),
        }
    }
}

/// What happened to one executed (or refused) step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub index: usize,
    pub actor: String,
    pub description: String,
    pub success: bool,
    pub return_data: Arg,
    pub revert: Option<Revert>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ExploitOutcome {
    Committed {
        trace: Vec<StepRecord>,
    },
    /// At least one step failed; `step` is the first of them
    RevertedWithReason {
        trace: Vec<StepRecord>,
        step: usize,
        revert: Revert,
    },
}

impl ExploitOutcome {
    pub fn trace(&self) -> &[StepRecord] {
        match self {
            ExploitOutcome::Committed { trace } => trace,
            ExploitOutcome::RevertedWithReason { trace, .. } => trace,
        }
    }

    pub fn is_committed(&self) -> bool {
        matches!(self, ExploitOutcome::Committed { .. })
    }
}

/// Plan and execute `exploit` inside `namespace`.
///
/// Failed steps are rolled back by the ledger and recorded; execution then
/// continues with the next step. Exceeding a ceiling aborts the run; the
/// steps executed before that are returned with the error.
pub async fn run_exploit(
    exploit: &dyn Exploit,
    namespace: &mut Namespace,
    limits: &RunLimits,
) -> Result<ExploitOutcome, AbortedRun> {
    let view = namespace
        .exploit_view()
        .await
        .map_err(|e| RunError::Planning(format!("{e:#}")))?;
    let steps = exploit
        .plan(&view)
        .map_err(|e| RunError::Planning(format!("{e:#}")))?;

    let requested: usize = steps.iter().map(Step::weight).sum();
    if requested > limits.max_steps {
        log::warn!(
            "Exploit '{}' planned {} steps, ceiling is {}",
            exploit.describe(),
            requested,
            limits.max_steps
        );
        return Err(RunError::Timeout(TimeoutReason::StepCeiling {
            limit: limits.max_steps,
            requested,
        })
        .into());
    }
    log::info!(
        "Running exploit '{}' ({} steps) in namespace {}",
        exploit.describe(),
        requested,
        namespace.id()
    );

    let started_ops = namespace.ledger_ref().ops_used();
    let mut executor = Executor {
        namespace,
        op_budget: limits.op_budget,
        started_ops,
        deadline: Instant::now() + limits.timeout,
        timeout: limits.timeout,
        trace: Vec::new(),
    };
    let result = tokio::time::timeout(limits.timeout, executor.execute_all(&steps)).await;
    let trace = executor.trace;
    executor.namespace.ledger().set_op_budget(None);

    match result {
        Err(_) => Err(AbortedRun {
            error: wall_clock(limits.timeout),
            trace,
        }),
        Ok(Err(error)) => Err(AbortedRun { error, trace }),
        Ok(Ok(())) => {
            let failure = trace
                .iter()
                .find(|record| !record.success)
                .map(|record| (record.index, record.revert.clone()));
            Ok(match failure {
                Some((step, revert)) => ExploitOutcome::RevertedWithReason {
                    revert: revert
                        .unwrap_or_else(|| Revert::new(FailureKind::Other, "step failed")),
                    trace,
                    step,
                },
                None => ExploitOutcome::Committed { trace },
            })
        }
    }
}

fn wall_clock(timeout: Duration) -> RunError {
    RunError::Timeout(TimeoutReason::WallClock {
        limit_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
    })
}

struct Executor<'a> {
    namespace: &'a mut Namespace,
    op_budget: Option<u64>,
    started_ops: u64,
    /// Checked between steps; the tokio timer only fires at await points
    deadline: Instant,
    timeout: Duration,
    trace: Vec<StepRecord>,
}

impl Executor<'_> {
    async fn execute_all(&mut self, steps: &[Step]) -> Result<(), RunError> {
        for step in steps {
            self.execute(step).await?;
        }
        Ok(())
    }

    /// Returns whether the step succeeded
    fn execute<'s>(&'s mut self, step: &'s Step) -> BoxFuture<'s, Result<bool, RunError>> {
        async move {
            tokio::task::yield_now().await;
            if Instant::now() >= self.deadline {
                return Err(wall_clock(self.timeout));
            }
            match step {
                Step::Atomic(steps) => self.execute_atomic(steps).await,
                Step::AdvanceTime(seconds) => {
                    self.namespace.ledger().advance_time(*seconds).await?;
                    self.push("harness", format!("advance time by {seconds}s"), Ok(Arg::Unit));
                    Ok(true)
                }
                Step::Call {
                    actor,
                    target,
                    data,
                    value,
                } => {
                    let description = format!("{}.{}", self.namespace.name_of(target), data);
                    let from = match self.signer(actor) {
                        Ok(from) => from,
                        Err(revert) => return Ok(self.push(actor, description, Err(revert))),
                    };
                    self.meter();
                    let call = Call::new(from, *target, data.clone()).with_value(*value);
                    let outcome = self.namespace.ledger().call(call).await;
                    let outcome = outcome.map_err(|e| self.ledger_error(e))?;
                    let result = match outcome.revert {
                        Some(revert) => Err(revert),
                        None => Ok(outcome.return_data),
                    };
                    Ok(self.push(actor, description, result))
                }
                Step::Deploy {
                    actor,
                    contract,
                    constructor,
                    value,
                } => {
                    let description = format!("deploy {}", contract.kind());
                    let from = match self.signer(actor) {
                        Ok(from) => from,
                        Err(revert) => return Ok(self.push(actor, description, Err(revert))),
                    };
                    self.meter();
                    let spec = SubsystemSpec::new(Arc::clone(contract))
                        .with_args(constructor.clone())
                        .with_value(*value);
                    let deployed = self.namespace.ledger().deploy(from, spec).await;
                    match deployed {
                        Ok(address) => Ok(self.push(actor, description, Ok(Arg::Address(address)))),
                        Err(LedgerError::DeployFailed { revert, .. }) => {
                            Ok(self.push(actor, description, Err(revert)))
                        }
                        Err(e) => Err(self.ledger_error(e)),
                    }
                }
            }
        }
        .boxed()
    }

    async fn execute_atomic(&mut self, steps: &[Step]) -> Result<bool, RunError> {
        let checkpoint = self.namespace.ledger().snapshot().await?;
        let first = self.trace.len();
        for step in steps {
            if !self.execute(step).await? {
                self.namespace.ledger().restore(checkpoint).await?;
                self.namespace.ledger().discard(checkpoint).await?;
                for record in &mut self.trace[first..] {
                    if record.success {
                        record.success = false;
                        record.return_data = Arg::Unit;
                        record.revert = Some(Revert::new(
                            FailureKind::Other,
                            "rolled back with its atomic group",
                        ));
                    }
                }
                return Ok(false);
            }
        }
        self.namespace.ledger().discard(checkpoint).await?;
        Ok(true)
    }

    fn signer(&self, actor: &str) -> Result<Address, Revert> {
        match self.namespace.actor(actor) {
            Ok(info) if info.signer => Ok(info.address),
            Ok(_) => Err(Revert::unauthorized(format!(
                "actor '{actor}' has no signing capability"
            ))),
            Err(e) => Err(Revert::unauthorized(e.to_string())),
        }
    }

    /// Hand the ledger whatever remains of the run's op budget
    fn meter(&mut self) {
        if let Some(budget) = self.op_budget {
            let used = self
                .namespace
                .ledger_ref()
                .ops_used()
                .saturating_sub(self.started_ops);
            self.namespace
                .ledger()
                .set_op_budget(Some(budget.saturating_sub(used)));
        }
    }

    /// Budget exhaustion is reported against the whole run's budget
    fn ledger_error(&self, error: LedgerError) -> RunError {
        match error {
            LedgerError::BudgetExhausted { budget } => RunError::Timeout(TimeoutReason::OpBudget {
                budget: self.op_budget.unwrap_or(budget),
            }),
            other => RunError::Ledger(other),
        }
    }

    fn push(&mut self, actor: &str, description: String, result: Result<Arg, Revert>) -> bool {
        let index = self.trace.len();
        let record = match result {
            Ok(return_data) => StepRecord {
                index,
                actor: actor.to_string(),
                description,
                success: true,
                return_data,
                revert: None,
            },
            Err(revert) => StepRecord {
                index,
                actor: actor.to_string(),
                description,
                success: false,
                return_data: Arg::Unit,
                revert: Some(revert),
            },
        };
        if log::log_enabled!(log::Level::Debug) {
            match &record.revert {
                None => log::debug!("Step {} [{}] {} ok", index, actor, record.description),
                Some(revert) => log::debug!(
                    "Step {} [{}] {} failed: {}",
                    index,
                    actor,
                    record.description,
                    revert
                ),
            }
        }
        let success = record.success;
        self.trace.push(record);
        success
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::NamespaceFactory;
    use gauntlet_common::primitives::{actor_address, ether};
    use gauntlet_common::subsystems::token::Token;
    use gauntlet_common::Asset;

    async fn namespace_with_token() -> (Namespace, Address) {
        let mut namespace = NamespaceFactory::default().checkout("runner");
        let deployer = actor_address("deployer");
        let player = actor_address("player");
        namespace.register_actor("deployer", deployer, false);
        namespace.register_actor("player", player, true);
        let token = namespace
            .ledger()
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(Token)).with_args(vec![Arg::Uint(ether(100))]),
            )
            .await
            .unwrap();
        namespace.register_subsystem("token", token, deployer);
        (namespace, token)
    }

    #[tokio::test]
    async fn test_noop_exploit_commits() {
        let (mut namespace, _) = namespace_with_token().await;
        let outcome = run_exploit(&NoopExploit, &mut namespace, &RunLimits::default())
            .await
            .unwrap();
        assert_eq!(outcome, ExploitOutcome::Committed { trace: vec![] });
    }

    #[tokio::test]
    async fn test_continues_after_failed_step() {
        let (mut namespace, token) = namespace_with_token().await;
        let exploit = |view: &ExploitView| -> anyhow::Result<Vec<Step>> {
            let player = view.actor("player")?;
            Ok(vec![
                Step::call("player", token, CallData::new("transfer").arg(player).arg(ether(1))),
                Step::call("player", token, CallData::new("total_supply")),
            ])
        };
        let outcome = run_exploit(&exploit, &mut namespace, &RunLimits::default())
            .await
            .unwrap();

        match outcome {
            ExploitOutcome::RevertedWithReason { trace, step, revert } => {
                assert_eq!(step, 0);
                assert_eq!(revert.kind, FailureKind::InsufficientBalance);
                assert_eq!(trace.len(), 2);
                assert!(trace[1].success);
                assert_eq!(trace[1].return_data, Arg::Uint(ether(100)));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_non_signer_steps_are_refused() {
        let (mut namespace, token) = namespace_with_token().await;
        let player = actor_address("player");
        let exploit = move |_: &ExploitView| -> anyhow::Result<Vec<Step>> {
            Ok(vec![Step::call(
                "deployer",
                token,
                CallData::new("transfer").arg(player).arg(ether(100)),
            )])
        };
        let outcome = run_exploit(&exploit, &mut namespace, &RunLimits::default())
            .await
            .unwrap();

        let trace = outcome.trace();
        assert_eq!(trace[0].revert.as_ref().unwrap().kind, FailureKind::Unauthorized);
        let balance = namespace
            .ledger()
            .get_balance(player, Asset::Token(token))
            .await
            .unwrap();
        assert!(balance.is_zero());
    }

    #[tokio::test]
    async fn test_step_ceiling() {
        let (mut namespace, token) = namespace_with_token().await;
        let exploit = move |_: &ExploitView| -> anyhow::Result<Vec<Step>> {
            Ok((0..10)
                .map(|_| Step::call("player", token, CallData::new("total_supply")))
                .collect())
        };
        let limits = RunLimits {
            max_steps: 5,
            ..RunLimits::default()
        };
        let err = run_exploit(&exploit, &mut namespace, &limits).await.unwrap_err();
        assert!(err.trace.is_empty());
        assert!(matches!(
            err.error,
            RunError::Timeout(TimeoutReason::StepCeiling {
                limit: 5,
                requested: 10
            })
        ));
    }

    #[tokio::test]
    async fn test_zero_timeout_aborts_before_first_step() {
        let (mut namespace, token) = namespace_with_token().await;
        let exploit = move |_: &ExploitView| -> anyhow::Result<Vec<Step>> {
            Ok(vec![Step::call("player", token, CallData::new("total_supply"))])
        };
        let limits = RunLimits {
            timeout: Duration::ZERO,
            ..RunLimits::default()
        };
        let err = run_exploit(&exploit, &mut namespace, &limits).await.unwrap_err();
        assert!(matches!(
            err.error,
            RunError::Timeout(TimeoutReason::WallClock { limit_ms: 0 })
        ));
    }

    #[tokio::test]
    async fn test_op_budget_spans_the_whole_run() {
        let (mut namespace, token) = namespace_with_token().await;
        let exploit = move |_: &ExploitView| -> anyhow::Result<Vec<Step>> {
            Ok((0..4)
                .map(|_| Step::call("player", token, CallData::new("total_supply")))
                .collect())
        };
        let limits = RunLimits {
            op_budget: Some(2),
            ..RunLimits::default()
        };
        let err = run_exploit(&exploit, &mut namespace, &limits).await.unwrap_err();
        assert!(matches!(
            err.error,
            RunError::Timeout(TimeoutReason::OpBudget { budget: 2 })
        ));
        // the two calls that fit the budget stay in the trace
        assert_eq!(err.trace.len(), 2);
        assert!(err.trace.iter().all(|record| record.success));
    }

    #[tokio::test]
    async fn test_atomic_group_rolls_back() {
        let (mut namespace, token) = namespace_with_token().await;
        let exploit = move |view: &ExploitView| -> anyhow::Result<Vec<Step>> {
            let player = view.actor("player")?;
            Ok(vec![Step::Atomic(vec![
                Step::AdvanceTime(60),
                Step::call("player", token, CallData::new("transfer").arg(player).arg(ether(1))),
            ])])
        };
        let before = namespace.ledger().timestamp().await.unwrap();
        let outcome = run_exploit(&exploit, &mut namespace, &RunLimits::default())
            .await
            .unwrap();

        assert!(outcome.trace().iter().all(|record| !record.success));
        assert_eq!(namespace.ledger().timestamp().await.unwrap(), before);
    }

    #[test]
    fn test_predict_address_follows_nonce() {
        let mut view = ExploitView::new(0);
        let player = actor_address("player");
        view.add_actor("player", player, true, 3);
        assert_eq!(
            view.predict_address("player", 1).unwrap(),
            derive_contract_address(&player, 4)
        );
        assert!(view.predict_address("ghost", 0).is_err());
        assert_eq!(view.signers(), vec!["player"]);
    }
}
