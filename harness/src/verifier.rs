//! Invariant Verifier.
//!
//! Every assertion is evaluated, even after one fails, so a report always
//! carries the full conjunction. Evaluation never leaves a trace in the
//! ledger: calls go through `static_call` and custom predicates run inside a
//! snapshot that is restored afterwards.

use anyhow::Context;
use gauntlet_common::{Address, Amount, Asset, Call, CallOutcome};
use serde::{Deserialize, Serialize};

use crate::namespace::Namespace;
use crate::scenario::{AccountRef, AssetRef, Assertion, CallSpec, Comparison, Observation, Quantity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssertionResult {
    pub index: usize,
    pub description: String,
    pub holds: bool,
    pub expected: String,
    pub actual: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerificationReport {
    pub results: Vec<AssertionResult>,
    /// Index of the first assertion that did not hold
    pub first_failure: Option<usize>,
}

impl VerificationReport {
    pub fn passed(&self) -> bool {
        self.first_failure.is_none()
    }

    pub fn failure(&self) -> Option<&AssertionResult> {
        self.first_failure.and_then(|index| self.results.get(index))
    }
}

/// Evaluate `assertions` against the present state of `namespace`.
pub async fn verify(assertions: &[Assertion], namespace: &mut Namespace) -> VerificationReport {
    let mut report = VerificationReport::default();
    for (index, assertion) in assertions.iter().enumerate() {
        let description = assertion.describe();
        let observation = match evaluate(assertion, namespace).await {
            Ok(observation) => observation,
            Err(e) => Observation {
                holds: false,
                expected: "assertion to be evaluable".to_string(),
                actual: format!("evaluation error: {e:#}"),
            },
        };

        if log::log_enabled!(log::Level::Debug) {
            log::debug!(
                "Assertion {} '{}': {} (expected {}, actual {})",
                index,
                description,
                if observation.holds { "holds" } else { "FAILED" },
                observation.expected,
                observation.actual
            );
        }
        if !observation.holds && report.first_failure.is_none() {
            report.first_failure = Some(index);
        }
        report.results.push(AssertionResult {
            index,
            description,
            holds: observation.holds,
            expected: observation.expected,
            actual: observation.actual,
        });
    }
    report
}

async fn evaluate(assertion: &Assertion, namespace: &mut Namespace) -> anyhow::Result<Observation> {
    match assertion {
        Assertion::Balance {
            account,
            asset,
            cmp,
            expected,
        } => {
            let actual = balance(namespace, account, asset).await?;
            let expected = quantity(namespace, expected).await?;
            Ok(Observation {
                holds: cmp.holds(actual, expected),
                expected: format!("{} {}", cmp.symbol(), expected),
                actual: actual.to_string(),
            })
        }
        Assertion::Code { account, present } => {
            let address = namespace.resolve_account(account)?;
            let code = namespace.ledger().get_code(address).await?;
            let describe = |has_code: bool| String::from(if has_code { "code" } else { "no code" });
            Ok(Observation {
                holds: code.is_empty() != *present,
                expected: describe(*present),
                actual: describe(!code.is_empty()),
            })
        }
        Assertion::Permission {
            actor,
            target,
            verb,
            granted,
        } => {
            let actor = namespace.resolve_account(actor)?;
            let target = namespace.resolve_account(target)?;
            let actual = namespace
                .ledger_ref()
                .has_permission(actor, target, verb)
                .await?;
            Ok(Observation {
                holds: actual == *granted,
                expected: granted.to_string(),
                actual: actual.to_string(),
            })
        }
        Assertion::CallReverts {
            caller,
            target,
            call,
            value,
            kind,
        } => {
            let outcome = dry_run(namespace, caller, target, call, *value).await?;
            let expected = match kind {
                Some(kind) => format!("revert ({kind})"),
                None => "revert".to_string(),
            };
            let (holds, actual) = match &outcome.revert {
                None => (false, format!("success returning {}", outcome.return_data)),
                Some(revert) => (
                    kind.map_or(true, |kind| kind == revert.kind),
                    format!("revert ({revert})"),
                ),
            };
            Ok(Observation {
                holds,
                expected,
                actual,
            })
        }
        Assertion::CallSucceeds {
            caller,
            target,
            call,
            value,
            returns,
        } => {
            let outcome = dry_run(namespace, caller, target, call, *value).await?;
            let wanted = returns
                .as_ref()
                .map(|expected| namespace.resolve_arg(expected))
                .transpose()?;
            let expected = match &wanted {
                Some(arg) => format!("success returning {arg}"),
                None => "success".to_string(),
            };
            let (holds, actual) = match &outcome.revert {
                Some(revert) => (false, format!("revert ({revert})")),
                None => (
                    wanted.as_ref().map_or(true, |arg| *arg == outcome.return_data),
                    format!("success returning {}", outcome.return_data),
                ),
            };
            Ok(Observation {
                holds,
                expected,
                actual,
            })
        }
        Assertion::Conservation {
            asset,
            accounts,
            expected,
        } => {
            let mut total = Amount::zero();
            for account in accounts {
                let held = balance(namespace, account, asset).await?;
                total = total
                    .checked_add(held)
                    .context("balance sum overflows")?;
            }
            let expected = quantity(namespace, expected).await?;
            Ok(Observation {
                holds: total == expected,
                expected: format!("{} {}", Comparison::Eq.symbol(), expected),
                actual: total.to_string(),
            })
        }
        Assertion::Custom(custom) => {
            let checkpoint = namespace.ledger().snapshot().await?;
            let result = custom.predicate.evaluate(namespace).await;
            namespace.ledger().restore(checkpoint).await?;
            namespace.ledger().discard(checkpoint).await?;
            result.with_context(|| format!("predicate '{}'", custom.name))
        }
    }
}

/// Issue a call whose effects are discarded
async fn dry_run(
    namespace: &mut Namespace,
    caller: &str,
    target: &AccountRef,
    call: &CallSpec,
    value: Amount,
) -> anyhow::Result<CallOutcome> {
    let from = namespace.actor(caller)?.address;
    let to = namespace.resolve_account(target)?;
    let data = namespace.resolve_call(call)?;
    let outcome = namespace
        .ledger()
        .static_call(Call::new(from, to, data).with_value(value))
        .await?;
    Ok(outcome)
}

pub(crate) async fn balance(
    namespace: &mut Namespace,
    account: &AccountRef,
    asset: &AssetRef,
) -> anyhow::Result<Amount> {
    let address = namespace.resolve_account(account)?;
    let asset = namespace.resolve_asset(asset)?;
    read_balance(namespace, address, asset).await
}

async fn read_balance(
    namespace: &mut Namespace,
    address: Address,
    asset: Asset,
) -> anyhow::Result<Amount> {
    let result = namespace.ledger().get_balance(address, asset).await;
    result.with_context(|| format!("reading {} balance of {}", asset, namespace.name_of(&address)))
}

/// Resolve a quantity. Recorded balances are read by returning to the
/// labelled snapshot and coming back to the present afterwards.
pub(crate) async fn quantity(namespace: &mut Namespace, quantity: &Quantity) -> anyhow::Result<Amount> {
    let mut pending = vec![quantity];
    let mut total = Amount::zero();
    while let Some(next) = pending.pop() {
        let amount = match next {
            Quantity::Literal(amount) => *amount,
            Quantity::Recorded {
                snapshot,
                account,
                asset,
            } => {
                let recorded = namespace.snapshot(snapshot)?;
                let present = namespace.ledger().snapshot().await?;
                namespace.ledger().restore(recorded).await?;
                let amount = balance(namespace, account, asset).await;
                namespace.ledger().restore(present).await?;
                namespace.ledger().discard(present).await?;
                amount?
            }
            Quantity::Sum(parts) => {
                pending.extend(parts.iter());
                continue;
            }
        };
        total = total.checked_add(amount).context("quantity overflows")?;
    }
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::NamespaceFactory;
    use crate::scenario::Predicate;
    use async_trait::async_trait;
    use gauntlet_common::primitives::{actor_address, ether};
    use gauntlet_common::subsystems::token::Token;
    use gauntlet_common::{Arg, CallData, FailureKind, LedgerError, SnapshotId, SubsystemSpec};
    use std::sync::Arc;

    async fn funded_namespace() -> Namespace {
        let mut namespace = NamespaceFactory::default().checkout("verifier");
        let deployer = actor_address("deployer");
        let player = actor_address("player");
        namespace.register_actor("deployer", deployer, false);
        namespace.register_actor("player", player, true);
        namespace.ledger().set_balance(player, ether(5)).await.unwrap();
        let token = namespace
            .ledger()
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(Token)).with_args(vec![Arg::Uint(ether(10))]),
            )
            .await
            .unwrap();
        namespace.register_subsystem("token", token, deployer);
        namespace
    }

    struct TransfersEverything;

    #[async_trait]
    impl Predicate for TransfersEverything {
        async fn evaluate(&self, namespace: &mut Namespace) -> anyhow::Result<Observation> {
            let deployer = namespace.actor("deployer")?.address;
            let player = namespace.actor("player")?.address;
            let token = namespace.subsystem("token")?;
            let transfer = CallData::new("transfer").arg(player).arg(ether(10));
            let outcome = namespace
                .ledger()
                .call(Call::new(deployer, token, transfer))
                .await?;
            Ok(Observation {
                holds: outcome.success,
                expected: "transfer succeeds".to_string(),
                actual: outcome.success.to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_evaluates_every_assertion() {
        let mut namespace = funded_namespace().await;
        let assertions = vec![
            Assertion::balance_eq(AccountRef::actor("player"), AssetRef::Native, ether(1)),
            Assertion::balance_eq(
                AccountRef::actor("deployer"),
                AssetRef::token("token"),
                ether(10),
            ),
            Assertion::code(AccountRef::actor("player"), true),
        ];
        let report = verify(&assertions, &mut namespace).await;

        assert_eq!(report.results.len(), 3);
        assert_eq!(report.first_failure, Some(0));
        let failure = report.failure().unwrap();
        assert_eq!(failure.expected, format!("== {}", ether(1)));
        assert_eq!(failure.actual, ether(5).to_string());
        assert!(report.results[1].holds);
        assert!(!report.results[2].holds);
    }

    #[tokio::test]
    async fn test_call_assertions_leave_no_trace() {
        let mut namespace = funded_namespace().await;
        let transfer = CallSpec::new("transfer")
            .arg(AccountRef::actor("player"))
            .arg(ether(4));
        let assertions = vec![
            Assertion::succeeds("deployer", AccountRef::subsystem("token"), transfer.clone()),
            Assertion::reverts(
                "player",
                AccountRef::subsystem("token"),
                transfer,
                Some(FailureKind::InsufficientBalance),
            ),
            Assertion::custom("deployer can move the supply", Arc::new(TransfersEverything)),
            Assertion::balance_eq(
                AccountRef::actor("player"),
                AssetRef::token("token"),
                Amount::zero(),
            ),
        ];
        let first = verify(&assertions, &mut namespace).await;
        assert!(first.passed(), "{first:?}");

        let second = verify(&assertions, &mut namespace).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_recorded_quantity_reads_past_state() {
        let mut namespace = funded_namespace().await;
        let id = namespace.ledger().snapshot().await.unwrap();
        namespace.record_snapshot("start", id);
        let player = namespace.actor("player").unwrap().address;
        namespace.ledger().set_balance(player, ether(7)).await.unwrap();

        let recorded = Quantity::Recorded {
            snapshot: "start".to_string(),
            account: AccountRef::actor("player"),
            asset: AssetRef::Native,
        };
        let sum = Quantity::Sum(vec![recorded.clone(), Quantity::Literal(ether(2))]);
        let report = verify(
            &[
                Assertion::balance(
                    AccountRef::actor("player"),
                    AssetRef::Native,
                    Comparison::Gt,
                    recorded,
                ),
                Assertion::balance_eq(AccountRef::actor("player"), AssetRef::Native, sum),
            ],
            &mut namespace,
        )
        .await;

        assert!(report.passed(), "{report:?}");
        let current = namespace
            .ledger()
            .get_balance(player, Asset::Native)
            .await
            .unwrap();
        assert_eq!(current, ether(7));

        // the labelled snapshot survives, the scratch ones do not
        let after = namespace.ledger().snapshot().await.unwrap();
        for scratch in id.0 + 1..after.0 {
            assert!(namespace.ledger().restore(SnapshotId(scratch)).await.is_err());
        }
        namespace.ledger().restore(id).await.unwrap();
    }

    #[tokio::test]
    async fn test_custom_predicate_checkpoint_is_released() {
        let mut namespace = funded_namespace().await;
        let before = namespace.ledger().snapshot().await.unwrap();
        let assertions = vec![Assertion::custom(
            "deployer can move the supply",
            Arc::new(TransfersEverything),
        )];
        assert!(verify(&assertions, &mut namespace).await.passed());

        let after = namespace.ledger().snapshot().await.unwrap();
        assert_eq!(after.0, before.0 + 2);
        assert_eq!(
            namespace.ledger().restore(SnapshotId(before.0 + 1)).await,
            Err(LedgerError::UnknownSnapshot(SnapshotId(before.0 + 1)))
        );
    }

    #[tokio::test]
    async fn test_unresolvable_assertion_fails() {
        let mut namespace = funded_namespace().await;
        let report = verify(
            &[Assertion::code(AccountRef::subsystem("missing"), true)],
            &mut namespace,
        )
        .await;
        assert_eq!(report.first_failure, Some(0));
        assert!(report.results[0].actual.contains("unknown subsystem label"));
    }
}
