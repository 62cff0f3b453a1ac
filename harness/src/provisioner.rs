//! State Provisioner: turns a scenario's setup into ledger state and checks
//! its preconditions.

use gauntlet_common::primitives::actor_address;
use gauntlet_common::{Amount, Asset, Call, CallData, LedgerError, SubsystemSpec};
use thiserror::Error;

use crate::namespace::{Namespace, ResolveError};
use crate::scenario::{AssetRef, Expect, Scenario, SetupAction};
use crate::verifier;

/// Setup-integrity failure. The scenario itself is inconsistent; no
/// exploit verdict can be given.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("setup action {index} ({action}) failed: {reason}")]
    ActionFailed {
        index: usize,
        action: String,
        reason: String,
    },
    #[error("precondition {index} failed: {diagnostic}")]
    PreconditionFailed { index: usize, diagnostic: String },
    #[error("ledger failure during setup: {0}")]
    Ledger(#[from] LedgerError),
    #[error("setup refers to {0}")]
    Resolve(#[from] ResolveError),
}

/// Provision `scenario` into a fresh `namespace`.
///
/// Actions run in declaration order and are never retried. The first
/// failing action or precondition aborts provisioning.
pub async fn provision(scenario: &Scenario, namespace: &mut Namespace) -> Result<(), SetupError> {
    log::info!(
        "Provisioning '{}' in namespace {}",
        scenario.name(),
        namespace.id()
    );

    for actor in scenario.actors() {
        let address = actor_address(&actor.name);
        namespace.register_actor(&actor.name, address, actor.signer);
        namespace
            .ledger()
            .set_balance(address, actor.native_balance)
            .await?;
    }

    for (index, action) in scenario.setup().iter().enumerate() {
        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Setup {}: {}", index, action.describe());
        }
        apply(namespace, action).await.map_err(|failure| match failure {
            Failure::Rejected(reason) => SetupError::ActionFailed {
                index,
                action: action.describe(),
                reason,
            },
            Failure::Error(e) => e,
        })?;
    }

    let report = verifier::verify(scenario.preconditions(), namespace).await;
    if let Some(failure) = report.failure() {
        log::warn!(
            "Precondition {} of '{}' does not hold: {}",
            failure.index,
            scenario.name(),
            failure.description
        );
        return Err(SetupError::PreconditionFailed {
            index: failure.index,
            diagnostic: format!(
                "{}: expected {}, actual {}",
                failure.description, failure.expected, failure.actual
            ),
        });
    }
    Ok(())
}

enum Failure {
    /// The ledger refused the action
    Rejected(String),
    Error(SetupError),
}

impl From<LedgerError> for Failure {
    fn from(error: LedgerError) -> Self {
        Failure::Error(SetupError::Ledger(error))
    }
}

impl From<ResolveError> for Failure {
    fn from(error: ResolveError) -> Self {
        Failure::Error(SetupError::Resolve(error))
    }
}

async fn apply(namespace: &mut Namespace, action: &SetupAction) -> Result<(), Failure> {
    match action {
        SetupAction::Deploy {
            label,
            deployer,
            contract,
            constructor,
            value,
        } => {
            let from = namespace.actor(deployer)?.address;
            let args = constructor
                .iter()
                .map(|arg| namespace.resolve_arg(arg))
                .collect::<Result<Vec<_>, _>>()?;
            let spec = SubsystemSpec::new(contract.clone())
                .with_args(args)
                .with_value(*value);
            let address = match namespace.ledger().deploy(from, spec).await {
                Ok(address) => address,
                Err(LedgerError::DeployFailed { revert, .. }) => {
                    return Err(Failure::Rejected(format!("constructor reverted: {revert}")))
                }
                Err(e) => return Err(e.into()),
            };
            namespace.register_subsystem(label, address, from);
        }
        SetupAction::Fund {
            account,
            asset,
            amount,
        } => {
            let to = namespace.resolve_account(account)?;
            match asset {
                AssetRef::Native => {
                    let ledger = namespace.ledger();
                    let current = ledger.get_balance(to, Asset::Native).await?;
                    let funded = current
                        .checked_add(*amount)
                        .ok_or_else(|| Failure::Rejected("native balance overflows".to_string()))?;
                    ledger.set_balance(to, funded).await?;
                }
                AssetRef::Token(label) => {
                    let token = namespace.subsystem(label)?;
                    let treasury = namespace.deployer_of(label)?;
                    let transfer = CallData::new("transfer").arg(to).arg(*amount);
                    let outcome = namespace
                        .ledger()
                        .call(Call::new(treasury, token, transfer))
                        .await?;
                    if let Some(revert) = outcome.revert {
                        return Err(Failure::Rejected(format!("token transfer reverted: {revert}")));
                    }
                }
            }
        }
        SetupAction::Call {
            caller,
            target,
            call,
            value,
            expect,
        } => {
            let from = namespace.actor(caller)?.address;
            let to = namespace.resolve_account(target)?;
            let data = namespace.resolve_call(call)?;
            let outcome = namespace
                .ledger()
                .call(Call::new(from, to, data).with_value(*value))
                .await?;
            match (expect, &outcome.revert) {
                (Expect::Success, None) => {}
                (Expect::Success, Some(revert)) => {
                    return Err(Failure::Rejected(format!("call reverted: {revert}")))
                }
                (Expect::Revert(_), None) => {
                    return Err(Failure::Rejected("call was expected to revert".to_string()))
                }
                (Expect::Revert(Some(kind)), Some(revert)) if revert.kind != *kind => {
                    return Err(Failure::Rejected(format!(
                        "expected a {kind} revert, got {revert}"
                    )))
                }
                (Expect::Revert(_), Some(_)) => {}
            }
        }
        SetupAction::GrantPermission {
            actor,
            target,
            verb,
        } => {
            let actor = namespace.resolve_account(actor)?;
            let target = namespace.resolve_account(target)?;
            namespace
                .ledger()
                .grant_permission(actor, target, verb)
                .await?;
        }
        SetupAction::AdvanceTime(seconds) => {
            namespace.ledger().advance_time(*seconds).await?;
        }
        SetupAction::Snapshot(label) => {
            let id = namespace.ledger().snapshot().await?;
            namespace.record_snapshot(label, id);
        }
    }
    Ok(())
}

/// Native value every actor starts with, summed. Useful for conservation
/// checks over a provisioned namespace.
pub fn initial_native_supply(scenario: &Scenario) -> Amount {
    scenario
        .actors()
        .iter()
        .fold(Amount::zero(), |total, actor| {
            total.saturating_add(actor.native_balance)
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::namespace::NamespaceFactory;
    use crate::scenario::{AccountRef, ActorDef, Assertion, CallSpec, Comparison};
    use gauntlet_common::primitives::ether;
    use gauntlet_common::subsystems::token::Token;
    use gauntlet_common::FailureKind;
    use std::sync::Arc;

    fn base() -> crate::scenario::ScenarioBuilder {
        Scenario::builder("provision")
            .actor(ActorDef::observer("deployer", ether(10)))
            .actor(ActorDef::signer("player", ether(1)))
            .deploy("token", "deployer", Arc::new(Token), vec![ether(1000).into()])
    }

    #[tokio::test]
    async fn test_setup_actions_apply_in_order() {
        let scenario = base()
            .fund(AccountRef::actor("player"), AssetRef::token("token"), ether(25))
            .fund(AccountRef::actor("player"), AssetRef::Native, ether(2))
            .action(SetupAction::Call {
                caller: "player".to_string(),
                target: AccountRef::subsystem("token"),
                call: CallSpec::new("transfer")
                    .arg(AccountRef::actor("deployer"))
                    .arg(ether(100)),
                value: Amount::zero(),
                expect: Expect::Revert(Some(FailureKind::InsufficientBalance)),
            })
            .snapshot("funded")
            .precondition(Assertion::balance_eq(
                AccountRef::actor("player"),
                AssetRef::token("token"),
                ether(25),
            ))
            .precondition(Assertion::balance_eq(
                AccountRef::actor("player"),
                AssetRef::Native,
                ether(3),
            ))
            .postcondition(Assertion::code(AccountRef::subsystem("token"), true))
            .build()
            .unwrap();

        let mut namespace = NamespaceFactory::default().checkout("provision");
        provision(&scenario, &mut namespace).await.unwrap();
        assert!(namespace.snapshot("funded").is_ok());
        assert_eq!(initial_native_supply(&scenario), ether(11));
    }

    #[tokio::test]
    async fn test_failing_action_aborts() {
        let scenario = base()
            .fund(AccountRef::actor("player"), AssetRef::token("token"), ether(5000))
            .snapshot("never")
            .postcondition(Assertion::code(AccountRef::subsystem("token"), true))
            .build()
            .unwrap();

        let mut namespace = NamespaceFactory::default().checkout("provision");
        let err = provision(&scenario, &mut namespace).await.unwrap_err();
        assert!(matches!(err, SetupError::ActionFailed { index: 1, .. }), "{err}");
        assert!(namespace.snapshot("never").is_err());
    }

    #[tokio::test]
    async fn test_broken_precondition_is_setup_error() {
        let scenario = base()
            .precondition(Assertion::balance(
                AccountRef::actor("player"),
                AssetRef::Native,
                Comparison::Gt,
                ether(1),
            ))
            .postcondition(Assertion::code(AccountRef::subsystem("token"), true))
            .build()
            .unwrap();

        let mut namespace = NamespaceFactory::default().checkout("provision");
        let err = provision(&scenario, &mut namespace).await.unwrap_err();
        match err {
            SetupError::PreconditionFailed { index, diagnostic } => {
                assert_eq!(index, 0);
                assert!(diagnostic.contains(&ether(1).to_string()));
            }
            other => panic!("unexpected error {other}"),
        }
    }
}
