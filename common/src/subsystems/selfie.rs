//! Governance-controlled token pool and its time-locked governance.
//!
//! Flaw: voting power is read from the token's last balance snapshot, and
//! anyone can take a snapshot. Holding a flash loan while snapshotting is
//! enough to queue an action that drains the pool.

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{require, FailureKind, Revert};
use crate::ledger::ExecContext;
use crate::primitives::{Address, Amount};
use crate::subsystems::{token, CALLBACK_SUCCESS, DAY};

/// Delay between queueing and executing an action
pub const ACTION_DELAY: u64 = 2 * DAY;

const TOKEN: &str = "token";
const GOVERNANCE: &str = "governance";

pub struct SelfiePool;

impl SelfiePool {
    fn token(ctx: &ExecContext<'_>) -> Result<Address, Revert> {
        ctx.load_address(TOKEN)
            .ok_or_else(|| Revert::new(FailureKind::Other, "pool has no token"))
    }
}

impl Contract for SelfiePool {
    fn kind(&self) -> &'static str {
        "selfie_pool"
    }

    /// Arguments: token, governance.
    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let token = args
            .first()
            .and_then(Arg::as_address)
            .ok_or_else(|| Revert::invalid_input("token address required"))?;
        let governance = args
            .get(1)
            .and_then(Arg::as_address)
            .ok_or_else(|| Revert::invalid_input("governance address required"))?;
        ctx.store(TOKEN, token);
        ctx.store(GOVERNANCE, governance);
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        let pool_token = Self::token(ctx)?;
        match data.method.as_str() {
            "token" => Ok(Arg::Address(pool_token)),
            "governance" => Ok(ctx.load(GOVERNANCE).unwrap_or(Arg::Unit)),
            "max_flash_loan" => {
                let requested = data.address(0)?;
                if requested != pool_token {
                    return Ok(Arg::Uint(Amount::zero()));
                }
                let pool = ctx.address();
                Ok(Arg::Uint(token::balance_of(ctx, pool_token, pool)?))
            }
            "flash_fee" => {
                let requested = data.address(0)?;
                require(
                    requested == pool_token,
                    FailureKind::InvalidInput,
                    "unsupported currency",
                )?;
                Ok(Arg::Uint(Amount::zero()))
            }
            "flash_loan" => {
                let receiver = data.address(0)?;
                let requested = data.address(1)?;
                let amount = data.uint(2)?;
                let payload = data.get(3).cloned().unwrap_or(Arg::Unit);
                require(
                    requested == pool_token,
                    FailureKind::InvalidInput,
                    "unsupported currency",
                )?;

                token::transfer(ctx, pool_token, receiver, amount)?;
                let initiator = ctx.caller();
                let callback = CallData::new("on_flash_loan")
                    .arg(initiator)
                    .arg(pool_token)
                    .arg(amount)
                    .arg(Amount::zero())
                    .arg(payload);
                let acknowledgement = ctx.view(receiver, callback)?;
                require(
                    acknowledgement.as_text() == Some(CALLBACK_SUCCESS),
                    FailureKind::Other,
                    "callback failed",
                )?;
                let pool = ctx.address();
                token::transfer_from(ctx, pool_token, receiver, pool, amount)?;
                Ok(Arg::Bool(true))
            }
            "emergency_exit" => {
                let receiver = data.address(0)?;
                require(
                    ctx.load_address(GOVERNANCE) == Some(ctx.caller()),
                    FailureKind::Unauthorized,
                    "caller is not governance",
                )?;
                let pool = ctx.address();
                let amount = token::balance_of(ctx, pool_token, pool)?;
                token::transfer(ctx, pool_token, receiver, amount)?;
                Ok(Arg::Uint(amount))
            }
            other => Err(Revert::unknown_method(other)),
        }
    }
}

const ACTION_COUNTER: &str = "action_counter";

fn action_key(id: Amount, field: &str) -> String {
    format!("action/{id}/{field}")
}

/// Queues and executes calls on behalf of token holders with a majority
/// of the snapshotted supply.
pub struct Governance;

impl Governance {
    fn has_enough_votes(ctx: &mut ExecContext<'_>, account: Address) -> Result<bool, Revert> {
        let governance_token = ctx
            .load_address(TOKEN)
            .ok_or_else(|| Revert::new(FailureKind::Other, "governance has no token"))?;
        let balance = ctx
            .view(
                governance_token,
                CallData::new("balance_at_last_snapshot").arg(account),
            )?
            .as_uint()
            .unwrap_or_default();
        let supply = ctx
            .view(governance_token, CallData::new("total_supply_at_last_snapshot"))?
            .as_uint()
            .unwrap_or_default();
        Ok(balance > supply / Amount::from(2))
    }

    fn queue_action(ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        let target = data.address(0)?;
        let value = data.uint(1)?;
        let action = data.call(2)?.clone();

        let proposer = ctx.caller();
        require(
            Self::has_enough_votes(ctx, proposer)?,
            FailureKind::Unauthorized,
            "not enough votes",
        )?;
        require(
            target != ctx.address(),
            FailureKind::InvalidInput,
            "governance cannot target itself",
        )?;

        let id = ctx.load_uint(ACTION_COUNTER);
        ctx.store(action_key(id, "target"), target);
        ctx.store(action_key(id, "value"), value);
        ctx.store(action_key(id, "data"), action);
        let now = ctx.timestamp();
        ctx.store(action_key(id, "proposed_at"), now);
        ctx.store(ACTION_COUNTER, id + Amount::one());

        if log::log_enabled!(log::Level::Debug) {
            log::debug!("Governance action {} queued by {:?}", id, proposer);
        }
        Ok(Arg::Uint(id))
    }

    fn execute_action(ctx: &mut ExecContext<'_>, id: Amount) -> Result<Arg, Revert> {
        let target = ctx
            .load_address(&action_key(id, "target"))
            .ok_or_else(|| Revert::invalid_input(format!("unknown action {id}")))?;
        require(
            !ctx.load_bool(&action_key(id, "executed")),
            FailureKind::InvalidInput,
            "action already executed",
        )?;
        let proposed_at = ctx.load_uint(&action_key(id, "proposed_at"));
        let elapsed = Amount::from(ctx.timestamp()).saturating_sub(proposed_at);
        require(
            elapsed >= Amount::from(ACTION_DELAY),
            FailureKind::TooEarly,
            "action delay has not elapsed",
        )?;

        ctx.store(action_key(id, "executed"), true);
        let value = ctx.load_uint(&action_key(id, "value"));
        let action = ctx
            .load(&action_key(id, "data"))
            .and_then(|stored| stored.as_call().cloned())
            .ok_or_else(|| Revert::new(FailureKind::Other, "action payload missing"))?;
        ctx.call(target, action, value)
    }
}

impl Contract for Governance {
    fn kind(&self) -> &'static str {
        "governance"
    }

    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let governance_token = args
            .first()
            .and_then(Arg::as_address)
            .ok_or_else(|| Revert::invalid_input("token address required"))?;
        ctx.store(TOKEN, governance_token);
        ctx.store(ACTION_COUNTER, Amount::one());
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "receive" => Ok(Arg::Unit),
            "action_counter" => Ok(Arg::Uint(ctx.load_uint(ACTION_COUNTER))),
            "queue_action" => Self::queue_action(ctx, data),
            "execute_action" => {
                let id = data.uint(0)?;
                Self::execute_action(ctx, id)
            }
            other => Err(Revert::unknown_method(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;
    use crate::ledger::{InMemoryLedger, LedgerService, SubsystemSpec};
    use crate::primitives::{actor_address, ether};
    use crate::subsystems::token::Token;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_majority_holder_can_queue_and_execute() {
        let mut ledger = InMemoryLedger::new("selfie");
        let deployer = actor_address("deployer");
        let recipient = actor_address("recipient");
        let token = ledger
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(Token)).with_args(vec![Arg::Uint(ether(100))]),
            )
            .await
            .unwrap();
        let governance = ledger
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(Governance)).with_args(vec![Arg::Address(token)]),
            )
            .await
            .unwrap();
        ledger
            .call(Call::new(deployer, token, CallData::new("snapshot")))
            .await
            .unwrap();

        let action = CallData::new("transfer").arg(recipient).arg(ether(1));
        let queue = CallData::new("queue_action")
            .arg(token)
            .arg(Amount::zero())
            .arg(action);
        let outcome = ledger.call(Call::new(deployer, governance, queue)).await.unwrap();
        assert_eq!(outcome.return_data, Arg::Uint(Amount::one()));

        let execute = CallData::new("execute_action").arg(Amount::one());
        let early = ledger
            .call(Call::new(recipient, governance, execute.clone()))
            .await
            .unwrap();
        assert_eq!(early.revert.unwrap().kind, FailureKind::TooEarly);

        ledger.advance_time(ACTION_DELAY).await.unwrap();
        let outcome = ledger.call(Call::new(recipient, governance, execute)).await.unwrap();
        // governance holds no tokens, so the queued transfer itself fails
        assert_eq!(
            outcome.revert.unwrap().kind,
            FailureKind::InsufficientBalance
        );
    }

    #[tokio::test]
    async fn test_minority_holder_cannot_queue() {
        let mut ledger = InMemoryLedger::new("selfie");
        let deployer = actor_address("deployer");
        let outsider = actor_address("outsider");
        let token = ledger
            .deploy(deployer, SubsystemSpec::new(Arc::new(Token)))
            .await
            .unwrap();
        let governance = ledger
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(Governance)).with_args(vec![Arg::Address(token)]),
            )
            .await
            .unwrap();
        let queue = CallData::new("queue_action")
            .arg(token)
            .arg(Amount::zero())
            .arg(CallData::new("snapshot"));
        let outcome = ledger.call(Call::new(outsider, governance, queue)).await.unwrap();
        assert_eq!(outcome.revert.unwrap().kind, FailureKind::Unauthorized);
    }
}
