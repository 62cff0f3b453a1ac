//! Vault whose privileged operations can only be reached through its own
//! permissioned `execute` entry point.
//!
//! Flaw: `execute` checks the caller's permission against the method name
//! the caller *declares*, then dispatches whatever payload is attached.
//! Declaring a permitted method while attaching another smuggles the
//! privileged call past the check.

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{require, FailureKind, Revert};
use crate::ledger::ExecContext;
use crate::primitives::{ether, Amount};
use crate::subsystems::{token, DAY};

/// Minimum time between two withdrawals
pub const WAITING_PERIOD: u64 = 15 * DAY;

/// Largest amount a single withdrawal may move
pub fn withdrawal_limit() -> Amount {
    ether(1)
}

const LAST_WITHDRAWAL: &str = "last_withdrawal";
const INITIALIZED: &str = "initialized";

pub struct SelfAuthorizedVault;

impl SelfAuthorizedVault {
    fn only_self(ctx: &ExecContext<'_>) -> Result<(), Revert> {
        require(
            ctx.caller() == ctx.address(),
            FailureKind::Unauthorized,
            "Bad caller",
        )
    }

    fn execute(ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        let declared = data.text(0)?.to_string();
        let target = data.address(1)?;
        let action = data.call(2)?.clone();

        let caller = ctx.caller();
        require(
            ctx.has_permission(&caller, &declared),
            FailureKind::Unauthorized,
            "not allowed",
        )?;
        require(
            target == ctx.address(),
            FailureKind::InvalidInput,
            "target not allowed",
        )?;

        if log::log_enabled!(log::Level::Trace) {
            log::trace!(
                "Vault executing {} for {:?} (declared '{}')",
                action,
                caller,
                declared
            );
        }
        ctx.view(target, action)
    }
}

impl Contract for SelfAuthorizedVault {
    fn kind(&self) -> &'static str {
        "self_authorized_vault"
    }

    fn construct(&self, ctx: &mut ExecContext<'_>, _args: &[Arg]) -> Result<(), Revert> {
        let now = ctx.timestamp();
        ctx.store(LAST_WITHDRAWAL, now);
        ctx.store(INITIALIZED, true);
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "initialized" => Ok(Arg::Bool(ctx.load_bool(INITIALIZED))),
            "last_withdrawal" => Ok(Arg::Uint(ctx.load_uint(LAST_WITHDRAWAL))),
            "execute" => Self::execute(ctx, data),
            "withdraw" => {
                let asset = data.address(0)?;
                let recipient = data.address(1)?;
                let amount = data.uint(2)?;
                Self::only_self(ctx)?;
                require(
                    amount <= withdrawal_limit(),
                    FailureKind::InvalidInput,
                    "withdrawal amount too large",
                )?;
                let next_allowed = ctx
                    .load_uint(LAST_WITHDRAWAL)
                    .saturating_add(Amount::from(WAITING_PERIOD));
                require(
                    Amount::from(ctx.timestamp()) > next_allowed,
                    FailureKind::TooEarly,
                    "withdrawal waiting period not elapsed",
                )?;
                let now = ctx.timestamp();
                ctx.store(LAST_WITHDRAWAL, now);
                token::transfer(ctx, asset, recipient, amount)?;
                Ok(Arg::Unit)
            }
            "sweep_funds" => {
                let receiver = data.address(0)?;
                let asset = data.address(1)?;
                Self::only_self(ctx)?;
                let vault = ctx.address();
                let balance = token::balance_of(ctx, asset, vault)?;
                token::transfer(ctx, asset, receiver, balance)?;
                Ok(Arg::Uint(balance))
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
    use crate::primitives::{actor_address, Asset};
    use crate::subsystems::token::Token;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_permission_checked_against_declared_method() {
        let mut ledger = InMemoryLedger::new("abi");
        let deployer = actor_address("deployer");
        let user = actor_address("user");
        let token = ledger
            .deploy(deployer, SubsystemSpec::new(Arc::new(Token)))
            .await
            .unwrap();
        let vault = ledger
            .deploy(deployer, SubsystemSpec::new(Arc::new(SelfAuthorizedVault)))
            .await
            .unwrap();
        let fund = CallData::new("transfer").arg(vault).arg(ether(10));
        ledger.call(Call::new(deployer, token, fund)).await.unwrap();
        ledger.grant_permission(user, vault, "withdraw").await.unwrap();

        // direct calls are rejected
        let sweep = CallData::new("sweep_funds").arg(user).arg(token);
        let outcome = ledger.call(Call::new(user, vault, sweep.clone())).await.unwrap();
        assert_eq!(outcome.revert.unwrap().kind, FailureKind::Unauthorized);

        // an honest withdrawal is still too early
        let withdraw = CallData::new("withdraw").arg(token).arg(user).arg(ether(1));
        let honest = CallData::new("execute").arg("withdraw").arg(vault).arg(withdraw);
        let outcome = ledger.call(Call::new(user, vault, honest)).await.unwrap();
        assert_eq!(outcome.revert.unwrap().kind, FailureKind::TooEarly);

        let smuggled = CallData::new("execute").arg("withdraw").arg(vault).arg(sweep);
        let outcome = ledger.call(Call::new(user, vault, smuggled)).await.unwrap();
        assert!(outcome.success, "{:?}", outcome.revert);
        assert_eq!(
            ledger.get_balance(user, Asset::Token(token)).await.unwrap(),
            ether(10)
        );
    }
}
