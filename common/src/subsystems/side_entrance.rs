//! Native-currency pool with deposits, withdrawals and free flash loans.
//!
//! Flaw: the repayment check only looks at the pool balance, so a borrower
//! can "repay" by depositing the loan into its own account and withdraw it
//! afterwards.

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{require, FailureKind, Revert};
use crate::ledger::ExecContext;
use crate::primitives::{slot, Amount};

const DEPOSITS: &str = "deposit";

pub struct SideEntrancePool;

impl Contract for SideEntrancePool {
    fn kind(&self) -> &'static str {
        "side_entrance_pool"
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "deposit" => {
                let depositor = ctx.caller();
                let key = slot(DEPOSITS, &[&depositor]);
                let held = ctx.load_uint(&key);
                ctx.store(key, held.saturating_add(ctx.value()));
                Ok(Arg::Unit)
            }
            "balance_of" => {
                let holder = data.address(0)?;
                Ok(Arg::Uint(ctx.load_uint(&slot(DEPOSITS, &[&holder]))))
            }
            "withdraw" => {
                let owner = ctx.caller();
                let key = slot(DEPOSITS, &[&owner]);
                let amount = ctx.load_uint(&key);
                ctx.clear(&key);
                ctx.send_value(owner, amount)?;
                Ok(Arg::Uint(amount))
            }
            "flash_loan" => {
                let amount = data.uint(0)?;
                let balance_before = ctx.self_balance();
                require(
                    amount <= balance_before,
                    FailureKind::InsufficientBalance,
                    "not enough liquidity",
                )?;

                let borrower = ctx.caller();
                ctx.call(borrower, CallData::new("execute"), amount)?;
                require(
                    ctx.self_balance() >= balance_before,
                    FailureKind::NotRepaid,
                    "flash loan not paid back",
                )?;
                Ok(Arg::Unit)
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
    use crate::primitives::{actor_address, ether, Asset};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_deposit_and_withdraw() {
        let mut ledger = InMemoryLedger::new("side-entrance");
        let deployer = actor_address("deployer");
        let alice = actor_address("alice");
        ledger.set_balance(alice, ether(5)).await.unwrap();
        let pool = ledger
            .deploy(deployer, SubsystemSpec::new(Arc::new(SideEntrancePool)))
            .await
            .unwrap();

        let deposit = Call::new(alice, pool, CallData::new("deposit")).with_value(ether(5));
        assert!(ledger.call(deposit).await.unwrap().success);
        assert_eq!(ledger.get_balance(pool, Asset::Native).await.unwrap(), ether(5));

        let withdraw = Call::new(alice, pool, CallData::new("withdraw"));
        let outcome = ledger.call(withdraw).await.unwrap();
        assert_eq!(outcome.return_data, Arg::Uint(ether(5)));
        assert_eq!(ledger.get_balance(alice, Asset::Native).await.unwrap(), ether(5));
        assert_eq!(ledger.get_balance(pool, Asset::Native).await.unwrap(), Amount::zero());
    }

    #[tokio::test]
    async fn test_loan_to_plain_account_is_not_repaid() {
        let mut ledger = InMemoryLedger::new("side-entrance");
        let deployer = actor_address("deployer");
        let borrower = actor_address("borrower");
        ledger.set_balance(deployer, ether(10)).await.unwrap();
        let pool = ledger
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(SideEntrancePool)).with_value(ether(10)),
            )
            .await
            .unwrap();

        let loan = CallData::new("flash_loan").arg(ether(10));
        let outcome = ledger.call(Call::new(borrower, pool, loan)).await.unwrap();
        assert_eq!(outcome.revert.unwrap().kind, FailureKind::NotRepaid);
        assert_eq!(ledger.get_balance(pool, Asset::Native).await.unwrap(), ether(10));
    }
}
