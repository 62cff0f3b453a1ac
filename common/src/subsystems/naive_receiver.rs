//! Native-currency flash-loan pool with a fixed fee, and a receiver that
//! repays whatever loan it is handed.
//!
//! Flaw: anyone may request a loan on behalf of the receiver, and the
//! receiver pays the fixed fee every time without checking who initiated
//! the loan.

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{require, FailureKind, Revert};
use crate::ledger::ExecContext;
use crate::primitives::{ether, Amount};
use crate::subsystems::{native_marker, CALLBACK_SUCCESS};

/// Fee charged per loan regardless of its size
pub fn fixed_fee() -> Amount {
    ether(1)
}

pub struct NaiveReceiverPool;

impl Contract for NaiveReceiverPool {
    fn kind(&self) -> &'static str {
        "naive_receiver_pool"
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "receive" => Ok(Arg::Unit),
            "fixed_fee" => Ok(Arg::Uint(fixed_fee())),
            "max_flash_loan" => {
                let token = data.address(0)?;
                if token == native_marker() {
                    Ok(Arg::Uint(ctx.self_balance()))
                } else {
                    Ok(Arg::Uint(Amount::zero()))
                }
            }
            "flash_fee" => {
                let token = data.address(0)?;
                require(
                    token == native_marker(),
                    FailureKind::InvalidInput,
                    "unsupported currency",
                )?;
                Ok(Arg::Uint(fixed_fee()))
            }
            "flash_loan" => {
                let receiver = data.address(0)?;
                let token = data.address(1)?;
                let amount = data.uint(2)?;
                let payload = data.get(3).cloned().unwrap_or(Arg::Unit);
                require(
                    token == native_marker(),
                    FailureKind::InvalidInput,
                    "unsupported currency",
                )?;

                let balance_before = ctx.self_balance();
                let initiator = ctx.caller();
                let callback = CallData::new("on_flash_loan")
                    .arg(initiator)
                    .arg(token)
                    .arg(amount)
                    .arg(fixed_fee())
                    .arg(payload);
                let acknowledgement = ctx.call(receiver, callback, amount)?;
                require(
                    acknowledgement.as_text() == Some(CALLBACK_SUCCESS),
                    FailureKind::Other,
                    "callback failed",
                )?;
                require(
                    ctx.self_balance() >= balance_before.saturating_add(fixed_fee()),
                    FailureKind::NotRepaid,
                    "flash loan not paid back",
                )?;
                Ok(Arg::Bool(true))
            }
            other => Err(Revert::unknown_method(other)),
        }
    }
}

const POOL: &str = "pool";

pub struct NaiveReceiver;

impl Contract for NaiveReceiver {
    fn kind(&self) -> &'static str {
        "naive_receiver"
    }

    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let pool = args
            .first()
            .and_then(Arg::as_address)
            .ok_or_else(|| Revert::invalid_input("pool address required"))?;
        ctx.store(POOL, pool);
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "receive" => Ok(Arg::Unit),
            "on_flash_loan" => {
                let token = data.address(1)?;
                let amount = data.uint(2)?;
                let fee = data.uint(3)?;
                let pool = ctx
                    .load_address(POOL)
                    .ok_or_else(|| Revert::new(FailureKind::Other, "receiver has no pool"))?;
                require(ctx.caller() == pool, FailureKind::Unauthorized, "caller is not the pool")?;
                require(
                    token == native_marker(),
                    FailureKind::InvalidInput,
                    "unsupported currency",
                )?;

                ctx.send_value(pool, amount.saturating_add(fee))?;
                Ok(Arg::Text(CALLBACK_SUCCESS.to_string()))
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
    use std::sync::Arc;

    #[tokio::test]
    async fn test_anyone_can_charge_the_receiver() {
        let mut ledger = InMemoryLedger::new("naive");
        let deployer = actor_address("deployer");
        let stranger = actor_address("stranger");
        ledger.set_balance(deployer, ether(1010)).await.unwrap();

        let pool = ledger
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(NaiveReceiverPool)).with_value(ether(1000)),
            )
            .await
            .unwrap();
        let receiver = ledger
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(NaiveReceiver))
                    .with_args(vec![Arg::Address(pool)])
                    .with_value(ether(10)),
            )
            .await
            .unwrap();

        let loan = CallData::new("flash_loan")
            .arg(receiver)
            .arg(native_marker())
            .arg(Amount::zero());
        let outcome = ledger.call(Call::new(stranger, pool, loan)).await.unwrap();
        assert!(outcome.success, "{:?}", outcome.revert);
        assert_eq!(ledger.get_balance(receiver, Asset::Native).await.unwrap(), ether(9));
        assert_eq!(ledger.get_balance(pool, Asset::Native).await.unwrap(), ether(1001));
    }

    #[tokio::test]
    async fn test_receiver_rejects_direct_callbacks() {
        let mut ledger = InMemoryLedger::new("naive");
        let deployer = actor_address("deployer");
        let receiver = ledger
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(NaiveReceiver))
                    .with_args(vec![Arg::Address(actor_address("pool"))]),
            )
            .await
            .unwrap();
        let callback = CallData::new("on_flash_loan")
            .arg(deployer)
            .arg(native_marker())
            .arg(ether(10))
            .arg(ether(1));
        let outcome = ledger.call(Call::new(deployer, receiver, callback)).await.unwrap();
        assert_eq!(outcome.revert.unwrap().kind, FailureKind::Unauthorized);
    }
}
