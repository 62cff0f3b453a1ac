//! Fungible token with balance snapshots.
//!
//! Balances and allowances live in the token's own storage. `snapshot` is
//! callable by anyone and records the current balances; governance reads
//! voting power from the last snapshot.

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{require, FailureKind, Revert};
use crate::ledger::ExecContext;
use crate::primitives::{ether, slot, Address, Amount};

/// Supply minted to the deployer when the constructor gets no argument
pub fn default_supply() -> Amount {
    ether(1_000_000_000)
}

const SUPPLY: &str = "supply";
const BALANCE: &str = "balance";
const ALLOWANCE: &str = "allowance";
const SNAPSHOT_ID: &str = "snapshot/id";
const SNAPSHOT_SUPPLY: &str = "snapshot/supply";
const SNAPSHOT_BALANCE: &str = "snapshot/balance";

pub struct Token;

impl Token {
    fn balance(ctx: &ExecContext<'_>, holder: &Address) -> Amount {
        ctx.load_uint(&slot(BALANCE, &[holder]))
    }

    fn move_balance(
        ctx: &mut ExecContext<'_>,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> Result<(), Revert> {
        let from_balance = Self::balance(ctx, &from);
        require(
            from_balance >= amount,
            FailureKind::InsufficientBalance,
            "transfer amount exceeds balance",
        )?;
        ctx.store(slot(BALANCE, &[&from]), from_balance - amount);
        let to_balance = Self::balance(ctx, &to);
        ctx.store(slot(BALANCE, &[&to]), to_balance.saturating_add(amount));
        Ok(())
    }

    fn take_snapshot(ctx: &mut ExecContext<'_>) -> Amount {
        for (key, _) in ctx.entries_with_prefix(SNAPSHOT_BALANCE) {
            ctx.clear(&key);
        }
        let prefix = format!("{BALANCE}/");
        for (key, value) in ctx.entries_with_prefix(&prefix) {
            ctx.store(format!("snapshot/{key}"), value);
        }
        let supply = ctx.load_uint(SUPPLY);
        ctx.store(SNAPSHOT_SUPPLY, supply);

        let id = ctx.load_uint(SNAPSHOT_ID) + Amount::one();
        ctx.store(SNAPSHOT_ID, id);
        id
    }
}

impl Contract for Token {
    fn kind(&self) -> &'static str {
        "token"
    }

    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let supply = match args.first() {
            Some(arg) => arg
                .as_uint()
                .ok_or_else(|| Revert::invalid_input("supply must be an integer"))?,
            None => default_supply(),
        };
        let deployer = ctx.caller();
        ctx.store(SUPPLY, supply);
        ctx.store(slot(BALANCE, &[&deployer]), supply);
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "total_supply" => Ok(Arg::Uint(ctx.load_uint(SUPPLY))),
            "balance_of" => {
                let holder = data.address(0)?;
                Ok(Arg::Uint(Self::balance(ctx, &holder)))
            }
            "allowance" => {
                let owner = data.address(0)?;
                let spender = data.address(1)?;
                Ok(Arg::Uint(ctx.load_uint(&slot(ALLOWANCE, &[&owner, &spender]))))
            }
            "transfer" => {
                let to = data.address(0)?;
                let amount = data.uint(1)?;
                let from = ctx.caller();
                Self::move_balance(ctx, from, to, amount)?;
                Ok(Arg::Bool(true))
            }
            "approve" => {
                let spender = data.address(0)?;
                let amount = data.uint(1)?;
                let owner = ctx.caller();
                ctx.store(slot(ALLOWANCE, &[&owner, &spender]), amount);
                Ok(Arg::Bool(true))
            }
            "transfer_from" => {
                let from = data.address(0)?;
                let to = data.address(1)?;
                let amount = data.uint(2)?;
                let spender = ctx.caller();
                if spender != from {
                    let key = slot(ALLOWANCE, &[&from, &spender]);
                    let allowed = ctx.load_uint(&key);
                    require(
                        allowed >= amount,
                        FailureKind::InsufficientAllowance,
                        "insufficient allowance",
                    )?;
                    if allowed != Amount::MAX {
                        ctx.store(key, allowed - amount);
                    }
                }
                Self::move_balance(ctx, from, to, amount)?;
                Ok(Arg::Bool(true))
            }
            "snapshot" => Ok(Arg::Uint(Self::take_snapshot(ctx))),
            "last_snapshot_id" => Ok(Arg::Uint(ctx.load_uint(SNAPSHOT_ID))),
            "balance_at_last_snapshot" => {
                let holder = data.address(0)?;
                Ok(Arg::Uint(ctx.load_uint(&slot(SNAPSHOT_BALANCE, &[&holder]))))
            }
            "total_supply_at_last_snapshot" => Ok(Arg::Uint(ctx.load_uint(SNAPSHOT_SUPPLY))),
            other => Err(Revert::unknown_method(other)),
        }
    }
}

fn expect_uint(value: Arg, what: &str) -> Result<Amount, Revert> {
    value
        .as_uint()
        .ok_or_else(|| Revert::new(FailureKind::Other, format!("{what} did not return an integer")))
}

/// Token balance of `holder`, queried from subsystem code.
pub fn balance_of(ctx: &mut ExecContext<'_>, token: Address, holder: Address) -> Result<Amount, Revert> {
    let value = ctx.view(token, CallData::new("balance_of").arg(holder))?;
    expect_uint(value, "balance_of")
}

pub fn transfer(
    ctx: &mut ExecContext<'_>,
    token: Address,
    to: Address,
    amount: Amount,
) -> Result<(), Revert> {
    ctx.view(token, CallData::new("transfer").arg(to).arg(amount))
        .map(|_| ())
}

pub fn transfer_from(
    ctx: &mut ExecContext<'_>,
    token: Address,
    from: Address,
    to: Address,
    amount: Amount,
) -> Result<(), Revert> {
    ctx.view(
        token,
        CallData::new("transfer_from").arg(from).arg(to).arg(amount),
    )
    .map(|_| ())
}

pub fn approve(
    ctx: &mut ExecContext<'_>,
    token: Address,
    spender: Address,
    amount: Amount,
) -> Result<(), Revert> {
    ctx.view(token, CallData::new("approve").arg(spender).arg(amount))
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;
    use crate::ledger::{InMemoryLedger, LedgerService, SubsystemSpec};
    use crate::primitives::{actor_address, Asset};
    use std::sync::Arc;

    async fn setup() -> (InMemoryLedger, Address, Address, Address) {
        let mut ledger = InMemoryLedger::new("token");
        let deployer = actor_address("deployer");
        let spender = actor_address("spender");
        let token = ledger
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(Token)).with_args(vec![Arg::Uint(ether(1000))]),
            )
            .await
            .unwrap();
        (ledger, token, deployer, spender)
    }

    #[tokio::test]
    async fn test_transfer_from_requires_allowance() {
        let (mut ledger, token, deployer, spender) = setup().await;

        let pull = CallData::new("transfer_from")
            .arg(deployer)
            .arg(spender)
            .arg(ether(5));
        let outcome = ledger
            .call(Call::new(spender, token, pull.clone()))
            .await
            .unwrap();
        assert_eq!(
            outcome.revert.unwrap().kind,
            FailureKind::InsufficientAllowance
        );

        let approve = CallData::new("approve").arg(spender).arg(ether(5));
        assert!(ledger.call(Call::new(deployer, token, approve)).await.unwrap().success);
        assert!(ledger.call(Call::new(spender, token, pull)).await.unwrap().success);
        assert_eq!(
            ledger.get_balance(spender, Asset::Token(token)).await.unwrap(),
            ether(5)
        );
    }

    #[tokio::test]
    async fn test_snapshot_records_balances() {
        let (mut ledger, token, deployer, spender) = setup().await;

        let send = CallData::new("transfer").arg(spender).arg(ether(600));
        ledger.call(Call::new(deployer, token, send)).await.unwrap();
        let outcome = ledger
            .call(Call::new(spender, token, CallData::new("snapshot")))
            .await
            .unwrap();
        assert_eq!(outcome.return_data, Arg::Uint(Amount::one()));

        let back = CallData::new("transfer").arg(deployer).arg(ether(600));
        ledger.call(Call::new(spender, token, back)).await.unwrap();

        let at_snapshot = ledger
            .static_call(Call::new(
                spender,
                token,
                CallData::new("balance_at_last_snapshot").arg(spender),
            ))
            .await
            .unwrap();
        assert_eq!(at_snapshot.return_data, Arg::Uint(ether(600)));
    }
}
