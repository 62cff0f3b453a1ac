//! Tokenized vault offering flash loans of its deposits, and a receiver
//! that borrows from it on behalf of its owner.
//!
//! Flaw: before lending, the vault requires its share supply converted to
//! assets to equal its token balance. Tokens sent directly to the vault
//! (bypassing `deposit`) break the equality and every later loan reverts.

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{require, FailureKind, Revert};
use crate::ledger::ExecContext;
use crate::primitives::{slot, Address, Amount};
use crate::subsystems::{token, CALLBACK_SUCCESS};

const ASSET: &str = "asset";
const OWNER: &str = "owner";
const FEE_RECIPIENT: &str = "fee_recipient";
const TOTAL_SHARES: &str = "total_shares";
const SHARES: &str = "shares";

/// Fee charged on loans of the whole vault, in percent
pub const FULL_LOAN_FEE_PERCENT: u64 = 5;

pub struct UnstoppableVault;

impl UnstoppableVault {
    fn asset(ctx: &ExecContext<'_>) -> Result<Address, Revert> {
        ctx.load_address(ASSET)
            .ok_or_else(|| Revert::new(FailureKind::Other, "vault has no asset"))
    }

    fn total_assets(ctx: &mut ExecContext<'_>) -> Result<Amount, Revert> {
        let asset = Self::asset(ctx)?;
        let vault = ctx.address();
        token::balance_of(ctx, asset, vault)
    }

    fn convert_to_shares(ctx: &mut ExecContext<'_>, assets: Amount) -> Result<Amount, Revert> {
        let supply = ctx.load_uint(TOTAL_SHARES);
        if supply.is_zero() {
            return Ok(assets);
        }
        let total = Self::total_assets(ctx)?;
        if total.is_zero() {
            return Ok(assets);
        }
        Ok(assets.saturating_mul(supply) / total)
    }

    fn max_flash_loan(ctx: &mut ExecContext<'_>, token: Address) -> Result<Amount, Revert> {
        if token != Self::asset(ctx)? {
            return Ok(Amount::zero());
        }
        Self::total_assets(ctx)
    }

    fn flash_fee(ctx: &mut ExecContext<'_>, token: Address, amount: Amount) -> Result<Amount, Revert> {
        require(
            token == Self::asset(ctx)?,
            FailureKind::InvalidInput,
            "unsupported currency",
        )?;
        if amount < Self::max_flash_loan(ctx, token)? {
            Ok(Amount::zero())
        } else {
            Ok(amount.saturating_mul(Amount::from(FULL_LOAN_FEE_PERCENT)) / Amount::from(100))
        }
    }

    fn deposit(ctx: &mut ExecContext<'_>, assets: Amount, receiver: Address) -> Result<Amount, Revert> {
        let shares = Self::convert_to_shares(ctx, assets)?;
        require(!shares.is_zero(), FailureKind::InvalidInput, "zero shares")?;

        let asset = Self::asset(ctx)?;
        let depositor = ctx.caller();
        let vault = ctx.address();
        token::transfer_from(ctx, asset, depositor, vault, assets)?;

        let key = slot(SHARES, &[&receiver]);
        let held = ctx.load_uint(&key);
        ctx.store(key, held.saturating_add(shares));
        let supply = ctx.load_uint(TOTAL_SHARES);
        ctx.store(TOTAL_SHARES, supply.saturating_add(shares));
        Ok(shares)
    }

    fn flash_loan(ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        let receiver = data.address(0)?;
        let loan_token = data.address(1)?;
        let amount = data.uint(2)?;
        let payload = data.get(3).cloned().unwrap_or(Arg::Unit);

        require(!amount.is_zero(), FailureKind::InvalidInput, "invalid amount")?;
        let asset = Self::asset(ctx)?;
        require(loan_token == asset, FailureKind::InvalidInput, "unsupported currency")?;

        let balance_before = Self::total_assets(ctx)?;
        let supply = ctx.load_uint(TOTAL_SHARES);
        require(
            Self::convert_to_shares(ctx, supply)? == balance_before,
            FailureKind::InvariantBroken,
            "share supply does not match vault balance",
        )?;

        let fee = Self::flash_fee(ctx, asset, amount)?;
        token::transfer(ctx, asset, receiver, amount)?;

        let initiator = ctx.caller();
        let callback = CallData::new("on_flash_loan")
            .arg(initiator)
            .arg(asset)
            .arg(amount)
            .arg(fee)
            .arg(payload);
        let acknowledgement = ctx.view(receiver, callback)?;
        require(
            acknowledgement.as_text() == Some(CALLBACK_SUCCESS),
            FailureKind::Other,
            "callback failed",
        )?;

        let vault = ctx.address();
        token::transfer_from(ctx, asset, receiver, vault, amount.saturating_add(fee))?;
        let fee_recipient = ctx
            .load_address(FEE_RECIPIENT)
            .ok_or_else(|| Revert::new(FailureKind::Other, "no fee recipient"))?;
        token::transfer(ctx, asset, fee_recipient, fee)?;
        Ok(Arg::Bool(true))
    }
}

impl Contract for UnstoppableVault {
    fn kind(&self) -> &'static str {
        "unstoppable_vault"
    }

    /// Arguments: asset token, owner, fee recipient.
    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let field = |index: usize, name: &str| {
            args.get(index)
                .and_then(Arg::as_address)
                .ok_or_else(|| Revert::invalid_input(format!("{name} address required")))
        };
        let asset = field(0, "asset")?;
        let owner = field(1, "owner")?;
        let fee_recipient = field(2, "fee recipient")?;
        ctx.store(ASSET, asset);
        ctx.store(OWNER, owner);
        ctx.store(FEE_RECIPIENT, fee_recipient);
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "asset" => Ok(Arg::Address(Self::asset(ctx)?)),
            "owner" => Ok(ctx.load(OWNER).unwrap_or(Arg::Unit)),
            "total_assets" => Ok(Arg::Uint(Self::total_assets(ctx)?)),
            "total_supply" => Ok(Arg::Uint(ctx.load_uint(TOTAL_SHARES))),
            "balance_of" => {
                let holder = data.address(0)?;
                Ok(Arg::Uint(ctx.load_uint(&slot(SHARES, &[&holder]))))
            }
            "convert_to_shares" => {
                let assets = data.uint(0)?;
                Ok(Arg::Uint(Self::convert_to_shares(ctx, assets)?))
            }
            "max_flash_loan" => {
                let token = data.address(0)?;
                Ok(Arg::Uint(Self::max_flash_loan(ctx, token)?))
            }
            "flash_fee" => {
                let token = data.address(0)?;
                let amount = data.uint(1)?;
                Ok(Arg::Uint(Self::flash_fee(ctx, token, amount)?))
            }
            "deposit" => {
                let assets = data.uint(0)?;
                let receiver = data.address(1)?;
                Ok(Arg::Uint(Self::deposit(ctx, assets, receiver)?))
            }
            "flash_loan" => Self::flash_loan(ctx, data),
            other => Err(Revert::unknown_method(other)),
        }
    }
}

const VAULT: &str = "vault";

/// Borrows from the vault and immediately repays; only its owner may start a loan.
pub struct VaultReceiver;

impl Contract for VaultReceiver {
    fn kind(&self) -> &'static str {
        "vault_receiver"
    }

    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let vault = args
            .first()
            .and_then(Arg::as_address)
            .ok_or_else(|| Revert::invalid_input("vault address required"))?;
        let owner = ctx.caller();
        ctx.store(VAULT, vault);
        ctx.store(OWNER, owner);
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        let vault = ctx
            .load_address(VAULT)
            .ok_or_else(|| Revert::new(FailureKind::Other, "receiver has no vault"))?;

        match data.method.as_str() {
            "execute_flash_loan" => {
                let amount = data.uint(0)?;
                require(
                    ctx.load_address(OWNER) == Some(ctx.caller()),
                    FailureKind::Unauthorized,
                    "only the owner can borrow",
                )?;
                let asset = ctx
                    .view(vault, CallData::new("asset"))?
                    .as_address()
                    .ok_or_else(|| Revert::new(FailureKind::Other, "vault asset unknown"))?;
                let me = ctx.address();
                let loan = CallData::new("flash_loan")
                    .arg(me)
                    .arg(asset)
                    .arg(amount)
                    .arg(Arg::Bytes(Vec::new()));
                ctx.view(vault, loan)?;
                Ok(Arg::Bool(true))
            }
            "on_flash_loan" => {
                let initiator = data.address(0)?;
                let asset = data.address(1)?;
                let amount = data.uint(2)?;
                let fee = data.uint(3)?;
                require(
                    initiator == ctx.address() && ctx.caller() == vault,
                    FailureKind::Unauthorized,
                    "unexpected flash loan",
                )?;
                token::approve(ctx, asset, vault, amount.saturating_add(fee))?;
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
    use crate::primitives::{actor_address, ether};
    use crate::subsystems::token::Token;
    use std::sync::Arc;

    struct Fixture {
        ledger: InMemoryLedger,
        token: Address,
        vault: Address,
        receiver: Address,
        deployer: Address,
        user: Address,
    }

    async fn fixture() -> Fixture {
        let mut ledger = InMemoryLedger::new("unstoppable");
        let deployer = actor_address("deployer");
        let user = actor_address("user");
        let token = ledger
            .deploy(deployer, SubsystemSpec::new(Arc::new(Token)))
            .await
            .unwrap();
        let vault = ledger
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(UnstoppableVault)).with_args(vec![
                    Arg::Address(token),
                    Arg::Address(deployer),
                    Arg::Address(deployer),
                ]),
            )
            .await
            .unwrap();
        let approve = CallData::new("approve").arg(vault).arg(ether(1000));
        ledger.call(Call::new(deployer, token, approve)).await.unwrap();
        let deposit = CallData::new("deposit").arg(ether(1000)).arg(deployer);
        assert!(ledger.call(Call::new(deployer, vault, deposit)).await.unwrap().success);

        let receiver = ledger
            .deploy(
                user,
                SubsystemSpec::new(Arc::new(VaultReceiver)).with_args(vec![Arg::Address(vault)]),
            )
            .await
            .unwrap();
        Fixture {
            ledger,
            token,
            vault,
            receiver,
            deployer,
            user,
        }
    }

    #[tokio::test]
    async fn test_fee_only_on_full_loans() {
        let mut f = fixture().await;
        let fee = |amount: Amount| CallData::new("flash_fee").arg(f.token).arg(amount);
        let below = f
            .ledger
            .static_call(Call::new(f.user, f.vault, fee(ether(999))))
            .await
            .unwrap();
        assert_eq!(below.return_data, Arg::Uint(Amount::zero()));
        let full = f
            .ledger
            .static_call(Call::new(f.user, f.vault, fee(ether(1000))))
            .await
            .unwrap();
        assert_eq!(full.return_data, Arg::Uint(ether(50)));
    }

    #[tokio::test]
    async fn test_direct_transfer_halts_loans() {
        let mut f = fixture().await;
        let borrow = CallData::new("execute_flash_loan").arg(ether(10));
        let outcome = f
            .ledger
            .call(Call::new(f.user, f.receiver, borrow.clone()))
            .await
            .unwrap();
        assert!(outcome.success, "{:?}", outcome.revert);

        let gift = CallData::new("transfer").arg(f.vault).arg(Amount::one());
        f.ledger.call(Call::new(f.deployer, f.token, gift)).await.unwrap();

        let outcome = f
            .ledger
            .call(Call::new(f.user, f.receiver, borrow))
            .await
            .unwrap();
        assert_eq!(outcome.revert.unwrap().kind, FailureKind::InvariantBroken);
    }
}
