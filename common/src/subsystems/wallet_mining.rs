//! Wallet deployment with rewards, gated by an upgradeable authorizer.
//!
//! Flaws:
//! - the authorizer logic is left uninitialized behind its proxy, so anyone
//!   can claim it and upgrade it into code that destroys it;
//! - the deployer treats an empty answer from the authorizer as approval,
//!   and a destroyed implementation answers every call with nothing.
//!
//! Wallet addresses are derived from the factory nonce, so funds sent to a
//! future wallet address can be claimed by whoever deploys the factory and
//! drops enough wallets to reach it.

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{require, FailureKind, Revert};
use crate::ledger::ExecContext;
use crate::primitives::{slot, Address, Amount};
use crate::subsystems::proxy::IMPLEMENTATION_SLOT;
use crate::subsystems::token;

const OWNER: &str = "owner";

/// Minimal owned wallet: executes calls on behalf of its owner.
pub struct Wallet;

impl Contract for Wallet {
    fn kind(&self) -> &'static str {
        "wallet"
    }

    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        if let Some(owner) = args.first().and_then(Arg::as_address) {
            ctx.store(OWNER, owner);
        }
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "receive" => Ok(Arg::Unit),
            "owner" => Ok(ctx.load(OWNER).unwrap_or(Arg::Unit)),
            "setup" => {
                let owner = data.address(0)?;
                require(
                    ctx.load_address(OWNER).is_none(),
                    FailureKind::AlreadyInitialized,
                    "wallet already has an owner",
                )?;
                ctx.store(OWNER, owner);
                Ok(Arg::Unit)
            }
            "exec" => {
                let target = data.address(0)?;
                let payload = data.call(1)?.clone();
                let value = data.get(2).ok().and_then(Arg::as_uint).unwrap_or_default();
                require(
                    ctx.load_address(OWNER) == Some(ctx.caller()),
                    FailureKind::Unauthorized,
                    "caller is not the wallet owner",
                )?;
                ctx.call(target, payload, value)
            }
            other => Err(Revert::unknown_method(other)),
        }
    }
}

const MASTER_COPY: &str = "master_copy";

/// Creates wallets by cloning the code found at its master copy address.
pub struct WalletFactory;

impl Contract for WalletFactory {
    fn kind(&self) -> &'static str {
        "wallet_factory"
    }

    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let master = args
            .first()
            .and_then(Arg::as_address)
            .ok_or_else(|| Revert::invalid_input("master copy address required"))?;
        ctx.store(MASTER_COPY, master);
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "master_copy" => Ok(ctx.load(MASTER_COPY).unwrap_or(Arg::Unit)),
            "create_wallet" => {
                let owner = data.address(0)?;
                let master = ctx
                    .load_address(MASTER_COPY)
                    .ok_or_else(|| Revert::new(FailureKind::Other, "no master copy"))?;
                let code = ctx
                    .code_at(&master)
                    .ok_or_else(|| Revert::new(FailureKind::NoCode, "master copy has no code"))?;
                let wallet = ctx.create(code, &[Arg::Address(owner)], Amount::zero())?;
                Ok(Arg::Address(wallet))
            }
            other => Err(Revert::unknown_method(other)),
        }
    }
}

const INITIALIZED: &str = "authorizer/initialized";
const WARD: &str = "ward";

/// Authorizer logic, meant to run behind a [`Proxy`](crate::subsystems::proxy::Proxy).
pub struct AuthorizerLogic;

impl Contract for AuthorizerLogic {
    fn kind(&self) -> &'static str {
        "authorizer_logic"
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "init" => {
                let wards = data.addresses(0)?;
                let aims = data.addresses(1)?;
                require(
                    wards.len() == aims.len(),
                    FailureKind::InvalidInput,
                    "wards and aims differ in length",
                )?;
                require(
                    !ctx.load_bool(INITIALIZED),
                    FailureKind::AlreadyInitialized,
                    "authorizer already initialized",
                )?;
                ctx.store(INITIALIZED, true);
                let owner = ctx.caller();
                ctx.store(OWNER, owner);
                for (ward, aim) in wards.iter().zip(&aims) {
                    ctx.store(slot(WARD, &[ward, aim]), true);
                }
                Ok(Arg::Unit)
            }
            "can" => {
                let usr = data.address(0)?;
                let aim = data.address(1)?;
                Ok(Arg::Bool(ctx.load_bool(&slot(WARD, &[&usr, &aim]))))
            }
            "owner" => Ok(ctx.load(OWNER).unwrap_or(Arg::Unit)),
            "upgrade_to_and_call" => {
                let implementation = data.address(0)?;
                let payload = data.call(1)?.clone();
                require(
                    ctx.load_address(OWNER) == Some(ctx.caller()),
                    FailureKind::Unauthorized,
                    "caller is not the authorizer owner",
                )?;
                ctx.store(IMPLEMENTATION_SLOT, implementation);
                ctx.delegate_call(implementation, payload)
            }
            other => Err(Revert::unknown_method(other)),
        }
    }
}

const GEM: &str = "gem";
const FACTORY: &str = "factory";
const COPY: &str = "copy";
const PAY: &str = "pay";
const CHIEF: &str = "chief";
const MOM: &str = "mom";

/// Deploys wallets through the factory and rewards callers the authorizer
/// approves for the new wallet.
pub struct WalletDeployer;

impl WalletDeployer {
    /// Ask the authorizer. An empty answer counts as approval.
    fn allowed(ctx: &mut ExecContext<'_>, usr: Address, aim: Address) -> bool {
        let Some(mom) = ctx.load_address(MOM) else {
            return false;
        };
        match ctx.view(mom, CallData::new("can").arg(usr).arg(aim)) {
            Ok(Arg::Bool(answer)) => answer,
            Ok(Arg::Unit) => true,
            _ => false,
        }
    }

    fn drop_wallet(ctx: &mut ExecContext<'_>, owner: Address) -> Result<Arg, Revert> {
        let factory = ctx
            .load_address(FACTORY)
            .ok_or_else(|| Revert::new(FailureKind::Other, "no factory configured"))?;
        let aim = ctx
            .view(factory, CallData::new("create_wallet").arg(owner))?
            .as_address()
            .ok_or_else(|| Revert::new(FailureKind::NoCode, "factory did not create a wallet"))?;

        let caller = ctx.caller();
        if ctx.load_address(MOM).is_some() && !Self::allowed(ctx, caller, aim) {
            return Ok(Arg::Address(aim));
        }

        let gem = ctx
            .load_address(GEM)
            .ok_or_else(|| Revert::new(FailureKind::Other, "no reward token"))?;
        let pay = ctx.load_uint(PAY);
        let me = ctx.address();
        if token::balance_of(ctx, gem, me)? >= pay {
            token::transfer(ctx, gem, caller, pay)?;
        }
        Ok(Arg::Address(aim))
    }
}

impl Contract for WalletDeployer {
    fn kind(&self) -> &'static str {
        "wallet_deployer"
    }

    /// Arguments: reward token, factory address, master copy address, reward per drop.
    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let address = |index: usize| {
            args.get(index)
                .and_then(Arg::as_address)
                .ok_or_else(|| Revert::invalid_input(format!("argument {index} must be an address")))
        };
        let gem = address(0)?;
        let factory = address(1)?;
        let copy = address(2)?;
        let pay = args
            .get(3)
            .and_then(Arg::as_uint)
            .ok_or_else(|| Revert::invalid_input("reward amount required"))?;
        let chief = ctx.caller();
        ctx.store(GEM, gem);
        ctx.store(FACTORY, factory);
        ctx.store(COPY, copy);
        ctx.store(PAY, pay);
        ctx.store(CHIEF, chief);
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "pay" => Ok(Arg::Uint(ctx.load_uint(PAY))),
            "rule" => {
                let mom = data.address(0)?;
                require(
                    ctx.load_address(CHIEF) == Some(ctx.caller()),
                    FailureKind::Unauthorized,
                    "caller is not the chief",
                )?;
                require(
                    ctx.load_address(MOM).is_none(),
                    FailureKind::AlreadyInitialized,
                    "authorizer already set",
                )?;
                ctx.store(MOM, mom);
                Ok(Arg::Unit)
            }
            "can" => {
                let usr = data.address(0)?;
                let aim = data.address(1)?;
                require(
                    Self::allowed(ctx, usr, aim),
                    FailureKind::Unauthorized,
                    "not authorized",
                )?;
                Ok(Arg::Bool(true))
            }
            "drop" => {
                let owner = data.address(0)?;
                Self::drop_wallet(ctx, owner)
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
    use crate::primitives::{actor_address, derive_contract_address, ether, Asset};
    use crate::subsystems::proxy::Proxy;
    use crate::subsystems::scripted::{Hook, ScriptArg, ScriptedContract};
    use crate::subsystems::token::Token;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_factory_clones_master_copy() {
        let mut ledger = InMemoryLedger::new("wallets");
        let creator = actor_address("creator");
        let owner = actor_address("owner");
        let copy = ledger
            .deploy(creator, SubsystemSpec::new(Arc::new(Wallet)))
            .await
            .unwrap();
        let factory = ledger
            .deploy(
                creator,
                SubsystemSpec::new(Arc::new(WalletFactory)).with_args(vec![Arg::Address(copy)]),
            )
            .await
            .unwrap();

        let create = CallData::new("create_wallet").arg(owner);
        let outcome = ledger.call(Call::new(owner, factory, create)).await.unwrap();
        assert_eq!(
            outcome.return_data,
            Arg::Address(derive_contract_address(&factory, 0))
        );
    }

    #[tokio::test]
    async fn test_destroyed_authorizer_approves_everyone() {
        let mut ledger = InMemoryLedger::new("wallets");
        let deployer = actor_address("deployer");
        let ward = actor_address("ward");
        let intruder = actor_address("intruder");
        let aim = actor_address("aim");

        let logic = ledger
            .deploy(deployer, SubsystemSpec::new(Arc::new(AuthorizerLogic)))
            .await
            .unwrap();
        let init = CallData::new("init")
            .arg(vec![Arg::Address(ward)])
            .arg(vec![Arg::Address(aim)]);
        let authorizer = ledger
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(Proxy))
                    .with_args(vec![Arg::Address(logic), Arg::from(init)]),
            )
            .await
            .unwrap();
        let token = ledger
            .deploy(deployer, SubsystemSpec::new(Arc::new(Token)))
            .await
            .unwrap();
        let walletdeployer = ledger
            .deploy(
                deployer,
                SubsystemSpec::new(Arc::new(WalletDeployer)).with_args(vec![
                    Arg::Address(token),
                    Arg::Address(Address::zero()),
                    Arg::Address(Address::zero()),
                    Arg::Uint(ether(1)),
                ]),
            )
            .await
            .unwrap();
        let rule = CallData::new("rule").arg(authorizer);
        assert!(ledger.call(Call::new(deployer, walletdeployer, rule)).await.unwrap().success);

        let can = |usr: Address| CallData::new("can").arg(usr).arg(aim);
        assert!(ledger.call(Call::new(deployer, walletdeployer, can(ward))).await.unwrap().success);
        let denied = ledger
            .call(Call::new(deployer, walletdeployer, can(intruder)))
            .await
            .unwrap();
        assert_eq!(denied.revert.unwrap().kind, FailureKind::Unauthorized);

        // claim the uninitialized logic and destroy it
        let claim = CallData::new("init").arg(Vec::<Arg>::new()).arg(Vec::<Arg>::new());
        assert!(ledger.call(Call::new(intruder, logic, claim)).await.unwrap().success);
        let bomb = ledger
            .deploy(
                intruder,
                SubsystemSpec::new(Arc::new(
                    ScriptedContract::new().on("destroy", Hook::new().self_destruct(ScriptArg::Caller)),
                )),
            )
            .await
            .unwrap();
        let upgrade = CallData::new("upgrade_to_and_call")
            .arg(bomb)
            .arg(CallData::new("destroy"));
        let outcome = ledger.call(Call::new(intruder, logic, upgrade)).await.unwrap();
        assert!(outcome.success, "{:?}", outcome.revert);
        assert!(ledger.get_code(logic).await.unwrap().is_empty());

        let allowed = ledger
            .call(Call::new(deployer, walletdeployer, can(intruder)))
            .await
            .unwrap();
        assert!(allowed.success);
        assert_eq!(
            ledger.get_balance(intruder, Asset::Native).await.unwrap(),
            Amount::zero()
        );
    }
}
