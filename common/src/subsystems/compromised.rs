//! Price oracle fed by trusted reporters, and an exchange that trades a
//! collectible at the oracle's median price.
//!
//! Flaw: the exchange trusts the median blindly. Whoever controls a
//! majority of reporters sets the price, buys low, and sells back the
//! whole exchange balance.

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{require, FailureKind, Revert};
use crate::ledger::ExecContext;
use crate::primitives::{slot, Address, Amount};

/// Permission verb reporters need on the oracle
pub const POST_PRICE: &str = "post_price";

/// Symbol the exchange prices its collectible with
pub const COLLECTIBLE_SYMBOL: &str = "DVNFT";

const SOURCES: &str = "sources";

fn price_key(symbol: &str, source: &Address) -> String {
    slot(&format!("price/{symbol}"), &[source])
}

pub struct TrustfulOracle;

impl TrustfulOracle {
    fn sources(ctx: &ExecContext<'_>) -> Vec<Address> {
        ctx.load(SOURCES)
            .and_then(|stored| {
                stored
                    .as_list()
                    .map(|items| items.iter().filter_map(Arg::as_address).collect())
            })
            .unwrap_or_default()
    }

    fn prices(ctx: &ExecContext<'_>, symbol: &str) -> Vec<Amount> {
        Self::sources(ctx)
            .iter()
            .map(|source| ctx.load_uint(&price_key(symbol, source)))
            .collect()
    }

    /// Median of the reported prices. An even number of reports averages
    /// the two middle values.
    pub fn median(mut prices: Vec<Amount>) -> Option<Amount> {
        if prices.is_empty() {
            return None;
        }
        prices.sort();
        let middle = prices.len() / 2;
        if prices.len() % 2 == 0 {
            let sum = prices[middle - 1].saturating_add(prices[middle]);
            Some(sum / Amount::from(2))
        } else {
            Some(prices[middle])
        }
    }
}

impl Contract for TrustfulOracle {
    fn kind(&self) -> &'static str {
        "trustful_oracle"
    }

    /// Arguments: list of sources, list of symbols, list of initial prices
    /// (one entry per source).
    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let list = |index: usize| {
            args.get(index)
                .and_then(Arg::as_list)
                .ok_or_else(|| Revert::invalid_input("oracle expects three lists"))
        };
        let sources = list(0)?;
        let symbols = list(1)?;
        let prices = list(2)?;
        require(
            sources.len() == symbols.len() && symbols.len() == prices.len(),
            FailureKind::InvalidInput,
            "oracle lists differ in length",
        )?;

        let mut known = Vec::new();
        for ((source, symbol), price) in sources.iter().zip(symbols).zip(prices) {
            let source = source
                .as_address()
                .ok_or_else(|| Revert::invalid_input("source must be an address"))?;
            let symbol = symbol
                .as_text()
                .ok_or_else(|| Revert::invalid_input("symbol must be text"))?;
            let price = price
                .as_uint()
                .ok_or_else(|| Revert::invalid_input("price must be an integer"))?;
            ctx.store(price_key(symbol, &source), price);
            ctx.grant_permission(source, POST_PRICE);
            if !known.contains(&Arg::Address(source)) {
                known.push(Arg::Address(source));
            }
        }
        ctx.store(SOURCES, Arg::List(known));
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "post_price" => {
                let symbol = data.text(0)?.to_string();
                let price = data.uint(1)?;
                let source = ctx.caller();
                require(
                    ctx.has_permission(&source, POST_PRICE),
                    FailureKind::Unauthorized,
                    "caller is not a trusted source",
                )?;
                ctx.store(price_key(&symbol, &source), price);
                Ok(Arg::Unit)
            }
            "get_price_by_source" => {
                let symbol = data.text(0)?;
                let source = data.address(1)?;
                Ok(Arg::Uint(ctx.load_uint(&price_key(symbol, &source))))
            }
            "get_all_prices" => {
                let symbol = data.text(0)?;
                Ok(Arg::List(
                    Self::prices(ctx, symbol).into_iter().map(Arg::Uint).collect(),
                ))
            }
            "get_median_price" => {
                let symbol = data.text(0)?;
                Self::median(Self::prices(ctx, symbol))
                    .map(Arg::Uint)
                    .ok_or_else(|| Revert::invalid_input("no prices reported"))
            }
            other => Err(Revert::unknown_method(other)),
        }
    }
}

const ORACLE: &str = "oracle";
const NEXT_ID: &str = "next_id";
const OWNER_OF: &str = "owner_of";
const APPROVED: &str = "approved";
const HOLDINGS: &str = "holdings";

fn token_key(prefix: &str, id: Amount) -> String {
    format!("{prefix}/{id}")
}

/// Sells freshly minted collectibles and buys them back at the oracle
/// median. The exchange also keeps the collectible ledger, so
/// `balance_of` reports how many units a holder owns.
pub struct Exchange;

impl Exchange {
    fn median_price(ctx: &mut ExecContext<'_>) -> Result<Amount, Revert> {
        let oracle = ctx
            .load_address(ORACLE)
            .ok_or_else(|| Revert::new(FailureKind::Other, "exchange has no oracle"))?;
        ctx.view(
            oracle,
            CallData::new("get_median_price").arg(COLLECTIBLE_SYMBOL),
        )?
        .as_uint()
        .ok_or_else(|| Revert::new(FailureKind::Other, "oracle returned no price"))
    }

    fn adjust_holdings(ctx: &mut ExecContext<'_>, holder: &Address, increase: bool) {
        let key = slot(HOLDINGS, &[holder]);
        let held = ctx.load_uint(&key);
        let updated = if increase {
            held.saturating_add(Amount::one())
        } else {
            held.saturating_sub(Amount::one())
        };
        ctx.store(key, updated);
    }

    fn buy_one(ctx: &mut ExecContext<'_>) -> Result<Arg, Revert> {
        let paid = ctx.value();
        require(!paid.is_zero(), FailureKind::InvalidInput, "invalid payment")?;
        let price = Self::median_price(ctx)?;
        require(paid >= price, FailureKind::InsufficientBalance, "invalid payment")?;

        let buyer = ctx.caller();
        let id = ctx.load_uint(NEXT_ID);
        ctx.store(NEXT_ID, id + Amount::one());
        ctx.store(token_key(OWNER_OF, id), buyer);
        Self::adjust_holdings(ctx, &buyer, true);

        ctx.send_value(buyer, paid - price)?;
        Ok(Arg::Uint(id))
    }

    fn sell_one(ctx: &mut ExecContext<'_>, id: Amount) -> Result<Arg, Revert> {
        let seller = ctx.caller();
        require(
            ctx.load_address(&token_key(OWNER_OF, id)) == Some(seller),
            FailureKind::Unauthorized,
            "seller is not the owner",
        )?;
        require(
            ctx.load_address(&token_key(APPROVED, id)) == Some(ctx.address()),
            FailureKind::Unauthorized,
            "transfer not approved",
        )?;
        let price = Self::median_price(ctx)?;
        require(
            ctx.self_balance() >= price,
            FailureKind::InsufficientBalance,
            "not enough funds",
        )?;

        ctx.clear(&token_key(OWNER_OF, id));
        ctx.clear(&token_key(APPROVED, id));
        Self::adjust_holdings(ctx, &seller, false);

        ctx.send_value(seller, price)?;
        Ok(Arg::Uint(price))
    }
}

impl Contract for Exchange {
    fn kind(&self) -> &'static str {
        "exchange"
    }

    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let oracle = args
            .first()
            .and_then(Arg::as_address)
            .ok_or_else(|| Revert::invalid_input("oracle address required"))?;
        ctx.store(ORACLE, oracle);
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        match data.method.as_str() {
            "buy_one" => Self::buy_one(ctx),
            "sell_one" => {
                let id = data.uint(0)?;
                Self::sell_one(ctx, id)
            }
            "approve" => {
                let spender = data.address(0)?;
                let id = data.uint(1)?;
                require(
                    ctx.load_address(&token_key(OWNER_OF, id)) == Some(ctx.caller()),
                    FailureKind::Unauthorized,
                    "caller is not the owner",
                )?;
                ctx.store(token_key(APPROVED, id), spender);
                Ok(Arg::Bool(true))
            }
            "owner_of" => {
                let id = data.uint(0)?;
                Ok(ctx.load(&token_key(OWNER_OF, id)).unwrap_or(Arg::Unit))
            }
            "balance_of" => {
                let holder = data.address(0)?;
                Ok(Arg::Uint(ctx.load_uint(&slot(HOLDINGS, &[&holder]))))
            }
            other => Err(Revert::unknown_method(other)),
        }
    }
}
