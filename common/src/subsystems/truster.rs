//! Free flash-loan pool for a single token.
//!
//! Flaw: after lending, the pool executes an arbitrary caller-supplied call
//! on an arbitrary target *as itself*. Any borrower can make the pool grant
//! them an allowance, borrow nothing, and drain it afterwards.

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{require, FailureKind, Revert};
use crate::ledger::ExecContext;
use crate::subsystems::token;

const TOKEN: &str = "token";

pub struct TrusterPool;

impl Contract for TrusterPool {
    fn kind(&self) -> &'static str {
        "truster_pool"
    }

    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let token = args
            .first()
            .and_then(Arg::as_address)
            .ok_or_else(|| Revert::invalid_input("token address required"))?;
        ctx.store(TOKEN, token);
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        let token = ctx
            .load_address(TOKEN)
            .ok_or_else(|| Revert::new(FailureKind::Other, "pool has no token"))?;

        match data.method.as_str() {
            "token" => Ok(Arg::Address(token)),
            "flash_loan" => {
                let amount = data.uint(0)?;
                let borrower = data.address(1)?;
                let target = data.address(2)?;
                let payload = data.call(3)?.clone();

                let pool = ctx.address();
                let balance_before = token::balance_of(ctx, token, pool)?;
                token::transfer(ctx, token, borrower, amount)?;
                ctx.view(target, payload)?;

                let balance_after = token::balance_of(ctx, token, pool)?;
                require(
                    balance_after >= balance_before,
                    FailureKind::NotRepaid,
                    "flash loan not paid back",
                )?;
                Ok(Arg::Bool(true))
            }
            other => Err(Revert::unknown_method(other)),
        }
    }
}
