//! Upgradeable proxy forwarding every call to its implementation.
//!
//! The proxy keeps state in its own storage while running the logic of the
//! implementation through delegate calls. Implementations upgrade it by
//! writing [`IMPLEMENTATION_SLOT`].

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{FailureKind, Revert};
use crate::ledger::ExecContext;

/// Storage slot holding the implementation address
pub const IMPLEMENTATION_SLOT: &str = "proxy/implementation";

pub struct Proxy;

impl Contract for Proxy {
    fn kind(&self) -> &'static str {
        "proxy"
    }

    /// Arguments: implementation address, optional initialization payload
    /// delegated to the implementation.
    fn construct(&self, ctx: &mut ExecContext<'_>, args: &[Arg]) -> Result<(), Revert> {
        let implementation = args
            .first()
            .and_then(Arg::as_address)
            .ok_or_else(|| Revert::invalid_input("implementation address required"))?;
        ctx.store(IMPLEMENTATION_SLOT, implementation);

        if let Some(init) = args.get(1).and_then(Arg::as_call) {
            ctx.delegate_call(implementation, init.clone())?;
        }
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        let implementation = ctx
            .load_address(IMPLEMENTATION_SLOT)
            .ok_or_else(|| Revert::new(FailureKind::NoCode, "proxy has no implementation"))?;
        if data.method == "implementation" {
            return Ok(Arg::Address(implementation));
        }
        ctx.delegate_call(implementation, data.clone())
    }
}
