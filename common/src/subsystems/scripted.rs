//! Attacker-controlled subsystem built from declarative hooks.
//!
//! Exploits sometimes need code of their own: a flash-loan receiver that
//! misbehaves, a contract that re-enters a pool, a payload that destroys
//! its host under a delegate call. A [`ScriptedContract`] maps method names
//! to [`Hook`]s, each a fixed list of operations whose arguments may refer
//! to the incoming call, so exploits stay pure data.

use std::collections::BTreeMap;

use crate::call::{Arg, CallData};
use crate::contract::Contract;
use crate::error::{FailureKind, Revert};
use crate::ledger::ExecContext;
use crate::primitives::{Address, Amount};
use crate::subsystems::token;

const OWNER: &str = "owner";

/// Argument of a scripted operation, resolved when the hook runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptArg {
    Value(Arg),
    /// Argument `n` of the call that triggered the hook
    Incoming(usize),
    /// Native value attached to the triggering call
    CallValue,
    Caller,
    SelfAddress,
    SelfBalance,
    /// Account that deployed the scripted contract
    Owner,
    /// Balance the scripted contract holds in this token
    TokenBalance(Address),
    /// Nested call payload built from resolved arguments
    Payload { method: String, args: Vec<ScriptArg> },
}

impl ScriptArg {
    pub fn payload(method: &str, args: Vec<ScriptArg>) -> Self {
        ScriptArg::Payload {
            method: method.to_string(),
            args,
        }
    }
}

impl From<Arg> for ScriptArg {
    fn from(value: Arg) -> Self {
        ScriptArg::Value(value)
    }
}

impl From<Address> for ScriptArg {
    fn from(address: Address) -> Self {
        ScriptArg::Value(Arg::Address(address))
    }
}

impl From<Amount> for ScriptArg {
    fn from(amount: Amount) -> Self {
        ScriptArg::Value(Arg::Uint(amount))
    }
}

impl From<&str> for ScriptArg {
    fn from(text: &str) -> Self {
        ScriptArg::Value(Arg::from(text))
    }
}

impl From<CallData> for ScriptArg {
    fn from(call: CallData) -> Self {
        ScriptArg::Value(Arg::from(call))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOp {
    Call {
        target: ScriptArg,
        method: String,
        args: Vec<ScriptArg>,
        value: ScriptArg,
    },
    SelfDestruct {
        beneficiary: ScriptArg,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hook {
    ops: Vec<ScriptOp>,
    returns: Option<ScriptArg>,
}

impl Hook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call(self, target: impl Into<ScriptArg>, method: &str, args: Vec<ScriptArg>) -> Self {
        self.call_with_value(target, method, args, ScriptArg::Value(Arg::Uint(Amount::zero())))
    }

    pub fn call_with_value(
        mut self,
        target: impl Into<ScriptArg>,
        method: &str,
        args: Vec<ScriptArg>,
        value: ScriptArg,
    ) -> Self {
        self.ops.push(ScriptOp::Call {
            target: target.into(),
            method: method.to_string(),
            args,
            value,
        });
        self
    }

    pub fn self_destruct(mut self, beneficiary: ScriptArg) -> Self {
        self.ops.push(ScriptOp::SelfDestruct { beneficiary });
        self
    }

    pub fn returning(mut self, value: impl Into<ScriptArg>) -> Self {
        self.returns = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedContract {
    hooks: BTreeMap<String, Hook>,
}

impl ScriptedContract {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(mut self, method: &str, hook: Hook) -> Self {
        self.hooks.insert(method.to_string(), hook);
        self
    }

    fn resolve(ctx: &mut ExecContext<'_>, data: &CallData, arg: &ScriptArg) -> Result<Arg, Revert> {
        let resolved = match arg {
            ScriptArg::Value(value) => value.clone(),
            ScriptArg::Incoming(index) => data.get(*index)?.clone(),
            ScriptArg::CallValue => Arg::Uint(ctx.value()),
            ScriptArg::Caller => Arg::Address(ctx.caller()),
            ScriptArg::SelfAddress => Arg::Address(ctx.address()),
            ScriptArg::SelfBalance => Arg::Uint(ctx.self_balance()),
            ScriptArg::Owner => ctx
                .load(OWNER)
                .ok_or_else(|| Revert::new(FailureKind::Other, "scripted contract has no owner"))?,
            ScriptArg::TokenBalance(asset) => {
                let me = ctx.address();
                Arg::Uint(token::balance_of(ctx, *asset, me)?)
            }
            ScriptArg::Payload { method, args } => {
                let mut payload = CallData::new(method.clone());
                for nested in args {
                    payload.args.push(Self::resolve(ctx, data, nested)?);
                }
                Arg::from(payload)
            }
        };
        Ok(resolved)
    }

    fn run(ctx: &mut ExecContext<'_>, data: &CallData, op: &ScriptOp) -> Result<(), Revert> {
        match op {
            ScriptOp::Call {
                target,
                method,
                args,
                value,
            } => {
                let target = Self::resolve(ctx, data, target)?
                    .as_address()
                    .ok_or_else(|| Revert::invalid_input("script target is not an address"))?;
                let value = Self::resolve(ctx, data, value)?
                    .as_uint()
                    .unwrap_or_default();
                let mut payload = CallData::new(method.clone());
                for arg in args {
                    payload.args.push(Self::resolve(ctx, data, arg)?);
                }
                ctx.call(target, payload, value)?;
            }
            ScriptOp::SelfDestruct { beneficiary } => {
                let beneficiary = Self::resolve(ctx, data, beneficiary)?
                    .as_address()
                    .ok_or_else(|| Revert::invalid_input("beneficiary is not an address"))?;
                ctx.self_destruct(beneficiary)?;
            }
        }
        Ok(())
    }
}

impl Contract for ScriptedContract {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    fn describe(&self) -> String {
        format!("scripted:{:?}", self.hooks)
    }

    fn construct(&self, ctx: &mut ExecContext<'_>, _args: &[Arg]) -> Result<(), Revert> {
        let owner = ctx.caller();
        ctx.store(OWNER, owner);
        Ok(())
    }

    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert> {
        let hook = self
            .hooks
            .get(&data.method)
            .ok_or_else(|| Revert::unknown_method(&data.method))?;
        for op in &hook.ops {
            Self::run(ctx, data, op)?;
        }
        match &hook.returns {
            Some(value) => Self::resolve(ctx, data, value),
            None => Ok(Arg::Unit),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::call::Call;
    use crate::ledger::{InMemoryLedger, LedgerService, SubsystemSpec};
    use crate::primitives::{actor_address, ether, Asset};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_hooks_forward_value_to_owner() {
        let mut ledger = InMemoryLedger::new("scripted");
        let owner = actor_address("owner");
        let sender = actor_address("sender");
        ledger.set_balance(sender, ether(2)).await.unwrap();

        let script = ScriptedContract::new()
            .on(
                "forward",
                Hook::new()
                    .call_with_value(ScriptArg::Owner, "receive", Vec::new(), ScriptArg::SelfBalance)
                    .returning(ScriptArg::CallValue),
            );
        let contract = ledger
            .deploy(owner, SubsystemSpec::new(Arc::new(script)))
            .await
            .unwrap();

        let forward = Call::new(sender, contract, CallData::new("forward")).with_value(ether(2));
        let outcome = ledger.call(forward).await.unwrap();
        assert_eq!(outcome.return_data, Arg::Uint(ether(2)));
        assert_eq!(ledger.get_balance(owner, Asset::Native).await.unwrap(), ether(2));

        let unknown = ledger
            .call(Call::new(sender, contract, CallData::new("missing")))
            .await
            .unwrap();
        assert_eq!(unknown.revert.unwrap().kind, FailureKind::UnknownMethod);
    }
}
