use crate::call::{Arg, CallData};
use crate::error::Revert;
use crate::ledger::ExecContext;

/// Code attached to a subsystem account.
///
/// Implementations are stateless: everything they remember lives in the
/// account storage reachable through the [`ExecContext`], so the same code
/// object can back several accounts (clones, proxies, delegate calls).
pub trait Contract: Send + Sync {
    /// Short identifier of the code, used in logs and fingerprints
    fn kind(&self) -> &'static str;

    /// Canonical description of the code. Two accounts with equal
    /// descriptions run the same logic.
    fn describe(&self) -> String {
        self.kind().to_string()
    }

    /// Bytes reported by code-presence queries. Never empty.
    fn code(&self) -> Vec<u8> {
        self.describe().into_bytes()
    }

    /// Runs once when the code is deployed.
    fn construct(&self, _ctx: &mut ExecContext<'_>, _args: &[Arg]) -> Result<(), Revert> {
        Ok(())
    }

    /// Dispatch a method call.
    fn call(&self, ctx: &mut ExecContext<'_>, data: &CallData) -> Result<Arg, Revert>;
}

impl std::fmt::Debug for dyn Contract {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Contract({})", self.describe())
    }
}
