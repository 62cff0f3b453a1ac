//! Built-in scenarios, each pairing a vulnerable deployment with the
//! exploit that breaks it.
//!
//! | Scenario         | Flaw                                                  |
//! |------------------|-------------------------------------------------------|
//! | `unstoppable`    | donation breaks the vault's accounting (defender run) |
//! | `naive-receiver` | anyone can charge the receiver flash-loan fees        |
//! | `truster`        | pool runs arbitrary calls during a loan               |
//! | `side-entrance`  | deposits of borrowed ether count as repayment         |
//! | `selfie`         | flash-borrowed voting power                           |
//! | `compromised`    | leaked oracle keys move the median price              |
//! | `abi-smuggling`  | permission checked against a declared method name     |
//! | `wallet-mining`  | uninitialized authorizer, predictable wallet address  |

use std::sync::Arc;

use crate::config::HarnessConfig;
use crate::registry::ScenarioRegistry;
use crate::runner::Exploit;
use crate::scenario::{Scenario, ScenarioError};

pub mod abi_smuggling;
pub mod compromised;
pub mod naive_receiver;
pub mod selfie;
pub mod side_entrance;
pub mod truster;
pub mod unstoppable;
pub mod wallet_mining;

/// Every built-in scenario with its exploit, in catalog order.
pub fn all() -> Result<Vec<(Scenario, Arc<dyn Exploit>)>, ScenarioError> {
    Ok(vec![
        (unstoppable::scenario()?, unstoppable::exploit()),
        (naive_receiver::scenario()?, naive_receiver::exploit()),
        (truster::scenario()?, truster::exploit()),
        (side_entrance::scenario()?, side_entrance::exploit()),
        (selfie::scenario()?, selfie::exploit()),
        (compromised::scenario()?, compromised::exploit()),
        (abi_smuggling::scenario()?, abi_smuggling::exploit()),
        (wallet_mining::scenario()?, wallet_mining::exploit()),
    ])
}

/// A registry holding the catalog scenarios `config` selects.
pub fn registry(config: &HarnessConfig) -> Result<ScenarioRegistry, ScenarioError> {
    let mut registry = ScenarioRegistry::new(config);
    for (scenario, exploit) in all()? {
        if !config.selects(scenario.name()) {
            continue;
        }
        registry.register(scenario, exploit)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_names_are_unique() {
        let catalog = all().unwrap();
        let mut names: Vec<&str> = catalog.iter().map(|(s, _)| s.name()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), catalog.len());
    }

    #[test]
    fn test_registry_respects_selection() {
        let config = HarnessConfig {
            scenarios: vec![truster::NAME.to_string(), selfie::NAME.to_string()],
            ..HarnessConfig::default()
        };
        let registry = registry(&config).unwrap();
        assert_eq!(registry.names(), vec![truster::NAME, selfie::NAME]);
    }
}
