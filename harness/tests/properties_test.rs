//! Property-based tests for the harness
//!
//! Properties tested:
//! - Isolation: a scenario's verdict does not depend on what else runs
//!   alongside it, or in which order
//! - Conservation: native value moved between actors is never created or
//!   destroyed, whatever transfers the exploit attempts
//! - Idempotent verification: evaluating postconditions twice changes
//!   nothing

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use gauntlet_common::ledger::LedgerConfig;
use gauntlet_common::{Amount, CallData};
use gauntlet_harness::catalog;
use gauntlet_harness::config::HarnessConfig;
use gauntlet_harness::namespace::NamespaceFactory;
use gauntlet_harness::provisioner::{initial_native_supply, provision};
use gauntlet_harness::runner::{run_exploit, ExploitView, RunLimits};
use gauntlet_harness::scenario::{AccountRef, ActorDef, AssetRef, Assertion, Quantity};
use gauntlet_harness::verifier::verify;
use gauntlet_harness::{RunStatus, Scenario, ScenarioRegistry, Step};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

fn catalog_names() -> Vec<String> {
    catalog::all()
        .unwrap()
        .into_iter()
        .map(|(scenario, _)| scenario.name().to_string())
        .collect()
}

async fn statuses(names: &[String], parallel: bool) -> Vec<(String, RunStatus)> {
    let config = HarnessConfig {
        scenarios: names.to_vec(),
        parallel,
        ..HarnessConfig::default()
    };
    let registry = catalog::registry(&config).unwrap();
    registry
        .run_all()
        .await
        .reports
        .into_iter()
        .map(|report| (report.verdict.name, report.verdict.status))
        .collect()
}

// Property 1: verdicts are independent of the other scenarios in the run
proptest! {
    #![proptest_config(ProptestConfig::with_cases(6))]
    #[test]
    fn test_verdicts_are_isolated(
        selection in Just(catalog_names()).prop_shuffle().prop_flat_map(|names| {
            let len = names.len();
            (Just(names), 1..=len)
        }),
        parallel in any::<bool>(),
    ) {
        let (names, count) = selection;
        let chosen = &names[..count];
        let rt = runtime();

        let together = rt.block_on(statuses(chosen, parallel));
        for (name, status) in together {
            let alone = rt.block_on(statuses(std::slice::from_ref(&name), false));
            prop_assert_eq!(alone, vec![(name, status)]);
        }
    }
}

// Property 2: native value is conserved across arbitrary actor transfers
proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn test_native_value_is_conserved(
        balances in prop::collection::vec(0u64..1_000_000u64, 2..6),
        transfers in prop::collection::vec((0usize..6, 0usize..6, 0u64..2_000_000u64), 0..24),
    ) {
        let names: Vec<String> = (0..balances.len()).map(|i| format!("actor-{i}")).collect();
        let mut builder = Scenario::builder("conservation");
        for (name, balance) in names.iter().zip(&balances) {
            builder = builder.actor(ActorDef::signer(name, Amount::from(*balance)));
        }
        let supply = balances
            .iter()
            .fold(Amount::zero(), |total, balance| total + Amount::from(*balance));
        let scenario = builder
            .postcondition(Assertion::Conservation {
                asset: AssetRef::Native,
                accounts: names.iter().map(|name| AccountRef::actor(name)).collect(),
                expected: Quantity::Literal(supply),
            })
            .build()
            .unwrap();
        prop_assert_eq!(initial_native_supply(&scenario), supply);

        let plan_names = names.clone();
        let exploit = move |view: &ExploitView| -> anyhow::Result<Vec<Step>> {
            let mut steps = Vec::new();
            for (from, to, amount) in &transfers {
                let from = &plan_names[from % plan_names.len()];
                let to = view.actor(&plan_names[to % plan_names.len()])?;
                steps.push(Step::call_with_value(
                    from,
                    to,
                    CallData::new("receive"),
                    Amount::from(*amount),
                ));
            }
            Ok(steps)
        };

        let mut registry = ScenarioRegistry::new(&HarnessConfig::default());
        registry.register(scenario, Arc::new(exploit)).unwrap();
        let report = runtime().block_on(registry.run("conservation")).unwrap();
        prop_assert_eq!(report.verdict.status, RunStatus::Pass, "{:?}", report.verdict);
    }
}

// Property 3: verification leaves the namespace as it found it
proptest! {
    #![proptest_config(ProptestConfig::with_cases(8))]
    #[test]
    fn test_verification_is_idempotent(index in 0usize..8) {
        let catalog = catalog::all().unwrap();
        let (scenario, exploit) = &catalog[index % catalog.len()];

        let rt = runtime();
        let (first, second) = rt.block_on(async {
            let factory = NamespaceFactory::new(LedgerConfig::default());
            let mut namespace = factory.checkout(scenario.name());
            provision(scenario, &mut namespace).await.unwrap();
            run_exploit(exploit.as_ref(), &mut namespace, &RunLimits::default())
                .await
                .unwrap();
            let first = verify(scenario.postconditions(), &mut namespace).await;
            let second = verify(scenario.postconditions(), &mut namespace).await;
            (first.results, second.results)
        });
        prop_assert!(first.iter().all(|result| result.holds));
        prop_assert_eq!(first, second);
    }
}
