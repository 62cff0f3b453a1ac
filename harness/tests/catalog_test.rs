// Catalog integration tests
//
// Every built-in exploit must break its scenario, and the scenario must
// hold up when nobody attacks it.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use gauntlet_harness::catalog::{self, compromised, side_entrance, wallet_mining};
use gauntlet_harness::config::HarnessConfig;
use gauntlet_harness::report::FailureReason;
use gauntlet_harness::runner::NoopExploit;
use gauntlet_harness::{AggregateReport, RunStatus, ScenarioRegistry};

#[tokio::test]
async fn test_every_catalog_exploit_passes() {
    let registry = catalog::registry(&HarnessConfig::default()).unwrap();
    assert_eq!(registry.len(), catalog::all().unwrap().len());

    let report = registry.run_all().await;
    for scenario in &report.reports {
        assert_eq!(
            scenario.verdict.status,
            RunStatus::Pass,
            "{} failed: {:?}",
            scenario.verdict.name,
            scenario.verdict
        );
    }
    assert!(report.all_passed());
}

#[tokio::test]
async fn test_catalog_runs_concurrently() {
    let config = HarnessConfig {
        parallel: true,
        ..HarnessConfig::default()
    };
    let registry = catalog::registry(&config).unwrap();
    let report = registry.run_all().await;
    assert!(report.all_passed(), "{}", report.render());
    assert!(registry.factory().active().is_empty());
}

#[tokio::test]
async fn test_scenarios_hold_without_an_attack() {
    let mut registry = ScenarioRegistry::new(&HarnessConfig::default());
    for (scenario, _) in catalog::all().unwrap() {
        registry.register(scenario, Arc::new(NoopExploit)).unwrap();
    }

    let report = registry.run_all().await;
    assert_eq!(report.summary.setup_errors, 0, "{}", report.render());
    for scenario in &report.reports {
        assert_eq!(
            scenario.verdict.status,
            RunStatus::Fail,
            "{} passed without an exploit",
            scenario.verdict.name
        );
        assert_eq!(scenario.verdict.reason, Some(FailureReason::Assertion));
    }
}

#[tokio::test]
async fn test_side_entrance_conserves_ether() {
    let config = HarnessConfig {
        scenarios: vec![side_entrance::NAME.to_string()],
        ..HarnessConfig::default()
    };
    let registry = catalog::registry(&config).unwrap();
    let report = registry.run(side_entrance::NAME).await.unwrap();

    let conservation = report
        .assertions
        .iter()
        .find(|result| result.description.starts_with("sum of"))
        .unwrap();
    assert!(conservation.holds, "{:?}", conservation);
    assert_eq!(
        conservation.actual,
        (side_entrance::ether_in_pool() + side_entrance::initial_player_balance()).to_string()
    );
}

#[tokio::test]
async fn test_compromised_custom_predicate_is_reported() {
    let mut registry = ScenarioRegistry::new(&HarnessConfig::default());
    registry
        .register(compromised::scenario().unwrap(), compromised::exploit())
        .unwrap();
    let report = registry.run(compromised::NAME).await.unwrap();
    assert_eq!(report.verdict.status, RunStatus::Pass, "{:?}", report.verdict);

    let median = report.assertions.last().unwrap();
    assert!(median.description.contains("oracle median price unchanged"));
    assert_eq!(median.actual, compromised::initial_nft_price().to_string());
}

#[tokio::test]
async fn test_wallet_mining_trace_reaches_the_deposit() {
    let mut registry = ScenarioRegistry::new(&HarnessConfig::default());
    registry
        .register(wallet_mining::scenario().unwrap(), wallet_mining::exploit())
        .unwrap();
    let report = registry.run(wallet_mining::NAME).await.unwrap();
    assert_eq!(report.verdict.status, RunStatus::Pass, "{:?}", report.verdict);
    // claim, deploy, upgrade, master copy, factory, drops, sweep
    assert_eq!(
        report.trace.len(),
        5 + wallet_mining::DEPOSIT_NONCE as usize + 1 + 1
    );
    assert!(report.trace.iter().all(|step| step.success));
}

#[tokio::test]
async fn test_report_round_trips_through_disk() {
    let config = HarnessConfig {
        scenarios: vec!["truster".to_string()],
        ..HarnessConfig::default()
    };
    let report = catalog::registry(&config).unwrap().run_all().await;

    let dir = tempfile::tempdir().unwrap();
    let path = report.save(dir.path()).await.unwrap();
    assert!(path.starts_with(dir.path()));

    let loaded = AggregateReport::load(&path).await.unwrap();
    assert_eq!(loaded, report);
}
