//! Verdicts and the aggregate run report.

use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::provisioner::SetupError;
use crate::runner::{StepRecord, TimeoutReason};
use crate::verifier::AssertionResult;

const RULE: &str = "════════════════════════════════════════════════════════════════";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Pass,
    Fail,
    SetupError,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self {
            RunStatus::Pass => "pass",
            RunStatus::Fail => "fail",
            RunStatus::SetupError => "setup-error",
        };
        f.write_str(status)
    }
}

/// Why a run failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// A postcondition did not hold
    Assertion,
    Timeout { reason: TimeoutReason },
    /// The exploit could not produce a plan
    Planning,
    /// The ledger failed underneath the exploit
    Ledger,
    /// Caller code panicked while the scenario ran
    Panicked { message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub name: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failing_assertion: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl Verdict {
    fn new(name: &str, status: RunStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            reason: None,
            failing_assertion: None,
            expected: None,
            actual: None,
            details: None,
        }
    }

    pub fn pass(name: &str) -> Self {
        Self::new(name, RunStatus::Pass)
    }

    pub fn assertion_failed(name: &str, failure: &AssertionResult) -> Self {
        Self {
            reason: Some(FailureReason::Assertion),
            failing_assertion: Some(failure.description.clone()),
            expected: Some(failure.expected.clone()),
            actual: Some(failure.actual.clone()),
            details: Some(format!("postcondition {} does not hold", failure.index)),
            ..Self::new(name, RunStatus::Fail)
        }
    }

    pub fn timeout(name: &str, reason: TimeoutReason) -> Self {
        Self {
            details: Some(format!("timeout: {reason}")),
            reason: Some(FailureReason::Timeout { reason }),
            ..Self::new(name, RunStatus::Fail)
        }
    }

    pub fn planning_failed(name: &str, message: &str) -> Self {
        Self {
            reason: Some(FailureReason::Planning),
            details: Some(message.to_string()),
            ..Self::new(name, RunStatus::Fail)
        }
    }

    pub fn ledger_failed(name: &str, message: &str) -> Self {
        Self {
            reason: Some(FailureReason::Ledger),
            details: Some(message.to_string()),
            ..Self::new(name, RunStatus::Fail)
        }
    }

    pub fn panicked(name: &str, message: &str) -> Self {
        Self {
            reason: Some(FailureReason::Panicked {
                message: message.to_string(),
            }),
            details: Some(format!("panicked: {message}")),
            ..Self::new(name, RunStatus::Fail)
        }
    }

    pub fn setup_error(name: &str, error: &SetupError) -> Self {
        Self {
            details: Some(error.to_string()),
            ..Self::new(name, RunStatus::SetupError)
        }
    }

    pub fn passed(&self) -> bool {
        self.status == RunStatus::Pass
    }
}

/// Everything recorded about one scenario run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub verdict: Verdict,
    pub fingerprint: String,
    pub duration_ms: u64,
    /// Exploit steps, empty when the run never reached the exploit
    pub trace: Vec<StepRecord>,
    /// Postcondition results, empty when verification did not run
    pub assertions: Vec<AssertionResult>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub setup_errors: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateReport {
    /// RFC 3339 creation time
    pub generated_at: String,
    pub reports: Vec<ScenarioReport>,
    pub summary: Summary,
}

impl AggregateReport {
    pub fn new(reports: Vec<ScenarioReport>) -> Self {
        let mut summary = Summary {
            total: reports.len(),
            ..Summary::default()
        };
        for report in &reports {
            match report.verdict.status {
                RunStatus::Pass => summary.passed += 1,
                RunStatus::Fail => summary.failed += 1,
                RunStatus::SetupError => summary.setup_errors += 1,
            }
        }
        Self {
            generated_at: chrono::Utc::now().to_rfc3339(),
            reports,
            summary,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.summary.passed == self.summary.total
    }

    pub fn verdict(&self, name: &str) -> Option<&Verdict> {
        self.reports
            .iter()
            .map(|report| &report.verdict)
            .find(|verdict| verdict.name == name)
    }

    /// Write the report as pretty JSON. A directory path gets a
    /// timestamped file name.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<PathBuf> {
        let path = path.as_ref();
        let target = if path.is_dir() {
            let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
            path.join(format!("gauntlet_report_{stamp}.json"))
        } else {
            path.to_path_buf()
        };
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize report")?;
        tokio::fs::write(&target, json)
            .await
            .with_context(|| format!("Failed to write report to {}", target.display()))?;
        log::info!("Report saved to {}", target.display());
        Ok(target)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read report {}", path.display()))?;
        serde_json::from_str(&content).context("Failed to parse report JSON")
    }

    /// Boxed text summary
    pub fn render(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "╔{RULE}╗");
        let _ = writeln!(out, "║              INVARIANT HARNESS SUMMARY                         ║");
        let _ = writeln!(out, "╠{RULE}╣");
        let _ = writeln!(out, "║ Generated:     {:47} ║", self.generated_at);
        let _ = writeln!(out, "║ Scenarios:     {:47} ║", self.summary.total);
        let _ = writeln!(out, "║ Passed:        {:47} ║", self.summary.passed);
        let _ = writeln!(out, "║ Failed:        {:47} ║", self.summary.failed);
        let _ = writeln!(out, "║ Setup errors:  {:47} ║", self.summary.setup_errors);

        for report in &self.reports {
            let verdict = &report.verdict;
            let _ = writeln!(out, "╠{RULE}╣");
            let _ = writeln!(
                out,
                "║ {:48} {:>13} ║",
                verdict.name,
                format!("[{}]", verdict.status)
            );
            let _ = writeln!(
                out,
                "║   {:60} ║",
                format!("{} steps, {} ms", report.trace.len(), report.duration_ms)
            );
            if let Some(assertion) = &verdict.failing_assertion {
                for line in textwrap::wrap(&format!("assertion: {assertion}"), 60) {
                    let _ = writeln!(out, "║   {:60} ║", line);
                }
            }
            if let (Some(expected), Some(actual)) = (&verdict.expected, &verdict.actual) {
                for line in textwrap::wrap(&format!("expected {expected}, actual {actual}"), 60) {
                    let _ = writeln!(out, "║   {:60} ║", line);
                }
            }
            if verdict.failing_assertion.is_none() {
                if let Some(details) = &verdict.details {
                    for line in textwrap::wrap(details, 60) {
                        let _ = writeln!(out, "║   {:60} ║", line);
                    }
                }
            }
        }
        let _ = writeln!(out, "╚{RULE}╝");
        out
    }

    pub fn print(&self) {
        print!("{}", self.render());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(verdict: Verdict) -> ScenarioReport {
        ScenarioReport {
            verdict,
            fingerprint: "00".to_string(),
            duration_ms: 3,
            trace: Vec::new(),
            assertions: Vec::new(),
        }
    }

    #[test]
    fn test_summary_counts() {
        let failure = AssertionResult {
            index: 1,
            description: "balance(pool, dvt) == 0".to_string(),
            holds: false,
            expected: "== 0".to_string(),
            actual: "1000".to_string(),
        };
        let aggregate = AggregateReport::new(vec![
            report(Verdict::pass("a")),
            report(Verdict::assertion_failed("b", &failure)),
            report(Verdict::timeout(
                "c",
                TimeoutReason::WallClock { limit_ms: 10 },
            )),
            report(Verdict::setup_error(
                "d",
                &SetupError::PreconditionFailed {
                    index: 0,
                    diagnostic: "broken".to_string(),
                },
            )),
        ]);

        assert_eq!(
            aggregate.summary,
            Summary {
                total: 4,
                passed: 1,
                failed: 2,
                setup_errors: 1
            }
        );
        assert!(!aggregate.all_passed());
        let b = aggregate.verdict("b").unwrap();
        assert_eq!(b.actual.as_deref(), Some("1000"));

        let rendered = aggregate.render();
        assert!(rendered.contains("[setup-error]"));
        assert!(rendered.contains("timeout: wall-clock limit"));
    }

    #[test]
    fn test_verdict_serialization() {
        let verdict = Verdict::timeout(
            "loop",
            TimeoutReason::StepCeiling {
                limit: 2,
                requested: 3,
            },
        );
        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["reason"]["kind"], "timeout");
        assert_eq!(json["reason"]["reason"]["kind"], "step_ceiling");
        assert!(json.get("failing_assertion").is_none());

        let back: Verdict = serde_json::from_value(json).unwrap();
        assert_eq!(back, verdict);
    }

    #[tokio::test]
    async fn test_save_and_load() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let aggregate = AggregateReport::new(vec![report(Verdict::pass("truster"))]);

        let path = aggregate.save(dir.path()).await?;
        assert!(path.starts_with(dir.path()));
        let loaded = AggregateReport::load(&path).await?;
        assert_eq!(loaded, aggregate);

        let nested = aggregate.save(dir.path().join("out/report.json")).await?;
        assert!(nested.exists());
        Ok(())
    }
}
