//! Harness reports.
//!
//! One [`StyleReport`] per fixture, one [`ScenarioOutcome`] per scenario of
//! the matrix. Reports render as JSON, JUnit XML or a human-readable summary.
//! A skipped scenario is never counted as a failure.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::fixtures::verification::GroupCheck;
use crate::stats::ErrorStats;

/// Scenario status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TestStatus {
    /// Every comparison within tolerance
    Pass,
    /// Tolerance violation or fatal scenario error
    Fail,
    /// Missing capability, nothing compared
    Skip,
}

/// Result of one scenario of the matrix.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioOutcome {
    /// Scenario name (`plain`, `concurrent`, `extract`)
    pub name: String,
    /// Verdict
    pub status: TestStatus,
    /// Wall time
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Every quantity group checked, in order
    pub groups: Vec<GroupCheck>,
    /// Errors of all groups together
    pub stats: ErrorStats,
    /// Fatal error, skip reason or failure summary
    pub message: Option<String>,
}

impl ScenarioOutcome {
    /// A scenario that was not run.
    pub fn skipped(name: &str, reason: String) -> Self {
        Self {
            name: name.to_string(),
            status: TestStatus::Skip,
            duration: Duration::ZERO,
            groups: Vec::new(),
            stats: ErrorStats::new(),
            message: Some(reason),
        }
    }

    /// Groups with at least one violation.
    pub fn failing_groups(&self) -> impl Iterator<Item = &GroupCheck> {
        self.groups.iter().filter(|g| !g.passed())
    }

    /// Groups exempted from checking.
    pub fn exempted_groups(&self) -> impl Iterator<Item = &GroupCheck> {
        self.groups.iter().filter(|g| g.exempted)
    }
}

/// All scenarios run for one fixture.
#[derive(Debug, Clone, Serialize)]
pub struct StyleReport {
    /// Fixture name
    pub name: String,
    /// Style under test, e.g. `bond harmonic`
    pub style: String,
    /// Scenario outcomes in execution order
    pub scenarios: Vec<ScenarioOutcome>,
}

impl StyleReport {
    /// Create an empty report for a fixture.
    pub fn new(name: &str, style: &str) -> Self {
        Self {
            name: name.to_string(),
            style: style.to_string(),
            scenarios: Vec::new(),
        }
    }

    /// Fail if any scenario failed, skip if every scenario skipped.
    pub fn status(&self) -> TestStatus {
        if self.scenarios.iter().any(|s| s.status == TestStatus::Fail) {
            TestStatus::Fail
        } else if self.scenarios.iter().all(|s| s.status == TestStatus::Skip) {
            TestStatus::Skip
        } else {
            TestStatus::Pass
        }
    }
}

/// Aggregate report of a harness run
#[derive(Debug, Clone, Default, Serialize)]
pub struct TestReport {
    /// Scenarios run
    pub total: usize,
    /// Scenarios passed
    pub passed: usize,
    /// Scenarios failed
    pub failed: usize,
    /// Scenarios skipped
    pub skipped: usize,
    /// Total duration
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Per-fixture results
    pub styles: Vec<StyleReport>,
}

impl TestReport {
    /// Create a new empty report
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the results of one fixture
    pub fn add_style(&mut self, style: StyleReport) {
        for scenario in &style.scenarios {
            self.total += 1;
            match scenario.status {
                TestStatus::Pass => self.passed += 1,
                TestStatus::Fail => self.failed += 1,
                TestStatus::Skip => self.skipped += 1,
            }
        }
        self.styles.push(style);
    }

    /// Check if no scenario failed
    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    /// Convert to JSON string
    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    /// Convert to JUnit XML format
    pub fn to_junit_xml(&self) -> String {
        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        xml.push_str(&format!(
            "<testsuite name=\"style-tck\" tests=\"{}\" failures=\"{}\" errors=\"0\" skipped=\"{}\" time=\"{:.3}\">\n",
            self.total,
            self.failed,
            self.skipped,
            self.duration.as_secs_f64()
        ));

        for style in &self.styles {
            for scenario in &style.scenarios {
                xml.push_str(&format!(
                    "  <testcase classname=\"{}\" name=\"{}\" time=\"{:.3}\"",
                    escape_xml(&style.name),
                    escape_xml(&scenario.name),
                    scenario.duration.as_secs_f64()
                ));

                match scenario.status {
                    TestStatus::Pass => {
                        xml.push_str(" />\n");
                    }
                    TestStatus::Fail => {
                        xml.push_str(">\n");
                        let message = scenario.message.as_deref().unwrap_or("scenario failed");
                        xml.push_str(&format!(
                            "    <failure message=\"{}\">",
                            escape_xml(message)
                        ));
                        for violation in scenario.failing_groups().flat_map(|g| &g.violations) {
                            xml.push_str(&escape_xml(&violation.to_string()));
                            xml.push('\n');
                        }
                        xml.push_str("</failure>\n");
                        xml.push_str("  </testcase>\n");
                    }
                    TestStatus::Skip => {
                        xml.push_str(">\n");
                        match &scenario.message {
                            Some(reason) => xml.push_str(&format!(
                                "    <skipped message=\"{}\" />\n",
                                escape_xml(reason)
                            )),
                            None => xml.push_str("    <skipped />\n"),
                        }
                        xml.push_str("  </testcase>\n");
                    }
                }
            }
        }

        xml.push_str("</testsuite>\n");
        xml
    }

    /// Write the JSON form to a file
    pub fn write_json(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json())
            .with_context(|| format!("Failed to write JSON report {}", path.display()))
    }

    /// Write the JUnit form to a file
    pub fn write_junit(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_junit_xml())
            .with_context(|| format!("Failed to write JUnit report {}", path.display()))
    }

    /// Print human-readable summary
    pub fn print_summary(&self, print_stats: bool) {
        println!("\n=== style-tck Report ===\n");
        println!(
            "Total: {} | Passed: {} | Failed: {} | Skipped: {}",
            self.total, self.passed, self.failed, self.skipped
        );
        println!("Duration: {:.2}s\n", self.duration.as_secs_f64());

        for style in &self.styles {
            for scenario in &style.scenarios {
                let show_groups = print_stats || scenario.status == TestStatus::Fail;
                match scenario.status {
                    TestStatus::Pass if !print_stats => continue,
                    TestStatus::Skip => {
                        println!(
                            "  SKIP {} [{}] ({}): {}",
                            style.name,
                            scenario.name,
                            style.style,
                            scenario.message.as_deref().unwrap_or("")
                        );
                        continue;
                    }
                    status => println!(
                        "  {} {} [{}] ({})",
                        if status == TestStatus::Fail { "FAIL" } else { "PASS" },
                        style.name,
                        scenario.name,
                        style.style
                    ),
                }
                if let Some(message) = &scenario.message {
                    println!("    {}", message);
                }
                if !show_groups {
                    continue;
                }
                for group in &scenario.groups {
                    if group.exempted {
                        println!("    {:<32} exempted", group.group);
                    } else if print_stats || !group.passed() {
                        println!("    {:<32} {}", group.group, group.stats);
                    }
                    for violation in &group.violations {
                        println!("      {}", violation);
                    }
                }
            }
        }

        println!(
            "\nResult: {}",
            if self.all_passed() { "PASS" } else { "FAIL" }
        );
    }
}

/// Escape XML special characters
fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Durations serialize as milliseconds
mod duration_serde {
    use serde::{Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(name: &str, status: TestStatus) -> ScenarioOutcome {
        ScenarioOutcome {
            name: name.to_string(),
            status,
            duration: Duration::from_millis(3),
            groups: Vec::new(),
            stats: ErrorStats::new(),
            message: None,
        }
    }

    fn sample() -> TestReport {
        let mut harmonic = StyleReport::new("bond-harmonic", "bond harmonic");
        harmonic.scenarios.push(outcome("plain", TestStatus::Pass));
        harmonic.scenarios.push(ScenarioOutcome::skipped(
            "concurrent",
            "missing bond_style zero".to_string(),
        ));

        let mut morse = StyleReport::new("bond-morse", "bond morse");
        let mut failed = outcome("plain", TestStatus::Fail);
        failed.message = Some("atom count <mismatch>".to_string());
        morse.scenarios.push(failed);

        let mut report = TestReport::new();
        report.add_style(harmonic);
        report.add_style(morse);
        report
    }

    #[test]
    fn test_counts_and_status() {
        let report = sample();
        assert_eq!(report.total, 3);
        assert_eq!(report.passed, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.skipped, 1);
        assert!(!report.all_passed());
        assert_eq!(report.styles[0].status(), TestStatus::Pass);
        assert_eq!(report.styles[1].status(), TestStatus::Fail);
    }

    #[test]
    fn test_skip_only_is_not_failure() {
        let mut style = StyleReport::new("bond-zero", "bond zero");
        style
            .scenarios
            .push(ScenarioOutcome::skipped("plain", "missing".to_string()));
        assert_eq!(style.status(), TestStatus::Skip);
        let mut report = TestReport::new();
        report.add_style(style);
        assert!(report.all_passed());
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn test_junit_distinguishes_skip_and_failure() {
        let xml = sample().to_junit_xml();
        assert!(xml.contains("tests=\"3\" failures=\"1\" errors=\"0\" skipped=\"1\""));
        assert!(xml.contains("<skipped message=\"missing bond_style zero\" />"));
        assert!(xml.contains("<failure message=\"atom count &lt;mismatch&gt;\">"));
        assert_eq!(xml.matches("<testcase").count(), 3);
    }

    #[test]
    fn test_json_round_trips_through_serde_value() {
        let json = sample().to_json();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["failed"], 1);
        assert_eq!(value["styles"][0]["scenarios"][1]["status"], "Skip");
        assert_eq!(value["styles"][0]["scenarios"][0]["duration"], 3);
    }
}
