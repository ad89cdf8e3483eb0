use serde::Serialize;

/// How bad a verification mismatch is.
///
/// `Critical` means the persisted value cannot be explained by rounding or
/// boundary effects; a formula or logic divergence. `Warning` covers
/// small numeric drift and cadence irregularities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
}

/// One mismatch between a persisted aggregate and its recomputation.
#[derive(Debug, Clone, Serialize)]
pub struct Discrepancy {
    pub severity: Severity,
    pub table: String,
    pub entity_id: i64,
    pub period_key: String,
    pub metric: String,
    pub expected: String,
    pub actual: String,
    pub detail: String,
}

impl Discrepancy {
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

/// The outcome of an audit pass; mismatches are findings, not errors.
#[derive(Debug, Clone, Serialize)]
pub struct AuditSummary {
    pub overall_passed: bool,
    pub critical_failures: usize,
    pub warnings: usize,
    pub issues_found: Vec<Discrepancy>,
}

impl AuditSummary {
    pub fn from_issues(issues: Vec<Discrepancy>) -> Self {
        let critical_failures = issues.iter().filter(|i| i.is_critical()).count();
        let warnings = issues.len() - critical_failures;
        Self {
            overall_passed: critical_failures == 0,
            critical_failures,
            warnings,
            issues_found: issues,
        }
    }

    /// Exit-code convention for CI gates: 0 pass, 1 critical, 2 warnings.
    pub fn exit_code(&self) -> i32 {
        if self.critical_failures > 0 {
            1
        } else if self.warnings > 0 {
            2
        } else {
            0
        }
    }

    /// Fold another summary into this one (used by backfill audits).
    pub fn merge(&mut self, other: AuditSummary) {
        self.critical_failures += other.critical_failures;
        self.warnings += other.warnings;
        self.overall_passed = self.overall_passed && other.overall_passed;
        self.issues_found.extend(other.issues_found);
    }
}
