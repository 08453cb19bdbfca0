use serde::{Deserialize, Serialize};

use crate::core::{Finding, Severity};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameworkStats {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl FrameworkStats {
    // Labels outside the four tiers (INFORMATIONAL included) only count toward `total`.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut stats = FrameworkStats {
            total: findings.len(),
            ..Default::default()
        };
        for finding in findings {
            match finding.severity() {
                Some(Severity::Critical) => stats.critical += 1,
                Some(Severity::High) => stats.high += 1,
                Some(Severity::Medium) => stats.medium += 1,
                Some(Severity::Low) => stats.low += 1,
                Some(Severity::Informational) | None => {}
            }
        }
        stats
    }

    pub fn bucketed(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }

    pub fn summary_line(&self) -> String {
        format!(
            "{} findings ({} critical, {} high, {} medium, {} low)",
            self.total, self.critical, self.high, self.medium, self.low
        )
    }
}
