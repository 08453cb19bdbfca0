use std::collections::BTreeMap;

use crate::core::{Finding, FrameworkStats};

pub type FindingsByFramework = BTreeMap<String, Vec<Finding>>;
pub type StatsByFramework = BTreeMap<String, FrameworkStats>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregated {
    pub findings: FindingsByFramework,
    pub stats: StatsByFramework,
}

impl Aggregated {
    pub fn is_empty(&self) -> bool {
        self.findings.values().all(Vec::is_empty)
    }

    pub fn frameworks_with_findings(&self) -> usize {
        self.findings.values().filter(|f| !f.is_empty()).count()
    }
}

// Every framework in `scope` gets a findings list and a stats entry, zeroed when absent from input.
pub fn aggregate<S: AsRef<str>>(scope: &[S], mut grouped: FindingsByFramework) -> Aggregated {
    let mut out = Aggregated::default();
    for id in scope {
        let id = id.as_ref();
        let findings = grouped.remove(id).unwrap_or_default();
        out.stats
            .insert(id.to_string(), FrameworkStats::from_findings(&findings));
        out.findings.insert(id.to_string(), findings);
    }
    for (id, findings) in grouped {
        out.stats
            .insert(id.clone(), FrameworkStats::from_findings(&findings));
        out.findings.insert(id, findings);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding(id: &str, severity: &str) -> Finding {
        Finding {
            id: id.to_string(),
            title: String::new(),
            description: String::new(),
            severity_label: severity.to_string(),
            types: vec![],
            account_id: String::new(),
            region: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn counts_each_tier_and_keeps_informational_in_total_only() {
        let grouped = BTreeMap::from([(
            "SOC2".to_string(),
            vec![
                finding("1", "CRITICAL"),
                finding("2", "HIGH"),
                finding("3", "HIGH"),
                finding("4", "MEDIUM"),
                finding("5", "LOW"),
                finding("6", "INFORMATIONAL"),
                finding("7", "high"),
            ],
        )]);
        let out = aggregate(&["SOC2"], grouped);
        let stats = out.stats["SOC2"];
        assert_eq!(stats.total, 7);
        assert_eq!(stats.critical, 1);
        assert_eq!(stats.high, 2);
        assert_eq!(stats.medium, 1);
        assert_eq!(stats.low, 1);
        assert!(stats.bucketed() <= stats.total);
    }

    #[test]
    fn frameworks_missing_from_input_get_zeroed_stats() {
        let out = aggregate(&["NIST800-53", "SOC2"], BTreeMap::new());
        assert!(out.is_empty());
        assert_eq!(out.stats.len(), 2);
        assert_eq!(out.stats["SOC2"], FrameworkStats::default());
        assert!(out.findings["NIST800-53"].is_empty());
    }

    #[test]
    fn aggregation_is_idempotent() {
        let grouped = BTreeMap::from([(
            "SOC2".to_string(),
            vec![finding("1", "LOW"), finding("2", "MEDIUM")],
        )]);
        let first = aggregate(&["SOC2"], grouped.clone());
        let second = aggregate(&["SOC2"], first.findings.clone());
        assert_eq!(first, second);
        assert_eq!(aggregate(&["SOC2"], grouped), first);
    }

    #[test]
    fn empty_input_is_all_zero_not_error() {
        let out = aggregate(&["SOC2"], BTreeMap::from([("SOC2".to_string(), vec![])]));
        assert_eq!(out.stats["SOC2"].total, 0);
        assert_eq!(out.frameworks_with_findings(), 0);
    }
}
