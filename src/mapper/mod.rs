use crate::core::{Finding, Framework, MappedFinding};

pub fn map_finding(finding: &Finding, framework: &Framework) -> MappedFinding {
    let table = &framework.table;
    let mut controls: Vec<String> = Vec::new();

    for finding_type in &finding.types {
        if let Some(ids) = table.controls_for_type(finding_type) {
            push_unique(&mut controls, ids);
        }
    }

    let title = finding.title.to_lowercase();
    if !title.is_empty() {
        for (keyword, ids) in table.title_keywords() {
            if title.contains(keyword) {
                push_unique(&mut controls, ids);
            }
        }
    }

    if controls.is_empty() {
        push_unique(&mut controls, table.default_controls());
    }

    MappedFinding {
        finding: finding.clone(),
        control_attribute: framework.control_attribute(),
        controls,
    }
}

pub fn map_findings(findings: &[Finding], framework: &Framework) -> Vec<MappedFinding> {
    findings
        .iter()
        .map(|finding| map_finding(finding, framework))
        .collect()
}

fn push_unique(controls: &mut Vec<String>, ids: &[String]) {
    for id in ids {
        if !controls.iter().any(|existing| existing == id) {
            controls.push(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MappingTable;
    use std::collections::BTreeMap;

    fn strings(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| (*s).to_string()).collect()
    }

    fn soc2() -> Framework {
        Framework {
            id: "SOC2".to_string(),
            name: "SOC 2".to_string(),
            standard_arn: "arn:aws:securityhub:::standards/aws-soc2".to_string(),
            description: String::new(),
            table: MappingTable::new(
                BTreeMap::from([
                    ("Software and Configuration Checks/AWS Security Best Practices".to_string(), strings(&["CC6.1", "CC6.3"])),
                    ("Effects".to_string(), strings(&["CC7.2", "CC7.1"])),
                ]),
                vec![
                    ("public".to_string(), strings(&["CC6.6", "CC6.1"])),
                    ("encryption".to_string(), strings(&["CC6.1", "CC6.7"])),
                ],
                BTreeMap::new(),
                strings(&["CC7.1"]),
            ),
        }
    }

    fn finding(title: &str, types: &[&str]) -> Finding {
        Finding {
            id: "f".to_string(),
            title: title.to_string(),
            description: String::new(),
            severity_label: "HIGH".to_string(),
            types: strings(types),
            account_id: String::new(),
            region: String::new(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn exact_type_match_yields_table_order() {
        let f = finding(
            "IAM root user has active keys",
            &["Software and Configuration Checks/AWS Security Best Practices"],
        );
        let mapped = map_finding(&f, &soc2());
        assert_eq!(mapped.controls, strings(&["CC6.1", "CC6.3"]));
        assert_eq!(mapped.control_attribute, "SOC2Controls");
    }

    #[test]
    fn type_match_is_verbatim_not_prefix() {
        let f = finding("nothing here", &["Software and Configuration Checks"]);
        assert_eq!(map_finding(&f, &soc2()).controls, strings(&["CC7.1"]));
    }

    #[test]
    fn title_keyword_is_case_insensitive_substring() {
        let f = finding("EBS volume lacks Encryption at rest", &[]);
        assert_eq!(map_finding(&f, &soc2()).controls, strings(&["CC6.1", "CC6.7"]));
    }

    #[test]
    fn type_matches_come_first_then_keywords_in_table_order() {
        let f = finding("Encryption disabled on public bucket", &["Effects"]);
        assert_eq!(
            map_finding(&f, &soc2()).controls,
            strings(&["CC7.2", "CC7.1", "CC6.6", "CC6.1", "CC6.7"])
        );
    }

    #[test]
    fn no_match_falls_back_to_default_controls() {
        let f = finding("Something unrelated", &["Unknown/Type"]);
        assert_eq!(map_finding(&f, &soc2()).controls, strings(&["CC7.1"]));
    }

    #[test]
    fn empty_title_and_types_degrade_to_default() {
        let f = finding("", &[]);
        assert_eq!(map_finding(&f, &soc2()).controls, strings(&["CC7.1"]));
    }

    #[test]
    fn mapping_is_deterministic_and_leaves_input_untouched() {
        let f = finding("public encryption", &["Effects"]);
        let before = f.clone();
        let fw = soc2();
        let first = map_finding(&f, &fw);
        for _ in 0..10 {
            assert_eq!(map_finding(&f, &fw), first);
        }
        assert_eq!(f, before);
        assert_eq!(first.finding, before);
    }
}
