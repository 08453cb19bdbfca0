use std::collections::BTreeMap;

use crate::core::MappedFinding;

const FAMILY_NAMES: &[(&str, &str)] = &[
    ("AC", "Access Control"),
    ("AT", "Awareness and Training"),
    ("AU", "Audit and Accountability"),
    ("CA", "Security Assessment and Authorization"),
    ("CM", "Configuration Management"),
    ("CP", "Contingency Planning"),
    ("IA", "Identification and Authentication"),
    ("IR", "Incident Response"),
    ("MA", "Maintenance"),
    ("MP", "Media Protection"),
    ("PE", "Physical and Environmental Protection"),
    ("PL", "Planning"),
    ("PM", "Program Management"),
    ("PS", "Personnel Security"),
    ("RA", "Risk Assessment"),
    ("SA", "System and Services Acquisition"),
    ("SC", "System and Communications Protection"),
    ("SI", "System and Information Integrity"),
];

// Families that carry continuous authorization (cATO).
pub const CATO_KEY_FAMILIES: &[&str] = &["AC", "AU", "CA", "CM", "SC", "SI"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FamilyBreakdown {
    pub code: String,
    pub name: String,
    pub findings: usize,
    pub controls: Vec<String>,
    pub cato_key: bool,
}

// "SI-4" -> "SI". Ids without an uppercase family prefix (e.g. "CC6.1") have no family.
pub fn control_family(control_id: &str) -> Option<&str> {
    let (prefix, rest) = control_id.trim().split_once('-')?;
    let is_code = (2..=3).contains(&prefix.len()) && prefix.chars().all(|c| c.is_ascii_uppercase());
    (is_code && !rest.is_empty()).then_some(prefix)
}

pub fn family_name(code: &str) -> String {
    FAMILY_NAMES
        .iter()
        .find(|(c, _)| *c == code)
        .map(|(_, name)| (*name).to_string())
        .unwrap_or_else(|| format!("Unknown Family ({code})"))
}

pub fn is_cato_key_family(code: &str) -> bool {
    CATO_KEY_FAMILIES.contains(&code)
}

// A finding counts once per family it touches. Sorted by findings, most first, then by code.
pub fn family_breakdown(mapped: &[MappedFinding]) -> Vec<FamilyBreakdown> {
    let mut by_family: BTreeMap<&str, (usize, Vec<&str>)> = BTreeMap::new();
    for m in mapped {
        let mut touched: Vec<&str> = Vec::new();
        for control in &m.controls {
            let Some(code) = control_family(control) else {
                continue;
            };
            let entry = by_family.entry(code).or_default();
            if !entry.1.contains(&control.as_str()) {
                entry.1.push(control.as_str());
            }
            if !touched.contains(&code) {
                touched.push(code);
                entry.0 += 1;
            }
        }
    }

    let mut out: Vec<FamilyBreakdown> = by_family
        .into_iter()
        .map(|(code, (findings, controls))| FamilyBreakdown {
            code: code.to_string(),
            name: family_name(code),
            findings,
            controls: controls.into_iter().map(str::to_string).collect(),
            cato_key: is_cato_key_family(code),
        })
        .collect();
    out.sort_by(|a, b| b.findings.cmp(&a.findings).then_with(|| a.code.cmp(&b.code)));
    out
}
