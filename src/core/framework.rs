use std::collections::BTreeMap;

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MappingTable {
    type_controls: BTreeMap<String, Vec<String>>,
    title_keywords: Vec<(String, Vec<String>)>,
    control_descriptions: BTreeMap<String, String>,
    default_controls: Vec<String>,
}

impl MappingTable {
    pub fn new(
        type_controls: BTreeMap<String, Vec<String>>,
        title_keywords: Vec<(String, Vec<String>)>,
        control_descriptions: BTreeMap<String, String>,
        default_controls: Vec<String>,
    ) -> Self {
        let title_keywords = title_keywords
            .into_iter()
            .map(|(keyword, controls)| (keyword.to_lowercase(), controls))
            .collect();
        Self {
            type_controls,
            title_keywords,
            control_descriptions,
            default_controls,
        }
    }

    pub fn controls_for_type(&self, finding_type: &str) -> Option<&[String]> {
        self.type_controls.get(finding_type).map(Vec::as_slice)
    }

    pub fn title_keywords(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.title_keywords
            .iter()
            .map(|(keyword, controls)| (keyword.as_str(), controls.as_slice()))
    }

    pub fn default_controls(&self) -> &[String] {
        &self.default_controls
    }

    pub fn describe(&self, control_id: &str) -> Option<&str> {
        self.control_descriptions.get(control_id).map(String::as_str)
    }

    pub fn referenced_controls(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self
            .type_controls
            .values()
            .chain(self.title_keywords.iter().map(|(_, controls)| controls))
            .chain(std::iter::once(&self.default_controls))
            .flatten()
            .map(String::as_str)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        ids
    }

    pub fn undescribed_controls(&self) -> Vec<&str> {
        self.referenced_controls()
            .into_iter()
            .filter(|id| !self.control_descriptions.contains_key(*id))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Framework {
    pub id: String,
    pub name: String,
    #[serde(rename = "arn")]
    pub standard_arn: String,
    pub description: String,
    #[serde(skip)]
    pub table: MappingTable,
}

impl Framework {
    pub fn control_attribute(&self) -> String {
        format!("{}Controls", self.id)
    }

    pub fn matches_id(&self, id: &str) -> bool {
        self.id.eq_ignore_ascii_case(id.trim())
    }

    pub fn csv_file_name(&self) -> String {
        format!("{}_compliance_findings.csv", self.id.to_lowercase())
    }
}
