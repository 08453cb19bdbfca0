use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::core::Severity;

pub const RESOURCE_ID_ATTRIBUTE: &str = "ResourceId";
pub const UNKNOWN_RESOURCE: &str = "Unknown";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Finding {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "Severity")]
    pub severity_label: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub account_id: String,
    #[serde(default)]
    pub region: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

impl Finding {
    pub fn severity(&self) -> Option<Severity> {
        Severity::from_label(&self.severity_label)
    }

    pub fn resource_id(&self) -> &str {
        self.attributes
            .get(RESOURCE_ID_ATTRIBUTE)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or(UNKNOWN_RESOURCE)
    }
}
