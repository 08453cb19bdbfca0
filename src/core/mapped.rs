use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::core::Finding;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedFinding {
    pub finding: Finding,
    pub control_attribute: String,
    pub controls: Vec<String>,
}

impl MappedFinding {
    pub fn controls_label(&self) -> String {
        self.controls.join(", ")
    }
}

impl Serialize for MappedFinding {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let f = &self.finding;
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("Id", &f.id)?;
        map.serialize_entry("Title", &f.title)?;
        map.serialize_entry("Description", &f.description)?;
        map.serialize_entry("Severity", &f.severity_label)?;
        map.serialize_entry("Types", &f.types)?;
        map.serialize_entry("AccountId", &f.account_id)?;
        map.serialize_entry("Region", &f.region)?;
        if !f.attributes.is_empty() {
            map.serialize_entry("Attributes", &f.attributes)?;
        }
        map.serialize_entry(&self.control_attribute, &self.controls)?;
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn serializes_controls_under_framework_attribute() {
        let mapped = MappedFinding {
            finding: Finding {
                id: "f-1".to_string(),
                title: "t".to_string(),
                description: String::new(),
                severity_label: "LOW".to_string(),
                types: vec!["Policy".to_string()],
                account_id: String::new(),
                region: String::new(),
                attributes: BTreeMap::new(),
            },
            control_attribute: "SOC2Controls".to_string(),
            controls: vec!["CC1.2".to_string(), "CC1.3".to_string()],
        };
        let v = serde_json::to_value(&mapped).expect("serialize");
        assert_eq!(v["SOC2Controls"], serde_json::json!(["CC1.2", "CC1.3"]));
        assert_eq!(v["Id"], "f-1");
        assert!(v.get("Attributes").is_none());
        assert_eq!(mapped.controls_label(), "CC1.2, CC1.3");
    }
}
