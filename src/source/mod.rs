use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use walkdir::WalkDir;

use crate::core::{Finding, Framework, RESOURCE_ID_ATTRIBUTE, TimeWindow};

pub const RESOURCE_TYPE_ATTRIBUTE: &str = "ResourceType";
pub const STANDARDS_ARN_ATTRIBUTE: &str = "StandardsArn";
pub const UPDATED_AT_ATTRIBUTE: &str = "UpdatedAt";

pub trait FindingsSource {
    fn get_findings(
        &self,
        window: &TimeWindow,
        framework: Option<&Framework>,
    ) -> Result<Vec<Finding>>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AsffFinding {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    severity: AsffSeverity,
    #[serde(default)]
    types: Vec<String>,
    #[serde(default)]
    aws_account_id: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    resources: Vec<AsffResource>,
    #[serde(default)]
    compliance: AsffCompliance,
    #[serde(default)]
    workflow: AsffWorkflow,
    #[serde(default)]
    record_state: String,
    #[serde(default)]
    updated_at: String,
    #[serde(default)]
    product_fields: BTreeMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AsffSeverity {
    #[serde(default)]
    label: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AsffResource {
    #[serde(default, rename = "Type")]
    kind: String,
    #[serde(default)]
    id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AsffCompliance {
    #[serde(default)]
    status: String,
    #[serde(default)]
    associated_standards: Vec<AsffStandard>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AsffStandard {
    #[serde(default)]
    standards_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AsffWorkflow {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AsffDocument {
    Envelope {
        #[serde(rename = "Findings")]
        findings: Vec<AsffFinding>,
    },
    Bare(Vec<AsffFinding>),
}

impl AsffDocument {
    fn into_findings(self) -> Vec<AsffFinding> {
        match self {
            AsffDocument::Envelope { findings } | AsffDocument::Bare(findings) => findings,
        }
    }
}

impl AsffFinding {
    fn updated_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::parse(self.updated_at.trim(), &Rfc3339).ok()
    }

    fn standards(&self) -> impl Iterator<Item = &str> {
        self.product_fields
            .get(STANDARDS_ARN_ATTRIBUTE)
            .map(String::as_str)
            .into_iter()
            .chain(
                self.compliance
                    .associated_standards
                    .iter()
                    .map(|s| s.standards_id.as_str()),
            )
            .filter(|s| !s.is_empty())
    }

    fn is_open_failure(&self) -> bool {
        self.compliance.status.eq_ignore_ascii_case("FAILED")
            && self.record_state.eq_ignore_ascii_case("ACTIVE")
            && self.workflow.status.eq_ignore_ascii_case("NEW")
    }

    fn belongs_to(&self, framework: &Framework) -> bool {
        self.standards()
            .any(|candidate| standard_matches(&framework.standard_arn, candidate))
    }

    fn into_finding(self) -> Finding {
        let mut attributes = BTreeMap::new();
        if let Some(resource) = self.resources.first() {
            if !resource.id.is_empty() {
                attributes.insert(RESOURCE_ID_ATTRIBUTE.to_string(), resource.id.clone());
            }
            if !resource.kind.is_empty() {
                attributes.insert(RESOURCE_TYPE_ATTRIBUTE.to_string(), resource.kind.clone());
            }
        }
        if let Some(arn) = self.standards().next() {
            attributes.insert(STANDARDS_ARN_ATTRIBUTE.to_string(), arn.to_string());
        }
        if !self.updated_at.is_empty() {
            attributes.insert(UPDATED_AT_ATTRIBUTE.to_string(), self.updated_at.clone());
        }
        Finding {
            id: self.id,
            title: self.title,
            description: self.description,
            severity_label: self.severity.label,
            types: self.types,
            account_id: self.aws_account_id,
            region: self.region,
            attributes,
        }
    }
}

// StandardsId values are the ARN's resource part, e.g. "standards/nist-800-53/v/5.0.0".
fn standard_matches(framework_arn: &str, candidate: &str) -> bool {
    let arn = framework_arn.trim();
    let candidate = candidate.trim();
    if arn.is_empty() || candidate.is_empty() {
        return false;
    }
    arn == candidate || arn.ends_with(&format!(":{candidate}"))
}

#[derive(Debug, Clone)]
pub struct AsffExportSource {
    path: PathBuf,
}

impl AsffExportSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn files(&self) -> Result<Vec<PathBuf>> {
        let meta = fs::metadata(&self.path)
            .with_context(|| format!("所見のエクスポートが見つかりません: {}", self.path.display()))?;
        if meta.is_file() {
            return Ok(vec![self.path.clone()]);
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.path)
            .follow_links(false)
            .sort_by_file_name();
        for entry in walker {
            let entry = entry
                .with_context(|| format!("所見のエクスポートの走査に失敗しました: {}", self.path.display()))?;
            let is_json = entry
                .path()
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
            if entry.file_type().is_file() && is_json {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    fn read_file(path: &Path) -> Result<Vec<AsffFinding>> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("所見ファイルの読み取りに失敗しました: {}", path.display()))?;
        let doc: AsffDocument = serde_json::from_str(&raw)
            .with_context(|| format!("ASFF 形式の所見ファイルではありません: {}", path.display()))?;
        Ok(doc.into_findings())
    }
}

impl FindingsSource for AsffExportSource {
    fn get_findings(
        &self,
        window: &TimeWindow,
        framework: Option<&Framework>,
    ) -> Result<Vec<Finding>> {
        let mut latest: BTreeMap<String, (OffsetDateTime, AsffFinding)> = BTreeMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut scanned = 0usize;

        for file in self.files()? {
            for raw in Self::read_file(&file)? {
                scanned += 1;
                if raw.id.is_empty() || !raw.is_open_failure() {
                    continue;
                }
                let Some(updated_at) = raw.updated_at() else {
                    tracing::debug!(id = %raw.id, "skipping finding without a valid UpdatedAt");
                    continue;
                };
                if !window.contains(updated_at) {
                    continue;
                }
                if framework.is_some_and(|fw| !raw.belongs_to(fw)) {
                    continue;
                }
                match latest.get(&raw.id) {
                    Some((seen, _)) if *seen >= updated_at => {}
                    Some(_) => {
                        latest.insert(raw.id.clone(), (updated_at, raw));
                    }
                    None => {
                        order.push(raw.id.clone());
                        latest.insert(raw.id.clone(), (updated_at, raw));
                    }
                }
            }
        }

        let findings: Vec<Finding> = order
            .into_iter()
            .filter_map(|id| latest.remove(&id))
            .map(|(_, raw)| raw.into_finding())
            .collect();
        tracing::info!(
            path = %self.path.display(),
            framework = framework.map(|f| f.id.as_str()).unwrap_or("any"),
            scanned,
            matched = findings.len(),
            "read findings export"
        );
        Ok(findings)
    }
}
