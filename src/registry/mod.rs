use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;

use crate::core::{Framework, MappingTable};

const BUILTIN_FRAMEWORKS: &str = include_str!("../../data/frameworks.json");
const BUILTIN_MAPPINGS: &[(&str, &str)] = &[
    (
        "mappings/soc2_mappings.json",
        include_str!("../../data/mappings/soc2_mappings.json"),
    ),
    (
        "mappings/nist800_53_mappings.json",
        include_str!("../../data/mappings/nist800_53_mappings.json"),
    ),
];

pub const ALL_FRAMEWORKS: &str = "all";

#[derive(Debug, Deserialize)]
struct RawRegistry {
    frameworks: Vec<RawFramework>,
}

#[derive(Debug, Deserialize)]
struct RawFramework {
    id: String,
    name: String,
    arn: String,
    #[serde(default)]
    description: String,
    mappings_file: String,
}

#[derive(Debug, Deserialize)]
struct RawMappingTable {
    #[serde(default)]
    type_mappings: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    title_mappings: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    control_descriptions: BTreeMap<String, String>,
    #[serde(default)]
    default_controls: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FrameworkRegistry {
    frameworks: Vec<Framework>,
}

impl FrameworkRegistry {
    pub fn builtin() -> Result<Self> {
        Self::parse(BUILTIN_FRAMEWORKS, |file| {
            BUILTIN_MAPPINGS
                .iter()
                .find(|(name, _)| *name == file)
                .map(|(_, contents)| (*contents).to_string())
                .ok_or_else(|| anyhow!("組み込みマッピング表が見つかりません: {file}"))
        })
    }

    pub fn load_dir(dir: &Path) -> Result<Self> {
        let registry_path = dir.join("frameworks.json");
        let s = std::fs::read_to_string(&registry_path).with_context(|| {
            format!(
                "フレームワーク定義の読み取りに失敗しました: {}",
                registry_path.display()
            )
        })?;
        Self::parse(&s, |file| {
            let path: PathBuf = dir.join(file);
            std::fs::read_to_string(&path).with_context(|| {
                format!("マッピング表の読み取りに失敗しました: {}", path.display())
            })
        })
    }

    pub fn load(dir: Option<&Path>) -> Result<Self> {
        match dir {
            Some(dir) => Self::load_dir(dir),
            None => Self::builtin(),
        }
    }

    fn parse(registry_json: &str, read_mapping: impl Fn(&str) -> Result<String>) -> Result<Self> {
        let raw: RawRegistry = serde_json::from_str(registry_json)
            .context("フレームワーク定義(JSON)の解析に失敗しました")?;

        let mut frameworks: Vec<Framework> = Vec::with_capacity(raw.frameworks.len());
        for fw in raw.frameworks {
            let id = fw.id.trim().to_string();
            if id.is_empty() {
                return Err(anyhow!("フレームワーク ID が空です"));
            }
            if id.eq_ignore_ascii_case(ALL_FRAMEWORKS) {
                return Err(anyhow!("フレームワーク ID に予約語は使えません: {id}"));
            }
            if frameworks.iter().any(|existing| existing.matches_id(&id)) {
                return Err(anyhow!("フレームワーク ID が重複しています: {id}"));
            }

            let contents = read_mapping(&fw.mappings_file)?;
            let table = parse_mapping_table(&contents)
                .with_context(|| format!("マッピング表が不正です: {} ({id})", fw.mappings_file))?;

            let undescribed = table.undescribed_controls();
            if !undescribed.is_empty() {
                tracing::warn!(
                    framework = %id,
                    controls = ?undescribed,
                    "mapping table references controls without descriptions"
                );
            }

            frameworks.push(Framework {
                id,
                name: fw.name,
                standard_arn: fw.arn,
                description: fw.description,
                table,
            });
        }

        if frameworks.is_empty() {
            return Err(anyhow!("フレームワークが1つも定義されていません"));
        }

        Ok(Self { frameworks })
    }

    pub fn frameworks(&self) -> &[Framework] {
        &self.frameworks
    }

    pub fn get(&self, id: &str) -> Option<&Framework> {
        self.frameworks.iter().find(|fw| fw.matches_id(id))
    }

    // Scope is always ordered by framework id so every downstream artifact is deterministic.
    pub fn resolve_scope(&self, selector: &str) -> Result<Vec<&Framework>> {
        let selector = selector.trim();
        let mut scope: Vec<&Framework> = if selector.eq_ignore_ascii_case(ALL_FRAMEWORKS) {
            self.frameworks.iter().collect()
        } else {
            let fw = self.get(selector).ok_or_else(|| {
                crate::exit::configuration(format!(
                    "未知のフレームワークです: {selector}（利用可能: {}）",
                    self.ids().join(", ")
                ))
            })?;
            vec![fw]
        };
        scope.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(scope)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.frameworks.iter().map(|fw| fw.id.as_str()).collect()
    }
}

fn parse_mapping_table(contents: &str) -> Result<MappingTable> {
    let raw: RawMappingTable =
        serde_json::from_str(contents).context("マッピング表(JSON)の解析に失敗しました")?;

    let mut title_keywords = Vec::with_capacity(raw.title_mappings.len());
    for (keyword, value) in raw.title_mappings {
        let controls: Vec<String> = serde_json::from_value(value)
            .with_context(|| format!("title_mappings.{keyword} は文字列の配列である必要があります"))?;
        if keyword.trim().is_empty() {
            return Err(anyhow!("title_mappings に空のキーワードがあります"));
        }
        title_keywords.push((keyword, controls));
    }

    if raw.default_controls.is_empty() {
        return Err(anyhow!("default_controls が空です"));
    }

    Ok(MappingTable::new(
        raw.type_mappings,
        title_keywords,
        raw.control_descriptions,
        raw.default_controls,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exit::{ExitCode, error_kind};

    #[test]
    fn builtin_registry_loads_soc2_and_nist() {
        let registry = FrameworkRegistry::builtin().expect("builtin registry");
        assert_eq!(registry.ids(), vec!["SOC2", "NIST800-53"]);
        let soc2 = registry.get("soc2").expect("soc2");
        assert_eq!(soc2.table.default_controls(), ["CC7.1".to_string()]);
        assert!(soc2.table.undescribed_controls().is_empty());
    }

    #[test]
    fn title_keywords_keep_declaration_order() {
        let registry = FrameworkRegistry::builtin().expect("builtin registry");
        let soc2 = registry.get("SOC2").expect("soc2");
        let keywords: Vec<&str> = soc2.table.title_keywords().map(|(k, _)| k).take(3).collect();
        assert_eq!(keywords, vec!["password", "encryption", "access"]);
    }

    #[test]
    fn scope_all_is_sorted_by_id() {
        let registry = FrameworkRegistry::builtin().expect("builtin registry");
        let scope = registry.resolve_scope("ALL").expect("scope");
        let ids: Vec<&str> = scope.iter().map(|fw| fw.id.as_str()).collect();
        assert_eq!(ids, vec!["NIST800-53", "SOC2"]);
    }

    #[test]
    fn unknown_framework_is_configuration_error() {
        let registry = FrameworkRegistry::builtin().expect("builtin registry");
        let err = registry.resolve_scope("FOO").expect_err("unknown id");
        assert_eq!(error_kind(&err), ExitCode::Configuration);
    }

    #[test]
    fn duplicate_ids_are_rejected_case_insensitively() {
        let registry = r#"{"frameworks":[
            {"id":"SOC2","name":"a","arn":"x","mappings_file":"m.json"},
            {"id":"soc2","name":"b","arn":"y","mappings_file":"m.json"}]}"#;
        let mapping = r#"{"default_controls":["CC7.1"]}"#;
        let err = FrameworkRegistry::parse(registry, |_| Ok(mapping.to_string()))
            .expect_err("duplicate");
        assert!(err.to_string().contains("重複"), "err={err}");
    }

    #[test]
    fn malformed_title_mapping_is_rejected() {
        let err = parse_mapping_table(r#"{"title_mappings":{"tls":"SC-8"},"default_controls":["SI-4"]}"#)
            .expect_err("string instead of list");
        assert!(format!("{err:#}").contains("title_mappings.tls"), "err={err:#}");
    }

    #[test]
    fn empty_default_controls_is_rejected() {
        assert!(parse_mapping_table(r#"{"type_mappings":{}}"#).is_err());
    }
}
