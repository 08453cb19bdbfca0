use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::core::FrameworkSection;

pub fn write_csv_files(dir: &Path, sections: &[FrameworkSection<'_>]) -> Result<Vec<PathBuf>> {
    let targets: Vec<&FrameworkSection<'_>> =
        sections.iter().filter(|s| !s.mapped.is_empty()).collect();
    if targets.is_empty() {
        return Ok(Vec::new());
    }

    std::fs::create_dir_all(dir)
        .with_context(|| format!("CSV出力先の作成に失敗しました: {}", dir.display()))?;

    let mut written = Vec::with_capacity(targets.len());
    for section in targets {
        let path = dir.join(section.framework.csv_file_name());
        std::fs::write(&path, section.csv.as_bytes())
            .with_context(|| format!("CSVの書き込みに失敗しました: {}", path.display()))?;
        tracing::info!(framework = %section.framework.id, path = %path.display(), "csv written");
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Finding, Framework, FrameworkStats, MappedFinding, MappingTable, Narrative,
        NarrativeOrigin,
    };
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn framework(id: &str) -> Framework {
        Framework {
            id: id.to_string(),
            name: id.to_string(),
            standard_arn: String::new(),
            description: String::new(),
            table: MappingTable::default(),
        }
    }

    fn section(framework: &Framework, findings: usize) -> FrameworkSection<'_> {
        let mapped = (0..findings)
            .map(|i| MappedFinding {
                finding: Finding {
                    id: format!("f-{i}"),
                    title: String::new(),
                    description: String::new(),
                    severity_label: "LOW".to_string(),
                    types: vec![],
                    account_id: String::new(),
                    region: String::new(),
                    attributes: BTreeMap::new(),
                },
                control_attribute: framework.control_attribute(),
                controls: vec!["X".to_string()],
            })
            .collect();
        FrameworkSection {
            framework,
            stats: FrameworkStats::default(),
            mapped,
            narrative: Narrative {
                text: String::new(),
                origin: NarrativeOrigin::NoFindings,
            },
            csv: format!("{}-csv", framework.id),
        }
    }

    #[test]
    fn writes_one_file_per_non_empty_framework() {
        static DIR_SEQ: AtomicU64 = AtomicU64::new(0);
        let seq = DIR_SEQ.fetch_add(1, Ordering::Relaxed);
        let dir = std::env::temp_dir().join(format!(
            "auditmail-artifacts-{}-{seq}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);

        let soc2 = framework("SOC2");
        let nist = framework("NIST800-53");
        let written =
            write_csv_files(&dir, &[section(&nist, 0), section(&soc2, 2)]).expect("write");
        assert_eq!(written, vec![dir.join("soc2_compliance_findings.csv")]);
        assert_eq!(
            std::fs::read_to_string(&written[0]).expect("read"),
            "SOC2-csv"
        );
        assert!(!dir.join("nist800-53_compliance_findings.csv").exists());
        let _ = std::fs::remove_dir_all(dir);
    }
}
