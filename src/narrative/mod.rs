use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::core::{
    Framework, FrameworkStats, MappedFinding, Narrative, NarrativeOrigin, family_breakdown,
};
use crate::oracle::{Oracle, OracleError};

pub const PROMPT_FINDINGS_CAP: usize = 20;
pub const DEFAULT_MAX_TOKENS: u32 = 1500;

pub const EXECUTIVE_SUMMARY: &str = "Executive Summary";
pub const KEY_RECOMMENDATIONS: &str = "Key Recommendations";
pub const AUDITORS_PERSPECTIVE: &str = "Auditor's Perspective";
pub const FRAMEWORK_COMPARISON: &str = "Framework Comparison";
pub const KEY_PRIORITIES: &str = "Key Priorities";
pub const STRATEGIC_ROADMAP: &str = "Strategic Roadmap";

#[derive(Debug, Clone, Copy)]
pub struct NarrativeOptions {
    pub max_tokens: u32,
    pub auditor_perspective: bool,
}

impl Default for NarrativeOptions {
    fn default() -> Self {
        Self {
            max_tokens: DEFAULT_MAX_TOKENS,
            auditor_perspective: false,
        }
    }
}

pub struct NarrativeBuilder<'a> {
    oracle: &'a dyn Oracle,
    options: NarrativeOptions,
}

pub fn impact_title(framework: &Framework) -> String {
    format!("{} Impact", framework.name)
}

pub fn no_findings_text(framework: &Framework) -> String {
    format!("No findings to analyze for {}.", framework.name)
}

pub fn framework_section_titles(framework: &Framework) -> Vec<String> {
    vec![
        EXECUTIVE_SUMMARY.to_string(),
        impact_title(framework),
        KEY_RECOMMENDATIONS.to_string(),
    ]
}

pub fn combined_section_titles() -> Vec<String> {
    [
        EXECUTIVE_SUMMARY,
        FRAMEWORK_COMPARISON,
        KEY_PRIORITIES,
        STRATEGIC_ROADMAP,
    ]
    .iter()
    .map(|s| (*s).to_string())
    .collect()
}

impl<'a> NarrativeBuilder<'a> {
    pub fn new(oracle: &'a dyn Oracle, options: NarrativeOptions) -> Self {
        Self { oracle, options }
    }

    pub fn build(
        &self,
        framework: &Framework,
        mapped: &[MappedFinding],
        stats: &FrameworkStats,
    ) -> Narrative {
        if mapped.is_empty() {
            return Narrative {
                text: no_findings_text(framework),
                origin: NarrativeOrigin::NoFindings,
            };
        }

        let prompt = framework_prompt(framework, mapped, stats);
        tracing::debug!(framework = %framework.id, prompt_bytes = prompt.len(), "requesting narrative");

        let titles = framework_section_titles(framework);
        let mut narrative = match self.ask(&prompt, &titles) {
            Ok(text) => Narrative {
                text,
                origin: NarrativeOrigin::Oracle,
            },
            Err(err) => {
                tracing::warn!(
                    framework = %framework.id,
                    kind = err.kind(),
                    error = %err,
                    "oracle failed; using fallback narrative"
                );
                Narrative {
                    text: fallback_framework_text(framework, stats),
                    origin: NarrativeOrigin::Fallback,
                }
            }
        };

        if self.options.auditor_perspective {
            let section = self.auditor_section(framework, mapped, stats);
            narrative.text.push_str("\n\n");
            narrative.text.push_str(&section);
        }
        narrative
    }

    pub fn build_combined(&self, entries: &[(&Framework, FrameworkStats)]) -> Narrative {
        let prompt = combined_prompt(entries);
        match self.ask(&prompt, &combined_section_titles()) {
            Ok(text) => Narrative {
                text,
                origin: NarrativeOrigin::Oracle,
            },
            Err(err) => {
                tracing::warn!(
                    framework = "combined",
                    kind = err.kind(),
                    error = %err,
                    "oracle failed; using fallback cross-framework narrative"
                );
                Narrative {
                    text: fallback_combined_text(entries),
                    origin: NarrativeOrigin::Fallback,
                }
            }
        }
    }

    fn ask(&self, prompt: &str, required_titles: &[String]) -> Result<String, OracleError> {
        let text = self.oracle.invoke(prompt, self.options.max_tokens)?;
        let text = text.trim().to_string();
        ensure_sections(&text, required_titles)?;
        Ok(text)
    }

    fn auditor_section(
        &self,
        framework: &Framework,
        mapped: &[MappedFinding],
        stats: &FrameworkStats,
    ) -> String {
        let prompt = auditor_prompt(framework, mapped, stats);
        match self.oracle.invoke(&prompt, self.options.max_tokens) {
            Ok(text) if !text.trim().is_empty() => {
                let body = strip_leading_heading(text.trim(), AUDITORS_PERSPECTIVE);
                format!("## {AUDITORS_PERSPECTIVE}\n\n{body}")
            }
            Ok(_) => {
                tracing::warn!(framework = %framework.id, kind = "malformed", "auditor perspective was empty; using fallback");
                fallback_auditor_text(framework, stats)
            }
            Err(err) => {
                tracing::warn!(
                    framework = %framework.id,
                    kind = err.kind(),
                    error = %err,
                    "oracle failed for auditor perspective; using fallback"
                );
                fallback_auditor_text(framework, stats)
            }
        }
    }
}

fn ensure_sections(text: &str, titles: &[String]) -> Result<(), OracleError> {
    if text.is_empty() {
        return Err(OracleError::Malformed("empty narrative".to_string()));
    }
    let lower = text.to_lowercase();
    let missing: Vec<&str> = titles
        .iter()
        .filter(|t| !lower.contains(&t.to_lowercase()))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(OracleError::Malformed(format!(
            "missing sections: {}",
            missing.join(", ")
        )))
    }
}

fn strip_leading_heading<'t>(text: &'t str, title: &str) -> &'t str {
    let Some(first) = text.lines().next() else {
        return text;
    };
    if first.trim_start().starts_with('#') && first.to_lowercase().contains(&title.to_lowercase()) {
        text[first.len()..].trim_start()
    } else {
        text
    }
}

pub fn control_breakdown(mapped: &[MappedFinding]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for m in mapped {
        *counts.entry(m.controls_label()).or_insert(0) += 1;
    }
    counts
}

fn write_stats(out: &mut String, stats: &FrameworkStats) {
    let _ = writeln!(out, "- Total findings: {}", stats.total);
    let _ = writeln!(out, "- Critical findings: {}", stats.critical);
    let _ = writeln!(out, "- High findings: {}", stats.high);
    let _ = writeln!(out, "- Medium findings: {}", stats.medium);
    let _ = writeln!(out, "- Low findings: {}", stats.low);
}

fn write_breakdown(out: &mut String, framework: &Framework, mapped: &[MappedFinding]) {
    let _ = writeln!(out, "Finding counts by {} control set:", framework.name);
    for (controls, count) in control_breakdown(mapped) {
        let _ = writeln!(out, "- {controls}: {count}");
    }
    let families = family_breakdown(mapped);
    if families.is_empty() {
        return;
    }
    let _ = writeln!(out, "Finding counts by control family:");
    for family in families {
        let key = if family.cato_key { " (cATO key family)" } else { "" };
        let _ = writeln!(out, "- {} {}: {}{key}", family.code, family.name, family.findings);
    }
}

pub fn framework_prompt(
    framework: &Framework,
    mapped: &[MappedFinding],
    stats: &FrameworkStats,
) -> String {
    let name = &framework.name;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are a {name} compliance expert analyzing cloud security findings."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Statistics of the findings:");
    write_stats(&mut out, stats);
    let _ = writeln!(out);

    let shown = mapped.len().min(PROMPT_FINDINGS_CAP);
    let _ = writeln!(
        out,
        "Top findings mapped to {name} controls ({shown} of {}), one JSON object per line:",
        mapped.len()
    );
    for m in mapped.iter().take(PROMPT_FINDINGS_CAP) {
        let line = serde_json::to_string(m).unwrap_or_else(|_| format!("{{\"Id\":\"{}\"}}", m.finding.id));
        let _ = writeln!(out, "{line}");
    }
    let _ = writeln!(out);
    write_breakdown(&mut out, framework, mapped);
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "Write a concise analysis in Markdown using exactly these level-2 headings, in this order:"
    );
    let _ = writeln!(
        out,
        "## {EXECUTIVE_SUMMARY} - a brief overview of the security posture"
    );
    let _ = writeln!(
        out,
        "## {} - how these findings affect {name} compliance",
        impact_title(framework)
    );
    let _ = writeln!(
        out,
        "## {KEY_RECOMMENDATIONS} - the top 3-5 actions for the most critical issues"
    );
    let _ = writeln!(out);
    let _ = write!(
        out,
        "Keep the response under 1000 words and focus on actionable insights."
    );
    out
}

pub fn auditor_prompt(
    framework: &Framework,
    mapped: &[MappedFinding],
    stats: &FrameworkStats,
) -> String {
    let name = &framework.name;
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are a seasoned {name} auditor with more than 15 years of experience."
    );
    let _ = writeln!(
        out,
        "Write your perspective, in the first person, on the following cloud security findings."
    );
    let _ = writeln!(out);
    write_stats(&mut out, stats);
    let _ = writeln!(out);
    write_breakdown(&mut out, framework, mapped);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Evaluate their severity in the context of a {name} audit, explain how they would affect different types of {name} assessments, give remediation and mitigation advice that would satisfy an auditor, and offer a professional opinion on the timeline and effort needed before an audit."
    );
    let _ = write!(
        out,
        "Sound authoritative but constructive. Keep it under 500 words and do not add a heading."
    );
    out
}

pub fn combined_prompt(entries: &[(&Framework, FrameworkStats)]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "You are a compliance expert analyzing cloud security findings across multiple compliance frameworks."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Summary of findings per framework:");
    for (framework, stats) in entries {
        let _ = writeln!(out, "- {}: {}", framework.name, stats.summary_line());
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Write a concise cross-framework analysis in Markdown using exactly these level-2 headings, in this order:"
    );
    let _ = writeln!(
        out,
        "## {EXECUTIVE_SUMMARY} - a brief overview of the overall security posture"
    );
    let _ = writeln!(
        out,
        "## {FRAMEWORK_COMPARISON} - how compliance issues overlap and differ across frameworks"
    );
    let _ = writeln!(
        out,
        "## {KEY_PRIORITIES} - the top 3-5 actions with the greatest impact across frameworks"
    );
    let _ = writeln!(
        out,
        "## {STRATEGIC_ROADMAP} - an approach that satisfies multiple frameworks efficiently"
    );
    let _ = writeln!(out);
    let _ = write!(
        out,
        "Keep the response under 1500 words and focus on actionable insights."
    );
    out
}

pub fn fallback_framework_text(framework: &Framework, stats: &FrameworkStats) -> String {
    let name = &framework.name;
    let mut out = String::new();
    let _ = writeln!(out, "## {EXECUTIVE_SUMMARY}");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{} {name} findings were reported for this period: {} critical, {} high, {} medium and {} low.",
        stats.total, stats.critical, stats.high, stats.medium, stats.low
    );
    let other = stats.total.saturating_sub(stats.bucketed());
    if other > 0 {
        let _ = writeln!(
            out,
            "{other} findings carry another severity label (such as INFORMATIONAL) and appear in the total only."
        );
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "## {}", impact_title(framework));
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Each finding is mapped to one or more {name} controls. The attached CSV lists the controls for every finding."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "## {KEY_RECOMMENDATIONS}");
    let _ = writeln!(out);
    if stats.critical > 0 {
        let _ = writeln!(
            out,
            "- Remediate the {} critical findings immediately.",
            stats.critical
        );
    }
    if stats.high > 0 {
        let _ = writeln!(
            out,
            "- Schedule remediation of the {} high findings.",
            stats.high
        );
    }
    if stats.medium + stats.low > 0 {
        let _ = writeln!(
            out,
            "- Track the {} medium and low findings through regular change management.",
            stats.medium + stats.low
        );
    }
    let _ = write!(
        out,
        "- Please review the attached CSV for details on all findings."
    );
    out
}

fn fallback_auditor_text(framework: &Framework, stats: &FrameworkStats) -> String {
    format!(
        "## {AUDITORS_PERSPECTIVE}\n\nAn automated auditor assessment was not available for this report. \
Based on the counts alone, {} critical and {} high findings would require documented remediation \
or compensating controls before a {} assessment.",
        stats.critical, stats.high, framework.name
    )
}

pub fn fallback_combined_text(entries: &[(&Framework, FrameworkStats)]) -> String {
    let total: usize = entries.iter().map(|(_, s)| s.total).sum();
    let critical: usize = entries.iter().map(|(_, s)| s.critical).sum();
    let high: usize = entries.iter().map(|(_, s)| s.high).sum();

    let mut out = String::new();
    let _ = writeln!(out, "## {EXECUTIVE_SUMMARY}");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "This report covers {} compliance frameworks with {total} findings in total.",
        entries.len()
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "## {FRAMEWORK_COMPARISON}");
    let _ = writeln!(out);
    for (framework, stats) in entries {
        let _ = writeln!(out, "- {}: {}", framework.name, stats.summary_line());
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "## {KEY_PRIORITIES}");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "- Address the {critical} critical and {high} high findings first; they affect every framework listed above."
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "## {STRATEGIC_ROADMAP}");
    let _ = writeln!(out);
    let _ = write!(
        out,
        "Please review the framework-specific sections and attached CSVs for details on all findings."
    );
    out
}
