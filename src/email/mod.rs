mod html;
mod mime;

use std::fmt::Write as _;

use serde::Serialize;
use time::OffsetDateTime;
use time::macros::format_description;

use crate::core::{FrameworkSection, FrameworkStats, Report, family_breakdown};

pub use html::{escape, markdown_to_html};
pub use mime::encode_header;

pub const CSV_CONTENT_TYPE: &str = "text/csv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    #[serde(skip)]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub subject: String,
    #[serde(skip)]
    pub html_body: String,
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn to_mime(&self, from: &str, to: &str, boundary: &str) -> String {
        mime::render(self, from, to, boundary)
    }
}

const STYLE: &str = "body { font-family: Arial, sans-serif; margin: 20px; }
h1, h2, h3 { color: #232f3e; }
.summary { background-color: #f8f8f8; padding: 15px; border-radius: 5px; }
.combined { background-color: #f0f7ff; padding: 20px; border-left: 5px solid #0073bb; border-radius: 5px; }
.critical { color: #d13212; }
.high { color: #ff9900; }
.medium { color: #d9b43c; }
table.controls { border-collapse: collapse; }
table.controls td, table.controls th { border: 1px solid #ddd; padding: 4px 8px; text-align: left; }";

fn report_date(at: OffsetDateTime) -> String {
    at.format(format_description!("[year]-[month]-[day]"))
        .unwrap_or_else(|_| at.date().to_string())
}

fn report_timestamp(at: OffsetDateTime) -> String {
    at.format(format_description!(
        "[year]-[month]-[day] [hour]:[minute]:[second]"
    ))
    .unwrap_or_else(|_| at.to_string())
}

pub fn subject(report: &Report) -> String {
    let date = report_date(report.generated_at);
    match report.sections.as_slice() {
        [only] => format!("{} Compliance Report — {date}", only.framework.name),
        _ => format!("Multi-Framework Compliance Report — {date}"),
    }
}

fn anchor(id: &str) -> String {
    let slug: String = id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    format!("fw-{slug}")
}

fn stats_block(out: &mut String, stats: &FrameworkStats) {
    out.push_str("<div class=\"summary\">\n");
    let _ = writeln!(out, "<p><strong>Total Findings:</strong> {}</p>", stats.total);
    let _ = writeln!(
        out,
        "<p><strong class=\"critical\">Critical:</strong> {}</p>",
        stats.critical
    );
    let _ = writeln!(out, "<p><strong class=\"high\">High:</strong> {}</p>", stats.high);
    let _ = writeln!(
        out,
        "<p><strong class=\"medium\">Medium:</strong> {}</p>",
        stats.medium
    );
    let _ = writeln!(out, "<p><strong>Low:</strong> {}</p>", stats.low);
    out.push_str("</div>\n");
}

fn referenced_controls<'s>(section: &'s FrameworkSection<'_>) -> Vec<&'s str> {
    let mut ids: Vec<&str> = Vec::new();
    for m in &section.mapped {
        for control in &m.controls {
            if !ids.contains(&control.as_str()) {
                ids.push(control.as_str());
            }
        }
    }
    ids
}

fn control_table(out: &mut String, section: &FrameworkSection<'_>) {
    let controls = referenced_controls(section);
    if controls.is_empty() {
        return;
    }
    let name = escape(&section.framework.name);
    let _ = writeln!(out, "<h3>Referenced {name} Controls</h3>");
    out.push_str("<table class=\"controls\">\n<tr><th>Control</th><th>Description</th></tr>\n");
    for id in controls {
        let description = section.framework.table.describe(id).unwrap_or("");
        let _ = writeln!(
            out,
            "<tr><td>{}</td><td>{}</td></tr>",
            escape(id),
            escape(description)
        );
    }
    out.push_str("</table>\n");
}

fn family_table(out: &mut String, section: &FrameworkSection<'_>) {
    let families = family_breakdown(&section.mapped);
    if families.is_empty() {
        return;
    }
    let name = escape(&section.framework.name);
    let _ = writeln!(out, "<h3>{name} Control Families</h3>");
    out.push_str(
        "<table class=\"controls\">\n<tr><th>Family</th><th>Findings</th><th>Controls</th><th>cATO Key</th></tr>\n",
    );
    for family in families {
        let _ = writeln!(
            out,
            "<tr><td>{} ({})</td><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape(&family.name),
            escape(&family.code),
            family.findings,
            escape(&family.controls.join(", ")),
            if family.cato_key { "Yes" } else { "" }
        );
    }
    out.push_str("</table>\n");
}

fn framework_section(out: &mut String, section: &FrameworkSection<'_>) {
    let name = escape(&section.framework.name);
    let _ = writeln!(
        out,
        "<div class=\"framework\" id=\"{}\">",
        anchor(&section.framework.id)
    );
    let _ = writeln!(out, "<h2>{name}</h2>");
    stats_block(out, &section.stats);
    out.push_str("<div class=\"analysis\">\n");
    out.push_str(&markdown_to_html(&section.narrative.text));
    out.push_str("</div>\n");
    control_table(out, section);
    family_table(out, section);
    if !section.mapped.is_empty() {
        let _ = writeln!(
            out,
            "<p>A detailed CSV report is attached with all findings mapped to {name} controls.</p>"
        );
    }
    out.push_str("</div>\n");
}

fn html_body(report: &Report) -> String {
    let multi = report.sections.len() > 1;
    let title = if multi {
        "Multi-Framework Compliance Report".to_string()
    } else {
        report
            .sections
            .first()
            .map(|s| format!("{} Compliance Report", s.framework.name))
            .unwrap_or_else(|| "Compliance Report".to_string())
    };

    let mut out = String::new();
    out.push_str("<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n");
    out.push_str(STYLE);
    out.push_str("\n</style>\n</head>\n<body>\n");
    let _ = writeln!(out, "<h1>{}</h1>", escape(&title));
    let _ = writeln!(
        out,
        "<p>Report generated on {} UTC for findings updated between {}.</p>",
        report_timestamp(report.generated_at),
        escape(&report.window.describe())
    );

    if multi {
        out.push_str("<ul class=\"nav\">\n");
        for section in &report.sections {
            let _ = writeln!(
                out,
                "<li><a href=\"#{}\">{}</a></li>",
                anchor(&section.framework.id),
                escape(&section.framework.name)
            );
        }
        out.push_str("</ul>\n");
    }

    if let Some(combined) = report.combined.as_ref().filter(|_| multi) {
        out.push_str("<div class=\"combined\" id=\"combined\">\n");
        out.push_str("<h2>Cross-Framework Analysis</h2>\n");
        out.push_str(&markdown_to_html(&combined.text));
        out.push_str("</div>\n<hr>\n");
    }

    for (i, section) in report.sections.iter().enumerate() {
        if i > 0 {
            out.push_str("<hr>\n");
        }
        framework_section(&mut out, section);
    }
    out.push_str("</body>\n</html>\n");
    out
}

pub fn compose(report: &Report) -> Message {
    let attachments = report
        .sections
        .iter()
        .filter(|s| !s.mapped.is_empty())
        .map(|s| Attachment {
            file_name: s.framework.csv_file_name(),
            content_type: CSV_CONTENT_TYPE.to_string(),
            data: s.csv.as_bytes().to_vec(),
        })
        .collect();

    Message {
        subject: subject(report),
        html_body: html_body(report),
        attachments,
    }
}

pub fn compose_test_message(now: OffsetDateTime) -> Message {
    let mut html = String::new();
    html.push_str("<html>\n<head>\n<meta charset=\"utf-8\">\n<style>\n");
    html.push_str(STYLE);
    html.push_str("\n</style>\n</head>\n<body>\n");
    html.push_str("<h1>Compliance Report Configuration Test</h1>\n");
    let _ = writeln!(
        html,
        "<p>This test message was sent on {} UTC to confirm that report delivery is configured correctly.</p>",
        report_timestamp(now)
    );
    html.push_str("<p>No findings were analyzed and no attachments are included.</p>\n");
    html.push_str("</body>\n</html>\n");

    Message {
        subject: format!("Compliance Report Configuration Test — {}", report_date(now)),
        html_body: html,
        attachments: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        Finding, Framework, MappedFinding, MappingTable, Narrative, NarrativeOrigin, TimeWindow,
    };
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn framework(id: &str, name: &str) -> Framework {
        let mut descriptions = BTreeMap::new();
        descriptions.insert("CC6.1".to_string(), "Logical access security".to_string());
        Framework {
            id: id.to_string(),
            name: name.to_string(),
            standard_arn: String::new(),
            description: String::new(),
            table: MappingTable::new(BTreeMap::new(), vec![], descriptions, vec!["CC7.1".to_string()]),
        }
    }

    fn mapped(controls: &[&str]) -> MappedFinding {
        MappedFinding {
            finding: Finding {
                id: "f-1".to_string(),
                title: "t".to_string(),
                description: String::new(),
                severity_label: "HIGH".to_string(),
                types: vec![],
                account_id: String::new(),
                region: String::new(),
                attributes: BTreeMap::new(),
            },
            control_attribute: "XControls".to_string(),
            controls: controls.iter().map(|c| (*c).to_string()).collect(),
        }
    }

    fn section<'a>(fw: &'a Framework, mapped: Vec<MappedFinding>) -> FrameworkSection<'a> {
        let origin = if mapped.is_empty() { NarrativeOrigin::NoFindings } else { NarrativeOrigin::Fallback };
        FrameworkSection {
            framework: fw,
            stats: FrameworkStats { total: mapped.len(), ..Default::default() },
            narrative: Narrative { text: format!("## Executive Summary\n{} <b>", fw.name), origin },
            csv: format!("header\r\n{}", "row\r\n".repeat(mapped.len())),
            mapped,
        }
    }

    fn report<'a>(sections: Vec<FrameworkSection<'a>>, combined: Option<Narrative>) -> Report<'a> {
        let now = datetime!(2026-03-02 08:30 UTC);
        Report {
            generated_at: now,
            window: TimeWindow::lookback(now, 24).expect("window"),
            sections,
            combined,
        }
    }

    #[test]
    fn single_framework_subject_names_it() {
        let soc2 = framework("SOC2", "SOC 2");
        let msg = compose(&report(vec![section(&soc2, vec![mapped(&["CC6.1"])])], None));
        assert_eq!(msg.subject, "SOC 2 Compliance Report — 2026-03-02");
        assert!(!msg.html_body.contains("class=\"nav\""));
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].file_name, "soc2_compliance_findings.csv");
        assert_eq!(msg.attachments[0].content_type, "text/csv");
    }

    #[test]
    fn frameworks_without_findings_get_no_attachment() {
        let soc2 = framework("SOC2", "SOC 2");
        let nist = framework("NIST800-53", "NIST 800-53");
        let msg = compose(&report(
            vec![section(&nist, vec![]), section(&soc2, vec![mapped(&["CC6.1"]), mapped(&["CC7.1"])])],
            None,
        ));
        assert_eq!(msg.subject, "Multi-Framework Compliance Report — 2026-03-02");
        assert_eq!(msg.attachments.len(), 1);
        assert_eq!(msg.attachments[0].file_name, "soc2_compliance_findings.csv");
        assert_eq!(msg.attachments[0].data, b"header\r\nrow\r\nrow\r\n");
    }

    #[test]
    fn multi_framework_body_has_nav_combined_first_and_dividers() {
        let soc2 = framework("SOC2", "SOC 2");
        let nist = framework("NIST800-53", "NIST 800-53");
        let combined = Narrative {
            text: "## Framework Comparison\nshared gaps".to_string(),
            origin: NarrativeOrigin::Oracle,
        };
        let msg = compose(&report(
            vec![section(&nist, vec![mapped(&["SI-4"])]), section(&soc2, vec![mapped(&["CC6.1"])])],
            Some(combined),
        ));
        let body = &msg.html_body;
        assert!(body.contains("<a href=\"#fw-nist800-53\">NIST 800-53</a>"));
        assert!(body.contains("<a href=\"#fw-soc2\">SOC 2</a>"));
        let combined_at = body.find("Cross-Framework Analysis").expect("combined");
        let nist_at = body.find("id=\"fw-nist800-53\"").expect("nist");
        let soc2_at = body.find("id=\"fw-soc2\"").expect("soc2");
        assert!(combined_at < nist_at && nist_at < soc2_at);
        assert_eq!(body.matches("<hr>").count(), 2);
        assert!(body.contains("SOC 2 &lt;b&gt;"));
    }

    #[test]
    fn combined_narrative_is_dropped_for_a_single_framework() {
        let soc2 = framework("SOC2", "SOC 2");
        let combined = Narrative { text: "x".to_string(), origin: NarrativeOrigin::Oracle };
        let msg = compose(&report(vec![section(&soc2, vec![mapped(&["CC6.1"])])], Some(combined)));
        assert!(!msg.html_body.contains("Cross-Framework Analysis"));
    }

    #[test]
    fn control_table_shows_bare_id_without_description() {
        let soc2 = framework("SOC2", "SOC 2");
        let msg = compose(&report(vec![section(&soc2, vec![mapped(&["CC6.1", "CC9.9"])])], None));
        assert!(msg.html_body.contains("<tr><td>CC6.1</td><td>Logical access security</td></tr>"));
        assert!(msg.html_body.contains("<tr><td>CC9.9</td><td></td></tr>"));
        assert!(!msg.html_body.contains("Control Families"));
    }

    #[test]
    fn nist_section_groups_controls_by_family() {
        let nist = framework("NIST800-53", "NIST 800-53");
        let msg = compose(&report(
            vec![section(&nist, vec![mapped(&["SI-2", "CP-9"]), mapped(&["SI-4"])])],
            None,
        ));
        let body = &msg.html_body;
        assert!(body.contains("<h3>NIST 800-53 Control Families</h3>"));
        assert!(body.contains(
            "<tr><td>System and Information Integrity (SI)</td><td>2</td><td>SI-2, SI-4</td><td>Yes</td></tr>"
        ));
        assert!(body.contains("<tr><td>Contingency Planning (CP)</td><td>1</td><td>CP-9</td><td></td></tr>"));
        assert!(body.find("(SI)").expect("si") < body.find("(CP)").expect("cp"));
    }

    #[test]
    fn test_message_has_no_attachments() {
        let msg = compose_test_message(datetime!(2026-03-02 08:30 UTC));
        assert_eq!(msg.subject, "Compliance Report Configuration Test — 2026-03-02");
        assert!(msg.attachments.is_empty());
        assert!(msg.html_body.contains("2026-03-02 08:30:00 UTC"));
    }
}
