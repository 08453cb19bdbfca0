use anyhow::Error;
use std::io::{self, Write};
use unicode_width::UnicodeWidthStr;

use crate::core::{Framework, NarrativeOrigin};
use crate::engine::{FrameworkSummary, Outcome};

#[derive(Debug, Clone)]
pub struct UiConfig {
    pub stdout_is_tty: bool,
    pub quiet: bool,
    pub verbose: bool,
}

pub fn eprintln_error(err: &Error) {
    let mut stderr = io::stderr().lock();
    let _ = writeln!(stderr, "エラー:");
    let _ = writeln!(stderr, "  {err}");

    let mut causes = err.chain().skip(1).peekable();
    if causes.peek().is_some() {
        let _ = writeln!(stderr, "原因:");
        for cause in causes {
            let _ = writeln!(stderr, "  - {cause}");
        }
    }

    let _ = writeln!(stderr, "次に:");
    let _ = writeln!(
        stderr,
        "  - 詳細を見るには `--verbose` を付けて再実行してください"
    );
    let _ = writeln!(
        stderr,
        "  - 有効な設定は `auditmail config --show` で確認できます"
    );
}

pub fn print_outcome(outcome: &Outcome, cfg: &UiConfig) {
    if cfg.quiet {
        return;
    }
    let mut out = io::stdout().lock();
    write_outcome(&mut out, outcome, cfg);
}

fn write_outcome(out: &mut dyn Write, outcome: &Outcome, cfg: &UiConfig) {
    match outcome {
        Outcome::Frameworks { frameworks } => {
            let _ = writeln!(out, "利用可能なフレームワーク（{}件）:", frameworks.len());
            write_frameworks_table(out, frameworks, cfg.verbose);
        }
        Outcome::TestMessageSent { recipient, subject } => {
            let _ = writeln!(out, "テストメールを送信しました: {recipient}");
            let _ = writeln!(out, "件名: {subject}");
        }
        Outcome::NoFindings {
            frameworks, window, ..
        } => {
            let _ = writeln!(
                out,
                "対象期間に所見はありませんでした（{}）。メールは送信していません。",
                frameworks.join(", ")
            );
            let _ = writeln!(out, "期間: {}", window.describe());
        }
        Outcome::ReportSent {
            recipient,
            message,
            window,
            frameworks,
            combined,
            csv_files,
        } => {
            let _ = writeln!(out, "レポートを送信しました: {recipient}");
            let _ = writeln!(out, "件名: {}", message.subject);
            let _ = writeln!(out, "期間: {}", window.describe());
            let _ = writeln!(out);
            write_summary_table(out, frameworks);
            if let Some(origin) = combined {
                let _ = writeln!(out);
                let _ = writeln!(out, "横断分析: {}", origin_label(*origin));
            }
            if !message.attachments.is_empty() {
                let _ = writeln!(out);
                let _ = writeln!(out, "添付:");
                for attachment in &message.attachments {
                    let _ = writeln!(out, "  - {}", attachment.file_name);
                }
            }
            if !csv_files.is_empty() {
                let _ = writeln!(out);
                let _ = writeln!(out, "CSV出力:");
                for path in csv_files {
                    let _ = writeln!(out, "  - {}", path.display());
                }
            }
        }
    }
}

fn origin_label(origin: NarrativeOrigin) -> &'static str {
    match origin {
        NarrativeOrigin::Oracle => "AI要約",
        NarrativeOrigin::Fallback => "定型文（AI要約なし）",
        NarrativeOrigin::NoFindings => "所見なし",
    }
}

fn write_frameworks_table(out: &mut dyn Write, frameworks: &[Framework], verbose: bool) {
    let label_id = "ID";
    let label_name = "名称";
    let id_w = frameworks
        .iter()
        .map(|f| f.id.width())
        .max()
        .unwrap_or(0)
        .max(label_id.width());
    let name_w = frameworks
        .iter()
        .map(|f| f.name.width())
        .max()
        .unwrap_or(0)
        .max(label_name.width());

    let _ = writeln!(
        out,
        "{}  {}  ARN",
        pad_end_display(label_id, id_w),
        pad_end_display(label_name, name_w)
    );
    let _ = writeln!(out, "{}  {}  {}", "-".repeat(id_w), "-".repeat(name_w), "-".repeat(3));
    for fw in frameworks {
        let _ = writeln!(
            out,
            "{}  {}  {}",
            pad_end_display(&fw.id, id_w),
            pad_end_display(&fw.name, name_w),
            fw.standard_arn
        );
        if verbose && !fw.description.is_empty() {
            let _ = writeln!(out, "{}  {}", " ".repeat(id_w), fw.description);
        }
    }
}

fn write_summary_table(out: &mut dyn Write, frameworks: &[FrameworkSummary]) {
    let label_name = "フレームワーク";
    let headers = ["合計", "重大", "高", "中", "低"];
    let name_w = frameworks
        .iter()
        .map(|f| f.name.width())
        .max()
        .unwrap_or(0)
        .max(label_name.width());
    let num_w = headers.iter().map(|h| h.width()).max().unwrap_or(0).max(5);

    let mut header = pad_end_display(label_name, name_w);
    for h in headers {
        header.push_str("  ");
        header.push_str(&pad_start_display(h, num_w));
    }
    header.push_str("  要約");
    let _ = writeln!(out, "{header}");

    for fw in frameworks {
        let s = &fw.stats;
        let mut row = pad_end_display(&fw.name, name_w);
        for n in [s.total, s.critical, s.high, s.medium, s.low] {
            row.push_str("  ");
            row.push_str(&pad_start_display(&n.to_string(), num_w));
        }
        row.push_str("  ");
        row.push_str(origin_label(fw.narrative));
        let _ = writeln!(out, "{row}");
    }
}

fn pad_end_display(s: &str, width: usize) -> String {
    let w = s.width();
    if w >= width {
        return s.to_string();
    }
    format!("{s}{}", " ".repeat(width - w))
}

fn pad_start_display(s: &str, width: usize) -> String {
    let w = s.width();
    if w >= width {
        return s.to_string();
    }
    format!("{}{}", " ".repeat(width - w), s)
}
