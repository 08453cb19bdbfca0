use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::aggregate::{FindingsByFramework, aggregate};
use crate::config::EffectiveConfig;
use crate::core::{
    Framework, FrameworkSection, FrameworkStats, NarrativeOrigin, Report, TimeWindow,
};
use crate::email::{self, Message};
use crate::exit;
use crate::narrative::{NarrativeBuilder, NarrativeOptions};
use crate::oracle::Oracle;
use crate::registry::FrameworkRegistry;
use crate::sink::EmailSink;
use crate::source::FindingsSource;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub sender: Option<String>,
    pub default_recipient: Option<String>,
    pub default_hours: u32,
    pub default_framework: String,
    pub combined_analysis: bool,
    pub auditor_perspective: bool,
    pub max_tokens: u32,
    pub csv_dir: PathBuf,
    pub show_progress: bool,
}

impl EngineSettings {
    pub fn from_config(cfg: &EffectiveConfig) -> Self {
        Self {
            sender: cfg.email.sender.clone(),
            default_recipient: cfg.email.recipient.clone(),
            default_hours: cfg.report.default_hours,
            default_framework: cfg.report.default_framework.clone(),
            combined_analysis: cfg.report.combined_analysis,
            auditor_perspective: cfg.report.auditor_perspective,
            max_tokens: cfg.oracle.max_tokens,
            csv_dir: cfg.report.csv_dir.clone(),
            show_progress: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HoursValue {
    Number(i64),
    Text(String),
}

impl HoursValue {
    fn resolve(&self) -> Result<u32> {
        let parsed = match self {
            HoursValue::Number(n) => Some(*n),
            HoursValue::Text(s) => s.trim().parse::<i64>().ok(),
        };
        parsed
            .filter(|h| *h > 0)
            .and_then(|h| u32::try_from(h).ok())
            .ok_or_else(|| {
                exit::configuration(format!(
                    "hours は 1 以上の整数を指定してください: {}",
                    match self {
                        HoursValue::Number(n) => n.to_string(),
                        HoursValue::Text(s) => s.clone(),
                    }
                ))
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationRequest {
    #[serde(default, alias = "list_frameworks")]
    pub list_frameworks: bool,
    #[serde(default, alias = "test_email")]
    pub test_email: bool,
    #[serde(default, alias = "recipient_override")]
    pub recipient_override: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub framework: Option<String>,
    #[serde(default)]
    pub hours: Option<HoursValue>,
    #[serde(default, alias = "generate_csv")]
    pub generate_csv: bool,
    #[serde(default, alias = "combined_analysis")]
    pub combined_analysis: Option<bool>,
}

impl InvocationRequest {
    pub fn from_json(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(|err| {
            exit::configuration_err(
                anyhow::Error::new(err).context("呼び出しペイロード(JSON)の解析に失敗しました"),
            )
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    ListFrameworks,
    SendTestMessage,
    GenerateReport,
}

impl Mode {
    pub fn select(req: &InvocationRequest) -> Self {
        if req.list_frameworks {
            Mode::ListFrameworks
        } else if req.test_email {
            Mode::SendTestMessage
        } else {
            Mode::GenerateReport
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameworkSummary {
    pub id: String,
    pub name: String,
    pub stats: FrameworkStats,
    pub narrative: NarrativeOrigin,
    pub attached: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Outcome {
    Frameworks {
        frameworks: Vec<Framework>,
    },
    TestMessageSent {
        recipient: String,
        subject: String,
    },
    NoFindings {
        frameworks: Vec<String>,
        window: TimeWindow,
        message: String,
    },
    ReportSent {
        recipient: String,
        message: Message,
        window: TimeWindow,
        frameworks: Vec<FrameworkSummary>,
        #[serde(skip_serializing_if = "Option::is_none")]
        combined: Option<NarrativeOrigin>,
        csv_files: Vec<PathBuf>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct InvocationResponse {
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    pub body: serde_json::Value,
}

impl InvocationResponse {
    pub fn from_result(result: &Result<Outcome>) -> Self {
        match result {
            Ok(outcome) => match serde_json::to_value(outcome) {
                Ok(body) => Self {
                    status_code: exit::ExitCode::Success.status_code(),
                    body,
                },
                Err(err) => Self {
                    status_code: exit::ExitCode::ReportFailed.status_code(),
                    body: serde_json::json!({
                        "error": format!("結果のエンコードに失敗しました: {err}"),
                        "kind": exit::ExitCode::ReportFailed.as_str(),
                    }),
                },
            },
            Err(err) => {
                let code = exit::error_kind(err);
                Self {
                    status_code: code.status_code(),
                    body: serde_json::json!({
                        "error": format!("{err:#}"),
                        "kind": code.as_str(),
                    }),
                }
            }
        }
    }
}

pub struct Engine<'a> {
    registry: &'a FrameworkRegistry,
    settings: EngineSettings,
    source: &'a dyn FindingsSource,
    oracle: &'a dyn Oracle,
    sink: &'a dyn EmailSink,
}

impl<'a> Engine<'a> {
    pub fn new(
        registry: &'a FrameworkRegistry,
        settings: EngineSettings,
        source: &'a dyn FindingsSource,
        oracle: &'a dyn Oracle,
        sink: &'a dyn EmailSink,
    ) -> Self {
        Self {
            registry,
            settings,
            source,
            oracle,
            sink,
        }
    }

    pub fn invoke(&self, req: &InvocationRequest) -> Result<Outcome> {
        let now = OffsetDateTime::now_utc();
        match Mode::select(req) {
            Mode::ListFrameworks => Ok(self.list_frameworks()),
            Mode::SendTestMessage => self.send_test_message(req, now),
            Mode::GenerateReport => self.generate_report(req, now),
        }
    }

    pub fn list_frameworks(&self) -> Outcome {
        let mut frameworks = self.registry.frameworks().to_vec();
        frameworks.sort_by(|a, b| a.id.cmp(&b.id));
        Outcome::Frameworks { frameworks }
    }

    fn sender(&self) -> Result<&str> {
        self.settings
            .sender
            .as_deref()
            .ok_or_else(|| exit::configuration("送信元アドレスが設定されていません（email.sender / AUDITMAIL_SENDER_EMAIL）"))
    }

    fn recipient<'r>(&'r self, requested: Option<&'r str>) -> Result<&'r str> {
        requested
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .or(self.settings.default_recipient.as_deref())
            .ok_or_else(|| exit::configuration("送信先アドレスが指定されていません（email.recipient / AUDITMAIL_RECIPIENT_EMAIL）"))
    }

    pub fn send_test_message(&self, req: &InvocationRequest, now: OffsetDateTime) -> Result<Outcome> {
        let recipient = self.recipient(req.recipient_override.as_deref())?;
        let sender = self.sender()?;
        let message = email::compose_test_message(now);
        self.sink
            .send(sender, recipient, &message)
            .map_err(exit::sink_failed_err)?;
        tracing::info!(recipient, "test message sent");
        Ok(Outcome::TestMessageSent {
            recipient: recipient.to_string(),
            subject: message.subject,
        })
    }

    pub fn generate_report(&self, req: &InvocationRequest, now: OffsetDateTime) -> Result<Outcome> {
        let selector = req
            .framework
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.settings.default_framework);
        let scope = self.registry.resolve_scope(selector)?;
        let hours = match &req.hours {
            Some(value) => value.resolve()?,
            None => self.settings.default_hours,
        };
        let recipient = self.recipient(req.email.as_deref())?;
        let sender = self.sender()?;
        let combined_requested = req
            .combined_analysis
            .unwrap_or(self.settings.combined_analysis);

        let window = TimeWindow::lookback(now, hours).ok_or_else(|| {
            exit::configuration(format!(
                "hours が大きすぎます: {hours}（対象期間の開始が西暦0年より前になります）"
            ))
        })?;
        tracing::info!(
            frameworks = scope.len(),
            hours,
            window = %window.describe(),
            "fetching findings"
        );

        let mut grouped: FindingsByFramework = BTreeMap::new();
        for &framework in &scope {
            let findings = self
                .source
                .get_findings(&window, Some(framework))
                .map_err(exit::source_unavailable_err)?;
            grouped.insert(framework.id.clone(), findings);
        }

        let ids: Vec<&str> = scope.iter().map(|fw| fw.id.as_str()).collect();
        let mut aggregated = aggregate(&ids, grouped);
        if aggregated.is_empty() {
            tracing::info!("no findings in window; nothing to send");
            return Ok(Outcome::NoFindings {
                frameworks: ids.iter().map(|id| (*id).to_string()).collect(),
                window,
                message: format!("No findings in the last {hours} hours; no report was sent."),
            });
        }
        tracing::info!(
            with_findings = aggregated.frameworks_with_findings(),
            "findings aggregated"
        );

        let builder = NarrativeBuilder::new(
            self.oracle,
            NarrativeOptions {
                max_tokens: self.settings.max_tokens,
                auditor_perspective: self.settings.auditor_perspective,
            },
        );

        use std::io::IsTerminal;
        let progress_enabled = self.settings.show_progress && std::io::stderr().is_terminal();
        let pb = if progress_enabled {
            let pb = indicatif::ProgressBar::new_spinner();
            pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
            pb.enable_steady_tick(Duration::from_millis(120));
            Some(pb)
        } else {
            None
        };

        let mut sections: Vec<FrameworkSection<'_>> = Vec::with_capacity(scope.len());
        for &framework in &scope {
            let findings = aggregated
                .findings
                .remove(&framework.id)
                .unwrap_or_default();
            let stats = aggregated
                .stats
                .get(&framework.id)
                .copied()
                .unwrap_or_default();
            if let Some(pb) = &pb {
                pb.set_message(format!("{} を分析中...", framework.name));
            }
            let mapped = crate::mapper::map_findings(&findings, framework);
            let narrative = builder.build(framework, &mapped, &stats);
            let csv = crate::csv::render_csv(framework, &mapped);
            sections.push(FrameworkSection {
                framework,
                stats,
                mapped,
                narrative,
                csv,
            });
        }

        let with_findings: Vec<(&Framework, FrameworkStats)> = sections
            .iter()
            .filter(|s| !s.mapped.is_empty())
            .map(|s| (s.framework, s.stats))
            .collect();
        let combined = if combined_requested && with_findings.len() > 1 {
            if let Some(pb) = &pb {
                pb.set_message("フレームワーク横断分析を生成中...");
            }
            Some(builder.build_combined(&with_findings))
        } else {
            None
        };

        if let Some(pb) = pb {
            pb.finish_and_clear();
        }

        let report = Report {
            generated_at: now,
            window,
            sections,
            combined,
        };

        let csv_files = if req.generate_csv {
            crate::artifacts::write_csv_files(&self.settings.csv_dir, &report.sections)?
        } else {
            Vec::new()
        };

        let message = email::compose(&report);
        self.sink
            .send(sender, recipient, &message)
            .map_err(exit::sink_failed_err)?;
        tracing::info!(
            recipient,
            attachments = message.attachments.len(),
            "report sent"
        );

        let frameworks = report
            .sections
            .iter()
            .map(|s| FrameworkSummary {
                id: s.framework.id.clone(),
                name: s.framework.name.clone(),
                stats: s.stats,
                narrative: s.narrative.origin,
                attached: !s.mapped.is_empty(),
            })
            .collect();

        Ok(Outcome::ReportSent {
            recipient: recipient.to_string(),
            message,
            window: report.window,
            frameworks,
            combined: report.combined.as_ref().map(|n| n.origin),
            csv_files,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_takes_priority_over_test_and_report() {
        let req = InvocationRequest {
            list_frameworks: true,
            test_email: true,
            ..Default::default()
        };
        assert_eq!(Mode::select(&req), Mode::ListFrameworks);
        let req = InvocationRequest {
            test_email: true,
            ..Default::default()
        };
        assert_eq!(Mode::select(&req), Mode::SendTestMessage);
        assert_eq!(Mode::select(&InvocationRequest::default()), Mode::GenerateReport);
    }

    #[test]
    fn payload_accepts_both_key_styles_and_ignores_unknown_keys() {
        let camel = InvocationRequest::from_json(
            r#"{"listFrameworks":false,"testEmail":true,"recipientOverride":"a@example.com","generateCsv":true,"combinedAnalysis":false,"hours":"12","extra":1}"#,
        )
        .expect("camel");
        let snake = InvocationRequest::from_json(
            r#"{"list_frameworks":false,"test_email":true,"recipient_override":"a@example.com","generate_csv":true,"combined_analysis":false,"hours":12}"#,
        )
        .expect("snake");
        assert!(camel.test_email && snake.test_email);
        assert_eq!(camel.recipient_override, snake.recipient_override);
        assert_eq!(camel.combined_analysis, Some(false));
        assert_eq!(camel.hours.as_ref().map(|h| h.resolve().expect("hours")), Some(12));
        assert_eq!(snake.hours.as_ref().map(|h| h.resolve().expect("hours")), Some(12));
    }

    #[test]
    fn empty_payload_is_a_default_report_request() {
        assert_eq!(InvocationRequest::from_json("  ").expect("empty"), InvocationRequest::default());
    }

    #[test]
    fn malformed_payload_is_a_configuration_error() {
        let err = InvocationRequest::from_json("{").expect_err("bad json");
        assert_eq!(exit::error_kind(&err), exit::ExitCode::Configuration);
    }

    #[test]
    fn non_positive_hours_are_configuration_errors() {
        for value in [HoursValue::Number(0), HoursValue::Number(-3), HoursValue::Text("soon".to_string())] {
            let err = value.resolve().expect_err("invalid hours");
            assert_eq!(exit::error_kind(&err), exit::ExitCode::Configuration);
        }
    }

    #[test]
    fn response_maps_error_kinds_to_status_codes() {
        let ok: Result<Outcome> = Ok(Outcome::TestMessageSent {
            recipient: "a@example.com".to_string(),
            subject: "s".to_string(),
        });
        let resp = InvocationResponse::from_result(&ok);
        assert_eq!(resp.status_code, 200);
        assert_eq!(resp.body["outcome"], "test_message_sent");

        let bad: Result<Outcome> = Err(exit::configuration("unknown framework: FOO"));
        let resp = InvocationResponse::from_result(&bad);
        assert_eq!(resp.status_code, 400);
        assert_eq!(resp.body["kind"], "configuration_error");

        let failed: Result<Outcome> = Err(exit::sink_failed_err(anyhow::anyhow!("down")));
        assert_eq!(InvocationResponse::from_result(&failed).status_code, 500);
    }

    struct CountingSource(std::cell::Cell<usize>);

    impl FindingsSource for CountingSource {
        fn get_findings(
            &self,
            _window: &TimeWindow,
            _framework: Option<&Framework>,
        ) -> Result<Vec<crate::core::Finding>> {
            self.0.set(self.0.get() + 1);
            Ok(Vec::new())
        }
    }

    struct RejectingSink;

    impl EmailSink for RejectingSink {
        fn send(&self, _from: &str, _to: &str, _message: &Message) -> Result<()> {
            Err(anyhow::anyhow!("no mail expected"))
        }
    }

    #[test]
    fn lookback_beyond_the_calendar_is_a_configuration_error() {
        let registry = FrameworkRegistry::builtin().expect("registry");
        let source = CountingSource(std::cell::Cell::new(0));
        let settings = EngineSettings {
            sender: Some("reports@example.com".to_string()),
            default_recipient: Some("audit@example.com".to_string()),
            default_hours: 24,
            default_framework: "SOC2".to_string(),
            combined_analysis: false,
            auditor_perspective: false,
            max_tokens: 100,
            csv_dir: std::env::temp_dir(),
            show_progress: false,
        };
        let engine = Engine::new(
            &registry,
            settings,
            &source,
            &crate::oracle::DisabledOracle,
            &RejectingSink,
        );

        for hours in [4_000_000_000_i64, 90_000_000] {
            let req = InvocationRequest {
                hours: Some(HoursValue::Number(hours)),
                ..Default::default()
            };
            let err = engine.invoke(&req).expect_err("out-of-range window");
            assert_eq!(exit::error_kind(&err), exit::ExitCode::Configuration);
            assert_eq!(InvocationResponse::from_result(&Err(err)).status_code, 400);
        }
        assert_eq!(source.0.get(), 0);
    }
}
