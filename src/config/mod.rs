use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::registry::ALL_FRAMEWORKS;

pub const DEFAULT_MODEL_ID: &str = "anthropic.claude-3-sonnet";
pub const DEFAULT_API_KEY_ENV: &str = "AUDITMAIL_ORACLE_API_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    Outbox,
    Sendmail,
}

impl DeliveryMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            DeliveryMode::Outbox => "outbox",
            DeliveryMode::Sendmail => "sendmail",
        }
    }
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "outbox" => Ok(DeliveryMode::Outbox),
            "sendmail" => Ok(DeliveryMode::Sendmail),
            _ => Err(format!(
                "配送方式が不正です: {s}（outbox|sendmail を指定してください）"
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EffectiveConfig {
    pub email: EmailConfig,
    pub report: ReportConfig,
    pub oracle: OracleConfig,
    pub source: SourceConfig,
    pub registry: RegistryConfig,
    pub delivery: DeliveryConfig,
    pub invocation: InvocationConfig,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct EmailConfig {
    pub sender: Option<String>,
    pub recipient: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportConfig {
    pub default_hours: u32,
    pub default_framework: String,
    pub combined_analysis: bool,
    pub auditor_perspective: bool,
    pub csv_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct OracleConfig {
    pub model_id: String,
    pub endpoint: Option<String>,
    pub api_key_env: String,
    pub timeout_secs: u64,
    pub max_tokens: u32,
}

impl OracleConfig {
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceConfig {
    pub findings_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryConfig {
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeliveryConfig {
    pub mode: DeliveryMode,
    pub outbox_dir: PathBuf,
    pub sendmail_path: PathBuf,
}

#[derive(Debug, Clone, Serialize)]
pub struct InvocationConfig {
    pub budget_secs: u64,
}

impl InvocationConfig {
    pub fn budget(&self) -> Duration {
        Duration::from_secs(self.budget_secs)
    }
}

impl EffectiveConfig {
    pub fn defaults(home_dir: &Path) -> Self {
        Self {
            email: EmailConfig::default(),
            report: ReportConfig {
                default_hours: 24,
                default_framework: ALL_FRAMEWORKS.to_string(),
                combined_analysis: true,
                auditor_perspective: true,
                csv_dir: std::env::temp_dir(),
            },
            oracle: OracleConfig {
                model_id: DEFAULT_MODEL_ID.to_string(),
                endpoint: None,
                api_key_env: DEFAULT_API_KEY_ENV.to_string(),
                timeout_secs: 60,
                max_tokens: 1500,
            },
            source: SourceConfig::default(),
            registry: RegistryConfig::default(),
            delivery: DeliveryConfig {
                mode: DeliveryMode::Outbox,
                outbox_dir: home_dir.join(".local/share/auditmail/outbox"),
                sendmail_path: PathBuf::from("/usr/sbin/sendmail"),
            },
            invocation: InvocationConfig { budget_secs: 900 },
            config_path: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    email: Option<RawEmailConfig>,
    report: Option<RawReportConfig>,
    oracle: Option<RawOracleConfig>,
    source: Option<RawSourceConfig>,
    registry: Option<RawRegistryConfig>,
    delivery: Option<RawDeliveryConfig>,
    invocation: Option<RawInvocationConfig>,
}

#[derive(Debug, Deserialize)]
struct RawEmailConfig {
    sender: Option<String>,
    recipient: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawReportConfig {
    default_hours: Option<u32>,
    default_framework: Option<String>,
    combined_analysis: Option<bool>,
    auditor_perspective: Option<bool>,
    csv_dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawOracleConfig {
    model_id: Option<String>,
    endpoint: Option<String>,
    api_key_env: Option<String>,
    timeout_secs: Option<u64>,
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct RawSourceConfig {
    findings_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawRegistryConfig {
    dir: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawDeliveryConfig {
    mode: Option<DeliveryMode>,
    outbox_dir: Option<PathBuf>,
    sendmail_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RawInvocationConfig {
    budget_secs: Option<u64>,
}

pub fn default_config_path(home_dir: &Path) -> PathBuf {
    home_dir.join(".config/auditmail/config.toml")
}

pub fn load(config_path: Option<&Path>, home_dir: &Path) -> Result<EffectiveConfig> {
    let mut cfg = EffectiveConfig::defaults(home_dir);

    if let Some(explicit) = config_path {
        if !explicit.exists() {
            return Err(anyhow!(
                "設定ファイルが見つかりません: {}",
                explicit.display()
            ));
        }
    }
    let path = config_path
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| default_config_path(home_dir));

    if path.exists() {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み取りに失敗しました: {}", path.display()))?;
        let raw: RawConfig =
            toml::from_str(&s).context("設定ファイル(TOML)の解析に失敗しました")?;
        apply_raw_config(&mut cfg, raw);
        cfg.config_path = Some(path.display().to_string());
    }

    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok())?;
    validate(&cfg)?;

    Ok(cfg)
}

fn non_empty(v: String) -> Option<String> {
    let v = v.trim();
    (!v.is_empty()).then(|| v.to_string())
}

fn apply_raw_config(cfg: &mut EffectiveConfig, raw: RawConfig) {
    if let Some(email) = raw.email {
        if let Some(sender) = email.sender {
            cfg.email.sender = non_empty(sender);
        }
        if let Some(recipient) = email.recipient {
            cfg.email.recipient = non_empty(recipient);
        }
    }

    if let Some(report) = raw.report {
        if let Some(default_hours) = report.default_hours {
            cfg.report.default_hours = default_hours;
        }
        if let Some(default_framework) = report.default_framework.and_then(non_empty) {
            cfg.report.default_framework = default_framework;
        }
        if let Some(combined_analysis) = report.combined_analysis {
            cfg.report.combined_analysis = combined_analysis;
        }
        if let Some(auditor_perspective) = report.auditor_perspective {
            cfg.report.auditor_perspective = auditor_perspective;
        }
        if let Some(csv_dir) = report.csv_dir {
            cfg.report.csv_dir = csv_dir;
        }
    }

    if let Some(oracle) = raw.oracle {
        if let Some(model_id) = oracle.model_id.and_then(non_empty) {
            cfg.oracle.model_id = model_id;
        }
        if let Some(endpoint) = oracle.endpoint {
            cfg.oracle.endpoint = non_empty(endpoint);
        }
        if let Some(api_key_env) = oracle.api_key_env.and_then(non_empty) {
            cfg.oracle.api_key_env = api_key_env;
        }
        if let Some(timeout_secs) = oracle.timeout_secs {
            cfg.oracle.timeout_secs = timeout_secs;
        }
        if let Some(max_tokens) = oracle.max_tokens {
            cfg.oracle.max_tokens = max_tokens;
        }
    }

    if let Some(source) = raw.source {
        if let Some(findings_path) = source.findings_path {
            cfg.source.findings_path = Some(findings_path);
        }
    }

    if let Some(registry) = raw.registry {
        if let Some(dir) = registry.dir {
            cfg.registry.dir = Some(dir);
        }
    }

    if let Some(delivery) = raw.delivery {
        if let Some(mode) = delivery.mode {
            cfg.delivery.mode = mode;
        }
        if let Some(outbox_dir) = delivery.outbox_dir {
            cfg.delivery.outbox_dir = outbox_dir;
        }
        if let Some(sendmail_path) = delivery.sendmail_path {
            cfg.delivery.sendmail_path = sendmail_path;
        }
    }

    if let Some(invocation) = raw.invocation {
        if let Some(budget_secs) = invocation.budget_secs {
            cfg.invocation.budget_secs = budget_secs;
        }
    }
}

fn parse_number<T: FromStr>(key: &str, v: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    v.trim()
        .parse::<T>()
        .with_context(|| format!("{key}: 数値が不正です: {v}"))
}

fn apply_env_overrides(
    cfg: &mut EffectiveConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    if let Some(v) = env("AUDITMAIL_SENDER_EMAIL") {
        cfg.email.sender = non_empty(v);
    }
    if let Some(v) = env("AUDITMAIL_RECIPIENT_EMAIL") {
        cfg.email.recipient = non_empty(v);
    }
    if let Some(v) = env("AUDITMAIL_FINDINGS_HOURS") {
        cfg.report.default_hours = parse_number("AUDITMAIL_FINDINGS_HOURS", &v)?;
    }
    if let Some(v) = env("AUDITMAIL_DEFAULT_FRAMEWORK").and_then(non_empty) {
        cfg.report.default_framework = v;
    }
    if let Some(v) = env("AUDITMAIL_COMBINED_ANALYSIS") {
        cfg.report.combined_analysis =
            parse_bool(&v).with_context(|| "AUDITMAIL_COMBINED_ANALYSIS")?;
    }
    if let Some(v) = env("AUDITMAIL_AUDITOR_PERSPECTIVE") {
        cfg.report.auditor_perspective =
            parse_bool(&v).with_context(|| "AUDITMAIL_AUDITOR_PERSPECTIVE")?;
    }
    if let Some(v) = env("AUDITMAIL_CSV_DIR").and_then(non_empty) {
        cfg.report.csv_dir = PathBuf::from(v);
    }
    if let Some(v) = env("AUDITMAIL_MODEL_ID").and_then(non_empty) {
        cfg.oracle.model_id = v;
    }
    if let Some(v) = env("AUDITMAIL_ORACLE_ENDPOINT") {
        cfg.oracle.endpoint = non_empty(v);
    }
    if let Some(v) = env("AUDITMAIL_ORACLE_API_KEY_ENV").and_then(non_empty) {
        cfg.oracle.api_key_env = v;
    }
    if let Some(v) = env("AUDITMAIL_ORACLE_TIMEOUT_SECS") {
        cfg.oracle.timeout_secs = parse_number("AUDITMAIL_ORACLE_TIMEOUT_SECS", &v)?;
    }
    if let Some(v) = env("AUDITMAIL_ORACLE_MAX_TOKENS") {
        cfg.oracle.max_tokens = parse_number("AUDITMAIL_ORACLE_MAX_TOKENS", &v)?;
    }
    if let Some(v) = env("AUDITMAIL_FINDINGS_PATH").and_then(non_empty) {
        cfg.source.findings_path = Some(PathBuf::from(v));
    }
    if let Some(v) = env("AUDITMAIL_REGISTRY_DIR").and_then(non_empty) {
        cfg.registry.dir = Some(PathBuf::from(v));
    }
    if let Some(v) = env("AUDITMAIL_DELIVERY_MODE") {
        cfg.delivery.mode = v
            .parse::<DeliveryMode>()
            .map_err(anyhow::Error::msg)
            .with_context(|| "AUDITMAIL_DELIVERY_MODE")?;
    }
    if let Some(v) = env("AUDITMAIL_OUTBOX_DIR").and_then(non_empty) {
        cfg.delivery.outbox_dir = PathBuf::from(v);
    }
    if let Some(v) = env("AUDITMAIL_SENDMAIL_PATH").and_then(non_empty) {
        cfg.delivery.sendmail_path = PathBuf::from(v);
    }
    if let Some(v) = env("AUDITMAIL_INVOCATION_BUDGET_SECS") {
        cfg.invocation.budget_secs = parse_number("AUDITMAIL_INVOCATION_BUDGET_SECS", &v)?;
    }

    Ok(())
}

fn validate(cfg: &EffectiveConfig) -> Result<()> {
    if cfg.report.default_hours == 0 {
        return Err(anyhow!("report.default_hours は 1 以上を指定してください"));
    }
    if cfg.oracle.timeout_secs == 0 {
        return Err(anyhow!("oracle.timeout_secs は 1 以上を指定してください"));
    }
    if cfg.oracle.max_tokens == 0 {
        return Err(anyhow!("oracle.max_tokens は 1 以上を指定してください"));
    }
    if cfg.invocation.budget_secs == 0 {
        return Err(anyhow!("invocation.budget_secs は 1 以上を指定してください"));
    }
    Ok(())
}

pub fn parse_bool(s: &str) -> Result<bool> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(anyhow!(
            "真偽値が不正です: {s}（true|false|1|0|yes|no|on|off を指定してください）"
        )),
    }
}
