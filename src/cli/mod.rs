use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use serde::Serialize;

use crate::config::{DeliveryMode, EffectiveConfig};
use crate::engine::{
    Engine, EngineSettings, HoursValue, InvocationRequest, InvocationResponse, Mode, Outcome,
};
use crate::exit;
use crate::oracle::{DisabledOracle, HttpOracle, HttpOracleConfig, Oracle};
use crate::registry::FrameworkRegistry;
use crate::sink::{EmailSink, OutboxSink, SendmailSink};
use crate::source::AsffExportSource;
use crate::ui::UiConfig;

const SENDMAIL_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Parser)]
#[command(
    name = "auditmail",
    version,
    about = "クラウドのセキュリティ所見をコンプライアンス統制に対応付け、監査向けレポートをメールで配信する"
)]
pub struct Cli {
    #[arg(long, global = true)]
    pub json: bool,
    #[arg(long, global = true)]
    pub verbose: bool,
    #[arg(long, global = true)]
    pub quiet: bool,
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    Frameworks,
    TestEmail(TestEmailArgs),
    Report(ReportArgs),
    Invoke(InvokeArgs),
    Config(ConfigArgs),
    Completion(CompletionArgs),
}

#[derive(Debug, Args)]
pub struct TestEmailArgs {
    #[arg(long)]
    pub to: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReportArgs {
    #[arg(long)]
    pub framework: Option<String>,
    #[arg(long, allow_negative_numbers = true)]
    pub hours: Option<i64>,
    #[arg(long)]
    pub email: Option<String>,
    #[arg(long)]
    pub csv: bool,
    #[arg(long)]
    pub no_combined: bool,
    #[arg(long)]
    pub findings: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct InvokeArgs {
    #[arg(long)]
    pub event: Option<String>,
}

#[derive(Debug, Args)]
pub struct CompletionArgs {
    pub shell: String,
}

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[arg(long)]
    pub show: bool,
}

fn setup_logging(verbose: bool, quiet: bool) {
    if quiet {
        return;
    }

    let filter = tracing_subscriber::EnvFilter::try_from_env("AUDITMAIL_LOG")
        .or_else(|_| tracing_subscriber::EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| {
            if verbose {
                tracing_subscriber::EnvFilter::new("info")
            } else {
                tracing_subscriber::EnvFilter::new("warn")
            }
        });

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let started = Instant::now();

    setup_logging(cli.verbose, cli.quiet);

    let ui_cfg = UiConfig {
        stdout_is_tty: io::stdout().is_terminal(),
        quiet: cli.quiet,
        verbose: cli.verbose,
    };

    let home_dir = crate::platform::home_dir().map_err(exit::configuration_err)?;
    let env_config_path = std::env::var_os("AUDITMAIL_CONFIG").map(PathBuf::from);
    let cfg = crate::config::load(
        cli.config.as_deref().or(env_config_path.as_deref()),
        &home_dir,
    )
    .map_err(exit::configuration_err)?;

    let request: Result<InvocationRequest> = match &cli.command {
        Commands::Completion(args) => {
            let shell = parse_shell(&args.shell)?;
            let mut cmd = Cli::command();
            let mut out = io::stdout().lock();
            clap_complete::generate(shell, &mut cmd, "auditmail", &mut out);
            return Ok(());
        }
        Commands::Config(args) => {
            if args.show {
                if cli.json {
                    write_json(&cfg)?;
                } else {
                    println!("{}", toml::to_string_pretty(&cfg)?);
                }
            } else if !ui_cfg.quiet {
                println!("設定ファイル: {}", config_path_hint(&cfg, &home_dir));
                println!("`auditmail config --show` で有効な設定を表示します");
            }
            return Ok(());
        }
        Commands::Frameworks => Ok(InvocationRequest {
            list_frameworks: true,
            ..Default::default()
        }),
        Commands::TestEmail(args) => Ok(InvocationRequest {
            test_email: true,
            recipient_override: args.to.clone(),
            ..Default::default()
        }),
        Commands::Report(args) => Ok(InvocationRequest {
            email: args.email.clone(),
            framework: args.framework.clone(),
            hours: args.hours.map(HoursValue::Number),
            generate_csv: args.csv,
            combined_analysis: args.no_combined.then_some(false),
            ..Default::default()
        }),
        // Payload errors still produce a response on stdout.
        Commands::Invoke(args) => read_event(args.event.as_deref())
            .and_then(|raw| InvocationRequest::from_json(&raw)),
    };

    let findings_override = match &cli.command {
        Commands::Report(args) => args.findings.clone(),
        _ => None,
    };
    let findings_path = findings_override.or_else(|| cfg.source.findings_path.clone());

    let show_progress = io::stderr().is_terminal() && !cli.quiet && !cli.json;
    let result = request
        .and_then(|request| execute(&cfg, &request, findings_path, show_progress, started));

    if matches!(cli.command, Commands::Invoke(_)) {
        write_json(&InvocationResponse::from_result(&result))?;
        return result.map(|_| ());
    }

    let outcome = result?;
    if cli.json {
        write_json(&InvocationResponse::from_result(&Ok(outcome)))?;
    } else {
        crate::ui::print_outcome(&outcome, &ui_cfg);
    }
    Ok(())
}

fn execute(
    cfg: &EffectiveConfig,
    request: &InvocationRequest,
    findings_path: Option<PathBuf>,
    show_progress: bool,
    started: Instant,
) -> Result<Outcome> {
    let registry =
        FrameworkRegistry::load(cfg.registry.dir.as_deref()).map_err(exit::configuration_err)?;

    let Some(findings_path) = findings_path.or_else(|| {
        (Mode::select(request) != Mode::GenerateReport).then(PathBuf::new)
    }) else {
        // Unknown framework ids are reported ahead of the missing export.
        let selector = request
            .framework
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(&cfg.report.default_framework);
        registry.resolve_scope(selector)?;
        return Err(exit::configuration(
            "所見のエクスポートが指定されていません（--findings / source.findings_path / AUDITMAIL_FINDINGS_PATH）",
        ));
    };

    let source = AsffExportSource::new(findings_path);
    let oracle = build_oracle(cfg, started)?;
    let sink = build_sink(cfg);

    let mut settings = EngineSettings::from_config(cfg);
    settings.show_progress = show_progress;

    let engine = Engine::new(&registry, settings, &source, oracle.as_ref(), sink.as_ref());
    engine.invoke(request)
}

fn build_oracle(cfg: &EffectiveConfig, started: Instant) -> Result<Box<dyn Oracle>> {
    let Some(endpoint) = cfg.oracle.endpoint.clone() else {
        tracing::info!("no oracle endpoint configured; narratives will use the fallback text");
        return Ok(Box::new(DisabledOracle));
    };
    let oracle = HttpOracle::new(HttpOracleConfig {
        endpoint,
        model_id: cfg.oracle.model_id.clone(),
        api_key: cfg.oracle.api_key(),
        timeout: cfg.oracle.timeout(),
        deadline: Some(started + cfg.invocation.budget()),
    })
    .map_err(exit::configuration_err)?;
    Ok(Box::new(oracle))
}

fn build_sink(cfg: &EffectiveConfig) -> Box<dyn EmailSink> {
    match cfg.delivery.mode {
        DeliveryMode::Outbox => Box::new(OutboxSink::new(cfg.delivery.outbox_dir.clone())),
        DeliveryMode::Sendmail => Box::new(SendmailSink::new(
            cfg.delivery.sendmail_path.clone(),
            SENDMAIL_TIMEOUT.min(cfg.invocation.budget()),
        )),
    }
}

fn read_event(event: Option<&str>) -> Result<String> {
    match event {
        None => Ok(String::new()),
        Some("-") => {
            let mut buf = String::new();
            io::stdin()
                .lock()
                .read_to_string(&mut buf)
                .context("標準入力の読み取りに失敗しました")?;
            Ok(buf)
        }
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("呼び出しペイロードの読み取りに失敗しました: {path}"))
            .map_err(exit::configuration_err),
    }
}

fn config_path_hint(cfg: &EffectiveConfig, home_dir: &Path) -> String {
    match &cfg.config_path {
        Some(path) => path.clone(),
        None => format!(
            "{}（未作成）",
            crate::config::default_config_path(home_dir).display()
        ),
    }
}

fn write_json<T: Serialize>(value: &T) -> Result<()> {
    use std::io::Write;

    let buf = serde_json::to_vec_pretty(value)?;

    let mut stdout = io::stdout().lock();
    match stdout.write_all(&buf) {
        Ok(()) => {}
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => return Ok(()),
        Err(err) => return Err(err.into()),
    }
    match stdout.write_all(b"\n") {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        Err(err) => Err(err.into()),
    }
}

fn parse_shell(s: &str) -> Result<clap_complete::Shell> {
    let s = s.trim().to_ascii_lowercase();
    match s.as_str() {
        "bash" => Ok(clap_complete::Shell::Bash),
        "zsh" => Ok(clap_complete::Shell::Zsh),
        "fish" => Ok(clap_complete::Shell::Fish),
        other => Err(exit::configuration(format!(
            "未対応のシェルです: {other}（bash|zsh|fish を指定してください）"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn report_flags_parse() {
        let cli = Cli::try_parse_from([
            "auditmail", "--json", "report", "--framework", "soc2", "--hours", "48", "--csv", "--no-combined",
        ])
        .expect("parse");
        assert!(cli.json);
        let Commands::Report(args) = cli.command else {
            panic!("expected report");
        };
        assert_eq!(args.framework.as_deref(), Some("soc2"));
        assert_eq!(args.hours, Some(48));
        assert!(args.csv && args.no_combined);
    }

    #[test]
    fn unknown_shell_is_a_configuration_error() {
        let err = parse_shell("powershell").expect_err("unsupported");
        assert_eq!(exit::error_kind(&err), exit::ExitCode::Configuration);
    }
}
