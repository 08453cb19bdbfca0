use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use time::OffsetDateTime;

use crate::email::Message;
use crate::platform;

pub trait EmailSink {
    fn send(&self, from: &str, to: &str, message: &Message) -> Result<()>;
}

fn boundary(at: OffsetDateTime) -> String {
    format!(
        "auditmail-{}-{}",
        std::process::id(),
        at.unix_timestamp_nanos()
    )
}

#[derive(Debug, Clone)]
pub struct OutboxSink {
    dir: PathBuf,
}

impl OutboxSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn deliver(&self, from: &str, to: &str, message: &Message) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir).with_context(|| {
            format!(
                "送信フォルダの作成に失敗しました: {}",
                self.dir.display()
            )
        })?;

        let now = OffsetDateTime::now_utc();
        let path = self
            .dir
            .join(platform::unique_file_name("report", "eml", now));
        let mime = message.to_mime(from, to, &boundary(now));
        std::fs::write(&path, mime)
            .with_context(|| format!("メールの書き込みに失敗しました: {}", path.display()))?;
        tracing::info!(path = %path.display(), to, "message written to outbox");
        Ok(path)
    }
}

impl EmailSink for OutboxSink {
    fn send(&self, from: &str, to: &str, message: &Message) -> Result<()> {
        self.deliver(from, to, message).map(|_| ())
    }
}

#[derive(Debug, Clone)]
pub struct SendmailSink {
    program: PathBuf,
    timeout: Duration,
}

impl SendmailSink {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }
}

impl EmailSink for SendmailSink {
    fn send(&self, from: &str, to: &str, message: &Message) -> Result<()> {
        let mime = message.to_mime(from, to, &boundary(OffsetDateTime::now_utc()));
        let program = self.program.to_string_lossy();
        let out = platform::run_command_with_input(
            &program,
            &["-t", "-i"],
            Some(mime.as_bytes()),
            self.timeout,
        )?;
        if !out.success() {
            return Err(anyhow!(
                "sendmail が失敗しました（exit={}）: {}",
                out.exit_code,
                out.stderr.trim()
            ));
        }
        tracing::info!(program = %program, to, "message handed to sendmail");
        Ok(())
    }
}
