use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use time::OffsetDateTime;
use wait_timeout::ChildExt;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

pub fn run_command(cmd: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput> {
    run_command_with_input(cmd, args, None, timeout)
}

pub fn run_command_with_input(
    cmd: &str,
    args: &[&str],
    input: Option<&[u8]>,
    timeout: Duration,
) -> Result<CommandOutput> {
    let mut command = Command::new(cmd);
    command
        .args(args)
        .stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("プロセス起動に失敗しました: {cmd}"))?;

    // Feed stdin from a separate thread so a child that stops reading cannot block the timeout.
    let writer = match (input, child.stdin.take()) {
        (Some(data), Some(mut stdin)) => {
            let data = data.to_vec();
            Some(std::thread::spawn(move || stdin.write_all(&data)))
        }
        _ => None,
    };

    let status = match child
        .wait_timeout(timeout)
        .with_context(|| format!("プロセス待機に失敗しました: {cmd}"))?
    {
        Some(status) => status,
        None => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(anyhow!("タイムアウトしました（{timeout:?}）: {cmd}"));
        }
    };

    if let Some(writer) = writer {
        match writer.join() {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::BrokenPipe => {}
            Ok(Err(err)) => {
                return Err(err).with_context(|| format!("標準入力の書き込みに失敗しました: {cmd}"));
            }
            Err(_) => return Err(anyhow!("標準入力の書き込みスレッドが異常終了しました: {cmd}")),
        }
    }

    let mut stdout = String::new();
    if let Some(mut out) = child.stdout.take() {
        let _ = out.read_to_string(&mut stdout);
    }
    let mut stderr = String::new();
    if let Some(mut err) = child.stderr.take() {
        let _ = err.read_to_string(&mut stderr);
    }

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout,
        stderr,
    })
}

pub fn home_dir() -> Result<PathBuf> {
    std::env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .ok_or_else(|| anyhow!("環境変数 HOME が設定されていません"))
}

pub fn unique_file_name(prefix: &str, extension: &str, at: OffsetDateTime) -> String {
    let pid = std::process::id();
    let ts = at.unix_timestamp_nanos();
    format!("{prefix}-{pid}-{ts}.{extension}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[cfg(unix)]
    #[test]
    fn pipes_input_to_the_child() {
        let out = run_command_with_input("cat", &[], Some(b"hello"), Duration::from_secs(5))
            .expect("run cat");
        assert!(out.success());
        assert_eq!(out.stdout, "hello");
    }

    #[cfg(unix)]
    #[test]
    fn times_out_slow_commands() {
        let err = run_command("sleep", &["5"], Duration::from_millis(100)).expect_err("timeout");
        assert!(err.to_string().contains("タイムアウト"));
    }

    #[test]
    fn unique_names_carry_pid_and_timestamp() {
        let name = unique_file_name("report", "eml", datetime!(1970-01-01 00:00:01 UTC));
        assert_eq!(name, format!("report-{}-1000000000.eml", std::process::id()));
    }
}
