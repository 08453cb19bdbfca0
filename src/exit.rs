use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success,
    Configuration,
    ReportFailed,
    SourceUnavailable,
    SinkFailed,
}

impl ExitCode {
    pub const fn as_i32(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Configuration => 2,
            ExitCode::ReportFailed => 10,
            ExitCode::SourceUnavailable => 11,
            ExitCode::SinkFailed => 20,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            ExitCode::Success => "success",
            ExitCode::Configuration => "configuration_error",
            ExitCode::ReportFailed => "report_failed",
            ExitCode::SourceUnavailable => "source_unavailable",
            ExitCode::SinkFailed => "sink_failure",
        }
    }

    pub const fn status_code(self) -> u16 {
        match self {
            ExitCode::Success => 200,
            ExitCode::Configuration => 400,
            ExitCode::ReportFailed | ExitCode::SourceUnavailable | ExitCode::SinkFailed => 500,
        }
    }
}

#[derive(Debug)]
pub struct ExitError {
    pub code: ExitCode,
    pub err: anyhow::Error,
}

impl ExitError {
    pub fn new(code: ExitCode, err: anyhow::Error) -> Self {
        Self { code, err }
    }
}

impl fmt::Display for ExitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.err.fmt(f)
    }
}

impl std::error::Error for ExitError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        // Display already shows `err`, so the chain continues at its cause.
        self.err.source()
    }
}

pub fn error_kind(err: &anyhow::Error) -> ExitCode {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<ExitError>())
        .map(|exit| exit.code)
        .unwrap_or(ExitCode::ReportFailed)
}

pub fn exit_code(err: &anyhow::Error) -> i32 {
    error_kind(err).as_i32()
}

pub fn configuration(message: impl Into<String>) -> anyhow::Error {
    ExitError::new(ExitCode::Configuration, anyhow::anyhow!(message.into())).into()
}

pub fn configuration_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::Configuration, err).into()
}

pub fn source_unavailable_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::SourceUnavailable, err).into()
}

pub fn sink_failed_err(err: anyhow::Error) -> anyhow::Error {
    ExitError::new(ExitCode::SinkFailed, err).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn unclassified_errors_are_report_failures() {
        let err = anyhow::anyhow!("boom");
        assert_eq!(error_kind(&err), ExitCode::ReportFailed);
        assert_eq!(exit_code(&err), 10);
    }

    #[test]
    fn classification_survives_added_context() {
        let err: anyhow::Result<()> = Err(configuration("unknown framework: FOO"));
        let err = err.context("invocation").expect_err("error");
        assert_eq!(error_kind(&err), ExitCode::Configuration);
        assert_eq!(error_kind(&err).status_code(), 400);
    }

    #[test]
    fn sink_failures_exit_20() {
        let err = sink_failed_err(anyhow::anyhow!("smtp down"));
        assert_eq!(exit_code(&err), 20);
    }

    #[test]
    fn wrapped_message_appears_once_in_the_chain() {
        let inner = anyhow::anyhow!("expected value at line 1").context("payload parse failed");
        let err = configuration_err(inner);
        let chain: Vec<String> = err.chain().map(ToString::to_string).collect();
        assert_eq!(chain, vec!["payload parse failed", "expected value at line 1"]);
        assert_eq!(error_kind(&err), ExitCode::Configuration);
    }
}
