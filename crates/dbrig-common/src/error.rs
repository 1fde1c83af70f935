use thiserror::Error;

/// The closed set of error codes surfaced to CLI callers.
///
/// Every variant maps to exactly one of these so the CLI can render a stable
/// exit reason without inspecting message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    DependencyMissing,
    VersionMismatch,
    WrongEngineDump,
    ProcessStopTimeout,
    ConnectionFailed,
    InvalidIdentifier,
    UnsupportedPlatform,
    UnsupportedEngineOp,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorCode::DependencyMissing => "DEPENDENCY_MISSING",
            ErrorCode::VersionMismatch => "VERSION_MISMATCH",
            ErrorCode::WrongEngineDump => "WRONG_ENGINE_DUMP",
            ErrorCode::ProcessStopTimeout => "PROCESS_STOP_TIMEOUT",
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::InvalidIdentifier => "INVALID_IDENTIFIER",
            ErrorCode::UnsupportedPlatform => "UNSUPPORTED_PLATFORM",
            ErrorCode::UnsupportedEngineOp => "UNSUPPORTED_ENGINE_OP",
        };
        write!(f, "{s}")
    }
}

/// Every fatal error in dbrig carries a typed code plus a one-line suggestion,
/// rendered verbatim by the CLI. Transient/non-fatal conditions (missing tool
/// during a read-only `status`, EPIPE during a streamed restore) are handled
/// by the caller and never reach this type.
#[derive(Debug, Error)]
#[error("{code}: {message} (suggestion: {suggestion})")]
pub struct DbrigError {
    pub code: ErrorCode,
    pub message: String,
    pub suggestion: String,
    #[source]
    pub source: Option<anyhow::Error>,
}

impl DbrigError {
    pub fn new(code: ErrorCode, message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestion: suggestion.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    pub fn dependency_missing(what: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::new(ErrorCode::DependencyMissing, what, suggestion)
    }

    pub fn version_mismatch(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::new(ErrorCode::VersionMismatch, message, suggestion)
    }

    pub fn wrong_engine_dump(
        detected_format: impl std::fmt::Display,
        expected_engine: impl std::fmt::Display,
        detected_engine: impl std::fmt::Display,
    ) -> Self {
        Self::new(
            ErrorCode::WrongEngineDump,
            format!(
                "detected format {detected_format} belongs to {detected_engine}, not {expected_engine}"
            ),
            format!("restore with --engine {detected_engine}"),
        )
    }

    pub fn process_stop_timeout(container: impl Into<String>, pid: u32) -> Self {
        Self::new(
            ErrorCode::ProcessStopTimeout,
            format!("{} (pid {pid}) did not stop", container.into()),
            format!("manually terminate pid {pid}"),
        )
    }

    pub fn connection_failed(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::ConnectionFailed,
            message,
            "verify the container is running and the port is reachable",
        )
    }

    pub fn invalid_identifier(identifier: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidIdentifier,
            format!("'{identifier}' is not a valid identifier"),
            "use [A-Za-z_][A-Za-z0-9_]{0,62}, not a reserved word",
        )
    }

    pub fn unsupported_platform(os: impl std::fmt::Display, arch: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::UnsupportedPlatform,
            format!("{os}/{arch} is not a supported platform"),
            "run on darwin, linux, or win32 with x64 or arm64",
        )
    }

    pub fn unsupported_engine_op(engine: impl std::fmt::Display, op: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::UnsupportedEngineOp,
            format!("{engine} does not support {op}"),
            "check the engine adapter's capability set",
        )
    }
}

pub type DbrigResult<T> = Result<T, DbrigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_display_matches_wire_names() {
        assert_eq!(ErrorCode::VersionMismatch.to_string(), "VERSION_MISMATCH");
        assert_eq!(ErrorCode::WrongEngineDump.to_string(), "WRONG_ENGINE_DUMP");
    }

    #[test]
    fn wrong_engine_dump_names_both_engines() {
        let err = DbrigError::wrong_engine_dump("mysql_sql", "postgresql", "mysql");
        assert!(err.suggestion.contains("--engine mysql"));
        assert_eq!(err.code, ErrorCode::WrongEngineDump);
    }
}
