//! Server reported errors.
use std::fmt;

use bytes::Bytes;

use super::ErrorSeverity;

/// Structured error code sent by the server.
///
/// Codes form a hierarchy, each byte from the most significant one narrows
/// the category of the one before it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

macro_rules! error_codes {
    ($($name:ident = $code:literal, $display:literal;)*) => {
        impl ErrorCode {
            $(pub const $name: ErrorCode = ErrorCode($code);)*

            /// Error class name, `None` for codes unknown to the client.
            pub fn name(&self) -> Option<&'static str> {
                match self.0 {
                    $($code => Some($display),)*
                    _ => None,
                }
            }
        }
    };
}

error_codes! {
    INTERNAL_SERVER_ERROR = 0x01_00_00_00, "InternalServerError";
    UNSUPPORTED_FEATURE_ERROR = 0x02_00_00_00, "UnsupportedFeatureError";
    PROTOCOL_ERROR = 0x03_00_00_00, "ProtocolError";
    BINARY_PROTOCOL_ERROR = 0x03_01_00_00, "BinaryProtocolError";
    UNSUPPORTED_PROTOCOL_VERSION_ERROR = 0x03_01_00_01, "UnsupportedProtocolVersionError";
    TYPE_SPEC_NOT_FOUND_ERROR = 0x03_01_00_02, "TypeSpecNotFoundError";
    UNEXPECTED_MESSAGE_ERROR = 0x03_01_00_03, "UnexpectedMessageError";
    INPUT_DATA_ERROR = 0x03_02_00_00, "InputDataError";
    PARAMETER_TYPE_MISMATCH_ERROR = 0x03_02_01_00, "ParameterTypeMismatchError";
    STATE_MISMATCH_ERROR = 0x03_02_02_00, "StateMismatchError";
    RESULT_CARDINALITY_MISMATCH_ERROR = 0x03_03_00_00, "ResultCardinalityMismatchError";
    CAPABILITY_ERROR = 0x03_04_00_00, "CapabilityError";
    UNSUPPORTED_CAPABILITY_ERROR = 0x03_04_01_00, "UnsupportedCapabilityError";
    DISABLED_CAPABILITY_ERROR = 0x03_04_02_00, "DisabledCapabilityError";
    QUERY_ERROR = 0x04_00_00_00, "QueryError";
    INVALID_SYNTAX_ERROR = 0x04_01_00_00, "InvalidSyntaxError";
    EDGEQL_SYNTAX_ERROR = 0x04_01_01_00, "EdgeQLSyntaxError";
    SCHEMA_SYNTAX_ERROR = 0x04_01_02_00, "SchemaSyntaxError";
    GRAPHQL_SYNTAX_ERROR = 0x04_01_03_00, "GraphQLSyntaxError";
    INVALID_TYPE_ERROR = 0x04_02_00_00, "InvalidTypeError";
    INVALID_TARGET_ERROR = 0x04_02_01_00, "InvalidTargetError";
    INVALID_LINK_TARGET_ERROR = 0x04_02_01_01, "InvalidLinkTargetError";
    INVALID_PROPERTY_TARGET_ERROR = 0x04_02_01_02, "InvalidPropertyTargetError";
    INVALID_REFERENCE_ERROR = 0x04_03_00_00, "InvalidReferenceError";
    UNKNOWN_MODULE_ERROR = 0x04_03_00_01, "UnknownModuleError";
    UNKNOWN_LINK_ERROR = 0x04_03_00_02, "UnknownLinkError";
    UNKNOWN_PROPERTY_ERROR = 0x04_03_00_03, "UnknownPropertyError";
    UNKNOWN_USER_ERROR = 0x04_03_00_04, "UnknownUserError";
    UNKNOWN_DATABASE_ERROR = 0x04_03_00_05, "UnknownDatabaseError";
    UNKNOWN_PARAMETER_ERROR = 0x04_03_00_06, "UnknownParameterError";
    SCHEMA_ERROR = 0x04_04_00_00, "SchemaError";
    SCHEMA_DEFINITION_ERROR = 0x04_05_00_00, "SchemaDefinitionError";
    INVALID_DEFINITION_ERROR = 0x04_05_01_00, "InvalidDefinitionError";
    DUPLICATE_DEFINITION_ERROR = 0x04_05_02_00, "DuplicateDefinitionError";
    SESSION_TIMEOUT_ERROR = 0x04_06_00_00, "SessionTimeoutError";
    IDLE_SESSION_TIMEOUT_ERROR = 0x04_06_01_00, "IdleSessionTimeoutError";
    QUERY_TIMEOUT_ERROR = 0x04_06_02_00, "QueryTimeoutError";
    TRANSACTION_TIMEOUT_ERROR = 0x04_06_0A_00, "TransactionTimeoutError";
    IDLE_TRANSACTION_TIMEOUT_ERROR = 0x04_06_0A_01, "IdleTransactionTimeoutError";
    EXECUTION_ERROR = 0x05_00_00_00, "ExecutionError";
    INVALID_VALUE_ERROR = 0x05_01_00_00, "InvalidValueError";
    DIVISION_BY_ZERO_ERROR = 0x05_01_00_01, "DivisionByZeroError";
    NUMERIC_OUT_OF_RANGE_ERROR = 0x05_01_00_02, "NumericOutOfRangeError";
    ACCESS_POLICY_ERROR = 0x05_01_00_03, "AccessPolicyError";
    INTEGRITY_ERROR = 0x05_02_00_00, "IntegrityError";
    CONSTRAINT_VIOLATION_ERROR = 0x05_02_00_01, "ConstraintViolationError";
    CARDINALITY_VIOLATION_ERROR = 0x05_02_00_02, "CardinalityViolationError";
    MISSING_REQUIRED_ERROR = 0x05_02_00_03, "MissingRequiredError";
    TRANSACTION_ERROR = 0x05_03_00_00, "TransactionError";
    TRANSACTION_CONFLICT_ERROR = 0x05_03_01_00, "TransactionConflictError";
    TRANSACTION_SERIALIZATION_ERROR = 0x05_03_01_01, "TransactionSerializationError";
    TRANSACTION_DEADLOCK_ERROR = 0x05_03_01_02, "TransactionDeadlockError";
    WATCH_ERROR = 0x05_04_00_00, "WatchError";
    CONFIGURATION_ERROR = 0x06_00_00_00, "ConfigurationError";
    ACCESS_ERROR = 0x07_00_00_00, "AccessError";
    AUTHENTICATION_ERROR = 0x07_01_00_00, "AuthenticationError";
    AVAILABILITY_ERROR = 0x08_00_00_00, "AvailabilityError";
    BACKEND_UNAVAILABLE_ERROR = 0x08_00_00_01, "BackendUnavailableError";
    BACKEND_ERROR = 0x09_00_00_00, "BackendError";
    UNSUPPORTED_BACKEND_FEATURE_ERROR = 0x09_00_01_00, "UnsupportedBackendFeatureError";
    LOG_MESSAGE = 0xF0_00_00_00, "LogMessage";
    WARNING_MESSAGE = 0xF0_01_00_00, "WarningMessage";
}

impl ErrorCode {
    /// Whether re-running the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            *self,
            Self::STATE_MISMATCH_ERROR | Self::IDLE_SESSION_TIMEOUT_ERROR | Self::BACKEND_UNAVAILABLE_ERROR
        ) || self.0 & 0xFF_FF_FF_00 == Self::TRANSACTION_CONFLICT_ERROR.0
    }

    /// Whether the connection must be replaced before retrying.
    pub fn reconnect_required(&self) -> bool {
        matches!(*self, Self::IDLE_SESSION_TIMEOUT_ERROR | Self::BACKEND_UNAVAILABLE_ERROR)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "0x{:08x}", self.0),
        }
    }
}

impl fmt::Debug for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCode({self}, 0x{:08x})", self.0)
    }
}

const HINT: u16 = 0x0001;
const DETAILS: u16 = 0x0002;
const SERVER_TRACEBACK: u16 = 0x0101;
const LINE_START: u16 = 0xfff3;
const COLUMN_START: u16 = 0xfff5;
const LINE_END: u16 = 0xfff6;
const COLUMN_END: u16 = 0xfff8;

/// An error returned by the server in `ErrorResponse`.
///
/// When the failing query text is attached with [`DatabaseError::with_query`]
/// and the server reported the error position, [`Display`][fmt::Display]
/// renders the offending lines with a caret underline:
///
/// ```text
/// InvalidReferenceError: object type or alias 'default::Usr' does not exist
///    |
///  1 | select Usr
///    |        ^^^
/// Hint: did you mean 'User'?
/// ```
pub struct DatabaseError {
    severity: ErrorSeverity,
    code: ErrorCode,
    message: String,
    attributes: Vec<(u16, Bytes)>,
    query: Option<String>,
}

impl DatabaseError {
    pub fn new(
        severity: ErrorSeverity,
        code: ErrorCode,
        message: impl Into<String>,
        attributes: Vec<(u16, Bytes)>,
    ) -> Self {
        Self { severity, code, message: message.into(), attributes, query: None }
    }

    /// Attach the query that caused this error.
    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn severity(&self) -> ErrorSeverity {
        self.severity
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Raw attribute value.
    pub fn attribute(&self, code: u16) -> Option<&Bytes> {
        self.attributes.iter().find(|(c, _)| *c == code).map(|(_, v)| v)
    }

    fn attribute_str(&self, code: u16) -> Option<&str> {
        self.attribute(code).and_then(|v| std::str::from_utf8(v).ok())
    }

    pub fn hint(&self) -> Option<&str> {
        self.attribute_str(HINT)
    }

    pub fn details(&self) -> Option<&str> {
        self.attribute_str(DETAILS)
    }

    pub fn traceback(&self) -> Option<&str> {
        self.attribute_str(SERVER_TRACEBACK)
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn reconnect_required(&self) -> bool {
        self.code.reconnect_required()
    }

    fn position(&self, code: u16) -> Option<(&str, usize)> {
        let raw = self.attribute_str(code)?;
        Some((raw, raw.parse().ok()?))
    }

    /// Caret annotated excerpt, `None` when the position or query is unknown.
    fn render(&self, f: &mut fmt::Formatter<'_>) -> Option<fmt::Result> {
        let query = self.query.as_deref()?;
        let (_, line_start) = self.position(LINE_START)?;
        let (line_end_raw, line_end) = self.position(LINE_END)?;
        let (_, col_start) = self.position(COLUMN_START)?;
        let (_, col_end) = self.position(COLUMN_END)?;

        let lines = query.split('\n').collect::<Vec<_>>();
        if line_start == 0 || line_end < line_start || line_end > lines.len() {
            return None;
        }

        let width = line_end_raw.len();
        let result = (|| {
            writeln!(f, "{}: {}", self.code, self.message)?;
            writeln!(f, "{:>w$}", "|", w = width + 3)?;
            for no in line_start..=line_end {
                let line = lines[no - 1];
                let start = if no == line_start { col_start } else { 0 };
                let end = if no == line_end { col_end } else { line.chars().count() };
                let carets = "^".repeat(end.saturating_sub(start));
                writeln!(f, " {no:>width$} | {line}")?;
                writeln!(f, "{:>w$} {carets:>end$}", "|", w = width + 3)?;
            }
            if let Some(hint) = self.hint() {
                write!(f, "Hint: {hint}")?;
            }
            Ok(())
        })();
        Some(result)
    }
}

impl std::error::Error for DatabaseError { }

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.render(f) {
            Some(result) => result,
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl fmt::Debug for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}: {}\"", self.code, self.message)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn error(attributes: &[(u16, &'static str)]) -> DatabaseError {
        DatabaseError::new(
            ErrorSeverity::Error,
            ErrorCode::INVALID_REFERENCE_ERROR,
            "object does not exist",
            attributes.iter().map(|(c, v)| (*c, Bytes::from_static(v.as_bytes()))).collect(),
        )
    }

    #[test]
    fn plain_fallback() {
        let err = error(&[(LINE_START, "1"), (LINE_END, "1")]).with_query("select Usr");
        assert_eq!(err.to_string(), "InvalidReferenceError: object does not exist");

        let err = error(&[]);
        assert_eq!(err.to_string(), "InvalidReferenceError: object does not exist");
    }

    #[test]
    fn caret_excerpt() {
        let err = error(&[
            (LINE_START, "1"),
            (LINE_END, "1"),
            (COLUMN_START, "7"),
            (COLUMN_END, "10"),
            (HINT, "did you mean 'User'?"),
        ])
        .with_query("select Usr");

        assert_eq!(
            err.to_string(),
            "InvalidReferenceError: object does not exist\n   |\n 1 | select Usr\n   |        ^^^\nHint: did you mean 'User'?"
        );
        assert_eq!(err.hint(), Some("did you mean 'User'?"));
        assert_eq!(err.details(), None);
    }

    #[test]
    fn retry_flags() {
        assert!(ErrorCode::TRANSACTION_CONFLICT_ERROR.is_retryable());
        assert!(ErrorCode::TRANSACTION_SERIALIZATION_ERROR.is_retryable());
        assert!(ErrorCode::TRANSACTION_DEADLOCK_ERROR.is_retryable());
        assert!(!ErrorCode::TRANSACTION_ERROR.is_retryable());
        assert!(!ErrorCode::QUERY_ERROR.is_retryable());
        assert!(ErrorCode::BACKEND_UNAVAILABLE_ERROR.reconnect_required());
        assert_eq!(ErrorCode(0x0a0b0c0d).to_string(), "0x0a0b0c0d");
    }
}
