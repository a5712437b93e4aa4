//! Error types for the mapping layer.
//!
//! This module defines all error types using `thiserror`. The variants follow the
//! failure classes callers need to tell apart: setup problems, entity contract
//! violations, incomplete loads, parameter resolution failures and failures
//! reported by the database itself.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// Required setup is missing or was invoked twice.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Invalid data item type: {type_name} is not a registered entity type")]
    InvalidDataItemType { type_name: String },

    /// Materialization set fewer members than the load mode expects.
    #[error(
        "Load incomplete: some members of [{type_name}] could not be loaded, names: [{failed_fields}]"
    )]
    LoadIncomplete {
        type_name: String,
        /// Member names joined with ';'
        failed_fields: String,
    },

    #[error("Parameter resolution failed: {message}")]
    ParameterResolution { message: String },

    #[error("Key not found in source: {key}")]
    KeyNotFound { key: String },

    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23000" for an integrity constraint violation
        sql_state: Option<String>,
        /// Provider-native error number (SQL Server error number, MySQL error code)
        number: Option<i32>,
        /// SQL Server severity class
        class: Option<u8>,
        suggestion: String,
    },

    #[error("Timed out after {seconds}s: {operation}")]
    Timeout { operation: String, seconds: u64 },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an invalid data item type error.
    pub fn invalid_data_item_type(type_name: impl Into<String>) -> Self {
        Self::InvalidDataItemType {
            type_name: type_name.into(),
        }
    }

    /// Create a load incomplete error from the names of the members that failed.
    pub fn load_incomplete<I, S>(type_name: impl Into<String>, failed: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut failed_fields = String::new();
        for name in failed {
            failed_fields.push_str(name.as_ref());
            failed_fields.push(';');
        }
        Self::LoadIncomplete {
            type_name: type_name.into(),
            failed_fields,
        }
    }

    /// Create a parameter resolution error.
    pub fn parameter_resolution(message: impl Into<String>) -> Self {
        Self::ParameterResolution {
            message: message.into(),
        }
    }

    /// Create a key not found error.
    pub fn key_not_found(key: impl Into<String>) -> Self {
        Self::KeyNotFound { key: key.into() }
    }

    /// Create an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            number: None,
            class: None,
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error carrying the provider's native error number and class.
    pub fn database_native(
        message: impl Into<String>,
        sql_state: Option<String>,
        number: Option<i32>,
        class: Option<u8>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            number,
            class,
            suggestion: "Check the procedure arguments and referenced objects".to_string(),
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>, seconds: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            seconds,
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }

    /// True for failures of the call itself, as opposed to setup or contract errors.
    pub fn is_execution_failure(&self) -> bool {
        matches!(
            self,
            Self::Database { .. } | Self::Connection { .. } | Self::Timeout { .. }
        )
    }

    /// Short name of the failure class, used when rendering error chains.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "ConfigurationError",
            Self::InvalidDataItemType { .. } => "InvalidDataItemType",
            Self::LoadIncomplete { .. } => "LoadIncomplete",
            Self::ParameterResolution { .. } => "ParameterResolutionError",
            Self::KeyNotFound { .. } => "KeyNotFound",
            Self::InvalidOperation { .. } => "InvalidOperation",
            Self::Connection { .. } => "ConnectionError",
            Self::Database { .. } => "DatabaseError",
            Self::Timeout { .. } => "TimeoutError",
            Self::Internal { .. } => "InternalError",
        }
    }

    /// Classify a database-reported constraint violation.
    pub fn constraint(&self) -> Option<ConstraintKind> {
        match self {
            Self::Database {
                sql_state,
                number,
                class,
                ..
            } => ConstraintKind::classify(sql_state.as_deref(), *number, *class),
            _ => None,
        }
    }
}

// ===== Constraint classification =====

/// The two constraint-violation conditions that get a stable user-facing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    ForeignKey,
    UniqueKey,
}

impl ConstraintKind {
    /// Map provider diagnostics to a constraint kind.
    ///
    /// SQL Server reports 547 (class 16) for reference conflicts and 2601 (class 14)
    /// for duplicate keys in a unique index. MySQL uses 1451/1452 and 1062, and
    /// standard SQLSTATE values are 23503/23505.
    pub fn classify(sql_state: Option<&str>, number: Option<i32>, class: Option<u8>) -> Option<Self> {
        match (number, class) {
            (Some(547), Some(16)) => return Some(Self::ForeignKey),
            (Some(2601), Some(14)) => return Some(Self::UniqueKey),
            (Some(1451 | 1452), None) => return Some(Self::ForeignKey),
            (Some(1062), None) => return Some(Self::UniqueKey),
            _ => {}
        }
        match sql_state {
            Some("23503") => Some(Self::ForeignKey),
            Some("23505") => Some(Self::UniqueKey),
            _ => None,
        }
    }
}

/// Language of the friendly constraint messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    English,
    SimplifiedChinese,
}

const FOREIGN_KEY_MESSAGE_EN: &str = "This operation conflicts with a constraint of the database schema; to keep the data consistent it has been cancelled.\r\n\r\nIf you are deleting a record, it is most likely still referenced by other rows.\r\n\r\nIf you are adding a record, some required content may be missing.";
const UNIQUE_KEY_MESSAGE_EN: &str = "This operation conflicts with a constraint of the database schema; to keep the data consistent it has been cancelled.\r\n\r\nPlease check whether some of the values you entered already exist.";
const FOREIGN_KEY_MESSAGE_ZH: &str = "您执行的这个操作与数据库结构的约束有冲突，为了保证数据的完整性，您当前的操作将被取消。\r\n\r\n如果您在删除记录，那么极有可能是您将要删除的记录被其它的数据行在引用。\r\n\r\n如果是新增则可能是有些内容没有填写。";
const UNIQUE_KEY_MESSAGE_ZH: &str = "您执行的这个操作与数据库结构的约束有冲突，为了保证数据的完整性，您当前的操作将被取消。\r\n\r\n请检查您所输入的数据的某些字段是否已经存在。";

const MESSAGE_SEPARATOR: &str = "\r\n\r\n -> ";

/// Friendly message for a recognized constraint violation, or `None`.
pub fn friendly_message(err: &DbError, locale: Locale) -> Option<&'static str> {
    let kind = err.constraint()?;
    Some(match (kind, locale) {
        (ConstraintKind::ForeignKey, Locale::English) => FOREIGN_KEY_MESSAGE_EN,
        (ConstraintKind::UniqueKey, Locale::English) => UNIQUE_KEY_MESSAGE_EN,
        (ConstraintKind::ForeignKey, Locale::SimplifiedChinese) => FOREIGN_KEY_MESSAGE_ZH,
        (ConstraintKind::UniqueKey, Locale::SimplifiedChinese) => UNIQUE_KEY_MESSAGE_ZH,
    })
}

fn chain_entry(err: &(dyn std::error::Error + 'static)) -> String {
    let kind = err
        .downcast_ref::<DbError>()
        .map(DbError::kind_name)
        .unwrap_or("Error");
    format!("{} ({})", err, kind)
}

/// Displayable message: the friendly constraint message when one applies,
/// otherwise the error text followed by its source chain.
pub fn error_message(err: &(dyn std::error::Error + 'static), locale: Locale) -> String {
    if let Some(db_err) = err.downcast_ref::<DbError>() {
        if let Some(friendly) = friendly_message(db_err, locale) {
            return friendly.to_string();
        }
    }
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        message.push_str(MESSAGE_SEPARATOR);
        message.push_str(&chain_entry(inner));
        source = inner.source();
    }
    message
}

/// Full diagnostic text with a timestamp, for logs.
pub fn error_detail(err: &(dyn std::error::Error + 'static)) -> String {
    let mut chain = chain_entry(err);
    let mut source = err.source();
    while let Some(inner) = source {
        chain.push_str(MESSAGE_SEPARATOR);
        chain.push_str(&chain_entry(inner));
        source = inner.source();
    }
    format!(
        "Exception generated at: {}\r\nMessage: {}\r\n",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%SZ"),
        chain
    )
}

// ===== Driver conversions =====

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let number = db_err
                    .try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>()
                    .map(|e| e.number() as i32);
                DbError::Database {
                    message: db_err.message().to_string(),
                    sql_state: code,
                    number,
                    class: None,
                    suggestion: "Check the SQL syntax and referenced objects".to_string(),
                }
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the call arguments match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out acquiring a connection",
                "Check database server load and connectivity",
            ),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection is closed", "Reconnect to the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::internal(format!("Column not found: {}", col))
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

#[cfg(feature = "mssql")]
impl From<tiberius::error::Error> for DbError {
    fn from(err: tiberius::error::Error) -> Self {
        match err {
            tiberius::error::Error::Server(token) => DbError::database_native(
                token.message().to_string(),
                None,
                Some(token.code() as i32),
                Some(token.class()),
            ),
            tiberius::error::Error::Io { message, .. } => DbError::connection(
                format!("I/O error: {}", message),
                "Check network connectivity and database server status",
            ),
            tiberius::error::Error::Tls(msg) => DbError::connection(
                format!("TLS error: {}", msg),
                "Verify TLS configuration and certificates",
            ),
            other => DbError::connection(other.to_string(), "Check the SQL Server connection string"),
        }
    }
}

#[cfg(feature = "odbc")]
impl From<odbc_api::Error> for DbError {
    fn from(err: odbc_api::Error) -> Self {
        match &err {
            odbc_api::Error::Diagnostics { record, .. } => DbError::database_native(
                err.to_string(),
                Some(record.state.as_str().to_string()),
                Some(record.native_error),
                None,
            ),
            _ => DbError::connection(err.to_string(), "Check the ODBC driver and data source"),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DbError::connection("Failed to connect", "Check credentials");
        assert!(err.to_string().contains("Connection failed"));
    }

    #[test]
    fn test_error_suggestion() {
        let err = DbError::database("Syntax error", Some("42000".to_string()), "Check SQL syntax");
        assert_eq!(err.suggestion(), Some("Check SQL syntax"));
        assert_eq!(DbError::internal("x").suggestion(), None);
    }

    #[test]
    fn test_error_retryable() {
        assert!(DbError::connection("err", "sugg").is_retryable());
        assert!(!DbError::configuration("init called twice").is_retryable());
    }

    #[test]
    fn test_load_incomplete_joins_names() {
        let err = DbError::load_incomplete("Order", ["Id", "Name"]);
        match &err {
            DbError::LoadIncomplete { failed_fields, .. } => assert_eq!(failed_fields, "Id;Name;"),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().contains("[Order]"));
    }

    #[test]
    fn test_classify_sql_server_numbers() {
        assert_eq!(
            ConstraintKind::classify(None, Some(547), Some(16)),
            Some(ConstraintKind::ForeignKey)
        );
        assert_eq!(
            ConstraintKind::classify(None, Some(2601), Some(14)),
            Some(ConstraintKind::UniqueKey)
        );
        // same number, different class is not a constraint violation
        assert_eq!(ConstraintKind::classify(None, Some(547), Some(11)), None);
    }

    #[test]
    fn test_classify_mysql_and_sqlstate() {
        assert_eq!(
            ConstraintKind::classify(Some("23000"), Some(1062), None),
            Some(ConstraintKind::UniqueKey)
        );
        assert_eq!(
            ConstraintKind::classify(Some("23000"), Some(1451), None),
            Some(ConstraintKind::ForeignKey)
        );
        assert_eq!(
            ConstraintKind::classify(Some("23505"), None, None),
            Some(ConstraintKind::UniqueKey)
        );
        assert_eq!(ConstraintKind::classify(Some("42000"), None, None), None);
    }

    #[test]
    fn test_friendly_message_localized() {
        let err = DbError::database_native("FK conflict", None, Some(547), Some(16));
        let zh = friendly_message(&err, Locale::SimplifiedChinese).unwrap();
        assert!(zh.contains("约束"));
        let en = friendly_message(&err, Locale::English).unwrap();
        assert!(en.contains("referenced"));
        assert!(friendly_message(&DbError::internal("boom"), Locale::English).is_none());
    }

    #[test]
    fn test_error_message_prefers_friendly_text() {
        let err = DbError::database_native("dup", None, Some(2601), Some(14));
        assert_eq!(error_message(&err, Locale::English), UNIQUE_KEY_MESSAGE_EN);

        let plain = DbError::invalid_operation("no transaction is active");
        assert_eq!(
            error_message(&plain, Locale::English),
            "Invalid operation: no transaction is active"
        );
    }

    #[test]
    fn test_error_detail_has_timestamp_and_kind() {
        let detail = error_detail(&DbError::internal("boom"));
        assert!(detail.starts_with("Exception generated at: "));
        assert!(detail.contains("(InternalError)"));
    }
}
