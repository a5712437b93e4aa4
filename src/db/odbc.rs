//! ODBC provider (odbc-api).
//!
//! Every value travels as text: parameters are bound as character data and
//! result columns are fetched through a text row set. ODBC calls block, so each
//! operation moves the connection onto the blocking thread pool and back.
//!
//! Only the first result set of a call is read, and output parameters are not
//! supported.

use crate::db::provider::{Connection, Provider};
use crate::error::{DbError, DbResult};
use crate::models::{
    Command, DataTable, ExecuteResult, Parameter, ParameterDirection, ProviderKind, Value,
};
use async_trait::async_trait;
use odbc_api::buffers::TextRowSet;
use odbc_api::parameter::VarCharBox;
use odbc_api::{ConnectionOptions, Cursor, Environment, ResultSetMetadata};
use std::sync::LazyLock;
use tracing::{debug, info};

const BATCH_SIZE: usize = 1000;
const MAX_TEXT_LENGTH: usize = 4096;

static ENVIRONMENT: LazyLock<Result<Environment, String>> =
    LazyLock::new(|| Environment::new().map_err(|e| e.to_string()));

fn environment() -> DbResult<&'static Environment> {
    ENVIRONMENT.as_ref().map_err(|e| {
        DbError::connection(
            format!("Failed to create ODBC environment: {}", e),
            "Make sure an ODBC driver manager (unixODBC on Linux) is installed",
        )
    })
}

type OdbcConn = odbc_api::Connection<'static>;

/// Built-in ODBC provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct OdbcProvider;

impl Provider for OdbcProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Odbc
    }

    fn create_connection(&self, connection_string: &str) -> DbResult<Box<dyn Connection>> {
        Ok(Box::new(OdbcConnection::new(connection_string)))
    }
}

pub struct OdbcConnection {
    connection_string: String,
    conn: Option<OdbcConn>,
}

impl OdbcConnection {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            conn: None,
        }
    }

    /// Run `f` against the open connection on the blocking pool.
    async fn blocking<R, F>(&mut self, f: F) -> DbResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&OdbcConn) -> DbResult<R> + Send + 'static,
    {
        let conn = self
            .conn
            .take()
            .ok_or_else(|| DbError::invalid_operation("ODBC connection is not open"))?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = f(&conn);
            (conn, result)
        })
        .await
        .map_err(|e| DbError::internal(format!("ODBC worker failed: {}", e)))?;
        self.conn = Some(conn);
        result
    }
}

#[async_trait]
impl Connection for OdbcConnection {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Odbc
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    async fn open(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let env = environment()?;
        let connection_string = self.connection_string.clone();
        let conn = tokio::task::spawn_blocking(move || {
            env.connect_with_connection_string(&connection_string, ConnectionOptions::default())
        })
        .await
        .map_err(|e| DbError::internal(format!("ODBC worker failed: {}", e)))?
        .map_err(|e| {
            DbError::connection(
                format!("Failed to connect via ODBC: {}", e),
                "Check the Driver/DSN entry and the credentials in the connection string",
            )
        })?;
        info!(provider = %ProviderKind::Odbc, "Connection opened");
        self.conn = Some(conn);
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.take() {
            tokio::task::spawn_blocking(move || drop(conn))
                .await
                .map_err(|e| DbError::internal(format!("ODBC worker failed: {}", e)))?;
            info!(provider = %ProviderKind::Odbc, "Connection closed");
        }
        Ok(())
    }

    async fn begin_transaction(&mut self) -> DbResult<()> {
        self.blocking(|conn| Ok(conn.set_autocommit(false)?)).await
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.blocking(|conn| {
            conn.commit()?;
            Ok(conn.set_autocommit(true)?)
        })
        .await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.blocking(|conn| {
            conn.rollback()?;
            Ok(conn.set_autocommit(true)?)
        })
        .await
    }

    async fn derive_parameters(&mut self, procedure: &str) -> DbResult<Vec<Parameter>> {
        let name = procedure
            .rsplit_once('.')
            .map_or(procedure, |(_, name)| name)
            .trim_matches(|c| c == '[' || c == ']')
            .to_string();
        let sql = "SELECT PARAMETER_NAME, PARAMETER_MODE, DATA_TYPE, CHARACTER_MAXIMUM_LENGTH, IS_RESULT \
                   FROM INFORMATION_SCHEMA.PARAMETERS \
                   WHERE SPECIFIC_NAME = ? \
                   ORDER BY ORDINAL_POSITION";
        let table = self
            .blocking(move |conn| run(conn, sql, vec![Value::String(name)]).map(|(t, _)| t))
            .await?;

        let text = |row: &[Value], idx: usize| row.get(idx).and_then(Value::as_text).unwrap_or_default();
        let parameters: Vec<Parameter> = table
            .rows
            .iter()
            .map(|row| {
                let direction = if text(row, 4).eq_ignore_ascii_case("YES") {
                    ParameterDirection::ReturnValue
                } else {
                    ParameterDirection::from_mode(&text(row, 1))
                };
                Parameter::declared(
                    text(row, 0),
                    text(row, 2),
                    text(row, 3).parse::<i32>().ok(),
                    direction,
                )
            })
            .collect();
        debug!(procedure = %procedure, parameters = parameters.len(), "Derived ODBC parameters");
        Ok(parameters)
    }

    async fn query(&mut self, command: &mut Command) -> DbResult<ExecuteResult> {
        let (sql, values) = render(command)?;
        debug!(sql = %sql, params = values.len(), "Executing ODBC statement");
        let (table, rows_affected) = self.blocking(move |conn| run(conn, &sql, values)).await?;
        let result_sets = table.into_iter().collect::<Vec<_>>();
        Ok(ExecuteResult::new(result_sets, rows_affected))
    }

    async fn execute(&mut self, command: &mut Command) -> DbResult<u64> {
        Ok(self.query(command).await?.rows_affected)
    }
}

// =============================================================================
// Statement Helpers
// =============================================================================

/// Render a command as ODBC SQL plus its positional values.
///
/// Procedures use the `{CALL name(?, ...)}` escape sequence.
fn render(command: &Command) -> DbResult<(String, Vec<Value>)> {
    if !command.is_procedure() {
        let values = command.parameters.iter().map(|p| p.value.clone()).collect();
        return Ok((command.text.clone(), values));
    }
    if let Some(output) = command.parameters.iter().find(|p| p.direction.is_output()) {
        return Err(DbError::invalid_operation(format!(
            "ODBC calls do not support output parameters ('{}' on '{}')",
            output.name, command.text
        )));
    }
    let values: Vec<Value> = command
        .parameters
        .iter()
        .filter(|p| p.direction == ParameterDirection::Input)
        .map(|p| p.value.clone())
        .collect();
    let markers = vec!["?"; values.len()].join(", ");
    Ok((format!("{{CALL {}({})}}", command.text, markers), values))
}

fn to_parameter(value: &Value) -> VarCharBox {
    match value {
        Value::Null => VarCharBox::null(),
        Value::Bool(v) => VarCharBox::from_string(if *v { "1" } else { "0" }.to_string()),
        other => VarCharBox::from_string(other.to_string()),
    }
}

/// Execute one statement and buffer its first result set.
fn run(conn: &OdbcConn, sql: &str, values: Vec<Value>) -> DbResult<(Option<DataTable>, u64)> {
    let parameters: Vec<VarCharBox> = values.iter().map(to_parameter).collect();
    let mut statement = conn.preallocate()?;
    let table = match statement.execute(sql, parameters.as_slice())? {
        Some(mut cursor) => {
            let count = usize::from(cursor.num_result_cols()?.unsigned_abs());
            let mut columns = Vec::with_capacity(count);
            for idx in 1..=count {
                columns.push(cursor.col_name(idx as u16)?);
            }
            let mut table = DataTable::new(columns);

            let mut buffers = TextRowSet::for_cursor(BATCH_SIZE, &mut cursor, Some(MAX_TEXT_LENGTH))?;
            let mut rows = cursor.bind_buffer(&mut buffers)?;
            while let Some(batch) = rows.fetch()? {
                for row_idx in 0..batch.num_rows() {
                    let row = (0..count)
                        .map(|col_idx| {
                            batch.at(col_idx, row_idx).map_or(Value::Null, |bytes| {
                                Value::String(String::from_utf8_lossy(bytes).into_owned())
                            })
                        })
                        .collect();
                    table.push_row(row);
                }
            }
            Some(table)
        }
        None => None,
    };
    let rows_affected = statement.row_count()?.unwrap_or(0) as u64;
    Ok((table, rows_affected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_procedure_call() {
        let mut command = Command::procedure("dbo.GetOrders");
        command.parameters.push(Parameter::input("@Status", 1));
        command.parameters.push(Parameter::input("@Region", "west"));
        let (sql, values) = render(&command).unwrap();
        assert_eq!(sql, "{CALL dbo.GetOrders(?, ?)}");
        assert_eq!(values, vec![Value::Int(1), Value::from("west")]);
    }

    #[test]
    fn test_render_rejects_outputs() {
        let mut command = Command::procedure("dbo.GetOrders");
        command.parameters.push(Parameter::declared(
            "@TotalRecords",
            "int",
            Some(4),
            ParameterDirection::InputOutput,
        ));
        assert!(matches!(
            render(&command),
            Err(DbError::InvalidOperation { .. })
        ));
    }

    #[test]
    fn test_render_text_passthrough() {
        let mut command = Command::text("SELECT * FROM t WHERE id = ?");
        command.parameters.push(Parameter::input("@id", 5));
        let (sql, values) = render(&command).unwrap();
        assert_eq!(sql, "SELECT * FROM t WHERE id = ?");
        assert_eq!(values, vec![Value::Int(5)]);
    }
}
