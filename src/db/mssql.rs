//! SQL Server provider (tiberius).
//!
//! A procedure call is sent as one batch. Output parameters are declared as
//! local variables, passed with `OUTPUT`, and selected back at the end of the
//! batch:
//!
//! ```sql
//! DECLARE @__o2 int = @P2;
//! EXEC dbo.GetOrders @Status = @P1, @TotalRecords = @__o2 OUTPUT;
//! SELECT @@ROWCOUNT AS [__rows], @__o2 AS [@TotalRecords];
//! ```

use crate::db::provider::{Connection, Provider};
use crate::error::{DbError, DbResult};
use crate::models::{
    Command, DataTable, ExecuteResult, Parameter, ParameterDirection, ProviderKind, Value,
};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use tiberius::{Client, ColumnData, Config, FromSql, Query, QueryItem, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

type MsSqlClient = Client<Compat<TcpStream>>;

const ROWCOUNT_COLUMN: &str = "__rows";

/// Built-in SQL Server provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsSqlProvider;

impl Provider for MsSqlProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MsSql
    }

    fn create_connection(&self, connection_string: &str) -> DbResult<Box<dyn Connection>> {
        Ok(Box::new(MsSqlConnection::new(connection_string)))
    }
}

pub struct MsSqlConnection {
    connection_string: String,
    client: Option<MsSqlClient>,
}

impl MsSqlConnection {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            client: None,
        }
    }

    fn client(&mut self) -> DbResult<&mut MsSqlClient> {
        self.client
            .as_mut()
            .ok_or_else(|| DbError::invalid_operation("SQL Server connection is not open"))
    }

    fn config(&self) -> DbResult<Config> {
        let parsed = if self.connection_string.trim_start().starts_with("jdbc:") {
            Config::from_jdbc_string(&self.connection_string)
        } else {
            Config::from_ado_string(&self.connection_string)
        };
        parsed.map_err(|e| {
            DbError::connection(
                format!("Invalid SQL Server connection string: {}", e),
                "Use an ADO string such as Server=tcp:host,1433;Database=db;User Id=sa;Password=...",
            )
        })
    }

    async fn batch_statement(&mut self, sql: &str) -> DbResult<()> {
        self.client()?.execute(sql, &[]).await?;
        Ok(())
    }
}

#[async_trait]
impl Connection for MsSqlConnection {
    fn kind(&self) -> ProviderKind {
        ProviderKind::MsSql
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    async fn open(&mut self) -> DbResult<()> {
        if self.client.is_some() {
            return Ok(());
        }
        let config = self.config()?;
        let tcp = TcpStream::connect(config.get_addr()).await.map_err(|e| {
            DbError::connection(
                format!("Failed to connect: {}", e),
                "Check that SQL Server is running and accepts TCP connections",
            )
        })?;
        tcp.set_nodelay(true).ok();
        let client = Client::connect(config, tcp.compat_write()).await?;
        info!(provider = %ProviderKind::MsSql, "Connection opened");
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(client) = self.client.take() {
            client.close().await?;
            info!(provider = %ProviderKind::MsSql, "Connection closed");
        }
        Ok(())
    }

    async fn begin_transaction(&mut self) -> DbResult<()> {
        self.batch_statement("BEGIN TRANSACTION").await
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.batch_statement("COMMIT TRANSACTION").await
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.batch_statement("IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION").await
    }

    async fn derive_parameters(&mut self, procedure: &str) -> DbResult<Vec<Parameter>> {
        let client = self.client()?;
        let mut query = Query::new(
            "SELECT p.name, TYPE_NAME(p.user_type_id), CAST(p.max_length AS int), p.is_output \
             FROM sys.parameters p \
             WHERE p.object_id = OBJECT_ID(@P1) \
             ORDER BY p.parameter_id",
        );
        query.bind(procedure);
        let rows = query.query(client).await?.into_first_result().await?;

        let parameters: Vec<Parameter> = rows
            .iter()
            .map(|row| {
                let type_name = row.try_get::<&str, _>(1).ok().flatten().unwrap_or_default();
                let max_length = row.try_get::<i32, _>(2).ok().flatten().unwrap_or(-1);
                let size = match type_name {
                    // max_length is in bytes
                    "nvarchar" | "nchar" if max_length > 0 => max_length / 2,
                    _ => max_length,
                };
                let direction = if row.try_get::<bool, _>(3).ok().flatten().unwrap_or(false) {
                    ParameterDirection::InputOutput
                } else {
                    ParameterDirection::Input
                };
                Parameter::declared(
                    row.try_get::<&str, _>(0).ok().flatten().unwrap_or_default(),
                    type_name,
                    Some(size),
                    direction,
                )
            })
            .collect();
        debug!(procedure = %procedure, parameters = parameters.len(), "Derived SQL Server parameters");
        Ok(parameters)
    }

    async fn query(&mut self, command: &mut Command) -> DbResult<ExecuteResult> {
        let batch = Batch::build(command);
        debug!(sql = %batch.sql, "Executing SQL Server batch");
        let client = self.client()?;
        let mut query = Query::new(batch.sql.clone());
        for value in &batch.values {
            bind_value(&mut query, value);
        }
        let mut tables = read_result_sets(query, client).await?;

        if batch.outputs.is_empty() {
            return Ok(ExecuteResult::new(tables, 0));
        }
        let Some(trailer) = tables.pop() else {
            return Err(DbError::internal("output parameters were not returned"));
        };
        let mut rows_affected = 0;
        if let Some(row) = trailer.rows.first() {
            rows_affected = row
                .first()
                .and_then(Value::as_i64)
                .map_or(0, |n| u64::try_from(n).unwrap_or(0));
            for (slot, index) in batch.outputs.iter().enumerate() {
                if let Some(value) = row.get(slot + 1) {
                    command.parameters[*index].value = value.clone();
                }
            }
        }
        Ok(ExecuteResult::new(tables, rows_affected))
    }

    async fn execute(&mut self, command: &mut Command) -> DbResult<u64> {
        let batch = Batch::build(command);
        if !batch.outputs.is_empty() {
            return Ok(self.query(command).await?.rows_affected);
        }
        debug!(sql = %batch.sql, "Executing SQL Server batch");
        let client = self.client()?;
        let mut query = Query::new(batch.sql);
        for value in &batch.values {
            bind_value(&mut query, value);
        }
        Ok(query.execute(client).await?.total())
    }
}

// =============================================================================
// Batch Construction
// =============================================================================

/// One command rendered as a parameterized batch.
#[derive(Debug, Default, PartialEq)]
struct Batch {
    sql: String,
    /// Values for @P1, @P2, ...
    values: Vec<Value>,
    /// Command parameter indexes of the outputs, in trailer column order.
    outputs: Vec<usize>,
}

impl Batch {
    fn build(command: &Command) -> Self {
        let mut batch = Batch::default();
        if !command.is_procedure() {
            // Text commands reference parameters positionally as @P1, @P2, ...
            batch.sql = command.text.clone();
            batch.values = command.parameters.iter().map(|p| p.value.clone()).collect();
            return batch;
        }

        let mut declarations = String::new();
        let mut arguments = Vec::new();
        let mut selects = vec![format!("@@ROWCOUNT AS [{}]", ROWCOUNT_COLUMN)];
        for (index, parameter) in command.parameters.iter().enumerate() {
            match parameter.direction {
                ParameterDirection::ReturnValue => {}
                ParameterDirection::Input => {
                    batch.values.push(parameter.value.clone());
                    arguments.push(format!("{} = @P{}", parameter.name, batch.values.len()));
                }
                ParameterDirection::Output | ParameterDirection::InputOutput => {
                    let variable = format!("@__o{}", index);
                    let initial = if parameter.direction == ParameterDirection::InputOutput {
                        batch.values.push(parameter.value.clone());
                        format!("@P{}", batch.values.len())
                    } else {
                        "NULL".to_string()
                    };
                    declarations.push_str(&format!(
                        "DECLARE {} {} = {};\n",
                        variable,
                        declared_type(parameter),
                        initial
                    ));
                    arguments.push(format!("{} = {} OUTPUT", parameter.name, variable));
                    selects.push(format!("{} AS [{}]", variable, parameter.name));
                    batch.outputs.push(index);
                }
            }
        }

        batch.sql = format!("{}EXEC {} {};", declarations, command.text, arguments.join(", "));
        if !batch.outputs.is_empty() {
            batch.sql.push_str(&format!("\nSELECT {};", selects.join(", ")));
        }
        batch
    }
}

/// T-SQL type used to declare the local variable of an output parameter.
fn declared_type(parameter: &Parameter) -> String {
    let type_name = parameter.type_name.to_lowercase();
    let length = match parameter.size {
        Some(size) if size > 0 => size.to_string(),
        _ => "max".to_string(),
    };
    match type_name.as_str() {
        "" => "sql_variant".to_string(),
        "nvarchar" | "varchar" | "varbinary" => format!("{}({})", type_name, length),
        "nchar" | "char" | "binary" => match parameter.size {
            Some(size) if size > 0 => format!("{}({})", type_name, size),
            _ => type_name,
        },
        "decimal" | "numeric" => "decimal(38, 8)".to_string(),
        _ => type_name,
    }
}

fn bind_value<'a>(query: &mut Query<'a>, value: &Value) {
    match value {
        Value::Null => query.bind(Option::<String>::None),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Decimal(v) | Value::String(v) => query.bind(v.clone()),
        Value::Bytes(v) => query.bind(v.clone()),
        Value::DateTime(v) => query.bind(*v),
        Value::DateTimeUtc(v) => query.bind(*v),
        Value::Date(v) => query.bind(*v),
        Value::Time(v) => query.bind(*v),
        Value::Uuid(v) => query.bind(*v),
        Value::Json(v) => query.bind(v.to_string()),
    }
}

// =============================================================================
// Result Decoding
// =============================================================================

async fn read_result_sets(query: Query<'_>, client: &mut MsSqlClient) -> DbResult<Vec<DataTable>> {
    let mut stream = query.query(client).await?;
    let mut tables: Vec<DataTable> = Vec::new();
    while let Some(item) = stream.try_next().await? {
        match item {
            QueryItem::Metadata(meta) => {
                let columns = meta.columns().iter().map(|c| c.name().to_string()).collect();
                tables.push(DataTable::new(columns));
            }
            QueryItem::Row(row) => {
                if let Some(table) = tables.last_mut() {
                    table.push_row(row_to_values(row));
                }
            }
        }
    }
    Ok(tables)
}

fn row_to_values(row: Row) -> Vec<Value> {
    row.into_iter().map(|data| column_to_value(&data)).collect()
}

fn column_to_value(data: &ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(v) => v.map_or(Value::Null, |v| Value::Int(v.into())),
        ColumnData::I16(v) => v.map_or(Value::Null, |v| Value::Int(v.into())),
        ColumnData::I32(v) => v.map_or(Value::Null, |v| Value::Int(v.into())),
        ColumnData::I64(v) => v.map_or(Value::Null, Value::Int),
        ColumnData::F32(v) => v.map_or(Value::Null, |v| Value::Float(v.into())),
        ColumnData::F64(v) => v.map_or(Value::Null, Value::Float),
        ColumnData::Bit(v) => v.map_or(Value::Null, Value::Bool),
        ColumnData::String(v) => v
            .as_ref()
            .map_or(Value::Null, |s| Value::String(s.to_string())),
        ColumnData::Guid(v) => v.map_or(Value::Null, Value::Uuid),
        ColumnData::Binary(v) => v.as_ref().map_or(Value::Null, |b| Value::Bytes(b.to_vec())),
        ColumnData::Numeric(v) => v.map_or(Value::Null, |n| Value::Decimal(n.to_string())),
        ColumnData::Xml(v) => v
            .as_ref()
            .map_or(Value::Null, |x| Value::String(x.clone().into_owned().into_string())),
        ColumnData::Date(_) => decode_with::<chrono::NaiveDate>(data, Value::Date),
        ColumnData::Time(_) => decode_with::<chrono::NaiveTime>(data, Value::Time),
        ColumnData::DateTimeOffset(_) => {
            decode_with::<chrono::DateTime<chrono::Utc>>(data, Value::DateTimeUtc)
        }
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            decode_with::<chrono::NaiveDateTime>(data, Value::DateTime)
        }
    }
}

fn decode_with<'a, T: FromSql<'a>>(data: &'a ColumnData<'static>, wrap: fn(T) -> Value) -> Value {
    match T::from_sql(data) {
        Ok(Some(v)) => wrap(v),
        Ok(None) => Value::Null,
        Err(e) => {
            tracing::error!("Failed to decode date/time column: {:?}", e);
            Value::Null
        }
    }
}
