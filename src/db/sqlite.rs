//! SQLite provider (sqlx).
//!
//! SQLite has no stored procedures: text commands work, procedure calls and
//! parameter derivation are rejected.

use crate::db::params::bind_sqlite_param;
use crate::db::provider::{Connection, Provider};
use crate::db::types::rows_to_table;
use crate::error::{DbError, DbResult};
use crate::models::{Command, DataTable, ExecuteResult, Parameter, ProviderKind};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteQueryResult, SqliteRow};
use sqlx::{ConnectOptions, Connection as SqlxConnection, Either, Executor, SqliteConnection as Conn};
use std::str::FromStr;
use tracing::{debug, info};

/// Built-in SQLite provider.
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteProvider;

impl Provider for SqliteProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sqlite
    }

    fn create_connection(&self, connection_string: &str) -> DbResult<Box<dyn Connection>> {
        Ok(Box::new(SqliteConnection::new(connection_string)))
    }
}

pub struct SqliteConnection {
    connection_string: String,
    conn: Option<Conn>,
}

impl SqliteConnection {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            conn: None,
        }
    }

    fn conn(&mut self) -> DbResult<&mut Conn> {
        self.conn
            .as_mut()
            .ok_or_else(|| DbError::invalid_operation("SQLite connection is not open"))
    }
}

fn unsupported_procedure(procedure: &str) -> DbError {
    DbError::invalid_operation(format!(
        "SQLite does not support stored procedures (called '{}')",
        procedure
    ))
}

#[async_trait]
impl Connection for SqliteConnection {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sqlite
    }

    fn is_open(&self) -> bool {
        self.conn.is_some()
    }

    async fn open(&mut self) -> DbResult<()> {
        if self.conn.is_some() {
            return Ok(());
        }
        let options = SqliteConnectOptions::from_str(&self.connection_string)
            .map_err(|e| {
                DbError::connection(
                    format!("Invalid SQLite connection string: {}", e),
                    "Check the connection URL format: sqlite:path/to/db.sqlite",
                )
            })?
            .create_if_missing(true);
        let conn = options.connect().await.map_err(|e| {
            DbError::connection(
                format!("Failed to connect: {}", e),
                "Verify the file path exists and is accessible: sqlite:path/to/db.sqlite",
            )
        })?;
        info!(provider = %ProviderKind::Sqlite, "Connection opened");
        self.conn = Some(conn);
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(conn) = self.conn.take() {
            conn.close().await?;
            info!(provider = %ProviderKind::Sqlite, "Connection closed");
        }
        Ok(())
    }

    async fn begin_transaction(&mut self) -> DbResult<()> {
        self.conn()?.execute("BEGIN").await?;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.conn()?.execute("COMMIT").await?;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.conn()?.execute("ROLLBACK").await?;
        Ok(())
    }

    async fn derive_parameters(&mut self, procedure: &str) -> DbResult<Vec<Parameter>> {
        Err(unsupported_procedure(procedure))
    }

    async fn query(&mut self, command: &mut Command) -> DbResult<ExecuteResult> {
        if command.is_procedure() {
            return Err(unsupported_procedure(&command.text));
        }
        let conn = self.conn()?;
        debug!(sql = %command.text, params = command.parameters.len(), "Executing text command");

        // Raw SQL allows several statements in one command
        let items: Vec<Either<SqliteQueryResult, SqliteRow>> = if command.parameters.is_empty() {
            (&mut *conn).fetch_many(command.text.as_str()).try_collect().await?
        } else {
            let mut query = sqlx::query(&command.text);
            for parameter in &command.parameters {
                query = bind_sqlite_param(query, &parameter.value);
            }
            (&mut *conn).fetch_many(query).try_collect().await?
        };

        let mut tables: Vec<DataTable> = Vec::new();
        let mut rows: Vec<SqliteRow> = Vec::new();
        let mut rows_affected = 0;
        for item in items {
            match item {
                Either::Left(done) => {
                    rows_affected += done.rows_affected();
                    if !rows.is_empty() {
                        tables.push(rows_to_table(&rows));
                        rows.clear();
                    }
                }
                Either::Right(row) => rows.push(row),
            }
        }
        if !rows.is_empty() {
            tables.push(rows_to_table(&rows));
        }
        Ok(ExecuteResult::new(tables, rows_affected))
    }

    async fn execute(&mut self, command: &mut Command) -> DbResult<u64> {
        Ok(self.query(command).await?.rows_affected)
    }
}
