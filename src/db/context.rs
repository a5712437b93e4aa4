//! Database context: one connection, at most one transaction and the current
//! command.
//!
//! Every execute-family call goes through the same envelope:
//!
//! 1. open the connection if needed and raise before-execute
//! 2. run the command (bounded by the command timeout, if any)
//! 3. on failure roll back the open transaction, close the connection unless
//!    configured to keep it, notify the exception hooks and return the error
//! 4. on success raise after-execute
//!
//! Contexts that open and close around each call (`auto_open_close`) close the
//! connection again once the call is done.

use crate::config::DEFAULT_RESULT_CAPACITY;
use crate::db::hooks;
use crate::db::provider::{Connection, ConnectionInfo};
use crate::db::registry::ConnectionRegistry;
use crate::error::{DbError, DbResult};
use crate::mapping::{Entity, LoadOptions, RowAdapter, load_item};
use crate::models::{
    Command, DataReader, DataSet, DataTable, ExecuteResult, PAGE_INDEX_PARAMETER,
    PAGE_SIZE_PARAMETER, Parameter, ParameterDirection, ProviderKind, TOTAL_RECORDS_PARAMETER,
    Value, calc_page_count,
};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Behavior switches of a context.
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Begin a transaction as soon as the connection opens.
    pub use_transaction: bool,
    /// Open lazily before each call and close after it.
    pub auto_open_close: bool,
    /// Leave the connection open when a call fails.
    pub keep_connection_on_exception: bool,
    /// Copy output parameters back into the bound entity after a call.
    pub auto_output_values: bool,
    /// Initial capacity of materialized lists.
    pub result_capacity: usize,
    pub command_timeout: Option<Duration>,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            use_transaction: false,
            auto_open_close: false,
            keep_connection_on_exception: false,
            auto_output_values: false,
            result_capacity: DEFAULT_RESULT_CAPACITY,
            command_timeout: None,
        }
    }
}

impl ContextOptions {
    pub fn transactional() -> Self {
        Self {
            use_transaction: true,
            ..Self::default()
        }
    }

    /// Options for a context owned by a business object.
    pub fn auto_open_close() -> Self {
        Self {
            auto_open_close: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunMode {
    Query,
    NonQuery,
}

pub struct DbContext {
    info: ConnectionInfo,
    connection: Box<dyn Connection>,
    options: ContextOptions,
    in_transaction: bool,
    command: Command,
    /// Suppresses the exception hooks for the next call only.
    ignore_error_event: bool,
}

impl DbContext {
    /// Open a context on the default registered connection.
    pub async fn open(use_transaction: bool) -> DbResult<Self> {
        let info = ConnectionRegistry::global().resolve(None, None)?;
        Self::connect(info, Self::options_for(use_transaction)).await
    }

    /// Open a context on the default provider with an explicit connection string.
    pub async fn open_with(connection_string: &str, use_transaction: bool) -> DbResult<Self> {
        let info = ConnectionRegistry::global().resolve(None, Some(connection_string))?;
        Self::connect(info, Self::options_for(use_transaction)).await
    }

    /// Open a context on a named registration.
    pub async fn open_named(name: &str, use_transaction: bool) -> DbResult<Self> {
        let info = ConnectionRegistry::global().resolve(Some(name), None)?;
        Self::connect(info, Self::options_for(use_transaction)).await
    }

    fn options_for(use_transaction: bool) -> ContextOptions {
        if use_transaction {
            ContextOptions::transactional()
        } else {
            ContextOptions::default()
        }
    }

    /// Create a context from explicit settings.
    ///
    /// Unless `auto_open_close` is set, the connection is opened right away
    /// (and a transaction begun when requested).
    pub async fn connect(info: ConnectionInfo, options: ContextOptions) -> DbResult<Self> {
        if options.result_capacity == 0 {
            return Err(DbError::configuration("result capacity must be greater than 0"));
        }
        let connection = info.create_connection()?;
        let mut context = Self {
            info,
            connection,
            options,
            in_transaction: false,
            command: Command::text(""),
            ignore_error_event: false,
        };
        if !context.options.auto_open_close {
            context.ensure_open().await?;
        }
        Ok(context)
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.info.kind()
    }

    pub fn connection_string(&self) -> &str {
        &self.info.connection_string
    }

    /// Prefix put in front of logical parameter names.
    pub fn param_prefix(&self) -> &str {
        &self.info.param_prefix
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn command_mut(&mut self) -> &mut Command {
        &mut self.command
    }

    pub fn set_result_capacity(&mut self, capacity: usize) -> DbResult<()> {
        if capacity == 0 {
            return Err(DbError::invalid_operation("result capacity must be greater than 0"));
        }
        self.options.result_capacity = capacity;
        Ok(())
    }

    pub fn set_keep_connection_on_exception(&mut self, keep: bool) {
        self.options.keep_connection_on_exception = keep;
    }

    pub fn set_auto_output_values(&mut self, enabled: bool) {
        self.options.auto_output_values = enabled;
    }

    pub fn set_command_timeout(&mut self, timeout: Option<Duration>) {
        self.options.command_timeout = timeout;
    }

    /// Do not notify the exception hooks if the next call fails.
    pub fn ignore_error_event(&mut self) -> &mut Self {
        self.ignore_error_event = true;
        self
    }

    // -------------------------------------------------------------------------
    // Connection and transaction
    // -------------------------------------------------------------------------

    /// Open the connection if it is closed.
    pub async fn ensure_open(&mut self) -> DbResult<()> {
        if self.connection.is_open() {
            return Ok(());
        }
        self.connection.open().await?;
        info!(provider = %self.provider_kind(), "Context connection opened");
        hooks::raise_connection_opened(self);
        if self.options.use_transaction && !self.in_transaction {
            self.begin_transaction().await?;
        }
        Ok(())
    }

    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        if self.in_transaction {
            return Err(DbError::invalid_operation("a transaction is already active"));
        }
        if !self.connection.is_open() {
            self.connection.open().await?;
            hooks::raise_connection_opened(self);
        }
        self.connection.begin_transaction().await?;
        self.in_transaction = true;
        debug!(provider = %self.provider_kind(), "Transaction started");
        Ok(())
    }

    pub async fn commit_transaction(&mut self) -> DbResult<()> {
        if !self.in_transaction {
            return Err(DbError::invalid_operation("no active transaction to commit"));
        }
        self.connection.commit().await?;
        self.in_transaction = false;
        debug!(provider = %self.provider_kind(), "Transaction committed");
        Ok(())
    }

    /// Roll back the active transaction. Failures are logged, not returned.
    pub async fn rollback_transaction(&mut self) {
        if !self.in_transaction {
            return;
        }
        self.in_transaction = false;
        match self.connection.rollback().await {
            Ok(()) => debug!(provider = %self.provider_kind(), "Transaction rolled back"),
            Err(e) => warn!(error = %e, "Failed to roll back transaction"),
        }
    }

    /// Close the connection. Failures are logged, not returned.
    pub async fn close(&mut self) {
        if !self.connection.is_open() {
            return;
        }
        self.in_transaction = false;
        if let Err(e) = self.connection.close().await {
            warn!(error = %e, "Failed to close connection");
        }
    }

    /// Roll back anything uncommitted and close.
    pub async fn dispose(&mut self) {
        self.rollback_transaction().await;
        self.close().await;
    }

    // -------------------------------------------------------------------------
    // Commands and parameters
    // -------------------------------------------------------------------------

    /// Make a stored procedure call the current command.
    pub fn create_command(&mut self, procedure: &str) -> &mut Self {
        self.command = Command::procedure(procedure);
        self
    }

    /// Make a SQL statement the current command.
    pub fn create_text_command(&mut self, sql: &str) -> &mut Self {
        self.command = Command::text(sql);
        self
    }

    pub fn clear_command(&mut self) {
        self.command.clear();
    }

    /// Add an input parameter; `name` is the logical name without prefix.
    pub fn add_parameter(&mut self, name: &str, value: impl Into<Value>) -> &mut Self {
        let full = format!("{}{}", self.info.param_prefix, name);
        self.command.parameters.push(Parameter::input(full, value));
        self
    }

    /// Add a parameter with a declared type, size and direction.
    pub fn add_parameter_typed(
        &mut self,
        name: &str,
        type_name: &str,
        size: Option<i32>,
        direction: ParameterDirection,
        value: impl Into<Value>,
    ) -> &mut Self {
        let full = format!("{}{}", self.info.param_prefix, name);
        let mut parameter = Parameter::declared(full, type_name, size, direction);
        parameter.value = value.into();
        self.command.parameters.push(parameter);
        self
    }

    /// Append the trailing PageIndex, PageSize and TotalRecords parameters.
    pub fn add_paging_parameters(&mut self, page_index: i32, page_size: i32) -> &mut Self {
        self.add_parameter_typed(
            PAGE_INDEX_PARAMETER,
            "int",
            Some(4),
            ParameterDirection::Input,
            page_index,
        )
        .add_parameter_typed(
            PAGE_SIZE_PARAMETER,
            "int",
            Some(4),
            ParameterDirection::Input,
            page_size,
        )
        .add_parameter_typed(
            TOTAL_RECORDS_PARAMETER,
            "int",
            Some(4),
            ParameterDirection::Output,
            Value::Null,
        )
    }

    /// Value of a parameter of the current command by logical name.
    pub fn parameter_value(&self, name: &str) -> DbResult<&Value> {
        Ok(&self.command.find_parameter(&self.info.param_prefix, name)?.value)
    }

    /// TotalRecords reported by the last call, 0 when unavailable.
    pub fn total_records_from_last_query(&self) -> i32 {
        self.parameter_value(TOTAL_RECORDS_PARAMETER)
            .ok()
            .and_then(Value::as_i64)
            .and_then(|n| i32::try_from(n).ok())
            .unwrap_or(0)
    }

    /// Page count for the last call's total and page size, 0 when unavailable.
    pub fn page_count_from_last_query(&self) -> i32 {
        let page_size = self
            .parameter_value(PAGE_SIZE_PARAMETER)
            .ok()
            .and_then(Value::as_i64)
            .and_then(|n| i32::try_from(n).ok())
            .unwrap_or(0);
        calc_page_count(self.total_records_from_last_query(), page_size)
    }

    // -------------------------------------------------------------------------
    // Execution envelope
    // -------------------------------------------------------------------------

    async fn run(&mut self, mode: RunMode) -> DbResult<ExecuteResult> {
        let silent = std::mem::take(&mut self.ignore_error_event);
        match self.run_command(mode).await {
            Ok(result) => {
                hooks::raise_after_execute(self);
                if self.options.auto_open_close && !self.in_transaction {
                    self.close().await;
                }
                Ok(result)
            }
            Err(err) => {
                if silent {
                    debug!(command = %self.command.text, error = %err, "Command failed");
                } else {
                    error!(command = %self.command.text, error = %err, "Command failed");
                }
                self.rollback_transaction().await;
                if !self.options.keep_connection_on_exception || self.options.auto_open_close {
                    self.close().await;
                }
                if !silent {
                    hooks::raise_exception(self, &err);
                }
                Err(err)
            }
        }
    }

    async fn run_command(&mut self, mode: RunMode) -> DbResult<ExecuteResult> {
        self.ensure_open().await?;
        hooks::raise_before_execute(self);
        debug!(
            command = %self.command.text,
            params = self.command.parameters.len(),
            "Executing command"
        );

        let text = self.command.text.clone();
        let connection = &mut self.connection;
        let command = &mut self.command;
        let call = async move {
            match mode {
                RunMode::Query => connection.query(command).await,
                RunMode::NonQuery => connection
                    .execute(command)
                    .await
                    .map(|n| ExecuteResult::new(Vec::new(), n)),
            }
        };
        match self.options.command_timeout {
            Some(limit) => tokio::time::timeout(limit, call)
                .await
                .map_err(|_| DbError::timeout(text, limit.as_secs()))?,
            None => call.await,
        }
    }

    // -------------------------------------------------------------------------
    // Execute family
    // -------------------------------------------------------------------------

    /// Run the current command and return every result set.
    pub async fn execute_result(&mut self) -> DbResult<ExecuteResult> {
        self.run(RunMode::Query).await
    }

    /// First result set, empty when the call returned none.
    pub async fn execute_table(&mut self) -> DbResult<DataTable> {
        let result = self.run(RunMode::Query).await?;
        Ok(result.result_sets.into_iter().next().unwrap_or_default())
    }

    /// Result sets named in order by `names`; extra result sets are dropped.
    pub async fn execute_data_set(&mut self, names: &[&str]) -> DbResult<DataSet> {
        let result = self.run(RunMode::Query).await?;
        let tables = result
            .result_sets
            .into_iter()
            .zip(names)
            .map(|(table, name)| table.named(*name))
            .collect();
        Ok(DataSet { tables })
    }

    /// Result sets named "Table1" through "Table{count}".
    pub async fn execute_data_set_count(&mut self, count: usize) -> DbResult<DataSet> {
        let names: Vec<String> = (1..=count).map(|i| format!("Table{}", i)).collect();
        let refs: Vec<&str> = names.iter().map(String::as_str).collect();
        self.execute_data_set(&refs).await
    }

    pub async fn execute_list<T: Entity>(&mut self, options: LoadOptions) -> DbResult<Vec<T>> {
        let table = self.execute_table().await?;
        self.materialize(&table, options)
    }

    /// First row as an entity, `None` when there are no rows.
    pub async fn execute_single<T: Entity>(&mut self, options: LoadOptions) -> DbResult<Option<T>> {
        let table = self.execute_table().await?;
        if table.is_empty() {
            return Ok(None);
        }
        load_item(&RowAdapter::buffered(&table, 0), options).map(Some)
    }

    /// Entities keyed by an integer column. Duplicate keys are an error.
    pub async fn execute_map_by_int<T: Entity>(
        &mut self,
        key_column: &str,
        options: LoadOptions,
    ) -> DbResult<HashMap<i64, T>> {
        let table = self.execute_table().await?;
        map_rows(&table, key_column, options, |v| v.as_i64())
    }

    /// Entities keyed by a text column. Duplicate keys are an error.
    pub async fn execute_map_by_string<T: Entity>(
        &mut self,
        key_column: &str,
        options: LoadOptions,
    ) -> DbResult<HashMap<String, T>> {
        let table = self.execute_table().await?;
        map_rows(&table, key_column, options, Value::as_text)
    }

    /// Run the current command and return the number of affected rows.
    pub async fn execute_non_query(&mut self) -> DbResult<u64> {
        Ok(self.run(RunMode::NonQuery).await?.rows_affected)
    }

    /// First column of the first row, `Null` when there is none.
    pub async fn execute_scalar(&mut self) -> DbResult<Value> {
        let table = self.execute_table().await?;
        Ok(table.value(0, 0).cloned().unwrap_or(Value::Null))
    }

    /// `true` when the command affected at least one row.
    pub async fn execute_bool(&mut self) -> DbResult<bool> {
        Ok(self.execute_non_query().await? > 0)
    }

    /// First column of every row as text; NULLs are skipped.
    pub async fn execute_string_list(&mut self) -> DbResult<Vec<String>> {
        let table = self.execute_table().await?;
        Ok(table
            .rows
            .iter()
            .filter_map(|row| row.first().and_then(Value::as_text))
            .collect())
    }

    /// Run the current command and hand a forward-only reader to `read`.
    pub async fn execute_reader_with<R>(
        &mut self,
        read: impl FnOnce(&mut DataReader) -> DbResult<R>,
    ) -> DbResult<R> {
        let result = self.run(RunMode::Query).await?;
        let mut reader = DataReader::new(result.result_sets);
        read(&mut reader)
    }

    /// Run a T-SQL script whose batches are separated by `GO` lines.
    ///
    /// Returns the total of rows affected over all batches.
    pub async fn execute_script(&mut self, script: &str) -> DbResult<u64> {
        let mut total = 0;
        for batch in split_batches(script) {
            self.create_text_command(&batch);
            total += self.execute_non_query().await?;
        }
        Ok(total)
    }

    pub(crate) fn materialize<T: Entity>(
        &self,
        table: &DataTable,
        options: LoadOptions,
    ) -> DbResult<Vec<T>> {
        let mut items = Vec::with_capacity(self.options.result_capacity.max(table.row_count()));
        let mut adapter = RowAdapter::buffered(table, 0);
        for row in 0..table.row_count() {
            adapter.rebind(row);
            items.push(load_item(&adapter, options)?);
        }
        Ok(items)
    }
}

impl Drop for DbContext {
    fn drop(&mut self) {
        if self.connection.is_open() {
            warn!(
                provider = %self.provider_kind(),
                in_transaction = self.in_transaction,
                "Context dropped with an open connection; call dispose first"
            );
        }
    }
}

impl std::fmt::Debug for DbContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbContext")
            .field("info", &self.info)
            .field("open", &self.is_open())
            .field("in_transaction", &self.in_transaction)
            .field("command", &self.command.text)
            .finish()
    }
}

fn map_rows<K, T>(
    table: &DataTable,
    key_column: &str,
    options: LoadOptions,
    key_of: impl Fn(&Value) -> Option<K>,
) -> DbResult<HashMap<K, T>>
where
    K: Eq + Hash + std::fmt::Debug,
    T: Entity,
{
    let index = table.index_of(key_column).ok_or_else(|| {
        DbError::invalid_operation(format!("key column '{}' is not in the result", key_column))
    })?;
    let mut map = HashMap::with_capacity(table.row_count());
    let mut adapter = RowAdapter::buffered(table, 0);
    for (row, values) in table.rows.iter().enumerate() {
        let key = values.get(index).and_then(&key_of).ok_or_else(|| {
            DbError::invalid_operation(format!(
                "row {} has no usable value in key column '{}'",
                row, key_column
            ))
        })?;
        adapter.rebind(row);
        match map.entry(key) {
            Entry::Occupied(entry) => {
                return Err(DbError::invalid_operation(format!(
                    "duplicate key {:?} in column '{}'",
                    entry.key(),
                    key_column
                )));
            }
            Entry::Vacant(entry) => {
                entry.insert(load_item(&adapter, options)?);
            }
        }
    }
    Ok(map)
}

/// Split a T-SQL script on lines consisting only of `GO`.
pub fn split_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    for line in script.lines() {
        if line.trim().eq_ignore_ascii_case("go") {
            push_batch(&mut batches, &mut current);
        } else {
            current.push_str(line);
            current.push('\n');
        }
    }
    push_batch(&mut batches, &mut current);
    batches
}

fn push_batch(batches: &mut Vec<String>, current: &mut String) {
    let batch = current.trim();
    if !batch.is_empty() {
        batches.push(batch.to_string());
    }
    current.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_batches() {
        let script = "CREATE TABLE a (id int)\nGO\n  go  \nINSERT INTO a VALUES (1)\nGo\nSELECT 1";
        assert_eq!(
            split_batches(script),
            vec!["CREATE TABLE a (id int)", "INSERT INTO a VALUES (1)", "SELECT 1"]
        );
    }

    #[test]
    fn test_split_batches_ignores_go_inside_line() {
        let script = "SELECT 'GO' AS word\nGOTO_LABEL:";
        assert_eq!(split_batches(script).len(), 1);
    }

    #[test]
    fn test_default_options() {
        let options = ContextOptions::default();
        assert_eq!(options.result_capacity, DEFAULT_RESULT_CAPACITY);
        assert!(!options.use_transaction);
        assert!(ContextOptions::auto_open_close().auto_open_close);
    }
}
